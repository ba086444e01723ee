mod common;

use std::io;

use comms::{
    msg::{Command, Msg, Reply},
    value::Value,
};
use common::{RawFrame, channel_pair, expect_reply, get_register, request};
use worker::{DiscoWorker, WorkerErr, WorkerInfo, WorkerState};

#[tokio::test]
async fn sequence_of_commands_adds_registers() -> io::Result<()> {
    let ((mut ctl_rx, mut ctl_tx), (mut wk_rx, mut wk_tx)) = channel_pair();

    let info = WorkerInfo::new(1, 4, 1)?;
    let mut worker = DiscoWorker::new(info, None, &mut wk_rx, &mut wk_tx)?;

    let controller = async {
        let cmds = [
            Command::SetRegister {
                reg_id: 0,
                value: Value::Int(10),
            },
            Command::SetRegister {
                reg_id: 1,
                value: Value::Int(20),
            },
            Command::Invoke {
                op: "add".into(),
                args: vec![0, 1],
                out: 2,
            },
        ];

        for cmd in cmds {
            assert_eq!(expect_reply(&mut ctl_rx, &mut ctl_tx, cmd).await?, Reply::Ack);
        }

        let sum = get_register(&mut ctl_rx, &mut ctl_tx, 2).await?;
        ctl_tx.send(&Msg::Control(Command::Shutdown)).await?;
        Ok::<_, io::Error>(sum)
    };

    let (res, sum) = tokio::join!(worker.main_loop(), controller);
    res?;

    assert_eq!(sum?, Value::Int(30));
    assert_eq!(worker.state(), WorkerState::Terminated);
    assert_eq!(worker.registers().len(), 3);
    Ok(())
}

#[tokio::test]
async fn shutdown_leaves_queued_commands_unread() -> io::Result<()> {
    let ((_ctl_rx, mut ctl_tx), (mut wk_rx, mut wk_tx)) = channel_pair();

    ctl_tx.send(&Msg::Control(Command::Shutdown)).await?;
    let queued = Command::SetRegister {
        reg_id: 0,
        value: Value::Int(1),
    };
    ctl_tx.send(&Msg::Control(queued.clone())).await?;

    let info = WorkerInfo::new(1, 2, 1)?;
    let mut worker = DiscoWorker::new(info, None, &mut wk_rx, &mut wk_tx)?;
    worker.main_loop().await?;

    assert_eq!(worker.state(), WorkerState::Terminated);
    assert!(worker.registers().is_empty());
    drop(worker);

    let Msg::Control(next) = wk_rx.recv().await? else {
        panic!("expected the queued command to still be in the channel");
    };
    assert_eq!(next, queued);
    Ok(())
}

#[tokio::test]
async fn unknown_kind_terminates_without_serving_queued_commands() -> io::Result<()> {
    let ((mut ctl_rx, mut ctl_tx), (mut wk_rx, mut wk_tx)) = channel_pair();

    ctl_tx
        .send(&RawFrame {
            kind: 0xff,
            body: Vec::new(),
        })
        .await?;
    ctl_tx
        .send(&Msg::Control(Command::SetRegister {
            reg_id: 0,
            value: Value::Int(1),
        }))
        .await?;

    let info = WorkerInfo::new(1, 2, 1)?;
    let mut worker = DiscoWorker::new(info, None, &mut wk_rx, &mut wk_tx)?;
    let res = worker.main_loop().await;

    assert!(matches!(res, Err(WorkerErr::Protocol(_))));
    assert_eq!(worker.state(), WorkerState::Terminated);
    assert!(worker.registers().is_empty());

    let msg: Msg = ctl_rx.recv().await?;
    assert!(matches!(msg, Msg::Err(_)));
    Ok(())
}

#[tokio::test]
async fn unknown_command_tag_is_a_protocol_error() -> io::Result<()> {
    let ((_ctl_rx, mut ctl_tx), (mut wk_rx, mut wk_tx)) = channel_pair();

    let frame = RawFrame {
        kind: 1,
        body: br#"{"format_disk":{"reg_id":0}}"#.to_vec(),
    };
    ctl_tx.send(&frame).await?;

    let info = WorkerInfo::new(0, 1, 1)?.with_local_id(0)?;
    let zero = worker::WorkerZeroData::new();
    let mut worker = DiscoWorker::new(info, Some(&zero), &mut wk_rx, &mut wk_tx)?;

    assert!(matches!(worker.main_loop().await, Err(WorkerErr::Protocol(_))));
    Ok(())
}

#[tokio::test]
async fn replies_from_the_controller_are_a_protocol_error() -> io::Result<()> {
    let ((_ctl_rx, mut ctl_tx), (mut wk_rx, mut wk_tx)) = channel_pair();
    ctl_tx.send(&Msg::Reply(Reply::Ack)).await?;

    let info = WorkerInfo::new(1, 2, 1)?;
    let mut worker = DiscoWorker::new(info, None, &mut wk_rx, &mut wk_tx)?;

    assert!(matches!(worker.main_loop().await, Err(WorkerErr::Protocol(_))));
    Ok(())
}

#[tokio::test]
async fn closed_channel_terminates_normally() -> io::Result<()> {
    let ((_ctl_rx, mut ctl_tx), (mut wk_rx, mut wk_tx)) = channel_pair();
    ctl_tx.close().await?;

    let info = WorkerInfo::new(1, 2, 1)?;
    let mut worker = DiscoWorker::new(info, None, &mut wk_rx, &mut wk_tx)?;
    worker.main_loop().await?;

    assert_eq!(worker.state(), WorkerState::Terminated);
    Ok(())
}

#[tokio::test]
async fn out_of_range_is_replied_and_the_loop_continues() -> io::Result<()> {
    let ((mut ctl_rx, mut ctl_tx), (mut wk_rx, mut wk_tx)) = channel_pair();

    let info = WorkerInfo::new(1, 2, 1)?;
    let mut worker = DiscoWorker::new(info, None, &mut wk_rx, &mut wk_tx)?;

    let controller = async {
        let read = request(&mut ctl_rx, &mut ctl_tx, Command::GetRegister { reg_id: 0 }).await?;
        let sparse = Command::SetRegister {
            reg_id: 3,
            value: Value::Null,
        };
        let write = request(&mut ctl_rx, &mut ctl_tx, sparse).await?;

        let set = Command::SetRegister {
            reg_id: 0,
            value: Value::from("ok"),
        };
        let ack = expect_reply(&mut ctl_rx, &mut ctl_tx, set).await?;

        ctl_tx.send(&Msg::Control(Command::Shutdown)).await?;
        Ok::<_, io::Error>((read, write, ack))
    };

    let (res, replies) = tokio::join!(worker.main_loop(), controller);
    res?;

    let (read, write, ack) = replies?;
    assert!(read.unwrap_err().contains("out of range"));
    assert!(write.is_err());
    assert_eq!(ack, Reply::Ack);
    assert_eq!(worker.registers().read(0)?, &Value::from("ok"));
    Ok(())
}

#[test]
fn worker_zero_data_requires_local_id_zero() {
    let ((_, _), (mut wk_rx, mut wk_tx)) = channel_pair();
    let zero = worker::WorkerZeroData::new();

    for worker_id in 0..4 {
        for local_worker_id in 0..=worker_id {
            for with_zero in [false, true] {
                let info = WorkerInfo::new(worker_id, 4, 2)
                    .unwrap()
                    .with_local_id(local_worker_id)
                    .unwrap();

                let data = with_zero.then_some(&zero);
                let built = DiscoWorker::new(info, data, &mut wk_rx, &mut wk_tx);

                match built {
                    Ok(worker) => {
                        assert_eq!(worker.worker_zero_data().is_some(), local_worker_id == 0);
                        assert_eq!(worker.info().local_worker_id() == 0, with_zero);
                    }
                    Err(e) => {
                        assert!(matches!(e, WorkerErr::InvalidIdentity(_)));
                        assert_ne!(with_zero, local_worker_id == 0);
                    }
                }
            }
        }
    }
}
