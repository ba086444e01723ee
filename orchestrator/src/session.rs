use std::{sync::Arc, thread::JoinHandle};

use comms::{
    OnoReceiver, OnoSender,
    msg::{CollectiveOp, Command, Msg, Reply},
    value::{Tensor, Value},
};
use futures::future;
use log::{info, warn};
use tokio::{
    io::{self, DuplexStream, ReadHalf, WriteHalf},
    runtime::Runtime,
};
use worker::{
    WorkerBuilder, WorkerInfo, WorkerZeroData, collective::LocalCollective, ops::OpRegistry,
};

use crate::error::{OrchestratorError, Result};

type LocalRx = OnoReceiver<ReadHalf<DuplexStream>>;
type LocalTx = OnoSender<WriteHalf<DuplexStream>>;

const CHANNEL_CAPACITY: usize = 64 * 1024;

/// Represents a group of workers hosted on threads of this process.
/// It lets it's owner drive every worker from a single instance.
pub struct Session {
    runtime: Runtime,
    workers: Vec<(LocalRx, LocalTx)>,
    handles: Vec<JoinHandle<worker::Result<()>>>,
    worker_zero_data: Arc<WorkerZeroData>,
}

impl Session {
    /// Creates a new `Session` whose workers know the builtin operations.
    ///
    /// # Arguments
    /// * `num_workers` - The amount of workers to spawn.
    /// * `num_groups` - The amount of collective groups, must divide `num_workers`.
    ///
    /// # Returns
    /// A new `Session` instance.
    pub fn new(num_workers: usize, num_groups: usize) -> Result<Self> {
        Self::with_ops(num_workers, num_groups, Arc::new(OpRegistry::with_builtins()))
    }

    /// Creates a new `Session` whose workers share the given operation registry.
    ///
    /// # Arguments
    /// * `num_workers` - The amount of workers to spawn.
    /// * `num_groups` - The amount of collective groups, must divide `num_workers`.
    /// * `ops` - The operations every worker can invoke.
    ///
    /// # Returns
    /// A new `Session` instance or an error if the layout is invalid or a worker
    /// thread couldn't be spawned.
    pub fn with_ops(num_workers: usize, num_groups: usize, ops: Arc<OpRegistry>) -> Result<Self> {
        if num_workers == 0 || num_groups == 0 || num_workers % num_groups != 0 {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{num_workers} worker(s) can't be split in {num_groups} group(s)"
            )));
        }

        info!("spawning {num_workers} worker(s) in {num_groups} group(s)");

        let runtime = Runtime::new()?;
        let worker_zero_data = Arc::new(WorkerZeroData::new());
        let groups: Vec<_> = (0..num_groups)
            .map(|_| LocalCollective::new(num_workers / num_groups))
            .collect();

        let mut workers = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let info = WorkerInfo::new(worker_id, num_workers, num_groups)?;
            let collective = Arc::clone(&groups[info.group()]);
            let zero = info.is_worker_zero().then(|| Arc::clone(&worker_zero_data));

            let (controller, hosted) = io::duplex(CHANNEL_CAPACITY);
            let (wk_rx, wk_tx) = io::split(hosted);
            let (rx, tx) = io::split(controller);

            let handle = WorkerBuilder::new(info)
                .ops(Arc::clone(&ops))
                .collective(collective)?
                .spawn(zero, wk_rx, wk_tx)?;

            workers.push(comms::channel(rx, tx));
            handles.push(handle);
        }

        Ok(Self {
            runtime,
            workers,
            handles,
            worker_zero_data,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Sends a command to a single worker and waits for its reply.
    ///
    /// # Errors
    /// `WorkerError` if the worker rejected the command.
    pub fn call(&mut self, worker_id: usize, cmd: Command) -> Result<Reply> {
        let (rx, tx) = worker_channel(&mut self.workers, worker_id)?;

        self.runtime.block_on(async {
            tx.send(&Msg::Control(cmd)).await?;
            recv_reply(worker_id, rx).await
        })
    }

    /// Sends a command to every worker and waits for all of their replies.
    ///
    /// Every command is sent before any reply is awaited, so collective commands
    /// don't wait on a peer that hasn't received them yet.
    ///
    /// # Returns
    /// The replies in worker order, or the error of the lowest failing worker.
    pub fn broadcast(&mut self, cmd: Command) -> Result<Vec<Reply>> {
        let msg = Msg::Control(cmd);
        let workers = &mut self.workers;

        self.runtime.block_on(async {
            for (_, tx) in workers.iter_mut() {
                tx.send(&msg).await?;
            }

            let replies = workers
                .iter_mut()
                .enumerate()
                .map(|(worker_id, (rx, _))| recv_reply(worker_id, rx));

            // Every reply is drained even after a failure, so the next command
            // doesn't read a stale one.
            future::join_all(replies)
                .await
                .into_iter()
                .collect::<Result<Vec<_>>>()
        })
    }

    pub fn set_register(&mut self, worker_id: usize, reg_id: usize, value: Value) -> Result<()> {
        let cmd = Command::SetRegister { reg_id, value };
        self.call(worker_id, cmd).and_then(|reply| expect_ack(worker_id, reply))
    }

    pub fn get_register(&mut self, worker_id: usize, reg_id: usize) -> Result<Value> {
        match self.call(worker_id, Command::GetRegister { reg_id })? {
            Reply::Value(value) => Ok(value),
            _ => Err(OrchestratorError::UnexpectedMsg {
                worker_id,
                got: "reply",
            }),
        }
    }

    /// Invokes a named operation on every worker.
    ///
    /// # Arguments
    /// * `op` - The name of the operation.
    /// * `args` - The registers holding the operands.
    /// * `out` - The register where every worker stores its result.
    pub fn invoke(&mut self, op: &str, args: &[usize], out: usize) -> Result<()> {
        let cmd = Command::Invoke {
            op: op.to_string(),
            args: args.to_vec(),
            out,
        };

        self.broadcast(cmd)?;
        Ok(())
    }

    /// Runs a collective operation across every group.
    pub fn collective(&mut self, op: CollectiveOp) -> Result<()> {
        self.broadcast(Command::Collective(op))?;
        Ok(())
    }

    /// Stores `tensor` in a register of a single worker.
    pub fn upload_tensor(
        &mut self,
        worker_id: usize,
        reg_id: usize,
        tensor: &Tensor,
    ) -> Result<()> {
        let (rx, tx) = worker_channel(&mut self.workers, worker_id)?;
        let cmd = Command::UploadTensor {
            reg_id,
            shape: tensor.shape().to_vec(),
        };

        self.runtime.block_on(async {
            tx.send(&Msg::Control(cmd)).await?;
            tx.send(&Msg::Data(tensor.data())).await?;
            let reply = recv_reply(worker_id, rx).await?;
            expect_ack(worker_id, reply)
        })
    }

    /// Fetches the flat elements of a tensor register of a single worker.
    pub fn download_tensor(&mut self, worker_id: usize, reg_id: usize) -> Result<Vec<f32>> {
        let (rx, tx) = worker_channel(&mut self.workers, worker_id)?;

        self.runtime.block_on(async {
            tx.send(&Msg::Control(Command::DownloadTensor { reg_id }))
                .await?;

            match rx.recv().await? {
                Msg::Data(nums) => Ok(nums.to_vec()),
                Msg::Err(detail) => Err(OrchestratorError::WorkerError {
                    worker_id,
                    msg: detail.into_owned(),
                }),
                other => Err(OrchestratorError::UnexpectedMsg {
                    worker_id,
                    got: other.kind(),
                }),
            }
        })
    }

    /// Hands `tensor` to worker zero, which stores it in `reg_id`.
    ///
    /// The command reaches every worker to keep their command streams aligned,
    /// the others acknowledge without doing anything.
    pub fn copy_to_worker0(&mut self, tensor: Tensor, reg_id: usize) -> Result<()> {
        self.worker_zero_data.push_host_array(tensor);
        self.broadcast(Command::CopyToWorker0 { reg_id })?;
        Ok(())
    }

    /// Fetches the tensor stored in worker zero's `reg_id`.
    pub fn copy_from_worker0(&mut self, reg_id: usize) -> Result<Tensor> {
        self.broadcast(Command::CopyFromWorker0 { reg_id })?;

        self.worker_zero_data
            .pop_host_array()
            .ok_or(OrchestratorError::UnexpectedMsg {
                worker_id: 0,
                got: "empty host queue",
            })
    }

    /// Waits until a worker has served every command sent to it so far.
    pub fn sync_worker(&mut self, worker_id: usize) -> Result<()> {
        match self.call(worker_id, Command::SyncWorker)? {
            Reply::Synced { worker_id: synced } if synced == worker_id => Ok(()),
            _ => Err(OrchestratorError::UnexpectedMsg {
                worker_id,
                got: "reply",
            }),
        }
    }

    /// Shuts every worker down and waits for their threads to finish.
    ///
    /// # Returns
    /// The first failure among the workers, after all of them were joined.
    pub fn shutdown(self) -> Result<()> {
        let Self {
            runtime,
            mut workers,
            handles,
            ..
        } = self;

        runtime.block_on(async {
            let msg = Msg::Control(Command::Shutdown);
            for (worker_id, (_, tx)) in workers.iter_mut().enumerate() {
                if let Err(e) = tx.send(&msg).await {
                    warn!(worker_id = worker_id; "couldn't deliver shutdown: {e}");
                }
            }
        });

        let mut outcome = Ok(());
        for (worker_id, handle) in handles.into_iter().enumerate() {
            let res = match handle.join() {
                Ok(res) => {
                    res.map_err(|source| OrchestratorError::WorkerFailed { worker_id, source })
                }
                Err(_) => Err(OrchestratorError::WorkerPanicked { worker_id }),
            };

            if outcome.is_ok() {
                outcome = res;
            }
        }

        info!("session shut down");
        outcome
    }
}

fn worker_channel(
    workers: &mut [(LocalRx, LocalTx)],
    worker_id: usize,
) -> Result<&mut (LocalRx, LocalTx)> {
    let num_workers = workers.len();
    workers.get_mut(worker_id).ok_or_else(|| {
        OrchestratorError::InvalidConfig(format!(
            "worker {worker_id} doesn't exist, the session has {num_workers}"
        ))
    })
}

async fn recv_reply(worker_id: usize, rx: &mut LocalRx) -> Result<Reply> {
    match rx.recv().await? {
        Msg::Reply(reply) => Ok(reply),
        Msg::Err(detail) => Err(OrchestratorError::WorkerError {
            worker_id,
            msg: detail.into_owned(),
        }),
        other => Err(OrchestratorError::UnexpectedMsg {
            worker_id,
            got: other.kind(),
        }),
    }
}

fn expect_ack(worker_id: usize, reply: Reply) -> Result<()> {
    match reply {
        Reply::Ack => Ok(()),
        _ => Err(OrchestratorError::UnexpectedMsg {
            worker_id,
            got: "reply",
        }),
    }
}
