use comms::{
    Deserialize, Serialize,
    msg::{Command, Msg, Reply},
    value::{Tensor, Value},
};
use tokio::io;

struct MyStr<'a>(&'a str);

impl<'a> Serialize<'a> for MyStr<'_> {
    fn serialize(&'a self, _buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        Some(self.0.as_bytes())
    }
}

impl<'a> Deserialize<'a> for MyStr<'a> {
    fn deserialize(buf: &'a [u8]) -> std::io::Result<Self> {
        Ok(Self(str::from_utf8(buf).unwrap()))
    }
}

#[tokio::test]
async fn send_recv() {
    const SIZE: usize = 128;

    let msg = MyStr("Hello, world!");

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    tx.send(&msg).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let s: MyStr = rx.recv().await.unwrap();

    assert_eq!(msg.0, s.0);
}

#[tokio::test]
async fn messages_keep_their_order() {
    let (one, two) = io::duplex(4096);
    let (_, tx) = io::split(one);
    let (rx, _) = io::split(two);
    let (_, mut tx) = comms::channel(io::empty(), tx);
    let (mut rx, _) = comms::channel(rx, io::sink());

    let values = [Value::Int(1), Value::Float(2.5), Value::from("three")];
    for (reg_id, value) in values.iter().cloned().enumerate() {
        let msg = Msg::Control(Command::SetRegister { reg_id, value });
        tx.send(&msg).await.unwrap();
    }

    let mut rx_buf: Vec<u32> = Vec::new();
    for (expected_id, expected) in values.iter().enumerate() {
        let msg: Msg = rx.recv_into(&mut rx_buf).await.unwrap();
        let Msg::Control(Command::SetRegister { reg_id, value }) = msg else {
            panic!("unexpected message: {msg:?}");
        };

        assert_eq!(reg_id, expected_id);
        assert_eq!(&value, expected);
    }
}

#[tokio::test]
async fn data_frames_are_received_as_floats() {
    let (one, two) = io::duplex(4096);
    let (_, tx) = io::split(one);
    let (rx, _) = io::split(two);
    let (_, mut tx) = comms::channel(io::empty(), tx);
    let (mut rx, _) = comms::channel(rx, io::sink());

    let tensor = Tensor::from_vec(vec![1.0, -2.0, 3.5]);
    tx.send(&Msg::Data(tensor.data())).await.unwrap();
    tx.send(&Msg::Reply(Reply::Ack)).await.unwrap();

    let mut rx_buf: Vec<f32> = Vec::new();
    let Msg::Data(nums) = rx.recv_into(&mut rx_buf).await.unwrap() else {
        panic!("expected a data frame");
    };
    assert_eq!(nums, tensor.data());

    let msg: Msg = rx.recv_into(&mut rx_buf).await.unwrap();
    assert!(matches!(msg, Msg::Reply(Reply::Ack)));
}

#[tokio::test]
async fn closed_channel_yields_none_between_frames() {
    let (one, two) = io::duplex(4096);
    let (_, tx) = io::split(one);
    let (rx, _) = io::split(two);
    let (_, mut tx) = comms::channel(io::empty(), tx);
    let (mut rx, _) = comms::channel(rx, io::sink());

    tx.send(&Msg::Control(Command::SyncWorker)).await.unwrap();
    tx.close().await.unwrap();

    let mut rx_buf: Vec<u32> = Vec::new();
    let msg: Option<Msg> = rx.try_recv_into(&mut rx_buf).await.unwrap();
    assert!(matches!(msg, Some(Msg::Control(Command::SyncWorker))));

    let msg: Option<Msg> = rx.try_recv_into(&mut rx_buf).await.unwrap();
    assert!(msg.is_none());
}

#[tokio::test]
async fn oversized_frame_header_is_invalid_data() {
    use tokio::io::AsyncWriteExt;

    let (mut raw, two) = io::duplex(64);
    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let len = (comms::MAX_FRAME_SIZE as u64 + 1).to_be_bytes();
    raw.write_all(&len).await.unwrap();

    let err = rx.recv::<Msg>().await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

    raw.write_all(&u64::MAX.to_be_bytes()).await.unwrap();
    let err = rx.recv::<Msg>().await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}
