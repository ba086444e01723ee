#![allow(dead_code)]

use std::{io, thread};

use comms::{
    OnoReceiver, OnoSender, Serialize,
    msg::{Command, Msg, Reply},
    value::Value,
};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};

pub type Rx = OnoReceiver<ReadHalf<DuplexStream>>;
pub type Tx = OnoSender<WriteHalf<DuplexStream>>;

/// Returns the controller's and the worker's ends of an in-memory channel.
pub fn channel_pair() -> ((Rx, Tx), (Rx, Tx)) {
    let (stream1, stream2) = tokio::io::duplex(4096);
    let (rx1, tx1) = tokio::io::split(stream1);
    let (rx2, tx2) = tokio::io::split(stream2);
    (comms::channel(rx1, tx1), comms::channel(rx2, tx2))
}

/// A frame with an arbitrary kind header and body.
pub struct RawFrame {
    pub kind: u32,
    pub body: Vec<u8>,
}

impl<'a> Serialize<'a> for RawFrame {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        buf.extend_from_slice(&self.kind.to_be_bytes());
        Some(&self.body)
    }
}

/// Sends `cmd` and waits for its reply, a failed command yields its error text.
pub async fn request<R, W>(
    rx: &mut OnoReceiver<R>,
    tx: &mut OnoSender<W>,
    cmd: Command,
) -> io::Result<Result<Reply, String>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tx.send(&Msg::Control(cmd)).await?;

    match rx.recv().await? {
        Msg::Reply(reply) => Ok(Ok(reply)),
        Msg::Err(detail) => Ok(Err(detail.into_owned())),
        other => Err(io::Error::other(format!("unexpected message: {other:?}"))),
    }
}

/// Like `request`, but any failure is an error.
pub async fn expect_reply<R, W>(
    rx: &mut OnoReceiver<R>,
    tx: &mut OnoSender<W>,
    cmd: Command,
) -> io::Result<Reply>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    request(rx, tx, cmd).await?.map_err(io::Error::other)
}

pub async fn get_register<R, W>(
    rx: &mut OnoReceiver<R>,
    tx: &mut OnoSender<W>,
    reg_id: usize,
) -> io::Result<Value>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match expect_reply(rx, tx, Command::GetRegister { reg_id }).await? {
        Reply::Value(value) => Ok(value),
        other => Err(io::Error::other(format!("unexpected reply: {other:?}"))),
    }
}

/// Runs `f` on a thread of its own, so its thread-local worker slot starts empty.
pub fn on_fresh_thread<T, F>(f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::spawn(f).join().unwrap()
}

/// Runs the async `f` on a fresh thread with a current-thread runtime.
pub fn block_on_fresh_thread<T, F, Fut>(f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = T>,
{
    on_fresh_thread(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(f())
    })
}
