use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Align4, Deserialize, LEN_TYPE_SIZE, LenType, MAX_FRAME_SIZE};

/// The receiving end handle of the communication.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
    buf: Vec<u32>,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    /// Creates a new `OnoReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            buf: Vec::new(),
        }
    }

    /// Waits to receive a new message using the receiver's own buffer.
    ///
    /// # Returns
    /// The decoded message, borrowing this receiver until dropped. A closed
    /// stream is reported as an `UnexpectedEof` error.
    pub async fn recv<'s, T: Deserialize<'s>>(&'s mut self) -> io::Result<T> {
        let Self { rx, buf } = self;
        match Self::read_frame(rx, buf).await? {
            Some(frame) => T::deserialize(frame),
            None => Err(Self::closed()),
        }
    }

    /// Waits to receive a new message from the inner receiver.
    ///
    /// # Arguments
    /// * `buf` - The buffer to use for deserialization, the returned
    ///   `T`'s lifetimes will be tied to this buffer.
    ///
    /// # Returns
    /// A result object that returns `T` on success or `io::Error` on failure.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align4,
    {
        match self.try_recv_into(buf).await? {
            Some(msg) => Ok(msg),
            None => Err(Self::closed()),
        }
    }

    /// Like `recv_into`, but a stream closed cleanly in between frames yields `None`.
    ///
    /// A stream closed in the middle of a frame is still an error.
    pub async fn try_recv_into<'buf, T, B>(
        &mut self,
        buf: &'buf mut Vec<B>,
    ) -> io::Result<Option<T>>
    where
        T: Deserialize<'buf>,
        B: Align4,
    {
        match Self::read_frame(&mut self.rx, buf).await? {
            Some(frame) => T::deserialize(frame).map(Some),
            None => Ok(None),
        }
    }

    /// Reads one length-prefixed frame into `buf`.
    ///
    /// # Returns
    /// The frame bytes, or `None` if the stream ended before a new header.
    async fn read_frame<'buf, B: Align4>(
        rx: &mut R,
        buf: &'buf mut Vec<B>,
    ) -> io::Result<Option<&'buf [u8]>> {
        let mut size_buf = [0; LEN_TYPE_SIZE];
        let read = rx.read(&mut size_buf).await?;
        if read == 0 {
            return Ok(None);
        }

        rx.read_exact(&mut size_buf[read..]).await?;
        let len = LenType::from_be_bytes(size_buf);
        let len = usize::try_from(len)
            .ok()
            .filter(|&len| len <= MAX_FRAME_SIZE)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame of {len} bytes exceeds the {MAX_FRAME_SIZE} byte limit"),
                )
            })?;

        let needed_amount = len.div_ceil(size_of::<B>());
        buf.clear();
        buf.resize(needed_amount, bytemuck::Zeroable::zeroed());

        let view: &mut [u8] = bytemuck::cast_slice_mut(buf.as_mut_slice());
        let slice = &mut view[..len];
        rx.read_exact(slice).await?;

        Ok(Some(slice))
    }

    fn closed() -> io::Error {
        io::Error::new(io::ErrorKind::UnexpectedEof, "the channel was closed")
    }
}
