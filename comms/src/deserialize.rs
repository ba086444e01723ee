use std::io;

/// Decodes a value out of a single received frame.
///
/// The returned value may borrow from `buf`, which lives as long as the
/// receiving buffer handed to `OnoReceiver::recv_into`.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
