/// Encodes a value into a single frame.
///
/// Implementors write small headers into `buf` and may return a borrowed tail
/// that is written after it without copying.
pub trait Serialize<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
