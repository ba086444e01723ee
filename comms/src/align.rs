/// Plain numeric types that may back a receive buffer.
pub trait Align1: bytemuck::Pod {}

/// Receive buffer element types aligned to at least 4 bytes.
///
/// Frames received into such a buffer can be viewed as `f32` slices in place.
pub trait Align4: Align1 {}

macro_rules! impl_align {
    ($trait:ident: $($ty:ty),* $(,)?) => {
        $(impl $trait for $ty {})*
    };
}

impl_align!(Align1: u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);
impl_align!(Align4: u32, i32, u64, i64, f32, f64);
