//! Element transfer between record storage and typed memory.
//!
//! Elements move in their natural in-memory layout: no byte-order
//! conversion happens here. Any element type that `zerocopy` can view as
//! plain bytes in both directions qualifies.
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::buffer::{Buffer, BufferSpan};
use crate::error::Result;

/// Fixed-size plain-data element that can be copied to and from raw bytes.
///
/// Implemented for every type with the required `zerocopy` traits: the
/// primitive integers and floats, arrays of them, and `#[repr(C)]` structs
/// deriving `FromBytes`, `IntoBytes` and `Immutable`.
pub trait Element: FromBytes + IntoBytes + Immutable {}

impl<T> Element for T where T: FromBytes + IntoBytes + Immutable {}

/// Write `elements` into `buffer` at `offset`, growing it as needed.
///
/// Returns the number of bytes written, `elements.len() * size_of::<T>()`.
/// Only a write past the addressable range fails, and then nothing is written.
pub fn write<T: Element>(buffer: &mut Buffer, elements: &[T], offset: usize) -> Result<usize> {
    buffer.write_at(offset, elements.as_bytes())
}

/// Fill `elements` from `span` at `offset`.
///
/// Bounds are checked before anything is copied, so on error `elements` is
/// untouched. Returns the number of bytes read.
pub fn read<T: Element>(span: &BufferSpan<'_>, elements: &mut [T], offset: usize) -> Result<usize> {
    let dst = elements.as_mut_bytes();
    let src = span.read_at(offset, dst.len())?;
    dst.copy_from_slice(src);
    Ok(src.len())
}
