//! Raw record storage: an owning growable [`Buffer`] and a borrowed
//! [`BufferSpan`] view.
//!
//! The write side owns a `Buffer` and may extend it; the read side only ever
//! sees a `BufferSpan` over bytes that belong to somebody else (usually a
//! frame payload loaded by the container layer).
use std::collections::TryReserveError;

use crate::error::{Error, Result};

/// Default initial capacity of a write buffer: 32 MiB, large enough that a
/// typical record never reallocates.
pub const DEFAULT_BUFFER_CAPACITY: usize = 32 * 1024 * 1024;

/// Owning, growable byte storage.
///
/// `len` is the number of bytes in use; it only grows through
/// [`Buffer::write_at`]. Growth extends the block and never moves bytes
/// relative to the start, so offsets handed out earlier stay valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    bytes: Vec<u8>,
}

impl Buffer {
    /// Allocate a buffer with [`DEFAULT_BUFFER_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { bytes: Vec::with_capacity(capacity) }
    }

    /// Bytes in use.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Borrow the bytes in use as a read-only view.
    pub fn span(&self) -> BufferSpan<'_> {
        BufferSpan::new(&self.bytes)
    }

    /// Drop the contents but keep the allocation.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Consume the buffer, returning exactly the bytes in use.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    /// Copy `src` to `offset`, growing the storage first when needed.
    ///
    /// A gap between the current length and `offset` is zero-filled. Returns
    /// the number of bytes written. Fails with [`Error::CapacityOverflow`],
    /// leaving the buffer untouched, when the write would end beyond what
    /// can be allocated.
    pub fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<usize> {
        let overflow = || Error::CapacityOverflow { offset, requested: src.len() };
        let end = offset.checked_add(src.len()).ok_or_else(overflow)?;
        self.reserve_to(end).map_err(|_| overflow())?;
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[offset..end].copy_from_slice(src);
        Ok(src.len())
    }

    // Doubling, or straight to `needed` when doubling is not enough.
    fn reserve_to(&mut self, needed: usize) -> Result<(), TryReserveError> {
        let capacity = self.bytes.capacity();
        if needed <= capacity {
            return Ok(());
        }
        let doubled = needed.max(capacity.saturating_mul(2));
        if self.bytes.try_reserve_exact(doubled - self.bytes.len()).is_err() {
            self.bytes.try_reserve_exact(needed - self.bytes.len())?;
        }
        tracing::trace!(from = capacity, to = self.bytes.capacity(), "grew record buffer");
        Ok(())
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

/// Non-owning, bounded window over bytes kept alive elsewhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferSpan<'a> {
    bytes: &'a [u8],
}

impl<'a> BufferSpan<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &'a [u8] {
        self.bytes
    }

    /// Borrow `count` bytes starting at `offset`.
    pub fn read_at(&self, offset: usize, count: usize) -> Result<&'a [u8]> {
        let out_of_bounds = || Error::OutOfBounds {
            offset,
            requested: count,
            length: self.bytes.len(),
        };
        let end = offset.checked_add(count).ok_or_else(out_of_bounds)?;
        self.bytes.get(offset..end).ok_or_else(out_of_bounds)
    }
}

impl<'a> From<&'a [u8]> for BufferSpan<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::new(bytes)
    }
}

impl<'a> From<&'a Buffer> for BufferSpan<'a> {
    fn from(buffer: &'a Buffer) -> Self {
        buffer.span()
    }
}
