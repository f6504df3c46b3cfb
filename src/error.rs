//! Error type shared by the buffers, the transfer primitive and the devices.
//!
//! Every variant is fatal to the record being processed. None of them leave
//! state behind that could leak into the next record: the relocation tables
//! are always cleared by the pass that reports the failure, and a device can
//! be reset with `discard_record`.
use thiserror::Error;

/// Result type used across the device layer.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A read asked for more bytes than the view holds past `offset`.
    #[error("read of {requested} bytes at offset {offset} overruns buffer of length {length}")]
    OutOfBounds {
        offset: usize,
        requested: usize,
        length: usize,
    },

    /// A write at `offset` would end past what a buffer can address.
    #[error("write of {requested} bytes at offset {offset} exceeds the addressable buffer size")]
    CapacityOverflow { offset: usize, requested: usize },

    /// A read device was repositioned past the end of its view.
    #[error("cannot seek to {position}: buffer length is {length}")]
    InvalidSeek { position: usize, length: usize },

    /// Relocation found pointer entries with no registered target.
    ///
    /// `reference` is the first offending reference: the object id on the
    /// write side, the stream token on the read side.
    #[error("unresolved reference {reference:#x} ({unresolved} of {pending} pointers)")]
    UnresolvedReference {
        reference: u64,
        unresolved: usize,
        pending: usize,
    },

    /// The same object was registered twice as a pointer target in one record.
    #[error("object {object:#x} registered twice as a pointer target")]
    DuplicateTarget { object: u64 },

    /// The write device has no buffer (taken and not re-seeded).
    #[error("write device has no buffer")]
    NoBuffer,

    /// The buffer was requested while pointer entries were still outstanding.
    #[error("{pending} pointer entries pending relocation")]
    RelocationPending { pending: usize },
}
