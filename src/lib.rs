//! Record persistence for in-memory object graphs.
//!
//! This crate serializes a record (a graph of objects that may point at
//! each other) into a flat byte buffer and rebuilds an equivalent graph from
//! it, restoring every pointer even though addresses mean nothing across a
//! save/load boundary.
//!
//! - `buffer`: owning [`Buffer`] and borrowed [`BufferSpan`] storage
//! - `api`: bounds-checked element transfer between storage and memory
//! - `device`: sequential [`WriteDevice`] / [`ReadDevice`] with `data`,
//!   `pointer_to`, `pointed_at` and `pointer_relocation`
//! - `relocation`: per-record pointer tables and ordinal tokens
//! - `event`: particle/hit event model written through the devices
//! - `record`: file framing (length, CRC32, bincode envelope) for records
//!
//! The binaries in this repository (`src/main.rs` and `src/bin/dump.rs`)
//! generate simulated events into a file and read them back.
pub mod api;
pub mod buffer;
pub mod device;
pub mod error;
pub mod event;
pub mod logging;
pub mod record;
pub mod relocation;

pub use buffer::{Buffer, BufferSpan, DEFAULT_BUFFER_CAPACITY};
pub use device::{ReadDevice, WriteConfig, WriteDevice};
pub use error::{Error, Result};
pub use relocation::{ObjectId, PointerToken, Relocation};
