//! Sequential read and write devices.
//!
//! A device couples record storage with a cursor and a set of relocation
//! tables. Calling code walks its object graph and, field by field, either
//! transfers plain data with `data`/`data_slice` or registers pointers with
//! `pointer_to`/`pointed_at`. Once the record is complete,
//! `pointer_relocation` resolves every pointer and clears the tables.
//!
//! Both sides must visit fields and pointer registrations in the same
//! order: targets are identified by their registration ordinal, not by any
//! name stored in the stream.
use crate::api::{self, Element};
use crate::buffer::{Buffer, BufferSpan, DEFAULT_BUFFER_CAPACITY};
use crate::error::{Error, Result};
use crate::relocation::{ObjectId, PointerToken, Relocation, RelocationTable};

/// Configuration for a [`WriteDevice`].
#[derive(Debug, Clone)]
pub struct WriteConfig {
    /// Initial buffer capacity in bytes.
    pub initial_capacity: usize,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self { initial_capacity: DEFAULT_BUFFER_CAPACITY }
    }
}

impl WriteConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }
}

/// Writes a record into an owned [`Buffer`].
///
/// The device owns its buffer until [`take_buffer`](Self::take_buffer)
/// hands it out. From then on it is *unseeded*: every write fails with
/// [`Error::NoBuffer`] until [`set_buffer`](Self::set_buffer) provides a new
/// one.
#[derive(Debug)]
pub struct WriteDevice {
    buffer: Option<Buffer>,
    cursor: usize,
    relocation: RelocationTable<ObjectId, PointerToken, usize>,
}

impl WriteDevice {
    /// Device with a buffer of [`DEFAULT_BUFFER_CAPACITY`].
    pub fn new() -> Self {
        Self::with_config(&WriteConfig::default())
    }

    pub fn with_config(config: &WriteConfig) -> Self {
        Self::with_buffer(Buffer::with_capacity(config.initial_capacity))
    }

    pub fn with_buffer(buffer: Buffer) -> Self {
        Self { buffer: Some(buffer), cursor: 0, relocation: RelocationTable::default() }
    }

    /// Seed the device with `buffer`, starting a fresh record at offset 0.
    ///
    /// Anything registered for the previous record is dropped.
    pub fn set_buffer(&mut self, buffer: Buffer) {
        self.buffer = Some(buffer);
        self.cursor = 0;
        self.relocation.clear();
    }

    /// Move the finished buffer out, leaving the device unseeded.
    ///
    /// Fails while pointer entries await relocation: the buffer would still
    /// hold placeholders.
    pub fn take_buffer(&mut self) -> Result<Buffer> {
        let pending = self.relocation.pending();
        if pending > 0 {
            return Err(Error::RelocationPending { pending });
        }
        let buffer = self.buffer.take().ok_or(Error::NoBuffer)?;
        self.cursor = 0;
        self.relocation.clear();
        Ok(buffer)
    }

    /// Consuming form of [`take_buffer`](Self::take_buffer).
    pub fn into_buffer(mut self) -> Result<Buffer> {
        self.take_buffer()
    }

    pub fn is_seeded(&self) -> bool {
        self.buffer.is_some()
    }

    /// The bytes written so far, if the device is seeded.
    pub fn buffer(&self) -> Option<&Buffer> {
        self.buffer.as_ref()
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Move the cursor. Seeking past the end is allowed; the next write
    /// there zero-fills the gap, or fails with [`Error::CapacityOverflow`]
    /// if the position cannot be backed by memory.
    pub fn seek(&mut self, position: usize) {
        self.cursor = position;
    }

    /// Pointer entries not yet relocated.
    pub fn pending(&self) -> usize {
        self.relocation.pending()
    }

    /// Abandon the current record: clear the tables, rewind, and drop the
    /// bytes written so far. The buffer allocation is kept.
    pub fn discard_record(&mut self) {
        self.relocation.clear();
        self.cursor = 0;
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.clear();
        }
    }

    pub fn data<T: Element>(&mut self, value: &T) -> Result<()> {
        self.data_slice(std::slice::from_ref(value))
    }

    pub fn data_slice<T: Element>(&mut self, values: &[T]) -> Result<()> {
        let buffer = self.buffer.as_mut().ok_or(Error::NoBuffer)?;
        // a successful write ends at an addressable offset
        self.cursor += api::write(buffer, values, self.cursor)?;
        Ok(())
    }

    /// Write a pointer slot for `target` at the cursor.
    ///
    /// A placeholder is written now and replaced by the target's token during
    /// [`pointer_relocation`](Self::pointer_relocation). `None` writes the
    /// null token and registers nothing.
    pub fn pointer_to(&mut self, target: Option<ObjectId>) -> Result<()> {
        let site = self.cursor;
        self.data(&PointerToken::NULL.get())?;
        if let Some(target) = target {
            self.relocation.add_pointer(target, site);
        }
        Ok(())
    }

    /// Register `object` as a pointer target, returning the token pointers
    /// to it will carry. An unseeded device registers nothing.
    pub fn pointed_at(&mut self, object: ObjectId) -> Result<PointerToken> {
        if self.buffer.is_none() {
            return Err(Error::NoBuffer);
        }
        let token = self.relocation.next_token();
        self.relocation.add_target(object, token)?;
        Ok(token)
    }

    /// Rewrite every pending pointer slot with its target's token.
    ///
    /// On [`Error::UnresolvedReference`] no slot is rewritten. The tables are
    /// cleared in every case.
    pub fn pointer_relocation(&mut self) -> Result<Relocation> {
        let (patches, summary) = self.relocation.resolve()?;
        let buffer = self.buffer.as_mut().ok_or(Error::NoBuffer)?;
        for (site, token) in patches {
            api::write(buffer, &[token.get()], site)?;
        }
        Ok(summary)
    }
}

impl Default for WriteDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads a record from a borrowed [`BufferSpan`].
///
/// `H` is the handle type of reconstructed objects (typically an index into
/// the collection they were pushed to) and `S` names a pointer field to be
/// patched once its target is known.
#[derive(Debug)]
pub struct ReadDevice<'a, S = usize, H = usize> {
    buffer: BufferSpan<'a>,
    cursor: usize,
    relocation: RelocationTable<PointerToken, H, S>,
}

impl<'a, S, H: Clone> ReadDevice<'a, S, H> {
    pub fn new(buffer: impl Into<BufferSpan<'a>>) -> Self {
        Self { buffer: buffer.into(), cursor: 0, relocation: RelocationTable::default() }
    }

    /// Point the device at a new view and start a fresh record at offset 0.
    pub fn set_buffer(&mut self, buffer: impl Into<BufferSpan<'a>>) {
        self.buffer = buffer.into();
        self.cursor = 0;
        self.relocation.clear();
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Length of the underlying view.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Bytes left between the cursor and the end of the view.
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.cursor)
    }

    /// Move the cursor. Positions past the end of the view are rejected;
    /// the end itself is valid.
    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.buffer.len() {
            return Err(Error::InvalidSeek { position, length: self.buffer.len() });
        }
        self.cursor = position;
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.relocation.pending()
    }

    /// Abandon the current record's relocation state. The cursor is left
    /// where it is.
    pub fn discard_record(&mut self) {
        self.relocation.clear();
    }

    pub fn data<T: Element>(&mut self, value: &mut T) -> Result<()> {
        self.data_slice(std::slice::from_mut(value))
    }

    pub fn data_slice<T: Element>(&mut self, values: &mut [T]) -> Result<()> {
        self.cursor += api::read(&self.buffer, values, self.cursor)?;
        Ok(())
    }

    /// Read one element and return it.
    pub fn value<T: Element>(&mut self) -> Result<T> {
        let mut value = T::new_zeroed();
        self.data(&mut value)?;
        Ok(value)
    }

    /// Read a pointer slot for the field named by `slot`.
    ///
    /// Returns `None` for a null pointer, which needs no relocation.
    /// Otherwise `slot` is patched during
    /// [`pointer_relocation`](Self::pointer_relocation).
    pub fn pointer_to(&mut self, slot: S) -> Result<Option<PointerToken>> {
        let token = PointerToken::new(self.value::<u32>()?);
        if token.is_null() {
            return Ok(None);
        }
        self.relocation.add_pointer(token, slot);
        Ok(Some(token))
    }

    /// Register the reconstructed object `handle` as the next pointer target.
    pub fn pointed_at(&mut self, handle: H) -> PointerToken {
        self.relocation.push_target(handle)
    }

    /// Resolve every pending pointer, calling `patch(slot, handle)` for each.
    ///
    /// If any token has no target, `patch` is never called and
    /// [`Error::UnresolvedReference`] is returned. The tables are cleared in
    /// every case.
    pub fn pointer_relocation<F>(&mut self, mut patch: F) -> Result<Relocation>
    where
        F: FnMut(S, H),
    {
        let (patches, summary) = self.relocation.resolve()?;
        for (slot, handle) in patches {
            patch(slot, handle);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    fn small_writer() -> WriteDevice {
        WriteDevice::with_config(&WriteConfig::default().with_capacity(64))
    }

    #[test]
    #[allow(clippy::approx_constant)]
    fn scalars_round_trip_with_matching_positions() {
        let mut w = small_writer();
        w.data(&42i32).unwrap();
        w.data(&3.14f32).unwrap();
        w.data(&7i32).unwrap();
        let written = w.position();
        assert_eq!(written, 12);
        let buf = w.take_buffer().unwrap();

        let mut r: ReadDevice = ReadDevice::new(&buf);
        assert_eq!(r.value::<i32>().unwrap(), 42);
        assert_eq!(r.value::<f32>().unwrap(), 3.14);
        let mut last = 0i32;
        r.data(&mut last).unwrap();
        assert_eq!(last, 7);
        assert_eq!(r.position(), written);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn arrays_round_trip() {
        let mut w = small_writer();
        w.data_slice(&[1.0f64, 2.0, 3.0]).unwrap();
        w.data(&[4u16, 5]).unwrap();
        let buf = w.take_buffer().unwrap();

        let mut r: ReadDevice = ReadDevice::new(&buf);
        let mut xs = [0f64; 3];
        r.data_slice(&mut xs).unwrap();
        assert_eq!(xs, [1.0, 2.0, 3.0]);
        assert_eq!(r.value::<[u16; 2]>().unwrap(), [4, 5]);
    }

    #[test]
    fn reading_exactly_to_the_end_succeeds_one_more_byte_fails() {
        let data = [9u8; 5];
        let mut r: ReadDevice = ReadDevice::new(&data[..]);
        let mut all = [0u8; 5];
        r.data_slice(&mut all).unwrap();
        assert_eq!(r.position(), 5);

        let mut r: ReadDevice = ReadDevice::new(&data[..]);
        let mut too_many = [0u8; 6];
        let err = r.data_slice(&mut too_many).unwrap_err();
        assert_eq!(err, Error::OutOfBounds { offset: 0, requested: 6, length: 5 });
        assert_eq!(r.position(), 0, "a failed read must not advance the cursor");
    }

    #[test]
    fn read_seek_is_bounded_by_the_view() {
        let data = [0u8; 8];
        let mut r: ReadDevice = ReadDevice::new(&data[..]);
        r.seek(8).unwrap();
        assert_eq!(r.seek(9), Err(Error::InvalidSeek { position: 9, length: 8 }));
        assert_eq!(r.position(), 8);
        r.seek(4).unwrap();
        assert_eq!(r.remaining(), 4);
    }

    #[test]
    fn write_seek_past_end_then_write_fills_gap() {
        let mut w = small_writer();
        w.data(&1u8).unwrap();
        w.seek(4);
        w.data(&2u8).unwrap();
        assert_eq!(w.buffer().unwrap().as_slice(), &[1, 0, 0, 0, 2]);
        // rewrite a header field in place
        w.seek(1);
        w.data(&3u8).unwrap();
        assert_eq!(w.buffer().unwrap().as_slice(), &[1, 3, 0, 0, 2]);
    }

    #[test]
    fn write_far_past_the_addressable_range_fails_cleanly() {
        let mut w = small_writer();
        w.data(&1u32).unwrap();
        w.seek(usize::MAX - 1);
        assert_eq!(
            w.data(&7u32),
            Err(Error::CapacityOverflow { offset: usize::MAX - 1, requested: 4 })
        );
        assert_eq!(w.position(), usize::MAX - 1);
        assert_eq!(w.buffer().unwrap().as_slice(), &1u32.to_ne_bytes());

        w.seek(usize::MAX - 8);
        let err = w.pointer_to(Some(ObjectId::new(1))).unwrap_err();
        assert!(matches!(err, Error::CapacityOverflow { .. }), "{err}");
        assert_eq!(w.pending(), 0);

        // the device stays usable once the cursor is back in range
        w.seek(4);
        w.data(&2u32).unwrap();
        assert_eq!(w.position(), 8);
    }

    #[test]
    fn read_targets_take_consecutive_ordinals() {
        let mut r: ReadDevice<usize, &str> = ReadDevice::new(BufferSpan::default());
        assert_eq!(r.pointed_at("a"), PointerToken::new(1));
        assert_eq!(r.pointed_at("b"), PointerToken::new(2));
        let summary = r.pointer_relocation(|_, _| {}).unwrap();
        assert_eq!(summary, Relocation { targets: 2, pointers: 0 });
        assert_eq!(r.pointed_at("c"), PointerToken::new(1));
    }

    #[test]
    fn take_buffer_leaves_device_unseeded() {
        let mut w = small_writer();
        w.data(&1u32).unwrap();
        let buf = w.take_buffer().unwrap();
        assert_eq!(buf.len(), 4);
        assert!(!w.is_seeded());
        assert_eq!(w.data(&2u32), Err(Error::NoBuffer));
        assert_eq!(w.pointer_to(Some(ObjectId::new(1))), Err(Error::NoBuffer));
        assert_eq!(w.pointed_at(ObjectId::new(1)), Err(Error::NoBuffer));
        assert_eq!(w.pending(), 0);
        assert_eq!(w.pointer_relocation(), Err(Error::NoBuffer));
        assert_eq!(w.take_buffer().unwrap_err(), Error::NoBuffer);

        w.set_buffer(Buffer::with_capacity(8));
        w.data(&2u32).unwrap();
        assert_eq!(w.into_buffer().unwrap().as_slice(), &2u32.to_ne_bytes());
    }

    #[test]
    fn take_buffer_refuses_unrelocated_pointers() {
        let mut w = small_writer();
        w.pointed_at(ObjectId::new(1)).unwrap();
        w.pointer_to(Some(ObjectId::new(1))).unwrap();
        assert_eq!(w.take_buffer().unwrap_err(), Error::RelocationPending { pending: 1 });
        w.pointer_relocation().unwrap();
        assert!(w.take_buffer().is_ok());
    }

    #[test]
    fn forward_reference_resolves() {
        // A { next: &B } written before B
        let mut w = small_writer();
        let (a, b) = (ObjectId::new(0xa), ObjectId::new(0xb));
        w.pointed_at(a).unwrap();
        w.data(&1i32).unwrap();
        w.pointer_to(Some(b)).unwrap();
        w.pointed_at(b).unwrap();
        w.data(&2i32).unwrap();
        w.pointer_to(None).unwrap();
        let summary = w.pointer_relocation().unwrap();
        assert_eq!(summary, Relocation { targets: 2, pointers: 1 });
        let buf = w.take_buffer().unwrap();

        let mut next: [Option<usize>; 2] = [None, None];
        let mut r: ReadDevice<usize, usize> = ReadDevice::new(&buf);
        for index in 0..2 {
            r.pointed_at(index);
            assert_eq!(r.value::<i32>().unwrap(), index as i32 + 1);
            r.pointer_to(index).unwrap();
        }
        let summary = r.pointer_relocation(|slot, target| next[slot] = Some(target)).unwrap();
        assert_eq!(summary, Relocation { targets: 2, pointers: 1 });
        assert_eq!(next, [Some(1), None]);
    }

    #[test]
    fn dangling_reference_is_reported() {
        let mut w = small_writer();
        w.pointed_at(ObjectId::new(1)).unwrap();
        w.pointer_to(Some(ObjectId::new(2))).unwrap();
        let err = w.pointer_relocation().unwrap_err();
        assert_eq!(err, Error::UnresolvedReference { reference: 2, unresolved: 1, pending: 1 });
        assert_eq!(w.pending(), 0);
        // the slot still holds the null placeholder
        assert_eq!(w.buffer().unwrap().as_slice(), &0u32.to_ne_bytes());
    }

    #[test]
    fn read_side_token_without_target_is_reported() {
        let tokens = [5u32];
        let mut r: ReadDevice<&str, usize> = ReadDevice::new(tokens.as_bytes());
        r.pointed_at(0);
        assert_eq!(r.pointer_to("field").unwrap(), Some(PointerToken::new(5)));
        let mut patched = false;
        let err = r.pointer_relocation(|_, _| patched = true).unwrap_err();
        assert_eq!(err, Error::UnresolvedReference { reference: 5, unresolved: 1, pending: 1 });
        assert!(!patched);
    }

    #[test]
    fn tables_reset_between_records() {
        let mut w = small_writer();
        let shared = ObjectId::new(42);
        w.pointed_at(shared).unwrap();
        w.pointer_to(Some(shared)).unwrap();
        w.pointer_relocation().unwrap();

        // the same object may be a target again in the next record,
        // and it gets ordinal 1 again
        assert_eq!(w.pointed_at(shared).unwrap(), PointerToken::new(1));
        w.pointer_to(Some(shared)).unwrap();
        assert_eq!(w.pointer_relocation().unwrap(), Relocation { targets: 1, pointers: 1 });

        // a stale pointer from a finished record does not resolve
        w.pointer_to(Some(shared)).unwrap();
        assert!(matches!(w.pointer_relocation(), Err(Error::UnresolvedReference { .. })));
    }

    #[test]
    fn discard_record_rewinds_writer() {
        let mut w = small_writer();
        w.pointed_at(ObjectId::new(1)).unwrap();
        w.pointer_to(Some(ObjectId::new(3))).unwrap();
        w.discard_record();
        assert_eq!(w.pending(), 0);
        assert_eq!(w.position(), 0);
        assert!(w.buffer().unwrap().is_empty());
        assert_eq!(w.pointer_relocation().unwrap(), Relocation::default());
    }
}
