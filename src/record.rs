//! On-disk framing for event records.
//!
//! A file is a sequence of frames: `[len:u32 LE][crc32:u32 LE][payload]`,
//! where the payload is a bincode-encoded [`RecordFrame`]. The first frame
//! is a [`FileHeader`]; every following frame carries one event record,
//! i.e. the finished buffer of a [`WriteDevice`] plus the relocation counts
//! the reader checks its own traversal against.
use std::io::{self, Read, Write};

use anyhow::{Context, Result, bail};
use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};

use crate::device::{ReadDevice, WriteDevice};
use crate::event::Event;

pub const FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHeader {
    pub version: u16,
    pub created_unix_ns: u128,
    pub detector: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub run: i32,
    pub number: i32,
    pub targets: u32,       // pointed_at registrations in the payload
    pub pointers: u32,      // non-null pointer slots in the payload
    pub payload: Vec<u8>,   // device buffer, pointers already relocated
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordFrame {
    Header(FileHeader),
    Event(EventRecord),
}

impl EventRecord {
    /// Write `event` through `device` and package the finished buffer.
    ///
    /// The buffer is taken out of the device, copied into the record, then
    /// handed back cleared so its allocation serves the next event. If the
    /// event cannot be written, the partial record is discarded first.
    pub fn encode(event: &Event, device: &mut WriteDevice) -> Result<Self> {
        let relocation = match event.write(device) {
            Ok(relocation) => relocation,
            Err(err) => {
                device.discard_record();
                let context = format!("write event {} of run {}", event.number, event.run);
                return Err(err.context(context));
            }
        };
        let mut buffer = device.take_buffer()?;
        let payload = buffer.as_slice().to_vec();
        buffer.clear();
        device.set_buffer(buffer);
        Ok(Self {
            run: event.run,
            number: event.number,
            targets: u32::try_from(relocation.targets)?,
            pointers: u32::try_from(relocation.pointers)?,
            payload,
        })
    }

    /// Rebuild the event and check it against the record's bookkeeping.
    ///
    /// A reader whose traversal drifted from the writer's almost always
    /// registers a different number of targets or pointers, or stops short
    /// of the end of the payload.
    pub fn decode(&self) -> Result<Event> {
        let mut device = ReadDevice::new(&self.payload[..]);
        let (event, relocation) = Event::read(&mut device)
            .with_context(|| format!("read event {} of run {}", self.number, self.run))?;
        if relocation.targets != self.targets as usize
            || relocation.pointers != self.pointers as usize
        {
            bail!(
                "event {} of run {}: relocated {} targets / {} pointers, record says {} / {}",
                self.number,
                self.run,
                relocation.targets,
                relocation.pointers,
                self.targets,
                self.pointers
            );
        }
        if device.remaining() != 0 {
            let trailing = device.remaining();
            bail!("event {} of run {}: {trailing} trailing bytes", self.number, self.run);
        }
        if event.run != self.run || event.number != self.number {
            bail!(
                "record labelled event {} of run {} holds event {} of run {}",
                self.number,
                self.run,
                event.number,
                event.run
            );
        }
        Ok(event)
    }
}

pub fn write_frame<W: Write>(w: &mut W, frame: &RecordFrame) -> Result<()> {
    let payload = bincode::serialize(frame)?;
    let mut hasher = Crc32::new();
    hasher.update(&payload);
    let crc = hasher.finalize();

    let len = u32::try_from(payload.len()).context("frame larger than 4 GiB")?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&crc.to_le_bytes())?;
    w.write_all(&payload)?;
    Ok(())
}

/// Read the next frame, or `None` at a clean end of input.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Option<RecordFrame>> {
    let len = match read_u32(r) {
        Ok(v) => v as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let crc_on_file = read_u32(r).context("frame header truncated")?;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).context("frame payload truncated")?;
    let mut hasher = Crc32::new();
    hasher.update(&payload);
    let crc_calc = hasher.finalize();
    if crc_calc != crc_on_file {
        bail!("CRC mismatch: file={crc_on_file:#x}, calc={crc_calc:#x}");
    }
    let frame: RecordFrame = bincode::deserialize(&payload).context("bincode decode")?;
    Ok(Some(frame))
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::WriteConfig;
    use crate::event::ParticleRef;
    use std::io::Cursor;

    fn device() -> WriteDevice {
        WriteDevice::with_config(&WriteConfig::default().with_capacity(4096))
    }

    #[test]
    fn encode_reuses_the_device() {
        let mut dev = device();
        let first = EventRecord::encode(&Event::simulated(0, 0, 5, 5), &mut dev).unwrap();
        assert!(dev.is_seeded());
        assert_eq!(dev.position(), 0);
        let second = EventRecord::encode(&Event::simulated(0, 1, 5, 5), &mut dev).unwrap();
        assert_eq!(first.targets, 5);
        assert_eq!(first.pointers, 4 + 4 + 5);
        assert_eq!(second.decode().unwrap(), Event::simulated(0, 1, 5, 5));
    }

    #[test]
    fn failed_encode_does_not_leak_into_the_next_record() {
        let mut dev = device();
        let mut broken = Event::simulated(0, 0, 3, 2);
        broken.particles[2].daughters.push(ParticleRef(99));
        let err = EventRecord::encode(&broken, &mut dev).unwrap_err();
        assert!(format!("{err:#}").contains("outside event"), "{err:#}");
        assert_eq!(dev.position(), 0);
        assert_eq!(dev.pending(), 0);
        assert!(dev.buffer().unwrap().is_empty());

        let record = EventRecord::encode(&Event::simulated(0, 1, 3, 2), &mut dev).unwrap();
        assert_eq!(record.decode().unwrap(), Event::simulated(0, 1, 3, 2));
    }

    #[test]
    fn count_mismatch_is_detected() {
        let mut record = EventRecord::encode(&Event::simulated(0, 0, 3, 2), &mut device()).unwrap();
        record.pointers += 1;
        let err = record.decode().unwrap_err();
        assert!(err.to_string().contains("record says"), "{err:#}");
    }

    #[test]
    fn frames_round_trip_and_stop_at_eof() {
        let mut out = Vec::new();
        let header = RecordFrame::Header(FileHeader {
            version: FORMAT_VERSION,
            created_unix_ns: 0,
            detector: "D09TileHcal".into(),
            description: "test".into(),
        });
        let record = EventRecord::encode(&Event::simulated(1, 2, 3, 4), &mut device()).unwrap();
        let event = RecordFrame::Event(record);
        write_frame(&mut out, &header).unwrap();
        write_frame(&mut out, &event).unwrap();

        let mut r = Cursor::new(out);
        assert_eq!(read_frame(&mut r).unwrap(), Some(header));
        assert_eq!(read_frame(&mut r).unwrap(), Some(event));
        assert_eq!(read_frame(&mut r).unwrap(), None);
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let mut out = Vec::new();
        let record = EventRecord::encode(&Event::simulated(0, 0, 2, 2), &mut device()).unwrap();
        let frame = RecordFrame::Event(record);
        write_frame(&mut out, &frame).unwrap();
        let last = out.len() - 1;
        out[last] ^= 0xff;
        let err = read_frame(&mut Cursor::new(out)).unwrap_err();
        assert!(err.to_string().contains("CRC mismatch"), "{err:#}");
    }

    #[test]
    fn truncated_frame_is_an_error_not_eof() {
        let mut out = Vec::new();
        let record = EventRecord::encode(&Event::simulated(0, 0, 2, 2), &mut device()).unwrap();
        let frame = RecordFrame::Event(record);
        write_frame(&mut out, &frame).unwrap();
        out.truncate(out.len() - 3);
        assert!(read_frame(&mut Cursor::new(out)).is_err());
    }
}
