//! The §6.2 executable file format (magic `"G10X"`): the linker's output,
//! plus the loader that copies its segments into a [`ReferenceBus`]'s ROM
//! and RAM views.
//!
//! Grounded the same way as `objfile.rs`: explicit offset-based field
//! access rather than a derive macro, matching the rest of the crate's
//! binary-format style.

use crate::bus::{RAM_START, ReferenceBus};
use crate::error::{LinkError, ObjectError};

pub const MAGIC: [u8; 4] = *b"G10X";
pub const VERSION: u16 = 0x0001;

const HEADER_SIZE: usize = 64;
const SEGMENT_ENTRY_SIZE: usize = 24;
const PROGRAM_NAME_SIZE: usize = 32;

/// Entry points must land in ROM, at or after the CPU's reset vector
/// (§6.2).
const ENTRY_POINT_MIN: u32 = 0x0000_2000;
const ENTRY_POINT_MAX: u32 = RAM_START;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SegmentFlags {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
    pub zero_init: bool,
}

impl From<u16> for SegmentFlags {
    fn from(bits: u16) -> Self {
        Self {
            read: bits & 0x0001 != 0,
            write: bits & 0x0002 != 0,
            exec: bits & 0x0004 != 0,
            zero_init: bits & 0x0008 != 0,
        }
    }
}

impl From<SegmentFlags> for u16 {
    fn from(f: SegmentFlags) -> Self {
        (f.read as u16) | (f.write as u16) << 1 | (f.exec as u16) << 2 | (f.zero_init as u16) << 3
    }
}

#[derive(Clone, Debug)]
pub struct Segment {
    pub load_address: u32,
    pub memory_size: u32,
    pub flags: SegmentFlags,
    pub alignment: u16,
    /// Empty for zero-init segments, otherwise `memory_size` bytes.
    pub data: Vec<u8>,
}

/// A linked executable image (§3, §6.2), ready to load into a bus.
#[derive(Clone, Debug)]
pub struct Executable {
    pub entry_point: u32,
    pub stack_pointer: u32,
    pub program_name: String,
    pub segments: Vec<Segment>,
}

fn need(buf: &[u8], offset: usize, len: usize) -> Result<&[u8], ObjectError> {
    buf.get(offset..offset + len).ok_or(ObjectError::Truncated { wanted: offset + len, got: buf.len() })
}

fn read_u16(buf: &[u8], offset: usize) -> Result<u16, ObjectError> {
    Ok(u16::from_le_bytes(need(buf, offset, 2)?.try_into().unwrap()))
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ObjectError> {
    Ok(u32::from_le_bytes(need(buf, offset, 4)?.try_into().unwrap()))
}

impl Executable {
    /// Parses an in-memory executable image (§6.2). Does not re-validate
    /// entry point/stack pointer/segment overlap — those are write-time
    /// checks the linker already enforced when producing the bytes.
    pub fn read(buf: &[u8]) -> Result<Self, ObjectError> {
        if need(buf, 0, 4)? != MAGIC {
            return Err(ObjectError::BadMagic);
        }
        let version = read_u16(buf, 4)?;
        if version != VERSION {
            return Err(ObjectError::UnsupportedVersion(version));
        }
        let entry_point = read_u32(buf, 8)?;
        let stack_pointer = read_u32(buf, 12)?;
        let segment_count = read_u16(buf, 16)? as usize;
        let name_bytes = need(buf, 32, PROGRAM_NAME_SIZE)?;
        let name_end = name_bytes.iter().position(|&b| b == 0).unwrap_or(PROGRAM_NAME_SIZE);
        let program_name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();

        let segments_start = HEADER_SIZE;
        let data_start = segments_start + segment_count * SEGMENT_ENTRY_SIZE;

        let mut segments = Vec::with_capacity(segment_count);
        for i in 0..segment_count {
            let off = segments_start + i * SEGMENT_ENTRY_SIZE;
            let load_address = read_u32(buf, off)?;
            let memory_size = read_u32(buf, off + 4)?;
            let file_size = read_u32(buf, off + 8)? as usize;
            let file_offset = read_u32(buf, off + 12)? as usize;
            let flags = SegmentFlags::from(read_u16(buf, off + 16)?);
            let alignment = read_u16(buf, off + 18)?;
            let data = if flags.zero_init {
                Vec::new()
            } else {
                need(buf, data_start + file_offset, file_size)?.to_vec()
            };
            segments.push(Segment { load_address, memory_size, flags, alignment, data });
        }

        Ok(Self { entry_point, stack_pointer, program_name, segments })
    }

    /// Serializes to bytes, enforcing the §6.2 write-time invariants.
    pub fn write(&self) -> Result<Vec<u8>, LinkError> {
        if !(ENTRY_POINT_MIN..ENTRY_POINT_MAX).contains(&self.entry_point) {
            return Err(LinkError::EntryPointNotInRom(self.entry_point));
        }
        if self.stack_pointer != 0 && self.stack_pointer < RAM_START {
            return Err(LinkError::StackPointerNotInRam(self.stack_pointer));
        }
        for pair in self.sorted_segments().windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.load_address + a.memory_size > b.load_address {
                return Err(LinkError::OverlappingSegments { a: a.load_address, b: b.load_address });
            }
        }

        let mut data_section = Vec::new();
        let mut file_offsets = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            if segment.flags.zero_init {
                file_offsets.push(0);
            } else {
                file_offsets.push(data_section.len() as u32);
                data_section.extend_from_slice(&segment.data);
            }
        }

        let mut name = [0u8; PROGRAM_NAME_SIZE];
        let bytes = self.program_name.as_bytes();
        let n = bytes.len().min(PROGRAM_NAME_SIZE - 1);
        name[..n].copy_from_slice(&bytes[..n]);

        let total_file_size = HEADER_SIZE + self.segments.len() * SEGMENT_ENTRY_SIZE + data_section.len();
        let total_memory_size: u64 = self.segments.iter().map(|s| u64::from(s.memory_size)).sum();

        let mut out = Vec::with_capacity(total_file_size);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // flags, reserved
        out.extend_from_slice(&self.entry_point.to_le_bytes());
        out.extend_from_slice(&self.stack_pointer.to_le_bytes());
        out.extend_from_slice(&(self.segments.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // reserved
        out.extend_from_slice(&(total_file_size as u32).to_le_bytes());
        out.extend_from_slice(&(total_memory_size as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // checksum, not computed
        out.extend_from_slice(&name);
        debug_assert_eq!(out.len(), HEADER_SIZE);

        for (segment, &file_offset) in self.segments.iter().zip(&file_offsets) {
            let file_size = if segment.flags.zero_init { 0 } else { segment.data.len() as u32 };
            out.extend_from_slice(&segment.load_address.to_le_bytes());
            out.extend_from_slice(&segment.memory_size.to_le_bytes());
            out.extend_from_slice(&file_size.to_le_bytes());
            out.extend_from_slice(&file_offset.to_le_bytes());
            out.extend_from_slice(&u16::from(segment.flags).to_le_bytes());
            out.extend_from_slice(&segment.alignment.to_le_bytes());
            out.extend_from_slice(&[0u8; 4]);
        }

        out.extend_from_slice(&data_section);
        Ok(out)
    }

    fn sorted_segments(&self) -> Vec<&Segment> {
        let mut v: Vec<&Segment> = self.segments.iter().collect();
        v.sort_by_key(|s| s.load_address);
        v
    }

    /// Copies every segment's bytes into `bus`'s ROM/RAM backing stores
    /// directly, bypassing [`crate::bus::Bus::write`] (which rejects writes
    /// to ROM — the loader installs the program image, it doesn't execute
    /// against it).
    pub fn load(&self, bus: &mut ReferenceBus) {
        for segment in &self.segments {
            if segment.flags.zero_init {
                continue;
            }
            if segment.load_address < RAM_START {
                copy_into(bus.rom_mut(), segment.load_address as usize, &segment.data);
            } else {
                let ram_offset = (segment.load_address - RAM_START) as usize;
                copy_into(bus.ram_mut(), ram_offset, &segment.data);
            }
        }
    }
}

/// Copies `data` into `dest` starting at `offset`, truncating silently if
/// the segment runs past the end of the backing store (e.g. a RAM segment
/// bigger than the `-r/--ram` allocation).
fn copy_into(dest: &mut [u8], offset: usize, data: &[u8]) {
    let Some(slot) = dest.get_mut(offset..) else { return };
    let n = data.len().min(slot.len());
    slot[..n].copy_from_slice(&data[..n]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Executable {
        Executable {
            entry_point: 0x0000_2000,
            stack_pointer: 0xFFFF_FFFC,
            program_name: "hello".into(),
            segments: vec![
                Segment {
                    load_address: 0x0000_2000,
                    memory_size: 4,
                    flags: SegmentFlags { read: true, write: false, exec: true, zero_init: false },
                    alignment: 1,
                    data: vec![0xAA, 0xBB, 0xCC, 0xDD],
                },
                Segment {
                    load_address: 0x8000_0000,
                    memory_size: 16,
                    flags: SegmentFlags { read: true, write: true, exec: false, zero_init: true },
                    alignment: 4,
                    data: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn round_trips() {
        let exe = sample();
        let bytes = exe.write().unwrap();
        let parsed = Executable::read(&bytes).unwrap();
        assert_eq!(parsed.entry_point, exe.entry_point);
        assert_eq!(parsed.program_name, "hello");
        assert_eq!(parsed.segments[0].data, vec![0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(parsed.segments[1].data.is_empty());
    }

    #[test]
    fn entry_point_outside_rom_is_rejected() {
        let mut exe = sample();
        exe.entry_point = 0x8000_0000;
        assert!(matches!(exe.write(), Err(LinkError::EntryPointNotInRom(_))));
    }

    #[test]
    fn stack_pointer_outside_ram_is_rejected() {
        let mut exe = sample();
        exe.stack_pointer = 1;
        assert!(matches!(exe.write(), Err(LinkError::StackPointerNotInRam(_))));
    }

    #[test]
    fn load_copies_segments_into_bus_backing_stores() {
        let exe = sample();
        let mut bus = ReferenceBus::new(vec![0; 0x3000], 32);
        exe.load(&mut bus);
        assert_eq!(&bus.rom_mut()[0x2000..0x2004], &[0xAA, 0xBB, 0xCC, 0xDD]);
    }
}
