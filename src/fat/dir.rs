//! Directory entries and directory-level operations.
//!
//! The on-disk unit here is the 32-byte slot: either a classic 8.3 entry, or
//! a long-file-name slot (attribute byte exactly 0x0F) carrying 13 UTF-16
//! code units of the name. A long name is a run of LFN slots immediately
//! followed by its 8.3 entry, bound together by a checksum over the 8.3 name.

use super::Fat32Volume;
use super::name::{
    self, LongName, LFN_CHARS_PER_SLOT, LONG_NAME_BUF,
};
use super::table::FAT_ENTRY_EOC;
use crate::error::{Error, Result};
use crate::storage::{BlockDevice, SECTOR_SIZE};

use core::convert::TryInto;
use core::fmt::{self, Debug};

/// Size of one directory slot.
pub(crate) const DIR_ENTRY_SIZE: usize = 32;

/// First-byte marker of a free (deleted) slot.
pub(crate) const DIR_ENTRY_FREE: u8 = 0xE5;

/// First-byte marker of the end of a directory: no live entries follow.
pub(crate) const DIR_ENTRY_END: u8 = 0x00;

/// The attribute byte value that turns a slot into an LFN slot.
pub(crate) const ATTR_LONG_NAME: u8 = 0x0F;

/// Sequence-number bit marking the last LFN slot of a run (which is the
/// first one physically on disk).
pub(crate) const LFN_LAST_FLAG: u8 = 0x40;

pub enum Attribute {
    ReadOnly = 0x01,
    Hidden = 0x02,
    System = 0x04,
    VolumeId = 0x08,
    Directory = 0x10,
    Archive = 0x20,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct AttributeSet {
    inner: u8,
}

impl AttributeSet {
    pub(crate) fn from_bits(bits: u8) -> Self {
        Self { inner: bits }
    }

    pub fn bits(&self) -> u8 {
        self.inner
    }

    pub fn contains(&self, attr: Attribute) -> bool {
        (self.inner & (attr as u8)) != 0
    }

    pub fn is_dir(&self) -> bool {
        self.contains(Attribute::Directory)
    }

    pub fn is_volume_label(&self) -> bool {
        self.contains(Attribute::VolumeId)
    }
}

/// A classic 32-byte 8.3 directory entry, decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RawDirEntry {
    // Offset: 0
    pub shortname: [u8; 11],
    // Offset: 11
    pub attr: u8,
    // Offset: 12
    pub nt_res: u8,
    // Offset: 13
    pub crt_time_tenth: u8,
    // Offset: 14
    pub crt_time: u16,
    // Offset: 16
    pub crt_date: u16,
    // Offset: 18
    pub lst_acc_date: u16,
    // Offset: 20
    pub fst_clus_hi: u16,
    // Offset: 22
    pub wrt_time: u16,
    // Offset: 24
    pub wrt_date: u16,
    // Offset: 26
    pub fst_clus_lo: u16,
    // Offset: 28
    pub file_size: u32,
}

impl RawDirEntry {
    pub fn from_bytes(arr: &[u8; DIR_ENTRY_SIZE]) -> Self {
        macro_rules! e {
            ($ty:tt, $offset:literal) => {
                $ty::from_le_bytes(arr[$offset..($offset + core::mem::size_of::<$ty>())].try_into().unwrap())
            };
        }

        Self {
            shortname: arr[0..11].try_into().unwrap(),
            attr: arr[11],
            nt_res: arr[12],
            crt_time_tenth: arr[13],
            crt_time: e!(u16, 14),
            crt_date: e!(u16, 16),
            lst_acc_date: e!(u16, 18),
            fst_clus_hi: e!(u16, 20),
            wrt_time: e!(u16, 22),
            wrt_date: e!(u16, 24),
            fst_clus_lo: e!(u16, 26),
            file_size: e!(u32, 28),
        }
    }

    pub fn write(&self, arr: &mut [u8; DIR_ENTRY_SIZE]) {
        arr[0..11].copy_from_slice(&self.shortname);
        arr[11] = self.attr;
        arr[12] = self.nt_res;
        arr[13] = self.crt_time_tenth;
        arr[14..16].copy_from_slice(&self.crt_time.to_le_bytes());
        arr[16..18].copy_from_slice(&self.crt_date.to_le_bytes());
        arr[18..20].copy_from_slice(&self.lst_acc_date.to_le_bytes());
        arr[20..22].copy_from_slice(&self.fst_clus_hi.to_le_bytes());
        arr[22..24].copy_from_slice(&self.wrt_time.to_le_bytes());
        arr[24..26].copy_from_slice(&self.wrt_date.to_le_bytes());
        arr[26..28].copy_from_slice(&self.fst_clus_lo.to_le_bytes());
        arr[28..32].copy_from_slice(&self.file_size.to_le_bytes());
    }

    /// A fresh entry with zeroed timestamps, the form this driver writes.
    pub fn new(shortname: [u8; 11], attr: u8, first_cluster: u32, file_size: u32) -> Self {
        let mut entry = Self::default();
        entry.shortname = shortname;
        entry.attr = attr;
        entry.set_cluster_num(first_cluster);
        entry.file_size = file_size;

        entry
    }

    pub fn cluster_num(&self) -> u32 {
        (self.fst_clus_hi as u32) << 16 | (self.fst_clus_lo as u32)
    }

    pub fn set_cluster_num(&mut self, cluster: u32) {
        self.fst_clus_hi = (cluster >> 16) as u16;
        self.fst_clus_lo = cluster as u16;
    }
}

/// One long-file-name slot, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LfnSlot {
    pub seq: u8,
    pub checksum: u8,
    pub units: [u16; LFN_CHARS_PER_SLOT],
}

// Byte positions of the three name fragments within an LFN slot (5 + 6 + 2
// UTF-16LE code units).
const LFN_UNIT_OFFSETS: [usize; LFN_CHARS_PER_SLOT] =
    [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

impl LfnSlot {
    pub fn from_bytes(arr: &[u8; DIR_ENTRY_SIZE]) -> Self {
        let mut units = [0u16; LFN_CHARS_PER_SLOT];
        for (unit, off) in units.iter_mut().zip(LFN_UNIT_OFFSETS.iter()) {
            *unit = u16::from_le_bytes([arr[*off], arr[*off + 1]]);
        }

        Self { seq: arr[0], checksum: arr[13], units }
    }

    /// Encodes the slot holding characters `[idx * 13, (idx + 1) * 13)` of
    /// `name`. `idx` is the logical (1-based-on-disk) position minus one;
    /// the slot for the final fragment carries [`LFN_LAST_FLAG`].
    pub fn encode(
        name: &str,
        idx: usize,
        total_slots: usize,
        checksum: u8,
        arr: &mut [u8; DIR_ENTRY_SIZE],
    ) {
        for b in arr.iter_mut() {
            *b = 0;
        }

        let mut seq = (idx + 1) as u8;
        if idx + 1 == total_slots {
            seq |= LFN_LAST_FLAG;
        }

        arr[0] = seq;
        arr[11] = ATTR_LONG_NAME;
        arr[12] = 0; // type: name entry
        arr[13] = checksum;
        // first-cluster field stays zero in LFN slots (arr[26..28])

        let bytes = name.as_bytes();
        for (i, off) in LFN_UNIT_OFFSETS.iter().enumerate() {
            let unit = name::lfn_code_unit(bytes, idx * LFN_CHARS_PER_SLOT + i);
            arr[*off..*off + 2].copy_from_slice(&unit.to_le_bytes());
        }
    }
}

/// A resolved directory entry: the decoded name, the metadata, and the
/// on-disk location of the 8.3 slot (so the entry can later be rewritten or
/// deleted).
#[derive(Clone)]
pub struct Entry {
    pub(crate) name: LongName,
    pub attr: AttributeSet,
    pub start_cluster: u32,
    pub size: u32,
    pub write_date: u16,
    pub write_time: u16,

    pub(crate) short_name: [u8; 11],
    pub(crate) sector: u32,
    pub(crate) offset: u16,
}

impl Entry {
    /// The user-visible filename (long name when one is recorded, decoded
    /// 8.3 otherwise).
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn is_dir(&self) -> bool {
        self.attr.is_dir()
    }
}

impl Debug for Entry {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Entry")
            .field("name", &self.name)
            .field("attr", &self.attr)
            .field("start_cluster", &self.start_cluster)
            .field("size", &self.size)
            .finish()
    }
}

/// An open directory: a cursor over the directory byte stream.
#[derive(Debug, Clone, Default)]
pub struct DirHandle {
    pub(crate) start_cluster: u32,
    pub(crate) current_cluster: u32,
    /// Byte offset into the directory stream; always a multiple of 32.
    pub(crate) position: u32,
    pub(crate) last_entry_read: bool,
    pub(crate) is_open: bool,
}

impl DirHandle {
    pub(crate) fn at_cluster(cluster: u32) -> Self {
        Self {
            start_cluster: cluster,
            current_cluster: cluster,
            position: 0,
            last_entry_read: false,
            is_open: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn start_cluster(&self) -> u32 {
        self.start_cluster
    }
}

impl<D: BlockDevice> Fat32Volume<D> {
    /// The sequential directory iterator: assembles the next live entry,
    /// coalescing the LFN run (if any) that precedes its 8.3 slot.
    ///
    /// `Ok(None)` signals the end of the directory.
    pub(crate) fn next_dir_entry(&mut self, dir: &mut DirHandle) -> Result<Option<Entry>> {
        if dir.last_entry_read {
            return Ok(None);
        }

        let mut staging = [0u8; LONG_NAME_BUF];
        let mut staged = false;
        let mut expected_checksum = 0u8;

        // Sector cache: slots are read 16 to a sector, no point re-reading.
        let mut cached_sector: Option<u32> = None;

        loop {
            let cluster_offset = dir.position % self.bytes_per_cluster;
            let sector_in_cluster = cluster_offset / SECTOR_SIZE as u32;
            let byte_in_sector = (cluster_offset % SECTOR_SIZE as u32) as usize;

            let sector = self.cluster_to_sector(dir.current_cluster) + sector_in_cluster;

            if cached_sector != Some(sector) {
                self.read_sector(sector)?;
                cached_sector = Some(sector);
            }

            let raw: [u8; DIR_ENTRY_SIZE] = self.buf.as_slice()
                [byte_in_sector..byte_in_sector + DIR_ENTRY_SIZE]
                .try_into()
                .unwrap();

            let mut assembled: Option<Entry> = None;

            if raw[0] == DIR_ENTRY_END {
                dir.last_entry_read = true;
            } else if raw[0] == DIR_ENTRY_FREE {
                // Deleted slot; any half-collected long name is orphaned.
                staged = false;
            } else if raw[11] == ATTR_LONG_NAME {
                let slot = LfnSlot::from_bytes(&raw);

                if slot.seq & LFN_LAST_FLAG != 0 {
                    // Physically-first slot of a run: start collecting.
                    staging = [0; LONG_NAME_BUF];
                    expected_checksum = slot.checksum;
                }

                if slot.checksum == expected_checksum {
                    let at = ((slot.seq & 0x3F) as usize).saturating_sub(1) * LFN_CHARS_PER_SLOT;
                    for (i, unit) in slot.units.iter().enumerate() {
                        if at + i < LONG_NAME_BUF {
                            staging[at + i] = name::utf16_to_ascii(*unit);
                        }
                    }
                    staged = true;
                }
            } else {
                let entry = RawDirEntry::from_bytes(&raw);
                let checksum = name::shortname_checksum(&entry.shortname);

                let long_name = if staged && expected_checksum == checksum {
                    LongName::from_nul_terminated(&staging)
                } else {
                    name::shortname_to_filename(&entry.shortname)
                };

                assembled = Some(Entry {
                    name: long_name,
                    attr: AttributeSet::from_bits(entry.attr),
                    start_cluster: entry.cluster_num(),
                    size: entry.file_size,
                    write_date: entry.wrt_date,
                    write_time: entry.wrt_time,
                    short_name: entry.shortname,
                    sector,
                    offset: byte_in_sector as u16,
                });
            }

            if dir.last_entry_read {
                return Ok(None);
            }

            dir.position += DIR_ENTRY_SIZE as u32;
            if dir.position % self.bytes_per_cluster == 0 {
                let next = self.read_fat_entry(dir.current_cluster)?;
                cached_sector = None; // the buffer now holds a FAT sector

                if next >= FAT_ENTRY_EOC {
                    dir.last_entry_read = true;
                    return Ok(assembled);
                }
                dir.current_cluster = next;
            }

            if assembled.is_some() {
                return Ok(assembled);
            }
        }
    }

    /// Opens the directory at `path`; the entry must carry the DIRECTORY
    /// attribute. A stored start cluster of 0 (the `..` of a root child)
    /// reads as the root directory.
    pub fn dir_open(&mut self, path: &str) -> Result<DirHandle> {
        self.ensure_ready()?;

        let entry = match self.find_entry(path) {
            Ok(entry) => entry,
            Err(Error::FileNotFound) => return Err(Error::DirNotFound),
            Err(e) => return Err(e),
        };
        if !entry.attr.is_dir() {
            return Err(Error::NotADirectory);
        }

        let cluster = if entry.start_cluster != 0 {
            entry.start_cluster
        } else {
            self.bpb.root_cluster
        };

        Ok(DirHandle::at_cluster(cluster))
    }

    /// Reads the next entry of an open directory; `Ok(None)` at the end.
    pub fn dir_read(&mut self, dir: &mut DirHandle) -> Result<Option<Entry>> {
        if !dir.is_open {
            return Err(Error::InvalidParameter);
        }
        self.ensure_ready()?;

        self.next_dir_entry(dir)
    }

    /// Closes a directory handle. There is nothing to flush; the handle is
    /// just reset so further reads fail fast.
    pub fn dir_close(&mut self, dir: &mut DirHandle) {
        *dir = DirHandle::default();
    }

    /// Creates a directory at `path` and seeds it with its `.` and `..`
    /// entries.
    pub fn dir_create(&mut self, path: &str) -> Result<DirHandle> {
        self.ensure_ready()?;

        let (file, parent_cluster) = self.new_entry(path, Attribute::Directory as u8)?;
        let start_cluster = file.start_cluster;

        // A fresh directory cluster must read as all end-of-directory
        // markers.
        let first_sector = self.cluster_to_sector(start_cluster);
        self.clear_buf();
        for i in 0..self.bpb.sectors_per_cluster as u32 {
            self.write_sector(first_sector + i)?;
        }

        // `.` points at the directory itself; `..` at the parent, written as
        // 0 when the parent is the root (FAT32 convention).
        let dot = RawDirEntry::new(
            *b".          ",
            Attribute::Directory as u8,
            start_cluster,
            0,
        );
        let dotdot_cluster = if parent_cluster == self.bpb.root_cluster {
            0
        } else {
            parent_cluster
        };
        let dotdot = RawDirEntry::new(
            *b"..         ",
            Attribute::Directory as u8,
            dotdot_cluster,
            0,
        );

        self.read_sector(first_sector)?;
        let mut slot = [0u8; DIR_ENTRY_SIZE];
        dot.write(&mut slot);
        self.buf[0..DIR_ENTRY_SIZE].copy_from_slice(&slot);
        dotdot.write(&mut slot);
        self.buf[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE].copy_from_slice(&slot);
        self.write_sector(first_sector)?;

        Ok(DirHandle::at_cluster(start_cluster))
    }

    /// Deletes the (empty) directory at `path`.
    pub fn dir_delete(&mut self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(Error::InvalidParameter);
        }
        self.ensure_ready()?;

        self.delete_entry(path, true)
    }
}

#[cfg(test)]
mod dir_tests {
    use super::*;

    #[test]
    fn raw_entry_roundtrip() {
        let entry = RawDirEntry {
            shortname: *b"HELLO   TXT",
            attr: Attribute::Archive as u8,
            nt_res: 0,
            crt_time_tenth: 3,
            crt_time: 0x1234,
            crt_date: 0x5678,
            lst_acc_date: 0x9ABC,
            fst_clus_hi: 0x0004,
            wrt_time: 0xDEF0,
            wrt_date: 0x0F0F,
            fst_clus_lo: 0x0321,
            file_size: 123_456,
        };

        let mut arr = [0u8; DIR_ENTRY_SIZE];
        entry.write(&mut arr);

        assert_eq!(RawDirEntry::from_bytes(&arr), entry);
        assert_eq!(entry.cluster_num(), 0x0004_0321);
    }

    #[test]
    fn cluster_num_split() {
        let mut entry = RawDirEntry::default();
        entry.set_cluster_num(0x00AB_CDEF);

        assert_eq!(entry.fst_clus_hi, 0x00AB);
        assert_eq!(entry.fst_clus_lo, 0xCDEF);
        assert_eq!(entry.cluster_num(), 0x00AB_CDEF);
    }

    #[test]
    fn lfn_slot_roundtrip() {
        let mut arr = [0u8; DIR_ENTRY_SIZE];
        LfnSlot::encode("hello world.txt", 0, 2, 0x42, &mut arr);

        let slot = LfnSlot::from_bytes(&arr);
        assert_eq!(slot.seq, 1); // first fragment, not the last of two
        assert_eq!(slot.checksum, 0x42);
        assert_eq!(arr[11], ATTR_LONG_NAME);
        assert_eq!(&arr[26..28], &[0, 0]); // first-cluster field stays zero

        let decoded: Vec<u8> = slot.units.iter().map(|u| *u as u8).collect();
        assert_eq!(&decoded[..], b"hello world.t");
    }

    #[test]
    fn lfn_final_slot_terminates_and_fills() {
        let mut arr = [0u8; DIR_ENTRY_SIZE];
        // "hello world.txt" is 15 chars: the second slot carries chars 13..15,
        // then the NUL, then 0xFFFF fill.
        LfnSlot::encode("hello world.txt", 1, 2, 0x42, &mut arr);

        let slot = LfnSlot::from_bytes(&arr);
        assert_eq!(slot.seq, 2 | LFN_LAST_FLAG);
        assert_eq!(slot.units[0], 'x' as u16);
        assert_eq!(slot.units[1], 't' as u16);
        assert_eq!(slot.units[2], 0x0000);
        assert!(slot.units[3..].iter().all(|u| *u == 0xFFFF));
    }

    #[test]
    fn attribute_set() {
        let attrs = AttributeSet::from_bits(
            Attribute::Directory as u8 | Attribute::Hidden as u8,
        );

        assert!(attrs.is_dir());
        assert!(attrs.contains(Attribute::Hidden));
        assert!(!attrs.contains(Attribute::Archive));
        assert!(!attrs.is_volume_label());
    }
}
