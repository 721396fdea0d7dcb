//! Creating and removing directory objects.
//!
//! A directory object is the atomic pair of an LFN slot run and its 8.3
//! entry; creation writes both (and allocates the object's first cluster),
//! removal frees both (and releases the chain).

use super::Fat32Volume;
use super::dir::{
    AttributeSet, DirHandle, LfnSlot, RawDirEntry,
    ATTR_LONG_NAME, DIR_ENTRY_END, DIR_ENTRY_FREE, DIR_ENTRY_SIZE,
};
use super::file::FileHandle;
use super::name::{self, BasisName};
use super::path::split_path;
use super::table::FAT_ENTRY_EOC;
use super::MAX_FILENAME_LEN;
use crate::error::{Error, Result};
use crate::storage::{BlockDevice, SECTOR_SIZE};

impl<D: BlockDevice> Fat32Volume<D> {
    /// Volume-relative sector and in-sector byte offset of the directory
    /// slot at stream position `pos`, re-walking the chain from the
    /// directory's first cluster.
    fn locate_dir_slot(&mut self, dir_start: u32, pos: u32) -> Result<(u32, usize)> {
        let hops = pos / self.bytes_per_cluster;
        let cluster = self.walk_chain(dir_start, hops)?;

        let cluster_offset = pos % self.bytes_per_cluster;
        let sector = self.cluster_to_sector(cluster) + cluster_offset / SECTOR_SIZE as u32;

        Ok((sector, (cluster_offset % SECTOR_SIZE as u32) as usize))
    }

    /// Read-modify-writes one 32-byte slot; returns its on-disk location.
    fn write_dir_slot(
        &mut self,
        dir_start: u32,
        pos: u32,
        slot: &[u8; DIR_ENTRY_SIZE],
    ) -> Result<(u32, usize)> {
        let (sector, offset) = self.locate_dir_slot(dir_start, pos)?;

        self.read_sector(sector)?;
        self.buf[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(slot);
        self.write_sector(sector)?;

        Ok((sector, offset))
    }

    /// Whether any entry of the directory already owns this 8.3 name.
    fn shortname_exists(&mut self, dir_start: u32, candidate: &[u8; 11]) -> Result<bool> {
        let mut dir = DirHandle::at_cluster(dir_start);

        while let Some(entry) = self.next_dir_entry(&mut dir)? {
            if &entry.short_name == candidate {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Synthesizes a unique 8.3 name for a long filename, appending a `~N`
    /// tail whenever the basis is lossy, overflows, or collides.
    fn unique_shortname(&mut self, dir_start: u32, longname: &str) -> Result<[u8; 11]> {
        let basis = BasisName::derive(longname);

        if !basis.needs_tail {
            let candidate = basis.compose(None);
            if !self.shortname_exists(dir_start, &candidate)? {
                return Ok(candidate);
            }
        }

        for n in 1..1_000_000 {
            let candidate = basis.compose(Some(n));
            if !self.shortname_exists(dir_start, &candidate)? {
                return Ok(candidate);
            }
        }

        Err(Error::DiskFull)
    }

    /// Finds the stream position of `needed` consecutive free slots in the
    /// directory, growing it by a cluster (zeroed, so its slots all read
    /// free) whenever the scan runs off the end of the chain.
    fn find_free_run(&mut self, dir_start: u32, needed: usize) -> Result<u32> {
        let mut cluster = dir_start;
        let mut pos: u32 = 0;
        let mut run_start: u32 = 0;
        let mut run_len: usize = 0;

        loop {
            let cluster_offset = pos % self.bytes_per_cluster;
            let sector = self.cluster_to_sector(cluster) + cluster_offset / SECTOR_SIZE as u32;
            self.read_sector(sector)?;

            for i in (0..SECTOR_SIZE).step_by(DIR_ENTRY_SIZE) {
                let first = self.buf[i];
                if first == DIR_ENTRY_FREE || first == DIR_ENTRY_END {
                    if run_len == 0 {
                        run_start = pos + i as u32;
                    }
                    run_len += 1;
                    if run_len >= needed {
                        return Ok(run_start);
                    }
                } else {
                    run_len = 0;
                }
            }

            pos += SECTOR_SIZE as u32;
            if pos % self.bytes_per_cluster == 0 {
                let next = self.read_fat_entry(cluster)?;
                if next >= FAT_ENTRY_EOC {
                    // The parent is full; grow it. The fresh cluster scans as
                    // one long free run.
                    let grown = self.alloc_cluster()?;
                    self.write_fat_entry(cluster, grown)?;
                    self.zero_cluster(grown)?;
                    cluster = grown;
                } else {
                    cluster = next;
                }
            }
        }
    }

    /// Creates a new file or directory entry at `path`: allocates its first
    /// cluster, writes the LFN run (physically reversed) and the 8.3 slot,
    /// and returns a handle carrying the start cluster plus the 8.3 slot's
    /// on-disk location, along with the parent directory's start cluster.
    pub(crate) fn new_entry(&mut self, path: &str, attr: u8) -> Result<(FileHandle, u32)> {
        match self.find_entry(path) {
            Ok(_) => return Err(Error::FileExists),
            Err(Error::FileNotFound) => {}
            Err(e) => return Err(e),
        }

        let (parent_path, leaf) = split_path(path)?;
        if leaf.len() > MAX_FILENAME_LEN {
            return Err(Error::InvalidPath);
        }

        let parent = self.dir_open(parent_path)?;
        let parent_cluster = parent.start_cluster();

        // Every entry gets a long name, preserving case and characters the
        // 8.3 space can't; the 8.3 slot gets either the direct conversion or
        // a synthesized unique basis.
        let lfn_slots = name::lfn_slot_count(leaf.len());
        let shortname = if name::valid_shortname(leaf) {
            name::filename_to_shortname(leaf)
        } else {
            self.unique_shortname(parent_cluster, leaf)?
        };

        let run_start = self.find_free_run(parent_cluster, lfn_slots + 1)?;

        let start_cluster = self.alloc_cluster()?;
        let checksum = name::shortname_checksum(&shortname);

        // LFN slots are written in reverse: the slot holding the final name
        // fragment (flagged as last-in-sequence) lands at the first disk
        // position of the run.
        let mut slot = [0u8; DIR_ENTRY_SIZE];
        for i in 0..lfn_slots {
            let logical = lfn_slots - 1 - i;
            LfnSlot::encode(leaf, logical, lfn_slots, checksum, &mut slot);
            self.write_dir_slot(parent_cluster, run_start + (i * DIR_ENTRY_SIZE) as u32, &slot)?;
        }

        let raw = RawDirEntry::new(shortname, attr, start_cluster, 0);
        raw.write(&mut slot);
        let pos_83 = run_start + (lfn_slots * DIR_ENTRY_SIZE) as u32;
        let (sector, offset) = self.write_dir_slot(parent_cluster, pos_83, &slot)?;

        let file = FileHandle {
            start_cluster,
            current_cluster: start_cluster,
            cluster_index: 0,
            file_size: 0,
            position: 0,
            attributes: AttributeSet::from_bits(attr),
            dir_entry_sector: sector,
            dir_entry_offset: offset as u16,
            is_open: true,
        };

        Ok((file, parent_cluster))
    }

    /// Deletes the entry at `path`: frees the whole LFN run together with
    /// the 8.3 slot (even when the run straddles sectors or clusters), then
    /// releases the cluster chain.
    pub(crate) fn delete_entry(&mut self, path: &str, is_dir: bool) -> Result<()> {
        let entry = self.find_entry(path)?;

        if is_dir {
            if !entry.attr.is_dir() {
                return Err(Error::NotADirectory);
            }

            // Only `.` and `..` may remain in a directory about to go away.
            let cluster = if entry.start_cluster != 0 {
                entry.start_cluster
            } else {
                self.bpb.root_cluster
            };
            let mut dir = DirHandle::at_cluster(cluster);
            while let Some(sub) = self.next_dir_entry(&mut dir)? {
                if sub.name() != "." && sub.name() != ".." {
                    return Err(Error::DirNotEmpty);
                }
            }
        } else if entry.attr.is_dir() || entry.attr.is_volume_label() {
            return Err(Error::NotAFile);
        }

        // The root and the dot shortcuts resolve without an on-disk slot;
        // those can't be deleted.
        if entry.sector == 0 {
            return Err(Error::InvalidParameter);
        }

        let (parent_path, _) = split_path(path)?;
        let parent = self.dir_open(parent_path)?;
        let parent_cluster = parent.start_cluster();

        // Forward raw-slot scan: track where the LFN run preceding each live
        // entry begins, until we stand on the entry being deleted.
        let mut cluster = parent_cluster;
        let mut pos: u32 = 0;
        let mut run_start: Option<u32> = None;
        let mut target_pos: Option<u32> = None;

        'scan: loop {
            let cluster_offset = pos % self.bytes_per_cluster;
            let sector = self.cluster_to_sector(cluster) + cluster_offset / SECTOR_SIZE as u32;
            self.read_sector(sector)?;

            for i in (0..SECTOR_SIZE).step_by(DIR_ENTRY_SIZE) {
                let first = self.buf[i];
                let slot_attr = self.buf[i + 11];
                let slot_pos = pos + i as u32;

                if first == DIR_ENTRY_END {
                    break 'scan;
                } else if first == DIR_ENTRY_FREE {
                    run_start = None;
                } else if slot_attr == ATTR_LONG_NAME {
                    if run_start.is_none() {
                        run_start = Some(slot_pos);
                    }
                } else {
                    if sector == entry.sector && i as u16 == entry.offset {
                        target_pos = Some(slot_pos);
                        break 'scan;
                    }
                    run_start = None;
                }
            }

            pos += SECTOR_SIZE as u32;
            if pos % self.bytes_per_cluster == 0 {
                let next = self.read_fat_entry(cluster)?;
                if next >= FAT_ENTRY_EOC {
                    break;
                }
                cluster = next;
            }
        }

        let target_pos = target_pos.ok_or(Error::FileNotFound)?;
        let mut p = run_start.unwrap_or(target_pos);

        // Mark every slot of the run free, one sector write per sector
        // touched.
        while p <= target_pos {
            let (sector, mut offset) = self.locate_dir_slot(parent_cluster, p)?;
            self.read_sector(sector)?;

            while p <= target_pos && offset < SECTOR_SIZE {
                self.buf[offset] = DIR_ENTRY_FREE;
                offset += DIR_ENTRY_SIZE;
                p += DIR_ENTRY_SIZE as u32;
            }

            self.write_sector(sector)?;
        }

        // The 8.3 slot was the authoritative reference; with it gone the
        // chain goes back to the pool.
        if entry.start_cluster >= 2 {
            self.release_chain(entry.start_cluster)?;
        }

        Ok(())
    }
}
