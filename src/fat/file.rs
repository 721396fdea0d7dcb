//! The file engine: open/create/close, sequential reads, extending writes,
//! and seek.

use super::Fat32Volume;
use super::dir::AttributeSet;
use super::table::FAT_ENTRY_EOC;
use crate::error::{Error, Result};
use crate::storage::{BlockDevice, SECTOR_SIZE};

/// An open file.
///
/// The handle is plain data owned by the caller; the engine reads and
/// updates it but never stores it. `current_cluster`/`cluster_index` cache
/// the chain position for sequential I/O; a seek leaves them stale and the
/// next read or write re-walks from `start_cluster`.
#[derive(Debug, Clone, Default)]
pub struct FileHandle {
    pub(crate) start_cluster: u32,
    pub(crate) current_cluster: u32,
    /// Chain position (in clusters) that `current_cluster` corresponds to.
    pub(crate) cluster_index: u32,
    pub(crate) file_size: u32,
    pub(crate) position: u32,
    pub(crate) attributes: AttributeSet,
    /// Volume-relative sector of the owning 8.3 slot, for persisting size
    /// changes. Zero for entries with no rewritable slot.
    pub(crate) dir_entry_sector: u32,
    pub(crate) dir_entry_offset: u16,
    pub(crate) is_open: bool,
}

impl FileHandle {
    /// Current byte position.
    pub fn tell(&self) -> u32 {
        self.position
    }

    /// File size in bytes.
    pub fn size(&self) -> u32 {
        self.file_size
    }

    /// Whether the position is at (or past) the end of the file.
    pub fn eof(&self) -> bool {
        self.position >= self.file_size
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn attributes(&self) -> AttributeSet {
        self.attributes
    }
}

impl<D: BlockDevice> Fat32Volume<D> {
    /// Brings the handle's cached cluster in line with its position,
    /// re-walking from the start of the chain after a backward seek.
    fn seek_cluster(&mut self, file: &mut FileHandle) -> Result<u32> {
        let want = file.position / self.bytes_per_cluster;

        if want < file.cluster_index || file.current_cluster < 2 {
            file.current_cluster = file.start_cluster;
            file.cluster_index = 0;
        }

        while file.cluster_index < want {
            let next = self.read_fat_entry(file.current_cluster)?;
            if next >= FAT_ENTRY_EOC {
                return Err(Error::InvalidPosition);
            }
            file.current_cluster = next;
            file.cluster_index += 1;
        }

        Ok(file.current_cluster)
    }

    /// Opens an existing file for reading and writing.
    pub fn file_open(&mut self, path: &str) -> Result<FileHandle> {
        if path.is_empty() {
            return Err(Error::InvalidParameter);
        }
        self.ensure_ready()?;

        let entry = self.find_entry(path)?;
        if entry.attr.is_dir() || entry.attr.is_volume_label() {
            return Err(Error::NotAFile);
        }

        Ok(FileHandle {
            start_cluster: entry.start_cluster,
            current_cluster: entry.start_cluster,
            cluster_index: 0,
            file_size: entry.size,
            position: 0,
            attributes: entry.attr,
            dir_entry_sector: entry.sector,
            dir_entry_offset: entry.offset,
            is_open: true,
        })
    }

    /// Creates a new empty file (with one cluster already allocated) and
    /// returns its open handle.
    pub fn file_create(&mut self, path: &str) -> Result<FileHandle> {
        if path.is_empty() {
            return Err(Error::InvalidParameter);
        }
        self.ensure_ready()?;

        let (file, _parent) = self.new_entry(path, super::dir::Attribute::Archive as u8)?;
        Ok(file)
    }

    /// Closes the handle. All data is already on disk; the handle is just
    /// zeroed so further operations fail fast.
    pub fn file_close(&mut self, file: &mut FileHandle) {
        *file = FileHandle::default();
    }

    /// Reads up to `buf.len()` bytes at the current position.
    ///
    /// End of file is not an error: the call returns with fewer bytes than
    /// asked for (zero when the position is already at the end).
    pub fn file_read(&mut self, file: &mut FileHandle, buf: &mut [u8]) -> Result<usize> {
        if !file.is_open {
            return Err(Error::InvalidParameter);
        }
        self.ensure_ready()?;

        if file.position >= file.file_size {
            return Ok(0);
        }

        let remaining = (file.file_size - file.position) as usize;
        let size = buf.len().min(remaining);

        let mut cluster = self.seek_cluster(file)?;
        let mut total = 0;

        while total < size {
            let cluster_offset = file.position % self.bytes_per_cluster;
            let sector_in_cluster = cluster_offset / SECTOR_SIZE as u32;
            let byte_in_sector = (cluster_offset % SECTOR_SIZE as u32) as usize;

            let sector = self.cluster_to_sector(cluster) + sector_in_cluster;
            self.read_sector(sector)?;

            let n = (SECTOR_SIZE - byte_in_sector).min(size - total);
            buf[total..total + n].copy_from_slice(&self.buf[byte_in_sector..byte_in_sector + n]);

            total += n;
            file.position += n as u32;

            if file.position % self.bytes_per_cluster == 0 && total < size {
                let next = self.read_fat_entry(cluster)?;
                if next >= FAT_ENTRY_EOC {
                    // Chain ended early; report what we got.
                    break;
                }
                cluster = next;
                file.current_cluster = next;
                file.cluster_index += 1;
            }
        }

        Ok(total)
    }

    /// Writes `buf` at the current position, extending the cluster chain as
    /// needed, and persists the new file size into the 8.3 slot.
    pub fn file_write(&mut self, file: &mut FileHandle, buf: &[u8]) -> Result<usize> {
        if !file.is_open {
            return Err(Error::InvalidParameter);
        }
        self.ensure_ready()?;

        if buf.is_empty() {
            return Ok(0);
        }

        let end_pos = file.position as u64 + buf.len() as u64;
        if end_pos > u32::max_value() as u64 {
            return Err(Error::InvalidParameter);
        }

        let bpc = self.bytes_per_cluster as u64;
        let needed_clusters = ((end_pos + bpc - 1) / bpc) as u32;

        // A freshly created file has size 0 but already owns its first
        // cluster, so the chain is logically one cluster long.
        let current_clusters = if file.file_size == 0 {
            1
        } else {
            (file.file_size + self.bytes_per_cluster - 1) / self.bytes_per_cluster
        };

        // Walk to the last cluster of the chain, then grow it.
        let mut last = file.start_cluster;
        for _ in 1..current_clusters {
            let next = self.read_fat_entry(last)?;
            if next >= FAT_ENTRY_EOC {
                break;
            }
            last = next;
        }

        for _ in current_clusters..needed_clusters {
            let grown = self.alloc_cluster()?;
            self.write_fat_entry(last, grown)?;
            last = grown;
        }

        let mut cluster = self.seek_cluster(file)?;
        let mut total = 0;

        while total < buf.len() {
            let cluster_offset = file.position % self.bytes_per_cluster;
            let sector_in_cluster = cluster_offset / SECTOR_SIZE as u32;
            let byte_in_sector = (cluster_offset % SECTOR_SIZE as u32) as usize;

            let sector = self.cluster_to_sector(cluster) + sector_in_cluster;

            // Read-modify-write; partial sectors keep their other bytes.
            self.read_sector(sector)?;
            let n = (SECTOR_SIZE - byte_in_sector).min(buf.len() - total);
            self.buf[byte_in_sector..byte_in_sector + n].copy_from_slice(&buf[total..total + n]);
            self.write_sector(sector)?;

            total += n;
            file.position += n as u32;

            if file.position % self.bytes_per_cluster == 0 && total < buf.len() {
                let next = self.read_fat_entry(cluster)?;
                if next >= FAT_ENTRY_EOC {
                    return Err(Error::DiskFull);
                }
                cluster = next;
                file.current_cluster = next;
                file.cluster_index += 1;
            }
        }

        if file.position > file.file_size {
            file.file_size = file.position;
        }

        // Persist the size into the owning 8.3 slot.
        if file.dir_entry_sector != 0 && (file.dir_entry_offset as usize) < SECTOR_SIZE {
            self.read_sector(file.dir_entry_sector)?;
            let off = file.dir_entry_offset as usize;
            self.buf[off + 28..off + 32].copy_from_slice(&file.file_size.to_le_bytes());
            self.write_sector(file.dir_entry_sector)?;
        }

        Ok(total)
    }

    /// Sets the file position. Positions past the end are allowed; a write
    /// there extends the file.
    pub fn file_seek(&mut self, file: &mut FileHandle, position: u32) -> Result<()> {
        if !file.is_open {
            return Err(Error::InvalidParameter);
        }

        file.position = position;
        Ok(())
    }

    /// Deletes the file at `path`.
    pub fn file_delete(&mut self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(Error::InvalidParameter);
        }
        self.ensure_ready()?;

        self.delete_entry(path, false)
    }
}
