//! The FAT32 engine: volume discovery and mount state, geometry, and the
//! top-level operations that don't belong to the file or directory engines.

use crate::error::{Error, Result};
use crate::mbr;
use crate::storage::{BlockDevice, Sector, SECTOR_SIZE};

use boot_sector::{BiosParameterBlock, FsInfo};
use dir::{DirHandle, Entry};
use name::LongName;
use table::FAT_ENTRY_MASK;

use generic_array::GenericArray;

pub mod boot_sector;
pub mod table;
pub mod name;
pub mod dir;
pub mod entry;
pub mod path;
pub mod file;
pub mod format;

/// Longest path the resolver accepts, separators included.
pub const MAX_PATH_LEN: usize = 260;

/// Longest single filename (the LFN limit).
pub const MAX_FILENAME_LEN: usize = 255;

/// FAT32 requires at least this many clusters; anything smaller is FAT12/16
/// and gets rejected at mount.
const MIN_FAT32_CLUSTERS: u32 = 65525;

/// How many directory levels [`Fat32Volume::current_dir`] will walk back up.
const MAX_DIR_DEPTH: usize = 16;

/// A FAT32 volume on a block device.
///
/// This is the single context value behind every operation: it owns the
/// device, the captured boot parameters, the current-directory cluster, and
/// the one shared sector buffer all disk traffic goes through. File and
/// directory handles are plain data owned by callers and passed back in.
///
/// The engine is strictly single-threaded; wrap the volume in a
/// [`crate::mutex::Mutex`] to share it with a card-detect poll.
pub struct Fat32Volume<D: BlockDevice> {
    dev: D,

    mounted: bool,
    status: Result<()>,

    pub(crate) bpb: BiosParameterBlock,

    /// Device LBA of the volume's boot sector; added to every
    /// volume-relative sector.
    volume_start_block: u32,
    pub(crate) first_data_sector: u32,
    pub(crate) cluster_count: u32,
    pub(crate) bytes_per_cluster: u32,

    pub(crate) current_dir_cluster: u32,

    /// Rover hint for the free-cluster scan.
    pub(crate) next_free_hint: u32,

    /// The shared sector buffer. Every disk-touching call assumes exclusive
    /// use of it for its duration; nothing may hold a reference into it
    /// across calls.
    pub(crate) buf: Sector,
}

impl<D: BlockDevice> Fat32Volume<D> {
    /// Wraps a block device. Nothing touches the disk until the first mount
    /// (or ready check).
    pub fn new(dev: D) -> Self {
        Self {
            dev,
            mounted: false,
            status: Ok(()),
            bpb: BiosParameterBlock::default(),
            volume_start_block: 0,
            first_data_sector: 0,
            cluster_count: 0,
            bytes_per_cluster: 0,
            current_dir_cluster: 0,
            next_free_hint: 0,
            buf: GenericArray::default(),
        }
    }

    /// One-shot setup: initializes the block device and starts unmounted.
    ///
    /// The host is expected to call [`Self::poll_card_detect`] periodically
    /// (a 500ms timer is plenty); mounting itself happens lazily on the
    /// first ready check.
    pub fn init(&mut self) -> Result<()> {
        self.dev.init().map_err(|e| {
            log::warn!("block device init failed: {:?}", e);
            Error::InitFailed
        })?;
        self.unmount();

        Ok(())
    }

    pub fn device(&self) -> &D {
        &self.dev
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }

    pub fn into_device(self) -> D {
        self.dev
    }

    //
    // Mount & ready state
    //

    /// Discovers and mounts the volume: MBR partition scan (or raw BPB at
    /// LBA 0), BPB validation, geometry capture. Idempotent while mounted.
    pub fn mount(&mut self) -> Result<()> {
        if !self.dev.present() {
            self.unmount();
            return Err(Error::NoCard);
        }

        if self.mounted {
            return Ok(());
        }

        self.dev.init().map_err(|e| {
            log::warn!("block device init failed: {:?}", e);
            Error::InitFailed
        })?;

        self.volume_start_block = 0;
        self.read_sector(0)?;

        if mbr::is_mbr(&self.buf) {
            let part = mbr::find_fat32_partition(&self.buf).ok_or_else(|| {
                log::warn!("MBR carries no FAT32 partition");
                Error::InvalidFormat
            })?;

            self.volume_start_block = part.start_lba;
            self.read_sector(0)?;
        } else if mbr::is_boot_sector(&self.buf) {
            // No partition table; the whole device is the volume.
            self.volume_start_block = 0;
        } else {
            log::warn!("sector 0 is neither an MBR nor a FAT boot sector");
            return Err(Error::InvalidFormat);
        }

        let bpb = BiosParameterBlock::read(&self.buf);
        bpb.validate()?;

        let spc = bpb.sectors_per_cluster as u32;
        let fat_sectors = bpb.num_fats as u32 * bpb.fat_size_32;

        let data_region_sectors = bpb.total_sectors_32 - fat_sectors;

        self.bytes_per_cluster = spc * SECTOR_SIZE as u32;
        self.first_data_sector = bpb.reserved_sectors as u32 + fat_sectors;
        self.cluster_count = data_region_sectors / spc;

        if self.cluster_count < MIN_FAT32_CLUSTERS {
            log::warn!(
                "{} clusters makes this FAT12/16, not FAT32",
                self.cluster_count
            );
            self.clear_geometry();
            return Err(Error::InvalidFormat);
        }

        self.current_dir_cluster = bpb.root_cluster;
        self.next_free_hint = 2;
        self.bpb = bpb;

        // Pick up the allocation rover a previous session left in FSInfo.
        let fsinfo_sector = self.bpb.fs_info_sector;
        if fsinfo_sector != 0 && fsinfo_sector != 0xFFFF {
            self.read_sector(fsinfo_sector as u32)?;
            if let Some(info) = FsInfo::read(&self.buf) {
                if info.next_free >= 2 && info.next_free < self.cluster_count + 2 {
                    self.next_free_hint = info.next_free;
                }
            }
        }

        self.mounted = true;
        log::debug!(
            "mounted: {} clusters of {} bytes, root at cluster {}, volume LBA {}",
            self.cluster_count,
            self.bytes_per_cluster,
            self.bpb.root_cluster,
            self.volume_start_block,
        );

        Ok(())
    }

    fn clear_geometry(&mut self) {
        self.bpb = BiosParameterBlock::default();
        self.volume_start_block = 0;
        self.first_data_sector = 0;
        self.cluster_count = 0;
        self.bytes_per_cluster = 0;
        self.current_dir_cluster = 0;
        self.next_free_hint = 0;
    }

    /// Drops the mount: geometry goes back to zeros and the status to
    /// `NoCard` until something remounts.
    pub fn unmount(&mut self) {
        self.mounted = false;
        self.status = Err(Error::NoCard);
        self.clear_geometry();
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Ready check: opportunistically mounts when a card is present, drops
    /// the mount when it is gone, and leaves the outcome in the last status.
    pub fn is_ready(&mut self) -> bool {
        if self.dev.present() {
            if !self.mounted {
                self.status = self.mount();
            } else {
                self.status = Ok(());
            }
        } else {
            if self.mounted {
                self.unmount();
            }
            self.status = Err(Error::NoCard);
        }

        self.status.is_ok()
    }

    /// Refreshes and returns the mount status.
    pub fn status(&mut self) -> Result<()> {
        self.is_ready();
        self.status
    }

    /// The card-detect hook: call periodically from a timer. A removed card
    /// drops the mount immediately; remounting happens on the next
    /// operation's ready check.
    pub fn poll_card_detect(&mut self) {
        if !self.dev.present() && self.mounted {
            log::info!("card removed, dropping mount");
            self.unmount();
        }
    }

    /// Guard at the top of every operation: fails fast with the last mount
    /// status when the volume isn't usable.
    pub(crate) fn ensure_ready(&mut self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(self.status.err().unwrap_or(Error::NotMounted))
        }
    }

    //
    // Volume metadata
    //

    /// Free space in bytes, from FSInfo when its signatures and count are
    /// credible, otherwise by scanning the FAT for zero entries.
    pub fn free_space(&mut self) -> Result<u64> {
        self.ensure_ready()?;

        let fsinfo_sector = self.bpb.fs_info_sector;
        if fsinfo_sector != 0 && fsinfo_sector != 0xFFFF {
            self.read_sector(fsinfo_sector as u32)?;
            if let Some(info) = FsInfo::read(&self.buf) {
                if info.free_count != boot_sector::FS_INFO_UNKNOWN
                    && info.free_count <= self.cluster_count
                {
                    return Ok(info.free_count as u64 * self.bytes_per_cluster as u64);
                }
            }
        }

        // FSInfo is absent or not credible; count free entries the slow way.
        let mut free_clusters: u64 = 0;
        for s in 0..self.bpb.fat_size_32 {
            self.read_sector(self.bpb.reserved_sectors as u32 + s)?;
            for off in (0..SECTOR_SIZE).step_by(4) {
                if self.buf_read_u32(off) & FAT_ENTRY_MASK == 0 {
                    free_clusters += 1;
                }
            }
        }

        Ok(free_clusters * self.bytes_per_cluster as u64)
    }

    /// Total size of the volume in bytes.
    pub fn total_space(&mut self) -> Result<u64> {
        self.ensure_ready()?;

        Ok(self.bpb.total_sectors_32 as u64 * SECTOR_SIZE as u64)
    }

    /// Bytes per cluster (zero while unmounted).
    pub fn cluster_size(&self) -> u32 {
        self.bpb.sectors_per_cluster as u32 * SECTOR_SIZE as u32
    }

    /// The volume label, read from the root directory's volume-id entry.
    /// An unlabeled volume yields `""`.
    pub fn volume_name<'a>(&mut self, out: &'a mut [u8]) -> Result<&'a str> {
        self.ensure_ready()?;

        let mut dir = DirHandle::at_cluster(self.bpb.root_cluster);
        let mut label: Option<Entry> = None;

        while let Some(entry) = self.next_dir_entry(&mut dir)? {
            if entry.attr.is_volume_label() {
                label = Some(entry);
                break;
            }
        }

        let name = match label {
            Some(ref entry) => entry.name(),
            None => "",
        };
        let bytes = name.as_bytes();
        if out.len() < bytes.len() {
            return Err(Error::InvalidParameter);
        }

        out[..bytes.len()].copy_from_slice(bytes);
        Ok(core::str::from_utf8(&out[..bytes.len()]).unwrap_or(""))
    }

    //
    // Current directory
    //

    /// Switches the current directory after validating that `path` names a
    /// directory.
    pub fn set_current_dir(&mut self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(Error::InvalidParameter);
        }
        self.ensure_ready()?;

        let dir = self.dir_open(path)?;
        self.current_dir_cluster = dir.start_cluster();

        Ok(())
    }

    /// Reconstructs the absolute path of the current directory by walking
    /// `..` links upward (at most [`MAX_DIR_DEPTH`] levels) and looking up
    /// each child's name in its parent.
    pub fn current_dir<'a>(&mut self, out: &'a mut [u8]) -> Result<&'a str> {
        self.ensure_ready()?;

        let root = self.bpb.root_cluster;

        let mut components = [LongName::empty(); MAX_DIR_DEPTH];
        let mut depth = 0;
        let mut cluster = self.current_dir_cluster;

        while cluster != root && depth < MAX_DIR_DEPTH {
            // `..` sits right after `.`; learn the parent cluster from it.
            let mut dir = DirHandle::at_cluster(cluster);
            let mut parent = root;
            let mut found_parent = false;
            let mut seen = 0;

            while let Some(entry) = self.next_dir_entry(&mut dir)? {
                if entry.attr.is_dir() && entry.name() == ".." {
                    parent = if entry.start_cluster != 0 { entry.start_cluster } else { root };
                    found_parent = true;
                    break;
                }
                seen += 1;
                if seen > 2 {
                    break;
                }
            }
            if !found_parent {
                break;
            }

            // Find which of the parent's entries we are.
            let mut parent_dir = DirHandle::at_cluster(parent);
            let mut found_name = false;

            while let Some(entry) = self.next_dir_entry(&mut parent_dir)? {
                if entry.attr.is_dir()
                    && entry.start_cluster == cluster
                    && entry.name() != "."
                    && entry.name() != ".."
                {
                    components[depth] = entry.name;
                    found_name = true;
                    break;
                }
            }
            if !found_name {
                break;
            }

            cluster = parent;
            depth += 1;
        }

        // Reassemble top-down.
        let mut len = 0;
        for i in (0..depth).rev() {
            let name = components[i].as_str().as_bytes();
            if len + 1 + name.len() > out.len() {
                return Err(Error::InvalidParameter);
            }
            out[len] = b'/';
            len += 1;
            out[len..len + name.len()].copy_from_slice(name);
            len += name.len();
        }

        if len == 0 {
            if out.is_empty() {
                return Err(Error::InvalidParameter);
            }
            out[0] = b'/';
            len = 1;
        }

        Ok(core::str::from_utf8(&out[..len]).unwrap_or("/"))
    }

    //
    // Sector-buffer plumbing (the BlockIO adapter)
    //

    /// Reads the volume-relative `sector` into the shared buffer.
    pub(crate) fn read_sector(&mut self, sector: u32) -> Result<()> {
        self.dev
            .read_block(self.volume_start_block + sector, &mut self.buf)
            .map_err(|e| {
                log::warn!("read of sector {} failed: {:?}", sector, e);
                Error::ReadFailed
            })
    }

    /// Writes the shared buffer out to the volume-relative `sector`.
    pub(crate) fn write_sector(&mut self, sector: u32) -> Result<()> {
        self.dev
            .write_block(self.volume_start_block + sector, &self.buf)
            .map_err(|e| {
                log::warn!("write of sector {} failed: {:?}", sector, e);
                Error::WriteFailed
            })
    }

    pub(crate) fn clear_buf(&mut self) {
        for b in self.buf.iter_mut() {
            *b = 0;
        }
    }

    pub(crate) fn buf_read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.buf[offset],
            self.buf[offset + 1],
            self.buf[offset + 2],
            self.buf[offset + 3],
        ])
    }

    pub(crate) fn buf_write_u32(&mut self, offset: usize, value: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Zeroes every sector of a data cluster.
    pub(crate) fn zero_cluster(&mut self, cluster: u32) -> Result<()> {
        let first = self.cluster_to_sector(cluster);

        self.clear_buf();
        for i in 0..self.bpb.sectors_per_cluster as u32 {
            self.write_sector(first + i)?;
        }

        Ok(())
    }
}
