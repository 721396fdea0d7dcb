//! The FAT32 boot sector and its companions: the BIOS Parameter Block that
//! fixes the volume geometry at mount time, and the FS Information Sector
//! carrying the advisory free-space numbers.
//!
//! Everything on disk here is little-endian, and several of the legacy
//! 16-bit fields are required to read zero on FAT32 (their 32-bit
//! replacements are authoritative); `validate` enforces that.

use crate::error::{Error, Result};
use crate::storage::{Sector, SECTOR_SIZE};

use core::convert::TryInto;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSector {
    /// The 8-byte OEM tag at offset 3, right after the jump instruction.
    pub oem_name: [u8; 8],

    pub bpb: BiosParameterBlock,
}

impl BootSector {
    pub fn new(total_sectors: u32, sectors_per_cluster: u8) -> BootSector {
        Self {
            oem_name: *b"FAT32FS ",
            bpb: BiosParameterBlock::new(total_sectors, sectors_per_cluster),
        }
    }

    pub fn read(sector: &Sector) -> Self {
        let mut oem_name = [0u8; 8];
        oem_name.copy_from_slice(&sector.as_slice()[3..11]);

        Self {
            oem_name,
            bpb: BiosParameterBlock::read(sector),
        }
    }

    pub fn write(&self, sector: &mut Sector) {
        // Jump instruction + NOP, as produced by every formatter out there.
        sector[0] = 0xEB;
        sector[1] = 0x58;
        sector[2] = 0x90;
        sector[3..11].copy_from_slice(&self.oem_name);

        self.bpb.write(sector);

        sector[510] = 0x55;
        sector[511] = 0xAA;
    }
}

/// The BIOS Parameter Block, FAT32 flavor (the DOS-era fields plus the
/// FAT32 extension block). Field names track the on-disk layout; the offset
/// of each field within the boot sector is noted alongside.
///
/// The all-zeros `Default` is the unmounted sentinel; it never validates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BiosParameterBlock {
    /// Bytes per sector, offset 0x00B. This driver insists on 512.
    pub bytes_per_sector: u16,

    /// Sectors per cluster, offset 0x00D. A power of two, at most 128.
    pub sectors_per_cluster: u8,

    /// Sectors set aside before the first FAT, offset 0x00E. The boot
    /// sector, FSInfo, and their backups live here.
    pub reserved_sectors: u16,

    /// Number of FAT copies, offset 0x010. One or two in practice.
    pub num_fats: u8,

    /// Offset 0x011. FAT12/16 root-directory entry count; zero on FAT32,
    /// whose root is an ordinary cluster chain.
    pub root_entries: u16,

    /// Offset 0x013. Legacy 16-bit total; zero on FAT32.
    pub total_sectors_16: u16,

    /// Media descriptor, offset 0x015 (0xF8 for fixed and SD media).
    pub media: u8,

    /// Offset 0x016. Legacy 16-bit FAT size; zero on FAT32.
    pub fat_size_16: u16,

    // CHS geometry, offsets 0x018/0x01A. Nothing addresses by
    // cylinder/head/sector any more; carried but ignored.
    pub sectors_per_track: u16,
    pub heads: u16,

    /// Sectors preceding this volume on the device, offset 0x01C. Zero on
    /// unpartitioned media.
    pub hidden_sectors: u32,

    /// Total sectors in the volume, offset 0x020. The authoritative count
    /// (its 16-bit twin at 0x013 must be zero).
    pub total_sectors_32: u32,

    /// Sectors per FAT, offset 0x024. The authoritative size (its 16-bit
    /// twin at 0x016 must be zero).
    pub fat_size_32: u32,

    /// FAT mirroring flags, offset 0x028. Bit 7 clear means all FATs are
    /// kept in sync, which is what this driver writes.
    pub ext_flags: u16,

    /// Filesystem version, offset 0x02A. Only 0.0 exists.
    pub fs_version: u16,

    /// First cluster of the root directory, offset 0x02C. Almost always 2.
    pub root_cluster: u32,

    /// Sector number of the FS Information Sector, offset 0x030; typically 1.
    /// 0 or 0xFFFF means there isn't one.
    pub fs_info_sector: u16,

    /// Sector number of the boot-sector backup copy, offset 0x032;
    /// 0 (or 0xFFFF) when no backup exists.
    pub backup_boot_sector: u16,

    // The extension block: BIOS drive number at 0x040, then (behind the
    // 0x29 signature byte at 0x042) the volume id/label and the "FAT32"
    // type tag.
    pub drive_number: u8,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub fs_type: [u8; 8],
}

// Field offsets within the boot sector, as written above.
const OFF_BYTES_PER_SECTOR: usize = 0x00B;
const OFF_SECTORS_PER_CLUSTER: usize = 0x00D;
const OFF_RESERVED_SECTORS: usize = 0x00E;
const OFF_NUM_FATS: usize = 0x010;
const OFF_ROOT_ENTRIES: usize = 0x011;
const OFF_TOTAL_SECTORS_16: usize = 0x013;
const OFF_MEDIA: usize = 0x015;
const OFF_FAT_SIZE_16: usize = 0x016;
const OFF_SECTORS_PER_TRACK: usize = 0x018;
const OFF_HEADS: usize = 0x01A;
const OFF_HIDDEN_SECTORS: usize = 0x01C;
const OFF_TOTAL_SECTORS_32: usize = 0x020;
const OFF_FAT_SIZE_32: usize = 0x024;
const OFF_EXT_FLAGS: usize = 0x028;
const OFF_FS_VERSION: usize = 0x02A;
const OFF_ROOT_CLUSTER: usize = 0x02C;
const OFF_FS_INFO_SECTOR: usize = 0x030;
const OFF_BACKUP_BOOT_SECTOR: usize = 0x032;
const OFF_DRIVE_NUMBER: usize = 0x040;
const OFF_EXT_BOOT_SIG: usize = 0x042;
const OFF_VOLUME_ID: usize = 0x043;
const OFF_VOLUME_LABEL: usize = 0x047;
const OFF_FS_TYPE: usize = 0x052;

impl BiosParameterBlock {
    /// Parameters for a freshly formatted volume spanning the whole device.
    ///
    /// The FAT size comes from the sizing calculation in Microsoft's FAT
    /// specification; it slightly overestimates, which is benign.
    pub fn new(total_sectors: u32, sectors_per_cluster: u8) -> Self {
        let reserved: u16 = 0x0020;
        let num_fats: u8 = 2;

        let tmp1 = total_sectors - reserved as u32;
        let tmp2 = (256 * sectors_per_cluster as u32 + num_fats as u32) / 2;
        let fat_size = (tmp1 + tmp2 - 1) / tmp2;

        Self {
            bytes_per_sector: SECTOR_SIZE as u16,
            sectors_per_cluster,
            reserved_sectors: reserved,
            num_fats,
            root_entries: 0,
            total_sectors_16: 0,
            media: 0xF8,
            fat_size_16: 0,

            sectors_per_track: 0x0020,
            heads: 0x0040,
            hidden_sectors: 0,
            total_sectors_32: total_sectors,
            fat_size_32: fat_size,
            ext_flags: 0,
            fs_version: 0,
            root_cluster: 2,
            fs_info_sector: 1,
            backup_boot_sector: 0,

            drive_number: 0x80,
            volume_id: 0,
            volume_label: *b"NO NAME    ",
            fs_type: *b"FAT32   ",
        }
    }

    pub fn read(sector: &Sector) -> Self {
        let s = sector.as_slice();

        let u16_at = |off: usize| u16::from_le_bytes([s[off], s[off + 1]]);
        let u32_at = |off: usize| u32::from_le_bytes([s[off], s[off + 1], s[off + 2], s[off + 3]]);

        let mut volume_label = [0u8; 11];
        volume_label.copy_from_slice(&s[OFF_VOLUME_LABEL..OFF_VOLUME_LABEL + 11]);
        let mut fs_type = [0u8; 8];
        fs_type.copy_from_slice(&s[OFF_FS_TYPE..OFF_FS_TYPE + 8]);

        Self {
            bytes_per_sector: u16_at(OFF_BYTES_PER_SECTOR),
            sectors_per_cluster: s[OFF_SECTORS_PER_CLUSTER],
            reserved_sectors: u16_at(OFF_RESERVED_SECTORS),
            num_fats: s[OFF_NUM_FATS],
            root_entries: u16_at(OFF_ROOT_ENTRIES),
            total_sectors_16: u16_at(OFF_TOTAL_SECTORS_16),
            media: s[OFF_MEDIA],
            fat_size_16: u16_at(OFF_FAT_SIZE_16),

            sectors_per_track: u16_at(OFF_SECTORS_PER_TRACK),
            heads: u16_at(OFF_HEADS),
            hidden_sectors: u32_at(OFF_HIDDEN_SECTORS),
            total_sectors_32: u32_at(OFF_TOTAL_SECTORS_32),
            fat_size_32: u32_at(OFF_FAT_SIZE_32),
            ext_flags: u16_at(OFF_EXT_FLAGS),
            fs_version: u16_at(OFF_FS_VERSION),
            root_cluster: u32_at(OFF_ROOT_CLUSTER),
            fs_info_sector: u16_at(OFF_FS_INFO_SECTOR),
            backup_boot_sector: u16_at(OFF_BACKUP_BOOT_SECTOR),

            drive_number: s[OFF_DRIVE_NUMBER],
            volume_id: u32_at(OFF_VOLUME_ID),
            volume_label,
            fs_type,
        }
    }

    pub fn write(&self, sector: &mut Sector) {
        let s = sector.as_mut_slice();

        macro_rules! w {
            ($field:expr, $offset:expr) => {{
                let bytes = $field.to_le_bytes();
                s[$offset..($offset + bytes.len())].copy_from_slice(&bytes);
            }};
        }

        w!(self.bytes_per_sector, OFF_BYTES_PER_SECTOR);
        w!(self.sectors_per_cluster, OFF_SECTORS_PER_CLUSTER);
        w!(self.reserved_sectors, OFF_RESERVED_SECTORS);
        w!(self.num_fats, OFF_NUM_FATS);
        w!(self.root_entries, OFF_ROOT_ENTRIES);
        w!(self.total_sectors_16, OFF_TOTAL_SECTORS_16);
        w!(self.media, OFF_MEDIA);
        w!(self.fat_size_16, OFF_FAT_SIZE_16);

        w!(self.sectors_per_track, OFF_SECTORS_PER_TRACK);
        w!(self.heads, OFF_HEADS);
        w!(self.hidden_sectors, OFF_HIDDEN_SECTORS);
        w!(self.total_sectors_32, OFF_TOTAL_SECTORS_32);
        w!(self.fat_size_32, OFF_FAT_SIZE_32);
        w!(self.ext_flags, OFF_EXT_FLAGS);
        w!(self.fs_version, OFF_FS_VERSION);
        w!(self.root_cluster, OFF_ROOT_CLUSTER);
        w!(self.fs_info_sector, OFF_FS_INFO_SECTOR);
        w!(self.backup_boot_sector, OFF_BACKUP_BOOT_SECTOR);
        w!(self.drive_number, OFF_DRIVE_NUMBER);

        // Extension boot signature; tells readers the id/label/type fields
        // that follow are in use.
        s[OFF_EXT_BOOT_SIG] = 0x29;
        w!(self.volume_id, OFF_VOLUME_ID);
        s[OFF_VOLUME_LABEL..OFF_VOLUME_LABEL + 11].copy_from_slice(&self.volume_label);
        s[OFF_FS_TYPE..OFF_FS_TYPE + 8].copy_from_slice(&self.fs_type);
    }

    /// Checks the invariants a FAT32 BPB must satisfy before the geometry
    /// can be trusted.
    pub fn validate(&self) -> Result<()> {
        // Bytes per sector - this one is critical.
        if self.bytes_per_sector != SECTOR_SIZE as u16 {
            log::warn!("rejecting BPB: bytes per sector is {}", self.bytes_per_sector);
            return Err(Error::InvalidFormat);
        }

        // Sectors per cluster must be a power of two, at most 128.
        let spc = self.sectors_per_cluster;
        if spc == 0 || spc > 128 || !spc.is_power_of_two() {
            log::warn!("rejecting BPB: sectors per cluster is {}", spc);
            return Err(Error::InvalidFormat);
        }

        if self.num_fats == 0 || self.num_fats > 2 {
            log::warn!("rejecting BPB: {} FATs", self.num_fats);
            return Err(Error::InvalidFormat);
        }

        if self.reserved_sectors == 0 {
            log::warn!("rejecting BPB: no reserved sectors");
            return Err(Error::InvalidFormat);
        }

        // The 16-bit FAT size must be zero and the 32-bit one in use,
        // otherwise this is not FAT32.
        if self.fat_size_16 != 0 || self.fat_size_32 == 0 {
            log::warn!(
                "rejecting BPB: FAT size fields are {} / {}",
                self.fat_size_16,
                self.fat_size_32
            );
            return Err(Error::InvalidFormat);
        }

        if self.total_sectors_32 == 0 {
            log::warn!("rejecting BPB: zero total sectors");
            return Err(Error::InvalidFormat);
        }

        Ok(())
    }
}

pub const FS_INFO_LEAD_SIG: u32 = 0x41615252;
pub const FS_INFO_STRUC_SIG: u32 = 0x61417272;
pub const FS_INFO_TRAIL_SIG: u32 = 0xAA550000;

/// The value of `free_count` / `next_free` that marks the field unknown.
pub const FS_INFO_UNKNOWN: u32 = 0xFFFFFFFF;

/// The FS Information Sector: a free-cluster count and allocation hint that
/// are advisory only and may be stale or absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfo {
    pub free_count: u32,
    pub next_free: u32,
}

impl FsInfo {
    /// Reads the FSInfo fields, or `None` when the signatures don't match.
    pub fn read(sector: &Sector) -> Option<Self> {
        let sector = sector.as_slice();

        macro_rules! e {
            ($offset:literal) => {
                u32::from_le_bytes(sector[$offset..($offset + 4)].try_into().unwrap())
            };
        }

        if e!(0) != FS_INFO_LEAD_SIG
            || e!(484) != FS_INFO_STRUC_SIG
            || e!(508) != FS_INFO_TRAIL_SIG
        {
            return None;
        }

        Some(Self {
            free_count: e!(488),
            next_free: e!(492),
        })
    }

    /// Writes a full FSInfo sector (signatures included) over `sector`.
    pub fn write(&self, sector: &mut Sector) {
        let sector = sector.as_mut_slice();
        for b in sector.iter_mut() {
            *b = 0;
        }

        sector[0..4].copy_from_slice(&FS_INFO_LEAD_SIG.to_le_bytes());
        sector[484..488].copy_from_slice(&FS_INFO_STRUC_SIG.to_le_bytes());
        sector[488..492].copy_from_slice(&self.free_count.to_le_bytes());
        sector[492..496].copy_from_slice(&self.next_free.to_le_bytes());
        sector[508..512].copy_from_slice(&FS_INFO_TRAIL_SIG.to_le_bytes());
    }

    /// Patches only the count/hint fields of an already-read FSInfo sector.
    pub fn patch(&self, sector: &mut Sector) {
        sector[488..492].copy_from_slice(&self.free_count.to_le_bytes());
        sector[492..496].copy_from_slice(&self.next_free.to_le_bytes());
    }
}
