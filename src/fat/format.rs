//! Laying down a fresh FAT32 volume on a block device.

use super::boot_sector::{BootSector, FsInfo};
use super::table::END_OF_CHAIN;
use crate::error::{Error, Result};
use crate::storage::{BlockDevice, Sector};

use generic_array::GenericArray;

/// FAT[0] for media descriptor 0xF8: the descriptor in the low byte, ones
/// above.
const FAT_ENTRY_0: u32 = 0x0FFF_FFF8;

/// Writes a blank FAT32 filesystem covering `total_sectors` of the device:
/// boot sector, FSInfo, both FATs, and an empty root directory. No partition
/// table is written; the volume starts at LBA 0.
///
/// Fails with `InvalidParameter` when the resulting cluster count would drop
/// below the FAT32 minimum (what you asked for would be a FAT12/16 volume).
pub fn mkfs<D: BlockDevice>(
    dev: &mut D,
    total_sectors: u32,
    sectors_per_cluster: u8,
) -> Result<()> {
    if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
        return Err(Error::InvalidParameter);
    }

    let boot = BootSector::new(total_sectors, sectors_per_cluster);
    let bpb = &boot.bpb;

    let reserved = bpb.reserved_sectors as u32;
    let num_fats = bpb.num_fats as u32;
    let fat_size = bpb.fat_size_32;

    let data_sectors = total_sectors - num_fats * fat_size;
    let cluster_count = data_sectors / sectors_per_cluster as u32;
    if cluster_count < 65525 {
        log::warn!(
            "{} clusters of {} sectors is FAT12/16 territory, refusing",
            cluster_count,
            sectors_per_cluster
        );
        return Err(Error::InvalidParameter);
    }

    let mut sector: Sector = GenericArray::default();

    macro_rules! put {
        ($lba:expr) => {
            dev.write_block($lba, &sector).map_err(|e| {
                log::warn!("format write at LBA {} failed: {:?}", $lba, e);
                Error::WriteFailed
            })?
        };
    }

    boot.write(&mut sector);
    put!(0);

    // Root directory occupies one cluster; its cluster is spoken for from
    // the start.
    FsInfo { free_count: cluster_count - 1, next_free: 3 }.write(&mut sector);
    put!(1);

    // Zero the FATs...
    for b in sector.iter_mut() {
        *b = 0;
    }
    for fat in 0..num_fats {
        for s in 1..fat_size {
            put!(reserved + fat * fat_size + s);
        }
    }

    // ...then seed entries 0 and 1 plus the root directory chain.
    sector[0..4].copy_from_slice(&FAT_ENTRY_0.to_le_bytes());
    sector[4..8].copy_from_slice(&END_OF_CHAIN.to_le_bytes());
    sector[8..12].copy_from_slice(&END_OF_CHAIN.to_le_bytes()); // root cluster
    for fat in 0..num_fats {
        put!(reserved + fat * fat_size);
    }

    // Empty root directory: all end-of-directory markers.
    for b in sector.iter_mut() {
        *b = 0;
    }
    let first_data_sector = reserved + num_fats * fat_size;
    for s in 0..sectors_per_cluster as u32 {
        put!(first_data_sector + s);
    }

    log::debug!(
        "formatted: {} sectors, {} clusters, FATs of {} sectors",
        total_sectors,
        cluster_count,
        fat_size
    );

    Ok(())
}
