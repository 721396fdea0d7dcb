//! Shared fixtures: freshly formatted in-memory volumes and raw on-disk
//! inspection helpers.
#![allow(dead_code)] // not every test binary uses every fixture

use fat32::fat::format::mkfs;
use fat32::storage::{MemDevice, SECTOR_SIZE};
use fat32::Fat32Volume;

/// 64 MiB with 512-byte clusters: the smallest geometry comfortably above
/// the FAT32 cluster-count floor, so most tests stay cheap.
pub const SMALL_VOLUME_SECTORS: u32 = 1 << 17;

/// 264 MiB with 4 KiB clusters, for the tests that care about multi-sector
/// clusters.
pub const BIG_VOLUME_SECTORS: u32 = 540_672;

pub fn volume_with(sectors: u32, sectors_per_cluster: u8) -> Fat32Volume<MemDevice> {
    let mut dev = MemDevice::new(sectors);
    mkfs(&mut dev, sectors, sectors_per_cluster).expect("format failed");

    let mut vol = Fat32Volume::new(dev);
    vol.mount().expect("mount failed");
    vol
}

pub fn fresh_volume() -> Fat32Volume<MemDevice> {
    volume_with(SMALL_VOLUME_SECTORS, 1)
}

/// Raw view of the volume's geometry, parsed straight from the image bytes
/// so tests don't have to trust the code under test for it.
pub struct RawGeometry {
    pub reserved_sectors: u32,
    pub num_fats: u32,
    pub fat_size: u32,
    pub sectors_per_cluster: u32,
    pub root_cluster: u32,
    pub cluster_count: u32,
}

impl RawGeometry {
    pub fn parse(image: &[u8]) -> Self {
        let u16_at = |off: usize| u16::from_le_bytes([image[off], image[off + 1]]) as u32;
        let u32_at = |off: usize| {
            u32::from_le_bytes([image[off], image[off + 1], image[off + 2], image[off + 3]])
        };

        let reserved_sectors = u16_at(0x00E);
        let num_fats = image[0x010] as u32;
        let fat_size = u32_at(0x024);
        let sectors_per_cluster = image[0x00D] as u32;
        let total_sectors = u32_at(0x020);
        let root_cluster = u32_at(0x02C);

        Self {
            reserved_sectors,
            num_fats,
            fat_size,
            sectors_per_cluster,
            root_cluster,
            cluster_count: (total_sectors - num_fats * fat_size) / sectors_per_cluster,
        }
    }

    /// FAT entry for `cluster`, read from the first FAT copy.
    pub fn fat_entry(&self, image: &[u8], cluster: u32) -> u32 {
        let off = self.reserved_sectors as usize * SECTOR_SIZE + cluster as usize * 4;
        u32::from_le_bytes([image[off], image[off + 1], image[off + 2], image[off + 3]])
            & 0x0FFF_FFFF
    }

    /// Byte offset of the first sector of a data cluster.
    pub fn cluster_offset(&self, cluster: u32) -> usize {
        let first_data = self.reserved_sectors + self.num_fats * self.fat_size;
        (first_data + (cluster - 2) * self.sectors_per_cluster) as usize * SECTOR_SIZE
    }

    /// Collects the cluster chain starting at `start`. Bails out (instead of
    /// spinning) if the chain is longer than the whole volume, i.e. cyclic.
    pub fn chain(&self, image: &[u8], start: u32) -> Vec<u32> {
        let mut clusters = vec![start];
        let mut cluster = start;

        loop {
            let next = self.fat_entry(image, cluster);
            if next >= 0x0FFF_FFF8 || next < 2 {
                break;
            }
            clusters.push(next);
            cluster = next;

            assert!(
                clusters.len() <= self.cluster_count as usize,
                "cyclic FAT chain starting at {}",
                start
            );
        }

        clusters
    }
}

/// Deterministic payload for I/O round trips.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
