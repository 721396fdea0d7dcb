// Formats an in-memory card image, mounts it, and prints the volume
// geometry. Pass a path to inspect a real image (or block device, e.g.
// /dev/mmcblk0) instead.

use fat32::fat::format::mkfs;
use fat32::storage::{FileBackedDevice, MemDevice};
use fat32::Fat32Volume;

// 264 MiB: comfortably above the FAT32 cluster-count floor at 4 KiB clusters.
const DEMO_SECTORS: u32 = 540_672;

fn report<D: fat32::BlockDevice>(vol: &mut Fat32Volume<D>) {
    vol.mount().expect("mount failed");

    let mut label = [0u8; 16];
    println!("volume label : {:?}", vol.volume_name(&mut label).unwrap());
    println!("cluster size : {} bytes", vol.cluster_size());
    println!("total space  : {} bytes", vol.total_space().unwrap());
    println!("free space   : {} bytes", vol.free_space().unwrap());
}

fn main() {
    match std::env::args().nth(1) {
        Some(path) => {
            let dev = FileBackedDevice::open(&path).expect("cannot open image");
            println!("inspecting {}", path);
            report(&mut Fat32Volume::new(dev));
        }
        None => {
            let mut dev = MemDevice::new(DEMO_SECTORS);
            mkfs(&mut dev, DEMO_SECTORS, 8).expect("format failed");
            println!(
                "formatted a {} MiB in-memory volume",
                DEMO_SECTORS / 2048
            );
            report(&mut Fat32Volume::new(dev));
        }
    }
}
