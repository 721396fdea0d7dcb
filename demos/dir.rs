// Builds a small directory tree on an in-memory volume and walks it.

use fat32::fat::format::mkfs;
use fat32::storage::MemDevice;
use fat32::Fat32Volume;

// 264 MiB: comfortably above the FAT32 cluster-count floor at 4 KiB clusters.
const DEMO_SECTORS: u32 = 540_672;

fn main() {
    let mut dev = MemDevice::new(DEMO_SECTORS);
    mkfs(&mut dev, DEMO_SECTORS, 8).expect("format failed");

    let mut vol = Fat32Volume::new(dev);
    vol.mount().expect("mount failed");

    vol.dir_create("/music").unwrap();
    vol.dir_create("/music/ambient").unwrap();

    for path in [
        "/readme.txt",
        "/music/playlist one.m3u",
        "/music/ambient/A really long track name.flac",
    ]
    .iter()
    {
        let mut f = vol.file_create(path).unwrap();
        vol.file_write(&mut f, b"demo contents\n").unwrap();
        vol.file_close(&mut f);
    }

    list(&mut vol, "/", 0);
}

fn list(vol: &mut Fat32Volume<MemDevice>, path: &str, depth: usize) {
    let mut dir = vol.dir_open(path).expect("dir_open failed");

    let mut entries = Vec::new();
    while let Some(entry) = vol.dir_read(&mut dir).expect("dir_read failed") {
        entries.push(entry);
    }

    for entry in entries {
        if entry.name() == "." || entry.name() == ".." {
            continue;
        }

        println!(
            "{:indent$}{}{}  ({} bytes, cluster {})",
            "",
            entry.name(),
            if entry.is_dir() { "/" } else { "" },
            entry.size,
            entry.start_cluster,
            indent = depth * 2
        );

        if entry.is_dir() {
            let sub = if path == "/" {
                format!("/{}", entry.name())
            } else {
                format!("{}/{}", path, entry.name())
            };
            list(vol, &sub, depth + 1);
        }
    }
}
