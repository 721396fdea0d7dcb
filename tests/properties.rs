//! Whole-volume invariants checked against the raw image after a workload:
//! FAT conservation, chain exclusivity, and the LFN checksum law.

mod common;

use common::{fresh_volume, pattern, RawGeometry};
use fat32::storage::MemDevice;
use fat32::Fat32Volume;

use std::collections::HashSet;

/// Runs a mixed workload and returns the volume for inspection.
fn workload() -> Fat32Volume<MemDevice> {
    let mut vol = fresh_volume();

    vol.dir_create("/docs").unwrap();
    vol.dir_create("/docs/archive").unwrap();

    for (path, len) in [
        ("/docs/readme first.txt", 100usize),
        ("/docs/archive/old data.bin", 9 * 1024),
        ("/plain.txt", 2000),
        ("/A really long name.dat", 5000),
    ]
    .iter()
    {
        let mut f = vol.file_create(path).unwrap();
        vol.file_write(&mut f, &pattern(*len)).unwrap();
        vol.file_close(&mut f);
    }

    // Churn: delete one file, rewrite another.
    vol.file_delete("/plain.txt").unwrap();
    let mut f = vol.file_open("/docs/readme first.txt").unwrap();
    vol.file_seek(&mut f, 50).unwrap();
    vol.file_write(&mut f, &pattern(300)).unwrap();
    vol.file_close(&mut f);

    vol
}

/// Every directory reachable from the root, visited depth-first; returns
/// (start_cluster, size, is_dir) of every live entry.
fn collect_entries(vol: &mut Fat32Volume<MemDevice>) -> Vec<(u32, u32, bool)> {
    let mut out = Vec::new();
    let mut stack = vec![String::from("/")];

    while let Some(dir_path) = stack.pop() {
        let mut dir = vol.dir_open(&dir_path).unwrap();
        while let Some(entry) = vol.dir_read(&mut dir).unwrap() {
            if entry.name() == "." || entry.name() == ".." {
                continue;
            }
            out.push((entry.start_cluster, entry.size, entry.is_dir()));
            if entry.is_dir() {
                let mut sub = dir_path.clone();
                if !sub.ends_with('/') {
                    sub.push('/');
                }
                sub.push_str(entry.name());
                stack.push(sub);
            }
        }
    }

    out
}

#[test]
fn fat_conservation() {
    let mut vol = workload();
    let entries = collect_entries(&mut vol);

    let image = vol.device().as_bytes();
    let geo = RawGeometry::parse(image);
    let bytes_per_cluster = geo.sectors_per_cluster * 512;

    // Gather every reachable chain: the root directory plus every entry.
    let mut seen: HashSet<u32> = HashSet::new();
    let mut reachable = 0u32;

    let claim_chain = |start: u32, seen: &mut HashSet<u32>| -> u32 {
        let chain = geo.chain(image, start);
        for cluster in chain.iter() {
            assert!(
                seen.insert(*cluster),
                "cluster {} appears in two chains",
                cluster
            );
            assert!(*cluster >= 2 && *cluster < geo.cluster_count + 2);
        }
        chain.len() as u32
    };

    reachable += claim_chain(geo.root_cluster, &mut seen);
    for (start, size, _is_dir) in entries.iter() {
        if *start < 2 {
            continue;
        }
        let len = claim_chain(*start, &mut seen);
        reachable += len;

        // A file's chain must cover its recorded size.
        assert!(
            len * bytes_per_cluster >= *size,
            "chain of {} clusters can't hold {} bytes",
            len,
            size
        );
    }

    // Free + reachable accounts for every cluster; nothing leaked.
    let mut free = 0u32;
    for cluster in 2..geo.cluster_count + 2 {
        if geo.fat_entry(image, cluster) == 0 {
            free += 1;
        }
    }

    assert_eq!(
        free + reachable,
        geo.cluster_count,
        "clusters leaked: {} free + {} reachable != {}",
        free,
        reachable,
        geo.cluster_count
    );
}

#[test]
fn chains_are_acyclic() {
    let mut vol = workload();
    let entries = collect_entries(&mut vol);

    let image = vol.device().as_bytes();
    let geo = RawGeometry::parse(image);

    for (start, _, _) in entries.iter().filter(|(s, _, _)| *s >= 2) {
        let chain = geo.chain(image, *start);
        let unique: HashSet<u32> = chain.iter().copied().collect();
        assert_eq!(chain.len(), unique.len(), "cycle in chain from {}", start);
    }
}

#[test]
fn lfn_checksum_law() {
    let mut vol = workload();

    let image = vol.device().as_bytes();
    let geo = RawGeometry::parse(image);

    let checksum = |short: &[u8]| -> u8 {
        short
            .iter()
            .fold(0u8, |sum, b| (sum >> 1 | sum << 7).wrapping_add(*b))
    };

    // Walk every directory cluster chain reachable from the root and check
    // each live 8.3 entry against the LFN slots stacked before it.
    let mut dir_starts = vec![geo.root_cluster];
    {
        let entries = collect_entries(&mut vol);
        dir_starts.extend(
            entries
                .iter()
                .filter(|(s, _, d)| *d && *s >= 2)
                .map(|(s, _, _)| *s),
        );
    }

    let image = vol.device().as_bytes();
    let mut checked = 0;

    for dir_start in dir_starts {
        // Flatten the directory stream.
        let mut stream = Vec::new();
        for cluster in geo.chain(image, dir_start) {
            let base = geo.cluster_offset(cluster);
            let len = geo.sectors_per_cluster as usize * 512;
            stream.extend_from_slice(&image[base..base + len]);
        }

        let mut pending_lfn: Vec<(u8, u8)> = Vec::new(); // (seq, checksum)
        for slot in stream.chunks_exact(32) {
            let first = slot[0];
            let attr = slot[11];

            if first == 0x00 {
                break;
            }
            if first == 0xE5 {
                pending_lfn.clear();
                continue;
            }
            if attr == 0x0F {
                pending_lfn.push((slot[0], slot[13]));
                continue;
            }

            if !pending_lfn.is_empty() {
                let expect = checksum(&slot[..11]);
                for (seq, sum) in pending_lfn.iter() {
                    assert_eq!(
                        *sum, expect,
                        "LFN slot seq {:#04x} carries the wrong checksum",
                        seq
                    );
                }
                checked += 1;
            }
            pending_lfn.clear();
        }
    }

    // The workload definitely produced LFN-paired entries.
    assert!(checked >= 4, "only {} checksum-bound entries found", checked);
}
