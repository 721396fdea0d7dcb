//! A read benchmark that tries to measure sequential file read speed.

extern crate criterion;

use criterion::{
    criterion_group, criterion_main, AxisScale, BenchmarkId, Criterion, PlotConfiguration,
    Throughput,
};

use fat32::fat::format::mkfs;
use fat32::storage::MemDevice;
use fat32::Fat32Volume;

// 264 MiB with 4 KiB clusters (above the FAT32 cluster-count floor).
const VOLUME_SECTORS: u32 = 540_672;

const FILES: &[(&'static str, usize)] = &[
    ("/1k", 1 << 10),
    ("/100k", 100 << 10),
    ("/5M", 5 << 20),
];

fn prepared_volume() -> Fat32Volume<MemDevice> {
    let mut dev = MemDevice::new(VOLUME_SECTORS);
    mkfs(&mut dev, VOLUME_SECTORS, 8).unwrap();

    let mut vol = Fat32Volume::new(dev);
    vol.mount().unwrap();

    for (path, len) in FILES {
        let payload: Vec<u8> = (0..*len).map(|i| (i % 251) as u8).collect();
        let mut f = vol.file_create(path).unwrap();
        assert_eq!(vol.file_write(&mut f, &payload).unwrap(), *len);
        vol.file_close(&mut f);
    }

    vol
}

fn bench_read_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("read speed");

    let plot_config = PlotConfiguration::default().summary_scale(AxisScale::Logarithmic);
    group.plot_config(plot_config);

    let mut vol = prepared_volume();

    for (path, len) in FILES {
        group.throughput(Throughput::Bytes(*len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(path), len, |b, len| {
            let mut buf = vec![0u8; *len];
            b.iter(|| {
                let mut f = vol.file_open(path).unwrap();
                assert_eq!(vol.file_read(&mut f, &mut buf).unwrap(), buf.len());
                vol.file_close(&mut f);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_read_speed);
criterion_main!(benches);
