// Shows the card-detect arrangement: the volume lives behind the crate's
// Mutex, a background "timer" polls presence, and the foreground keeps
// issuing operations that fail fast while the card is out.

use fat32::fat::format::mkfs;
use fat32::mutex::{Mutex, MutexInterface};
use fat32::storage::MemDevice;
use fat32::Fat32Volume;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

const DEMO_SECTORS: u32 = 1 << 18; // 128 MiB

fn main() {
    let mut dev = MemDevice::new(DEMO_SECTORS);
    mkfs(&mut dev, DEMO_SECTORS, 1).expect("format failed");
    let slot = dev.presence_handle();

    let mut vol = Fat32Volume::new(dev);
    vol.init().expect("init failed");

    let vol: Arc<Mutex<Fat32Volume<MemDevice>>> = Arc::new(MutexInterface::new(vol));

    // The card-detect poll, standing in for the 500ms timer ISR.
    let poller = {
        let vol = Arc::clone(&vol);
        std::thread::spawn(move || {
            for _ in 0..40 {
                vol.cs(|v| v.poll_card_detect());
                std::thread::sleep(Duration::from_millis(25));
            }
        })
    };

    for step in 0..10 {
        if step == 3 {
            println!("-- yanking the card --");
            slot.store(false, Ordering::SeqCst);
        }
        if step == 7 {
            println!("-- reinserting the card --");
            slot.store(true, Ordering::SeqCst);
        }

        let outcome = vol.cs(|v| {
            let path = format!("/step{}.txt", step);
            let mut f = v.file_create(&path)?;
            v.file_write(&mut f, b"tick")?;
            v.file_close(&mut f);
            Ok::<_, fat32::Error>(())
        });

        match outcome {
            Ok(()) => println!("step {}: wrote a file", step),
            Err(e) => println!("step {}: {}", step, e),
        }

        std::thread::sleep(Duration::from_millis(100));
    }

    poller.join().unwrap();
}
