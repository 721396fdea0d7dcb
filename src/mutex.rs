//! A common Mutex interface.
//!
//! The engine itself is single-threaded; this exists so that an application
//! can wrap the whole [`Fat32Volume`](crate::Fat32Volume) façade in one lock
//! and share it with a periodic card-detect poll (typically a timer ISR on
//! embedded targets, a thread on a host).
//!
//! Nothing here implements poisoning! If you panic while having locked one of
//! these mutexes, no guarantees about what happens next!

/// The one locking primitive the crate knows about.
pub trait MutexInterface<T>: Sync {
    fn new(inner: T) -> Self;

    // Run a function in a critical section:
    fn cs<F: FnOnce(&mut T) -> R, R>(&self, func: F) -> R;

    // Get mutable access to the inner data *using a mutable reference*.
    // Since Rust can statically prove that we have exclusive access in this
    // case, no locking occurs.
    fn get_mut(&mut self) -> &mut T;
}

using_std! {
    pub mod from_std {
        use super::MutexInterface;

        pub use std::sync::Mutex;

        impl<T: Send> MutexInterface<T> for Mutex<T> {
            fn new(inner: T) -> Self {
                Mutex::new(inner)
            }

            #[inline]
            fn cs<F: FnOnce(&mut T) -> R, R>(&self, func: F) -> R {
                // We don't poison, so a poisoned lock just hands out the data.
                let mut inner = match self.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };

                func(&mut *inner)
            }

            #[inline]
            fn get_mut(&mut self) -> &mut T {
                match self.get_mut() {
                    Ok(inner) => inner,
                    Err(poisoned) => poisoned.into_inner(),
                }
            }
        }
    }
}

// On single-core Cortex-M parts (the actual SD-card targets) the critical
// section is "interrupts off": the card-detect timer ISR can never observe
// the volume mid-operation. Rather than hand-rolling the interior
// mutability, this composes the pieces the ecosystem already vets:
// `bare_metal::Mutex` pins access to a critical section, and the `RefCell`
// inside it upgrades the shared borrow to the mutable one the volume needs.
// The `RefCell` can't actually be contended — its borrow never escapes
// `interrupt::free` — so `borrow_mut` amounts to a flag check.
#[cfg(all(target_arch = "arm", not(feature = "std")))]
pub mod interrupt_free {
    use super::MutexInterface;

    use core::borrow::BorrowMut;
    use core::cell::RefCell;

    use cortex_m::interrupt;

    pub struct Mutex<T> {
        inner: bare_metal::Mutex<RefCell<T>>,
    }

    impl<T: Send> MutexInterface<T> for Mutex<T> {
        fn new(inner: T) -> Self {
            Self {
                inner: bare_metal::Mutex::new(RefCell::new(inner)),
            }
        }

        #[inline]
        fn cs<F: FnOnce(&mut T) -> R, R>(&self, func: F) -> R {
            interrupt::free(|cs| func(&mut *self.inner.borrow(cs).borrow_mut()))
        }

        #[inline]
        fn get_mut(&mut self) -> &mut T {
            // `&mut self` already proves exclusivity; neither layer locks.
            self.inner.borrow_mut().get_mut()
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        pub use from_std::Mutex;
    } else if #[cfg(target_arch = "arm")] {
        pub use interrupt_free::Mutex;
    } else {
        compile_error!("Please enable the `std` feature or provide a Mutex \
            implementation for your target.");
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    use crate::fat::format::mkfs;
    use crate::storage::MemDevice;
    use crate::Fat32Volume;

    use std::cell::{Cell, RefCell};

    #[test]
    fn critical_section_runs() {
        let m: Mutex<u32> = MutexInterface::new(3);

        let out = m.cs(|v| {
            *v += 4;
            *v
        });

        assert_eq!(out, 7);
        assert_eq!(m.cs(|v| *v), 7);
    }

    #[test]
    fn get_mut_without_locking() {
        let mut m: Mutex<u32> = MutexInterface::new(1);
        *MutexInterface::get_mut(&mut m) = 9;
        assert_eq!(m.cs(|v| *v), 9);
    }

    /// Stand-in for the interrupt-masked flavor: same RefCell-in-a-lock
    /// shape, with the "interrupts disabled" state reduced to a flag we can
    /// assert on. Lets the host tests drive the exact locking discipline the
    /// Cortex-M build relies on.
    struct MaskedMutex<T> {
        masked: Cell<bool>,
        inner: RefCell<T>,
    }

    // Single "core": these tests never move it across threads; the flag
    // plays the role the hardware interrupt mask plays on the real target.
    unsafe impl<T> Sync for MaskedMutex<T> where T: Send {}

    impl<T: Send> MutexInterface<T> for MaskedMutex<T> {
        fn new(inner: T) -> Self {
            Self {
                masked: Cell::new(false),
                inner: RefCell::new(inner),
            }
        }

        fn cs<F: FnOnce(&mut T) -> R, R>(&self, func: F) -> R {
            assert!(!self.masked.get(), "critical sections must not nest");
            self.masked.set(true);

            let out = func(&mut *self.inner.borrow_mut());

            self.masked.set(false);
            out
        }

        fn get_mut(&mut self) -> &mut T {
            self.inner.get_mut()
        }
    }

    /// The card-detect-poll story from the module docs, end to end: the
    /// volume lives behind one lock, a simulated timer ISR polls presence
    /// through it, and foreground operations observe the unmount.
    #[test]
    fn card_detect_poll_through_one_lock() {
        const SECTORS: u32 = 1 << 17;

        let mut dev = MemDevice::new(SECTORS);
        mkfs(&mut dev, SECTORS, 1).unwrap();
        let slot = dev.presence_handle();

        let vol: MaskedMutex<Fat32Volume<MemDevice>> =
            MutexInterface::new(Fat32Volume::new(dev));

        // "ISR": one timer tick.
        let tick = |vol: &MaskedMutex<Fat32Volume<MemDevice>>| {
            vol.cs(|v| v.poll_card_detect());
        };

        // Foreground: mount and write a file.
        vol.cs(|v| {
            assert!(v.is_ready());
            let mut f = v.file_create("/tick.log").unwrap();
            v.file_write(&mut f, b"armed").unwrap();
            v.file_close(&mut f);
        });

        // Card leaves between foreground operations; the next tick drops
        // the mount and the foreground fails fast.
        slot.store(false, std::sync::atomic::Ordering::SeqCst);
        tick(&vol);
        vol.cs(|v| {
            assert!(!v.is_mounted());
            assert_eq!(v.file_open("/tick.log").unwrap_err(), crate::Error::NoCard);
        });

        // Card returns; a later tick is a no-op and the foreground remounts.
        slot.store(true, std::sync::atomic::Ordering::SeqCst);
        tick(&vol);
        vol.cs(|v| {
            let mut f = v.file_open("/tick.log").unwrap();
            let mut buf = [0u8; 8];
            let n = v.file_read(&mut f, &mut buf).unwrap();
            assert_eq!(&buf[..n], b"armed");
        });
    }
}
