
use core::fmt::Debug;

use generic_array::GenericArray;
use typenum::consts::U512;

/// One 512-byte sector, the unit of every transfer in this crate.
pub type Sector = GenericArray<u8, U512>;

/// Sector size in bytes. The driver only supports 512-byte sectors.
pub const SECTOR_SIZE: usize = 512;

/// Implementors of this trait provide access to a sector-based storage
/// medium, addressed by absolute LBA.
///
/// The filesystem engine layers volume-relative addressing on top of this;
/// implementations deal in raw device blocks only.
pub trait BlockDevice {
    type Error: Debug;

    /// Prepares the device for use (e.g. the SD card init sequence).
    ///
    /// Called on every mount; implementations for media that need no setup
    /// can simply return `Ok(())`.
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Whether the medium is currently present in the slot.
    ///
    /// Fixed (non-removable) media should return `true` unconditionally.
    fn present(&mut self) -> bool;

    /// Reads the 512-byte block at `lba`.
    ///
    /// This function should never panic but can return errors for the
    /// appropriate cases (i.e. out of range).
    fn read_block(&mut self, lba: u32, buf: &mut Sector) -> Result<(), Self::Error>;

    /// Writes the 512-byte block at `lba`. Note that this function takes a
    /// block index rather than a byte offset.
    fn write_block(&mut self, lba: u32, buf: &Sector) -> Result<(), Self::Error>;
}

using_std! {
    use std::fs::{File, OpenOptions};
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// A [`BlockDevice`] backed by a plain file (a filesystem image or a raw
    /// device node such as `/dev/mmcblk0`).
    pub struct FileBackedDevice {
        file: File,
        sectors: u32,
    }

    impl FileBackedDevice {
        /// Opens an existing image; its size determines the sector count.
        pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            let sectors = (file.metadata()?.len() / SECTOR_SIZE as u64) as u32;

            Ok(Self { file, sectors })
        }

        /// Opens a path whose reported length is not meaningful (raw devices)
        /// with an explicitly given size.
        pub fn open_with_size<P: AsRef<Path>>(path: P, sectors: u32) -> std::io::Result<Self> {
            let file = OpenOptions::new().read(true).write(true).open(path)?;

            Ok(Self { file, sectors })
        }

        /// Creates (or truncates) an image file of `sectors` zeroed sectors.
        pub fn create<P: AsRef<Path>>(path: P, sectors: u32) -> std::io::Result<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            file.set_len(sectors as u64 * SECTOR_SIZE as u64)?;

            Ok(Self { file, sectors })
        }

        pub fn sector_count(&self) -> u32 {
            self.sectors
        }
    }

    impl BlockDevice for FileBackedDevice {
        type Error = std::io::Error;

        fn init(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn present(&mut self) -> bool {
            true
        }

        fn read_block(&mut self, lba: u32, buf: &mut Sector) -> Result<(), Self::Error> {
            self.file.seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64))?;
            self.file.read_exact(buf.as_mut_slice())
        }

        fn write_block(&mut self, lba: u32, buf: &Sector) -> Result<(), Self::Error> {
            self.file.seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64))?;
            self.file.write_all(buf.as_slice())
        }
    }

    /// RAM-backed [`BlockDevice`] used by the tests, demos, and benches.
    ///
    /// The presence flag is shared so that a test can yank the "card" while
    /// the volume owns the device, which is how the hotplug path gets
    /// exercised on a host.
    pub struct MemDevice {
        data: Vec<u8>,
        present: Arc<AtomicBool>,
    }

    /// Error type for [`MemDevice`] accesses.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MemDeviceError {
        /// The requested block falls outside of the medium.
        OutOfRange { requested_lba: u32 },
        /// The simulated card is not in the slot.
        NotPresent,
    }

    impl MemDevice {
        pub fn new(sectors: u32) -> Self {
            Self {
                data: vec![0; sectors as usize * SECTOR_SIZE],
                present: Arc::new(AtomicBool::new(true)),
            }
        }

        /// Handle through which a holder can insert/remove the simulated card.
        pub fn presence_handle(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.present)
        }

        pub fn sector_count(&self) -> u32 {
            (self.data.len() / SECTOR_SIZE) as u32
        }

        /// Raw contents, for tests that assert on the on-disk byte layout.
        pub fn as_bytes(&self) -> &[u8] {
            &self.data
        }

        fn range(&self, lba: u32) -> Result<std::ops::Range<usize>, MemDeviceError> {
            let start = lba as usize * SECTOR_SIZE;
            if start + SECTOR_SIZE > self.data.len() {
                return Err(MemDeviceError::OutOfRange { requested_lba: lba });
            }
            Ok(start..start + SECTOR_SIZE)
        }
    }

    impl BlockDevice for MemDevice {
        type Error = MemDeviceError;

        fn init(&mut self) -> Result<(), Self::Error> {
            if self.present() { Ok(()) } else { Err(MemDeviceError::NotPresent) }
        }

        fn present(&mut self) -> bool {
            self.present.load(Ordering::SeqCst)
        }

        fn read_block(&mut self, lba: u32, buf: &mut Sector) -> Result<(), Self::Error> {
            if !self.present() {
                return Err(MemDeviceError::NotPresent);
            }
            let range = self.range(lba)?;
            buf.as_mut_slice().copy_from_slice(&self.data[range]);
            Ok(())
        }

        fn write_block(&mut self, lba: u32, buf: &Sector) -> Result<(), Self::Error> {
            if !self.present() {
                return Err(MemDeviceError::NotPresent);
            }
            let range = self.range(lba)?;
            self.data[range].copy_from_slice(buf.as_slice());
            Ok(())
        }
    }
}
