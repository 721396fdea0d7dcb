
// Mark the crate as no_std unless the `std` feature is enabled (it is by
// default; it brings in the host-side block devices and the std mutex).
#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]

#[allow(unused_extern_crates)]
extern crate core; // makes rls actually look into the standard library (hack)

macro_rules! using_std { ($($i:item)*) => ($(#[cfg(feature = "std")]$i)*) }

pub mod error;
pub mod storage;
pub mod mutex;
pub mod mbr;
pub mod fat;

pub use error::{Error, Result};
pub use storage::{BlockDevice, Sector, SECTOR_SIZE};

pub use fat::{Fat32Volume, MAX_FILENAME_LEN, MAX_PATH_LEN};
pub use fat::dir::{Attribute, AttributeSet, DirHandle, Entry};
pub use fat::file::FileHandle;
