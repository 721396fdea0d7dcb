//! The error taxonomy for the whole driver.
//!
//! Every fallible operation in the crate reports one of these codes; block
//! device failures are folded into [`Error::ReadFailed`] /
//! [`Error::WriteFailed`] at the point where they cross into the engine.

/// Error codes surfaced by every filesystem operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Error {
    /// No card in the slot (or it was pulled mid-session).
    NoCard,
    /// The block device failed to initialize.
    InitFailed,
    /// Operation attempted before a successful mount.
    NotMounted,

    /// The block device reported a read failure.
    ReadFailed,
    /// The block device reported a write failure.
    WriteFailed,

    /// Bad BPB, wrong FAT flavour, or no usable partition.
    InvalidFormat,

    /// Final path component does not exist.
    FileNotFound,
    /// Path is malformed, too long, or an intermediate component is missing
    /// or is not a directory.
    InvalidPath,
    /// Entry exists but is not a directory.
    NotADirectory,
    /// Entry exists but is not a regular file.
    NotAFile,
    /// Directory does not exist.
    DirNotFound,

    /// File position past the end of the cluster chain.
    InvalidPosition,
    /// Caller-supplied argument out of range (closed handle, cluster < 2, ...).
    InvalidParameter,
    /// Create target already exists.
    FileExists,
    /// Directory still has entries besides `.` and `..`.
    DirNotEmpty,

    /// No free cluster (or no free 8.3 name tail) left.
    DiskFull,
}

/// Shorthand used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Static human-readable description of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Error::NoCard => "No SD card present",
            Error::InitFailed => "SD card initialization failed",
            Error::NotMounted => "File system not mounted",
            Error::ReadFailed => "Read operation failed",
            Error::WriteFailed => "Write operation failed",
            Error::InvalidFormat => "Invalid SD card format",
            Error::FileNotFound => "File not found",
            Error::InvalidPath => "Invalid path",
            Error::NotADirectory => "Not a directory",
            Error::NotAFile => "Not a file",
            Error::DirNotFound => "Directory not found",
            Error::InvalidPosition => "Invalid file position",
            Error::InvalidParameter => "Invalid parameter",
            Error::FileExists => "File already exists",
            Error::DirNotEmpty => "Directory not empty",
            Error::DiskFull => "Disk full",
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        fmt.write_str(self.as_str())
    }
}

using_std! {
    impl std::error::Error for Error { }
}
