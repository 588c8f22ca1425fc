//! TEAM_480: VFS Error Types
//!
//! One error type for every VFS operation. Each variant maps to the POSIX
//! errno the syscall layer reports for it.

use los_error::define_kernel_error;

use crate::device::BlockError;

define_kernel_error! {
    /// TEAM_480: VFS error codes, range 0x08xx.
    pub enum VfsError(0x08) {
        /// Path component or object identifier does not exist
        NotFound = 0x01, ENOENT => "No such file or directory",
        /// Tried to descend through something that is not a directory
        NotADirectory = 0x02, ENOTDIR => "Not a directory",
        /// Create on a name that already exists
        AlreadyExists = 0x03, EEXIST => "File exists",
        /// Operation not supported by this inode or device
        BadOperation = 0x04, ENOSYS => "Operation not supported",
        /// A bounded table has no free slot
        OutOfHandles = 0x05, ENFILE => "Out of handles",
        /// Block I/O failed or the filesystem was abandoned
        Io = 0x06, EIO => "I/O error",
        /// Device missing or rejected at mount time
        NoDevice = 0x07, ENODEV => "No such device",
        InvalidArgument = 0x08, EINVAL => "Invalid argument",
        NameTooLong = 0x09, ENAMETOOLONG => "File name too long",
        /// Seek beyond the end of an inode-backed file
        OutOfRange = 0x0A, EINVAL => "Offset out of range",
        /// File handle is closed or has nothing behind it
        BadHandle = 0x0B, EBADF => "Bad file handle",
        UnknownFilesystem = 0x0C, ENODEV => "Unknown filesystem type",
        Busy = 0x0D, EBUSY => "Resource busy",
        ReadOnly = 0x0E, EROFS => "Read-only filesystem",
        CrossDevice = 0x0F, EXDEV => "Cross-device operation",
        /// Block collaborator failure
        Block(BlockError) = 0x10, EIO => "Block I/O failed",
    }
}

impl From<BlockError> for VfsError {
    fn from(e: BlockError) -> Self {
        VfsError::Block(e)
    }
}

/// TEAM_480: Result type for VFS operations
pub type VfsResult<T> = Result<T, VfsError>;
