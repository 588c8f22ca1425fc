//! TEAM_480: VFS Operation Traits
//!
//! Two traits make up the contract between the VFS and a filesystem driver.
//!
//! - [`FilesystemOps`]: per filesystem type. Mounting and inode lifecycle.
//! - [`InodeOps`]: per inode. Directory and file operations.
//!
//! Not all operations need to be implemented. Defaults return
//! `VfsError::BadOperation` or do nothing.

extern crate alloc;

use crate::error::{VfsError, VfsResult};
use crate::file::File;
use crate::generic::DirentWriter;
use crate::inode::{Fsop, Inode, InodeRef};
use crate::mount::MountedFs;

/// TEAM_480: Filesystem type operations
pub trait FilesystemOps: Send + Sync {
    /// Bring up a freshly claimed mount and return its root directory.
    ///
    /// The root comes from `fs.get_inode()`, so it arrives holding one count
    /// for the caller and one for the inode cache.
    fn mount(&self, fs: &MountedFs) -> VfsResult<InodeRef>;

    /// Last call before the mount slot is freed; every inode is gone.
    fn unmount(&self, _fs: &MountedFs) -> VfsResult<()> {
        Ok(())
    }

    /// Allocate driver-private data for a new inode.
    fn prepare_inode(&self, _inode: &Inode) -> VfsResult<()> {
        Ok(())
    }

    /// Free driver-private data; called exactly once per inode.
    fn discard_inode(&self, _inode: &Inode) {}

    /// Fill metadata and operations for the object named by `fsop`.
    fn read_inode(&self, inode: &Inode, fsop: &Fsop) -> VfsResult<()>;

    /// Persist dirty metadata.
    fn write_inode(&self, _inode: &Inode) -> VfsResult<()> {
        Ok(())
    }
}

/// TEAM_480: Inode Operations Trait
pub trait InodeOps: Send + Sync {
    // ========================================================================
    // Directory Operations
    // ========================================================================

    /// Resolve `name` inside `dir`; `NotFound` if absent.
    fn lookup(&self, _dir: &InodeRef, _name: &str) -> VfsResult<InodeRef> {
        Err(VfsError::BadOperation)
    }

    /// Emit directory entries starting at the file offset, advancing it.
    fn readdir(&self, _file: &mut File, _out: &mut DirentWriter<'_>) -> VfsResult<()> {
        Err(VfsError::BadOperation)
    }

    fn create(&self, _dir: &InodeRef, _name: &str, _mode: u32) -> VfsResult<InodeRef> {
        Err(VfsError::BadOperation)
    }

    fn unlink(&self, _dir: &InodeRef, _name: &str, _target: &InodeRef) -> VfsResult<()> {
        Err(VfsError::BadOperation)
    }

    fn rename(
        &self,
        _old_dir: &InodeRef,
        _old_name: &str,
        _new_dir: &InodeRef,
        _new_name: &str,
    ) -> VfsResult<()> {
        Err(VfsError::BadOperation)
    }

    // ========================================================================
    // File Operations
    // ========================================================================

    /// Read at the file offset, advancing it.
    fn read(&self, _file: &mut File, _buf: &mut [u8]) -> VfsResult<usize> {
        Err(VfsError::BadOperation)
    }

    /// Write at the file offset, advancing it.
    fn write(&self, _file: &mut File, _buf: &[u8]) -> VfsResult<usize> {
        Err(VfsError::BadOperation)
    }

    /// Map a file block to a device block, allocating when `create` is set.
    fn block_map(&self, _inode: &Inode, _logical: u64, _create: bool) -> VfsResult<u64> {
        Err(VfsError::BadOperation)
    }

    /// Adjust a freshly opened file, e.g. attach a device.
    fn fill_file(&self, _inode: &InodeRef, _file: &mut File) {}
}
