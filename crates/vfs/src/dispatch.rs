//! TEAM_202: VFS Dispatch Layer
//!
//! High-level VFS operations that syscalls can call directly.
//! These handle path resolution and dispatch to the appropriate
//! filesystem or device.

extern crate alloc;

use crate::context::Vfs;
use crate::error::{VfsError, VfsResult};
use crate::file::{File, OpenFlags, SeekWhence};
use crate::inode::{InodeRef, Stat};
use crate::mode;
use crate::path;

/// TEAM_202: Open a file by path
///
/// Relative paths start at `cwd`. With O_CREAT a missing final component
/// is created as a regular file with the permission bits of `create_mode`.
pub fn vfs_open(
    vfs: &Vfs,
    cwd: Option<&InodeRef>,
    path: &str,
    flags: OpenFlags,
    create_mode: u32,
) -> VfsResult<File> {
    let inode = match path::vfs_lookup(vfs, cwd, path) {
        Ok(_) if flags.is_create() && flags.is_exclusive() => {
            return Err(VfsError::AlreadyExists);
        }
        Ok(inode) => inode,
        Err(VfsError::NotFound) if flags.is_create() => {
            match vfs_create_file(vfs, cwd, path, create_mode) {
                Ok(inode) => inode,
                // Someone else created it first
                Err(VfsError::AlreadyExists) if !flags.is_exclusive() => {
                    path::vfs_lookup(vfs, cwd, path)?
                }
                Err(e) => return Err(e),
            }
        }
        Err(e) => return Err(e),
    };

    // Check O_DIRECTORY
    if flags.is_directory() && !inode.is_dir() {
        return Err(VfsError::NotADirectory);
    }
    if flags.is_writable() {
        if inode.is_dir() {
            return Err(VfsError::BadOperation);
        }
        inode.fs()?.check_writable()?;
    }

    let ops = inode.ops()?;
    let mut file = File::new(inode.clone(), flags);
    ops.fill_file(&inode, &mut file);
    Ok(file)
}

/// TEAM_480: Create a regular file
pub fn vfs_create_file(
    vfs: &Vfs,
    cwd: Option<&InodeRef>,
    path: &str,
    create_mode: u32,
) -> VfsResult<InodeRef> {
    path::vfs_create(vfs, cwd, path, mode::with_type(mode::S_IFREG, create_mode))
}

/// TEAM_480: Create a directory
pub fn vfs_mkdir(vfs: &Vfs, cwd: Option<&InodeRef>, path: &str, create_mode: u32) -> VfsResult<InodeRef> {
    path::vfs_create(vfs, cwd, path, mode::with_type(mode::S_IFDIR, create_mode))
}

pub fn vfs_close(file: &mut File) -> VfsResult<()> {
    file.close()
}

/// TEAM_202: Read from a file
pub fn vfs_read(file: &mut File, buf: &mut [u8]) -> VfsResult<usize> {
    file.read(buf)
}

/// TEAM_202: Write to a file
pub fn vfs_write(file: &mut File, buf: &[u8]) -> VfsResult<usize> {
    file.write(buf)
}

pub fn vfs_seek(file: &mut File, offset: i64, whence: SeekWhence) -> VfsResult<u64> {
    file.seek(offset, whence)
}

/// TEAM_202: Read directory entries
pub fn vfs_readdir(file: &mut File, buf: &mut [u8]) -> VfsResult<usize> {
    file.readdir(buf)
}

/// TEAM_202: Get file status from an open file
pub fn vfs_stat(file: &File) -> VfsResult<Stat> {
    file.stat()
}

pub fn vfs_grow(file: &mut File, new_size: u64) -> VfsResult<()> {
    file.grow(new_size)
}
