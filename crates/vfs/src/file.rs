//! TEAM_480: File (Open File Handle) Implementation
//!
//! A File is an opened object: a resolved inode, a device, or both, plus the
//! current offset. Reads and writes go to the device when one is attached
//! and to the inode's operations otherwise.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec;

use crate::device::Device;
use crate::error::{VfsError, VfsResult};
use crate::generic::DirentWriter;
use crate::inode::{InodeRef, Stat};

/// TEAM_202: Open file flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenFlags(u32);

impl OpenFlags {
    // Access modes (mutually exclusive)
    pub const O_RDONLY: u32 = 0;
    pub const O_WRONLY: u32 = 1;
    pub const O_RDWR: u32 = 2;
    pub const O_ACCMODE: u32 = 3;

    // File creation flags
    pub const O_CREAT: u32 = 0o100;
    pub const O_EXCL: u32 = 0o200;

    // File status flags
    pub const O_APPEND: u32 = 0o2000;
    pub const O_DIRECTORY: u32 = 0o200000;

    pub const fn new(flags: u32) -> Self {
        Self(flags)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn access_mode(&self) -> u32 {
        self.0 & Self::O_ACCMODE
    }

    pub fn is_readable(&self) -> bool {
        let mode = self.access_mode();
        mode == Self::O_RDONLY || mode == Self::O_RDWR
    }

    pub fn is_writable(&self) -> bool {
        let mode = self.access_mode();
        mode == Self::O_WRONLY || mode == Self::O_RDWR
    }

    pub fn is_create(&self) -> bool {
        self.0 & Self::O_CREAT != 0
    }

    pub fn is_exclusive(&self) -> bool {
        self.0 & Self::O_EXCL != 0
    }

    pub fn is_append(&self) -> bool {
        self.0 & Self::O_APPEND != 0
    }

    pub fn is_directory(&self) -> bool {
        self.0 & Self::O_DIRECTORY != 0
    }
}

/// TEAM_202: Seek origin
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekWhence {
    Set,
    Current,
    End,
}

impl SeekWhence {
    /// From the SEEK_SET / SEEK_CUR / SEEK_END values.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Set),
            1 => Some(Self::Current),
            2 => Some(Self::End),
            _ => None,
        }
    }
}

/// TEAM_480: Open file handle
pub struct File {
    inode: Option<InodeRef>,
    device: Option<Arc<dyn Device>>,
    offset: u64,
    flags: OpenFlags,
}

impl File {
    /// Handle on a resolved inode. The driver's `fill_file` runs afterwards
    /// in `vfs_open`.
    pub fn new(inode: InodeRef, flags: OpenFlags) -> Self {
        Self {
            inode: Some(inode),
            device: None,
            offset: 0,
            flags,
        }
    }

    /// Handle on a bare device, without any inode.
    pub fn for_device(device: Arc<dyn Device>, flags: OpenFlags) -> Self {
        Self {
            inode: None,
            device: Some(device),
            offset: 0,
            flags,
        }
    }

    pub fn inode(&self) -> Option<&InodeRef> {
        self.inode.as_ref()
    }

    pub fn device(&self) -> Option<&Arc<dyn Device>> {
        self.device.as_ref()
    }

    /// Route reads and writes to `device`.
    pub fn attach_device(&mut self, device: Arc<dyn Device>) {
        self.device = Some(device);
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Drivers move the offset as they read, write and list.
    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn advance(&mut self, n: usize) {
        self.offset += n as u64;
    }

    pub fn is_open(&self) -> bool {
        self.inode.is_some() || self.device.is_some()
    }

    fn backing_inode(&self) -> VfsResult<InodeRef> {
        self.inode.clone().ok_or(VfsError::BadHandle)
    }

    /// Drop the inode and device references.
    pub fn close(&mut self) -> VfsResult<()> {
        if !self.is_open() {
            return Err(VfsError::BadHandle);
        }
        self.inode = None;
        self.device = None;
        Ok(())
    }

    /// TEAM_480: Read at the current offset
    ///
    /// On a directory this lists entries, like `readdir`.
    pub fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if !self.flags.is_readable() {
            return Err(VfsError::BadHandle);
        }
        if let Some(device) = self.device.clone() {
            let n = device.read(buf, self.offset)?;
            self.advance(n);
            return Ok(n);
        }
        let inode = self.backing_inode()?;
        if inode.is_dir() {
            return self.readdir(buf);
        }
        inode.ops()?.read(self, buf)
    }

    /// TEAM_480: Write at the current offset, or at the end with O_APPEND
    pub fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        if !self.flags.is_writable() {
            return Err(VfsError::BadHandle);
        }
        if let Some(device) = self.device.clone() {
            let n = device.write(buf, self.offset)?;
            self.advance(n);
            return Ok(n);
        }
        let inode = self.backing_inode()?;
        if inode.is_dir() {
            return Err(VfsError::BadOperation);
        }
        inode.fs()?.check_writable()?;
        if self.flags.is_append() {
            self.offset = inode.size();
        }
        inode.ops()?.write(self, buf)
    }

    /// TEAM_480: Move the offset
    ///
    /// Inode-backed files cannot seek past their size; device files can
    /// seek anywhere.
    pub fn seek(&mut self, offset: i64, whence: SeekWhence) -> VfsResult<u64> {
        if !self.is_open() {
            return Err(VfsError::BadHandle);
        }
        let size = match (&self.inode, &self.device) {
            (Some(inode), None) => Some(inode.size()),
            _ => None,
        };
        let base = match whence {
            SeekWhence::Set => 0,
            SeekWhence::Current => self.offset,
            SeekWhence::End => size.unwrap_or(0),
        };
        let target = base
            .checked_add_signed(offset)
            .ok_or(VfsError::InvalidArgument)?;
        if size.is_some_and(|size| target > size) {
            return Err(VfsError::OutOfRange);
        }
        self.offset = target;
        Ok(target)
    }

    /// TEAM_480: Fill `buf` with directory entries
    ///
    /// Returns the number of bytes used; 0 once the directory is exhausted.
    pub fn readdir(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let inode = self.backing_inode()?;
        if !inode.is_dir() {
            return Err(VfsError::NotADirectory);
        }
        let mut out = DirentWriter::new(buf);
        inode.ops()?.readdir(self, &mut out)?;
        Ok(out.len())
    }

    pub fn stat(&self) -> VfsResult<Stat> {
        Ok(self.backing_inode()?.stat())
    }

    /// TEAM_480: Extend the file to `new_size` bytes with zeroes
    ///
    /// Shrinking is not supported; a smaller size is a no-op.
    pub fn grow(&mut self, new_size: u64) -> VfsResult<()> {
        if !self.flags.is_writable() {
            return Err(VfsError::BadHandle);
        }
        let inode = self.backing_inode()?;
        if inode.is_dir() {
            return Err(VfsError::BadOperation);
        }
        inode.fs()?.check_writable()?;
        let size = inode.size();
        if new_size <= size {
            return Ok(());
        }
        let saved = self.offset;
        self.offset = size;
        let zeroes = vec![0u8; 512];
        let mut left = new_size - size;
        let result = loop {
            if left == 0 {
                break Ok(());
            }
            let chunk = left.min(zeroes.len() as u64) as usize;
            match inode.ops().and_then(|ops| ops.write(self, &zeroes[..chunk])) {
                Ok(0) => break Err(VfsError::Io),
                Ok(n) => left -= n as u64,
                Err(e) => break Err(e),
            }
        };
        self.offset = saved;
        result
    }
}

impl core::fmt::Debug for File {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("File")
            .field("inode", &self.inode.as_ref().map(|i| *i.fsop()))
            .field("device", &self.device.as_ref().map(|d| alloc::string::String::from(d.name())))
            .field("offset", &self.offset)
            .field("flags", &self.flags)
            .finish()
    }
}
