//! TEAM_480: Devices and the block I/O collaborator
//!
//! The VFS does not drive hardware. It talks to devices through [`Device`]:
//! byte-stream reads/writes for device-backed files, and whole-block reads
//! and writes for filesystems mounted on a block device.

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use los_error::define_kernel_error;
use los_utils::RwLock;

use crate::error::{VfsError, VfsResult};

define_kernel_error! {
    /// TEAM_150: Block device error type with error codes.
    /// Error codes in range 0x06xx (Block subsystem).
    pub enum BlockError(0x06) {
        /// Device cannot do block I/O
        NotSupported = 0x01, ENOTBLK => "Not a block device",
        /// Read operation failed
        ReadFailed = 0x02, EIO => "Block read failed",
        /// Write operation failed
        WriteFailed = 0x03, EIO => "Block write failed",
        /// Block number past the end of the device
        OutOfRange = 0x04, EINVAL => "Block number out of range",
        /// Buffer length is not the block size
        BadBufferSize = 0x05, EINVAL => "Invalid buffer size",
    }
}

/// TEAM_480: Character or block device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Char,
    Block,
}

/// TEAM_480: A device as seen by the VFS
///
/// Byte-stream operations default to `BadOperation`, block operations to
/// `BlockError::NotSupported`.
pub trait Device: Send + Sync {
    /// Unique name, e.g. "ram0" or "console"
    fn name(&self) -> &str;

    fn kind(&self) -> DeviceKind;

    fn read(&self, _buf: &mut [u8], _offset: u64) -> VfsResult<usize> {
        Err(VfsError::BadOperation)
    }

    fn write(&self, _buf: &[u8], _offset: u64) -> VfsResult<usize> {
        Err(VfsError::BadOperation)
    }

    /// Fill `buf` (exactly one block) with block `block`.
    fn read_block(&self, _block: u64, _buf: &mut [u8]) -> Result<(), BlockError> {
        Err(BlockError::NotSupported)
    }

    fn write_block(&self, _block: u64, _buf: &[u8]) -> Result<(), BlockError> {
        Err(BlockError::NotSupported)
    }
}

/// TEAM_480: One block's worth of data read from a device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Buffer {
    block: u64,
    data: Vec<u8>,
}

impl Buffer {
    pub fn block(&self) -> u64 {
        self.block
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// TEAM_480: Synchronous block read; may sleep inside the device
pub fn read_block(device: &dyn Device, block: u64, size: usize) -> Result<Buffer, BlockError> {
    let mut data = vec![0u8; size];
    device.read_block(block, &mut data)?;
    Ok(Buffer { block, data })
}

/// TEAM_480: Zero-filled buffer for a block about to be overwritten
pub fn blank_block(block: u64, size: usize) -> Buffer {
    Buffer {
        block,
        data: vec![0u8; size],
    }
}

pub fn write_block(device: &dyn Device, buf: &Buffer) -> Result<(), BlockError> {
    device.write_block(buf.block, &buf.data)
}

/// TEAM_480: Registered devices, in registration order
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<Vec<Arc<dyn Device>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, device: Arc<dyn Device>) -> VfsResult<()> {
        let mut devices = self.devices.write();
        if devices.iter().any(|d| d.name() == device.name()) {
            return Err(VfsError::AlreadyExists);
        }
        log::debug!("[VFS] device registered: {}", device.name());
        devices.push(device);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> VfsResult<Arc<dyn Device>> {
        let mut devices = self.devices.write();
        let pos = devices
            .iter()
            .position(|d| d.name() == name)
            .ok_or(VfsError::NoDevice)?;
        Ok(devices.remove(pos))
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Device>> {
        self.devices.read().iter().find(|d| d.name() == name).cloned()
    }

    /// Snapshot of every device.
    pub fn devices(&self) -> Vec<Arc<dyn Device>> {
        self.devices.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.devices
            .read()
            .iter()
            .map(|d| String::from(d.name()))
            .collect()
    }
}
