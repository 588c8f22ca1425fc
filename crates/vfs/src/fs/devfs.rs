//! TEAM_480: Device Filesystem
//!
//! A flat directory with one node per registered device, in registration
//! order. Opening a node attaches the device to the file, so reads and
//! writes go straight to the driver.
//!
//! Object identifiers are little-endian `u32`s: 1 is the root directory and
//! `2 + i` is the device at index `i` of the registry.

extern crate alloc;

use alloc::sync::Arc;

use crate::device::DeviceKind;
use crate::error::{VfsError, VfsResult};
use crate::file::File;
use crate::generic::{self, DirentWriter};
use crate::inode::{Fsop, Inode, InodeRef, Stat};
use crate::mode;
use crate::mount::MountedFs;
use crate::ops::{FilesystemOps, InodeOps};

/// Name to register the driver under.
pub const FSTYPE: &str = "devfs";

const ROOT_FSOP: u32 = 1;
const FIRST_DEVICE_FSOP: u32 = 2;

/// TEAM_480: The devfs driver
#[derive(Debug, Default)]
pub struct DevFs;

impl DevFs {
    pub fn new() -> Self {
        Self
    }
}

/// TEAM_480: Registry index of the device behind a devfs object
fn device_index(fsop: &Fsop) -> VfsResult<usize> {
    match fsop.as_u32() {
        Some(n) if n >= FIRST_DEVICE_FSOP => Ok((n - FIRST_DEVICE_FSOP) as usize),
        _ => Err(VfsError::InvalidArgument),
    }
}

impl FilesystemOps for DevFs {
    fn mount(&self, fs: &MountedFs) -> VfsResult<InodeRef> {
        fs.set_fsop_size(4);
        fs.get_inode(&Fsop::from_u32(ROOT_FSOP))
    }

    fn read_inode(&self, inode: &Inode, fsop: &Fsop) -> VfsResult<()> {
        let fs = inode.fs()?;
        if fsop.as_u32() == Some(ROOT_FSOP) {
            inode.set_stat(Stat {
                ino: u64::from(ROOT_FSOP),
                mode: mode::S_IFDIR | 0o755,
                nlink: 2,
                ..Stat::default()
            });
            inode.set_ops(Arc::new(DevfsDirOps));
            return Ok(());
        }

        let index = device_index(fsop)?;
        let devices = fs.devices().devices();
        let device = devices.get(index).ok_or(VfsError::NotFound)?;
        let file_type = match device.kind() {
            DeviceKind::Char => mode::S_IFCHR,
            DeviceKind::Block => mode::S_IFBLK,
        };
        inode.set_stat(Stat {
            ino: u64::from(FIRST_DEVICE_FSOP) + index as u64,
            mode: file_type | 0o600,
            nlink: 1,
            rdev: index as u64,
            ..Stat::default()
        });
        inode.set_ops(Arc::new(DevfsNodeOps));
        Ok(())
    }
}

/// TEAM_480: Operations on the devfs root
struct DevfsDirOps;

impl InodeOps for DevfsDirOps {
    fn lookup(&self, dir: &InodeRef, name: &str) -> VfsResult<InodeRef> {
        generic::lookup(dir, name)
    }

    fn readdir(&self, file: &mut File, out: &mut DirentWriter<'_>) -> VfsResult<()> {
        let inode = file.inode().ok_or(VfsError::BadHandle)?;
        let devices = inode.fs()?.devices().devices();
        let start = file.offset() as usize;
        let mut next = start;
        for (index, device) in devices.iter().enumerate().skip(start) {
            let fsop = Fsop::from_u32(FIRST_DEVICE_FSOP + index as u32);
            if !out.push(&fsop, device.name()) {
                break;
            }
            next = index + 1;
        }
        file.set_offset(next as u64);
        Ok(())
    }
}

/// TEAM_480: Operations on a device node
struct DevfsNodeOps;

impl InodeOps for DevfsNodeOps {
    fn fill_file(&self, inode: &InodeRef, file: &mut File) {
        let device = inode
            .fs()
            .ok()
            .and_then(|fs| fs.devices().devices().get(inode.stat().rdev as usize).cloned());
        match device {
            Some(device) => file.attach_device(device),
            None => log::warn!("[DEVFS] device {} vanished before open", inode.stat().rdev),
        }
    }
}
