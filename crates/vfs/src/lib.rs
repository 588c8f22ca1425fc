//! TEAM_480: Virtual Filesystem Core
//!
//! The layer every filesystem driver plugs into:
//!
//! - **icache**: object identifier → inode, one per mounted filesystem
//! - **dcache**: (directory, name) → inode or known-missing
//! - **path**: component-by-component resolution through the dcache
//! - **mount**: bounded table of mounted filesystems
//! - **file / dispatch**: open file handles and the syscall-facing entry points
//!
//! Inodes are reference counted through [`InodeRef`]; dropping the last one
//! writes the inode back if dirty and hands it to the driver's
//! `discard_inode`. Cache locks are never held across driver callbacks or
//! block I/O.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod config;
pub mod context;
pub mod dcache;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod file;
pub mod fs;
pub mod generic;
pub mod icache;
pub mod inode;
pub mod mode;
pub mod mount;
pub mod ops;
pub mod path;
pub mod sched;

pub use config::{MountOptions, VfsConfig};
pub use context::{Vfs, init, vfs};
pub use dcache::{DentryCache, DentryFlags, DentryHandle, DentryLookup};
pub use device::{BlockError, Buffer, Device, DeviceKind, DeviceRegistry};
pub use dispatch::{
    vfs_close, vfs_create_file, vfs_grow, vfs_mkdir, vfs_open, vfs_read, vfs_readdir, vfs_seek,
    vfs_stat, vfs_write,
};
pub use error::{VfsError, VfsResult};
pub use file::{File, OpenFlags, SeekWhence};
pub use generic::{Dirent, DirentIter, DirentWriter};
pub use icache::InodeCache;
pub use inode::{Fsop, Inode, InodeFlags, InodeId, InodeRef, MAX_FSOP_LEN, Stat};
pub use mount::{MountFlags, MountState, MountTable, MountedFs};
pub use ops::{FilesystemOps, InodeOps};
pub use path::{vfs_create, vfs_lookup, vfs_rename, vfs_unlink};
#[cfg(feature = "std")]
pub use sched::ThreadScheduler;
pub use sched::{Scheduler, WaitChannel, YieldScheduler};
