//! TEAM_480: Filesystems built into the VFS crate
//!
//! On-disk drivers live in their own crates and plug in through
//! [`crate::ops::FilesystemOps`]; only filesystems constructed from kernel
//! state live here.

pub mod devfs;

pub use devfs::DevFs;
