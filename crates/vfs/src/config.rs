//! TEAM_480: VFS tunables
//!
//! Capacities are fixed when a [`crate::Vfs`] is built. Cache pools are sized
//! per mounted filesystem at mount time and never grow.

use crate::error::{VfsError, VfsResult};

/// TEAM_480: Capacities for one VFS instance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VfsConfig {
    /// Simultaneous mounts
    pub max_mounts: usize,
    /// Inode cache entries per mounted filesystem
    pub icache_capacity: usize,
    /// Dentry cache entries per mounted filesystem
    pub dcache_capacity: usize,
    /// Longest path component, in bytes
    pub max_name_len: usize,
}

impl VfsConfig {
    pub const DEFAULT_MAX_MOUNTS: usize = 16;
    pub const DEFAULT_ICACHE_CAPACITY: usize = 32;
    pub const DEFAULT_DCACHE_CAPACITY: usize = 32;
    pub const DEFAULT_MAX_NAME_LEN: usize = 255;

    /// A walk pins the mount root and the current directory while the next
    /// component's inode is read.
    pub const MIN_ICACHE_CAPACITY: usize = 3;
    /// The entry leading to the current directory stays pinned while the
    /// next one is reserved. Each mount point anchored in a filesystem pins
    /// one more entry of its dcache.
    pub const MIN_DCACHE_CAPACITY: usize = 2;

    pub const fn new() -> Self {
        Self {
            max_mounts: Self::DEFAULT_MAX_MOUNTS,
            icache_capacity: Self::DEFAULT_ICACHE_CAPACITY,
            dcache_capacity: Self::DEFAULT_DCACHE_CAPACITY,
            max_name_len: Self::DEFAULT_MAX_NAME_LEN,
        }
    }

    #[must_use]
    pub const fn with_max_mounts(mut self, n: usize) -> Self {
        self.max_mounts = n;
        self
    }

    #[must_use]
    pub const fn with_icache_capacity(mut self, n: usize) -> Self {
        self.icache_capacity = n;
        self
    }

    #[must_use]
    pub const fn with_dcache_capacity(mut self, n: usize) -> Self {
        self.dcache_capacity = n;
        self
    }

    #[must_use]
    pub const fn with_max_name_len(mut self, n: usize) -> Self {
        self.max_name_len = n;
        self
    }

    /// `InvalidArgument` for capacities no mount could work with.
    pub fn validate(&self) -> VfsResult<()> {
        if self.max_mounts == 0
            || self.max_name_len == 0
            || self.icache_capacity < Self::MIN_ICACHE_CAPACITY
            || self.dcache_capacity < Self::MIN_DCACHE_CAPACITY
        {
            return Err(VfsError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// TEAM_480: Per-mount options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MountOptions {
    pub readonly: bool,
}

impl MountOptions {
    pub const fn readonly() -> Self {
        Self { readonly: true }
    }
}
