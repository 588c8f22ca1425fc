//! TEAM_480: VFS instance
//!
//! One [`Vfs`] owns everything global to the filesystem layer: the bounded
//! mount table, the registered filesystem types, the device registry and the
//! scheduler the caches wait through. The kernel installs a single instance
//! with [`init`]; tests build private ones with [`Vfs::new`].

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use los_utils::{HashMap, Once, RwLock};

use crate::config::{MountOptions, VfsConfig};
use crate::dcache::DentryFlags;
use crate::device::DeviceRegistry;
use crate::error::{VfsError, VfsResult};
use crate::inode::InodeRef;
use crate::mount::{MountAnchor, MountParams, MountState, MountTable, MountedFs};
use crate::ops::FilesystemOps;
use crate::path::{self, Step};
use crate::sched::Scheduler;

/// TEAM_480: The filesystem layer
pub struct Vfs {
    config: VfsConfig,
    mounts: MountTable,
    filesystems: RwLock<HashMap<String, Arc<dyn FilesystemOps>>>,
    devices: Arc<DeviceRegistry>,
    scheduler: Arc<dyn Scheduler>,
}

impl Vfs {
    pub fn new(config: VfsConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            mounts: MountTable::new(config.max_mounts),
            config,
            filesystems: RwLock::new(HashMap::new()),
            devices: Arc::new(DeviceRegistry::new()),
            scheduler,
        }
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    // ========================================================================
    // Filesystem types
    // ========================================================================

    /// Make `driver` mountable under `name`.
    pub fn register_filesystem(&self, name: &str, driver: Arc<dyn FilesystemOps>) -> VfsResult<()> {
        let mut types = self.filesystems.write();
        if types.contains_key(name) {
            return Err(VfsError::AlreadyExists);
        }
        types.insert(String::from(name), driver);
        log::info!("[VFS] registered filesystem type '{name}'");
        Ok(())
    }

    /// Forget a filesystem type; `Busy` while anything of that type is mounted.
    pub fn unregister_filesystem(&self, name: &str) -> VfsResult<()> {
        let mut types = self.filesystems.write();
        if !types.contains_key(name) {
            return Err(VfsError::NotFound);
        }
        if self.mounts.mounts().iter().any(|m| m.fstype() == name) {
            return Err(VfsError::Busy);
        }
        types.remove(name);
        log::info!("[VFS] unregistered filesystem type '{name}'");
        Ok(())
    }

    pub fn filesystem_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.filesystems.read().keys().cloned().collect();
        names.sort();
        names
    }

    // ========================================================================
    // Root
    // ========================================================================

    pub fn root_fs(&self) -> VfsResult<Arc<MountedFs>> {
        self.mounts.root().ok_or(VfsError::NotFound)
    }

    /// Root directory of the whole tree; `NotFound` until "/" is mounted.
    pub fn root_inode(&self) -> VfsResult<InodeRef> {
        self.root_fs()?.root()
    }

    // ========================================================================
    // Mount / unmount
    // ========================================================================

    /// TEAM_480: Mount a filesystem of type `fstype` at `mountpoint`
    ///
    /// `device` names a registered device, or `None` for filesystems that
    /// need no backing store. Whatever the mount point resolved to before is
    /// hidden until the filesystem is unmounted. A [`VfsConfig`] with
    /// unusable capacities refuses every mount with `InvalidArgument`.
    pub fn mount(
        &self,
        device: Option<&str>,
        mountpoint: &str,
        fstype: &str,
        options: MountOptions,
    ) -> VfsResult<Arc<MountedFs>> {
        self.config.validate()?;
        let driver = self
            .filesystems
            .read()
            .get(fstype)
            .cloned()
            .ok_or(VfsError::UnknownFilesystem)?;
        let device = match device {
            Some(name) => Some(self.devices.find(name).ok_or(VfsError::NoDevice)?),
            None => None,
        };
        let mountpoint = path::normalize(mountpoint)?;

        let fs = MountedFs::new(MountParams {
            fstype: String::from(fstype),
            mountpoint,
            device,
            devices: Arc::clone(&self.devices),
            driver,
            scheduler: Arc::clone(&self.scheduler),
            icache_capacity: self.config.icache_capacity,
            dcache_capacity: self.config.dcache_capacity,
            max_name_len: self.config.max_name_len,
            readonly: options.readonly,
        });
        self.mounts.claim(Arc::clone(&fs))?;

        if let Err(e) = self.bring_up(&fs) {
            log::warn!("[VFS] mount of '{fstype}' on {} failed: {e}", fs.mountpoint());
            fs.purge_caches();
            self.mounts.release(&fs);
            return Err(e);
        }
        log::info!(
            "[VFS] mounted '{fstype}' on {} (fs {}{})",
            fs.mountpoint(),
            fs.id(),
            if options.readonly { ", ro" } else { "" }
        );
        Ok(fs)
    }

    fn bring_up(&self, fs: &Arc<MountedFs>) -> VfsResult<()> {
        let anchor = self.claim_anchor(fs.mountpoint())?;
        let root = match fs.driver().mount(fs) {
            Ok(root) if root.is_dir() => root,
            Ok(_) => {
                Self::abort_anchor(anchor);
                return Err(VfsError::NotADirectory);
            }
            Err(e) => {
                Self::abort_anchor(anchor);
                return Err(e);
            }
        };
        // Caller's reference plus the icache's
        if root.refcount() != 2 {
            log::warn!(
                "[VFS] root of {} arrived with refcount {}",
                fs.mountpoint(),
                root.refcount()
            );
        }
        let spliced = match &anchor {
            Some(a) => a
                .parent
                .fs()
                .is_ok_and(|parent_fs| parent_fs.dcache().set_permanent(&a.entry, &root)),
            None => true,
        };
        if !spliced {
            Self::abort_anchor(anchor);
            return Err(VfsError::Busy);
        }
        fs.activate(root, anchor);
        Ok(())
    }

    fn abort_anchor(anchor: Option<MountAnchor>) {
        if let Some(anchor) = anchor {
            anchor.detach();
        }
    }

    /// TEAM_480: Reserve the dcache entry the new root will be spliced into
    ///
    /// The mount point must be an existing directory. Its entry comes back
    /// PENDING, so lookups of the mount point wait until the mount finishes
    /// or fails. The root mount has no anchor.
    fn claim_anchor(&self, mountpoint: &str) -> VfsResult<Option<MountAnchor>> {
        if mountpoint == "/" {
            return Ok(None);
        }
        let (parent_path, name) = path::split_parent(mountpoint)?;
        let parent = path::vfs_lookup(self, None, parent_path)?;
        let parent_fs = parent.fs()?;
        loop {
            let (entry, target) = match path::step(&parent, name)? {
                Step::Found { entry, inode } => (entry, inode),
                Step::Missing { err, .. } => return Err(err),
            };
            if !target.is_dir() {
                return Err(VfsError::NotADirectory);
            }
            drop(target);
            if parent_fs.dcache().claim(&entry) {
                return Ok(Some(MountAnchor { parent, entry }));
            }
            // Already a mount point, or evicted since the step: look again
            let permanent = parent_fs
                .dcache()
                .flags_of(parent.id(), name)
                .is_some_and(|f| f.contains(DentryFlags::PERMANENT));
            if permanent {
                return Err(VfsError::Busy);
            }
        }
    }

    /// TEAM_480: Unmount the filesystem at `mountpoint`
    ///
    /// New lookups into the filesystem fail from the moment this starts.
    /// Blocks until every open file and outstanding inode reference into it
    /// has been dropped, then purges its caches and calls the driver.
    pub fn unmount(&self, mountpoint: &str) -> VfsResult<()> {
        let mountpoint = path::normalize(mountpoint)?;
        let fs = self.mounts.find(&mountpoint).ok_or(VfsError::NotFound)?;
        let nested = self
            .mounts
            .mounts()
            .iter()
            .any(|m| m.id() != fs.id() && m.state() != MountState::Abandoned && m.is_anchored_in(&fs));
        if nested {
            return Err(VfsError::Busy);
        }
        if !fs.abandon() {
            return Err(VfsError::NotFound);
        }
        log::info!("[VFS] unmounting {mountpoint} (fs {})", fs.id());

        let chan = fs.drain_channel();
        while !fs.is_drained() {
            log::trace!("[VFS] waiting for {mountpoint} to drain");
            fs.scheduler().sleep(chan, &|| !fs.is_drained());
        }
        fs.teardown();
        self.mounts.release(&fs);
        log::info!("[VFS] unmounted {mountpoint}");
        Ok(())
    }

    /// Log every mount and its caches at debug level.
    pub fn dump(&self) {
        for fs in self.mounts.mounts() {
            fs.dump();
        }
    }
}

static VFS: Once<Vfs> = Once::new();

/// TEAM_480: Install the process-wide VFS
///
/// Only the first call builds an instance; later calls return it unchanged.
pub fn init(config: VfsConfig, scheduler: Arc<dyn Scheduler>) -> &'static Vfs {
    VFS.call_once(|| {
        log::info!("[VFS] initialized ({} mount slots)", config.max_mounts);
        Vfs::new(config, scheduler)
    })
}

/// The process-wide VFS; `NoDevice` before [`init`].
pub fn vfs() -> VfsResult<&'static Vfs> {
    VFS.get().ok_or(VfsError::NoDevice)
}
