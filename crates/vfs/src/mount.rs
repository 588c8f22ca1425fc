//! TEAM_480: Mounted filesystems and the mount table
//!
//! A [`MountedFs`] binds a driver, an optional backing device and a pair of
//! caches together, and owns the arena its inodes live in. The mount table
//! holds a fixed number of them.
//!
//! ```text
//!   FREE ──mount──► MOUNTING ──driver ok──► ACTIVE ──unmount──► ABANDONED
//!    ▲                 │                                          │
//!    └──driver failed──┘                                          │
//!    └──────────────────────────── drained, torn down ────────────┘
//! ```
//!
//! FREE has no object: it is an empty table slot.

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::any::Any;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bitflags::bitflags;
use los_utils::Mutex;

use crate::dcache::{DentryCache, DentryHandle};
use crate::device::{self, Buffer, Device, DeviceRegistry};
use crate::error::{VfsError, VfsResult};
use crate::icache::{IcacheLookup, InodeCache};
use crate::inode::{Fsop, Inode, InodeRef, InodeTable};
use crate::ops::FilesystemOps;
use crate::sched::{Scheduler, WaitChannel};

bitflags! {
    /// TEAM_480: Mount flags
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MountFlags: u32 {
        const IN_USE = 1 << 0;
        const READONLY = 1 << 1;
        const ABANDONED = 1 << 2;
    }
}

/// TEAM_480: Lifecycle state of a mounted filesystem
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountState {
    Mounting,
    Active,
    Abandoned,
}

/// Mount ids are never reused, so wait channels of old mounts stay distinct.
static NEXT_FS_ID: AtomicU64 = AtomicU64::new(1);

/// TEAM_480: Where a filesystem hangs in its parent
///
/// Holding the parent directory keeps it out of reach of eviction, which
/// would otherwise purge the PERMANENT entry along with the parent.
pub(crate) struct MountAnchor {
    pub parent: InodeRef,
    pub entry: DentryHandle,
}

impl MountAnchor {
    /// Drop the anchor entry from the parent's dcache.
    pub(crate) fn detach(self) {
        match self.parent.fs() {
            Ok(parent_fs) => parent_fs.dcache().remove(&self.entry),
            Err(e) => log::warn!("[VFS] anchor parent already gone: {e}"),
        }
    }
}

pub(crate) struct MountParams {
    pub fstype: String,
    pub mountpoint: String,
    pub device: Option<Arc<dyn Device>>,
    pub devices: Arc<DeviceRegistry>,
    pub driver: Arc<dyn FilesystemOps>,
    pub scheduler: Arc<dyn Scheduler>,
    pub icache_capacity: usize,
    pub dcache_capacity: usize,
    pub max_name_len: usize,
    pub readonly: bool,
}

/// TEAM_480: One mounted filesystem
pub struct MountedFs {
    id: u64,
    this: Weak<MountedFs>,
    fstype: String,
    mountpoint: String,
    device: Option<Arc<dyn Device>>,
    devices: Arc<DeviceRegistry>,
    driver: Arc<dyn FilesystemOps>,
    scheduler: Arc<dyn Scheduler>,
    block_size: AtomicUsize,
    fsop_size: AtomicUsize,
    flags: Mutex<MountFlags>,
    state: Mutex<MountState>,
    icache: InodeCache,
    dcache: DentryCache,
    inodes: InodeTable,
    root: Mutex<Option<InodeRef>>,
    anchor: Mutex<Option<MountAnchor>>,
    private: Mutex<Option<Box<dyn Any + Send + Sync>>>,
}

impl MountedFs {
    pub(crate) fn new(p: MountParams) -> Arc<Self> {
        let id = NEXT_FS_ID.fetch_add(1, Ordering::Relaxed);
        let mut flags = MountFlags::IN_USE;
        if p.readonly {
            flags |= MountFlags::READONLY;
        }
        Arc::new_cyclic(|this| Self {
            id,
            this: this.clone(),
            fstype: p.fstype,
            mountpoint: p.mountpoint,
            device: p.device,
            devices: p.devices,
            driver: p.driver,
            icache: InodeCache::new(id, p.icache_capacity, Arc::clone(&p.scheduler)),
            dcache: DentryCache::new(
                id,
                p.dcache_capacity,
                p.max_name_len,
                Arc::clone(&p.scheduler),
            ),
            scheduler: p.scheduler,
            block_size: AtomicUsize::new(512),
            fsop_size: AtomicUsize::new(0),
            flags: Mutex::new(flags),
            state: Mutex::new(MountState::Mounting),
            inodes: InodeTable::new(),
            root: Mutex::new(None),
            anchor: Mutex::new(None),
            private: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn fstype(&self) -> &str {
        &self.fstype
    }

    pub fn mountpoint(&self) -> &str {
        &self.mountpoint
    }

    /// Backing device; `None` for constructed filesystems.
    pub fn device(&self) -> Option<&Arc<dyn Device>> {
        self.device.as_ref()
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    pub fn driver(&self) -> &Arc<dyn FilesystemOps> {
        &self.driver
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn icache(&self) -> &InodeCache {
        &self.icache
    }

    pub fn dcache(&self) -> &DentryCache {
        &self.dcache
    }

    pub(crate) fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    pub fn block_size(&self) -> usize {
        self.block_size.load(Ordering::Relaxed)
    }

    /// Set by the driver while mounting, once the superblock is read.
    pub fn set_block_size(&self, size: usize) -> VfsResult<()> {
        if size == 0 {
            return Err(VfsError::InvalidArgument);
        }
        self.block_size.store(size, Ordering::Relaxed);
        Ok(())
    }

    /// Object identifier length; 0 means any length up to the maximum.
    pub fn fsop_size(&self) -> usize {
        self.fsop_size.load(Ordering::Relaxed)
    }

    pub fn set_fsop_size(&self, size: usize) {
        self.fsop_size.store(size, Ordering::Relaxed);
    }

    pub fn flags(&self) -> MountFlags {
        *self.flags.lock()
    }

    pub fn is_readonly(&self) -> bool {
        self.flags().contains(MountFlags::READONLY)
    }

    pub fn state(&self) -> MountState {
        *self.state.lock()
    }

    /// False once an unmount has begun.
    pub fn is_sane(&self) -> bool {
        self.state() != MountState::Abandoned
    }

    /// `ReadOnly` on read-only mounts.
    pub fn check_writable(&self) -> VfsResult<()> {
        if self.is_readonly() {
            return Err(VfsError::ReadOnly);
        }
        Ok(())
    }

    /// Root directory; `NotFound` before mount completes or after teardown.
    pub fn root(&self) -> VfsResult<InodeRef> {
        self.root.lock().clone().ok_or(VfsError::NotFound)
    }

    pub fn set_private<T: Any + Send + Sync>(&self, data: T) {
        *self.private.lock() = Some(Box::new(data));
    }

    pub fn with_private<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.private.lock();
        guard.as_ref()?.downcast_ref::<T>().map(f)
    }

    /// Number of inodes alive in this filesystem.
    pub fn live_inodes(&self) -> usize {
        self.inodes.len()
    }

    // ========================================================================
    // Inode lookup
    // ========================================================================

    /// TEAM_480: Get the inode for `fsop`, reading it on a cache miss
    ///
    /// Concurrent callers asking for the same object share one `read_inode`:
    /// the first reserves a pending icache entry, the others sleep until it
    /// is resolved or dropped.
    pub fn get_inode(&self, fsop: &Fsop) -> VfsResult<InodeRef> {
        let want = self.fsop_size();
        if want != 0 && fsop.len() != want {
            return Err(VfsError::InvalidArgument);
        }
        if !self.is_sane() {
            return Err(VfsError::Io);
        }

        let pending = loop {
            match self.icache.find_or_add_pending(self, *fsop) {
                Some(IcacheLookup::Cached(inode)) => return Ok(inode),
                Some(IcacheLookup::Fresh(pending)) => break pending,
                None => self
                    .scheduler
                    .sleep(self.icache.channel(fsop), &|| self.icache.is_pending(fsop)),
            }
        };

        let inode = self.inodes.alloc(*fsop, self.this.clone());
        let read = self
            .driver
            .prepare_inode(&inode)
            .and_then(|()| self.driver.read_inode(&inode, fsop));
        if let Err(e) = read {
            log::trace!("[VFS] read_inode {fsop} failed: {e}");
            self.icache.remove_pending(pending);
            // Last reference: discards the half-built inode
            drop(inode);
            return Err(e);
        }
        inode.clear_pending();
        self.icache.set_pending(pending, &inode);
        Ok(inode)
    }

    /// Write back a dirty inode now.
    pub fn sync_inode(&self, inode: &Inode) -> VfsResult<()> {
        if inode.take_dirty() {
            if let Err(e) = self.driver.write_inode(inode) {
                inode.mark_dirty();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Last reference to `inode` is gone: remove every trace of it.
    pub(crate) fn reclaim(&self, inode: &Arc<Inode>) {
        self.icache.remove_inode(inode.id());
        self.dcache.remove_for_inode(inode);
        if inode.take_dirty() {
            if let Err(e) = self.driver.write_inode(inode) {
                log::warn!("[VFS] write-back of {} failed: {e}", inode.fsop());
            }
        }
        self.driver.discard_inode(inode);
        self.inodes.remove(inode.id());
        log::trace!("[VFS] reclaimed inode {}", inode.fsop());
    }

    // ========================================================================
    // Block I/O
    // ========================================================================

    fn backing(&self) -> VfsResult<&Arc<dyn Device>> {
        self.device.as_ref().ok_or(VfsError::NoDevice)
    }

    /// Read one filesystem block from the backing device.
    pub fn bread(&self, block: u64) -> VfsResult<Buffer> {
        if !self.is_sane() {
            return Err(VfsError::Io);
        }
        Ok(device::read_block(
            self.backing()?.as_ref(),
            block,
            self.block_size(),
        )?)
    }

    /// Zeroed buffer for a block that will be fully overwritten.
    pub fn bget(&self, block: u64) -> Buffer {
        device::blank_block(block, self.block_size())
    }

    pub fn bwrite(&self, buf: &Buffer) -> VfsResult<()> {
        self.check_writable()?;
        Ok(device::write_block(self.backing()?.as_ref(), buf)?)
    }

    // ========================================================================
    // Mount lifecycle
    // ========================================================================

    pub(crate) fn activate(&self, root: InodeRef, anchor: Option<MountAnchor>) {
        *self.root.lock() = Some(root);
        *self.anchor.lock() = anchor;
        *self.state.lock() = MountState::Active;
    }

    /// True if this filesystem hangs off a directory of `parent`.
    pub(crate) fn is_anchored_in(&self, parent: &MountedFs) -> bool {
        self.anchor
            .lock()
            .as_ref()
            .and_then(|a| a.parent.fs().ok())
            .is_some_and(|fs| fs.id == parent.id)
    }

    /// Start unmounting: refuse new work and unhook from the parent.
    ///
    /// False if the filesystem was not active, e.g. another unmount won.
    pub(crate) fn abandon(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state != MountState::Active {
                return false;
            }
            *state = MountState::Abandoned;
        }
        self.flags.lock().insert(MountFlags::ABANDONED);
        let anchor = self.anchor.lock().take();
        if let Some(anchor) = anchor {
            anchor.detach();
        }
        true
    }

    /// No inode is referenced by anything but this filesystem's own caches
    /// and the mount record's hold on the root.
    pub fn is_drained(&self) -> bool {
        let root_id = self.root.lock().as_ref().map(|r| r.id());
        self.inodes.live().iter().all(|inode| {
            let extra = u32::from(Some(inode.id()) == root_id);
            inode.refcount() == inode.cache_refs() + extra
        })
    }

    pub(crate) fn drain_channel(&self) -> WaitChannel {
        WaitChannel::new(self.id, b"drain")
    }

    /// Some reference was dropped; an unmount may be waiting for that.
    pub(crate) fn note_release(&self) {
        if self.state() == MountState::Abandoned {
            self.scheduler.wakeup(self.drain_channel());
        }
    }

    /// Drop the root and both caches, reclaiming every cached inode.
    pub(crate) fn purge_caches(&self) {
        let root = self.root.lock().take();
        drop(root);
        let dentries = self.dcache.purge();
        let inodes = self.icache.purge(self);
        log::trace!("[VFS] purged {dentries} dentries, {inodes} inodes");
    }

    /// Release everything once drained, ending with the driver's `unmount`.
    pub(crate) fn teardown(&self) {
        self.purge_caches();
        if let Err(e) = self.driver.unmount(self) {
            log::warn!("[VFS] driver unmount of {} failed: {e}", self.mountpoint);
        }
        let leaked = self.inodes.len();
        if leaked > 0 {
            log::error!("[VFS] {leaked} inodes outlived unmount of {}", self.mountpoint);
        }
        self.flags.lock().remove(MountFlags::IN_USE);
    }

    pub fn dump(&self) {
        log::debug!(
            "[VFS] fs {} '{}' on {} state {:?} flags {:?} inodes {}",
            self.id,
            self.fstype,
            self.mountpoint,
            self.state(),
            self.flags(),
            self.inodes.len()
        );
        self.icache.dump(self);
        self.dcache.dump();
    }
}

impl core::fmt::Debug for MountedFs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MountedFs")
            .field("id", &self.id)
            .field("fstype", &self.fstype)
            .field("mountpoint", &self.mountpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// TEAM_480: Bounded table of mounted filesystems
pub struct MountTable {
    slots: Mutex<Vec<Option<Arc<MountedFs>>>>,
}

impl MountTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(alloc::vec![None; capacity]),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// Take a free slot for `fs`.
    ///
    /// `Busy` if something is already mounted, or being mounted, at the same
    /// mount point; `OutOfHandles` if the table is full.
    pub(crate) fn claim(&self, fs: Arc<MountedFs>) -> VfsResult<usize> {
        let mut slots = self.slots.lock();
        if slots
            .iter()
            .flatten()
            .any(|m| m.mountpoint == fs.mountpoint && m.state() != MountState::Abandoned)
        {
            return Err(VfsError::Busy);
        }
        let index = slots
            .iter()
            .position(Option::is_none)
            .ok_or(VfsError::OutOfHandles)?;
        slots[index] = Some(fs);
        Ok(index)
    }

    /// Free the slot holding `fs`.
    pub(crate) fn release(&self, fs: &MountedFs) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if slot.as_ref().is_some_and(|m| m.id == fs.id) {
                *slot = None;
            }
        }
    }

    pub fn find(&self, mountpoint: &str) -> Option<Arc<MountedFs>> {
        self.slots
            .lock()
            .iter()
            .flatten()
            .find(|m| m.mountpoint == mountpoint && m.state() == MountState::Active)
            .cloned()
    }

    /// Active filesystem mounted on "/".
    pub fn root(&self) -> Option<Arc<MountedFs>> {
        self.find("/")
    }

    pub fn mounts(&self) -> Vec<Arc<MountedFs>> {
        self.slots.lock().iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
