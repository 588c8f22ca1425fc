//! TEAM_480: Dentry cache (dcache)
//!
//! Caches (directory, name) → inode lookups for one mounted filesystem,
//! including negative results, so that walking a path does not call the
//! driver's `lookup` again for names already resolved.
//!
//! An entry is in one of these states:
//!
//! - PENDING: reserved by a resolver that is asking the driver right now.
//!   Other lookups of the same key wait.
//! - NEGATIVE: the name is known not to exist.
//! - positive: the entry holds one counted reference to the target inode.
//!   Mount points carry PERMANENT and are never evicted. Their target is
//!   the root of another filesystem.
//!
//! The directory is recorded by id only. Entries keyed by a directory are
//! purged when that directory inode is reclaimed.

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::num::NonZeroUsize;

use bitflags::bitflags;
use los_utils::{LruCache, Mutex};

use crate::error::{VfsError, VfsResult};
use crate::inode::{Fsop, Inode, InodeId, InodeRef};
use crate::sched::{Scheduler, WaitChannel};

bitflags! {
    /// TEAM_480: Dentry state bits
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DentryFlags: u32 {
        const PENDING = 1 << 0;
        const NEGATIVE = 1 << 1;
        const PERMANENT = 1 << 2;
    }
}

type DentryKey = (InodeId, String);

struct DentryEntry {
    serial: u64,
    target: Option<Arc<Inode>>,
    flags: DentryFlags,
}

impl DentryEntry {
    fn evictable(&self) -> bool {
        if self
            .flags
            .intersects(DentryFlags::PERMANENT | DentryFlags::PENDING)
        {
            return false;
        }
        match &self.target {
            Some(inode) => inode.is_cache_only(),
            None => true,
        }
    }
}

struct DentryPool {
    entries: LruCache<DentryKey, DentryEntry>,
    next_serial: u64,
}

impl DentryPool {
    fn is_full(&self) -> bool {
        self.entries.len() >= self.entries.cap().get()
    }

    /// The entry `handle` was issued for, unless it has since been evicted.
    fn current(&mut self, handle: &DentryHandle) -> Option<&mut DentryEntry> {
        self.entries
            .peek_mut(&handle.key)
            .filter(|e| e.serial == handle.serial)
    }

    fn remove_where(
        &mut self,
        mut pred: impl FnMut(&DentryKey, &DentryEntry) -> bool,
    ) -> Vec<DentryEntry> {
        let doomed: Vec<DentryKey> = self
            .entries
            .iter()
            .filter(|&(k, e)| pred(k, e))
            .map(|(k, _)| k.clone())
            .collect();
        let mut removed = Vec::with_capacity(doomed.len());
        for key in &doomed {
            if let Some(entry) = self.entries.pop(key) {
                removed.push(entry);
            }
        }
        removed
    }
}

/// TEAM_480: Handle to one dcache entry
///
/// Only valid for the entry it was issued for; operations on an entry that
/// has since been evicted, or replaced by a later entry for the same name,
/// are refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DentryHandle {
    key: DentryKey,
    serial: u64,
    chan: WaitChannel,
}

/// TEAM_480: Outcome of a successful dcache lookup
pub enum DentryLookup {
    /// Cached positive entry; the reference is the caller's.
    Positive { entry: DentryHandle, inode: InodeRef },
    /// Cached negative entry.
    Negative(DentryHandle),
    /// Newly reserved entry; the caller must resolve it with `set_resolved`
    /// or give it back with `remove`.
    Fresh(DentryHandle),
}

/// TEAM_480: Read-only view of one entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DentrySnapshot {
    pub dir: InodeId,
    pub name: String,
    pub target: Option<Fsop>,
    pub flags: DentryFlags,
}

/// TEAM_480: Per-filesystem dentry cache
pub struct DentryCache {
    fs_id: u64,
    max_name_len: usize,
    pool: Mutex<DentryPool>,
    scheduler: Arc<dyn Scheduler>,
}

impl DentryCache {
    pub(crate) fn new(
        fs_id: u64,
        capacity: usize,
        max_name_len: usize,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            fs_id,
            max_name_len,
            pool: Mutex::new(DentryPool {
                entries: LruCache::new(capacity),
                next_serial: 0,
            }),
            scheduler,
        }
    }

    fn check_name(&self, name: &str) -> VfsResult<()> {
        if name.is_empty() || name.contains('/') {
            return Err(VfsError::InvalidArgument);
        }
        if name.len() > self.max_name_len {
            return Err(VfsError::NameTooLong);
        }
        Ok(())
    }

    /// Look up `name` in `dir`, reserving a pending entry on a miss.
    ///
    /// `Ok(None)` means another thread is resolving this key; sleep on
    /// [`DentryCache::channel`] and try again. A full cache with nothing
    /// evictable is waited out here by yielding.
    pub fn find_or_add_pending(&self, dir: &Inode, name: &str) -> VfsResult<Option<DentryLookup>> {
        self.check_name(name)?;
        let key: DentryKey = (dir.id(), String::from(name));
        let chan = self.channel(dir.id(), name);
        loop {
            let mut evicted: Option<Arc<Inode>> = None;
            {
                let mut pool = self.pool.lock();

                if let Some(e) = pool.entries.get(&key) {
                    if e.flags.contains(DentryFlags::PENDING) {
                        log::trace!("[DCACHE] '{name}' pending elsewhere");
                        return Ok(None);
                    }
                    let entry = DentryHandle {
                        key,
                        serial: e.serial,
                        chan,
                    };
                    let found = match &e.target {
                        Some(target) if !e.flags.contains(DentryFlags::NEGATIVE) => {
                            DentryLookup::Positive {
                                entry,
                                inode: InodeRef::from_cache(target),
                            }
                        }
                        _ => DentryLookup::Negative(entry),
                    };
                    log::trace!("[DCACHE] hit '{name}'");
                    return Ok(Some(found));
                }

                if pool.is_full() {
                    let found = pool
                        .entries
                        .iter()
                        .rev()
                        .find(|(_, e)| e.evictable())
                        .map(|(k, _)| k.clone());
                    if let Some((_, victim)) = &found {
                        log::trace!("[DCACHE] evict '{victim}'");
                    }
                    evicted = found
                        .and_then(|k| pool.entries.pop(&k))
                        .and_then(|e| e.target);
                }

                if !pool.is_full() {
                    let serial = pool.next_serial;
                    pool.next_serial += 1;
                    let fresh = DentryEntry {
                        serial,
                        target: None,
                        flags: DentryFlags::PENDING,
                    };
                    pool.entries.put(key.clone(), fresh);
                    drop(pool);
                    if let Some(inode) = evicted {
                        drop(InodeRef::from_cache_hold(inode));
                    }
                    log::trace!("[DCACHE] miss '{name}'");
                    return Ok(Some(DentryLookup::Fresh(DentryHandle { key, serial, chan })));
                }
            }
            log::trace!("[DCACHE] full and pinned, yielding");
            self.scheduler.reschedule();
        }
    }

    /// Finish a pending entry: positive with `inode`, or negative.
    ///
    /// The passed reference becomes the cache's own hold on the inode.
    pub fn set_resolved(&self, entry: &DentryHandle, inode: Option<InodeRef>) {
        let hold = inode.map(InodeRef::into_cache_hold);
        let leftover = {
            let mut pool = self.pool.lock();
            match pool.current(entry) {
                Some(e) => {
                    e.flags.remove(DentryFlags::PENDING | DentryFlags::NEGATIVE);
                    if hold.is_none() {
                        e.flags.insert(DentryFlags::NEGATIVE);
                    }
                    core::mem::replace(&mut e.target, hold)
                }
                None => {
                    log::error!("[DCACHE] resolving a vanished entry");
                    hold
                }
            }
        };
        if let Some(inode) = leftover {
            drop(InodeRef::from_cache_hold(inode));
        }
        self.scheduler.wakeup(entry.chan);
    }

    /// Take over an existing non-pending entry, turning it pending again.
    ///
    /// Any target is released. Returns false if the entry is gone or someone
    /// else holds it pending; the caller should look the name up again.
    pub fn claim(&self, entry: &DentryHandle) -> bool {
        self.claim_if(entry, |_| true)
    }

    /// Like [`DentryCache::claim`], but only while the entry is still
    /// negative. Creators use this: an entry that turned positive since it
    /// was looked up names an object that now exists.
    pub fn claim_negative(&self, entry: &DentryHandle) -> bool {
        self.claim_if(entry, |e| e.flags == DentryFlags::NEGATIVE)
    }

    fn claim_if(&self, entry: &DentryHandle, accept: impl FnOnce(&DentryEntry) -> bool) -> bool {
        let released = {
            let mut pool = self.pool.lock();
            let Some(e) = pool.current(entry) else {
                return false;
            };
            if e.flags.intersects(DentryFlags::PENDING | DentryFlags::PERMANENT) || !accept(e) {
                return false;
            }
            e.flags = DentryFlags::PENDING;
            e.target.take()
        };
        if let Some(inode) = released {
            drop(InodeRef::from_cache_hold(inode));
        }
        true
    }

    /// Drop an entry entirely, e.g. a reservation that will not be resolved.
    pub fn remove(&self, entry: &DentryHandle) {
        let removed = {
            let mut pool = self.pool.lock();
            let live = pool.current(entry).is_some();
            if live { pool.entries.pop(&entry.key) } else { None }
        };
        if let Some(inode) = removed.and_then(|e| e.target) {
            drop(InodeRef::from_cache_hold(inode));
        }
        self.scheduler.wakeup(entry.chan);
    }

    /// Turn a claimed entry into a mount-point anchor for `root`.
    pub fn set_permanent(&self, entry: &DentryHandle, root: &InodeRef) -> bool {
        let hold = root.cache_hold();
        let (ok, leftover) = {
            let mut pool = self.pool.lock();
            match pool.current(entry) {
                Some(e) if e.flags.contains(DentryFlags::PENDING) => {
                    e.flags = DentryFlags::PERMANENT;
                    (true, e.target.replace(hold))
                }
                _ => (false, Some(hold)),
            }
        };
        if let Some(inode) = leftover {
            drop(InodeRef::from_cache_hold(inode));
        }
        self.scheduler.wakeup(entry.chan);
        ok
    }

    /// A name was removed from its directory: make the entry negative.
    pub fn unlink(&self, entry: &DentryHandle) -> VfsResult<()> {
        let released = {
            let mut pool = self.pool.lock();
            let e = pool.current(entry).ok_or(VfsError::NotFound)?;
            if e.flags.contains(DentryFlags::PERMANENT) {
                return Err(VfsError::Busy);
            }
            e.flags = DentryFlags::NEGATIVE;
            e.target.take()
        };
        if let Some(inode) = released {
            drop(InodeRef::from_cache_hold(inode));
        }
        Ok(())
    }

    /// Forget whatever is cached for (`dir`, `name`) so the next lookup asks
    /// the driver. Pending and PERMANENT entries are left alone.
    pub fn invalidate(&self, dir: InodeId, name: &str) -> bool {
        let key: DentryKey = (dir, String::from(name));
        let removed = {
            let mut pool = self.pool.lock();
            let settled = pool.entries.peek(&key).is_some_and(|e| {
                !e.flags
                    .intersects(DentryFlags::PENDING | DentryFlags::PERMANENT)
            });
            if settled { pool.entries.pop(&key) } else { None }
        };
        match removed {
            Some(entry) => {
                if let Some(target) = entry.target {
                    drop(InodeRef::from_cache_hold(target));
                }
                true
            }
            None => false,
        }
    }

    /// Evict the least recently used evictable positive entry.
    ///
    /// Lets a full inode cache reclaim inodes pinned only by dentries.
    pub fn shrink(&self) -> bool {
        let evicted = {
            let mut pool = self.pool.lock();
            let key = pool
                .entries
                .iter()
                .rev()
                .find(|(_, e)| e.target.is_some() && e.evictable())
                .map(|(k, _)| k.clone());
            key.and_then(|k| pool.entries.pop(&k))
        };
        match evicted.and_then(|e| e.target) {
            Some(target) => {
                log::trace!("[DCACHE] shrink released {}", target.fsop());
                drop(InodeRef::from_cache_hold(target));
                true
            }
            None => false,
        }
    }

    /// Purge entries keyed by `inode` as directory, and entries targeting it.
    ///
    /// Called while `inode` is being reclaimed. Targets of purged child
    /// entries are released after the lock is dropped, which may reclaim
    /// them in turn.
    pub fn remove_for_inode(&self, inode: &Inode) -> usize {
        let id = inode.id();
        let removed = self.pool.lock().remove_where(|(dir, _), e| {
            *dir == id
                || e
                    .target
                    .as_ref()
                    .is_some_and(|t| core::ptr::eq(Arc::as_ptr(t), inode))
        });
        let count = removed.len();
        for entry in removed {
            if let Some(target) = entry.target {
                // The dying inode has no counts left to give back
                if !core::ptr::eq(Arc::as_ptr(&target), inode) {
                    drop(InodeRef::from_cache_hold(target));
                }
            }
        }
        count
    }

    /// Drop every entry, releasing all targets.
    pub(crate) fn purge(&self) -> usize {
        let removed = self.pool.lock().remove_where(|_, _| true);
        let count = removed.len();
        for entry in removed {
            if let Some(target) = entry.target {
                drop(InodeRef::from_cache_hold(target));
            }
        }
        count
    }

    pub fn is_pending(&self, dir: InodeId, name: &str) -> bool {
        self.flags_of(dir, name)
            .is_some_and(|f| f.contains(DentryFlags::PENDING))
    }

    pub fn flags_of(&self, dir: InodeId, name: &str) -> Option<DentryFlags> {
        self.pool
            .lock()
            .entries
            .peek(&(dir, String::from(name)))
            .map(|e| e.flags)
    }

    pub fn contains(&self, dir: InodeId, name: &str) -> bool {
        self.flags_of(dir, name).is_some()
    }

    pub fn channel(&self, dir: InodeId, name: &str) -> WaitChannel {
        WaitChannel::for_name(self.fs_id, dir.raw(), name)
    }

    pub fn len(&self) -> usize {
        self.pool.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.pool.lock().entries.cap().get()
    }

    /// Entries, most recently used first.
    pub fn snapshot(&self) -> Vec<DentrySnapshot> {
        self.pool
            .lock()
            .entries
            .iter()
            .map(|((dir, name), e)| DentrySnapshot {
                dir: *dir,
                name: name.clone(),
                target: e.target.as_ref().map(|t| *t.fsop()),
                flags: e.flags,
            })
            .collect()
    }

    /// Log every entry at debug level.
    pub fn dump(&self) {
        let entries = self.snapshot();
        log::debug!(
            "[DCACHE] fs {}: {}/{} entries",
            self.fs_id,
            entries.len(),
            self.capacity()
        );
        for e in entries {
            match e.target {
                Some(fsop) => log::debug!(
                    "[DCACHE]   {:x}/'{}' -> {fsop} {:?}",
                    e.dir.raw(),
                    e.name,
                    e.flags
                ),
                None => log::debug!("[DCACHE]   {:x}/'{}' {:?}", e.dir.raw(), e.name, e.flags),
            }
        }
    }
}
