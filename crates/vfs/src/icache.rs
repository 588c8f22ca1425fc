//! TEAM_480: Inode cache (icache)
//!
//! Maps object identifiers to inodes within one mounted filesystem, so that
//! two lookups of the same on-disk object share one inode and one
//! `read_inode` call.
//!
//! Entries are either pending (someone is reading the inode right now) or
//! resolved (the entry holds one counted reference to the inode). The pool
//! is fixed-size; when it is full the least recently used entry whose inode
//! nobody else references is evicted. The lock is never held across a
//! driver callback.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::num::NonZeroUsize;

use los_utils::{LruCache, Mutex};

use crate::inode::{Fsop, Inode, InodeId, InodeRef};
use crate::mount::MountedFs;
use crate::sched::{Scheduler, WaitChannel};

struct IcacheEntry {
    serial: u64,
    /// `None` while pending
    inode: Option<InodeId>,
}

struct IcachePool {
    entries: LruCache<Fsop, IcacheEntry>,
    next_serial: u64,
}

impl IcachePool {
    fn is_full(&self) -> bool {
        self.entries.len() >= self.entries.cap().get()
    }

    /// Entry for `fsop` if it is still the one `serial` was issued for.
    fn current(&mut self, fsop: &Fsop, serial: u64) -> Option<&mut IcacheEntry> {
        self.entries.peek_mut(fsop).filter(|e| e.serial == serial)
    }
}

/// TEAM_480: Outcome of a successful icache lookup
pub enum IcacheLookup {
    /// Already cached; the reference is the caller's.
    Cached(InodeRef),
    /// Newly reserved; the caller must read the inode and then call
    /// `set_pending` or `remove_pending`.
    Fresh(PendingInode),
}

/// TEAM_480: Reservation for an inode being read
#[must_use]
#[derive(Debug)]
pub struct PendingInode {
    fsop: Fsop,
    serial: u64,
}

impl PendingInode {
    pub fn fsop(&self) -> &Fsop {
        &self.fsop
    }
}

/// TEAM_480: Per-filesystem inode cache
pub struct InodeCache {
    fs_id: u64,
    pool: Mutex<IcachePool>,
    scheduler: Arc<dyn Scheduler>,
}

impl InodeCache {
    pub(crate) fn new(fs_id: u64, capacity: usize, scheduler: Arc<dyn Scheduler>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            fs_id,
            pool: Mutex::new(IcachePool {
                entries: LruCache::new(capacity),
                next_serial: 0,
            }),
            scheduler,
        }
    }

    /// Look up `fsop`, reserving a pending entry on a miss.
    ///
    /// `None` means another thread is reading this inode; sleep on
    /// [`InodeCache::channel`] and try again. A full cache with nothing
    /// evictable is waited out here by yielding.
    pub fn find_or_add_pending(&self, fs: &MountedFs, fsop: Fsop) -> Option<IcacheLookup> {
        loop {
            let mut victim: Option<Arc<Inode>> = None;
            {
                let mut pool = self.pool.lock();

                if let Some(slot) = pool.entries.get(&fsop).map(|e| e.inode) {
                    let Some(id) = slot else {
                        log::trace!("[ICACHE] {fsop} pending elsewhere");
                        return None;
                    };
                    if let Some(inode) = fs.inodes().get(id) {
                        log::trace!("[ICACHE] hit {fsop}");
                        return Some(IcacheLookup::Cached(InodeRef::from_cache(&inode)));
                    }
                    log::error!("[ICACHE] entry {fsop} points at a freed inode");
                    pool.entries.pop(&fsop);
                }

                if pool.is_full() {
                    let found = pool.entries.iter().rev().find_map(|(key, e)| {
                        let inode = fs.inodes().get(e.inode?)?;
                        (inode.refcount() == 1 && !inode.is_pending()).then_some((*key, inode))
                    });
                    if let Some((key, inode)) = found {
                        log::trace!("[ICACHE] evict {key}");
                        pool.entries.pop(&key);
                        victim = Some(inode);
                    }
                }

                if !pool.is_full() {
                    let serial = pool.next_serial;
                    pool.next_serial += 1;
                    pool.entries.put(fsop, IcacheEntry { serial, inode: None });
                    drop(pool);
                    if let Some(inode) = victim {
                        drop(InodeRef::from_cache_hold(inode));
                    }
                    log::trace!("[ICACHE] miss {fsop}");
                    return Some(IcacheLookup::Fresh(PendingInode { fsop, serial }));
                }
            }
            // Inodes held only by dentries become evictable once released
            if !fs.dcache().shrink() {
                log::trace!("[ICACHE] full and pinned, yielding");
                self.scheduler.reschedule();
            }
        }
    }

    /// Attach a freshly read inode to its pending entry; the cache takes its
    /// own reference.
    pub fn set_pending(&self, pending: PendingInode, inode: &InodeRef) {
        let hold = inode.cache_hold();
        let stale = {
            let mut pool = self.pool.lock();
            match pool.current(&pending.fsop, pending.serial) {
                Some(entry) => {
                    entry.inode = Some(inode.id());
                    None
                }
                None => Some(hold),
            }
        };
        if let Some(hold) = stale {
            log::error!("[ICACHE] pending entry {} vanished", pending.fsop);
            drop(InodeRef::from_cache_hold(hold));
        }
        self.scheduler.wakeup(self.channel(&pending.fsop));
    }

    /// Give back a reservation whose `read_inode` failed.
    pub fn remove_pending(&self, pending: PendingInode) {
        {
            let mut pool = self.pool.lock();
            if pool.current(&pending.fsop, pending.serial).is_some() {
                pool.entries.pop(&pending.fsop);
            }
        }
        self.scheduler.wakeup(self.channel(&pending.fsop));
    }

    /// Forget any entry pointing at `id`. Used when the inode is reclaimed.
    pub fn remove_inode(&self, id: InodeId) -> bool {
        let mut pool = self.pool.lock();
        let key = pool
            .entries
            .iter()
            .find(|(_, e)| e.inode == Some(id))
            .map(|(k, _)| *k);
        key.and_then(|k| pool.entries.pop(&k)).is_some()
    }

    /// Drop the resolved entry for `fsop`, if any, releasing its reference.
    ///
    /// The next `get_inode` of the same FSOP reads a fresh inode even while
    /// the old one is still referenced.
    pub fn forget(&self, fsop: &Fsop, fs: &MountedFs) -> bool {
        let id = {
            let mut pool = self.pool.lock();
            match pool.entries.peek(fsop).and_then(|e| e.inode) {
                Some(id) => {
                    pool.entries.pop(fsop);
                    id
                }
                None => return false,
            }
        };
        if let Some(inode) = fs.inodes().get(id) {
            drop(InodeRef::from_cache_hold(inode));
        }
        true
    }

    /// Drop every resolved entry, releasing its reference.
    pub(crate) fn purge(&self, fs: &MountedFs) -> usize {
        let ids: Vec<InodeId> = {
            let mut pool = self.pool.lock();
            let resolved: Vec<Fsop> = pool
                .entries
                .iter()
                .filter(|(_, e)| e.inode.is_some())
                .map(|(k, _)| *k)
                .collect();
            let mut ids = Vec::with_capacity(resolved.len());
            for key in &resolved {
                if let Some(id) = pool.entries.pop(key).and_then(|e| e.inode) {
                    ids.push(id);
                }
            }
            ids
        };
        let count = ids.len();
        for id in ids {
            if let Some(inode) = fs.inodes().get(id) {
                drop(InodeRef::from_cache_hold(inode));
            }
        }
        count
    }

    pub fn is_pending(&self, fsop: &Fsop) -> bool {
        self.pool
            .lock()
            .entries
            .peek(fsop)
            .is_some_and(|e| e.inode.is_none())
    }

    pub fn contains(&self, fsop: &Fsop) -> bool {
        self.pool.lock().entries.contains(fsop)
    }

    pub fn channel(&self, fsop: &Fsop) -> WaitChannel {
        WaitChannel::new(self.fs_id, fsop.as_bytes())
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
    pub fn snapshot(&self) -> Vec<(Fsop, Option<InodeId>)> {
        self.pool
            .lock()
            .entries
            .iter()
            .map(|(fsop, e)| (*fsop, e.inode))
            .collect()
    }

    /// Log every entry at debug level.
    pub fn dump(&self, fs: &MountedFs) {
        let entries = self.snapshot();
        log::debug!(
            "[ICACHE] fs {} ({}): {}/{} entries",
            self.fs_id,
            fs.mountpoint(),
            entries.len(),
            self.capacity()
        );
        for (fsop, id) in entries {
            match id.and_then(|id| fs.inodes().get(id)) {
                Some(inode) => log::debug!(
                    "[ICACHE]   {fsop} -> refs {} (cache {}) mode {:o}",
                    inode.refcount(),
                    inode.cache_refs(),
                    inode.mode()
                ),
                None => log::debug!("[ICACHE]   {fsop} -> pending"),
            }
        }
    }
}
