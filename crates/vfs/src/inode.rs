//! TEAM_480: Inode Implementation
//!
//! An inode is the in-memory form of one filesystem object. Inodes live in a
//! per-filesystem arena ([`InodeTable`]) and are addressed by [`InodeId`];
//! everything that keeps one alive does so through an [`InodeRef`], which
//! counts itself in the inode's refcount and reclaims the inode when the last
//! one goes away.
//!
//! Two counters live under the inode lock:
//!
//! - `refcount`: every holder, including the caches.
//! - `cache_refs`: the part of `refcount` held by icache or dcache entries.
//!
//! When the two are equal nobody but the caches needs the inode, and a cache
//! is free to evict the entry holding it.

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;
use core::ops::Deref;

use bitflags::bitflags;
use los_utils::{Mutex, Slab};

use crate::error::{VfsError, VfsResult};
use crate::mode;
use crate::mount::MountedFs;
use crate::ops::InodeOps;

/// TEAM_480: Longest object identifier any filesystem may use
pub const MAX_FSOP_LEN: usize = 32;

/// TEAM_480: Filesystem object pointer
///
/// Opaque bytes that identify one on-disk object within a filesystem. Each
/// filesystem decides the length; the VFS only compares them.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fsop {
    len: u8,
    bytes: [u8; MAX_FSOP_LEN],
}

impl Fsop {
    pub fn new(bytes: &[u8]) -> VfsResult<Self> {
        if bytes.len() > MAX_FSOP_LEN {
            return Err(VfsError::InvalidArgument);
        }
        let mut buf = [0u8; MAX_FSOP_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            len: bytes.len() as u8,
            bytes: buf,
        })
    }

    /// Little-endian 4-byte identifier.
    pub fn from_u32(value: u32) -> Self {
        let mut bytes = [0u8; MAX_FSOP_LEN];
        bytes[..4].copy_from_slice(&value.to_le_bytes());
        Self { len: 4, bytes }
    }

    /// Little-endian 8-byte identifier.
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; MAX_FSOP_LEN];
        bytes[..8].copy_from_slice(&value.to_le_bytes());
        Self { len: 8, bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_u32(&self) -> Option<u32> {
        let raw: [u8; 4] = self.as_bytes().try_into().ok()?;
        Some(u32::from_le_bytes(raw))
    }

    pub fn as_u64(&self) -> Option<u64> {
        let raw: [u8; 8] = self.as_bytes().try_into().ok()?;
        Some(u64::from_le_bytes(raw))
    }
}

impl fmt::Display for Fsop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fsop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fsop({self})")
    }
}

/// TEAM_480: Arena slot of an inode within its filesystem
///
/// The generation tells apart successive inodes that reuse one slot, so an
/// id kept past reclaim never resolves to the slot's next occupant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InodeId {
    index: u32,
    generation: u32,
}

impl InodeId {
    /// Packed form, unique within one filesystem at any point in time.
    pub fn raw(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }
}

/// TEAM_480: stat-like metadata
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

bitflags! {
    /// TEAM_480: Inode state bits
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct InodeFlags: u32 {
        /// Allocated but not yet filled by `read_inode`
        const PENDING = 1 << 0;
        /// Metadata changed since the last `write_inode`
        const DIRTY = 1 << 1;
        /// Refcount reached zero; being torn down
        const GONE = 1 << 2;
    }
}

struct InodeState {
    refcount: u32,
    cache_refs: u32,
    flags: InodeFlags,
    stat: Stat,
    ops: Option<Arc<dyn InodeOps>>,
}

/// TEAM_480: In-memory filesystem object
pub struct Inode {
    id: InodeId,
    fsop: Fsop,
    fs: Weak<MountedFs>,
    state: Mutex<InodeState>,
    private: Mutex<Option<Box<dyn Any + Send + Sync>>>,
}

impl Inode {
    fn new(id: InodeId, fsop: Fsop, fs: Weak<MountedFs>) -> Self {
        Self {
            id,
            fsop,
            fs,
            state: Mutex::new(InodeState {
                refcount: 1,
                cache_refs: 0,
                flags: InodeFlags::PENDING,
                stat: Stat::default(),
                ops: None,
            }),
            private: Mutex::new(None),
        }
    }

    pub fn id(&self) -> InodeId {
        self.id
    }

    pub fn fsop(&self) -> &Fsop {
        &self.fsop
    }

    /// Owning filesystem; `Io` once it has been torn down.
    pub fn fs(&self) -> VfsResult<Arc<MountedFs>> {
        self.fs.upgrade().ok_or(VfsError::Io)
    }

    /// TEAM_480: Copy of the current metadata
    pub fn stat(&self) -> Stat {
        self.state.lock().stat
    }

    pub fn set_stat(&self, stat: Stat) {
        self.state.lock().stat = stat;
    }

    /// Mutate metadata in place under the inode lock.
    pub fn update_stat<R>(&self, f: impl FnOnce(&mut Stat) -> R) -> R {
        f(&mut self.state.lock().stat)
    }

    pub fn mode(&self) -> u32 {
        self.state.lock().stat.mode
    }

    pub fn size(&self) -> u64 {
        self.state.lock().stat.size
    }

    pub fn is_dir(&self) -> bool {
        mode::is_dir(self.mode())
    }

    pub fn is_file(&self) -> bool {
        mode::is_reg(self.mode())
    }

    /// Operations table; `BadOperation` if `read_inode` never set one.
    pub fn ops(&self) -> VfsResult<Arc<dyn InodeOps>> {
        self.state.lock().ops.clone().ok_or(VfsError::BadOperation)
    }

    pub fn set_ops(&self, ops: Arc<dyn InodeOps>) {
        self.state.lock().ops = Some(ops);
    }

    pub fn flags(&self) -> InodeFlags {
        self.state.lock().flags
    }

    pub fn is_pending(&self) -> bool {
        self.flags().contains(InodeFlags::PENDING)
    }

    pub(crate) fn clear_pending(&self) {
        self.state.lock().flags.remove(InodeFlags::PENDING);
    }

    pub fn mark_dirty(&self) {
        self.state.lock().flags.insert(InodeFlags::DIRTY);
    }

    pub fn is_dirty(&self) -> bool {
        self.flags().contains(InodeFlags::DIRTY)
    }

    /// Clear the dirty bit, returning whether it was set.
    pub(crate) fn take_dirty(&self) -> bool {
        let mut st = self.state.lock();
        let was = st.flags.contains(InodeFlags::DIRTY);
        st.flags.remove(InodeFlags::DIRTY);
        was
    }

    /// Current number of counted references (diagnostics).
    pub fn refcount(&self) -> u32 {
        self.state.lock().refcount
    }

    /// References held by cache entries (diagnostics).
    pub fn cache_refs(&self) -> u32 {
        self.state.lock().cache_refs
    }

    /// True when only cache entries keep this inode alive.
    pub(crate) fn is_cache_only(&self) -> bool {
        let st = self.state.lock();
        st.refcount == st.cache_refs
    }

    // ========================================================================
    // Filesystem-private data
    // ========================================================================

    pub fn set_private<T: Any + Send + Sync>(&self, data: T) {
        *self.private.lock() = Some(Box::new(data));
    }

    pub fn with_private<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.private.lock();
        guard.as_ref()?.downcast_ref::<T>().map(f)
    }

    pub fn with_private_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.private.lock();
        guard.as_mut()?.downcast_mut::<T>().map(f)
    }

    pub fn take_private(&self) -> Option<Box<dyn Any + Send + Sync>> {
        self.private.lock().take()
    }

    // ========================================================================
    // Reference counting
    // ========================================================================

    fn acquire(&self) {
        let mut st = self.state.lock();
        debug_assert!(st.refcount > 0, "acquire on dead inode {}", self.fsop);
        st.refcount += 1;
    }

    /// Drop one count; true when it was the last.
    fn release(&self) -> bool {
        let mut st = self.state.lock();
        if st.refcount == 0 {
            log::error!("[VFS] inode {} released with refcount 0", self.fsop);
            return false;
        }
        st.refcount -= 1;
        if st.refcount == 0 {
            st.flags.insert(InodeFlags::GONE);
            return true;
        }
        false
    }
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Inode")
            .field("fsop", &self.fsop)
            .field("refcount", &st.refcount)
            .field("cache_refs", &st.cache_refs)
            .field("flags", &st.flags)
            .field("mode", &format_args!("{:o}", st.stat.mode))
            .finish_non_exhaustive()
    }
}

/// TEAM_480: Counted reference to an inode
///
/// Cloning takes a reference, dropping gives it back. Dropping the last one
/// reclaims the inode: it leaves both caches, is written back if dirty and is
/// handed to the driver's `discard_inode` before its arena slot is freed.
pub struct InodeRef {
    inode: Arc<Inode>,
}

impl InodeRef {
    /// New counted reference to an inode some cache already keeps alive.
    pub(crate) fn from_cache(inode: &Arc<Inode>) -> Self {
        inode.acquire();
        Self {
            inode: Arc::clone(inode),
        }
    }

    /// Turn this reference into a cache hold.
    pub(crate) fn into_cache_hold(self) -> Arc<Inode> {
        let hold = self.cache_hold();
        drop(self);
        hold
    }

    /// Add a cache hold next to this reference.
    pub(crate) fn cache_hold(&self) -> Arc<Inode> {
        let mut st = self.inode.state.lock();
        st.refcount += 1;
        st.cache_refs += 1;
        Arc::clone(&self.inode)
    }

    /// Turn a cache hold back into an ordinary reference, usually to drop it.
    pub(crate) fn from_cache_hold(inode: Arc<Inode>) -> Self {
        {
            let mut st = inode.state.lock();
            debug_assert!(st.cache_refs > 0);
            st.cache_refs = st.cache_refs.saturating_sub(1);
        }
        Self { inode }
    }

    pub fn ptr_eq(a: &InodeRef, b: &InodeRef) -> bool {
        Arc::ptr_eq(&a.inode, &b.inode)
    }

    pub(crate) fn arc(&self) -> &Arc<Inode> {
        &self.inode
    }
}

impl Clone for InodeRef {
    fn clone(&self) -> Self {
        self.inode.acquire();
        Self {
            inode: Arc::clone(&self.inode),
        }
    }
}

impl Deref for InodeRef {
    type Target = Inode;

    fn deref(&self) -> &Inode {
        &self.inode
    }
}

impl Drop for InodeRef {
    fn drop(&mut self) {
        let last = self.inode.release();
        if let Some(fs) = self.inode.fs.upgrade() {
            if last {
                fs.reclaim(&self.inode);
            }
            fs.note_release();
        }
    }
}

impl fmt::Debug for InodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inode, f)
    }
}

struct TableSlot {
    generation: u32,
    inode: Arc<Inode>,
}

#[derive(Default)]
struct TableState {
    slab: Slab<TableSlot>,
    next_generation: u32,
}

/// TEAM_480: Per-filesystem inode arena
#[derive(Default)]
pub(crate) struct InodeTable {
    state: Mutex<TableState>,
}

impl InodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a pending inode with refcount 1, owned by the returned reference.
    pub fn alloc(&self, fsop: Fsop, fs: Weak<MountedFs>) -> InodeRef {
        let mut table = self.state.lock();
        let generation = table.next_generation;
        table.next_generation = generation.wrapping_add(1);
        let slot = table.slab.vacant_entry();
        let id = InodeId {
            index: slot.key() as u32,
            generation,
        };
        let inode = Arc::new(Inode::new(id, fsop, fs));
        slot.insert(TableSlot {
            generation,
            inode: Arc::clone(&inode),
        });
        InodeRef { inode }
    }

    pub fn get(&self, id: InodeId) -> Option<Arc<Inode>> {
        self.state
            .lock()
            .slab
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .map(|slot| Arc::clone(&slot.inode))
    }

    pub fn remove(&self, id: InodeId) -> Option<Arc<Inode>> {
        let mut table = self.state.lock();
        let current = table
            .slab
            .get(id.index as usize)
            .is_some_and(|slot| slot.generation == id.generation);
        if !current {
            return None;
        }
        table.slab.try_remove(id.index as usize).map(|slot| slot.inode)
    }

    pub fn len(&self) -> usize {
        self.state.lock().slab.len()
    }

    pub fn live(&self) -> Vec<Arc<Inode>> {
        self.state
            .lock()
            .slab
            .iter()
            .map(|(_, slot)| Arc::clone(&slot.inode))
            .collect()
    }
}
