//! Shared fixtures for the VFS integration tests: a call-counting in-memory
//! filesystem driver, RAM and character devices, and VFS builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use los_vfs::generic;
use los_vfs::mode::{S_IFDIR, S_IFREG};
use los_vfs::{
    BlockError, Device, DeviceKind, DirentWriter, File, FilesystemOps, Fsop, Inode, InodeOps,
    InodeRef, MountOptions, MountedFs, Stat, ThreadScheduler, Vfs, VfsConfig, VfsError,
    VfsResult,
};

pub const ROOT: u32 = 0;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Mock filesystem
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct Node {
    pub mode: u32,
    pub size: u64,
    pub children: Vec<(String, u32)>,
    pub data: Vec<u8>,
    /// Device blocks backing the file, when block-mapped
    pub blocks: Vec<u64>,
}

/// Tree and call counters shared by the driver and the test.
#[derive(Default)]
pub struct MockState {
    nodes: Mutex<HashMap<u32, Node>>,
    next_id: AtomicU32,
    next_block: AtomicU64,
    /// Route file I/O through `generic::read`/`write` and `block_map`
    pub block_mapped: AtomicBool,
    pub fail_mount: AtomicBool,
    /// Delay applied to every `lookup` of a name in `slow_names`
    pub slow_names: Mutex<Vec<String>>,
    pub lookups: Mutex<HashMap<String, usize>>,
    pub read_inodes: AtomicUsize,
    pub creates: AtomicUsize,
    pub write_inodes: AtomicUsize,
    pub unmounts: AtomicUsize,
    pub discarded: Mutex<Vec<u32>>,
}

impl MockState {
    pub fn new() -> Arc<Self> {
        let state = Self::default();
        state.nodes.lock().unwrap().insert(
            ROOT,
            Node {
                mode: S_IFDIR | 0o755,
                ..Node::default()
            },
        );
        state.next_id.store(1, Ordering::SeqCst);
        state.next_block.store(1, Ordering::SeqCst);
        Arc::new(state)
    }

    fn add(&self, parent: u32, name: &str, node: Node) -> u32 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.insert_at(parent, name, id, node)
    }

    fn insert_at(&self, parent: u32, name: &str, id: u32, node: Node) -> u32 {
        let mut nodes = self.nodes.lock().unwrap();
        nodes.insert(id, node);
        nodes
            .get_mut(&parent)
            .expect("parent exists")
            .children
            .push((name.to_string(), id));
        id
    }

    pub fn add_dir(&self, parent: u32, name: &str) -> u32 {
        self.add(
            parent,
            name,
            Node {
                mode: S_IFDIR | 0o755,
                ..Node::default()
            },
        )
    }

    pub fn add_file(&self, parent: u32, name: &str, data: &[u8]) -> u32 {
        self.add(
            parent,
            name,
            Node {
                mode: S_IFREG | 0o644,
                size: data.len() as u64,
                data: data.to_vec(),
                ..Node::default()
            },
        )
    }

    /// New file under an object id freed by an earlier unlink.
    pub fn add_file_at(&self, parent: u32, name: &str, id: u32, data: &[u8]) -> u32 {
        self.insert_at(
            parent,
            name,
            id,
            Node {
                mode: S_IFREG | 0o644,
                size: data.len() as u64,
                data: data.to_vec(),
                ..Node::default()
            },
        )
    }

    pub fn node(&self, id: u32) -> Option<Node> {
        self.nodes.lock().unwrap().get(&id).cloned()
    }

    pub fn child(&self, dir: u32, name: &str) -> Option<u32> {
        let nodes = self.nodes.lock().unwrap();
        nodes
            .get(&dir)?
            .children
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    pub fn lookup_count(&self, name: &str) -> usize {
        self.lookups.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn total_lookups(&self) -> usize {
        self.lookups.lock().unwrap().values().sum()
    }

    pub fn discards_of(&self, id: u32) -> usize {
        self.discarded
            .lock()
            .unwrap()
            .iter()
            .filter(|&&d| d == id)
            .count()
    }

    pub fn discard_count(&self) -> usize {
        self.discarded.lock().unwrap().len()
    }

    pub fn set_slow(&self, name: &str) {
        self.slow_names.lock().unwrap().push(name.to_string());
    }
}

fn node_id(inode: &Inode) -> VfsResult<u32> {
    inode.fsop().as_u32().ok_or(VfsError::InvalidArgument)
}

pub struct MockFs(pub Arc<MockState>);

impl FilesystemOps for MockFs {
    fn mount(&self, fs: &MountedFs) -> VfsResult<InodeRef> {
        if self.0.fail_mount.load(Ordering::SeqCst) {
            return Err(VfsError::NoDevice);
        }
        fs.set_fsop_size(4);
        fs.get_inode(&Fsop::from_u32(ROOT))
    }

    fn unmount(&self, _fs: &MountedFs) -> VfsResult<()> {
        self.0.unmounts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn discard_inode(&self, inode: &Inode) {
        if let Some(id) = inode.fsop().as_u32() {
            self.0.discarded.lock().unwrap().push(id);
        }
    }

    fn read_inode(&self, inode: &Inode, fsop: &Fsop) -> VfsResult<()> {
        self.0.read_inodes.fetch_add(1, Ordering::SeqCst);
        let id = fsop.as_u32().ok_or(VfsError::InvalidArgument)?;
        let node = self.0.node(id).ok_or(VfsError::NotFound)?;
        inode.set_stat(Stat {
            ino: u64::from(id),
            mode: node.mode,
            nlink: 1,
            size: node.size,
            blocks: node.blocks.len() as u64,
            blksize: 512,
            ..Stat::default()
        });
        inode.set_ops(Arc::new(MockOps(Arc::clone(&self.0))));
        Ok(())
    }

    fn write_inode(&self, inode: &Inode) -> VfsResult<()> {
        self.0.write_inodes.fetch_add(1, Ordering::SeqCst);
        let id = node_id(inode)?;
        if let Some(node) = self.0.nodes.lock().unwrap().get_mut(&id) {
            node.size = inode.size();
        }
        Ok(())
    }
}

struct MockOps(Arc<MockState>);

impl InodeOps for MockOps {
    fn lookup(&self, dir: &InodeRef, name: &str) -> VfsResult<InodeRef> {
        *self
            .0
            .lookups
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default() += 1;
        if self.0.slow_names.lock().unwrap().iter().any(|n| n == name) {
            std::thread::sleep(Duration::from_millis(150));
        }
        let child = self
            .0
            .child(node_id(dir)?, name)
            .ok_or(VfsError::NotFound)?;
        dir.fs()?.get_inode(&Fsop::from_u32(child))
    }

    fn readdir(&self, file: &mut File, out: &mut DirentWriter<'_>) -> VfsResult<()> {
        let dir = file.inode().ok_or(VfsError::BadHandle)?;
        let node = self.0.node(node_id(dir)?).ok_or(VfsError::Io)?;
        let mut next = file.offset() as usize;
        for (name, id) in node.children.iter().skip(next) {
            if !out.push(&Fsop::from_u32(*id), name) {
                break;
            }
            next += 1;
        }
        file.set_offset(next as u64);
        Ok(())
    }

    fn create(&self, dir: &InodeRef, name: &str, mode: u32) -> VfsResult<InodeRef> {
        self.0.creates.fetch_add(1, Ordering::SeqCst);
        let parent = node_id(dir)?;
        if self.0.child(parent, name).is_some() {
            return Err(VfsError::AlreadyExists);
        }
        let id = self.0.add(
            parent,
            name,
            Node {
                mode,
                ..Node::default()
            },
        );
        dir.fs()?.get_inode(&Fsop::from_u32(id))
    }

    fn unlink(&self, dir: &InodeRef, name: &str, _target: &InodeRef) -> VfsResult<()> {
        let parent = node_id(dir)?;
        let mut nodes = self.0.nodes.lock().unwrap();
        let children = &mut nodes.get_mut(&parent).ok_or(VfsError::Io)?.children;
        let before = children.len();
        children.retain(|(n, _)| n != name);
        if children.len() == before {
            return Err(VfsError::NotFound);
        }
        Ok(())
    }

    fn rename(
        &self,
        old_dir: &InodeRef,
        old_name: &str,
        new_dir: &InodeRef,
        new_name: &str,
    ) -> VfsResult<()> {
        let (from, to) = (node_id(old_dir)?, node_id(new_dir)?);
        let mut nodes = self.0.nodes.lock().unwrap();
        let src = &mut nodes.get_mut(&from).ok_or(VfsError::Io)?.children;
        let pos = src
            .iter()
            .position(|(n, _)| n == old_name)
            .ok_or(VfsError::NotFound)?;
        let (_, id) = src.remove(pos);
        let dst = &mut nodes.get_mut(&to).ok_or(VfsError::Io)?.children;
        dst.retain(|(n, _)| n != new_name);
        dst.push((new_name.to_string(), id));
        Ok(())
    }

    fn read(&self, file: &mut File, buf: &mut [u8]) -> VfsResult<usize> {
        if self.0.block_mapped.load(Ordering::SeqCst) {
            return generic::read(file, buf);
        }
        let inode = file.inode().ok_or(VfsError::BadHandle)?;
        let node = self.0.node(node_id(inode)?).ok_or(VfsError::Io)?;
        let start = (file.offset() as usize).min(node.data.len());
        let n = buf.len().min(node.data.len() - start);
        buf[..n].copy_from_slice(&node.data[start..start + n]);
        file.advance(n);
        Ok(n)
    }

    fn write(&self, file: &mut File, buf: &[u8]) -> VfsResult<usize> {
        if self.0.block_mapped.load(Ordering::SeqCst) {
            return generic::write(file, buf);
        }
        let inode = file.inode().cloned().ok_or(VfsError::BadHandle)?;
        let id = node_id(&inode)?;
        let end = file.offset() as usize + buf.len();
        {
            let mut nodes = self.0.nodes.lock().unwrap();
            let node = nodes.get_mut(&id).ok_or(VfsError::Io)?;
            if node.data.len() < end {
                node.data.resize(end, 0);
            }
            node.data[end - buf.len()..end].copy_from_slice(buf);
        }
        inode.update_stat(|st| st.size = st.size.max(end as u64));
        inode.mark_dirty();
        file.advance(buf.len());
        Ok(buf.len())
    }

    fn block_map(&self, inode: &Inode, logical: u64, create: bool) -> VfsResult<u64> {
        let id = node_id(inode)?;
        let mut nodes = self.0.nodes.lock().unwrap();
        let node = nodes.get_mut(&id).ok_or(VfsError::Io)?;
        if let Some(block) = node.blocks.get(logical as usize) {
            return Ok(*block);
        }
        if !create || logical as usize != node.blocks.len() {
            return Err(VfsError::OutOfRange);
        }
        let block = self.0.next_block.fetch_add(1, Ordering::SeqCst);
        node.blocks.push(block);
        Ok(block)
    }
}

// ============================================================================
// Devices
// ============================================================================

pub struct RamDisk {
    name: String,
    block_size: usize,
    data: Mutex<Vec<u8>>,
}

impl RamDisk {
    pub fn new(name: &str, block_size: usize, blocks: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            block_size,
            data: Mutex::new(vec![0; block_size * blocks]),
        })
    }

    pub fn block(&self, block: u64) -> Vec<u8> {
        let start = block as usize * self.block_size;
        self.data.lock().unwrap()[start..start + self.block_size].to_vec()
    }
}

impl Device for RamDisk {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Block
    }

    fn read(&self, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        let data = self.data.lock().unwrap();
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn read_block(&self, block: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        if buf.len() != self.block_size {
            return Err(BlockError::BadBufferSize);
        }
        let start = block as usize * self.block_size;
        let data = self.data.lock().unwrap();
        let src = data
            .get(start..start + self.block_size)
            .ok_or(BlockError::OutOfRange)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_block(&self, block: u64, buf: &[u8]) -> Result<(), BlockError> {
        if buf.len() != self.block_size {
            return Err(BlockError::BadBufferSize);
        }
        let start = block as usize * self.block_size;
        let mut data = self.data.lock().unwrap();
        let dst = data
            .get_mut(start..start + self.block_size)
            .ok_or(BlockError::OutOfRange)?;
        dst.copy_from_slice(buf);
        Ok(())
    }
}

/// Character device that records writes and reads back a fixed greeting.
pub struct Console {
    name: String,
    pub written: Mutex<Vec<u8>>,
}

impl Console {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            written: Mutex::new(Vec::new()),
        })
    }
}

impl Device for Console {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Char
    }

    fn read(&self, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        const GREETING: &[u8] = b"hello from console";
        let start = (offset as usize).min(GREETING.len());
        let n = buf.len().min(GREETING.len() - start);
        buf[..n].copy_from_slice(&GREETING[start..start + n]);
        Ok(n)
    }

    fn write(&self, buf: &[u8], _offset: u64) -> VfsResult<usize> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn new_vfs(config: VfsConfig) -> Vfs {
    init_logging();
    Vfs::new(config, Arc::new(ThreadScheduler::new()))
}

/// Register a fresh mock driver as `fstype` and mount it at `mountpoint`.
pub fn mount_mock(
    vfs: &Vfs,
    fstype: &str,
    mountpoint: &str,
    state: &Arc<MockState>,
) -> VfsResult<Arc<MountedFs>> {
    vfs.register_filesystem(fstype, Arc::new(MockFs(Arc::clone(state))))?;
    vfs.mount(None, mountpoint, fstype, MountOptions::default())
}

/// VFS with a mock filesystem mounted at "/".
pub fn rooted(config: VfsConfig) -> (Vfs, Arc<MockState>, Arc<MountedFs>) {
    let vfs = new_vfs(config);
    let state = MockState::new();
    let fs = mount_mock(&vfs, "mock", "/", &state).expect("root mount");
    (vfs, state, fs)
}
