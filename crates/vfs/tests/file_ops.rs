//! Open files: block-mapped I/O, device nodes, creation flags, seek and
//! namespace changes.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{Console, MockFs, MockState, ROOT, RamDisk, mount_mock, new_vfs, rooted};
use los_vfs::fs::{DevFs, devfs};
use los_vfs::mode::{S_IFCHR, S_IFDIR, S_IFREG, file_type, is_device};
use los_vfs::{
    DentryFlags, DirentIter, InodeRef, MountOptions, OpenFlags, SeekWhence, VfsConfig, VfsError,
    vfs_create_file, vfs_grow, vfs_lookup, vfs_mkdir, vfs_open, vfs_read, vfs_readdir,
    vfs_rename, vfs_seek, vfs_stat, vfs_unlink, vfs_write,
};

fn flags(bits: u32) -> OpenFlags {
    OpenFlags::new(bits)
}

#[test]
fn block_mapped_file_round_trips_through_device() {
    let vfs = new_vfs(VfsConfig::new());
    let disk = RamDisk::new("ram0", 512, 64);
    vfs.devices().register(disk.clone()).unwrap();
    let state = MockState::new();
    state.block_mapped.store(true, Ordering::SeqCst);
    let id = state.add_file(ROOT, "data", b"");
    vfs.register_filesystem("mock", Arc::new(MockFs(Arc::clone(&state))))
        .unwrap();
    let fs = vfs
        .mount(Some("ram0"), "/", "mock", MountOptions::default())
        .unwrap();
    assert_eq!(fs.block_size(), 512);

    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let mut file = vfs_open(&vfs, None, "/data", flags(OpenFlags::O_RDWR), 0).unwrap();
    assert_eq!(vfs_write(&mut file, &payload), Ok(1000));
    assert_eq!(vfs_stat(&file).unwrap().size, 1000);
    assert_eq!(vfs_stat(&file).unwrap().blocks, 2);

    // Blocks are handed out in order starting at 1
    assert_eq!(disk.block(1), payload[..512]);
    assert_eq!(disk.block(2)[..488], payload[512..]);

    vfs_seek(&mut file, 0, SeekWhence::Set).unwrap();
    let mut back = vec![0u8; 2000];
    assert_eq!(vfs_read(&mut file, &mut back), Ok(1000));
    assert_eq!(back[..1000], payload[..]);

    // Straddle the block boundary: both blocks are read, patched, written
    vfs_seek(&mut file, 510, SeekWhence::Set).unwrap();
    assert_eq!(vfs_write(&mut file, b"XYZW"), Ok(4));
    assert_eq!(vfs_stat(&file).unwrap().size, 1000);
    vfs_seek(&mut file, 508, SeekWhence::Set).unwrap();
    let mut window = [0u8; 8];
    assert_eq!(vfs_read(&mut file, &mut window), Ok(8));
    assert_eq!(window[..2], payload[508..510]);
    assert_eq!(&window[2..6], b"XYZW");
    assert_eq!(window[6..], payload[514..516]);

    // Size reaches the driver only on write-back
    assert_eq!(state.node(id).unwrap().size, 0);
    let inode = vfs_lookup(&vfs, None, "/data").unwrap();
    fs.sync_inode(&inode).unwrap();
    assert_eq!(state.node(id).unwrap().size, 1000);
    assert_eq!(state.write_inodes.load(Ordering::SeqCst), 1);
    fs.sync_inode(&inode).unwrap();
    assert_eq!(state.write_inodes.load(Ordering::SeqCst), 1);
}

#[test]
fn dirty_inode_is_written_back_on_unmount() {
    let (vfs, outer, _root_fs) = rooted(VfsConfig::new());
    outer.add_dir(ROOT, "mnt");
    let disk = RamDisk::new("ram1", 512, 8);
    vfs.devices().register(disk).unwrap();
    let inner = MockState::new();
    inner.block_mapped.store(true, Ordering::SeqCst);
    let id = inner.add_file(ROOT, "log", b"");
    vfs.register_filesystem("inner", Arc::new(MockFs(Arc::clone(&inner))))
        .unwrap();
    vfs.mount(Some("ram1"), "/mnt", "inner", MountOptions::default())
        .unwrap();

    let mut file = vfs_open(&vfs, None, "/mnt/log", flags(OpenFlags::O_WRONLY), 0).unwrap();
    assert_eq!(vfs_write(&mut file, b"entry"), Ok(5));
    drop(file);
    assert_eq!(inner.write_inodes.load(Ordering::SeqCst), 0);

    vfs.unmount("/mnt").unwrap();
    assert_eq!(inner.write_inodes.load(Ordering::SeqCst), 1);
    assert_eq!(inner.node(id).unwrap().size, 5);
}

#[test]
fn devfs_lists_and_opens_devices() {
    let (vfs, state, _fs) = rooted(VfsConfig::new());
    state.add_dir(ROOT, "dev");
    let console = Console::new("console");
    vfs.devices().register(console.clone()).unwrap();
    vfs.devices().register(RamDisk::new("ram0", 512, 4)).unwrap();
    vfs.register_filesystem(devfs::FSTYPE, Arc::new(DevFs::new()))
        .unwrap();
    vfs.mount(None, "/dev", devfs::FSTYPE, MountOptions::default())
        .unwrap();

    let mut dir = vfs_open(
        &vfs,
        None,
        "/dev",
        flags(OpenFlags::O_RDONLY | OpenFlags::O_DIRECTORY),
        0,
    )
    .unwrap();
    let mut buf = [0u8; 256];
    let n = vfs_readdir(&mut dir, &mut buf).unwrap();
    let names: Vec<String> = DirentIter::new(&buf[..n])
        .map(|d| d.name.to_string())
        .collect();
    assert_eq!(names, ["console", "ram0"]);
    assert_eq!(vfs_readdir(&mut dir, &mut buf), Ok(0));

    let node = vfs_lookup(&vfs, None, "/dev/console").unwrap();
    assert_eq!(file_type(node.mode()), S_IFCHR);
    let disk = vfs_lookup(&vfs, None, "/dev/ram0").unwrap();
    assert!(is_device(disk.mode()));
    assert_eq!(
        vfs_lookup(&vfs, None, "/dev/nothing").err(),
        Some(VfsError::NotFound)
    );

    let mut tty = vfs_open(&vfs, None, "/dev/console", flags(OpenFlags::O_RDWR), 0).unwrap();
    assert!(tty.device().is_some());
    let mut greeting = [0u8; 5];
    assert_eq!(vfs_read(&mut tty, &mut greeting), Ok(5));
    assert_eq!(&greeting, b"hello");
    assert_eq!(vfs_write(&mut tty, b"hi"), Ok(2));
    assert_eq!(console.written.lock().unwrap().as_slice(), b"hi");
    // Device files seek freely
    assert_eq!(vfs_seek(&mut tty, 4096, SeekWhence::Set), Ok(4096));
    assert_eq!(vfs_stat(&tty).unwrap().rdev, 0);

    let mut ro = vfs_open(&vfs, None, "/dev/console", flags(OpenFlags::O_RDONLY), 0).unwrap();
    assert_eq!(vfs_write(&mut ro, b"x"), Err(VfsError::BadHandle));
}

#[test]
fn create_and_exclusive_flags() {
    let (vfs, state, _fs) = rooted(VfsConfig::new());
    let create = OpenFlags::O_RDWR | OpenFlags::O_CREAT;

    let mut file = vfs_open(&vfs, None, "/new", flags(create), 0o600).unwrap();
    assert_eq!(state.creates.load(Ordering::SeqCst), 1);
    let st = vfs_stat(&file).unwrap();
    assert_eq!(file_type(st.mode), S_IFREG);
    assert_eq!(st.mode & 0o777, 0o600);
    assert_eq!(vfs_write(&mut file, b"abc"), Ok(3));

    let err = vfs_open(&vfs, None, "/new", flags(create | OpenFlags::O_EXCL), 0o600).err();
    assert_eq!(err, Some(VfsError::AlreadyExists));
    let again = vfs_open(&vfs, None, "/new", flags(create), 0o600).unwrap();
    assert_eq!(vfs_stat(&again).unwrap().size, 3);
    assert_eq!(state.creates.load(Ordering::SeqCst), 1);

    let err = vfs_open(&vfs, None, "/absent", flags(OpenFlags::O_RDONLY), 0).err();
    assert_eq!(err, Some(VfsError::NotFound));
    let err = vfs_open(
        &vfs,
        None,
        "/new",
        flags(OpenFlags::O_RDONLY | OpenFlags::O_DIRECTORY),
        0,
    )
    .err();
    assert_eq!(err, Some(VfsError::NotADirectory));
    let err = vfs_open(&vfs, None, "/", flags(OpenFlags::O_RDWR), 0).err();
    assert_eq!(err, Some(VfsError::BadOperation));
}

#[test]
fn mkdir_and_list_in_small_chunks() {
    let (vfs, _state, _fs) = rooted(VfsConfig::new());

    let dir = vfs_mkdir(&vfs, None, "/sub", 0o755).unwrap();
    assert_eq!(file_type(dir.mode()), S_IFDIR);
    for name in ["x", "y", "z"] {
        vfs_create_file(&vfs, Some(&dir), name, 0o644).unwrap();
    }

    let mut listing = vfs_open(&vfs, None, "/sub", flags(OpenFlags::O_RDONLY), 0).unwrap();
    // Room for exactly one record per call
    let mut buf = [0u8; 20];
    let mut names = Vec::new();
    loop {
        let n = vfs_read(&mut listing, &mut buf).unwrap();
        if n == 0 {
            break;
        }
        let batch: Vec<_> = DirentIter::new(&buf[..n]).collect();
        assert_eq!(batch.len(), 1);
        names.push(batch[0].name.to_string());
    }
    assert_eq!(names, ["x", "y", "z"]);
}

#[test]
fn unlink_leaves_negative_entry() {
    let (vfs, state, fs) = rooted(VfsConfig::new());
    state.add_file(ROOT, "gone", b"bye");
    drop(vfs_lookup(&vfs, None, "/gone").unwrap());

    vfs_unlink(&vfs, None, "/gone").unwrap();
    assert_eq!(state.child(ROOT, "gone"), None);
    let root = fs.root().unwrap();
    let entry = fs.dcache().flags_of(root.id(), "gone").unwrap();
    assert!(entry.contains(DentryFlags::NEGATIVE));

    assert_eq!(vfs_lookup(&vfs, None, "/gone").err(), Some(VfsError::NotFound));
    assert_eq!(state.lookup_count("gone"), 1);
    assert_eq!(vfs_unlink(&vfs, None, "/gone").err(), Some(VfsError::NotFound));
}

#[test]
fn unlinked_object_id_can_be_reused() {
    let (vfs, state, fs) = rooted(VfsConfig::new());
    let id = state.add_file(ROOT, "old", b"old contents");
    let held = vfs_lookup(&vfs, None, "/old").unwrap();
    assert_eq!(held.size(), 12);

    vfs_unlink(&vfs, None, "/old").unwrap();
    assert!(!fs.icache().contains(held.fsop()));
    state.add_file_at(ROOT, "new", id, b"new");

    let fresh = vfs_lookup(&vfs, None, "/new").unwrap();
    assert_eq!(fresh.fsop().as_u32(), Some(id));
    assert_eq!(fresh.size(), 3);
    assert!(!InodeRef::ptr_eq(&held, &fresh));
    // The unlinked inode stays usable until its last reference goes
    assert_eq!(held.size(), 12);
    assert_eq!(state.discards_of(id), 0);
    drop(held);
    assert_eq!(state.discards_of(id), 1);

    let again = vfs_lookup(&vfs, None, "/new").unwrap();
    assert!(InodeRef::ptr_eq(&fresh, &again));
}

#[test]
fn zero_block_size_is_refused() {
    let (_vfs, _state, fs) = rooted(VfsConfig::new());
    assert_eq!(fs.set_block_size(0), Err(VfsError::InvalidArgument));
    assert_eq!(fs.block_size(), 512);
    assert_eq!(fs.set_block_size(1024), Ok(()));
    assert_eq!(fs.block_size(), 1024);
}

#[test]
fn unlink_of_mount_point_is_busy() {
    let (vfs, outer, _fs) = rooted(VfsConfig::new());
    outer.add_dir(ROOT, "mnt");
    let inner = MockState::new();
    mount_mock(&vfs, "inner", "/mnt", &inner).unwrap();

    assert_eq!(vfs_unlink(&vfs, None, "/mnt").err(), Some(VfsError::Busy));
    assert!(outer.child(ROOT, "mnt").is_some());
}

#[test]
fn rename_moves_cached_names() {
    let (vfs, state, _fs) = rooted(VfsConfig::new());
    let a = state.add_dir(ROOT, "a");
    state.add_dir(ROOT, "b");
    let f = state.add_file(a, "f", b"x");

    drop(vfs_lookup(&vfs, None, "/a/f").unwrap());
    assert_eq!(vfs_lookup(&vfs, None, "/b/g").err(), Some(VfsError::NotFound));

    vfs_rename(&vfs, None, "/a/f", "/b/g").unwrap();
    assert_eq!(vfs_lookup(&vfs, None, "/a/f").err(), Some(VfsError::NotFound));
    assert_eq!(state.lookup_count("f"), 1);

    // The stale negative entry for the new name is gone
    let moved = vfs_lookup(&vfs, None, "/b/g").unwrap();
    assert_eq!(moved.fsop().as_u32(), Some(f));
    assert_eq!(state.lookup_count("g"), 2);

    let err = vfs_rename(&vfs, None, "/a/nothing", "/b/h").err();
    assert_eq!(err, Some(VfsError::NotFound));
}

#[test]
fn rename_across_filesystems_is_refused() {
    let (vfs, outer, _fs) = rooted(VfsConfig::new());
    outer.add_dir(ROOT, "mnt");
    outer.add_file(ROOT, "f", b"");
    let inner = MockState::new();
    mount_mock(&vfs, "inner", "/mnt", &inner).unwrap();

    let err = vfs_rename(&vfs, None, "/f", "/mnt/f").err();
    assert_eq!(err, Some(VfsError::CrossDevice));
    assert!(outer.child(ROOT, "f").is_some());
}

#[test]
fn seek_grow_and_append() {
    let (vfs, state, _fs) = rooted(VfsConfig::new());
    let id = state.add_file(ROOT, "f", b"0123456789");

    let mut file = vfs_open(&vfs, None, "/f", flags(OpenFlags::O_RDWR), 0).unwrap();
    assert_eq!(vfs_seek(&mut file, 0, SeekWhence::End), Ok(10));
    assert_eq!(vfs_seek(&mut file, 11, SeekWhence::Set), Err(VfsError::OutOfRange));
    assert_eq!(vfs_seek(&mut file, -20, SeekWhence::Current), Err(VfsError::InvalidArgument));
    assert_eq!(vfs_seek(&mut file, 4, SeekWhence::Set), Ok(4));
    let mut three = [0u8; 3];
    assert_eq!(vfs_read(&mut file, &mut three), Ok(3));
    assert_eq!(&three, b"456");

    vfs_grow(&mut file, 20).unwrap();
    assert_eq!(file.offset(), 7);
    assert_eq!(vfs_stat(&file).unwrap().size, 20);
    let node = state.node(id).unwrap();
    assert_eq!(&node.data[..10], b"0123456789");
    assert!(node.data[10..].iter().all(|&b| b == 0));
    // Growing to a smaller size changes nothing
    vfs_grow(&mut file, 5).unwrap();
    assert_eq!(vfs_stat(&file).unwrap().size, 20);

    let mut log = vfs_open(
        &vfs,
        None,
        "/f",
        flags(OpenFlags::O_WRONLY | OpenFlags::O_APPEND),
        0,
    )
    .unwrap();
    assert_eq!(vfs_write(&mut log, b"!!"), Ok(2));
    assert_eq!(&state.node(id).unwrap().data[20..], b"!!");
    assert_eq!(vfs_stat(&log).unwrap().size, 22);

    let mut buf = [0u8; 4];
    assert_eq!(vfs_read(&mut log, &mut buf), Err(VfsError::BadHandle));
    assert_eq!(vfs_readdir(&mut file, &mut buf), Err(VfsError::NotADirectory));

    let mut ro = vfs_open(&vfs, None, "/f", flags(OpenFlags::O_RDONLY), 0).unwrap();
    assert_eq!(vfs_grow(&mut ro, 40), Err(VfsError::BadHandle));
}
