//! TEAM_480: Path resolution
//!
//! Walks a `/`-separated path one component at a time. Each component is
//! looked up in the dcache of the directory's filesystem first; only a miss
//! reaches the driver's `lookup`, and its result (found or not) is cached.
//!
//! Mount points need no special casing: the dcache entry for a mount point
//! is a PERMANENT entry whose target is the mounted filesystem's root, so the
//! walk simply continues in the other filesystem.

extern crate alloc;

use crate::context::Vfs;
use crate::dcache::{DentryHandle, DentryLookup};
use crate::error::{VfsError, VfsResult};
use crate::inode::InodeRef;

/// Components that name something: empty ones (`//`, trailing `/`) and `.`
/// are skipped.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".")
}

/// TEAM_480: Split into (parent path, final component)
///
/// The parent of a relative single component is `""`, which resolves to the
/// starting directory.
pub fn split_parent(path: &str) -> VfsResult<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
        None => ("", trimmed),
    };
    if name.is_empty() || name == "." {
        return Err(VfsError::InvalidArgument);
    }
    Ok((parent, name))
}

/// Canonical absolute form, e.g. `/mnt//cd/` becomes `/mnt/cd`.
pub fn normalize(path: &str) -> VfsResult<alloc::string::String> {
    if !path.starts_with('/') {
        return Err(VfsError::InvalidArgument);
    }
    let mut out = alloc::string::String::new();
    for c in components(path) {
        out.push('/');
        out.push_str(c);
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

pub(crate) enum Step {
    Found {
        entry: DentryHandle,
        inode: InodeRef,
    },
    Missing {
        entry: DentryHandle,
        err: VfsError,
    },
}

/// TEAM_480: Resolve one component inside `dir`
pub(crate) fn step(dir: &InodeRef, name: &str) -> VfsResult<Step> {
    if !dir.is_dir() {
        return Err(VfsError::NotADirectory);
    }
    let fs = dir.fs()?;
    if !fs.is_sane() {
        return Err(VfsError::Io);
    }
    let dcache = fs.dcache();

    let lookup = loop {
        match dcache.find_or_add_pending(dir, name)? {
            Some(found) => break found,
            None => fs.scheduler().sleep(dcache.channel(dir.id(), name), &|| {
                dcache.is_pending(dir.id(), name)
            }),
        }
    };

    match lookup {
        DentryLookup::Positive { entry, inode } => Ok(Step::Found { entry, inode }),
        DentryLookup::Negative(entry) => Ok(Step::Missing {
            entry,
            err: VfsError::NotFound,
        }),
        DentryLookup::Fresh(entry) => match dir.ops().and_then(|ops| ops.lookup(dir, name)) {
            Ok(inode) => {
                dcache.set_resolved(&entry, Some(inode.clone()));
                Ok(Step::Found { entry, inode })
            }
            Err(err) => {
                log::trace!("[VFS] lookup '{name}' failed: {err}");
                dcache.set_resolved(&entry, None);
                Ok(Step::Missing { entry, err })
            }
        },
    }
}

pub(crate) enum Walk {
    Found(InodeRef),
    /// A component did not resolve. `dir` is the last directory reached and
    /// `entry` its (negative) dcache entry for the missing name.
    Missing {
        dir: InodeRef,
        entry: DentryHandle,
        last: bool,
        err: VfsError,
    },
}

/// TEAM_480: Walk `path` from `start`, or from the root
pub(crate) fn walk(vfs: &Vfs, start: Option<&InodeRef>, path: &str) -> VfsResult<Walk> {
    let mut cur = match start {
        Some(dir) if !path.starts_with('/') => dir.clone(),
        _ => vfs.root_inode()?,
    };
    let mut parts = components(path).peekable();
    while let Some(name) = parts.next() {
        let last = parts.peek().is_none();
        match step(&cur, name)? {
            Step::Found { inode, .. } => cur = inode,
            Step::Missing { entry, err } => {
                return Ok(Walk::Missing {
                    dir: cur,
                    entry,
                    last,
                    err,
                });
            }
        }
    }
    Ok(Walk::Found(cur))
}

/// TEAM_480: Resolve `path` to an inode
///
/// Relative paths start at `start`; absolute paths, or no `start`, at the
/// root filesystem. The returned reference is the caller's.
pub fn vfs_lookup(vfs: &Vfs, start: Option<&InodeRef>, path: &str) -> VfsResult<InodeRef> {
    match walk(vfs, start, path)? {
        Walk::Found(inode) => Ok(inode),
        Walk::Missing { err, .. } => Err(err),
    }
}

/// TEAM_480: Create a new object at `path`
///
/// Everything up to the final component must exist and the final component
/// must not. On success the new name is cached positive.
pub fn vfs_create(
    vfs: &Vfs,
    start: Option<&InodeRef>,
    path: &str,
    mode: u32,
) -> VfsResult<InodeRef> {
    let (_, name) = split_parent(path)?;
    loop {
        let (dir, entry) = match walk(vfs, start, path)? {
            Walk::Found(_) => return Err(VfsError::AlreadyExists),
            Walk::Missing {
                dir,
                entry,
                last: true,
                err: VfsError::NotFound,
            } => (dir, entry),
            Walk::Missing { err, .. } => return Err(err),
        };
        let fs = dir.fs()?;
        fs.check_writable()?;
        // Evicted, or resolved by a concurrent creator since the walk: the
        // next walk reports what is there now
        if !fs.dcache().claim_negative(&entry) {
            continue;
        }
        return match dir.ops().and_then(|ops| ops.create(&dir, name, mode)) {
            Ok(inode) => {
                fs.dcache().set_resolved(&entry, Some(inode.clone()));
                Ok(inode)
            }
            // The name exists after all: let the next lookup ask the driver
            Err(VfsError::AlreadyExists) => {
                fs.dcache().remove(&entry);
                Err(VfsError::AlreadyExists)
            }
            Err(e) => {
                fs.dcache().set_resolved(&entry, None);
                Err(e)
            }
        };
    }
}

/// TEAM_480: Remove the name at `path`
pub fn vfs_unlink(vfs: &Vfs, start: Option<&InodeRef>, path: &str) -> VfsResult<()> {
    let (parent, name) = split_parent(path)?;
    let dir = vfs_lookup(vfs, start, parent)?;
    let fs = dir.fs()?;
    fs.check_writable()?;
    let (entry, target) = match step(&dir, name)? {
        Step::Found { entry, inode } => (entry, inode),
        Step::Missing { err, .. } => return Err(err),
    };
    // Something is mounted here
    if target.fs()?.id() != fs.id() {
        return Err(VfsError::Busy);
    }
    dir.ops()?.unlink(&dir, name, &target)?;
    match fs.dcache().unlink(&entry) {
        // Already evicted: nothing cached to invalidate
        Ok(()) | Err(VfsError::NotFound) => {}
        Err(e) => return Err(e),
    }
    // The object is gone; a later object may reuse its FSOP
    if target.stat().nlink <= 1 {
        fs.icache().forget(target.fsop(), &fs);
    }
    Ok(())
}

/// TEAM_480: Move `old` to `new` within one filesystem
pub fn vfs_rename(vfs: &Vfs, start: Option<&InodeRef>, old: &str, new: &str) -> VfsResult<()> {
    let (old_parent, old_name) = split_parent(old)?;
    let (new_parent, new_name) = split_parent(new)?;
    let old_dir = vfs_lookup(vfs, start, old_parent)?;
    let new_dir = vfs_lookup(vfs, start, new_parent)?;
    if !new_dir.is_dir() {
        return Err(VfsError::NotADirectory);
    }
    let fs = old_dir.fs()?;
    if new_dir.fs()?.id() != fs.id() {
        return Err(VfsError::CrossDevice);
    }
    fs.check_writable()?;

    let (old_entry, target) = match step(&old_dir, old_name)? {
        Step::Found { entry, inode } => (entry, inode),
        Step::Missing { err, .. } => return Err(err),
    };
    if target.fs()?.id() != fs.id() {
        return Err(VfsError::Busy);
    }
    old_dir
        .ops()?
        .rename(&old_dir, old_name, &new_dir, new_name)?;

    match fs.dcache().unlink(&old_entry) {
        Ok(()) | Err(VfsError::NotFound) => {}
        Err(e) => return Err(e),
    }
    fs.dcache().invalidate(new_dir.id(), new_name);
    Ok(())
}
