//! TEAM_480: Generic operations for block-mapped filesystems
//!
//! Drivers whose files are arrays of device blocks only have to provide
//! `block_map` and `readdir`; `lookup`, `read` and `write` can then be
//! delegated here.
//!
//! Directory listings travel in a packed record format:
//!
//! ```text
//! +-------+----------+----------+------------+------------+-----+
//! | flags | fsop_len | name_len | fsop bytes | name bytes | NUL |
//! | u32le | u8       | u8       |            |            |     |
//! +-------+----------+----------+------------+------------+-----+
//! ```

extern crate alloc;

use alloc::vec;

use crate::error::{VfsError, VfsResult};
use crate::file::{File, OpenFlags};
use crate::inode::{Fsop, InodeRef};

const DIRENT_HEADER: usize = 6;

/// Scratch buffer size used when scanning a directory.
const SCAN_BUF_LEN: usize = 1024;

/// Bytes one record takes.
pub const fn dirent_len(fsop_len: usize, name_len: usize) -> usize {
    DIRENT_HEADER + fsop_len + name_len + 1
}

/// TEAM_480: Fills a caller buffer with directory records
pub struct DirentWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
    count: usize,
}

impl<'a> DirentWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            len: 0,
            count: 0,
        }
    }

    /// Append one record. False once the buffer cannot take it; the caller
    /// should stop and resume from the same entry next time.
    pub fn push(&mut self, fsop: &Fsop, name: &str) -> bool {
        self.push_with_flags(0, fsop, name)
    }

    pub fn push_with_flags(&mut self, flags: u32, fsop: &Fsop, name: &str) -> bool {
        let Ok(name_len) = u8::try_from(name.len()) else {
            // Unrepresentable; drop it rather than stall the listing
            log::warn!("[VFS] dirent name of {} bytes skipped", name.len());
            return true;
        };
        let need = dirent_len(fsop.len(), name.len());
        if self.buf.len() - self.len < need {
            return false;
        }
        let rec = &mut self.buf[self.len..self.len + need];
        rec[..4].copy_from_slice(&flags.to_le_bytes());
        rec[4] = fsop.len() as u8;
        rec[5] = name_len;
        let name_at = DIRENT_HEADER + fsop.len();
        rec[DIRENT_HEADER..name_at].copy_from_slice(fsop.as_bytes());
        rec[name_at..name_at + name.len()].copy_from_slice(name.as_bytes());
        rec[need - 1] = 0;
        self.len += need;
        self.count += 1;
        true
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// TEAM_480: One decoded directory record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dirent<'a> {
    pub flags: u32,
    pub fsop: Fsop,
    pub name: &'a str,
}

/// TEAM_480: Iterator over records produced by [`DirentWriter`]
///
/// Stops at the first truncated or malformed record.
pub struct DirentIter<'a> {
    buf: &'a [u8],
}

impl<'a> DirentIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for DirentIter<'a> {
    type Item = Dirent<'a>;

    fn next(&mut self) -> Option<Dirent<'a>> {
        let header = self.buf.get(..DIRENT_HEADER)?;
        let flags = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let fsop_len = header[4] as usize;
        let name_len = header[5] as usize;
        let need = dirent_len(fsop_len, name_len);
        let rec = self.buf.get(..need)?;
        let name_at = DIRENT_HEADER + fsop_len;
        let fsop = Fsop::new(&rec[DIRENT_HEADER..name_at]).ok()?;
        let name = core::str::from_utf8(&rec[name_at..name_at + name_len]).ok()?;
        self.buf = &self.buf[need..];
        Some(Dirent { flags, fsop, name })
    }
}

/// TEAM_480: Find `name` by listing `dir`, then read its inode
pub fn lookup(dir: &InodeRef, name: &str) -> VfsResult<InodeRef> {
    let fs = dir.fs()?;
    let mut file = File::new(dir.clone(), OpenFlags::new(OpenFlags::O_RDONLY));
    let mut buf = vec![0u8; SCAN_BUF_LEN];
    let found = loop {
        if !fs.is_sane() {
            return Err(VfsError::Io);
        }
        let n = file.readdir(&mut buf)?;
        if n == 0 {
            return Err(VfsError::NotFound);
        }
        if let Some(d) = DirentIter::new(&buf[..n]).find(|d| d.name == name) {
            break d.fsop;
        }
    };
    drop(file);
    fs.get_inode(&found)
}

/// TEAM_480: Read through `block_map`, clamped to the file size
pub fn read(file: &mut File, buf: &mut [u8]) -> VfsResult<usize> {
    let inode = file.inode().cloned().ok_or(VfsError::BadHandle)?;
    let fs = inode.fs()?;
    let ops = inode.ops()?;
    let block_size = fs.block_size() as u64;
    let size = inode.size();

    let mut done = 0;
    while done < buf.len() && file.offset() < size {
        if !fs.is_sane() {
            return Err(VfsError::Io);
        }
        let offset = file.offset();
        let within = (offset % block_size) as usize;
        let chunk = (block_size as usize - within)
            .min(buf.len() - done)
            .min((size - offset) as usize);
        let block = ops.block_map(&inode, offset / block_size, false)?;
        let data = fs.bread(block)?;
        buf[done..done + chunk].copy_from_slice(&data.data()[within..within + chunk]);
        done += chunk;
        file.advance(chunk);
    }
    Ok(done)
}

/// TEAM_480: Write through `block_map`, allocating blocks past the end
///
/// Partial blocks are read, patched and written back. The inode grows as
/// needed and is marked dirty.
pub fn write(file: &mut File, buf: &[u8]) -> VfsResult<usize> {
    let inode = file.inode().cloned().ok_or(VfsError::BadHandle)?;
    let fs = inode.fs()?;
    fs.check_writable()?;
    let ops = inode.ops()?;
    let block_size = fs.block_size() as u64;

    let mut done = 0;
    while done < buf.len() {
        if !fs.is_sane() {
            return Err(VfsError::Io);
        }
        let offset = file.offset();
        let logical = offset / block_size;
        let within = (offset % block_size) as usize;
        let chunk = (block_size as usize - within).min(buf.len() - done);
        let fresh = logical >= inode.stat().blocks;

        let block = ops.block_map(&inode, logical, fresh)?;
        let mut data = if fresh || chunk == block_size as usize {
            fs.bget(block)
        } else {
            fs.bread(block)?
        };
        data.data_mut()[within..within + chunk].copy_from_slice(&buf[done..done + chunk]);
        fs.bwrite(&data)?;

        done += chunk;
        file.advance(chunk);
        let end = file.offset();
        inode.update_stat(|st| {
            st.size = st.size.max(end);
            if fresh {
                st.blocks = st.blocks.max(logical + 1);
            }
        });
        inode.mark_dirty();
    }
    Ok(done)
}
