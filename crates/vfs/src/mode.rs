//! TEAM_201: POSIX File Mode Constants
//!
//! File type bits of `st_mode` and the predicates the VFS dispatches on.

/// TEAM_201: Bit mask for extracting file type
pub const S_IFMT: u32 = 0o170000;

/// TEAM_201: Symbolic link
pub const S_IFLNK: u32 = 0o120000;

/// TEAM_201: Regular file
pub const S_IFREG: u32 = 0o100000;

/// TEAM_201: Block device
pub const S_IFBLK: u32 = 0o060000;

/// TEAM_201: Directory
pub const S_IFDIR: u32 = 0o040000;

/// TEAM_201: Character device
pub const S_IFCHR: u32 = 0o020000;

/// TEAM_480: Permission bits
pub const S_IPERM: u32 = 0o7777;

pub const fn file_type(mode: u32) -> u32 {
    mode & S_IFMT
}

pub const fn is_dir(mode: u32) -> bool {
    file_type(mode) == S_IFDIR
}

pub const fn is_reg(mode: u32) -> bool {
    file_type(mode) == S_IFREG
}

pub const fn is_device(mode: u32) -> bool {
    matches!(file_type(mode), S_IFCHR | S_IFBLK)
}

/// TEAM_480: Combine a file type with the permission bits of `mode`
pub const fn with_type(file_type: u32, mode: u32) -> u32 {
    (file_type & S_IFMT) | (mode & S_IPERM)
}
