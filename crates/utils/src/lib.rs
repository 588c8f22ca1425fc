#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

// TEAM_211: Re-export spin crate types as our lock API
// Note: spin::Mutex is re-exported as Mutex for API compatibility
pub use spin::{Barrier, Lazy, Once};
pub use spin::{Mutex, MutexGuard};
pub use spin::{RwLock, RwLockReadGuard, RwLockWriteGuard};

// TEAM_212: Re-export hashbrown collections
pub use hashbrown::{HashMap, HashSet};

// TEAM_480: Re-export cache containers
pub use lru::LruCache;
pub use slab::Slab;

// ============================================================================
// Unit Tests
// ============================================================================
