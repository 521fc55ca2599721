//! Region allocation with arena-backed growable containers
//!
//! An [`Arena`] owns a chain of large blocks obtained from the system
//! allocator and serves allocations by bumping a pointer. Individual
//! allocations are never freed; the arena is emptied as a whole with
//! [`Arena::clear`] (all but the newest block) or [`Arena::free`].
//!
//! Three growable containers allocate their backing storage from an
//! arena:
//!
//! * [`AStr`]: a null-terminated byte string
//! * [`AList`]: a null-terminated typed list
//! * [`AHash`]: an order-preserving keyed map
//!
//! Each container stores a header in arena memory immediately before
//! its payload and keeps a zero terminator after its contents, so the
//! payload can be handed to code that knows nothing of this crate.
//! Containers grow in place without copying whenever they are the most
//! recent allocation in their arena; interleaving the growth of two
//! containers on one arena is correct but forces copies, so a hot
//! container is best given a short-lived arena of its own.
//!
//! The arena and the containers are strictly single-threaded.

pub mod arena;
pub mod block;
pub mod format;
pub mod hash;
pub mod item;
pub mod list;
pub mod siphash;
pub mod string;

pub use arena::{Arena, MemoryStats, FIRST_BLOCK_SIZE};
pub use block::{BlockError, BLOCK_OVERHEAD, MAX_ALIGN};
pub use hash::{AHash, KeyKind, MAX_HASH_CAPACITY};
pub use item::{ByteSlice, CStrKey, Keyed, Pod};
pub use list::{AList, SMALL_LIST_SIZE};
pub use string::{AStr, SMALL_STRING_SIZE};

/// Scramble a container header's magic word so stale handles to a
/// moved payload are caught by the debug checks.
pub(crate) fn invalidate_magic(magic: &mut usize) {
    *magic = (*magic & !0xff00_0000) | ((b'-' as usize) << 24);
}
