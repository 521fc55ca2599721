//! Order-preserving keyed hash map stored in an arena
//!
//! An [`AHash`] keeps its items in a dense array, in insertion order,
//! with the usual header immediately before the items and a zero-filled
//! sentinel slot after them, so the items read as a plain sequence,
//! exactly like an [`AList`](crate::AList). Lookup goes through an
//! out-of-band slot table allocated separately from the same arena.
//!
//! The slot table is two parallel arrays of `capacity * 2` 32-bit
//! words. The hash word encodes the slot state: 0 empty, 1 tombstone,
//! anything else an occupied slot holding the key's hash (the hash
//! function never produces 0 or 1). The paired index word names the
//! item's position in the dense array.
//!
//! Probing is linear under the mask `capacity * 2 - 1`. Lookups walk
//! occupied and tombstone slots until an empty slot stops them;
//! inserts take the first empty slot and never reuse tombstones; the
//! growth policy keeps at least half of the slots empty or tombstoned,
//! which bounds the walks. Deletion tombstones the slot and
//! swap-removes from the dense array, so iteration order is insertion
//! order until the first delete.

use std::fmt;
use std::ffi::CStr;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;

use crate::arena::Arena;
use crate::invalidate_magic;
use crate::item::{ByteSlice, Keyed};
use crate::list::SMALL_LIST_SIZE;
use crate::siphash::keyed_hash;

const MAGIC_AHASH: usize = 0x89cd_facf_3e41_4841_u64 as usize;

const EMPTY: u32 = 0;
const TOMBSTONE: u32 = 1;

/// The slot table indexes items with 32-bit words, half of which must
/// cover `capacity * 2` slots.
pub const MAX_HASH_CAPACITY: usize = (u32::MAX as usize) / 2 + 1;

/// How the leading key bytes of an item are hashed and compared.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    /// The key is opaque fixed-size data, hashed and compared byte by
    /// byte.
    Opaque = 0,
    /// The key is a `*const c_char` to a null-terminated string,
    /// hashed and compared by contents. The pointer itself is stored,
    /// not the string.
    CStr = 1,
    /// The key is a [`ByteSlice`], hashed and compared by the
    /// referenced contents.
    Bytes = 2,
}

#[repr(C)]
struct HashHeader {
    /// Slot table: `capacity * 2` hash words then `capacity * 2` index
    /// words
    table: *mut u32,
    /// Retained spare table for in-place tombstone rebuilds; null
    /// until first needed
    spare: *mut u32,
    /// Items stored, not counting the sentinel
    length: u32,
    /// Items storable without growing; always a power of two
    capacity: u32,
    /// Slots holding tombstones
    tombstones: u32,
    key_kind: KeyKind,
    magic: usize,
}

/// An order-preserving hash map allocated from an [`Arena`].
pub struct AHash<'arena, T: Keyed> {
    items: NonNull<T>,
    arena: &'arena Arena,
}

impl<'arena, T: Keyed> AHash<'arena, T> {
    /// Create a map able to hold `capacity` items without growing
    /// (rounded up to a power of two; 0 selects a small default).
    ///
    /// # Panics
    ///
    /// Panics if the item layout cannot carry the header-before-items
    /// arrangement, or if the key type's size does not suit `kind`
    /// (`CStr` needs a pointer-sized key, `Bytes` a [`ByteSlice`]).
    pub fn with_capacity(arena: &'arena Arena, capacity: usize, kind: KeyKind) -> Self {
        assert!(size_of::<T>() > 0, "zero-sized hash items are not supported");
        assert_eq!(align_of::<HashHeader>() % align_of::<T>(), 0);
        assert_eq!(size_of::<HashHeader>() % align_of::<T>(), 0);
        assert!(size_of::<T::Key>() <= size_of::<T>());
        match kind {
            KeyKind::CStr => assert_eq!(size_of::<T::Key>(), size_of::<*const u8>()),
            KeyKind::Bytes => assert_eq!(size_of::<T::Key>(), size_of::<ByteSlice>()),
            KeyKind::Opaque => assert!(size_of::<T::Key>() > 0),
        }

        let capacity = Self::calculate_capacity(arena, capacity);
        let header = arena
            .alloc_uninit(Self::main_size(arena, capacity), align_of::<HashHeader>())
            .cast::<HashHeader>();
        let table = arena.alloc(Self::table_size(capacity), align_of::<u32>());
        unsafe {
            header.as_ptr().write(HashHeader {
                table: table.as_ptr() as *mut u32,
                spare: std::ptr::null_mut(),
                length: 0,
                capacity: capacity as u32,
                tombstones: 0,
                key_kind: kind,
                magic: MAGIC_AHASH,
            });
            let items = header.as_ptr().add(1) as *mut T;
            std::ptr::write_bytes(items as *mut u8, 0, size_of::<T>());
            AHash {
                items: NonNull::new_unchecked(items),
                arena,
            }
        }
    }

    /// Round `requested` up to a valid power-of-two capacity.
    fn calculate_capacity(arena: &Arena, requested: usize) -> usize {
        let requested = if requested == 0 { SMALL_LIST_SIZE } else { requested };
        let mut capacity = 1;
        while capacity < requested {
            if capacity >= MAX_HASH_CAPACITY {
                // the hash does not produce enough bits for more slots
                arena.oom(usize::MAX);
            }
            capacity <<= 1;
        }
        capacity
    }

    /// Bytes for the header and dense item array.
    fn main_size(arena: &Arena, capacity: usize) -> usize {
        capacity
            .checked_add(1)
            .and_then(|items| items.checked_mul(size_of::<T>()))
            .and_then(|bytes| bytes.checked_add(size_of::<HashHeader>()))
            .unwrap_or_else(|| arena.oom(usize::MAX))
    }

    /// Bytes for the slot table.
    fn table_size(capacity: usize) -> usize {
        capacity * 4 * size_of::<u32>()
    }

    fn header(&self) -> *mut HashHeader {
        let header = unsafe { (self.items.as_ptr() as *mut HashHeader).sub(1) };
        debug_assert_eq!(
            unsafe { (*header).magic },
            MAGIC_AHASH,
            "stale or foreign hash handle"
        );
        header
    }

    /// Items stored, not counting the sentinel.
    pub fn len(&self) -> usize {
        unsafe { (*self.header()).length as usize }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items storable without growing; always a power of two.
    pub fn capacity(&self) -> usize {
        unsafe { (*self.header()).capacity as usize }
    }

    /// The key comparison mode fixed at creation.
    pub fn key_kind(&self) -> KeyKind {
        unsafe { (*self.header()).key_kind }
    }

    /// The items in insertion order (until disturbed by removals).
    pub fn items(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.items.as_ptr(), self.len()) }
    }

    /// The items followed by the all-zero sentinel slot.
    pub fn items_with_sentinel(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.items.as_ptr(), self.len() + 1) }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items().iter()
    }

    fn hash_of(&self, kind: KeyKind, key: *const T::Key) -> u32 {
        let hash_key = self.arena.hash_key();
        unsafe {
            match kind {
                KeyKind::Opaque => {
                    let bytes =
                        std::slice::from_raw_parts(key as *const u8, size_of::<T::Key>());
                    keyed_hash(bytes, hash_key)
                }
                KeyKind::CStr => {
                    let s = (key as *const *const std::os::raw::c_char).read();
                    keyed_hash(CStr::from_ptr(s).to_bytes(), hash_key)
                }
                KeyKind::Bytes => {
                    let slice = (key as *const ByteSlice).read();
                    keyed_hash(slice.as_slice(), hash_key)
                }
            }
        }
    }

    fn keys_equal(kind: KeyKind, a: *const T::Key, b: *const T::Key) -> bool {
        unsafe {
            match kind {
                KeyKind::Opaque => {
                    let a = std::slice::from_raw_parts(a as *const u8, size_of::<T::Key>());
                    let b = std::slice::from_raw_parts(b as *const u8, size_of::<T::Key>());
                    a == b
                }
                KeyKind::CStr => {
                    let a = (a as *const *const std::os::raw::c_char).read();
                    let b = (b as *const *const std::os::raw::c_char).read();
                    CStr::from_ptr(a) == CStr::from_ptr(b)
                }
                KeyKind::Bytes => {
                    let a = (a as *const ByteSlice).read();
                    let b = (b as *const ByteSlice).read();
                    a.len == b.len && a.as_slice() == b.as_slice()
                }
            }
        }
    }

    /// The key occupies the leading bytes of the item.
    fn key_of(item: *const T) -> *const T::Key {
        item as *const T::Key
    }

    /// Look up an item by key. The reference is invalidated by any
    /// mutation that grows or removes.
    pub fn find(&self, key: &T::Key) -> Option<&T> {
        let header = self.header();
        unsafe {
            let capacity = (*header).capacity as usize;
            let table = (*header).table;
            let kind = (*header).key_kind;
            let hash = self.hash_of(kind, key);
            let mask = (capacity * 2 - 1) as u32;
            let mut slot = hash & mask;
            loop {
                let entry = *table.add(slot as usize);
                if entry == EMPTY {
                    return None;
                }
                // tombstones are walked but never match: their hash
                // word is 1 and real hashes are at least 2
                if entry == hash {
                    let index = *table.add(capacity * 2 + slot as usize) as usize;
                    debug_assert!(index < (*header).length as usize);
                    let item = self.items.as_ptr().add(index);
                    if Self::keys_equal(kind, key, Self::key_of(item)) {
                        return Some(&*item);
                    }
                }
                slot = (slot + 1) & mask;
            }
        }
    }

    /// Look up the item with `item`'s key, inserting `item` if absent.
    /// Returns the stored item and whether it already existed; an
    /// existing item is left untouched.
    pub fn find_or_insert(&mut self, item: T) -> (&mut T, bool) {
        self.ensure_space(1);
        let header = self.header();
        unsafe {
            let capacity = (*header).capacity as usize;
            let table = (*header).table;
            let kind = (*header).key_kind;
            let key = Self::key_of(&item);
            let hash = self.hash_of(kind, key);
            let mask = (capacity * 2 - 1) as u32;
            let mut slot = hash & mask;
            loop {
                let entry = *table.add(slot as usize);
                if entry == EMPTY {
                    break;
                }
                if entry == hash {
                    let index = *table.add(capacity * 2 + slot as usize) as usize;
                    debug_assert!(index < (*header).length as usize);
                    let existing = self.items.as_ptr().add(index);
                    if Self::keys_equal(kind, key, Self::key_of(existing)) {
                        return (&mut *existing, true);
                    }
                }
                slot = (slot + 1) & mask;
            }

            // insert at the first empty slot; ensure_space guarantees
            // the walk above was bounded and the dense array has room
            let index = (*header).length as usize;
            *table.add(slot as usize) = hash;
            *table.add(capacity * 2 + slot as usize) = index as u32;
            let stored = self.items.as_ptr().add(index);
            stored.write(item);
            (*header).length += 1;
            std::ptr::write_bytes(
                self.items.as_ptr().add(index + 1) as *mut u8,
                0,
                size_of::<T>(),
            );
            (&mut *stored, false)
        }
    }

    /// Copy `item` into the map, overwriting any existing item with
    /// the same key. Returns the stored item.
    pub fn update(&mut self, item: T) -> &mut T {
        let (stored, found) = self.find_or_insert(item);
        if found {
            *stored = item;
        }
        stored
    }

    /// Remove the item with the given key. Returns whether it was
    /// present. The last item takes the removed item's place in the
    /// dense array, so insertion order is disturbed.
    pub fn remove(&mut self, key: &T::Key) -> bool {
        let header = self.header();
        unsafe {
            let capacity = (*header).capacity as usize;
            let table = (*header).table;
            let kind = (*header).key_kind;
            let hash = self.hash_of(kind, key);
            let mask = (capacity * 2 - 1) as u32;
            let mut slot = hash & mask;
            let index = loop {
                let entry = *table.add(slot as usize);
                if entry == EMPTY {
                    return false;
                }
                if entry == hash {
                    let index = *table.add(capacity * 2 + slot as usize) as usize;
                    let item = self.items.as_ptr().add(index);
                    if Self::keys_equal(kind, key, Self::key_of(item)) {
                        break index;
                    }
                }
                slot = (slot + 1) & mask;
            };

            *table.add(slot as usize) = TOMBSTONE;
            (*header).tombstones += 1;

            let last = (*header).length as usize - 1;
            if index != last {
                // move the final item into the hole and point its slot
                // at the new position
                std::ptr::copy_nonoverlapping(
                    self.items.as_ptr().add(last),
                    self.items.as_ptr().add(index),
                    1,
                );
                let moved = self.items.as_ptr().add(index);
                let moved_hash = self.hash_of(kind, Self::key_of(moved));
                let mut moved_slot = moved_hash & mask;
                loop {
                    let entry = *table.add(moved_slot as usize);
                    debug_assert_ne!(entry, EMPTY, "slot table lost a live item");
                    if entry == moved_hash
                        && *table.add(capacity * 2 + moved_slot as usize) == last as u32
                    {
                        *table.add(capacity * 2 + moved_slot as usize) = index as u32;
                        break;
                    }
                    moved_slot = (moved_slot + 1) & mask;
                }
            }

            (*header).length = last as u32;
            std::ptr::write_bytes(self.items.as_ptr().add(last) as *mut u8, 0, size_of::<T>());
            true
        }
    }

    /// Guarantee room for `count` further insertions without another
    /// slot-table cleanup or growth.
    ///
    /// Growth targets 1.5× the future length, so alternating inserts
    /// and removals near capacity do not trigger a full rebuild on
    /// every insertion.
    pub fn ensure_space(&mut self, count: usize) {
        let header = self.header();
        unsafe {
            let capacity = (*header).capacity as usize;
            let length = (*header).length as usize;
            let tombstones = (*header).tombstones as usize;
            if capacity - tombstones - length >= count {
                return;
            }

            let future_length = length + count;
            let desired = future_length + future_length / 2;
            self.resize_capacity(desired.max(count));

            let header = self.header();
            if (*header).tombstones > 0 {
                self.rebuild_table();
            }
        }
    }

    /// Reprobe every occupied slot into the retained spare table and
    /// swap the tables, clearing all tombstones in place.
    fn rebuild_table(&mut self) {
        let header = self.header();
        unsafe {
            let capacity = (*header).capacity as usize;
            let words = capacity * 4;
            if (*header).spare.is_null() {
                (*header).spare =
                    self.arena.alloc(Self::table_size(capacity), align_of::<u32>()).as_ptr()
                        as *mut u32;
            } else {
                std::ptr::write_bytes((*header).spare, 0, words);
            }

            let table = (*header).table;
            let spare = (*header).spare;
            let mask = (capacity * 2 - 1) as u32;
            for s in 0..capacity * 2 {
                let entry = *table.add(s);
                if entry == EMPTY || entry == TOMBSTONE {
                    continue;
                }
                let mut slot = entry & mask;
                while *spare.add(slot as usize) != EMPTY {
                    slot = (slot + 1) & mask;
                }
                *spare.add(slot as usize) = entry;
                *spare.add(capacity * 2 + slot as usize) = *table.add(capacity * 2 + s);
            }

            (*header).table = spare;
            (*header).spare = table;
            (*header).tombstones = 0;
        }
    }

    /// Grow the capacity to at least `capacity` (rounded up to a power
    /// of two). Growth only: a no-op when the map is already at least
    /// that large; there is no way to return table memory to the
    /// arena.
    pub fn resize_capacity(&mut self, capacity: usize) {
        let header = self.header();
        let length = unsafe { (*header).length as usize };
        let capacity = Self::calculate_capacity(self.arena, capacity.max(length));
        if capacity <= unsafe { (*header).capacity as usize } {
            return;
        }
        let replacement = self.copy_with_capacity(capacity);
        unsafe { invalidate_magic(&mut (*header).magic) };
        *self = replacement;
    }

    /// Create a copy backed by the same arena, with capacity at least
    /// `capacity`. The copy is always a fresh allocation with a
    /// freshly probed slot table and no tombstones.
    pub fn copy(&self, capacity: usize) -> AHash<'arena, T> {
        let capacity = Self::calculate_capacity(
            self.arena,
            capacity.max(self.len()),
        );
        self.copy_with_capacity(capacity)
    }

    fn copy_with_capacity(&self, capacity: usize) -> AHash<'arena, T> {
        let old_header = self.header();
        unsafe {
            let old_capacity = (*old_header).capacity as usize;
            let old_table = (*old_header).table;
            let length = (*old_header).length as usize;
            debug_assert!(capacity >= length);

            let new = AHash::with_capacity(self.arena, capacity, (*old_header).key_kind);
            let new_header = new.header();
            let capacity = (*new_header).capacity as usize;

            // items and the sentinel, verbatim
            std::ptr::copy_nonoverlapping(
                self.items.as_ptr(),
                new.items.as_ptr(),
                length + 1,
            );
            (*new_header).length = length as u32;

            // reprobe every occupied slot under the new mask
            let table = (*new_header).table;
            let mask = (capacity * 2 - 1) as u32;
            for s in 0..old_capacity * 2 {
                let entry = *old_table.add(s);
                if entry == EMPTY || entry == TOMBSTONE {
                    continue;
                }
                let mut slot = entry & mask;
                while *table.add(slot as usize) != EMPTY {
                    slot = (slot + 1) & mask;
                }
                *table.add(slot as usize) = entry;
                *table.add(capacity * 2 + slot as usize) =
                    *old_table.add(old_capacity * 2 + s);
            }

            new
        }
    }
}

impl<T: Keyed + fmt::Debug> fmt::Debug for AHash<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
