//! End-to-end container scenarios against a shared arena

use std::ffi::CString;
use std::os::raw::c_char;

use cairn::{arena_format, astr_format};
use cairn::{AHash, AList, AStr, Arena, ByteSlice, KeyKind, Keyed, Pod};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
struct Entry {
    key: u64,
    value: u64,
}

unsafe impl Pod for Entry {}
unsafe impl Keyed for Entry {
    type Key = u64;
}

fn keyed_arena() -> Arena {
    let mut arena = Arena::new();
    arena.set_hash_key(0xfeed_beef_cafe_f00d);
    arena
}

#[test]
fn test_containers_share_an_arena() {
    let arena = keyed_arena();

    let mut s = AStr::with_capacity(&arena, 8);
    let mut list = AList::with_capacity(&arena, 8);
    let mut hash = AHash::with_capacity(&arena, 8, KeyKind::Opaque);

    for i in 0..100u64 {
        astr_format!(s, "{i},");
        list.push(i);
        hash.find_or_insert(Entry {
            key: i,
            value: i * i,
        });
    }

    assert_eq!(s.len(), 290);
    assert!(s.as_str().starts_with("0,1,2,"));
    assert_eq!(list.len(), 100);
    assert_eq!(list[99], 99);
    assert_eq!(list.as_slice_with_sentinel()[100], 0);
    assert_eq!(hash.len(), 100);
    assert_eq!(hash.find(&7).unwrap().value, 49);
}

#[test]
fn test_clear_recycles_for_reuse() {
    let mut arena = Arena::with_first_block_size(64);

    for round in 0..5 {
        let mut list = AList::with_capacity(&arena, 0);
        for i in 0..500u32 {
            list.push(i);
        }
        assert_eq!(list.len(), 500);

        let blocks = arena.stats().blocks_allocated;
        if round == 0 {
            assert!(blocks > 1);
        } else {
            // the anticipation heuristic sized the head block for the
            // whole round
            assert_eq!(blocks, 1, "round {round}");
        }
        arena.clear();
    }
}

#[test]
fn test_free_then_reuse_anticipates_demand() {
    let mut arena = Arena::with_first_block_size(32);
    for i in 0..100u64 {
        arena.alloc_value(i);
    }
    let high = arena.size_estimate_high();
    assert!(high >= 800);
    arena.free();
    assert_eq!(arena.memory_size(), 0);

    // the first allocation after free gets a block sized for 125% of
    // the remembered demand
    arena.alloc(1, 1);
    assert_eq!(arena.stats().blocks_allocated, 1);
    assert!(arena.memory_size() >= high + high / 4);
}

#[test]
fn test_format_and_compact() {
    let arena = Arena::new();
    let greeting = arena_format!(arena, "hello {}", "world");
    assert_eq!(greeting, "hello world");

    let mut s = AStr::from_format(&arena, format_args!("x = {:04}", 42));
    assert_eq!(s.as_str(), "x = 0042");
    assert_eq!(s.capacity(), 8);

    s.push_str("!");
    let cstr = s.into_cstr();
    assert_eq!(cstr.to_bytes(), b"x = 0042!");
}

#[test]
fn test_interleaved_growth_degrades_but_stays_correct() {
    let arena = Arena::new();
    let mut a = AList::with_capacity(&arena, 1);
    let mut b = AList::with_capacity(&arena, 1);

    // alternating pushes defeat the in-place fast path; contents must
    // survive every copy
    for i in 0..200u64 {
        a.push(i);
        b.push(i * 2);
    }
    assert_eq!(a.len(), 200);
    assert_eq!(b.len(), 200);
    for i in 0..200 {
        assert_eq!(a[i as usize], i);
        assert_eq!(b[i as usize], i * 2);
    }
}

#[test]
fn test_hash_of_interned_strings() {
    let arena = keyed_arena();

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct Symbol {
        key: *const c_char,
        id: u32,
    }
    unsafe impl Pod for Symbol {}
    unsafe impl Keyed for Symbol {
        type Key = *const c_char;
    }

    let names: Vec<CString> = (0..50)
        .map(|i| CString::new(format!("sym-{i}")).unwrap())
        .collect();

    let mut symbols = AHash::with_capacity(&arena, 0, KeyKind::CStr);
    for (id, name) in names.iter().enumerate() {
        let (_, found) = symbols.find_or_insert(Symbol {
            key: name.as_ptr(),
            id: id as u32,
        });
        assert!(!found);
    }

    // look up through different allocations with equal contents
    for (id, name) in names.iter().enumerate() {
        let probe = CString::new(name.to_bytes()).unwrap();
        let found = symbols.find(&(probe.as_ptr() as *const c_char)).unwrap();
        assert_eq!(found.id, id as u32);
        assert_eq!(found.key, name.as_ptr());
    }
}

#[test]
fn test_hash_byte_slice_round_trip() {
    let arena = keyed_arena();

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct Blob {
        key: ByteSlice,
        checksum: u32,
    }
    unsafe impl Pod for Blob {}
    unsafe impl Keyed for Blob {
        type Key = ByteSlice;
    }

    let payloads: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; (i as usize % 7) + 1]).collect();
    let mut blobs = AHash::with_capacity(&arena, 4, KeyKind::Bytes);
    for (n, payload) in payloads.iter().enumerate() {
        blobs.update(Blob {
            key: ByteSlice::new(payload),
            checksum: n as u32,
        });
    }
    assert_eq!(blobs.len(), payloads.len());
    for (n, payload) in payloads.iter().enumerate() {
        let copy = payload.clone();
        let found = blobs.find(&ByteSlice::new(&copy)).unwrap();
        assert_eq!(found.checksum, n as u32);
    }
}

#[test]
fn test_insert_remove_insert_round_trip() {
    let arena = keyed_arena();
    let mut hash = AHash::with_capacity(&arena, 0, KeyKind::Opaque);

    for i in 0..64u64 {
        hash.find_or_insert(Entry { key: i, value: i });
    }
    for i in 0..64 {
        assert!(hash.remove(&i));
    }
    assert!(hash.is_empty());
    assert_eq!(hash.items_with_sentinel()[0], Entry { key: 0, value: 0 });

    for i in 100..164u64 {
        let (_, found) = hash.find_or_insert(Entry { key: i, value: i });
        assert!(!found);
    }
    assert_eq!(hash.len(), 64);
    for i in 100..164 {
        assert_eq!(hash.find(&i).unwrap().value, i);
    }
    assert!(hash.find(&5).is_none());
}

#[test]
fn test_drop_front_queue() {
    // drop_front turns a list into a cheap consume-from-the-front queue
    let arena = Arena::new();
    let mut queue = AList::with_capacity(&arena, 0);
    for i in 0..10u32 {
        queue.push(i);
    }

    let mut seen = Vec::new();
    while !queue.is_empty() {
        seen.push(queue[0]);
        queue.drop_front(1);
    }
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

#[test]
fn test_no_memory_callback_is_installed() {
    // the callback cannot be observed firing without dying, but
    // installation and ordinary operation must coexist
    let mut arena = Arena::new();
    arena.set_no_memory_callback(|size| {
        eprintln!("arena exhausted wanting {size} bytes");
    });
    let mut s = AStr::with_capacity(&arena, 4);
    s.push_str("still fine");
    assert_eq!(s.as_str(), "still fine");
}
