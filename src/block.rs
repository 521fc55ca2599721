//! Blocks of memory acquired from the system allocator
//!
//! An arena owns a chain of blocks linked through a header written at
//! the start of each block. The chain is newest-first and terminates
//! at a null prev pointer.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

use thiserror::Error;

/// Alignment of the platform's max-aligned scalar, the strongest
/// alignment the arena serves.
pub const MAX_ALIGN: usize = 16;

/// Bytes from the start of a block to its payload area. The header is
/// padded out to `MAX_ALIGN` so the first allocation in every block
/// starts max-aligned.
pub const BLOCK_OVERHEAD: usize =
    (std::mem::size_of::<BlockHeader>() + MAX_ALIGN - 1) & !(MAX_ALIGN - 1);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    #[error("block size does not describe a valid allocation")]
    BadSize,
    #[error("system allocator returned no memory")]
    Oom,
}

/// Header at the start of every block.
///
/// `size` counts the whole block including this header.
#[repr(C)]
pub struct BlockHeader {
    pub prev: *mut BlockHeader,
    pub size: usize,
}

impl BlockHeader {
    /// Allocate a raw block of `size` bytes from the system allocator.
    ///
    /// The header is left uninitialised; the caller links it into the
    /// chain.
    pub fn alloc_block(size: usize) -> Result<NonNull<BlockHeader>, BlockError> {
        if size < BLOCK_OVERHEAD {
            return Err(BlockError::BadSize);
        }
        let layout = Layout::from_size_align(size, MAX_ALIGN).map_err(|_| BlockError::BadSize)?;
        let ptr = unsafe { alloc(layout) };
        NonNull::new(ptr as *mut BlockHeader).ok_or(BlockError::Oom)
    }

    /// Release a chain of blocks, walking prev pointers to the end.
    ///
    /// # Safety
    ///
    /// `block` must be null or the head of a chain of live blocks
    /// allocated by [`BlockHeader::alloc_block`], none of which are
    /// referenced afterwards.
    pub unsafe fn free_chain(mut block: *mut BlockHeader) {
        while !block.is_null() {
            let prev = (*block).prev;
            let size = (*block).size;
            dealloc(
                block as *mut u8,
                Layout::from_size_align_unchecked(size, MAX_ALIGN),
            );
            block = prev;
        }
    }

    /// Total bytes held by the chain starting at `block`.
    ///
    /// # Safety
    ///
    /// `block` must be null or the head of a chain of live blocks.
    pub unsafe fn chain_size(mut block: *const BlockHeader) -> usize {
        let mut size = 0;
        while !block.is_null() {
            size += (*block).size;
            block = (*block).prev;
        }
        size
    }

    /// Number of blocks in the chain starting at `block`.
    ///
    /// # Safety
    ///
    /// `block` must be null or the head of a chain of live blocks.
    pub unsafe fn chain_len(mut block: *const BlockHeader) -> usize {
        let mut n = 0;
        while !block.is_null() {
            n += 1;
            block = (*block).prev;
        }
        n
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_undersized() {
        assert_eq!(
            BlockHeader::alloc_block(1).unwrap_err(),
            BlockError::BadSize
        );
    }

    #[test]
    fn test_alloc_free_chain() {
        unsafe {
            let first = BlockHeader::alloc_block(0x1000).unwrap().as_ptr();
            (*first).prev = std::ptr::null_mut();
            (*first).size = 0x1000;

            let second = BlockHeader::alloc_block(0x2000).unwrap().as_ptr();
            (*second).prev = first;
            (*second).size = 0x2000;

            assert_eq!(BlockHeader::chain_size(second), 0x3000);
            assert_eq!(BlockHeader::chain_len(second), 2);

            BlockHeader::free_chain(second);
        }
    }

    #[test]
    fn test_max_aligned() {
        unsafe {
            let block = BlockHeader::alloc_block(0x1000).unwrap();
            assert_eq!(block.as_ptr() as usize % MAX_ALIGN, 0);
            (*block.as_ptr()).prev = std::ptr::null_mut();
            (*block.as_ptr()).size = 0x1000;
            BlockHeader::free_chain(block.as_ptr());
        }
    }

    #[test]
    fn test_overhead_is_max_aligned() {
        assert_eq!(BLOCK_OVERHEAD % MAX_ALIGN, 0);
        assert!(BLOCK_OVERHEAD >= std::mem::size_of::<BlockHeader>());
    }
}
