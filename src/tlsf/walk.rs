//! Physical-order traversal of the pool
use core::iter::FusedIterator;

use crate::{block::Tag, pool::Pool};

/// A snapshot of one block's tag, as seen by [`Blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// The pool offset of the block header.
    pub offset: usize,
    /// The payload size in bytes, excluding the header and the footer.
    pub size: usize,
    /// Whether the block is currently allocated.
    pub used: bool,
}

/// An iterator over the blocks of a [`Tlsf`](crate::Tlsf) pool in physical
/// order. Created by [`Tlsf::blocks`](crate::Tlsf::blocks).
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    pool: &'a Pool,
    next: Option<Tag>,
}

impl<'a> Blocks<'a> {
    pub(super) fn new(pool: &'a Pool) -> Self {
        // An empty pool is never seeded and has no blocks
        let next = if pool.len() > 0 && pool.read(0) != 0 {
            Some(Tag::at(0))
        } else {
            None
        };
        Self { pool, next }
    }
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.next?;
        self.next = block.next_tag(self.pool);
        Some(BlockInfo {
            offset: block.offset(),
            size: block.size(self.pool),
            used: block.is_used(self.pool),
        })
    }
}

impl FusedIterator for Blocks<'_> {}
