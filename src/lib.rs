//! This crate implements the TLSF (Two-Level Segregated Fit) dynamic memory
//! allocation algorithm¹ over a single memory pool owned by the allocator.
//!
//!  - **Allocation and deallocation operations are guaranteed to complete in
//!    constant time.** TLSF is suitable for real-time applications.
//!
//!  - **Boundary tags.** Every block carries a header and a footer, so both
//!    physical neighbors of a block are found in constant time and freed
//!    blocks are coalesced immediately.
//!
//!  - **Offsets, not addresses.** Inside the crate, blocks and free-list
//!    links are byte offsets into the pool, bounds-checked on every access.
//!    Pointers only appear at the public API boundary.
//!
//!  - **This crate supports `#![no_std]`.** It only needs `alloc` to obtain
//!    the pool itself.
//!
//! <!-- <small> doesn't work on GitHub -->
//!
//! <sub>¹ M. Masmano, I. Ripoll, A. Crespo and J. Real, "TLSF: a new dynamic
//! memory allocator for real-time systems," *Proceedings. 16th Euromicro
//! Conference on Real-Time Systems*, 2004. ECRTS 2004., Catania, Italy, 2004,
//! pp. 79-88, doi: 10.1109/EMRTS.2004.1311009.</sub>
//!
//! # Examples
//!
//! ```rust
//! use tlsf_pool::Tlsf;
//!
//! let mut tlsf = Tlsf::new(65536);
//!
//! unsafe {
//!     let ptr1 = tlsf.allocate(8).unwrap().cast::<u64>();
//!     let ptr2 = tlsf.allocate(8).unwrap().cast::<u64>();
//!     *ptr1.as_ptr() = 42;
//!     *ptr2.as_ptr() = 56;
//!     assert_eq!(*ptr1.as_ptr(), 42);
//!     assert_eq!(*ptr2.as_ptr(), 56);
//!     tlsf.deallocate(Some(ptr1.cast()));
//!     tlsf.deallocate(Some(ptr2.cast()));
//! }
//!
//! tlsf.check_integrity().unwrap();
//! ```
//!
//! # Details
//!
//! ## Changes from the Original Algorithm
//!
//!  - A block header stores its payload size together with a used flag; the
//!    physically preceding block is found through its footer rather than a
//!    stored back pointer.
//!
//!  - The search first tries the head of the list the request itself maps
//!    to, then rounds the request up to the next size class boundary, so the
//!    head of any list it picks is guaranteed to fit. Other blocks in the
//!    request's own list are never examined, so an allocation can fail even
//!    though a large enough free block exists.
//!
//! ## Thread Safety
//!
//! `Tlsf` does no locking. It is `Send` and `Sync`, but every mutating
//! operation takes `&mut self`; sharing one between threads needs external
//! mutual exclusion.
//!
#![no_std]

extern crate alloc;

mod block;
pub mod int;
mod pool;
mod tlsf;
pub use self::{
    block::{BLOCK_OVERHEAD, MIN_BLOCK_SIZE},
    tlsf::{classify, BlockInfo, Blocks, IntegrityError, Tlsf, ALIGNMENT, FLLEN, SLLEN},
};

#[cfg(test)]
extern crate std;
