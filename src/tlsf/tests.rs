extern crate std;

use quickcheck_macros::quickcheck;
use std::{prelude::v1::*, ptr::NonNull};

use super::*;
use crate::{block::HEADER_SIZE, tests::ShadowAllocator};

type Snapshot = (u64, [u32; FLLEN], usize);

fn snapshot(tlsf: &Tlsf) -> Snapshot {
    (tlsf.fl_bitmap, tlsf.sl_bitmap, tlsf.free_bytes)
}

#[test]
fn minimal() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut tlsf = Tlsf::new(65536);

    log::trace!("tlsf = {:?}", tlsf.pool);

    let ptr = tlsf.allocate(1);
    log::trace!("ptr = {:?}", ptr);
    assert!(ptr.is_some());
    unsafe { tlsf.deallocate(ptr) };
    tlsf.check_integrity().unwrap();
}

#[test]
fn map_floor_and_ceil() {
    assert_eq!(map::map_floor(0), (0, 0));
    assert_eq!(map::map_floor(MIN_BLOCK_SIZE - 8), (0, 0));
    assert_eq!(map::map_floor(32), (5, 0));
    assert_eq!(map::map_floor(40), (5, 8));
    assert_eq!(map::map_floor(63), (5, 31));
    assert_eq!(map::map_floor(64), (6, 0));
    assert_eq!(map::map_floor(66), (6, 1));
    assert_eq!(map::map_floor(4080), (11, 31));
    assert_eq!(map::map_floor(usize::MAX), (usize::BITS as usize - 1, SLLEN - 1));

    // On a class boundary, `map_ceil` agrees with `map_floor`
    assert_eq!(map::map_ceil(32), Some((5, 0)));
    assert_eq!(map::map_ceil(64), Some((6, 0)));
    assert_eq!(map::map_ceil(128), Some((7, 0)));

    // Otherwise it moves to the next class
    assert_eq!(map::map_ceil(136), Some((7, 2)));
    assert_eq!(map::map_ceil(130), Some((7, 1)));
    assert_eq!(map::map_ceil(127), Some((7, 0)));
    assert_eq!(map::map_ceil(4088), Some((12, 0)));
    assert_eq!(map::map_ceil(usize::MAX & !7), None);
}

#[quickcheck]
fn map_ceil_lower_bound_covers_size(size: usize) -> bool {
    let size = size.max(MIN_BLOCK_SIZE);
    let (fl, sl) = map::map_floor(size);
    let floor_ok = map::list_min_size(fl, sl) <= size;
    let ceil_ok = match map::map_ceil(size) {
        Some((fl, sl)) => map::list_min_size(fl, sl) >= size,
        None => size > map::list_min_size(usize::BITS as usize - 1, SLLEN - 1),
    };
    floor_ok && ceil_ok
}

#[test]
fn fresh_pool_is_one_free_block() {
    let tlsf = Tlsf::new(4096);
    let blocks: Vec<_> = tlsf.blocks().collect();
    assert_eq!(
        blocks,
        [BlockInfo {
            offset: 0,
            size: 4096 - BLOCK_OVERHEAD,
            used: false
        }]
    );
    assert_eq!(tlsf.free_bytes(), 4096 - BLOCK_OVERHEAD);
    assert_eq!(tlsf.fl_bitmap, 1 << 11);
    assert_eq!(tlsf.sl_bitmap[11], 1 << 31);
    tlsf.check_integrity().unwrap();
}

#[test]
fn pool_size_is_rounded_down() {
    let tlsf = Tlsf::new(4099);
    assert_eq!(tlsf.pool_size(), 4096);
    tlsf.check_integrity().unwrap();
}

#[test]
fn too_small_pool_is_permanently_empty() {
    for &size in &[0, 1, 8, BLOCK_OVERHEAD, BLOCK_OVERHEAD + MIN_BLOCK_SIZE - 8] {
        let mut tlsf = Tlsf::new(size);
        assert_eq!(tlsf.blocks().count(), 0, "pool size {}", size);
        assert_eq!(tlsf.free_bytes(), 0);
        assert_eq!(tlsf.fl_bitmap, 0);
        assert!(tlsf.allocate(1).is_none());
        assert!(tlsf.allocate(0).is_none());
        tlsf.check_integrity().unwrap();
    }

    // The smallest pool that holds a block
    let mut tlsf = Tlsf::new(BLOCK_OVERHEAD + MIN_BLOCK_SIZE);
    let ptr = tlsf.allocate(MIN_BLOCK_SIZE).unwrap();
    assert!(tlsf.allocate(1).is_none());
    unsafe { tlsf.deallocate(Some(ptr)) };
    tlsf.check_integrity().unwrap();
}

#[test]
fn requests_are_rounded_up() {
    let mut tlsf = Tlsf::new(4096);
    unsafe {
        let ptr = tlsf.allocate(0).unwrap();
        assert_eq!(tlsf.usable_size(ptr), MIN_BLOCK_SIZE);
        let ptr = tlsf.allocate(33).unwrap();
        assert_eq!(tlsf.usable_size(ptr), 40);
        let ptr = tlsf.allocate(100).unwrap();
        assert_eq!(tlsf.usable_size(ptr), 104);
    }
    tlsf.check_integrity().unwrap();
}

#[test]
fn oversized_requests_fail() {
    let mut tlsf = Tlsf::new(4096);
    assert!(tlsf.allocate(4096).is_none());
    assert!(tlsf.allocate(usize::MAX).is_none());
    assert!(tlsf.allocate(usize::MAX - 7).is_none());
    assert!(tlsf.allocate(4096 - BLOCK_OVERHEAD).is_some());
}

#[test]
fn round_trip_restores_index() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut tlsf = Tlsf::new(4096);
    let before = snapshot(&tlsf);
    let ptr = tlsf.allocate(100);
    assert!(ptr.is_some());
    assert_ne!(snapshot(&tlsf), before);
    unsafe { tlsf.deallocate(ptr) };
    assert_eq!(snapshot(&tlsf), before);

    // Same thing in a fragmented pool
    let ptrs: Vec<_> = (0..8).map(|i| tlsf.allocate(40 + i * 24).unwrap()).collect();
    for &ptr in ptrs.iter().step_by(2) {
        unsafe { tlsf.deallocate(Some(ptr)) };
    }
    tlsf.check_integrity().unwrap();

    for &size in &[1, 40, 64, 200, 1000] {
        let before = snapshot(&tlsf);
        let ptr = tlsf.allocate(size);
        assert!(ptr.is_some());
        unsafe { tlsf.deallocate(ptr) };
        assert_eq!(snapshot(&tlsf), before, "size {}", size);
        tlsf.check_integrity().unwrap();
    }
}

#[test]
fn deallocate_none_is_noop() {
    let mut tlsf = Tlsf::new(1024);
    let before = snapshot(&tlsf);
    unsafe { tlsf.deallocate(None) };
    assert_eq!(snapshot(&tlsf), before);
}

#[test]
fn search_skips_classes_that_might_not_fit() {
    let mut tlsf = Tlsf::new(4096);

    // Make a free block of 512 bytes, fenced by used blocks
    let a = tlsf.allocate(512).unwrap();
    let _fence = tlsf.allocate(32).unwrap();
    unsafe { tlsf.deallocate(Some(a)) };

    // 520 bytes share class (9, 0) with the 512-byte block, but it's too
    // small. The request must be served from the tail.
    assert_eq!(classify(512), (9, 0));
    assert_eq!(classify(520), (9, 0));
    let b = tlsf.allocate(520).unwrap();
    assert_ne!(b, a);
    unsafe { assert_eq!(tlsf.usable_size(b), 520) };

    // 512 bytes fit exactly
    let c = tlsf.allocate(512).unwrap();
    assert_eq!(c, a);
    tlsf.check_integrity().unwrap();
}

#[test]
fn fitting_block_behind_list_head_is_not_found() {
    // x (520) | fence | y (512) | fence, exactly filling the pool
    let mut tlsf = Tlsf::new(1160);
    let x = tlsf.allocate(520).unwrap();
    let _fence1 = tlsf.allocate(32).unwrap();
    let y = tlsf.allocate(512).unwrap();
    let _fence2 = tlsf.allocate(32).unwrap();
    assert_eq!(tlsf.free_bytes(), 0);

    // Both end up in list (9, 0) with `y` at its head
    unsafe {
        tlsf.deallocate(Some(x));
        tlsf.deallocate(Some(y));
    }
    assert_eq!(tlsf.first_free[9][0], Some(Tag::at(584)));
    tlsf.check_integrity().unwrap();

    // Only the head of the request's own list is examined
    assert!(tlsf.allocate(520).is_none());

    assert_eq!(tlsf.allocate(512), Some(y));
    assert_eq!(tlsf.allocate(520), Some(x));
    tlsf.check_integrity().unwrap();
}

#[test]
fn exact_fit_in_own_class_is_found() {
    // The only free block (4080 bytes) sits in class (11, 31), whose lower
    // bound is 4032. Rounding the request up alone would never look there.
    let mut tlsf = Tlsf::new(4096);
    assert_eq!(map::map_ceil(4080), Some((12, 0)));
    let ptr = tlsf.allocate(4080).unwrap();
    assert_eq!(tlsf.free_bytes(), 0);
    assert!(tlsf.allocate(1).is_none());
    unsafe { tlsf.deallocate(Some(ptr)) };
    tlsf.check_integrity().unwrap();
}

#[test]
fn merges_with_both_neighbors() {
    let mut tlsf = Tlsf::new(4096);
    let ptrs: Vec<_> = (0..4).map(|_| tlsf.allocate(64).unwrap()).collect();

    unsafe {
        tlsf.deallocate(Some(ptrs[0]));
        tlsf.deallocate(Some(ptrs[2]));
        assert_eq!(tlsf.blocks().filter(|b| !b.used).count(), 3);

        // Merges with `ptrs[0]` (backward) and `ptrs[2]` (forward)
        tlsf.deallocate(Some(ptrs[1]));
    }
    tlsf.check_integrity().unwrap();

    let blocks: Vec<_> = tlsf.blocks().collect();
    assert_eq!(blocks.len(), 3);
    assert_eq!(
        blocks[0],
        BlockInfo {
            offset: 0,
            size: 3 * 64 + 2 * BLOCK_OVERHEAD,
            used: false
        }
    );
    assert!(blocks[1].used);
    assert!(!blocks[2].used);
}

#[test]
fn reallocate_shrinks_in_place() {
    let mut tlsf = Tlsf::new(4096);
    unsafe {
        let ptr = tlsf.allocate(512).unwrap();
        let fence = tlsf.allocate(64).unwrap();
        ptr.as_ptr().write_bytes(0x5a, 512);

        let new_ptr = tlsf.reallocate(ptr, 100).unwrap();
        assert_eq!(new_ptr, ptr);
        assert_eq!(tlsf.usable_size(ptr), 104);
        assert!(std::slice::from_raw_parts(ptr.as_ptr(), 100)
            .iter()
            .all(|&b| b == 0x5a));

        // The released tail is a free block of its own
        let blocks: Vec<_> = tlsf.blocks().collect();
        assert_eq!(blocks.len(), 4);
        assert!(!blocks[1].used);
        assert_eq!(blocks[1].size, 512 - 104 - BLOCK_OVERHEAD);

        tlsf.deallocate(Some(fence));
    }
    tlsf.check_integrity().unwrap();
}

#[test]
fn reallocate_grows_in_place() {
    let mut tlsf = Tlsf::new(4096);
    unsafe {
        let ptr = tlsf.allocate(64).unwrap();
        ptr.as_ptr().write_bytes(0xc3, 64);

        // The successor is the free tail of the pool
        let new_ptr = tlsf.reallocate(ptr, 1000).unwrap();
        assert_eq!(new_ptr, ptr);
        assert_eq!(tlsf.usable_size(ptr), 1000);
        assert!(std::slice::from_raw_parts(ptr.as_ptr(), 64)
            .iter()
            .all(|&b| b == 0xc3));
    }
    tlsf.check_integrity().unwrap();
}

#[test]
fn reallocate_moves_when_fenced() {
    let mut tlsf = Tlsf::new(4096);
    unsafe {
        let ptr = tlsf.allocate(64).unwrap();
        let fence = tlsf.allocate(64).unwrap();
        for i in 0..64 {
            *ptr.as_ptr().add(i) = i as u8;
        }

        let new_ptr = tlsf.reallocate(ptr, 256).unwrap();
        assert_ne!(new_ptr, ptr);
        assert!(tlsf.usable_size(new_ptr) >= 256);
        for i in 0..64 {
            assert_eq!(*new_ptr.as_ptr().add(i), i as u8);
        }

        // The old place is free again
        let first = tlsf.blocks().next().unwrap();
        assert!(!first.used);

        tlsf.deallocate(Some(fence));
        tlsf.deallocate(Some(new_ptr));
    }
    tlsf.check_integrity().unwrap();
    assert_eq!(tlsf.free_bytes(), 4096 - BLOCK_OVERHEAD);
}

#[test]
fn reallocate_failure_keeps_allocation() {
    let mut tlsf = Tlsf::new(1024);
    unsafe {
        let ptr = tlsf.allocate(64).unwrap();
        ptr.as_ptr().write_bytes(0x11, 64);
        let _fence = tlsf.allocate(64).unwrap();
        let before = snapshot(&tlsf);

        assert!(tlsf.reallocate(ptr, 2048).is_none());
        assert_eq!(snapshot(&tlsf), before);
        assert_eq!(tlsf.usable_size(ptr), 64);
        assert!(std::slice::from_raw_parts(ptr.as_ptr(), 64)
            .iter()
            .all(|&b| b == 0x11));
    }
    tlsf.check_integrity().unwrap();
}

#[test]
fn unallocatable_pool_is_empty() {
    let mut tlsf = Tlsf::new(usize::MAX);
    assert_eq!(tlsf.pool_size(), 0);
    assert_eq!(tlsf.blocks().count(), 0);
    assert!(tlsf.allocate(1).is_none());
    tlsf.check_integrity().unwrap();
}

/// Two used 64-byte blocks at offsets 0 and 80, then the free tail at 160.
fn two_used_blocks() -> Tlsf {
    let mut tlsf = Tlsf::new(4096);
    let a = tlsf.allocate(64).unwrap();
    let b = tlsf.allocate(64).unwrap();
    assert_eq!(tlsf.pool.offset_of(a), Some(HEADER_SIZE));
    assert_eq!(tlsf.pool.offset_of(b), Some(80 + HEADER_SIZE));
    tlsf.check_integrity().unwrap();
    tlsf
}

const TAIL: usize = 160;
const TAIL_SIZE: usize = 4096 - TAIL - BLOCK_OVERHEAD;

#[test]
fn integrity_catches_footer_mismatch() {
    let mut tlsf = two_used_blocks();
    // The footer of the first block
    tlsf.pool.write(HEADER_SIZE + 64, 48);
    assert_eq!(
        tlsf.check_integrity(),
        Err(IntegrityError::FooterMismatch {
            offset: 0,
            header: 64,
            footer: 48
        })
    );
}

#[test]
fn integrity_catches_adjacent_free_blocks() {
    let mut tlsf = two_used_blocks();
    let a = tlsf.pool.ptr_at(HEADER_SIZE);
    unsafe { tlsf.deallocate(Some(a)) };
    tlsf.check_integrity().unwrap();

    Tag::at(80).set_used(&mut tlsf.pool, false);
    assert_eq!(
        tlsf.check_integrity(),
        Err(IntegrityError::AdjacentFree { offset: 0 })
    );
}

#[test]
fn integrity_catches_stale_bitmap() {
    let mut tlsf = two_used_blocks();
    tlsf.sl_bitmap[5] ^= 1;
    assert_eq!(
        tlsf.check_integrity(),
        Err(IntegrityError::Bitmap { fl: 5, sl: 0 })
    );

    let mut tlsf = two_used_blocks();
    tlsf.fl_bitmap ^= 1 << 7;
    assert_eq!(
        tlsf.check_integrity(),
        Err(IntegrityError::Bitmap { fl: 7, sl: 0 })
    );
}

#[test]
fn integrity_catches_unlisted_block() {
    let mut tlsf = two_used_blocks();
    let (fl, sl) = classify(TAIL_SIZE);
    assert_eq!(tlsf.first_free[fl][sl], Some(Tag::at(TAIL)));

    // Forget the tail without marking it used
    tlsf.first_free[fl][sl] = None;
    tlsf.sl_bitmap[fl].clear_bit(sl as u32);
    tlsf.fl_bitmap.clear_bit(fl as u32);
    assert_eq!(
        tlsf.check_integrity(),
        Err(IntegrityError::Unlisted { offset: TAIL })
    );
}

#[test]
fn integrity_catches_misfiled_block() {
    let mut tlsf = two_used_blocks();
    let (fl, sl) = classify(TAIL_SIZE);

    // Move the tail to the list for the smallest blocks
    tlsf.first_free[fl][sl] = None;
    tlsf.sl_bitmap[fl].clear_bit(sl as u32);
    tlsf.fl_bitmap.clear_bit(fl as u32);
    tlsf.first_free[5][0] = Some(Tag::at(TAIL));
    tlsf.sl_bitmap[5].set_bit(0);
    tlsf.fl_bitmap.set_bit(5);
    assert_eq!(
        tlsf.check_integrity(),
        Err(IntegrityError::Misfiled {
            fl: 5,
            sl: 0,
            offset: TAIL
        })
    );
}

#[test]
fn integrity_catches_broken_back_link() {
    let mut tlsf = Tlsf::new(4096);
    let a = tlsf.allocate(64).unwrap();
    let _fence1 = tlsf.allocate(32).unwrap();
    let c = tlsf.allocate(64).unwrap();
    let _fence2 = tlsf.allocate(32).unwrap();
    unsafe {
        tlsf.deallocate(Some(a));
        tlsf.deallocate(Some(c));
    }
    tlsf.check_integrity().unwrap();

    // List (6, 0) is `c -> a`
    let a = Tag::at(0);
    assert_eq!(a.prev_link(&tlsf.pool).map(Tag::offset), Some(128));
    a.set_prev_link(&mut tlsf.pool, None);
    assert_eq!(
        tlsf.check_integrity(),
        Err(IntegrityError::BrokenLink {
            fl: 6,
            sl: 0,
            offset: 0
        })
    );
}

#[test]
fn integrity_catches_free_byte_drift() {
    let mut tlsf = two_used_blocks();
    tlsf.free_bytes += 8;
    assert_eq!(
        tlsf.check_integrity(),
        Err(IntegrityError::FreeBytes {
            counted: TAIL_SIZE,
            recorded: TAIL_SIZE + 8
        })
    );
}

#[quickcheck]
fn random(pool_size: usize, bytecode: Vec<u8>) {
    random_inner(pool_size, bytecode);
}

fn random_inner(pool_size: usize, bytecode: Vec<u8>) -> Option<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let pool_size = pool_size % 65536;
    let mut sa = ShadowAllocator::new();
    let mut tlsf = Tlsf::new(pool_size);
    log::trace!("pool = {:?}", tlsf.pool);
    sa.insert_free_block(tlsf.pool.ptr_at(0), tlsf.pool_size());

    #[derive(Debug)]
    struct Alloc {
        ptr: NonNull<u8>,
        size: usize,
        fill: u8,
    }
    let mut allocs: Vec<Alloc> = Vec::new();

    let verify = |alloc: &Alloc, len: usize| {
        let bytes = unsafe { std::slice::from_raw_parts(alloc.ptr.as_ptr(), len) };
        assert!(
            bytes.iter().all(|&b| b == alloc.fill),
            "{:?} was corrupted",
            alloc
        );
    };

    let mut it = bytecode.iter().cloned();
    loop {
        match it.next()? % 3 {
            0 => {
                let len = u32::from_le_bytes([it.next()?, it.next()?, it.next()?, 0]);
                let len = ((len as u64 * pool_size as u64) >> 24) as usize;
                let fill = it.next()?;
                log::trace!("alloc {}", len);

                let ptr = tlsf.allocate(len);
                log::trace!(" → {:?}", ptr);

                if let Some(ptr) = ptr {
                    sa.allocate(len, ptr);
                    unsafe { ptr.as_ptr().write_bytes(fill, len) };
                    allocs.push(Alloc {
                        ptr,
                        size: len,
                        fill,
                    });
                }
            }
            1 => {
                let alloc_i = it.next()?;
                if !allocs.is_empty() {
                    let alloc = allocs.swap_remove(alloc_i as usize % allocs.len());
                    log::trace!("dealloc {:?}", alloc);
                    verify(&alloc, alloc.size);

                    unsafe { tlsf.deallocate(Some(alloc.ptr)) };
                    sa.deallocate(alloc.size, alloc.ptr);
                }
            }
            2 => {
                let alloc_i = it.next()?;
                let len = u32::from_le_bytes([it.next()?, it.next()?, it.next()?, 0]);
                let len = ((len as u64 * pool_size as u64) >> 24) as usize;
                if !allocs.is_empty() {
                    let i = alloc_i as usize % allocs.len();
                    let alloc = &mut allocs[i];
                    log::trace!("realloc {:?} to {}", alloc, len);

                    let new_ptr = unsafe { tlsf.reallocate(alloc.ptr, len) };
                    log::trace!(" → {:?}", new_ptr);

                    if let Some(new_ptr) = new_ptr {
                        let kept = Alloc {
                            ptr: new_ptr,
                            size: alloc.size.min(len),
                            fill: alloc.fill,
                        };
                        verify(&kept, kept.size);

                        sa.deallocate(alloc.size, alloc.ptr);
                        sa.allocate(len, new_ptr);
                        unsafe { new_ptr.as_ptr().write_bytes(alloc.fill, len) };
                        alloc.ptr = new_ptr;
                        alloc.size = len;
                    } else {
                        verify(alloc, alloc.size);
                    }
                }
            }
            _ => unreachable!(),
        }

        if let Err(e) = tlsf.check_integrity() {
            panic!("{}", e);
        }
    }
}
