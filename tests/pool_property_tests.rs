//! Property-based tests for the packet memory pool
//!
//! Regions handed out by the pool never overlap, whatever order they are
//! released in, and the pool is empty once every region is gone.

use proptest::prelude::*;
use sigstream::pool::{PacketMemoryPool, PoolRegion};

#[derive(Debug, Clone)]
enum Op {
    Allocate { samples: usize, stride: usize },
    Release { pick: usize },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1usize..64, 1usize..16).prop_map(|(samples, stride)| Op::Allocate { samples, stride }),
        2 => any::<usize>().prop_map(|pick| Op::Release { pick }),
    ]
}

fn overlaps(a: &PoolRegion, b: &PoolRegion) -> bool {
    a.offset() < b.offset() + b.len() && b.offset() < a.offset() + a.len()
}

proptest! {
    /// Property: live regions are disjoint and inside the pool
    #[test]
    fn live_regions_never_overlap(
        capacity in 64usize..1024,
        ops in prop::collection::vec(arb_op(), 1..150),
    ) {
        let pool = PacketMemoryPool::new(capacity);
        let mut live: Vec<PoolRegion> = Vec::new();

        for op in ops {
            match op {
                Op::Allocate { samples, stride } => {
                    if let Ok(allocation) = pool.allocate(samples, stride) {
                        let region = allocation.region;
                        prop_assert!(allocation.granted_samples >= 1);
                        prop_assert!(allocation.granted_samples <= samples);
                        prop_assert_eq!(region.len(), allocation.granted_samples * stride);
                        prop_assert!(region.offset() + region.len() <= capacity);
                        for other in &live {
                            prop_assert!(!overlaps(&region, other));
                        }
                        live.push(region);
                    }
                }
                Op::Release { pick } => {
                    if !live.is_empty() {
                        let index = pick % live.len();
                        live.swap_remove(index);
                    }
                }
            }

            // Holes released out of order stay counted until the oldest region goes
            let used: usize = live.iter().map(|r| r.len()).sum();
            prop_assert!(pool.used_bytes() >= used);
            prop_assert!(pool.used_bytes() <= capacity);
            prop_assert_eq!(pool.outstanding(), live.len());
        }

        live.clear();
        prop_assert!(pool.is_empty());
        prop_assert_eq!(pool.used_bytes(), 0);
    }

    /// Property: region contents survive other regions being released
    #[test]
    fn contents_are_isolated(lens in prop::collection::vec(1usize..32, 2..12)) {
        let pool = PacketMemoryPool::new(512);
        let mut regions = Vec::new();
        for (i, len) in lens.iter().enumerate() {
            let mut region = pool.allocate_bytes(*len).unwrap().region;
            region.fill(&vec![i as u8; *len]);
            regions.push((i as u8, region));
        }

        // Release every other region, then check the rest are untouched
        let mut kept = Vec::new();
        for (n, (tag, region)) in regions.into_iter().enumerate() {
            if n % 2 == 0 {
                drop(region);
            } else {
                kept.push((tag, region));
            }
        }
        for (tag, region) in &kept {
            prop_assert!(region.to_bytes().iter().all(|b| b == tag));
        }
    }
}
