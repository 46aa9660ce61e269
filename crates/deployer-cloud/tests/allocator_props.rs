//! Properties of the address space allocator over arbitrary pools

use deployer_cloud::cidr::{allocate, allocate_from};
use deployer_cloud::{CloudError, Ipv4Cidr};
use proptest::prelude::*;
use std::net::Ipv4Addr;

/// A canonical block: random address, host bits cleared
fn block(min_prefix: u8, max_prefix: u8) -> impl Strategy<Value = Ipv4Cidr> {
    (any::<u32>(), min_prefix..=max_prefix).prop_map(|(addr, prefix)| {
        let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix)) };
        Ipv4Cidr::new(Ipv4Addr::from(addr & mask), prefix).unwrap()
    })
}

/// Exclusions near the pool so they actually collide
fn exclusions_in(pool: Ipv4Cidr) -> impl Strategy<Value = Vec<Ipv4Cidr>> {
    let span = pool.size();
    prop::collection::vec((0..span, pool.prefix()..=30u8), 0..6).prop_map(move |raw| {
        raw.into_iter()
            .map(|(offset, prefix)| {
                let addr = (pool.first() + offset) as u32;
                let mask = u32::MAX << (32 - u32::from(prefix));
                Ipv4Cidr::new(Ipv4Addr::from(addr & mask), prefix).unwrap()
            })
            .collect()
    })
}

fn pool_and_exclusions() -> impl Strategy<Value = (Ipv4Cidr, Vec<Ipv4Cidr>)> {
    block(8, 24).prop_flat_map(|pool| (Just(pool), exclusions_in(pool)))
}

proptest! {
    #[test]
    fn allocated_blocks_are_disjoint_and_inside_pool(
        (pool, exclude) in pool_and_exclusions(),
        extra in 0u8..=6,
        count in 1usize..8,
    ) {
        let prefix = (pool.prefix() + extra).min(32);
        match allocate(pool, prefix, &exclude, count) {
            Ok(blocks) => {
                prop_assert_eq!(blocks.len(), count);
                for (i, b) in blocks.iter().enumerate() {
                    prop_assert!(pool.contains(b), "{} outside {}", b, pool);
                    prop_assert_eq!(b.prefix(), prefix);
                    for e in &exclude {
                        prop_assert!(!b.overlaps(e), "{} overlaps excluded {}", b, e);
                    }
                    for other in &blocks[i + 1..] {
                        prop_assert!(!b.overlaps(other), "{} overlaps sibling {}", b, other);
                    }
                }
            }
            Err(CloudError::AddressSpaceExhausted { requested, available, .. }) => {
                prop_assert_eq!(requested, count);
                prop_assert!(available < count);
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    #[test]
    fn asking_for_more_than_fits_is_exhaustion(pool in block(16, 28), extra in 0u8..=4) {
        let prefix = pool.prefix() + extra;
        let capacity = 1usize << extra;
        prop_assert!(allocate(pool, prefix, &[], capacity).is_ok());
        let err = allocate(pool, prefix, &[], capacity + 1).unwrap_err();
        let is_exhausted = matches!(err, CloudError::AddressSpaceExhausted { available, .. } if available == capacity);
        prop_assert!(is_exhausted);
    }

    #[test]
    fn allocation_is_deterministic(
        (pool, exclude) in pool_and_exclusions(),
        count in 1usize..4,
    ) {
        let prefix = (pool.prefix() + 4).min(32);
        let first = allocate(pool, prefix, &exclude, count).ok();
        let second = allocate(pool, prefix, &exclude, count).ok();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn later_pools_are_used_only_when_earlier_ones_are_full(
        first in block(20, 24),
        second in block(20, 24),
    ) {
        prop_assume!(!first.overlaps(&second));
        let prefix = 24;
        let from_first = 1usize << (prefix - first.prefix());
        let blocks = allocate_from(&[first, second], prefix, &[], from_first + 1).unwrap();
        prop_assert!(blocks[..from_first].iter().all(|b| first.contains(b)));
        prop_assert!(second.contains(&blocks[from_first]));
    }
}
