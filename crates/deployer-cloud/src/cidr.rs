//! IPv4 address blocks and the address space allocator
//!
//! The allocator is a pure function: given the same pool, prefix length and
//! exclusions it always carves the same blocks, lowest address first. It
//! knows nothing about concurrent callers; two provisions racing on the same
//! pool can still pick the same block.

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// A canonical IPv4 CIDR block (host bits are always zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    /// `10.0.0.0/8`, the default datacenter pool
    pub const PRIVATE: Ipv4Cidr = Ipv4Cidr {
        network: Ipv4Addr::new(10, 0, 0, 0),
        prefix: 8,
    };

    /// `0.0.0.0/0`, destination of default routes
    pub const ANYWHERE: Ipv4Cidr = Ipv4Cidr {
        network: Ipv4Addr::UNSPECIFIED,
        prefix: 0,
    };

    /// Build a block, rejecting prefix lengths over 32 and addresses with
    /// host bits set.
    pub fn new(network: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 32 {
            return Err(CloudError::InvalidCidr(format!(
                "{}/{}: prefix length must be 0-32",
                network, prefix
            )));
        }
        if u32::from(network) & !mask(prefix) != 0 {
            return Err(CloudError::InvalidCidr(format!(
                "{}/{}: host bits are set",
                network, prefix
            )));
        }
        Ok(Self { network, prefix })
    }

    fn from_parts(first: u64, prefix: u8) -> Self {
        Self {
            network: Ipv4Addr::from(first as u32),
            prefix,
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// First address in the block
    pub fn first(&self) -> u64 {
        u64::from(u32::from(self.network))
    }

    /// Last address in the block (inclusive)
    pub fn last(&self) -> u64 {
        self.first() + self.size() - 1
    }

    /// Number of addresses in the block
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    /// Whether `other` lies entirely inside this block
    pub fn contains(&self, other: &Ipv4Cidr) -> bool {
        self.first() <= other.first() && other.last() <= self.last()
    }

    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        self.first() <= other.last() && other.first() <= self.last()
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| CloudError::InvalidCidr(format!("{}: missing prefix length", s)))?;
        let network = addr
            .parse::<Ipv4Addr>()
            .map_err(|e| CloudError::InvalidCidr(format!("{}: {}", s, e)))?;
        let prefix = prefix
            .parse::<u8>()
            .map_err(|e| CloudError::InvalidCidr(format!("{}: {}", s, e)))?;
        Self::new(network, prefix)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = CloudError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(value: Ipv4Cidr) -> Self {
        value.to_string()
    }
}

/// Carve `count` blocks of length `prefix` out of `pool`.
///
/// Returns the lowest-addressed blocks that overlap nothing in `exclude` and
/// nothing already returned. Fails with
/// [`CloudError::AddressSpaceExhausted`] when fewer than `count` fit.
pub fn allocate(
    pool: Ipv4Cidr,
    prefix: u8,
    exclude: &[Ipv4Cidr],
    count: usize,
) -> Result<Vec<Ipv4Cidr>> {
    allocate_from(&[pool], prefix, exclude, count)
}

/// Carve a single block, walking `pools` in order.
pub fn allocate_one_from(pools: &[Ipv4Cidr], prefix: u8, exclude: &[Ipv4Cidr]) -> Result<Ipv4Cidr> {
    allocate_from(pools, prefix, exclude, 1)?
        .into_iter()
        .next()
        .ok_or_else(|| CloudError::AddressSpaceExhausted {
            pools: pools.to_vec(),
            prefix,
            requested: 1,
            available: 0,
        })
}

/// Like [`allocate`], walking several pools in order.
pub fn allocate_from(
    pools: &[Ipv4Cidr],
    prefix: u8,
    exclude: &[Ipv4Cidr],
    count: usize,
) -> Result<Vec<Ipv4Cidr>> {
    if prefix > 32 {
        return Err(CloudError::InvalidCidr(format!(
            "/{}: prefix length must be 0-32",
            prefix
        )));
    }

    let step = 1u64 << (32 - u32::from(prefix));
    let mut found: Vec<Ipv4Cidr> = Vec::with_capacity(count);

    for pool in pools {
        // A pool smaller than the requested block cannot hold any candidate.
        if prefix < pool.prefix() {
            continue;
        }

        let mut cursor = pool.first();
        while found.len() < count && cursor + step - 1 <= pool.last() {
            let candidate = Ipv4Cidr::from_parts(cursor, prefix);
            let blocker = exclude
                .iter()
                .chain(found.iter())
                .filter(|taken| taken.overlaps(&candidate))
                .map(|taken| taken.last())
                .max();

            match blocker {
                Some(blocked_until) => {
                    // Jump past the whole blocking range, staying aligned.
                    cursor = (blocked_until + 1).div_ceil(step) * step;
                }
                None => {
                    found.push(candidate);
                    cursor += step;
                }
            }
        }

        if found.len() == count {
            break;
        }
    }

    if found.len() < count {
        return Err(CloudError::AddressSpaceExhausted {
            pools: pools.to_vec(),
            prefix,
            requested: count,
            available: found.len(),
        });
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(s: &str) -> Ipv4Cidr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let block = cidr("10.1.0.0/16");
        assert_eq!(block.network(), Ipv4Addr::new(10, 1, 0, 0));
        assert_eq!(block.prefix(), 16);
        assert_eq!(block.to_string(), "10.1.0.0/16");
        assert_eq!(block.size(), 65536);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("10.0.0.0".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.1/8".parse::<Ipv4Cidr>().is_err());
        assert!("ten.0.0.0/8".parse::<Ipv4Cidr>().is_err());
    }

    #[test]
    fn test_overlap_and_contains() {
        let pool = cidr("10.0.0.0/8");
        let a = cidr("10.0.0.0/16");
        let b = cidr("10.0.255.0/24");
        let c = cidr("10.1.0.0/16");

        assert!(pool.contains(&a));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(!a.contains(&pool));
    }

    #[test]
    fn test_first_datacenter_block() {
        let blocks = allocate(cidr("10.0.0.0/8"), 16, &[], 1).unwrap();
        assert_eq!(blocks, vec![cidr("10.0.0.0/16")]);
    }

    #[test]
    fn test_exclusion_skips_taken_block() {
        let blocks = allocate(cidr("10.0.0.0/8"), 16, &[cidr("10.0.0.0/16")], 1).unwrap();
        assert_eq!(blocks, vec![cidr("10.1.0.0/16")]);
    }

    #[test]
    fn test_exclusion_larger_than_candidate_is_skipped_whole() {
        let blocks = allocate(cidr("10.0.0.0/16"), 24, &[cidr("10.0.0.0/18")], 2).unwrap();
        assert_eq!(blocks, vec![cidr("10.0.64.0/24"), cidr("10.0.65.0/24")]);
    }

    #[test]
    fn test_exclusion_smaller_than_candidate() {
        // A /28 in use blocks the whole /24 that contains it.
        let blocks = allocate(cidr("10.0.0.0/16"), 24, &[cidr("10.0.0.16/28")], 1).unwrap();
        assert_eq!(blocks, vec![cidr("10.0.1.0/24")]);
    }

    #[test]
    fn test_multiple_blocks_are_disjoint_and_ordered() {
        let existing = [cidr("10.0.0.0/24"), cidr("10.0.2.0/24")];
        let blocks = allocate(cidr("10.0.0.0/16"), 24, &existing, 3).unwrap();
        assert_eq!(
            blocks,
            vec![cidr("10.0.1.0/24"), cidr("10.0.3.0/24"), cidr("10.0.4.0/24")]
        );
    }

    #[test]
    fn test_exhaustion() {
        let err = allocate(cidr("10.0.0.0/30"), 31, &[], 3).unwrap_err();
        match err {
            CloudError::AddressSpaceExhausted {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_prefix_shorter_than_pool_is_exhausted() {
        let err = allocate(cidr("10.0.0.0/16"), 8, &[], 1).unwrap_err();
        assert!(matches!(err, CloudError::AddressSpaceExhausted { .. }));
    }

    #[test]
    fn test_allocate_from_falls_through_pools() {
        let pools = [cidr("10.0.0.0/16"), cidr("172.16.0.0/12")];
        let blocks = allocate_from(&pools, 16, &[cidr("10.0.0.0/16")], 1).unwrap();
        assert_eq!(blocks, vec![cidr("172.16.0.0/16")]);
    }

    #[test]
    fn test_top_of_address_space() {
        let blocks = allocate(cidr("255.255.255.0/24"), 25, &[], 2).unwrap();
        assert_eq!(
            blocks,
            vec![cidr("255.255.255.0/25"), cidr("255.255.255.128/25")]
        );
    }

    #[test]
    fn test_serde_as_string() {
        let block = cidr("192.168.0.0/16");
        let json = serde_json::to_string(&block).unwrap();
        assert_eq!(json, "\"192.168.0.0/16\"");
        let back: Ipv4Cidr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }
}
