/// CIDR block arithmetic for the fixed subnet partitioning scheme.
///
/// Zone index `i` gets a /19 public subnet at third-octet offset `i*64` and
/// a /20 private subnet at offset `i*64 + 32`, both carved from the
/// environment's address block. The arithmetic is load-bearing: changing it
/// reallocates live address ranges on the next deployment.
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

const PUBLIC_PREFIX: u8 = 19;
const PRIVATE_PREFIX: u8 = 20;

/// Offsets are expressed in third-octet units (256 addresses each)
const ZONE_STRIDE: u32 = 64 * 256;
const PRIVATE_OFFSET: u32 = 32 * 256;

/// An IPv4 address block in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrBlock {
    network: Ipv4Addr,
    prefix: u8,
}

impl CidrBlock {
    pub fn new(network: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 32 {
            bail!("invalid prefix length /{}", prefix);
        }
        let base = u32::from(network);
        if base & !Self::mask(prefix) != 0 {
            bail!("{}/{} has host bits set", network, prefix);
        }
        Ok(Self { network, prefix })
    }

    fn mask(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix)
        }
    }

    /// First address in the block
    pub fn first(&self) -> u32 {
        u32::from(self.network)
    }

    /// Number of addresses covered
    pub fn size(&self) -> u32 {
        1u32 << (32 - self.prefix)
    }

    /// Whether `other` is fully contained in this block
    pub fn contains(&self, other: &CidrBlock) -> bool {
        self.first() <= other.first()
            && other.first() as u64 + other.size() as u64 <= self.first() as u64 + self.size() as u64
    }

    /// Whether two blocks share any address
    pub fn overlaps(&self, other: &CidrBlock) -> bool {
        (self.first() as u64) < other.first() as u64 + other.size() as u64
            && (other.first() as u64) < self.first() as u64 + self.size() as u64
    }

    fn at_offset(base: &CidrBlock, offset: u32, prefix: u8) -> Result<Self> {
        let start = base
            .first()
            .checked_add(offset)
            .context("subnet offset overflows the address space")?;
        Self::new(Ipv4Addr::from(start), prefix)
    }
}

impl FromStr for CidrBlock {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .with_context(|| format!("invalid CIDR notation: {}", s))?;
        let network: Ipv4Addr = addr
            .parse()
            .with_context(|| format!("invalid network address in {}", s))?;
        let prefix: u8 = prefix
            .parse()
            .with_context(|| format!("invalid prefix length in {}", s))?;
        Self::new(network, prefix)
    }
}

impl fmt::Display for CidrBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Subnet pair for one availability zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneLayout {
    pub public: CidrBlock,
    pub private: CidrBlock,
}

/// Partition an address block into per-zone public/private subnets.
/// Fails when a subnet would fall outside the parent block.
pub fn partition(block: &CidrBlock, zone_count: usize) -> Result<Vec<ZoneLayout>> {
    if zone_count == 0 {
        bail!("zone count must be at least 1");
    }

    let mut zones = Vec::with_capacity(zone_count);
    for i in 0..zone_count as u32 {
        let public = CidrBlock::at_offset(block, i * ZONE_STRIDE, PUBLIC_PREFIX)?;
        let private = CidrBlock::at_offset(block, i * ZONE_STRIDE + PRIVATE_OFFSET, PRIVATE_PREFIX)?;

        if !block.contains(&public) || !block.contains(&private) {
            bail!(
                "zone count {} exceeds the capacity of address block {}",
                zone_count,
                block
            );
        }
        zones.push(ZoneLayout { public, private });
    }
    Ok(zones)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(s: &str) -> CidrBlock {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(block("10.10.0.0/16").to_string(), "10.10.0.0/16");
        assert!("10.10.0.0".parse::<CidrBlock>().is_err());
        assert!("10.10.0.1/16".parse::<CidrBlock>().is_err());
        assert!("10.10.0.0/33".parse::<CidrBlock>().is_err());
        assert!("10.10.0.x/16".parse::<CidrBlock>().is_err());
    }

    #[test]
    fn test_dev_layout_matches_expected_ranges() {
        let zones = partition(&block("10.10.0.0/16"), 2).unwrap();
        assert_eq!(zones[0].public, block("10.10.0.0/19"));
        assert_eq!(zones[0].private, block("10.10.32.0/20"));
        assert_eq!(zones[1].public, block("10.10.64.0/19"));
        assert_eq!(zones[1].private, block("10.10.96.0/20"));
    }

    #[test]
    fn test_layout_derives_from_the_environment_block() {
        let zones = partition(&block("10.30.0.0/16"), 2).unwrap();
        assert_eq!(zones[0].public, block("10.30.0.0/19"));
        assert_eq!(zones[1].private, block("10.30.96.0/20"));
    }

    #[test]
    fn test_all_subnets_disjoint_and_contained() {
        let parent = block("10.20.0.0/16");
        for zone_count in 1..=4 {
            let zones = partition(&parent, zone_count).unwrap();
            let mut all: Vec<CidrBlock> = Vec::new();
            for zone in &zones {
                all.push(zone.public);
                all.push(zone.private);
            }
            for subnet in &all {
                assert!(parent.contains(subnet), "{} not in {}", subnet, parent);
            }
            for (i, a) in all.iter().enumerate() {
                for b in &all[i + 1..] {
                    assert!(!a.overlaps(b), "{} overlaps {}", a, b);
                }
            }
        }
    }

    #[test]
    fn test_zone_count_exceeding_capacity_fails() {
        // A /16 holds at most 4 zone strides of 64 third-octet units
        assert!(partition(&block("10.10.0.0/16"), 5).is_err());
        // A /20 block cannot hold a /19 public subnet at all
        assert!(partition(&block("10.10.0.0/20"), 1).is_err());
        assert!(partition(&block("10.10.0.0/16"), 0).is_err());
    }
}
