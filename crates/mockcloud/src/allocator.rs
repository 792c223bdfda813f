//! VM identity and address-pair allocation
//!
//! Ids are `<region>-<n>` with `n` counting up from 1 for the lifetime of
//! the simulator. Address pairs walk a quad counter through the private
//! ranges in this order:
//!
//! ```text
//! 10.0.0.1 .. 10.253.253.253
//! 192.168.0.1 .. 192.168.253.253
//! 172.16.0.1 .. 172.31.253.253   (then exhausted)
//! ```
//!
//! The public half of a pair is the private address with 15 added to the
//! first octet (10.0.0.1 pairs with 25.0.0.1).
//!
//! The allocator has no lock of its own; it lives inside the compute guard
//! of [`crate::store::Store`], so id and address issue are serialised with
//! VM insertion.

use mockcloud_core::{CloudError, Result};

/// Offset added to the first octet to derive the public address
pub const PUBLIC_OCTET_OFFSET: u8 = 15;

/// Highest value the lower octets reach before rolling over
const OCTET_CEILING: u8 = 253;

/// Sequential VM id and address-pair issuer
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    next_id: u64,
    quads: [u8; 4],
}

impl AddressAllocator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            quads: [10, 0, 0, 0],
        }
    }

    /// Resume the address walk from a given position (the next pair issued
    /// is the successor of `quads`)
    ///
    /// Positions outside the three private ranges are exhausted.
    pub(crate) fn starting_at(quads: [u8; 4]) -> Self {
        Self { next_id: 1, quads }
    }

    /// Issue the next VM id for a region; never reused
    pub fn next_vm_id(&mut self, region_id: &str) -> String {
        let id = format!("{}-{}", region_id, self.next_id);
        self.next_id += 1;
        id
    }

    /// Issue the next `(private, public)` address pair
    ///
    /// Once the ranges are used up every call fails; the counter is left at
    /// its last good position.
    pub fn next_ip_pair(&mut self) -> Result<(String, String)> {
        let next = Self::successor(self.quads)
            .ok_or_else(|| CloudError::exhausted("private address ranges exhausted"))?;
        self.quads = next;

        let [a, b, c, d] = next;
        Ok((
            format!("{}.{}.{}.{}", a, b, c, d),
            format!("{}.{}.{}.{}", a + PUBLIC_OCTET_OFFSET, b, c, d),
        ))
    }

    fn successor(quads: [u8; 4]) -> Option<[u8; 4]> {
        let [mut a, mut b, mut c, mut d] = quads;
        if !matches!(a, 10 | 172 | 192) {
            return None;
        }

        if d < OCTET_CEILING {
            d += 1;
            return Some([a, b, c, d]);
        }
        d = 1;
        if c < OCTET_CEILING {
            c += 1;
            return Some([a, b, c, d]);
        }
        c = 0;
        match a {
            10 if b < OCTET_CEILING => b += 1,
            10 => {
                a = 192;
                b = 168;
            }
            192 => {
                a = 172;
                b = 16;
            }
            172 if b < 31 => b += 1,
            _ => return None,
        }

        Some([a, b, c, d])
    }
}

impl Default for AddressAllocator {
    fn default() -> Self {
        Self::new()
    }
}
