//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

// A host route's prefix length.
pub const PLEN_HOST: u8 = 32;

// Check whether `netmask` is a contiguous IPv4 network mask. If it is,
// `!netmask + 1` is a power of two, and a power of two ANDed with its
// predecessor is zero.
pub fn is_valid_netmask(netmask: u32) -> bool {
    let hostbits = !netmask;
    hostbits.wrapping_add(1) & hostbits == 0
}

// Convert a contiguous netmask to its prefix length.
pub fn netmask_to_plen(netmask: u32) -> Option<u8> {
    if !is_valid_netmask(netmask) {
        return None;
    }
    Some(netmask.count_ones() as u8)
}

// Convert a prefix length to a netmask. Lengths above 32 saturate to a
// host mask.
pub fn plen_to_netmask(plen: u8) -> u32 {
    match plen {
        0 => 0,
        1..32 => !0 << (32 - plen),
        _ => !0,
    }
}

// Return the prefix with its host bits zeroed.
pub fn canonicalize(prefix: Ipv4Network) -> Ipv4Network {
    Ipv4Network::new(prefix.network(), prefix.prefix())
        .expect("valid prefix length")
}

// Check whether the prefix has host bits set past its netmask.
pub fn has_host_bits(prefix: Ipv4Network) -> bool {
    prefix.ip() != prefix.network()
}

// Extension methods for Ipv4Addr.
pub trait Ipv4AddrExt {
    // Return the address as a host-order u32.
    fn to_u32(&self) -> u32;
}

impl Ipv4AddrExt for Ipv4Addr {
    fn to_u32(&self) -> u32 {
        u32::from(*self)
    }
}
