//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use amprd_utils::ip;

#[test]
fn test_valid_netmasks() {
    for (netmask, plen) in [
        (0x0000_0000, 0),
        (0x8000_0000, 1),
        (0xFF00_0000, 8),
        (0xFFFF_0000, 16),
        (0xFFFF_FF00, 24),
        (0xFFFF_FF80, 25),
        (0xFFFF_FFFE, 31),
        (0xFFFF_FFFF, 32),
    ] {
        assert!(ip::is_valid_netmask(netmask));
        assert_eq!(ip::netmask_to_plen(netmask), Some(plen));
        assert_eq!(ip::plen_to_netmask(plen), netmask);
    }
}

#[test]
fn test_invalid_netmasks() {
    for netmask in [0xFF00_FF00u32, 0xFFFF_FF01, 0x0000_0001, 0x7FFF_FFFF] {
        assert!(!ip::is_valid_netmask(netmask));
        assert_eq!(ip::netmask_to_plen(netmask), None);
    }
}

#[test]
fn test_canonicalize() {
    let prefix = "44.1.2.3/24".parse().unwrap();
    assert!(ip::has_host_bits(prefix));
    let canonical = ip::canonicalize(prefix);
    assert!(!ip::has_host_bits(canonical));
    assert_eq!(canonical, "44.1.2.0/24".parse().unwrap());
}
