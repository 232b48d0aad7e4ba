//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::path::PathBuf;

use ipnetwork::Ipv4Network;

// UDP port RIPv2 updates arrive on.
pub const RIPV2_PORT: u16 = 520;

// RIPv2 multicast group.
pub const RIPV2_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 9);

// Routing table tunnel routes are created in unless configured
// otherwise.
pub const DEFAULT_ROUTE_TABLE: u32 = 44;

// The network-wide plaintext password carried in the authentication
// entry of every announcement.
pub const DEFAULT_PASSWORD: &str = "pLaInTeXtpAsSwD";

// Upper bound on numeric command-line arguments (table and interface
// numbers).
pub const MAX_NUM: u32 = 1 << 20;

// Daemon configuration, assembled from the command line.
#[derive(Clone, Debug)]
pub struct Config {
    // Authentication password announcements must carry.
    pub password: String,
    // Local address tunnels are encapsulated from.
    pub outer_local: Ipv4Addr,
    // Local address numbered on each tunnel interface.
    pub inner_local: Ipv4Addr,
    // Routing table tunnels and routes are created in.
    pub route_table: u32,
    // Routing table the receive socket is bound against.
    pub bind_table: u32,
    // Announced prefixes to accept.
    pub accept: Vec<Ipv4Network>,
    // Announced prefixes to ignore.
    pub ignore: Vec<Ipv4Network>,
    // Interface numbers reserved for statically configured tunnels.
    pub static_interfaces: Vec<usize>,
    // Replay datagrams from a capture file instead of the network.
    pub replay: Option<PathBuf>,
}

impl Config {
    pub fn new(outer_local: Ipv4Addr, inner_local: Ipv4Addr) -> Config {
        Config {
            password: DEFAULT_PASSWORD.to_owned(),
            outer_local,
            inner_local,
            route_table: DEFAULT_ROUTE_TABLE,
            bind_table: 0,
            accept: Vec::new(),
            ignore: Vec::new(),
            static_interfaces: Vec::new(),
            replay: None,
        }
    }
}
