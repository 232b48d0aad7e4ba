//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use derive_new::new;
use ipnetwork::Ipv4Network;

// How long an announced route stays installed without being refreshed.
// Much longer than the expected interval between announcements.
pub const ROUTE_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

// One installed prefix-to-tunnel binding. Routes are owned by the
// routes trie; the owning tunnel is referenced by its key in the
// tunnels trie (its outer remote address).
#[derive(Debug, Eq, PartialEq)]
pub struct Route {
    // Announced network, host bits zeroed.
    pub prefix: Ipv4Network,
    // Inner remote address of the owning tunnel, while attached.
    pub gateway: Option<Ipv4Addr>,
    // Outer remote address of the owning tunnel, while attached.
    pub tunnel: Option<Ipv4Addr>,
    // When the route lapses unless refreshed first.
    pub expires: Instant,
}

// One IP-in-IP encapsulation interface to a remote site. Tunnels are
// owned by the tunnels trie, keyed on `outer_remote` as a host prefix.
#[derive(Debug, Eq, PartialEq, new)]
pub struct Tunnel {
    // Local and remote addresses of the encapsulating packets.
    pub outer_local: Ipv4Addr,
    pub outer_remote: Ipv4Addr,
    // Local and remote addresses numbered on the interface itself.
    pub inner_local: Ipv4Addr,
    pub inner_remote: Ipv4Addr,
    // Interface name and number, assigned on allocation.
    #[new(default)]
    pub ifname: String,
    #[new(default)]
    pub ifnum: usize,
    // Prefixes of the routes attached to this tunnel.
    #[new(default)]
    pub routes: BTreeSet<Ipv4Network>,
}

// Verdict attached to a prefix of the acceptance trie.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RoutePolicy {
    Accept,
    Ignore,
}

// ===== impl Route =====

impl Route {
    pub(crate) fn new(prefix: Ipv4Network, now: Instant) -> Route {
        Route {
            prefix,
            gateway: None,
            tunnel: None,
            expires: now,
        }
    }

    // Push the expiration out by the route timeout.
    pub(crate) fn refresh(&mut self, now: Instant) {
        self.expires = now + ROUTE_TIMEOUT;
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.expires <= now
    }
}

// ===== impl Tunnel =====

impl Tunnel {
    // Number of routes referencing this tunnel. The tunnel is torn
    // down when this drops to zero.
    pub fn nref(&self) -> usize {
        self.routes.len()
    }

    // Attach a route: record it and point it at this tunnel.
    pub(crate) fn link(&mut self, route: &mut Route) {
        self.routes.insert(route.prefix);
        route.tunnel = Some(self.outer_remote);
        route.gateway = Some(self.inner_remote);
    }

    // Detach a route if it is attached here; a no-op otherwise.
    pub(crate) fn unlink(&mut self, route: &mut Route) {
        if self.routes.remove(&route.prefix) {
            route.gateway = None;
        }
    }
}
