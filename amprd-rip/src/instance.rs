//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Instant;

use amprd_utils::bitvec::Bitvec;
use amprd_utils::ip::Ipv4AddrExt;
use amprd_utils::ipmap::IpMap;

use crate::config::Config;
use crate::error::IoError;
use crate::events;
use crate::network::PacketSource;
use crate::route::{Route, RoutePolicy, Tunnel};
use crate::southbound::SystemAdapter;

// The daemon's single owner of all mutable state. One instance runs
// one receive-and-reconcile loop; nothing else observes or mutates the
// tables, so a datagram is always fully reconciled before the next one
// is read.
pub struct Instance<S: SystemAdapter> {
    // Instance configuration data.
    pub config: Config,
    // Instance state data.
    pub state: InstanceState,
    // Boundary to the operating system.
    pub system: S,
}

#[derive(Debug, Default)]
pub struct InstanceState {
    // Installed routes, keyed by announced prefix.
    pub routes: IpMap<Route>,
    // Active tunnels, keyed by gateway address as a host prefix.
    pub tunnels: IpMap<Tunnel>,
    // Accept/ignore verdicts, consulted by longest-prefix match.
    pub acceptable: IpMap<RoutePolicy>,
    // Allocated tunnel interface numbers.
    pub interfaces: Bitvec,
    // Interface numbers reserved on the command line; never released.
    pub static_interfaces: Bitvec,
}

// ===== impl Instance =====

impl<S> Instance<S>
where
    S: SystemAdapter,
{
    pub fn new(config: Config, system: S) -> Instance<S> {
        let mut state = InstanceState::default();

        // Reserve statically managed interface numbers up front so the
        // allocator never hands them out.
        for ifnum in &config.static_interfaces {
            state.interfaces.set(*ifnum);
            state.static_interfaces.set(*ifnum);
        }

        // Seed the acceptance rules. Without explicit accept rules
        // everything is acceptable by default, with any ignore rules
        // carving exceptions out of that.
        for prefix in &config.ignore {
            state.acceptable.insert(
                prefix.network().to_u32(),
                prefix.prefix(),
                RoutePolicy::Ignore,
            );
        }
        for prefix in &config.accept {
            state.acceptable.insert(
                prefix.network().to_u32(),
                prefix.prefix(),
                RoutePolicy::Accept,
            );
        }
        if config.accept.is_empty() {
            state.acceptable.insert(0, 0, RoutePolicy::Accept);
        }

        Instance {
            config,
            state,
            system,
        }
    }

    // The main loop: block on one datagram, reconcile it, sweep for
    // expirations, repeat. Returns `Ok` only when a replay source runs
    // dry; socket errors are fatal.
    pub async fn run(&mut self, source: &mut PacketSource) -> Result<(), IoError> {
        let mut buf = [0; 16384];

        loop {
            let len = match source.recv(&mut buf).await? {
                Some(len) => len,
                None => break,
            };
            self.process_datagram(&buf[..len], Instant::now()).await;
        }

        Ok(())
    }

    // Reconcile one datagram against the tables.
    pub async fn process_datagram(&mut self, data: &[u8], now: Instant) {
        events::process_datagram(self, data, now).await;
    }
}
