//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod linux;

use crate::route::{Route, Tunnel};

// Errors reported by the system adapter, by kind. `NotFound` is the
// only kind the engine reacts to (a failed route change falls back to
// remove-and-add); everything else is logged or fatal per call site.
#[derive(Debug)]
pub enum SystemError {
    NotFound,
    Io(std::io::Error),
    Netlink(rtnetlink::Error),
}

// Type aliases.
pub type SystemResult<T> = Result<T, SystemError>;

// The narrow boundary between the reconciliation engine and the
// operating system: bringing encapsulation interfaces up and down and
// writing kernel routes. The engine never touches the kernel except
// through this trait, which also gives the tests a place to observe
// it.
#[allow(async_fn_in_trait)]
pub trait SystemAdapter {
    // Create, configure and mark running an IP-in-IP interface with
    // the tunnel's outer and inner endpoints.
    async fn tunnel_up(&mut self, tunnel: &Tunnel, rtable: u32)
        -> SystemResult<()>;

    // Destroy the tunnel's interface.
    async fn tunnel_down(&mut self, tunnel: &Tunnel) -> SystemResult<()>;

    // Install a route to the tunnel in the given routing table.
    async fn route_add(
        &mut self,
        route: &Route,
        tunnel: &Tunnel,
        rtable: u32,
    ) -> SystemResult<()>;

    // Repoint an installed route at a different tunnel.
    async fn route_change(
        &mut self,
        route: &Route,
        tunnel: &Tunnel,
        rtable: u32,
    ) -> SystemResult<()>;

    // Delete an installed route.
    async fn route_remove(&mut self, route: &Route, rtable: u32)
        -> SystemResult<()>;
}

// ===== impl SystemError =====

impl std::fmt::Display for SystemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SystemError::NotFound => {
                write!(f, "no such object in the kernel")
            }
            SystemError::Io(..) => {
                write!(f, "system call failed")
            }
            SystemError::Netlink(..) => {
                write!(f, "netlink request failed")
            }
        }
    }
}

impl std::error::Error for SystemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SystemError::NotFound => None,
            SystemError::Io(error) => Some(error),
            SystemError::Netlink(error) => Some(error),
        }
    }
}
