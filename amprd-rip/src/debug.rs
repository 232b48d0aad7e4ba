//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tracing::{debug, info};

use crate::packet::Rte;

// Engine debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    PduRx(usize),
    ResponseRx(&'a Rte),
    RouteCreate(&'a Ipv4Network, &'a Ipv4Addr),
    RouteRefresh(&'a Ipv4Network, &'a Ipv4Addr),
    RouteExpire(&'a Ipv4Network),
    TunnelCreate(&'a str, &'a Ipv4Addr),
    TunnelDelete(&'a str, &'a Ipv4Addr),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::PduRx(entries) => {
                debug!(%entries, "{}", self);
            }
            Debug::ResponseRx(rte) => {
                let data = serde_json::to_string(&rte).unwrap();
                debug!(%data, "{}", self);
            }
            Debug::RouteCreate(prefix, nexthop) => {
                info!(%prefix, %nexthop, "{}", self);
            }
            Debug::RouteRefresh(prefix, nexthop) => {
                debug!(%prefix, %nexthop, "{}", self);
            }
            Debug::RouteExpire(prefix) => {
                info!(%prefix, "{}", self);
            }
            Debug::TunnelCreate(ifname, remote)
            | Debug::TunnelDelete(ifname, remote) => {
                info!(%ifname, %remote, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::PduRx(..) => {
                write!(f, "packet received")
            }
            Debug::ResponseRx(..) => {
                write!(f, "response entry")
            }
            Debug::RouteCreate(..) => {
                write!(f, "route created")
            }
            Debug::RouteRefresh(..) => {
                write!(f, "route refreshed")
            }
            Debug::RouteExpire(..) => {
                write!(f, "route expired")
            }
            Debug::TunnelCreate(..) => {
                write!(f, "tunnel created")
            }
            Debug::TunnelDelete(..) => {
                write!(f, "tunnel deleted")
            }
        }
    }
}
