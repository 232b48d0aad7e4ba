//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::ops::ControlFlow;
use std::time::Instant;

use tracing::error;

use amprd_utils::bitvec::Bitvec;
use amprd_utils::ip::{self, Ipv4AddrExt, PLEN_HOST};
use amprd_utils::ipmap::{IpMap, Order};

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::Instance;
use crate::packet::{Pdu, Rte};
use crate::route::{Route, RoutePolicy, Tunnel};
use crate::southbound::{SystemAdapter, SystemError};

// ===== datagram receipt =====

pub(crate) async fn process_datagram<S>(
    instance: &mut Instance<S>,
    data: &[u8],
    now: Instant,
) where
    S: SystemAdapter,
{
    let mut pdu = match Pdu::decode(data) {
        Ok(pdu) => pdu,
        Err(error) => {
            Error::PduDecodeError(error).log();
            return;
        }
    };
    if let Err(error) = pdu.verify_auth(&instance.config.password) {
        Error::PduAuthError(error).log();
        return;
    }
    Debug::PduRx(pdu.entry_count()).log();

    // Per-entry decode failures drop the entry, not the datagram.
    for index in 0..pdu.entry_count() {
        match pdu.entry(index) {
            Ok(rte) => process_response(instance, &rte, now).await,
            Err(error) => Error::RteDecodeError(index, error).log(),
        }
    }

    sweep_expired(instance, now).await;
}

// ===== response entry processing =====

pub(crate) async fn process_response<S>(
    instance: &mut Instance<S>,
    rte: &Rte,
    now: Instant,
) where
    S: SystemAdapter,
{
    let Instance {
        config,
        state,
        system,
    } = instance;

    Debug::ResponseRx(rte).log();

    // Zero any announced host bits past the netmask.
    let mut prefix = rte.prefix;
    if ip::has_host_bits(prefix) {
        Error::RteHostBits(prefix).log();
        prefix = ip::canonicalize(prefix);
    }

    // A route pointing back at this site is useless.
    if rte.nexthop == config.outer_local {
        Error::RouteToSelf(prefix, rte.nexthop).log();
        return;
    }
    // A gateway inside the network it announces cannot be reached
    // through the tunnel that would carry it.
    if prefix.contains(rte.nexthop) {
        Error::GatewayInSubnet(prefix, rte.nexthop).log();
        return;
    }
    // Longest-prefix verdict from the acceptance rules.
    if state
        .acceptable
        .nearest(prefix.network().to_u32(), prefix.prefix())
        != Some(&RoutePolicy::Accept)
    {
        Error::RouteNotAcceptable(prefix, rte.nexthop).log();
        return;
    }

    // Create the tunnel to this gateway on first reference.
    let gateway_key = rte.nexthop.to_u32();
    if state.tunnels.find(gateway_key, PLEN_HOST).is_none() {
        let mut tunnel = Tunnel::new(
            config.outer_local,
            rte.nexthop,
            config.inner_local,
            prefix.network(),
        );
        alloc_tunif(&mut tunnel, &mut state.interfaces);
        if let Err(error) =
            system.tunnel_up(&tunnel, config.route_table).await
        {
            error!(%error, ifname = %tunnel.ifname,
                "fatal: failed to bring tunnel up");
            std::process::exit(1);
        }
        Debug::TunnelCreate(&tunnel.ifname, &rte.nexthop).log();
        state.tunnels.insert(gateway_key, PLEN_HOST, tunnel);
    }

    // Index the route, creating it on first sight.
    let network_key = prefix.network().to_u32();
    let plen = prefix.prefix();
    if state.routes.find(network_key, plen).is_none() {
        Debug::RouteCreate(&prefix, &rte.nexthop).log();
        state
            .routes
            .insert(network_key, plen, Route::new(prefix, now));
    }
    let Some(route) = state.routes.find_mut(network_key, plen) else {
        return;
    };

    // The route is new or moved to a different tunnel.
    if route.tunnel != Some(rte.nexthop) {
        {
            let Some(tunnel) = state.tunnels.find_mut(gateway_key, PLEN_HOST)
            else {
                return;
            };
            if route.tunnel.is_none() {
                if let Err(error) =
                    system.route_add(route, tunnel, config.route_table).await
                {
                    Error::RouteInstallError(prefix, error).log();
                }
            } else {
                match system
                    .route_change(route, tunnel, config.route_table)
                    .await
                {
                    // The kernel lost the route: fall back to
                    // delete-and-add.
                    Err(SystemError::NotFound) => {
                        if let Err(error) = system
                            .route_remove(route, config.route_table)
                            .await
                        {
                            Error::RouteUninstallError(prefix, error).log();
                        }
                        if let Err(error) = system
                            .route_add(route, tunnel, config.route_table)
                            .await
                        {
                            Error::RouteInstallError(prefix, error).log();
                        }
                    }
                    Err(error) => {
                        Error::RouteInstallError(prefix, error).log();
                    }
                    Ok(()) => (),
                }
            }
            tunnel.unlink(route);
        }

        // Detach from the previous tunnel and collapse it if this was
        // its last route.
        if let Some(old_gateway) = route.tunnel.take() {
            if let Some(old_tunnel) =
                state.tunnels.find_mut(old_gateway.to_u32(), PLEN_HOST)
            {
                old_tunnel.unlink(route);
            }
            collapse_tunnel(
                &mut state.tunnels,
                &mut state.interfaces,
                &state.static_interfaces,
                system,
                old_gateway,
            )
            .await;
        }

        // Attach to the new tunnel.
        let Some(tunnel) = state.tunnels.find_mut(gateway_key, PLEN_HOST)
        else {
            return;
        };
        tunnel.link(route);
    } else {
        Debug::RouteRefresh(&prefix, &rte.nexthop).log();
    }

    route.refresh(now);
}

// ===== route expiration =====

pub(crate) async fn sweep_expired<S>(instance: &mut Instance<S>, now: Instant)
where
    S: SystemAdapter,
{
    let Instance {
        config,
        state,
        system,
    } = instance;

    // Collect first, act second: the routes trie is never mutated
    // while it is being walked.
    let mut expired = Vec::new();
    state.routes.walk(Order::In, &mut |key, plen, route: &Route| {
        if route.is_expired(now) {
            expired.push((key, plen));
        }
        ControlFlow::<()>::Continue(())
    });

    for (key, plen) in expired {
        let Some(mut route) = state.routes.remove(key, plen) else {
            continue;
        };
        Debug::RouteExpire(&route.prefix).log();

        let gateway = route.tunnel.take();
        if let Some(gateway) = gateway
            && let Some(tunnel) =
                state.tunnels.find_mut(gateway.to_u32(), PLEN_HOST)
        {
            tunnel.unlink(&mut route);
        }
        if let Err(error) =
            system.route_remove(&route, config.route_table).await
        {
            Error::RouteUninstallError(route.prefix, error).log();
        }
        if let Some(gateway) = gateway {
            collapse_tunnel(
                &mut state.tunnels,
                &mut state.interfaces,
                &state.static_interfaces,
                system,
                gateway,
            )
            .await;
        }
    }
}

// ===== tunnel maintenance =====

// Name a freshly created tunnel after the lowest unused interface
// number and mark the number taken.
fn alloc_tunif(tunnel: &mut Tunnel, interfaces: &mut Bitvec) {
    let ifnum = interfaces.next_clear();
    tunnel.ifnum = ifnum;
    tunnel.ifname = format!("gif{}", ifnum);
    interfaces.set(ifnum);
}

// Tear a tunnel down once nothing references it, releasing its
// interface number unless it is statically reserved.
async fn collapse_tunnel<S>(
    tunnels: &mut IpMap<Tunnel>,
    interfaces: &mut Bitvec,
    static_interfaces: &Bitvec,
    system: &mut S,
    gateway: Ipv4Addr,
) where
    S: SystemAdapter,
{
    let key = gateway.to_u32();
    let Some(tunnel) = tunnels.find(key, PLEN_HOST) else {
        return;
    };
    if tunnel.nref() != 0 {
        return;
    }

    let Some(tunnel) = tunnels.remove(key, PLEN_HOST) else {
        return;
    };
    Debug::TunnelDelete(&tunnel.ifname, &gateway).log();
    if let Err(error) = system.tunnel_down(&tunnel).await {
        error!(%error, ifname = %tunnel.ifname,
            "fatal: failed to tear tunnel down");
        std::process::exit(1);
    }
    if !static_interfaces.get(tunnel.ifnum) {
        interfaces.clear(tunnel.ifnum);
    }
}
