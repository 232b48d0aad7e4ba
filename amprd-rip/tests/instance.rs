//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use amprd_rip::config::{Config, DEFAULT_PASSWORD};
use amprd_rip::instance::Instance;
use amprd_rip::route::{ROUTE_TIMEOUT, Route, Tunnel};
use amprd_rip::southbound::{SystemAdapter, SystemError, SystemResult};
use const_addrs::{ip4, net4};
use ipnetwork::Ipv4Network;

//
// Recording system adapter. The engine's kernel interactions are
// observed instead of executed.
//

#[derive(Debug, Eq, PartialEq)]
enum Call {
    TunnelUp(String, Ipv4Addr),
    TunnelDown(String),
    RouteAdd(Ipv4Network, String),
    RouteChange(Ipv4Network, String),
    RouteRemove(Ipv4Network),
}

#[derive(Debug, Default)]
struct TestSystem {
    calls: Vec<Call>,
    // Error to inject into the next route_change call.
    change_error: Option<SystemError>,
}

impl SystemAdapter for TestSystem {
    async fn tunnel_up(
        &mut self,
        tunnel: &Tunnel,
        _rtable: u32,
    ) -> SystemResult<()> {
        self.calls
            .push(Call::TunnelUp(tunnel.ifname.clone(), tunnel.outer_remote));
        Ok(())
    }

    async fn tunnel_down(&mut self, tunnel: &Tunnel) -> SystemResult<()> {
        self.calls.push(Call::TunnelDown(tunnel.ifname.clone()));
        Ok(())
    }

    async fn route_add(
        &mut self,
        route: &Route,
        tunnel: &Tunnel,
        _rtable: u32,
    ) -> SystemResult<()> {
        self.calls
            .push(Call::RouteAdd(route.prefix, tunnel.ifname.clone()));
        Ok(())
    }

    async fn route_change(
        &mut self,
        route: &Route,
        tunnel: &Tunnel,
        _rtable: u32,
    ) -> SystemResult<()> {
        self.calls
            .push(Call::RouteChange(route.prefix, tunnel.ifname.clone()));
        match self.change_error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn route_remove(
        &mut self,
        route: &Route,
        _rtable: u32,
    ) -> SystemResult<()> {
        self.calls.push(Call::RouteRemove(route.prefix));
        Ok(())
    }
}

//
// Helper functions.
//

fn config() -> Config {
    Config::new(ip4!("192.0.2.1"), ip4!("44.190.1.1"))
}

fn instance() -> Instance<TestSystem> {
    Instance::new(config(), TestSystem::default())
}

fn auth_entry() -> Vec<u8> {
    let mut entry = vec![0xFF, 0xFF, 0x00, 0x02];
    let mut field = [0; 16];
    field[..DEFAULT_PASSWORD.len()]
        .copy_from_slice(DEFAULT_PASSWORD.as_bytes());
    entry.extend_from_slice(&field);
    entry
}

fn rte_entry(prefix: Ipv4Network, nexthop: Ipv4Addr) -> Vec<u8> {
    let mut entry = vec![0x00, 0x02, 0x00, 0x00];
    entry.extend_from_slice(&prefix.ip().octets());
    entry.extend_from_slice(&prefix.mask().octets());
    entry.extend_from_slice(&nexthop.octets());
    entry.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
    entry
}

fn datagram(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = vec![0x02, 0x02, 0x00, 0x00];
    for entry in entries {
        buf.extend_from_slice(entry);
    }
    buf
}

fn announce(prefix: Ipv4Network, nexthop: Ipv4Addr) -> Vec<u8> {
    datagram(&[auth_entry(), rte_entry(prefix, nexthop)])
}

fn find_tunnel<'a>(
    instance: &'a Instance<TestSystem>,
    gateway: Ipv4Addr,
) -> Option<&'a Tunnel> {
    instance.state.tunnels.find(gateway.into(), 32)
}

fn find_route<'a>(
    instance: &'a Instance<TestSystem>,
    prefix: Ipv4Network,
) -> Option<&'a Route> {
    instance.state.routes.find(prefix.network().into(), prefix.prefix())
}

//
// Tests.
//

#[tokio::test]
async fn test_new_route_creates_tunnel() {
    let mut instance = instance();
    let now = Instant::now();

    instance
        .process_datagram(&announce(net4!("44.1.2.0/24"), ip4!("10.0.0.1")), now)
        .await;

    let tunnel = find_tunnel(&instance, ip4!("10.0.0.1")).unwrap();
    assert_eq!(tunnel.ifname, "gif0");
    assert_eq!(tunnel.ifnum, 0);
    assert_eq!(tunnel.nref(), 1);
    assert_eq!(tunnel.outer_local, ip4!("192.0.2.1"));
    assert_eq!(tunnel.inner_local, ip4!("44.190.1.1"));
    assert_eq!(tunnel.inner_remote, ip4!("44.1.2.0"));

    let route = find_route(&instance, net4!("44.1.2.0/24")).unwrap();
    assert_eq!(route.tunnel, Some(ip4!("10.0.0.1")));
    assert_eq!(route.gateway, Some(ip4!("44.1.2.0")));

    assert_eq!(
        instance.system.calls,
        vec![
            Call::TunnelUp("gif0".to_owned(), ip4!("10.0.0.1")),
            Call::RouteAdd(net4!("44.1.2.0/24"), "gif0".to_owned()),
        ]
    );
}

#[tokio::test]
async fn test_second_route_reuses_tunnel() {
    let mut instance = instance();
    let now = Instant::now();

    let dgram = datagram(&[
        auth_entry(),
        rte_entry(net4!("44.1.2.0/24"), ip4!("10.0.0.1")),
        rte_entry(net4!("44.1.3.0/24"), ip4!("10.0.0.1")),
    ]);
    instance.process_datagram(&dgram, now).await;

    let tunnel = find_tunnel(&instance, ip4!("10.0.0.1")).unwrap();
    assert_eq!(tunnel.nref(), 2);
    assert_eq!(
        instance.system.calls,
        vec![
            Call::TunnelUp("gif0".to_owned(), ip4!("10.0.0.1")),
            Call::RouteAdd(net4!("44.1.2.0/24"), "gif0".to_owned()),
            Call::RouteAdd(net4!("44.1.3.0/24"), "gif0".to_owned()),
        ]
    );
}

#[tokio::test]
async fn test_gateway_inside_subnet_rejected() {
    let mut instance = instance();
    let now = Instant::now();

    instance
        .process_datagram(&announce(net4!("44.1.2.0/24"), ip4!("44.1.2.5")), now)
        .await;

    assert!(instance.state.tunnels.is_empty());
    assert!(instance.state.routes.is_empty());
    assert!(instance.system.calls.is_empty());
}

#[tokio::test]
async fn test_route_to_self_rejected() {
    let mut instance = instance();
    let now = Instant::now();

    instance
        .process_datagram(&announce(net4!("44.1.2.0/24"), ip4!("192.0.2.1")), now)
        .await;

    assert!(instance.state.tunnels.is_empty());
    assert!(instance.state.routes.is_empty());
    assert!(instance.system.calls.is_empty());
}

#[tokio::test]
async fn test_host_bits_canonicalized() {
    let mut instance = instance();
    let now = Instant::now();

    // 44.1.2.3/24 is indexed and installed as 44.1.2.0/24.
    let mut entry = vec![0x00, 0x02, 0x00, 0x00];
    entry.extend_from_slice(&[44, 1, 2, 3]);
    entry.extend_from_slice(&[255, 255, 255, 0]);
    entry.extend_from_slice(&ip4!("10.0.0.1").octets());
    entry.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
    instance
        .process_datagram(&datagram(&[auth_entry(), entry]), now)
        .await;

    let route = find_route(&instance, net4!("44.1.2.0/24")).unwrap();
    assert_eq!(route.prefix, net4!("44.1.2.0/24"));
    assert_eq!(
        instance.system.calls[1],
        Call::RouteAdd(net4!("44.1.2.0/24"), "gif0".to_owned()),
    );
}

#[tokio::test]
async fn test_route_migration_collapses_old_tunnel() {
    let mut instance = instance();
    let now = Instant::now();

    instance
        .process_datagram(&announce(net4!("44.1.2.0/24"), ip4!("10.0.0.1")), now)
        .await;
    instance
        .process_datagram(&announce(net4!("44.1.2.0/24"), ip4!("10.0.0.2")), now)
        .await;

    // The old tunnel lost its last reference and is gone; the new one
    // picked up the next interface number while gif0 still existed.
    assert!(find_tunnel(&instance, ip4!("10.0.0.1")).is_none());
    let tunnel = find_tunnel(&instance, ip4!("10.0.0.2")).unwrap();
    assert_eq!(tunnel.ifname, "gif1");
    assert_eq!(tunnel.nref(), 1);

    let route = find_route(&instance, net4!("44.1.2.0/24")).unwrap();
    assert_eq!(route.tunnel, Some(ip4!("10.0.0.2")));

    assert_eq!(
        instance.system.calls,
        vec![
            Call::TunnelUp("gif0".to_owned(), ip4!("10.0.0.1")),
            Call::RouteAdd(net4!("44.1.2.0/24"), "gif0".to_owned()),
            Call::TunnelUp("gif1".to_owned(), ip4!("10.0.0.2")),
            Call::RouteChange(net4!("44.1.2.0/24"), "gif1".to_owned()),
            Call::TunnelDown("gif0".to_owned()),
        ]
    );

    // gif0's number was released and is reused by the next tunnel.
    instance
        .process_datagram(&announce(net4!("44.9.0.0/16"), ip4!("10.0.0.3")), now)
        .await;
    let tunnel = find_tunnel(&instance, ip4!("10.0.0.3")).unwrap();
    assert_eq!(tunnel.ifname, "gif0");
}

#[tokio::test]
async fn test_route_change_not_found_falls_back() {
    let mut instance = instance();
    let now = Instant::now();

    instance
        .process_datagram(&announce(net4!("44.1.2.0/24"), ip4!("10.0.0.1")), now)
        .await;

    // The kernel claims the route is gone when it is repointed.
    instance.system.change_error = Some(SystemError::NotFound);
    instance
        .process_datagram(&announce(net4!("44.1.2.0/24"), ip4!("10.0.0.2")), now)
        .await;

    assert_eq!(
        instance.system.calls,
        vec![
            Call::TunnelUp("gif0".to_owned(), ip4!("10.0.0.1")),
            Call::RouteAdd(net4!("44.1.2.0/24"), "gif0".to_owned()),
            Call::TunnelUp("gif1".to_owned(), ip4!("10.0.0.2")),
            Call::RouteChange(net4!("44.1.2.0/24"), "gif1".to_owned()),
            Call::RouteRemove(net4!("44.1.2.0/24")),
            Call::RouteAdd(net4!("44.1.2.0/24"), "gif1".to_owned()),
            Call::TunnelDown("gif0".to_owned()),
        ]
    );
}

#[tokio::test]
async fn test_refresh_extends_expiration() {
    let mut instance = instance();
    let now = Instant::now();

    instance
        .process_datagram(&announce(net4!("44.1.2.0/24"), ip4!("10.0.0.1")), now)
        .await;
    let first_expiry = find_route(&instance, net4!("44.1.2.0/24"))
        .unwrap()
        .expires;
    assert_eq!(first_expiry, now + ROUTE_TIMEOUT);

    // A refresh does not touch the kernel, only the expiration.
    let later = now + Duration::from_secs(3600);
    instance
        .process_datagram(&announce(net4!("44.1.2.0/24"), ip4!("10.0.0.1")), later)
        .await;
    let route = find_route(&instance, net4!("44.1.2.0/24")).unwrap();
    assert_eq!(route.expires, later + ROUTE_TIMEOUT);
    assert_eq!(instance.system.calls.len(), 2);
}

#[tokio::test]
async fn test_expiration_sweep() {
    let mut instance = instance();
    let now = Instant::now();

    instance
        .process_datagram(&announce(net4!("44.1.2.0/24"), ip4!("10.0.0.1")), now)
        .await;

    // An authenticated datagram with no entries still runs the sweep.
    let later = now + ROUTE_TIMEOUT + Duration::from_secs(1);
    instance
        .process_datagram(&datagram(&[auth_entry()]), later)
        .await;

    assert!(instance.state.routes.is_empty());
    assert!(instance.state.tunnels.is_empty());
    assert_eq!(
        instance.system.calls[2..],
        [
            Call::RouteRemove(net4!("44.1.2.0/24")),
            Call::TunnelDown("gif0".to_owned()),
        ]
    );
}

#[tokio::test]
async fn test_expiration_keeps_shared_tunnel() {
    let mut instance = instance();
    let now = Instant::now();

    instance
        .process_datagram(&announce(net4!("44.1.2.0/24"), ip4!("10.0.0.1")), now)
        .await;
    let later = now + Duration::from_secs(3600);
    instance
        .process_datagram(&announce(net4!("44.1.3.0/24"), ip4!("10.0.0.1")), later)
        .await;

    // Only the first route lapses; the tunnel keeps its other route.
    let sweep = now + ROUTE_TIMEOUT + Duration::from_secs(1);
    instance
        .process_datagram(&datagram(&[auth_entry()]), sweep)
        .await;

    assert!(find_route(&instance, net4!("44.1.2.0/24")).is_none());
    assert!(find_route(&instance, net4!("44.1.3.0/24")).is_some());
    let tunnel = find_tunnel(&instance, ip4!("10.0.0.1")).unwrap();
    assert_eq!(tunnel.nref(), 1);
    assert_eq!(
        instance.system.calls[3..],
        [Call::RouteRemove(net4!("44.1.2.0/24"))]
    );
}

#[tokio::test]
async fn test_ignore_list_carves_out_default() {
    let mut config = config();
    config.ignore = vec![net4!("44.2.0.0/16")];
    let mut instance = Instance::new(config, TestSystem::default());
    let now = Instant::now();

    let dgram = datagram(&[
        auth_entry(),
        rte_entry(net4!("44.2.10.0/24"), ip4!("10.0.0.1")),
        rte_entry(net4!("44.1.2.0/24"), ip4!("10.0.0.1")),
    ]);
    instance.process_datagram(&dgram, now).await;

    assert!(find_route(&instance, net4!("44.2.10.0/24")).is_none());
    assert!(find_route(&instance, net4!("44.1.2.0/24")).is_some());
}

#[tokio::test]
async fn test_accept_list_is_exhaustive() {
    let mut config = config();
    config.accept = vec![net4!("44.0.0.0/8")];
    let mut instance = Instance::new(config, TestSystem::default());
    let now = Instant::now();

    let dgram = datagram(&[
        auth_entry(),
        rte_entry(net4!("45.1.0.0/16"), ip4!("10.0.0.1")),
        rte_entry(net4!("44.1.2.0/24"), ip4!("10.0.0.1")),
    ]);
    instance.process_datagram(&dgram, now).await;

    // With explicit accept rules there is no accept-all fallback.
    assert!(find_route(&instance, net4!("45.1.0.0/16")).is_none());
    assert!(find_route(&instance, net4!("44.1.2.0/24")).is_some());
}

#[tokio::test]
async fn test_more_specific_ignore_wins() {
    let mut config = config();
    config.accept = vec![net4!("44.0.0.0/8")];
    config.ignore = vec![net4!("44.2.0.0/16")];
    let mut instance = Instance::new(config, TestSystem::default());
    let now = Instant::now();

    instance
        .process_datagram(&announce(net4!("44.2.10.0/24"), ip4!("10.0.0.1")), now)
        .await;
    assert!(instance.state.routes.is_empty());
}

#[tokio::test]
async fn test_static_interfaces_reserved() {
    let mut config = config();
    config.static_interfaces = vec![0, 1];
    let mut instance = Instance::new(config, TestSystem::default());
    let now = Instant::now();

    instance
        .process_datagram(&announce(net4!("44.1.2.0/24"), ip4!("10.0.0.1")), now)
        .await;
    let tunnel = find_tunnel(&instance, ip4!("10.0.0.1")).unwrap();
    assert_eq!(tunnel.ifname, "gif2");

    // Static numbers stay reserved across the sweep.
    let later = now + ROUTE_TIMEOUT + Duration::from_secs(1);
    instance
        .process_datagram(&datagram(&[auth_entry()]), later)
        .await;
    instance
        .process_datagram(&announce(net4!("44.1.2.0/24"), ip4!("10.0.0.1")), later)
        .await;
    let tunnel = find_tunnel(&instance, ip4!("10.0.0.1")).unwrap();
    assert_eq!(tunnel.ifname, "gif2");
}

#[tokio::test]
async fn test_bad_entry_skipped_others_processed() {
    let mut instance = instance();
    let now = Instant::now();

    // Entry with a non-contiguous netmask, followed by a good one.
    let mut bad = rte_entry(net4!("44.1.2.0/24"), ip4!("10.0.0.1"));
    bad[11] = 0x01;
    let dgram = datagram(&[
        auth_entry(),
        bad,
        rte_entry(net4!("44.1.3.0/24"), ip4!("10.0.0.1")),
    ]);
    instance.process_datagram(&dgram, now).await;

    assert!(find_route(&instance, net4!("44.1.2.0/24")).is_none());
    assert!(find_route(&instance, net4!("44.1.3.0/24")).is_some());
}

#[tokio::test]
async fn test_unauthenticated_datagram_dropped() {
    let mut instance = instance();
    let now = Instant::now();

    let dgram = datagram(&[rte_entry(net4!("44.1.2.0/24"), ip4!("10.0.0.1"))]);
    instance.process_datagram(&dgram, now).await;

    assert!(instance.state.routes.is_empty());
    assert!(instance.system.calls.is_empty());
}
