//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use futures::TryStreamExt;
use rtnetlink::Handle;
use tracing::debug;

use super::{SystemAdapter, SystemError, SystemResult};
use crate::route::{Route, Tunnel};

// Tunnel management ioctls, from <linux/if_tunnel.h>.
const SIOCDEVPRIVATE: libc::c_ulong = 0x89F0;
const SIOCADDTUNNEL: libc::c_ulong = SIOCDEVPRIVATE + 1;
const SIOCDELTUNNEL: libc::c_ulong = SIOCDEVPRIVATE + 2;

// Base device the tunnel creation ioctl is addressed to.
const IPIP_BASE_DEVICE: &str = "tunl0";

// Don't-fragment bit of the IPv4 fragment-offset field.
const IP_DF: u16 = 0x4000;

// FFI struct used with the tunnel ioctls (<linux/if_tunnel.h>).
#[repr(C)]
#[derive(Copy, Clone)]
struct ip_tunnel_parm {
    name: [libc::c_char; libc::IFNAMSIZ],
    link: libc::c_int,
    i_flags: u16,
    o_flags: u16,
    i_key: u32,
    o_key: u32,
    iph: iphdr,
}

// FFI struct from <linux/ip.h>. The tunnel ioctls look only at the
// version/IHL, protocol, TTL, fragment and address fields.
#[repr(C)]
#[derive(Copy, Clone)]
struct iphdr {
    version_ihl: u8,
    tos: u8,
    tot_len: u16,
    id: u16,
    frag_off: u16,
    ttl: u8,
    protocol: u8,
    check: u16,
    saddr: u32,
    daddr: u32,
}

// System adapter backed by the Linux kernel: IPIP interfaces are
// managed through the tunnel ioctls on a control socket, routes
// through rtnetlink.
pub struct LinuxSystem {
    handle: Handle,
    ctl_fd: OwnedFd,
}

// ===== impl LinuxSystem =====

impl LinuxSystem {
    // One-time setup: spawn the netlink connection and open the
    // control socket used for interface ioctls.
    pub fn init() -> SystemResult<LinuxSystem> {
        let (conn, handle, _) =
            rtnetlink::new_connection().map_err(SystemError::Io)?;
        tokio::spawn(conn);

        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(SystemError::Io(io::Error::last_os_error()));
        }
        let ctl_fd = unsafe { OwnedFd::from_raw_fd(fd) };

        Ok(LinuxSystem { handle, ctl_fd })
    }

    fn ioctl<T>(&self, request: libc::c_ulong, arg: &mut T) -> SystemResult<()> {
        let ret = unsafe {
            libc::ioctl(
                self.ctl_fd.as_raw_fd(),
                request,
                arg as *mut T as *mut libc::c_void,
            )
        };
        if ret < 0 {
            return Err(SystemError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn tunnel_parm(&self, tunnel: &Tunnel) -> SystemResult<ip_tunnel_parm> {
        let mut parm: ip_tunnel_parm = unsafe { mem::zeroed() };
        copy_ifname(&mut parm.name, &tunnel.ifname)?;
        parm.iph.version_ihl = 0x45;
        parm.iph.frag_off = IP_DF.to_be();
        parm.iph.ttl = 64;
        parm.iph.protocol = libc::IPPROTO_IPIP as u8;
        parm.iph.saddr = u32::from(tunnel.outer_local).to_be();
        parm.iph.daddr = u32::from(tunnel.outer_remote).to_be();
        Ok(parm)
    }

    // Resolve an interface name to its kernel index.
    async fn ifindex(&self, ifname: &str) -> SystemResult<u32> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(ifname.to_owned())
            .execute();
        match links.try_next().await {
            Ok(Some(msg)) => Ok(msg.header.index),
            Ok(None) => Err(SystemError::NotFound),
            Err(error) => Err(map_netlink_error(error)),
        }
    }
}

impl SystemAdapter for LinuxSystem {
    // Bring a tunnel up. The ordering of steps matters: the interface
    // exists only after the creation ioctl, and IP cannot be
    // configured until then.
    //
    // Routing tables on Linux scope routes rather than interfaces, so
    // `rtable` takes effect when the routes are written, not here.
    async fn tunnel_up(
        &mut self,
        tunnel: &Tunnel,
        _rtable: u32,
    ) -> SystemResult<()> {
        debug!(ifname = %tunnel.ifname, remote = %tunnel.outer_remote,
            "creating tunnel interface");

        // Create the IPIP interface.
        let mut parm = self.tunnel_parm(tunnel)?;
        let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
        copy_ifname(&mut ifr.ifr_name, IPIP_BASE_DEVICE)?;
        ifr.ifr_ifru.ifru_data = &mut parm as *mut ip_tunnel_parm as *mut _;
        self.ioctl(SIOCADDTUNNEL, &mut ifr)?;

        // Configure IP on the interface.
        let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
        copy_ifname(&mut ifr.ifr_name, &tunnel.ifname)?;
        ifr.ifr_ifru.ifru_addr = sockaddr(tunnel.inner_local);
        self.ioctl(libc::SIOCSIFADDR, &mut ifr)?;
        ifr.ifr_ifru.ifru_dstaddr = sockaddr(tunnel.inner_remote);
        self.ioctl(libc::SIOCSIFDSTADDR, &mut ifr)?;

        // Mark the interface up and running.
        self.ioctl(libc::SIOCGIFFLAGS, &mut ifr)?;
        let flags = unsafe { ifr.ifr_ifru.ifru_flags }
            | (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
        ifr.ifr_ifru.ifru_flags = flags;
        self.ioctl(libc::SIOCSIFFLAGS, &mut ifr)?;

        Ok(())
    }

    async fn tunnel_down(&mut self, tunnel: &Tunnel) -> SystemResult<()> {
        debug!(ifname = %tunnel.ifname, remote = %tunnel.outer_remote,
            "destroying tunnel interface");

        let mut parm = self.tunnel_parm(tunnel)?;
        let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
        copy_ifname(&mut ifr.ifr_name, &tunnel.ifname)?;
        ifr.ifr_ifru.ifru_data = &mut parm as *mut ip_tunnel_parm as *mut _;
        self.ioctl(SIOCDELTUNNEL, &mut ifr)
    }

    async fn route_add(
        &mut self,
        route: &Route,
        tunnel: &Tunnel,
        rtable: u32,
    ) -> SystemResult<()> {
        debug!(prefix = %route.prefix, ifname = %tunnel.ifname,
            "installing route");

        let ifindex = self.ifindex(&tunnel.ifname).await?;
        let message = rtnetlink::RouteMessageBuilder::<Ipv4Addr>::new()
            .destination_prefix(route.prefix.network(), route.prefix.prefix())
            .gateway(tunnel.inner_remote)
            .output_interface(ifindex)
            .table_id(rtable)
            .build();
        let request = self.handle.route().add(message);
        request.execute().await.map_err(map_netlink_error)
    }

    async fn route_change(
        &mut self,
        route: &Route,
        tunnel: &Tunnel,
        rtable: u32,
    ) -> SystemResult<()> {
        debug!(prefix = %route.prefix, ifname = %tunnel.ifname,
            "changing route");

        let ifindex = self.ifindex(&tunnel.ifname).await?;
        let message = rtnetlink::RouteMessageBuilder::<Ipv4Addr>::new()
            .destination_prefix(route.prefix.network(), route.prefix.prefix())
            .gateway(tunnel.inner_remote)
            .output_interface(ifindex)
            .table_id(rtable)
            .build();
        let request = self.handle.route().add(message).replace();
        request.execute().await.map_err(map_netlink_error)
    }

    async fn route_remove(
        &mut self,
        route: &Route,
        rtable: u32,
    ) -> SystemResult<()> {
        debug!(prefix = %route.prefix, "uninstalling route");

        let message = rtnetlink::RouteMessageBuilder::<Ipv4Addr>::new()
            .destination_prefix(route.prefix.network(), route.prefix.prefix())
            .table_id(rtable)
            .build();
        let request = self.handle.route().del(message);
        request.execute().await.map_err(map_netlink_error)
    }
}

// ===== helper functions =====

fn copy_ifname(
    dst: &mut [libc::c_char; libc::IFNAMSIZ],
    ifname: &str,
) -> SystemResult<()> {
    let bytes = ifname.as_bytes();
    if bytes.len() >= libc::IFNAMSIZ {
        return Err(SystemError::Io(io::Error::from(
            io::ErrorKind::InvalidInput,
        )));
    }
    for (dst, src) in dst.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    Ok(())
}

fn sockaddr(addr: Ipv4Addr) -> libc::sockaddr {
    let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_addr = libc::in_addr {
        s_addr: u32::from(addr).to_be(),
    };
    unsafe { mem::transmute(sin) }
}

fn map_netlink_error(error: rtnetlink::Error) -> SystemError {
    if let rtnetlink::Error::NetlinkError(ref msg) = error
        && msg.raw_code() == -libc::ESRCH
    {
        return SystemError::NotFound;
    }
    SystemError::Netlink(error)
}
