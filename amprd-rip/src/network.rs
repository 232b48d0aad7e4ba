//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;

use socket2::{Domain, Socket, Type};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;

use crate::config::{RIPV2_GROUP, RIPV2_PORT};
use crate::error::IoError;

// Create the multicast receive socket: any-address bind on the RIP
// port, membership in the RIP group on whatever interface routing
// picks. A nonzero bind table marks the socket for fwmark-based policy
// routing, the Linux analogue of binding a socket to a routing table.
pub fn socket(bind_table: u32) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    if bind_table != 0 {
        socket.set_mark(bind_table)?;
    }
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, RIPV2_PORT);
    socket.bind(&SocketAddr::from(addr).into())?;

    let socket = UdpSocket::from_std(socket.into())?;
    socket.join_multicast_v4(RIPV2_GROUP, Ipv4Addr::UNSPECIFIED)?;

    Ok(socket)
}

// Where the main loop reads datagrams from: the network, or a capture
// file replayed record by record.
pub enum PacketSource {
    Socket(UdpSocket),
    Replay(File),
}

// ===== impl PacketSource =====

impl PacketSource {
    pub fn socket(socket: UdpSocket) -> PacketSource {
        PacketSource::Socket(socket)
    }

    pub async fn replay(path: &Path) -> io::Result<PacketSource> {
        Ok(PacketSource::Replay(File::open(path).await?))
    }

    // Read one datagram into `buf`. `Ok(None)` means a replay source
    // is exhausted and the loop should terminate deliberately.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, IoError> {
        match self {
            PacketSource::Socket(socket) => {
                let (len, _src) = socket
                    .recv_from(buf)
                    .await
                    .map_err(IoError::UdpRecvError)?;
                Ok(Some(len))
            }
            PacketSource::Replay(file) => {
                // Each record is a 16-bit big-endian length followed
                // by that many bytes of datagram.
                let mut header = [0; 2];
                match file.read_exact(&mut header).await {
                    Ok(_) => (),
                    Err(error)
                        if error.kind() == io::ErrorKind::UnexpectedEof =>
                    {
                        return Ok(None);
                    }
                    Err(error) => {
                        return Err(IoError::ReplayReadError(error));
                    }
                }
                let len = usize::from(u16::from_be_bytes(header));
                if len > buf.len() {
                    return Err(IoError::ReplayReadError(io::Error::from(
                        io::ErrorKind::InvalidData,
                    )));
                }
                file.read_exact(&mut buf[..len])
                    .await
                    .map_err(IoError::ReplayReadError)?;
                Ok(Some(len))
            }
        }
    }
}
