//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tracing::{error, info, warn};

use crate::packet::DecodeError;
use crate::southbound::SystemError;

// Engine errors. Everything here is recoverable: the offending
// datagram, entry or kernel operation is dropped and the loop goes on.
#[derive(Debug)]
pub enum Error {
    IoError(IoError),
    PduDecodeError(DecodeError),
    PduAuthError(DecodeError),
    RteDecodeError(usize, DecodeError),
    RteHostBits(Ipv4Network),
    RouteToSelf(Ipv4Network, Ipv4Addr),
    GatewayInSubnet(Ipv4Network, Ipv4Addr),
    RouteNotAcceptable(Ipv4Network, Ipv4Addr),
    RouteInstallError(Ipv4Network, SystemError),
    RouteUninstallError(Ipv4Network, SystemError),
}

// I/O errors.
#[derive(Debug)]
pub enum IoError {
    UdpSocketError(std::io::Error),
    UdpRecvError(std::io::Error),
    ReplayReadError(std::io::Error),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::PduDecodeError(error) | Error::PduAuthError(error) => {
                error!(%error, "{}", self);
            }
            Error::RteDecodeError(index, error) => {
                warn!(%index, %error, "{}", self);
            }
            Error::RteHostBits(prefix) => {
                warn!(%prefix, "{}", self);
            }
            Error::RouteToSelf(prefix, nexthop)
            | Error::GatewayInSubnet(prefix, nexthop)
            | Error::RouteNotAcceptable(prefix, nexthop) => {
                info!(%prefix, %nexthop, "{}", self);
            }
            Error::RouteInstallError(prefix, error)
            | Error::RouteUninstallError(prefix, error) => {
                error!(%prefix, %error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::PduDecodeError(..) => {
                write!(f, "failed to decode packet")
            }
            Error::PduAuthError(..) => {
                write!(f, "packet authentication failed")
            }
            Error::RteDecodeError(..) => {
                write!(f, "failed to decode entry")
            }
            Error::RteHostBits(..) => {
                write!(f, "announced network has bits past its netmask")
            }
            Error::RouteToSelf(..) => {
                write!(f, "skipping route to local address")
            }
            Error::GatewayInSubnet(..) => {
                write!(f, "skipping gateway inside announced subnet")
            }
            Error::RouteNotAcceptable(..) => {
                write!(f, "skipping non-acceptable route")
            }
            Error::RouteInstallError(..) => {
                write!(f, "failed to install route")
            }
            Error::RouteUninstallError(..) => {
                write!(f, "failed to uninstall route")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            Error::PduDecodeError(error)
            | Error::PduAuthError(error)
            | Error::RteDecodeError(_, error) => Some(error),
            Error::RouteInstallError(_, error)
            | Error::RouteUninstallError(_, error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        match self {
            IoError::UdpSocketError(error)
            | IoError::UdpRecvError(error)
            | IoError::ReplayReadError(error) => {
                error!(%error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::UdpSocketError(..) => {
                write!(f, "failed to create UDP socket")
            }
            IoError::UdpRecvError(..) => {
                write!(f, "failed to receive UDP packet")
            }
            IoError::ReplayReadError(..) => {
                write!(f, "failed to read replay record")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::UdpSocketError(error)
            | IoError::UdpRecvError(error)
            | IoError::ReplayReadError(error) => Some(error),
        }
    }
}
