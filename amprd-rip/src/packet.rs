//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::{Buf, Bytes};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use amprd_utils::bytes::BytesExt;
use amprd_utils::ip;

//
// The packet format of the 44 network's RIPv2 dialect is:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  command (1)  |  version (1)  |       must be zero (2)        |
// +---------------+---------------+-------------------------------+
// |                                                               |
// ~                         RIP Entry (20)                        ~
// |                                                               |
// +---------------+---------------+---------------+---------------+
//
// Unlike standard RIPv2, the command and version octets carry no
// meaning for receivers; the body is simply a run of 20-octet entries,
// the first of which must be the plaintext authentication entry.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Pdu {
    // PDU command.
    pub command: u8,
    // PDU version.
    pub version: u8,
    // Undecoded run of 20-octet entries.
    data: Bytes,
}

//
// The format of the 20-octet route entry is:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Address Family Identifier (2) |        Route Tag (2)          |
// +-------------------------------+-------------------------------+
// |                         IP Address (4)                        |
// +---------------------------------------------------------------+
// |                         Subnet Mask (4)                       |
// +---------------------------------------------------------------+
// |                         Next Hop (4)                          |
// +---------------------------------------------------------------+
// |                         Metric (4)                            |
// +---------------------------------------------------------------+
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Rte {
    pub addr_family: u16,
    pub tag: u16,
    pub prefix: Ipv4Network,
    pub nexthop: Ipv4Addr,
    pub metric: u32,
}

//
// The authentication entry occupies the first 20 octets of the body:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +---------------+---------------+-------------------------------+
// |             0xFFFF            |  Authentication Type=0x0002   |
// +---------------+---------------+---------------+---------------+
// ~                Password (16, NUL-padded)                      ~
// +---------------+---------------+---------------+---------------+
//

// RIP decode errors.
#[derive(Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    InvalidLength(usize),
    MissingAuthEntry,
    InvalidAuthFamily(u16),
    InvalidAuthType(u16),
    AuthPasswordMismatch,
    InvalidRteNetmask(Ipv4Addr, Ipv4Addr),
    InvalidRteIndex(usize),
}

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// ===== impl Pdu =====

impl Pdu {
    pub const VERSION: u8 = 2;
    pub const HDR_LENGTH: usize = 4;
    pub const MIN_SIZE: usize = Self::HDR_LENGTH;

    // Decode the fixed header and take custody of the entry run. The
    // command and version octets are preserved but not validated.
    pub fn decode(data: &[u8]) -> DecodeResult<Pdu> {
        let len = data.len();
        if len < Self::MIN_SIZE {
            return Err(DecodeError::InvalidLength(len));
        }

        let mut buf = Bytes::copy_from_slice(data);
        let command = buf.get_u8();
        let version = buf.get_u8();
        // Ignore MBZ.
        let _ = buf.get_u16();

        if buf.remaining() % Rte::LENGTH != 0 {
            return Err(DecodeError::InvalidLength(len));
        }

        Ok(Pdu {
            command,
            version,
            data: buf,
        })
    }

    // Number of undecoded entries left in the body.
    pub fn entry_count(&self) -> usize {
        self.data.len() / Rte::LENGTH
    }

    // Authenticate the PDU against the configured password and consume
    // the authentication entry, leaving only route entries behind.
    //
    // The first entry must carry the authentication address-family
    // sentinel and the plaintext authentication type; its 16-octet
    // password field is compared as a NUL-padded string.
    pub fn verify_auth(&mut self, password: &str) -> DecodeResult<()> {
        if self.data.len() < Rte::LENGTH {
            return Err(DecodeError::MissingAuthEntry);
        }

        let mut buf = self.data.clone();
        let afi = buf.get_u16();
        if afi != Rte::AFI_AUTH {
            return Err(DecodeError::InvalidAuthFamily(afi));
        }
        let auth_type = buf.get_u16();
        if auth_type != Rte::AUTH_TYPE_PLAINTEXT {
            return Err(DecodeError::InvalidAuthType(auth_type));
        }

        let field = &self.data[4..Rte::LENGTH];
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        if &field[..end] != password.as_bytes() {
            return Err(DecodeError::AuthPasswordMismatch);
        }

        self.data.advance(Rte::LENGTH);
        Ok(())
    }

    // Decode the k-th remaining entry.
    pub fn entry(&self, index: usize) -> DecodeResult<Rte> {
        let offset = index * Rte::LENGTH;
        if offset + Rte::LENGTH > self.data.len() {
            return Err(DecodeError::InvalidRteIndex(index));
        }
        Rte::decode(&mut self.data.slice(offset..offset + Rte::LENGTH))
    }
}

// ===== impl Rte =====

impl Rte {
    pub const LENGTH: usize = 20;
    pub const AFI_AUTH: u16 = 0xFFFF;
    pub const AUTH_TYPE_PLAINTEXT: u16 = 0x0002;

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let addr_family = buf.get_u16();
        let tag = buf.get_u16();
        let addr = buf.get_ipv4();
        let mask = buf.get_ipv4();
        let nexthop = buf.get_ipv4();
        let metric = buf.get_u32();

        // Validate the netmask. The address may still carry host bits
        // past the mask; canonicalization is the engine's business.
        if !ip::is_valid_netmask(mask.into()) {
            return Err(DecodeError::InvalidRteNetmask(addr, mask));
        }
        let prefix = Ipv4Network::with_netmask(addr, mask)
            .map_err(|_| DecodeError::InvalidRteNetmask(addr, mask))?;

        Ok(Rte {
            addr_family,
            tag,
            prefix,
            nexthop,
            metric,
        })
    }
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidLength(length) => {
                write!(f, "invalid length: {}", length)
            }
            DecodeError::MissingAuthEntry => {
                write!(f, "missing authentication entry")
            }
            DecodeError::InvalidAuthFamily(afi) => {
                write!(f, "invalid authentication address-family: {}", afi)
            }
            DecodeError::InvalidAuthType(auth_type) => {
                write!(f, "invalid authentication type: {}", auth_type)
            }
            DecodeError::AuthPasswordMismatch => {
                write!(f, "authentication password mismatch")
            }
            DecodeError::InvalidRteNetmask(addr, mask) => {
                write!(f, "invalid RTE netmask: {} mask {}", addr, mask)
            }
            DecodeError::InvalidRteIndex(index) => {
                write!(f, "RTE index out of range: {}", index)
            }
        }
    }
}

impl std::error::Error for DecodeError {}
