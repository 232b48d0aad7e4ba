//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::{Buf, Bytes};

// Extension methods for Bytes.
pub trait BytesExt {
    // Get an IPv4 address from self in big-endian byte order, advancing
    // the buffer by 4 bytes.
    fn get_ipv4(&mut self) -> Ipv4Addr;
}

impl BytesExt for Bytes {
    fn get_ipv4(&mut self) -> Ipv4Addr {
        Ipv4Addr::from(self.get_u32())
    }
}
