//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod config;
pub mod debug;
pub mod error;
pub mod events;
pub mod instance;
pub mod network;
pub mod packet;
pub mod route;
pub mod southbound;
