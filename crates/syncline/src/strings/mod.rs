// SPDX-License-Identifier: GPL-3.0

//! String constants used across the crate.

pub mod cache;
pub mod rpc;
