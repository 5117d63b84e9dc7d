//! Sector-addressed block devices.

pub mod block_core;
pub mod block_error;
