//! Holding-register contract shared by the device simulator and the collector.
//!
//! Register map (zero-based holding registers):
//!
//! | Offset | Meaning     | Encoding                         |
//! |--------|-------------|----------------------------------|
//! | 0      | Temperature | signed `round(°C * 10)`          |
//! | 1      | Humidity    | unsigned `round(%RH * 10)`       |
//! | 2      | Status      | alarm bitmask, see [`status`]    |

pub mod bank;
pub mod codec;
pub mod service;
pub mod status;

pub use bank::RegisterBank;
pub use codec::{decode, encode, encode_with_fault, CodecError, Decoded, Thresholds};

/// First holding register of the sensor block.
pub const BLOCK_ADDRESS: u16 = 0;

/// Number of holding registers in the sensor block.
pub const BLOCK_LEN: u16 = 3;
