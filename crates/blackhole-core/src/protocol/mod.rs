//! Protocol module for the blackhole wire format.
//!
//! This module provides:
//! - The tagged [`Frame`] enum covering every logical frame type
//! - The dual codec: fixed-header binary for the data path, JSON for control
//! - The [`Encoding`] tag that lets handlers echo pings in kind

mod codec;
mod frame;

#[cfg(test)]
mod proptest;

pub use codec::{decode_binary, decode_payload, decode_text, encode, encode_binary, encode_json};
pub use frame::{Encoding, Frame, WirePayload};
