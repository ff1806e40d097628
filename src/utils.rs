//! Utility functions for identifiers, addresses and clocks

use bech32::{Bech32m, Hrp};
use uuid7::uuid7;

/// Human readable part used when rendering signer public keys.
pub const IDENTITY_HRP: &str = "id";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    encode_bech32(hrp, uuid7().as_bytes())
}

pub fn encode_bech32(hrp: &str, data: &[u8]) -> anyhow::Result<String> {
    let hrp = Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, data)?;
    Ok(encode)
}

/// Address validator for the address based payment network: any checksummed
/// bech32/bech32m string carrying a non-empty payload.
pub fn is_valid_bech32_address(address: &str) -> bool {
    matches!(bech32::decode(address), Ok((_, data)) if !data.is_empty())
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}
