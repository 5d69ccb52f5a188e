//! Tron address encoding
//!
//! Tron addresses are base58check strings over a 21-byte payload: the 0x41
//! network byte followed by the same 20 bytes an EVM address carries. Event
//! payloads from the feed only carry the 20-byte form, so that is the key
//! every watched address is reduced to.

use alloy_primitives::Address;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Network prefix byte of every mainnet Tron address.
pub const TRON_PREFIX: u8 = 0x41;

const CHECKSUM_LEN: usize = 4;
const PAYLOAD_LEN: usize = 21;

/// Errors produced while decoding a Tron address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("malformed address {0:?}")]
    Malformed(String),
    #[error("checksum mismatch for address {0:?}")]
    ChecksumMismatch(String),
    #[error("address {0:?} does not carry the 0x41 network prefix")]
    BadPrefix(String),
    #[error("invalid hex address {0:?}")]
    InvalidHex(String),
}

/// First four bytes of `SHA256(SHA256(payload))`.
fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(Sha256::digest(payload));
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

/// Decode a base58check Tron address (`T...`) into its 20-byte form.
pub fn base58_to_hex20(addr: &str) -> Result<Address, AddressError> {
    let raw = bs58::decode(addr.trim())
        .into_vec()
        .map_err(|_| AddressError::Malformed(addr.to_string()))?;
    if raw.len() < CHECKSUM_LEN + PAYLOAD_LEN {
        return Err(AddressError::Malformed(addr.to_string()));
    }

    let (payload, check) = raw.split_at(raw.len() - CHECKSUM_LEN);
    if checksum(payload)[..] != *check {
        return Err(AddressError::ChecksumMismatch(addr.to_string()));
    }
    if payload.len() != PAYLOAD_LEN || payload[0] != TRON_PREFIX {
        return Err(AddressError::BadPrefix(addr.to_string()));
    }

    Ok(Address::from_slice(&payload[1..]))
}

/// Encode a 20-byte address as a base58check Tron address.
pub fn hex20_to_base58(addr: Address) -> String {
    let mut raw = Vec::with_capacity(PAYLOAD_LEN + CHECKSUM_LEN);
    raw.push(TRON_PREFIX);
    raw.extend_from_slice(addr.as_slice());
    let check = checksum(&raw);
    raw.extend_from_slice(&check);
    bs58::encode(raw).into_string()
}

/// Canonical 40-char lowercase hex of a 20-byte address, no `0x`.
pub fn hex20_string(addr: &Address) -> String {
    hex::encode(addr.as_slice())
}

/// Parse a hex address as found in event payloads.
///
/// Accepts `0x`-prefixed or bare 40-char hex, and the 42-char form that
/// keeps the `41` network byte.
pub fn parse_hex20(s: &str) -> Result<Address, AddressError> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let bytes = hex::decode(digits).map_err(|_| AddressError::InvalidHex(s.to_string()))?;
    match bytes.len() {
        20 => Ok(Address::from_slice(&bytes)),
        21 if bytes[0] == TRON_PREFIX => Ok(Address::from_slice(&bytes[1..])),
        _ => Err(AddressError::InvalidHex(s.to_string())),
    }
}

/// A Tron address in both of its forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TronAddress {
    hex20: Address,
}

impl TronAddress {
    pub fn from_hex20(hex20: Address) -> Self {
        Self { hex20 }
    }

    /// The 20-byte form used for matching against event payloads.
    pub fn hex20(&self) -> Address {
        self.hex20
    }

    pub fn to_base58(&self) -> String {
        hex20_to_base58(self.hex20)
    }

    /// `0x`-prefixed EVM style rendering.
    pub fn to_evm_hex(&self) -> String {
        format!("0x{}", hex20_string(&self.hex20))
    }
}

impl FromStr for TronAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        base58_to_hex20(s).map(Self::from_hex20)
    }
}

impl fmt::Display for TronAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}
