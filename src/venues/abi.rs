//! Minimal ABI encoding/decoding for the handful of pool and router views
//! the sources read. Every return value is a sequence of 32-byte words.

use web3::types::{Address, U256};

use crate::types::VenueFetchFailure;

pub type Selector = [u8; 4];

// Uniswap V2 pair / router / factory
pub const GET_RESERVES: Selector = [0x09, 0x02, 0xf1, 0xac];
pub const TOKEN0: Selector = [0x0d, 0xfe, 0x16, 0x81];
pub const FACTORY: Selector = [0xc4, 0x5a, 0x01, 0x55];
pub const GET_PAIR: Selector = [0xe6, 0xa4, 0x39, 0x05];

// Uniswap V3 pool
pub const SLOT0: Selector = [0x38, 0x50, 0xc7, 0xbd];
pub const LIQUIDITY: Selector = [0x1a, 0x68, 0x65, 0x02];
pub const TICK_SPACING: Selector = [0xd0, 0xc9, 0x3a, 0x7c];

const WORD: usize = 32;

/// Calldata for a view with no arguments.
pub fn encode_call(selector: Selector) -> Vec<u8> {
    selector.to_vec()
}

/// Calldata for `selector(address,address)`.
pub fn encode_address_pair(selector: Selector, a: Address, b: Address) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 2 * WORD);
    data.extend_from_slice(&selector);
    for addr in [a, b] {
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(addr.as_bytes());
    }
    data
}

fn word(data: &[u8], index: usize) -> Result<&[u8], VenueFetchFailure> {
    let start = index * WORD;
    data.get(start..start + WORD).ok_or_else(|| {
        VenueFetchFailure::MalformedResponse(format!(
            "expected at least {} bytes, got {}",
            start + WORD,
            data.len()
        ))
    })
}

pub fn decode_uint(data: &[u8], index: usize) -> Result<U256, VenueFetchFailure> {
    Ok(U256::from_big_endian(word(data, index)?))
}

pub fn decode_u128(data: &[u8], index: usize) -> Result<u128, VenueFetchFailure> {
    let value = decode_uint(data, index)?;
    if value > U256::from(u128::MAX) {
        return Err(VenueFetchFailure::MalformedResponse(format!(
            "word {index} does not fit uint128"
        )));
    }
    Ok(value.as_u128())
}

pub fn decode_address(data: &[u8], index: usize) -> Result<Address, VenueFetchFailure> {
    let w = word(data, index)?;
    if w[..12].iter().any(|b| *b != 0) {
        return Err(VenueFetchFailure::MalformedResponse(format!(
            "word {index} is not an address"
        )));
    }
    Ok(Address::from_slice(&w[12..]))
}

/// Decode a sign-extended `int24` (or any int that fits `i32`).
pub fn decode_i32(data: &[u8], index: usize) -> Result<i32, VenueFetchFailure> {
    let w = word(data, index)?;
    let fill = if w[28] & 0x80 != 0 { 0xff } else { 0x00 };
    if w[..28].iter().any(|b| *b != fill) {
        return Err(VenueFetchFailure::MalformedResponse(format!(
            "word {index} does not fit int32"
        )));
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&w[28..]);
    Ok(i32::from_be_bytes(bytes))
}
