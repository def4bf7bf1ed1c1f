//! ERC-20 ABI surface: `decimals`, `balanceOf`, `transfer`.

use crate::error::{Error, Result};
use crate::ledger::Address;

pub const DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
pub const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

const WORD: usize = 32;

fn address_word(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

pub fn encode_decimals() -> Vec<u8> {
    DECIMALS_SELECTOR.to_vec()
}

pub fn encode_balance_of(owner: &Address) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + WORD);
    data.extend_from_slice(&BALANCE_OF_SELECTOR);
    data.extend_from_slice(&address_word(owner));
    data
}

pub fn encode_transfer(to: &Address, amount: u128) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 2 * WORD);
    data.extend_from_slice(&TRANSFER_SELECTOR);
    data.extend_from_slice(&address_word(to));
    data.extend_from_slice(&uint_word(amount));
    data
}

/// Decode `transfer` calldata back into its arguments.
pub fn decode_transfer(data: &[u8]) -> Result<(Address, u128)> {
    if data.len() != 4 + 2 * WORD || data[..4] != TRANSFER_SELECTOR {
        return Err(Error::Abi("not a transfer(address,uint256) call".to_string()));
    }
    let to_word = &data[4..4 + WORD];
    if to_word[..12].iter().any(|b| *b != 0) {
        return Err(Error::Abi("address argument has dirty high bytes".to_string()));
    }
    let mut to = [0u8; 20];
    to.copy_from_slice(&to_word[12..]);
    let amount = decode_uint(&data[4 + WORD..])?;
    Ok((Address(to), amount))
}

/// Decode a single uint256 return word, rejecting values beyond u128.
pub fn decode_uint(output: &[u8]) -> Result<u128> {
    if output.len() < WORD {
        return Err(Error::Abi(format!(
            "expected a 32-byte word, got {} bytes",
            output.len()
        )));
    }
    let word = &output[..WORD];
    if word[..16].iter().any(|b| *b != 0) {
        return Err(Error::Abi("uint256 value does not fit in u128".to_string()));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

pub fn decode_decimals(output: &[u8]) -> Result<u8> {
    let value = decode_uint(output)?;
    u8::try_from(value).map_err(|_| Error::Abi(format!("decimals {} out of range", value)))
}
