//! Recipient address validation.

use alloy::primitives::Address;

use crate::blockchain::types::{BlockchainError, BlockchainResult};

/// Decides whether a recipient string may receive a transfer.
pub trait AddressValidator: Send + Sync {
    fn is_valid_recipient(&self, address: &str) -> bool;
}

/// Accepts `0x` followed by 40 hex digits.
///
/// Mixed-case input must carry a valid EIP-55 checksum; all-lowercase and
/// all-uppercase input is accepted unchecked. The zero address is refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct HexAddressValidator;

impl AddressValidator for HexAddressValidator {
    fn is_valid_recipient(&self, address: &str) -> bool {
        parse_recipient(address).is_ok()
    }
}

/// Parse a recipient string under the same rules as [`HexAddressValidator`].
pub fn parse_recipient(address: &str) -> BlockchainResult<Address> {
    let invalid = || BlockchainError::InvalidAddress(address.to_string());

    let digits = address.strip_prefix("0x").ok_or_else(invalid)?;
    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
    let parsed = if has_lower && has_upper {
        Address::parse_checksummed(address, None).map_err(|_| invalid())?
    } else {
        address.parse::<Address>().map_err(|_| invalid())?
    };

    if parsed == Address::ZERO {
        return Err(invalid());
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_lowercase_and_checksummed() {
        let v = HexAddressValidator;
        assert!(v.is_valid_recipient("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"));
        assert!(v.is_valid_recipient("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"));
    }

    #[test]
    fn test_rejects_bad_checksum() {
        // First letter's case flipped.
        assert!(!HexAddressValidator.is_valid_recipient("0xF39Fd6e51aad88F6F4ce6aB8827279cffFb92266"));
    }

    #[test]
    fn test_rejects_malformed() {
        let v = HexAddressValidator;
        assert!(!v.is_valid_recipient(""));
        assert!(!v.is_valid_recipient("f39fd6e51aad88f6f4ce6ab8827279cfffb92266"));
        assert!(!v.is_valid_recipient("0xf39fd6e51aad88f6f4ce6ab8827279cfffb9226"));
        assert!(!v.is_valid_recipient("0xg39fd6e51aad88f6f4ce6ab8827279cfffb92266"));
        assert!(!v.is_valid_recipient("0x0000000000000000000000000000000000000000"));
    }
}
