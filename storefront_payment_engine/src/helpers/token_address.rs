use std::{fmt::Display, str::FromStr};

use sha2::{Digest, Sha256};
use thiserror::Error;

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const ADDRESS_PREFIX: u8 = 0x41;

/// A TRC-20-style account or contract address.
///
/// Upstream APIs hand these out in two equivalent encodings: Base58Check (`T…`, 34 characters)
/// and raw hex (`41` followed by 40 hex digits, sometimes with a `0x` prefix). Every address is
/// normalized to the Base58Check form on entry, so equality checks and storage always operate on
/// one canonical spelling. The checksum is the first four bytes of a double SHA-256 over the
/// 21-byte payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenAddress(String);

#[derive(Debug, Clone, Error)]
pub enum AddressError {
    #[error("'{0}' is not a recognizable address encoding")]
    InvalidFormat(String),
    #[error("'{0}' fails its checksum")]
    BadChecksum(String),
}

impl TokenAddress {
    /// Accepts either encoding and returns the canonical Base58Check address.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let s = s.trim();
        let base58_shape = regex::Regex::new(r"^T[1-9A-HJ-NP-Za-km-z]{33}$").unwrap();
        let hex_shape = regex::Regex::new(r"^(0x)?41[0-9a-fA-F]{40}$").unwrap();
        if base58_shape.is_match(s) {
            let bytes = base58_decode(s).ok_or_else(|| AddressError::InvalidFormat(s.to_string()))?;
            if bytes.len() != 25 || bytes[0] != ADDRESS_PREFIX {
                return Err(AddressError::InvalidFormat(s.to_string()));
            }
            if checksum(&bytes[..21]) != bytes[21..] {
                return Err(AddressError::BadChecksum(s.to_string()));
            }
            Ok(Self(s.to_string()))
        } else if hex_shape.is_match(s) {
            let digits = s.strip_prefix("0x").unwrap_or(s);
            let payload = hex_decode(digits).ok_or_else(|| AddressError::InvalidFormat(s.to_string()))?;
            let mut full = payload;
            let check = checksum(&full);
            full.extend_from_slice(&check);
            Ok(Self(base58_encode(&full)))
        } else {
            Err(AddressError::InvalidFormat(s.to_string()))
        }
    }

    /// The canonical Base58Check spelling.
    pub fn as_base58(&self) -> &str {
        &self.0
    }

    /// The 21-byte payload as lowercase hex, `41…`.
    pub fn to_hex(&self) -> String {
        // the stored string was checksum-validated on construction
        let bytes = base58_decode(&self.0).unwrap_or_default();
        bytes[..21].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl FromStr for TokenAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for TokenAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0u8; 4];
    out.copy_from_slice(&second[..4]);
    out
}

fn base58_decode(s: &str) -> Option<Vec<u8>> {
    // little-endian accumulator; each input digit multiplies the total by 58
    let mut bytes: Vec<u8> = Vec::with_capacity(25);
    for c in s.bytes() {
        let mut carry = ALPHABET.iter().position(|&a| a == c)? as u32;
        for b in bytes.iter_mut() {
            let v = (*b as u32) * 58 + carry;
            *b = (v & 0xff) as u8;
            carry = v >> 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    for _ in s.bytes().take_while(|&b| b == b'1') {
        bytes.push(0);
    }
    bytes.reverse();
    Some(bytes)
}

fn base58_encode(data: &[u8]) -> String {
    let mut digits: Vec<u8> = Vec::with_capacity(35);
    for &byte in data {
        let mut carry = byte as u32;
        for d in digits.iter_mut() {
            let v = (*d as u32) << 8 | carry;
            *d = (v % 58) as u8;
            carry = v / 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }
    for _ in data.iter().take_while(|&&b| b == 0) {
        digits.push(0);
    }
    digits.iter().rev().map(|&d| ALPHABET[d as usize] as char).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len()).step_by(2).map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok()).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    // TRC-20 USDT contract, both spellings
    const USDT_B58: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
    const USDT_HEX: &str = "41a614f803b6fd780986a42c78ec9c7f77e6ded13c";

    #[test]
    fn parses_base58() {
        let addr = TokenAddress::parse(USDT_B58).unwrap();
        assert_eq!(addr.as_base58(), USDT_B58);
        assert_eq!(addr.to_hex(), USDT_HEX);
    }

    #[test]
    fn normalizes_hex_to_base58() {
        let addr = TokenAddress::parse(USDT_HEX).unwrap();
        assert_eq!(addr.as_base58(), USDT_B58);
        let addr = TokenAddress::parse(&format!("0x{USDT_HEX}")).unwrap();
        assert_eq!(addr.as_base58(), USDT_B58);
        let addr = TokenAddress::parse(&USDT_HEX.to_uppercase()).unwrap();
        assert_eq!(addr.as_base58(), USDT_B58);
    }

    #[test]
    fn both_spellings_compare_equal() {
        let a = TokenAddress::parse(USDT_B58).unwrap();
        let b = TokenAddress::parse(USDT_HEX).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_tampering_and_noise() {
        // last character swapped inside the alphabet: shape survives, checksum does not
        let mut tampered = USDT_B58.to_string();
        tampered.pop();
        tampered.push('u');
        assert!(matches!(TokenAddress::parse(&tampered), Err(AddressError::BadChecksum(_))));

        assert!(TokenAddress::parse("").is_err());
        assert!(TokenAddress::parse("not-an-address").is_err());
        // 0 and O are not in the alphabet
        assert!(TokenAddress::parse("TR0NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t").is_err());
        // wrong version byte
        assert!(TokenAddress::parse("42a614f803b6fd780986a42c78ec9c7f77e6ded13c").is_err());
        // truncated hex
        assert!(TokenAddress::parse("41a614f803").is_err());
    }

    #[test]
    fn hex_round_trip_fuzz() {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let mut payload = [0u8; 20];
            rng.fill_bytes(&mut payload);
            let hex: String = std::iter::once("41".to_string())
                .chain(payload.iter().map(|b| format!("{b:02x}")))
                .collect();
            let addr = TokenAddress::parse(&hex).unwrap();
            assert_eq!(addr.to_hex(), hex);
            let reparsed = TokenAddress::parse(addr.as_base58()).unwrap();
            assert_eq!(reparsed, addr);
        }
    }
}
