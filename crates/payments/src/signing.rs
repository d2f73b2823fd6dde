//! HMAC signing and constant-time verification of provider payloads.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

use crate::GatewayError;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Digest a provider uses for its HMAC signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Digest {
    Sha256,
    Sha512,
}

impl Digest {
    /// Signs `data` and returns the lowercase hex digest.
    pub fn sign(self, secret: &str, data: &str) -> Result<String, GatewayError> {
        let bytes = match self {
            Digest::Sha256 => {
                let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                    .map_err(|e| GatewayError::Config(e.to_string()))?;
                mac.update(data.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
            Digest::Sha512 => {
                let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
                    .map_err(|e| GatewayError::Config(e.to_string()))?;
                mac.update(data.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
        };
        Ok(to_hex(&bytes))
    }

    /// Checks a hex signature (either case) in constant time.
    ///
    /// Fails closed: a malformed signature or key is reported as a mismatch.
    pub fn verify(self, secret: &str, data: &str, signature_hex: &str) -> bool {
        let Some(expected) = from_hex(signature_hex.trim()) else {
            return false;
        };
        match self {
            Digest::Sha256 => HmacSha256::new_from_slice(secret.as_bytes())
                .map(|mut mac| {
                    mac.update(data.as_bytes());
                    mac.verify_slice(&expected).is_ok()
                })
                .unwrap_or(false),
            Digest::Sha512 => HmacSha512::new_from_slice(secret.as_bytes())
                .map(|mut mac| {
                    mac.update(data.as_bytes());
                    mac.verify_slice(&expected).is_ok()
                })
                .unwrap_or(false),
        }
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

pub fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.is_empty() || s.len() % 2 != 0 {
        return None;
    }
    s.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4231 test case 2.
    const KEY: &str = "Jefe";
    const DATA: &str = "what do ya want for nothing?";

    #[test]
    fn sha256_matches_rfc4231() {
        assert_eq!(
            Digest::Sha256.sign(KEY, DATA).unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn sha512_matches_rfc4231() {
        assert_eq!(
            Digest::Sha512.sign(KEY, DATA).unwrap(),
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea2505549758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }

    #[test]
    fn verify_accepts_uppercase_and_rejects_tampering() {
        let sig = Digest::Sha512.sign("secret", "a=1&b=2").unwrap();
        assert!(Digest::Sha512.verify("secret", "a=1&b=2", &sig.to_uppercase()));
        assert!(!Digest::Sha512.verify("secret", "a=1&b=3", &sig));
        assert!(!Digest::Sha512.verify("other", "a=1&b=2", &sig));
    }

    #[test]
    fn verify_fails_closed_on_garbage() {
        assert!(!Digest::Sha256.verify("secret", "data", ""));
        assert!(!Digest::Sha256.verify("secret", "data", "zz"));
        assert!(!Digest::Sha256.verify("secret", "data", "abc"));
    }

    #[test]
    fn hex_helpers() {
        assert_eq!(to_hex(&[0x00, 0xab, 0xff]), "00abff");
        assert_eq!(from_hex("00ABff"), Some(vec![0x00, 0xab, 0xff]));
        assert_eq!(from_hex("0g"), None);
    }
}
