//! Password scrambling for MySQL authentication plugins
//!
//! Supports `mysql_native_password`, `caching_sha2_password` (fast path; the
//! full path sends the cleartext password over a secure transport) and
//! `mysql_clear_password`.

use crate::protocol::constants::{auth, SCRAMBLE_LEN};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Authentication plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    /// SHA1 challenge/response
    NativePassword,
    /// SHA256 challenge/response with server-side cache
    CachingSha2Password,
    /// Password sent as-is
    ClearPassword,
}

impl AuthPlugin {
    /// Plugin name as sent on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::NativePassword => auth::NATIVE_PASSWORD,
            Self::CachingSha2Password => auth::CACHING_SHA2_PASSWORD,
            Self::ClearPassword => auth::CLEAR_PASSWORD,
        }
    }

    /// Compute the auth response for `password` against the server `scramble`
    pub fn scramble(&self, password: &str, scramble: &[u8]) -> Vec<u8> {
        match self {
            Self::NativePassword => scramble_native(password, scramble),
            Self::CachingSha2Password => scramble_caching_sha2(password, scramble),
            Self::ClearPassword => clear_password(password),
        }
    }

    /// Whether the plugin exposes the password itself on the wire
    pub fn sends_cleartext(&self) -> bool {
        matches!(self, Self::ClearPassword)
    }
}

impl FromStr for AuthPlugin {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            auth::NATIVE_PASSWORD => Ok(Self::NativePassword),
            auth::CACHING_SHA2_PASSWORD => Ok(Self::CachingSha2Password),
            auth::CLEAR_PASSWORD => Ok(Self::ClearPassword),
            other => Err(crate::Error::Authentication(format!(
                "unsupported authentication plugin: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for AuthPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `SHA1(password) XOR SHA1(scramble + SHA1(SHA1(password)))`
pub fn scramble_native(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let scramble = &scramble[..scramble.len().min(SCRAMBLE_LEN)];
    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(scramble);
    hasher.update(stage2);
    let token = hasher.finalize();

    stage1.iter().zip(token.iter()).map(|(a, b)| a ^ b).collect()
}

/// `SHA256(password) XOR SHA256(SHA256(SHA256(password)) + scramble)`
pub fn scramble_caching_sha2(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha256::digest(password.as_bytes());
    let stage2 = Sha256::digest(stage1);

    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(scramble);
    let token = hasher.finalize();

    stage1.iter().zip(token.iter()).map(|(a, b)| a ^ b).collect()
}

/// Password followed by a NUL terminator
pub fn clear_password(password: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(password.len() + 1);
    data.extend_from_slice(password.as_bytes());
    data.push(0);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRAMBLE: &[u8; 20] = b"abcdefghijklmnopqrst";

    #[test]
    fn test_plugin_names_round_trip() {
        for plugin in [
            AuthPlugin::NativePassword,
            AuthPlugin::CachingSha2Password,
            AuthPlugin::ClearPassword,
        ] {
            assert_eq!(plugin.name().parse::<AuthPlugin>().unwrap(), plugin);
        }
    }

    #[test]
    fn test_unknown_plugin() {
        let err = "sha256_password".parse::<AuthPlugin>().unwrap_err();
        assert!(err.to_string().contains("sha256_password"));
    }

    #[test]
    fn test_native_scramble_length() {
        let out = scramble_native("secret", SCRAMBLE);
        assert_eq!(out.len(), 20);
    }

    #[test]
    fn test_native_scramble_empty_password() {
        assert!(scramble_native("", SCRAMBLE).is_empty());
        assert!(scramble_caching_sha2("", SCRAMBLE).is_empty());
    }

    #[test]
    fn test_native_scramble_verifiable() {
        // Server side check: SHA1(scramble + stored) XOR response == stage1,
        // and SHA1(stage1) == stored
        let password = "secret";
        let stored = Sha1::digest(Sha1::digest(password.as_bytes()));
        let response = scramble_native(password, SCRAMBLE);

        let mut hasher = Sha1::new();
        hasher.update(SCRAMBLE);
        hasher.update(stored);
        let token = hasher.finalize();

        let stage1: Vec<u8> = response.iter().zip(token.iter()).map(|(a, b)| a ^ b).collect();
        assert_eq!(Sha1::digest(&stage1).as_slice(), stored.as_slice());
    }

    #[test]
    fn test_native_scramble_ignores_trailing_bytes() {
        let mut long = SCRAMBLE.to_vec();
        long.push(0);
        assert_eq!(scramble_native("pw", &long), scramble_native("pw", SCRAMBLE));
    }

    #[test]
    fn test_caching_sha2_scramble_length() {
        let out = scramble_caching_sha2("secret", SCRAMBLE);
        assert_eq!(out.len(), 32);
        assert_ne!(out, scramble_caching_sha2("other", SCRAMBLE));
    }

    #[test]
    fn test_clear_password() {
        assert_eq!(clear_password("pw"), b"pw\0");
        assert!(AuthPlugin::ClearPassword.sends_cleartext());
        assert!(!AuthPlugin::NativePassword.sends_cleartext());
    }
}
