//! Client side of the password authentication plugins

use super::{Error, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

/// `caching_sha2_password` auth-more-data status bytes
pub const FAST_AUTH_SUCCESS: u8 = 0x03;
pub const PERFORM_FULL_AUTHENTICATION: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    NativePassword,
    CachingSha2Password,
}

impl AuthPlugin {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::NativePassword => "mysql_native_password",
            Self::CachingSha2Password => "caching_sha2_password",
        }
    }

    /// Scrambled password for the given server nonce
    #[must_use]
    pub fn auth_response(self, password: &str, scramble: &[u8]) -> Vec<u8> {
        match self {
            Self::NativePassword => scramble_native_password(password, scramble),
            Self::CachingSha2Password => scramble_caching_sha2(password, scramble),
        }
    }
}

impl fmt::Display for AuthPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AuthPlugin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mysql_native_password" => Ok(Self::NativePassword),
            "caching_sha2_password" => Ok(Self::CachingSha2Password),
            other => Err(Error::UnsupportedAuthPlugin(other.to_string())),
        }
    }
}

/// `SHA1(password) XOR SHA1(scramble + SHA1(SHA1(password)))`
#[must_use]
pub fn scramble_native_password(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(nonce(scramble));
    hasher.update(stage2);
    let mask = hasher.finalize();

    xor(&stage1, &mask)
}

/// `SHA256(password) XOR SHA256(SHA256(SHA256(password)) + scramble)`
#[must_use]
pub fn scramble_caching_sha2(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha256::digest(password.as_bytes());
    let stage2 = Sha256::digest(stage1);

    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(nonce(scramble));
    let mask = hasher.finalize();

    xor(&stage1, &mask)
}

/// Password sent over an encrypted channel when full authentication is required
#[must_use]
pub fn cleartext_password(password: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(password.len() + 1);
    buf.extend_from_slice(password.as_bytes());
    buf.push(0);
    buf
}

/// Servers send 20 bytes of nonce; anything beyond is padding
fn nonce(scramble: &[u8]) -> &[u8] {
    scramble.get(..20).unwrap_or(scramble)
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}
