//! Provider request signing
//!
//! Providers are not harmonized: each one signs its callbacks with its own
//! canonicalization and hash. The provider module builds the canonical bytes
//! (field concatenation, raw body, ...) and hands them to a scheme here.
//! `sign` and `verify` of a scheme always agree, so the same scheme serves
//! inbound verification and outbound signing.

use crate::credentials::CredentialSet;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub trait RequestAuthenticator: Send + Sync {
    fn sign(&self, canonical: &[u8], credentials: &CredentialSet) -> String;

    /// Fails closed: empty, malformed or mismatching signatures are rejected.
    fn verify(&self, canonical: &[u8], credentials: &CredentialSet, signature: &str) -> bool;
}

/// `lowercase_hex(md5(canonical + secret))`
#[derive(Clone, Copy, Debug, Default)]
pub struct Md5Concat;

impl RequestAuthenticator for Md5Concat {
    fn sign(&self, canonical: &[u8], credentials: &CredentialSet) -> String {
        let mut hasher = Md5::new();
        hasher.update(canonical);
        hasher.update(credentials.signing_secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn verify(&self, canonical: &[u8], credentials: &CredentialSet, signature: &str) -> bool {
        if signature.is_empty() {
            return false;
        }
        let expected = self.sign(canonical, credentials);
        expected.as_bytes().ct_eq(signature.as_bytes()).into()
    }
}

/// `lowercase_hex(hmac_sha256(secret, canonical))`, canonical being the exact
/// bytes the provider sent.
#[derive(Clone, Copy, Debug, Default)]
pub struct HmacSha256Body;

impl HmacSha256Body {
    fn mac(canonical: &[u8], credentials: &CredentialSet) -> HmacSha256 {
        // HMAC accepts keys of any length
        let mut mac = HmacSha256::new_from_slice(credentials.signing_secret.as_bytes())
            .unwrap_or_else(|_| unreachable!("hmac key length is unrestricted"));
        mac.update(canonical);
        mac
    }
}

impl RequestAuthenticator for HmacSha256Body {
    fn sign(&self, canonical: &[u8], credentials: &CredentialSet) -> String {
        hex::encode(Self::mac(canonical, credentials).finalize().into_bytes())
    }

    fn verify(&self, canonical: &[u8], credentials: &CredentialSet, signature: &str) -> bool {
        // Uppercase hex would decode fine; providers sign in lowercase only
        if signature.is_empty() || signature.bytes().any(|b| b.is_ascii_uppercase()) {
            return false;
        }
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        Self::mac(canonical, credentials).verify_slice(&provided).is_ok()
    }
}

/// Concatenate canonical fields in the order given, with no separator.
pub fn concat_fields(fields: &[&str]) -> String {
    fields.concat()
}
