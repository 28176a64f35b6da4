//! HMAC-SHA256 capability used by the request signer.
//!
//! The signer never picks an implementation itself; callers hand one in.
//! [`RustCryptoHmac`] is the default, built on the `hmac` and `sha2` crates.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Keyed-hash capability required by the SharedKey signer.
pub trait HmacProvider: Send + Sync + 'static {
    /// Compute HMAC-SHA256 of `message` under `key`.
    fn hmac_sha256(&self, key: &[u8], message: &[u8]) -> Vec<u8>;
}

/// [`HmacProvider`] backed by the RustCrypto `hmac` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustCryptoHmac;

impl HmacProvider for RustCryptoHmac {
    fn hmac_sha256(&self, key: &[u8], message: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(message);
        mac.finalize().into_bytes().to_vec()
    }
}
