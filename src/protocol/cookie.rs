//! Request key generation
//!
//! `create` and `checksig` have no caller-supplied key, so each call mints an
//! unguessable one that the server echoes back in its reply.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::OsRng;

/// Length of a generated request key (fills the whole key slot)
pub const REQUEST_KEY_LEN: usize = 32;

const ALPHABET: &[u8; 62] = b"abcdefghijklmnopqrstuvwxyz0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Generate a 32-character request key from the OS random source
///
/// `Uniform` samples by rejection, so every character is unbiased.
pub fn generate_request_key() -> String {
    let index = Uniform::from(0..ALPHABET.len());
    index
        .sample_iter(OsRng)
        .take(REQUEST_KEY_LEN)
        .map(|i| ALPHABET[i] as char)
        .collect()
}
