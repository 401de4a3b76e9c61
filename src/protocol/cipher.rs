//! XOR autokey cipher used by the Kasa local protocol
//!
//! Each byte is XORed with a running key seeded at 171; the key for the next
//! byte is always the ciphertext byte just produced. Updating from the
//! ciphertext on both sides is what makes `encode` and `decode` symmetric.
//! This is obfuscation, not a security boundary.

use crate::core::CIPHER_KEY;

/// Encodes a plaintext payload
pub fn encode(plaintext: &[u8]) -> Vec<u8> {
    let mut key = CIPHER_KEY;
    plaintext
        .iter()
        .map(|&p| {
            let c = p ^ key;
            key = c;
            c
        })
        .collect()
}

/// Decodes an encoded payload
pub fn decode(cipher: &[u8]) -> Vec<u8> {
    let mut key = CIPHER_KEY;
    cipher
        .iter()
        .map(|&c| {
            let p = c ^ key;
            key = c;
            p
        })
        .collect()
}
