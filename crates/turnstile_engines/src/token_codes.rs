#![forbid(unsafe_code)]

use rand::Rng;

pub const TOKEN_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const TOKEN_CODE_LENGTH: usize = 6;

/// Generate one candidate access-token code. Uniqueness against the store
/// is the caller's job (retry loop in the provisioning operation).
pub fn generate_code<R: Rng>(rng: &mut R) -> String {
    (0..TOKEN_CODE_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..TOKEN_CODE_ALPHABET.len());
            TOKEN_CODE_ALPHABET[idx] as char
        })
        .collect()
}
