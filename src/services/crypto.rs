use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use ring::{
    aead, pbkdf2,
    rand::{SecureRandom, SystemRandom},
};
use std::num::NonZeroU32;

const APP_SECRET: &[u8] = b"costlink-secret-v1";
const PBKDF2_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

/// Encrypts the OAuth client secret and refresh token before they hit the
/// SQLite file. Payload format: `enc:<salt>:<nonce>:<ciphertext>` (base64).
pub fn encrypt_secret(plaintext: &str) -> Result<String> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt)
        .map_err(|_| anyhow!("Failed to generate salt"))?;

    let key = derive_key(&salt)?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| anyhow!("Failed to generate nonce"))?;

    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);
    let mut in_out = plaintext.as_bytes().to_vec();
    key.seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| anyhow!("Encryption failed"))?;

    Ok(format!(
        "enc:{}:{}:{}",
        general_purpose::STANDARD.encode(salt),
        general_purpose::STANDARD.encode(nonce_bytes),
        general_purpose::STANDARD.encode(in_out)
    ))
}

pub fn decrypt_secret(payload: &str) -> Result<String> {
    let parts: Vec<&str> = payload.split(':').collect();
    if parts.len() != 4 || parts[0] != "enc" {
        return Err(anyhow!("Unknown encrypted format"));
    }
    let salt = general_purpose::STANDARD
        .decode(parts[1])
        .map_err(|e| anyhow!("Decode salt: {}", e))?;
    let nonce_bytes = general_purpose::STANDARD
        .decode(parts[2])
        .map_err(|e| anyhow!("Decode nonce: {}", e))?;
    let mut data = general_purpose::STANDARD
        .decode(parts[3])
        .map_err(|e| anyhow!("Decode ciphertext: {}", e))?;

    let key = derive_key(&salt)?;
    let nonce = aead::Nonce::assume_unique_for_key(
        nonce_bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("Invalid nonce length"))?,
    );

    let decrypted = key
        .open_in_place(nonce, aead::Aad::empty(), &mut data)
        .map_err(|_| anyhow!("Decryption failed"))?;
    Ok(String::from_utf8(decrypted.to_vec())?)
}

/// Accepts both encrypted payloads and plaintext values (settings written
/// before encryption was in place, or injected via environment).
pub fn reveal(value: &str) -> Result<String> {
    if value.starts_with("enc:") {
        decrypt_secret(value)
    } else {
        Ok(value.to_string())
    }
}

fn derive_key(salt: &[u8]) -> Result<aead::LessSafeKey> {
    let mut key_bytes = [0u8; 32];
    let iterations =
        NonZeroU32::new(PBKDF2_ITERATIONS).ok_or_else(|| anyhow!("Invalid iterations"))?;
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        APP_SECRET,
        &mut key_bytes,
    );
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key_bytes)
        .map_err(|_| anyhow!("Invalid key material"))?;
    Ok(aead::LessSafeKey::new(unbound))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let payload = encrypt_secret("refresh-token-xyz").expect("encrypt");
        assert!(payload.starts_with("enc:"));
        assert_eq!(decrypt_secret(&payload).expect("decrypt"), "refresh-token-xyz");
    }

    #[test]
    fn reveal_passes_plaintext_through() {
        assert_eq!(reveal("plain-value").expect("reveal"), "plain-value");
    }

    #[test]
    fn malformed_payload_is_rejected() {
        assert!(decrypt_secret("enc:only-two-parts").is_err());
        assert!(decrypt_secret("keychain:whatever").is_err());
    }
}
