//! Salted symmetric encryption and password-style hashing.
//!
//! Ciphertexts are `hex(iv):hex(ciphertext):hex(tag)`, produced with
//! AES-128-GCM under a 16-byte IV. The key is the first 8 bytes of the
//! shared secret followed by the last 8 bytes of the per-record salt.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes128;
use aes_gcm::AesGcm;
use rand::RngCore;
use sha2::Sha512;

use crate::error::CryptoError;

type Cipher = AesGcm<Aes128, U16>;

const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;
const KEY_HALF: usize = 8;
const HASH_ROUNDS: u32 = 1000;
const HASH_LEN: usize = 64;

#[derive(Clone)]
pub struct CryptoConfig {
    /// Shared secret; its first 8 bytes key the cipher, all of it salts hashes.
    pub secret: String,
}

impl std::fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoConfig").field("secret", &"***").finish()
    }
}

pub struct Crypto {
    config: CryptoConfig,
}

impl Crypto {
    pub fn new(config: CryptoConfig) -> Result<Self, CryptoError> {
        if config.secret.len() < KEY_HALF {
            return Err(CryptoError::ShortSecret);
        }
        Ok(Self { config })
    }

    fn cipher(&self, salt: &str) -> Result<Cipher, CryptoError> {
        let salt = salt.as_bytes();
        if salt.len() < KEY_HALF {
            return Err(CryptoError::ShortSalt);
        }
        let mut key = [0u8; 2 * KEY_HALF];
        key[..KEY_HALF].copy_from_slice(&self.config.secret.as_bytes()[..KEY_HALF]);
        key[KEY_HALF..].copy_from_slice(&salt[salt.len() - KEY_HALF..]);
        Ok(Cipher::new(GenericArray::from_slice(&key)))
    }

    pub fn encrypt(&self, text: &str, salt: &str) -> Result<String, CryptoError> {
        let cipher = self.cipher(salt)?;

        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut buffer = text.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| CryptoError::Encrypt)?;

        Ok([hex::encode(iv), hex::encode(&buffer), hex::encode(tag)].join(":"))
    }

    pub fn decrypt(&self, encrypted: &str, salt: &str) -> Result<String, CryptoError> {
        let cipher = self.cipher(salt)?;

        let mut parts = encrypted.split(':');
        let (Some(iv), Some(body), Some(tag), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::Malformed("expected iv:ciphertext:tag".into()));
        };

        let iv = decode_exact(iv, IV_LEN, "iv")?;
        let tag = decode_exact(tag, TAG_LEN, "tag")?;
        let mut buffer =
            hex::decode(body).map_err(|e| CryptoError::Malformed(format!("ciphertext: {e}")))?;

        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&iv),
                b"",
                &mut buffer,
                GenericArray::from_slice(&tag),
            )
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(buffer).map_err(|_| CryptoError::Decrypt)
    }

    /// PBKDF2-HMAC-SHA512 of `text`, salted with the shared secret, as hex.
    pub fn hash(&self, text: &str) -> String {
        let mut derived = [0u8; HASH_LEN];
        pbkdf2::pbkdf2_hmac::<Sha512>(
            text.as_bytes(),
            self.config.secret.as_bytes(),
            HASH_ROUNDS,
            &mut derived,
        );
        hex::encode(derived)
    }
}

fn decode_exact(part: &str, len: usize, what: &str) -> Result<Vec<u8>, CryptoError> {
    let bytes = hex::decode(part).map_err(|e| CryptoError::Malformed(format!("{what}: {e}")))?;
    if bytes.len() != len {
        return Err(CryptoError::Malformed(format!(
            "{what}: expected {len} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}
