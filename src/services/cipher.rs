//! Per-object content encryption: AES-256-CBC with PKCS#7 padding.
//!
//! Every upload gets its own random key and IV. The material is stored as
//! base64 text next to the metadata row and is not itself encrypted at rest;
//! whoever can read the metadata database can read the content.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;
const BLOCK_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum CipherError {
    /// Padding check failed or the ciphertext is not whole blocks.
    #[error("ciphertext is corrupt or was encrypted with a different key")]
    CorruptOrMismatchedKey,
    #[error("invalid cipher material: {0}")]
    InvalidMaterial(String),
}

/// Key and IV for one object.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherMaterial {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl std::fmt::Debug for CipherMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CipherMaterial(..)")
    }
}

impl CipherMaterial {
    /// Encode as `(key, iv)` base64 strings for storage.
    pub fn encode(&self) -> (String, String) {
        (
            general_purpose::STANDARD.encode(self.key),
            general_purpose::STANDARD.encode(self.iv),
        )
    }

    /// Decode material previously produced by [`CipherMaterial::encode`].
    pub fn decode(key: &str, iv: &str) -> Result<Self, CipherError> {
        Ok(Self {
            key: decode_fixed::<KEY_SIZE>("key", key)?,
            iv: decode_fixed::<IV_SIZE>("iv", iv)?,
        })
    }
}

fn decode_fixed<const N: usize>(what: &str, encoded: &str) -> Result<[u8; N], CipherError> {
    let bytes = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| CipherError::InvalidMaterial(format!("{what}: {e}")))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        CipherError::InvalidMaterial(format!(
            "{what}: expected {N} bytes, got {}",
            bytes.len()
        ))
    })
}

/// Stateless AES-256-CBC engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct CipherEngine;

impl CipherEngine {
    /// Fresh key and IV from the OS CSPRNG.
    pub fn generate_material(&self) -> CipherMaterial {
        let mut key = [0u8; KEY_SIZE];
        let mut iv = [0u8; IV_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut key);
        rand::rngs::OsRng.fill_bytes(&mut iv);
        CipherMaterial { key, iv }
    }

    pub fn encrypt(&self, plaintext: &[u8], material: &CipherMaterial) -> Vec<u8> {
        Aes256CbcEnc::new(&material.key.into(), &material.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        material: &CipherMaterial,
    ) -> Result<Vec<u8>, CipherError> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CipherError::CorruptOrMismatchedKey);
        }
        Aes256CbcDec::new(&material.key.into(), &material.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CipherError::CorruptOrMismatchedKey)
    }
}
