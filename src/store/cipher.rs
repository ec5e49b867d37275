//! Authenticated encryption for token secrets persisted by [`FileStore`](super::FileStore).
//!
//! Secrets are sealed with ChaCha20-Poly1305 and stored as
//! `enc:v1:<key_id>:<nonce>:<ciphertext>`, both binary segments base64url-encoded without
//! padding. The key id is a short SHA-256 fingerprint of the key so a store opened with the
//! wrong key fails loudly instead of returning garbage.

// crates.io
use base64::{
	Engine,
	engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce, aead::Aead};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, error::ConfigError, store::StoreError};

const ENVELOPE_PREFIX: &str = "enc:v1:";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Symmetric cipher sealing individual token secrets.
#[derive(Clone)]
pub struct SecretCipher {
	key: [u8; KEY_LEN],
	key_id: String,
}
impl SecretCipher {
	/// Builds a cipher from raw key material.
	pub fn new(key: [u8; KEY_LEN]) -> Self {
		let digest = Sha256::digest(key);
		let key_id = digest[..4].iter().map(|byte| format!("{byte:02x}")).collect();

		Self { key, key_id }
	}

	/// Decodes a 32-byte key from base64 (URL-safe or standard alphabet).
	pub fn from_base64_key(encoded: &str) -> Result<Self, ConfigError> {
		let encoded = encoded.trim();
		let bytes = URL_SAFE_NO_PAD
			.decode(encoded.as_bytes())
			.or_else(|_| STANDARD.decode(encoded.as_bytes()))
			.map_err(|e| ConfigError::InvalidCipherKey { reason: format!("invalid base64: {e}") })?;
		let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
			ConfigError::InvalidCipherKey {
				reason: format!("expected {KEY_LEN} bytes, got {}", bytes.len()),
			}
		})?;

		Ok(Self::new(key))
	}

	/// Derives a key by hashing an arbitrary passphrase.
	pub fn from_passphrase(passphrase: &str) -> Result<Self, ConfigError> {
		if passphrase.is_empty() {
			return Err(ConfigError::InvalidCipherKey { reason: "passphrase is empty".into() });
		}

		let digest = Sha256::digest(passphrase.as_bytes());
		let mut key = [0; KEY_LEN];

		key.copy_from_slice(&digest);

		Ok(Self::new(key))
	}

	/// Short fingerprint embedded in every envelope.
	pub fn key_id(&self) -> &str {
		&self.key_id
	}

	/// Returns `true` when the value looks like a sealed envelope.
	pub fn is_sealed(value: &str) -> bool {
		value.starts_with(ENVELOPE_PREFIX)
	}

	/// Seals a plaintext secret into an envelope string.
	pub fn seal(&self, plaintext: &str) -> Result<String, StoreError> {
		let nonce_bytes = rand::random::<[u8; NONCE_LEN]>();
		let ciphertext = self
			.aead()?
			.encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
			.map_err(|e| cipher_error(format!("failed to encrypt secret: {e}")))?;

		Ok(format!(
			"{ENVELOPE_PREFIX}{}:{}:{}",
			self.key_id,
			URL_SAFE_NO_PAD.encode(nonce_bytes),
			URL_SAFE_NO_PAD.encode(ciphertext),
		))
	}

	/// Opens an envelope produced by [`SecretCipher::seal`].
	pub fn open(&self, sealed: &str) -> Result<String, StoreError> {
		let body = sealed
			.strip_prefix(ENVELOPE_PREFIX)
			.ok_or_else(|| cipher_error("secret is not a sealed envelope"))?;
		let mut parts = body.split(':');
		let (Some(key_id), Some(nonce_b64), Some(ciphertext_b64), None) =
			(parts.next(), parts.next(), parts.next(), parts.next())
		else {
			return Err(cipher_error("secret envelope is malformed"));
		};

		if key_id != self.key_id {
			return Err(cipher_error(format!("secret was sealed with unknown key {key_id}")));
		}

		let nonce = URL_SAFE_NO_PAD
			.decode(nonce_b64.as_bytes())
			.map_err(|e| cipher_error(format!("failed to decode nonce: {e}")))?;

		if nonce.len() != NONCE_LEN {
			return Err(cipher_error("nonce length is invalid"));
		}

		let ciphertext = URL_SAFE_NO_PAD
			.decode(ciphertext_b64.as_bytes())
			.map_err(|e| cipher_error(format!("failed to decode ciphertext: {e}")))?;
		let plaintext = self
			.aead()?
			.decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
			.map_err(|e| cipher_error(format!("failed to decrypt secret: {e}")))?;

		String::from_utf8(plaintext)
			.map_err(|e| cipher_error(format!("decrypted secret is not UTF-8: {e}")))
	}

	fn aead(&self) -> Result<ChaCha20Poly1305, StoreError> {
		ChaCha20Poly1305::new_from_slice(&self.key)
			.map_err(|e| cipher_error(format!("failed to initialize cipher: {e}")))
	}
}
impl Debug for SecretCipher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SecretCipher").field("key_id", &self.key_id).finish_non_exhaustive()
	}
}

fn cipher_error(message: impl Into<String>) -> StoreError {
	StoreError::Cipher { message: message.into() }
}
