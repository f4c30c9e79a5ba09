//! Password-based encryption of login secrets.
//!
//! The offline credential format is shared with an existing front-end and is
//! reproduced bit for bit: PBKDF2-HMAC-SHA256 over the password with a fixed
//! salt and 100 000 iterations yields an AES-256-GCM key; the secret is
//! encrypted under a random 12-byte IV without associated data, and the pair is
//! rendered as an [`OfflineRecord`].
//!
//! The fixed salt weakens PBKDF2 (identical passwords derive identical keys
//! across installations). It is kept because the front-end depends on it.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::Sha256;
use tether_protocol::OfflineRecord;
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const OFFLINE_KEY_SALT: [u8; 16] = [122, 205, 180, 252, 110, 57, 134, 101, 147, 170, 189, 150, 191, 228, 84, 206];
pub const OFFLINE_KEY_ITERATIONS: u32 = 100_000;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;

/// Stretches `password` into an AES-256 key.
pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_LEN]> {
	let mut key = Zeroizing::new([0u8; KEY_LEN]);
	pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key[..]);
	key
}

/// Encrypts `plaintext` under `key` with a fresh random IV. Returns `(iv, ciphertext)`.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<([u8; IV_LEN], Vec<u8>), CryptoError> {
	let cipher = Aes256Gcm::new(key.into());
	let mut iv = [0u8; IV_LEN];
	rand::thread_rng().fill_bytes(&mut iv);
	let ciphertext = cipher.encrypt(Nonce::from_slice(&iv), plaintext).map_err(|_| CryptoError::CannotEncrypt)?;
	Ok((iv, ciphertext))
}

/// Decrypts and authenticates `ciphertext`. Any failure is [`CryptoError::CannotDecrypt`].
pub fn open(key: &[u8; KEY_LEN], iv: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
	if iv.len() != IV_LEN {
		return Err(CryptoError::CannotDecrypt);
	}
	let cipher = Aes256Gcm::new(key.into());
	cipher
		.decrypt(Nonce::from_slice(iv), ciphertext)
		.map(Zeroizing::new)
		.map_err(|_| CryptoError::CannotDecrypt)
}

/// Encrypts a login secret into the offline credential record format.
pub fn encrypt_offline_key(user_password: &str, secret: &str) -> Result<String, CryptoError> {
	let key = derive_key(user_password, &OFFLINE_KEY_SALT, OFFLINE_KEY_ITERATIONS);
	let (iv, ciphertext) = seal(&key, secret.as_bytes())?;
	Ok(OfflineRecord::new(iv.to_vec(), ciphertext).encode())
}

/// Recovers the login secret from an offline credential record.
///
/// A wrong password, a tampered record and a non UTF-8 secret all fail with
/// the same [`CryptoError::CannotDecrypt`].
pub fn decrypt_offline_key(user_password: &str, record: &str) -> Result<Zeroizing<String>, CryptoError> {
	let record = OfflineRecord::decode(record)?;
	let key = derive_key(user_password, &OFFLINE_KEY_SALT, OFFLINE_KEY_ITERATIONS);
	let mut plaintext = open(&key, &record.iv, &record.ciphertext)?;
	let bytes = std::mem::take(&mut *plaintext);
	match String::from_utf8(bytes) {
		Ok(secret) => Ok(Zeroizing::new(secret)),
		Err(err) => {
			drop(Zeroizing::new(err.into_bytes()));
			Err(CryptoError::CannotDecrypt)
		}
	}
}
