//! Cipher & Token Codec (C1): RSA-2048 keypair generation and asymmetric
//! encrypt/decrypt, plus HMAC-SHA256 signing/verification over ciphertext.
//!
//! Two distinct keypairs must never decrypt each other's outputs — this is
//! exercised directly in the unit tests below.

use hmac::{Hmac, Mac};
use rand_core::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Sha256, digest::Digest};

const RSA_BITS: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
	#[error("keypair generation failed: {0}")]
	KeyGen(String),
	#[error("encryption failed: {0}")]
	Encrypt(String),
	#[error("decryption failed")]
	Decrypt,
	#[error("invalid PEM key material: {0}")]
	InvalidKey(String),
}

pub struct KeyPair {
	pub public_key: RsaPublicKey,
	pub private_key: RsaPrivateKey,
}

pub fn generate_keypair() -> Result<KeyPair, CipherError> {
	let private_key =
		RsaPrivateKey::new(&mut OsRng, RSA_BITS).map_err(|e| CipherError::KeyGen(e.to_string()))?;
	let public_key = RsaPublicKey::from(&private_key);
	Ok(KeyPair {
		public_key,
		private_key,
	})
}

pub fn encrypt(public_key: &RsaPublicKey, bytes: &[u8]) -> Result<Vec<u8>, CipherError> {
	public_key
		.encrypt(&mut OsRng, Oaep::new::<Sha256>(), bytes)
		.map_err(|e| CipherError::Encrypt(e.to_string()))
}

pub fn decrypt(private_key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
	private_key
		.decrypt(Oaep::new::<Sha256>(), ciphertext)
		.map_err(|_| CipherError::Decrypt)
}

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over the raw ciphertext bytes (not the base64 string) to
/// avoid canonicalization ambiguity.
pub fn sign(secret: &SecretString, ciphertext: &[u8]) -> Vec<u8> {
	let mut mac =
		HmacSha256::new_from_slice(secret.expose_secret().as_bytes()).expect("HMAC accepts any key length");
	mac.update(ciphertext);
	mac.finalize().into_bytes().to_vec()
}

/// Constant-time verification against one or more candidate secrets, to
/// support zero-downtime signing-secret rotation: try the primary secret,
/// then the previous one.
pub fn verify_any(secrets: &[&SecretString], ciphertext: &[u8], tag: &[u8]) -> bool {
	secrets.iter().any(|secret| {
		let mut mac = match HmacSha256::new_from_slice(secret.expose_secret().as_bytes()) {
			Ok(m) => m,
			Err(_) => return false,
		};
		mac.update(ciphertext);
		mac.verify_slice(tag).is_ok()
	})
}

/// PEM-encodes a private key (used when returning a freshly generated
/// keypair to the registration caller exactly once).
pub fn private_key_to_pem(key: &RsaPrivateKey) -> Result<String, CipherError> {
	use rsa::pkcs8::EncodePrivateKey;
	key
		.to_pkcs8_pem(Default::default())
		.map(|p| p.to_string())
		.map_err(|e| CipherError::InvalidKey(e.to_string()))
}

pub fn public_key_to_pem(key: &RsaPublicKey) -> Result<String, CipherError> {
	use rsa::pkcs8::EncodePublicKey;
	key
		.to_public_key_pem(Default::default())
		.map_err(|e| CipherError::InvalidKey(e.to_string()))
}

pub fn private_key_from_pem(pem: &str) -> Result<RsaPrivateKey, CipherError> {
	use rsa::pkcs8::DecodePrivateKey;
	RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| CipherError::InvalidKey(e.to_string()))
}

pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey, CipherError> {
	use rsa::pkcs8::DecodePublicKey;
	RsaPublicKey::from_public_key_pem(pem).map_err(|e| CipherError::InvalidKey(e.to_string()))
}

/// Content-addressed hash used for spec_hash / body_hash / cache keys
/// throughout the gateway (not cryptographic secrecy, just stable identity).
pub fn stable_hash(bytes: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.update(bytes);
	hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decrypt_inverts_encrypt() {
		let kp = generate_keypair().unwrap();
		let msg = b"hello agent gateway";
		let ct = encrypt(&kp.public_key, msg).unwrap();
		let pt = decrypt(&kp.private_key, &ct).unwrap();
		assert_eq!(pt, msg);
	}

	#[test]
	fn foreign_private_key_cannot_decrypt() {
		let kp_a = generate_keypair().unwrap();
		let kp_b = generate_keypair().unwrap();
		let ct = encrypt(&kp_a.public_key, b"secret payload").unwrap();
		assert!(decrypt(&kp_b.private_key, &ct).is_err());
	}

	#[test]
	fn hmac_rotation_accepts_primary_or_previous() {
		let primary = SecretString::from("primary-secret");
		let previous = SecretString::from("previous-secret");
		let ciphertext = b"ciphertext-bytes";
		let tag = sign(&previous, ciphertext);
		assert!(verify_any(&[&primary, &previous], ciphertext, &tag));
		assert!(!verify_any(&[&primary], ciphertext, &tag));
	}

	#[test]
	fn hmac_rejects_tampered_ciphertext() {
		let secret = SecretString::from("s");
		let tag = sign(&secret, b"original");
		assert!(!verify_any(&[&secret], b"tampered!", &tag));
	}
}
