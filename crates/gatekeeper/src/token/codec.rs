//! Token wire format: `base64url(ciphertext) "." hex(hmac_sha256(secret, ciphertext))`.

use super::cipher::{self, CipherError};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rsa::{RsaPrivateKey, RsaPublicKey};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayload {
	pub agent_id: String,
	pub agent_name: String,
	pub tools: BTreeSet<String>,
	pub permissions: BTreeSet<String>,
	pub expires_at: DateTime<Utc>,
	pub issued_at: DateTime<Utc>,
	pub nonce: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
	#[error("malformed token: missing separator")]
	Malformed,
	#[error("invalid base64 ciphertext")]
	InvalidBase64,
	#[error("invalid signature")]
	InvalidSignature,
	#[error(transparent)]
	Cipher(#[from] CipherError),
	#[error("payload is not valid JSON: {0}")]
	InvalidJson(#[from] serde_json::Error),
}

/// Encrypts `payload` with `public_key` and signs the ciphertext with
/// `signing_secret`, producing the wire-format token string.
pub fn encode(
	payload: &TokenPayload,
	public_key: &RsaPublicKey,
	signing_secret: &SecretString,
) -> Result<String, CodecError> {
	let json = serde_json::to_vec(payload)?;
	let ciphertext = cipher::encrypt(public_key, &json)?;
	let tag = cipher::sign(signing_secret, &ciphertext);
	Ok(format!(
		"{}.{}",
		URL_SAFE_NO_PAD.encode(&ciphertext),
		hex::encode(tag)
	))
}

/// Verifies the HMAC (against primary, then previous, signing secret) and
/// decrypts the payload with `private_key`. Does not check expiry or agent
/// status — callers layer those checks on top (see `TokenService::validate`).
pub fn decode(
	token: &str,
	private_key: &RsaPrivateKey,
	signing_secrets: &[&SecretString],
) -> Result<TokenPayload, CodecError> {
	let (ct_b64, tag_hex) = token.rsplit_once('.').ok_or(CodecError::Malformed)?;
	let ciphertext = URL_SAFE_NO_PAD
		.decode(ct_b64)
		.map_err(|_| CodecError::InvalidBase64)?;
	let tag = hex::decode(tag_hex).map_err(|_| CodecError::InvalidSignature)?;

	if !cipher::verify_any(signing_secrets, &ciphertext, &tag) {
		return Err(CodecError::InvalidSignature);
	}

	let plaintext = cipher::decrypt(private_key, &ciphertext)?;
	let payload: TokenPayload = serde_json::from_slice(&plaintext)?;
	Ok(payload)
}
