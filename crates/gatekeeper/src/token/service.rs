//! Token Service (C11): agent registration, token issuance, and validation.

use super::cipher::{self, KeyPair};
use super::codec::{self, TokenPayload};
use crate::metrics::Metrics;
use crate::store::{Agent, AgentStatus, Store};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rsa::RsaPrivateKey;
use secrecy::SecretString;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum ValidateErrorKind {
	#[error("malformed")]
	Malformed,
	#[error("invalid_signature")]
	InvalidSignature,
	#[error("invalid_token")]
	InvalidToken,
	#[error("expired")]
	Expired,
	#[error("unknown_agent")]
	UnknownAgent,
	#[error("disabled")]
	Disabled,
}

pub struct ValidatedToken {
	pub payload: TokenPayload,
	pub rotation_recommended: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
	#[error("agent not found")]
	UnknownAgent,
	#[error("expires_at must be in the future")]
	ExpiryNotInFuture,
	#[error("expires_at exceeds the maximum token lifetime")]
	ExpiryTooFar,
	#[error("invalid agent public key: {0}")]
	InvalidPublicKey(String),
}

pub struct TokenService {
	store: Arc<dyn Store>,
	metrics: Arc<Metrics>,
	gateway_private_key: RsaPrivateKey,
	signing_secret: SecretString,
	signing_secret_previous: Option<SecretString>,
	max_lifetime: std::time::Duration,
	rotation_threshold: std::time::Duration,
}

impl TokenService {
	pub fn new(
		store: Arc<dyn Store>,
		metrics: Arc<Metrics>,
		gateway_private_key: RsaPrivateKey,
		signing_secret: SecretString,
		signing_secret_previous: Option<SecretString>,
		max_lifetime: std::time::Duration,
		rotation_threshold: std::time::Duration,
	) -> Self {
		Self {
			store,
			metrics,
			gateway_private_key,
			signing_secret,
			signing_secret_previous,
			max_lifetime,
			rotation_threshold,
		}
	}

	fn signing_secrets(&self) -> Vec<&SecretString> {
		let mut v = vec![&self.signing_secret];
		if let Some(prev) = &self.signing_secret_previous {
			v.push(prev);
		}
		v
	}

	/// Registers a new agent and returns the agent id plus its PEM-encoded
	/// private key, which the caller must persist — it is never held by the
	/// gateway and is returned exactly once.
	pub async fn register_agent(
		&self,
		name: String,
		role: String,
		creator: String,
	) -> anyhow::Result<(Agent, String)> {
		let KeyPair {
			public_key,
			private_key,
		} = cipher::generate_keypair()?;
		let now = Utc::now();
		let agent = Agent {
			id: Uuid::new_v4().to_string(),
			name,
			role,
			status: AgentStatus::Active,
			public_key_pem: cipher::public_key_to_pem(&public_key)?,
			creator,
			created_at: now,
			updated_at: now,
		};
		self.store.put_agent(agent.clone()).await?;
		let private_pem = cipher::private_key_to_pem(&private_key)?;
		Ok((agent, private_pem))
	}

	/// Issues a token for `agent_id`. The gateway's own (process-wide)
	/// keypair is used to both encrypt and later decrypt the token — see
	/// DESIGN.md for why this centralized model was chosen over per-agent
	/// public keys.
	pub async fn issue(
		&self,
		agent_id: &str,
		tools: BTreeSet<String>,
		permissions: BTreeSet<String>,
		expires_at: DateTime<Utc>,
	) -> Result<String, IssueError> {
		let agent = self
			.store
			.get_agent(agent_id)
			.await
			.map_err(|_| IssueError::UnknownAgent)?;

		let now = Utc::now();
		if expires_at <= now {
			return Err(IssueError::ExpiryNotInFuture);
		}
		let max = now + ChronoDuration::from_std(self.max_lifetime).unwrap_or(ChronoDuration::zero());
		if expires_at > max {
			return Err(IssueError::ExpiryTooFar);
		}

		let payload = TokenPayload {
			agent_id: agent.id.clone(),
			agent_name: agent.name.clone(),
			tools,
			permissions,
			expires_at,
			issued_at: now,
			nonce: Uuid::new_v4().to_string(),
		};

		// Centralized model (see DESIGN.md): the gateway decrypts what it
		// issues, so it encrypts with its own public key, not the agent's.
		let gateway_public_key = rsa::RsaPublicKey::from(&self.gateway_private_key);
		let token = codec::encode(&payload, &gateway_public_key, &self.signing_secret)
			.map_err(|e| IssueError::InvalidPublicKey(e.to_string()))?;

		self.metrics.token_generations_total.get_or_create(&crate::metrics::AgentLabel {
			agent: agent.id.clone(),
		}).inc();

		Ok(token)
	}

	/// Validates a token: decode, check expiry, look up the agent, then
	/// compute a rotation hint — in that order.
	pub async fn validate(&self, token: &str) -> Result<ValidatedToken, ValidateErrorKind> {
		let secrets = self.signing_secrets();
		let payload = match codec::decode(token, &self.gateway_private_key, &secrets) {
			Ok(p) => p,
			Err(codec::CodecError::Malformed) => return Err(ValidateErrorKind::Malformed),
			Err(codec::CodecError::InvalidSignature) => {
				return Err(ValidateErrorKind::InvalidSignature);
			},
			Err(_) => return Err(ValidateErrorKind::InvalidToken),
		};

		let now = Utc::now();
		if !(now < payload.expires_at) {
			self.metrics.token_expirations_total.inc();
			return Err(ValidateErrorKind::Expired);
		}

		let agent = self
			.store
			.get_agent(&payload.agent_id)
			.await
			.map_err(|_| ValidateErrorKind::UnknownAgent)?;
		if !matches!(agent.status, AgentStatus::Active) {
			return Err(ValidateErrorKind::Disabled);
		}

		self.metrics.token_validations_total.inc();

		let remaining = payload.expires_at - now;
		let rotation_recommended = remaining
			< ChronoDuration::from_std(self.rotation_threshold).unwrap_or(ChronoDuration::zero());
		if rotation_recommended {
			self.metrics.token_rotation_hints_total.inc();
		}

		Ok(ValidatedToken {
			payload,
			rotation_recommended,
		})
	}
}
