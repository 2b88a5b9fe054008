//! Secret Provider (C2): resolves upstream tool credentials by key.
//! Upstream credentials are never persisted by the gateway itself — they
//! live in whatever backs this trait (here, the process environment).

use secrecy::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
	#[error("secret {0:?} is not resolvable")]
	Unavailable(String),
}

pub trait SecretProvider: Send + Sync {
	/// Resolves a secret by dotted key, e.g. `"serpapi.api_key"`.
	fn resolve(&self, key: &str) -> Result<SecretString, SecretError>;
}

/// Default backend: resolves `tool.field` to the env var
/// `TOOL_FIELD` (uppercased, dots become underscores).
#[derive(Debug, Default)]
pub struct EnvSecretProvider;

impl SecretProvider for EnvSecretProvider {
	fn resolve(&self, key: &str) -> Result<SecretString, SecretError> {
		let env_key = key.to_ascii_uppercase().replace('.', "_");
		std::env::var(&env_key)
			.map(SecretString::from)
			.map_err(|_| SecretError::Unavailable(key.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use secrecy::ExposeSecret;

	#[test]
	fn resolves_env_backed_secret() {
		unsafe { std::env::set_var("SERPAPI_API_KEY", "abc123") };
		let provider = EnvSecretProvider;
		let secret = provider.resolve("serpapi.api_key").unwrap();
		assert_eq!(secret.expose_secret(), "abc123");
	}

	#[test]
	fn missing_secret_is_unavailable() {
		let provider = EnvSecretProvider;
		assert!(matches!(
			provider.resolve("does.not.exist.at.all"),
			Err(SecretError::Unavailable(_))
		));
	}
}
