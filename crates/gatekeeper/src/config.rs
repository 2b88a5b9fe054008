//! Process configuration, loaded once at boot from the environment.
//! A parse/validation failure here is fatal (exit code 1) — unlike per-request
//! errors, which degrade gracefully, a bad config must never start serving.

use crate::adapter::chaos::ChaosParams;
use secrecy::SecretString;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamMode {
	Live,
	Mock,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureFlags {
	pub cache: bool,
	pub retry: bool,
	pub breakers: bool,
	pub chaos: bool,
}

#[derive(Clone)]
pub struct Config {
	pub signing_secret: SecretString,
	pub signing_secret_previous: Option<SecretString>,
	pub gateway_private_key_pem: SecretString,
	pub upstream_mode: UpstreamMode,
	pub flags: FeatureFlags,
	pub http_timeout: Duration,
	pub default_timezone: String,
	pub max_token_lifetime: Duration,
	pub rotation_threshold: Duration,
	pub rate_limit_per_minute: u32,
	/// Fault-injection rates for the chaos hook (C14). Read regardless of
	/// `flags.chaos` so flipping the flag on at runtime has an effect
	/// without a redeploy; all default to zero (no injected faults).
	pub chaos: ChaosParams,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("missing required environment variable {0}")]
	MissingVar(&'static str),
	#[error("invalid value for {name}: {value:?}")]
	InvalidValue { name: &'static str, value: String },
	#[error(
		"FF_POLICY=off is not permitted: policy enforcement is always required"
	)]
	PolicyDisabled,
}

/// Parses a Go-style duration string ("10m", "24h") from the named
/// environment variable, falling back to `default` when unset.
fn parse_duration_env(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
	match std::env::var(key) {
		Err(_) => Ok(default),
		Ok(v) => gatekeeper_core::durfmt::parse(&v).map_err(|_| ConfigError::InvalidValue {
			name: key,
			value: v,
		}),
	}
}

fn env_f64(key: &'static str, default: f64) -> Result<f64, ConfigError> {
	match std::env::var(key) {
		Err(_) => Ok(default),
		Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue { name: key, value: v }),
	}
}

fn env_u64(key: &'static str, default: u64) -> Result<u64, ConfigError> {
	match std::env::var(key) {
		Err(_) => Ok(default),
		Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue { name: key, value: v }),
	}
}

fn env_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
	match std::env::var(key) {
		Err(_) => Ok(default),
		Ok(v) => match v.to_ascii_lowercase().as_str() {
			"on" | "true" | "1" => Ok(true),
			"off" | "false" | "0" => Ok(false),
			_ => Err(ConfigError::InvalidValue {
				name: "flag",
				value: v,
			}),
		},
	}
}

impl Config {
	/// Loads config from the process environment. Returns `PolicyDisabled`
	/// if `FF_POLICY=off` is set — policy enforcement may not be disabled.
	pub fn from_env() -> Result<Self, ConfigError> {
		let signing_secret = std::env::var("SIGNING_SECRET")
			.map_err(|_| ConfigError::MissingVar("SIGNING_SECRET"))?;
		let signing_secret_previous = std::env::var("SIGNING_SECRET_PREVIOUS").ok();
		let gateway_private_key_pem = std::env::var("GATEWAY_PRIVATE_KEY")
			.map_err(|_| ConfigError::MissingVar("GATEWAY_PRIVATE_KEY"))?;

		let upstream_mode = match std::env::var("UPSTREAM_MODE").as_deref() {
			Ok("live") => UpstreamMode::Live,
			Ok("mock") | Err(_) => UpstreamMode::Mock,
			Ok(other) => {
				return Err(ConfigError::InvalidValue {
					name: "UPSTREAM_MODE",
					value: other.to_string(),
				});
			},
		};

		if !env_bool("FF_POLICY", true)? {
			return Err(ConfigError::PolicyDisabled);
		}

		let flags = FeatureFlags {
			cache: env_bool("FF_CACHE", true)?,
			retry: env_bool("FF_RETRY", true)?,
			breakers: env_bool("FF_BREAKERS", true)?,
			chaos: env_bool("FF_CHAOS", false)?,
		};

		let http_timeout_ms: u64 = std::env::var("HTTP_TIMEOUT_MS")
			.ok()
			.and_then(|v| v.parse().ok())
			.unwrap_or(6_000);

		let default_timezone =
			std::env::var("DEFAULT_TIMEZONE").unwrap_or_else(|_| "UTC".to_string());

		let rate_limit_per_minute: u32 = std::env::var("RATE_LIMIT_PER_MINUTE")
			.ok()
			.and_then(|v| v.parse().ok())
			.unwrap_or(5);

		let chaos = ChaosParams {
			latency_pct: env_f64("CHAOS_LATENCY_PCT", 0.0)?,
			latency_ms: env_u64("CHAOS_LATENCY_MS", 0)?,
			error_pct: env_f64("CHAOS_ERROR_PCT", 0.0)?,
			timeout_pct: env_f64("CHAOS_TIMEOUT_PCT", 0.0)?,
		};

		Ok(Config {
			signing_secret: SecretString::from(signing_secret),
			signing_secret_previous: signing_secret_previous.map(SecretString::from),
			gateway_private_key_pem: SecretString::from(gateway_private_key_pem),
			upstream_mode,
			flags,
			http_timeout: Duration::from_millis(http_timeout_ms),
			default_timezone,
			max_token_lifetime: parse_duration_env("MAX_TOKEN_LIFETIME", Duration::from_secs(24 * 60 * 60))?,
			rotation_threshold: parse_duration_env("TOKEN_ROTATION_THRESHOLD", Duration::from_secs(10 * 60))?,
			rate_limit_per_minute,
			chaos,
		})
	}
}
