//! Persisted data model (Agent, Policy, Run) behind a pluggable `Store`
//! trait. `memory::MemoryStore` is the only implementation here; a
//! database-backed one can be swapped in without touching pipeline code.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
	Active,
	Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
	pub id: String,
	pub name: String,
	pub role: String,
	pub status: AgentStatus,
	pub public_key_pem: String,
	pub creator: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// Structured policy guard conditions, parsed once from the persisted JSON
/// and cached per agent rather than re-parsed on every request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyGuards {
	#[serde(default, rename = "allowedDomains", skip_serializing_if = "Option::is_none")]
	pub allowed_domains: Option<BTreeSet<String>>,
	#[serde(default, rename = "maxRequestSize", skip_serializing_if = "Option::is_none")]
	pub max_request_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySpec {
	/// Set of `"tool:action"` strings this policy authorizes.
	pub scopes: BTreeSet<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub intent: Option<String>,
	#[serde(default)]
	pub guards: PolicyGuards,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
	pub id: String,
	pub agent_id: String,
	pub name: String,
	pub spec: PolicySpec,
	pub spec_hash: String,
	pub active: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
	Created,
	Running,
	Complete,
	Failed,
	Stopped,
}

impl RunState {
	pub fn is_terminal(self) -> bool {
		matches!(self, RunState::Complete | RunState::Failed | RunState::Stopped)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
	pub id: String,
	pub agent_id: String,
	pub state: RunState,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("not found")]
	NotFound,
	#[error("conflict: {0}")]
	Conflict(String),
}

#[async_trait]
pub trait Store: Send + Sync {
	async fn put_agent(&self, agent: Agent) -> Result<(), StoreError>;
	async fn get_agent(&self, id: &str) -> Result<Agent, StoreError>;

	async fn put_policy(&self, policy: Policy) -> Result<(), StoreError>;
	/// Union of active policies for an agent.
	async fn active_policies(&self, agent_id: &str) -> Result<Vec<Policy>, StoreError>;

	async fn create_run(&self, agent_id: &str) -> Result<Run, StoreError>;
	async fn get_run(&self, id: &str) -> Result<Run, StoreError>;
	/// Transitions a run's state. Terminal states are sticky: transitioning
	/// an already-terminal run is a no-op, not an error.
	async fn transition_run(&self, id: &str, state: RunState) -> Result<Run, StoreError>;
}
