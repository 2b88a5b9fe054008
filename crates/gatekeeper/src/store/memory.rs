use super::{Agent, AgentStatus, Policy, Run, RunState, Store, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// In-process implementation of the persistence abstraction. Agents and
/// policies persist for the process lifetime only; a real deployment
/// backs `Store` with a relational database instead.
#[derive(Default)]
pub struct MemoryStore {
	agents: RwLock<HashMap<String, Agent>>,
	// keyed by (agent_id, name) to enforce at most one active policy per
	// (agent, name)
	policies: RwLock<HashMap<(String, String), Policy>>,
	runs: RwLock<HashMap<String, Run>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl Store for MemoryStore {
	async fn put_agent(&self, agent: Agent) -> Result<(), StoreError> {
		self.agents.write().insert(agent.id.clone(), agent);
		Ok(())
	}

	async fn get_agent(&self, id: &str) -> Result<Agent, StoreError> {
		self
			.agents
			.read()
			.get(id)
			.cloned()
			.ok_or(StoreError::NotFound)
	}

	async fn put_policy(&self, policy: Policy) -> Result<(), StoreError> {
		let key = (policy.agent_id.clone(), policy.name.clone());
		self.policies.write().insert(key, policy);
		Ok(())
	}

	async fn active_policies(&self, agent_id: &str) -> Result<Vec<Policy>, StoreError> {
		Ok(
			self
				.policies
				.read()
				.values()
				.filter(|p| p.agent_id == agent_id && p.active)
				.cloned()
				.collect(),
		)
	}

	async fn create_run(&self, agent_id: &str) -> Result<Run, StoreError> {
		let now = Utc::now();
		let run = Run {
			id: Uuid::new_v4().to_string(),
			agent_id: agent_id.to_string(),
			state: RunState::Created,
			created_at: now,
			updated_at: now,
		};
		self.runs.write().insert(run.id.clone(), run.clone());
		Ok(run)
	}

	async fn get_run(&self, id: &str) -> Result<Run, StoreError> {
		self.runs.read().get(id).cloned().ok_or(StoreError::NotFound)
	}

	async fn transition_run(&self, id: &str, state: RunState) -> Result<Run, StoreError> {
		let mut runs = self.runs.write();
		let run = runs.get_mut(id).ok_or(StoreError::NotFound)?;
		if !run.state.is_terminal() {
			run.state = state;
			run.updated_at = Utc::now();
		}
		Ok(run.clone())
	}
}

pub fn is_active(agent: &Agent) -> bool {
	matches!(agent.status, AgentStatus::Active)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::{PolicySpec, RunState};

	fn agent(id: &str, status: AgentStatus) -> Agent {
		let now = Utc::now();
		Agent {
			id: id.to_string(),
			name: "a".into(),
			role: "tester".into(),
			status,
			public_key_pem: String::new(),
			creator: "test".into(),
			created_at: now,
			updated_at: now,
		}
	}

	#[tokio::test]
	async fn agent_roundtrip() {
		let store = MemoryStore::new();
		store.put_agent(agent("a1", AgentStatus::Active)).await.unwrap();
		let got = store.get_agent("a1").await.unwrap();
		assert!(is_active(&got));
		assert!(matches!(store.get_agent("missing").await, Err(StoreError::NotFound)));
	}

	#[tokio::test]
	async fn only_active_policies_are_returned() {
		let store = MemoryStore::new();
		let now = Utc::now();
		let mk = |name: &str, active: bool| Policy {
			id: Uuid::new_v4().to_string(),
			agent_id: "a1".into(),
			name: name.into(),
			spec: PolicySpec::default(),
			spec_hash: "h".into(),
			active,
			created_at: now,
			updated_at: now,
		};
		store.put_policy(mk("p1", true)).await.unwrap();
		store.put_policy(mk("p2", false)).await.unwrap();
		let active = store.active_policies("a1").await.unwrap();
		assert_eq!(active.len(), 1);
		assert_eq!(active[0].name, "p1");
	}

	#[tokio::test]
	async fn terminal_run_state_is_sticky() {
		let store = MemoryStore::new();
		let run = store.create_run("a1").await.unwrap();
		store.transition_run(&run.id, RunState::Running).await.unwrap();
		store.transition_run(&run.id, RunState::Complete).await.unwrap();
		let after = store.transition_run(&run.id, RunState::Running).await.unwrap();
		assert_eq!(after.state, RunState::Complete);
	}
}
