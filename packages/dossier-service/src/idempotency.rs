use std::{
	collections::{HashMap, VecDeque},
	sync::Mutex,
	time::{Duration, Instant},
};

use crate::{observe::ObserveResponse, patch::PatchResponse};

#[derive(Clone, Debug)]
pub(crate) enum CachedResult {
	Observe(ObserveResponse),
	Patch(PatchResponse),
}

struct CachedEntry {
	stored_at: Instant,
	result: CachedResult,
}

#[derive(Default)]
struct CacheState {
	entries: HashMap<String, CachedEntry>,
	order: VecDeque<String>,
}

/// Per-process replay cache. A hit returns the stored result verbatim and
/// short-circuits the whole pipeline, events included. Bounded by entry count
/// with oldest-first eviction; expired entries are pruned on insert.
pub(crate) struct IdempotencyCache {
	state: Mutex<CacheState>,
	ttl: Duration,
	max_entries: usize,
}
impl IdempotencyCache {
	pub fn new(cfg: &dossier_config::Idempotency) -> Self {
		Self {
			state: Mutex::new(CacheState::default()),
			ttl: Duration::from_millis(cfg.ttl_ms),
			max_entries: cfg.max_entries as usize,
		}
	}

	pub fn key(kind: &str, subject: &str, caller_key: &str) -> String {
		format!("{kind}:{subject}:{caller_key}")
	}

	pub fn get(&self, key: &str) -> Option<CachedResult> {
		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
		let expired = match state.entries.get(key) {
			Some(entry) if entry.stored_at.elapsed() < self.ttl =>
				return Some(entry.result.clone()),
			Some(_) => true,
			None => false,
		};

		if expired {
			state.entries.remove(key);
			state.order.retain(|stored| stored != key);
		}

		None
	}

	pub fn insert(&self, key: String, result: CachedResult) {
		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

		prune_expired(&mut state, self.ttl);

		while state.entries.len() >= self.max_entries {
			let Some(oldest) = state.order.pop_front() else { break };

			state.entries.remove(&oldest);
		}

		if state.entries.insert(key.clone(), CachedEntry { stored_at: Instant::now(), result }).is_none()
		{
			state.order.push_back(key);
		}
	}
}

fn prune_expired(state: &mut CacheState, ttl: Duration) {
	let expired: Vec<String> = state
		.entries
		.iter()
		.filter(|(_, entry)| entry.stored_at.elapsed() >= ttl)
		.map(|(key, _)| key.clone())
		.collect();

	for key in &expired {
		state.entries.remove(key);
	}

	if !expired.is_empty() {
		state.order.retain(|key| state.entries.contains_key(key));
	}
}
