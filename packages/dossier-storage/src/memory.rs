use std::{
	collections::HashMap,
	sync::{Mutex, MutexGuard},
};

use crate::{
	BoxFuture, Error, HistoryPage, HistoryQuery, ProfileStore, Result, SetOptions, StoredRecord,
	effective_limit,
};
use dossier_domain::model::{HistoryEntry, Profile, ProvenanceMap};

#[derive(Clone, Debug)]
struct VersionedRecord {
	profile: Profile,
	provenance: ProvenanceMap,
	version: u64,
}

#[derive(Debug, Default)]
struct State {
	records: HashMap<String, VersionedRecord>,
	history: HashMap<String, Vec<HistoryEntry>>,
}

/// Process-local adapter. The etag is an integer version rendered as a
/// string; the history cursor is a timestamp in milliseconds.
pub struct MemoryStore {
	state: Mutex<State>,
	max_history: usize,
}
impl MemoryStore {
	pub fn new(max_history: u32) -> Self {
		Self { state: Mutex::new(State::default()), max_history: max_history as usize }
	}

	fn lock(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn push_history(&self, state: &mut State, subject: &str, entries: &[HistoryEntry]) {
		let tail = state.history.entry(subject.to_string()).or_default();

		tail.extend_from_slice(entries);

		if tail.len() > self.max_history {
			let excess = tail.len() - self.max_history;

			tail.drain(..excess);
		}
	}
}
impl ProfileStore for MemoryStore {
	fn get<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<Option<StoredRecord>>> {
		let record = self.lock().records.get(subject).map(|record| StoredRecord {
			profile: record.profile.clone(),
			provenance: record.provenance.clone(),
			etag: record.version.to_string(),
		});

		Box::pin(async move { Ok(record) })
	}

	fn set<'a>(
		&'a self,
		subject: &'a str,
		profile: &'a Profile,
		provenance: &'a ProvenanceMap,
		options: SetOptions,
		history: &'a [HistoryEntry],
	) -> BoxFuture<'a, Result<String>> {
		let result = (|| {
			let mut state = self.lock();
			let current_version = state.records.get(subject).map(|record| record.version);
			let next_version = if options.force {
				current_version.unwrap_or(0) + 1
			} else {
				match (&options.etag, current_version) {
					(None, None) => 1,
					(None, Some(version)) => {
						return Err(Error::Conflict(format!(
							"Record already exists at version {version}."
						)));
					},
					(Some(_), None) =>
						return Err(Error::Conflict("Record no longer exists.".to_string())),
					(Some(expected), Some(version)) => {
						if expected != &version.to_string() {
							return Err(Error::Conflict(format!(
								"Expected version {expected}, found {version}."
							)));
						}

						version + 1
					},
				}
			};

			state.records.insert(subject.to_string(), VersionedRecord {
				profile: profile.clone(),
				provenance: provenance.clone(),
				version: next_version,
			});

			self.push_history(&mut state, subject, history);

			Ok(next_version.to_string())
		})();

		Box::pin(async move { result })
	}

	fn append_history<'a>(
		&'a self,
		subject: &'a str,
		entries: &'a [HistoryEntry],
	) -> BoxFuture<'a, Result<()>> {
		let mut state = self.lock();

		self.push_history(&mut state, subject, entries);

		drop(state);

		Box::pin(async move { Ok(()) })
	}

	fn get_history<'a>(
		&'a self,
		subject: &'a str,
		query: HistoryQuery,
	) -> BoxFuture<'a, Result<HistoryPage>> {
		let result = (|| {
			let after: Option<i64> = match query.cursor.as_deref() {
				Some(raw) => Some(raw.parse().map_err(|_| {
					Error::InvalidArgument(format!("Invalid history cursor {raw:?}."))
				})?),
				None => None,
			};
			let limit = effective_limit(query.limit);
			let state = self.lock();
			let entries: Vec<HistoryEntry> = state
				.history
				.get(subject)
				.map(|tail| {
					tail.iter()
						.filter(|entry| after.map(|ts| entry.timestamp_ms > ts).unwrap_or(true))
						.filter(|entry| {
							query
								.field
								.as_deref()
								.map(|field| entry.field == field)
								.unwrap_or(true)
						})
						.take(limit)
						.cloned()
						.collect()
				})
				.unwrap_or_default();
			let next_cursor = (entries.len() == limit)
				.then(|| entries.last().map(|entry| entry.timestamp_ms.to_string()))
				.flatten();

			Ok(HistoryPage { entries, next_cursor })
		})();

		Box::pin(async move { result })
	}

	fn delete<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<bool>> {
		let mut state = self.lock();
		let had_record = state.records.remove(subject).is_some();
		let had_history = state.history.remove(subject).is_some();

		drop(state);

		Box::pin(async move { Ok(had_record || had_history) })
	}
}
