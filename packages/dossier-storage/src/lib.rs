pub mod db;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod redis_store;
pub mod schema;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn Future<Output = T> + Send + 'a>>;

use dossier_domain::model::{HistoryEntry, Profile, ProvenanceMap};

const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 500;

/// One subject's persisted state. The etag is adapter-private in form but
/// always an opaque string externally, strictly increasing per subject.
#[derive(Clone, Debug)]
pub struct StoredRecord {
	pub profile: Profile,
	pub provenance: ProvenanceMap,
	pub etag: String,
}

/// Write options. `etag: None` creates the record and conflicts when one
/// already exists; `Some` compares-and-swaps against the observed version;
/// `force` writes unconditionally.
#[derive(Clone, Debug, Default)]
pub struct SetOptions {
	pub etag: Option<String>,
	pub force: bool,
}

#[derive(Clone, Debug, Default)]
pub struct HistoryQuery {
	pub field: Option<String>,
	pub cursor: Option<String>,
	pub limit: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct HistoryPage {
	pub entries: Vec<HistoryEntry>,
	pub next_cursor: Option<String>,
}

/// Uniform persistence contract over the three backends. History appended via
/// `set` is atomic with the profile write; `append_history` covers
/// rejected-only outcomes that change no profile state.
pub trait ProfileStore
where
	Self: Send + Sync,
{
	fn get<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<Option<StoredRecord>>>;

	fn set<'a>(
		&'a self,
		subject: &'a str,
		profile: &'a Profile,
		provenance: &'a ProvenanceMap,
		options: SetOptions,
		history: &'a [HistoryEntry],
	) -> BoxFuture<'a, Result<String>>;

	fn append_history<'a>(
		&'a self,
		subject: &'a str,
		entries: &'a [HistoryEntry],
	) -> BoxFuture<'a, Result<()>>;

	fn get_history<'a>(
		&'a self,
		subject: &'a str,
		query: HistoryQuery,
	) -> BoxFuture<'a, Result<HistoryPage>>;

	fn delete<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<bool>>;

	fn health_check<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
		Box::pin(async { Ok(()) })
	}
}

pub(crate) fn effective_limit(limit: Option<u32>) -> usize {
	limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT) as usize
}
