pub mod observe;
pub mod patch;
pub mod query;

mod error;
mod events;
mod idempotency;
mod write;

pub use self::{
	error::{Error, Result},
	events::{EventBus, ProfileEvent},
	observe::{ExtractFrom, ObserveMode, ObserveRequest, ObserveResponse, OnExtractorError},
	patch::{PatchRequest, PatchResponse},
	query::FactsOptions,
};

use std::{
	pin::Pin,
	sync::{Arc, RwLock},
	time::{SystemTime, UNIX_EPOCH},
};

use serde_json::Value;

use crate::idempotency::IdempotencyCache;
use dossier_config::{Config, LlmProviderConfig};
use dossier_domain::schema::ProfileSchema;
use dossier_providers::{ExtractorError, extractor};
use dossier_storage::ProfileStore;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait ExtractorProvider
where
	Self: Send + Sync,
{
	fn extract<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, Result<Value, ExtractorError>>;
}

struct DefaultExtractor;
impl ExtractorProvider for DefaultExtractor {
	fn extract<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, Result<Value, ExtractorError>> {
		Box::pin(extractor::extract(cfg, messages))
	}
}

pub(crate) struct ServiceInner {
	pub(crate) cfg: Config,
	pub(crate) store: Arc<dyn ProfileStore>,
	pub(crate) extractor: Arc<dyn ExtractorProvider>,
	pub(crate) schema: RwLock<Option<ProfileSchema>>,
	pub(crate) events: EventBus,
	pub(crate) idempotency: IdempotencyCache,
}

/// The orchestrator. Cheap to clone; the async observe path clones a handle
/// into its background task.
#[derive(Clone)]
pub struct DossierService {
	pub(crate) inner: Arc<ServiceInner>,
}
impl DossierService {
	pub fn new(cfg: Config, store: Arc<dyn ProfileStore>) -> Self {
		Self::with_extractor(cfg, store, Arc::new(DefaultExtractor))
	}

	pub fn with_extractor(
		cfg: Config,
		store: Arc<dyn ProfileStore>,
		extractor: Arc<dyn ExtractorProvider>,
	) -> Self {
		let idempotency = IdempotencyCache::new(&cfg.idempotency);

		Self {
			inner: Arc::new(ServiceInner {
				cfg,
				store,
				extractor,
				schema: RwLock::new(None),
				events: EventBus::default(),
				idempotency,
			}),
		}
	}

	pub fn cfg(&self) -> &Config {
		&self.inner.cfg
	}

	pub fn store(&self) -> &Arc<dyn ProfileStore> {
		&self.inner.store
	}

	pub fn register_schema(&self, schema: ProfileSchema) {
		*self.inner.schema.write().unwrap_or_else(|err| err.into_inner()) = Some(schema);
	}

	/// Registers a schema from its JSON declaration; invalid declarations
	/// surface as validation errors.
	pub fn register_schema_json(&self, declaration: Value) -> Result<()> {
		let schema = ProfileSchema::from_json(declaration)?;

		self.register_schema(schema);

		Ok(())
	}

	pub fn on_event<F>(&self, handler: F)
	where
		F: Fn(&ProfileEvent) + Send + Sync + 'static,
	{
		self.inner.events.subscribe(handler);
	}

	pub(crate) fn current_schema(&self) -> Result<ProfileSchema> {
		self.inner
			.schema
			.read()
			.unwrap_or_else(|err| err.into_inner())
			.clone()
			.ok_or(Error::SchemaNotRegistered)
	}

	pub(crate) fn require_subject(subject: &str) -> Result<()> {
		if subject.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "subject must be non-empty.".to_string() });
		}

		Ok(())
	}
}

pub(crate) fn now_ms() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| elapsed.as_millis() as i64)
		.unwrap_or_default()
}
