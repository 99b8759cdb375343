use std::sync::Arc;

use color_eyre::eyre;

use dossier_service::{DossierService, ProfileEvent};
use dossier_storage::{
	ProfileStore, memory::MemoryStore, postgres::PostgresStore, redis_store::RedisStore,
};

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<DossierService>,
}

impl AppState {
	pub async fn new(config: dossier_config::Config) -> color_eyre::Result<Self> {
		let store = build_store(&config).await?;
		let service = DossierService::new(config, store);

		if let Some(path) = service.cfg().service.schema_path.clone() {
			let raw = std::fs::read_to_string(&path)?;
			let declaration: serde_json::Value = serde_json::from_str(&raw)?;

			service.register_schema_json(declaration)?;
		}

		service.on_event(log_event);

		Ok(Self { service: Arc::new(service) })
	}
}

async fn build_store(
	config: &dossier_config::Config,
) -> color_eyre::Result<Arc<dyn ProfileStore>> {
	let max_history = config.storage.max_history;

	match config.storage.backend.as_str() {
		"memory" => Ok(Arc::new(MemoryStore::new(max_history))),
		"postgres" => {
			let postgres = config
				.storage
				.postgres
				.as_ref()
				.ok_or_else(|| eyre::eyre!("storage.postgres is required for the postgres backend."))?;

			Ok(Arc::new(PostgresStore::connect(postgres).await?))
		},
		"redis" => {
			let redis = config
				.storage
				.redis
				.as_ref()
				.ok_or_else(|| eyre::eyre!("storage.redis is required for the redis backend."))?;

			Ok(Arc::new(RedisStore::connect(redis, max_history).await?))
		},
		other => Err(eyre::eyre!("Unknown storage backend {other:?}.")),
	}
}

fn log_event(event: &ProfileEvent) {
	match event {
		ProfileEvent::Update { subject, updated, .. } => {
			tracing::info!(%subject, fields = updated.len(), "Profile updated.");
		},
		ProfileEvent::Conflict { subject, rejected } => {
			tracing::info!(%subject, rejected = rejected.len(), "Candidates rejected.");
		},
		ProfileEvent::ObserveComplete { subject, request_id, error, .. } => match error {
			Some(error) => {
				tracing::warn!(%subject, %request_id, %error, "Background observe failed.");
			},
			None => tracing::info!(%subject, %request_id, "Background observe completed."),
		},
	}
}
