use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
	DossierService, Result,
	idempotency::{CachedResult, IdempotencyCache},
	now_ms,
	write::WriteRequest,
};
use dossier_domain::model::{Candidate, Profile, Rejection};

#[derive(Clone, Debug, Deserialize)]
pub struct PatchRequest {
	pub subject: String,
	pub facts: Map<String, Value>,
	pub source: Option<String>,
	pub confidence: Option<f64>,
	/// Applies to every fact in the batch; defaults to the server clock.
	pub timestamp_ms: Option<i64>,
	pub idempotency_key: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PatchResponse {
	pub profile: Profile,
	pub updated: Map<String, Value>,
	pub rejected: Vec<Rejection>,
}

impl DossierService {
	/// Applies caller-supplied trusted facts directly. The recency check is
	/// bypassed so human and CRM backfills always land; the timestamp and
	/// priority rules still apply.
	pub async fn patch(&self, req: PatchRequest) -> Result<PatchResponse> {
		let schema = self.current_schema()?;

		Self::require_subject(&req.subject)?;

		let cache_key = req
			.idempotency_key
			.as_deref()
			.map(|key| IdempotencyCache::key("patch", &req.subject, key));

		if let Some(key) = cache_key.as_deref()
			&& let Some(CachedResult::Patch(stored)) = self.inner.idempotency.get(key)
		{
			return Ok(stored);
		}

		let source = req.source.clone().unwrap_or_else(|| "manual".to_string());
		let timestamp_ms = req.timestamp_ms.unwrap_or_else(now_ms);
		let confidence = req.confidence.unwrap_or(1.0).clamp(0.0, 1.0);
		let candidates: Vec<Candidate> = req
			.facts
			.iter()
			.map(|(field, value)| Candidate {
				field: field.clone(),
				value: Some(value.clone()),
				source: source.clone(),
				timestamp_ms,
				confidence,
				inferred: false,
			})
			.collect();
		let outcome = self
			.apply_candidates(&schema, WriteRequest {
				subject: req.subject.clone(),
				candidates,
				skip_recency_check: true,
			})
			.await?;
		let response = PatchResponse {
			profile: outcome.profile,
			updated: outcome.updated,
			rejected: outcome.rejected,
		};

		if let Some(key) = cache_key {
			self.inner.idempotency.insert(key, CachedResult::Patch(response.clone()));
		}

		Ok(response)
	}
}
