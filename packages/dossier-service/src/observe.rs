use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
	DossierService, Error, ProfileEvent, Result,
	idempotency::{CachedResult, IdempotencyCache},
	now_ms,
	write::WriteRequest,
};
use dossier_config::LlmProviderConfig;
use dossier_domain::{
	model::{Candidate, Profile, Rejection},
	schema::ProfileSchema,
	text,
};
use dossier_providers::extractor::{self, RawCandidate};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserveMode {
	#[default]
	Sync,
	Async,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractFrom {
	#[default]
	Input,
	Output,
	Both,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnExtractorError {
	#[default]
	Skip,
	Throw,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ObserveRequest {
	pub subject: String,
	pub input: String,
	pub output: Option<String>,
	pub source: Option<String>,
	pub confidence: Option<f64>,
	pub idempotency_key: Option<String>,
	#[serde(default)]
	pub mode: ObserveMode,
	#[serde(default)]
	pub extract_from: ExtractFrom,
	#[serde(default)]
	pub on_error: OnExtractorError,
}

#[derive(Clone, Debug, Serialize)]
pub struct ObserveResponse {
	pub profile: Profile,
	pub updated: Map<String, Value>,
	pub rejected: Vec<Rejection>,
	pub extracted: Map<String, Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub raw_response: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub latency_ms: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub queued: Option<bool>,
	pub request_id: String,
}

impl DossierService {
	/// Feeds conversational text through the extractor and merges the
	/// resulting candidates. `mode = async` snapshots the profile, returns
	/// immediately, and finishes in the background, emitting exactly one
	/// `observe_complete`.
	pub async fn observe(&self, req: ObserveRequest) -> Result<ObserveResponse> {
		let schema = self.current_schema()?;

		Self::require_subject(&req.subject)?;

		let Some(extractor_cfg) = self.inner.cfg.providers.extractor.clone() else {
			return Err(Error::ExtractorNotConfigured);
		};
		let cache_key = req
			.idempotency_key
			.as_deref()
			.map(|key| IdempotencyCache::key("observe", &req.subject, key));

		if let Some(key) = cache_key.as_deref()
			&& let Some(CachedResult::Observe(stored)) = self.inner.idempotency.get(key)
		{
			return Ok(stored);
		}

		let request_id = Uuid::new_v4().to_string();
		let response = match req.mode {
			ObserveMode::Sync => {
				let response =
					self.observe_pipeline(&schema, &extractor_cfg, &req, &request_id).await?;

				self.cache_observe(cache_key, &response);

				response
			},
			ObserveMode::Async => {
				// The snapshot read happens-before the background dispatch so
				// the caller never sees a profile newer than the base the
				// background merge starts from.
				let snapshot = self
					.inner
					.store
					.get(&req.subject)
					.await?
					.map(|record| record.profile)
					.unwrap_or_default();
				let response = ObserveResponse {
					profile: snapshot,
					updated: Map::new(),
					rejected: Vec::new(),
					extracted: Map::new(),
					raw_response: None,
					latency_ms: None,
					queued: Some(true),
					request_id: request_id.clone(),
				};

				self.cache_observe(cache_key, &response);
				self.dispatch_background(schema, extractor_cfg, req, request_id);

				response
			},
		};

		Ok(response)
	}

	fn dispatch_background(
		&self,
		schema: ProfileSchema,
		extractor_cfg: LlmProviderConfig,
		req: ObserveRequest,
		request_id: String,
	) {
		let service = self.clone();

		tokio::spawn(async move {
			let subject = req.subject.clone();
			let outcome =
				service.observe_pipeline(&schema, &extractor_cfg, &req, &request_id).await;
			let event = match outcome {
				Ok(response) => ProfileEvent::ObserveComplete {
					subject,
					request_id,
					result: Some(Box::new(response)),
					error: None,
				},
				Err(err) => {
					tracing::warn!(error = %err, "Background observe failed.");

					ProfileEvent::ObserveComplete {
						subject,
						request_id,
						result: None,
						error: Some(err.to_string()),
					}
				},
			};

			service.inner.events.emit(&event);
		});
	}

	async fn observe_pipeline(
		&self,
		schema: &ProfileSchema,
		extractor_cfg: &LlmProviderConfig,
		req: &ObserveRequest,
		request_id: &str,
	) -> Result<ObserveResponse> {
		let now = now_ms();
		let max_chars = extractor_cfg.max_input_chars as usize;
		let input = clean(&req.input, max_chars);
		let output = req.output.as_deref().map(|raw| clean(raw, max_chars));
		let (input_part, output_part): (&str, Option<&str>) = match req.extract_from {
			ExtractFrom::Input => (&input, None),
			ExtractFrom::Output => (output.as_deref().unwrap_or_default(), None),
			ExtractFrom::Both => (&input, output.as_deref()),
		};
		let messages = extractor::build_extractor_messages(
			input_part,
			output_part,
			&schema.describe(),
			None,
		);
		let started = Instant::now();
		let extracted_payload = self.inner.extractor.extract(extractor_cfg, &messages).await;
		let latency_ms = started.elapsed().as_millis() as u64;
		let (raw_candidates, raw_response, extractor_error) = match extracted_payload {
			Ok(payload) => match extractor::parse_candidates(&payload) {
				Ok(output) => (output.candidates, Some(payload), None),
				Err(err) => (Vec::new(), Some(payload), Some(err)),
			},
			Err(err) => (Vec::new(), None, Some(err)),
		};

		if let Some(err) = extractor_error {
			match req.on_error {
				// The merge proceeds with zero candidates: a no-op write.
				OnExtractorError::Skip => {
					tracing::warn!(error = %err, "Extractor failed; continuing with no candidates.");
				},
				OnExtractorError::Throw => return Err(Error::Extractor(err)),
			}
		}

		let candidates = normalize_candidates(raw_candidates, req, now);
		let extracted: Map<String, Value> = candidates
			.iter()
			.filter_map(|candidate| {
				candidate.value.clone().map(|value| (candidate.field.clone(), value))
			})
			.collect();
		let outcome = self
			.apply_candidates(schema, WriteRequest {
				subject: req.subject.clone(),
				candidates,
				skip_recency_check: false,
			})
			.await?;

		Ok(ObserveResponse {
			profile: outcome.profile,
			updated: outcome.updated,
			rejected: outcome.rejected,
			extracted,
			raw_response,
			latency_ms: Some(latency_ms),
			queued: None,
			request_id: request_id.to_string(),
		})
	}

	fn cache_observe(&self, cache_key: Option<String>, response: &ObserveResponse) {
		if let Some(key) = cache_key {
			self.inner.idempotency.insert(key, CachedResult::Observe(response.clone()));
		}
	}
}

fn clean(raw: &str, max_chars: usize) -> String {
	text::truncate_chars(&text::sanitize_text(raw), max_chars)
}

/// Request-level defaulting: a candidate without a source inherits `inferred`
/// when flagged, else the request source; a missing timestamp takes the
/// pipeline's single captured clock.
fn normalize_candidates(raw: Vec<RawCandidate>, req: &ObserveRequest, now: i64) -> Vec<Candidate> {
	let default_source = req.source.as_deref().unwrap_or("observe");

	raw.into_iter()
		.map(|candidate| {
			let inferred = candidate.inferred.unwrap_or(false);
			let source = candidate
				.source
				.unwrap_or_else(|| {
					if inferred { "inferred".to_string() } else { default_source.to_string() }
				});

			Candidate {
				field: candidate.field,
				value: candidate.value,
				source,
				timestamp_ms: candidate.timestamp_ms.unwrap_or(now),
				confidence: candidate
					.confidence
					.or(req.confidence)
					.unwrap_or(0.0)
					.clamp(0.0, 1.0),
				inferred,
			}
		})
		.collect()
}
