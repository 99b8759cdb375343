use std::sync::Arc;

use serde_json::json;

use dossier_domain::model::RejectReason;
use dossier_service::{ObserveMode, ObserveRequest, PatchRequest, ProfileEvent};

use super::{HOUR_MS, StubExtractor, build_service, collect_events, empty_extractor, stored_etag};

fn patch(subject: &str, facts: serde_json::Value) -> PatchRequest {
	PatchRequest {
		subject: subject.to_string(),
		facts: facts.as_object().expect("Facts must be an object.").clone(),
		source: None,
		confidence: None,
		timestamp_ms: None,
		idempotency_key: None,
	}
}

fn observe(subject: &str) -> ObserveRequest {
	ObserveRequest {
		subject: subject.to_string(),
		input: "conversation text".to_string(),
		output: None,
		source: None,
		confidence: None,
		idempotency_key: None,
		mode: ObserveMode::Sync,
		extract_from: Default::default(),
		on_error: Default::default(),
	}
}

#[tokio::test]
async fn crm_patch_lands_with_provenance() {
	let service = build_service(empty_extractor());
	let mut request = patch("s1", json!({ "role": "engineer" }));

	request.source = Some("crm".to_string());
	request.confidence = Some(0.5);

	let response = service.patch(request).await.expect("Patch must succeed.");

	assert_eq!(response.profile["role"], json!("engineer"));
	assert!(response.rejected.is_empty());
	assert_eq!(response.updated["role"], json!("engineer"));

	let record = service
		.store()
		.get("s1")
		.await
		.expect("Store read must succeed.")
		.expect("Record must exist.");

	assert_eq!(record.provenance["role"].source, "crm");
	assert_eq!(record.provenance["role"].confidence, 0.5);
}

#[tokio::test]
async fn enum_values_fold_to_declared_spelling() {
	let service = build_service(empty_extractor());
	let response = service
		.patch(patch("s1", json!({ "role": "ENGINEER" })))
		.await
		.expect("Patch must succeed.");

	assert_eq!(response.profile["role"], json!("engineer"));
	assert!(response.rejected.is_empty());
}

#[tokio::test]
async fn stale_observation_rejects_outside_recency() {
	let now = 1_700_000_000_000_i64;
	let extractor = StubExtractor {
		payload: json!({
			"candidates": [
				{ "field": "role", "value": "engineer", "confidence": 0.9, "source": "observe", "timestamp_ms": now - 25 * HOUR_MS },
			]
		}),
	};
	let service = build_service(Arc::new(extractor));
	let mut seed = patch("s1", json!({ "role": "founder" }));

	seed.timestamp_ms = Some(now);

	service.patch(seed).await.expect("Seed patch must succeed.");

	let response = service.observe(observe("s1")).await.expect("Observe must succeed.");

	assert!(response.updated.is_empty());
	assert_eq!(response.rejected.len(), 1);
	assert_eq!(response.rejected[0].reason, RejectReason::OutsideRecency);
	assert_eq!(response.profile["role"], json!("founder"));
}

#[tokio::test]
async fn trusted_backfill_still_loses_to_newer_same_priority_value() {
	let now = 1_700_000_000_000_i64;
	let service = build_service(empty_extractor());
	let mut seed = patch("s1", json!({ "role": "founder" }));

	seed.timestamp_ms = Some(now);

	service.patch(seed).await.expect("Seed patch must succeed.");

	let mut backfill = patch("s1", json!({ "role": "engineer" }));

	backfill.timestamp_ms = Some(now - HOUR_MS);

	let response = service.patch(backfill).await.expect("Patch must succeed.");

	assert_eq!(response.rejected.len(), 1);
	assert_eq!(response.rejected[0].reason, RejectReason::OlderTimestamp);
	assert_eq!(response.profile["role"], json!("founder"));
}

#[tokio::test]
async fn best_candidate_in_a_batch_wins() {
	let now = 1_700_000_000_000_i64;
	let extractor = StubExtractor {
		payload: json!({
			"candidates": [
				{ "field": "role", "value": "founder", "confidence": 0.9, "timestamp_ms": now - 1_000 },
				{ "field": "role", "value": "engineer", "confidence": 0.9, "timestamp_ms": now },
			]
		}),
	};
	let service = build_service(Arc::new(extractor));
	let response = service.observe(observe("s1")).await.expect("Observe must succeed.");

	assert_eq!(response.profile["role"], json!("engineer"));
	assert_eq!(response.rejected.len(), 1);
	assert_eq!(response.rejected[0].reason, RejectReason::OlderTimestamp);
	assert_eq!(response.rejected[0].value, Some(json!("founder")));
}

#[tokio::test]
async fn unknown_fields_reject_without_blocking_the_batch() {
	let service = build_service(empty_extractor());
	let response = service
		.patch(patch("s1", json!({ "nickname": "Ace", "name": "Ada" })))
		.await
		.expect("Patch must succeed.");

	assert_eq!(response.profile["name"], json!("Ada"));
	assert!(!response.profile.contains_key("nickname"));
	assert_eq!(response.rejected.len(), 1);
	assert_eq!(response.rejected[0].reason, RejectReason::UnknownField);
}

#[tokio::test]
async fn type_mismatch_rejects_schema_invalid() {
	let service = build_service(empty_extractor());
	let response = service
		.patch(patch("s1", json!({ "name": 42 })))
		.await
		.expect("Patch must succeed.");

	assert_eq!(response.rejected.len(), 1);
	assert_eq!(response.rejected[0].reason, RejectReason::SchemaInvalid);
	assert!(response.rejected[0].detail.as_deref().unwrap_or_default().contains("string"));
}

#[tokio::test]
async fn null_into_nullable_field_deletes_and_null_into_plain_field_rejects() {
	let service = build_service(empty_extractor());
	let mut seed = patch("s1", json!({ "age": 41, "name": "Ada" }));

	seed.timestamp_ms = Some(1_700_000_000_000);

	service.patch(seed).await.expect("Seed patch must succeed.");

	let mut erase = patch("s1", json!({ "age": null, "name": null }));

	erase.timestamp_ms = Some(1_700_000_001_000);

	let response = service.patch(erase).await.expect("Patch must succeed.");

	assert_eq!(response.profile["age"], json!(null));
	assert_eq!(response.profile["name"], json!("Ada"));
	assert_eq!(response.rejected.len(), 1);
	assert_eq!(response.rejected[0].field, "name");
	assert_eq!(response.rejected[0].reason, RejectReason::NotNullable);
}

#[tokio::test]
async fn invalid_extras_map_rejects_whole_field() {
	let service = build_service(empty_extractor());
	let response = service
		.patch(patch("s1", json!({ "extras": { "invalid-key@x": "y" } })))
		.await
		.expect("Patch must succeed.");

	assert_eq!(response.rejected.len(), 1);
	assert_eq!(response.rejected[0].reason, RejectReason::ExtrasInvalid);
	assert!(!response.profile.contains_key("extras"));
}

#[tokio::test]
async fn extras_strings_truncate_to_field_cap() {
	let service = build_service(empty_extractor());
	let long = "p".repeat(600);
	let response = service
		.patch(patch("s1", json!({ "extras": { "support.ticket.priority": long } })))
		.await
		.expect("Patch must succeed.");

	assert!(response.rejected.is_empty());

	let stored = response.profile["extras"]["support.ticket.priority"]
		.as_str()
		.expect("Extras entry must be a string.");

	assert_eq!(stored.chars().count(), 512);
}

#[tokio::test]
async fn empty_batch_leaves_etag_unchanged() {
	let service = build_service(empty_extractor());

	service.patch(patch("s1", json!({ "name": "Ada" }))).await.expect("Seed must succeed.");

	let etag = stored_etag(&service, "s1").await.expect("Record must exist.");
	let response = service.observe(observe("s1")).await.expect("Observe must succeed.");

	assert!(response.updated.is_empty());
	assert!(response.rejected.is_empty());
	assert_eq!(stored_etag(&service, "s1").await.expect("Record must exist."), etag);
}

#[tokio::test]
async fn rejected_only_batch_journals_without_moving_the_etag() {
	let now = 1_700_000_000_000_i64;
	let service = build_service(empty_extractor());
	let mut seed = patch("s1", json!({ "role": "founder" }));

	seed.timestamp_ms = Some(now);

	service.patch(seed).await.expect("Seed must succeed.");

	let etag = stored_etag(&service, "s1").await.expect("Record must exist.");
	let mut stale = patch("s1", json!({ "role": "engineer" }));

	stale.timestamp_ms = Some(now - HOUR_MS);

	service.patch(stale).await.expect("Patch must succeed.");

	assert_eq!(stored_etag(&service, "s1").await.expect("Record must exist."), etag);

	let page = service
		.history("s1", Default::default())
		.await
		.expect("History must succeed.");
	let rejected: Vec<_> = page
		.entries
		.iter()
		.filter(|entry| entry.reason == Some(RejectReason::OlderTimestamp))
		.collect();

	assert_eq!(rejected.len(), 1);
}

#[tokio::test]
async fn update_and_conflict_events_fire_after_persist() {
	let service = build_service(empty_extractor());
	let events = collect_events(&service);

	service
		.patch(patch("s1", json!({ "name": "Ada", "nickname": "Ace" })))
		.await
		.expect("Patch must succeed.");

	let events = events.lock().unwrap();
	let mut saw_update = false;
	let mut saw_conflict = false;

	for event in events.iter() {
		match event {
			ProfileEvent::Update { subject, updated, profile } => {
				assert_eq!(subject, "s1");
				assert_eq!(updated["name"], json!("Ada"));
				assert_eq!(profile["name"], json!("Ada"));

				saw_update = true;
			},
			ProfileEvent::Conflict { subject, rejected } => {
				assert_eq!(subject, "s1");
				assert_eq!(rejected.len(), 1);
				assert_eq!(rejected[0].reason, RejectReason::UnknownField);

				saw_conflict = true;
			},
			ProfileEvent::ObserveComplete { .. } => {},
		}
	}

	assert!(saw_update);
	assert!(saw_conflict);
}

#[tokio::test]
async fn low_confidence_candidates_reject_below_threshold_only() {
	let mut cfg = super::test_config();

	cfg.merge.min_confidence = 0.5;

	let service = dossier_service::DossierService::with_extractor(
		cfg,
		Arc::new(dossier_storage::memory::MemoryStore::new(100)),
		Arc::new(StubExtractor {
			payload: json!({
				"candidates": [
					{ "field": "name", "value": "Ada", "confidence": 0.5 },
					{ "field": "role", "value": "engineer", "confidence": 0.49 },
				]
			}),
		}),
	);

	service
		.register_schema_json(super::schema_declaration())
		.expect("Schema must register.");

	let service = Arc::new(service);
	let response = service.observe(observe("s1")).await.expect("Observe must succeed.");

	assert_eq!(response.profile["name"], json!("Ada"));
	assert_eq!(response.rejected.len(), 1);
	assert_eq!(response.rejected[0].reason, RejectReason::LowConfidence);
}

#[tokio::test]
async fn profile_and_provenance_stay_aligned_through_mixed_batches() {
	let service = build_service(empty_extractor());
	let mut seed = patch("s1", json!({ "name": "Ada", "role": "engineer", "age": 41 }));

	seed.timestamp_ms = Some(1_700_000_000_000);

	service.patch(seed).await.expect("Patch must succeed.");

	let mut erase = patch("s1", json!({ "age": null }));

	erase.timestamp_ms = Some(1_700_000_001_000);

	service.patch(erase).await.expect("Patch must succeed.");

	let record = service
		.store()
		.get("s1")
		.await
		.expect("Store read must succeed.")
		.expect("Record must exist.");

	assert_eq!(record.profile.len(), record.provenance.len());

	for field in record.profile.keys() {
		assert!(record.provenance.contains_key(field), "missing provenance for {field}");
	}
}
