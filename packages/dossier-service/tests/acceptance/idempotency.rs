use std::sync::{Arc, atomic::AtomicUsize};

use serde_json::json;

use dossier_service::{ObserveMode, ObserveRequest, PatchRequest, ProfileEvent};

use super::{SpyExtractor, build_service, collect_events, empty_extractor, stored_etag};

fn keyed_patch(subject: &str, key: &str) -> PatchRequest {
	PatchRequest {
		subject: subject.to_string(),
		facts: json!({ "name": "Ada" }).as_object().unwrap().clone(),
		source: None,
		confidence: None,
		timestamp_ms: Some(1_700_000_000_000),
		idempotency_key: Some(key.to_string()),
	}
}

#[tokio::test]
async fn patch_replay_returns_identical_result_and_leaves_etag_unchanged() {
	let service = build_service(empty_extractor());
	let first = service.patch(keyed_patch("s1", "k1")).await.expect("First patch must succeed.");
	let etag = stored_etag(&service, "s1").await.expect("Record must exist.");
	let second =
		service.patch(keyed_patch("s1", "k1")).await.expect("Second patch must succeed.");

	assert_eq!(
		serde_json::to_value(&first).unwrap(),
		serde_json::to_value(&second).unwrap()
	);
	assert_eq!(stored_etag(&service, "s1").await.expect("Record must exist."), etag);
}

#[tokio::test]
async fn replay_does_not_re_emit_events() {
	let service = build_service(empty_extractor());
	let events = collect_events(&service);

	service.patch(keyed_patch("s1", "k1")).await.expect("First patch must succeed.");

	let emitted_after_first = events.lock().unwrap().len();

	service.patch(keyed_patch("s1", "k1")).await.expect("Second patch must succeed.");

	assert_eq!(events.lock().unwrap().len(), emitted_after_first);
}

#[tokio::test]
async fn distinct_keys_and_subjects_miss_the_cache() {
	let service = build_service(empty_extractor());

	service.patch(keyed_patch("s1", "k1")).await.expect("First patch must succeed.");

	let events = collect_events(&service);

	// Same subject, different key: the pipeline runs again (and rejects the
	// equal-timestamp candidate as a tie).
	let replayed = service.patch(keyed_patch("s1", "k2")).await.expect("Patch must succeed.");

	assert_eq!(replayed.rejected.len(), 1);
	assert!(!events.lock().unwrap().is_empty());

	// Different subject, same key: a fresh write.
	let other = service.patch(keyed_patch("s2", "k1")).await.expect("Patch must succeed.");

	assert_eq!(other.profile["name"], json!("Ada"));
	assert!(other.rejected.is_empty());
}

#[tokio::test]
async fn observe_replay_skips_the_extractor() {
	let calls = Arc::new(AtomicUsize::new(0));
	let extractor = SpyExtractor {
		calls: calls.clone(),
		payload: json!({
			"candidates": [
				{ "field": "name", "value": "Ada", "confidence": 0.9 },
			]
		}),
	};
	let service = build_service(Arc::new(extractor));
	let request = ObserveRequest {
		subject: "s1".to_string(),
		input: "call me Ada".to_string(),
		output: None,
		source: None,
		confidence: None,
		idempotency_key: Some("k1".to_string()),
		mode: ObserveMode::Sync,
		extract_from: Default::default(),
		on_error: Default::default(),
	};
	let first = service.observe(request.clone()).await.expect("First observe must succeed.");
	let second = service.observe(request).await.expect("Second observe must succeed.");

	assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
	assert_eq!(
		serde_json::to_value(&first).unwrap(),
		serde_json::to_value(&second).unwrap()
	);
}

#[tokio::test]
async fn patch_and_observe_caches_are_disjoint() {
	let service = build_service(empty_extractor());

	service.patch(keyed_patch("s1", "shared")).await.expect("Patch must succeed.");

	// An observe with the same caller key must not replay the patch result.
	let response = service
		.observe(ObserveRequest {
			subject: "s1".to_string(),
			input: "hello".to_string(),
			output: None,
			source: None,
			confidence: None,
			idempotency_key: Some("shared".to_string()),
			mode: ObserveMode::Sync,
			extract_from: Default::default(),
			on_error: Default::default(),
		})
		.await
		.expect("Observe must succeed.");

	assert!(response.updated.is_empty());
	assert!(response.latency_ms.is_some());
}

#[tokio::test]
async fn collect_events_sees_replayed_conflicts_only_once() {
	let service = build_service(empty_extractor());
	let events = collect_events(&service);
	let mut request = keyed_patch("s1", "k1");

	request.facts = json!({ "nickname": "Ace" }).as_object().unwrap().clone();

	service.patch(request.clone()).await.expect("First patch must succeed.");
	service.patch(request).await.expect("Second patch must succeed.");

	let conflicts = events
		.lock()
		.unwrap()
		.iter()
		.filter(|event| matches!(event, ProfileEvent::Conflict { .. }))
		.count();

	assert_eq!(conflicts, 1);
}
