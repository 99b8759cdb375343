use std::{
	sync::{Arc, atomic::AtomicUsize},
	time::Duration,
};

use serde_json::json;
use tokio::time;

use dossier_service::{ObserveMode, ObserveRequest, PatchRequest, ProfileEvent};

use super::{SpyExtractor, build_service, collect_events};

fn async_observe(subject: &str) -> ObserveRequest {
	ObserveRequest {
		subject: subject.to_string(),
		input: "I moved to the platform team".to_string(),
		output: None,
		source: None,
		confidence: None,
		idempotency_key: None,
		mode: ObserveMode::Async,
		extract_from: Default::default(),
		on_error: Default::default(),
	}
}

async fn wait_for_completion(
	events: &std::sync::Mutex<Vec<ProfileEvent>>,
) -> (String, Option<Box<dossier_service::ObserveResponse>>, Option<String>) {
	for _ in 0..100 {
		{
			let events = events.lock().unwrap();

			if let Some(ProfileEvent::ObserveComplete { request_id, result, error, .. }) =
				events.iter().find(|event| matches!(event, ProfileEvent::ObserveComplete { .. }))
			{
				return (request_id.clone(), result.clone(), error.clone());
			}
		}

		time::sleep(Duration::from_millis(20)).await;
	}

	panic!("Timed out waiting for observe_complete.");
}

#[tokio::test]
async fn async_observe_returns_the_pre_dispatch_snapshot() {
	let extractor = SpyExtractor {
		calls: Arc::new(AtomicUsize::new(0)),
		payload: json!({
			"candidates": [
				{ "field": "name", "value": "Bob", "confidence": 0.9 },
			]
		}),
	};
	let service = build_service(Arc::new(extractor));

	service
		.patch(PatchRequest {
			subject: "s1".to_string(),
			facts: json!({ "name": "Ada" }).as_object().unwrap().clone(),
			source: None,
			confidence: None,
			timestamp_ms: Some(1_700_000_000_000),
			idempotency_key: None,
		})
		.await
		.expect("Seed patch must succeed.");

	let events = collect_events(&service);
	let response = service.observe(async_observe("s1")).await.expect("Observe must succeed.");

	// The synchronous response is the snapshot, not the background result.
	assert_eq!(response.profile["name"], json!("Ada"));
	assert_eq!(response.queued, Some(true));
	assert!(response.updated.is_empty());
	assert!(response.rejected.is_empty());
	assert!(response.extracted.is_empty());

	let (request_id, result, error) = wait_for_completion(&events).await;

	assert_eq!(request_id, response.request_id);
	assert!(error.is_none());

	let result = result.expect("Completion must carry the result.");

	assert_eq!(result.profile["name"], json!("Bob"));
	assert_eq!(result.request_id, response.request_id);

	let profile =
		service.get("s1").await.expect("Get must succeed.").expect("Profile must exist.");

	assert_eq!(profile["name"], json!("Bob"));
}

#[tokio::test]
async fn async_observe_emits_exactly_one_completion() {
	let extractor = SpyExtractor {
		calls: Arc::new(AtomicUsize::new(0)),
		payload: json!({ "candidates": [] }),
	};
	let service = build_service(Arc::new(extractor));
	let events = collect_events(&service);
	let response = service.observe(async_observe("s1")).await.expect("Observe must succeed.");

	wait_for_completion(&events).await;
	time::sleep(Duration::from_millis(100)).await;

	let events = events.lock().unwrap();
	let completions: Vec<_> = events
		.iter()
		.filter_map(|event| match event {
			ProfileEvent::ObserveComplete { request_id, .. } => Some(request_id.clone()),
			_ => None,
		})
		.collect();

	assert_eq!(completions, vec![response.request_id.clone()]);
}

#[tokio::test]
async fn background_failure_reports_through_the_completion_event() {
	let extractor = super::FailingExtractor {
		error: dossier_providers::ExtractorError::api(Some(500), "upstream down".to_string()),
	};
	let service = build_service(Arc::new(extractor));
	let events = collect_events(&service);
	let mut request = async_observe("s1");

	request.on_error = dossier_service::OnExtractorError::Throw;

	let response = service.observe(request).await.expect("Observe must queue.");
	let (request_id, result, error) = wait_for_completion(&events).await;

	assert_eq!(request_id, response.request_id);
	assert!(result.is_none());
	assert!(error.expect("Completion must carry the error.").contains("upstream down"));
}
