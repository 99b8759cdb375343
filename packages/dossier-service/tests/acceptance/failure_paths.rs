use std::sync::Arc;

use serde_json::json;

use dossier_providers::ExtractorError;
use dossier_service::{
	DossierService, Error, ObserveMode, ObserveRequest, OnExtractorError, PatchRequest,
};
use dossier_storage::memory::MemoryStore;

use super::{ConflictingStore, FailingExtractor, build_service_with_store, empty_extractor};

fn observe(subject: &str, on_error: OnExtractorError) -> ObserveRequest {
	ObserveRequest {
		subject: subject.to_string(),
		input: "hello".to_string(),
		output: None,
		source: None,
		confidence: None,
		idempotency_key: None,
		mode: ObserveMode::Sync,
		extract_from: Default::default(),
		on_error,
	}
}

fn name_patch(subject: &str) -> PatchRequest {
	PatchRequest {
		subject: subject.to_string(),
		facts: json!({ "name": "Ada" }).as_object().unwrap().clone(),
		source: None,
		confidence: None,
		timestamp_ms: None,
		idempotency_key: None,
	}
}

#[tokio::test]
async fn unregistered_schema_is_a_typed_error() {
	let service = Arc::new(DossierService::with_extractor(
		super::test_config(),
		Arc::new(MemoryStore::new(100)),
		empty_extractor(),
	));

	assert!(matches!(
		service.patch(name_patch("s1")).await,
		Err(Error::SchemaNotRegistered)
	));
	assert!(matches!(
		service.observe(observe("s1", OnExtractorError::Skip)).await,
		Err(Error::SchemaNotRegistered)
	));
}

#[tokio::test]
async fn missing_extractor_config_is_a_typed_error() {
	let mut cfg = super::test_config();

	cfg.providers.extractor = None;

	let service = DossierService::with_extractor(
		cfg,
		Arc::new(MemoryStore::new(100)),
		empty_extractor(),
	);

	service
		.register_schema_json(super::schema_declaration())
		.expect("Schema must register.");

	let service = Arc::new(service);

	assert!(matches!(
		service.observe(observe("s1", OnExtractorError::Skip)).await,
		Err(Error::ExtractorNotConfigured)
	));

	// Patch does not need the extractor.
	assert!(service.patch(name_patch("s1")).await.is_ok());
}

#[tokio::test]
async fn invalid_schema_declaration_is_a_validation_error() {
	let service = DossierService::with_extractor(
		super::test_config(),
		Arc::new(MemoryStore::new(100)),
		empty_extractor(),
	);

	assert!(matches!(
		service.register_schema_json(json!("not an object")),
		Err(Error::Validation { .. })
	));
	assert!(matches!(
		service.register_schema_json(json!({})),
		Err(Error::Validation { .. })
	));
}

#[tokio::test]
async fn extractor_failure_with_skip_merges_zero_candidates() {
	let service = build_service_with_store(
		Arc::new(MemoryStore::new(100)),
		Arc::new(FailingExtractor {
			error: ExtractorError::timeout("deadline exceeded".to_string()),
		}),
	);
	let response = service
		.observe(observe("s1", OnExtractorError::Skip))
		.await
		.expect("Observe must absorb the failure.");

	assert!(response.updated.is_empty());
	assert!(response.rejected.is_empty());
	assert!(response.extracted.is_empty());
}

#[tokio::test]
async fn extractor_failure_with_throw_re_raises() {
	let service = build_service_with_store(
		Arc::new(MemoryStore::new(100)),
		Arc::new(FailingExtractor {
			error: ExtractorError::api(Some(503), "upstream down".to_string()),
		}),
	);
	let err = service
		.observe(observe("s1", OnExtractorError::Throw))
		.await
		.expect_err("Observe must re-raise.");

	match err {
		Error::Extractor(inner) => {
			assert_eq!(inner.status, Some(503));
			assert!(inner.retryable);
		},
		other => panic!("Expected an extractor error, got {other:?}."),
	}
}

#[tokio::test]
async fn one_concurrent_write_is_absorbed_by_a_retry() {
	let store = Arc::new(ConflictingStore::new(1));
	let service = build_service_with_store(store, empty_extractor());
	let response = service.patch(name_patch("s1")).await.expect("Patch must retry and land.");

	assert_eq!(response.profile["name"], json!("Ada"));
}

#[tokio::test]
async fn a_second_conflict_surfaces_as_a_persistence_error() {
	let store = Arc::new(ConflictingStore::new(2));
	let service = build_service_with_store(store, empty_extractor());
	let err = service.patch(name_patch("s1")).await.expect_err("Patch must give up.");

	match err {
		Error::Persistence { attempts, source } => {
			assert_eq!(attempts, 2);
			assert!(source.is_conflict());
		},
		other => panic!("Expected a persistence error, got {other:?}."),
	}
}

#[tokio::test]
async fn blank_subject_is_rejected_up_front() {
	let service = build_service_with_store(Arc::new(MemoryStore::new(100)), empty_extractor());

	assert!(matches!(
		service.patch(name_patch("  ")).await,
		Err(Error::InvalidRequest { .. })
	));
	assert!(matches!(service.get("  ").await, Err(Error::InvalidRequest { .. })));
}
