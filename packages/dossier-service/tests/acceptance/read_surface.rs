use serde_json::json;

use dossier_service::{FactsOptions, PatchRequest};
use dossier_storage::HistoryQuery;

use super::{build_service, empty_extractor};

fn patch(subject: &str, facts: serde_json::Value) -> PatchRequest {
	PatchRequest {
		subject: subject.to_string(),
		facts: facts.as_object().unwrap().clone(),
		source: None,
		confidence: None,
		timestamp_ms: None,
		idempotency_key: None,
	}
}

#[tokio::test]
async fn get_returns_the_profile_or_absent() {
	let service = build_service(empty_extractor());

	assert!(service.get("s1").await.expect("Get must succeed.").is_none());

	service
		.patch(patch("s1", json!({ "name": "Ada" })))
		.await
		.expect("Patch must succeed.");

	let profile =
		service.get("s1").await.expect("Get must succeed.").expect("Profile must exist.");

	assert_eq!(profile["name"], json!("Ada"));
}

#[tokio::test]
async fn facts_for_prompt_renders_compact_sorted_json() {
	let service = build_service(empty_extractor());

	assert!(
		service
			.facts_for_prompt("s1", FactsOptions::default())
			.await
			.expect("Prompt read must succeed.")
			.is_none()
	);

	service
		.patch(patch("s1", json!({ "role": "engineer", "name": "Ada", "age": 41 })))
		.await
		.expect("Patch must succeed.");

	let rendered = service
		.facts_for_prompt("s1", FactsOptions::default())
		.await
		.expect("Prompt read must succeed.")
		.expect("Facts must exist.");

	assert_eq!(rendered, r#"{"age":41,"name":"Ada","role":"engineer"}"#);
}

#[tokio::test]
async fn facts_for_prompt_honors_select_and_null_policy() {
	let service = build_service(empty_extractor());

	let mut seed = patch("s1", json!({ "role": "engineer", "name": "Ada", "age": 41 }));

	seed.timestamp_ms = Some(1_700_000_000_000);

	service.patch(seed).await.expect("Patch must succeed.");

	let mut erase = patch("s1", json!({ "age": null }));

	erase.timestamp_ms = Some(1_700_000_001_000);

	service.patch(erase).await.expect("Patch must succeed.");

	let rendered = service
		.facts_for_prompt("s1", FactsOptions {
			select: Some(vec!["age".to_string(), "name".to_string()]),
			include_nulls: false,
		})
		.await
		.expect("Prompt read must succeed.")
		.expect("Facts must exist.");

	assert_eq!(rendered, r#"{"name":"Ada"}"#);

	let rendered = service
		.facts_for_prompt("s1", FactsOptions {
			select: Some(vec!["age".to_string()]),
			include_nulls: true,
		})
		.await
		.expect("Prompt read must succeed.")
		.expect("Facts must exist.");

	assert_eq!(rendered, r#"{"age":null}"#);
}

#[tokio::test]
async fn filters_drop_null_fields() {
	let service = build_service(empty_extractor());

	let mut seed = patch("s1", json!({ "name": "Ada", "age": 41 }));

	seed.timestamp_ms = Some(1_700_000_000_000);

	service.patch(seed).await.expect("Patch must succeed.");

	let mut erase = patch("s1", json!({ "age": null }));

	erase.timestamp_ms = Some(1_700_000_001_000);

	service.patch(erase).await.expect("Patch must succeed.");

	let filters = service.filters("s1", None).await.expect("Filters must succeed.");

	assert_eq!(filters.len(), 1);
	assert_eq!(filters["name"], json!("Ada"));
}

#[tokio::test]
async fn history_pages_through_the_journal() {
	let service = build_service(empty_extractor());

	for (idx, name) in ["Ada", "Grace", "Edsger"].iter().enumerate() {
		let mut request = patch("s1", json!({ "name": name }));

		request.timestamp_ms = Some(1_700_000_000_000 + idx as i64 * 1_000);

		service.patch(request).await.expect("Patch must succeed.");
	}

	let page = service
		.history("s1", HistoryQuery { limit: Some(2), ..Default::default() })
		.await
		.expect("History must succeed.");

	assert_eq!(page.entries.len(), 2);

	let cursor = page.next_cursor.expect("Full page must yield a cursor.");
	let page = service
		.history("s1", HistoryQuery { cursor: Some(cursor), ..Default::default() })
		.await
		.expect("History must succeed.");

	assert_eq!(page.entries.len(), 1);
	assert_eq!(page.entries[0].value, json!("Edsger"));
}

#[tokio::test]
async fn delete_removes_profile_and_history() {
	let service = build_service(empty_extractor());

	service
		.patch(patch("s1", json!({ "name": "Ada" })))
		.await
		.expect("Patch must succeed.");

	assert!(service.delete("s1").await.expect("Delete must succeed."));
	assert!(service.get("s1").await.expect("Get must succeed.").is_none());

	let page = service
		.history("s1", HistoryQuery::default())
		.await
		.expect("History must succeed.");

	assert!(page.entries.is_empty());
	assert!(!service.delete("s1").await.expect("Second delete must succeed."));
}
