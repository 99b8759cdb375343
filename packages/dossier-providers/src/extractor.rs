use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ExtractorError, Result};
use dossier_config::LlmProviderConfig;

/// A proposed field update as the extractor reports it, before defaulting.
/// `value` distinguishes an explicit null from an absent key.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RawCandidate {
	pub field: String,
	#[serde(default, deserialize_with = "some_value")]
	pub value: Option<Value>,
	pub confidence: Option<f64>,
	pub inferred: Option<bool>,
	pub source: Option<String>,
	pub timestamp_ms: Option<i64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExtractorOutput {
	#[serde(default)]
	pub candidates: Vec<RawCandidate>,
}

fn some_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	Value::deserialize(deserializer).map(Some)
}

/// Calls the chat-completions endpoint and returns the parsed JSON payload.
/// Retryable failures (timeouts, connection errors, 429, 5xx) are retried up
/// to `cfg.max_retries` extra attempts; everything else surfaces immediately.
pub async fn extract(cfg: &LlmProviderConfig, messages: &[Value]) -> Result<Value> {
	let client = Client::builder()
		.timeout(Duration::from_millis(cfg.timeout_ms))
		.build()
		.map_err(|err| ExtractorError::network(redact(&err.to_string(), &cfg.api_key)))?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let headers = auth(cfg)?;
	let mut last_error = None;

	for _ in 0..=cfg.max_retries {
		let body = serde_json::json!({
			"model": cfg.model,
			"temperature": cfg.temperature,
			"messages": messages,
		});

		match attempt(&client, &url, headers.clone(), body, cfg).await {
			Ok(payload) => return Ok(payload),
			Err(err) if err.retryable => {
				last_error = Some(err);
			},
			Err(err) => return Err(err),
		}
	}

	Err(last_error
		.unwrap_or_else(|| ExtractorError::network("Extractor produced no response.".to_string())))
}

/// Parses the payload into candidates. A malformed payload is a parse error,
/// not an empty extraction.
pub fn parse_candidates(payload: &Value) -> Result<ExtractorOutput> {
	serde_json::from_value(payload.clone()).map_err(|err| {
		ExtractorError::parse(format!("Extractor output is missing a candidates array: {err}."))
	})
}

/// Builds the chat messages for one extraction call. Inputs must already be
/// sanitized and truncated by the caller.
pub fn build_extractor_messages(
	input: &str,
	output: Option<&str>,
	schema_descriptor: &Value,
	known_profile: Option<&Value>,
) -> Vec<Value> {
	let system_prompt = "You are a fact extraction engine for a per-subject profile store. \
Output must be valid JSON only and must match the provided schema exactly. \
Extract candidate field values stated in or strongly implied by the conversation text. \
Each candidate must name a declared field, carry a confidence between 0.0 and 1.0, and set \
inferred to true when the value was deduced rather than stated explicitly. \
Do not invent values the text does not support. \
If the text supports no candidate, return an empty candidates array.";
	let mut user_prompt = format!(
		"Return JSON matching this exact schema:\n{{\"candidates\": [{{\"field\": \"string\", \"value\": \"any\", \"confidence\": 0.0, \"inferred\": false}}]}}\nDeclared fields:\n{schema_descriptor}\n"
	);

	if let Some(profile) = known_profile {
		user_prompt.push_str(&format!("Known facts (do not re-extract unchanged values):\n{profile}\n"));
	}

	user_prompt.push_str(&format!("Conversation input:\n{input}\n"));

	if let Some(output) = output {
		user_prompt.push_str(&format!("Assistant output:\n{output}\n"));
	}

	vec![
		serde_json::json!({ "role": "system", "content": system_prompt }),
		serde_json::json!({ "role": "user", "content": user_prompt }),
	]
}

async fn attempt(
	client: &Client,
	url: &str,
	headers: reqwest::header::HeaderMap,
	body: Value,
	cfg: &LlmProviderConfig,
) -> Result<Value> {
	let response = client.post(url).headers(headers).json(&body).send().await.map_err(|err| {
		let message = redact(&err.to_string(), &cfg.api_key);

		if err.is_timeout() {
			ExtractorError::timeout(message)
		} else if err.is_connect() {
			ExtractorError::network(message)
		} else {
			ExtractorError::api(err.status().map(|status| status.as_u16()), message)
		}
	})?;
	let status = response.status();

	if !status.is_success() {
		let body = response.text().await.unwrap_or_default();

		return Err(ExtractorError::api(
			Some(status.as_u16()),
			redact(&format!("Extractor returned {status}: {body}"), &cfg.api_key),
		));
	}

	let json: Value = response.json().await.map_err(|err| {
		ExtractorError::parse(redact(
			&format!("Extractor response is not valid JSON: {err}."),
			&cfg.api_key,
		))
	})?;

	parse_extractor_json(json, &cfg.api_key)
}

fn parse_extractor_json(json: Value, api_key: &str) -> Result<Value> {
	if let Some(content) = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
	{
		let parsed: Value = serde_json::from_str(content).map_err(|_| {
			ExtractorError::parse(redact(
				&format!("Extractor content is not valid JSON: {content}"),
				api_key,
			))
		})?;

		return Ok(parsed);
	}

	if json.is_object() {
		return Ok(json);
	}

	Err(ExtractorError::parse("Extractor response is missing JSON content.".to_string()))
}

/// The API key must never leak through an echoed response body.
fn redact(message: &str, api_key: &str) -> String {
	if api_key.is_empty() {
		return message.to_string();
	}

	message.replace(api_key, "[REDACTED]")
}

fn auth(cfg: &LlmProviderConfig) -> Result<reqwest::header::HeaderMap> {
	crate::auth_headers(&cfg.api_key, &cfg.default_headers)
}
