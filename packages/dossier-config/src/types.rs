use std::collections::HashMap;

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	#[serde(default)]
	pub providers: Providers,
	#[serde(default)]
	pub merge: Merge,
	#[serde(default)]
	pub extras: Extras,
	#[serde(default)]
	pub idempotency: Idempotency,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
	/// Path to the JSON field-schema declaration registered at startup.
	pub schema_path: Option<std::path::PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
	pub backend: String,
	#[serde(default = "default_max_history")]
	pub max_history: u32,
	pub postgres: Option<Postgres>,
	pub redis: Option<Redis>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Redis {
	pub url: String,
	#[serde(default = "default_key_prefix")]
	pub key_prefix: String,
	/// Zero disables expiry. Refreshed only on successful writes.
	#[serde(default)]
	pub ttl_seconds: u64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Providers {
	pub extractor: Option<LlmProviderConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	#[serde(default = "default_temperature")]
	pub temperature: f32,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	#[serde(default = "default_max_input_chars")]
	pub max_input_chars: u32,
	#[serde(default)]
	pub default_headers: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Merge {
	#[serde(default = "default_source_priority")]
	pub source_priority: HashMap<String, i32>,
	#[serde(default)]
	pub min_confidence: f64,
	#[serde(default = "default_recency_window_ms")]
	pub recency_window_ms: i64,
	#[serde(default = "default_max_field_length")]
	pub max_field_length: u32,
}
impl Default for Merge {
	fn default() -> Self {
		Self {
			source_priority: default_source_priority(),
			min_confidence: 0.0,
			recency_window_ms: default_recency_window_ms(),
			max_field_length: default_max_field_length(),
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct Extras {
	#[serde(default = "default_key_pattern")]
	pub key_pattern: String,
	#[serde(default = "default_max_keys")]
	pub max_keys: u32,
	#[serde(default = "default_max_key_length")]
	pub max_key_length: u32,
	#[serde(default = "default_max_string_length")]
	pub max_string_length: u32,
	#[serde(default = "default_max_array_length")]
	pub max_array_length: u32,
	#[serde(default = "default_max_nesting_depth")]
	pub max_nesting_depth: u32,
	#[serde(default)]
	pub allow_arrays: bool,
	#[serde(default)]
	pub allow_nested_objects: bool,
}
impl Default for Extras {
	fn default() -> Self {
		Self {
			key_pattern: default_key_pattern(),
			max_keys: default_max_keys(),
			max_key_length: default_max_key_length(),
			max_string_length: default_max_string_length(),
			max_array_length: default_max_array_length(),
			max_nesting_depth: default_max_nesting_depth(),
			allow_arrays: false,
			allow_nested_objects: false,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct Idempotency {
	#[serde(default = "default_idempotency_ttl_ms")]
	pub ttl_ms: u64,
	#[serde(default = "default_idempotency_max_entries")]
	pub max_entries: u32,
}
impl Default for Idempotency {
	fn default() -> Self {
		Self {
			ttl_ms: default_idempotency_ttl_ms(),
			max_entries: default_idempotency_max_entries(),
		}
	}
}

fn default_max_history() -> u32 {
	1_000
}

fn default_key_prefix() -> String {
	"dossier".to_string()
}

fn default_temperature() -> f32 {
	0.1
}

fn default_timeout_ms() -> u64 {
	5_000
}

fn default_max_retries() -> u32 {
	2
}

fn default_max_input_chars() -> u32 {
	8_000
}

fn default_source_priority() -> HashMap<String, i32> {
	HashMap::from([
		("crm".to_string(), 3),
		("manual".to_string(), 2),
		("observe".to_string(), 1),
		("inferred".to_string(), 0),
	])
}

fn default_recency_window_ms() -> i64 {
	86_400_000
}

fn default_max_field_length() -> u32 {
	512
}

fn default_key_pattern() -> String {
	r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)*$".to_string()
}

fn default_max_keys() -> u32 {
	50
}

fn default_max_key_length() -> u32 {
	64
}

fn default_max_string_length() -> u32 {
	512
}

fn default_max_array_length() -> u32 {
	16
}

fn default_max_nesting_depth() -> u32 {
	2
}

fn default_idempotency_ttl_ms() -> u64 {
	300_000
}

fn default_idempotency_max_entries() -> u32 {
	1_000
}
