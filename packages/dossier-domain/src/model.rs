use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A subject's fact sheet. Null values are kept: a nullable field explicitly
/// set to null stays present, mirrored by its provenance entry.
pub type Profile = serde_json::Map<String, Value>;

/// Per-field metadata. The profile and provenance maps share the same key set
/// at every observable point.
pub type ProvenanceMap = BTreeMap<String, FieldProvenance>;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FieldProvenance {
	pub value: Value,
	pub source: String,
	pub timestamp_ms: i64,
	pub confidence: f64,
	pub inferred: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
	Set,
	Delete,
	Rejected,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct HistoryEntry {
	pub field: String,
	pub value: Value,
	pub previous_value: Option<Value>,
	pub source: String,
	pub timestamp_ms: i64,
	pub confidence: f64,
	pub inferred: bool,
	pub action: HistoryAction,
	pub reason: Option<RejectReason>,
}

/// Stable public reason codes for candidates that did not apply.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
	SchemaInvalid,
	UnknownField,
	LowConfidence,
	LowerPriority,
	OutsideRecency,
	OlderTimestamp,
	NotNullable,
	ExtrasInvalid,
}
impl RejectReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::SchemaInvalid => "schema_invalid",
			Self::UnknownField => "unknown_field",
			Self::LowConfidence => "low_confidence",
			Self::LowerPriority => "lower_priority",
			Self::OutsideRecency => "outside_recency",
			Self::OlderTimestamp => "older_timestamp",
			Self::NotNullable => "not_nullable",
			Self::ExtrasInvalid => "extras_invalid",
		}
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Rejection {
	pub field: String,
	pub value: Option<Value>,
	pub reason: RejectReason,
	pub detail: Option<String>,
}

/// A proposed field update after request-level defaulting. `value` is `None`
/// when the caller supplied no value at all, which is distinct from an
/// explicit null.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
	pub field: String,
	pub value: Option<Value>,
	pub source: String,
	pub timestamp_ms: i64,
	pub confidence: f64,
	pub inferred: bool,
}
