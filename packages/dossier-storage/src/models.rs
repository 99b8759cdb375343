use serde_json::Value;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::{Error, Result};
use dossier_domain::model::{HistoryAction, HistoryEntry, RejectReason};

#[derive(Debug, FromRow)]
pub struct ProfileRow {
	pub subject_key: String,
	pub profile: Value,
	pub provenance: Value,
	pub version: i64,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
pub struct HistoryRow {
	pub id: i64,
	pub subject_key: String,
	pub field: String,
	pub value: Option<Value>,
	pub previous_value: Option<Value>,
	pub source: String,
	pub ts_ms: i64,
	pub confidence: f64,
	pub inferred: bool,
	pub action: String,
	pub reason: Option<String>,
	pub created_at: OffsetDateTime,
}
impl HistoryRow {
	pub fn into_entry(self) -> Result<HistoryEntry> {
		Ok(HistoryEntry {
			field: self.field,
			value: self.value.unwrap_or(Value::Null),
			previous_value: self.previous_value,
			source: self.source,
			timestamp_ms: self.ts_ms,
			confidence: self.confidence,
			inferred: self.inferred,
			action: parse_action(&self.action)?,
			reason: self.reason.as_deref().map(parse_reason).transpose()?,
		})
	}
}

pub fn action_str(action: HistoryAction) -> &'static str {
	match action {
		HistoryAction::Set => "set",
		HistoryAction::Delete => "delete",
		HistoryAction::Rejected => "rejected",
	}
}

fn parse_action(raw: &str) -> Result<HistoryAction> {
	match raw {
		"set" => Ok(HistoryAction::Set),
		"delete" => Ok(HistoryAction::Delete),
		"rejected" => Ok(HistoryAction::Rejected),
		other => Err(Error::InvalidArgument(format!("Unknown history action {other:?}."))),
	}
}

fn parse_reason(raw: &str) -> Result<RejectReason> {
	serde_json::from_value(Value::String(raw.to_string()))
		.map_err(|_| Error::InvalidArgument(format!("Unknown rejection reason {raw:?}.")))
}
