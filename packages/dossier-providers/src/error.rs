use serde::{Deserialize, Serialize};

pub type Result<T, E = ExtractorError> = std::result::Result<T, E>;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorErrorKind {
	ApiError,
	ParseError,
	Timeout,
	NetworkError,
}

/// Structured extractor failure. `retryable` drives the client's internal
/// retry loop and is surfaced to callers deciding whether to resubmit.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct ExtractorError {
	pub kind: ExtractorErrorKind,
	pub status: Option<u16>,
	pub message: String,
	pub retryable: bool,
}
impl ExtractorError {
	pub fn api(status: Option<u16>, message: String) -> Self {
		let retryable = status.map(|code| code == 429 || code >= 500).unwrap_or(false);

		Self { kind: ExtractorErrorKind::ApiError, status, message, retryable }
	}

	pub fn parse(message: String) -> Self {
		Self { kind: ExtractorErrorKind::ParseError, status: None, message, retryable: false }
	}

	pub fn timeout(message: String) -> Self {
		Self { kind: ExtractorErrorKind::Timeout, status: None, message, retryable: true }
	}

	pub fn network(message: String) -> Self {
		Self { kind: ExtractorErrorKind::NetworkError, status: None, message, retryable: true }
	}
}
