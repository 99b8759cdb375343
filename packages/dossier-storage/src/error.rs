#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error(transparent)]
	Redis(#[from] redis::RedisError),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Concurrent write detected: {0}")]
	Conflict(String),
}
impl Error {
	pub fn is_conflict(&self) -> bool {
		matches!(self, Self::Conflict(_))
	}
}
