pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("No profile schema has been registered.")]
	SchemaNotRegistered,
	#[error("No extractor provider is configured.")]
	ExtractorNotConfigured,
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Validation failed: {message}")]
	Validation { message: String },
	#[error(transparent)]
	Extractor(#[from] dossier_providers::ExtractorError),
	#[error("Persistence failed after {attempts} attempts.")]
	Persistence { attempts: u32, source: dossier_storage::Error },
	#[error(transparent)]
	Storage(#[from] dossier_storage::Error),
}
impl From<dossier_domain::schema::SchemaError> for Error {
	fn from(err: dossier_domain::schema::SchemaError) -> Self {
		Self::Validation { message: err.to_string() }
	}
}
