pub mod extractor;

mod error;

pub use error::{ExtractorError, ExtractorErrorKind, Result};

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName};
use serde_json::{Map, Value};

pub fn auth_headers(api_key: &str, default_headers: &Map<String, Value>) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	headers.insert(
		AUTHORIZATION,
		format!("Bearer {api_key}")
			.parse()
			.map_err(|_| ExtractorError::api(None, "API key is not a valid header value.".to_string()))?,
	);

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(ExtractorError::api(
				None,
				"Default header values must be strings.".to_string(),
			));
		};
		let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
			ExtractorError::api(None, format!("Invalid default header name {key:?}."))
		})?;

		headers.insert(
			name,
			raw.parse().map_err(|_| {
				ExtractorError::api(None, format!("Invalid default header value for {key:?}."))
			})?,
		);
	}

	Ok(headers)
}
