mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, Extras, Idempotency, LlmProviderConfig, Merge, Postgres, Providers, Redis, Service,
	Storage,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	validate_service(cfg)?;
	validate_storage(cfg)?;
	validate_providers(cfg)?;
	validate_merge(cfg)?;
	validate_extras(cfg)?;
	validate_idempotency(cfg)?;

	Ok(())
}

fn validate_service(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}

	Ok(())
}

fn validate_storage(cfg: &Config) -> Result<()> {
	let backend = cfg.storage.backend.trim();

	if !matches!(backend, "memory" | "postgres" | "redis") {
		return Err(Error::Validation {
			message: "storage.backend must be one of memory, postgres, or redis.".to_string(),
		});
	}
	if cfg.storage.max_history == 0 {
		return Err(Error::Validation {
			message: "storage.max_history must be greater than zero.".to_string(),
		});
	}
	if backend == "postgres" {
		let Some(postgres) = cfg.storage.postgres.as_ref() else {
			return Err(Error::Validation {
				message: "storage.postgres is required when storage.backend is postgres."
					.to_string(),
			});
		};

		if postgres.dsn.trim().is_empty() {
			return Err(Error::Validation {
				message: "storage.postgres.dsn must be non-empty.".to_string(),
			});
		}
		if postgres.pool_max_conns == 0 {
			return Err(Error::Validation {
				message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
			});
		}
	}
	if backend == "redis" {
		let Some(redis) = cfg.storage.redis.as_ref() else {
			return Err(Error::Validation {
				message: "storage.redis is required when storage.backend is redis.".to_string(),
			});
		};

		if redis.url.trim().is_empty() {
			return Err(Error::Validation {
				message: "storage.redis.url must be non-empty.".to_string(),
			});
		}
		if redis.key_prefix.trim().is_empty() {
			return Err(Error::Validation {
				message: "storage.redis.key_prefix must be non-empty.".to_string(),
			});
		}
	}

	Ok(())
}

fn validate_providers(cfg: &Config) -> Result<()> {
	let Some(extractor) = cfg.providers.extractor.as_ref() else { return Ok(()) };

	for (label, value) in [
		("providers.extractor.provider_id", &extractor.provider_id),
		("providers.extractor.api_base", &extractor.api_base),
		("providers.extractor.api_key", &extractor.api_key),
		("providers.extractor.path", &extractor.path),
		("providers.extractor.model", &extractor.model),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	if !extractor.temperature.is_finite() || extractor.temperature < 0.0 {
		return Err(Error::Validation {
			message: "providers.extractor.temperature must be a finite non-negative number."
				.to_string(),
		});
	}
	if extractor.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "providers.extractor.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if extractor.max_input_chars == 0 {
		return Err(Error::Validation {
			message: "providers.extractor.max_input_chars must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_merge(cfg: &Config) -> Result<()> {
	if !cfg.merge.min_confidence.is_finite() || !(0.0..=1.0).contains(&cfg.merge.min_confidence) {
		return Err(Error::Validation {
			message: "merge.min_confidence must be in the range 0.0-1.0.".to_string(),
		});
	}
	if cfg.merge.recency_window_ms < 0 {
		return Err(Error::Validation {
			message: "merge.recency_window_ms must be zero or greater.".to_string(),
		});
	}
	if cfg.merge.max_field_length == 0 {
		return Err(Error::Validation {
			message: "merge.max_field_length must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_extras(cfg: &Config) -> Result<()> {
	if regex::Regex::new(&cfg.extras.key_pattern).is_err() {
		return Err(Error::Validation {
			message: "extras.key_pattern must be a valid regular expression.".to_string(),
		});
	}
	if cfg.extras.max_keys == 0 {
		return Err(Error::Validation {
			message: "extras.max_keys must be greater than zero.".to_string(),
		});
	}
	if cfg.extras.max_key_length == 0 {
		return Err(Error::Validation {
			message: "extras.max_key_length must be greater than zero.".to_string(),
		});
	}
	if cfg.extras.max_string_length == 0 {
		return Err(Error::Validation {
			message: "extras.max_string_length must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_idempotency(cfg: &Config) -> Result<()> {
	if cfg.idempotency.ttl_ms == 0 {
		return Err(Error::Validation {
			message: "idempotency.ttl_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.idempotency.max_entries == 0 {
		return Err(Error::Validation {
			message: "idempotency.max_entries must be greater than zero.".to_string(),
		});
	}

	Ok(())
}
