use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{DossierService, Result};
use dossier_domain::model::Profile;
use dossier_storage::{HistoryPage, HistoryQuery};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FactsOptions {
	pub select: Option<Vec<String>>,
	#[serde(default)]
	pub include_nulls: bool,
}

impl DossierService {
	pub async fn get(&self, subject: &str) -> Result<Option<Profile>> {
		Self::require_subject(subject)?;

		Ok(self.inner.store.get(subject).await?.map(|record| record.profile))
	}

	pub async fn history(&self, subject: &str, query: HistoryQuery) -> Result<HistoryPage> {
		Self::require_subject(subject)?;

		Ok(self.inner.store.get_history(subject, query).await?)
	}

	/// Compact JSON rendering of the profile for prompt injection, keys
	/// sorted alphabetically. Null-valued fields are dropped unless asked for.
	pub async fn facts_for_prompt(
		&self,
		subject: &str,
		options: FactsOptions,
	) -> Result<Option<String>> {
		Self::require_subject(subject)?;

		let Some(record) = self.inner.store.get(subject).await? else {
			return Ok(None);
		};
		let sorted: BTreeMap<String, Value> = record
			.profile
			.into_iter()
			.filter(|(field, value)| {
				selected(&options.select, field) && (options.include_nulls || !value.is_null())
			})
			.collect();

		if sorted.is_empty() {
			return Ok(None);
		}

		Ok(Some(serde_json::to_string(&sorted).map_err(dossier_storage::Error::from)?))
	}

	/// Non-null fields only, for use as query filters.
	pub async fn filters(
		&self,
		subject: &str,
		select: Option<Vec<String>>,
	) -> Result<Map<String, Value>> {
		Self::require_subject(subject)?;

		let Some(record) = self.inner.store.get(subject).await? else {
			return Ok(Map::new());
		};

		Ok(record
			.profile
			.into_iter()
			.filter(|(field, value)| selected(&select, field) && !value.is_null())
			.collect())
	}

	/// Removes the profile and its full history together.
	pub async fn delete(&self, subject: &str) -> Result<bool> {
		Self::require_subject(subject)?;

		Ok(self.inner.store.delete(subject).await?)
	}
}

fn selected(select: &Option<Vec<String>>, field: &str) -> bool {
	select.as_ref().map(|fields| fields.iter().any(|name| name == field)).unwrap_or(true)
}
