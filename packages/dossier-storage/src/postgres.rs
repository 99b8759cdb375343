use serde_json::Value;
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;

use crate::{
	BoxFuture, Error, HistoryPage, HistoryQuery, ProfileStore, Result, SetOptions, StoredRecord,
	db::Db,
	effective_limit,
	models::{HistoryRow, ProfileRow, action_str},
};
use dossier_domain::model::{HistoryEntry, Profile, ProvenanceMap};

/// Relational adapter. The etag is the `version` column; the history cursor
/// is the monotonic history row id. Profile write and history inserts share
/// one transaction.
pub struct PostgresStore {
	db: Db,
}
impl PostgresStore {
	pub fn new(db: Db) -> Self {
		Self { db }
	}

	pub async fn connect(cfg: &dossier_config::Postgres) -> Result<Self> {
		let db = Db::connect(cfg).await?;

		db.ensure_schema().await?;

		Ok(Self::new(db))
	}

	pub fn pool(&self) -> &sqlx::PgPool {
		&self.db.pool
	}
}
impl ProfileStore for PostgresStore {
	fn get<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<Option<StoredRecord>>> {
		Box::pin(async move {
			let row = sqlx::query_as::<_, ProfileRow>(
				"SELECT * FROM profiles WHERE subject_key = $1",
			)
			.bind(subject)
			.fetch_optional(&self.db.pool)
			.await?;
			let Some(row) = row else {
				return Ok(None);
			};
			let Value::Object(profile) = row.profile else {
				return Err(Error::InvalidArgument(format!(
					"Stored profile for subject {subject:?} is not an object."
				)));
			};
			let provenance: ProvenanceMap = serde_json::from_value(row.provenance)?;

			Ok(Some(StoredRecord { profile, provenance, etag: row.version.to_string() }))
		})
	}

	fn set<'a>(
		&'a self,
		subject: &'a str,
		profile: &'a Profile,
		provenance: &'a ProvenanceMap,
		options: SetOptions,
		history: &'a [HistoryEntry],
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move {
			let now = OffsetDateTime::now_utc();
			let profile_json = Value::Object(profile.clone());
			let provenance_json = serde_json::to_value(provenance)?;
			let mut tx = self.db.pool.begin().await?;
			let version: i64 = if options.force {
				sqlx::query_scalar::<_, i64>(
					"\
INSERT INTO profiles (subject_key, profile, provenance, version, updated_at)
VALUES ($1, $2, $3, 1, $4)
ON CONFLICT (subject_key) DO UPDATE
SET profile = EXCLUDED.profile,
	provenance = EXCLUDED.provenance,
	version = profiles.version + 1,
	updated_at = EXCLUDED.updated_at
RETURNING version",
				)
				.bind(subject)
				.bind(&profile_json)
				.bind(&provenance_json)
				.bind(now)
				.fetch_one(&mut *tx)
				.await?
			} else if let Some(expected) = options.etag.as_deref() {
				let expected: i64 = expected.parse().map_err(|_| {
					Error::InvalidArgument(format!("Invalid etag {expected:?}."))
				})?;

				sqlx::query_scalar::<_, i64>(
					"\
UPDATE profiles
SET profile = $1, provenance = $2, version = version + 1, updated_at = $3
WHERE subject_key = $4 AND version = $5
RETURNING version",
				)
				.bind(&profile_json)
				.bind(&provenance_json)
				.bind(now)
				.bind(subject)
				.bind(expected)
				.fetch_optional(&mut *tx)
				.await?
				.ok_or_else(|| {
					Error::Conflict(format!(
						"Expected version {expected} for subject {subject:?}."
					))
				})?
			} else {
				sqlx::query_scalar::<_, i64>(
					"\
INSERT INTO profiles (subject_key, profile, provenance, version, updated_at)
VALUES ($1, $2, $3, 1, $4)
ON CONFLICT (subject_key) DO NOTHING
RETURNING version",
				)
				.bind(subject)
				.bind(&profile_json)
				.bind(&provenance_json)
				.bind(now)
				.fetch_optional(&mut *tx)
				.await?
				.ok_or_else(|| {
					Error::Conflict(format!("Record already exists for subject {subject:?}."))
				})?
			};

			insert_history_tx(&mut tx, subject, history, now).await?;

			tx.commit().await?;

			Ok(version.to_string())
		})
	}

	fn append_history<'a>(
		&'a self,
		subject: &'a str,
		entries: &'a [HistoryEntry],
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let now = OffsetDateTime::now_utc();
			let mut tx = self.db.pool.begin().await?;

			insert_history_tx(&mut tx, subject, entries, now).await?;

			tx.commit().await?;

			Ok(())
		})
	}

	fn get_history<'a>(
		&'a self,
		subject: &'a str,
		query: HistoryQuery,
	) -> BoxFuture<'a, Result<HistoryPage>> {
		Box::pin(async move {
			let after: i64 = match query.cursor.as_deref() {
				Some(raw) => raw.parse().map_err(|_| {
					Error::InvalidArgument(format!("Invalid history cursor {raw:?}."))
				})?,
				None => 0,
			};
			let limit = effective_limit(query.limit);
			let rows: Vec<HistoryRow> = if let Some(field) = query.field.as_deref() {
				sqlx::query_as::<_, HistoryRow>(
					"\
SELECT * FROM profile_history
WHERE subject_key = $1 AND field = $2 AND id > $3
ORDER BY id
LIMIT $4",
				)
				.bind(subject)
				.bind(field)
				.bind(after)
				.bind(limit as i64)
				.fetch_all(&self.db.pool)
				.await?
			} else {
				sqlx::query_as::<_, HistoryRow>(
					"\
SELECT * FROM profile_history
WHERE subject_key = $1 AND id > $2
ORDER BY id
LIMIT $3",
				)
				.bind(subject)
				.bind(after)
				.bind(limit as i64)
				.fetch_all(&self.db.pool)
				.await?
			};
			let next_cursor = (rows.len() == limit)
				.then(|| rows.last().map(|row| row.id.to_string()))
				.flatten();
			let entries =
				rows.into_iter().map(HistoryRow::into_entry).collect::<Result<Vec<_>>>()?;

			Ok(HistoryPage { entries, next_cursor })
		})
	}

	fn delete<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let mut tx = self.db.pool.begin().await?;
			let history_deleted = sqlx::query("DELETE FROM profile_history WHERE subject_key = $1")
				.bind(subject)
				.execute(&mut *tx)
				.await?;
			let profile_deleted = sqlx::query("DELETE FROM profiles WHERE subject_key = $1")
				.bind(subject)
				.execute(&mut *tx)
				.await?;

			tx.commit().await?;

			Ok(profile_deleted.rows_affected() > 0 || history_deleted.rows_affected() > 0)
		})
	}

	fn health_check<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			sqlx::query("SELECT 1").execute(&self.db.pool).await?;

			Ok(())
		})
	}
}

async fn insert_history_tx(
	tx: &mut Transaction<'_, Postgres>,
	subject: &str,
	entries: &[HistoryEntry],
	now: OffsetDateTime,
) -> Result<()> {
	for entry in entries {
		sqlx::query(
			"\
INSERT INTO profile_history (
	subject_key,
	field,
	value,
	previous_value,
	source,
	ts_ms,
	confidence,
	inferred,
	action,
	reason,
	created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
		)
		.bind(subject)
		.bind(entry.field.as_str())
		.bind((!entry.value.is_null()).then_some(&entry.value))
		.bind(entry.previous_value.as_ref())
		.bind(entry.source.as_str())
		.bind(entry.timestamp_ms)
		.bind(entry.confidence)
		.bind(entry.inferred)
		.bind(action_str(entry.action))
		.bind(entry.reason.map(|reason| reason.as_str()))
		.bind(now)
		.execute(&mut **tx)
		.await?;
	}

	Ok(())
}
