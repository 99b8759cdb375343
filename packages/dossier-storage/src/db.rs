use sqlx::postgres::PgPoolOptions;

use crate::{Result, schema};

/// Shared by every process that bootstraps the schema. Deploys often start
/// several replicas at once; whoever holds the lock applies the DDL while
/// the rest wait and then see the finished tables.
const BOOTSTRAP_LOCK_ID: i64 = 0x00D0_551E;

pub struct Db {
	pub pool: sqlx::PgPool,
}

impl Db {
	pub async fn connect(cfg: &dossier_config::Postgres) -> Result<Self> {
		let pool =
			PgPoolOptions::new().max_connections(cfg.pool_max_conns).connect(&cfg.dsn).await?;

		Ok(Self { pool })
	}

	/// Applies the DDL idempotently under an advisory lock. The lock is
	/// transaction-scoped: it rides on the same connection as the DDL and
	/// releases itself at commit, even if a statement fails midway.
	pub async fn ensure_schema(&self) -> Result<()> {
		let mut tx = self.pool.begin().await?;

		sqlx::query("SELECT pg_advisory_xact_lock($1)")
			.bind(BOOTSTRAP_LOCK_ID)
			.execute(&mut *tx)
			.await?;

		for statement in schema::render_statements() {
			sqlx::query(&statement).execute(&mut *tx).await?;
		}

		tx.commit().await?;

		Ok(())
	}
}
