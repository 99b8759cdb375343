use redis::{AsyncCommands, Script, aio::MultiplexedConnection};
use uuid::Uuid;

use crate::{
	BoxFuture, Error, HistoryPage, HistoryQuery, ProfileStore, Result, SetOptions, StoredRecord,
	effective_limit,
};
use dossier_domain::model::{HistoryEntry, Profile, ProvenanceMap};

/// One server-side script performs the whole conditional write: version
/// check, all four key writes, history append, retention trim, and TTL
/// refresh. A version mismatch returns CONFLICT with the current version and
/// writes nothing. Reads never extend TTLs.
const SET_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[3])
if ARGV[2] ~= '1' then
	if ARGV[1] == '' then
		if current then return {'CONFLICT', current} end
	elseif not current or current ~= ARGV[1] then
		return {'CONFLICT', current or ''}
	end
end
local version = tonumber(current or '0') + 1
redis.call('SET', KEYS[1], ARGV[3])
redis.call('SET', KEYS[2], ARGV[4])
redis.call('SET', KEYS[3], tostring(version))
local count = tonumber(ARGV[5])
for i = 0, count - 1 do
	redis.call('ZADD', KEYS[4], ARGV[6 + i * 2], ARGV[7 + i * 2])
end
local max = tonumber(ARGV[6 + count * 2])
if max > 0 then
	redis.call('ZREMRANGEBYRANK', KEYS[4], 0, -(max + 1))
end
local ttl = tonumber(ARGV[7 + count * 2])
if ttl > 0 then
	redis.call('EXPIRE', KEYS[1], ttl)
	redis.call('EXPIRE', KEYS[2], ttl)
	redis.call('EXPIRE', KEYS[3], ttl)
	redis.call('EXPIRE', KEYS[4], ttl)
end
return {'OK', tostring(version)}
";

/// Scripted key-value adapter. Four keys per subject: profile, provenance,
/// meta (version), and a history sorted set scored by timestamp. The etag is
/// the meta version; the history cursor is a sorted-set score.
pub struct RedisStore {
	conn: MultiplexedConnection,
	key_prefix: String,
	ttl_seconds: u64,
	max_history: usize,
}
impl RedisStore {
	pub async fn connect(cfg: &dossier_config::Redis, max_history: u32) -> Result<Self> {
		let client = redis::Client::open(cfg.url.as_str())?;
		let conn = client.get_multiplexed_async_connection().await?;

		Ok(Self {
			conn,
			key_prefix: cfg.key_prefix.clone(),
			ttl_seconds: cfg.ttl_seconds,
			max_history: max_history as usize,
		})
	}

	fn profile_key(&self, subject: &str) -> String {
		format!("{}:{subject}:profile", self.key_prefix)
	}

	fn provenance_key(&self, subject: &str) -> String {
		format!("{}:{subject}:provenance", self.key_prefix)
	}

	fn meta_key(&self, subject: &str) -> String {
		format!("{}:{subject}:meta", self.key_prefix)
	}

	fn history_key(&self, subject: &str) -> String {
		format!("{}:{subject}:history", self.key_prefix)
	}
}
impl ProfileStore for RedisStore {
	fn get<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<Option<StoredRecord>>> {
		Box::pin(async move {
			let mut conn = self.conn.clone();
			let (profile, provenance, version): (Option<String>, Option<String>, Option<String>) =
				redis::cmd("MGET")
					.arg(self.profile_key(subject))
					.arg(self.provenance_key(subject))
					.arg(self.meta_key(subject))
					.query_async(&mut conn)
					.await?;
			let (Some(profile), Some(provenance), Some(version)) = (profile, provenance, version)
			else {
				return Ok(None);
			};
			let profile: Profile = serde_json::from_str(&profile)?;
			let provenance: ProvenanceMap = serde_json::from_str(&provenance)?;

			Ok(Some(StoredRecord { profile, provenance, etag: version }))
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
			let mut conn = self.conn.clone();
			let script = Script::new(SET_SCRIPT);
			let mut invocation = script.prepare_invoke();

			invocation
				.key(self.profile_key(subject))
				.key(self.provenance_key(subject))
				.key(self.meta_key(subject))
				.key(self.history_key(subject))
				.arg(options.etag.as_deref().unwrap_or(""))
				.arg(if options.force { "1" } else { "0" })
				.arg(serde_json::to_string(profile)?)
				.arg(serde_json::to_string(provenance)?)
				.arg(history.len());

			for entry in history {
				invocation.arg(entry.timestamp_ms).arg(history_member(entry)?);
			}

			invocation.arg(self.max_history).arg(self.ttl_seconds);

			let reply: Vec<String> = invocation.invoke_async(&mut conn).await?;

			match reply.first().map(String::as_str) {
				Some("OK") => Ok(reply
					.get(1)
					.cloned()
					.ok_or_else(|| Error::InvalidArgument("Script reply is missing the version.".to_string()))?),
				Some("CONFLICT") => Err(Error::Conflict(format!(
					"Expected version {:?}, found {:?}.",
					options.etag.as_deref().unwrap_or(""),
					reply.get(1).cloned().unwrap_or_default()
				))),
				_ => Err(Error::InvalidArgument("Unexpected script reply.".to_string())),
			}
		})
	}

	fn append_history<'a>(
		&'a self,
		subject: &'a str,
		entries: &'a [HistoryEntry],
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			if entries.is_empty() {
				return Ok(());
			}

			let mut conn = self.conn.clone();
			let key = self.history_key(subject);
			let mut pipe = redis::pipe();

			pipe.atomic();

			for entry in entries {
				pipe.cmd("ZADD").arg(&key).arg(entry.timestamp_ms).arg(history_member(entry)?);
			}

			pipe.cmd("ZREMRANGEBYRANK").arg(&key).arg(0).arg(-(self.max_history as i64 + 1));
			pipe.query_async::<()>(&mut conn).await?;

			Ok(())
		})
	}

	fn get_history<'a>(
		&'a self,
		subject: &'a str,
		query: HistoryQuery,
	) -> BoxFuture<'a, Result<HistoryPage>> {
		Box::pin(async move {
			let mut min = match query.cursor.as_deref() {
				Some(raw) => {
					let _: i64 = raw.parse().map_err(|_| {
						Error::InvalidArgument(format!("Invalid history cursor {raw:?}."))
					})?;

					format!("({raw}")
				},
				None => "-inf".to_string(),
			};
			let limit = effective_limit(query.limit);
			let key = self.history_key(subject);
			let mut conn = self.conn.clone();
			let mut entries: Vec<HistoryEntry> = Vec::with_capacity(limit);
			let mut filled = false;

			// The sorted set holds every field's entries, so a field query
			// keeps scanning score windows until the page has `limit`
			// matches or the set runs out. `limit` bounds matching entries,
			// never the raw window.
			loop {
				let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
					.arg(&key)
					.arg(&min)
					.arg("+inf")
					.arg("LIMIT")
					.arg(0)
					.arg(limit)
					.query_async(&mut conn)
					.await?;
				let raw_count = members.len();
				let mut last_scanned_ts = None;

				for member in &members {
					let entry = parse_history_member(member)?;

					last_scanned_ts = Some(entry.timestamp_ms);

					if query.field.as_deref().map(|field| entry.field == field).unwrap_or(true) {
						entries.push(entry);

						if entries.len() == limit {
							filled = true;

							break;
						}
					}
				}

				if filled || raw_count < limit {
					break;
				}

				let Some(last_scanned_ts) = last_scanned_ts else { break };

				min = format!("({last_scanned_ts}");
			}

			let next_cursor = filled
				.then(|| entries.last().map(|entry| entry.timestamp_ms.to_string()))
				.flatten();

			Ok(HistoryPage { entries, next_cursor })
		})
	}

	fn delete<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let mut conn = self.conn.clone();
			let removed: i64 = conn
				.del(&[
					self.profile_key(subject),
					self.provenance_key(subject),
					self.meta_key(subject),
					self.history_key(subject),
				])
				.await?;

			Ok(removed > 0)
		})
	}

	fn health_check<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut conn = self.conn.clone();
			let _: String = redis::cmd("PING").query_async(&mut conn).await?;

			Ok(())
		})
	}
}

/// Sorted-set members must be unique; identical entries at the same timestamp
/// would otherwise collapse into one. A random prefix keeps them distinct.
fn history_member(entry: &HistoryEntry) -> Result<String> {
	Ok(format!("{}:{}", Uuid::new_v4().simple(), serde_json::to_string(entry)?))
}

fn parse_history_member(member: &str) -> Result<HistoryEntry> {
	let (_, json) = member.split_once(':').ok_or_else(|| {
		Error::InvalidArgument("History member is missing its unique prefix.".to_string())
	})?;

	Ok(serde_json::from_str(json)?)
}
