use serde_json::{Map, Value};

use crate::{DossierService, Error, ProfileEvent, Result};
use dossier_config::Config;
use dossier_domain::{
	extras,
	merge::{self, MergeInput},
	model::{
		Candidate, HistoryAction, HistoryEntry, Profile, ProvenanceMap, RejectReason, Rejection,
	},
	schema::{self, ProfileSchema},
};
use dossier_storage::SetOptions;

const MAX_WRITE_ATTEMPTS: u32 = 2;

pub(crate) struct WriteRequest {
	pub subject: String,
	pub candidates: Vec<Candidate>,
	pub skip_recency_check: bool,
}

pub(crate) struct WriteOutcome {
	pub profile: Profile,
	pub updated: Map<String, Value>,
	pub rejected: Vec<Rejection>,
}

struct GateOutcome {
	kept: Vec<Candidate>,
	rejected: Vec<Rejection>,
	history: Vec<HistoryEntry>,
}

impl DossierService {
	/// The write pipeline: gate, merge, persist against the observed etag,
	/// retry once from a fresh read on a concurrent write, emit events.
	pub(crate) async fn apply_candidates(
		&self,
		schema: &ProfileSchema,
		request: WriteRequest,
	) -> Result<WriteOutcome> {
		let WriteRequest { subject, candidates, skip_recency_check } = request;
		let gate = gate_candidates(schema, &self.inner.cfg, candidates);
		let mut attempts = 0;

		loop {
			attempts += 1;

			let current = self.inner.store.get(&subject).await?;
			let (profile, provenance, etag) = match &current {
				Some(record) =>
					(record.profile.clone(), record.provenance.clone(), Some(record.etag.clone())),
				None => (Profile::new(), ProvenanceMap::new(), None),
			};
			let outcome = merge::merge(
				MergeInput {
					profile: &profile,
					provenance: &provenance,
					candidates: gate.kept.clone(),
					skip_recency_check,
				},
				&self.inner.cfg.merge,
				&|field| schema.is_nullable(field),
			);
			let mut history = gate.history.clone();

			history.extend(outcome.history.iter().cloned());

			let mut rejected = gate.rejected.clone();

			rejected.extend(outcome.rejected.iter().cloned());

			// No accepted candidate means no profile write: the etag must not
			// move, but rejections still reach the journal.
			if outcome.updated.is_empty() {
				if !history.is_empty() {
					self.inner.store.append_history(&subject, &history).await?;
				}

				self.emit_write_events(&subject, &Map::new(), &profile, &rejected);

				return Ok(WriteOutcome { profile, updated: Map::new(), rejected });
			}

			let options = SetOptions { etag: etag.clone(), force: false };

			match self
				.inner
				.store
				.set(&subject, &outcome.profile, &outcome.provenance, options, &history)
				.await
			{
				Ok(_) => {
					let updated: Map<String, Value> = outcome
						.updated
						.iter()
						.map(|field| {
							(
								field.clone(),
								outcome.profile.get(field).cloned().unwrap_or(Value::Null),
							)
						})
						.collect();

					self.emit_write_events(&subject, &updated, &outcome.profile, &rejected);

					return Ok(WriteOutcome { profile: outcome.profile, updated, rejected });
				},
				Err(err) if err.is_conflict() && attempts < MAX_WRITE_ATTEMPTS => {
					tracing::debug!(subject = %subject, "Concurrent write detected; retrying from a fresh read.");
				},
				Err(err) if err.is_conflict() =>
					return Err(Error::Persistence { attempts, source: err }),
				Err(err) => return Err(err.into()),
			}
		}
	}

	fn emit_write_events(
		&self,
		subject: &str,
		updated: &Map<String, Value>,
		profile: &Profile,
		rejected: &[Rejection],
	) {
		if !updated.is_empty() {
			self.inner.events.emit(&ProfileEvent::Update {
				subject: subject.to_string(),
				updated: updated.clone(),
				profile: profile.clone(),
			});
		}
		if !rejected.is_empty() {
			self.inner.events.emit(&ProfileEvent::Conflict {
				subject: subject.to_string(),
				rejected: rejected.to_vec(),
			});
		}
	}
}

/// Record-independent filtering: unknown fields, type mismatches, and extras
/// sanitization. Survivors proceed to the merge with normalized values.
fn gate_candidates(schema: &ProfileSchema, cfg: &Config, candidates: Vec<Candidate>) -> GateOutcome {
	let mut gate = GateOutcome { kept: Vec::new(), rejected: Vec::new(), history: Vec::new() };

	for mut candidate in candidates {
		if schema.is_extras_field(&candidate.field) {
			match candidate.value.as_ref() {
				Some(value) =>
					match extras::sanitize_extras(value, &cfg.extras, cfg.merge.max_field_length) {
						Ok(clean) => {
							candidate.value = Some(clean);

							gate.kept.push(candidate);
						},
						Err(reason) => reject(&mut gate, candidate, reason, None),
					},
				// An absent value is the merge engine's rule 1.
				None => gate.kept.push(candidate),
			}

			continue;
		}

		let Some(ty) = schema.field(&candidate.field) else {
			reject(&mut gate, candidate, RejectReason::UnknownField, None);

			continue;
		};

		if let Some(value) = candidate.value.take() {
			let folded = schema::fold_enum_case(ty, value);

			if let Err(detail) = schema::validate_candidate(ty, &folded) {
				candidate.value = Some(folded);

				reject(&mut gate, candidate, RejectReason::SchemaInvalid, Some(detail));

				continue;
			}

			candidate.value = Some(folded);
		}

		gate.kept.push(candidate);
	}

	gate
}

fn reject(gate: &mut GateOutcome, candidate: Candidate, reason: RejectReason, detail: Option<String>) {
	gate.history.push(HistoryEntry {
		field: candidate.field.clone(),
		value: candidate.value.clone().unwrap_or(Value::Null),
		previous_value: None,
		source: candidate.source.clone(),
		timestamp_ms: candidate.timestamp_ms,
		confidence: candidate.confidence,
		inferred: candidate.inferred,
		action: HistoryAction::Rejected,
		reason: Some(reason),
	});
	gate.rejected.push(Rejection { field: candidate.field, value: candidate.value, reason, detail });
}
