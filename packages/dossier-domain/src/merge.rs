use std::cmp::Ordering;

use serde_json::Value;

use crate::{
	model::{
		Candidate, FieldProvenance, HistoryAction, HistoryEntry, Profile, ProvenanceMap,
		RejectReason, Rejection,
	},
	text,
};
use dossier_config::Merge as MergePolicy;

pub struct MergeInput<'a> {
	pub profile: &'a Profile,
	pub provenance: &'a ProvenanceMap,
	pub candidates: Vec<Candidate>,
	/// Trusted pipelines (patch) bypass the age-based rejection so backfills
	/// always land; the priority and timestamp rules still apply.
	pub skip_recency_check: bool,
}

#[derive(Clone, Debug)]
pub struct MergeOutcome {
	pub profile: Profile,
	pub provenance: ProvenanceMap,
	pub updated: Vec<String>,
	pub rejected: Vec<Rejection>,
	pub history: Vec<HistoryEntry>,
}

pub fn effective_priority(policy: &MergePolicy, source: &str) -> i32 {
	policy.source_priority.get(source).copied().unwrap_or(0)
}

/// Deterministic conflict resolution over one candidate batch. Pure: no I/O,
/// no clock. Missing candidate timestamps are resolved by the caller from a
/// single captured clock before the batch reaches the engine.
pub fn merge(
	input: MergeInput<'_>,
	policy: &MergePolicy,
	nullable: &dyn Fn(&str) -> bool,
) -> MergeOutcome {
	let MergeInput { profile, provenance, mut candidates, skip_recency_check } = input;
	let mut outcome = MergeOutcome {
		profile: profile.clone(),
		provenance: provenance.clone(),
		updated: Vec::new(),
		rejected: Vec::new(),
		history: Vec::new(),
	};

	sort_candidates(&mut candidates, policy);

	for candidate in candidates {
		match decide(&outcome, &candidate, policy, nullable, skip_recency_check) {
			Decision::Accept(value) => apply(&mut outcome, candidate, value),
			Decision::Reject(reason) => reject(&mut outcome, candidate, reason),
		}
	}

	outcome
}

/// Best candidate first: priority, then recency, then confidence, with the
/// field name as a deterministic tie-break.
fn sort_candidates(candidates: &mut [Candidate], policy: &MergePolicy) {
	candidates.sort_by(|a, b| {
		effective_priority(policy, &b.source)
			.cmp(&effective_priority(policy, &a.source))
			.then_with(|| b.timestamp_ms.cmp(&a.timestamp_ms))
			.then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal))
			.then_with(|| a.field.cmp(&b.field))
	});
}

enum Decision {
	Accept(Value),
	Reject(RejectReason),
}

fn decide(
	outcome: &MergeOutcome,
	candidate: &Candidate,
	policy: &MergePolicy,
	nullable: &dyn Fn(&str) -> bool,
	skip_recency_check: bool,
) -> Decision {
	let Some(value) = candidate.value.clone() else {
		return Decision::Reject(RejectReason::SchemaInvalid);
	};

	if candidate.confidence < policy.min_confidence {
		return Decision::Reject(RejectReason::LowConfidence);
	}

	if let Some(existing) = outcome.provenance.get(&candidate.field) {
		let candidate_priority = effective_priority(policy, &candidate.source);
		let existing_priority = effective_priority(policy, &existing.source);

		if !skip_recency_check
			&& candidate_priority <= existing_priority
			&& candidate.timestamp_ms <= existing.timestamp_ms
			&& existing.timestamp_ms - candidate.timestamp_ms >= policy.recency_window_ms
		{
			return Decision::Reject(RejectReason::OutsideRecency);
		}
		// A strictly newer candidate overrides regardless of priority; on a
		// tie or an older timestamp, only a strictly higher priority wins.
		// The exact tie at equal priority keeps the existing value.
		if candidate.timestamp_ms <= existing.timestamp_ms {
			if candidate_priority == existing_priority {
				return Decision::Reject(RejectReason::OlderTimestamp);
			}
			if candidate_priority < existing_priority {
				return Decision::Reject(RejectReason::LowerPriority);
			}
		}
	}

	if value.is_null() && !nullable(&candidate.field) {
		return Decision::Reject(RejectReason::NotNullable);
	}

	let value = match value {
		Value::String(raw) =>
			Value::String(text::truncate_chars(&raw, policy.max_field_length as usize)),
		other => other,
	};

	Decision::Accept(value)
}

fn apply(outcome: &mut MergeOutcome, candidate: Candidate, value: Value) {
	let previous_value = outcome.profile.get(&candidate.field).cloned();
	let action = if value.is_null() { HistoryAction::Delete } else { HistoryAction::Set };

	outcome.profile.insert(candidate.field.clone(), value.clone());
	outcome.provenance.insert(candidate.field.clone(), FieldProvenance {
		value: value.clone(),
		source: candidate.source.clone(),
		timestamp_ms: candidate.timestamp_ms,
		confidence: candidate.confidence,
		inferred: candidate.inferred,
	});
	outcome.history.push(HistoryEntry {
		field: candidate.field.clone(),
		value,
		previous_value,
		source: candidate.source,
		timestamp_ms: candidate.timestamp_ms,
		confidence: candidate.confidence,
		inferred: candidate.inferred,
		action,
		reason: None,
	});
	outcome.updated.push(candidate.field);
}

fn reject(outcome: &mut MergeOutcome, candidate: Candidate, reason: RejectReason) {
	outcome.history.push(HistoryEntry {
		field: candidate.field.clone(),
		value: candidate.value.clone().unwrap_or(Value::Null),
		previous_value: outcome.profile.get(&candidate.field).cloned(),
		source: candidate.source.clone(),
		timestamp_ms: candidate.timestamp_ms,
		confidence: candidate.confidence,
		inferred: candidate.inferred,
		action: HistoryAction::Rejected,
		reason: Some(reason),
	});
	outcome.rejected.push(Rejection {
		field: candidate.field,
		value: candidate.value,
		reason,
		detail: None,
	});
}
