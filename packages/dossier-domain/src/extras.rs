use regex::Regex;
use serde_json::{Map, Value};

use crate::{model::RejectReason, text};
use dossier_config::Extras as ExtrasPolicy;

/// Enforces key and value rules on the free-form `extras` map. Failure rejects
/// the whole field: the caller learns only `extras_invalid`, never which key
/// was at fault.
pub fn sanitize_extras(
	value: &Value,
	policy: &ExtrasPolicy,
	max_field_length: u32,
) -> Result<Value, RejectReason> {
	if value.is_null() {
		return Ok(Value::Null);
	}

	let Some(map) = value.as_object() else {
		return Err(RejectReason::ExtrasInvalid);
	};
	let key_pattern =
		Regex::new(&policy.key_pattern).map_err(|_| RejectReason::ExtrasInvalid)?;
	let max_string = policy.max_string_length.min(max_field_length) as usize;
	let mut out = Map::new();

	for (key, entry) in map {
		if out.len() >= policy.max_keys as usize {
			break;
		}
		if key.chars().count() > policy.max_key_length as usize {
			continue;
		}
		if !key_pattern.is_match(key) {
			continue;
		}

		if let Some(sanitized) = sanitize_value(entry, policy, &key_pattern, max_string, 0) {
			out.insert(key.clone(), sanitized);
		}
	}

	if out.is_empty() && !map.is_empty() {
		return Err(RejectReason::ExtrasInvalid);
	}

	Ok(Value::Object(out))
}

fn sanitize_value(
	value: &Value,
	policy: &ExtrasPolicy,
	key_pattern: &Regex,
	max_string: usize,
	depth: u32,
) -> Option<Value> {
	match value {
		Value::String(raw) => Some(Value::String(text::truncate_chars(raw, max_string))),
		Value::Number(n) =>
			if n.as_f64().map(f64::is_finite).unwrap_or(true) {
				Some(Value::Number(n.clone()))
			} else {
				None
			},
		Value::Bool(b) => Some(Value::Bool(*b)),
		Value::Array(elements) => {
			if !policy.allow_arrays || depth >= policy.max_nesting_depth {
				return None;
			}

			let sanitized: Vec<Value> = elements
				.iter()
				.take(policy.max_array_length as usize)
				.filter_map(|el| sanitize_value(el, policy, key_pattern, max_string, depth + 1))
				.collect();

			Some(Value::Array(sanitized))
		},
		Value::Object(map) => {
			if !policy.allow_nested_objects || depth >= policy.max_nesting_depth {
				return None;
			}

			let mut out = Map::new();

			for (key, entry) in map {
				if key.chars().count() > policy.max_key_length as usize {
					continue;
				}
				if !key_pattern.is_match(key) {
					continue;
				}

				if let Some(sanitized) =
					sanitize_value(entry, policy, key_pattern, max_string, depth + 1)
				{
					out.insert(key.clone(), sanitized);
				}
			}

			Some(Value::Object(out))
		},
		Value::Null => None,
	}
}
