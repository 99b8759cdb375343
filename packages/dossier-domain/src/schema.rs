use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared shape of a single profile field. `Optional` and `WithDefault` are
/// transparent wrappers: validation, nullability, and case-folding all recurse
/// through them.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FieldType {
	String,
	Number,
	Boolean,
	Any,
	Enum { variants: Vec<String> },
	Array { items: Box<FieldType> },
	Object { fields: BTreeMap<String, FieldType> },
	Record { values: Box<FieldType> },
	Nullable { inner: Box<FieldType> },
	Optional { inner: Box<FieldType> },
	WithDefault { inner: Box<FieldType>, default: Value },
	Union { variants: Vec<FieldType> },
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
	#[error("Schema must declare at least one field.")]
	Empty,
	#[error("Field {field:?}: {message}")]
	InvalidField { field: String, message: String },
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProfileSchema {
	fields: BTreeMap<String, FieldType>,
}
impl ProfileSchema {
	pub fn try_new(fields: BTreeMap<String, FieldType>) -> Result<Self, SchemaError> {
		if fields.is_empty() {
			return Err(SchemaError::Empty);
		}

		for (field, ty) in &fields {
			validate_declared_type(field, ty)?;
		}

		Ok(Self { fields })
	}

	pub fn from_json(value: Value) -> Result<Self, SchemaError> {
		let fields: BTreeMap<String, FieldType> =
			serde_json::from_value(value).map_err(|err| SchemaError::InvalidField {
				field: "$".to_string(),
				message: format!("Schema declaration is not an object of field types: {err}."),
			})?;

		Self::try_new(fields)
	}

	pub fn field(&self, name: &str) -> Option<&FieldType> {
		self.fields.get(name)
	}

	pub fn field_names(&self) -> impl Iterator<Item = &str> {
		self.fields.keys().map(String::as_str)
	}

	/// The free-form `extras` map bypasses type validation and goes through
	/// the sanitizer instead. It qualifies only when declared as an open type.
	pub fn is_extras_field(&self, name: &str) -> bool {
		name == "extras"
			&& self
				.fields
				.get(name)
				.map(|ty| matches!(unwrap_transparent(ty), FieldType::Record { .. } | FieldType::Any))
				.unwrap_or(false)
	}

	pub fn is_nullable(&self, name: &str) -> bool {
		self.fields.get(name).map(is_nullable).unwrap_or(false)
	}

	/// Compact structural descriptor of the whole schema, used to build the
	/// extractor prompt.
	pub fn describe(&self) -> Value {
		let mut out = serde_json::Map::new();

		for (name, ty) in &self.fields {
			out.insert(name.clone(), describe(ty));
		}

		Value::Object(out)
	}
}

fn validate_declared_type(field: &str, ty: &FieldType) -> Result<(), SchemaError> {
	match ty {
		FieldType::String | FieldType::Number | FieldType::Boolean | FieldType::Any => Ok(()),
		FieldType::Enum { variants } =>
			if variants.is_empty() {
				Err(SchemaError::InvalidField {
					field: field.to_string(),
					message: "Enum must declare at least one variant.".to_string(),
				})
			} else {
				Ok(())
			},
		FieldType::Array { items } => validate_declared_type(field, items),
		FieldType::Object { fields } => {
			for (key, inner) in fields {
				validate_declared_type(&format!("{field}.{key}"), inner)?;
			}

			Ok(())
		},
		FieldType::Record { values } => validate_declared_type(field, values),
		FieldType::Nullable { inner } | FieldType::Optional { inner } =>
			validate_declared_type(field, inner),
		FieldType::WithDefault { inner, default } => {
			validate_declared_type(field, inner)?;

			if let Err(message) = validate_value(inner, default) {
				return Err(SchemaError::InvalidField {
					field: field.to_string(),
					message: format!("Default value does not match the declared type: {message}"),
				});
			}

			Ok(())
		},
		FieldType::Union { variants } =>
			if variants.is_empty() {
				Err(SchemaError::InvalidField {
					field: field.to_string(),
					message: "Union must declare at least one variant.".to_string(),
				})
			} else {
				variants.iter().try_for_each(|inner| validate_declared_type(field, inner))
			},
	}
}

fn unwrap_transparent(ty: &FieldType) -> &FieldType {
	match ty {
		FieldType::Optional { inner } | FieldType::WithDefault { inner, .. } =>
			unwrap_transparent(inner),
		other => other,
	}
}

/// Whether an explicit null is an acceptable value for the declared type.
pub fn is_nullable(ty: &FieldType) -> bool {
	match ty {
		FieldType::Nullable { .. } | FieldType::Any => true,
		FieldType::Optional { inner } | FieldType::WithDefault { inner, .. } => is_nullable(inner),
		FieldType::Union { variants } => variants.iter().any(is_nullable),
		_ => false,
	}
}

/// Normalizes string-enumeration values to the declared spelling, matching
/// case-insensitively. Recurses through wrappers, union branches, array
/// elements, and object fields; unknown object keys pass through unchanged.
pub fn fold_enum_case(ty: &FieldType, value: Value) -> Value {
	match ty {
		FieldType::Enum { variants } => match value {
			Value::String(raw) => {
				let folded = variants
					.iter()
					.find(|variant| variant.eq_ignore_ascii_case(&raw))
					.cloned()
					.unwrap_or(raw);

				Value::String(folded)
			},
			other => other,
		},
		FieldType::Nullable { inner }
		| FieldType::Optional { inner }
		| FieldType::WithDefault { inner, .. } => fold_enum_case(inner, value),
		FieldType::Union { variants } => {
			let mut value = value;

			for variant in variants {
				let folded = fold_enum_case(variant, value.clone());

				if folded != value {
					return folded;
				}

				value = folded;
			}

			value
		},
		FieldType::Array { items } => match value {
			Value::Array(elements) =>
				Value::Array(elements.into_iter().map(|el| fold_enum_case(items, el)).collect()),
			other => other,
		},
		FieldType::Object { fields } => match value {
			Value::Object(map) => Value::Object(
				map.into_iter()
					.map(|(key, val)| match fields.get(&key) {
						Some(inner) => {
							let folded = fold_enum_case(inner, val);

							(key, folded)
						},
						None => (key, val),
					})
					.collect(),
			),
			other => other,
		},
		FieldType::Record { values } => match value {
			Value::Object(map) => Value::Object(
				map.into_iter().map(|(key, val)| (key, fold_enum_case(values, val))).collect(),
			),
			other => other,
		},
		_ => value,
	}
}

/// Type-checks a value against the declared type. A top-level null is not a
/// gate concern (nullability is decided by the merge); nested nulls must be
/// admitted by the type they sit in.
pub fn validate_candidate(ty: &FieldType, value: &Value) -> Result<(), String> {
	if value.is_null() {
		return Ok(());
	}

	validate_value(ty, value)
}

fn validate_value(ty: &FieldType, value: &Value) -> Result<(), String> {
	match ty {
		FieldType::Any => Ok(()),
		FieldType::String =>
			if value.is_string() {
				Ok(())
			} else {
				Err("expected a string".to_string())
			},
		FieldType::Number =>
			if value.is_number() {
				Ok(())
			} else {
				Err("expected a number".to_string())
			},
		FieldType::Boolean =>
			if value.is_boolean() {
				Ok(())
			} else {
				Err("expected a boolean".to_string())
			},
		FieldType::Enum { variants } => match value.as_str() {
			Some(raw) if variants.iter().any(|variant| variant == raw) => Ok(()),
			_ => Err(format!("expected one of {}", variants.join("|"))),
		},
		FieldType::Array { items } => match value.as_array() {
			Some(elements) => {
				for (idx, element) in elements.iter().enumerate() {
					validate_value(items, element).map_err(|err| format!("[{idx}]: {err}"))?;
				}

				Ok(())
			},
			None => Err("expected an array".to_string()),
		},
		FieldType::Object { fields } => match value.as_object() {
			Some(map) => {
				for (key, inner) in fields {
					match map.get(key) {
						Some(nested) =>
							validate_value(inner, nested).map_err(|err| format!("{key}: {err}"))?,
						None if field_may_be_absent(inner) => {},
						None => return Err(format!("{key}: missing required key")),
					}
				}

				Ok(())
			},
			None => Err("expected an object".to_string()),
		},
		FieldType::Record { values } => match value.as_object() {
			Some(map) => {
				for (key, nested) in map {
					validate_value(values, nested).map_err(|err| format!("{key}: {err}"))?;
				}

				Ok(())
			},
			None => Err("expected a map".to_string()),
		},
		FieldType::Nullable { inner } =>
			if value.is_null() {
				Ok(())
			} else {
				validate_value(inner, value)
			},
		FieldType::Optional { inner } | FieldType::WithDefault { inner, .. } =>
			validate_value(inner, value),
		FieldType::Union { variants } => {
			let mut errors = Vec::with_capacity(variants.len());

			for variant in variants {
				match validate_value(variant, value) {
					Ok(()) => return Ok(()),
					Err(err) => errors.push(err),
				}
			}

			Err(format!("no union variant matched ({})", errors.join("; ")))
		},
	}
}

fn field_may_be_absent(ty: &FieldType) -> bool {
	matches!(ty, FieldType::Optional { .. } | FieldType::WithDefault { .. })
}

fn describe(ty: &FieldType) -> Value {
	match ty {
		FieldType::String => Value::String("string".to_string()),
		FieldType::Number => Value::String("number".to_string()),
		FieldType::Boolean => Value::String("boolean".to_string()),
		FieldType::Any => Value::String("any".to_string()),
		FieldType::Enum { variants } => serde_json::json!({ "enum": variants }),
		FieldType::Array { items } => serde_json::json!({ "array": describe(items) }),
		FieldType::Object { fields } => {
			let mut out = serde_json::Map::new();

			for (key, inner) in fields {
				out.insert(key.clone(), describe(inner));
			}

			serde_json::json!({ "object": out })
		},
		FieldType::Record { values } => serde_json::json!({ "record": describe(values) }),
		FieldType::Nullable { inner } => serde_json::json!({ "nullable": describe(inner) }),
		FieldType::Optional { inner } | FieldType::WithDefault { inner, .. } => describe(inner),
		FieldType::Union { variants } => {
			serde_json::json!({ "union": variants.iter().map(describe).collect::<Vec<_>>() })
		},
	}
}
