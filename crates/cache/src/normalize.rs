//! Flattening of server payloads into entities and references.

use serde_json::{Map, Value};
use tracing::trace;

use crate::{EntityKey, Error, Fields, NormalizedCache, Result};

/// Field name of an entity reference: `{"__ref": "Typename:id"}`.
pub const REF_FIELD: &str = "__ref";

const TYPENAME_FIELD: &str = "__typename";

/// Reference value pointing at `key`.
pub fn reference_to(key: &EntityKey) -> Value {
	let mut object = Map::new();
	object.insert(REF_FIELD.into(), Value::String(key.to_string()));
	Value::Object(object)
}

fn identity(object: &Map<String, Value>, typename_hint: Option<&str>) -> Option<EntityKey> {
	let typename = object.get(TYPENAME_FIELD).and_then(Value::as_str).or(typename_hint)?;
	let id = match object.get("id")? {
		Value::String(s) => s.clone(),
		Value::Number(n) => n.to_string(),
		_ => return None,
	};
	Some(EntityKey::new(typename, id))
}

/// A server object split into its root entity and the entities nested in it.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
	/// Root identity.
	pub key: EntityKey,
	/// Root fields, nested entities replaced by references.
	pub fields: Fields,
	/// Nested entities, innermost first.
	pub nested: Vec<(EntityKey, Fields)>,
}

impl Normalized {
	/// Every entity, root last.
	pub fn into_entities(self) -> Vec<(EntityKey, Fields)> {
		let mut entities = self.nested;
		entities.push((self.key, self.fields));
		entities
	}
}

struct Flattener {
	out: Vec<(EntityKey, Fields)>,
}

impl Flattener {
	fn fields(&mut self, object: &Map<String, Value>, path: &str) -> Fields {
		object
			.iter()
			.filter(|(name, _)| name.as_str() != TYPENAME_FIELD)
			.map(|(name, value)| (name.clone(), self.value(value, &format!("{path}.{name}"))))
			.collect()
	}

	fn value(&mut self, value: &Value, path: &str) -> Value {
		match value {
			Value::Object(object) => match identity(object, None) {
				Some(key) => {
					let fields = self.fields(object, path);
					let reference = reference_to(&key);
					self.out.push((key, fields));
					reference
				}
				None => Value::Object(
					object
						.iter()
						.map(|(name, v)| (name.clone(), self.value(v, &format!("{path}.{name}"))))
						.collect(),
				),
			},
			Value::Array(items) => Value::Array(
				items
					.iter()
					.enumerate()
					.map(|(i, item)| self.value(item, &format!("{path}[{i}]")))
					.collect(),
			),
			other => other.clone(),
		}
	}
}

/// Splits a server object into entities and references.
///
/// `typename_hint` names the root type when the payload lacks `__typename`;
/// nested objects are entities only if they carry their own `__typename` and
/// `id`, otherwise they stay inline.
pub fn normalize(value: &Value, typename_hint: Option<&str>) -> Result<Normalized> {
	normalize_at(value, typename_hint, "$")
}

fn normalize_at(value: &Value, typename_hint: Option<&str>, path: &str) -> Result<Normalized> {
	let object = value.as_object().ok_or_else(|| Error::NotAnObject { path: path.into() })?;
	let key = identity(object, typename_hint).ok_or_else(|| Error::MissingIdentity { path: path.into() })?;
	let mut flattener = Flattener { out: Vec::new() };
	let fields = flattener.fields(object, path);
	Ok(Normalized {
		key,
		fields,
		nested: flattener.out,
	})
}

impl NormalizedCache {
	/// Normalizes a server object and merges every entity it contains.
	///
	/// Returns the root key.
	pub fn write_result(&self, value: &Value, typename_hint: Option<&str>) -> Result<EntityKey> {
		let normalized = normalize(value, typename_hint)?;
		let key = normalized.key.clone();
		trace!(key = %key, nested = normalized.nested.len(), "cache.write_result");
		self.merge_entities(normalized.into_entities());
		Ok(key)
	}

	/// Normalizes an array of server objects under one revision; returns their keys in order.
	pub fn write_results(&self, value: &Value, typename_hint: Option<&str>) -> Result<Vec<EntityKey>> {
		let items = value.as_array().ok_or_else(|| Error::NotAnObject { path: "$".into() })?;
		let mut keys = Vec::with_capacity(items.len());
		let mut entities = Vec::new();
		for (i, item) in items.iter().enumerate() {
			let normalized = normalize_at(item, typename_hint, &format!("$[{i}]"))?;
			keys.push(normalized.key.clone());
			entities.extend(normalized.into_entities());
		}
		self.merge_entities(entities);
		Ok(keys)
	}
}
