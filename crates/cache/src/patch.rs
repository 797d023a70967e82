//! Field-level patches.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Field values of an entity.
pub type Fields = BTreeMap<String, Value>;

/// Values of selected fields, `None` where the field is absent.
///
/// Captured before a patch is applied so that writing it back is an exact
/// inverse, absent fields included.
pub type FieldSnapshot = BTreeMap<String, Option<Value>>;

type UpdateFn = Arc<dyn Fn(Option<&Value>) -> Value + Send + Sync>;

/// Change to a single field.
#[derive(Clone)]
pub enum FieldDelta {
	/// Replace the value.
	Set(Value),
	/// Derive the new value from the current one (absent ⇒ `None`).
	Update(UpdateFn),
	/// Remove the field.
	Remove,
}

impl FieldDelta {
	/// Computes the field value after this delta.
	pub fn apply(&self, old: Option<&Value>) -> Option<Value> {
		match self {
			Self::Set(value) => Some(value.clone()),
			Self::Update(f) => Some(f(old)),
			Self::Remove => None,
		}
	}
}

impl fmt::Debug for FieldDelta {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Set(value) => f.debug_tuple("Set").field(value).finish(),
			Self::Update(_) => f.write_str("Update(..)"),
			Self::Remove => f.write_str("Remove"),
		}
	}
}

/// Deltas applied atomically to one entity, keyed by field name.
#[derive(Debug, Clone, Default)]
pub struct FieldPatch {
	deltas: BTreeMap<String, FieldDelta>,
}

impl FieldPatch {
	/// Creates an empty patch.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets `field` to `value`.
	pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
		self.deltas.insert(field.into(), FieldDelta::Set(value.into()));
		self
	}

	/// Updates `field` from its current value.
	pub fn update(mut self, field: impl Into<String>, f: impl Fn(Option<&Value>) -> Value + Send + Sync + 'static) -> Self {
		self.deltas.insert(field.into(), FieldDelta::Update(Arc::new(f)));
		self
	}

	/// Removes `field`.
	pub fn remove(mut self, field: impl Into<String>) -> Self {
		self.deltas.insert(field.into(), FieldDelta::Remove);
		self
	}

	/// Adds `delta` to an integer field, flooring at zero. Absent counts as zero.
	pub fn add_count(self, field: impl Into<String>, delta: i64) -> Self {
		self.update(field, move |old| {
			let current = old.and_then(Value::as_i64).unwrap_or(0);
			Value::from(current.saturating_add(delta).max(0))
		})
	}

	/// Plain-value merge of `fields`.
	pub fn from_fields(fields: Fields) -> Self {
		Self {
			deltas: fields.into_iter().map(|(k, v)| (k, FieldDelta::Set(v))).collect(),
		}
	}

	/// Patch writing `snapshot` back: present values are set, absent ones removed.
	pub fn restoring(snapshot: &FieldSnapshot) -> Self {
		let deltas = snapshot
			.iter()
			.map(|(field, value)| {
				let delta = match value {
					Some(v) => FieldDelta::Set(v.clone()),
					None => FieldDelta::Remove,
				};
				(field.clone(), delta)
			})
			.collect();
		Self { deltas }
	}

	/// Returns `true` if the patch changes nothing.
	pub fn is_empty(&self) -> bool {
		self.deltas.is_empty()
	}

	/// Names of the patched fields.
	pub fn fields(&self) -> impl Iterator<Item = &str> {
		self.deltas.keys().map(String::as_str)
	}

	/// Iterates over `(field, delta)` pairs.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldDelta)> {
		self.deltas.iter().map(|(k, d)| (k.as_str(), d))
	}

	/// Applies the patch to a snapshot of values.
	pub fn apply_to(&self, values: &mut FieldSnapshot) {
		for (field, delta) in &self.deltas {
			let next = delta.apply(values.get(field).and_then(Option::as_ref));
			values.insert(field.clone(), next);
		}
	}
}
