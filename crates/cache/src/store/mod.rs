//! The normalized entity store.
//!
//! # Invariants
//!
//! - At most one representation exists per [`EntityKey`].
//! - Writes merge fields; nothing but [`NormalizedCache::rekey`] replaces a
//!   whole entity.
//! - Lists never hold a key twice.
//! - The revision advances under the write lock on every change, so a
//!   snapshot taken under the read lock is consistent with its revision.

use parking_lot::{RwLock, RwLockWriteGuard};
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::normalize::REF_FIELD;
use crate::{EntityKey, FieldPatch, FieldSnapshot, Fields, InsertAt, ListId};

/// Read snapshot of one cached entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
	/// Identity.
	pub key: EntityKey,
	/// Field values.
	pub fields: Fields,
}

impl Entity {
	/// Returns a field value.
	pub fn get(&self, field: &str) -> Option<&Value> {
		self.fields.get(field)
	}

	/// Returns an integer field.
	pub fn get_i64(&self, field: &str) -> Option<i64> {
		self.get(field).and_then(Value::as_i64)
	}

	/// Returns a boolean field.
	pub fn get_bool(&self, field: &str) -> Option<bool> {
		self.get(field).and_then(Value::as_bool)
	}

	/// Returns a string field.
	pub fn get_str(&self, field: &str) -> Option<&str> {
		self.get(field).and_then(Value::as_str)
	}

	/// JSON object form, with `__typename` restored.
	pub fn to_value(&self) -> Value {
		let mut object: Map<String, Value> = self.fields.clone().into_iter().collect();
		object.insert("__typename".into(), Value::from(self.key.typename()));
		Value::Object(object)
	}
}

/// Result of [`NormalizedCache::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
	/// Values of the patched fields before the patch.
	pub previous: FieldSnapshot,
	/// Values of the patched fields after the patch.
	pub values: FieldSnapshot,
	/// Whether the patch created the entity.
	pub created: bool,
}

/// What [`NormalizedCache::remove_entity`] took out of the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedEntity {
	/// Removed key.
	pub key: EntityKey,
	/// Entity fields, if the entity was cached.
	pub fields: Option<Fields>,
	/// `(list, index)` positions the key occupied.
	pub slots: Vec<(ListId, usize)>,
}

impl RemovedEntity {
	/// Returns `true` if nothing was removed.
	pub fn is_empty(&self) -> bool {
		self.fields.is_none() && self.slots.is_empty()
	}
}

#[derive(Debug, Default)]
struct State {
	entities: FxHashMap<EntityKey, Fields>,
	lists: FxHashMap<ListId, Vec<EntityKey>>,
}

impl State {
	fn unlist(&mut self, key: &EntityKey) -> Vec<(ListId, usize)> {
		let mut slots = Vec::new();
		for (list, keys) in self.lists.iter_mut() {
			if let Some(index) = keys.iter().position(|k| k == key) {
				keys.remove(index);
				slots.push((list.clone(), index));
			}
		}
		slots.sort();
		slots
	}

	fn resolve(&self, key: &EntityKey) -> Option<Entity> {
		let fields = self.entities.get(key)?;
		let fields = fields.iter().map(|(name, value)| (name.clone(), self.resolve_value(value))).collect();
		Some(Entity { key: key.clone(), fields })
	}

	/// Replaces references one level deep; referenced entities keep their own references.
	fn resolve_value(&self, value: &Value) -> Value {
		match value {
			Value::Object(object) => match reference(object) {
				Some(target) => self
					.entities
					.get(&target)
					.map(|fields| Entity { key: target, fields: fields.clone() }.to_value())
					.unwrap_or(Value::Null),
				None => value.clone(),
			},
			Value::Array(items) => Value::Array(items.iter().map(|item| self.resolve_value(item)).collect()),
			other => other.clone(),
		}
	}
}

fn reference(object: &Map<String, Value>) -> Option<EntityKey> {
	if object.len() != 1 {
		return None;
	}
	object.get(REF_FIELD)?.as_str().and_then(EntityKey::parse)
}

/// Keyed store of entity snapshots plus the ordered lists views render.
///
/// Shared behind an `Arc`; all methods take `&self` and hold the internal lock
/// only for the duration of the call.
pub struct NormalizedCache {
	state: RwLock<State>,
	revision: watch::Sender<u64>,
}

impl std::fmt::Debug for NormalizedCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.read();
		f.debug_struct("NormalizedCache")
			.field("entities", &state.entities.len())
			.field("lists", &state.lists.len())
			.field("revision", &*self.revision.borrow())
			.finish()
	}
}

impl Default for NormalizedCache {
	fn default() -> Self {
		Self::new()
	}
}

impl NormalizedCache {
	/// Creates an empty cache at revision 0.
	pub fn new() -> Self {
		Self {
			state: RwLock::new(State::default()),
			revision: watch::Sender::new(0),
		}
	}

	/// Current revision.
	pub fn revision(&self) -> u64 {
		*self.revision.borrow()
	}

	/// Subscribes to revision changes.
	pub fn subscribe(&self) -> watch::Receiver<u64> {
		self.revision.subscribe()
	}

	/// Advances the revision. Call with the write guard held.
	fn bump(&self, _guard: &RwLockWriteGuard<'_, State>) {
		self.revision.send_modify(|r| *r += 1);
	}

	/// Number of cached entities.
	pub fn len(&self) -> usize {
		self.state.read().entities.len()
	}

	/// Returns `true` if no entity is cached.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns `true` if `key` is cached.
	pub fn contains(&self, key: &EntityKey) -> bool {
		self.state.read().entities.contains_key(key)
	}

	/// Reads an entity.
	pub fn read(&self, key: &EntityKey) -> Option<Entity> {
		let state = self.state.read();
		state.entities.get(key).map(|fields| Entity {
			key: key.clone(),
			fields: fields.clone(),
		})
	}

	/// Reads the requested `fields` of an entity; fields it lacks are omitted.
	pub fn read_fragment(&self, key: &EntityKey, fields: &[&str]) -> Option<Entity> {
		let state = self.state.read();
		let all = state.entities.get(key)?;
		let fields = fields
			.iter()
			.filter_map(|name| all.get(*name).map(|v| ((*name).to_owned(), v.clone())))
			.collect();
		Some(Entity { key: key.clone(), fields })
	}

	/// Reads the values of `fields` (absent ⇒ `None`), or `None` if the entity is not cached.
	pub fn snapshot(&self, key: &EntityKey, fields: impl IntoIterator<Item = impl AsRef<str>>) -> Option<FieldSnapshot> {
		let state = self.state.read();
		let all = state.entities.get(key)?;
		Some(
			fields
				.into_iter()
				.map(|name| {
					let name = name.as_ref();
					(name.to_owned(), all.get(name).cloned())
				})
				.collect(),
		)
	}

	/// Merges `patch` into the entity at `key`, creating it if absent.
	pub fn write(&self, key: &EntityKey, patch: &FieldPatch) {
		self.apply(key, patch);
	}

	/// Merges plain `fields` into the entity at `key`, creating it if absent.
	pub fn write_fragment(&self, key: &EntityKey, fields: Fields) {
		self.apply(key, &FieldPatch::from_fields(fields));
	}

	/// Merges `patch` and reports the values it replaced, atomically.
	pub fn apply(&self, key: &EntityKey, patch: &FieldPatch) -> Applied {
		let mut state = self.state.write();
		let created = !state.entities.contains_key(key);
		let entity = state.entities.entry(key.clone()).or_default();

		let mut previous = FieldSnapshot::new();
		let mut values = FieldSnapshot::new();
		for (field, delta) in patch.iter() {
			let old = entity.get(field).cloned();
			let next = delta.apply(old.as_ref());
			match &next {
				Some(v) => {
					entity.insert(field.to_owned(), v.clone());
				}
				None => {
					entity.remove(field);
				}
			}
			previous.insert(field.to_owned(), old);
			values.insert(field.to_owned(), next);
		}
		trace!(key = %key, fields = values.len(), created, "cache.write");
		self.bump(&state);
		Applied { previous, values, created }
	}

	/// Writes `snapshot` back onto an existing entity.
	///
	/// Returns `false` without touching anything if the entity is not cached:
	/// a restore never recreates a deleted entity.
	pub fn restore(&self, key: &EntityKey, snapshot: &FieldSnapshot) -> bool {
		let mut state = self.state.write();
		let Some(entity) = state.entities.get_mut(key) else {
			debug!(key = %key, "cache.restore.absent");
			return false;
		};
		for (field, value) in snapshot {
			match value {
				Some(v) => {
					entity.insert(field.clone(), v.clone());
				}
				None => {
					entity.remove(field);
				}
			}
		}
		trace!(key = %key, fields = snapshot.len(), "cache.restore");
		self.bump(&state);
		true
	}

	/// Removes an entity, leaving list slots in place.
	pub fn evict(&self, key: &EntityKey) -> Option<Entity> {
		let mut state = self.state.write();
		let fields = state.entities.remove(key)?;
		trace!(key = %key, "cache.evict");
		self.bump(&state);
		Some(Entity { key: key.clone(), fields })
	}

	/// Removes an entity and every list slot holding it.
	pub fn remove_entity(&self, key: &EntityKey) -> RemovedEntity {
		let mut state = self.state.write();
		let fields = state.entities.remove(key);
		let slots = state.unlist(key);
		let removed = RemovedEntity {
			key: key.clone(),
			fields,
			slots,
		};
		if !removed.is_empty() {
			trace!(key = %key, slots = removed.slots.len(), "cache.remove");
			self.bump(&state);
		}
		removed
	}

	/// Puts back what [`remove_entity`](Self::remove_entity) took out.
	///
	/// An entity recreated in the meantime is kept as is; list slots are
	/// restored at their old index (clamped) unless the key is already listed.
	pub fn restore_entity(&self, removed: RemovedEntity) {
		let mut state = self.state.write();
		if let Some(fields) = removed.fields
			&& !state.entities.contains_key(&removed.key)
		{
			state.entities.insert(removed.key.clone(), fields);
		}
		for (list, index) in removed.slots {
			let keys = state.lists.entry(list).or_default();
			if !keys.contains(&removed.key) {
				let index = index.min(keys.len());
				keys.insert(index, removed.key.clone());
			}
		}
		trace!(key = %removed.key, "cache.restore_entity");
		self.bump(&state);
	}

	/// Moves the entity at `old` to `new`, replacing any entity at `new` with
	/// `fields`, and re-points every list slot.
	///
	/// Returns `false` and changes nothing if `old` is no longer cached.
	pub fn rekey(&self, old: &EntityKey, new: EntityKey, fields: Fields) -> bool {
		let mut state = self.state.write();
		if state.entities.remove(old).is_none() {
			debug!(old = %old, new = %new, "cache.rekey.absent");
			return false;
		}
		state.entities.insert(new.clone(), fields);
		for keys in state.lists.values_mut() {
			if !keys.contains(old) {
				continue;
			}
			keys.retain(|k| k != &new);
			if let Some(slot) = keys.iter_mut().find(|k| **k == *old) {
				*slot = new.clone();
			}
		}
		debug!(old = %old, new = %new, "cache.rekey");
		self.bump(&state);
		true
	}

	/// Replaces a list with `keys` in the given (server) order, dropping duplicates.
	pub fn set_list(&self, list: ListId, keys: impl IntoIterator<Item = EntityKey>) {
		let mut deduped: Vec<EntityKey> = Vec::new();
		for key in keys {
			if !deduped.contains(&key) {
				deduped.push(key);
			}
		}
		let mut state = self.state.write();
		trace!(list = %list, len = deduped.len(), "cache.set_list");
		state.lists.insert(list, deduped);
		self.bump(&state);
	}

	/// Inserts `key` into `list`; returns `false` if it was already listed.
	pub fn insert_into_list(&self, list: ListId, key: EntityKey, at: InsertAt) -> bool {
		let mut state = self.state.write();
		let keys = state.lists.entry(list).or_default();
		if keys.contains(&key) {
			return false;
		}
		match at {
			InsertAt::Front => keys.insert(0, key),
			InsertAt::Back => keys.push(key),
		}
		self.bump(&state);
		true
	}

	/// Removes `key` from every list; returns the `(list, index)` slots it held.
	pub fn remove_from_lists(&self, key: &EntityKey) -> Vec<(ListId, usize)> {
		let mut state = self.state.write();
		let slots = state.unlist(key);
		if !slots.is_empty() {
			self.bump(&state);
		}
		slots
	}

	/// Keys of `list` in order; empty if the list is unknown.
	pub fn list_keys(&self, list: &ListId) -> Vec<EntityKey> {
		self.state.read().lists.get(list).cloned().unwrap_or_default()
	}

	/// Reads an entity with references resolved one level deep.
	pub fn read_resolved(&self, key: &EntityKey) -> Option<Entity> {
		self.state.read().resolve(key)
	}

	/// Resolved entities of `list` plus the revision they were read at.
	///
	/// Keys without a cached entity are skipped.
	pub(crate) fn project(&self, list: &ListId) -> (u64, Vec<Entity>) {
		let state = self.state.read();
		let revision = self.revision();
		let items = state
			.lists
			.get(list)
			.map(|keys| keys.iter().filter_map(|key| state.resolve(key)).collect())
			.unwrap_or_default();
		(revision, items)
	}

	/// Merges many entities under one lock and one revision.
	pub fn merge_entities(&self, entities: Vec<(EntityKey, Fields)>) {
		if entities.is_empty() {
			return;
		}
		let mut state = self.state.write();
		for (key, fields) in entities {
			state.entities.entry(key).or_default().extend(fields);
		}
		self.bump(&state);
	}
}
