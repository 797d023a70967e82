//! Per-key ordering of in-flight optimistic patches.
//!
//! Each key with in-flight patches has a lane: the committed `base` value of
//! every field an in-flight patch touches, plus the patches in dispatch order.
//! The cached value of a tracked field is always `base` with the lane's
//! patches replayed over it.
//!
//! Resolving a patch removes it from the lane, folds its outcome into `base`
//! (commit) or drops it (rollback), and writes the replay of the remaining
//! patches. When the resolved patch is the newest this writes exactly the
//! values it replaced; otherwise later in-flight values survive.
//!
//! A lane that resolves while its entity is removed keeps the values it would
//! have written as detached. If the removal is rolled back they are written
//! over the restored snapshot, which still holds the optimistic values.

use newsfeed_cache::{Applied, EntityKey, FieldPatch, FieldSnapshot, Fields, NormalizedCache};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::MutationId;

struct LaneEntry {
	id: MutationId,
	patch: FieldPatch,
}

struct Lane {
	base: FieldSnapshot,
	entries: Vec<LaneEntry>,
	/// The first in-flight patch created the entity.
	created: bool,
}

impl Lane {
	fn replay(&self) -> FieldSnapshot {
		let mut values = self.base.clone();
		for entry in &self.entries {
			entry.patch.apply_to(&mut values);
		}
		values
	}

	fn prune(&mut self) {
		let entries = &self.entries;
		self.base
			.retain(|field, _| entries.iter().any(|e| e.patch.fields().any(|f| f == field.as_str())));
	}
}

/// How a lane entry resolves.
pub(crate) enum Resolution<'a> {
	/// Keep the optimistic values, overridden by any server-confirmed fields.
	Commit(Option<&'a Fields>),
	/// Drop the optimistic values.
	Rollback,
}

#[derive(Default)]
pub(crate) struct Lanes {
	lanes: FxHashMap<EntityKey, Lane>,
	detached: FxHashMap<EntityKey, FieldSnapshot>,
}

impl Lanes {
	/// Applies `patch` to the cache and appends it to the key's lane.
	pub(crate) fn dispatch(&mut self, cache: &NormalizedCache, id: MutationId, key: &EntityKey, patch: FieldPatch) -> Applied {
		let applied = cache.apply(key, &patch);
		let lane = self.lanes.entry(key.clone()).or_insert_with(|| Lane {
			base: FieldSnapshot::new(),
			entries: Vec::new(),
			created: applied.created,
		});
		for (field, previous) in &applied.previous {
			lane.base.entry(field.clone()).or_insert_with(|| previous.clone());
		}
		lane.entries.push(LaneEntry { id, patch });
		trace!(key = %key, mutation = id, depth = lane.entries.len(), "lane.push");
		applied
	}

	/// Resolves mutation `id` on `key` and writes the new replay.
	///
	/// Never recreates an entity deleted in the meantime.
	pub(crate) fn resolve(&mut self, cache: &NormalizedCache, id: MutationId, key: &EntityKey, resolution: Resolution<'_>) {
		let Some(lane) = self.lanes.get_mut(key) else {
			return;
		};
		let Some(pos) = lane.entries.iter().position(|e| e.id == id) else {
			return;
		};
		let entry = lane.entries.remove(pos);

		let mut untracked = Fields::new();
		let rollback = matches!(resolution, Resolution::Rollback);
		if let Resolution::Commit(server) = resolution {
			entry.patch.apply_to(&mut lane.base);
			for (field, value) in server.into_iter().flatten() {
				match lane.base.get_mut(field) {
					Some(slot) => *slot = Some(value.clone()),
					None => {
						untracked.insert(field.clone(), value.clone());
					}
				}
			}
		}

		let mut values = lane.replay();
		values.extend(untracked.into_iter().map(|(f, v)| (f, Some(v))));

		let drained = lane.entries.is_empty();
		if rollback && drained && lane.created && lane.base.values().all(Option::is_none) {
			cache.evict(key);
		} else if !cache.restore(key, &values) {
			debug!(key = %key, mutation = id, "lane.resolve.absent");
			self.detached.entry(key.clone()).or_default().extend(values);
		}

		if drained {
			self.lanes.remove(key);
		} else {
			lane.prune();
		}
	}

	/// Drops values detached from `key`; its removal snapshot is now current.
	pub(crate) fn forget_detached(&mut self, key: &EntityKey) {
		self.detached.remove(key);
	}

	/// Writes what settled on `key` while it was removed, then the replay of
	/// its open lane.
	pub(crate) fn reattach(&mut self, cache: &NormalizedCache, key: &EntityKey) {
		if let Some(values) = self.detached.remove(key) {
			trace!(key = %key, fields = values.len(), "lane.reattach");
			cache.restore(key, &values);
		}
		if let Some(lane) = self.lanes.get(key) {
			cache.restore(key, &lane.replay());
		}
	}

	/// Number of in-flight patches on `key`.
	#[cfg(test)]
	pub(crate) fn depth(&self, key: &EntityKey) -> usize {
		self.lanes.get(key).map_or(0, |lane| lane.entries.len())
	}
}
