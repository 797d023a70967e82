//! Derived, read-only list views.

use std::sync::Arc;

use tokio::sync::watch;

use crate::{Entity, ListId, NormalizedCache};

/// What a view should show at one revision.
#[derive(Debug, Clone, PartialEq)]
pub struct ListSnapshot {
	/// Cache revision the items were read at.
	pub revision: u64,
	/// Listed entities in order, references resolved one level deep.
	pub items: Vec<Entity>,
}

impl ListSnapshot {
	/// Number of items.
	pub fn len(&self) -> usize {
		self.items.len()
	}

	/// Returns `true` if there are no items.
	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}
}

/// Ordered view over one cache list.
///
/// Holds no state besides the list id: every snapshot is recomputed from the
/// cache, so it always reflects what the cache holds right now, optimistic or
/// committed. Listed keys without a cached entity are skipped.
#[derive(Debug, Clone)]
pub struct ListProjection {
	cache: Arc<NormalizedCache>,
	list: ListId,
}

impl ListProjection {
	/// Creates a projection of `list`.
	pub fn new(cache: Arc<NormalizedCache>, list: ListId) -> Self {
		Self { cache, list }
	}

	/// The projected list.
	pub fn list(&self) -> &ListId {
		&self.list
	}

	/// Current contents.
	pub fn snapshot(&self) -> ListSnapshot {
		let (revision, items) = self.cache.project(&self.list);
		ListSnapshot { revision, items }
	}

	/// Subscribes to changes of the underlying cache.
	pub fn watch(&self) -> ListWatch {
		ListWatch {
			projection: self.clone(),
			rx: self.cache.subscribe(),
		}
	}
}

/// Subscription returned by [`ListProjection::watch`].
pub struct ListWatch {
	projection: ListProjection,
	rx: watch::Receiver<u64>,
}

impl ListWatch {
	/// Waits for the next cache revision and returns the fresh snapshot.
	///
	/// Several revisions landing between two calls are coalesced into one.
	pub async fn changed(&mut self) -> Option<ListSnapshot> {
		self.rx.changed().await.ok()?;
		Some(self.projection.snapshot())
	}

	/// Current contents without waiting.
	pub fn snapshot(&self) -> ListSnapshot {
		self.projection.snapshot()
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;
	use crate::{EntityKey, FieldPatch, InsertAt};

	fn seeded() -> Arc<NormalizedCache> {
		let cache = Arc::new(NormalizedCache::new());
		let keys = cache
			.write_results(
				&json!([
					{ "__typename": "Post", "id": "1", "title": "first", "author": { "__typename": "User", "id": "9", "username": "ada" } },
					{ "__typename": "Post", "id": "2", "title": "second", "author": { "__typename": "User", "id": "9", "username": "ada" } },
				]),
				None,
			)
			.unwrap();
		cache.set_list(ListId::Feed, keys);
		cache
	}

	#[test]
	fn test_snapshot_resolves_references() {
		let cache = seeded();
		let snap = ListProjection::new(cache, ListId::Feed).snapshot();

		assert_eq!(snap.len(), 2);
		assert_eq!(snap.items[0].get_str("title"), Some("first"));
		assert_eq!(
			snap.items[0].get("author"),
			Some(&json!({ "__typename": "User", "id": "9", "username": "ada" }))
		);
	}

	#[test]
	fn test_absent_entities_are_skipped() {
		let cache = seeded();
		cache.evict(&EntityKey::post("1"));
		let snap = ListProjection::new(cache.clone(), ListId::Feed).snapshot();

		assert_eq!(snap.items.iter().map(|e| e.key.clone()).collect::<Vec<_>>(), vec![EntityKey::post("2")]);
		assert_eq!(cache.list_keys(&ListId::Feed).len(), 2);
	}

	#[test]
	fn test_snapshot_reflects_optimistic_writes() {
		let cache = seeded();
		let projection = ListProjection::new(cache.clone(), ListId::Feed);
		cache.write(&EntityKey::post("2"), &FieldPatch::new().set("likesCount", 6));

		assert_eq!(projection.snapshot().items[1].get_i64("likesCount"), Some(6));
		assert_eq!(projection.snapshot().revision, cache.revision());
	}

	#[tokio::test(flavor = "current_thread")]
	async fn test_watch_wakes_on_change() {
		let cache = seeded();
		let projection = ListProjection::new(cache.clone(), ListId::comments("1"));
		let mut watch = projection.watch();

		let placeholder = EntityKey::comment("temp-1");
		cache.write(&placeholder, &FieldPatch::new().set("content", "hi"));
		cache.insert_into_list(ListId::comments("1"), placeholder.clone(), InsertAt::Front);

		let snap = watch.changed().await.unwrap();
		assert_eq!(snap.items.len(), 1);
		assert_eq!(snap.items[0].key, placeholder);
		assert_eq!(snap.revision, cache.revision());
	}
}
