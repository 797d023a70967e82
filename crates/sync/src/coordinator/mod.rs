//! Optimistic mutations: apply locally, send, then commit or roll back.
//!
//! # State machine
//!
//! ```text
//! Dispatched ──apply──▶ Optimistic ──success──▶ Committed
//!                            └──────failure──▶ RolledBack
//! ```
//!
//! Effects are applied synchronously inside [`MutationCoordinator::submit`],
//! so views see them before the network call starts. The call and its
//! reconciliation run on a task spawned on the coordinator's Tokio runtime
//! and finish even if the returned [`MutationHandle`] is dropped.
//!
//! # Ordering
//!
//! Patches to the same key are kept in a per-key lane in dispatch order (see
//! `lanes`). A rollback restores exactly what the mutation replaced when it is
//! the newest on its key, and never clobbers the optimistic values of later
//! in-flight mutations. Nothing is ever recreated by a rollback or commit once
//! another mutation deleted it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use newsfeed_cache::{Applied, EntityKey, FieldPatch, Fields, InsertAt, ListId, NormalizedCache, RemovedEntity, normalize};
use newsfeed_transport::{AuthInterceptor, Operation};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::{Error, ErrorKind, Result};

mod handle;
mod lanes;

pub use handle::MutationHandle;
use lanes::{Lanes, Resolution};

/// Process-unique mutation id.
pub type MutationId = u64;

/// Lifecycle of one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationState {
	/// Registered; effects not yet applied.
	Dispatched,
	/// Effects applied; waiting for the server.
	Optimistic,
	/// Server confirmed; authoritative values written.
	Committed,
	/// Failed; effects reverted.
	RolledBack,
}

impl MutationState {
	/// Returns `true` if the machine may move from `self` to `next`.
	pub fn can_advance_to(self, next: Self) -> bool {
		matches!(
			(self, next),
			(Self::Dispatched, Self::Optimistic) | (Self::Optimistic, Self::Committed) | (Self::Optimistic, Self::RolledBack)
		)
	}

	/// Returns `true` for `Committed` and `RolledBack`.
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Committed | Self::RolledBack)
	}
}

/// One optimistic change applied when a mutation is submitted.
#[derive(Debug, Clone)]
pub enum Effect {
	/// Patch fields of an entity.
	Patch {
		/// Target entity.
		key: EntityKey,
		/// Field deltas.
		patch: FieldPatch,
	},
	/// Create a placeholder entity and list it.
	Insert {
		/// List receiving the placeholder.
		list: ListId,
		/// Placeholder key (see [`placeholder_key`]).
		key: EntityKey,
		/// Placeholder fields.
		fields: Fields,
		/// List position.
		at: InsertAt,
	},
	/// Remove an entity and its list slots.
	Remove {
		/// Removed entity.
		key: EntityKey,
	},
}

/// How a server payload becomes authoritative cache state on commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconcile {
	/// The payload is the current state of an entity of `typename`; its fields
	/// override the optimistic values of a patch on the same key.
	Confirm {
		/// Root type of the payload.
		typename: String,
	},
	/// The payload is the server identity of `placeholder`, which is replaced
	/// (not merged) and re-pointed in every list.
	Replace {
		/// Placeholder created by an [`Effect::Insert`].
		placeholder: EntityKey,
	},
	/// The payload carries nothing to write.
	Discard,
}

/// A mutation: the operation, its optimistic effects and how to reconcile.
#[derive(Debug, Clone)]
pub struct MutationPlan {
	operation: Operation,
	effects: Vec<Effect>,
	reconcile: Reconcile,
}

impl MutationPlan {
	/// Creates a plan without effects that discards the payload.
	pub fn new(operation: Operation) -> Self {
		Self {
			operation,
			effects: Vec::new(),
			reconcile: Reconcile::Discard,
		}
	}

	/// Adds an [`Effect::Patch`].
	pub fn patch(mut self, key: EntityKey, patch: FieldPatch) -> Self {
		self.effects.push(Effect::Patch { key, patch });
		self
	}

	/// Adds an [`Effect::Insert`].
	pub fn insert(mut self, list: ListId, key: EntityKey, fields: Fields, at: InsertAt) -> Self {
		self.effects.push(Effect::Insert { list, key, fields, at });
		self
	}

	/// Adds an [`Effect::Remove`].
	pub fn remove(mut self, key: EntityKey) -> Self {
		self.effects.push(Effect::Remove { key });
		self
	}

	/// Sets the reconcile step.
	pub fn reconcile(mut self, reconcile: Reconcile) -> Self {
		self.reconcile = reconcile;
		self
	}

	/// The operation sent to the server.
	pub fn operation(&self) -> &Operation {
		&self.operation
	}

	/// The optimistic effects, in application order.
	pub fn effects(&self) -> &[Effect] {
		&self.effects
	}
}

/// A locally generated placeholder key: `temp-<uuid>`.
pub fn placeholder_key(typename: &str) -> EntityKey {
	EntityKey::new(typename, format!("{}{}", newsfeed_cache::PLACEHOLDER_PREFIX, uuid::Uuid::new_v4()))
}

/// A server value that differed from the optimistic guess.
///
/// The server value wins; the note exists for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
	/// Entity.
	pub key: EntityKey,
	/// Field.
	pub field: String,
	/// Optimistic value.
	pub optimistic: Option<Value>,
	/// Server value, now in the cache.
	pub server: Value,
}

impl Conflict {
	/// Always [`ErrorKind::ConflictOnCommit`].
	pub fn kind(&self) -> ErrorKind {
		ErrorKind::ConflictOnCommit
	}
}

/// A committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
	/// Mutation id.
	pub id: MutationId,
	/// Operation name.
	pub operation: String,
	/// Always [`MutationState::Committed`].
	pub state: MutationState,
	/// Root entity of the server payload, if it was normalized.
	pub key: Option<EntityKey>,
	/// Fields where the server disagreed with the optimistic guess.
	pub conflicts: Vec<Conflict>,
	/// Raw server payload.
	pub payload: Value,
}

/// Receives mutation results on behalf of a view that may go away.
pub trait MutationObserver: Send + Sync {
	/// Called once when the mutation commits or rolls back.
	fn settled(&self, id: MutationId, result: &Result<MutationOutcome>);
}

/// An in-flight mutation, as reported by [`MutationCoordinator::pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
	/// Mutation id.
	pub id: MutationId,
	/// Operation name.
	pub operation: String,
	/// Current state.
	pub state: MutationState,
}

enum AppliedEffect {
	Patch { key: EntityKey, applied: Applied },
	Insert { key: EntityKey },
	Remove(RemovedEntity),
}

struct Record {
	operation: String,
	state: MutationState,
}

struct Inner {
	cache: Arc<NormalizedCache>,
	interceptor: Arc<AuthInterceptor>,
	runtime: Handle,
	lanes: Mutex<Lanes>,
	records: Mutex<FxHashMap<MutationId, Record>>,
	next_id: AtomicU64,
}

/// Applies optimistic effects and reconciles them with the server.
///
/// Mutations may be submitted from any thread; their network calls run on the
/// runtime the coordinator was built with. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MutationCoordinator {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for MutationCoordinator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MutationCoordinator")
			.field("pending", &self.inner.records.lock().len())
			.finish()
	}
}

impl MutationCoordinator {
	/// Creates a coordinator writing to `cache` and sending through
	/// `interceptor`, on the current Tokio runtime.
	///
	/// # Panics
	///
	/// Panics when called outside a Tokio runtime; use
	/// [`with_runtime`](Self::with_runtime) there.
	pub fn new(cache: Arc<NormalizedCache>, interceptor: Arc<AuthInterceptor>) -> Self {
		Self::with_runtime(cache, interceptor, Handle::current())
	}

	/// Like [`new`](Self::new), spawning mutation tasks on `runtime`.
	pub fn with_runtime(cache: Arc<NormalizedCache>, interceptor: Arc<AuthInterceptor>, runtime: Handle) -> Self {
		Self {
			inner: Arc::new(Inner {
				cache,
				interceptor,
				runtime,
				lanes: Mutex::new(Lanes::default()),
				records: Mutex::new(FxHashMap::default()),
				next_id: AtomicU64::new(0),
			}),
		}
	}

	/// The cache mutations write to.
	pub fn cache(&self) -> &Arc<NormalizedCache> {
		&self.inner.cache
	}

	/// The pipeline mutations are sent through.
	pub fn interceptor(&self) -> &Arc<AuthInterceptor> {
		&self.inner.interceptor
	}

	/// Patches `key` optimistically and sends `operation`; the payload confirms `key`.
	pub fn dispatch(&self, key: EntityKey, patch: FieldPatch, operation: Operation) -> MutationHandle {
		self.launch(confirming(key, patch, operation), None)
	}

	/// Like [`dispatch`](Self::dispatch), reporting to `observer` if it is still alive.
	pub fn dispatch_observed(
		&self,
		key: EntityKey,
		patch: FieldPatch,
		operation: Operation,
		observer: Weak<dyn MutationObserver>,
	) -> MutationHandle {
		self.launch(confirming(key, patch, operation), Some(observer))
	}

	/// Applies `plan`'s effects and sends its operation.
	pub fn submit(&self, plan: MutationPlan) -> MutationHandle {
		self.launch(plan, None)
	}

	/// Like [`submit`](Self::submit), reporting to `observer` if it is still alive.
	pub fn submit_observed(&self, plan: MutationPlan, observer: Weak<dyn MutationObserver>) -> MutationHandle {
		self.launch(plan, Some(observer))
	}

	/// In-flight mutations, oldest first.
	pub fn pending(&self) -> Vec<PendingMutation> {
		let records = self.inner.records.lock();
		let mut pending: Vec<_> = records
			.iter()
			.map(|(id, record)| PendingMutation {
				id: *id,
				operation: record.operation.clone(),
				state: record.state,
			})
			.collect();
		pending.sort_by_key(|p| p.id);
		pending
	}

	/// State of an in-flight mutation; `None` once it has settled.
	pub fn state(&self, id: MutationId) -> Option<MutationState> {
		self.inner.records.lock().get(&id).map(|r| r.state)
	}

	fn launch(&self, plan: MutationPlan, observer: Option<Weak<dyn MutationObserver>>) -> MutationHandle {
		let MutationPlan {
			operation,
			effects,
			reconcile,
		} = plan;
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
		self.inner.records.lock().insert(
			id,
			Record {
				operation: operation.name.clone(),
				state: MutationState::Dispatched,
			},
		);

		let applied = self.inner.apply(id, effects);
		if let Err(err) = self.inner.advance(id, MutationState::Optimistic) {
			warn!(mutation = id, error = %err, "mutation.advance_failed");
		}
		debug!(mutation = id, operation = %operation.name, effects = applied.len(), "mutation.optimistic");

		let (tx, rx) = oneshot::channel();
		let inner = self.inner.clone();
		self.inner.runtime.spawn(async move {
			let result = inner.settle(id, operation, reconcile, applied).await;
			match observer.as_ref().map(Weak::upgrade) {
				Some(Some(observer)) => observer.settled(id, &result),
				Some(None) => trace!(mutation = id, "mutation.observer_gone"),
				None => {}
			}
			if tx.send(result).is_err() {
				trace!(mutation = id, "mutation.handle_dropped");
			}
		});
		MutationHandle::new(id, rx)
	}
}

fn confirming(key: EntityKey, patch: FieldPatch, operation: Operation) -> MutationPlan {
	let typename = key.typename().to_owned();
	MutationPlan::new(operation)
		.patch(key, patch)
		.reconcile(Reconcile::Confirm { typename })
}

fn conflicts(key: &EntityKey, applied: &Applied, server: &Fields) -> Vec<Conflict> {
	applied
		.values
		.iter()
		.filter_map(|(field, optimistic)| {
			let server = server.get(field)?;
			(optimistic.as_ref() != Some(server)).then(|| Conflict {
				key: key.clone(),
				field: field.clone(),
				optimistic: optimistic.clone(),
				server: server.clone(),
			})
		})
		.collect()
}

impl Inner {
	fn advance(&self, id: MutationId, to: MutationState) -> Result<()> {
		let mut records = self.records.lock();
		let Some(record) = records.get_mut(&id) else {
			return Err(Error::Aborted { id });
		};
		if !record.state.can_advance_to(to) {
			return Err(Error::IllegalTransition {
				id,
				from: record.state,
				to,
			});
		}
		record.state = to;
		if to.is_terminal() {
			records.remove(&id);
		}
		Ok(())
	}

	fn apply(&self, id: MutationId, effects: Vec<Effect>) -> Vec<AppliedEffect> {
		let mut lanes = self.lanes.lock();
		effects
			.into_iter()
			.map(|effect| match effect {
				Effect::Patch { key, patch } => {
					let applied = lanes.dispatch(&self.cache, id, &key, patch);
					AppliedEffect::Patch { key, applied }
				}
				Effect::Insert { list, key, fields, at } => {
					self.cache.write_fragment(&key, fields);
					self.cache.insert_into_list(list, key.clone(), at);
					AppliedEffect::Insert { key }
				}
				Effect::Remove { key } => {
					lanes.forget_detached(&key);
					AppliedEffect::Remove(self.cache.remove_entity(&key))
				}
			})
			.collect()
	}

	async fn settle(
		&self,
		id: MutationId,
		operation: Operation,
		reconcile: Reconcile,
		applied: Vec<AppliedEffect>,
	) -> Result<MutationOutcome> {
		let payload = match self.interceptor.send(&operation).await {
			Ok(response) => response.root(&operation).cloned().ok_or_else(|| Error::NullPayload {
				operation: operation.name.clone(),
			}),
			Err(err) => Err(err.into()),
		};
		let result = payload.and_then(|payload| self.commit(id, &operation, reconcile, &applied, payload));
		if let Err(err) = &result {
			info!(mutation = id, operation = %operation.name, error = %err, "mutation.rollback");
			self.rollback(id, applied);
		}
		result
	}

	fn commit(
		&self,
		id: MutationId,
		operation: &Operation,
		reconcile: Reconcile,
		applied: &[AppliedEffect],
		payload: Value,
	) -> Result<MutationOutcome> {
		let normalized = match &reconcile {
			Reconcile::Confirm { typename } => Some(normalize(&payload, Some(typename.as_str()))?),
			Reconcile::Replace { placeholder } => Some(normalize(&payload, Some(placeholder.typename()))?),
			Reconcile::Discard => None,
		};

		let mut lanes = self.lanes.lock();
		let mut root: Option<(EntityKey, Fields)> = None;
		let mut key = None;
		if let Some(normalized) = normalized {
			key = Some(normalized.key.clone());
			self.cache.merge_entities(normalized.nested);
			match &reconcile {
				Reconcile::Replace { placeholder } => {
					if !self.cache.rekey(placeholder, normalized.key, normalized.fields) {
						debug!(mutation = id, placeholder = %placeholder, "mutation.commit.placeholder_gone");
					}
				}
				_ => root = Some((normalized.key, normalized.fields)),
			}
		}

		let mut found = Vec::new();
		let mut confirmed = false;
		for effect in applied {
			match effect {
				AppliedEffect::Patch { key, applied } => {
					let server = root.as_ref().filter(|(k, _)| k == key).map(|(_, fields)| fields);
					if let Some(server) = server {
						confirmed = true;
						found.extend(conflicts(key, applied, server));
					}
					lanes.resolve(&self.cache, id, key, Resolution::Commit(server));
				}
				AppliedEffect::Remove(removed) => lanes.forget_detached(&removed.key),
				AppliedEffect::Insert { .. } => {}
			}
		}
		if !confirmed
			&& let Some((key, fields)) = root
		{
			// Merging into an absent entity would resurrect a deletion.
			if self.cache.contains(&key) {
				self.cache.write_fragment(&key, fields);
			}
		}
		drop(lanes);

		for conflict in &found {
			debug!(mutation = id, key = %conflict.key, field = %conflict.field, "mutation.conflict");
		}
		if let Err(err) = self.advance(id, MutationState::Committed) {
			warn!(mutation = id, error = %err, "mutation.advance_failed");
		}
		info!(mutation = id, operation = %operation.name, conflicts = found.len(), "mutation.commit");
		Ok(MutationOutcome {
			id,
			operation: operation.name.clone(),
			state: MutationState::Committed,
			key,
			conflicts: found,
			payload,
		})
	}

	fn rollback(&self, id: MutationId, applied: Vec<AppliedEffect>) {
		let mut lanes = self.lanes.lock();
		for effect in applied.into_iter().rev() {
			match effect {
				AppliedEffect::Patch { key, .. } => lanes.resolve(&self.cache, id, &key, Resolution::Rollback),
				AppliedEffect::Insert { key } => {
					self.cache.remove_entity(&key);
				}
				AppliedEffect::Remove(removed) => {
					let key = removed.key.clone();
					self.cache.restore_entity(removed);
					lanes.reattach(&self.cache, &key);
				}
			}
		}
		drop(lanes);
		if let Err(err) = self.advance(id, MutationState::RolledBack) {
			warn!(mutation = id, error = %err, "mutation.advance_failed");
		}
	}
}

#[cfg(test)]
mod tests;
