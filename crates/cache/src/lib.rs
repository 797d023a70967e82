//! Normalized client-side cache for newsfeed entities.
//!
//! Entities (posts, comments, users) are stored once, addressed by
//! [`EntityKey`], and updated by field-level [`FieldPatch`] merges. Nested
//! entities in server payloads are flattened into `{"__ref": "Typename:id"}`
//! references. Ordered lists of keys ([`ListId`]) back the views, which read
//! them through a [`ListProjection`].
//!
//! Every change advances a revision published on a `watch` channel so
//! projections can re-render lazily.

#![warn(missing_docs)]

mod key;
mod normalize;
mod patch;
mod projection;
mod store;

pub use key::{EntityKey, InsertAt, ListId, PLACEHOLDER_PREFIX};
pub use normalize::{Normalized, REF_FIELD, normalize, reference_to};
pub use patch::{FieldDelta, FieldPatch, FieldSnapshot, Fields};
pub use projection::{ListProjection, ListSnapshot, ListWatch};
pub use store::{Applied, Entity, NormalizedCache, RemovedEntity};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while normalizing server payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The payload at `path` is not a JSON object.
	#[error("expected an object at {path}")]
	NotAnObject {
		/// JSON path of the offending value.
		path: String,
	},
	/// The object at `path` has no `__typename`/`id` identity.
	#[error("object at {path} has no __typename/id identity")]
	MissingIdentity {
		/// JSON path of the offending object.
		path: String,
	},
}
