//! Entity and list identities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Id prefix of locally created placeholder entities.
pub const PLACEHOLDER_PREFIX: &str = "temp-";

/// Stable identity of a cached entity: `(typename, id)`.
///
/// Displays as `Typename:id` (e.g. `Post:7`), which is also the form used by
/// references and serde.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
	typename: String,
	id: String,
}

impl EntityKey {
	/// Creates a key.
	pub fn new(typename: impl Into<String>, id: impl Into<String>) -> Self {
		Self {
			typename: typename.into(),
			id: id.into(),
		}
	}

	/// Shorthand for a `Post` key.
	pub fn post(id: impl Into<String>) -> Self {
		Self::new("Post", id)
	}

	/// Shorthand for a `Comment` key.
	pub fn comment(id: impl Into<String>) -> Self {
		Self::new("Comment", id)
	}

	/// Parses the `Typename:id` form.
	pub fn parse(s: &str) -> Option<Self> {
		let (typename, id) = s.split_once(':')?;
		if typename.is_empty() || id.is_empty() {
			return None;
		}
		Some(Self::new(typename, id))
	}

	/// Entity type name.
	pub fn typename(&self) -> &str {
		&self.typename
	}

	/// Entity id within its type.
	pub fn id(&self) -> &str {
		&self.id
	}

	/// Returns `true` for keys of locally created placeholders.
	pub fn is_placeholder(&self) -> bool {
		self.id.starts_with(PLACEHOLDER_PREFIX)
	}
}

impl fmt::Display for EntityKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.typename, self.id)
	}
}

impl FromStr for EntityKey {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s).ok_or_else(|| format!("invalid entity key {s:?}"))
	}
}

impl Serialize for EntityKey {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for EntityKey {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

/// An ordered list of entity keys rendered by a view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ListId {
	/// The main feed of all posts.
	Feed,
	/// Comments of the post with the given id.
	Comments(String),
}

impl ListId {
	/// Comment list of `post_id`.
	pub fn comments(post_id: impl Into<String>) -> Self {
		Self::Comments(post_id.into())
	}
}

impl fmt::Display for ListId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Feed => f.write_str("feed"),
			Self::Comments(post) => write!(f, "comments:{post}"),
		}
	}
}

/// Where a new key enters a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertAt {
	/// Before every existing entry.
	#[default]
	Front,
	/// After every existing entry.
	Back,
}
