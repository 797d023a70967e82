//! The newsfeed client facade.
//!
//! [`NewsFeed`] wires the session, the authenticated pipeline, the cache and
//! the mutation coordinator together and exposes the feed's queries and
//! mutations. Inputs are validated locally; a rejected input never reaches
//! the network.

use std::sync::Arc;

use newsfeed_cache::{EntityKey, FieldPatch, Fields, InsertAt, ListId, ListProjection, NormalizedCache, reference_to};
use newsfeed_session::{CredentialStore, FileKvStore, KvStore, MemoryKvStore, Session, UserProfile};
use newsfeed_transport::{AuthInterceptor, Operation, OperationRefresh, Transport};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::coordinator::{MutationCoordinator, MutationHandle, MutationPlan, Reconcile, placeholder_key};
use crate::{Error, FeedConfig, Result, documents};

mod account;

/// Client-side state and operations of one signed-in (or anonymous) user.
///
/// Mutations are sent on the Tokio runtime the facade was built on, so the
/// synchronous mutation methods work from any thread. Cheap to clone; clones
/// share state.
#[derive(Debug, Clone)]
pub struct NewsFeed {
	session: Session,
	interceptor: Arc<AuthInterceptor>,
	cache: Arc<NormalizedCache>,
	coordinator: MutationCoordinator,
}

impl NewsFeed {
	/// Creates a facade over an existing pipeline and cache.
	///
	/// # Panics
	///
	/// Panics when called outside a Tokio runtime.
	pub fn new(interceptor: Arc<AuthInterceptor>, cache: Arc<NormalizedCache>) -> Self {
		let session = interceptor.session().clone();
		let coordinator = MutationCoordinator::new(cache.clone(), interceptor.clone());
		Self {
			session,
			interceptor,
			cache,
			coordinator,
		}
	}

	/// Builds the whole stack from `config` on top of `transport`.
	///
	/// The session is persisted under [`FeedConfig::storage_dir`]; without a
	/// storage directory it lives in memory only. Panics when called outside
	/// a Tokio runtime.
	pub fn from_config(config: &FeedConfig, transport: Arc<dyn Transport>) -> Result<Self> {
		let kv: Arc<dyn KvStore> = match config.storage_dir() {
			Some(dir) => Arc::new(FileKvStore::open(dir)?),
			None => {
				warn!("session.storage.memory_only");
				Arc::new(MemoryKvStore::new())
			}
		};
		let session = Arc::new(CredentialStore::open_with_ttl(kv, config.token_ttl_days)?);
		let interceptor = AuthInterceptor::new(transport.clone(), Arc::new(OperationRefresh::new(transport)), session)
			.with_policy(config.auth.clone())
			.with_scheme(config.auth_scheme.clone());
		Ok(Self::new(Arc::new(interceptor), Arc::new(NormalizedCache::new())))
	}

	/// The session credentials are read from.
	pub fn session(&self) -> &Session {
		&self.session
	}

	/// The normalized cache.
	pub fn cache(&self) -> &Arc<NormalizedCache> {
		&self.cache
	}

	/// The mutation coordinator.
	pub fn coordinator(&self) -> &MutationCoordinator {
		&self.coordinator
	}

	/// The authenticated pipeline.
	pub fn interceptor(&self) -> &Arc<AuthInterceptor> {
		&self.interceptor
	}

	/// View of the main feed.
	pub fn feed(&self) -> ListProjection {
		ListProjection::new(self.cache.clone(), ListId::Feed)
	}

	/// View of the comments of `post_id`.
	pub fn comments(&self, post_id: &str) -> ListProjection {
		ListProjection::new(self.cache.clone(), ListId::comments(post_id))
	}

	/// Sends a query; a response without a `data` object is a failure, a
	/// `null` root field is not.
	async fn query(&self, operation: &Operation) -> Result<Option<Value>> {
		let response = self.interceptor.send(operation).await?;
		if response.data.is_none() {
			return Err(Error::NullPayload {
				operation: operation.name.clone(),
			});
		}
		Ok(response.root(operation).cloned())
	}

	/// Fetches every post and replaces the feed with them, in server order.
	pub async fn load_feed(&self) -> Result<Vec<EntityKey>> {
		let operation = documents::all_posts();
		let posts = self.query(&operation).await?.unwrap_or_else(|| json!([]));
		let keys = self.cache.write_results(&posts, Some("Post"))?;
		self.cache.set_list(ListId::Feed, keys.clone());
		info!(posts = keys.len(), "feed.loaded");
		Ok(keys)
	}

	/// Fetches the comments of `post_id` and replaces its comment list.
	pub async fn load_comments(&self, post_id: &str) -> Result<Vec<EntityKey>> {
		let operation = documents::post_comments(post_id);
		let comments = self.query(&operation).await?.unwrap_or_else(|| json!([]));
		let keys = self.cache.write_results(&comments, Some("Comment"))?;
		self.cache.set_list(ListId::comments(post_id), keys.clone());
		debug!(post = post_id, comments = keys.len(), "feed.comments_loaded");
		Ok(keys)
	}

	/// Fetches the signed-in user; `None` when the server knows no user.
	pub async fn me(&self) -> Result<Option<EntityKey>> {
		let operation = documents::me();
		match self.query(&operation).await? {
			Some(user) => Ok(Some(self.cache.write_result(&user, Some("User"))?)),
			None => Ok(None),
		}
	}

	fn signed_in(&self, action: &str) -> Result<UserProfile> {
		self.session
			.user()
			.ok_or_else(|| Error::invalid(format!("sign in to {action}")))
	}

	/// Likes `post_id`, or unlikes it if the cached post is liked.
	///
	/// The cached `isLiked` flips and `likesCount` moves by one (never below
	/// zero) before the call returns.
	pub fn toggle_like(&self, post_id: &str) -> Result<MutationHandle> {
		self.signed_in("like posts")?;
		let key = EntityKey::post(post_id);
		let liked = self
			.cache
			.read_fragment(&key, &["isLiked"])
			.and_then(|post| post.get_bool("isLiked"))
			.unwrap_or(false);
		let (delta, operation) = if liked {
			(-1, documents::unlike_post(post_id))
		} else {
			(1, documents::like_post(post_id))
		};
		let patch = FieldPatch::new().set("isLiked", !liked).add_count("likesCount", delta);
		Ok(self.coordinator.dispatch(key, patch, operation))
	}

	/// Publishes a post; a placeholder heads the feed until the server answers.
	pub fn create_post(&self, title: &str, content: &str) -> Result<MutationHandle> {
		let title = non_blank("title", title)?;
		let content = non_blank("content", content)?;
		let author = self.signed_in("post")?;

		let placeholder = placeholder_key("Post");
		let mut fields = self.authored(&author, content);
		fields.insert("title".into(), json!(title));
		fields.insert("likesCount".into(), json!(0));
		fields.insert("commentsCount".into(), json!(0));
		fields.insert("isLiked".into(), json!(false));

		let plan = MutationPlan::new(documents::create_post(title, content))
			.insert(ListId::Feed, placeholder.clone(), fields, InsertAt::Front)
			.reconcile(Reconcile::Replace { placeholder });
		Ok(self.coordinator.submit(plan))
	}

	/// Edits a post; fields passed as `None` are left unchanged.
	pub fn update_post(&self, post_id: &str, title: Option<&str>, content: Option<&str>) -> Result<MutationHandle> {
		let title = title.map(|t| non_blank("title", t)).transpose()?;
		let content = content.map(|c| non_blank("content", c)).transpose()?;
		let mut patch = FieldPatch::new();
		if let Some(title) = title {
			patch = patch.set("title", title);
		}
		if let Some(content) = content {
			patch = patch.set("content", content);
		}
		if patch.is_empty() {
			return Err(Error::invalid("nothing to update"));
		}
		Ok(self.coordinator.dispatch(
			EntityKey::post(post_id),
			patch,
			documents::update_post(post_id, title, content),
		))
	}

	/// Deletes a post and drops it from every list.
	pub fn delete_post(&self, post_id: &str) -> Result<MutationHandle> {
		self.signed_in("delete posts")?;
		let plan = MutationPlan::new(documents::delete_post(post_id)).remove(EntityKey::post(post_id));
		Ok(self.coordinator.submit(plan))
	}

	/// Comments on `post_id`; a placeholder heads its comment list until the
	/// server answers.
	pub fn create_comment(&self, post_id: &str, content: &str) -> Result<MutationHandle> {
		let content = non_blank("comment", content)?;
		let author = self.signed_in("comment")?;

		let placeholder = placeholder_key("Comment");
		let plan = MutationPlan::new(documents::create_comment(post_id, content))
			.insert(
				ListId::comments(post_id),
				placeholder.clone(),
				self.authored(&author, content),
				InsertAt::Front,
			)
			.patch(EntityKey::post(post_id), FieldPatch::new().add_count("commentsCount", 1))
			.reconcile(Reconcile::Replace { placeholder });
		Ok(self.coordinator.submit(plan))
	}

	/// Edits a comment.
	pub fn update_comment(&self, comment_id: &str, content: &str) -> Result<MutationHandle> {
		let content = non_blank("comment", content)?;
		Ok(self.coordinator.dispatch(
			EntityKey::comment(comment_id),
			FieldPatch::new().set("content", content),
			documents::update_comment(comment_id, content),
		))
	}

	/// Deletes a comment of `post_id`.
	pub fn delete_comment(&self, post_id: &str, comment_id: &str) -> Result<MutationHandle> {
		self.signed_in("delete comments")?;
		let plan = MutationPlan::new(documents::delete_comment(comment_id))
			.remove(EntityKey::comment(comment_id))
			.patch(EntityKey::post(post_id), FieldPatch::new().add_count("commentsCount", -1));
		Ok(self.coordinator.submit(plan))
	}

	/// Placeholder fields shared by posts and comments of `author`.
	fn authored(&self, author: &UserProfile, content: &str) -> Fields {
		let user = EntityKey::new("User", author.id.as_str());
		if !self.cache.contains(&user) {
			let mut fields = Fields::new();
			fields.insert("username".into(), json!(author.username));
			self.cache.write_fragment(&user, fields);
		}
		let mut fields = Fields::new();
		fields.insert("content".into(), json!(content));
		fields.insert("author".into(), reference_to(&user));
		fields.insert("isAuthor".into(), json!(true));
		fields
	}
}

fn non_blank<'a>(what: &str, value: &'a str) -> Result<&'a str> {
	if value.trim().is_empty() {
		return Err(Error::invalid(format!("{what} cannot be empty")));
	}
	Ok(value)
}
