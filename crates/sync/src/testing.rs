//! Scripted API server and fixtures shared by the sync tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use newsfeed_cache::{EntityKey, ListId, NormalizedCache};
use newsfeed_session::{Credential, CredentialStore, KvStore, MemoryKvStore, Session, UserProfile};
use newsfeed_transport::{ApiError, AuthInterceptor, Headers, Operation, OperationRefresh, Response, Transport, TransportError};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value, json};
use tokio::sync::Notify;

use crate::MutationCoordinator;

/// Operations the server answers without a credential.
const PUBLIC: &[&str] = &["GetAllPosts", "GetPostComments", "Login", "Signup", "RefreshToken"];

enum Answer {
	Data(Value),
	Errors(Vec<ApiError>),
	Transport(TransportError),
	Empty,
}

struct Reply {
	answer: Answer,
	gate: Option<Arc<Notify>>,
}

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub(crate) struct Seen {
	pub name: String,
	pub authorization: Option<String>,
	pub variables: Value,
}

/// Answers operations from per-name FIFO scripts.
///
/// Protected operations carrying anything but `JWT <accepted>` are rejected
/// with "Not authenticated" without consuming a scripted reply.
#[derive(Default)]
pub(crate) struct MockServer {
	accepted: Mutex<Option<String>>,
	replies: Mutex<FxHashMap<String, VecDeque<Reply>>>,
	seen: Mutex<Vec<Seen>>,
}

impl MockServer {
	pub(crate) fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub(crate) fn accept_token(&self, token: &str) {
		*self.accepted.lock() = Some(token.to_owned());
	}

	fn push(&self, operation: &str, answer: Answer, gate: Option<Arc<Notify>>) {
		self.replies
			.lock()
			.entry(operation.to_owned())
			.or_default()
			.push_back(Reply { answer, gate });
	}

	/// Scripts a result payload for the next `operation`.
	pub(crate) fn reply(&self, operation: &str, payload: Value) {
		self.push(operation, Answer::Data(payload), None);
	}

	/// Scripts a payload that is only returned once the gate is notified.
	pub(crate) fn reply_gated(&self, operation: &str, payload: Value) -> Arc<Notify> {
		let gate = Arc::new(Notify::new());
		self.push(operation, Answer::Data(payload), Some(gate.clone()));
		gate
	}

	/// Scripts an application error for the next `operation`.
	pub(crate) fn fail(&self, operation: &str, message: &str) {
		self.push(operation, Answer::Errors(vec![ApiError::new(message)]), None);
	}

	/// Scripts a gated application error.
	pub(crate) fn fail_gated(&self, operation: &str, message: &str) -> Arc<Notify> {
		let gate = Arc::new(Notify::new());
		self.push(operation, Answer::Errors(vec![ApiError::new(message)]), Some(gate.clone()));
		gate
	}

	/// Scripts a network failure for the next `operation`.
	pub(crate) fn fail_transport(&self, operation: &str) {
		self.push(operation, Answer::Transport(TransportError::Connect("connection refused".into())), None);
	}

	/// Scripts a response with neither data nor errors.
	pub(crate) fn reply_empty(&self, operation: &str) {
		self.push(operation, Answer::Empty, None);
	}

	pub(crate) fn seen(&self) -> Vec<Seen> {
		self.seen.lock().clone()
	}

	pub(crate) fn calls(&self, operation: &str) -> usize {
		self.seen.lock().iter().filter(|s| s.name == operation).count()
	}
}

#[async_trait]
impl Transport for MockServer {
	async fn execute(&self, operation: &Operation, headers: &Headers) -> Result<Response, TransportError> {
		self.seen.lock().push(Seen {
			name: operation.name.clone(),
			authorization: headers.authorization().map(str::to_owned),
			variables: operation.variables.clone(),
		});

		let accepted = self.accepted.lock().clone();
		if !PUBLIC.contains(&operation.name.as_str())
			&& let Some(token) = accepted
			&& headers.authorization() != Some(format!("JWT {token}").as_str())
		{
			return Ok(Response::failed(vec![ApiError::new("Not authenticated")]));
		}

		let reply = self.replies.lock().get_mut(&operation.name).and_then(VecDeque::pop_front);
		let Some(reply) = reply else {
			return Ok(Response::failed(vec![ApiError::new(format!("no reply scripted for {}", operation.name))]));
		};
		if let Some(gate) = &reply.gate {
			gate.notified().await;
		}
		match reply.answer {
			Answer::Data(payload) => {
				let mut data = Map::new();
				data.insert(operation.root_field.clone(), payload);
				Ok(Response::ok(Value::Object(data)))
			}
			Answer::Errors(errors) => Ok(Response::failed(errors)),
			Answer::Transport(err) => Err(err),
			Answer::Empty => Ok(Response::default()),
		}
	}
}

pub(crate) fn user() -> UserProfile {
	UserProfile::new("3", "ada")
}

/// Server, signed-in session and pipeline wired together.
pub(crate) struct Fixture {
	pub server: Arc<MockServer>,
	pub kv: Arc<MemoryKvStore>,
	pub session: Session,
	pub cache: Arc<NormalizedCache>,
	pub interceptor: Arc<AuthInterceptor>,
}

impl Fixture {
	/// Signed in as [`user`] with token `t1`, which the server accepts.
	pub(crate) fn signed_in() -> Self {
		let fixture = Self::signed_out();
		fixture.server.accept_token("t1");
		fixture
			.session
			.set(Credential::new("t1", user()))
			.expect("memory store cannot fail");
		fixture
	}

	pub(crate) fn signed_out() -> Self {
		let server = MockServer::new();
		let kv = Arc::new(MemoryKvStore::new());
		let session = CredentialStore::shared(kv.clone() as Arc<dyn KvStore>).expect("memory store cannot fail");
		let interceptor = Arc::new(AuthInterceptor::new(
			server.clone(),
			Arc::new(OperationRefresh::new(server.clone())),
			session.clone(),
		));
		Self {
			server,
			kv,
			session,
			cache: Arc::new(NormalizedCache::new()),
			interceptor,
		}
	}

	pub(crate) fn coordinator(&self) -> MutationCoordinator {
		MutationCoordinator::new(self.cache.clone(), self.interceptor.clone())
	}

	/// Caches post `id` and puts it in the feed.
	pub(crate) fn seed_post(&self, id: &str, likes: i64, liked: bool) -> EntityKey {
		let key = self
			.cache
			.write_result(
				&json!({
					"__typename": "Post",
					"id": id,
					"title": format!("post {id}"),
					"content": "body",
					"author": { "__typename": "User", "id": "3", "username": "ada" },
					"likesCount": likes,
					"commentsCount": 0,
					"isLiked": liked,
				}),
				None,
			)
			.expect("seed payload has an identity");
		let mut feed = self.cache.list_keys(&ListId::Feed);
		feed.push(key.clone());
		self.cache.set_list(ListId::Feed, feed);
		key
	}
}
