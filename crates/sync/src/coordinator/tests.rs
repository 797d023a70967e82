use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use newsfeed_cache::{EntityKey, FieldPatch, Fields, InsertAt, ListId, ListProjection};
use newsfeed_transport::Operation;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use super::*;
use crate::documents;
use crate::testing::Fixture;

fn like() -> FieldPatch {
	FieldPatch::new().set("isLiked", true).add_count("likesCount", 1)
}

fn unlike() -> FieldPatch {
	FieldPatch::new().set("isLiked", false).add_count("likesCount", -1)
}

fn likes(fx: &Fixture, key: &EntityKey) -> (i64, bool) {
	let post = fx.cache.read(key).expect("post is cached");
	(
		post.get_i64("likesCount").expect("count"),
		post.get_bool("isLiked").expect("flag"),
	)
}

/// An edit whose name is unique so its reply can be scripted independently.
fn edit(name: &str) -> Operation {
	Operation::new(name, format!("mutation {name} {{ updatePost }}"), "updatePost")
}

#[test]
fn test_state_machine_only_moves_forward() {
	use MutationState::*;
	assert!(Dispatched.can_advance_to(Optimistic));
	assert!(Optimistic.can_advance_to(Committed));
	assert!(Optimistic.can_advance_to(RolledBack));
	assert!(!Dispatched.can_advance_to(Committed));
	assert!(!Committed.can_advance_to(RolledBack));
	assert!(!RolledBack.can_advance_to(Optimistic));
	assert!(Committed.is_terminal() && RolledBack.is_terminal());
	assert!(!Optimistic.is_terminal());
}

#[test]
fn test_placeholder_keys_are_unique() {
	let a = placeholder_key("Comment");
	let b = placeholder_key("Comment");
	assert!(a.is_placeholder());
	assert_eq!(a.typename(), "Comment");
	assert_ne!(a, b);
}

#[test]
fn test_mutation_submitted_off_runtime_settles_on_it() {
	let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 5, false);
	fx.server
		.reply("LikePost", json!({ "__typename": "Post", "id": "7", "likesCount": 6, "isLiked": true }));
	let coordinator = MutationCoordinator::with_runtime(fx.cache.clone(), fx.interceptor.clone(), runtime.handle().clone());

	let key = post.clone();
	let handle = std::thread::spawn(move || coordinator.dispatch(key, like(), documents::like_post("7")))
		.join()
		.unwrap();
	assert_eq!(likes(&fx, &post), (6, true));

	let outcome = runtime.block_on(handle).unwrap();
	assert_eq!(outcome.state, MutationState::Committed);
	assert_eq!(fx.server.calls("LikePost"), 1);
}

#[tokio::test]
async fn test_optimistic_patch_is_visible_before_response() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 5, false);
	let feed = ListProjection::new(fx.cache.clone(), ListId::Feed);
	let gate = fx
		.server
		.reply_gated("LikePost", json!({ "__typename": "Post", "id": "7", "likesCount": 6, "isLiked": true }));
	let coordinator = fx.coordinator();

	let handle = coordinator.dispatch(post.clone(), like(), documents::like_post("7"));

	assert_eq!(likes(&fx, &post), (6, true));
	let snapshot = feed.snapshot();
	assert_eq!(snapshot.items[0].get_i64("likesCount"), Some(6));
	assert_eq!(coordinator.state(handle.id()), Some(MutationState::Optimistic));
	assert_eq!(
		coordinator.pending(),
		vec![PendingMutation {
			id: handle.id(),
			operation: "LikePost".into(),
			state: MutationState::Optimistic,
		}]
	);

	gate.notify_one();
	let id = handle.id();
	let outcome = handle.await.expect("commit");
	assert_eq!(outcome.state, MutationState::Committed);
	assert_eq!(outcome.key, Some(post.clone()));
	assert!(outcome.conflicts.is_empty());
	assert_eq!(coordinator.state(id), None);
	assert!(coordinator.pending().is_empty());
}

#[tokio::test]
async fn test_server_values_win_over_the_guess() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 5, false);
	fx.server
		.reply("LikePost", json!({ "__typename": "Post", "id": "7", "likesCount": 5, "isLiked": true }));

	let outcome = fx
		.coordinator()
		.dispatch(post.clone(), like(), documents::like_post("7"))
		.await
		.expect("commit");

	assert_eq!(likes(&fx, &post), (5, true));
	assert_eq!(
		outcome.conflicts,
		vec![Conflict {
			key: post.clone(),
			field: "likesCount".into(),
			optimistic: Some(json!(6)),
			server: json!(5),
		}]
	);
	assert_eq!(outcome.conflicts[0].kind(), ErrorKind::ConflictOnCommit);
}

#[tokio::test]
async fn test_failure_restores_the_entity_exactly() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 5, false);
	let before = fx.cache.read(&post);
	fx.server.fail("LikePost", "Post matching query does not exist");

	let err = fx
		.coordinator()
		.dispatch(post.clone(), like(), documents::like_post("7"))
		.await
		.expect_err("server error");

	assert_eq!(err.kind(), ErrorKind::Application);
	assert_eq!(fx.cache.read(&post), before);
}

#[tokio::test]
async fn test_transport_failure_rolls_back() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 5, false);
	fx.server.fail_transport("LikePost");

	let err = fx
		.coordinator()
		.dispatch(post.clone(), like(), documents::like_post("7"))
		.await
		.expect_err("network down");

	assert_eq!(err.kind(), ErrorKind::Transport);
	assert_eq!(likes(&fx, &post), (5, false));
}

#[tokio::test]
async fn test_null_payload_rolls_back() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 5, false);
	fx.server.reply("LikePost", Value::Null);

	let err = fx
		.coordinator()
		.dispatch(post.clone(), like(), documents::like_post("7"))
		.await
		.expect_err("null result");

	assert!(matches!(err, Error::NullPayload { ref operation } if operation == "LikePost"));
	assert_eq!(likes(&fx, &post), (5, false));
}

#[tokio::test]
async fn test_interleaved_like_and_unlike_settle_on_server_state() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 5, false);
	// Someone else liked the post in the meantime.
	let liked = fx
		.server
		.reply_gated("LikePost", json!({ "__typename": "Post", "id": "7", "likesCount": 8, "isLiked": true }));
	let unliked = fx
		.server
		.reply_gated("UnlikePost", json!({ "__typename": "Post", "id": "7", "likesCount": 7, "isLiked": false }));
	let coordinator = fx.coordinator();

	let first = coordinator.dispatch(post.clone(), like(), documents::like_post("7"));
	assert_eq!(likes(&fx, &post), (6, true));
	let second = coordinator.dispatch(post.clone(), unlike(), documents::unlike_post("7"));
	assert_eq!(likes(&fx, &post), (5, false));
	assert_eq!(coordinator.inner.lanes.lock().depth(&post), 2);

	liked.notify_one();
	first.await.expect("like commits");
	// The unlike is still in flight and replays over the confirmed like.
	assert_eq!(likes(&fx, &post), (7, false));

	unliked.notify_one();
	second.await.expect("unlike commits");
	assert_eq!(likes(&fx, &post), (7, false));
	assert_eq!(coordinator.inner.lanes.lock().depth(&post), 0);
}

#[tokio::test]
async fn test_rollback_keeps_newer_in_flight_value() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 0, false);
	let first_fails = fx.server.fail_gated("EditA", "Permission denied");
	let second_fails = fx.server.fail_gated("EditB", "Permission denied");
	let coordinator = fx.coordinator();

	let first = coordinator.dispatch(post.clone(), FieldPatch::new().set("content", "A"), edit("EditA"));
	let second = coordinator.dispatch(post.clone(), FieldPatch::new().set("content", "B"), edit("EditB"));
	assert_eq!(fx.cache.read(&post).and_then(|p| p.get_str("content").map(str::to_owned)), Some("B".into()));

	first_fails.notify_one();
	first.await.expect_err("first fails");
	assert_eq!(fx.cache.read(&post).and_then(|p| p.get_str("content").map(str::to_owned)), Some("B".into()));

	second_fails.notify_one();
	second.await.expect_err("second fails");
	assert_eq!(fx.cache.read(&post).and_then(|p| p.get_str("content").map(str::to_owned)), Some("body".into()));
}

#[tokio::test]
async fn test_rollback_onto_deleted_entity_is_a_noop() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 5, false);
	let gate = fx.server.fail_gated("LikePost", "Post matching query does not exist");

	let handle = fx.coordinator().dispatch(post.clone(), like(), documents::like_post("7"));
	fx.cache.remove_entity(&post);
	gate.notify_one();
	handle.await.expect_err("server error");

	assert!(!fx.cache.contains(&post));
	assert!(fx.cache.list_keys(&ListId::Feed).is_empty());
}

#[tokio::test]
async fn test_commit_does_not_resurrect_deleted_entity() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 5, false);
	let gate = fx
		.server
		.reply_gated("LikePost", json!({ "__typename": "Post", "id": "7", "likesCount": 6, "isLiked": true }));

	let handle = fx.coordinator().dispatch(post.clone(), like(), documents::like_post("7"));
	fx.cache.evict(&post);
	gate.notify_one();
	handle.await.expect("commit");

	assert!(!fx.cache.contains(&post));
}

#[tokio::test]
async fn test_rollback_evicts_entity_the_patch_created() {
	let fx = Fixture::signed_in();
	let ghost = EntityKey::post("404");
	fx.server.fail("LikePost", "Post matching query does not exist");

	fx.coordinator()
		.dispatch(ghost.clone(), like(), documents::like_post("404"))
		.await
		.expect_err("server error");

	assert!(!fx.cache.contains(&ghost));
}

fn comment_fields(content: &str) -> Fields {
	let mut fields = Fields::new();
	fields.insert("content".into(), json!(content));
	fields.insert("isAuthor".into(), json!(true));
	fields
}

fn create_comment_plan(post: &EntityKey, placeholder: &EntityKey, content: &str) -> MutationPlan {
	MutationPlan::new(documents::create_comment(post.id(), content))
		.insert(
			ListId::comments(post.id()),
			placeholder.clone(),
			comment_fields(content),
			InsertAt::Front,
		)
		.patch(post.clone(), FieldPatch::new().add_count("commentsCount", 1))
		.reconcile(Reconcile::Replace {
			placeholder: placeholder.clone(),
		})
}

#[tokio::test]
async fn test_placeholder_is_replaced_by_server_identity() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 0, false);
	let older = fx
		.cache
		.write_result(&json!({ "__typename": "Comment", "id": "C1", "content": "first" }), None)
		.expect("identity");
	fx.cache.set_list(ListId::comments("7"), [older.clone()]);
	let comments = ListProjection::new(fx.cache.clone(), ListId::comments("7"));

	let gate = fx.server.reply_gated(
		"CreateComment",
		json!({
			"__typename": "Comment",
			"id": "C7",
			"content": "hello",
			"author": { "__typename": "User", "id": "3", "username": "ada" },
			"isAuthor": true,
		}),
	);
	let placeholder = placeholder_key("Comment");
	let handle = fx.coordinator().submit(create_comment_plan(&post, &placeholder, "hello"));

	let pending = comments.snapshot();
	assert_eq!(pending.len(), 2);
	assert_eq!(pending.items[0].key, placeholder);
	assert_eq!(fx.cache.read(&post).and_then(|p| p.get_i64("commentsCount")), Some(1));

	gate.notify_one();
	let outcome = handle.await.expect("commit");
	let committed = EntityKey::comment("C7");
	assert_eq!(outcome.key, Some(committed.clone()));

	let keys: Vec<_> = comments.snapshot().items.into_iter().map(|e| e.key).collect();
	assert_eq!(keys, vec![committed.clone(), older]);
	assert!(!fx.cache.contains(&placeholder));
	assert!(fx.cache.contains(&EntityKey::new("User", "3")));
	assert_eq!(fx.cache.read(&post).and_then(|p| p.get_i64("commentsCount")), Some(1));
}

#[tokio::test]
async fn test_failed_insert_removes_placeholder() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 0, false);
	fx.server.fail("CreateComment", "Content cannot be empty");
	let placeholder = placeholder_key("Comment");

	fx.coordinator()
		.submit(create_comment_plan(&post, &placeholder, "hello"))
		.await
		.expect_err("server error");

	assert!(!fx.cache.contains(&placeholder));
	assert!(fx.cache.list_keys(&ListId::comments("7")).is_empty());
	assert_eq!(fx.cache.read(&post).and_then(|p| p.get_i64("commentsCount")), Some(0));
}

#[tokio::test]
async fn test_failed_removal_restores_entity_and_position() {
	let fx = Fixture::signed_in();
	let keys: Vec<_> = ["1", "2", "3"].into_iter().map(|id| fx.seed_post(id, 0, false)).collect();
	let before = fx.cache.read(&keys[1]);
	let gate = fx.server.fail_gated("DeletePost", "Permission denied");

	let handle = fx
		.coordinator()
		.submit(MutationPlan::new(documents::delete_post("2")).remove(keys[1].clone()));
	assert_eq!(fx.cache.list_keys(&ListId::Feed), vec![keys[0].clone(), keys[2].clone()]);
	assert!(!fx.cache.contains(&keys[1]));

	gate.notify_one();
	handle.await.expect_err("server error");

	assert_eq!(fx.cache.list_keys(&ListId::Feed), keys);
	assert_eq!(fx.cache.read(&keys[1]), before);
}

#[tokio::test]
async fn test_failed_removal_does_not_restore_a_rolled_back_like() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 5, false);
	let like_fails = fx.server.fail_gated("LikePost", "Permission denied");
	let delete_fails = fx.server.fail_gated("DeletePost", "Permission denied");
	let coordinator = fx.coordinator();

	let liking = coordinator.dispatch(post.clone(), like(), documents::like_post("7"));
	let deleting = coordinator.submit(MutationPlan::new(documents::delete_post("7")).remove(post.clone()));
	assert!(!fx.cache.contains(&post));

	like_fails.notify_one();
	liking.await.expect_err("server error");
	assert!(!fx.cache.contains(&post));

	delete_fails.notify_one();
	deleting.await.expect_err("server error");

	assert_eq!(likes(&fx, &post), (5, false));
	assert_eq!(fx.cache.list_keys(&ListId::Feed), vec![post]);
}

#[tokio::test]
async fn test_failed_removal_keeps_server_values_of_a_committed_like() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 5, false);
	let like_lands = fx
		.server
		.reply_gated("LikePost", json!({ "__typename": "Post", "id": "7", "likesCount": 9, "isLiked": true }));
	let delete_fails = fx.server.fail_gated("DeletePost", "Permission denied");
	let coordinator = fx.coordinator();

	let liking = coordinator.dispatch(post.clone(), like(), documents::like_post("7"));
	let deleting = coordinator.submit(MutationPlan::new(documents::delete_post("7")).remove(post.clone()));

	like_lands.notify_one();
	liking.await.expect("commit");
	assert!(!fx.cache.contains(&post));

	delete_fails.notify_one();
	deleting.await.expect_err("server error");

	assert_eq!(likes(&fx, &post), (9, true));
}

#[tokio::test]
async fn test_failed_removal_keeps_like_still_in_flight() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 5, false);
	let like_fails = fx.server.fail_gated("LikePost", "Permission denied");
	fx.server.fail("DeletePost", "Permission denied");
	let coordinator = fx.coordinator();

	let liking = coordinator.dispatch(post.clone(), like(), documents::like_post("7"));
	coordinator
		.submit(MutationPlan::new(documents::delete_post("7")).remove(post.clone()))
		.await
		.expect_err("server error");
	assert_eq!(likes(&fx, &post), (6, true));

	like_fails.notify_one();
	liking.await.expect_err("server error");
	assert_eq!(likes(&fx, &post), (5, false));
}

#[tokio::test]
async fn test_dropped_handle_still_settles() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 5, false);
	fx.server
		.reply("LikePost", json!({ "__typename": "Post", "id": "7", "likesCount": 42, "isLiked": true }));
	let coordinator = fx.coordinator();

	drop(coordinator.dispatch(post.clone(), like(), documents::like_post("7")));
	for _ in 0..100 {
		if coordinator.pending().is_empty() {
			break;
		}
		tokio::task::yield_now().await;
	}

	assert!(coordinator.pending().is_empty());
	assert_eq!(likes(&fx, &post), (42, true));
}

struct Recorder {
	settled: Mutex<Vec<(MutationId, bool)>>,
}

impl MutationObserver for Recorder {
	fn settled(&self, id: MutationId, result: &Result<MutationOutcome>) {
		self.settled.lock().push((id, result.is_ok()));
	}
}

struct Counter(Arc<AtomicUsize>);

impl MutationObserver for Counter {
	fn settled(&self, _: MutationId, _: &Result<MutationOutcome>) {
		self.0.fetch_add(1, Ordering::SeqCst);
	}
}

#[tokio::test]
async fn test_observer_is_notified_only_while_alive() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 5, false);
	fx.server.fail("LikePost", "Post matching query does not exist");
	fx.server.fail("UnlikePost", "Post matching query does not exist");
	let coordinator = fx.coordinator();

	let live = Arc::new(Recorder {
		settled: Mutex::new(Vec::new()),
	});
	let weak: Weak<dyn MutationObserver> = Arc::downgrade(&live) as Weak<dyn MutationObserver>;
	let handle = coordinator.dispatch_observed(post.clone(), like(), documents::like_post("7"), weak);
	let id = handle.id();
	handle.await.expect_err("server error");
	assert_eq!(*live.settled.lock(), vec![(id, false)]);

	let calls = Arc::new(AtomicUsize::new(0));
	let gone = Arc::new(Counter(calls.clone()));
	let weak: Weak<dyn MutationObserver> = Arc::downgrade(&gone) as Weak<dyn MutationObserver>;
	drop(gone);
	coordinator
		.dispatch_observed(post.clone(), unlike(), documents::unlike_post("7"), weak)
		.await
		.expect_err("server error");
	assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_expired_token_is_refreshed_and_mutation_commits() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 5, false);
	fx.server.accept_token("t2");
	fx.server.reply("RefreshToken", json!("t2"));
	fx.server
		.reply("LikePost", json!({ "__typename": "Post", "id": "7", "likesCount": 6, "isLiked": true }));

	fx.coordinator()
		.dispatch(post.clone(), like(), documents::like_post("7"))
		.await
		.expect("commit after refresh");

	assert_eq!(fx.interceptor.refresh_calls(), 1);
	assert_eq!(fx.session.token().as_deref(), Some("t2"));
	assert_eq!(likes(&fx, &post), (6, true));
}

#[tokio::test]
async fn test_signed_out_rejection_skips_refresh() {
	let fx = Fixture::signed_in();
	let post = fx.seed_post("7", 5, false);
	fx.session.clear().expect("memory store");

	let err = fx
		.coordinator()
		.dispatch(post.clone(), like(), documents::like_post("7"))
		.await
		.expect_err("rejected");

	assert_eq!(err.kind(), ErrorKind::AuthExpired);
	assert_eq!(fx.interceptor.refresh_calls(), 0);
	assert_eq!(fx.server.calls("RefreshToken"), 0);
	assert_eq!(fx.server.seen().last().map(|s| s.authorization.clone()), Some(None));
	assert_eq!(likes(&fx, &post), (5, false));
}
