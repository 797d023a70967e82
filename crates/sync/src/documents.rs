//! Query and mutation catalog of the newsfeed API.
//!
//! Every document selects `__typename` on entity objects so responses
//! normalize without hints.

use newsfeed_transport::Operation;
use serde_json::json;

const USER_FIELDS: &str = "__typename id username firstName lastName email";
const AUTHOR: &str = "author { __typename id username }";

fn post_selection() -> String {
	format!("__typename id title content {AUTHOR} createdAt updatedAt isAuthor likesCount commentsCount isLiked")
}

fn comment_selection() -> String {
	format!("__typename id content {AUTHOR} createdAt updatedAt isAuthor")
}

/// `allPosts`: the whole feed in server order.
pub fn all_posts() -> Operation {
	Operation::new(
		"GetAllPosts",
		format!("query GetAllPosts {{\n  allPosts {{ {} }}\n}}", post_selection()),
		"allPosts",
	)
}

/// `postComments(postId)`.
pub fn post_comments(post_id: &str) -> Operation {
	Operation::new(
		"GetPostComments",
		format!(
			"query GetPostComments($postId: ID!) {{\n  postComments(postId: $postId) {{ {} }}\n}}",
			comment_selection()
		),
		"postComments",
	)
	.variables(json!({ "postId": post_id }))
}

/// `me`: the signed-in user.
pub fn me() -> Operation {
	Operation::new("Me", format!("query Me {{\n  me {{ {USER_FIELDS} }}\n}}"), "me")
}

/// `likePost(postId)`.
pub fn like_post(post_id: &str) -> Operation {
	Operation::new(
		"LikePost",
		"mutation LikePost($postId: ID!) {\n  likePost(postId: $postId) { __typename id likesCount isLiked }\n}",
		"likePost",
	)
	.variables(json!({ "postId": post_id }))
}

/// `unlikePost(postId)`.
pub fn unlike_post(post_id: &str) -> Operation {
	Operation::new(
		"UnlikePost",
		"mutation UnlikePost($postId: ID!) {\n  unlikePost(postId: $postId) { __typename id likesCount isLiked }\n}",
		"unlikePost",
	)
	.variables(json!({ "postId": post_id }))
}

/// `createPost(input: {title, content})`.
pub fn create_post(title: &str, content: &str) -> Operation {
	Operation::new(
		"CreatePost",
		format!(
			"mutation CreatePost($input: CreatePostInput!) {{\n  createPost(input: $input) {{ {} }}\n}}",
			post_selection()
		),
		"createPost",
	)
	.variables(json!({ "input": { "title": title, "content": content } }))
}

/// `updatePost(id, input)`; absent inputs are left unchanged by the server.
pub fn update_post(id: &str, title: Option<&str>, content: Option<&str>) -> Operation {
	let mut input = serde_json::Map::new();
	if let Some(title) = title {
		input.insert("title".into(), json!(title));
	}
	if let Some(content) = content {
		input.insert("content".into(), json!(content));
	}
	Operation::new(
		"UpdatePost",
		"mutation UpdatePost($id: ID!, $input: UpdatePostInput!) {\n  updatePost(id: $id, input: $input) { __typename id title content updatedAt }\n}",
		"updatePost",
	)
	.variables(json!({ "id": id, "input": input }))
}

/// `deletePost(id)`.
pub fn delete_post(id: &str) -> Operation {
	Operation::new(
		"DeletePost",
		"mutation DeletePost($id: ID!) {\n  deletePost(id: $id) { __typename id }\n}",
		"deletePost",
	)
	.variables(json!({ "id": id }))
}

/// `createComment(input: {postId, content})`.
pub fn create_comment(post_id: &str, content: &str) -> Operation {
	Operation::new(
		"CreateComment",
		format!(
			"mutation CreateComment($input: CreateCommentInput!) {{\n  createComment(input: $input) {{ {} }}\n}}",
			comment_selection()
		),
		"createComment",
	)
	.variables(json!({ "input": { "postId": post_id, "content": content } }))
}

/// `updateComment(id, input: {content})`.
pub fn update_comment(id: &str, content: &str) -> Operation {
	Operation::new(
		"UpdateComment",
		"mutation UpdateComment($id: ID!, $input: UpdateCommentInput!) {\n  updateComment(id: $id, input: $input) { __typename id content updatedAt }\n}",
		"updateComment",
	)
	.variables(json!({ "id": id, "input": { "content": content } }))
}

/// `deleteComment(id)`.
pub fn delete_comment(id: &str) -> Operation {
	Operation::new(
		"DeleteComment",
		"mutation DeleteComment($id: ID!) {\n  deleteComment(id: $id) { __typename id }\n}",
		"deleteComment",
	)
	.variables(json!({ "id": id }))
}

/// `login(input: {username, password})`.
pub fn login(username: &str, password: &str) -> Operation {
	Operation::new(
		"Login",
		format!("mutation Login($input: LoginInput!) {{\n  login(input: $input) {{ token user {{ {USER_FIELDS} }} }}\n}}"),
		"login",
	)
	.variables(json!({ "input": { "username": username, "password": password } }))
}

/// Input of [`signup`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignupInput {
	/// Login name.
	pub username: String,
	/// Password.
	pub password: String,
	/// Email address.
	pub email: String,
	/// Given name.
	pub first_name: Option<String>,
	/// Family name.
	pub last_name: Option<String>,
}

/// `signup(input)`.
pub fn signup(input: &SignupInput) -> Operation {
	Operation::new(
		"Signup",
		format!("mutation Signup($input: SignupInput!) {{\n  signup(input: $input) {{ token user {{ {USER_FIELDS} }} }}\n}}"),
		"signup",
	)
	.variables(json!({
		"input": {
			"username": input.username,
			"password": input.password,
			"email": input.email,
			"firstName": input.first_name,
			"lastName": input.last_name,
		}
	}))
}
