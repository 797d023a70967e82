//! Newsfeed command-line client.
//!
//! Each invocation builds the client stack from the config file, runs one
//! command against the HTTP API and waits for any mutation to settle.

mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command};
use newsfeed_cache::Entity;
use newsfeed_sync::{FeedConfig, MutationHandle, NewsFeed};
use newsfeed_transport::HttpTransport;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	setup_tracing(cli.verbose);

	let mut config = load_config(&cli)?;
	if let Some(endpoint) = cli.endpoint.clone() {
		config.endpoint = endpoint;
	}
	debug!(endpoint = %config.endpoint, "cli.config");

	let transport = HttpTransport::new(config.endpoint.clone(), config.request_timeout())?;
	let feed = NewsFeed::from_config(&config, Arc::new(transport))?;
	run(&feed, cli.command, cli.json).await
}

fn load_config(cli: &Cli) -> anyhow::Result<FeedConfig> {
	if let Some(path) = &cli.config {
		return FeedConfig::load(path).with_context(|| format!("loading {}", path.display()));
	}
	match FeedConfig::default_path() {
		Some(path) if path.exists() => FeedConfig::load(&path).with_context(|| format!("loading {}", path.display())),
		_ => Ok(FeedConfig::default()),
	}
}

async fn run(feed: &NewsFeed, command: Command, json: bool) -> anyhow::Result<()> {
	match command {
		Command::Login { username, password } => {
			let user = feed.login(&username, &password).await?;
			println!("signed in as {}", user.username);
		}
		Command::Logout => {
			feed.logout()?;
			println!("signed out");
		}
		Command::Whoami => match feed.session().user() {
			Some(user) => println!("{} (id {})", user.username, user.id),
			None => println!("not signed in"),
		},
		Command::Refresh => {
			feed.refresh_token().await?;
			println!("token renewed");
		}
		Command::Feed => {
			feed.load_feed().await?;
			print_list(&feed.feed().snapshot().items, json)?;
		}
		Command::Comments { post } => {
			feed.load_comments(&post).await?;
			print_list(&feed.comments(&post).snapshot().items, json)?;
		}
		Command::Like { post } => {
			// The cached flag decides between like and unlike.
			feed.load_feed().await?;
			settle(feed.toggle_like(&post)?).await?;
		}
		Command::Post { title, content } => settle(feed.create_post(&title, &content)?).await?,
		Command::Comment { post, content } => settle(feed.create_comment(&post, &content)?).await?,
		Command::DeletePost { post } => settle(feed.delete_post(&post)?).await?,
	}
	Ok(())
}

async fn settle(handle: MutationHandle) -> anyhow::Result<()> {
	let outcome = handle.await?;
	for conflict in &outcome.conflicts {
		debug!(key = %conflict.key, field = %conflict.field, "cli.conflict");
	}
	match &outcome.key {
		Some(key) => println!("{} ok: {key}", outcome.operation),
		None => println!("{} ok", outcome.operation),
	}
	info!(mutation = outcome.id, "cli.settled");
	Ok(())
}

fn print_list(items: &[Entity], json: bool) -> anyhow::Result<()> {
	for item in items {
		if json {
			println!("{}", serde_json::to_string(&item.to_value())?);
			continue;
		}
		let author = item
			.get("author")
			.and_then(|a| a.get("username"))
			.and_then(|u| u.as_str())
			.unwrap_or("?");
		let text = item.get_str("title").or_else(|| item.get_str("content")).unwrap_or("");
		let mut line = format!("{:>6}  {author}: {text}", item.key.id());
		if let Some(likes) = item.get_i64("likesCount") {
			let heart = if item.get_bool("isLiked").unwrap_or(false) { "♥" } else { "♡" };
			line.push_str(&format!("  {heart} {likes}"));
		}
		if let Some(comments) = item.get_i64("commentsCount") {
			line.push_str(&format!("  💬 {comments}"));
		}
		println!("{line}");
	}
	Ok(())
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_env("NEWSFEED_LOG").unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("newsfeed=debug")
		} else {
			EnvFilter::new("newsfeed=info")
		}
	});
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();
}
