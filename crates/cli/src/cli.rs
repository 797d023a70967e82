//! CLI schema of the newsfeed binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "newsfeed")]
#[command(about = "Read and write the newsfeed from the terminal")]
#[command(version)]
/// Command-line arguments.
pub struct Cli {
	/// Config file (defaults to <config dir>/newsfeed/config.toml)
	#[arg(short, long, value_name = "PATH")]
	pub config: Option<PathBuf>,

	/// API endpoint, overriding the config file
	#[arg(long, value_name = "URL")]
	pub endpoint: Option<String>,

	/// Print entities as JSON
	#[arg(long)]
	pub json: bool,

	/// Verbose logging
	#[arg(short, long)]
	pub verbose: bool,

	/// Subcommand to execute.
	#[command(subcommand)]
	pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
	/// Sign in and remember the session
	Login {
		/// Login name.
		username: String,
		/// Password (read from NEWSFEED_PASSWORD when omitted)
		#[arg(long, env = "NEWSFEED_PASSWORD", hide_env_values = true)]
		password: String,
	},
	/// Forget the stored session
	Logout,
	/// Show the signed-in user
	Whoami,
	/// Renew the stored token
	Refresh,
	/// List all posts
	Feed,
	/// List the comments of a post
	Comments {
		/// Post id.
		post: String,
	},
	/// Like a post, or unlike it if already liked
	Like {
		/// Post id.
		post: String,
	},
	/// Publish a post
	Post {
		/// Title.
		title: String,
		/// Body.
		content: String,
	},
	/// Comment on a post
	Comment {
		/// Post id.
		post: String,
		/// Comment text.
		content: String,
	},
	/// Delete one of your posts
	DeletePost {
		/// Post id.
		post: String,
	},
}
