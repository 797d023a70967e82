//! Optimistic synchronization between the newsfeed UI and its API.
//!
//! * [`MutationCoordinator`]: applies optimistic effects to the cache, sends
//!   the operation through the authenticated pipeline, then commits the
//!   server's values or rolls the effects back
//! * [`NewsFeed`]: the client facade (queries, feed mutations, account)
//! * [`documents`]: the operation catalog of the newsfeed API
//! * [`FeedConfig`]: TOML configuration
//!
//! # Example
//!
//! ```no_run
//! # async fn demo(feed: newsfeed_sync::NewsFeed) -> newsfeed_sync::Result<()> {
//! feed.load_feed().await?;
//! let like = feed.toggle_like("7")?; // the feed already shows the like
//! like.await?; // committed with the server's count
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod coordinator;
pub mod documents;
mod error;
mod feed;

#[cfg(test)]
mod testing;

pub use config::FeedConfig;
pub use coordinator::{
	Conflict, Effect, MutationCoordinator, MutationHandle, MutationId, MutationObserver, MutationOutcome, MutationPlan,
	MutationState, PendingMutation, Reconcile, placeholder_key,
};
pub use documents::SignupInput;
pub use error::{Error, ErrorKind, Result};
pub use feed::NewsFeed;
