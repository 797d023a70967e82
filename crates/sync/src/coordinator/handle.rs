use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use tokio::sync::oneshot;

use super::{MutationId, MutationOutcome};
use crate::{Error, Result};

pin_project! {
	/// Resolves to the outcome of a dispatched mutation.
	///
	/// The optimistic effects are already in the cache when the handle is
	/// returned. Dropping the handle does not cancel the network call; the
	/// mutation still commits or rolls back in the background.
	#[must_use = "dropping the handle discards the outcome, not the mutation"]
	pub struct MutationHandle {
		id: MutationId,
		#[pin]
		rx: oneshot::Receiver<Result<MutationOutcome>>,
	}
}

impl MutationHandle {
	pub(super) fn new(id: MutationId, rx: oneshot::Receiver<Result<MutationOutcome>>) -> Self {
		Self { id, rx }
	}

	/// Id of the mutation.
	pub fn id(&self) -> MutationId {
		self.id
	}
}

impl std::fmt::Debug for MutationHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MutationHandle").field("id", &self.id).finish()
	}
}

impl Future for MutationHandle {
	type Output = Result<MutationOutcome>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.project();
		match ready!(this.rx.poll(cx)) {
			Ok(result) => Poll::Ready(result),
			Err(_) => Poll::Ready(Err(Error::Aborted { id: *this.id })),
		}
	}
}
