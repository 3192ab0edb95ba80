// Pending-callback record owned by the correlation table until a peer (or the
// launcher's cleanup path) consumes it.

use anyhow::Result;

use crate::outcome::Outcome;
use crate::peer::PeerContext;

/// Runs against the freshly created peer to start the operation it exists for.
pub type SetupAction = Box<dyn FnOnce(&PeerContext) -> Result<()> + Send>;

/// Receives the outcome of the exchange. Called exactly once.
pub type CompletionHandler = Box<dyn FnOnce(Outcome) + Send>;

pub struct PendingCallback {
    setup: SetupAction,
    completion: CompletionHandler,
}

impl PendingCallback {
    pub fn new<S, C>(setup: S, completion: C) -> Self
    where
        S: FnOnce(&PeerContext) -> Result<()> + Send + 'static,
        C: FnOnce(Outcome) + Send + 'static,
    {
        Self {
            setup: Box::new(setup),
            completion: Box::new(completion),
        }
    }

    pub fn into_parts(self) -> (SetupAction, CompletionHandler) {
        (self.setup, self.completion)
    }

    /// Resolve without ever running setup.
    pub fn resolve(self, outcome: Outcome) {
        (self.completion)(outcome)
    }

    pub fn cancel(self) {
        self.resolve(Outcome::Cancelled)
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.resolve(Outcome::failure(reason))
    }
}

impl std::fmt::Debug for PendingCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCallback").finish_non_exhaustive()
    }
}
