// Peer side of a correlated exchange.
//
// A peer is created by the platform with a `PeerParams` bag that carries its
// correlation token. On creation it registers itself as a foreground
// instance, consumes its pending record and runs the setup action. It then
// waits for exactly one result event. Teardown without a result resolves the
// exchange as cancelled.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::callback::CompletionHandler;
use crate::correlation::{CorrelationTable, Token};
use crate::instance::{Instance, InstanceId, InstanceKind};
use crate::outcome::Outcome;
use crate::platform::Platform;
use crate::registry::InstanceRegistry;

/// Key under which the correlation token travels in a peer's parameters.
pub const CORRELATION_TOKEN_KEY: &str = "correlation_token";

/// Opaque parameters handed to the platform when spawning a peer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerParams(serde_json::Map<String, serde_json::Value>);

impl PeerParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn with_token(self, token: Token) -> Self {
        self.with(CORRELATION_TOKEN_KEY, token.get())
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn token(&self) -> Option<Token> {
        self.0
            .get(CORRELATION_TOKEN_KEY)
            .and_then(serde_json::Value::as_u64)
            .map(Token::new)
    }
}

/// What a setup action sees of the peer it runs against.
#[derive(Debug, Clone)]
pub struct PeerContext {
    pub id: InstanceId,
    pub token: Token,
    pub params: PeerParams,
}

/// Lifecycle hooks the platform drives on any concrete peer type.
pub trait PeerLifecycle: Send + Sync {
    /// Consume the token from `params` and run the setup action; self-terminate
    /// if setup fails or the token is unknown.
    fn on_create(&self, params: &PeerParams);

    /// Deliver the result of the operation, then self-terminate.
    fn on_result(&self, outcome: Outcome);

    /// Unconditional teardown. Resolves a still-pending exchange as cancelled.
    fn on_destroy(&self);
}

#[derive(Default)]
struct PeerState {
    token: Option<Token>,
    completion: Option<CompletionHandler>,
    finishing: bool,
    destroyed: bool,
}

/// The stock peer: one exchange, one result, then gone.
pub struct ResultPeer {
    id: InstanceId,
    this: Weak<ResultPeer>,
    table: Arc<CorrelationTable>,
    registry: Arc<InstanceRegistry>,
    platform: Weak<dyn Platform>,
    state: Mutex<PeerState>,
}

impl ResultPeer {
    pub fn new(
        id: InstanceId,
        table: Arc<CorrelationTable>,
        registry: Arc<InstanceRegistry>,
        platform: Weak<dyn Platform>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id,
            this: this.clone(),
            table,
            registry,
            platform,
            state: Mutex::new(PeerState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_completion(&self) -> Option<CompletionHandler> {
        let mut state = self.state();
        state.token = None;
        state.completion.take()
    }

    /// Ask the platform to tear this peer down. Falls back to tearing down
    /// inline when the platform is already gone.
    fn finish(&self) {
        {
            let mut state = self.state();
            if state.finishing || state.destroyed {
                return;
            }
            state.finishing = true;
        }
        match self.platform.upgrade() {
            Some(platform) => platform.finish(self.id),
            None => self.on_destroy(),
        }
    }
}

impl PeerLifecycle for ResultPeer {
    fn on_create(&self, params: &PeerParams) {
        if let Some(this) = self.this.upgrade() {
            self.registry.push(this);
        }

        let Some(token) = params.token() else {
            tracing::warn!(id = %self.id, "peer created without a correlation token");
            self.finish();
            return;
        };

        // Visible to `find_by_token` before the record leaves the table.
        self.state().token = Some(token);
        let Some(record) = self.table.consume(token) else {
            self.state().token = None;
            tracing::warn!(id = %self.id, %token, "no pending record for token, finishing");
            self.finish();
            return;
        };

        let (setup, completion) = record.into_parts();
        let mut state = self.state();
        if state.destroyed {
            state.token = None;
            drop(state);
            tracing::debug!(id = %self.id, %token, "peer destroyed during creation, cancelling");
            completion(Outcome::Cancelled);
            return;
        }
        state.completion = Some(completion);
        let finishing = state.finishing;
        drop(state);
        if finishing {
            // Teardown is already queued and will resolve the handler.
            tracing::debug!(id = %self.id, %token, "peer finishing before setup, skipping setup");
            return;
        }

        let context = PeerContext {
            id: self.id,
            token,
            params: params.clone(),
        };
        if let Err(e) = setup(&context) {
            tracing::warn!(id = %self.id, %token, "peer setup failed: {:#}", e);
            if let Some(completion) = self.take_completion() {
                completion(Outcome::failure(format!("setup failed: {e:#}")));
            }
            self.finish();
            return;
        }
        tracing::debug!(id = %self.id, %token, "peer active");
    }

    fn on_result(&self, outcome: Outcome) {
        match self.take_completion() {
            Some(completion) => {
                tracing::debug!(id = %self.id, ?outcome, "delivering peer result");
                completion(outcome);
            }
            None => tracing::debug!(id = %self.id, "result arrived after resolution, ignored"),
        }
        self.finish();
    }

    fn on_destroy(&self) {
        let completion = {
            let mut state = self.state();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.finishing = true;
            state.token = None;
            state.completion.take()
        };
        self.registry.remove(self.id);
        if let Some(completion) = completion {
            tracing::debug!(id = %self.id, "peer destroyed before result, cancelling");
            completion(Outcome::Cancelled);
        }
    }
}

impl Instance for ResultPeer {
    fn id(&self) -> InstanceId {
        self.id
    }

    fn kind(&self) -> InstanceKind {
        InstanceKind::of::<ResultPeer>()
    }

    fn is_terminated(&self) -> bool {
        let state = self.state();
        state.finishing || state.destroyed
    }

    fn request_termination(&self) {
        self.finish();
    }

    fn correlation_token(&self) -> Option<Token> {
        self.state().token
    }
}
