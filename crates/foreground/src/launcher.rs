// Launcher: registers a pending record, spawns a peer tagged with its token,
// and cleans up itself when the spawn fails synchronously.
//
// Also exposes the message-passing form (`launch_async`), timeouts and
// explicit cancellation. Every path resolves the caller's handler exactly once.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::callback::PendingCallback;
use crate::correlation::{CorrelationTable, Token};
use crate::outcome::Outcome;
use crate::peer::{PeerContext, PeerParams};
use crate::platform::Platform;
use crate::registry::InstanceRegistry;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Resolve `launch_and_wait` as cancelled after this many milliseconds.
    pub result_timeout_ms: Option<u64>,
}

impl LauncherConfig {
    pub fn result_timeout(&self) -> Option<Duration> {
        self.result_timeout_ms.map(Duration::from_millis)
    }
}

/// Outcome of a launch, delivered over a oneshot channel.
///
/// Resolves as `Cancelled` if the handler is dropped without being called.
pub struct PendingResult {
    token: Option<Token>,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingResult {
    /// The token of the exchange, or `None` if the spawn failed.
    pub fn token(&self) -> Option<Token> {
        self.token
    }
}

impl Future for PendingResult {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Outcome::Cancelled))
    }
}

pub struct Launcher {
    table: Arc<CorrelationTable>,
    registry: Arc<InstanceRegistry>,
    platform: Arc<dyn Platform>,
    config: LauncherConfig,
}

impl Launcher {
    pub fn new(
        table: Arc<CorrelationTable>,
        registry: Arc<InstanceRegistry>,
        platform: Arc<dyn Platform>,
        config: LauncherConfig,
    ) -> Self {
        Self {
            table,
            registry,
            platform,
            config,
        }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    pub fn launch<S, C>(&self, setup: S, completion: C) -> Result<Token>
    where
        S: FnOnce(&PeerContext) -> Result<()> + Send + 'static,
        C: FnOnce(Outcome) + Send + 'static,
    {
        self.launch_with_params(PeerParams::new(), setup, completion)
    }

    /// Register `completion`, then spawn a peer carrying the new token.
    ///
    /// On spawn failure the record is consumed here, `completion` receives
    /// `Failure`, and the spawn error is also returned.
    pub fn launch_with_params<S, C>(&self, params: PeerParams, setup: S, completion: C) -> Result<Token>
    where
        S: FnOnce(&PeerContext) -> Result<()> + Send + 'static,
        C: FnOnce(Outcome) + Send + 'static,
    {
        let token = self.table.register(PendingCallback::new(setup, completion));
        tracing::debug!(%token, "spawning peer");

        if let Err(e) = self.platform.spawn_peer(params.with_token(token)) {
            tracing::warn!(%token, "peer spawn failed: {:#}", e);
            if let Some(record) = self.table.consume(token) {
                record.fail(format!("spawn failed: {e:#}"));
            }
            return Err(e.context("failed to spawn peer"));
        }
        Ok(token)
    }

    pub fn launch_async<S>(&self, params: PeerParams, setup: S) -> PendingResult
    where
        S: FnOnce(&PeerContext) -> Result<()> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let token = self
            .launch_with_params(params, setup, move |outcome| {
                let _ = tx.send(outcome);
            })
            .ok();
        PendingResult { token, rx }
    }

    /// Launch and wait at most `timeout`. On expiry the exchange is cancelled
    /// and the resulting `Cancelled` delivery is awaited, so the record is
    /// still consumed exactly once.
    pub async fn launch_with_timeout<S>(&self, params: PeerParams, setup: S, timeout: Duration) -> Outcome
    where
        S: FnOnce(&PeerContext) -> Result<()> + Send + 'static,
    {
        let mut pending = self.launch_async(params, setup);
        match tokio::time::timeout(timeout, &mut pending).await {
            Ok(outcome) => outcome,
            Err(_) => {
                if let Some(token) = pending.token() {
                    tracing::info!(%token, ?timeout, "peer result timed out, cancelling");
                    self.cancel(token);
                }
                pending.await
            }
        }
    }

    /// Launch and wait, applying the configured timeout if there is one.
    pub async fn launch_and_wait<S>(&self, params: PeerParams, setup: S) -> Outcome
    where
        S: FnOnce(&PeerContext) -> Result<()> + Send + 'static,
    {
        match self.config.result_timeout() {
            Some(timeout) => self.launch_with_timeout(params, setup, timeout).await,
            None => self.launch_async(params, setup).await,
        }
    }

    /// Cancel the exchange for `token`.
    ///
    /// If no peer has claimed the record yet it is consumed and cancelled
    /// here. Otherwise the live peer serving the token is terminated and its
    /// teardown delivers `Cancelled`. Returns false if nothing was pending.
    pub fn cancel(&self, token: Token) -> bool {
        if let Some(record) = self.table.consume(token) {
            tracing::debug!(%token, "cancelled before peer creation");
            record.cancel();
            return true;
        }
        match self.registry.find_by_token(token) {
            Some(peer) => {
                tracing::debug!(%token, id = %peer.id(), "terminating peer to cancel");
                self.registry.terminate(peer.as_ref());
                true
            }
            None => false,
        }
    }

    /// Terminate every registered instance, then cancel whatever is still
    /// outstanding in the table.
    pub fn shutdown(&self) {
        let terminated = self.registry.terminate_all();
        let cancelled = self.table.cancel_all();
        tracing::info!(terminated, cancelled, "launcher shut down");
    }
}
