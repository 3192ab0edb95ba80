// Correlation table: token → pending record, for one-shot exchanges between a
// caller and a peer that does not exist yet when the record is registered.
//
// Token generation and insertion happen under the same lock, so minting is
// atomic with respect to other registrations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::callback::PendingCallback;

/// Opaque, process-unique correlation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(u64);

impl Token {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Source of candidate token values. Candidates may collide; the table
/// re-rolls until it finds one that is not outstanding.
pub trait TokenSource: Send {
    fn next_candidate(&mut self) -> u64;
}

/// Uniform draws over the full `u64` space.
#[derive(Debug, Default)]
pub struct RandomTokens;

impl TokenSource for RandomTokens {
    fn next_candidate(&mut self) -> u64 {
        rand::random()
    }
}

struct TableInner<R> {
    pending: HashMap<Token, R>,
    source: Box<dyn TokenSource>,
}

pub struct CorrelationTable<R = PendingCallback> {
    inner: Mutex<TableInner<R>>,
}

impl<R> Default for CorrelationTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> CorrelationTable<R> {
    pub fn new() -> Self {
        Self::with_source(RandomTokens)
    }

    pub fn with_source(source: impl TokenSource + 'static) -> Self {
        Self {
            inner: Mutex::new(TableInner {
                pending: HashMap::new(),
                source: Box::new(source),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableInner<R>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `record` under a token distinct from every outstanding token.
    pub fn register(&self, record: R) -> Token {
        let mut inner = self.lock();
        let token = loop {
            let candidate = Token(inner.source.next_candidate());
            if !inner.pending.contains_key(&candidate) {
                break candidate;
            }
            tracing::debug!(%candidate, "token collision, re-rolling");
        };
        inner.pending.insert(token, record);
        token
    }

    /// Remove and return the record for `token`.
    ///
    /// `None` means the token was never registered or was already consumed;
    /// callers treat that as a normal outcome.
    pub fn consume(&self, token: Token) -> Option<R> {
        self.lock().pending.remove(&token)
    }

    pub fn contains(&self, token: Token) -> bool {
        self.lock().pending.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    fn drain(&self) -> Vec<(Token, R)> {
        self.lock().pending.drain().collect()
    }
}

impl CorrelationTable<PendingCallback> {
    /// Consume every outstanding record and deliver `Cancelled` to each.
    ///
    /// Handlers run after the lock is released.
    pub fn cancel_all(&self) -> usize {
        let drained = self.drain();
        let count = drained.len();
        for (token, record) in drained {
            tracing::debug!(%token, "cancelling outstanding record");
            record.cancel();
        }
        count
    }
}
