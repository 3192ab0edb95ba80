// foreground: registry of live UI-owned instances plus a token-keyed table
// that correlates a caller with the transient peer it spawns.
//
// The registry and table are plain constructed objects; whoever owns the UI
// subsystem builds them once and shares them by `Arc`.

mod callback;
mod correlation;
mod instance;
mod launcher;
mod outcome;
mod peer;
mod platform;
mod registry;

pub use callback::{CompletionHandler, PendingCallback, SetupAction};
pub use correlation::{CorrelationTable, RandomTokens, Token, TokenSource};
pub use instance::{Instance, InstanceId, InstanceKind};
pub use launcher::{Launcher, LauncherConfig, PendingResult};
pub use outcome::Outcome;
pub use peer::{CORRELATION_TOKEN_KEY, PeerContext, PeerLifecycle, PeerParams, ResultPeer};
pub use platform::{LocalPlatform, PeerFactory, PeerSeed, Platform, PlatformCommand};
pub use registry::InstanceRegistry;
