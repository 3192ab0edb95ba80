// Composition root: owns the registry, table, platform and launcher, and the
// thread running the platform's event loop.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use foreground::{
    CorrelationTable, Instance, InstanceId, InstanceKind, InstanceRegistry, Launcher,
    LauncherConfig, LocalPlatform,
};

/// A plain foreground window owned by the host.
pub struct Screen {
    id: InstanceId,
    name: String,
    closed: AtomicBool,
}

impl Screen {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: InstanceId::next(),
            name: name.into(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Instance for Screen {
    fn id(&self) -> InstanceId {
        self.id
    }

    fn kind(&self) -> InstanceKind {
        InstanceKind::of::<Screen>()
    }

    fn is_terminated(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn request_termination(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!(id = %self.id, name = %self.name, "screen closed");
        }
    }
}

pub struct Host {
    pub table: Arc<CorrelationTable>,
    pub registry: Arc<InstanceRegistry>,
    pub platform: Arc<LocalPlatform>,
    pub launcher: Launcher,
    event_loop: Option<JoinHandle<()>>,
}

impl Host {
    pub fn new(config: LauncherConfig) -> Self {
        let table = Arc::new(CorrelationTable::new());
        let registry = Arc::new(InstanceRegistry::new());
        let platform = LocalPlatform::new(table.clone(), registry.clone());
        let launcher = Launcher::new(table.clone(), registry.clone(), platform.clone(), config);
        Self {
            table,
            registry,
            platform,
            launcher,
            event_loop: None,
        }
    }

    /// Run the platform event loop on a dedicated thread.
    pub fn start(&mut self) -> Result<()> {
        if self.event_loop.is_some() {
            return Ok(());
        }
        let platform = self.platform.clone();
        let handle = std::thread::Builder::new()
            .name("foreground-event-loop".into())
            .spawn(move || platform.run())
            .context("failed to spawn event loop thread")?;
        self.event_loop = Some(handle);
        tracing::info!("event loop started");
        Ok(())
    }

    /// Open a screen and register it as the current instance.
    pub fn open_screen(&self, name: &str) -> Arc<Screen> {
        let screen = Screen::new(name);
        self.registry.push(screen.clone());
        tracing::info!(id = %screen.id(), name, "screen opened");
        screen
    }

    /// Tear everything down and stop the event loop. Pending exchanges
    /// resolve as cancelled.
    pub fn shutdown(&mut self) -> Result<()> {
        self.launcher.shutdown();
        self.platform.stop();
        if let Some(handle) = self.event_loop.take() {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("event loop thread panicked"))?;
        }
        // Teardown requested during the last iterations of the loop.
        self.platform.pump();
        tracing::info!("host shut down");
        Ok(())
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        if self.event_loop.is_some() {
            if let Err(e) = self.shutdown() {
                tracing::error!("host shutdown failed: {:#}", e);
            }
        }
    }
}
