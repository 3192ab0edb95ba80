// Scripted exchanges run against a live host, covering each way a correlated
// exchange can end.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;

use foreground::{Outcome, PeerParams, PendingCallback};

use crate::host::Host;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    /// Peer starts, produces a payload, finishes
    Success,
    /// Platform refuses to create the peer
    SpawnFailure,
    /// Peer's setup action fails
    SetupFailure,
    /// Peer is dismissed before producing a result
    Dismissed,
    /// Peer never answers; the result timeout cancels it
    Timeout,
}

impl Scenario {
    pub fn all() -> [Scenario; 5] {
        [
            Scenario::Success,
            Scenario::SpawnFailure,
            Scenario::SetupFailure,
            Scenario::Dismissed,
            Scenario::Timeout,
        ]
    }
}

/// What a scenario left behind.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub outcome: Outcome,
    /// Instances still registered once the exchange settled (the home screen)
    pub registered: usize,
    /// Records still outstanding in the correlation table
    pub outstanding: usize,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(200);

/// Run one scenario on a started host.
pub async fn run_scenario(host: &Host, scenario: Scenario) -> ScenarioReport {
    let platform = host.platform.clone();
    let params = PeerParams::new().with("scenario", format!("{scenario:?}"));

    let outcome = match scenario {
        Scenario::Success => {
            host.launcher
                .launch_async(params, move |ctx| {
                    platform.deliver_result(
                        ctx.id,
                        Outcome::success(serde_json::json!({ "token": ctx.token.to_string() })),
                    );
                    Ok(())
                })
                .await
        }
        Scenario::SpawnFailure => {
            host.platform.set_accepting(false);
            let outcome = host.launcher.launch_async(params, |_| Ok(())).await;
            host.platform.set_accepting(true);
            outcome
        }
        Scenario::SetupFailure => {
            host.launcher
                .launch_async(params, |_| Err(anyhow::anyhow!("required capability missing")))
                .await
        }
        Scenario::Dismissed => {
            host.launcher
                .launch_async(params, move |ctx| {
                    platform.destroy(ctx.id);
                    Ok(())
                })
                .await
        }
        Scenario::Timeout => {
            let timeout = host.launcher.config().result_timeout().unwrap_or(DEFAULT_TIMEOUT);
            host.launcher
                .launch_with_timeout(params, |_| Ok(()), timeout)
                .await
        }
    };

    // Let the peer's own teardown drain through the event loop.
    settle(host).await;

    let report = ScenarioReport {
        scenario: format!("{scenario:?}"),
        outcome,
        registered: host.registry.len(),
        outstanding: host.table.len(),
    };
    tracing::info!(?report, "scenario finished");
    report
}

async fn settle(host: &Host) {
    for _ in 0..50 {
        if host.platform.live_peers().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tracing::warn!("peers still alive after settling");
}

/// Mint `per_thread` tokens from each of `threads` threads concurrently and
/// return how many distinct tokens came back.
pub fn stress_tokens(host: &Host, threads: usize, per_thread: usize) -> Result<usize> {
    let table = host.table.clone();
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let table = table.clone();
            std::thread::spawn(move || {
                (0..per_thread)
                    .map(|_| table.register(PendingCallback::new(|_| Ok(()), |_| {})))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut distinct = HashSet::new();
    for handle in handles {
        let tokens = handle
            .join()
            .map_err(|_| anyhow::anyhow!("stress thread panicked"))?;
        distinct.extend(tokens);
    }
    let cancelled = table.cancel_all();
    tracing::info!(minted = distinct.len(), cancelled, "token stress finished");
    Ok(distinct.len())
}
