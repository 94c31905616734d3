//! One supervised task per symbol

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::coordinator::{CycleCoordinator, CycleOutcome};
use crate::core::grid_planner::GridConfig;
use crate::core::types::CyclePhase;
use crate::db::OrderRepository;
use crate::error::{GridBotError, GridBotResult};
use crate::events::EventSink;
use crate::exchange::ExchangeGateway;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

type TaskSlot = Arc<Mutex<Option<JoinHandle<CycleOutcome>>>>;

struct SymbolHandle {
    config: GridConfig,
    cancel: CancellationToken,
    phase: watch::Receiver<CyclePhase>,
    /// Cancelled when the task's future is dropped, whether it returned or was aborted
    finished: CancellationToken,
    /// Cleared only once a join has completed
    task: TaskSlot,
}

impl SymbolHandle {
    fn is_running(&self) -> bool {
        !self.finished.is_cancelled()
    }
}

/// Starts, stops and restarts symbol cycles. Symbols share the gateway and
/// nothing else.
pub struct Scheduler {
    gateway: Arc<ExchangeGateway>,
    repo: Arc<dyn OrderRepository>,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
    symbols: Mutex<HashMap<String, SymbolHandle>>,
    recovery: bool,
}

impl Scheduler {
    pub fn new(gateway: Arc<ExchangeGateway>, repo: Arc<dyn OrderRepository>, events: Arc<dyn EventSink>) -> Self {
        Self {
            gateway,
            repo,
            events,
            shutdown: CancellationToken::new(),
            symbols: Mutex::new(HashMap::new()),
            recovery: true,
        }
    }

    /// New symbols start from a fresh grid even if persisted orders exist
    pub fn without_recovery(mut self) -> Self {
        self.recovery = false;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start cycling `symbol`. The config is validated before anything runs.
    pub async fn submit_cycle(&self, symbol: &str, config: GridConfig) -> GridBotResult<()> {
        let mut symbols = self.symbols.lock().await;
        if symbols.get(symbol).is_some_and(SymbolHandle::is_running) {
            return Err(GridBotError::InvalidConfig(format!(
                "{} already has a running cycle",
                symbol
            )));
        }

        let handle = self.spawn(symbol, config)?;
        symbols.insert(symbol.to_string(), handle);
        info!("🚀 {} cycle submitted", symbol);
        Ok(())
    }

    fn spawn(&self, symbol: &str, config: GridConfig) -> GridBotResult<SymbolHandle> {
        let cancel = self.shutdown.child_token();
        let mut coordinator = CycleCoordinator::new(
            symbol,
            config.clone(),
            Arc::clone(&self.gateway),
            Arc::clone(&self.repo),
            Arc::clone(&self.events),
            cancel.clone(),
        )?;
        if !self.recovery {
            coordinator = coordinator.without_recovery();
        }

        let phase = coordinator.subscribe();
        let finished = CancellationToken::new();
        let guard = finished.clone().drop_guard();
        let task = tokio::spawn(async move {
            let _guard = guard;
            coordinator.run().await
        });

        Ok(SymbolHandle {
            config,
            cancel,
            phase,
            finished,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    /// Request a stop and wait for the symbol to reach Stopped
    pub async fn stop(&self, symbol: &str) -> Option<CycleOutcome> {
        let slot = {
            let symbols = self.symbols.lock().await;
            let handle = symbols.get(symbol)?;
            handle.cancel.cancel();
            Arc::clone(&handle.task)
        };
        info!("🛑 {} stop requested", symbol);
        join_slot(symbol, &slot).await
    }

    /// Operator restart of a symbol that reached Stopped
    pub async fn restart(&self, symbol: &str) -> GridBotResult<()> {
        let config = {
            let symbols = self.symbols.lock().await;
            let handle = symbols
                .get(symbol)
                .ok_or_else(|| GridBotError::InvalidConfig(format!("{} was never submitted", symbol)))?;
            if handle.is_running() {
                return Err(GridBotError::InvalidConfig(format!("{} is still running", symbol)));
            }
            handle.config.clone()
        };

        info!("🔁 {} restarting", symbol);
        self.submit_cycle(symbol, config).await
    }

    pub async fn phase(&self, symbol: &str) -> Option<CyclePhase> {
        let symbols = self.symbols.lock().await;
        symbols.get(symbol).map(|handle| *handle.phase.borrow())
    }

    /// Phase updates for one symbol
    pub async fn watch_phase(&self, symbol: &str) -> Option<watch::Receiver<CyclePhase>> {
        let symbols = self.symbols.lock().await;
        symbols.get(symbol).map(|handle| handle.phase.clone())
    }

    /// Wait for the symbol's task to end on its own (fatal error or stop)
    pub async fn wait(&self, symbol: &str) -> Option<CycleOutcome> {
        let slot = {
            let symbols = self.symbols.lock().await;
            Arc::clone(&symbols.get(symbol)?.task)
        };
        join_slot(symbol, &slot).await
    }

    pub async fn symbols(&self) -> Vec<String> {
        let mut names: Vec<String> = self.symbols.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every symbol and join them, aborting stragglers after the deadline
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;

        let slots: Vec<(String, TaskSlot)> = {
            let symbols = self.symbols.lock().await;
            symbols
                .iter()
                .map(|(symbol, handle)| (symbol.clone(), Arc::clone(&handle.task)))
                .collect()
        };

        for (symbol, slot) in slots {
            let mut slot = slot.lock().await;
            let Some(task) = slot.as_mut() else {
                continue;
            };
            match timeout_at(deadline, &mut *task).await {
                Ok(Ok(outcome)) => info!("👋 {} shut down: {:?}", symbol, outcome),
                Ok(Err(err)) => warn!("⚠️  {} task ended abnormally: {}", symbol, err),
                Err(_) => {
                    warn!("⚠️  {} did not stop in time, aborting", symbol);
                    task.abort();
                }
            }
            *slot = None;
        }
    }
}

/// Join through the shared slot. The handle stays in place if the caller
/// gives up mid-join, so a later stop or wait still reaches the task.
async fn join_slot(symbol: &str, slot: &TaskSlot) -> Option<CycleOutcome> {
    let mut slot = slot.lock().await;
    let result = slot.as_mut()?.await;
    *slot = None;

    Some(match result {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!("⚠️  {} task ended abnormally: {}", symbol, err);
            CycleOutcome::Failed(GridBotError::Internal(format!("{} task: {}", symbol, err)))
        }
    })
}
