// Per-symbol trading cycle state machine
//
// Planning → Placing → Tracking → Closing → CoolingDown → Planning ...
// Stopped is terminal until the scheduler restarts the symbol.

use chrono::Utc;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::grid_planner::{GridConfig, GridPlan, GridPlanner, GridStatistics};
use crate::core::ledger::OrderLedger;
use crate::core::take_profit::{TakeProfitAction, TakeProfitEngine, TakeProfitTarget};
use crate::core::types::{CyclePhase, CycleState, GridLevel, OrderKind, OrderStatus};
use crate::db::{CycleRecord, CycleStatus, OrderRepository};
use crate::error::{GridBotError, GridBotResult};
use crate::events::{CycleEvent, CycleEventKind, EventSink};
use crate::exchange::{CancelOutcome, ExchangeGateway, OrderRequest};

/// How one cycle (or a run of cycles) ended
#[derive(Debug)]
pub enum CycleOutcome {
    Completed { realized_pnl: f64 },
    Stopped,
    Failed(GridBotError),
}

enum TrackingExit {
    TakeProfitFilled,
    StopRequested,
}

pub struct CycleCoordinator {
    symbol: String,
    config: GridConfig,
    gateway: Arc<ExchangeGateway>,
    repo: Arc<dyn OrderRepository>,
    events: Arc<dyn EventSink>,
    engine: TakeProfitEngine,
    cancel: CancellationToken,
    phase: watch::Sender<CyclePhase>,
    /// Resume persisted live orders on the first cycle
    recover_pending: bool,
    ledger: Option<OrderLedger>,
    record: Option<CycleRecord>,
}

impl CycleCoordinator {
    pub fn new(
        symbol: &str,
        config: GridConfig,
        gateway: Arc<ExchangeGateway>,
        repo: Arc<dyn OrderRepository>,
        events: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> GridBotResult<Self> {
        config.validate()?;
        let (phase, _) = watch::channel(CyclePhase::Planning);

        Ok(Self {
            symbol: symbol.to_string(),
            engine: TakeProfitEngine::from_config(&config),
            config,
            gateway,
            repo,
            events,
            cancel,
            phase,
            recover_pending: true,
            ledger: None,
            record: None,
        })
    }

    /// Skip crash recovery and always plan a fresh grid
    pub fn without_recovery(mut self) -> Self {
        self.recover_pending = false;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CyclePhase> {
        self.phase.subscribe()
    }

    /// Snapshot of the current (or last) cycle
    pub fn state(&self) -> Option<CycleState> {
        self.ledger.as_ref().map(|ledger| ledger.snapshot(self.phase()))
    }

    /// Run cycles back to back until stopped or a fatal error
    pub async fn run(mut self) -> CycleOutcome {
        loop {
            match self.run_cycle().await {
                CycleOutcome::Completed { realized_pnl } => {
                    info!("🏁 {} cycle complete, realized pnl {:.4}", self.symbol, realized_pnl);
                    if !self.cool_down().await {
                        self.set_phase(CyclePhase::Stopped);
                        self.emit(CycleEventKind::CycleStopped {
                            reason: "stop requested during cooldown".to_string(),
                        });
                        return CycleOutcome::Stopped;
                    }
                    self.emit(CycleEventKind::CycleRestarted);
                }
                other => return other,
            }
        }
    }

    /// Drive one cycle from Planning (or recovery) to completion, stop or failure
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let (mut ledger, plan) = match self.begin().await {
            Ok(Some(started)) => started,
            Ok(None) => return self.finish_stopped(None).await,
            Err(err) => return self.finish_failed(None, err),
        };

        let result = self.drive(&mut ledger, plan).await;
        let outcome = match result {
            Ok(Some(())) => self.finish_completed(&ledger),
            Ok(None) => self.finish_stopped(Some(&mut ledger)).await,
            Err(err) => self.finish_failed(Some(&ledger), err),
        };
        self.ledger = Some(ledger);
        outcome
    }

    /// Wait out the restart delay; false if a stop arrived first
    pub async fn cool_down(&self) -> bool {
        self.set_phase(CyclePhase::CoolingDown);
        info!("⏳ {} cooling down for {:?}", self.symbol, self.config.restart_delay);
        self.pause(self.config.restart_delay).await
    }

    /// Recover or plan. None when stopped before anything was placed.
    async fn begin(&mut self) -> GridBotResult<Option<(OrderLedger, Option<GridPlan>)>> {
        self.record = None;
        if std::mem::take(&mut self.recover_pending) {
            if let Some(ledger) = self.recover()? {
                return Ok(Some((ledger, None)));
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(None);
        }
        let Some(plan) = self.plan().await? else {
            return Ok(None);
        };

        let cycle_id = Uuid::new_v4().to_string();
        let record = CycleRecord::new(cycle_id.clone(), self.symbol.clone(), plan.reference_price);
        self.repo.record_cycle_start(&record)?;
        self.record = Some(record);

        let ledger = OrderLedger::new(&self.symbol, &cycle_id, Arc::clone(&self.repo));
        Ok(Some((ledger, Some(plan))))
    }

    /// Some(()) when the take-profit filled and the cycle closed, None on stop
    async fn drive(&self, ledger: &mut OrderLedger, plan: Option<GridPlan>) -> GridBotResult<Option<()>> {
        if let Some(plan) = plan {
            if !self.place(ledger, &plan).await? {
                return Ok(None);
            }
        }

        match self.track(ledger).await? {
            TrackingExit::StopRequested => Ok(None),
            TrackingExit::TakeProfitFilled => {
                self.close(ledger).await?;
                Ok(Some(()))
            }
        }
    }

    fn recover(&mut self) -> GridBotResult<Option<OrderLedger>> {
        let Some(ledger) = OrderLedger::restore(&self.symbol, Arc::clone(&self.repo))? else {
            return Ok(None);
        };

        let record = match self.repo.find_running_cycle(&self.symbol)? {
            Some(record) if record.cycle_id == ledger.cycle_id() => record,
            _ => {
                let reference = ledger.orders().first().map(|o| o.price).unwrap_or(0.0);
                let record = CycleRecord::new(ledger.cycle_id().to_string(), self.symbol.clone(), reference);
                self.repo.record_cycle_start(&record)?;
                record
            }
        };
        self.record = Some(record);

        let open_orders = ledger.open_entries().len() + usize::from(ledger.live_take_profit().is_some());
        warn!(
            "🩹 {} resuming cycle {} with {} live orders",
            self.symbol,
            ledger.cycle_id(),
            open_orders
        );
        self.emit_for(ledger.cycle_id(), CycleEventKind::CycleRecovered { open_orders });
        Ok(Some(ledger))
    }

    // Planning

    async fn plan(&self) -> GridBotResult<Option<GridPlan>> {
        self.set_phase(CyclePhase::Planning);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_plan().await {
                Ok(plan) => return Ok(Some(plan)),
                Err(err) if err.is_retryable() && attempt < self.config.max_planning_attempts => {
                    let backoff = self.config.poll_interval * attempt;
                    warn!(
                        "⚠️  {} planning attempt {}/{} failed, next in {:?}: {}",
                        self.symbol, attempt, self.config.max_planning_attempts, backoff, err
                    );
                    if !self.pause(backoff).await {
                        return Ok(None);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_plan(&self) -> GridBotResult<GridPlan> {
        let price = self.gateway.get_price(&self.symbol).await?;
        self.gateway
            .set_leverage(&self.symbol, self.config.leverage, self.config.margin_mode)
            .await?;
        GridPlanner::plan(price, &self.config)
    }

    // Placing

    /// false when a stop interrupted placement
    async fn place(&self, ledger: &mut OrderLedger, plan: &GridPlan) -> GridBotResult<bool> {
        self.set_phase(CyclePhase::Placing);
        if let Some(stats) = GridStatistics::from_levels(&plan.levels, self.config.leverage) {
            stats.log(&self.symbol);
        }

        for planned in &plan.levels {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }

            let level = self.floor_level(planned);
            if level.quantity <= 0.0 || level.target_price <= 0.0 {
                warn!("⚠️  {} level {} floors to nothing, skipped", self.symbol, level.index);
                ledger.record_rejected(&level, "below venue precision")?;
                continue;
            }

            let request = match level.kind {
                OrderKind::Market => OrderRequest::market_buy(&self.symbol, level.quantity),
                _ => OrderRequest::limit_buy(&self.symbol, level.target_price, level.quantity),
            };

            match self.gateway.place_order(&request).await {
                Ok(order_id) => ledger.record_placed(order_id, &level)?,
                Err(err @ GridBotError::Unauthorized(_)) => {
                    ledger.record_rejected(&level, &err.to_string())?;
                    return Err(err);
                }
                Err(err) => {
                    warn!("⚠️  {} level {} not placed: {}", self.symbol, level.index, err);
                    ledger.record_rejected(&level, &err.to_string())?;
                }
            }
        }

        let placed = ledger.placed_count();
        let rejected = ledger.rejected_count();
        if placed == 0 {
            return Err(GridBotError::GatewayRejected(format!(
                "no grid level accepted for {}",
                self.symbol
            )));
        }

        info!(
            "🧱 {} placed {}/{} levels around {:.5}",
            self.symbol,
            placed,
            plan.levels.len(),
            plan.reference_price
        );
        self.emit_for(
            ledger.cycle_id(),
            CycleEventKind::GridPlaced {
                reference_price: plan.reference_price,
                placed_levels: placed,
                rejected_levels: rejected,
            },
        );
        Ok(true)
    }

    fn floor_level(&self, level: &GridLevel) -> GridLevel {
        GridLevel {
            target_price: self.config.precision.floor_price(level.target_price),
            quantity: self.config.precision.floor_quantity(level.quantity),
            ..*level
        }
    }

    // Tracking

    async fn track(&self, ledger: &mut OrderLedger) -> GridBotResult<TrackingExit> {
        self.set_phase(CyclePhase::Tracking);

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Market entries and recovered fills need an exit before the first change
        let mut take_profit_dirty = ledger.total_filled_quantity() > 0.0;
        let mut failures = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(TrackingExit::StopRequested),
                _ = ticker.tick() => {}
            }

            match self.poll(ledger, &mut take_profit_dirty).await {
                Ok(true) => return Ok(TrackingExit::TakeProfitFilled),
                Ok(false) => failures = 0,
                Err(err) if err.is_retryable() => {
                    failures += 1;
                    warn!(
                        "⚠️  {} poll failed ({}/{}): {}",
                        self.symbol, failures, self.config.max_tracking_failures, err
                    );
                    if failures >= self.config.max_tracking_failures {
                        return Err(GridBotError::GatewayTransient(format!(
                            "{} consecutive failed polls, last: {}",
                            failures, err
                        )));
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One reconciliation pass. true once the take-profit has filled.
    ///
    /// Everything here runs inside this symbol's task with exclusive access
    /// to the ledger, so fills and the take-profit replacement they trigger
    /// can never interleave.
    async fn poll(&self, ledger: &mut OrderLedger, take_profit_dirty: &mut bool) -> GridBotResult<bool> {
        if let Some(tp) = ledger.live_take_profit().cloned() {
            let report = self.gateway.get_order_status(&self.symbol, &tp.order_id).await?;
            match ledger.apply_take_profit_report(&report)? {
                Some(OrderStatus::Filled) => return Ok(true),
                Some(OrderStatus::Cancelled) | Some(OrderStatus::Rejected) => {
                    warn!("⚠️  {} take-profit {} closed by the venue", self.symbol, tp.order_id);
                    ledger.retire_take_profit(None)?;
                    *take_profit_dirty = true;
                }
                _ => {}
            }
        }

        let open: Vec<String> = ledger
            .open_entries()
            .iter()
            .map(|order| order.order_id.clone())
            .collect();
        let reports = join_all(
            open.iter()
                .map(|order_id| self.gateway.get_order_status(&self.symbol, order_id)),
        )
        .await;

        let mut first_error = None;
        for (order_id, report) in open.iter().zip(reports) {
            let report = match report {
                Ok(report) => report,
                Err(err) => {
                    first_error.get_or_insert(err);
                    continue;
                }
            };

            let Some(update) = ledger.apply_report(order_id, &report)? else {
                continue;
            };
            if update.newly_filled.abs() > 0.0 {
                *take_profit_dirty = true;
            }
            if update.newly_filled > 0.0 {
                let grid_level = ledger.order(order_id).and_then(|o| o.grid_level);
                info!(
                    "✅ {} level {:?} filled +{:.5} @ {:.5} ({})",
                    self.symbol, grid_level, update.newly_filled, update.fill_price, update.status
                );
                self.emit_for(
                    ledger.cycle_id(),
                    CycleEventKind::OrderFilled {
                        order_id: order_id.clone(),
                        grid_level,
                        filled_quantity: update.newly_filled,
                        fill_price: update.fill_price,
                    },
                );
            }
        }

        if *take_profit_dirty {
            if self.sync_take_profit(ledger).await? {
                return Ok(true);
            }
            *take_profit_dirty = false;
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if ledger.open_entries().is_empty() && ledger.live_take_profit().is_none() {
            return Err(GridBotError::GatewayRejected(format!(
                "{} has no working orders left",
                self.symbol
            )));
        }
        Ok(false)
    }

    /// Bring the exit order in line with the filled set. true if the live
    /// take-profit turned out to be filled already.
    async fn sync_take_profit(&self, ledger: &mut OrderLedger) -> GridBotResult<bool> {
        let fills = ledger.fills();
        if fills.is_empty() {
            return Ok(false);
        }

        let target = self.engine.compute(&fills, ledger.exited_quantity())?;
        match self.engine.decide(ledger.live_take_profit(), target) {
            TakeProfitAction::Keep => Ok(false),
            TakeProfitAction::Place(target) => {
                self.place_take_profit(ledger, target).await?;
                Ok(false)
            }
            TakeProfitAction::Replace { cancel_order_id, .. } => {
                debug!("{} replacing take-profit {}", self.symbol, cancel_order_id);
                self.gateway.cancel_order(&self.symbol, &cancel_order_id).await?;
                let report = self.gateway.get_order_status(&self.symbol, &cancel_order_id).await?;
                if report.status == OrderStatus::Filled {
                    ledger.apply_take_profit_report(&report)?;
                    return Ok(true);
                }
                ledger.retire_take_profit(Some(report.filled_quantity))?;

                // Recompute so whatever the old order sold is not sold twice
                let target = self.engine.compute(&ledger.fills(), ledger.exited_quantity())?;
                if target.exit_quantity > 0.0 {
                    self.place_take_profit(ledger, target).await?;
                }
                Ok(false)
            }
        }
    }

    async fn place_take_profit(&self, ledger: &mut OrderLedger, target: TakeProfitTarget) -> GridBotResult<()> {
        let request = OrderRequest::take_profit(&self.symbol, target.price, target.exit_quantity);
        let order_id = self.gateway.place_order(&request).await?;
        ledger.set_take_profit(order_id.clone(), &target)?;

        info!(
            "🎯 {} take-profit {} for {:.5} @ {:.5} (avg {:.5})",
            self.symbol, order_id, target.exit_quantity, target.price, target.average_price
        );
        self.emit_for(
            ledger.cycle_id(),
            CycleEventKind::TakeProfitPlaced {
                order_id,
                price: target.price,
                quantity: target.exit_quantity,
                average_price: target.average_price,
            },
        );
        Ok(())
    }

    // Closing

    async fn close(&self, ledger: &mut OrderLedger) -> GridBotResult<()> {
        self.set_phase(CyclePhase::Closing);
        self.cancel_entries(ledger).await?;

        if let Some(tp) = ledger.take_profit() {
            let pnl = ledger.realized_pnl();
            let sold = ledger.exited_quantity() + tp.filled_quantity;
            let residual = ledger.total_filled_quantity() - sold;
            if residual > self.config.precision.quantity_step {
                warn!("⚠️  {} closed with {:.5} unsold", self.symbol, residual);
            }
            self.emit_for(
                ledger.cycle_id(),
                CycleEventKind::TakeProfitFilled {
                    order_id: tp.order_id.clone(),
                    price: tp.price,
                    quantity: sold,
                    realized_pnl: pnl,
                },
            );
        }
        Ok(())
    }

    /// Cancel every working entry. An order the venue already closed is
    /// reconciled instead of treated as an error. A failed cancel does not
    /// stop the sweep; the first error is returned once every entry was tried.
    async fn cancel_entries(&self, ledger: &mut OrderLedger) -> GridBotResult<()> {
        let open: Vec<String> = ledger
            .open_entries()
            .iter()
            .map(|order| order.order_id.clone())
            .collect();

        let total = open.len();
        let mut survivors = 0;
        let mut first_error = None;
        for order_id in open {
            if let Err(err) = self.cancel_entry(ledger, &order_id).await {
                warn!("⚠️  {} entry {} still live: {}", self.symbol, order_id, err);
                survivors += 1;
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => {
                warn!("⚠️  {} {}/{} entries could not be cancelled", self.symbol, survivors, total);
                Err(err)
            }
            None => Ok(()),
        }
    }

    async fn cancel_entry(&self, ledger: &mut OrderLedger, order_id: &str) -> GridBotResult<()> {
        match self.gateway.cancel_order(&self.symbol, order_id).await? {
            CancelOutcome::Cancelled => {}
            CancelOutcome::AlreadyClosed => {
                let report = self.gateway.get_order_status(&self.symbol, order_id).await?;
                ledger.apply_report(order_id, &report)?;
            }
        }
        ledger.mark_cancelled(order_id)
    }

    // Terminal paths

    fn finish_completed(&mut self, ledger: &OrderLedger) -> CycleOutcome {
        let realized_pnl = ledger.realized_pnl();
        self.close_record(ledger, CycleStatus::Completed, None);
        CycleOutcome::Completed { realized_pnl }
    }

    /// Explicit stop: cancel everything live, the take-profit included.
    /// Anything the venue refused to cancel turns the stop into a failure so
    /// the survivors are left for recovery.
    async fn finish_stopped(&mut self, ledger: Option<&mut OrderLedger>) -> CycleOutcome {
        info!("🛑 {} stopping", self.symbol);

        let Some(ledger) = ledger else {
            self.emit(CycleEventKind::CycleStopped {
                reason: "stop requested".to_string(),
            });
            self.set_phase(CyclePhase::Stopped);
            return CycleOutcome::Stopped;
        };

        let mut failure = self.cancel_entries(ledger).await.err();
        if let Some(tp) = ledger.live_take_profit().cloned() {
            match self.gateway.cancel_order(&self.symbol, &tp.order_id).await {
                Ok(_) => {
                    if let Err(err) = ledger.retire_take_profit(None) {
                        warn!("⚠️  {} take-profit not retired: {}", self.symbol, err);
                    }
                }
                Err(err) => {
                    warn!("⚠️  {} could not cancel take-profit: {}", self.symbol, err);
                    failure.get_or_insert(err);
                }
            }
        }

        if let Some(err) = failure {
            return self.finish_failed(Some(ledger), err);
        }

        self.close_record(ledger, CycleStatus::Stopped, None);
        self.emit_for(
            ledger.cycle_id(),
            CycleEventKind::CycleStopped {
                reason: "stop requested".to_string(),
            },
        );
        self.set_phase(CyclePhase::Stopped);
        CycleOutcome::Stopped
    }

    /// Fatal: live orders stay where they are for the operator or recovery
    fn finish_failed(&mut self, ledger: Option<&OrderLedger>, err: GridBotError) -> CycleOutcome {
        error!("❌ {} halted ({}): {}", self.symbol, err.category(), err);

        if let Some(ledger) = ledger {
            self.close_record(ledger, CycleStatus::Failed, Some(err.to_string()));
        }
        self.emit(CycleEventKind::FatalError {
            category: err.category().to_string(),
            message: err.to_string(),
        });
        self.set_phase(CyclePhase::Stopped);
        CycleOutcome::Failed(err)
    }

    fn close_record(&mut self, ledger: &OrderLedger, status: CycleStatus, error_message: Option<String>) {
        let Some(record) = self.record.as_mut() else {
            return;
        };
        record.ended_at = Some(Utc::now());
        record.status = status;
        record.average_fill_price = ledger.average_fill_price();
        record.filled_quantity = ledger.total_filled_quantity();
        record.take_profit_price = ledger.take_profit().map(|tp| tp.price);
        record.realized_pnl = (status == CycleStatus::Completed).then(|| ledger.realized_pnl());
        record.error_message = error_message;

        if let Err(err) = self.repo.record_cycle_end(record) {
            warn!("⚠️  {} cycle history not updated: {}", self.symbol, err);
        }
    }

    // Helpers

    fn set_phase(&self, phase: CyclePhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            info!("🔀 {} {} → {}", self.symbol, previous, phase);
        }
    }

    /// Sleep unless a stop arrives first; false on stop
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = sleep(duration) => true,
        }
    }

    fn emit(&self, kind: CycleEventKind) {
        let cycle_id = self
            .record
            .as_ref()
            .map(|r| r.cycle_id.clone())
            .unwrap_or_default();
        self.emit_for(&cycle_id, kind);
    }

    fn emit_for(&self, cycle_id: &str, kind: CycleEventKind) {
        self.events.emit(CycleEvent::new(&self.symbol, cycle_id, kind));
    }
}
