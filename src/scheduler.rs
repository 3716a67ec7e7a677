use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::catalog;
use crate::config::AppConfig;
use crate::engine::EngineEvent;
use crate::images::Thumbnail;
use crate::marketplace::{MarketplaceApi, Visibility};
use crate::models::{EnrichedProduct, PriceUpdateRequest, PriceUpdateResult, UpdateOutcome};
use crate::pricing::{DiscountCoefficient, PriceInputs, PricingPolicy, needs_resubmission};
use crate::tracking::TrackingStore;
use crate::utils::error::{AppError, Result};
use crate::view::CatalogView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Timer,
    Manual,
    Activation,
    EditApplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Fetching,
    Submitting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Running {
        cycle_id: Uuid,
        phase: CyclePhase,
        /// Targets as they were when the cycle started.
        snapshot: BTreeMap<String, u32>,
        session: u64,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleStats {
    pub cycles_started: u64,
    pub cycles_succeeded: u64,
    pub cycles_failed: u64,
    pub updates_submitted: u64,
    pub updates_failed: u64,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Success,
    Failure,
    Discarded,
}

impl CycleOutcome {
    fn label(self) -> &'static str {
        match self {
            CycleOutcome::Success => "success",
            CycleOutcome::Failure => "failure",
            CycleOutcome::Discarded => "discarded",
        }
    }
}

/// One-shot countdown to the next cycle. Every arm or disarm bumps the
/// generation, so a tick from an older countdown is recognised as stale.
#[derive(Debug, Default)]
struct CycleTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl CycleTimer {
    fn arm(&mut self, interval: Duration, events: UnboundedSender<EngineEvent>) {
        self.disarm();
        let generation = self.generation;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = events.send(EngineEvent::TimerFired { generation });
        }));
    }

    fn disarm(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.generation += 1;
    }

    fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    fn accept(&mut self, generation: u64) -> bool {
        if self.handle.is_some() && generation == self.generation {
            self.handle = None;
            true
        } else {
            false
        }
    }
}

impl Drop for CycleTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Drives repricing cycles for the active seller account.
///
/// Lives inside the session task and is only touched from there. Network
/// work runs in spawned workers which report back through the engine
/// channel; at most one cycle is in flight and the countdown to the next one
/// starts when the previous one has been fully processed.
pub struct RepricingScheduler {
    client: Option<Arc<dyn MarketplaceApi>>,
    tracking: TrackingStore,
    view: CatalogView,
    policy: PricingPolicy,
    state: CycleState,
    edit_mode: bool,
    session: u64,
    restart_pending: bool,
    timer: CycleTimer,
    interval: Duration,
    visibility: Visibility,
    page_size: u32,
    stats: CycleStats,
    events: UnboundedSender<EngineEvent>,
}

impl RepricingScheduler {
    pub fn new(config: &AppConfig, policy: PricingPolicy, events: UnboundedSender<EngineEvent>) -> Self {
        Self {
            client: None,
            tracking: TrackingStore::default(),
            view: CatalogView::new(),
            policy,
            state: CycleState::Idle,
            edit_mode: false,
            session: 0,
            restart_pending: false,
            timer: CycleTimer::default(),
            interval: config.scheduler.interval(),
            visibility: config.api.visibility,
            page_size: config.api.page_size,
            stats: CycleStats::default(),
            events,
        }
    }

    /// Starts a session for one account and kicks off its first cycle.
    pub fn activate(&mut self, client: Arc<dyn MarketplaceApi>, tracking: TrackingStore) {
        tracing::info!(
            "Session started for account {} with {} tracked products",
            tracking.account(),
            tracking.len()
        );
        self.session += 1;
        self.client = Some(client);
        self.tracking = tracking;
        self.view.clear();

        if self.is_running() {
            // results of the previous session's cycle are discarded on arrival
            self.restart_pending = true;
        } else {
            self.trigger(TriggerSource::Activation);
        }
    }

    /// Stops the countdown and forgets the client. A cycle already in
    /// flight runs to completion but does not schedule another one.
    pub fn deactivate(&mut self) {
        self.timer.disarm();
        self.restart_pending = false;
        if self.client.take().is_some() {
            tracing::info!("Session for account {} stopped", self.tracking.account());
        }
    }

    pub fn is_active(&self) -> bool {
        self.client.is_some()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, CycleState::Running { .. })
    }

    pub fn phase(&self) -> Option<CyclePhase> {
        match &self.state {
            CycleState::Running { phase, .. } => Some(*phase),
            CycleState::Idle => None,
        }
    }

    pub fn current_cycle(&self) -> Option<Uuid> {
        match &self.state {
            CycleState::Running { cycle_id, .. } => Some(*cycle_id),
            CycleState::Idle => None,
        }
    }

    pub fn is_timer_armed(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn edit_mode(&self) -> bool {
        self.edit_mode
    }

    pub fn tracking(&self) -> &TrackingStore {
        &self.tracking
    }

    pub fn view(&self) -> &CatalogView {
        &self.view
    }

    pub fn policy(&self) -> &PricingPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts a cycle unless there is no client or one is already in
    /// flight. Returns whether a cycle was started.
    pub fn trigger(&mut self, source: TriggerSource) -> bool {
        let Some(client) = self.client.clone() else {
            tracing::debug!("Ignoring {:?} trigger: no active session", source);
            return false;
        };
        if let Some(cycle_id) = self.current_cycle() {
            tracing::debug!("Ignoring {:?} trigger: cycle {} still in flight", source, cycle_id);
            return false;
        }

        self.timer.disarm();
        let cycle_id = Uuid::new_v4();
        let snapshot = self.tracking.snapshot();
        self.stats.cycles_started += 1;
        self.stats.last_started_at = Some(Utc::now());

        tracing::info!(
            "Cycle {} started ({:?}), {} tracked products",
            cycle_id,
            source,
            snapshot.len()
        );

        spawn_fetch(client, self.visibility, self.page_size, cycle_id, self.events.clone());
        self.state = CycleState::Running {
            cycle_id,
            phase: CyclePhase::Fetching,
            snapshot,
            session: self.session,
        };
        true
    }

    /// Handles a countdown tick. Ticks from a disarmed countdown are ignored.
    pub fn on_timer(&mut self, generation: u64) -> bool {
        if !self.timer.accept(generation) {
            tracing::debug!("Discarding stale timer tick (generation {})", generation);
            return false;
        }
        self.trigger(TriggerSource::Timer)
    }

    /// Processes the fetch worker's result. Returns thumbnail jobs when the
    /// rows were built from scratch.
    pub fn handle_fetch_result(
        &mut self,
        cycle_id: Uuid,
        result: std::result::Result<Vec<EnrichedProduct>, String>,
    ) -> Vec<(usize, String)> {
        let (snapshot, session) = match &mut self.state {
            CycleState::Running {
                cycle_id: current,
                phase: CyclePhase::Fetching,
                snapshot,
                session,
            } if *current == cycle_id => (std::mem::take(snapshot), *session),
            _ => {
                tracing::warn!("Ignoring catalog for unknown cycle {}", cycle_id);
                return Vec::new();
            }
        };

        let products = match result {
            Ok(products) => products,
            Err(e) => {
                tracing::error!("Cycle {} failed to fetch the catalog: {}", cycle_id, e);
                self.stats.last_error = Some(e);
                self.finish_cycle(CycleOutcome::Failure);
                return Vec::new();
            }
        };

        if session != self.session {
            tracing::info!("Cycle {} belongs to a previous session, discarding its catalog", cycle_id);
            self.finish_cycle(CycleOutcome::Discarded);
            return Vec::new();
        }

        let jobs = if self.view.is_empty() {
            let jobs = self.view.rebuild(&products, &self.tracking, &self.policy);
            tracing::info!("Cycle {} built {} rows", cycle_id, self.view.len());
            jobs
        } else {
            let refreshed = self.view.refresh_prices(&products, &self.policy);
            tracing::debug!("Cycle {} refreshed {} display prices", cycle_id, refreshed);
            Vec::new()
        };

        if self.edit_mode {
            tracing::info!("Cycle {}: edit mode active, price comparison skipped", cycle_id);
            self.finish_cycle(CycleOutcome::Success);
            return jobs;
        }

        if self.restart_pending {
            tracing::info!("Cycle {}: targets changed while fetching, comparing in a fresh cycle", cycle_id);
            self.finish_cycle(CycleOutcome::Success);
            return jobs;
        }

        let plan = plan_price_updates(&snapshot, &products, &self.policy);
        if plan.is_empty() {
            tracing::info!("Cycle {}: all tracked prices within target band", cycle_id);
            self.finish_cycle(CycleOutcome::Success);
            return jobs;
        }

        let Some(client) = self.client.clone() else {
            tracing::info!(
                "Cycle {}: session stopped, dropping {} planned price updates",
                cycle_id,
                plan.len()
            );
            self.finish_cycle(CycleOutcome::Success);
            return jobs;
        };

        tracing::info!("Cycle {}: submitting {} price updates", cycle_id, plan.len());
        spawn_submit(client, plan, cycle_id, self.events.clone());
        self.state = CycleState::Running {
            cycle_id,
            phase: CyclePhase::Submitting,
            snapshot,
            session,
        };
        jobs
    }

    pub fn handle_submit_result(&mut self, cycle_id: Uuid, outcome: UpdateOutcome) {
        let expected = matches!(
            &self.state,
            CycleState::Running { cycle_id: current, phase: CyclePhase::Submitting, .. } if *current == cycle_id
        );
        if !expected {
            tracing::warn!("Ignoring price submission result for unknown cycle {}", cycle_id);
            return;
        }

        tracing::info!(
            "Cycle {}: {} prices updated, {} failed",
            cycle_id,
            outcome.successful.len(),
            outcome.failed.len()
        );
        for success in &outcome.successful {
            tracing::info!("  updated {} (product {:?})", success.label(), success.product_id);
        }
        for failure in &outcome.failed {
            tracing::warn!("  failed {}: {:?}", failure.label(), failure.errors);
        }

        self.stats.updates_submitted += outcome.successful.len() as u64;
        self.stats.updates_failed += outcome.failed.len() as u64;
        metrics::counter!("repricer_price_updates_total", "outcome" => "updated")
            .increment(outcome.successful.len() as u64);
        metrics::counter!("repricer_price_updates_total", "outcome" => "failed")
            .increment(outcome.failed.len() as u64);

        self.finish_cycle(CycleOutcome::Success);
    }

    fn finish_cycle(&mut self, outcome: CycleOutcome) {
        self.state = CycleState::Idle;
        self.stats.last_finished_at = Some(Utc::now());
        match outcome {
            CycleOutcome::Success => self.stats.cycles_succeeded += 1,
            CycleOutcome::Failure => self.stats.cycles_failed += 1,
            CycleOutcome::Discarded => {}
        }
        metrics::counter!("repricer_cycles_total", "outcome" => outcome.label()).increment(1);

        if self.restart_pending {
            self.restart_pending = false;
            self.trigger(TriggerSource::Activation);
        } else if self.client.is_some() {
            self.timer.arm(self.interval, self.events.clone());
            tracing::info!("Next cycle in {}s", self.interval.as_secs());
        }
    }

    pub fn enter_edit_mode(&mut self) -> bool {
        if self.edit_mode {
            return false;
        }
        self.edit_mode = true;
        tracing::info!("Edit mode on");
        true
    }

    /// Leaves edit mode, drops checked rows that never got a target and
    /// runs a cycle right away so the edits take effect.
    pub fn leave_edit_mode(&mut self) -> bool {
        if !self.edit_mode {
            return false;
        }
        self.edit_mode = false;

        for row in self.view.rows_mut() {
            if row.checked && row.target_input.is_none() {
                row.checked = false;
                self.tracking.untrack(&row.offer_id);
            }
        }

        tracing::info!("Edit mode off, {} products tracked", self.tracking.len());
        if self.is_running() {
            // the cycle in flight snapshotted the old targets
            self.restart_pending = true;
        } else {
            self.trigger(TriggerSource::EditApplied);
        }
        true
    }

    pub fn toggle_edit_mode(&mut self) -> bool {
        if self.edit_mode {
            self.leave_edit_mode();
        } else {
            self.enter_edit_mode();
        }
        self.edit_mode
    }

    fn require_edit_mode(&self, action: &str) -> Result<()> {
        if self.edit_mode {
            Ok(())
        } else {
            Err(AppError::Validation(format!("{} is only allowed in edit mode", action)))
        }
    }

    fn row_index(&self, offer_id: &str) -> Result<usize> {
        self.view
            .find_row(offer_id)
            .ok_or_else(|| AppError::Validation(format!("Unknown offer id: {}", offer_id)))
    }

    /// Checks or unchecks a row. A checked row with a target is tracked.
    pub fn set_checked(&mut self, offer_id: &str, checked: bool) -> Result<()> {
        self.require_edit_mode("Changing tracked products")?;
        let index = self.row_index(offer_id)?;
        self.apply_checked(index, checked)
    }

    fn apply_checked(&mut self, index: usize, checked: bool) -> Result<()> {
        let Some(row) = self.view.row_mut(index) else {
            return Ok(());
        };
        row.checked = checked;
        if checked {
            if let Some(target) = row.target_input {
                self.tracking.track(row.offer_id.clone(), target)?;
            }
        } else {
            self.tracking.untrack(&row.offer_id);
        }
        Ok(())
    }

    /// Confirms a target price on a checked row. Zero clears the input and
    /// leaves the tracked target untouched.
    pub fn set_target(&mut self, offer_id: &str, target: Option<u32>) -> Result<()> {
        self.require_edit_mode("Changing target prices")?;
        let index = self.row_index(offer_id)?;
        let Some(row) = self.view.row_mut(index) else {
            return Ok(());
        };
        if !row.checked {
            return Err(AppError::Validation(format!(
                "Check {} before setting its target price",
                offer_id
            )));
        }

        row.target_input = target.filter(|t| *t > 0);
        if let Some(target) = row.target_input {
            self.tracking.track(row.offer_id.clone(), target)?;
        }
        Ok(())
    }

    /// Checks every row, or unchecks all of them when all are checked
    /// already. Returns the new state.
    pub fn select_all_or_none(&mut self) -> Result<bool> {
        self.require_edit_mode("Selecting all products")?;
        let all_checked = self.view.rows().iter().all(|row| row.checked);
        let checked = !all_checked;
        for index in 0..self.view.len() {
            self.apply_checked(index, checked)?;
        }
        Ok(checked)
    }

    pub fn set_coefficient(&mut self, coefficient: DiscountCoefficient) -> Result<()> {
        self.require_edit_mode("Changing the discount coefficient")?;
        self.policy.set_coefficient(coefficient);
        self.view.reprice_all(&self.policy);
        tracing::info!("Discount coefficient set to {}", coefficient);
        Ok(())
    }

    pub fn toggle_status_filter(&mut self) -> bool {
        self.view.toggle_status_filter()
    }

    pub fn set_thumbnail(&mut self, row: usize, thumbnail: Option<Thumbnail>) {
        if !self.view.set_thumbnail(row, thumbnail) {
            tracing::debug!("Thumbnail for row {} arrived after the rows were rebuilt", row);
        }
    }
}

/// Builds one price update per tracked offer whose observed seller price
/// left the ±1% band around its target. Offers missing from the catalog
/// or without a usable price are skipped.
pub fn plan_price_updates(
    snapshot: &BTreeMap<String, u32>,
    products: &[EnrichedProduct],
    policy: &PricingPolicy,
) -> Vec<PriceUpdateRequest> {
    let by_offer: HashMap<&str, &EnrichedProduct> =
        products.iter().map(|product| (product.offer_id(), product)).collect();

    snapshot
        .iter()
        .filter_map(|(offer_id, &target)| {
            let inputs = PriceInputs::from_product(by_offer.get(offer_id.as_str())?)?;
            if !needs_resubmission(inputs.seller, target) {
                return None;
            }
            let price = policy.required_seller_price(Decimal::from(target), &inputs)?;
            tracing::info!(
                "Price of {} drifted: observed {}, target {}, submitting {}",
                offer_id,
                inputs.seller,
                target,
                price
            );
            Some(PriceUpdateRequest::for_offer(offer_id.clone(), price))
        })
        .collect()
}

fn spawn_fetch(
    client: Arc<dyn MarketplaceApi>,
    visibility: Visibility,
    page_size: u32,
    cycle_id: Uuid,
    events: UnboundedSender<EngineEvent>,
) {
    tokio::spawn(async move {
        let worker = tokio::spawn(async move { catalog::assemble(client.as_ref(), visibility, page_size).await });
        let result = match worker.await {
            Ok(mut products) => {
                // newest products first
                products.reverse();
                Ok(products)
            }
            Err(e) => Err(format!("catalog worker crashed: {}", e)),
        };
        let _ = events.send(EngineEvent::CatalogFetched { cycle_id, result });
    });
}

fn spawn_submit(
    client: Arc<dyn MarketplaceApi>,
    requests: Vec<PriceUpdateRequest>,
    cycle_id: Uuid,
    events: UnboundedSender<EngineEvent>,
) {
    tokio::spawn(async move {
        let batch = requests.clone();
        let worker = tokio::spawn(async move { client.submit_price_updates(&batch).await });
        let outcome = match worker.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Price submission worker for cycle {} crashed: {}", cycle_id, e);
                UpdateOutcome {
                    successful: Vec::new(),
                    failed: requests.iter().map(PriceUpdateResult::rejected).collect(),
                }
            }
        };
        let _ = events.send(EngineEvent::PricesSubmitted { cycle_id, outcome });
    });
}
