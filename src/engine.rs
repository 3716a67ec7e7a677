//! The session task and the messages it consumes.
//!
//! Every piece of mutable state lives in [`Session`], which processes one
//! ordered stream of [`EngineEvent`]s: user commands, countdown ticks and
//! completions from background workers. Front ends talk to it through an
//! [`EngineHandle`].

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::images::{ImageDownloader, Thumbnail};
use crate::marketplace::{MarketplaceApi, MarketplaceClient};
use crate::models::{Credentials, EnrichedProduct, UpdateOutcome};
use crate::pricing::{DiscountCoefficient, PricingPolicy};
use crate::scheduler::{CyclePhase, CycleStats, RepricingScheduler, TriggerSource};
use crate::settings::SettingsStore;
use crate::utils::error::{AppError, Result};
use crate::view::ProductRow;

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
pub enum Command {
    /// Starts a session, with the saved credentials when none are given.
    Start {
        credentials: Option<Credentials>,
        reply: Reply<Result<()>>,
    },
    Stop {
        reply: Reply<Result<()>>,
    },
    Refresh {
        reply: Reply<bool>,
    },
    ToggleEditMode {
        reply: Reply<bool>,
    },
    SetChecked {
        offer_id: String,
        checked: bool,
        reply: Reply<Result<()>>,
    },
    SetTarget {
        offer_id: String,
        target: Option<u32>,
        reply: Reply<Result<()>>,
    },
    SelectAllOrNone {
        reply: Reply<Result<bool>>,
    },
    SetCoefficient {
        value: f64,
        reply: Reply<Result<()>>,
    },
    ToggleStatusFilter {
        reply: Reply<bool>,
    },
    Snapshot {
        reply: Reply<EngineSnapshot>,
    },
}

#[derive(Debug)]
pub enum EngineEvent {
    Command(Command),
    TimerFired {
        generation: u64,
    },
    CatalogFetched {
        cycle_id: Uuid,
        result: std::result::Result<Vec<EnrichedProduct>, String>,
    },
    PricesSubmitted {
        cycle_id: Uuid,
        outcome: UpdateOutcome,
    },
    ImageReady {
        batch: u64,
        row: usize,
        thumbnail: Option<Thumbnail>,
    },
    ImagesDone {
        batch: u64,
    },
    Shutdown,
}

/// Read-only picture of the session for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub account: String,
    pub active: bool,
    pub phase: Option<CyclePhase>,
    pub timer_armed: bool,
    pub edit_mode: bool,
    pub status_filter: bool,
    pub coefficient: String,
    pub interval_secs: u64,
    pub tracked: usize,
    pub total_rows: usize,
    /// Rows passing the status filter.
    pub rows: Vec<ProductRow>,
    pub stats: CycleStats,
}

pub type ClientFactory = Box<dyn Fn(&Credentials) -> Result<Arc<dyn MarketplaceApi>> + Send>;

pub struct Session {
    scheduler: RepricingScheduler,
    settings: SettingsStore,
    credentials: Credentials,
    client_factory: ClientFactory,
    images: Option<Arc<ImageDownloader>>,
    image_batch: u64,
    events: UnboundedSender<EngineEvent>,
    receiver: UnboundedReceiver<EngineEvent>,
}

impl Session {
    pub fn new(config: &AppConfig, settings: SettingsStore) -> Result<(Self, EngineHandle)> {
        let (events, receiver) = unbounded_channel();

        let saved = settings.load_coefficient(config.pricing.default_coefficient);
        let coefficient = DiscountCoefficient::from_f64(saved)?;
        let policy = PricingPolicy::new(coefficient);

        let images = if config.images.enabled {
            Some(Arc::new(ImageDownloader::new(&config.images)?))
        } else {
            None
        };

        let api_config = config.api.clone();
        let client_factory: ClientFactory =
            Box::new(move |credentials: &Credentials| -> Result<Arc<dyn MarketplaceApi>> {
                Ok(Arc::new(MarketplaceClient::new(credentials, &api_config)?))
            });

        let session = Self {
            scheduler: RepricingScheduler::new(config, policy, events.clone()),
            credentials: settings.load_credentials(),
            settings,
            client_factory,
            images,
            image_batch: 0,
            events: events.clone(),
            receiver,
        };
        Ok((session, EngineHandle { sender: events }))
    }

    /// Replaces how marketplace clients are built from credentials.
    pub fn with_client_factory(mut self, factory: ClientFactory) -> Self {
        self.client_factory = factory;
        self
    }

    /// Credentials used by `start` when none are given, in place of the
    /// saved ones.
    pub fn with_default_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Processes events until `Shutdown`, then persists the settings.
    pub async fn run(mut self) -> Result<()> {
        info!("Engine started");
        while let Some(event) = self.receiver.recv().await {
            if matches!(event, EngineEvent::Shutdown) {
                break;
            }
            self.handle_event(event);
        }

        self.scheduler.deactivate();
        self.save_settings()?;
        info!("Engine stopped");
        Ok(())
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Command(command) => self.handle_command(command),
            EngineEvent::TimerFired { generation } => {
                self.scheduler.on_timer(generation);
            }
            EngineEvent::CatalogFetched { cycle_id, result } => {
                let jobs = self.scheduler.handle_fetch_result(cycle_id, result);
                if !jobs.is_empty() {
                    self.start_image_downloads(jobs);
                }
            }
            EngineEvent::PricesSubmitted { cycle_id, outcome } => {
                self.scheduler.handle_submit_result(cycle_id, outcome);
            }
            EngineEvent::ImageReady { batch, row, thumbnail } => {
                if batch == self.image_batch {
                    self.scheduler.set_thumbnail(row, thumbnail);
                }
            }
            EngineEvent::ImagesDone { batch } => {
                debug!("Thumbnail batch {} done", batch);
            }
            EngineEvent::Shutdown => {}
        }
    }

    fn handle_command(&mut self, command: Command) {
        // a dropped reply receiver only means the caller stopped waiting
        match command {
            Command::Start { credentials, reply } => {
                let _ = reply.send(self.start_session(credentials));
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.stop_session());
            }
            Command::Refresh { reply } => {
                let _ = reply.send(self.scheduler.trigger(TriggerSource::Manual));
            }
            Command::ToggleEditMode { reply } => {
                let edit_mode = self.scheduler.toggle_edit_mode();
                if !edit_mode {
                    if let Err(e) = self.save_settings() {
                        warn!("Could not save settings after editing: {}", e);
                    }
                }
                let _ = reply.send(edit_mode);
            }
            Command::SetChecked { offer_id, checked, reply } => {
                let _ = reply.send(self.scheduler.set_checked(&offer_id, checked));
            }
            Command::SetTarget { offer_id, target, reply } => {
                let _ = reply.send(self.scheduler.set_target(&offer_id, target));
            }
            Command::SelectAllOrNone { reply } => {
                let _ = reply.send(self.scheduler.select_all_or_none());
            }
            Command::SetCoefficient { value, reply } => {
                let result = DiscountCoefficient::from_f64(value)
                    .and_then(|coefficient| self.scheduler.set_coefficient(coefficient));
                let _ = reply.send(result);
            }
            Command::ToggleStatusFilter { reply } => {
                let _ = reply.send(self.scheduler.toggle_status_filter());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn start_session(&mut self, credentials: Option<Credentials>) -> Result<()> {
        if self.scheduler.is_active() {
            return Err(AppError::Validation("A session is already running".into()));
        }
        let credentials = credentials.unwrap_or_else(|| self.credentials.clone());
        let client = (self.client_factory)(&credentials)?;

        let tracking = self.settings.load_tracked_products(&credentials.client_id);
        self.settings.save_credentials(&credentials);
        self.credentials = credentials;
        self.scheduler.activate(client, tracking);
        Ok(())
    }

    fn stop_session(&mut self) -> Result<()> {
        if !self.scheduler.is_active() {
            return Err(AppError::Validation("No session is running".into()));
        }
        self.scheduler.deactivate();
        self.save_settings()
    }

    fn save_settings(&mut self) -> Result<()> {
        self.settings.save_credentials(&self.credentials);
        self.settings.save_coefficient(self.scheduler.policy().coefficient());
        self.settings.save_tracked_products(self.scheduler.tracking());
        self.settings.flush()
    }

    fn start_image_downloads(&mut self, jobs: Vec<(usize, String)>) {
        let Some(downloader) = self.images.clone() else {
            return;
        };
        self.image_batch += 1;
        let batch = self.image_batch;
        let events = self.events.clone();
        debug!("Fetching {} thumbnails (batch {})", jobs.len(), batch);
        tokio::spawn(async move { downloader.run(batch, jobs, events).await });
    }

    fn snapshot(&self) -> EngineSnapshot {
        let scheduler = &self.scheduler;
        let view = scheduler.view();
        EngineSnapshot {
            account: scheduler.tracking().account().to_string(),
            active: scheduler.is_active(),
            phase: scheduler.phase(),
            timer_armed: scheduler.is_timer_armed(),
            edit_mode: scheduler.edit_mode(),
            status_filter: view.status_filter(),
            coefficient: scheduler.policy().coefficient().to_string(),
            interval_secs: scheduler.interval().as_secs(),
            tracked: scheduler.tracking().len(),
            total_rows: view.len(),
            rows: view.visible_rows().into_iter().map(|(_, row)| row.clone()).collect(),
            stats: scheduler.stats().clone(),
        }
    }
}

/// Cloneable front-end side of the session.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    sender: UnboundedSender<EngineEvent>,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(EngineEvent::Command(make(reply)))
            .map_err(|_| AppError::Internal("engine is not running".into()))?;
        response
            .await
            .map_err(|_| AppError::Internal("engine dropped the request".into()))
    }

    pub async fn start(&self, credentials: Option<Credentials>) -> Result<()> {
        self.request(|reply| Command::Start { credentials, reply }).await?
    }

    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| Command::Stop { reply }).await?
    }

    pub async fn refresh(&self) -> Result<bool> {
        self.request(|reply| Command::Refresh { reply }).await
    }

    pub async fn toggle_edit_mode(&self) -> Result<bool> {
        self.request(|reply| Command::ToggleEditMode { reply }).await
    }

    pub async fn set_checked(&self, offer_id: impl Into<String>, checked: bool) -> Result<()> {
        let offer_id = offer_id.into();
        self.request(|reply| Command::SetChecked { offer_id, checked, reply })
            .await?
    }

    pub async fn set_target(&self, offer_id: impl Into<String>, target: Option<u32>) -> Result<()> {
        let offer_id = offer_id.into();
        self.request(|reply| Command::SetTarget { offer_id, target, reply })
            .await?
    }

    pub async fn select_all_or_none(&self) -> Result<bool> {
        self.request(|reply| Command::SelectAllOrNone { reply }).await?
    }

    pub async fn set_coefficient(&self, value: f64) -> Result<()> {
        self.request(|reply| Command::SetCoefficient { value, reply }).await?
    }

    pub async fn toggle_status_filter(&self) -> Result<bool> {
        self.request(|reply| Command::ToggleStatusFilter { reply }).await
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Asks the session to persist its settings and exit.
    pub fn shutdown(&self) {
        let _ = self.sender.send(EngineEvent::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
