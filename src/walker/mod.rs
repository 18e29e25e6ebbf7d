//! The resumable walker.
//!
//! Every step starts from persisted state only: it reads the worklist, the
//! cursor and the location from the store, loads the page at that location,
//! and then either moves the environment or handles the current item.
//! Nothing computed in one step is trusted by the next.

pub mod locator;
pub mod site;

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tracing::{Instrument, info, warn};

use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::model::{Action, Current, FetchOutcome, Phase, StepOutcome, Worklist};
use crate::storage::Storage;
use crate::telemetry::metrics;
use crate::telemetry::walk::{record_phase, start_step_span};

pub use locator::{FolderLocator, Locator};
pub use site::Site;

/// Totals for one call to [`Walker::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub downloaded: usize,
    pub not_found: usize,
    pub navigations: usize,
    /// The walk reached the end of its worklist.
    pub completed: bool,
    /// The run stopped on a shutdown signal with items left.
    pub interrupted: bool,
}

/// Drives a worklist to completion one step at a time.
pub struct Walker<L = FolderLocator> {
    storage: Storage,
    locator: L,
    restart_delay: Duration,
    phase: Phase,
    shutdown: Arc<Notify>,
}

impl<L: Locator> Walker<L> {
    /// Wrap a store. Starts in `Walking` if a walk is already persisted.
    pub fn new(storage: Storage, locator: L, restart_delay: Duration) -> Result<Self> {
        let phase = if storage.cursor()?.is_some() {
            Phase::Walking
        } else {
            Phase::AwaitingInput
        };
        Ok(Self {
            storage,
            locator,
            restart_delay,
            phase,
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    /// True when no walk is persisted and [`Walker::begin`] needs user input.
    pub fn needs_input(&self) -> bool {
        self.phase == Phase::AwaitingInput
    }

    /// Handle that stops [`Walker::run`] at its next pause.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Signal the run loop to stop at its next pause.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Start a new walk from raw input, or resume the persisted one.
    ///
    /// With a walk already persisted the input is ignored. Otherwise the input
    /// is parsed; empty input fails with [`Error::InputEmpty`] before anything
    /// is written.
    pub fn begin(&mut self, raw: Option<&str>) -> Result<Worklist> {
        if !self.needs_input() {
            let worklist = self.storage.worklist()?.ok_or(Error::NoWorklist)?;
            if raw.is_some() {
                warn!("walk already in progress, ignoring new item list");
            }
            return Ok(worklist);
        }

        self.start(Worklist::parse(raw.unwrap_or_default())?)
    }

    /// Persist `worklist` as a new walk.
    ///
    /// Every item is checked against the locator first, so an item that can
    /// never be handled is reported before any state is written.
    pub fn start(&mut self, worklist: Worklist) -> Result<Worklist> {
        if !self.needs_input() {
            return Err(Error::Other("a walk is already in progress".to_string()));
        }
        for item in worklist.items() {
            self.locator.check(item)?;
        }

        self.storage.start_walk(&worklist)?;
        self.enter(Phase::Walking)?;
        info!(items = worklist.len(), "walk started");
        Ok(worklist)
    }

    /// Run one step: navigate, or handle the item under the cursor.
    pub async fn step<S: Site>(&mut self, site: &S) -> Result<StepOutcome> {
        if self.phase.is_terminal() {
            return Ok(StepOutcome::Done { cleared: false });
        }
        if self.phase == Phase::AwaitingInput {
            return Err(Error::NoWorklist);
        }
        // A step always begins from Walking; an aborted step leaves nothing behind.
        self.phase = Phase::Walking;

        let worklist = self.storage.worklist()?.ok_or(Error::NoWorklist)?;
        let cursor = self.storage.cursor()?.ok_or(Error::NoWorklist)?;

        let item = match worklist.current(cursor) {
            Current::Item(item) => item.to_string(),
            Current::Done => {
                self.enter(Phase::Done)?;
                return self.finish(worklist.len());
            }
        };

        let span = start_step_span(&item, cursor);
        self.step_item(site, item, cursor, &span)
            .instrument(span.clone())
            .await
    }

    async fn step_item<S: Site>(
        &mut self,
        site: &S,
        item: String,
        cursor: usize,
        span: &tracing::Span,
    ) -> Result<StepOutcome> {
        let location = self.storage.location()?;

        let started = Instant::now();
        let page = site.load(&location).await?;
        metrics::page_load_ms().record(started.elapsed().as_secs_f64() * 1000.0, &[]);

        if !self.locator.environment_matches(&item, &page) {
            let Action::Navigate { location: to } = self.locator.transition(&item);

            if to != location {
                self.enter(Phase::Navigating)?;
                record_phase(span, "walking", "navigating");

                self.storage.navigate(
                    &to,
                    EventKind::Navigated {
                        item: item.clone(),
                        from: location,
                        to: to.clone(),
                    },
                )?;
                info!(item = %item, location = %to, "navigating");
                metrics::walk_steps().add(1, &[KeyValue::new("kind", "navigated")]);

                self.enter(Phase::Walking)?;
                return Ok(StepOutcome::Navigated { item, location: to });
            }

            // Already navigated here and the view still does not fit the item.
            self.enter(Phase::Fetching)?;
            record_phase(span, "walking", "fetching");
            warn!(item = %item, location = %location, "navigation did not take effect, skipping");
            let event = EventKind::NotFound {
                item: item.clone(),
                location,
            };
            return self.complete(item, cursor, FetchOutcome::NotFound, event);
        }

        self.enter(Phase::Fetching)?;
        record_phase(span, "walking", "fetching");

        let (outcome, event) = match self.locator.locate_target(&item, &page) {
            Some(target) => {
                let bytes = site.download(&target).await?;
                info!(item = %item, file = %target.file_name, bytes, "downloaded");
                metrics::download_bytes().record(bytes, &[]);
                let event = EventKind::Downloaded {
                    item: item.clone(),
                    file_name: target.file_name.clone(),
                    bytes,
                };
                let outcome = FetchOutcome::Downloaded {
                    file_name: target.file_name,
                    bytes,
                };
                (outcome, event)
            }
            None => {
                warn!(item = %item, location = %page.location, "no matching file, skipping");
                let event = EventKind::NotFound {
                    item: item.clone(),
                    location: page.location.clone(),
                };
                (FetchOutcome::NotFound, event)
            }
        };

        self.complete(item, cursor, outcome, event)
    }

    /// Store the item's outcome, advance past it and return to `Walking`.
    fn complete(
        &mut self,
        item: String,
        cursor: usize,
        outcome: FetchOutcome,
        event: EventKind,
    ) -> Result<StepOutcome> {
        let next = self.storage.complete_item(cursor, event)?;

        let label = match outcome {
            FetchOutcome::Downloaded { .. } => "downloaded",
            FetchOutcome::NotFound => "not_found",
        };
        metrics::items_processed().add(1, &[KeyValue::new("outcome", label)]);
        metrics::walk_steps().add(1, &[KeyValue::new("kind", "fetched")]);

        self.enter(Phase::Walking)?;
        Ok(StepOutcome::Fetched {
            item,
            outcome,
            cursor: next,
        })
    }

    /// Step until the walk is done or a shutdown signal arrives.
    ///
    /// Navigation steps follow each other immediately. After each handled
    /// item the walker pauses for the restart delay before the next step.
    pub async fn run<S: Site>(&mut self, site: &S) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        loop {
            match self.step(site).await? {
                StepOutcome::Navigated { .. } => summary.navigations += 1,
                StepOutcome::Fetched { outcome, .. } => {
                    match outcome {
                        FetchOutcome::Downloaded { .. } => summary.downloaded += 1,
                        FetchOutcome::NotFound => summary.not_found += 1,
                    }
                    if !self.pause().await {
                        info!("shutdown requested, walk paused");
                        summary.interrupted = true;
                        return Ok(summary);
                    }
                }
                StepOutcome::Done { .. } => {
                    summary.completed = true;
                    return Ok(summary);
                }
            }
        }
    }

    /// Wait out the restart delay. Returns false if shut down meanwhile.
    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.notified() => false,
            _ = tokio::time::sleep(self.restart_delay) => true,
        }
    }

    fn finish(&mut self, items: usize) -> Result<StepOutcome> {
        let cleared = self.storage.clear_walk(EventKind::WalkCompleted { items })?;
        if cleared {
            info!(items, "walk complete");
            metrics::walk_steps().add(1, &[KeyValue::new("kind", "done")]);
        }
        Ok(StepOutcome::Done { cleared })
    }

    fn enter(&mut self, to: Phase) -> Result<()> {
        if !self.phase.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }
}
