//! The single-writer context. One OS thread owns the watch store and the
//! render queue; the scheduler, renderer tasks and `Monitor` handles reach it
//! only through `Command`s.

use std::sync::{mpsc, Arc};

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::error::PersistenceError;
use crate::notify::{notify_best_effort, Notifier};
use crate::renderer::{RenderResult, Renderer};
use crate::store::WatchStore;
use crate::watch::{ValidatedConfig, Watch, WatchStatus};

use super::detector;
use super::events::WatchEvent;
use super::queue::{Enqueued, Removed, RenderQueue};
use super::scheduler::{ScheduleEntry, TickReport};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub(crate) type WorkerTask = Box<dyn FnOnce(&mut Worker) + Send + 'static>;

pub(crate) enum Command {
    Execute(WorkerTask),
    Tick(TickReport),
    Rendered {
        url: String,
        ticket: u64,
        result: RenderResult,
    },
    Shutdown,
}

/// The load currently handed to the renderer.
struct ActiveLoad {
    url: String,
    ticket: u64,
    cancel: CancellationToken,
}

pub(crate) struct Worker {
    store: WatchStore,
    queue: RenderQueue,
    renderer: Arc<dyn Renderer>,
    notifier: Arc<dyn Notifier>,
    runtime: Handle,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<WatchEvent>,
    schedule: watch::Sender<Vec<ScheduleEntry>>,
    running: bool,
    next_ticket: u64,
    active: Option<ActiveLoad>,
}

impl Worker {
    pub(crate) fn new(
        store: WatchStore,
        renderer: Arc<dyn Renderer>,
        notifier: Arc<dyn Notifier>,
        runtime: Handle,
        commands: mpsc::Sender<Command>,
        events: broadcast::Sender<WatchEvent>,
        schedule: watch::Sender<Vec<ScheduleEntry>>,
    ) -> Self {
        Self {
            store,
            queue: RenderQueue::new(),
            renderer,
            notifier,
            runtime,
            commands,
            events,
            schedule,
            running: false,
            next_ticket: 0,
            active: None,
        }
    }

    pub(crate) fn run(mut self, commands: mpsc::Receiver<Command>) {
        self.publish_schedule();

        while let Ok(command) = commands.recv() {
            match command {
                Command::Execute(task) => task(&mut self),
                Command::Tick(report) => self.on_tick(report),
                Command::Rendered {
                    url,
                    ticket,
                    result,
                } => self.on_rendered(url, ticket, result),
                Command::Shutdown => break,
            }
        }

        self.shutdown();
        log_info!("monitor worker shutting down");
    }

    pub(crate) fn list(&self) -> Vec<Watch> {
        self.store.all().to_vec()
    }

    pub(crate) fn get(&self, url: &str) -> Option<Watch> {
        self.store.get(url).cloned()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn save(&mut self) -> Result<(), PersistenceError> {
        self.store.save()
    }

    /// Writes the store only when it changed since the last save or load.
    pub(crate) fn flush(&mut self) -> Result<bool, PersistenceError> {
        self.store.save_if_dirty()
    }

    /// Adds a watch or reconfigures the existing one with the same URL.
    pub(crate) fn upsert(&mut self, config: ValidatedConfig) -> Watch {
        let url = config.url.clone();
        let watch = match self.store.get_mut(&url) {
            Some(existing) => {
                existing.apply_config(config);
                log_info!("updated watch {url}");
                existing.clone()
            }
            None => {
                let watch = Watch::from_config(config);
                self.store.upsert(watch.clone());
                log_info!("added watch {url}");
                watch
            }
        };

        if !watch.enabled && self.queue.remove(&url) == Removed::Pending {
            log_debug!("{url} disabled, dropped from pending");
            self.set_status(&url, WatchStatus::Idle);
        }

        self.persist();
        self.publish_schedule();
        self.emit_updated(&url);
        self.get(&url).unwrap_or(watch)
    }

    /// A load already in flight for `url` keeps its slot; its completion is
    /// discarded once it arrives.
    pub(crate) fn delete(&mut self, url: &str) -> Option<Watch> {
        let removed = self.store.delete(url)?;

        match self.queue.remove(url) {
            Removed::InFlight => log_info!("deleted {url} while loading, result will be discarded"),
            Removed::Pending => log_debug!("deleted {url}, dropped from pending"),
            Removed::NotQueued => {}
        }
        log_info!("deleted watch {url}");

        self.persist();
        self.publish_schedule();
        self.emit(WatchEvent::Removed {
            url: url.to_string(),
        });
        Some(removed)
    }

    pub(crate) fn start(&mut self) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        log_info!("monitoring started ({} watches)", self.store.len());
        self.emit(WatchEvent::Monitoring { running: true });
        true
    }

    /// Clears pending work, cancels the in-flight load and puts every
    /// queued or loading watch back to `Idle`.
    pub(crate) fn stop(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;

        if let Some(active) = self.active.take() {
            log_info!("cancelling in-flight load of {}", active.url);
            active.cancel.cancel();
        }

        for url in self.queue.clear() {
            let reset = match self.store.get_mut(&url) {
                Some(watch) if watch.status.is_transient() => {
                    watch.status = WatchStatus::Idle;
                    true
                }
                _ => false,
            };
            if reset {
                self.emit_updated(&url);
            }
        }

        log_info!("monitoring stopped");
        self.persist();
        self.emit(WatchEvent::Monitoring { running: false });
        true
    }

    fn on_tick(&mut self, report: TickReport) {
        if !self.running {
            log_debug!("ignoring tick while monitoring is stopped");
            return;
        }

        for url in &report.skipped {
            if let Some(watch) = self.store.get_mut(url) {
                watch.checks_skipped += 1;
            }
        }

        // The snapshot the scheduler saw may be behind the store.
        let now = Utc::now();
        for url in report.due {
            let still_due = self
                .store
                .get(&url)
                .is_some_and(|watch| ScheduleEntry::from(watch).is_due(now));
            if still_due {
                self.enqueue(&url);
            }
        }
    }

    fn enqueue(&mut self, url: &str) {
        let outcome = self.queue.enqueue(url);
        if outcome == Enqueued::Duplicate {
            return;
        }

        if let Some(watch) = self.store.get_mut(url) {
            watch.checks_scheduled += 1;
            watch.status = WatchStatus::Queued;
        }

        match outcome {
            Enqueued::Dispatch => {
                if !self.dispatch(url) {
                    self.advance();
                }
            }
            Enqueued::Pending => {
                log_debug!("{url} queued behind {:?}", self.queue.in_flight());
                self.emit_updated(url);
            }
            Enqueued::Duplicate => {}
        }
    }

    /// Hands the in-flight URL to the renderer. Returns `false` and frees
    /// the slot when the watch vanished or was disabled meanwhile.
    fn dispatch(&mut self, url: &str) -> bool {
        let selector = match self.store.get_mut(url) {
            Some(watch) if watch.enabled => {
                watch.status = WatchStatus::Loading;
                watch.checks_dispatched += 1;
                watch.selector.clone()
            }
            _ => {
                self.queue.release(url);
                return false;
            }
        };

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let cancel = CancellationToken::new();

        let renderer = Arc::clone(&self.renderer);
        let commands = self.commands.clone();
        let task_cancel = cancel.clone();
        let task_url = url.to_string();
        self.runtime.spawn(async move {
            let result = tokio::select! {
                _ = task_cancel.cancelled() => None,
                result = renderer.load_and_extract(&task_url, selector.as_ref()) => Some(result),
            };
            match result {
                Some(result) => {
                    let command = Command::Rendered {
                        url: task_url,
                        ticket,
                        result,
                    };
                    if commands.send(command).is_err() {
                        log::warn!("monitor worker gone before a load completed");
                    }
                }
                None => log::debug!("load of {task_url} cancelled"),
            }
        });

        log_info!("loading {url}");
        self.active = Some(ActiveLoad {
            url: url.to_string(),
            ticket,
            cancel,
        });
        self.emit_updated(url);
        true
    }

    fn on_rendered(&mut self, url: String, ticket: u64, result: RenderResult) {
        let current = self
            .active
            .as_ref()
            .is_some_and(|active| active.ticket == ticket && active.url == url);
        if !self.running || !current {
            log_debug!("discarding stale completion for {url}");
            return;
        }

        self.active = None;
        self.queue.release(&url);

        if self.store.contains(&url) {
            self.process_result(&url, result);
        } else {
            log_info!("discarding result for deleted watch {url}");
        }

        self.advance();
    }

    fn process_result(&mut self, url: &str, result: RenderResult) {
        let Some(watch) = self.store.get_mut(url) else {
            return;
        };
        if result.is_ok() {
            watch.status = WatchStatus::Processing;
        }

        let detection = detector::apply(watch, &result, Utc::now());
        match &result {
            Ok(_) => log_info!("checked {url}: {}", detection.status),
            Err(err) => log_warn!("check of {url} failed: {err}"),
        }
        let notification = detection
            .changed
            .then(|| detector::change_notification(watch));

        if let Some((title, message)) = notification {
            notify_best_effort(self.notifier.as_ref(), &title, &message);
        }

        self.persist();
        self.publish_schedule();
        self.emit_updated(url);
    }

    fn advance(&mut self) {
        while let Some(url) = self.queue.advance() {
            if self.dispatch(&url) {
                return;
            }
            log_debug!("skipping {url}, no longer enabled");
        }
    }

    fn shutdown(&mut self) {
        // `stop` saves on its own when monitoring was running.
        if !self.stop() {
            self.persist();
        }
    }

    fn set_status(&mut self, url: &str, status: WatchStatus) {
        if let Some(watch) = self.store.get_mut(url) {
            watch.status = status;
        }
    }

    fn persist(&mut self) {
        if let Err(err) = self.store.save_if_dirty() {
            log::error!("Failed to save watches: {err}");
        }
    }

    fn publish_schedule(&self) {
        let entries: Vec<ScheduleEntry> = self.store.all().iter().map(ScheduleEntry::from).collect();
        self.schedule.send_if_modified(|current| {
            if *current == entries {
                false
            } else {
                *current = entries;
                true
            }
        });
    }

    fn emit_updated(&self, url: &str) {
        if let Some(watch) = self.get(url) {
            self.emit(WatchEvent::Updated { watch });
        }
    }

    fn emit(&self, event: WatchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
