use std::{
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context};
use log::{error, info};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot, watch, Mutex as AsyncMutex};

use crate::error::MonitorError;
use crate::notify::Notifier;
use crate::renderer::Renderer;
use crate::store::WatchStore;
use crate::watch::{normalize_url, Watch, WatchConfig};

use super::events::WatchEvent;
use super::scheduler::{ScheduleEntry, SchedulerController};
use super::worker::{Command, Worker};

const EVENT_CAPACITY: usize = 256;

struct MonitorInner {
    sender: mpsc::Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(Command::Shutdown) {
                error!("Failed to send shutdown to monitor thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join monitor thread: {join_err:?}");
            }
        }
    }
}

/// Cheap-to-clone handle to the monitor. All state lives on the worker
/// thread; every operation is a message to it.
///
/// Must be created inside a tokio runtime, which is used to drive the
/// scheduler and the renderer.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
    scheduler: Arc<AsyncMutex<SchedulerController>>,
    events: broadcast::Sender<WatchEvent>,
    schedule: watch::Receiver<Vec<ScheduleEntry>>,
}

impl Monitor {
    pub fn new(
        store: WatchStore,
        renderer: Arc<dyn Renderer>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, MonitorError> {
        let runtime = Handle::try_current()
            .map_err(|err| anyhow!("monitor needs a tokio runtime: {err}"))?;

        let (command_tx, command_rx) = mpsc::channel::<Command>();
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (schedule_tx, schedule_rx) = watch::channel(Vec::new());

        let store_path = store.path().to_path_buf();
        let worker = Worker::new(
            store,
            renderer,
            notifier,
            runtime,
            command_tx.clone(),
            events_tx.clone(),
            schedule_tx,
        );

        let handle = thread::Builder::new()
            .name("pagewatch-monitor".into())
            .spawn(move || worker.run(command_rx))
            .context("failed to spawn monitor worker thread")?;

        info!("Monitor initialized with {}", store_path.display());

        Ok(Self {
            inner: Arc::new(MonitorInner {
                sender: command_tx,
                worker: Mutex::new(Some(handle)),
            }),
            scheduler: Arc::new(AsyncMutex::new(SchedulerController::new())),
            events: events_tx,
            schedule: schedule_rx,
        })
    }

    async fn execute<F, T>(&self, task: F) -> Result<T, MonitorError>
    where
        F: FnOnce(&mut Worker) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = Command::Execute(Box::new(move |worker| {
            if reply_tx.send(task(worker)).is_err() {
                error!("Monitor caller dropped before receiving result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|_| MonitorError::WorkerGone)?;

        reply_rx.await.map_err(|_| MonitorError::WorkerGone)
    }

    /// Validates `config` and adds the watch, or reconfigures the existing
    /// one for the same URL while keeping what it has observed.
    pub async fn add_or_update_watch(&self, config: WatchConfig) -> Result<Watch, MonitorError> {
        let validated = config.validate()?;
        self.execute(move |worker| worker.upsert(validated)).await
    }

    pub async fn delete_watch(&self, url: &str) -> Result<Watch, MonitorError> {
        let key = lookup_key(url);
        let lookup = key.clone();
        self.execute(move |worker| worker.delete(&lookup))
            .await?
            .ok_or(MonitorError::UnknownWatch(key))
    }

    /// Insertion order.
    pub async fn list_watches(&self) -> Result<Vec<Watch>, MonitorError> {
        self.execute(|worker| worker.list()).await
    }

    pub async fn get_watch(&self, url: &str) -> Result<Option<Watch>, MonitorError> {
        let key = lookup_key(url);
        self.execute(move |worker| worker.get(&key)).await
    }

    /// Returns `false` when monitoring was already running.
    pub async fn start_monitoring(&self) -> Result<bool, MonitorError> {
        let mut scheduler = self.scheduler.lock().await;
        let started = self.execute(|worker| worker.start()).await?;

        if !scheduler.is_active() {
            let sender = self.inner.sender.clone();
            scheduler.start(self.schedule.clone(), move |report| {
                sender.send(Command::Tick(report)).is_ok()
            })?;
        }
        Ok(started)
    }

    /// Returns `false` when monitoring was not running.
    pub async fn stop_monitoring(&self) -> Result<bool, MonitorError> {
        let mut scheduler = self.scheduler.lock().await;
        scheduler.stop().await;
        self.execute(|worker| worker.stop()).await
    }

    pub async fn is_running(&self) -> Result<bool, MonitorError> {
        self.execute(|worker| worker.is_running()).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    pub async fn save(&self) -> Result<(), MonitorError> {
        Ok(self.execute(|worker| worker.save()).await??)
    }

    /// Stops monitoring and saves pending changes. A store that was only
    /// read is left as it is on disk. The worker thread itself exits when
    /// the last handle is dropped.
    pub async fn shutdown(&self) -> Result<(), MonitorError> {
        self.stop_monitoring().await?;
        self.execute(|worker| worker.flush()).await??;
        Ok(())
    }
}

/// Watches are keyed by normalized URL; fall back to the raw text so a key
/// that does not normalize still reports as unknown.
fn lookup_key(url: &str) -> String {
    normalize_url(url).unwrap_or_else(|_| url.trim().to_string())
}
