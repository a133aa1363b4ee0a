use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;
use tokio::sync::{mpsc, oneshot};

use pagewatch_lib::{
    error::{ConfigError, MonitorError, RenderError},
    monitor::{Monitor, WatchEvent},
    notify::Notifier,
    renderer::{Extraction, RenderResult, Renderer},
    store::WatchStore,
    watch::{Selector, WatchConfig, WatchStatus},
    WATCHES_FILE,
};

type LoadRequest = (String, oneshot::Sender<RenderResult>);

/// Each load blocks until the test answers it.
struct GatedRenderer {
    requests: mpsc::UnboundedSender<LoadRequest>,
}

#[async_trait]
impl Renderer for GatedRenderer {
    async fn load_and_extract(&self, url: &str, _selector: Option<&Selector>) -> RenderResult {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.requests.send((url.to_string(), reply_tx)).is_err() {
            return Err(RenderError::Load("test finished".into()));
        }
        reply_rx
            .await
            .unwrap_or_else(|_| Err(RenderError::Load("reply dropped".into())))
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingNotifier {
    fn titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(title, _)| title.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, message: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
        Ok(())
    }
}

struct Harness {
    monitor: Monitor,
    loads: mpsc::UnboundedReceiver<LoadRequest>,
    notifier: RecordingNotifier,
}

impl Harness {
    fn new(dir: &Path) -> Self {
        let (requests, loads) = mpsc::unbounded_channel();
        let notifier = RecordingNotifier::default();
        let store = WatchStore::open(dir.join(WATCHES_FILE));
        let monitor = Monitor::new(
            store,
            Arc::new(GatedRenderer { requests }),
            Arc::new(notifier.clone()),
        )
        .unwrap();

        Self {
            monitor,
            loads,
            notifier,
        }
    }

    async fn add(&self, url: &str) {
        self.monitor
            .add_or_update_watch(WatchConfig::new(url).interval(60))
            .await
            .unwrap();
    }

    async fn next_load(&mut self) -> LoadRequest {
        tokio::time::timeout(Duration::from_secs(5), self.loads.recv())
            .await
            .expect("no load was dispatched")
            .expect("renderer dropped")
    }

    async fn assert_no_load(&mut self) {
        let extra = tokio::time::timeout(Duration::from_millis(300), self.loads.recv()).await;
        assert!(extra.is_err(), "unexpected load: {:?}", extra.map(|r| r.map(|(url, _)| url)));
    }

    async fn status(&self, url: &str) -> WatchStatus {
        self.monitor
            .get_watch(url)
            .await
            .unwrap()
            .map(|watch| watch.status)
            .unwrap()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn second_due_url_waits_for_first_completion() {
    let dir = tempdir().unwrap();
    let mut harness = Harness::new(dir.path());
    harness.add("http://a.test").await;
    harness.add("http://b.test").await;

    assert!(harness.monitor.start_monitoring().await.unwrap());

    let (url, reply) = harness.next_load().await;
    assert_eq!(url, "http://a.test");
    harness.assert_no_load().await;
    assert_eq!(harness.status("http://a.test").await, WatchStatus::Loading);
    assert_eq!(harness.status("http://b.test").await, WatchStatus::Queued);

    reply.send(Ok(Extraction::found("X"))).unwrap();

    let (url, _reply) = harness.next_load().await;
    assert_eq!(url, "http://b.test");

    let a = harness.monitor.get_watch("http://a.test").await.unwrap().unwrap();
    assert_eq!(a.status, WatchStatus::ChangeDetected);
    assert_eq!(a.last_content, "X");
    assert_eq!(a.checks_dispatched, 1);
    assert_eq!(harness.notifier.titles(), ["Change Detected on http://a.test"]);

    harness.monitor.stop_monitoring().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn deleting_an_in_flight_watch_discards_its_result() {
    let dir = tempdir().unwrap();
    let mut harness = Harness::new(dir.path());
    harness.add("http://a.test").await;
    harness.add("http://b.test").await;
    harness.monitor.start_monitoring().await.unwrap();

    let (url, reply) = harness.next_load().await;
    assert_eq!(url, "http://a.test");

    let removed = harness.monitor.delete_watch("a.test").await.unwrap();
    assert_eq!(removed.url, "http://a.test");
    let _ = reply.send(Ok(Extraction::found("X")));

    let (url, _reply) = harness.next_load().await;
    assert_eq!(url, "http://b.test");

    let urls: Vec<String> = harness
        .monitor
        .list_watches()
        .await
        .unwrap()
        .into_iter()
        .map(|watch| watch.url)
        .collect();
    assert_eq!(urls, ["http://b.test"]);
    assert!(harness.notifier.titles().is_empty());

    assert!(matches!(
        harness.monitor.delete_watch("http://a.test").await,
        Err(MonitorError::UnknownWatch(_))
    ));

    harness.monitor.stop_monitoring().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_clears_pending_and_ignores_late_results() {
    let dir = tempdir().unwrap();
    let mut harness = Harness::new(dir.path());
    harness.add("http://a.test").await;
    harness.add("http://b.test").await;
    harness.monitor.start_monitoring().await.unwrap();

    let (_, reply) = harness.next_load().await;
    assert!(harness.monitor.stop_monitoring().await.unwrap());
    assert!(!harness.monitor.stop_monitoring().await.unwrap());

    let _ = reply.send(Ok(Extraction::found("late")));
    harness.assert_no_load().await;

    assert!(!harness.monitor.is_running().await.unwrap());
    for url in ["http://a.test", "http://b.test"] {
        let watch = harness.monitor.get_watch(url).await.unwrap().unwrap();
        assert_eq!(watch.status, WatchStatus::Idle);
        assert_eq!(watch.last_checked_at, None);
        assert_eq!(watch.last_content, "");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_watches_are_never_loaded() {
    let dir = tempdir().unwrap();
    let mut harness = Harness::new(dir.path());
    harness
        .monitor
        .add_or_update_watch(WatchConfig::new("http://off.test").interval(10).enabled(false))
        .await
        .unwrap();
    harness.add("http://on.test").await;
    harness.monitor.start_monitoring().await.unwrap();

    let (url, reply) = harness.next_load().await;
    assert_eq!(url, "http://on.test");
    reply.send(Ok(Extraction::not_found())).unwrap();
    harness.assert_no_load().await;

    assert_eq!(harness.status("http://on.test").await, WatchStatus::ElementNotFound);
    assert_eq!(harness.status("http://off.test").await, WatchStatus::Idle);
    assert!(harness.notifier.titles().is_empty());

    harness.monitor.stop_monitoring().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn disabling_a_pending_watch_drops_it_from_the_queue() {
    let dir = tempdir().unwrap();
    let mut harness = Harness::new(dir.path());
    harness.add("http://a.test").await;
    harness.add("http://b.test").await;
    harness.monitor.start_monitoring().await.unwrap();

    let (url, reply) = harness.next_load().await;
    assert_eq!(url, "http://a.test");
    assert_eq!(harness.status("http://b.test").await, WatchStatus::Queued);

    let disabled = harness
        .monitor
        .add_or_update_watch(WatchConfig::new("http://b.test").interval(60).enabled(false))
        .await
        .unwrap();
    assert!(!disabled.enabled);
    assert_eq!(disabled.status, WatchStatus::Idle);

    reply.send(Ok(Extraction::found("X"))).unwrap();
    harness.assert_no_load().await;

    assert_eq!(harness.status("http://a.test").await, WatchStatus::ChangeDetected);
    let b = harness.monitor.get_watch("http://b.test").await.unwrap().unwrap();
    assert_eq!(b.status, WatchStatus::Idle);
    assert_eq!(b.checks_dispatched, 0);
    assert_eq!(b.last_checked_at, None);

    harness.monitor.stop_monitoring().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn terminal_status_goes_straight_to_queued() {
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join(WATCHES_FILE),
        r#"{"version":1,"watches":[
            {"url":"http://fresh.test","intervalSecs":60},
            {"url":"http://failed.test","intervalSecs":60,"status":"loadFailed",
             "lastCheckedAt":"2020-01-01T00:00:00Z","lastError":"HTTP 500"}
        ]}"#,
    )
    .unwrap();

    let mut harness = Harness::new(dir.path());
    assert_eq!(harness.status("http://failed.test").await, WatchStatus::LoadFailed);

    let mut events = harness.monitor.subscribe();
    harness.monitor.start_monitoring().await.unwrap();
    let (url, _reply) = harness.next_load().await;
    assert_eq!(url, "http://fresh.test");
    assert_eq!(harness.status("http://failed.test").await, WatchStatus::Queued);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let WatchEvent::Updated { watch } = event {
            if watch.url == "http://failed.test" {
                seen.push(watch.status);
            }
        }
    }
    assert!(!seen.contains(&WatchStatus::Idle));

    harness.monitor.stop_monitoring().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unreadable_watch_file_survives_a_read_only_session() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(WATCHES_FILE);
    let original = r#"{"version":1,"watches":[{"url":"http://a.test","intervalSecs":60},]}"#;
    std::fs::write(&path, original).unwrap();

    {
        let harness = Harness::new(dir.path());
        assert!(harness.monitor.list_watches().await.unwrap().is_empty());
        harness.monitor.shutdown().await.unwrap();
    }
    assert_eq!(std::fs::read_to_string(&path).unwrap(), original);

    {
        let harness = Harness::new(dir.path());
        harness.add("http://b.test").await;
        harness.monitor.shutdown().await.unwrap();
    }
    let quarantined = WatchStore::new(path.clone()).quarantine_path();
    assert_eq!(std::fs::read_to_string(quarantined).unwrap(), original);
    assert!(WatchStore::open(path).contains("http://b.test"));
}

#[tokio::test(flavor = "multi_thread")]
async fn load_failure_is_recorded_without_notification() {
    let dir = tempdir().unwrap();
    let mut harness = Harness::new(dir.path());
    harness.add("http://a.test").await;
    harness.monitor.start_monitoring().await.unwrap();

    let (_, reply) = harness.next_load().await;
    reply
        .send(Err(RenderError::Load("HTTP 503 Service Unavailable".into())))
        .unwrap();
    harness.assert_no_load().await;

    let watch = harness.monitor.get_watch("http://a.test").await.unwrap().unwrap();
    assert_eq!(watch.status, WatchStatus::LoadFailed);
    assert!(watch.last_checked_at.is_some());
    assert_eq!(watch.last_error.as_deref(), Some("HTTP 503 Service Unavailable"));
    assert!(harness.notifier.titles().is_empty());

    harness.monitor.stop_monitoring().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribers_see_status_changes_and_results_persist() {
    let dir = tempdir().unwrap();
    {
        let mut harness = Harness::new(dir.path());
        let mut events = harness.monitor.subscribe();
        harness.add("http://a.test").await;
        harness.monitor.start_monitoring().await.unwrap();

        let (_, reply) = harness.next_load().await;
        reply.send(Ok(Extraction::found("price: 10"))).unwrap();

        let changed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(WatchEvent::Updated { watch }) if watch.status == WatchStatus::ChangeDetected => {
                        break watch;
                    }
                    Ok(_) => continue,
                    Err(err) => panic!("event stream ended: {err}"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(changed.last_content, "price: 10");

        // Reconfiguring keeps what was observed.
        let updated = harness
            .monitor
            .add_or_update_watch(
                WatchConfig::new("a.test")
                    .interval(120)
                    .selector("span", "id", "price"),
            )
            .await
            .unwrap();
        assert_eq!(updated.interval_secs, 120);
        assert_eq!(updated.last_content, "price: 10");
        assert_eq!(updated.element_description(), "id=price (span)");

        harness.monitor.save().await.unwrap();
        let on_disk = WatchStore::open(dir.path().join(WATCHES_FILE));
        assert_eq!(on_disk.get("http://a.test").unwrap().interval_secs, 120);

        harness.monitor.shutdown().await.unwrap();
    }

    let reopened = WatchStore::open(dir.path().join(WATCHES_FILE));
    let watch = reopened.get("http://a.test").unwrap();
    assert_eq!(watch.last_content, "price: 10");
    assert_eq!(watch.interval_secs, 120);
    assert!(watch.last_changed_at.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_config_is_rejected() {
    let dir = tempdir().unwrap();
    let harness = Harness::new(dir.path());

    let too_short = harness
        .monitor
        .add_or_update_watch(WatchConfig::new("http://a.test").interval(5))
        .await;
    assert!(matches!(
        too_short,
        Err(MonitorError::Config(ConfigError::IntervalTooShort { .. }))
    ));

    let partial = harness
        .monitor
        .add_or_update_watch(WatchConfig::new("http://a.test").selector("div", "", ""))
        .await;
    assert!(matches!(
        partial,
        Err(MonitorError::Config(ConfigError::IncompleteSelector { .. }))
    ));

    assert!(harness.monitor.list_watches().await.unwrap().is_empty());
}
