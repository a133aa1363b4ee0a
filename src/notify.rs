use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::settings::NotificationSettings;

/// Delivers a user-visible alert.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str) -> Result<()>;
}

/// Failures are logged and swallowed; an alert is never worth aborting a check.
pub fn notify_best_effort(notifier: &dyn Notifier, title: &str, message: &str) {
    if let Err(err) = notifier.notify(title, message) {
        warn!("Failed to deliver notification '{title}': {err:#}");
    }
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) -> Result<()> {
        info!("[notify] {title}: {message}");
        Ok(())
    }
}

/// Spawns an external command (`notify-send` by default) with the title and
/// message as its two arguments. The child is reaped on a background thread
/// so the caller never blocks on it.
pub struct DesktopNotifier {
    program: String,
}

impl DesktopNotifier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) -> Result<()> {
        let mut child = Command::new(&self.program)
            .arg(title)
            .arg(message)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))?;

        let program = self.program.clone();
        thread::Builder::new()
            .name("notify-reaper".into())
            .spawn(move || match child.wait() {
                Ok(status) if !status.success() => warn!("{program} exited with {status}"),
                Ok(_) => {}
                Err(err) => warn!("Failed to wait for {program}: {err}"),
            })
            .context("failed to start notification reaper")?;
        Ok(())
    }
}

/// Sends every alert to each inner notifier, failing if any of them did.
pub struct FanoutNotifier {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn from_settings(settings: &NotificationSettings) -> Self {
        let mut notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];
        if settings.desktop {
            notifiers.push(Box::new(DesktopNotifier::new(settings.command.clone())));
        }
        Self { notifiers }
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, title: &str, message: &str) -> Result<()> {
        let mut first_error = None;
        for notifier in &self.notifiers {
            if let Err(err) = notifier.notify(title, message) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
