//! Form controller
//!
//! Toolkit-agnostic half of the joiner window: validates the three form
//! fields, runs at most one join on a background thread, and marshals its
//! log lines and final notification back to the foreground over a channel.
//! Only the foreground touches the [`LogConsole`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info};

use crate::backend::MediaBackend;
use crate::config::JoinerConfig;
use crate::error::{JoinError, Result};
use crate::joiner::{ChunkedJoiner, JoinJob, JoinReport};
use crate::metrics::JoinMetrics;
use crate::sink::{LogConsole, LogEntry, LogSink};

/// The three user inputs
#[derive(Debug, Clone)]
pub struct JoinForm {
    pub input_dir: String,
    pub output_dir: String,
    pub format: String,
}

impl Default for JoinForm {
    fn default() -> Self {
        Self {
            input_dir: String::new(),
            output_dir: String::new(),
            format: crate::joiner::DEFAULT_FORMAT.to_string(),
        }
    }
}

impl JoinForm {
    pub fn new(input_dir: impl Into<String>, output_dir: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            format: format.into(),
        }
    }

    /// Validate the fields and build the job
    pub fn to_job(&self, config: &JoinerConfig) -> Result<JoinJob> {
        let input = self.input_dir.trim();
        let output = self.output_dir.trim();
        if input.is_empty() || output.is_empty() || self.format.trim().trim_matches('.').is_empty() {
            return Err(JoinError::InvalidJob("Please select folders and format.".to_string()));
        }

        let job = JoinJob::new(PathBuf::from(input), PathBuf::from(output), &self.format)?
            .with_chunk_size(config.chunk_size)
            .with_filter(config.filter.clone());
        job.validate()?;
        Ok(job)
    }
}

/// Completion dialog contents
#[derive(Debug, Clone)]
pub enum Notification {
    Done { output: PathBuf, report: JoinReport },
    Error { title: String, message: String },
}

impl Notification {
    fn from_outcome(outcome: Result<JoinReport>) -> Self {
        match outcome {
            Ok(report) => Notification::Done {
                output: report.output.clone(),
                report,
            },
            Err(e) => Notification::Error {
                title: e.title().to_string(),
                message: e.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Notification::Done { .. })
    }

    pub fn title(&self) -> &str {
        match self {
            Notification::Done { .. } => "Done",
            Notification::Error { title, .. } => title.as_str(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            Notification::Done { output, .. } => {
                format!("Joined video saved as:\n{}", output.display())
            }
            Notification::Error { message, .. } => message.clone(),
        }
    }
}

/// Messages from the background join to the foreground
#[derive(Debug, Clone)]
pub enum ShellEvent {
    Log(LogEntry),
    Finished(Notification),
}

/// Sink used by the background thread: every entry becomes a channel message
struct ChannelSink {
    tx: UnboundedSender<ShellEvent>,
}

impl LogSink for ChannelSink {
    fn append(&self, entry: LogEntry) {
        debug!(target: "towel_joiner::console", "{}", entry.message);
        // Receiver gone means the foreground is shutting down
        let _ = self.tx.send(ShellEvent::Log(entry));
    }
}

/// Clears the busy flag when the background join ends, panics included
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct JoinController<B: MediaBackend + 'static> {
    backend: Arc<B>,
    config: JoinerConfig,
    busy: Arc<AtomicBool>,
    tx: UnboundedSender<ShellEvent>,
    rx: UnboundedReceiver<ShellEvent>,
    console: LogConsole,
    metrics: Option<Arc<JoinMetrics>>,
}

impl<B: MediaBackend + 'static> JoinController<B> {
    pub fn new(backend: Arc<B>, config: JoinerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            backend,
            config,
            busy: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
            console: LogConsole::new(),
            metrics: None,
        }
    }

    pub fn config(&self) -> &JoinerConfig {
        &self.config
    }

    /// True while a join runs; the trigger stays disabled meanwhile
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn console(&self) -> &LogConsole {
        &self.console
    }

    /// Counters of the most recently started join
    pub fn metrics(&self) -> Option<Arc<JoinMetrics>> {
        self.metrics.clone()
    }

    /// Validate the form and start the join in the background.
    ///
    /// Rejected with [`JoinError::JobInProgress`] while another join runs.
    pub fn start(&mut self, form: &JoinForm) -> Result<JoinJob> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(JoinError::JobInProgress);
        }
        let guard = BusyGuard(Arc::clone(&self.busy));

        let job = form.to_job(&self.config)?;
        let metrics = JoinMetrics::new();
        self.metrics = Some(Arc::clone(&metrics));

        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        let worker_job = job.clone();

        info!(
            "Starting join: {} -> {}",
            job.input_dir.display(),
            job.final_path().display()
        );

        thread::Builder::new()
            .name("towel-join".into())
            .spawn(move || {
                let sink = ChannelSink { tx: tx.clone() };
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    ChunkedJoiner::new(backend.as_ref(), &sink)
                        .with_metrics(metrics)
                        .join(&worker_job)
                }));

                let notification = match outcome {
                    Ok(result) => Notification::from_outcome(result),
                    Err(_) => {
                        error!("Join worker panicked");
                        Notification::Error {
                            title: "Error".to_string(),
                            message: "The join stopped unexpectedly.".to_string(),
                        }
                    }
                };
                // Trigger is enabled again before the foreground hears about it
                drop(guard);
                let _ = tx.send(ShellEvent::Finished(notification));
            })
            .map_err(|e| JoinError::Worker(e.to_string()))?;

        Ok(job)
    }

    /// Drain pending events without blocking. Log lines land in the console;
    /// returns the notification once the join has finished.
    pub fn pump(&mut self) -> Option<Notification> {
        loop {
            match self.rx.try_recv() {
                Ok(ShellEvent::Log(entry)) => self.console.push(entry),
                Ok(ShellEvent::Finished(notification)) => return Some(notification),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Wait for the next event, recording log lines in the console
    pub async fn next_event(&mut self) -> Option<ShellEvent> {
        let event = self.rx.recv().await?;
        if let ShellEvent::Log(entry) = &event {
            self.console.push(entry.clone());
        }
        Some(event)
    }

    /// Wait until the running join finishes
    pub async fn next_notification(&mut self) -> Option<Notification> {
        while let Some(event) = self.next_event().await {
            if let ShellEvent::Finished(notification) = event {
                return Some(notification);
            }
        }
        None
    }
}
