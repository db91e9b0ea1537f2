//! Background dispatch for `unified_detect`.
//!
//! One consumer task drains an unbounded FIFO and scores one signal at a time
//! in submission order. Producers never wait on the consumer.

use super::aggregator::ThreatEngine;
use super::verdict::Verdict;
use crate::error::DispatchError;
use crate::signal::Signal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument, Span};

/// Outcome of a queue shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub processed: u64,
    /// Items still queued when the worker stopped
    pub discarded: usize,
    /// The in-flight item outlived the grace period
    pub timed_out: bool,
}

#[derive(Debug, Default)]
struct Counters {
    pending: AtomicUsize,
    processed: AtomicU64,
    submitted: AtomicU64,
}

pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<Signal>,
    stop: watch::Sender<bool>,
    accepting: AtomicBool,
    counters: Arc<Counters>,
    /// Signals scored or dropped by the worker; closed once the worker exits
    finished: watch::Receiver<u64>,
    worker: Mutex<Option<JoinHandle<()>>>,
    span: Span,
}

impl DispatchQueue {
    /// Start the consumer on the current tokio runtime. Verdicts are forwarded
    /// to `verdicts` when given.
    pub fn spawn(engine: Arc<ThreatEngine>, verdicts: Option<mpsc::UnboundedSender<Verdict>>) -> Self {
        Self::spawn_with_span(engine, verdicts, tracing::info_span!("dispatch"))
    }

    pub fn spawn_with_span(
        engine: Arc<ThreatEngine>,
        verdicts: Option<mpsc::UnboundedSender<Verdict>>,
        span: Span,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(false);
        let (finished_tx, finished) = watch::channel(0u64);
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(
            consume(engine, rx, stop_rx, finished_tx, verdicts, counters.clone())
                .instrument(span.clone()),
        );
        info!(parent: &span, "dispatch queue started");
        Self {
            tx,
            stop,
            accepting: AtomicBool::new(true),
            counters,
            finished,
            worker: Mutex::new(Some(worker)),
            span,
        }
    }

    /// Enqueue without waiting. Fails once shutdown has begun.
    pub fn submit(&self, signal: Signal) -> Result<(), DispatchError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(DispatchError::Closed);
        }
        self.counters.pending.fetch_add(1, Ordering::AcqRel);
        self.counters.submitted.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(signal).is_err() {
            self.counters.pending.fetch_sub(1, Ordering::AcqRel);
            self.counters.submitted.fetch_sub(1, Ordering::AcqRel);
            return Err(DispatchError::Closed);
        }
        Ok(())
    }

    /// Resolves once every signal submitted so far has been scored, or the
    /// worker has stopped.
    pub async fn idle(&self) {
        let target = self.counters.submitted.load(Ordering::Acquire);
        let mut finished = self.finished.clone();
        // Err means the worker is gone and nothing more will finish
        let _ = finished.wait_for(|done| *done >= target).await;
    }

    pub fn pending(&self) -> usize {
        self.counters.pending.load(Ordering::Acquire)
    }

    pub fn processed(&self) -> u64 {
        self.counters.processed.load(Ordering::Acquire)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stop intake, let the in-flight signal finish within `grace`, and discard
    /// whatever is still queued. Later calls only report.
    pub async fn shutdown(&self, grace: Duration) -> DispatchReport {
        self.accepting.store(false, Ordering::Release);
        let _ = self.stop.send(true);

        let handle = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        let timed_out = match handle {
            None => false,
            Some(mut worker) => match tokio::time::timeout(grace, &mut worker).await {
                Ok(Ok(())) => false,
                Ok(Err(e)) => {
                    error!(parent: &self.span, error = %e, "dispatch worker failed");
                    false
                }
                Err(_) => {
                    worker.abort();
                    true
                }
            },
        };

        let report = DispatchReport {
            processed: self.counters.processed.load(Ordering::Acquire),
            discarded: self.counters.pending.swap(0, Ordering::AcqRel),
            timed_out,
        };
        if report.timed_out || report.discarded > 0 {
            warn!(
                parent: &self.span,
                discarded = report.discarded,
                timed_out = report.timed_out,
                grace_ms = grace.as_millis() as u64,
                "queued signals discarded at shutdown"
            );
        }
        info!(parent: &self.span, processed = report.processed, "dispatch queue stopped");
        report
    }
}

async fn consume(
    engine: Arc<ThreatEngine>,
    mut rx: mpsc::UnboundedReceiver<Signal>,
    mut stop: watch::Receiver<bool>,
    finished: watch::Sender<u64>,
    verdicts: Option<mpsc::UnboundedSender<Verdict>>,
    counters: Arc<Counters>,
) {
    loop {
        let signal = tokio::select! {
            biased;
            _ = stop.changed() => break,
            next = rx.recv() => match next {
                Some(signal) => signal,
                None => break,
            },
        };
        counters.pending.fetch_sub(1, Ordering::AcqRel);

        let engine = engine.clone();
        match tokio::task::spawn_blocking(move || engine.unified_detect(&signal)).await {
            Ok(verdict) => {
                counters.processed.fetch_add(1, Ordering::AcqRel);
                debug!(threat = %verdict.threat_type, is_threat = verdict.is_threat, "signal processed");
                if let Some(out) = &verdicts {
                    let _ = out.send(verdict);
                }
            }
            Err(e) => error!(error = %e, "detection task failed"),
        }
        finished.send_modify(|n| *n += 1);
    }
    rx.close();
}

/// How `unified_detect` calls are executed.
pub enum Dispatcher {
    /// On the caller's thread, returning before the next statement
    Inline {
        engine: Arc<ThreatEngine>,
        verdicts: Option<mpsc::UnboundedSender<Verdict>>,
        processed: AtomicU64,
        accepting: AtomicBool,
    },
    Queued(DispatchQueue),
}

impl Dispatcher {
    pub fn inline(engine: Arc<ThreatEngine>, verdicts: Option<mpsc::UnboundedSender<Verdict>>) -> Self {
        Dispatcher::Inline {
            engine,
            verdicts,
            processed: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
        }
    }

    /// `Queued` must be created inside a tokio runtime.
    pub fn new(
        engine: Arc<ThreatEngine>,
        queued: bool,
        verdicts: Option<mpsc::UnboundedSender<Verdict>>,
    ) -> Self {
        if queued {
            Dispatcher::Queued(DispatchQueue::spawn(engine, verdicts))
        } else {
            Dispatcher::inline(engine, verdicts)
        }
    }

    pub fn dispatch(&self, signal: Signal) -> Result<(), DispatchError> {
        match self {
            Dispatcher::Inline {
                engine,
                verdicts,
                processed,
                accepting,
            } => {
                if !accepting.load(Ordering::Acquire) {
                    return Err(DispatchError::Closed);
                }
                let verdict = engine.unified_detect(&signal);
                processed.fetch_add(1, Ordering::AcqRel);
                if let Some(out) = verdicts {
                    let _ = out.send(verdict);
                }
                Ok(())
            }
            Dispatcher::Queued(queue) => queue.submit(signal),
        }
    }

    /// Wait until queued work has drained. Inline dispatch is always idle.
    pub async fn idle(&self) {
        if let Dispatcher::Queued(queue) = self {
            queue.idle().await;
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Dispatcher::Queued(_))
    }

    pub async fn shutdown(&self, grace: Duration) -> DispatchReport {
        match self {
            Dispatcher::Inline {
                processed,
                accepting,
                ..
            } => {
                accepting.store(false, Ordering::Release);
                DispatchReport {
                    processed: processed.load(Ordering::Acquire),
                    ..DispatchReport::default()
                }
            }
            Dispatcher::Queued(queue) => queue.shutdown(grace).await,
        }
    }
}
