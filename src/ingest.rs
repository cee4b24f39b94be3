//! Ingestion merger
//!
//! Every candidate source runs as its own task and writes into one shared,
//! unbounded queue. A supervisor task joins all source tasks and only then
//! drops the last sender, so consumers see end-of-stream exactly when every
//! source has finished. A source that errors or panics counts as finished.

use crate::error::Result;
use async_trait::async_trait;
use futures::{FutureExt, Stream};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Write-only end of the candidate queue handed to one source
pub struct CandidateSink {
    tx: UnboundedSender<String>,
    emitted: Arc<AtomicUsize>,
}

impl CandidateSink {
    /// Push one raw candidate; returns false once the consumer is gone
    pub fn emit(&self, candidate: impl Into<String>) -> bool {
        if self.tx.send(candidate.into()).is_ok() {
            self.emitted.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A producer of raw `[user:pass@]ip:port` strings
#[async_trait]
pub trait CandidateSource: Send + Sync {
    fn name(&self) -> &str;

    /// Emit candidates into `sink` and return when done
    async fn run(&self, sink: CandidateSink) -> Result<()>;
}

/// Merged candidate stream; ends once every source has finished
pub struct CandidateStream {
    rx: UnboundedReceiver<String>,
}

impl Stream for CandidateStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Start every source and merge their output into one stream
pub fn merge(sources: &[Arc<dyn CandidateSource>]) -> CandidateStream {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut tasks = JoinSet::new();

    for source in sources {
        let source = Arc::clone(source);
        let emitted = Arc::new(AtomicUsize::new(0));
        let sink = CandidateSink {
            tx: tx.clone(),
            emitted: Arc::clone(&emitted),
        };

        tasks.spawn(async move {
            let outcome = AssertUnwindSafe(source.run(sink)).catch_unwind().await;
            let emitted = emitted.load(Ordering::Relaxed);
            match outcome {
                Ok(Ok(())) => {
                    debug!(source = source.name(), emitted, "source finished");
                }
                Ok(Err(e)) => {
                    warn!(source = source.name(), emitted, error = %e, "source failed");
                }
                Err(_) => {
                    warn!(source = source.name(), emitted, "source panicked");
                }
            }
            emitted
        });
    }

    let source_count = sources.len();
    tokio::spawn(async move {
        let mut total = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(emitted) => total += emitted,
                Err(e) => warn!(error = %e, "source task aborted"),
            }
        }
        drop(tx);
        info!(sources = source_count, candidates = total, "all sources finished");
    });

    CandidateStream { rx }
}
