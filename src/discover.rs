use futures::io::AsyncBufReadExt;
use futures::stream::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{GlobalConfig, LogSourceConfig, resolve_overrides};
use crate::filter::SourceFilter;
use crate::format::{LineFormatter, split_timestamp};
use crate::kubernetes::{LogStreamOptions, PodDiscovery};
use crate::types::{LogRecord, POD_STREAM_CAPACITY, PodIdentity, PodStream};

/// Knobs for one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub workers: usize,
    pub follow: bool,
    pub refresh_interval: Duration,
    pub log_options: LogStreamOptions,
}

/// Tracks which pod identities already have a live stream. Claiming happens
/// before a reader task is spawned, so a rediscovered pod spawns nothing and
/// leaves no abandoned channel behind. A claimed identity stays claimed even
/// after its stream closes.
#[derive(Default)]
pub struct StreamRegistry {
    seen: Mutex<HashSet<PodIdentity>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only the first time an identity is seen.
    pub async fn claim(&self, identity: &PodIdentity) -> bool {
        self.seen.lock().await.insert(identity.clone())
    }
}

/// Everything a discovery worker needs, cloned per worker.
#[derive(Clone)]
struct WorkerContext {
    discovery: Arc<dyn PodDiscovery>,
    config: Arc<GlobalConfig>,
    registry: Arc<StreamRegistry>,
    intake: mpsc::Sender<PodStream>,
    log_options: LogStreamOptions,
    cancel: CancellationToken,
}

/// Start the discovery worker pool.
///
/// Sources are filtered by the name/tag predicates up front. Workers pop
/// source configs from a shared queue, resolve them into pod streams and
/// publish new streams to `intake`. In one-shot mode the queue is filled
/// exactly once; when the workers drain it and exit, the last `intake`
/// sender drops and its closure tells the aggregation engine that no
/// further streams will arrive. In follow mode the sources are re-queued
/// every refresh interval until cancellation.
pub fn spawn_discovery(
    discovery: Arc<dyn PodDiscovery>,
    config: Arc<GlobalConfig>,
    filter: &SourceFilter,
    options: DiscoveryOptions,
    intake: mpsc::Sender<PodStream>,
    cancel: CancellationToken,
) {
    let sources: Vec<LogSourceConfig> = config
        .sources
        .iter()
        .filter(|s| filter.matches(s))
        .cloned()
        .collect();
    if sources.is_empty() {
        warn!("no log sources match the active filters");
    }

    let (work_tx, work_rx) = mpsc::channel::<LogSourceConfig>(sources.len().max(1));
    let work_rx = Arc::new(Mutex::new(work_rx));

    let ctx = WorkerContext {
        discovery,
        config,
        registry: Arc::new(StreamRegistry::new()),
        intake,
        log_options: options.log_options.clone(),
        cancel: cancel.clone(),
    };

    for _ in 0..options.workers.max(1) {
        let ctx = ctx.clone();
        let work_rx = work_rx.clone();
        tokio::spawn(async move {
            loop {
                // The lock is held only while waiting for the next config.
                let source = {
                    let mut rx = work_rx.lock().await;
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => None,
                        source = rx.recv() => source,
                    }
                };
                let Some(source) = source else { break };
                resolve_source(&ctx, &source).await;
            }
        });
    }

    tokio::spawn(async move {
        loop {
            debug!("looking for new pods");
            for source in &sources {
                if work_tx.send(source.clone()).await.is_err() {
                    return;
                }
            }
            if !options.follow {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(options.refresh_interval) => {}
            }
        }
        // Dropping work_tx closes the queue and lets the workers drain out.
        debug!("discovery pass enqueued, queue closed");
    });
}

/// Turn one log source into live pod streams: resolve overrides, compile the
/// formatter, list matching pods and spawn one reader task per pod not
/// already claimed. Failures here are per-source or per-pod; they never
/// abort the run.
async fn resolve_source(ctx: &WorkerContext, source: &LogSourceConfig) {
    let effective = match resolve_overrides(&ctx.config, source) {
        Ok(effective) => effective,
        Err(e) => {
            warn!("skipping source: {e:#}");
            return;
        }
    };

    let formatter = match LineFormatter::new(&effective.template, &ctx.config.templates) {
        Ok(formatter) => Arc::new(formatter),
        Err(e) => {
            warn!("skipping source '{}': {e:#}", source.name.trim());
            return;
        }
    };

    let pods = match ctx
        .discovery
        .list_pods(&effective.namespace, &source.labels)
        .await
    {
        Ok(pods) => pods,
        Err(e) => {
            warn!(
                "listing pods for source '{}' failed: {e:#}",
                source.name.trim()
            );
            return;
        }
    };

    for pod_name in pods {
        let identity = PodIdentity {
            namespace: effective.namespace.clone(),
            pod_name,
        };
        if !ctx.registry.claim(&identity).await {
            continue;
        }
        debug!("new pod {identity}");

        let (tx, rx) = mpsc::channel(POD_STREAM_CAPACITY);
        spawn_reader(
            ctx.discovery.clone(),
            identity.clone(),
            source.name.clone(),
            formatter.clone(),
            ctx.config.vars.clone(),
            ctx.log_options.clone(),
            tx,
            ctx.cancel.clone(),
        );

        if ctx.intake.send(PodStream { identity, rx }).await.is_err() {
            // Aggregation is gone; no point resolving further pods.
            return;
        }
    }
}

/// Spawn the task that owns one pod's log stream end to end: read lines,
/// parse, render, push into the bounded channel. The task is the channel's
/// only writer and closes it by dropping `tx` on end-of-stream, read error
/// or cancellation.
#[allow(clippy::too_many_arguments)]
fn spawn_reader(
    discovery: Arc<dyn PodDiscovery>,
    identity: PodIdentity,
    source_name: String,
    formatter: Arc<LineFormatter>,
    vars: serde_json::Map<String, serde_json::Value>,
    options: LogStreamOptions,
    tx: mpsc::Sender<LogRecord>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let stream = match discovery
            .open_log_stream(&identity.namespace, &identity.pod_name, &options)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!("{identity}: {e:#}");
                return;
            }
        };

        let mut lines = stream.lines();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = lines.next() => next,
            };
            let Some(next) = next else {
                debug!("{identity}: log stream ended");
                break;
            };
            let line = match next {
                Ok(line) => line,
                Err(e) => {
                    warn!("{identity}: error reading log stream: {e}");
                    break;
                }
            };

            let Some((time, payload)) = split_timestamp(&line) else {
                debug!("{identity}: skipping malformed line");
                continue;
            };

            let mut record = LogRecord {
                source: source_name.clone(),
                namespace: identity.namespace.clone(),
                pod: identity.pod_name.clone(),
                time: time.to_string(),
                message: payload.to_string(),
                vars: vars.clone(),
            };
            match formatter.render(&record) {
                Ok(rendered) => record.message = rendered,
                Err(e) => debug!("{identity}: emitting raw line, render failed: {e:#}"),
            }

            if tx.send(record).await.is_err() {
                break;
            }
        }
    });
}
