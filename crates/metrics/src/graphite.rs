//! Periodic Graphite export of a registry snapshot.
//!
//! Supports the plaintext protocol over TCP or UDP and the batched
//! pickle protocol over TCP. Each tick serializes the registry's
//! current counters, gauges and timers and transmits them; a transport
//! failure is logged and the schedule continues. Stopping is triggered
//! by the application-shutdown hook and cancels the task before the
//! handle is released, so no tick fires afterwards.

use {
    crate::{
        config::{GraphiteProtocol, GraphiteReporterConfig, TimeUnit},
        error::{ConfigError, ExportError},
        registry::{MetricRegistry, metric_name},
    },
    metrics_util::storage::Summary,
    std::{
        collections::HashMap,
        fmt::Write as _,
        sync::{Arc, Mutex, PoisonError},
        time::{Instant, SystemTime, UNIX_EPOCH},
    },
    tokio::{
        io::AsyncWriteExt,
        net::{TcpStream, UdpSocket},
        task::JoinHandle,
        time::{self, MissedTickBehavior},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

const DEFAULT_PICKLE_BATCH: usize = 100;
// conservative ethernet-safe payload for plaintext datagrams
const MAX_UDP_PAYLOAD: usize = 1400;

const QUANTILES: [(&str, f64); 6] = [
    ("p50", 0.5),
    ("p75", 0.75),
    ("p95", 0.95),
    ("p98", 0.98),
    ("p99", 0.99),
    ("p999", 0.999),
];

/// Handle to a started exporter.
pub struct GraphiteExporter {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GraphiteExporter {
    /// Starts the periodic export of `registry` per `config`. The
    /// first report happens one period after start.
    pub fn start(
        config: GraphiteReporterConfig,
        registry: Arc<MetricRegistry>,
    ) -> Result<Self, ConfigError> {
        let period = config.period()?;
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        info!(
            host = %config.host,
            port = config.port,
            protocol = ?config.protocol,
            ?period,
            "graphite reporter started"
        );
        let task = tokio::spawn(async move {
            let mut state = ReportState::new();
            let mut ticks = time::interval_at(time::Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => break,
                    _ = ticks.tick() => {
                        if let Err(error) = report_once(&config, &registry, &mut state).await {
                            warn!(%error, host = %config.host, "graphite report failed");
                        }
                    }
                }
            }
        });
        Ok(Self {
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Cancels the periodic task and waits for it to finish before
    /// returning; the transport is released by then.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
        debug!("graphite reporter stopped");
    }
}

/// Per-exporter accumulation across ticks: total counts and rolling
/// duration summaries for every timer seen so far.
struct ReportState {
    started: Instant,
    timers: HashMap<String, TimerStats>,
}

struct TimerStats {
    summary: Summary,
    count: u64,
    sum: f64,
}

impl ReportState {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            timers: HashMap::new(),
        }
    }
}

impl TimerStats {
    fn new() -> Self {
        Self {
            summary: Summary::with_defaults(),
            count: 0,
            sum: 0.0,
        }
    }
}

fn convert_rate(per_second: f64, unit: TimeUnit) -> f64 {
    per_second * unit.as_secs()
}

fn convert_duration(seconds: f64, unit: TimeUnit) -> f64 {
    seconds / unit.as_secs()
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

/// Builds the full snapshot, with the exporter prefix applied and all
/// rate/duration conversions done. Absent gauge values are skipped.
fn collect(
    registry: &MetricRegistry,
    state: &mut ReportState,
    prefix: Option<&str>,
    rate_unit: TimeUnit,
    duration_unit: TimeUnit,
) -> Vec<(String, f64)> {
    let prefix = prefix.unwrap_or_default();
    let elapsed = state.started.elapsed().as_secs_f64().max(f64::EPSILON);
    let mut samples = Vec::new();

    registry.visit_counters(|name, count| {
        samples.push((metric_name([prefix, name, "count"]), count as f64));
        samples.push((
            metric_name([prefix, name, "mean_rate"]),
            convert_rate(count as f64 / elapsed, rate_unit),
        ));
    });

    registry.visit_gauges(|name, value| {
        if let Some(value) = value {
            samples.push((metric_name([prefix, name]), value));
        }
    });

    registry.drain_histograms(|name, drained| {
        let stats = state
            .timers
            .entry(name.to_owned())
            .or_insert_with(TimerStats::new);
        for sample in drained {
            stats.summary.add(*sample);
            stats.count += 1;
            stats.sum += *sample;
        }
    });

    for (name, stats) in &state.timers {
        let name = name.as_str();
        samples.push((metric_name([prefix, name, "count"]), stats.count as f64));
        samples.push((
            metric_name([prefix, name, "mean_rate"]),
            convert_rate(stats.count as f64 / elapsed, rate_unit),
        ));
        if stats.count == 0 {
            continue;
        }
        samples.push((
            metric_name([prefix, name, "min"]),
            convert_duration(stats.summary.min(), duration_unit),
        ));
        samples.push((
            metric_name([prefix, name, "max"]),
            convert_duration(stats.summary.max(), duration_unit),
        ));
        samples.push((
            metric_name([prefix, name, "mean"]),
            convert_duration(stats.sum / stats.count as f64, duration_unit),
        ));
        for (label, quantile) in QUANTILES {
            if let Some(value) = stats.summary.quantile(quantile) {
                samples.push((
                    metric_name([prefix, name, label]),
                    convert_duration(value, duration_unit),
                ));
            }
        }
    }

    samples
}

async fn report_once(
    config: &GraphiteReporterConfig,
    registry: &MetricRegistry,
    state: &mut ReportState,
) -> Result<(), ExportError> {
    let samples = collect(
        registry,
        state,
        config.prefix.as_deref(),
        config.rate_unit,
        config.duration_unit,
    );
    if samples.is_empty() {
        return Ok(());
    }
    let timestamp = unix_now();
    match config.protocol {
        GraphiteProtocol::Tcp => send_plaintext_tcp(config, &samples, timestamp).await,
        GraphiteProtocol::Udp => send_plaintext_udp(config, &samples, timestamp).await,
        GraphiteProtocol::Pickle => send_pickle(config, &samples, timestamp).await,
    }
}

fn render_plaintext(samples: &[(String, f64)], timestamp: i64) -> String {
    let mut lines = String::new();
    for (path, value) in samples {
        let _ = writeln!(lines, "{path} {value} {timestamp}");
    }
    lines
}

async fn send_plaintext_tcp(
    config: &GraphiteReporterConfig,
    samples: &[(String, f64)],
    timestamp: i64,
) -> Result<(), ExportError> {
    let mut stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
    stream
        .write_all(render_plaintext(samples, timestamp).as_bytes())
        .await?;
    stream.shutdown().await?;
    Ok(())
}

async fn send_plaintext_udp(
    config: &GraphiteReporterConfig,
    samples: &[(String, f64)],
    timestamp: i64,
) -> Result<(), ExportError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket
        .connect((config.host.as_str(), config.port))
        .await?;
    let mut datagram = String::new();
    for (path, value) in samples {
        let line = format!("{path} {value} {timestamp}\n");
        if !datagram.is_empty() && datagram.len() + line.len() > MAX_UDP_PAYLOAD {
            socket.send(datagram.as_bytes()).await?;
            datagram.clear();
        }
        datagram.push_str(&line);
    }
    if !datagram.is_empty() {
        socket.send(datagram.as_bytes()).await?;
    }
    Ok(())
}

/// A pickle frame: big-endian length header, then a pickled list of
/// `(path, (timestamp, value))` tuples.
fn encode_pickle_frame(batch: &[(String, (i64, f64))]) -> Result<Vec<u8>, ExportError> {
    let payload = serde_pickle::to_vec(&batch, serde_pickle::SerOptions::new())?;
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

async fn send_pickle(
    config: &GraphiteReporterConfig,
    samples: &[(String, f64)],
    timestamp: i64,
) -> Result<(), ExportError> {
    let batch_size = config.batch_size.unwrap_or(DEFAULT_PICKLE_BATCH).max(1);
    let mut stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
    for chunk in samples.chunks(batch_size) {
        let batch: Vec<(String, (i64, f64))> = chunk
            .iter()
            .map(|(path, value)| (path.clone(), (timestamp, *value)))
            .collect();
        stream.write_all(&encode_pickle_frame(&batch)?).await?;
    }
    stream.shutdown().await?;
    Ok(())
}
