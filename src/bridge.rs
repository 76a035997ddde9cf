//! The bridge loop
//!
//! Polls a [`LineSource`] at a fixed interval, wraps every non-empty line in
//! a [`Record`] and hands the JSON payload to a [`RecordSink`].
//!
//! Lifecycle: `Initializing -> Running -> ShuttingDown -> Stopped`. There are
//! no retry transitions. A serial open failure goes straight to `Stopped`;
//! everything after that always passes through `ShuttingDown`, which closes
//! the serial side and then disconnects the MQTT side exactly once.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::mqtt::{MqttPublisher, RecordSink};
use crate::record::Record;
use crate::serial::{LineSource, SerialReader};
use anyhow::Context;
use colored::Colorize;
use rumqttc::QoS;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::watch;

/// Bridge lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

/// Counters kept while the loop runs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    /// Reads that returned any bytes
    pub lines_read: u64,
    /// Records handed to the sink
    pub records_published: u64,
    /// Reads that were empty after stripping
    pub empty_lines: u64,
    /// Records the sink could not queue (broker unreachable)
    pub records_dropped: u64,
}

/// Serial-to-MQTT bridge over any source and sink
pub struct Bridge<S: LineSource, P: RecordSink> {
    config: BridgeConfig,
    qos: QoS,
    source: S,
    sink: P,
    state: BridgeState,
    stats: BridgeStats,
}

impl<S: LineSource, P: RecordSink> Bridge<S, P> {
    /// Assemble a bridge from collaborators that are already connected
    pub fn new(config: BridgeConfig, source: S, sink: P) -> Result<Self> {
        let qos = config.qos()?;
        Ok(Self {
            config,
            qos,
            source,
            sink,
            state: BridgeState::Initializing,
            stats: BridgeStats::default(),
        })
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    /// One loop iteration without the trailing sleep.
    ///
    /// Returns the record that was published, if any.
    pub fn poll_once(&mut self) -> Result<Option<Record>> {
        if !self.source.has_pending_data()? {
            return Ok(None);
        }

        let raw = self.source.read_line()?;
        if raw.is_empty() {
            return Ok(None);
        }
        self.stats.lines_read += 1;

        let text = match String::from_utf8(raw) {
            Ok(text) => text,
            Err(e) => {
                log::debug!("Undecodable line from {}:", self.config.port);
                for line in hexdump::hexdump_iter(e.as_bytes()) {
                    log::debug!("{}", line);
                }
                return Err(e.into());
            }
        };

        let Some(record) = Record::from_line(&text) else {
            self.stats.empty_lines += 1;
            return Ok(None);
        };

        println!("UART Received: {}", record.data);

        let payload = record.to_payload()?;
        match self
            .sink
            .publish(&self.config.topic, payload.clone().into_bytes(), self.qos)
        {
            Ok(()) => {}
            Err(BridgeError::QueueFull { topic }) => {
                self.stats.records_dropped += 1;
                log::warn!("Dropped record for {}: MQTT request queue is full", topic);
                return Ok(None);
            }
            Err(e) => return Err(e),
        }
        self.stats.records_published += 1;

        println!("Published to MQTT: {}", payload);

        Ok(Some(record))
    }

    /// Poll until `running` is cleared or an error escapes an iteration.
    ///
    /// Sleeps `poll_interval` after every iteration, whether or not a line
    /// was processed.
    pub fn run(&mut self, running: &AtomicBool) -> Result<()> {
        self.state = BridgeState::Running;
        log::info!(
            "Bridging {} -> {} (poll every {:?})",
            self.config.port,
            self.config.topic,
            self.config.poll_interval
        );

        while running.load(Ordering::SeqCst) {
            self.poll_once()?;
            thread::sleep(self.config.poll_interval);
        }

        Ok(())
    }

    /// Close the source, then disconnect the sink. Only the first call does
    /// anything.
    pub fn shutdown(&mut self) {
        if matches!(self.state, BridgeState::ShuttingDown | BridgeState::Stopped) {
            return;
        }
        self.state = BridgeState::ShuttingDown;

        self.source.close();
        self.sink.disconnect();

        self.print_summary();
        println!("Cleanup complete");
        self.state = BridgeState::Stopped;
    }

    /// Run the loop, then shut down no matter how the loop ended
    pub fn run_until_stopped(&mut self, running: &AtomicBool) -> Result<()> {
        let result = self.run(running);
        if let Err(ref e) = result {
            eprintln!("{} Bridge loop failed: {}", "[ERROR]".red().bold(), e);
        }
        self.shutdown();
        result
    }

    /// Take the collaborators back
    pub fn into_parts(self) -> (S, P) {
        (self.source, self.sink)
    }

    fn print_summary(&self) {
        println!("{}", "--- Bridge Summary ---".cyan().bold());
        println!("Lines read: {}", self.stats.lines_read);
        println!("Records published: {}", self.stats.records_published);
        println!("Empty lines dropped: {}", self.stats.empty_lines);
        if self.stats.records_dropped > 0 {
            println!(
                "{} {}",
                "Records dropped while broker unreachable:".yellow(),
                self.stats.records_dropped
            );
        }
    }
}

/// Stop request shared by the Ctrl+C watcher, startup and the polling loop.
///
/// The loop reads it as an [`AtomicBool`]; async code awaits [`StopSignal::stopped`].
#[derive(Clone)]
pub struct StopSignal {
    running: Arc<AtomicBool>,
    stopped: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            running: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(stopped),
        }
    }

    /// Request a stop. Returns `false` if one was already requested.
    pub fn stop(&self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        !self.stopped.send_replace(true)
    }

    pub fn is_stopped(&self) -> bool {
        !self.running.load(Ordering::SeqCst)
    }

    /// Flag polled by [`Bridge::run`]; `true` until a stop is requested
    pub fn flag(&self) -> &AtomicBool {
        &self.running
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        let mut rx = self.stopped.subscribe();
        // the sender outlives `rx`, so this only returns once the value is true
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the bridge against the real serial port and broker until Ctrl+C
pub async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let stop = StopSignal::new();
    spawn_interrupt_watcher(stop.clone());

    run_with(config, stop, SerialReader::open, |config| async move {
        MqttPublisher::connect(&config).await
    })
    .await
}

/// Full lifecycle with injectable collaborators.
///
/// A source that fails to open ends the run cleanly without touching MQTT.
/// A sink that fails to connect is fatal: the source is closed and the error
/// returned. A stop requested while the sink is connecting abandons the
/// connect and closes the source. Once both are up the loop runs on a
/// blocking thread until `stop` fires.
pub async fn run_with<S, P, O, C, F>(
    config: BridgeConfig,
    stop: StopSignal,
    open_source: O,
    connect_sink: C,
) -> anyhow::Result<()>
where
    S: LineSource + Send + 'static,
    P: RecordSink + Send + 'static,
    O: FnOnce(&BridgeConfig) -> Result<S>,
    C: FnOnce(BridgeConfig) -> F,
    F: Future<Output = Result<P>>,
{
    config.validate()?;

    let mut source = match open_source(&config) {
        Ok(source) => source,
        Err(e) => {
            println!("{} UART connection failed: {}", "[ERROR]".red().bold(), e);
            return Ok(());
        }
    };

    let outcome = tokio::select! {
        outcome = connect_sink(config.clone()) => outcome,
        _ = stop.stopped() => Err(BridgeError::Interrupted),
    };

    let sink = match outcome {
        Ok(sink) => sink,
        Err(BridgeError::Interrupted) => {
            log::info!("Stop requested while connecting to the MQTT broker");
            source.close();
            println!("Cleanup complete");
            return Ok(());
        }
        Err(e) => {
            source.close();
            return Err(e).context("MQTT broker connection failed");
        }
    };

    let mut bridge = Bridge::new(config, source, sink)?;

    tokio::task::spawn_blocking(move || bridge.run_until_stopped(stop.flag()))
        .await
        .context("Bridge loop panicked")??;

    Ok(())
}

/// First Ctrl+C requests a graceful stop, a second one exits immediately
fn spawn_interrupt_watcher(stop: StopSignal) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::warn!("Failed to listen for Ctrl+C: {}", e);
                return;
            }

            if stop.stop() {
                println!(
                    "\n{}",
                    "Stopping... (press Ctrl+C again to force exit)".yellow()
                );
            } else {
                eprintln!("{}", "Forced exit".red().bold());
                std::process::exit(130);
            }
        }
    });
}
