//! Bridge runtime
//!
//! Wires the components into the four concurrent activities:
//!
//! - input reader (dedicated thread): device read, loss accounting, decode,
//!   encode, broadcast
//! - UDP listener (task): subscriptions and rumble commands
//! - audio reader (dedicated thread, optional): stdin chunks to audio frames
//! - timers (tasks): periodic throughput report and the warm-up stop frame
//!
//! Device failures on any path end the bridge. Everything else is logged.

use std::future::Future;
use std::io::{self, Read};
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::broadcast::{Broadcaster, ClientCommand, ClientRegistry, CommandError, DatagramSink};
use crate::config::{Config, ConfigError};
use crate::device::{DeviceError, OutputChannel, ReportReader};
use crate::frame::{AudioFramer, ControlSettings, AUDIO_PAYLOAD_LEN};
use crate::loss::{LossAccountant, StatsSnapshot, StreamCounters};
use crate::packet::{self, StatePacket};
use crate::report::{DecodeError, RawReport, ReportDecoder, BT_REPORT_SIZE};

/// Battery value before the first report arrives
pub const BATTERY_UNKNOWN: u8 = u8::MAX;

/// Largest datagram the listener accepts
const MAX_DATAGRAM: usize = 64;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Device failure: {0}")]
    Device(#[from] DeviceError),

    #[error("Failed to bind UDP socket {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Socket setup failed: {0}")]
    Socket(#[source] io::Error),

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Device-to-network path, owned by the reader thread
pub struct InputPipeline<S: DatagramSink> {
    decoder: ReportDecoder,
    accountant: Option<LossAccountant>,
    counters: Arc<StreamCounters>,
    broadcaster: Broadcaster<S>,
    battery: Arc<AtomicU8>,
    drop_warned: bool,
}

impl<S: DatagramSink> InputPipeline<S> {
    /// Without an accountant reports are still counted, with no loss estimate
    pub fn new(
        decoder: ReportDecoder,
        accountant: Option<LossAccountant>,
        counters: Arc<StreamCounters>,
        broadcaster: Broadcaster<S>,
        battery: Arc<AtomicU8>,
    ) -> Self {
        Self {
            decoder,
            accountant,
            counters,
            broadcaster,
            battery,
            drop_warned: false,
        }
    }

    /// Handle one raw report; returns the packet that was broadcast, if any
    pub fn process(&mut self, data: &[u8]) -> Option<StatePacket> {
        let report = match RawReport::parse(data) {
            Ok(report) => report,
            Err(e) => {
                self.drop_report(e);
                return None;
            }
        };

        let gap = match self.accountant.as_mut() {
            Some(accountant) => {
                let step = accountant.observe(report.sequence());
                if step.gap > 0 {
                    debug!("Lost {} report(s) before counter {}", step.gap, report.sequence());
                }
                step.gap
            }
            None => 0,
        };
        self.counters.record(gap);
        if let Some(level) = report.battery_percent() {
            self.battery.store(level, Ordering::Relaxed);
        }

        let state = match self.decoder.decode(&report) {
            Ok(state) => state,
            Err(e) => {
                self.drop_report(e);
                return None;
            }
        };
        let pkt = packet::encode(&state);
        trace!("State {:?}", state);

        self.broadcaster.broadcast(&pkt);
        Some(pkt)
    }

    // A wrong device type fails every report, so only the first one warns
    fn drop_report(&mut self, e: DecodeError) {
        self.counters.record_dropped();
        if self.drop_warned {
            debug!("Dropping report: {}", e);
        } else {
            warn!("Dropping report: {} (further drops are counted in the stats line)", e);
            self.drop_warned = true;
        }
    }

    /// Read reports until `running` clears or the device fails
    pub fn run<R: ReportReader + ?Sized>(
        &mut self,
        reader: &mut R,
        running: &AtomicBool,
    ) -> Result<(), DeviceError> {
        let mut buf = [0u8; BT_REPORT_SIZE + 22];
        while running.load(Ordering::SeqCst) {
            let n = reader.read_report(&mut buf)?;
            self.process(&buf[..n]);
        }
        Ok(())
    }
}

/// Stream fixed-size chunks from `input` to the device until end of input
pub fn run_audio<R: Read>(
    mut input: R,
    output: &OutputChannel,
    running: &AtomicBool,
) -> Result<u64, DeviceError> {
    let mut framer = AudioFramer::new();
    let mut chunk = [0u8; AUDIO_PAYLOAD_LEN];
    let mut frames = 0u64;

    while running.load(Ordering::SeqCst) {
        if let Err(e) = input.read_exact(&mut chunk) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                info!("Audio input ended after {} frames", frames);
            } else {
                warn!("Audio input failed: {}", e);
            }
            break;
        }
        let frame = framer.build(&chunk);
        output.send(&frame)?;
        frames += 1;
    }
    Ok(frames)
}

/// Apply one datagram from `src`
async fn handle_datagram(
    datagram: &[u8],
    src: SocketAddr,
    registry: &ClientRegistry,
    output: &OutputChannel,
    settings: ControlSettings,
    battery: &AtomicU8,
) -> Result<(), DeviceError> {
    match ClientCommand::parse(datagram) {
        Ok(ClientCommand::Subscribe) => {
            if registry.register(src) {
                info!("Client subscribed: {} ({} total)", src, registry.len());
            }
        }
        Ok(ClientCommand::Rumble(haptic)) => {
            debug!("Rumble from {}: {:?}", src, haptic);
            send_control(output, settings.with_haptic(haptic), battery).await?;
        }
        Err(CommandError::Empty) => warn!("Empty datagram from {}", src),
        Err(e) => warn!("Ignoring datagram from {}: {}", src, e),
    }
    Ok(())
}

/// Receive datagrams until a device write fails
pub async fn run_listener(
    socket: UdpSocket,
    registry: ClientRegistry,
    output: OutputChannel,
    settings: ControlSettings,
    battery: Arc<AtomicU8>,
) -> Result<(), DeviceError> {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let (n, src) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("UDP receive failed: {}", e);
                continue;
            }
        };
        handle_datagram(&buf[..n], src, &registry, &output, settings, &battery).await?;
    }
}

/// Write a control frame off the async worker threads.
///
/// The lightbar turns red while the last reported battery level is empty.
pub async fn send_control(
    output: &OutputChannel,
    settings: ControlSettings,
    battery: &AtomicU8,
) -> Result<(), DeviceError> {
    let output = output.clone();
    let frame = settings.with_battery(battery.load(Ordering::Relaxed)).build();
    match tokio::task::spawn_blocking(move || output.send(&frame)).await {
        Ok(result) => result,
        Err(e) => Err(DeviceError::Io(io::Error::new(io::ErrorKind::Other, e))),
    }
}

/// Log throughput every `interval`
pub async fn run_stats(
    counters: Arc<StreamCounters>,
    registry: ClientRegistry,
    battery: Arc<AtomicU8>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    // first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let snap = counters.take(interval);
        log_stats(&snap, registry.len(), battery.load(Ordering::Relaxed));
    }
}

fn log_stats(snap: &StatsSnapshot, clients: usize, battery: u8) {
    if snap.dropped > 0 {
        warn!("Dropped {} undecodable report(s) in the last {:?}", snap.dropped, snap.interval);
    }
    match snap.mean_interval_ms() {
        Some(ms) => info!(
            "{:.1} reports/s, {:.2} ms between reports, {:.2}% lost, {} client(s), battery {}",
            snap.rate_hz(),
            ms,
            snap.loss_percent(),
            clients,
            battery_label(battery)
        ),
        None => warn!("No reports in the last {:?}", snap.interval),
    }
}

fn battery_label(level: u8) -> String {
    match level {
        BATTERY_UNKNOWN => "unknown".to_string(),
        level => format!("{}%", level),
    }
}

/// The assembled bridge
pub struct Bridge {
    config: Config,
    decoder: ReportDecoder,
    registry: ClientRegistry,
    counters: Arc<StreamCounters>,
    battery: Arc<AtomicU8>,
}

impl Bridge {
    /// Validate `config` and build the bridge state
    pub fn new(config: Config) -> Result<Self, BridgeError> {
        let axis = config.validate()?;
        Ok(Self {
            config,
            decoder: ReportDecoder::new(axis),
            registry: ClientRegistry::new(),
            counters: StreamCounters::new(),
            battery: Arc::new(AtomicU8::new(BATTERY_UNKNOWN)),
        })
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn counters(&self) -> &Arc<StreamCounters> {
        &self.counters
    }

    /// Run until `shutdown` resolves or a device channel fails
    pub async fn run<F>(
        self,
        reader: Box<dyn ReportReader>,
        output: OutputChannel,
        running: Arc<AtomicBool>,
        shutdown: F,
    ) -> Result<(), BridgeError>
    where
        F: Future<Output = ()>,
    {
        let settings = self.config.control_settings();

        let addr = self.config.socket_addr();
        let socket = StdUdpSocket::bind(addr).map_err(|source| BridgeError::Bind { addr, source })?;
        // Sends from the reader must never wait on the network
        socket.set_nonblocking(true).map_err(BridgeError::Socket)?;
        let send_socket = socket.try_clone().map_err(BridgeError::Socket)?;
        let listen_socket = UdpSocket::from_std(socket).map_err(BridgeError::Socket)?;
        info!("Listening for subscribers on {}", addr);

        let warmup = self.config.haptic_warmup;
        if warmup.enabled {
            send_control(&output, settings.with_haptic(warmup.haptic()), &self.battery).await?;
            let output = output.clone();
            let battery = Arc::clone(&self.battery);
            tokio::spawn(async move {
                tokio::time::sleep(warmup.duration()).await;
                if let Err(e) = send_control(&output, settings, &battery).await {
                    error!("Failed to stop warm-up rumble: {}", e);
                }
            });
        } else {
            send_control(&output, settings, &self.battery).await?;
        }

        let (fatal_tx, mut fatal_rx) = mpsc::channel::<DeviceError>(2);

        let accountant = self.config.loss_accounting.then(LossAccountant::new);
        let mut pipeline = InputPipeline::new(
            self.decoder.clone(),
            accountant,
            Arc::clone(&self.counters),
            Broadcaster::new(send_socket, self.registry.clone()),
            Arc::clone(&self.battery),
        );
        {
            let running = Arc::clone(&running);
            let fatal_tx = fatal_tx.clone();
            let mut reader = reader;
            thread::Builder::new()
                .name("input-reader".to_string())
                .spawn(move || {
                    if let Err(e) = pipeline.run(&mut *reader, &running) {
                        let _ = fatal_tx.blocking_send(e);
                    }
                })
                .map_err(|source| BridgeError::Spawn {
                    name: "input-reader",
                    source,
                })?;
        }

        if self.config.audio {
            let running = Arc::clone(&running);
            let fatal_tx = fatal_tx.clone();
            let output = output.clone();
            thread::Builder::new()
                .name("audio-reader".to_string())
                .spawn(move || {
                    if let Err(e) = run_audio(io::stdin().lock(), &output, &running) {
                        let _ = fatal_tx.blocking_send(e);
                    }
                })
                .map_err(|source| BridgeError::Spawn {
                    name: "audio-reader",
                    source,
                })?;
            info!("Streaming audio from stdin");
        }

        let stats = tokio::spawn(run_stats(
            Arc::clone(&self.counters),
            self.registry.clone(),
            Arc::clone(&self.battery),
            self.config.stats_interval(),
        ));

        let result = tokio::select! {
            Some(e) = fatal_rx.recv() => {
                error!("Device failure: {}", e);
                Err(BridgeError::Device(e))
            }
            res = run_listener(
                listen_socket,
                self.registry.clone(),
                output.clone(),
                settings,
                Arc::clone(&self.battery),
            ) => {
                res.map_err(BridgeError::Device)
            }
            _ = shutdown => {
                info!("Shutting down");
                Ok(())
            }
        };

        running.store(false, Ordering::SeqCst);
        stats.abort();
        drop(fatal_tx);

        if result.is_ok() {
            // Leave the motors off
            send_control(&output, settings, &self.battery).await.ok();
        }
        result
    }
}
