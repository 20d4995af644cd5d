//! Controller transport.
//!
//! Owns the one serial link to the motion controller. Commands are
//! serialized through a FIFO mutex, responses are matched on terminator
//! markers, and machine state is tracked from every line that carries a
//! position report. In simulation mode the link is replaced by the
//! deterministic responder in [`crate::sim`].

use crate::sim;
use async_trait::async_trait;
use plot_common::config::SerialConfig;
use plot_common::errors::{PlotError, Result};
use plot_common::types::{MachinePosition, MachineStatus};
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Default per-command response deadline.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(5000);

/// Latency of the simulated controller.
pub const SIM_RESPONSE_DELAY: Duration = Duration::from_millis(100);

const EVENT_BUFFER: usize = 256;

static POSITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([XYZE]):\s*(-?\d+\.?\d*)").unwrap());
static PIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Pin\s+\d+:\s*(\d+)").unwrap());

/// Events observable on the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The link is open (or the simulator is attached).
    Ready,
    /// The link failed to open or died.
    Error(String),
    /// The peer closed the link.
    Closed,
    /// A position report was parsed from a response line.
    Position(MachinePosition),
    /// A raw response line, as received.
    Data(String),
}

/// Machine state tracked from responses.
#[derive(Debug, Clone, Default)]
pub struct MachineState {
    pub position: MachinePosition,
    pub status: MachineStatus,
    /// Unix ms of the last position update.
    pub last_update: Option<i64>,
}

/// A file reported by the controller's storage listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerFile {
    pub name: String,
    pub size: Option<u64>,
}

enum Link {
    Serial {
        writer: Mutex<WriteHalf<SerialStream>>,
        lines: Mutex<mpsc::UnboundedReceiver<String>>,
    },
    Sim {
        delay: Duration,
    },
}

struct Shared {
    state: RwLock<MachineState>,
    events: broadcast::Sender<TransportEvent>,
    ready: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: RwLock::new(MachineState::default()),
            events,
            ready: AtomicBool::new(false),
        }
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Record an inbound line: surface it as data and fold any position
    /// report into tracked state.
    async fn ingest_line(&self, line: &str) {
        self.emit(TransportEvent::Data(line.to_string()));
        if !line.contains("X:") {
            return;
        }
        let Some(position) = parse_position(line) else {
            return;
        };
        {
            let mut state = self.state.write().await;
            state.position = position;
            state.last_update = Some(chrono::Utc::now().timestamp_millis());
        }
        self.emit(TransportEvent::Position(position));
    }

    async fn set_status(&self, status: MachineStatus) {
        self.state.write().await.status = status;
    }
}

/// Parse the first occurrence of each axis from a report line.
///
/// Controllers append step counts (`Count X:…`) after the millimetre
/// values, so later duplicates are ignored.
fn parse_position(line: &str) -> Option<MachinePosition> {
    let mut x = None;
    let mut y = None;
    let mut z = None;
    let mut e = None;
    for caps in POSITION_RE.captures_iter(line) {
        let value: f64 = caps[2].parse().ok()?;
        let slot = match &caps[1] {
            "X" => &mut x,
            "Y" => &mut y,
            "Z" => &mut z,
            _ => &mut e,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }
    x.map(|x| MachinePosition {
        x,
        y: y.unwrap_or(0.0),
        z: z.unwrap_or(0.0),
        e: e.unwrap_or(0.0),
    })
}

enum LineOutcome {
    /// Part of the body; keep accumulating.
    Body,
    /// Terminator that is pure acknowledgement.
    Finish,
    /// Terminator that also carries information (`Done …`).
    FinishWithLine,
    /// Error marker: the command failed.
    Fail,
}

fn classify_line(line: &str) -> LineOutcome {
    let trimmed = line.trim();
    if trimmed.contains("Error") {
        LineOutcome::Fail
    } else if trimmed == "ok" || trimmed.starts_with("ok ") {
        LineOutcome::Finish
    } else if trimmed.contains("Done") {
        LineOutcome::FinishWithLine
    } else {
        LineOutcome::Body
    }
}

/// The one owner of the controller link.
#[derive(Clone)]
pub struct ControllerTransport {
    link: Arc<Link>,
    shared: Arc<Shared>,
    gate: Arc<Mutex<()>>,
    command_timeout: Duration,
}

impl ControllerTransport {
    /// Attach the deterministic simulator instead of a device.
    pub fn simulated() -> Self {
        Self::simulated_with_delay(SIM_RESPONSE_DELAY)
    }

    /// Simulator with a custom response latency (tests use zero).
    pub fn simulated_with_delay(delay: Duration) -> Self {
        let shared = Arc::new(Shared::new());
        shared.ready.store(true, Ordering::SeqCst);
        shared.emit(TransportEvent::Ready);
        Self {
            link: Arc::new(Link::Sim { delay }),
            shared,
            gate: Arc::new(Mutex::new(())),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Open the configured link. `devMode` attaches the simulator; a
    /// failed serial open returns a transport that is not ready and has
    /// already emitted `Error`.
    pub fn connect(config: &SerialConfig) -> Self {
        if config.dev_mode {
            info!("transport in simulation mode");
            let mut transport = Self::simulated();
            transport.command_timeout = Duration::from_millis(config.command_timeout);
            return transport;
        }

        let shared = Arc::new(Shared::new());
        let builder = tokio_serial::new(&config.serial_path, config.baud_rate);
        match builder.open_native_async() {
            Ok(stream) => {
                info!(path = %config.serial_path, baud = config.baud_rate, "serial link open");
                let (read_half, write_half) = tokio::io::split(stream);
                let (line_tx, line_rx) = mpsc::unbounded_channel();
                tokio::spawn(reader_task(read_half, shared.clone(), line_tx));
                shared.ready.store(true, Ordering::SeqCst);
                shared.emit(TransportEvent::Ready);
                Self {
                    link: Arc::new(Link::Serial {
                        writer: Mutex::new(write_half),
                        lines: Mutex::new(line_rx),
                    }),
                    shared,
                    gate: Arc::new(Mutex::new(())),
                    command_timeout: Duration::from_millis(config.command_timeout),
                }
            }
            Err(e) => {
                warn!(path = %config.serial_path, "serial open failed: {e}");
                shared.emit(TransportEvent::Error(e.to_string()));
                // Not ready: every command will fail fast until restart.
                Self {
                    link: Arc::new(Link::Sim {
                        delay: Duration::ZERO,
                    }),
                    shared,
                    gate: Arc::new(Mutex::new(())),
                    command_timeout: Duration::from_millis(config.command_timeout),
                }
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    pub async fn state(&self) -> MachineState {
        self.shared.state.read().await.clone()
    }

    /// Send one command line and wait for its terminated response.
    ///
    /// Exactly one command is in flight at a time; concurrent callers
    /// queue on a FIFO mutex in arrival order.
    pub async fn send_command(&self, line: &str, timeout: Option<Duration>) -> Result<String> {
        if !self.is_ready() {
            return Err(PlotError::NotReady);
        }
        let _guard = self.gate.lock().await;
        self.shared.set_status(MachineStatus::Busy).await;
        let deadline = timeout.unwrap_or(self.command_timeout);
        let result = match &*self.link {
            Link::Sim { delay } => self.sim_exchange(line, *delay).await,
            Link::Serial { writer, lines } => {
                self.serial_exchange(writer, lines, line, deadline).await
            }
        };
        self.shared.set_status(MachineStatus::Ready).await;
        debug!(command = line, ok = result.is_ok(), "command complete");
        result
    }

    async fn sim_exchange(&self, line: &str, delay: Duration) -> Result<String> {
        tokio::time::sleep(delay).await;
        let mut body: Vec<String> = Vec::new();
        for response in sim::respond(line) {
            self.shared.ingest_line(&response).await;
            match classify_line(&response) {
                LineOutcome::Body => body.push(response),
                LineOutcome::Finish => break,
                LineOutcome::FinishWithLine => {
                    body.push(response);
                    break;
                }
                LineOutcome::Fail => return Err(PlotError::Controller(response)),
            }
        }
        Ok(body.join("\n"))
    }

    async fn serial_exchange(
        &self,
        writer: &Mutex<WriteHalf<SerialStream>>,
        lines: &Mutex<mpsc::UnboundedReceiver<String>>,
        line: &str,
        deadline: Duration,
    ) -> Result<String> {
        let mut rx = lines.lock().await;
        // Discard stragglers from a previously timed-out command so they
        // cannot terminate this one.
        while rx.try_recv().is_ok() {}

        {
            let mut w = writer.lock().await;
            w.write_all(line.as_bytes()).await?;
            w.write_all(b"\n").await?;
            w.flush().await?;
        }

        let collect = async {
            let mut body: Vec<String> = Vec::new();
            while let Some(response) = rx.recv().await {
                match classify_line(&response) {
                    LineOutcome::Body => body.push(response),
                    LineOutcome::Finish => return Ok(body.join("\n")),
                    LineOutcome::FinishWithLine => {
                        body.push(response);
                        return Ok(body.join("\n"));
                    }
                    LineOutcome::Fail => return Err(PlotError::Controller(response)),
                }
            }
            Err(PlotError::protocol("link closed mid-response"))
        };

        match tokio::time::timeout(deadline, collect).await {
            Ok(result) => result,
            Err(_) => Err(PlotError::Timeout(deadline.as_millis() as u64)),
        }
    }

    // ── High-level controller operations ─────────────────────────────

    /// Query the current position (`M114`).
    pub async fn get_position(&self) -> Result<MachinePosition> {
        let body = self.send_command("M114", None).await?;
        parse_position(&body)
            .ok_or_else(|| PlotError::protocol(format!("no position in {body:?}")))
    }

    /// List files on controller storage (`M20`).
    pub async fn list_files(&self) -> Result<Vec<ControllerFile>> {
        let body = self.send_command("M20", None).await?;
        let mut files = Vec::new();
        for line in body.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty()
                || trimmed.eq_ignore_ascii_case("begin file list")
                || trimmed.eq_ignore_ascii_case("end file list")
            {
                continue;
            }
            let mut parts = trimmed.split_whitespace();
            let Some(name) = parts.next() else { continue };
            files.push(ControllerFile {
                name: name.to_string(),
                size: parts.next().and_then(|s| s.parse().ok()),
            });
        }
        Ok(files)
    }

    /// Query storage capacity (`M39`).
    pub async fn storage_info(&self) -> Result<String> {
        self.send_command("M39", None).await
    }

    /// Select and start a stored file (`M23` + `M24`).
    pub async fn run_file(&self, name: &str) -> Result<()> {
        self.send_command(&format!("M23 {name}"), None).await?;
        self.send_command("M24", None).await?;
        Ok(())
    }

    /// Upload a program to controller storage.
    ///
    /// Brackets the payload with `M28`/`M29` and sends each non-empty
    /// line as its own command, expecting one acknowledgement per line.
    pub async fn upload_file(&self, name: &str, content: &str) -> Result<()> {
        self.send_command(&format!("M28 {name}"), None).await?;
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            self.send_command(trimmed, None).await?;
        }
        self.send_command("M29", None).await?;
        Ok(())
    }

    /// Pause stored-file playback (`M25`).
    pub async fn pause(&self) -> Result<()> {
        self.send_command("M25", None).await.map(|_| ())
    }

    /// Stop the current program (`M0`).
    pub async fn stop(&self) -> Result<()> {
        self.send_command("M0", None).await.map(|_| ())
    }

    /// Halt everything immediately (`M112`).
    pub async fn emergency_stop(&self) -> Result<()> {
        self.send_command("M112", None).await.map(|_| ())
    }

    /// Home all or selected axes (`G28`).
    pub async fn home_all(&self, axes: Option<&[char]>) -> Result<()> {
        let command = match axes {
            Some(axes) if !axes.is_empty() => {
                let mut cmd = String::from("G28");
                for axis in axes {
                    cmd.push(' ');
                    cmd.push(axis.to_ascii_uppercase());
                }
                cmd
            }
            _ => "G28".to_string(),
        };
        self.send_command(&command, None).await.map(|_| ())
    }

    /// Rapid move (`G0`).
    pub async fn move_rapid(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
    ) -> Result<()> {
        let command = motion_command("G0", x, y, z, None);
        self.send_command(&command, None).await.map(|_| ())
    }

    /// Linear move (`G1`), with an optional feed rate.
    pub async fn move_linear(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        feed_rate: Option<u32>,
    ) -> Result<()> {
        let command = motion_command("G1", x, y, z, feed_rate);
        self.send_command(&command, None).await.map(|_| ())
    }

    /// Drive an output pin (`M42`).
    pub async fn set_pin(&self, pin: u8, value: u8) -> Result<()> {
        self.send_command(&format!("M42 P{pin} S{value}"), None)
            .await
            .map(|_| ())
    }

    /// Read an input pin (`M42` without a value).
    pub async fn read_pin(&self, pin: u8) -> Result<u8> {
        let body = self.send_command(&format!("M42 P{pin}"), None).await?;
        PIN_RE
            .captures(&body)
            .and_then(|caps| caps[1].parse().ok())
            .ok_or_else(|| PlotError::protocol(format!("no pin state in {body:?}")))
    }

    /// Block until the motion buffer drains (`M400`).
    pub async fn wait_for_idle(&self) -> Result<()> {
        self.send_command("M400", None).await.map(|_| ())
    }
}

fn motion_command(
    head: &str,
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
    feed_rate: Option<u32>,
) -> String {
    let mut command = head.to_string();
    if let Some(x) = x {
        command.push_str(&format!(" X{x:.3}"));
    }
    if let Some(y) = y {
        command.push_str(&format!(" Y{y:.3}"));
    }
    if let Some(z) = z {
        command.push_str(&format!(" Z{z:.3}"));
    }
    if let Some(f) = feed_rate {
        command.push_str(&format!(" F{f}"));
    }
    command
}

async fn reader_task(
    read_half: ReadHalf<SerialStream>,
    shared: Arc<Shared>,
    line_tx: mpsc::UnboundedSender<String>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                shared.ingest_line(&line).await;
                if line_tx.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => {
                info!("serial link closed by peer");
                shared.ready.store(false, Ordering::SeqCst);
                shared.set_status(MachineStatus::Disconnected).await;
                shared.emit(TransportEvent::Closed);
                break;
            }
            Err(e) => {
                warn!("serial read failed: {e}");
                shared.ready.store(false, Ordering::SeqCst);
                shared.set_status(MachineStatus::Error).await;
                shared.emit(TransportEvent::Error(e.to_string()));
                break;
            }
        }
    }
}

/// The narrow controller surface the scheduler depends on.
#[async_trait]
pub trait ControllerPort: Send + Sync {
    /// Submit one raw G-code line and wait for its response.
    async fn send_line(&self, line: &str) -> Result<String>;
    /// Ask the controller to pause motion.
    async fn pause_motion(&self) -> Result<()>;
    /// Ask the controller to stop the current program.
    async fn stop_motion(&self) -> Result<()>;
    /// Observe transport events (positions in particular).
    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent>;
}

#[async_trait]
impl ControllerPort for ControllerTransport {
    async fn send_line(&self, line: &str) -> Result<String> {
        self.send_command(line, None).await
    }

    async fn pause_motion(&self) -> Result<()> {
        self.pause().await
    }

    async fn stop_motion(&self) -> Result<()> {
        self.stop().await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.subscribe()
    }
}
