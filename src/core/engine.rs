//! Polling engine
//!
//! Owns one background thread per session. That thread opens the
//! connection, sweeps the register map on a fixed cadence and closes the
//! connection on the way out; no other thread ever touches the transport.
//!
//! ```text
//! Idle -> Connecting -> Running -> Stopping -> Stopped
//!             |                                  ^
//!             +----------- open/config error ----+
//! ```

use super::connection::Connection;
use super::decoder::Decoder;
use super::error::EngineError;
use super::events::{EventHub, PollEventKind};
use super::register::RegisterMap;
use super::retry::RetryPolicy;
use super::sink::{ReadStatus, ReadingResult, ResultSink, SnapshotRow};
use super::transport::{ConnectionConfig, RtuOpener, TransportError, TransportOpener};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Shortest allowed time between sweeps
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Interval used when the configured value cannot be parsed
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Never started
    Idle,
    /// Validating config and opening the port
    Connecting,
    /// Polling
    Running,
    /// Stop requested, finishing the current sweep
    Stopping,
    /// Stopped, may be started again
    Stopped,
}

/// Poll interval as typed by the user
///
/// Shared between the engine and whoever edits it, so changes take effect on
/// the next sweep. Values below [`MIN_POLL_INTERVAL`] are clamped up; text
/// that is not an integer falls back to [`DEFAULT_POLL_INTERVAL`].
#[derive(Debug, Clone)]
pub struct PollInterval {
    raw: Arc<RwLock<String>>,
}

/// Interval the engine will actually wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedInterval {
    /// Duration to use
    pub duration: Duration,
    /// True when the raw text was unusable
    pub fallback: bool,
}

impl PollInterval {
    /// Interval in milliseconds
    pub fn from_millis(ms: u64) -> Self {
        Self::from_text(&ms.to_string())
    }

    /// Interval from free-form text
    pub fn from_text(raw: &str) -> Self {
        Self {
            raw: Arc::new(RwLock::new(raw.to_string())),
        }
    }

    /// Change the interval in milliseconds
    pub fn set_millis(&self, ms: u64) {
        *self.raw.write() = ms.to_string();
    }

    /// Change the interval text
    pub fn set_text(&self, raw: &str) {
        *self.raw.write() = raw.to_string();
    }

    /// Current raw text
    pub fn text(&self) -> String {
        self.raw.read().clone()
    }

    /// Apply clamping and fallback
    pub fn resolve(&self) -> ResolvedInterval {
        let raw = self.raw.read();
        let text = raw.trim();
        // negative values parse as i64 only and clamp like any short interval
        let ms = text
            .parse::<u64>()
            .ok()
            .or_else(|| text.parse::<i64>().ok().map(|_| 0));

        match ms {
            Some(ms) => ResolvedInterval {
                duration: Duration::from_millis(ms).max(MIN_POLL_INTERVAL),
                fallback: false,
            },
            None => ResolvedInterval {
                duration: DEFAULT_POLL_INTERVAL,
                fallback: true,
            },
        }
    }
}

impl From<u64> for PollInterval {
    fn from(ms: u64) -> Self {
        Self::from_millis(ms)
    }
}

impl From<Duration> for PollInterval {
    fn from(interval: Duration) -> Self {
        Self::from_millis(interval.as_millis() as u64)
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        Self::from(DEFAULT_POLL_INTERVAL)
    }
}

/// Counters for the current session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Completed sweeps
    pub cycles: u64,
    /// Registers read and decoded
    pub reads_ok: u64,
    /// Registers that failed at the transport level
    pub transport_errors: u64,
    /// Registers whose words could not be decoded
    pub decode_errors: u64,
    /// Duration of the last sweep
    pub last_sweep: Duration,
}

struct Worker {
    stop_tx: Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// State shared with the polling thread
struct Shared {
    state: RwLock<EngineState>,
    sink: Arc<ResultSink>,
    events: Arc<EventHub>,
    stats: RwLock<PollStats>,
}

/// Everything the polling thread needs for one session
struct Session {
    config: ConnectionConfig,
    map: RegisterMap,
    interval: PollInterval,
    retry: RetryPolicy,
    opener: Arc<dyn TransportOpener>,
    shared: Arc<Shared>,
}

/// Periodic reader for one device
///
/// Run several engines to poll several devices; they share nothing.
pub struct PollingEngine {
    id: Uuid,
    opener: Arc<dyn TransportOpener>,
    retry: RetryPolicy,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl PollingEngine {
    /// Engine using the serial RTU transport
    pub fn new() -> Self {
        Self::with_opener(Arc::new(RtuOpener))
    }

    /// Engine using a custom transport
    pub fn with_opener(opener: Arc<dyn TransportOpener>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            opener,
            retry: RetryPolicy::none(),
            shared: Arc::new(Shared {
                state: RwLock::new(EngineState::Idle),
                sink: Arc::new(ResultSink::new(RegisterMap::em6400ng())),
                events: Arc::new(EventHub::for_session(id)),
                stats: RwLock::new(PollStats::default()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Set the retry policy used for future sessions
    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate, open the port and start polling
    ///
    /// Returns once the polling thread has opened the connection, or with the
    /// configuration/open error. Nothing is left running on error.
    pub fn start(
        &self,
        config: ConnectionConfig,
        map: RegisterMap,
        interval: impl Into<PollInterval>,
    ) -> Result<(), EngineError> {
        let mut worker = self.worker.lock();
        match worker.take() {
            Some(w) if w.handle.is_finished() => Self::reap(w, self.id),
            Some(w) => {
                *worker = Some(w);
                return Err(EngineError::AlreadyRunning);
            }
            None => {}
        }

        self.set_state(EngineState::Connecting);

        if let Err(e) = config.validate() {
            self.set_state(EngineState::Stopped);
            return Err(e.into());
        }

        self.shared.sink.reset(map.clone());
        *self.shared.stats.write() = PollStats::default();

        let session = Session {
            config,
            map,
            interval: interval.into(),
            retry: self.retry,
            opener: Arc::clone(&self.opener),
            shared: Arc::clone(&self.shared),
        };

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), TransportError>>(1);

        let handle = thread::Builder::new()
            .name(format!("meterpoll-{}", &self.id.to_string()[..8]))
            .spawn(move || session.run(&ready_tx, &stop_rx))
            .map_err(|e| {
                self.set_state(EngineState::Stopped);
                TransportError::Internal(e.to_string())
            })?;

        let opened = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(TransportError::Internal("polling thread exited".into())));

        match opened {
            Ok(()) => {
                *worker = Some(Worker { stop_tx, handle });
                Ok(())
            }
            Err(e) => {
                let _ = handle.join();
                self.set_state(EngineState::Stopped);
                Err(e.into())
            }
        }
    }

    /// Stop polling and close the connection
    ///
    /// The sweep in progress is allowed to finish. Blocks until the polling
    /// thread has exited. Safe to call repeatedly and from any thread.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        self.set_state(EngineState::Stopping);
        let _ = worker.stop_tx.try_send(());
        Self::reap(worker, self.id);
        self.set_state(EngineState::Stopped);
    }

    fn reap(worker: Worker, id: Uuid) {
        drop(worker.stop_tx);
        if worker.handle.join().is_err() {
            tracing::error!("Polling thread for session {} panicked", id);
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        *self.shared.state.read()
    }

    /// Whether a session is active
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Session id stamped on events
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Latest readings in register order
    pub fn snapshot(&self) -> Vec<SnapshotRow> {
        self.shared.sink.snapshot()
    }

    /// Result store shared with consumers
    pub fn sink(&self) -> Arc<ResultSink> {
        Arc::clone(&self.shared.sink)
    }

    /// Diagnostic event hub
    pub fn events(&self) -> Arc<EventHub> {
        Arc::clone(&self.shared.events)
    }

    /// Session counters
    pub fn stats(&self) -> PollStats {
        *self.shared.stats.read()
    }

    fn set_state(&self, state: EngineState) {
        *self.shared.state.write() = state;
    }
}

impl Default for PollingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PollingEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Marks the session stopped when the polling thread exits, panics included
struct ExitGuard(Arc<Shared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let mut state = self.0.state.write();
        if matches!(*state, EngineState::Connecting | EngineState::Running) {
            *state = EngineState::Stopped;
        }
    }
}

impl Session {
    fn run(self, ready_tx: &Sender<Result<(), TransportError>>, stop_rx: &Receiver<()>) {
        let _exit = ExitGuard(Arc::clone(&self.shared));
        let events = Arc::clone(&self.shared.events);

        let mut connection = match Connection::open(self.opener.as_ref(), &self.config, self.retry) {
            Ok(conn) => conn,
            Err(e) => {
                events.emit(PollEventKind::ConnectFailed { error: e.to_string() });
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        let info = self.config.connection_info();
        events.emit(PollEventKind::Connected { info: info.clone() });
        *self.shared.state.write() = EngineState::Running;
        let _ = ready_tx.send(Ok(()));

        let decoder = Decoder::new(self.config.word_swap);
        let mut cycle = 0u64;

        loop {
            match stop_rx.try_recv() {
                Ok(()) | Err(crossbeam_channel::TryRecvError::Disconnected) => break,
                Err(crossbeam_channel::TryRecvError::Empty) => {}
            }

            let interval = self.interval.resolve();
            if interval.fallback {
                events.emit(PollEventKind::IntervalFallback {
                    raw: self.interval.text(),
                    used_ms: interval.duration.as_millis() as u64,
                });
            }

            let started = Instant::now();
            cycle += 1;
            self.sweep(&mut connection, &decoder, cycle);
            let elapsed = started.elapsed();

            {
                let mut stats = self.shared.stats.write();
                stats.cycles = cycle;
                stats.last_sweep = elapsed;
            }
            tracing::debug!("Cycle {} finished in {:?}", cycle, elapsed);

            let wait = interval.duration.saturating_sub(elapsed);
            match stop_rx.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        connection.close();
        events.emit(PollEventKind::Disconnected { info });
    }

    /// Read every register once, in map order
    fn sweep(&self, connection: &mut Connection, decoder: &Decoder, cycle: u64) {
        let unit_id = self.config.unit_id;

        for (index, def) in self.map.iter().enumerate() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                connection.read_registers(def.address(), def.word_count(), def.function, unit_id)
            }));

            let result = match outcome {
                Ok(Ok(words)) => match decoder.decode(def, &words) {
                    Ok(value) => ReadingResult::ok(cycle, index, words, value),
                    Err(e) => ReadingResult::decode_error(cycle, index, words, e.to_string()),
                },
                Ok(Err(e)) => ReadingResult::transport_error(cycle, index, e.to_string()),
                Err(payload) => ReadingResult::transport_error(
                    cycle,
                    index,
                    TransportError::Internal(panic_message(payload.as_ref())).to_string(),
                ),
            };

            self.record(&def.name, &result);
            self.shared.sink.publish(index, result);
        }
    }

    fn record(&self, name: &str, result: &ReadingResult) {
        let message = result.message.clone().unwrap_or_default();
        let mut stats = self.shared.stats.write();
        match result.status {
            ReadStatus::Ok => stats.reads_ok += 1,
            ReadStatus::TransportError => {
                stats.transport_errors += 1;
                drop(stats);
                self.shared.events.emit(PollEventKind::RegisterTransportError {
                    name: name.to_string(),
                    message,
                });
            }
            ReadStatus::DecodeError => {
                stats.decode_errors += 1;
                drop(stats);
                self.shared.events.emit(PollEventKind::RegisterDecodeError {
                    name: name.to_string(),
                    message,
                });
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic while reading register".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_clamped_to_floor() {
        let interval = PollInterval::from_millis(50);
        assert_eq!(interval.resolve(), ResolvedInterval { duration: MIN_POLL_INTERVAL, fallback: false });
        assert_eq!(PollInterval::from_text("-5").resolve().duration, MIN_POLL_INTERVAL);
    }

    #[test]
    fn test_interval_fallback_on_garbage() {
        let interval = PollInterval::from_text("fast please");
        assert_eq!(
            interval.resolve(),
            ResolvedInterval { duration: DEFAULT_POLL_INTERVAL, fallback: true }
        );
        interval.set_text(" 750 ");
        assert_eq!(interval.resolve().duration, Duration::from_millis(750));
    }

    #[test]
    fn test_interval_shared_between_clones() {
        let interval = PollInterval::from_millis(1000);
        let editor = interval.clone();
        editor.set_millis(300);
        assert_eq!(interval.resolve().duration, Duration::from_millis(300));
    }

    #[test]
    fn test_new_engine_is_idle() {
        let engine = PollingEngine::new();
        assert_eq!(engine.state(), EngineState::Idle);
        engine.stop();
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_config_error_does_not_spawn() {
        let engine = PollingEngine::new();
        let err = engine
            .start(ConnectionConfig::new("COM1", 12345), RegisterMap::em6400ng(), 1000u64)
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn test_interval_above_i64_range_is_used() {
        let interval = PollInterval::from_millis(u64::MAX);
        assert_eq!(
            interval.resolve(),
            ResolvedInterval { duration: Duration::from_millis(u64::MAX), fallback: false }
        );
    }

    fn shared_in(state: EngineState) -> Arc<Shared> {
        Arc::new(Shared {
            state: RwLock::new(state),
            sink: Arc::new(ResultSink::new(RegisterMap::em6400ng())),
            events: Arc::new(EventHub::new()),
            stats: RwLock::new(PollStats::default()),
        })
    }

    #[test]
    fn test_dead_polling_thread_leaves_stopped_state() {
        let shared = shared_in(EngineState::Running);
        let guard = ExitGuard(Arc::clone(&shared));
        let handle = thread::spawn(move || {
            let _guard = guard;
            panic!("sink blew up");
        });
        assert!(handle.join().is_err());
        assert_eq!(*shared.state.read(), EngineState::Stopped);

        let stopping = shared_in(EngineState::Stopping);
        drop(ExitGuard(Arc::clone(&stopping)));
        assert_eq!(*stopping.state.read(), EngineState::Stopping);
    }

    #[test]
    fn test_finished_worker_does_not_block_start() {
        let opener = |_: &ConnectionConfig| -> Result<Box<dyn crate::core::transport::ModbusTransport>, TransportError> {
            Err(TransportError::OpenFailed("busy".into()))
        };
        let engine = PollingEngine::with_opener(Arc::new(opener));

        let (stop_tx, _stop_rx) = crossbeam_channel::bounded(1);
        let handle = thread::spawn(|| {});
        while !handle.is_finished() {
            thread::yield_now();
        }
        *engine.worker.lock() = Some(Worker { stop_tx, handle });

        let err = engine
            .start(ConnectionConfig::new("COM1", 9600), RegisterMap::em6400ng(), 1000u64)
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport(TransportError::OpenFailed(_))));
        assert!(engine.worker.lock().is_none());
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
