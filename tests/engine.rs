//! Polling engine behaviour against a scripted meter

use meterpoll_core::{
    ConnectionConfig, EngineError, EngineState, ModbusTransport, PollEventKind, PollInterval,
    PollingEngine, ReadStatus, RegisterDefinition, RegisterMap, RetryPolicy, TransportError,
    TransportOpener,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone)]
enum Reply {
    Words(Vec<u16>),
    Timeout,
    Exception,
    Panic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Call {
    function: u8,
    address: u16,
    count: u16,
    unit_id: u8,
}

/// Observable state shared between a test and the transports it hands out
#[derive(Default)]
struct Meter {
    replies: Mutex<HashMap<u16, Reply>>,
    calls: Mutex<Vec<(Call, Instant)>>,
    opens: AtomicUsize,
    closed: AtomicBool,
}

impl Meter {
    fn new(replies: &[(u16, Reply)]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().cloned().collect()),
            ..Self::default()
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().iter().map(|(c, _)| *c).collect()
    }

    fn opener(self: &Arc<Self>) -> Arc<dyn TransportOpener> {
        let meter = Arc::clone(self);
        Arc::new(move |config: &ConnectionConfig| -> Result<Box<dyn ModbusTransport>, TransportError> {
            meter.opens.fetch_add(1, Ordering::SeqCst);
            meter.closed.store(false, Ordering::SeqCst);
            Ok(Box::new(ScriptedTransport {
                meter: Arc::clone(&meter),
                info: config.connection_info(),
            }))
        })
    }
}

struct ScriptedTransport {
    meter: Arc<Meter>,
    info: String,
}

impl ScriptedTransport {
    fn reply(&self, function: u8, address: u16, count: u16, unit_id: u8) -> Result<Vec<u16>, TransportError> {
        self.meter.calls.lock().push((
            Call {
                function,
                address,
                count,
                unit_id,
            },
            Instant::now(),
        ));
        let reply = self.meter.replies.lock().get(&address).cloned();
        match reply {
            Some(Reply::Words(words)) => Ok(words),
            Some(Reply::Timeout) => Err(TransportError::Timeout(1000)),
            Some(Reply::Exception) => Err(TransportError::Exception {
                function,
                message: "Illegal data address".into(),
            }),
            Some(Reply::Panic) => panic!("driver exploded"),
            None => Ok(vec![0, 0]),
        }
    }
}

impl ModbusTransport for ScriptedTransport {
    fn read_input_registers(&mut self, address: u16, count: u16, unit_id: u8) -> Result<Vec<u16>, TransportError> {
        self.reply(4, address, count, unit_id)
    }

    fn read_holding_registers(&mut self, address: u16, count: u16, unit_id: u8) -> Result<Vec<u16>, TransportError> {
        self.reply(3, address, count, unit_id)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.meter.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn connection_info(&self) -> String {
        self.info.clone()
    }
}

fn config() -> ConnectionConfig {
    ConnectionConfig::new("/dev/ttyTEST0", 19200)
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn wait_cycles(engine: &PollingEngine, cycles: u64) {
    assert!(
        wait_until(Duration::from_secs(5), || engine.stats().cycles >= cycles),
        "engine did not complete {cycles} cycle(s)"
    );
}

fn single(offset: u32) -> RegisterMap {
    RegisterMap::new(vec![RegisterDefinition::input(offset, "Active power total", "kW")]).unwrap()
}

#[test]
fn test_sample_reading_decodes() {
    let meter = Meter::new(&[(3052, Reply::Words(vec![0x4248, 0xF5C3]))]);
    let engine = PollingEngine::with_opener(meter.opener());

    engine.start(config(), single(3053), 200u64).unwrap();
    assert_eq!(engine.state(), EngineState::Running);
    wait_cycles(&engine, 1);
    engine.stop();

    let row = &engine.snapshot()[0];
    let reading = row.reading.as_ref().unwrap();
    assert_eq!(reading.status, ReadStatus::Ok);
    assert_eq!(reading.raw_words.as_deref(), Some(&[0x4248, 0xF5C3][..]));
    assert!((reading.value.unwrap() - 50.24).abs() < 1e-4);
    assert_eq!(row.value_text(), "50.2400");

    assert_eq!(
        meter.calls()[0],
        Call {
            function: 4,
            address: 3052,
            count: 2,
            unit_id: 1
        }
    );
}

#[test]
fn test_word_swap_layout() {
    let meter = Meter::new(&[(3052, Reply::Words(vec![0xF5C3, 0x4248]))]);
    let engine = PollingEngine::with_opener(meter.opener());

    engine.start(config().word_swap(true), single(3053), 200u64).unwrap();
    wait_cycles(&engine, 1);
    engine.stop();

    let value = engine.sink().latest(0).and_then(|r| r.value).unwrap();
    assert!((value - 50.24).abs() < 1e-4);
}

#[test]
fn test_exception_does_not_stop_polling() {
    let meter = Meter::new(&[(3052, Reply::Exception)]);
    let engine = PollingEngine::with_opener(meter.opener());

    engine.start(config(), single(3053), 200u64).unwrap();
    wait_cycles(&engine, 2);
    assert_eq!(engine.state(), EngineState::Running);

    let reading = engine.sink().latest(0).unwrap();
    assert_eq!(reading.status, ReadStatus::TransportError);
    assert!(reading.message.unwrap().contains("Illegal data address"));
    assert_eq!(engine.snapshot()[0].value_text(), "ERR");

    let errors = engine
        .events()
        .recent()
        .into_iter()
        .filter(|e| matches!(e.kind, PollEventKind::RegisterTransportError { .. }))
        .count();
    assert!(errors >= 2);
    engine.stop();
}

#[test]
fn test_one_failing_register_among_many() {
    let map = RegisterMap::new(vec![
        RegisterDefinition::input(3001, "Current A", "A"),
        RegisterDefinition::input(3003, "Current B", "A"),
        RegisterDefinition::input(3005, "Current C", "A"),
        RegisterDefinition::holding(2700, "Energy", "kWh"),
        RegisterDefinition::input(3111, "Frequency", "Hz"),
    ])
    .unwrap();
    let meter = Meter::new(&[(3002, Reply::Timeout)]);
    let engine = PollingEngine::with_opener(meter.opener());

    engine.start(config(), map, 200u64).unwrap();
    wait_cycles(&engine, 1);
    engine.stop();

    let results = engine.sink().results();
    assert_eq!(results.len(), 5);
    let statuses: Vec<ReadStatus> = results.iter().map(|r| r.as_ref().unwrap().status).collect();
    assert_eq!(statuses.iter().filter(|s| **s == ReadStatus::TransportError).count(), 1);
    assert_eq!(statuses[1], ReadStatus::TransportError);

    let first_sweep: Vec<(u8, u16)> = meter.calls().iter().take(5).map(|c| (c.function, c.address)).collect();
    assert_eq!(first_sweep, vec![(4, 3000), (4, 3002), (4, 3004), (3, 2699), (4, 3110)]);
    let stats = engine.stats();
    assert_eq!(stats.transport_errors, stats.cycles);
    assert_eq!(stats.reads_ok, 4 * stats.cycles);
}

#[test]
fn test_short_reply_is_decode_error() {
    let meter = Meter::new(&[(3052, Reply::Words(vec![0x4248]))]);
    let engine = PollingEngine::with_opener(meter.opener());

    engine.start(config(), single(3053), 200u64).unwrap();
    wait_cycles(&engine, 1);
    engine.stop();

    let reading = engine.sink().latest(0).unwrap();
    assert_eq!(reading.status, ReadStatus::DecodeError);
    assert_eq!(reading.raw_words, Some(vec![0x4248]));
    assert!(reading.value.is_none());
    assert_eq!(engine.snapshot()[0].value_text(), "N/A");
    assert_eq!(engine.stats().decode_errors, engine.stats().cycles);
}

#[test]
fn test_panicking_read_is_isolated() {
    let map = RegisterMap::new(vec![
        RegisterDefinition::input(101, "Broken", ""),
        RegisterDefinition::input(103, "Fine", ""),
    ])
    .unwrap();
    let meter = Meter::new(&[(100, Reply::Panic), (102, Reply::Words(vec![0x3F80, 0x0000]))]);
    let engine = PollingEngine::with_opener(meter.opener());

    engine.start(config(), map, 200u64).unwrap();
    wait_cycles(&engine, 2);
    assert_eq!(engine.state(), EngineState::Running);
    engine.stop();

    let broken = engine.sink().latest(0).unwrap();
    assert_eq!(broken.status, ReadStatus::TransportError);
    assert!(broken.message.unwrap().contains("driver exploded"));
    assert_eq!(engine.sink().latest(1).and_then(|r| r.value), Some(1.0));
}

#[test]
fn test_stop_is_prompt_and_closes_port() {
    let meter = Meter::new(&[]);
    let engine = PollingEngine::with_opener(meter.opener());

    engine.start(config(), single(3053), 10_000u64).unwrap();
    wait_cycles(&engine, 1);

    let started = Instant::now();
    engine.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(meter.closed.load(Ordering::SeqCst));

    let calls = meter.calls().len();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(meter.calls().len(), calls, "reads after stop");

    let last = engine.events().recent().pop().unwrap();
    assert!(matches!(last.kind, PollEventKind::Disconnected { .. }));

    engine.stop();
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[test]
fn test_stop_right_after_start() {
    let meter = Meter::new(&[]);
    let engine = PollingEngine::with_opener(meter.opener());

    engine.start(config(), single(3053), 200u64).unwrap();
    engine.stop();

    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(meter.closed.load(Ordering::SeqCst));
}

#[test]
fn test_open_failure_reported() {
    let opener: Arc<dyn TransportOpener> =
        Arc::new(|config: &ConnectionConfig| -> Result<Box<dyn ModbusTransport>, TransportError> {
            Err(TransportError::PortNotFound(config.port.clone()))
        });
    let engine = PollingEngine::with_opener(opener);

    let err = engine.start(config(), single(3053), 200u64).unwrap_err();
    assert!(matches!(err, EngineError::Transport(TransportError::PortNotFound(ref p)) if p == "/dev/ttyTEST0"));
    assert_eq!(engine.state(), EngineState::Stopped);

    let events = engine.events().recent();
    assert!(events.iter().any(|e| matches!(e.kind, PollEventKind::ConnectFailed { .. })));
}

#[test]
fn test_invalid_config_never_opens() {
    let meter = Meter::new(&[]);
    let engine = PollingEngine::with_opener(meter.opener());

    let err = engine
        .start(ConnectionConfig::new("", 19200), single(3053), 200u64)
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    assert_eq!(meter.opens.load(Ordering::SeqCst), 0);
}

#[test]
fn test_interval_floor_enforced() {
    let meter = Meter::new(&[]);
    let engine = PollingEngine::with_opener(meter.opener());

    engine.start(config(), single(3053), 50u64).unwrap();
    wait_cycles(&engine, 3);
    engine.stop();

    let times: Vec<Instant> = meter.calls.lock().iter().map(|(_, t)| *t).collect();
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(190), "sweeps too close: {:?}", pair[1] - pair[0]);
    }
}

#[test]
fn test_unparsable_interval_falls_back() {
    let meter = Meter::new(&[]);
    let engine = PollingEngine::with_opener(meter.opener());
    let interval = PollInterval::from_text("soon");

    engine.start(config(), single(3053), interval.clone()).unwrap();
    wait_cycles(&engine, 1);
    engine.stop();

    let fallback = engine
        .events()
        .recent()
        .into_iter()
        .find_map(|e| match e.kind {
            PollEventKind::IntervalFallback { raw, used_ms } => Some((raw, used_ms)),
            _ => None,
        });
    assert_eq!(fallback, Some(("soon".to_string(), 1000)));
}

#[test]
fn test_interval_edit_to_garbage_while_running() {
    let meter = Meter::new(&[]);
    let engine = PollingEngine::with_opener(meter.opener());
    let interval = PollInterval::from_millis(200);
    let editor = interval.clone();

    engine.start(config(), single(3053), interval).unwrap();
    wait_cycles(&engine, 1);
    editor.set_text("garbage");

    let fell_back = wait_until(Duration::from_secs(5), || {
        engine.events().recent().into_iter().any(|e| {
            matches!(
                e.kind,
                PollEventKind::IntervalFallback { ref raw, used_ms: 1000 } if raw == "garbage"
            )
        })
    });
    assert!(fell_back);
    assert!(engine.is_running());
    engine.stop();
}

#[test]
fn test_start_while_running_rejected() {
    let meter = Meter::new(&[]);
    let engine = PollingEngine::with_opener(meter.opener());

    engine.start(config(), single(3053), 200u64).unwrap();
    let err = engine.start(config(), single(3053), 200u64).unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRunning));
    assert_eq!(meter.opens.load(Ordering::SeqCst), 1);
    engine.stop();
}

#[test]
fn test_restart_after_stop() {
    let meter = Meter::new(&[(3052, Reply::Words(vec![0x4248, 0xF5C3]))]);
    let engine = PollingEngine::with_opener(meter.opener());

    engine.start(config(), single(3053), 200u64).unwrap();
    wait_cycles(&engine, 1);
    engine.stop();

    engine.start(config().unit_id(7), single(3053), 200u64).unwrap();
    assert_eq!(engine.state(), EngineState::Running);
    wait_cycles(&engine, 1);
    engine.stop();

    assert_eq!(meter.opens.load(Ordering::SeqCst), 2);
    assert_eq!(meter.calls().last().map(|c| c.unit_id), Some(7));
}

#[test]
fn test_engines_are_independent() {
    let meter_a = Meter::new(&[(3052, Reply::Words(vec![0x3F80, 0x0000]))]);
    let meter_b = Meter::new(&[(3052, Reply::Words(vec![0x4000, 0x0000]))]);
    let a = PollingEngine::with_opener(meter_a.opener());
    let b = PollingEngine::with_opener(meter_b.opener()).retry_policy(RetryPolicy::fixed(1, Duration::ZERO));

    a.start(config(), single(3053), 200u64).unwrap();
    b.start(ConnectionConfig::new("/dev/ttyTEST1", 9600), single(3053), 200u64).unwrap();
    wait_cycles(&a, 1);
    wait_cycles(&b, 1);

    a.stop();
    assert_eq!(a.state(), EngineState::Stopped);
    assert_eq!(b.state(), EngineState::Running);
    assert_ne!(a.id(), b.id());

    assert_eq!(a.sink().latest(0).and_then(|r| r.value), Some(1.0));
    assert_eq!(b.sink().latest(0).and_then(|r| r.value), Some(2.0));
    b.stop();
}
