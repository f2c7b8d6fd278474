use breakers_rs::store::{Command, Reply};
use breakers_rs::{
    matcher, BreakerConfig, BreakerError, CircuitBreaker, ManualClock, MemoryStore, Outage,
    OutageReport, OutageResponse, Plugin, Request, Response, SamplePoint, ScriptedRandom, Service,
    ServiceConfig, ServiceConfigBuilder, ServiceRegistry, State, Store, StoreError,
    StoreFailureMode, StoreResult, TransportError,
};
use parking_lot::Mutex;
use std::cell::Cell;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

const START: u64 = 1_000_020;

// Custom error type that implements Error trait
#[derive(Debug)]
struct TestError(String);

impl TestError {
    fn new(msg: &str) -> Self {
        TestError(msg.to_string())
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Test error: {}", self.0)
    }
}

impl Error for TestError {}

type Outcome = Result<Response, TransportError<TestError>>;

/// Remembers every plugin callback as a short line.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl Plugin for Recorder {
    fn on_outage_begin(&self, outage: &Outage) {
        self.events.lock().push(format!("begin {}", outage.service()));
    }

    fn on_outage_end(&self, outage: &Outage) {
        self.events.lock().push(format!("end {}", outage.service()));
    }

    fn on_success(&self, service: &Service, _request: &Request, response: &Response) {
        self.events
            .lock()
            .push(format!("success {} {}", service.name(), response.status));
    }

    fn on_error(&self, service: &Service, _request: &Request, response: Option<&Response>) {
        let status = response.map_or_else(|| "raised".to_string(), |r| r.status.to_string());
        self.events
            .lock()
            .push(format!("error {} {}", service.name(), status));
    }

    fn on_skipped_request(&self, service: &Service) {
        self.events.lock().push(format!("skipped {}", service.name()));
    }
}

/// A store whose every round trip fails.
struct FailingStore;

impl Store for FailingStore {
    fn execute(&self, _commands: &[Command]) -> StoreResult<Vec<Reply>> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

/// A store that fails every batch that writes a counter.
struct CounterWritesFail(MemoryStore);

impl Store for CounterWritesFail {
    fn execute(&self, commands: &[Command]) -> StoreResult<Vec<Reply>> {
        if commands
            .iter()
            .any(|command| matches!(command, Command::Increment { .. }))
        {
            return Err(StoreError::Unavailable("read-only replica".to_string()));
        }
        self.0.execute(commands)
    }
}

/// Keeps the duration of every successful response.
#[derive(Default)]
struct Timings(Mutex<Vec<Option<Duration>>>);

impl Plugin for Timings {
    fn on_success(&self, _service: &Service, _request: &Request, response: &Response) {
        self.0.lock().push(response.duration);
    }
}

/// Counts every tracing event.
struct CountingLayer(Arc<AtomicUsize>);

impl<S: tracing::Subscriber> Layer<S> for CountingLayer {
    fn on_event(&self, _event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    recorder: Arc<Recorder>,
    breaker: CircuitBreaker,
}

impl Harness {
    fn new(service: ServiceConfigBuilder, config: BreakerConfig) -> Self {
        Self::with_random(service, config, ScriptedRandom::new([0]))
    }

    fn with_random(
        service: ServiceConfigBuilder,
        config: BreakerConfig,
        random: ScriptedRandom,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let recorder = Arc::new(Recorder::default());
        let registry = ServiceRegistry::builder(store.clone())
            .key_prefix("test:")
            .clock(clock.clone())
            .random_source(Arc::new(random))
            .plugin_arc(recorder.clone())
            .service(service.build().unwrap())
            .build()
            .unwrap();
        let breaker = CircuitBreaker::builder(Arc::new(registry))
            .config(config)
            .build();

        Self {
            clock,
            store,
            recorder,
            breaker,
        }
    }

    fn service(&self) -> &Service {
        self.breaker.registry().service_named("search").unwrap()
    }

    fn send(&self, status: u16) -> Result<Response, BreakerError<TestError>> {
        self.breaker
            .call(&search_request(), |_: &Request| -> Outcome {
                Ok(Response::new(status))
            })
    }

    fn state(&self) -> State {
        self.breaker.inspect(&search_request(), None).unwrap()
    }
}

fn search() -> ServiceConfigBuilder {
    ServiceConfig::builder()
        .name("search")
        .matcher_arc(matcher::host("search.example.com"))
}

fn search_request() -> Request {
    Request::get("https://search.example.com/q?term=rust").unwrap()
}

#[test]
fn healthy_requests_are_counted_and_delivered() {
    let h = Harness::new(search(), BreakerConfig::default());

    assert_eq!(h.send(200).unwrap().status, 200);
    // Client errors are the caller's fault, not the service's.
    assert_eq!(h.send(404).unwrap().status, 404);

    assert_eq!(
        h.service().successes_in_range(START, START, 1).unwrap(),
        vec![SamplePoint {
            time: START,
            count: 2
        }]
    );
    assert_eq!(h.service().window_counts().unwrap().errors, 0);
    assert_eq!(h.state(), State::Normal);
}

#[test]
fn unmatched_requests_pass_through_untouched() {
    let h = Harness::new(search(), BreakerConfig::default());
    let request = Request::get("https://other.example.com/").unwrap();

    let result = h
        .breaker
        .call(&request, |_: &Request| -> Outcome { Ok(Response::new(500)) });
    assert_eq!(result.unwrap().status, 500);

    assert!(h.store.is_empty());
    assert!(h.recorder.take().is_empty());
    assert_eq!(h.breaker.inspect(&request, None).unwrap(), State::PassThrough);
}

#[test]
fn outage_opens_exactly_at_the_threshold() {
    let h = Harness::new(search().error_threshold(50), BreakerConfig::default());

    for _ in 0..100 {
        h.send(200).unwrap();
    }
    for _ in 0..99 {
        assert_eq!(h.send(500).unwrap().status, 500);
    }
    assert!(h.service().current_outage().unwrap().is_none());

    // 100 errors out of 200 is exactly 50%.
    assert_eq!(h.send(500).unwrap().status, 500);
    let outage = h.service().current_outage().unwrap().unwrap();
    assert_eq!(outage.start_time(), START);
    assert!(outage.is_open());
    assert!(!outage.is_forced());
    assert_eq!(h.state(), State::Blocked);
}

#[test]
fn errors_without_successes_trip_once_min_errors_is_reached() {
    let h = Harness::new(search().min_errors(3), BreakerConfig::default());

    h.send(503).unwrap();
    h.send(503).unwrap();
    assert!(h.service().current_outage().unwrap().is_none());

    h.send(503).unwrap();
    assert!(h.service().current_outage().unwrap().is_some());
}

#[test]
fn errors_from_the_previous_minute_count() {
    let h = Harness::new(search().min_errors(2), BreakerConfig::default());

    h.send(500).unwrap();
    h.clock.advance(60);
    h.send(500).unwrap();
    assert!(h.service().current_outage().unwrap().is_some());
}

#[test]
fn blocked_requests_never_reach_the_transport() {
    let h = Harness::new(search(), BreakerConfig::default());
    h.send(500).unwrap();

    let calls = Cell::new(0);
    let result = h.breaker.call(&search_request(), |_: &Request| -> Outcome {
        calls.set(calls.get() + 1);
        Ok(Response::new(200))
    });

    assert_eq!(calls.get(), 0);
    match result {
        Err(BreakerError::Outage(err)) => {
            assert_eq!(err.service, "search");
            assert_eq!(err.outage.start_time(), START);
            assert_eq!(
                err.to_string(),
                "Outage detected on search beginning at 1000020"
            );
        }
        other => panic!("expected an outage error, got {:?}", other),
    }
}

#[test]
fn status_code_response_replaces_the_error() {
    let config = BreakerConfig {
        outage_response: OutageResponse::StatusCode { code: 503 },
        ..BreakerConfig::default()
    };
    let h = Harness::new(search(), config);
    h.send(500).unwrap();

    let response = h.send(200).unwrap();
    assert_eq!(response.status, 503);
    assert_eq!(
        response.text(),
        "Outage detected on search beginning at 1000020"
    );
}

#[test]
fn successful_probe_ends_the_outage() {
    let h = Harness::new(search().seconds_before_retry(60), BreakerConfig::default());
    h.send(500).unwrap();

    // The cooldown must be strictly exceeded.
    h.clock.advance(60);
    assert_eq!(h.state(), State::Blocked);
    h.clock.advance(1);
    assert_eq!(h.state(), State::Probe);

    assert_eq!(h.send(200).unwrap().status, 200);

    let outage = h.service().current_outage().unwrap().unwrap();
    assert_eq!(outage.end_time(), Some(START + 61));
    assert_eq!(h.state(), State::Normal);
    assert_eq!(h.send(200).unwrap().status, 200);
}

#[test]
fn failed_probe_pushes_the_retest_window_out() {
    let h = Harness::new(search().seconds_before_retry(60), BreakerConfig::default());
    h.send(500).unwrap();

    h.clock.advance(61);
    assert_eq!(h.send(500).unwrap().status, 500);

    let outage = h.service().current_outage().unwrap().unwrap();
    assert!(outage.is_open());
    assert_eq!(outage.last_test_time(), START + 61);
    assert_eq!(h.service().outages_in_range(0, u64::MAX).unwrap().len(), 1);

    h.clock.advance(60);
    assert_eq!(h.state(), State::Blocked);
    h.clock.advance(1);
    assert_eq!(h.state(), State::Probe);
}

#[test]
fn forced_outages_are_never_probed() {
    let h = Harness::new(search(), BreakerConfig::default());

    let outage = h.service().begin_forced_outage().unwrap();
    assert!(outage.is_forced());

    h.clock.advance(10_000);
    assert_eq!(h.state(), State::Blocked);
    assert!(matches!(h.send(200), Err(BreakerError::Outage(_))));

    let ended = h.service().end_forced_outage().unwrap().unwrap();
    assert_eq!(ended.end_time(), Some(START + 10_000));
    assert_eq!(h.state(), State::Normal);
    assert!(h.service().end_forced_outage().unwrap().is_none());
}

#[test]
fn ending_a_forced_outage_leaves_detected_outages_alone() {
    let h = Harness::new(search(), BreakerConfig::default());
    h.send(500).unwrap();

    assert!(h.service().end_forced_outage().unwrap().is_none());
    assert!(h.service().current_outage().unwrap().unwrap().is_open());
}

#[test]
fn outage_history_round_trips() {
    let h = Harness::new(search(), BreakerConfig::default());
    h.send(500).unwrap();
    h.clock.advance(61);
    h.send(200).unwrap();
    h.clock.advance(139);
    h.service().begin_forced_outage().unwrap();

    let first = h.service().outages_in_range(START, START + 100).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].start_time(), START);
    assert_eq!(first[0].end_time(), Some(START + 61));

    let report = OutageReport::collect(h.service(), 0, u64::MAX).unwrap();
    assert_eq!(report.outages.len(), 2);
    assert!(report.outages[1].is_forced());
    assert_eq!(report.outages[1].start_time(), START + 200);

    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains(r#""service":"search""#));
}

#[test]
fn disabled_breaker_records_and_logs_nothing() {
    let config = BreakerConfig {
        enabled: false,
        ..BreakerConfig::default()
    };
    let h = Harness::new(search(), config);
    let events = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(CountingLayer(events.clone()));

    tracing::subscriber::with_default(subscriber, || {
        assert_eq!(h.send(500).unwrap().status, 500);
        let raised = h.breaker.call(&search_request(), |_: &Request| -> Outcome {
            Err(TransportError::Timeout("5s".to_string()))
        });
        assert!(matches!(
            raised,
            Err(BreakerError::Transport(TransportError::Timeout(_)))
        ));
    });

    assert_eq!(events.load(Ordering::SeqCst), 0);
    assert!(h.store.is_empty());
    assert!(h.recorder.take().is_empty());
    assert_eq!(h.state(), State::PassThrough);

    h.breaker.enable();
    let subscriber = tracing_subscriber::registry().with(CountingLayer(events.clone()));
    tracing::subscriber::with_default(subscriber, || {
        h.send(500).unwrap();
    });
    assert!(events.load(Ordering::SeqCst) > 0);
    assert!(!h.store.is_empty());
}

#[test]
fn exception_handler_decides_which_raised_errors_count() {
    let service = search().exception_handler(|err| err.to_string().contains("overloaded"));
    let h = Harness::new(service, BreakerConfig::default());

    let result = h.breaker.call(&search_request(), |_: &Request| -> Outcome {
        Err(TransportError::Other(TestError::new("bad input")))
    });
    match result {
        Err(BreakerError::Transport(TransportError::Other(err))) => assert_eq!(err.0, "bad input"),
        other => panic!("expected the raised error back, got {:?}", other),
    }
    assert_eq!(h.service().window_counts().unwrap().errors, 0);
    assert!(h.recorder.take().is_empty());

    let result = h.breaker.call(&search_request(), |_: &Request| -> Outcome {
        Err(TransportError::Other(TestError::new("overloaded")))
    });
    assert!(matches!(
        result,
        Err(BreakerError::Transport(TransportError::Other(_)))
    ));
    assert_eq!(h.service().window_counts().unwrap().errors, 1);
    assert!(h.service().current_outage().unwrap().is_some());
}

#[test]
fn transport_failures_always_count_and_are_re_raised() {
    let h = Harness::new(search().min_errors(2), BreakerConfig::default());

    for _ in 0..2 {
        let result = h.breaker.call(&search_request(), |_: &Request| -> Outcome {
            Err(TransportError::ConnectionFailed("reset by peer".to_string()))
        });
        assert!(matches!(
            result,
            Err(BreakerError::Transport(TransportError::ConnectionFailed(_)))
        ));
    }
    assert_eq!(h.service().window_counts().unwrap().errors, 2);
    assert_eq!(h.state(), State::Blocked);
}

#[test]
fn outage_checks_are_cached_between_processes() {
    let clock = Arc::new(ManualClock::new(START));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let process = || {
        let registry = ServiceRegistry::builder(store.clone())
            .clock(clock.clone())
            .service(search().seconds_between_outage_checks(30).build().unwrap())
            .build()
            .unwrap();
        CircuitBreaker::new(Arc::new(registry), BreakerConfig::default())
    };
    let a = process();
    let b = process();
    let request = search_request();

    assert_eq!(a.inspect(&request, None).unwrap(), State::Normal);
    b.registry()
        .service_named("search")
        .unwrap()
        .begin_forced_outage()
        .unwrap();
    assert_eq!(b.inspect(&request, None).unwrap(), State::Blocked);

    // `a` keeps its verdict until it is 30 seconds old.
    clock.advance(29);
    assert_eq!(a.inspect(&request, None).unwrap(), State::Normal);
    clock.advance(1);
    assert_eq!(a.inspect(&request, None).unwrap(), State::Blocked);
}

#[test]
fn own_outage_bypasses_the_cached_verdict() {
    let h = Harness::new(
        search().seconds_between_outage_checks(30),
        BreakerConfig::default(),
    );

    h.send(200).unwrap();
    h.send(500).unwrap();
    assert_eq!(h.state(), State::Blocked);
}

#[test]
fn single_flight_probe_blocks_concurrent_probes() {
    let config = BreakerConfig {
        single_flight_probes: true,
        ..BreakerConfig::default()
    };
    let h = Harness::new(search(), config);
    h.send(500).unwrap();
    h.clock.advance(61);

    let result = h.breaker.call(&search_request(), |_: &Request| -> Outcome {
        let concurrent = h.breaker.call(&search_request(), |_: &Request| -> Outcome {
            panic!("a second probe must not run while the first holds the lock")
        });
        assert!(matches!(concurrent, Err(BreakerError::Outage(_))));
        Ok(Response::new(200))
    });

    assert_eq!(result.unwrap().status, 200);
    assert_eq!(h.store.get("test:search-retest-lock").unwrap(), None);
    assert_eq!(h.state(), State::Normal);
}

#[test]
fn store_failure_fails_open_by_default() {
    let registry = ServiceRegistry::builder(Arc::new(FailingStore))
        .service(search().build().unwrap())
        .build()
        .unwrap();
    let breaker = CircuitBreaker::new(Arc::new(registry), BreakerConfig::default());
    let request = search_request();

    let result = breaker.call(&request, |_: &Request| -> Outcome { Ok(Response::new(200)) });
    assert_eq!(result.unwrap().status, 200);
    let result = breaker.call(&request, |_: &Request| -> Outcome { Ok(Response::new(500)) });
    assert_eq!(result.unwrap().status, 500);
    assert!(breaker.inspect(&request, None).is_err());
}

#[test]
fn store_failure_can_propagate() {
    let registry = ServiceRegistry::builder(Arc::new(FailingStore))
        .service(search().build().unwrap())
        .build()
        .unwrap();
    let breaker = CircuitBreaker::builder(Arc::new(registry))
        .store_failure(StoreFailureMode::Propagate)
        .build();

    let calls = Cell::new(0);
    let result = breaker.call(&search_request(), |_: &Request| -> Outcome {
        calls.set(calls.get() + 1);
        Ok(Response::new(200))
    });
    assert!(matches!(
        result,
        Err(BreakerError::Store(StoreError::Unavailable(_)))
    ));
    assert_eq!(calls.get(), 0);
}

#[test]
fn plugins_see_every_event_in_order() {
    let h = Harness::new(search(), BreakerConfig::default());

    h.send(500).unwrap();
    assert_eq!(h.recorder.take(), vec!["begin search", "error search 500"]);

    assert!(h.send(200).is_err());
    assert_eq!(h.recorder.take(), vec!["skipped search"]);

    h.clock.advance(61);
    h.send(200).unwrap();
    assert_eq!(h.recorder.take(), vec!["end search", "success search 200"]);

    let _ = h.breaker.call(&search_request(), |_: &Request| -> Outcome {
        Err(TransportError::Timeout("5s".to_string()))
    });
    assert_eq!(h.recorder.take(), vec!["begin search", "error search raised"]);
}

#[test]
fn sampled_successes_are_weighted() {
    let h = Harness::with_random(
        search().success_sample_per(4),
        BreakerConfig::default(),
        ScriptedRandom::new([1, 0, 2, 0]),
    );

    for _ in 0..4 {
        h.send(200).unwrap();
    }
    assert_eq!(
        h.service().successes_in_range(START, START, 1).unwrap()[0].count,
        8
    );
    // Every success is still reported to plugins.
    assert_eq!(h.recorder.take().len(), 4);
}

#[test]
fn hint_routes_to_named_service() {
    let registry = ServiceRegistry::builder(Arc::new(MemoryStore::new()))
        .service(
            ServiceConfig::builder()
                .name("billing")
                .matcher_arc(matcher::named("billing"))
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let breaker = CircuitBreaker::new(Arc::new(registry), BreakerConfig::default());
    let request = Request::get("https://pay.example.com/charge").unwrap();

    breaker
        .call(&request, |_: &Request| -> Outcome { Ok(Response::new(500)) })
        .unwrap();
    assert_eq!(breaker.inspect(&request, None).unwrap(), State::PassThrough);

    breaker
        .call_with_hint(&request, Some("billing"), |_: &Request| -> Outcome {
            Ok(Response::new(500))
        })
        .unwrap();
    assert_eq!(
        breaker.inspect(&request, Some("billing")).unwrap(),
        State::Blocked
    );
}

#[test]
fn unbounded_retention_is_accepted() {
    let h = Harness::new(
        search().data_retention_seconds(u64::MAX),
        BreakerConfig::default(),
    );

    assert_eq!(h.send(200).unwrap().status, 200);
    assert_eq!(h.send(500).unwrap().status, 500);
    assert_eq!(h.service().window_counts().unwrap().errors, 1);
    assert_eq!(h.state(), State::Blocked);

    h.clock.advance(61);
    assert_eq!(h.send(200).unwrap().status, 200);
    assert_eq!(h.state(), State::Normal);
}

#[test]
fn plugins_see_how_long_the_request_took() {
    let timings = Arc::new(Timings::default());
    let registry = ServiceRegistry::builder(Arc::new(MemoryStore::new()))
        .plugin_arc(timings.clone())
        .service(search().build().unwrap())
        .build()
        .unwrap();
    let breaker = CircuitBreaker::new(Arc::new(registry), BreakerConfig::default());

    let response = breaker
        .call(&search_request(), |_: &Request| -> Outcome {
            thread::sleep(Duration::from_millis(5));
            Ok(Response::new(200))
        })
        .unwrap();

    let seen = timings.0.lock().clone();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].unwrap() >= Duration::from_millis(5));
    assert_eq!(response.duration, seen[0]);
    assert!(response.duration_millis().unwrap() >= 5);

    // Requests the breaker does not manage are left untimed.
    let other = Request::get("https://other.example.com/").unwrap();
    let response = breaker
        .call(&other, |_: &Request| -> Outcome { Ok(Response::new(200)) })
        .unwrap();
    assert_eq!(response.duration, None);
}

#[test]
fn propagated_write_failure_replaces_the_delivered_response() {
    let build = |mode| {
        let registry = ServiceRegistry::builder(Arc::new(CounterWritesFail(MemoryStore::new())))
            .service(search().build().unwrap())
            .build()
            .unwrap();
        CircuitBreaker::builder(Arc::new(registry))
            .store_failure(mode)
            .build()
    };

    let calls = Cell::new(0);
    let send = |breaker: &CircuitBreaker| {
        breaker.call(&search_request(), |_: &Request| -> Outcome {
            calls.set(calls.get() + 1);
            Ok(Response::new(200))
        })
    };

    let result = send(&build(StoreFailureMode::Propagate));
    assert_eq!(calls.get(), 1);
    assert!(matches!(
        result,
        Err(BreakerError::Store(StoreError::Unavailable(_)))
    ));

    let result = send(&build(StoreFailureMode::FailOpen));
    assert_eq!(calls.get(), 2);
    assert_eq!(result.unwrap().status, 200);
}

#[test]
fn concurrent_callers_keep_exact_counts() {
    const THREADS: usize = 8;
    const PER_THREAD: u64 = 25;

    // Enough errors that the first phase cannot trip.
    let h = Harness::new(
        search().error_threshold(50).min_errors(THREADS as u64 * PER_THREAD + 1),
        BreakerConfig::default(),
    );

    thread::scope(|s| {
        for _ in 0..THREADS {
            let breaker = h.breaker.clone();
            s.spawn(move || {
                let request = search_request();
                for _ in 0..PER_THREAD {
                    for status in [200, 500] {
                        let result = breaker.call(&request, |_: &Request| -> Outcome {
                            Ok(Response::new(status))
                        });
                        assert_eq!(result.unwrap().status, status);
                    }
                }
            });
        }
    });

    let total = THREADS as u64 * PER_THREAD;
    let counts = h.service().window_counts().unwrap();
    assert_eq!((counts.errors, counts.successes), (total, total));
    assert_eq!(
        h.service().successes_in_range(START, START, 1).unwrap()[0].count,
        total
    );
    assert!(h.service().current_outage().unwrap().is_none());

    // Now every thread only sees errors until the service is blocked.
    let delivered = AtomicUsize::new(0);
    let barrier = Barrier::new(THREADS);
    thread::scope(|s| {
        for _ in 0..THREADS {
            let breaker = h.breaker.clone();
            let delivered = &delivered;
            let barrier = &barrier;
            s.spawn(move || {
                let request = search_request();
                barrier.wait();
                for _ in 0..PER_THREAD {
                    match breaker.call(&request, |_: &Request| -> Outcome {
                        Ok(Response::new(503))
                    }) {
                        Ok(response) => {
                            assert_eq!(response.status, 503);
                            delivered.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(BreakerError::Outage(_)) => {}
                        Err(other) => panic!("unexpected error {:?}", other),
                    }
                }
            });
        }
    });

    let delivered = delivered.load(Ordering::SeqCst) as u64;
    assert!(delivered > 0);
    assert_eq!(h.service().window_counts().unwrap().errors, total + delivered);
    let outages = h.service().outages_in_range(0, u64::MAX).unwrap();
    assert_eq!(outages.len(), 1);
    assert!(outages[0].is_open());
    assert_eq!(outages[0].start_time(), START);
    assert_eq!(h.state(), State::Blocked);
}

#[test]
fn concurrent_retests_both_close_the_outage() {
    let h = Harness::new(search().seconds_before_retry(60), BreakerConfig::default());
    h.send(500).unwrap();
    h.clock.advance(61);
    h.recorder.take();

    // Both calls are in flight before either finishes.
    let in_flight = Barrier::new(2);
    thread::scope(|s| {
        for _ in 0..2 {
            let breaker = h.breaker.clone();
            let in_flight = &in_flight;
            s.spawn(move || {
                let result = breaker.call(&search_request(), |_: &Request| -> Outcome {
                    in_flight.wait();
                    Ok(Response::new(200))
                });
                assert_eq!(result.unwrap().status, 200);
            });
        }
    });

    let outages = h.service().outages_in_range(0, u64::MAX).unwrap();
    assert_eq!(outages.len(), 1);
    assert_eq!(outages[0].end_time(), Some(START + 61));
    assert_eq!(h.state(), State::Normal);

    let events = h.recorder.take();
    assert_eq!(events.iter().filter(|e| *e == "end search").count(), 2);
    assert_eq!(
        events.iter().filter(|e| *e == "success search 200").count(),
        2
    );
}

#[cfg(feature = "async")]
mod async_tests {
    use super::*;

    #[tokio::test]
    async fn async_calls_follow_the_same_states() {
        let h = Harness::new(search(), BreakerConfig::default());
        let request = search_request();

        let result = h
            .breaker
            .call_async(&request, None, || async {
                Ok::<_, TransportError<TestError>>(Response::new(500))
            })
            .await;
        assert_eq!(result.unwrap().status, 500);

        let result = h
            .breaker
            .call_async(&request, None, || async {
                Ok::<_, TransportError<TestError>>(Response::new(200))
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Outage(_))));
    }

    #[test]
    fn async_probe_ends_the_outage() {
        let h = Harness::new(search(), BreakerConfig::default());
        let request = search_request();
        h.send(500).unwrap();
        h.clock.advance(61);

        let result = tokio_test::block_on(h.breaker.call_async(&request, None, || async {
            Ok::<_, TransportError<TestError>>(Response::new(204))
        }));
        assert_eq!(result.unwrap().status, 204);
        assert_eq!(h.state(), State::Normal);
    }
}
