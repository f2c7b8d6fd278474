use breakers_rs::{
    matcher, BreakerError, CircuitBreaker, ManualClock, MemoryStore, OutageReport, Request,
    Response, ServiceConfig, ServiceRegistry, TransportError,
};
use std::io;
use std::sync::Arc;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("breakers_rs=info")
        .init();

    // A manual clock lets the demo skip through the retry cooldown.
    let clock = Arc::new(ManualClock::new(1_700_000_040));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));

    let registry = ServiceRegistry::builder(store)
        .key_prefix("demo:")
        .clock(clock.clone())
        .service(
            ServiceConfig::builder()
                .name("search")
                .matcher_arc(matcher::host("search.example.com"))
                .error_threshold(50)
                .min_errors(3)
                .seconds_before_retry(30)
                .build()
                .expect("valid service"),
        )
        .build()
        .expect("valid registry");
    let breaker = CircuitBreaker::builder(Arc::new(registry)).build();
    let request = Request::get("https://search.example.com/q?term=rust").expect("valid url");

    // The service answers 503 for the first three calls, then recovers.
    let mut calls = 0;
    for attempt in 1..=12 {
        if attempt == 8 {
            println!("\n-- waiting out the retry cooldown --");
            clock.advance(31);
        }

        let result = breaker.call(&request, |_: &Request| {
            calls += 1;
            let status = if calls <= 3 { 503 } else { 200 };
            Ok::<_, TransportError<io::Error>>(Response::new(status))
        });

        match result {
            Ok(response) => println!("Attempt {}: status {}", attempt, response.status),
            Err(BreakerError::Outage(outage)) => println!("Attempt {}: {}", attempt, outage),
            Err(err) => println!("Attempt {}: failed: {}", attempt, err),
        }
        clock.advance(1);
    }

    let service = breaker
        .registry()
        .service_named("search")
        .expect("registered service");
    let report = OutageReport::collect(service, 0, u64::MAX).expect("store is in memory");
    println!(
        "\nOutage history: {}",
        serde_json::to_string_pretty(&report).expect("report serializes")
    );
}
