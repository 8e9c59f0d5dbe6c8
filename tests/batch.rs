//! Batch orchestrator: ordering, concurrency cap, progress, isolation and cancellation.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::*;
use contribnote::batch::{BatchOptions, BatchOrchestrator, ProgressFn, RequestDescriptor, RequestKey};
use contribnote::error::ErrorKind;
use contribnote::worker::route_results;

fn descriptor(portcode: &str, ticker: &str) -> RequestDescriptor {
    RequestDescriptor {
        key: RequestKey::security(portcode, ticker),
        prompt: format!("{portcode}:{ticker}"),
        security_name: None,
    }
}

/// Echoes the prompt back as cited commentary, after a per-prompt delay.
fn echo(delays: &'static [(&'static str, u64)]) -> Arc<StubTransport> {
    StubTransport::with_handler(move |req| {
        let prompt = prompt_of(req);
        let delay = delays
            .iter()
            .find(|(p, _)| *p == prompt)
            .map(|(_, ms)| Duration::from_millis(*ms))
            .unwrap_or_default();
        let url = format!("https://news.example/{prompt}");
        json_reply(completed(
            &format!("Commentary for {prompt} [1]({url})"),
            &[url.as_str()],
        ))
        .after(delay)
    })
}

fn orchestrator(transport: Arc<StubTransport>) -> BatchOrchestrator<Arc<StubTransport>> {
    BatchOrchestrator::new(Arc::new(executor(transport)))
}

fn recorder() -> (ProgressFn, Arc<Mutex<Vec<(String, usize, usize)>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback: ProgressFn = Arc::new(move |item: &str, done: usize, total: usize| {
        sink.lock().unwrap().push((item.to_string(), done, total));
    });
    (callback, events)
}

// ---------------------------------------------------------------------------
// Ordering and routing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn results_keep_submission_order() {
    let transport = echo(&[("P:A", 300), ("P:B", 10), ("P:C", 100)]);
    let requests = [descriptor("P", "A"), descriptor("P", "B"), descriptor("P", "C")];

    let results = orchestrator(transport)
        .run(&requests, &BatchOptions::default(), None, &CancellationToken::new())
        .await
        .unwrap();

    let texts: Vec<_> = results.iter().map(|r| r.text()).collect();
    assert_eq!(
        texts,
        [
            "Commentary for P:A [1]",
            "Commentary for P:B [1]",
            "Commentary for P:C [1]"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn same_ticker_in_two_portfolios() {
    let transport = echo(&[("XYZ:AAPL", 50)]);
    let requests = [descriptor("XYZ", "AAPL"), descriptor("ONE", "AAPL")];

    let results = orchestrator(transport.clone())
        .run(&requests, &BatchOptions::default(), None, &CancellationToken::new())
        .await
        .unwrap();
    let (routed, errors) = route_results(&requests, &results);

    assert!(errors.is_empty());
    assert_eq!(routed["XYZ"]["AAPL"].text(), "Commentary for XYZ:AAPL [1]");
    assert_eq!(routed["ONE"]["AAPL"].text(), "Commentary for ONE:AAPL [1]");
    assert_eq!(
        routed["ONE"]["AAPL"].citations()[0].url,
        "https://news.example/ONE:AAPL"
    );
    assert_eq!(transport.submits(), 2);
}

#[tokio::test(start_paused = true)]
async fn empty_batch_is_empty() {
    let transport = echo(&[]);
    let results = orchestrator(transport.clone())
        .run(&[], &BatchOptions::default(), None, &CancellationToken::new())
        .await
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(transport.submits(), 0);
}

// ---------------------------------------------------------------------------
// Failure isolation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn one_failure_does_not_sink_the_batch() {
    let transport = StubTransport::with_handler(|req| {
        let prompt = prompt_of(req);
        if prompt == "P:BAD" {
            status(400, r#"{"error":{"message":"invalid model"}}"#)
        } else {
            json_reply(completed(&format!("{prompt} ok [1](https://a.com)"), &["https://a.com"]))
        }
    });
    let requests = [descriptor("P", "GOOD"), descriptor("P", "BAD"), descriptor("P", "ALSO")];

    let results = orchestrator(transport)
        .run(&requests, &BatchOptions::default(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(results[0].is_success());
    assert!(!results[1].is_success());
    assert_eq!(results[1].error_kind(), Some(ErrorKind::Http));
    assert!(results[1].error_message().contains("HTTP 400"));
    assert!(results[2].is_success());
}

#[tokio::test(start_paused = true)]
async fn missing_citations_fail_only_when_required() {
    let transport = StubTransport::with_handler(|_| json_reply(completed("No sources here.", &[])));
    let requests = [descriptor("P", "A")];

    let strict = orchestrator(transport.clone())
        .run(&requests, &BatchOptions::default(), None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(strict[0].error_kind(), Some(ErrorKind::MissingCitations));
    assert_eq!(
        strict[0].error_message(),
        "No citations found in response (citations are required)"
    );

    let lenient = BatchOptions {
        require_citations: false,
        ..BatchOptions::default()
    };
    let relaxed = orchestrator(transport)
        .run(&requests, &lenient, None, &CancellationToken::new())
        .await
        .unwrap();
    assert!(relaxed[0].is_success());
    assert_eq!(relaxed[0].text(), "No sources here.");
}

// ---------------------------------------------------------------------------
// Concurrency and progress
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn concurrency_cap_is_respected() {
    let transport = StubTransport::with_handler(|_| {
        json_reply(completed("x [1](https://a.com)", &["https://a.com"]))
            .after(Duration::from_millis(100))
    });
    let requests: Vec<_> = (0..10).map(|i| descriptor("P", &format!("T{i}"))).collect();
    let options = BatchOptions {
        concurrency_limit: 3,
        ..BatchOptions::default()
    };

    let results = orchestrator(transport.clone())
        .run(&requests, &options, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(results.len(), 10);
    assert_eq!(transport.max_in_flight(), 3);
}

#[tokio::test(start_paused = true)]
async fn progress_counts_up_to_total() {
    let transport = echo(&[("P:T0", 40), ("P:T1", 10), ("P:T2", 30), ("P:T3", 20)]);
    let requests: Vec<_> = (0..4).map(|i| descriptor("P", &format!("T{i}"))).collect();
    let (callback, events) = recorder();

    orchestrator(transport)
        .run(
            &requests,
            &BatchOptions::default(),
            Some(callback),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let events = events.lock().unwrap();
    let counts: Vec<_> = events.iter().map(|(_, done, total)| (*done, *total)).collect();
    assert_eq!(counts, [(1, 4), (2, 4), (3, 4), (4, 4)]);
    // Completion order, not submission order.
    let items: Vec<_> = events.iter().map(|(item, _, _)| item.as_str()).collect();
    assert_eq!(items, ["T1", "T3", "T2", "T0"]);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancelled_before_start() {
    let transport = echo(&[]);
    let token = CancellationToken::new();
    token.cancel();

    let err = orchestrator(transport.clone())
        .run(&[descriptor("P", "A")], &BatchOptions::default(), None, &token)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(transport.submits(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_batch_stops_new_work() {
    let transport = StubTransport::with_handler(|_| {
        json_reply(completed("slow [1](https://a.com)", &["https://a.com"]))
            .after(Duration::from_secs(10))
    });
    let requests: Vec<_> = (0..6).map(|i| descriptor("P", &format!("T{i}"))).collect();
    let options = BatchOptions {
        concurrency_limit: 2,
        ..BatchOptions::default()
    };
    let (callback, events) = recorder();
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(15)).await;
        canceller.cancel();
    });

    let err = orchestrator(transport.clone())
        .run(&requests, &options, Some(callback), &token)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    // First pair finished at 10s, second pair was in flight at 15s.
    assert_eq!(events.lock().unwrap().len(), 2);
    assert_eq!(transport.submits(), 4);

    // Nothing new starts after cancellation.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.submits(), 4);
}
