//! Pool behavior against a live (in-process) backend: caps, FIFO admission,
//! retry on connection loss, timeouts and shutdown.

mod support;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hashgate_client::HashClient;
use hashgate_common::HashgateError;

use support::{fake_digest, BackendOptions, MockBackend};

#[tokio::test]
async fn test_connection_and_request_caps_are_enforced() {
    let backend = MockBackend::spawn(BackendOptions {
        response_delay: Duration::from_millis(80),
        ..Default::default()
    })
    .await;
    let client = HashClient::new(backend.pool_config(2, 2)).unwrap();

    let mut tasks = Vec::new();
    for i in 0..10 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            client.hash(&format!("secret-{}", i)).await
        }));
    }
    for (i, task) in tasks.into_iter().enumerate() {
        let digest = task.await.unwrap().unwrap();
        assert_eq!(digest, fake_digest(&format!("secret-{}", i)));
    }

    assert!(backend.counters.max_open.load(Ordering::SeqCst) <= 2);
    assert!(backend.counters.max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(backend.counters.requests_seen.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_saturated_pool_admits_in_fifo_order() {
    let backend = MockBackend::spawn(BackendOptions {
        response_delay: Duration::from_millis(40),
        ..Default::default()
    })
    .await;
    let client = HashClient::new(backend.pool_config(1, 1)).unwrap();

    let completions = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = Vec::new();
    for i in 0..6usize {
        let client = client.clone();
        let completions = Arc::clone(&completions);
        tasks.push(tokio::spawn(async move {
            // stagger submissions so the queue order is deterministic
            tokio::time::sleep(Duration::from_millis(15 * i as u64)).await;
            client.hash(&format!("s{}", i)).await.unwrap();
            completions.lock().unwrap().push(i);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let order = completions.lock().unwrap().clone();
    assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_single_slot_serializes_two_hashes() {
    let backend = MockBackend::spawn(BackendOptions {
        response_delay: Duration::from_millis(50),
        ..Default::default()
    })
    .await;
    let client = HashClient::new(backend.pool_config(1, 1)).unwrap();

    let (a, b) = tokio::join!(client.hash("pw1"), client.hash("pw2"));
    assert_eq!(a.unwrap(), fake_digest("pw1"));
    assert_eq!(b.unwrap(), fake_digest("pw2"));

    assert_eq!(backend.counters.max_open.load(Ordering::SeqCst), 1);
    assert_eq!(backend.counters.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_inflight_requests_are_resubmitted_once_on_connection_loss() {
    // The first connection swallows three requests and drops; the second
    // behaves. Every in-flight request must be retried exactly once.
    let backend = MockBackend::spawn(BackendOptions {
        fail_first_connections: 1,
        fail_after_frames: 3,
        ..Default::default()
    })
    .await;
    let client = HashClient::new(backend.pool_config(1, 3)).unwrap();

    let (a, b, c) = tokio::join!(client.hash("a"), client.hash("b"), client.hash("c"));
    assert_eq!(a.unwrap(), fake_digest("a"));
    assert_eq!(b.unwrap(), fake_digest("b"));
    assert_eq!(c.unwrap(), fake_digest("c"));

    // three originals on the dead connection plus three re-submissions
    assert_eq!(backend.counters.requests_seen.load(Ordering::SeqCst), 6);
    assert_eq!(backend.counters.accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_second_connection_loss_is_terminal_not_a_hang() {
    let backend = MockBackend::spawn(BackendOptions {
        fail_first_connections: usize::MAX,
        fail_after_frames: 1,
        ..Default::default()
    })
    .await;
    let client = HashClient::new(backend.pool_config(1, 1)).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), client.hash("pw"))
        .await
        .expect("request must resolve, not hang");
    assert!(matches!(outcome, Err(HashgateError::Retryable(_))));
    // one original submission plus exactly one retry
    assert_eq!(backend.counters.requests_seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_undecodable_frame_discards_connection_and_retries() {
    // The first connection answers with a garbled frame; the pool must tear
    // it down and retry the in-flight request on a fresh connection.
    let backend = MockBackend::spawn(BackendOptions {
        garbage_first_connections: 1,
        ..Default::default()
    })
    .await;
    let client = HashClient::new(backend.pool_config(1, 1)).unwrap();

    let digest = client.hash("pw").await.unwrap();
    assert_eq!(digest, fake_digest("pw"));

    // one submission on the garbled connection plus one on its replacement
    assert_eq!(backend.counters.accepted.load(Ordering::SeqCst), 2);
    assert_eq!(backend.counters.requests_seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_timeout_resolves_and_clears_pending_state() {
    let backend = MockBackend::spawn(BackendOptions {
        unresponsive: true,
        ..Default::default()
    })
    .await;
    let client = HashClient::new(backend.pool_config(1, 4)).unwrap();

    let start = Instant::now();
    let err = client
        .hash_with_timeout("pw", Duration::from_millis(150))
        .await
        .unwrap_err();
    assert!(matches!(err, HashgateError::Timeout(150)));
    assert!(start.elapsed() < Duration::from_secs(1));

    // the cancelled request left no trace behind
    let stats = client.pool().stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.queued, 0);
}

#[tokio::test]
async fn test_shutdown_fails_queued_and_rejects_new_requests() {
    let backend = MockBackend::spawn(BackendOptions {
        response_delay: Duration::from_millis(300),
        ..Default::default()
    })
    .await;
    let client = HashClient::new(backend.pool_config(1, 1)).unwrap();

    let in_flight = {
        let client = client.clone();
        tokio::spawn(async move { client.hash("busy").await })
    };
    tokio::time::sleep(Duration::from_millis(80)).await;

    let queued = {
        let client = client.clone();
        tokio::spawn(async move { client.hash("waiting").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.shutdown();

    // the queued request fails with the shutdown error...
    assert!(matches!(
        queued.await.unwrap(),
        Err(HashgateError::Shutdown)
    ));
    // ...while the in-flight one is drained to completion
    assert_eq!(in_flight.await.unwrap().unwrap(), fake_digest("busy"));
    // and new submissions are refused synchronously
    assert!(matches!(
        client.hash("late").await,
        Err(HashgateError::Shutdown)
    ));
}

#[tokio::test]
async fn test_shutdown_resolves_in_flight_when_draining_connection_is_lost() {
    // The backend reads but never answers and closes its end once the
    // draining connection half-closes on shutdown. The in-flight request
    // cannot be retried (no connection will open again), so it must resolve
    // with the shutdown error rather than sit in the queue forever.
    let backend = MockBackend::spawn(BackendOptions {
        unresponsive: true,
        ..Default::default()
    })
    .await;
    let client = HashClient::new(backend.pool_config(1, 1)).unwrap();

    let in_flight = {
        let client = client.clone();
        tokio::spawn(async move { client.hash("pw").await })
    };
    tokio::time::sleep(Duration::from_millis(80)).await;

    client.shutdown();

    let outcome = tokio::time::timeout(Duration::from_secs(3), in_flight)
        .await
        .expect("in-flight request must resolve after shutdown")
        .unwrap();
    assert!(matches!(outcome, Err(HashgateError::Shutdown)));
}
