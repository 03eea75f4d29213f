//! Session behaviour against an in-memory device.
//!
//! These tests cover:
//! - Queue ordering with high-priority calls
//! - Retry budget and the synthetic 408
//! - The Digest challenge cycle and its nonce-count
//! - Response reassembly across reads and framings
//! - Session-wide cancellation (trust failure, realm change, caller codes)
//! - Kerberos selection

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio::time::Instant;

use amtwsman::auth::StaticTicketProvider;
use amtwsman::connection::SessionTuning;
use amtwsman::session::{status, AjaxRequest, AmtConnection, Priority, ReplyKind, SocketState};

use common::*;

fn nonce_count(authorization: &str) -> String {
    authorization
        .split(',')
        .find_map(|part| part.trim().strip_prefix("nc="))
        .expect("authorization carries nc")
        .to_string()
}

// ============================================================================
// Queue Ordering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_high_priority_call_jumps_queue() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let conn = connect(connector.clone());
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    for (body, priority) in [
        ("X", Priority::Normal),
        ("A", Priority::Normal),
        ("B", Priority::High),
        ("C", Priority::Normal),
    ] {
        let done_tx = done_tx.clone();
        conn.perform_ajax(
            AjaxRequest::new(body).with_priority(priority),
            Box::new(move |reply| {
                let _ = done_tx.send((body, reply.status));
            }),
        );
    }

    let mut endpoint = next_endpoint(&mut endpoints).await;
    let mut sent = Vec::new();
    for _ in 0..4 {
        let request = read_request(&mut endpoint).await;
        sent.push(body_text(&request));
        endpoint.on_data(ok(""));
    }
    assert_eq!(sent, vec!["X", "B", "A", "C"]);

    let mut completed = Vec::new();
    for _ in 0..4 {
        completed.push(done_rx.recv().await.unwrap());
    }
    assert_eq!(completed, vec![("X", 200), ("B", 200), ("A", 200), ("C", 200)]);
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_one_request_in_flight() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let conn = connect(connector);
    let first = submit(&conn, AjaxRequest::new("first"));
    let second = submit(&conn, AjaxRequest::new("second"));

    let mut endpoint = next_endpoint(&mut endpoints).await;
    let request = read_request(&mut endpoint).await;
    assert_eq!(body_text(&request), "first");
    tokio::task::yield_now().await;
    assert!(endpoint.try_next_write().is_none());

    endpoint.on_data(ok("one"));
    let request = read_request(&mut endpoint).await;
    assert_eq!(body_text(&request), "second");
    endpoint.on_data(ok("two"));

    assert_eq!(first.await.unwrap().body.unwrap(), "one");
    assert_eq!(second.await.unwrap().body.unwrap(), "two");
}

// ============================================================================
// Request Shape
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_request_headers() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let conn = connect(connector);
    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(AjaxRequest::new("<Envelope/>")).await }
    });

    let mut endpoint = next_endpoint(&mut endpoints).await;
    let request = read_request(&mut endpoint).await;
    assert_eq!(request.method(), Some("POST"));
    assert_eq!(request.target(), Some("/wsman"));
    assert_eq!(request.headers.get("host"), Some("amt.test:16992"));
    assert_eq!(
        request.headers.get("content-type"),
        Some("application/soap+xml; charset=utf-8")
    );
    assert_eq!(request.headers.get("content-length"), Some("11"));
    assert!(request.headers.get("authorization").is_none());

    endpoint.on_data(ok("<Envelope/>"));
    let reply = pending.await.unwrap().unwrap();
    assert!(reply.is_ok());
    assert_eq!(conn.info().amt_version.as_deref(), Some("11.8.50.3425"));
    assert_eq!(conn.info().socket_state, SocketState::Ready);
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_timeout_after_five_attempts() {
    let connector = MockConnector::refusing();
    let conn = connect(connector.clone());
    let started = Instant::now();

    let reply = conn
        .call(AjaxRequest::new("<Envelope/>").with_tag(7))
        .await
        .expect("reply delivered");

    assert_eq!(reply.kind, ReplyKind::Error);
    assert_eq!(reply.status, status::TIMEOUT);
    assert_eq!(reply.tag.0, 7);
    assert!(reply.body.is_none());
    assert_eq!(connector.attempts(), 5);

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2500), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_follows_tuning() {
    let connector = MockConnector::refusing();
    let config = device_config().with_tuning(
        SessionTuning::default()
            .with_max_attempts(2)
            .with_retry_delay(Duration::from_millis(100)),
    );
    let conn = connect_with(config, connector.clone());

    let reply = conn.call(AjaxRequest::new("x")).await.unwrap();
    assert_eq!(reply.status, status::TIMEOUT);
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_resend_after_link_loss() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let conn = connect(connector.clone());
    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(AjaxRequest::new("<Envelope/>")).await }
    });

    let mut endpoint = next_endpoint(&mut endpoints).await;
    read_request(&mut endpoint).await;
    drop(endpoint);

    let mut endpoint = next_endpoint(&mut endpoints).await;
    let request = read_request(&mut endpoint).await;
    assert_eq!(body_text(&request), "<Envelope/>");
    endpoint.on_data(ok("done"));

    let reply = pending.await.unwrap().unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body.unwrap(), "done");
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_idle_link_is_closed() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let conn = connect(connector);
    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(AjaxRequest::new("x")).await }
    });

    let mut endpoint = next_endpoint(&mut endpoints).await;
    read_request(&mut endpoint).await;
    endpoint.on_data(ok(""));
    pending.await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(endpoint.next_write().await.is_none());
    assert_eq!(conn.info().socket_state, SocketState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_completes_close_delimited_response() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let conn = connect(connector.clone());
    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(AjaxRequest::new("x")).await }
    });

    let mut endpoint = next_endpoint(&mut endpoints).await;
    read_request(&mut endpoint).await;
    let started = Instant::now();
    endpoint.on_data(&b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 4\r\n\r\ndone"[..]);

    let reply = pending.await.unwrap().unwrap();
    assert!(started.elapsed() >= Duration::from_secs(6));
    assert_eq!(reply.kind, ReplyKind::Success);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body.unwrap(), "done");

    assert!(endpoint.next_write().await.is_none());
    assert_eq!(connector.attempts(), 1);
    assert_eq!(conn.info().socket_state, SocketState::Idle);
}

// ============================================================================
// Digest Authentication
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_digest_challenge_cycle_ends_in_401() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let conn = connect(connector.clone());
    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(AjaxRequest::new("<Envelope/>")).await }
    });

    let mut endpoint = next_endpoint(&mut endpoints).await;
    let first = read_request(&mut endpoint).await;
    assert!(first.headers.get("authorization").is_none());
    endpoint.on_data(challenge("Digest:4F2B0000000000000000000000000000", "nonce-1"));

    let mut counts = Vec::new();
    for round in 0..3 {
        let mut endpoint = next_endpoint(&mut endpoints).await;
        let request = read_request(&mut endpoint).await;
        let authorization = request
            .headers
            .get("authorization")
            .expect("authorized resend")
            .to_string();
        assert!(authorization.starts_with("Digest username=\"admin\""));
        assert!(authorization.contains("uri=\"/wsman\""));
        counts.push(nonce_count(&authorization));
        endpoint.on_data(challenge(
            "Digest:4F2B0000000000000000000000000000",
            &format!("nonce-{}", round + 2),
        ));
    }
    assert_eq!(counts, vec!["1", "2", "3"]);

    let reply = pending.await.unwrap().unwrap();
    assert_eq!(reply.kind, ReplyKind::Success);
    assert_eq!(reply.status, status::UNAUTHORIZED);
    assert_eq!(connector.attempts(), 4);
    assert_eq!(
        conn.info().digest_realm.as_deref(),
        Some("Digest:4F2B0000000000000000000000000000")
    );
}

#[tokio::test(start_paused = true)]
async fn test_digest_reused_on_keepalive() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let conn = connect(connector.clone());
    let call = |body: &'static str| {
        let conn = conn.clone();
        tokio::spawn(async move { conn.call(AjaxRequest::new(body)).await })
    };

    let first = call("one");
    let mut endpoint = next_endpoint(&mut endpoints).await;
    read_request(&mut endpoint).await;
    endpoint.on_data(challenge("Digest:AA", "n1"));

    let mut endpoint = next_endpoint(&mut endpoints).await;
    let request = read_request(&mut endpoint).await;
    assert_eq!(nonce_count(request.headers.get("authorization").unwrap()), "1");
    endpoint.on_data(ok("first"));
    assert!(first.await.unwrap().unwrap().is_ok());

    let second = call("two");
    let request = read_request(&mut endpoint).await;
    assert_eq!(nonce_count(request.headers.get("authorization").unwrap()), "2");
    endpoint.on_data(ok("second"));
    assert_eq!(second.await.unwrap().unwrap().body.unwrap(), "second");
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_realm_change_cancels_session() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let config = device_config().with_expected_realm("Digest:AAAA");
    let conn = connect_with(config, connector);
    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(AjaxRequest::new("x")).await }
    });

    let mut endpoint = next_endpoint(&mut endpoints).await;
    read_request(&mut endpoint).await;
    endpoint.on_data(challenge("Digest:BBBB", "n1"));

    let reply = pending.await.unwrap().unwrap();
    assert_eq!(reply.kind, ReplyKind::Error);
    assert_eq!(reply.status, status::REALM_CHANGED);

    let later = conn.call(AjaxRequest::new("y")).await.unwrap();
    assert_eq!(later.status, status::REALM_CHANGED);
    assert_eq!(conn.info().fail_all, Some(status::REALM_CHANGED));
}

// ============================================================================
// Framing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_split_response_reassembled() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let conn = connect(connector);
    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(AjaxRequest::new("x")).await }
    });

    let mut endpoint = next_endpoint(&mut endpoints).await;
    read_request(&mut endpoint).await;
    let body = "<a:Envelope><a:Body>split across reads</a:Body></a:Envelope>";
    for piece in ok(body).chunks(7) {
        endpoint.on_data(piece.to_vec());
        tokio::task::yield_now().await;
    }

    let reply = pending.await.unwrap().unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body.unwrap(), body);
}

#[tokio::test(start_paused = true)]
async fn test_chunked_response_decoded() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let conn = connect(connector);
    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(AjaxRequest::new("x")).await }
    });

    let mut endpoint = next_endpoint(&mut endpoints).await;
    read_request(&mut endpoint).await;
    endpoint.on_data(
        &b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n"[..],
    );

    let reply = pending.await.unwrap().unwrap();
    assert_eq!(reply.body.unwrap(), "hello world");
}

#[tokio::test(start_paused = true)]
async fn test_close_delimited_response() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let conn = connect(connector);
    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(AjaxRequest::new("x")).await }
    });

    let mut endpoint = next_endpoint(&mut endpoints).await;
    read_request(&mut endpoint).await;
    endpoint.on_data(&b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nuntil close"[..]);
    drop(endpoint);

    let reply = pending.await.unwrap().unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body.unwrap(), "until close");
}

#[tokio::test(start_paused = true)]
async fn test_informational_response_skipped() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let conn = connect(connector);
    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(AjaxRequest::new("x")).await }
    });

    let mut endpoint = next_endpoint(&mut endpoints).await;
    read_request(&mut endpoint).await;
    endpoint.on_data(&b"HTTP/1.1 100 Continue\r\n\r\n"[..]);
    tokio::task::yield_now().await;
    endpoint.on_data(ok("final"));

    let reply = pending.await.unwrap().unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body.unwrap(), "final");
}

#[tokio::test(start_paused = true)]
async fn test_framing_error_triggers_retry() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let conn = connect(connector.clone());
    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(AjaxRequest::new("x")).await }
    });

    let mut endpoint = next_endpoint(&mut endpoints).await;
    read_request(&mut endpoint).await;
    endpoint.on_data(&b"HTTP/1.1 200 OK\r\nContent-Length: nope\r\n\r\n"[..]);

    let mut endpoint = next_endpoint(&mut endpoints).await;
    read_request(&mut endpoint).await;
    endpoint.on_data(ok("recovered"));

    let reply = pending.await.unwrap().unwrap();
    assert_eq!(reply.body.unwrap(), "recovered");
    assert_eq!(connector.attempts(), 2);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_trust_failure_cancels_session() {
    let (connector, _endpoints) =
        MockConnector::scripted(vec![ConnectStep::RejectCertificate], ConnectStep::Accept);
    let conn = connect(connector.clone());

    let reply = conn.call(AjaxRequest::new("x")).await.unwrap();
    assert_eq!(reply.kind, ReplyKind::Error);
    assert_eq!(reply.status, status::TRUST_FAILURE);

    let later = conn.call(AjaxRequest::new("y")).await.unwrap();
    assert_eq!(later.status, status::TRUST_FAILURE);
    assert_eq!(connector.attempts(), 1);
    assert_eq!(conn.info().fail_all, Some(status::TRUST_FAILURE));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_fails_active_and_queued_calls() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let conn = connect(connector);
    let first = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(AjaxRequest::new("first")).await }
    });
    let second = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(AjaxRequest::new("second")).await }
    });

    let mut endpoint = next_endpoint(&mut endpoints).await;
    read_request(&mut endpoint).await;
    tokio::task::yield_now().await;
    conn.cancel_all_queries(503);

    for handle in [first, second] {
        let reply = handle.await.unwrap().unwrap();
        assert_eq!(reply.kind, ReplyKind::Error);
        assert_eq!(reply.status, 503);
    }
    assert!(endpoint.next_write().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_silent_cancel_drops_callbacks() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let conn = connect(connector);
    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(AjaxRequest::new("x")).await }
    });

    let mut endpoint = next_endpoint(&mut endpoints).await;
    read_request(&mut endpoint).await;
    conn.cancel_all_queries(status::SILENT_CANCEL);

    assert!(pending.await.unwrap().is_none());
    assert!(conn.call(AjaxRequest::new("later")).await.is_none());
}

// ============================================================================
// Kerberos
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_kerberos_without_provider_fails_immediately() {
    let connector = MockConnector::refusing();
    let config = device_config().with_credentials("*", "");
    let conn = connect_with(config, connector.clone());

    let reply = conn.call(AjaxRequest::new("x")).await.unwrap();
    assert_eq!(reply.kind, ReplyKind::Error);
    assert_eq!(reply.status, status::UNAUTHORIZED);
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_kerberos_sends_negotiate_header() {
    let (connector, mut endpoints) = MockConnector::accepting();
    let config = device_config().with_credentials("*", "");
    let conn = AmtConnection::create(
        config,
        connector,
        Some(Arc::new(StaticTicketProvider::new("YIIGhgYJKoZIhvcSAQICAQBu"))),
    )
    .unwrap();
    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(AjaxRequest::new("x")).await }
    });

    let mut endpoint = next_endpoint(&mut endpoints).await;
    let request = read_request(&mut endpoint).await;
    assert_eq!(
        request.headers.get("authorization"),
        Some("Negotiate YIIGhgYJKoZIhvcSAQICAQBu")
    );
    endpoint.on_data(ok(""));
    assert!(pending.await.unwrap().unwrap().is_ok());
}

// ============================================================================
// Construction
// ============================================================================

#[tokio::test]
async fn test_invalid_config_rejected() {
    let connector = MockConnector::refusing();
    let err = AmtConnection::create(device_config().with_port(0), connector, None).unwrap_err();
    assert!(err.is_config_error());
}
