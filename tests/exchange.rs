//! Exchange Engine Integration Tests
//!
//! Drives `Link` over the mock transport and a loopback TCP "controller" to
//! check the exchange contract end to end:
//! - bounded wait (returns within timeout plus a small slack)
//! - noise tolerance (debug prints and garbage around replies)
//! - serialization of concurrent callers at the transport boundary
//!
//! Run with: `cargo test --test exchange`

use mover_link::config::{Config, TransportKind};
use mover_link::transport::mock::{MockReply, MockTransport};
use mover_link::{Command, Error, Link};
use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Scheduling slack allowed on top of a timeout
const SLACK: Duration = Duration::from_millis(250);

fn mock_link(mock: &MockTransport, timeout_ms: u64) -> Link {
    Link::new(Box::new(mock.clone()), Duration::from_millis(timeout_ms))
}

// ============================================================================
// Timing
// ============================================================================

#[test]
fn test_silent_controller_times_out_within_bound() {
    let mock = MockTransport::new();
    let link = mock_link(&mock, 300);

    let start = Instant::now();
    let response = link.exchange_default(&Command::get_status()).unwrap();
    let elapsed = start.elapsed();

    assert!(response.is_none());
    assert!(elapsed >= Duration::from_millis(300), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(300) + SLACK, "overran: {elapsed:?}");
}

#[test]
fn test_garbage_only_never_returns_early() {
    // A chatty controller that only ever prints debug text
    let mock = MockTransport::with_responder(|_| {
        Some(MockReply::now(
            &b"Emergency Stop\r\ndeserializeJson() failed: InvalidInput\r\n{oops}\r\n"[..],
        ))
    });
    for delay in [40u64, 90, 140, 190] {
        mock.inject_after(Duration::from_millis(delay), b"motor task tick\n");
    }
    let link = mock_link(&mock, 250);

    let start = Instant::now();
    let response = link.exchange_default(&Command::log_magnetometer()).unwrap();
    let elapsed = start.elapsed();

    assert!(response.is_none());
    assert!(elapsed >= Duration::from_millis(250));
    assert!(elapsed < Duration::from_millis(250) + SLACK);
}

#[test]
fn test_slow_reply_within_timeout_is_returned() {
    let mock = MockTransport::with_responder(|_| {
        Some(MockReply::after(
            Duration::from_millis(120),
            &b"{\"magX\":-3.25,\"magY\":7.5}\n"[..],
        ))
    });
    let link = mock_link(&mock, 500);

    let start = Instant::now();
    let response = link
        .exchange_default(&Command::log_magnetometer())
        .unwrap()
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(120));
    assert_eq!(response.get_f64("magX"), Some(-3.25));
}

// ============================================================================
// Decoding
// ============================================================================

#[test]
fn test_document_surrounded_by_noise_is_extracted_exactly() {
    let mock = MockTransport::with_responder(|_| {
        Some(MockReply::now(
            &b"\x1b[0m rst:0x1 {\"batteryVoltage\":12.5,\"numSats\":8} <- status\n"[..],
        ))
    });
    let link = mock_link(&mock, 200);

    let response = link.exchange_default(&Command::get_status()).unwrap().unwrap();
    assert_eq!(
        response.into_value(),
        json!({"batteryVoltage": 12.5, "numSats": 8})
    );
}

#[test]
fn test_reply_split_across_reads() {
    let mock = MockTransport::with_responder(|_| {
        Some(MockReply::now(&b"{\"coordinates\":[3,4.35,"[..]))
    });
    mock.inject_after(Duration::from_millis(30), b"52.01,4.36,52.02]}\n");
    let link = mock_link(&mock, 300);

    let response = link
        .exchange_default(&Command::fetch_coordinates())
        .unwrap()
        .unwrap();
    assert_eq!(response.get("coordinates").unwrap().as_array().unwrap().len(), 5);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_exchanges_never_interleave() {
    let mock = MockTransport::with_responder(|_| Some(MockReply::now(&b"{\"ok\":true}\n"[..])));
    mock.set_byte_by_byte(true);
    let link = Arc::new(mock_link(&mock, 500));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let link = Arc::clone(&link);
            thread::spawn(move || {
                for i in 0..10 {
                    let command = Command::set_motor_pwm(t * 10 + i, -(t * 10 + i)).unwrap();
                    let response = link.exchange(&command, Duration::from_millis(500)).unwrap();
                    assert!(response.is_some());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let wire = mock.get_written();
    let lines: Vec<&[u8]> = wire
        .split(|&b| b == b'\n')
        .filter(|l| !l.is_empty())
        .collect();
    assert_eq!(lines.len(), 40);

    let mut seen = Vec::new();
    for line in lines {
        let doc: Value = serde_json::from_slice(line).expect("interleaved bytes on the wire");
        assert_eq!(doc["intent"], json!(4));
        seen.push(doc["leftPWM"].as_i64().unwrap());
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..40).collect::<Vec<i64>>());
}

#[test]
fn test_exchange_after_close_fails() {
    let mock = MockTransport::new();
    let link = Arc::new(mock_link(&mock, 100));
    let other = Arc::clone(&link);

    other.close().unwrap();
    assert!(matches!(
        link.exchange_default(&Command::get_status()),
        Err(Error::Closed)
    ));
    assert!(!link.is_open());
}

// ============================================================================
// Network transport
// ============================================================================

/// Fake controller: answers every intent 6 line with a status document
fn spawn_fake_controller(listener: TcpListener, replies: usize) -> thread::JoinHandle<Vec<Value>> {
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        let mut received = Vec::new();

        for _ in 0..replies {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 {
                break;
            }
            let doc: Value = serde_json::from_str(&line).unwrap();
            received.push(doc);
            writer
                .write_all(b"boot noise\n{\"heading\":181.5,\"fix\":1}\n")
                .unwrap();
        }
        received
    })
}

#[test]
fn test_exchange_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let controller = spawn_fake_controller(listener, 2);

    let mut config = Config::default();
    config.link.kind = TransportKind::Tcp;
    config.link.host = "127.0.0.1".to_string();
    config.link.tcp_port = port;
    config.exchange.timeout_ms = 1000;

    let link = Link::open(&config).unwrap();
    assert_eq!(link.describe(), format!("tcp://127.0.0.1:{port}"));

    for _ in 0..2 {
        let response = link.exchange_default(&Command::get_status()).unwrap().unwrap();
        assert_eq!(response.get_f64("heading"), Some(181.5));
    }
    link.close().unwrap();

    let received = controller.join().unwrap();
    assert_eq!(received, vec![json!({"intent": 6}), json!({"intent": 6})]);
}

#[test]
fn test_connect_refused_is_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut config = Config::default();
    config.link.kind = TransportKind::Telnet;
    config.link.tcp_port = port;
    config.link.connect_timeout_ms = 500;

    assert!(matches!(
        Link::open(&config),
        Err(Error::Connection { .. })
    ));
}
