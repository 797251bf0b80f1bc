//! End-to-end expect engine tests over the in-memory transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use shellstream::transport::mem;
use shellstream::{
    Error, ExpectAction, ShellStream, Status, StreamConfig, StreamError, StreamEvent, UsageError,
};

fn started() -> (ShellStream, mem::MemPeer) {
    started_with(StreamConfig::default())
}

fn started_with(config: StreamConfig) -> (ShellStream, mem::MemPeer) {
    let (channel, peer) = mem::channel_pair(32);
    let stream = ShellStream::new(channel, config);
    stream.start().unwrap();
    (stream, peer)
}

/// Wait until the reader task has buffered something.
async fn drained(stream: &ShellStream) {
    while !stream.data_available() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn declaration_order_governs_independent_of_position() {
    let (stream, peer) = started();

    // Patterns registered before any data arrives, "error" declared first.
    let fired = Arc::new(Mutex::new(Vec::new()));
    let f0 = Arc::clone(&fired);
    let f1 = Arc::clone(&fired);
    let mut op = stream
        .begin_expect(vec![
            ExpectAction::literal("error", move |_| f0.lock().unwrap().push("error")),
            ExpectAction::literal("success", move |_| f1.lock().unwrap().push("success")),
        ])
        .unwrap();

    // "success" appears earlier in the stream, but both are present in the
    // same evaluation pass, so declaration order must pick "error".
    peer.inject(b"...success and no error...").await;

    let text = stream.end_expect(&mut op).await.unwrap().unwrap();
    assert_eq!(text, "...success and no error");
    assert_eq!(*fired.lock().unwrap(), vec!["error"]);
    assert_eq!(stream.read().unwrap(), "...");
}

#[tokio::test]
async fn match_split_across_appends() {
    let (stream, peer) = started();

    let mut op = stream
        .begin_expect(vec![ExpectAction::literal("foo", |_| {})])
        .unwrap();

    peer.inject(b"fo").await;
    peer.inject(b"o").await;

    assert_eq!(stream.end_expect(&mut op).await.unwrap().unwrap(), "foo");
}

#[tokio::test]
async fn terminator_split_across_appends() {
    let config = StreamConfig {
        line_terminator: "\r\n".to_string(),
        ..StreamConfig::default()
    };
    let (stream, peer) = started_with(config);

    let stream = Arc::new(stream);
    let reader = {
        let stream = Arc::clone(&stream);
        tokio::spawn(async move { stream.read_line().await })
    };

    peer.inject(b"split line\r").await;
    peer.inject(b"\n").await;

    assert_eq!(reader.await.unwrap().unwrap(), "split line");
}

#[tokio::test(start_paused = true)]
async fn timeout_returns_none_on_schedule() {
    let (stream, _peer) = started();

    let before = tokio::time::Instant::now();
    let matched = stream
        .expect_timeout(
            vec![ExpectAction::literal("never", |_| {})],
            Duration::from_millis(500),
        )
        .await
        .unwrap();

    assert!(matched.is_none());
    assert!(before.elapsed() >= Duration::from_millis(500));
    assert!(before.elapsed() < Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn timeout_holds_while_non_matching_data_keeps_arriving() {
    let (stream, peer) = started();

    let injector = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if !peer.inject(b"noise ").await {
                break;
            }
        }
    });

    let before = tokio::time::Instant::now();
    let matched = stream
        .expect_timeout(
            vec![ExpectAction::literal("never", |_| {})],
            Duration::from_millis(500),
        )
        .await
        .unwrap();

    assert!(matched.is_none());
    assert!(before.elapsed() >= Duration::from_millis(500));
    assert!(before.elapsed() < Duration::from_millis(700));
    injector.abort();
}

#[tokio::test]
async fn concurrent_waits_with_disjoint_patterns_both_complete() {
    let (stream, peer) = started();

    let mut alpha = stream
        .begin_expect(vec![ExpectAction::literal("alpha", |_| {})])
        .unwrap();
    let mut beta = stream
        .begin_expect(vec![ExpectAction::literal("beta", |_| {})])
        .unwrap();

    peer.inject(b"xx beta yy").await;
    peer.inject(b" then alpha").await;

    // "beta" arrived first and was consumed by the beta wait; the alpha
    // wait only saw the remainder plus the later-arrived content.
    assert_eq!(
        stream.end_expect(&mut beta).await.unwrap().unwrap(),
        "xx beta"
    );
    assert_eq!(
        stream.end_expect(&mut alpha).await.unwrap().unwrap(),
        " yy then alpha"
    );
}

#[tokio::test]
async fn concurrent_waits_complete_in_reversed_arrival_order() {
    let (stream, peer) = started();

    let mut alpha = stream
        .begin_expect(vec![ExpectAction::literal("alpha", |_| {})])
        .unwrap();
    let mut beta = stream
        .begin_expect(vec![ExpectAction::literal("beta", |_| {})])
        .unwrap();

    peer.inject(b"alpha first").await;
    peer.inject(b" beta second").await;

    assert_eq!(
        stream.end_expect(&mut alpha).await.unwrap().unwrap(),
        "alpha"
    );
    assert_eq!(
        stream.end_expect(&mut beta).await.unwrap().unwrap(),
        " first beta"
    );
}

#[tokio::test]
async fn concurrent_blocking_callers_both_complete() {
    let (stream, peer) = started();
    let stream = Arc::new(stream);

    let alpha = {
        let stream = Arc::clone(&stream);
        tokio::spawn(async move { stream.expect_text("alpha", Duration::from_secs(5)).await })
    };
    // Let the alpha task register before spawning the beta task, and both
    // before any data arrives.
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    let beta = {
        let stream = Arc::clone(&stream);
        tokio::spawn(async move { stream.expect_text("beta", Duration::from_secs(5)).await })
    };
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    peer.inject(b"xx beta yy").await;
    peer.inject(b" then alpha").await;

    let alpha_text = alpha.await.unwrap().unwrap().unwrap();
    let beta_text = beta.await.unwrap().unwrap().unwrap();

    assert!(alpha_text.ends_with("alpha"));
    assert!(beta_text.ends_with("beta"));
    assert!(!beta_text.contains("alpha"));
}

#[tokio::test]
async fn fifo_waits_cannot_double_consume() {
    let (stream, peer) = started();

    let mut first = stream
        .begin_expect(vec![ExpectAction::literal("$ ", |_| {})])
        .unwrap();
    let mut second = stream
        .begin_expect(vec![ExpectAction::literal("$ ", |_| {})])
        .unwrap();

    peer.inject(b"one$ ").await;
    assert_eq!(stream.end_expect(&mut first).await.unwrap().unwrap(), "one$ ");

    // The second wait saw the consumed buffer and is still pending; only
    // later-arrived content can complete it.
    peer.inject(b"two$ ").await;
    assert_eq!(
        stream.end_expect(&mut second).await.unwrap().unwrap(),
        "two$ "
    );
}

#[tokio::test]
async fn begin_end_matches_synchronous_expect() {
    let (stream, peer) = started();

    peer.inject(b"ready> ").await;
    drained(&stream).await;
    let sync_text = stream
        .expect_text("ready> ", Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();

    peer.inject(b"ready> ").await;
    drained(&stream).await;
    let mut op = stream
        .begin_expect(vec![ExpectAction::literal("ready> ", |_| {})])
        .unwrap();
    let async_text = stream.end_expect(&mut op).await.unwrap().unwrap();

    assert_eq!(sync_text, async_text);
}

#[tokio::test]
async fn end_expect_twice_is_a_usage_error() {
    let (stream, peer) = started();

    let mut op = stream
        .begin_expect(vec![ExpectAction::literal("x", |_| {})])
        .unwrap();
    peer.inject(b"x").await;

    stream.end_expect(&mut op).await.unwrap();
    assert!(matches!(
        stream.end_expect(&mut op).await,
        Err(Error::Usage(UsageError::OperationFinalized))
    ));
}

#[tokio::test]
async fn foreign_token_is_rejected() {
    let (stream_a, peer_a) = started();
    let (stream_b, _peer_b) = started();

    let mut op = stream_a
        .begin_expect(vec![ExpectAction::literal("x", |_| {})])
        .unwrap();
    peer_a.inject(b"x").await;

    assert!(matches!(
        stream_b.end_expect(&mut op).await,
        Err(Error::Usage(UsageError::ForeignOperation))
    ));
    // The rightful owner can still finalize it.
    assert_eq!(stream_a.end_expect(&mut op).await.unwrap().unwrap(), "x");
}

#[tokio::test]
async fn write_then_read_line_round_trips() {
    let stream = ShellStream::new(mem::loopback(16), StreamConfig::default());
    stream.start().unwrap();

    stream.write("hello\n").await.unwrap();
    assert_eq!(stream.read_line().await.unwrap(), "hello");
}

#[tokio::test]
async fn write_line_with_empty_line_writes_only_terminator() {
    let (stream, mut peer) = started();

    stream.write_line("").await.unwrap();
    assert_eq!(&peer.next_write().await.unwrap()[..], b"\n");

    // An empty plain write is a no-op: nothing reaches the transport.
    stream.write("").await.unwrap();
    stream.write_line("after").await.unwrap();
    assert_eq!(&peer.next_write().await.unwrap()[..], b"after\n");
}

#[tokio::test]
async fn buffer_overflow_fails_the_pending_wait() {
    let config = StreamConfig {
        max_buffer: 64,
        ..StreamConfig::default()
    };
    let (stream, peer) = started_with(config);
    let mut events = stream.events();

    let mut op = stream
        .begin_expect(vec![ExpectAction::literal("XYZ", |_| {})])
        .unwrap();
    peer.inject(&[b'j'; 100]).await;

    assert!(matches!(
        stream.end_expect(&mut op).await,
        Err(Error::Stream(StreamError::BufferOverflow { limit: 64 }))
    ));

    // The failure is also raised as an event, and the data is kept.
    loop {
        match events.recv().await.unwrap() {
            StreamEvent::ErrorOccurred(error) => {
                assert!(matches!(
                    *error,
                    Error::Stream(StreamError::BufferOverflow { .. })
                ));
                break;
            }
            _ => continue,
        }
    }
    assert_eq!(stream.len(), 100);
}

#[tokio::test]
async fn stop_force_completes_pending_waits() {
    let (stream, _peer) = started();

    let mut op = stream
        .begin_expect(vec![ExpectAction::literal("never", |_| {})])
        .unwrap();
    stream.stop().unwrap();

    assert!(matches!(
        stream.end_expect(&mut op).await,
        Err(Error::Stream(StreamError::Stopped))
    ));
    assert!(matches!(
        stream.begin_expect(vec![ExpectAction::literal("x", |_| {})]),
        Err(Error::Stream(StreamError::Stopped))
    ));
    assert!(matches!(
        stream.write("x").await,
        Err(Error::Stream(StreamError::Stopped))
    ));
}

#[tokio::test]
async fn transport_close_faults_pending_waits_and_raises_event() {
    let (stream, peer) = started();
    let mut events = stream.events();

    let mut op = stream
        .begin_expect(vec![ExpectAction::literal("never", |_| {})])
        .unwrap();
    drop(peer);

    assert!(matches!(
        stream.end_expect(&mut op).await,
        Err(Error::Stream(StreamError::Closed))
    ));

    loop {
        match events.recv().await.unwrap() {
            StreamEvent::ErrorOccurred(error) => {
                assert!(matches!(*error, Error::Stream(StreamError::Closed)));
                break;
            }
            _ => continue,
        }
    }
    assert_eq!(stream.status(), Status::Faulted);
}

#[tokio::test]
async fn lifecycle_and_data_events_fire_in_order() {
    let (channel, peer) = mem::channel_pair(8);
    let stream = ShellStream::new(channel, StreamConfig::default());
    let mut events = stream.events();

    stream.start().unwrap();
    peer.inject(b"ping").await;

    assert!(matches!(events.recv().await.unwrap(), StreamEvent::Starting));
    assert!(matches!(events.recv().await.unwrap(), StreamEvent::Started));
    match events.recv().await.unwrap() {
        StreamEvent::DataReceived(data) => assert_eq!(&data[..], b"ping"),
        other => panic!("unexpected event: {other:?}"),
    }

    stream.stop().unwrap();
    assert!(matches!(events.recv().await.unwrap(), StreamEvent::Stopping));
    assert!(matches!(events.recv().await.unwrap(), StreamEvent::Stopped));
}

#[tokio::test]
async fn read_into_copies_and_consumes() {
    let (stream, peer) = started();
    peer.inject(b"abcdef").await;
    drained(&stream).await;

    let mut out = [0u8; 4];
    assert_eq!(stream.read_into(&mut out).unwrap(), 4);
    assert_eq!(&out, b"abcd");
    assert_eq!(stream.len(), 2);
    assert_eq!(stream.position(), 4);
}

#[tokio::test]
async fn expect_regex_returns_consumed_text() {
    let (stream, peer) = started();

    peer.inject(b"build #1234 done").await;
    drained(&stream).await;

    let text = stream
        .expect_regex(
            regex::bytes::Regex::new(r"#[0-9]+").unwrap(),
            Duration::from_secs(1),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(text, "build #1234");
    assert_eq!(stream.read().unwrap(), " done");
}
