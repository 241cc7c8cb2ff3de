use std::time::Duration;

use remux::proto::codec::{Decoder, Encoder};
use remux::{Config, Connection, ConnectionState, Frame, Request};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

fn command_name(frame: &Frame) -> String {
    let args = frame.as_array().unwrap();
    String::from_utf8_lossy(args[0].as_bulk().unwrap()).into_owned()
}

#[tokio::test]
async fn test_unanswered_probe_tears_the_connection_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        // Accept exactly one client, then stop listening so the retry
        // loop keeps failing afterwards.
        let (mut socket, _) = listener.accept().await.unwrap();
        drop(listener);
        let mut decoder = Decoder::new();
        let mut buf = [0u8; 4096];
        // Reads whatever arrives, reports it, never replies.
        loop {
            let n = match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            decoder.append(&buf[..n]);
            while let Ok(Some(frame)) = decoder.decode() {
                let _ = seen_tx.send(command_name(&frame));
            }
        }
    });

    let config = Config::builder()
        .host("127.0.0.1")
        .port(addr.port())
        .health_check_interval(Duration::from_millis(50))
        .health_check_timeout(Duration::from_millis(50))
        .reconnect_delay(Duration::from_millis(10), Duration::from_millis(20))
        .build()
        .unwrap();

    let conn = Connection::new();
    let runner = conn.clone();
    let run = tokio::spawn(async move { runner.run(config).await });

    // Silence on an idle connection triggers a PING probe.
    let probed = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(probed, "PING");

    // The probe goes unanswered, so the transport is declared dead.
    let mut states = conn.state_changes();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == ConnectionState::Reconnecting),
    )
    .await
    .unwrap()
    .unwrap();

    conn.cancel();
    assert!(run.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_answered_probes_keep_the_connection_ready() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut decoder = Decoder::new();
        let mut encoder = Encoder::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            decoder.append(&buf[..n]);
            while let Ok(Some(frame)) = decoder.decode() {
                let _ = seen_tx.send(command_name(&frame));
                encoder.encode(&Frame::SimpleString(b"PONG".to_vec()));
            }
            if socket.write_all(&encoder.take()).await.is_err() {
                return;
            }
        }
    });

    let config = Config::builder()
        .host("127.0.0.1")
        .port(addr.port())
        .health_check_interval(Duration::from_millis(25))
        .reconnect_delay(Duration::from_millis(10), Duration::from_millis(20))
        .build()
        .unwrap();

    let conn = Connection::new();
    let runner = conn.clone();
    let run = tokio::spawn(async move { runner.run(config).await });

    // Several probe periods pass; each probe is answered in time.
    let mut probes = 0;
    while probes < 3 {
        let cmd = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        if cmd == "PING" {
            probes += 1;
        }
    }
    assert_eq!(conn.state(), ConnectionState::Ready);

    // Probes never surface as user completions.
    let mut req = Request::new();
    req.push("ECHO", &["user"]);
    let resp = conn.execute(req).await.unwrap();
    assert_eq!(resp.frames().len(), 1);

    conn.cancel();
    assert!(run.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_user_traffic_suppresses_probes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut decoder = Decoder::new();
        let mut encoder = Encoder::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            decoder.append(&buf[..n]);
            while let Ok(Some(frame)) = decoder.decode() {
                let _ = seen_tx.send(command_name(&frame));
                encoder.encode(&Frame::SimpleString(b"OK".to_vec()));
            }
            if socket.write_all(&encoder.take()).await.is_err() {
                return;
            }
        }
    });

    let config = Config::builder()
        .host("127.0.0.1")
        .port(addr.port())
        .health_check_interval(Duration::from_millis(100))
        .reconnect_delay(Duration::from_millis(10), Duration::from_millis(20))
        .build()
        .unwrap();

    let conn = Connection::new();
    let runner = conn.clone();
    let run = tokio::spawn(async move { runner.run(config).await });

    // Keep replies flowing well inside the probe interval.
    for _ in 0..8 {
        let mut req = Request::new();
        req.push("ECHO", &["busy"]);
        conn.execute(req).await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    conn.cancel();
    assert!(run.await.unwrap().is_ok());

    // A busy connection is never probed.
    let mut pings = 0;
    while let Some(cmd) = seen_rx.recv().await {
        if cmd == "PING" {
            pings += 1;
        }
    }
    assert_eq!(pings, 0);
}
