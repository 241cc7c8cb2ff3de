use std::time::Duration;

use remux::proto::codec::{Decoder, Encoder};
use remux::{Config, Connection, ConnectionState, Error, Frame, Request};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Serves one client: replies OK to AUTH/SELECT, echoes the PING argument,
/// numbers every COUNT command, errors on BAD, and acknowledges SUBSCRIBE
/// with a push message.
async fn serve_one(mut socket: TcpStream) {
    let mut decoder = Decoder::new();
    let mut encoder = Encoder::new();
    let mut buf = [0u8; 4096];
    let mut counter = 0i64;

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.append(&buf[..n]);

        while let Ok(Some(frame)) = decoder.decode() {
            let args = frame.as_array().unwrap().to_vec();
            let cmd = args[0].as_bulk().unwrap().to_ascii_uppercase();
            match cmd.as_slice() {
                b"PING" if args.len() > 1 => {
                    encoder.encode(&Frame::BulkString(Some(args[1].as_bulk().unwrap().clone())));
                }
                b"PING" => encoder.encode(&Frame::SimpleString(b"PONG".to_vec())),
                b"COUNT" => {
                    encoder.encode(&Frame::Integer(counter));
                    counter += 1;
                }
                b"BAD" => encoder.encode(&Frame::Error(b"ERR unknown command".to_vec())),
                b"SUBSCRIBE" => {
                    encoder.encode(&Frame::Push(vec![
                        Frame::BulkString(Some("subscribe".into())),
                        args[1].clone(),
                        Frame::Integer(1),
                    ]));
                }
                _ => encoder.encode(&Frame::SimpleString(b"OK".to_vec())),
            }
        }

        let out = encoder.take();
        if !out.is_empty() && socket.write_all(&out).await.is_err() {
            return;
        }
    }
}

async fn spawn_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_one(socket));
        }
    });
    addr
}

fn config_for(addr: std::net::SocketAddr) -> Config {
    Config::builder()
        .host("127.0.0.1")
        .port(addr.port())
        .health_check_interval(Duration::ZERO)
        .build()
        .unwrap()
}

fn start(config: Config) -> (Connection, tokio::task::JoinHandle<remux::Result<()>>) {
    let conn = Connection::new();
    let runner = conn.clone();
    let handle = tokio::spawn(async move { runner.run(config).await });
    (conn, handle)
}

#[tokio::test]
async fn test_ping_round_trip_through_ready() {
    let addr = spawn_server().await;
    let config = Config::builder()
        .host("127.0.0.1")
        .port(addr.port())
        .username("u")
        .password("p")
        .database(1)
        .health_check_interval(Duration::ZERO)
        .build()
        .unwrap();
    let (conn, run) = start(config);

    let mut req = Request::new();
    req.push("PING", &["Kabuf"]);
    let resp = conn.execute(req).await.unwrap();
    assert_eq!(resp.frames().len(), 1);
    assert_eq!(resp.get(0).unwrap().as_bulk().unwrap().as_ref(), b"Kabuf");

    // Completion implies the forward path reached Ready.
    assert_eq!(conn.state(), ConnectionState::Ready);

    conn.cancel();
    assert!(run.await.unwrap().is_ok());
    assert_eq!(conn.state(), ConnectionState::Canceled);
}

#[tokio::test]
async fn test_completions_arrive_in_submission_order() {
    let addr = spawn_server().await;
    let (conn, run) = start(config_for(addr));

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let mut req = Request::new();
            req.push::<&str>("COUNT", &[]);
            conn.submit(req)
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let resp = handle.await.unwrap();
        assert_eq!(resp.get(0).unwrap().as_int(), Some(i as i64));
    }

    conn.cancel();
    assert!(run.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_pipelined_request_collects_all_replies() {
    let addr = spawn_server().await;
    let (conn, run) = start(config_for(addr));

    let mut req = Request::new();
    req.push("SET", &["k", "v"]);
    req.push("PING", &["x"]);
    let resp = conn.execute(req).await.unwrap();
    assert_eq!(resp.frames().len(), 2);
    assert_eq!(resp.get(0).unwrap(), &Frame::SimpleString(b"OK".to_vec()));
    assert_eq!(resp.get(1).unwrap().as_bulk().unwrap().as_ref(), b"x");

    conn.cancel();
    assert!(run.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_server_error_scoped_to_one_request() {
    let addr = spawn_server().await;
    let (conn, run) = start(config_for(addr));

    let mut bad = Request::new();
    bad.push::<&str>("BAD", &[]);
    let err = conn.execute(bad).await.unwrap_err();
    assert!(matches!(err, Error::Command { .. }));

    // The connection survived the command error.
    let mut ping = Request::new();
    ping.push("PING", &["still-alive"]);
    let resp = conn.execute(ping).await.unwrap();
    assert_eq!(
        resp.get(0).unwrap().as_bulk().unwrap().as_ref(),
        b"still-alive"
    );
    assert_eq!(conn.state(), ConnectionState::Ready);

    conn.cancel();
    assert!(run.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_push_messages_reach_sink_not_queue() {
    let addr = spawn_server().await;
    let (conn, run) = start(config_for(addr));
    let mut pushes = conn.push_messages().unwrap();

    let mut req = Request::new();
    req.push("SUBSCRIBE", &["news"]);
    // SUBSCRIBE owes no direct reply; completion means it was written.
    let resp = conn.execute(req).await.unwrap();
    assert!(resp.frames().is_empty());

    let push = tokio::time::timeout(Duration::from_secs(5), pushes.recv())
        .await
        .unwrap()
        .unwrap();
    let items = push.as_array().unwrap();
    assert_eq!(items[0].as_bulk().unwrap().as_ref(), b"subscribe");
    assert_eq!(items[1].as_bulk().unwrap().as_ref(), b"news");

    // Ordered replies are unaffected by the push traffic.
    let mut ping = Request::new();
    ping.push("PING", &["after-push"]);
    let resp = conn.execute(ping).await.unwrap();
    assert_eq!(
        resp.get(0).unwrap().as_bulk().unwrap().as_ref(),
        b"after-push"
    );

    conn.cancel();
    assert!(run.await.unwrap().is_ok());
}
