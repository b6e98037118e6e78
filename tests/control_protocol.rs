use peerlink::pl::rpc::{self, Request};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

async fn fake_service<F, Fut>(script: F) -> std::net::SocketAddr
where
    F: FnOnce(BufReader<tokio::net::TcpStream>, Request) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        let req = rpc::read_request(&mut reader).await.unwrap();
        script(reader, req).await;
    });
    addr
}

#[tokio::test]
async fn two_lines_then_terminator() {
    let addr = fake_service(|mut conn, req| async move {
        assert_eq!(req.auth, "tok");
        assert_eq!(req.command, "info");
        let w = conn.get_mut();
        w.write_all(rpc::encode_frame("A").as_bytes()).await.unwrap();
        w.write_all(rpc::encode_frame("B").as_bytes()).await.unwrap();
        w.write_all(b"\n").await.unwrap();
        // Hold the connection open so only the terminator can end the exchange.
        tokio::time::sleep(Duration::from_secs(3)).await;
    })
    .await;

    let started = Instant::now();
    let mut seen = Vec::new();
    let outcome = rpc::send(
        addr,
        &Request::new("tok", "info"),
        rpc::RESPONSE_TIMEOUT,
        |line| seen.push(line.to_string()),
    )
    .await
    .unwrap();

    assert_eq!(outcome.results, 2);
    assert!(outcome.completed);
    assert_eq!(seen, vec!["A", "B"]);
    assert!(started.elapsed() < rpc::RESPONSE_TIMEOUT);
}

#[tokio::test]
async fn silent_service_is_no_response() {
    let addr = fake_service(|_conn, _req| async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
    })
    .await;

    let started = Instant::now();
    let outcome = rpc::send(
        addr,
        &Request::new("tok", "info"),
        Duration::from_millis(300),
        |_| panic!("no line expected"),
    )
    .await
    .unwrap();

    assert_eq!(outcome.results, 0);
    assert!(!outcome.completed);
    assert!(outcome.no_response());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn lines_after_the_deadline_are_not_delivered() {
    let addr = fake_service(|mut conn, _req| async move {
        let w = conn.get_mut();
        w.write_all(rpc::encode_frame("early").as_bytes()).await.unwrap();
        w.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;
        let _ = w.write_all(rpc::encode_frame("late").as_bytes()).await;
        let _ = w.write_all(b"\n").await;
    })
    .await;

    let mut seen = Vec::new();
    let outcome = rpc::send(
        addr,
        &Request::new("tok", "info"),
        Duration::from_millis(300),
        |line| seen.push(line.to_string()),
    )
    .await
    .unwrap();

    assert_eq!(outcome.results, 1);
    assert!(!outcome.completed);
    assert_eq!(seen, vec!["early"]);
}

#[tokio::test]
async fn multi_line_reply_keeps_order_and_skips_blanks() {
    let addr = fake_service(|mut conn, _req| async move {
        let lines = vec!["one\ntwo".to_string(), String::new(), "three".to_string()];
        rpc::write_response(conn.get_mut(), &lines).await.unwrap();
    })
    .await;

    let mut seen = Vec::new();
    let outcome = rpc::send(
        addr,
        &Request::new("tok", "help"),
        rpc::RESPONSE_TIMEOUT,
        |line| seen.push(line.to_string()),
    )
    .await
    .unwrap();

    assert!(outcome.completed);
    assert_eq!(seen, vec!["one", "two", "three"]);
    assert_eq!(outcome.results, 3);
}

#[tokio::test]
async fn refused_connection_is_a_connect_error() {
    let port = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().port()
    };
    let err = rpc::send(
        rpc::loopback(port),
        &Request::new("tok", "info"),
        rpc::RESPONSE_TIMEOUT,
        |_| {},
    )
    .await
    .unwrap_err();
    assert!(matches!(err, rpc::ControlError::Connect { .. }));
}
