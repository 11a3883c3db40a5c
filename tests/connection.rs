mod common;

use common::{start, Client, WAIT};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tandem::{Routes, Server};

fn hello_server(counter: Arc<AtomicUsize>) -> Server {
    let mut server = Server::new();
    server.get("/", move |ctx| {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            ctx.response.text("hello");
            Ok(())
        })
    });
    server
}

#[tokio::test]
async fn keep_alive_cap_closes_after_max_requests() {
    let mut server = hello_server(Arc::default());
    server.max_keep_alive_requests(2);
    let handle = start(server).await;

    let mut client = Client::connect(handle.local_addr()).await;
    let first = client.get("/").await;
    assert_eq!(first.header("connection"), Some("keep-alive"));
    let second = client.get("/").await;
    assert_eq!(second.header("connection"), Some("close"));
    assert!(client.is_closed().await);

    handle.shutdown().await;
}

#[tokio::test]
async fn admission_rejects_over_the_ceiling_without_running_handlers() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut server = hello_server(counter.clone());
    server.max_connections(1);
    let handle = start(server).await;
    let addr = handle.local_addr();

    let mut holder = Client::connect(addr).await;
    assert_eq!(holder.get("/").await.status, 200);
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let mut rejected = Client::connect(addr).await;
    let response = rejected.read_response().await.unwrap();
    assert_eq!(response.status, 503);
    assert_eq!(response.header("retry-after"), Some("1"));
    assert_eq!(response.header("connection"), Some("close"));
    assert!(rejected.is_closed().await);
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    // Closing the first connection frees its slot.
    drop(holder);
    let deadline = Instant::now() + WAIT;
    while handle.active_connections() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let mut next = Client::connect(addr).await;
    assert_eq!(next.get("/").await.status, 200);
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn eager_clients_over_the_ceiling_still_read_the_503() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut server = hello_server(counter.clone());
    server.max_connections(1);
    let handle = start(server).await;
    let addr = handle.local_addr();

    let mut holder = Client::connect(addr).await;
    assert_eq!(holder.get("/").await.status, 200);

    for _ in 0..10 {
        let mut eager = Client::connect(addr).await;
        eager.send("GET / HTTP/1.1\r\nHost: test\r\n\r\n").await;
        let response = eager.read_response().await.expect("503 was lost");
        assert_eq!(response.status, 503);
        assert_eq!(response.header("retry-after"), Some("1"));
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    drop(holder);
    handle.shutdown().await;
}

#[tokio::test]
async fn response_written_after_shutdown_signal_says_close() {
    let mut server = Server::new();
    server.get("/slow", |ctx| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ctx.response.text("done");
            Ok(())
        })
    });
    let handle = start(server).await;

    let mut client = Client::connect(handle.local_addr()).await;
    client.send("GET /slow HTTP/1.1\r\nHost: test\r\n\r\n").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (response, ()) = tokio::time::timeout(WAIT, async {
        tokio::join!(client.read_response(), handle.shutdown())
    })
    .await
    .unwrap();
    let response = response.unwrap();
    assert_eq!(response.text(), "done");
    assert_eq!(response.header("connection"), Some("close"));
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn http_1_0_and_connection_close_are_not_kept_alive() {
    let handle = start(hello_server(Arc::default())).await;
    let addr = handle.local_addr();

    let mut old = Client::connect(addr).await;
    old.send("GET / HTTP/1.0\r\n\r\n").await;
    let response = old.read_response().await.unwrap();
    assert_eq!(response.text(), "hello");
    assert_eq!(response.header("connection"), Some("close"));
    assert!(old.is_closed().await);

    let mut closing = Client::connect(addr).await;
    closing.send("GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    let response = closing.read_response().await.unwrap();
    assert_eq!(response.header("connection"), Some("close"));
    assert!(closing.is_closed().await);

    handle.shutdown().await;
}

#[tokio::test]
async fn idle_keep_alive_connections_time_out() {
    let mut server = hello_server(Arc::default());
    server.keep_alive(Duration::from_millis(200));
    let handle = start(server).await;
    let addr = handle.local_addr();

    // The first request has no idle limit.
    let mut slow_start = Client::connect(addr).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(slow_start.get("/").await.status, 200);

    // After it, the connection closes once idle for the keep-alive timeout.
    let started = Instant::now();
    assert!(slow_start.is_closed().await);
    let idle = started.elapsed();
    assert!(idle >= Duration::from_millis(150), "closed after {:?}", idle);
    assert!(idle < Duration::from_secs(2), "closed after {:?}", idle);

    handle.shutdown().await;
}

#[tokio::test]
async fn garbage_gets_400_and_close() {
    let counter = Arc::new(AtomicUsize::new(0));
    let handle = start(hello_server(counter.clone())).await;

    let mut client = Client::connect(handle.local_addr()).await;
    client.send("this is not http\r\n\r\n").await;
    let response = client.read_response().await.unwrap();
    assert_eq!(response.status, 400);
    assert!(client.is_closed().await);
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn incomplete_request_times_out_with_408() {
    let mut server = hello_server(Arc::default());
    server.request_timeout(Duration::from_millis(200));
    let handle = start(server).await;

    let mut client = Client::connect(handle.local_addr()).await;
    client.send("GET / HTTP/1.1\r\nHost: test\r\n").await;
    let started = Instant::now();
    let response = client.read_response().await.unwrap();
    assert_eq!(response.status, 408);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(client.is_closed().await);

    handle.shutdown().await;
}

#[tokio::test]
async fn pipelined_requests_are_read_from_the_buffer() {
    let handle = start(hello_server(Arc::default())).await;

    let mut client = Client::connect(handle.local_addr()).await;
    client
        .send("GET / HTTP/1.1\r\nHost: test\r\n\r\nGET / HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
        .await;
    assert_eq!(client.read_response().await.unwrap().text(), "hello");
    assert_eq!(client.read_response().await.unwrap().text(), "hello");
    assert!(client.is_closed().await);

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_idle_connections_and_stops_accepting() {
    let handle = start(hello_server(Arc::default())).await;
    let addr = handle.local_addr();

    let mut idle = Client::connect(addr).await;
    assert_eq!(idle.get("/").await.status, 200);

    tokio::time::timeout(WAIT, handle.shutdown()).await.unwrap();
    assert!(idle.is_closed().await);
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}
