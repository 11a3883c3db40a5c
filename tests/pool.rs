mod common;

use common::{get, start, WAIT};
use futures::future::join_all;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tandem::{json, ExecutionMode, LoadBalance, Routes, Server};

fn sleepy_server(workers: usize, work: Duration) -> Server {
    let mut server = Server::new();
    server.pool_size(workers);
    server
        .get("/work", move |ctx| {
            Box::pin(async move {
                std::thread::sleep(work);
                let thread = std::thread::current().name().unwrap_or_default().to_string();
                let body = json!({ "thread": thread, "pooled": ctx.mode() == ExecutionMode::Pooled });
                ctx.response.json(&body)?;
                Ok(())
            })
        })
        .pooled();
    server.get("/ping", |ctx| {
        Box::pin(async move {
            ctx.response.text("pong");
            Ok(())
        })
    });
    server
}

async fn burst(addr: SocketAddr, path: &str, n: usize) -> Vec<u16> {
    let responses = tokio::time::timeout(WAIT, join_all((0..n).map(|_| get(addr, path))))
        .await
        .expect("burst did not finish");
    responses.into_iter().map(|r| r.status).collect()
}

#[tokio::test]
async fn pooled_handler_runs_on_a_worker_thread() {
    let handle = start(sleepy_server(2, Duration::ZERO)).await;

    let response = get(handle.local_addr(), "/work").await;
    assert_eq!(response.status, 200);
    let body = response.json();
    assert_eq!(body["pooled"], true);
    assert!(body["thread"].as_str().unwrap().starts_with("tandem-worker-"));

    handle.shutdown().await;
}

#[tokio::test]
async fn five_jobs_on_two_workers_take_three_rounds() {
    let handle = start(sleepy_server(2, Duration::from_millis(50))).await;
    let addr = handle.local_addr();

    let started = Instant::now();
    let statuses = burst(addr, "/work", 5).await;
    let elapsed = started.elapsed();

    assert_eq!(statuses, vec![200; 5]);
    assert!(elapsed >= Duration::from_millis(140), "finished in {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1000), "finished in {:?}", elapsed);
    assert_eq!(handle.pool_stats().unwrap().completed, 5);

    handle.shutdown().await;
}

#[tokio::test]
async fn inline_routes_stay_responsive_while_workers_are_busy() {
    let handle = start(sleepy_server(1, Duration::from_millis(300))).await;
    let addr = handle.local_addr();

    let busy = tokio::spawn(async move { get(addr, "/work").await.status });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    assert_eq!(get(addr, "/ping").await.text(), "pong");
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(busy.await.unwrap(), 200);

    handle.shutdown().await;
}

#[tokio::test]
async fn many_more_requests_than_workers_all_complete() {
    let handle = start(sleepy_server(2, Duration::from_millis(10))).await;
    let statuses = burst(handle.local_addr(), "/work", 16).await;
    assert_eq!(statuses, vec![200; 16]);
    handle.shutdown().await;
}

#[tokio::test]
async fn waiter_gets_504_near_the_deadline() {
    let mut server = sleepy_server(1, Duration::from_millis(400));
    server.pool_timeout(Duration::from_millis(100));
    let handle = start(server).await;

    let started = Instant::now();
    let response = get(handle.local_addr(), "/work").await;
    let elapsed = started.elapsed();

    assert_eq!(response.status, 504);
    assert!(elapsed >= Duration::from_millis(90), "answered after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(350), "answered after {:?}", elapsed);
    assert_eq!(handle.pool_stats().unwrap().timed_out, 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn stopped_pool_answers_503_while_inline_routes_keep_working() {
    let handle = start(sleepy_server(1, Duration::ZERO)).await;
    let addr = handle.local_addr();

    handle.pool().unwrap().shutdown().await;

    let response = get(addr, "/work").await;
    assert_eq!(response.status, 503);
    assert_eq!(response.header("retry-after"), Some("1"));
    assert_eq!(get(addr, "/ping").await.status, 200);

    handle.shutdown().await;
}

#[tokio::test]
async fn least_loaded_and_random_balancing_complete_every_request() {
    for strategy in [LoadBalance::LeastLoaded, LoadBalance::Random] {
        let mut server = sleepy_server(3, Duration::from_millis(20));
        server.load_balance(strategy);
        let handle = start(server).await;

        let statuses = burst(handle.local_addr(), "/work", 9).await;
        assert_eq!(statuses, vec![200; 9], "{:?}", strategy);

        let stats = handle.pool_stats().unwrap();
        assert_eq!(stats.completed, 9);
        assert_eq!(stats.in_flight, vec![0, 0, 0]);
        handle.shutdown().await;
    }
}

#[tokio::test]
async fn panic_in_pooled_handler_is_a_500() {
    let mut server = Server::new();
    server.pool_size(1);
    server
        .get("/explode/:when", |ctx| {
            Box::pin(async move {
                if ctx.param("when") == Some("now") {
                    panic!("pooled handler exploded");
                }
                ctx.response.text("calm");
                Ok(())
            })
        })
        .pooled();
    let handle = start(server).await;
    let addr = handle.local_addr();

    assert_eq!(get(addr, "/explode/now").await.status, 500);
    let after = get(addr, "/explode/later").await;
    assert_eq!(after.status, 200);
    assert_eq!(after.text(), "calm");

    handle.shutdown().await;
}

#[tokio::test]
async fn middleware_state_travels_with_pooled_requests() {
    let mut server = Server::new();
    server.pool_size(1);
    server.middleware_fn(|ctx| {
        Box::pin(async move {
            ctx.set("trace_id", 7u32);
            ctx.next().await?;
            let after: Option<String> = ctx.get("handled_by");
            ctx.response.header("X-Handled-By", after.unwrap_or_default());
            Ok(())
        })
    });
    server
        .post("/echo", |ctx| {
            Box::pin(async move {
                let trace_id: u32 = ctx.get("trace_id").unwrap_or_default();
                let body = ctx.body().as_string();
                ctx.set("handled_by", "worker");
                ctx.response.status(201).text(format!("{}:{}", trace_id, body));
                Ok(())
            })
        })
        .pooled();
    let handle = start(server).await;

    let mut client = common::Client::connect(handle.local_addr()).await;
    client
        .send("POST /echo HTTP/1.1\r\nHost: test\r\nContent-Length: 5\r\n\r\nhello")
        .await;
    let response = client.read_response().await.unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(response.text(), "7:hello");
    assert_eq!(response.header("x-handled-by"), Some("worker"));

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_lets_the_pooled_request_in_flight_finish() {
    let handle = start(sleepy_server(1, Duration::from_millis(300))).await;

    let mut client = common::Client::connect(handle.local_addr()).await;
    client.send("GET /work HTTP/1.1\r\nHost: test\r\n\r\n").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let (response, ()) = tokio::time::timeout(WAIT, async {
        tokio::join!(client.read_response(), handle.shutdown())
    })
    .await
    .expect("shutdown did not finish");

    let response = response.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.json()["pooled"], true);
    // The request was keep-alive; shutdown turned it into the last one.
    assert_eq!(response.header("connection"), Some("close"));
    assert!(client.is_closed().await);
    assert!(started.elapsed() < tandem::PoolConfig::default().shutdown_grace);
}
