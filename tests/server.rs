//! Drives the assembled proxy over a real socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use modelcache::middleware::{AccessLog, Cors, Pipeline};
use modelcache::{CacheProxy, Config, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Running {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    _storage: tempfile::TempDir,
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn start(upstream: &MockServer) -> Running {
    let storage = tempfile::tempdir().unwrap();
    let mut config = Config::new(upstream.uri())
        .with_storage_dir(storage.path())
        .with_timeout(Duration::from_secs(5))
        .with_port(0);
    config.host = "127.0.0.1".to_owned();

    let proxy = Arc::new(CacheProxy::from_config(&config).await.unwrap());
    let handler = Pipeline::new(move |req| {
        let proxy = Arc::clone(&proxy);
        async move { proxy.handle(req).await }
    })
    .layer(AccessLog)
    .layer(Cors::default())
    .into_handler();

    let server = Server::bind(config.listen_addr()).await.unwrap();
    let addr = server.local_addr();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server.run_until(handler, async {
        let _ = rx.await;
    }));

    Running {
        addr,
        shutdown: Some(tx),
        _storage: storage,
    }
}

async fn roundtrip(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

fn get(target: &str) -> String {
    format!("GET {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
}

#[tokio::test]
async fn miss_then_hit_over_the_wire() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/modelviewer/tbc/meta/armor/1/15372.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"Item":{"HideGeosetMale":true,"HideGeosetFemale":true}}"#,
        ))
        .expect(1)
        .mount(&upstream)
        .await;

    let running = start(&upstream).await;
    let target = "/modelviewer/tbc/meta/armor/1/15372.json";

    let first = roundtrip(running.addr, &get(target)).await;
    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"), "{first}");
    assert!(first.contains("X-Cache: MISS\r\n"));
    assert!(first.contains("Content-Type: application/json\r\n"));
    assert!(first.contains("Access-Control-Allow-Origin: *\r\n"));
    assert!(first.ends_with(r#"{"Item":{"HideGeosetMale":null,"HideGeosetFemale":null}}"#));

    let second = roundtrip(running.addr, &get(target)).await;
    assert!(second.contains("X-Cache: HIT\r\n"));
    assert!(second.ends_with(r#"{"Item":{"HideGeosetMale":null,"HideGeosetFemale":null}}"#));
}

#[tokio::test]
async fn upstream_failure_status_reaches_the_client() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&upstream)
        .await;

    let running = start(&upstream).await;
    let response = roundtrip(running.addr, &get("/gone.json")).await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "{response}");
    assert!(response.contains("Content-Length: 0\r\n"));
}

#[tokio::test]
async fn preflight_is_answered_without_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let running = start(&upstream).await;
    let response = roundtrip(
        running.addr,
        "OPTIONS /modelviewer/tbc/x.json HTTP/1.1\r\nHost: localhost\r\n\
         Access-Control-Request-Headers: x-custom\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 204 No Content\r\n"), "{response}");
    assert!(response.contains("Access-Control-Allow-Methods: GET,HEAD,PUT,PATCH,POST,DELETE\r\n"));
    assert!(response.contains("Access-Control-Allow-Headers: x-custom\r\n"));
}

#[tokio::test]
async fn garbage_request_is_rejected() {
    let upstream = MockServer::start().await;
    let running = start(&upstream).await;
    let response = roundtrip(running.addr, "NOT AN HTTP REQUEST\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");
}

#[tokio::test]
async fn oversized_content_length_is_rejected() {
    let upstream = MockServer::start().await;
    let running = start(&upstream).await;
    let response = roundtrip(
        running.addr,
        "POST /a.json HTTP/1.1\r\nHost: localhost\r\n\
         Content-Length: 18446744073709551615\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"), "{response}");
}

#[tokio::test]
async fn head_advertises_length_without_sending_body() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .expect(1)
        .mount(&upstream)
        .await;

    let running = start(&upstream).await;
    // A HEAD and a GET on one keep-alive connection: the HEAD response must
    // not leak bytes into the framing of the next one.
    let raw = roundtrip(
        running.addr,
        "HEAD /a.json HTTP/1.1\r\nHost: localhost\r\n\r\n\
         GET /a.json HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;

    let responses: Vec<&str> = raw.split_inclusive("\r\n\r\n").collect();
    assert!(responses[0].starts_with("HTTP/1.1 200 OK\r\n"), "{raw}");
    assert!(responses[0].contains("Content-Length: 5\r\n"));
    assert!(responses[1].starts_with("HTTP/1.1 200 OK\r\n"), "{raw}");
    assert!(responses[1].contains("X-Cache: HIT\r\n"));
    assert_eq!(responses[2], "hello");
    assert_eq!(raw.matches("hello").count(), 1);
}
