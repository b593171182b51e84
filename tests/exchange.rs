//! Requests dispatched over HTTP/1.1 and HTTP/2 by negotiated ALPN.

mod helpers;

use std::io::Write;
use std::sync::{Arc, Mutex};

use helpers::mock_h2_server::MockH2Server;
use helpers::mock_server::{http1_response, MockServer};
use helpers::tls::{acceptor_builder, generate_pki, init_tracing, spawn_handshake_server, with_alpn, TestPki};
use veneer::{Client, Error, HelloId, HttpVersion};

const BODY: &[u8] = b"{\"ok\":true}";
const RESPONSE_HEADERS: &[(&str, &str)] = &[
    ("Content-Type", "application/json"),
    ("X-Request-Id", "abc123"),
    ("Set-Cookie", "a=1"),
    ("Set-Cookie", "b=2"),
];

fn client(pki: &TestPki, hello_id: HelloId) -> Client {
    Client::builder()
        .hello_id(hello_id)
        .add_root_certificate(pki.ca_pem.clone())
        .build()
        .unwrap()
}

/// Start an HTTP/1.1 server; returns its base URL and the requests it saw.
async fn start_h1(pki: &TestPki, alpn: Option<&'static [u8]>, response: Vec<u8>) -> (String, Arc<Mutex<Vec<String>>>) {
    let server = MockServer::new().await.unwrap();
    let url = server.url("");
    let requests = server.requests();
    let mut builder = acceptor_builder(pki);
    if let Some(protos) = alpn {
        with_alpn(&mut builder, protos);
    }
    server.start(builder.build(), response);
    (url, requests)
}

async fn start_h2(pki: &TestPki, headers: &'static [(&'static str, &'static str)], body: &'static [u8]) -> String {
    let server = MockH2Server::new().await.unwrap();
    let url = server.url("");
    let mut builder = acceptor_builder(pki);
    with_alpn(&mut builder, b"\x02h2");
    server.start(builder.build(), move |mut conn| async move {
        let _ = conn.serve_one(200, headers, body).await;
    });
    url
}

#[tokio::test]
async fn test_http1_exchange() {
    init_tracing();
    let pki = generate_pki();
    let (url, requests) = start_h1(
        &pki,
        Some(b"\x08http/1.1"),
        http1_response(200, "OK", RESPONSE_HEADERS, BODY),
    )
    .await;

    let (session, response) = client(&pki, HelloId::CHROME_72)
        .get(&format!("{}/api/items?page=2", url))
        .header("User-Agent", "veneer-test")
        .header("Accept", "application/json")
        .send_with_session()
        .await
        .unwrap();

    assert_eq!(session.alpn, "http/1.1");
    assert_eq!(response.status, 200);
    assert_eq!(response.http_version(), HttpVersion::Http1_1);
    assert_eq!(response.body().as_ref(), BODY);
    assert_eq!(response.get_headers("set-cookie"), vec!["a=1", "b=2"]);

    let seen = requests.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    let host_line = format!("Host: {}\r\n", url.trim_start_matches("https://"));
    assert!(seen[0].starts_with("GET /api/items?page=2 HTTP/1.1\r\n"), "{}", seen[0]);
    let host = seen[0].find(&host_line).unwrap();
    let ua = seen[0].find("User-Agent: veneer-test").unwrap();
    let accept = seen[0].find("Accept: application/json").unwrap();
    assert!(host < ua && ua < accept);
}

#[tokio::test]
async fn test_no_alpn_falls_back_to_http1() {
    let pki = generate_pki();
    let (url, _) = start_h1(&pki, None, http1_response(204, "No Content", &[], b"")).await;

    let (session, response) = client(&pki, HelloId::FIREFOX_65)
        .get(&format!("{}/", url))
        .send_with_session()
        .await
        .unwrap();
    assert_eq!(session.alpn(), None);
    assert_eq!(response.status, 204);
    assert!(response.body().is_empty());
}

#[tokio::test]
async fn test_http2_exchange() {
    init_tracing();
    let pki = generate_pki();
    let url = start_h2(&pki, &[("content-type", "text/plain")], b"hello over h2").await;

    let (session, response) = client(&pki, HelloId::CHROME_83)
        .get(&format!("{}/h2", url))
        .header("Accept", "*/*")
        .send_with_session()
        .await
        .unwrap();
    assert_eq!(session.alpn, "h2");
    assert_eq!(response.status, 200);
    assert_eq!(response.http_version(), HttpVersion::Http2);
    assert_eq!(response.text().unwrap(), "hello over h2");
    assert_eq!(response.content_type(), Some("text/plain"));
}

#[tokio::test]
async fn test_same_response_over_both_protocols() {
    let pki = generate_pki();
    let (h1_url, _) = start_h1(
        &pki,
        Some(b"\x08http/1.1"),
        http1_response(200, "OK", RESPONSE_HEADERS, BODY),
    )
    .await;
    static H2_HEADERS: &[(&str, &str)] = &[
        ("content-type", "application/json"),
        ("x-request-id", "abc123"),
        ("set-cookie", "a=1"),
        ("set-cookie", "b=2"),
        ("content-length", "11"),
    ];
    let h2_url = start_h2(&pki, H2_HEADERS, BODY).await;

    let client = client(&pki, HelloId::CHROME_72);
    let over_h1 = client.get(&format!("{}/same", h1_url)).send().await.unwrap();
    let over_h2 = client.get(&format!("{}/same", h2_url)).send().await.unwrap();

    assert_eq!(over_h1.http_version(), HttpVersion::Http1_1);
    assert_eq!(over_h2.http_version(), HttpVersion::Http2);
    assert_eq!(over_h1.status, over_h2.status);
    assert_eq!(over_h1.body(), over_h2.body());
    assert_eq!(over_h1.header_set(), over_h2.header_set());
}

#[tokio::test]
async fn test_gzip_body_decoded() {
    let pki = generate_pki();
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(b"compressed payload").unwrap();
    let gz = encoder.finish().unwrap();
    let (url, _) = start_h1(
        &pki,
        Some(b"\x08http/1.1"),
        http1_response(200, "OK", &[("Content-Encoding", "gzip")], &gz),
    )
    .await;

    let response = client(&pki, HelloId::CHROME_72)
        .get(&format!("{}/gz", url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.body().as_ref(), gz.as_slice());
    assert_eq!(response.decoded_body().unwrap().as_ref(), b"compressed payload");
}

#[tokio::test]
async fn test_post_body_sent() {
    let pki = generate_pki();
    let (url, requests) = start_h1(
        &pki,
        Some(b"\x08http/1.1"),
        http1_response(201, "Created", &[], b""),
    )
    .await;

    let response = client(&pki, HelloId::CHROME_72)
        .post(&format!("{}/submit", url))
        .header("Content-Type", "text/plain")
        .body("ping")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status, 201);

    let seen = requests.lock().unwrap().clone();
    assert!(seen[0].starts_with("POST /submit HTTP/1.1\r\n"));
    assert!(seen[0].contains("Content-Length: 4\r\n"));
    let (_, body) = seen[0].split_once("\r\n\r\n").unwrap();
    assert_eq!(body, "ping");
}

#[tokio::test]
async fn test_malformed_chunk_size_is_protocol_error() {
    let pki = generate_pki();
    let (url, _) = start_h1(
        &pki,
        Some(b"\x08http/1.1"),
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nabc\r\n".to_vec(),
    )
    .await;

    let err = client(&pki, HelloId::CHROME_72)
        .get(&format!("{}/chunked", url))
        .send()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "{:?}", err);
    assert_eq!(err.layer(), veneer::ErrorLayer::Application);
}

#[tokio::test]
async fn test_http2_connection_loss_is_transport_error() {
    let pki = generate_pki();
    let server = MockH2Server::new().await.unwrap();
    let url = server.url("/gone");
    let mut builder = acceptor_builder(&pki);
    with_alpn(&mut builder, b"\x02h2");
    server.start(builder.build(), |mut conn| async move {
        // hang up right after the preface, mid-exchange
        let _ = conn.read_preface().await;
    });

    let err = client(&pki, HelloId::CHROME_72)
        .get(&url)
        .send()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "{:?}", err);
    assert_eq!(err.layer(), veneer::ErrorLayer::Network);
}

#[tokio::test]
async fn test_unsupported_alpn_sends_nothing() {
    let pki = generate_pki();
    let mut builder = acceptor_builder(&pki);
    with_alpn(&mut builder, b"\x06spdy/3");
    let (port, mut seen) = spawn_handshake_server(builder.build()).await;

    let err = client(&pki, HelloId::IOS_12_1)
        .get(&format!("https://127.0.0.1:{}/", port))
        .send()
        .await
        .unwrap_err();
    assert!(matches!(&err, Error::UnsupportedAlpn(token) if token == "spdy/3"), "{:?}", err);

    let server = seen.recv().await.unwrap();
    assert_eq!(server.alpn.as_deref(), Some("spdy/3"));
    assert_eq!(server.app_data, 0);
}

#[tokio::test]
async fn test_invalid_request_before_any_io() {
    let pki = generate_pki();
    let client = client(&pki, HelloId::CHROME_72);
    let err = client.get("http://127.0.0.1:1/").send().await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    // Port 1 is closed, so reaching the network would surface as DialFailed.
    let err = client
        .get("https://127.0.0.1:1/")
        .header("X-Bad", "a\r\nb")
        .send()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)), "{:?}", err);
}
