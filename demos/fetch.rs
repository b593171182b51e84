//! Fetch a few URLs with a browser ClientHello and print what was negotiated.
//!
//! Usage:
//!   cargo run --example fetch
//!   cargo run --example fetch -- https://example.com/ Firefox-65
//!   RUST_LOG=veneer=debug cargo run --example fetch

use std::time::Instant;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use veneer::{Client, HelloId};

const DEFAULT_URLS: &[&str] = &[
    "https://www.gstatic.com/firebasejs/4.9.1/firebase.js",
    "https://i.ytimg.com/vi/NfWU0Wiixuo/hqdefault.jpg",
];

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let urls: Vec<String> = match args.next() {
        Some(url) => vec![url],
        None => DEFAULT_URLS.iter().map(|u| u.to_string()).collect(),
    };
    let hello_id = match args.next().map(|s| s.parse::<HelloId>()) {
        Some(Ok(id)) => id,
        Some(Err(e)) => {
            error!("{}", e);
            std::process::exit(2);
        }
        None => HelloId::CHROME_72,
    };

    let client = match Client::new(hello_id.clone()) {
        Ok(client) => client,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    let mut failures = 0;
    for url in &urls {
        let start = Instant::now();
        match client.get(url).send_with_session().await {
            Ok((session, response)) => {
                info!(
                    hello_id = %hello_id,
                    tls = %session.version,
                    alpn = session.alpn().unwrap_or("-"),
                    status = response.status,
                    protocol = response.http_version().as_str(),
                    bytes = response.body().len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "{}",
                    url
                );
                for (name, value) in &response.headers {
                    println!("  {}: {}", name, value);
                }
            }
            Err(e) => {
                failures += 1;
                error!(layer = ?e.layer(), "{}: {}", url, e);
            }
        }
    }
    if failures > 0 {
        std::process::exit(1);
    }
}
