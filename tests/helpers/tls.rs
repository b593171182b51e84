use boring::pkey::PKey;
use boring::ssl::{select_next_proto, AlpnError, SslAcceptor, SslAcceptorBuilder, SslMethod, SslVersion};
use boring::x509::X509;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

/// Test CA plus a leaf for 127.0.0.1 and localhost signed by it.
pub struct TestPki {
    pub ca_pem: Vec<u8>,
    pub ca_der: Vec<u8>,
    pub leaf_pem: String,
    pub key_pem: String,
}

pub fn generate_pki() -> TestPki {
    let ca_key = KeyPair::generate().expect("Failed to generate CA key");
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("CA params");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "veneer test CA");
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let ca = ca_params.self_signed(&ca_key).expect("Failed to self-sign CA");

    let leaf_key = KeyPair::generate().expect("Failed to generate leaf key");
    let mut leaf_params =
        CertificateParams::new(vec!["127.0.0.1".to_string(), "localhost".to_string()])
            .expect("leaf params");
    leaf_params
        .distinguished_name
        .push(DnType::CommonName, "localhost");
    leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    let leaf = leaf_params
        .signed_by(&leaf_key, &ca, &ca_key)
        .expect("Failed to sign leaf");

    TestPki {
        ca_pem: ca.pem().into_bytes(),
        ca_der: ca.der().to_vec(),
        leaf_pem: leaf.pem(),
        key_pem: leaf_key.serialize_pem(),
    }
}

/// BoringSSL acceptor builder serving the leaf of `pki`.
pub fn acceptor_builder(pki: &TestPki) -> SslAcceptorBuilder {
    let pkey = PKey::private_key_from_pem(pki.key_pem.as_bytes()).expect("Failed to parse private key");
    let x509 = X509::from_pem(pki.leaf_pem.as_bytes()).expect("Failed to parse certificate");

    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())
        .expect("Failed to create SslAcceptor builder");
    builder.set_private_key(&pkey).expect("Failed to set private key");
    builder.set_certificate(&x509).expect("Failed to set certificate");
    builder
}

/// Acceptor builder plus the CA certificate (PEM) clients should trust.
pub fn generate_cert_bundle() -> (SslAcceptorBuilder, Vec<u8>) {
    let pki = generate_pki();
    (acceptor_builder(&pki), pki.ca_pem)
}

/// Select from `server_protos` (ALPN wire format, e.g. `b"\x02h2"`).
pub fn with_alpn(builder: &mut SslAcceptorBuilder, server_protos: &'static [u8]) {
    builder.set_alpn_select_callback(move |_, client_protos| {
        select_next_proto(server_protos, client_protos).ok_or(AlpnError::NOACK)
    });
}

pub fn tls12_only(builder: &mut SslAcceptorBuilder) {
    builder
        .set_max_proto_version(Some(SslVersion::TLS1_2))
        .expect("Failed to cap TLS version");
}

/// Only accept P-256, forcing a HelloRetryRequest from X25519-only shares.
pub fn p256_only(builder: &mut SslAcceptorBuilder) {
    builder.set_curves_list("P-256").expect("Failed to set curves");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("veneer=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Accept one TCP connection and return the first TLS record it sends.
pub async fn capture_first_record(listener: TcpListener) -> Vec<u8> {
    let (mut sock, _) = listener.accept().await.expect("accept");
    let mut header = [0u8; 5];
    sock.read_exact(&mut header).await.expect("record header");
    let len = u16::from_be_bytes([header[3], header[4]]) as usize;
    let mut record = header.to_vec();
    record.resize(5 + len, 0);
    sock.read_exact(&mut record[5..]).await.expect("record body");
    record
}

/// Accept TLS connections, report each negotiated ALPN token, and read
/// until the client closes.
pub async fn spawn_handshake_server(
    acceptor: SslAcceptor,
) -> (u16, tokio::sync::mpsc::UnboundedReceiver<ServerSeen>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let acceptor = std::sync::Arc::new(acceptor);
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let acceptor = std::sync::Arc::clone(&acceptor);
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = tokio_boring::accept(&acceptor, tcp).await else {
                    return;
                };
                let alpn = tls
                    .ssl()
                    .selected_alpn_protocol()
                    .map(|p| String::from_utf8_lossy(p).into_owned());
                let version = tls.ssl().version_str().to_string();
                let mut app_data = 0usize;
                let mut buf = [0u8; 4096];
                loop {
                    match tls.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => app_data += n,
                    }
                }
                let _ = tx.send(ServerSeen { alpn, version, app_data });
            });
        }
    });
    (port, rx)
}

/// What the server observed on one connection.
#[derive(Debug, Clone)]
pub struct ServerSeen {
    pub alpn: Option<String>,
    pub version: String,
    /// Application bytes received before the client closed.
    pub app_data: usize,
}
