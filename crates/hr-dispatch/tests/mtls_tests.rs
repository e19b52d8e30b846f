//! Mutual TLS against a receiver that requires a client certificate

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hr_dispatch::{DispatchError, DispatcherConfig, HttpDispatcher};
use hr_platform::ClientCertificate;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Client certificate signed by the CA the receiver trusts
struct Pki {
    ca_der: CertificateDer<'static>,
    client: ClientCertificate,
}

fn pki() -> Pki {
    let mut ca_params = CertificateParams::default();
    ca_params.distinguished_name.push(DnType::CommonName, "HookRelay Test CA");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::DigitalSignature];
    let ca_key = KeyPair::generate().unwrap();
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let mut client_params = CertificateParams::default();
    client_params.distinguished_name.push(DnType::CommonName, "hookrelay-client");
    client_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    let client_key = KeyPair::generate().unwrap();
    let client_cert = client_params.signed_by(&client_key, &ca_cert, &ca_key).unwrap();

    Pki {
        ca_der: ca_cert.der().clone(),
        client: ClientCertificate { cert_pem: client_cert.pem(), key_pem: client_key.serialize_pem() },
    }
}

/// HTTPS receiver answering `200 ok` to every request on a verified connection
async fn receiver(client_ca: CertificateDer<'static>) -> (SocketAddr, Arc<AtomicUsize>) {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut roots = RootCertStore::empty();
    roots.add(client_ca).unwrap();
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .unwrap();

    let server = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
    let key = PrivatePkcs8KeyDer::from(server.key_pair.serialize_der());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_client_cert_verifier(verifier)
        .with_single_cert(vec![server.cert.der().clone()], key.into())
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let served = Arc::new(AtomicUsize::new(0));
    let counter = served.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(stream).await else { return };
                if read_request(&mut tls).await.is_none() {
                    return;
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tls
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                    .await;
                let _ = tls.shutdown().await;
            });
        }
    });
    (addr, served)
}

/// Reads headers and a `content-length` body
async fn read_request<S: AsyncReadExt + Unpin>(stream: &mut S) -> Option<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else { continue };
        let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let length: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        if buf.len() >= end + 4 + length {
            return Some(());
        }
    }
}

fn dispatcher() -> HttpDispatcher {
    HttpDispatcher::new(DispatcherConfig {
        timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
        // The receiver's own certificate is self-signed
        allow_insecure_tls: true,
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_trusted_client_certificate_completes_handshake() {
    let pki = pki();
    let (addr, served) = receiver(pki.ca_der.clone()).await;

    let d = dispatcher();
    let mut req = d.request(format!("https://{}/hook", addr), br#"{"a":1}"#.to_vec(), "application/json");
    req.signature_value = "sig".into();
    req.client_cert = Some(pki.client.clone());

    let resp = d.send(req).await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body_text(), "ok");
    assert_eq!(served.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_client_certificate_is_retryable_transport_error() {
    let pki = pki();
    let (addr, served) = receiver(pki.ca_der.clone()).await;

    let d = dispatcher();
    let mut req = d.request(format!("https://{}/hook", addr), br#"{"a":1}"#.to_vec(), "application/json");
    req.signature_value = "sig".into();

    let err = d.send(req).await.unwrap_err();
    assert!(matches!(err, DispatchError::Transport(_)), "unexpected error: {:?}", err);
    assert!(err.is_retryable());
    assert_eq!(served.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_untrusted_client_certificate_is_rejected() {
    let trusted = pki();
    let stranger = pki();
    let (addr, served) = receiver(trusted.ca_der.clone()).await;

    let d = dispatcher();
    let mut req = d.request(format!("https://{}/hook", addr), br#"{"a":1}"#.to_vec(), "application/json");
    req.signature_value = "sig".into();
    req.client_cert = Some(stranger.client);

    let err = d.send(req).await.unwrap_err();
    assert!(matches!(err, DispatchError::Transport(_)), "unexpected error: {:?}", err);
    assert_eq!(served.load(Ordering::SeqCst), 0);
}
