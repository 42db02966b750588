use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::database::Database;
use common::prelude::FutureTimeout;
use hyper::service::service_fn;
use hyper::{Body, Method, Request, Response, StatusCode};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;

use crate::global::GlobalState;

/// Per-dependency probe timeout; readiness must answer fast even when a
/// dependency is wedged.
const PROBE_TIMEOUT: Duration = Duration::from_millis(5);

pub async fn run(global: Arc<GlobalState>) -> Result<()> {
    let addr: SocketAddr =
        format!("{}:{}", global.config.api.host, global.config.api.port).parse()?;

    let tls_acceptor = match (
        &global.config.api.server_cert,
        &global.config.api.server_key,
    ) {
        (Some(cert), Some(key)) => {
            tracing::info!("TLS enabled");
            Some(build_tls_acceptor(cert, key)?)
        }
        _ => None,
    };

    tracing::info!("api listening on {}", addr);
    let listener = TcpListener::bind(&addr).await?;

    loop {
        select! {
            _ = global.ctx.done() => {
                return Ok(());
            },
            r = listener.accept() => {
                let (socket, addr) = r?;
                tracing::debug!("accepted connection from {}", addr);

                let global = global.clone();
                let tls_acceptor = tls_acceptor.clone();

                tokio::spawn(async move {
                    let service = service_fn({
                        let global = global.clone();
                        move |req| handle_request(global.clone(), req)
                    });

                    if let Some(tls_acceptor) = tls_acceptor {
                        let Ok(Ok(socket)) = tls_acceptor
                            .accept(socket)
                            .timeout(Duration::from_secs(5))
                            .await
                        else {
                            return;
                        };

                        if let Err(err) = hyper::server::conn::Http::new()
                            .serve_connection(socket, service)
                            .await
                        {
                            tracing::debug!("connection error: {}", err);
                        }
                    } else if let Err(err) = hyper::server::conn::Http::new()
                        .serve_connection(socket, service)
                        .await
                    {
                        tracing::debug!("connection error: {}", err);
                    }
                });
            },
        }
    }
}

async fn handle_request(
    global: Arc<GlobalState>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/ready") => readiness(global).await,
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("Not Found"))
            .unwrap_or_default(),
    };

    Ok(response)
}

async fn readiness(global: Arc<GlobalState>) -> Response<Body> {
    let broker_addr = format!(
        "{}:{}",
        global.config.broker.host, global.config.broker.port
    );

    if let Err(err) = check_broker(&broker_addr, PROBE_TIMEOUT).await {
        tracing::debug!("broker probe failed: {}", err);
        return status_response(StatusCode::SERVICE_UNAVAILABLE);
    }

    if let Err(err) = check_db(&global.db, PROBE_TIMEOUT).await {
        tracing::debug!("database probe failed: {}", err);

        let db = global.db.clone();
        tokio::spawn(async move {
            if let Err(err) = db.reconnect().await {
                tracing::error!("database reconnect failed: {}", err);
            }
        });

        return status_response(StatusCode::SERVICE_UNAVAILABLE);
    }

    status_response(StatusCode::OK)
}

fn status_response(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .unwrap_or_default()
}

pub(crate) async fn check_broker(addr: &str, timeout: Duration) -> io::Result<()> {
    let stream = TcpStream::connect(addr)
        .timeout(timeout)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "broker dial timed out"))??;
    drop(stream);

    Ok(())
}

pub(crate) async fn check_db(db: &Database, timeout: Duration) -> Result<()> {
    db.ping()
        .timeout(timeout)
        .await
        .map_err(|_| anyhow::anyhow!("database ping timed out"))??;

    Ok(())
}

fn build_tls_acceptor(cert_path: &str, key_path: &str) -> Result<tokio_rustls::TlsAcceptor> {
    let cert = std::fs::read(cert_path)?;
    let key = std::fs::read(key_path)?;

    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut io::BufReader::new(io::Cursor::new(
        key,
    )))?;
    if keys.is_empty() {
        anyhow::bail!("no pkcs8 private key found in {}", key_path);
    }
    let key = rustls::PrivateKey(keys.remove(0));

    let certs = rustls_pemfile::certs(&mut io::BufReader::new(io::Cursor::new(cert)))?
        .into_iter()
        .map(rustls::Certificate)
        .collect();

    // Readiness may be probed across cluster boundaries, so pin the
    // protocol floor and keep the suite and curve lists short.
    let config = rustls::ServerConfig::builder()
        .with_cipher_suites(&[
            rustls::cipher_suite::TLS13_AES_256_GCM_SHA384,
            rustls::cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
            rustls::cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            rustls::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        ])
        .with_kx_groups(&[
            &rustls::kx_group::X25519,
            &rustls::kx_group::SECP384R1,
            &rustls::kx_group::SECP256R1,
        ])
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(tokio_rustls::TlsAcceptor::from(Arc::new(config)))
}
