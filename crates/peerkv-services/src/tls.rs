//! TLS for the client↔server channel.
//!
//! The server presents its self-signed certificate. Clients trust exactly
//! that certificate: the verification store holds only the pinned trust
//! root, no system CAs, and hostnames are not checked.

use std::pin::Pin;

use openssl::error::ErrorStack;
use openssl::ssl::{Ssl, SslAcceptor, SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::store::X509StoreBuilder;
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

use peerkv_core::{KeyMaterial, TrustRoot};

use crate::network::TransportError;

/// Server-side TLS context built from the loaded key material.
pub fn acceptor(keys: &KeyMaterial) -> Result<SslAcceptor, ErrorStack> {
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())?;
    builder.set_certificate(&keys.certificate)?;
    builder.set_private_key(keys.signing_key.pkey())?;
    builder.check_private_key()?;
    Ok(builder.build())
}

/// Client-side TLS context that trusts only `root`.
pub fn connector(root: &TrustRoot) -> Result<SslConnector, ErrorStack> {
    let mut builder = SslConnector::builder(SslMethod::tls_client())?;
    let mut store = X509StoreBuilder::new()?;
    store.add_cert(root.certificate().clone())?;
    // Replaces the default store, dropping the system roots.
    builder.set_cert_store(store.build());
    builder.set_verify(SslVerifyMode::PEER);
    Ok(builder.build())
}

/// Run the server side of the handshake on an accepted socket.
pub async fn accept(
    acceptor: &SslAcceptor,
    tcp: TcpStream,
) -> Result<SslStream<TcpStream>, TransportError> {
    let ssl = Ssl::new(acceptor.context())?;
    let mut stream = SslStream::new(ssl, tcp)?;
    Pin::new(&mut stream)
        .accept()
        .await
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    Ok(stream)
}

/// Run the client side of the handshake, verifying the pinned certificate.
pub async fn connect(
    connector: &SslConnector,
    tcp: TcpStream,
) -> Result<SslStream<TcpStream>, TransportError> {
    let ssl = connector
        .configure()?
        .verify_hostname(false)
        .use_server_name_indication(false)
        .into_ssl("peerkv")?;
    let mut stream = SslStream::new(ssl, tcp)?;
    Pin::new(&mut stream)
        .connect()
        .await
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{read_message, write_message};
    use peerkv_core::wire::Request;
    use tokio::net::TcpListener;

    fn keys() -> KeyMaterial {
        KeyMaterial::generate("peerkv-tls-test", 2048, 1).unwrap()
    }

    async fn serve_once(keys: &KeyMaterial) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let acceptor = acceptor(keys).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            if let Ok(mut tls) = accept(&acceptor, tcp).await {
                let req: Option<Request> = read_message(&mut tls).await.unwrap_or(None);
                if let Some(req) = req {
                    let _ = write_message(&mut tls, &req).await;
                }
            }
        });
        (addr, task)
    }

    #[tokio::test]
    async fn pinned_certificate_is_accepted() {
        let keys = keys();
        let (addr, task) = serve_once(&keys).await;

        let connector = connector(&keys.trust_root().unwrap()).unwrap();
        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut tls = connect(&connector, tcp).await.unwrap();

        write_message(&mut tls, &Request::get_peer_list()).await.unwrap();
        let echoed: Option<Request> = read_message(&mut tls).await.unwrap();
        assert_eq!(echoed, Some(Request::get_peer_list()));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn unpinned_certificate_is_refused() {
        let server_keys = keys();
        let (addr, task) = serve_once(&server_keys).await;

        let impostor_root = keys().trust_root().unwrap();
        let connector = connector(&impostor_root).unwrap();
        let tcp = TcpStream::connect(addr).await.unwrap();
        let result = connect(&connector, tcp).await;
        assert!(matches!(result, Err(TransportError::Tls(_))));
        task.await.unwrap();
    }
}
