use crate::*;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use peerkv_core::wire::{Argument, Request, Response};
use peerkv_services::network::{exchange, KvNetwork};
use peerkv_services::tls;

#[tokio::test]
async fn plaintext_client_does_not_stop_the_server() -> Result<()> {
    let server = TestServer::start().await?;
    server.registry.set_key("a", "1")?;

    let mut plain = TcpStream::connect(server.addr).await?;
    plain.write_all(b"GET / HTTP/1.0\r\n\r\n").await?;
    drop(plain);

    let client = server.client().await?;
    assert_eq!(client.get_key("a").await, Some(b"1".to_vec()));
    Ok(())
}

#[tokio::test]
async fn malformed_frame_does_not_stop_the_server() -> Result<()> {
    let server = TestServer::start().await?;
    server.registry.set_key("a", "1")?;
    let connector = tls::connector(&server.root)?;

    // Valid TLS, garbage body.
    let tcp = TcpStream::connect(server.addr).await?;
    let mut stream = tls::connect(&connector, tcp).await?;
    stream.write_all(&[4, 0, 0, 0, 0xde, 0xad, 0xbe, 0xef]).await?;
    drop(stream);

    // Valid TLS, length header far above the frame limit.
    let tcp = TcpStream::connect(server.addr).await?;
    let mut stream = tls::connect(&connector, tcp).await?;
    stream.write_all(&u32::MAX.to_le_bytes()).await?;
    drop(stream);

    let tcp = TcpStream::connect(server.addr).await?;
    let mut stream = tls::connect(&connector, tcp).await?;
    let response = exchange(&mut stream, &Request::get("a"), Duration::from_secs(2)).await?;
    assert_eq!(response.into_record().map(|r| r.value), Some(b"1".to_vec()));
    Ok(())
}

#[tokio::test]
async fn unknown_command_gets_failure() -> Result<()> {
    let server = TestServer::start().await?;
    let net = NetNetwork::new("127.0.0.1", server.addr.port(), &server.root, timeouts())?;

    let unknown = Request {
        command: "Get".into(),
        argument: Argument::Key("a".into()),
    };
    assert_eq!(net.server_request(unknown).await?, Response::failure());
    assert_eq!(server.registry.peer_count(), 0);
    Ok(())
}

#[tokio::test]
async fn client_refuses_impostor_server() -> Result<()> {
    let server = TestServer::start().await?;
    let impostor_root = KeyMaterial::generate("peerkv-impostor", 2048, 1)?.trust_root()?;
    let net = NetNetwork::new("127.0.0.1", server.addr.port(), &impostor_root, timeouts())?;

    assert!(net.server_request(Request::get("a")).await.is_err());
    assert!(net.register(9).await.is_err());
    assert_eq!(server.registry.peer_count(), 0);
    Ok(())
}

#[tokio::test]
async fn unreachable_server_fails_startup_instead_of_hanging() -> Result<()> {
    let mut server = TestServer::start().await?;
    server.stop().await?;

    let started = tokio::time::timeout(Duration::from_secs(5), server.client()).await;
    assert!(matches!(started, Ok(Err(_))), "client start should fail promptly");
    Ok(())
}
