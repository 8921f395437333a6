use crate::*;

use peerkv_core::verify;
use peerkv_services::Lookup;

#[tokio::test]
async fn round_trip_through_server() -> Result<()> {
    let server = TestServer::start().await?;
    server.registry.set_key("a", "1")?;

    let client = server.client().await?;

    // Alone on the roster, so the only candidate peer is ourselves.
    assert_eq!(client.router().lookup("a").await, Lookup::Server { value: b"1".to_vec() });
    assert_eq!(client.get_key("missing").await, None);

    let cached = client.router().cache().lookup("a").context("value not cached")?;
    assert!(verify(&server.root, &cached.signature, &cached.value));
    Ok(())
}

#[tokio::test]
async fn overwritten_value_is_picked_up() -> Result<()> {
    let server = TestServer::start().await?;
    server.registry.set_key("c", "0")?;
    let client = server.client().await?;

    assert_eq!(client.get_key("c").await, Some(b"0".to_vec()));
    server.registry.set_key("c", "1")?;
    assert_eq!(client.get_key("c").await, Some(b"1".to_vec()));
    Ok(())
}

#[tokio::test]
async fn registration_uses_the_address_the_server_sees() -> Result<()> {
    let server = TestServer::start().await?;
    let client = server.client().await?;

    let own = client.own_address();
    assert_eq!(own.ip, server.addr.ip());
    assert_eq!(own.port, client.listen_addr().port());
    assert_eq!(server.registry.get_peer_list(), vec![own]);
    Ok(())
}

#[tokio::test]
async fn second_client_is_served_by_the_first() -> Result<()> {
    let mut server = TestServer::start().await?;
    server.registry.set_key("a", "1")?;

    let first = server.client().await?;
    assert_eq!(first.get_key("a").await, Some(b"1".to_vec()));

    let second = server.client().await?;
    let peers = second.get_peers().await;
    assert_eq!(peers.len(), 2);

    // With the server gone, the value can only come from the first client.
    server.stop().await?;
    match second.router().lookup("a").await {
        Lookup::Peer { peer, value } => {
            assert_eq!(peer, first.own_address());
            assert_eq!(value, b"1");
        }
        other => panic!("expected a peer answer, got {other:?}"),
    }

    // The relayed value is cached and servable in turn.
    assert!(second.router().cache().lookup("a").is_some());
    Ok(())
}
