use crate::*;

use peerkv_core::wire::Request;
use peerkv_services::network::exchange;

#[tokio::test]
async fn directory_survives_server_outage() -> Result<()> {
    let mut server = TestServer::start().await?;
    let a = server.client().await?;
    let b = server.client().await?;

    let before = b.get_peers().await;
    assert_eq!(before.len(), 2);

    server.stop().await?;
    let after = b.get_peers().await;
    assert_eq!(after, before);

    // Random peer selection still works off the stale list, excluding self.
    assert_eq!(b.router().directory().random_peer().await, Some(a.own_address()));
    Ok(())
}

#[tokio::test]
async fn peers_can_fetch_each_others_directory() -> Result<()> {
    let server = TestServer::start().await?;
    let a = server.client().await?;
    let b = server.client().await?;
    b.get_peers().await;

    let mut stream = tokio::net::TcpStream::connect(b.listen_addr()).await?;
    let response = exchange(&mut stream, &Request::get_peer_list(), Duration::from_secs(2)).await?;
    let mut peers = response.into_peers().context("peer list refused")?;
    peers.sort();

    let mut expected = vec![a.own_address(), b.own_address()];
    expected.sort();
    assert_eq!(peers, expected);
    Ok(())
}

#[tokio::test]
async fn newly_registered_peer_appears_after_refresh() -> Result<()> {
    let server = TestServer::start().await?;
    let a = server.client().await?;
    assert_eq!(a.router().directory().snapshot().await.len(), 1);

    let _b = server.client().await?;
    let a = &a;
    assert!(
        eventually(Duration::from_secs(2), move || async move {
            a.get_peers().await.len() == 2
        })
        .await,
        "second client never showed up in the directory"
    );
    Ok(())
}
