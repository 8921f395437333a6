use crate::*;

use tokio::net::TcpListener;

use peerkv_core::wire::{PeerAddress, Request, Response, ValueRecord};
use peerkv_services::framing::{read_message, write_message};
use peerkv_services::Lookup;

/// A peer that answers every request with `response`.
async fn lying_peer(response: Response) -> Result<(PeerAddress, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = PeerAddress::from(listener.local_addr()?);
    let task = tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            if let Ok(Some(_)) = read_message::<_, Request>(&mut stream).await {
                let _ = write_message(&mut stream, &response).await;
            }
        }
    });
    Ok((addr, task))
}

#[tokio::test]
async fn forged_value_is_rejected_and_server_value_returned() -> Result<()> {
    let server = TestServer::start().await?;
    server.registry.set_key("a", "1")?;
    let genuine = server.registry.get("a").context("seeded value missing")?;

    // Right shape, genuine signature, wrong value.
    let forged = ValueRecord {
        value: b"evil".to_vec(),
        signature: genuine.signature,
    };
    let (liar, task) = lying_peer(Response::record(forged)).await?;

    let client = server.client().await?;
    client.router().directory().replace(vec![liar]).await;

    assert_eq!(client.router().lookup("a").await, Lookup::Server { value: b"1".to_vec() });
    let cached = client.router().cache().lookup("a").context("value not cached")?;
    assert_eq!(cached.value, b"1");

    task.abort();
    Ok(())
}

#[tokio::test]
async fn value_signed_by_another_key_is_rejected() -> Result<()> {
    let mut server = TestServer::start().await?;
    let impostor = KeyMaterial::generate("peerkv-impostor", 2048, 1)?;
    let value = b"1".to_vec();
    let forged = ValueRecord {
        signature: impostor.signing_key.sign(&value)?,
        value,
    };
    let (liar, task) = lying_peer(Response::record(forged)).await?;

    let client = server.client().await?;
    client.router().directory().replace(vec![liar]).await;
    server.stop().await?;

    // Server unreachable and the only peer lies: nothing is returned or cached.
    assert_eq!(client.get_key("a").await, None);
    assert!(client.router().cache().is_empty());

    task.abort();
    Ok(())
}
