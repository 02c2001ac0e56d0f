mod common;

use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

use tessera::{AsyncTlsStream, ProtocolVersion};

#[tokio::test]
async fn handshake_and_echo_over_duplex() {
    let fixture = common::fixture();
    let (client_io, server_io) = duplex(4096);
    let server_settings = fixture.server();
    let client_settings = fixture.client("localhost");

    let server = tokio::spawn(async move {
        let mut stream = AsyncTlsStream::handshake(&server_settings, server_io)
            .await
            .unwrap();
        let mut request = [0u8; 4];
        stream.read_exact(&mut request).await.unwrap();
        stream.write_all(b"pong").await.unwrap();
        stream.flush().await.unwrap();

        // Read until the client's close_notify.
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        rest
    });

    let mut client = AsyncTlsStream::handshake(&client_settings, client_io)
        .await
        .unwrap();
    let info = client.connection_info().unwrap();
    assert!(info.peer_verified);
    assert_eq!(info.protocol_version, ProtocolVersion::TLS13);

    client.write_all(b"ping").await.unwrap();
    let mut reply = [0u8; 4];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"pong");

    client.write_all(b"bye").await.unwrap();
    client.shutdown().await.unwrap();
    assert_eq!(server.await.unwrap(), b"bye");
}

#[tokio::test]
async fn large_payloads_cross_in_order() {
    let fixture = common::fixture();
    let (client_io, server_io) = duplex(1024);
    let server_settings = fixture.server().max_version(ProtocolVersion::TLS12);
    let client_settings = fixture.client("localhost");

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let server = tokio::spawn(async move {
        let mut stream = AsyncTlsStream::handshake(&server_settings, server_io)
            .await
            .unwrap();
        let mut received = vec![0u8; expected.len()];
        stream.read_exact(&mut received).await.unwrap();
        received == expected
    });

    let mut client = AsyncTlsStream::handshake(&client_settings, client_io)
        .await
        .unwrap();
    client.write_all(&payload).await.unwrap();
    client.flush().await.unwrap();
    assert!(server.await.unwrap());
}

#[tokio::test]
async fn untrusted_server_is_rejected() {
    let fixture = common::fixture();
    let (client_io, server_io) = duplex(4096);
    let server_settings = fixture.server();

    let server =
        tokio::spawn(async move { AsyncTlsStream::handshake(&server_settings, server_io).await.is_err() });

    let client_settings = tessera::TlsSettings::client("localhost").trust(tessera::TrustSource::Empty);
    let err = AsyncTlsStream::handshake(&client_settings, client_io)
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(server.await.unwrap());
}
