mod common;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tessera::engine::bio::BioOps;
use tessera::engine::{CallbackBio, CallbackIo, MemoryBio};
use tessera::{
    ClientCertificates, Error, NativeStatus, ProtocolVersion, TlsConnection, TlsSettings,
    TrustSource, VerifyErrorCode,
};

fn pair(client: &TlsSettings, server: &TlsSettings) -> (TlsConnection, TlsConnection) {
    let (client_bio, server_bio) = MemoryBio::pair();
    let mut client = TlsConnection::new(client, client_bio).unwrap();
    let mut server = TlsConnection::new(server, server_bio).unwrap();
    client.start_handshake().unwrap();
    server.start_handshake().unwrap();
    (client, server)
}

fn run(client: &mut TlsConnection, server: &mut TlsConnection) -> tessera::Result<()> {
    let (mut client_done, mut server_done) = (false, false);
    for _ in 0..10 {
        if !client_done {
            client_done = client.process_handshake()?;
        }
        if !server_done {
            server_done = server.process_handshake()?;
        }
        if client_done && server_done {
            client.finish_handshake()?;
            server.finish_handshake()?;
            return Ok(());
        }
    }
    panic!("handshake still pending after 10 rounds");
}

#[test]
fn pending_steps_resume_until_established() {
    let fixture = common::fixture();
    let (mut client, mut server) = pair(&fixture.client("localhost"), &fixture.server());

    // The server has nothing to read before the client hello.
    assert!(!server.process_handshake().unwrap());
    run(&mut client, &mut server).unwrap();

    assert!(client.is_authenticated());
    assert!(!server.is_authenticated());
    assert!(server.is_server());
    assert_eq!(
        client.connection_info().unwrap().protocol_version,
        ProtocolVersion::TLS13
    );

    let mut buf = [0u8; 32];
    assert_eq!(server.read(&mut buf).unwrap(), (0, true));
    assert_eq!(client.write(b"over memory").unwrap(), (11, false));
    let (n, more) = server.read(&mut buf).unwrap();
    assert!(!more);
    assert_eq!(&buf[..n], b"over memory");

    assert!(!client.shutdown().unwrap());
    assert_eq!(server.read(&mut buf).unwrap(), (0, false));
    client.close();
    server.close();
}

#[test]
fn close_notify_waits_for_a_stalled_transport() {
    let fixture = common::fixture();
    let (client_end, server_bio) = MemoryBio::pair();
    let client_end = Arc::new(Mutex::new(client_end));
    let stalled = Arc::new(AtomicBool::new(false));

    let reader = Arc::clone(&client_end);
    let writer = Arc::clone(&client_end);
    let blocked = Arc::clone(&stalled);
    let client_bio = CallbackBio::from_fns(
        move |buf| match reader.lock().unwrap().read(buf) {
            Ok(0) => Ok(CallbackIo::Eof),
            Ok(n) => Ok(CallbackIo::Ready(n)),
            Err(Error::WouldBlock) => Ok(CallbackIo::WouldBlock),
            Err(e) => Err(io::Error::other(e)),
        },
        move |buf| {
            if blocked.load(Ordering::SeqCst) {
                return Ok(CallbackIo::WouldBlock);
            }
            let n = writer.lock().unwrap().write(buf).map_err(io::Error::other)?;
            Ok(CallbackIo::Ready(n))
        },
        || Ok(()),
    );

    let mut client = TlsConnection::new(&fixture.client("localhost"), client_bio).unwrap();
    let mut server = TlsConnection::new(&fixture.server(), server_bio).unwrap();
    client.start_handshake().unwrap();
    server.start_handshake().unwrap();
    run(&mut client, &mut server).unwrap();

    stalled.store(true, Ordering::SeqCst);
    assert!(client.shutdown().unwrap());
    let mut buf = [0u8; 8];
    assert_eq!(server.read(&mut buf).unwrap(), (0, true));
    assert!(client.flush().unwrap());

    stalled.store(false, Ordering::SeqCst);
    assert!(!client.flush().unwrap());
    assert_eq!(server.read(&mut buf).unwrap(), (0, false));
}

#[test]
fn validator_sees_the_target_host_and_can_accept() {
    let fixture = common::fixture();
    let client_settings = TlsSettings::client("localhost")
        .trust(TrustSource::Empty)
        .validator(|validation| {
            validation.target_host() == Some("localhost")
                && validation.error() == Some(VerifyErrorCode::UnableToGetIssuerCertLocally)
                && !validation.preverified()
        });
    let (mut client, mut server) = pair(&client_settings, &fixture.server());
    run(&mut client, &mut server).unwrap();
    assert!(client.is_authenticated());
}

#[test]
fn validator_rejection_fails_the_handshake() {
    let fixture = common::fixture();
    let client_settings = fixture.client("localhost").validator(|_| false);
    let (mut client, mut server) = pair(&client_settings, &fixture.server());

    let err = run(&mut client, &mut server).unwrap_err();
    assert_eq!(err.native_status(), Some(NativeStatus::BadCertificate));
    assert_eq!(
        err.verify_failure().map(|failure| failure.code),
        Some(VerifyErrorCode::ApplicationVerification)
    );
}

#[test]
fn required_client_certificate_is_checked_by_the_server() {
    let fixture = common::fixture();
    let server_settings = fixture
        .server()
        .trust_certificates([fixture.root()])
        .client_certificates(ClientCertificates::Require);
    let client_settings = fixture.client("localhost").identity(fixture.identity());

    let (mut client, mut server) = pair(&client_settings, &server_settings);
    run(&mut client, &mut server).unwrap();
    assert!(server.is_authenticated());
    assert!(server.connection_info().unwrap().peer_certificate.is_some());
}

#[test]
fn tls12_bounds_are_honoured() {
    let fixture = common::fixture();
    let server_settings = fixture.server().max_version(ProtocolVersion::TLS12);
    let (mut client, mut server) = pair(&fixture.client("localhost"), &server_settings);
    run(&mut client, &mut server).unwrap();
    assert_eq!(
        server.connection_info().unwrap().protocol_version,
        ProtocolVersion::TLS12
    );
}

#[test]
fn data_before_the_handshake_is_an_error() {
    let fixture = common::fixture();
    let (mut client, _server) = pair(&fixture.client("localhost"), &fixture.server());
    let mut buf = [0u8; 4];
    assert!(matches!(client.read(&mut buf), Err(Error::InvalidState(_))));
    assert!(client.connection_info().is_none());
}
