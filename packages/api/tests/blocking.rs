mod common;

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::thread;

use tessera::engine::Pkcs12;
use tessera::{Identity, NativeStatus, TlsSettings, TlsStream};

#[test]
fn echo_over_a_socket_pair() {
    let fixture = common::fixture();
    let (client_sock, server_sock) = UnixStream::pair().unwrap();
    let server_settings = fixture.server();

    let server = thread::spawn(move || {
        let mut stream = TlsStream::handshake(&server_settings, server_sock).unwrap();
        let mut line = [0u8; 12];
        stream.read_exact(&mut line).unwrap();
        stream.write_all(&line).unwrap();
        stream.flush().unwrap();
        stream.into_inner().unwrap()
    });

    let mut stream = TlsStream::handshake(&fixture.client("localhost"), client_sock).unwrap();
    assert!(stream.connection().is_authenticated());
    stream.write_all(b"hello, world").unwrap();
    let mut echoed = [0u8; 12];
    stream.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"hello, world");

    stream.shutdown().unwrap();
    assert!(stream.into_inner().is_some());
    assert!(server.join().unwrap().local_addr().is_ok());
}

#[test]
fn wrong_host_fails_on_both_sides() {
    let fixture = common::fixture();
    let (client_sock, server_sock) = UnixStream::pair().unwrap();
    let server_settings = fixture.server();

    let server = thread::spawn(move || TlsStream::handshake(&server_settings, server_sock).err());

    let err = TlsStream::handshake(&fixture.client("tessera.invalid"), client_sock).unwrap_err();
    assert_eq!(err.native_status(), Some(NativeStatus::BadCertificate));
    assert_eq!(err.verify_failure().unwrap().code.code(), 62);

    let server_err = server.join().unwrap().expect("server sees the alert");
    assert!(server_err.is_fatal());
}

#[test]
fn identity_needs_a_certificate() {
    assert!(Identity::from_pem(b"", b"").is_err());
}

#[test]
fn pkcs12_identity_serves_a_handshake() {
    let fixture = common::fixture();
    let pem = fixture.identity();
    let archive = Pkcs12::export(&pem.certificate, &pem.key, "hunter2", "server").unwrap();
    assert!(matches!(
        Identity::from_pkcs12(&archive, "wrong"),
        Err(tessera::Error::Decryption(_))
    ));
    let mut identity = Identity::from_pkcs12(&archive, "hunter2").unwrap();
    assert!(identity.chain.is_empty());
    assert!(identity.certificate.same_as(&pem.certificate).unwrap());

    // The archive holds only the leaf; the intermediate travels separately.
    identity.chain.push(pem.chain[0].clone());
    let (client_sock, server_sock) = UnixStream::pair().unwrap();
    let server_settings = TlsSettings::server(identity);
    let server = thread::spawn(move || TlsStream::handshake(&server_settings, server_sock).is_ok());

    let client_settings = fixture.client("localhost");
    let stream = TlsStream::handshake(&client_settings, client_sock).unwrap();
    assert!(stream.connection().is_authenticated());
    drop(stream);
    assert!(server.join().unwrap());
}
