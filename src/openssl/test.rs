use crate::config::Role;
use crate::engine::{EngineError, EngineStatus, HandshakeStatus, TlsEngine, MAX_PLAINTEXT_SIZE};
use crate::fixture::{test_config, TEST_HOST};

use super::{OpensslEngine, TlsContextFactory};

const MAX_STEPS: usize = 100;

fn engines() -> (OpensslEngine, OpensslEngine) {
    let client = TlsContextFactory::build_context(&test_config(Role::Client))
        .expect("client context")
        .create_engine(Role::Client, Some(TEST_HOST))
        .expect("client engine");
    let server = TlsContextFactory::build_context(&test_config(Role::Server))
        .expect("server context")
        .create_engine(Role::Server, None)
        .expect("server engine");
    (client, server)
}

/// one handshake action, shuttling records through in-memory queues
fn step(
    engine: &mut OpensslEngine,
    inbox: &mut Vec<u8>,
    outbox: &mut Vec<u8>,
) -> Result<(), EngineError> {
    let mut packet = vec![0u8; engine.packet_buffer_size()];
    let mut app = vec![0u8; engine.application_buffer_size()];

    match engine.handshake_status() {
        HandshakeStatus::NeedWrap => {
            let result = engine.wrap(&[], &mut packet)?;
            outbox.extend_from_slice(&packet[..result.bytes_produced]);
        }
        HandshakeStatus::NeedUnwrap => {
            let result = engine.unwrap(inbox, &mut app)?;
            inbox.drain(..result.bytes_consumed);
        }
        HandshakeStatus::NeedTask => {
            while let Some(task) = engine.delegated_task() {
                task.run()?;
            }
        }
        HandshakeStatus::Finished | HandshakeStatus::NotHandshaking => {}
    }
    Ok(())
}

fn handshake(client: &mut OpensslEngine, server: &mut OpensslEngine) -> Result<(), EngineError> {
    let mut to_server = Vec::new();
    let mut to_client = Vec::new();
    client.begin_handshake()?;
    server.begin_handshake()?;

    for _ in 0..MAX_STEPS {
        if client.handshake_status().is_complete() && server.handshake_status().is_complete() {
            assert!(to_server.is_empty(), "client data left over");
            assert!(to_client.is_empty(), "server data left over");
            return Ok(());
        }
        step(client, &mut to_client, &mut to_server)?;
        step(server, &mut to_server, &mut to_client)?;
    }
    Err(EngineError::Other("handshake did not finish".to_owned()))
}

fn wrap_one(engine: &mut OpensslEngine, plaintext: &[u8]) -> (usize, Vec<u8>) {
    let mut packet = vec![0u8; engine.packet_buffer_size()];
    let result = engine.wrap(plaintext, &mut packet).expect("wrap");
    assert_eq!(result.status, EngineStatus::Ok);
    packet.truncate(result.bytes_produced);
    (result.bytes_consumed, packet)
}

#[test]
fn test_handshake_and_exchange() {
    let (mut client, mut server) = engines();
    handshake(&mut client, &mut server).expect("handshake");

    assert!(client.protocol_version().starts_with("TLSv1"));
    assert!(client.cipher_name().is_some());
    assert!(client.peer_certificate().is_some());
    assert_eq!(client.role(), Role::Client);

    let (consumed, record) = wrap_one(&mut client, b"hello");
    assert_eq!(consumed, 5);

    let mut app = vec![0u8; server.application_buffer_size()];
    let result = server.unwrap(&record, &mut app).expect("unwrap");
    assert_eq!(result.status, EngineStatus::Ok);
    assert_eq!(result.bytes_consumed, record.len());
    assert_eq!(&app[..result.bytes_produced], b"hello");
}

#[test]
fn test_wrap_takes_at_most_one_record() {
    let (mut client, mut server) = engines();
    handshake(&mut client, &mut server).expect("handshake");

    let (consumed, _) = wrap_one(&mut client, &vec![7u8; 40_000]);
    assert_eq!(consumed, MAX_PLAINTEXT_SIZE);
}

#[test]
fn test_buffer_statuses() {
    let (mut client, mut server) = engines();
    handshake(&mut client, &mut server).expect("handshake");

    let mut tiny = [0u8; 10];
    let result = client.wrap(b"data", &mut tiny).expect("wrap");
    assert_eq!(result.status, EngineStatus::BufferOverflow);
    assert!(result.is_idle());

    let (_, record) = wrap_one(&mut client, b"data");
    let mut app = vec![0u8; server.application_buffer_size()];

    let half = record.len() / 2;
    let result = server.unwrap(&record[..half], &mut app).expect("partial");
    assert_eq!(result.status, EngineStatus::BufferUnderflow);
    assert!(result.is_idle());

    let result = server.unwrap(&record, &mut app[..100]).expect("small dst");
    assert_eq!(result.status, EngineStatus::BufferOverflow);
    assert!(result.is_idle());

    let result = server.unwrap(&record, &mut app).expect("unwrap");
    assert_eq!(&app[..result.bytes_produced], b"data");
}

#[test]
fn test_close_notify() {
    let (mut client, mut server) = engines();
    handshake(&mut client, &mut server).expect("handshake");

    client.close_outbound();
    assert!(!client.is_outbound_done());

    let mut packet = vec![0u8; client.packet_buffer_size()];
    let result = client.wrap(&[], &mut packet).expect("wrap close_notify");
    assert_eq!(result.status, EngineStatus::Closed);
    assert!(result.bytes_produced > 0);
    assert!(client.is_outbound_done());

    let mut app = vec![0u8; server.application_buffer_size()];
    let result = server
        .unwrap(&packet[..result.bytes_produced], &mut app)
        .expect("unwrap close_notify");
    assert_eq!(result.status, EngineStatus::Closed);
    assert!(server.is_inbound_done());
}

#[test]
fn test_garbage_is_rejected() {
    let (_, mut server) = engines();
    server.begin_handshake().expect("begin");

    let mut app = vec![0u8; server.application_buffer_size()];
    let err = server
        .unwrap(b"GET / HTTP/1.1\r\n\r\n", &mut app)
        .expect_err("not tls");
    assert!(matches!(err, EngineError::InvalidRecord(_)));
}

#[test]
fn test_mismatched_roles() {
    let client = TlsContextFactory::build_context(&test_config(Role::Client)).expect("context");
    let mut first = client
        .create_engine(Role::Client, Some(TEST_HOST))
        .expect("engine");
    let mut second = client
        .create_engine(Role::Client, Some(TEST_HOST))
        .expect("engine");

    assert!(handshake(&mut first, &mut second).is_err());
}
