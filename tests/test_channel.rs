#[cfg(feature = "openssl_tls")]
mod test {

    use std::io;
    use std::thread;
    use std::time::Duration;

    use anyhow::Result;

    use fluvio_tls_channel::fixture::{
        connected_pair, read_exact, read_to_end, test_config, write_all, TEST_HOST,
    };
    use fluvio_tls_channel::net::duplex;
    use fluvio_tls_channel::{
        ChannelOptions, ChannelState, Error, ReadOutcome, Role, TlsContextFactory,
    };

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    #[test]
    fn test_hello() -> Result<()> {
        fluvio_tls_channel::subscriber::init_logger();
        let (client, server) = connected_pair(ChannelOptions::default())?;
        assert!(client.is_open());
        assert!(server.is_open());

        write_all(&client, b"hello", TIMEOUT)?;
        assert_eq!(read_exact(&server, 5, TIMEOUT)?, b"hello");

        write_all(&server, b"world", TIMEOUT)?;
        assert_eq!(read_exact(&client, 5, TIMEOUT)?, b"world");

        let peer = client.with_engine(|engine| engine.peer_certificate());
        assert!(peer.is_some());
        Ok(())
    }

    #[test]
    fn test_server_close_reaches_client() -> Result<()> {
        let (client, server) = connected_pair(ChannelOptions::default())?;
        write_all(&server, b"bye", TIMEOUT)?;
        server.close();
        assert_eq!(server.state(), ChannelState::Closed);

        assert_eq!(read_to_end(&client, TIMEOUT)?, b"bye");

        let mut buf = [0u8; 16];
        for _ in 0..3 {
            assert_eq!(client.read(&mut buf)?, ReadOutcome::EndOfStream);
        }
        Ok(())
    }

    #[test]
    fn test_large_write_grows_small_buffers() -> Result<()> {
        let options = ChannelOptions::default().with_initial_buffer_sizes(4096, 4096);
        let (client, server) = connected_pair(options)?;
        let data = pattern(1024 * 1024);

        let received = thread::scope(|scope| {
            let writer = scope.spawn(|| write_all(&client, &data, TIMEOUT));
            let received = read_exact(&server, data.len(), TIMEOUT);
            writer.join().expect("writer thread")?;
            received
        })?;

        assert_eq!(received.len(), data.len());
        assert!(received == data, "payload corrupted");
        Ok(())
    }

    #[test]
    fn test_would_block_write() -> Result<()> {
        let (client, server) = connected_pair(ChannelOptions::default())?;

        client.get_ref().set_write_limit(Some(0));
        // plaintext is taken, its ciphertext waits in the channel
        assert_eq!(client.write(b"first")?, 5);
        assert_eq!(client.write(b"second")?, 0);
        assert!(!client.flush()?);

        client.get_ref().set_write_limit(None);
        write_all(&client, b"second", TIMEOUT)?;
        assert_eq!(read_exact(&server, 11, TIMEOUT)?, b"firstsecond");
        Ok(())
    }

    #[test]
    fn test_end_of_stream_is_sticky() -> Result<()> {
        let (client, server) = connected_pair(ChannelOptions::default())?;
        client.close();

        assert!(read_to_end(&server, TIMEOUT)?.is_empty());
        let mut buf = [0u8; 8];
        for _ in 0..3 {
            assert_eq!(server.read(&mut buf)?, ReadOutcome::EndOfStream);
        }
        Ok(())
    }

    #[test]
    fn test_concurrent_read_write() -> Result<()> {
        const LEN: usize = 256 * 1024;
        let (client, server) = connected_pair(ChannelOptions::default())?;
        let upstream = pattern(LEN);
        let downstream: Vec<u8> = pattern(LEN).into_iter().rev().collect();

        thread::scope(|scope| -> Result<()> {
            let client_writer = scope.spawn(|| write_all(&client, &upstream, TIMEOUT));
            let server_writer = scope.spawn(|| write_all(&server, &downstream, TIMEOUT));
            let client_reader = scope.spawn(|| read_exact(&client, LEN, TIMEOUT));
            let server_reader = scope.spawn(|| read_exact(&server, LEN, TIMEOUT));

            client_writer.join().expect("client writer")?;
            server_writer.join().expect("server writer")?;
            assert!(server_reader.join().expect("server reader")? == upstream);
            assert!(client_reader.join().expect("client reader")? == downstream);
            Ok(())
        })
    }

    #[test]
    fn test_close_is_idempotent() -> Result<()> {
        let (client, server) = connected_pair(ChannelOptions::default())?;

        thread::scope(|scope| {
            scope.spawn(|| client.close());
            scope.spawn(|| client.close());
        });
        client.close();

        assert_eq!(client.state(), ChannelState::Closed);
        assert!(!client.is_open());
        assert!(matches!(client.write(b"x"), Err(Error::ChannelClosed)));
        assert!(read_to_end(&server, TIMEOUT)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_io_traits() -> Result<()> {
        let (client, server) = connected_pair(ChannelOptions::default())?;

        io::Write::write_all(&mut &client, b"abc")?;
        io::Write::flush(&mut &client)?;

        let mut buf = [0u8; 8];
        let n = loop {
            match io::Read::read(&mut &server, &mut buf) {
                Ok(n) => break n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::yield_now(),
                Err(err) => return Err(err.into()),
            }
        };
        assert_eq!(&buf[..n], b"abc");

        client.close();
        let mut rest = Vec::new();
        loop {
            match io::Read::read(&mut &server, &mut buf) {
                Ok(0) => break,
                Ok(n) => rest.extend_from_slice(&buf[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::yield_now(),
                Err(err) => return Err(err.into()),
            }
        }
        assert!(rest.is_empty());
        Ok(())
    }

    #[test]
    fn test_client_auth_required() -> Result<()> {
        let server = TlsContextFactory::build_context(
            &test_config(Role::Server).with_client_auth_required(),
        )?;
        let client = TlsContextFactory::build_context(&test_config(Role::Client))?;
        let (client_end, server_end) = duplex();

        let (client, server) = thread::scope(|scope| {
            let server = scope.spawn(|| server.wrap_server_channel(server_end));
            let client = client.wrap_client_channel(client_end, TEST_HOST, 9003);
            (client, server.join().expect("server thread"))
        });
        let (client, server) = (client?, server?);

        let presented = server.with_engine(|engine| engine.peer_certificate());
        assert!(presented.is_some());
        write_all(&client, b"authenticated", TIMEOUT)?;
        assert_eq!(read_exact(&server, 13, TIMEOUT)?, b"authenticated");
        Ok(())
    }

    #[test]
    fn test_pinned_protocol_and_suite() -> Result<()> {
        let server = TlsContextFactory::build_context(
            &test_config(Role::Server)
                .with_protocol("TLSv1.3")
                .with_cipher_suites(["TLS_AES_256_GCM_SHA384"]),
        )?;
        let client = TlsContextFactory::build_context(
            &test_config(Role::Client).with_protocol("TLSv1.3"),
        )?;
        let (client_end, server_end) = duplex();

        let (client, server) = thread::scope(|scope| {
            let server = scope.spawn(|| server.wrap_server_channel(server_end));
            let client = client.wrap_channel(client_end, Some((TEST_HOST, 9003)));
            (client, server.join().expect("server thread"))
        });
        let (client, _server) = (client?, server?);

        assert_eq!(client.with_engine(|engine| engine.protocol_version()), "TLSv1.3");
        assert_eq!(
            client.with_engine(|engine| engine.cipher_name()),
            Some("TLS_AES_256_GCM_SHA384")
        );
        Ok(())
    }

    #[test]
    fn test_tls12_only() -> Result<()> {
        let server = TlsContextFactory::build_context(
            &test_config(Role::Server).with_protocol("TLSv1.2"),
        )?;
        let client = TlsContextFactory::build_context(&test_config(Role::Client))?;
        let (client_end, server_end) = duplex();

        let (client, server) = thread::scope(|scope| {
            let server = scope.spawn(|| server.wrap_server_channel(server_end));
            let client = client.wrap_client_channel(client_end, TEST_HOST, 9003);
            (client, server.join().expect("server thread"))
        });
        let (client, server) = (client?, server?);

        assert_eq!(client.with_engine(|engine| engine.protocol_version()), "TLSv1.2");
        write_all(&server, b"legacy", TIMEOUT)?;
        assert_eq!(read_exact(&client, 6, TIMEOUT)?, b"legacy");
        Ok(())
    }

    #[test]
    fn test_mismatched_roles_fail() -> Result<()> {
        let options = ChannelOptions::default().with_handshake_timeout(Duration::from_secs(5));
        let client =
            TlsContextFactory::build_context(&test_config(Role::Client).with_channel_options(options))?;
        let (first_end, second_end) = duplex();

        let (first, second) = thread::scope(|scope| {
            let second = scope.spawn(|| client.wrap_client_channel(second_end, TEST_HOST, 9003));
            let first = client.wrap_client_channel(first_end, TEST_HOST, 9003);
            (first, second.join().expect("second thread"))
        });

        assert!(first.is_err());
        assert!(second.is_err());
        Ok(())
    }

    #[test]
    fn test_silent_peers_time_out() -> Result<()> {
        let options =
            ChannelOptions::default().with_handshake_timeout(Duration::from_millis(200));
        let server =
            TlsContextFactory::build_context(&test_config(Role::Server).with_channel_options(options))?;
        let (first_end, second_end) = duplex();

        let (first, second) = thread::scope(|scope| {
            let second = scope.spawn(|| server.wrap_server_channel(second_end));
            let first = server.wrap_server_channel(first_end);
            (first, second.join().expect("second thread"))
        });

        assert!(matches!(first, Err(Error::HandshakeTimeout(_))));
        assert!(matches!(second, Err(Error::HandshakeTimeout(_))));
        Ok(())
    }

    #[test]
    fn test_hostname_mismatch_rejected() -> Result<()> {
        let options = ChannelOptions::default().with_handshake_timeout(Duration::from_secs(5));
        let server = TlsContextFactory::build_context(
            &test_config(Role::Server).with_channel_options(options.clone()),
        )?;
        let client =
            TlsContextFactory::build_context(&test_config(Role::Client).with_channel_options(options))?;
        let (client_end, server_end) = duplex();

        let (client, server) = thread::scope(|scope| {
            let server = scope.spawn(|| server.wrap_server_channel(server_end));
            let client = client.wrap_client_channel(client_end, "unknown.example.com", 9003);
            (client, server.join().expect("server thread"))
        });

        assert!(matches!(client, Err(Error::Handshake(_))));
        assert!(server.is_err());
        Ok(())
    }

    #[test]
    fn test_hostname_verification_disabled() -> Result<()> {
        let server = TlsContextFactory::build_context(&test_config(Role::Server))?;
        let client = TlsContextFactory::build_context(
            &test_config(Role::Client).with_hostname_verification_disabled(),
        )?;
        let (client_end, server_end) = duplex();

        let (client, server) = thread::scope(|scope| {
            let server = scope.spawn(|| server.wrap_server_channel(server_end));
            let client = client.wrap_client_channel(client_end, "unknown.example.com", 9003);
            (client, server.join().expect("server thread"))
        });
        let (client, server) = (client?, server?);

        write_all(&client, b"ok", TIMEOUT)?;
        assert_eq!(read_exact(&server, 2, TIMEOUT)?, b"ok");
        Ok(())
    }
}
