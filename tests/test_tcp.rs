#[cfg(feature = "openssl_tls")]
mod test {

    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    use anyhow::Result;
    use tracing::debug;

    use fluvio_tls_channel::fixture::{read_exact, read_to_end, test_config, write_all, TEST_HOST};
    use fluvio_tls_channel::net::TcpChannel;
    use fluvio_tls_channel::openssl::DefaultTlsChannel;
    use fluvio_tls_channel::{ChannelOptions, Role, TlsContextFactory};

    const ITER: u16 = 10;
    const TIMEOUT: Duration = Duration::from_secs(30);

    fn run_loopback(host: &str) -> Result<()> {
        fluvio_tls_channel::subscriber::init_logger();
        let options = ChannelOptions::default().with_handshake_timeout(Duration::from_secs(10));
        let acceptor = TlsContextFactory::build_context(
            &test_config(Role::Server).with_channel_options(options.clone()),
        )?;
        let connector = TlsContextFactory::build_context(
            &test_config(Role::Client).with_channel_options(options),
        )?;

        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        debug!("server listening on {}", addr);

        let server = thread::spawn(move || -> Result<()> {
            let (stream, peer) = listener.accept()?;
            debug!("server: accepted {}", peer);
            let channel = TcpChannel::new(stream);
            channel.set_nonblocking(true)?;
            let tls: DefaultTlsChannel = acceptor.wrap_server_channel(channel)?;

            for i in 0..ITER {
                let request = read_exact(&tls, 8, TIMEOUT)?;
                assert_eq!(request, format!("message{i}").into_bytes());
                write_all(&tls, format!("reply{i}").as_bytes(), TIMEOUT)?;
            }

            assert!(read_to_end(&tls, TIMEOUT)?.is_empty());
            debug!("server: client closed");
            Ok(())
        });

        let channel = TcpChannel::connect(addr)?;
        channel.set_nonblocking(true)?;
        let tls: DefaultTlsChannel = connector.wrap_client_channel(channel, host, addr.port())?;

        for i in 0..ITER {
            write_all(&tls, format!("message{i}").as_bytes(), TIMEOUT)?;
            let reply = read_exact(&tls, 6, TIMEOUT)?;
            assert_eq!(reply, format!("reply{i}").into_bytes());
        }
        tls.close();

        server.join().expect("server thread")?;
        Ok(())
    }

    #[test]
    fn test_tcp_loopback() -> Result<()> {
        run_loopback(TEST_HOST)
    }

    #[test]
    fn test_tcp_loopback_ip_address() -> Result<()> {
        run_loopback("127.0.0.1")
    }
}
