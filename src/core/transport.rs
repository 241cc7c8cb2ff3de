use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

use crate::core::config::Config;
use crate::core::request::Request;
use crate::core::ConnectionState;
use crate::proto::codec::Decoder;
use crate::proto::error::{Error, Result};

/// TLS-related knobs threaded from the public API down to the connector.
/// Empty when the `tls` feature is off so call sites stay uniform.
#[derive(Clone, Default)]
pub(crate) struct ConnectOptions {
    #[cfg(feature = "tls")]
    pub(crate) verify_hook: Option<crate::core::tls::VerifyHook>,
}

/// The byte stream under a connection: a plain TCP socket or a TLS-wrapped
/// one. Exactly one transport is owned by a connection at a time; it is
/// dropped and replaced wholesale on reconnect, never mutated in place.
#[derive(Debug)]
pub(crate) enum Transport {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Transport {
    /// Resolves the configured endpoint, connects, performs the TLS
    /// handshake if requested, and runs the authentication exchange.
    /// Publishes each phase through `state`.
    pub(crate) async fn establish(
        config: &Config,
        options: &ConnectOptions,
        state: &watch::Sender<ConnectionState>,
    ) -> Result<Transport> {
        state.send_replace(ConnectionState::Resolving);
        let addrs: Vec<SocketAddr> =
            tokio::net::lookup_host((config.host.as_str(), config.port))
                .await
                .map_err(|e| Error::Resolve {
                    host: config.host.clone(),
                    source: e,
                })?
                .collect();
        if addrs.is_empty() {
            return Err(Error::Resolve {
                host: config.host.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses"),
            });
        }

        state.send_replace(ConnectionState::Connecting);
        let mut last_err: Option<io::Error> = None;
        let mut connected: Option<TcpStream> = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    connected = Some(stream);
                    break;
                }
                Err(e) => {
                    debug!(%addr, error = %e, "address did not accept connection");
                    last_err = Some(e);
                }
            }
        }
        let stream = connected.ok_or_else(|| Error::Connect {
            source: last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no usable address")),
        })?;
        let _ = stream.set_nodelay(true);

        let mut transport = if config.use_tls {
            state.send_replace(ConnectionState::Handshaking);
            wrap_tls(&config.host, stream, options).await?
        } else {
            Transport::Plain(stream)
        };

        state.send_replace(ConnectionState::Authenticating);
        authenticate(&mut transport, config).await?;
        Ok(transport)
    }

    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf).await,
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.read(buf).await,
        }
    }

    pub(crate) async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.write_all(buf).await,
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.write_all(buf).await,
        }
    }

    pub(crate) async fn shutdown(&mut self) {
        let result = match self {
            Transport::Plain(s) => s.shutdown().await,
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.shutdown().await,
        };
        if let Err(e) = result {
            debug!(error = %e, "transport shutdown returned an error");
        }
    }
}

#[cfg(feature = "tls")]
async fn wrap_tls(host: &str, stream: TcpStream, options: &ConnectOptions) -> Result<Transport> {
    let tls = crate::core::tls::connect(host, stream, options.verify_hook.clone()).await?;
    Ok(Transport::Tls(Box::new(tls)))
}

#[cfg(not(feature = "tls"))]
async fn wrap_tls(
    _host: &str,
    _stream: TcpStream,
    _options: &ConnectOptions,
) -> Result<Transport> {
    Err(Error::InvalidArgument {
        message: "use_tls requires the tls feature".to_string(),
    })
}

/// Which handshake step a reply belongs to, for error mapping.
#[derive(Clone, Copy)]
enum AuthStep {
    Auth,
    Setup,
}

/// Issues AUTH / SELECT / CLIENT SETNAME as one pipelined exchange and
/// checks every reply. An error reply to AUTH surfaces as [`Error::Auth`];
/// the rest surface as [`Error::Command`]. Either way the connection
/// attempt is abandoned.
async fn authenticate(transport: &mut Transport, config: &Config) -> Result<()> {
    let mut request = Request::new();
    let mut steps: Vec<AuthStep> = Vec::new();

    if let Some(password) = &config.password {
        match &config.username {
            Some(username) => request.push("AUTH", &[username.as_str(), password.as_str()]),
            None => request.push("AUTH", &[password.as_str()]),
        };
        steps.push(AuthStep::Auth);
    }
    if let Some(db) = config.database {
        request.push("SELECT", &[db.to_string()]);
        steps.push(AuthStep::Setup);
    }
    if let Some(name) = &config.client_name {
        request.push("CLIENT", &["SETNAME", name.as_str()]);
        steps.push(AuthStep::Setup);
    }
    if steps.is_empty() {
        return Ok(());
    }

    transport.write_all(&request.encode()).await?;

    let mut decoder = Decoder::new();
    let mut buf = [0u8; 4096];
    let mut replied = 0;
    while replied < steps.len() {
        while replied < steps.len() {
            match decoder.decode()? {
                Some(frame) => {
                    if let Some(message) = frame.error_message() {
                        return Err(match steps[replied] {
                            AuthStep::Auth => Error::Auth { message },
                            AuthStep::Setup => Error::Command { message },
                        });
                    }
                    replied += 1;
                }
                None => break,
            }
        }
        if replied == steps.len() {
            break;
        }
        let n = transport.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::Io {
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed during authentication",
                ),
            });
        }
        decoder.append(&buf[..n]);
    }
    Ok(())
}
