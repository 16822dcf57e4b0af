use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use crate::core::{StreamError, StreamTlsConfig};
use crate::tls::build_client_config;
use crate::transport::{StreamTransport, TransportConnectFuture};

/// TLS over TCP via tokio-rustls.
#[derive(Clone, Default)]
pub struct TlsTransport {
    config: Option<Arc<rustls::ClientConfig>>,
}

impl TlsTransport {
    /// Use a caller-built rustls config instead of deriving one from [`StreamTlsConfig`].
    pub fn with_config(config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            config: Some(config),
        }
    }
}

impl StreamTransport for TlsTransport {
    type Reader = ReadHalf<TlsStream<TcpStream>>;
    type Writer = WriteHalf<TlsStream<TcpStream>>;

    fn connect(
        &self,
        host: String,
        port: u16,
        tls: StreamTlsConfig,
    ) -> TransportConnectFuture<Self::Reader, Self::Writer> {
        let preset = self.config.clone();
        Box::pin(async move {
            let config = preset.unwrap_or_else(|| Arc::new(build_client_config(tls)));

            let tcp = TcpStream::connect((host.as_str(), port))
                .await
                .map_err(|err| StreamError::ConnectionFailed(format!("{host}:{port}: {err}")))?;
            if let Err(err) = tcp.set_nodelay(true) {
                debug!(error = %err, "failed to set TCP_NODELAY");
            }

            let server_name = ServerName::try_from(host.clone())
                .map_err(|err| StreamError::Tls(format!("invalid server name {host}: {err}")))?;
            let stream = TlsConnector::from(config)
                .connect(server_name, tcp)
                .await
                .map_err(|err| StreamError::Tls(format!("handshake with {host}: {err}")))?;

            Ok(tokio::io::split(stream))
        })
    }
}
