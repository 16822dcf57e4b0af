use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::core::{StreamResult, StreamTlsConfig};

pub mod tls;

pub use tls::TlsTransport;

/// Future returned by [`StreamTransport::connect`].
pub type TransportConnectFuture<R, W> = Pin<Box<dyn Future<Output = StreamResult<(R, W)>> + Send>>;

/// Read half handed to the reader task.
pub type BoxedStreamReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half owned by the writer actor.
pub type BoxedStreamWriter = Box<dyn AsyncWrite + Send + Sync + Unpin>;

/// Transport boundary: an encrypted, bidirectional byte stream split into halves.
///
/// Framing, correlation and liveness live above this trait, so tests can swap in an
/// in-memory pipe without touching session logic.
pub trait StreamTransport: Clone + Send + Sync + 'static {
    type Reader: AsyncRead + Send + Unpin + 'static;
    type Writer: AsyncWrite + Send + Sync + Unpin + 'static;

    fn connect(
        &self,
        host: String,
        port: u16,
        tls: StreamTlsConfig,
    ) -> TransportConnectFuture<Self::Reader, Self::Writer>;
}
