//! Kameo-based client for the exchange stream API.
//!
//! One session is a TLS byte stream carrying CRLF-delimited JSON in both directions. The
//! [`StreamClient`] establishes it with retry/backoff; per session a reader task feeds the
//! [`stream::StreamDispatcher`] actor, which correlates status replies with pending requests,
//! fans market and order pushes out to bounded feeds, and hands outbound requests to the
//! [`stream::StreamWriterActor`]. After authentication a liveness task issues heartbeats when
//! the stream goes quiet.

pub mod client;
pub mod core;
pub mod protocol;
pub mod stream;
pub mod supervision;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod tls;
pub mod transport;

pub use client::StreamClient;
pub use core::{
    Credentials, SessionStats, StreamConfig, StreamConnectionStatus, StreamError, StreamResult,
};
pub use stream::StreamRequester;
pub use transport::{StreamTransport, TlsTransport};
