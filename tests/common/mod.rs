#![allow(dead_code)]

use std::time::Duration;

use esa_stream::testing::{MockListener, MockPeer, MockTransport};
use esa_stream::{Credentials, StreamClient, StreamConfig, StreamConnectionStatus};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> StreamConfig {
    StreamConfig::default()
        .with_endpoint("stream.mock", 443)
        .with_connect_timeout(Duration::from_secs(2))
        .with_retries(0, Duration::from_secs(1))
        .with_request_timeout(Duration::from_secs(2))
}

pub fn credentials() -> Credentials {
    Credentials::new("app-key-1", "session-token-1")
}

pub type MockClient = StreamClient<MockTransport>;

/// Connect a client against a mock peer that answers with `connection_id`.
pub async fn connect_mock(
    config: StreamConfig,
    connection_id: &str,
) -> (MockClient, MockPeer, MockListener, MockTransport) {
    init_tracing();
    let (transport, listener) = MockTransport::channel_pair();
    let mut client = StreamClient::with_transport(config, credentials(), transport.clone());
    let (peer, listener) = connect_with_peer(&mut client, listener, connection_id).await;
    (client, peer, listener, transport)
}

/// Run `connect` while the next accepted peer sends the connection message.
pub async fn connect_with_peer(
    client: &mut MockClient,
    mut listener: MockListener,
    connection_id: &str,
) -> (MockPeer, MockListener) {
    let connection_id_owned = connection_id.to_string();
    let peer_task = tokio::spawn(async move {
        let mut peer = listener.accept_timeout(WAIT).await.expect("client dialed");
        peer.send_connection(&connection_id_owned)
            .await
            .expect("send connection message");
        (peer, listener)
    });

    let connected = client
        .connect(&CancellationToken::new())
        .await
        .expect("connect succeeds");
    assert_eq!(connected, connection_id);
    peer_task.await.expect("peer task")
}

pub async fn wait_for_status(
    status: &mut watch::Receiver<StreamConnectionStatus>,
    wanted: StreamConnectionStatus,
) {
    tokio::time::timeout(WAIT, status.wait_for(|s| *s == wanted))
        .await
        .expect("status change in time")
        .expect("status channel open");
}
