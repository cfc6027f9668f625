//! Reconnecting subscriber
//!
//! Connects to a publisher and yields complete two-part messages. The
//! publisher may start after the subscriber, restart, or drop the connection;
//! the subscriber keeps retrying every `reconnect_interval` and never
//! surfaces connection loss to its caller.

use std::io::ErrorKind;
use std::time::Duration;

use futures::Stream;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

use crate::types::{Endpoint, Frame, WireMessage};
use crate::wire::{codec, framing};
use crate::{Result, StreamError};

/// Subscriber tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberOptions {
    /// Pause between connection attempts
    pub reconnect_interval: Duration,
    /// Largest accepted message part; bigger parts drop the connection
    pub max_part_bytes: usize,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self { reconnect_interval: Duration::from_millis(100), max_part_bytes: 64 * 1024 * 1024 }
    }
}

/// Running totals since connect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeStats {
    /// Messages handed to the caller
    pub received: u64,
    /// Messages skipped by the prefix filter
    pub filtered: u64,
    /// Successful reconnections after a lost connection
    pub reconnects: u64,
    /// Connections dropped because of protocol violations
    pub protocol_errors: u64,
}

/// Connection to a publisher
pub struct Subscriber {
    endpoint: Endpoint,
    address: String,
    options: SubscriberOptions,
    reader: Option<BufReader<TcpStream>>,
    prefix: Vec<u8>,
    connected_once: bool,
    stats: SubscribeStats,
}

fn is_transient(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut
            | ErrorKind::NotConnected
    )
}

impl Subscriber {
    /// Connect to `endpoint`
    ///
    /// A publisher that is not up yet is not an error: the subscriber stays
    /// disconnected and retries from [`Subscriber::receive`].
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidEndpoint`] for a wildcard host and
    /// [`StreamError::Connect`] when the host cannot be reached at all.
    pub async fn connect(endpoint: &Endpoint, options: SubscriberOptions) -> Result<Self> {
        let address = endpoint.connect_address()?;
        let mut subscriber = Self {
            endpoint: endpoint.clone(),
            address,
            options,
            reader: None,
            prefix: Vec::new(),
            connected_once: false,
            stats: SubscribeStats::default(),
        };

        match TcpStream::connect(&subscriber.address).await {
            Ok(stream) => subscriber.attach(stream),
            Err(e) if is_transient(&e) => {
                info!(endpoint = %endpoint, "Publisher not reachable yet ({}), will keep retrying", e);
            }
            Err(source) => return Err(StreamError::Connect { endpoint: endpoint.to_string(), source }),
        }
        Ok(subscriber)
    }

    /// Only receive messages whose metadata part starts with `prefix`
    ///
    /// The empty prefix, the default, receives everything.
    pub fn subscribe(&mut self, prefix: impl Into<Vec<u8>>) {
        self.prefix = prefix.into();
    }

    /// Whether a connection is currently open
    pub fn is_connected(&self) -> bool {
        self.reader.is_some()
    }

    /// Endpoint this subscriber connects to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Totals since connect
    pub fn stats(&self) -> SubscribeStats {
        self.stats
    }

    fn attach(&mut self, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }
        if self.connected_once {
            self.stats.reconnects += 1;
        }
        self.connected_once = true;
        self.reader = Some(BufReader::new(stream));
        info!(endpoint = %self.endpoint, "Subscriber connected");
    }

    /// Forget the current connection and wait before the next attempt
    async fn drop_connection(&mut self) {
        self.reader = None;
        tokio::time::sleep(self.options.reconnect_interval).await;
    }

    async fn reconnect(&mut self) {
        loop {
            match TcpStream::connect(&self.address).await {
                Ok(stream) => {
                    self.attach(stream);
                    return;
                }
                Err(e) => {
                    trace!(endpoint = %self.endpoint, "Connect attempt failed: {}", e);
                    tokio::time::sleep(self.options.reconnect_interval).await;
                }
            }
        }
    }

    /// Wait for the next complete message
    ///
    /// Connection loss and protocol violations are logged and followed by a
    /// reconnect. The only error returned is a per-message decode error for a
    /// message with the wrong number of parts.
    ///
    /// Not cancel-safe: a receive abandoned mid-message leaves the connection
    /// out of step, so drop the subscriber after cancelling.
    pub async fn receive(&mut self) -> Result<WireMessage> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                self.reconnect().await;
                continue;
            };

            match framing::read_parts(reader, self.options.max_part_bytes).await {
                Ok(Some(parts)) => {
                    if !parts.first().is_some_and(|metadata| metadata.starts_with(&self.prefix)) {
                        self.stats.filtered += 1;
                        continue;
                    }
                    self.stats.received += 1;
                    return framing::message_from_parts(parts);
                }
                Ok(None) => {
                    info!(endpoint = %self.endpoint, "Publisher closed the connection, reconnecting");
                    self.drop_connection().await;
                }
                Err(e) => {
                    if matches!(e, StreamError::Protocol { .. }) {
                        self.stats.protocol_errors += 1;
                    }
                    warn!(endpoint = %self.endpoint, "Dropping connection: {}", e);
                    self.drop_connection().await;
                }
            }
        }
    }

    /// Receive and decode the next frame, skipping malformed messages
    pub async fn next_frame(&mut self) -> Frame {
        loop {
            match self.receive().await.and_then(|message| codec::decode(&message)) {
                Ok(frame) => return frame,
                Err(e) if e.is_per_message() => warn!("Skipping malformed frame message: {}", e),
                Err(e) => error!("Unexpected receive error: {}", e),
            }
        }
    }

    /// Endless stream of decoded frames
    pub fn frames(self) -> impl Stream<Item = Frame> + Send {
        futures::stream::unfold(self, |mut subscriber| async move {
            let frame = subscriber.next_frame().await;
            Some((frame, subscriber))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_frame;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn fast() -> SubscriberOptions {
        SubscriberOptions { reconnect_interval: Duration::from_millis(10), max_part_bytes: 1 << 20 }
    }

    async fn listener() -> (TcpListener, Endpoint) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, Endpoint::new("127.0.0.1", port))
    }

    async fn send(stream: &mut TcpStream, parts: &[&[u8]]) {
        framing::write_parts(stream, parts).await.unwrap();
        stream.flush().await.unwrap();
    }

    #[tokio::test]
    async fn wildcard_endpoint_is_rejected() {
        let err = Subscriber::connect(&Endpoint::default_bind(), fast()).await.err().unwrap();
        assert!(matches!(err, StreamError::InvalidEndpoint { .. }));
    }

    #[tokio::test]
    async fn receives_frames_and_skips_malformed_ones() {
        let (listener, endpoint) = listener().await;
        let mut subscriber = Subscriber::connect(&endpoint, fast()).await.unwrap();
        let (mut stream, _) = listener.accept().await.unwrap();

        let good = codec::encode(&sample_frame(4, 3, 10)).unwrap();
        send(&mut stream, &[br#"{"width":4,"height":3,"frame_index":9}"#.as_slice(), [0u8; 5].as_slice()]).await;
        send(&mut stream, &[b"only one part".as_slice()]).await;
        send(&mut stream, &[good.metadata.as_slice(), &good.payload[..]]).await;

        let frame = subscriber.next_frame().await;
        assert_eq!(frame.frame_index(), 10);
        assert_eq!(frame, sample_frame(4, 3, 10));
        assert_eq!(subscriber.stats().received, 3);
    }

    #[tokio::test]
    async fn wrong_part_count_is_a_per_message_error() {
        let (listener, endpoint) = listener().await;
        let mut subscriber = Subscriber::connect(&endpoint, fast()).await.unwrap();
        let (mut stream, _) = listener.accept().await.unwrap();

        send(&mut stream, &[b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]).await;
        assert!(subscriber.receive().await.unwrap_err().is_per_message());
        assert!(subscriber.is_connected());
    }

    #[tokio::test]
    async fn prefix_filter_skips_other_topics() {
        let (listener, endpoint) = listener().await;
        let mut subscriber = Subscriber::connect(&endpoint, fast()).await.unwrap();
        subscriber.subscribe(br#"{"width":8"#.to_vec());
        let (mut stream, _) = listener.accept().await.unwrap();

        let small = codec::encode(&sample_frame(4, 4, 1)).unwrap();
        let wide = codec::encode(&sample_frame(8, 2, 2)).unwrap();
        send(&mut stream, &[small.metadata.as_slice(), &small.payload[..]]).await;
        send(&mut stream, &[wide.metadata.as_slice(), &wide.payload[..]]).await;

        assert_eq!(subscriber.next_frame().await.frame_index(), 2);
        assert_eq!(subscriber.stats().filtered, 1);
    }

    #[tokio::test]
    async fn connects_before_publisher_exists() {
        // Reserve a port, then free it so nothing is listening yet.
        let (listener, endpoint) = listener().await;
        drop(listener);

        let mut subscriber = Subscriber::connect(&endpoint, fast()).await.unwrap();
        assert!(!subscriber.is_connected());

        let addr = endpoint.connect_address().unwrap();
        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let listener = TcpListener::bind(addr).await.unwrap();
            let (mut stream, _) = listener.accept().await.unwrap();
            let message = codec::encode(&sample_frame(2, 2, 5)).unwrap();
            send(&mut stream, &[message.metadata.as_slice(), &message.payload[..]]).await;
            stream
        });

        let frame = tokio::time::timeout(Duration::from_secs(5), subscriber.next_frame()).await.unwrap();
        assert_eq!(frame.frame_index(), 5);
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn oversized_part_drops_connection_and_reconnects() {
        let (listener, endpoint) = listener().await;
        let options = SubscriberOptions { max_part_bytes: 64, ..fast() };
        let mut subscriber = Subscriber::connect(&endpoint, options).await.unwrap();

        let (mut first, _) = listener.accept().await.unwrap();
        send(&mut first, &[b"{}".as_slice(), [0u8; 128].as_slice()]).await;

        let server = tokio::spawn(async move {
            let (mut second, _) = listener.accept().await.unwrap();
            let message = codec::encode(&sample_frame(2, 2, 6)).unwrap();
            send(&mut second, &[message.metadata.as_slice(), &message.payload[..]]).await;
            (first, second)
        });

        let frame = tokio::time::timeout(Duration::from_secs(5), subscriber.next_frame()).await.unwrap();
        assert_eq!(frame.frame_index(), 6);
        assert_eq!(subscriber.stats().protocol_errors, 1);
        assert_eq!(subscriber.stats().reconnects, 1);
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn closed_connections_are_retried_at_the_reconnect_interval() {
        let (listener, endpoint) = listener().await;
        // Accept and hang up straight away, forever.
        let server = tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                drop(stream);
            }
        });

        let options = SubscriberOptions { reconnect_interval: Duration::from_millis(50), ..fast() };
        let mut subscriber = Subscriber::connect(&endpoint, options).await.unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(300), subscriber.next_frame()).await;
        server.abort();

        assert!(waited.is_err());
        let reconnects = subscriber.stats().reconnects;
        assert!(reconnects >= 1, "never reconnected");
        assert!(reconnects <= 8, "reconnected {} times in 300ms", reconnects);
    }

    #[tokio::test]
    async fn frames_stream_yields_in_order() {
        use futures::StreamExt;

        let (listener, endpoint) = listener().await;
        let subscriber = Subscriber::connect(&endpoint, fast()).await.unwrap();
        let (mut stream, _) = listener.accept().await.unwrap();
        for index in 0..3 {
            let message = codec::encode(&sample_frame(2, 2, index)).unwrap();
            send(&mut stream, &[message.metadata.as_slice(), &message.payload[..]]).await;
        }

        let frames: Vec<u64> =
            subscriber.frames().take(3).map(|frame| frame.frame_index()).collect().await;
        assert_eq!(frames, vec![0, 1, 2]);
    }
}
