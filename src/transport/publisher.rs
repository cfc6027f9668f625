//! Fan-out publisher
//!
//! Binds a TCP listener and forwards every published message to all
//! connected subscribers. Each subscriber has its own bounded queue and
//! writer task; [`Publisher::publish`] only ever `try_send`s into those
//! queues, so a slow or stalled subscriber misses messages instead of
//! slowing the simulation down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::types::{Endpoint, Frame, WireMessage};
use crate::wire::{codec, framing};
use crate::{Result, StreamError};

/// Publisher tuning
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherOptions {
    /// Messages queued per subscriber before newer ones are dropped
    pub send_high_water_mark: usize,
    /// How long `close` waits for queued messages to reach subscribers
    pub linger: Duration,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self { send_high_water_mark: 1000, linger: Duration::from_secs(1) }
    }
}

/// What happened to one published message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Subscribers whose queue accepted the message
    pub delivered: usize,
    /// Subscribers that missed it because their queue was full
    pub dropped: usize,
}

/// Running totals since bind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    /// Messages published while nobody was connected
    pub unheard: u64,
    pub connections: u64,
}

struct Peer {
    addr: SocketAddr,
    tx: mpsc::Sender<Arc<WireMessage>>,
    writer: JoinHandle<()>,
}

/// Bound publishing endpoint
pub struct Publisher {
    endpoint: Endpoint,
    local_addr: SocketAddr,
    peers: Arc<Mutex<Vec<Peer>>>,
    stats: Arc<Mutex<PublishStats>>,
    linger: Duration,
    accept_cancel: CancellationToken,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl Publisher {
    /// Bind to `endpoint` and start accepting subscribers
    ///
    /// # Errors
    ///
    /// [`StreamError::Bind`] if the address is in use or not available.
    pub async fn bind(endpoint: &Endpoint, options: PublisherOptions) -> Result<Self> {
        let listener = TcpListener::bind(endpoint.bind_address())
            .await
            .map_err(|source| StreamError::Bind { endpoint: endpoint.to_string(), source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| StreamError::Bind { endpoint: endpoint.to_string(), source })?;

        let cancel = CancellationToken::new();
        let accept_cancel = cancel.child_token();
        let peers = Arc::new(Mutex::new(Vec::new()));
        let stats = Arc::new(Mutex::new(PublishStats::default()));

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&peers),
            Arc::clone(&stats),
            options.send_high_water_mark.max(1),
            accept_cancel.clone(),
            cancel.clone(),
        ));

        info!(endpoint = %endpoint, %local_addr, "Publisher ready");
        Ok(Self {
            endpoint: endpoint.clone(),
            local_addr,
            peers,
            stats,
            linger: options.linger,
            accept_cancel,
            cancel,
            accept_task: Some(accept_task),
        })
    }

    /// Address the listener actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint this publisher was bound with
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Connected subscribers
    pub fn subscriber_count(&self) -> usize {
        let mut peers = self.peers.lock();
        peers.retain(|peer| !peer.tx.is_closed());
        peers.len()
    }

    /// Totals since bind
    pub fn stats(&self) -> PublishStats {
        *self.stats.lock()
    }

    /// Hand a message to every subscriber; never waits
    ///
    /// With no subscribers the message is dropped. Subscribers whose queue
    /// is full miss this message; disconnected ones are removed.
    pub fn publish(&self, message: WireMessage) -> PublishOutcome {
        let message = Arc::new(message);
        let mut outcome = PublishOutcome::default();

        let mut peers = self.peers.lock();
        peers.retain(|peer| match peer.tx.try_send(Arc::clone(&message)) {
            Ok(()) => {
                outcome.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                trace!(addr = %peer.addr, "Subscriber queue full, dropping message");
                outcome.dropped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(addr = %peer.addr, "Removing disconnected subscriber");
                false
            }
        });
        let connected = peers.len();
        drop(peers);

        let mut stats = self.stats.lock();
        stats.published += 1;
        stats.delivered += outcome.delivered as u64;
        stats.dropped += outcome.dropped as u64;
        if connected == 0 {
            stats.unheard += 1;
        }
        outcome
    }

    /// Encode and publish a frame
    pub fn publish_frame(&self, frame: &Frame) -> Result<PublishOutcome> {
        Ok(self.publish(codec::encode(frame)?))
    }

    /// Stop accepting, flush queued messages for up to the linger time, and
    /// close every connection
    pub async fn close(mut self) {
        self.accept_cancel.cancel();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }

        // Dropping the senders lets each writer finish its queue and exit.
        let peers = std::mem::take(&mut *self.peers.lock());
        let count = peers.len();
        let writers: Vec<JoinHandle<()>> = peers.into_iter().map(|Peer { writer, .. }| writer).collect();

        if tokio::time::timeout(self.linger, futures::future::join_all(writers)).await.is_err() {
            warn!(subscribers = count, linger = ?self.linger, "Linger expired with messages still queued");
        }
        self.cancel.cancel();

        let stats = self.stats();
        info!(
            endpoint = %self.endpoint,
            published = stats.published,
            delivered = stats.delivered,
            dropped = stats.dropped,
            "Publisher closed"
        );
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    peers: Arc<Mutex<Vec<Peer>>>,
    stats: Arc<Mutex<PublishStats>>,
    high_water_mark: usize,
    accept_cancel: CancellationToken,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = accept_cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%addr, "Failed to set TCP_NODELAY: {}", e);
                }
                let (tx, rx) = mpsc::channel(high_water_mark);
                let writer = tokio::spawn(writer_loop(stream, addr, rx, cancel.clone()));
                peers.lock().push(Peer { addr, tx, writer });
                stats.lock().connections += 1;
                info!(%addr, "Subscriber connected");
            }
            Err(e) => {
                warn!("Failed to accept subscriber: {}", e);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
    debug!("Accept loop stopped");
}

async fn writer_loop(
    stream: TcpStream,
    addr: SocketAddr,
    mut rx: mpsc::Receiver<Arc<WireMessage>>,
    cancel: CancellationToken,
) {
    let mut writer = BufWriter::new(stream);

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return,
            message = rx.recv() => message,
        };
        let Some(message) = message else {
            // Publisher closed; everything queued has been written.
            let _ = writer.shutdown().await;
            debug!(%addr, "Subscriber connection closed");
            return;
        };

        let written = tokio::select! {
            _ = cancel.cancelled() => return,
            written = async {
                framing::write_message(&mut writer, &message).await?;
                // Batch the flush while more messages are waiting.
                if rx.is_empty() {
                    writer.flush().await.map_err(|e| StreamError::io("flushing to subscriber", e))?;
                }
                Ok::<_, StreamError>(())
            } => written,
        };

        if let Err(e) = written {
            info!(%addr, "Subscriber disconnected: {}", e);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_frame;
    use std::time::Instant;
    use tokio::io::AsyncReadExt;

    fn loopback() -> Endpoint {
        Endpoint::new("127.0.0.1", 0)
    }

    async fn wait_for_subscribers(publisher: &Publisher, count: usize) {
        for _ in 0..200 {
            if publisher.subscriber_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} subscribers, have {}", count, publisher.subscriber_count());
    }

    #[tokio::test]
    async fn publish_without_subscribers_returns_immediately() {
        let publisher = Publisher::bind(&loopback(), PublisherOptions::default()).await.unwrap();
        let frame = sample_frame(800, 600, 0);

        let start = Instant::now();
        for _ in 0..100 {
            let outcome = publisher.publish_frame(&frame).unwrap();
            assert_eq!(outcome, PublishOutcome::default());
        }
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(publisher.stats().unheard, 100);
        publisher.close().await;
    }

    #[tokio::test]
    async fn second_bind_on_same_port_fails() {
        let first = Publisher::bind(&loopback(), PublisherOptions::default()).await.unwrap();
        let taken = Endpoint::new("127.0.0.1", first.local_addr().port());

        let err = Publisher::bind(&taken, PublisherOptions::default()).await.err().unwrap();
        assert!(matches!(err, StreamError::Bind { .. }));
        first.close().await;
    }

    #[tokio::test]
    async fn raw_bytes_on_the_wire() {
        let publisher = Publisher::bind(&loopback(), PublisherOptions::default()).await.unwrap();
        let mut client = TcpStream::connect(publisher.local_addr()).await.unwrap();
        wait_for_subscribers(&publisher, 1).await;

        let outcome = publisher.publish(WireMessage::new(b"{}".to_vec(), vec![9u8; 3]));
        assert_eq!(outcome.delivered, 1);

        let mut buf = [0u8; 15];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..7], &[framing::FLAG_MORE, 0, 0, 0, 2, b'{', b'}']);
        assert_eq!(&buf[7..], &[0, 0, 0, 0, 3, 9, 9, 9]);
        publisher.close().await;
    }

    #[tokio::test]
    async fn stalled_subscriber_drops_instead_of_blocking() {
        let options = PublisherOptions { send_high_water_mark: 2, linger: Duration::from_millis(50) };
        let publisher = Publisher::bind(&loopback(), options).await.unwrap();
        // Connected but never reads.
        let _client = TcpStream::connect(publisher.local_addr()).await.unwrap();
        wait_for_subscribers(&publisher, 1).await;

        let frame = sample_frame(800, 600, 0);
        let start = Instant::now();
        let mut dropped = 0;
        for _ in 0..200 {
            dropped += publisher.publish_frame(&frame).unwrap().dropped;
        }
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(dropped > 0);
        assert_eq!(publisher.stats().dropped, dropped as u64);
        publisher.close().await;
    }

    #[tokio::test]
    async fn disconnected_subscriber_is_pruned() {
        let publisher = Publisher::bind(&loopback(), PublisherOptions::default()).await.unwrap();
        let client = TcpStream::connect(publisher.local_addr()).await.unwrap();
        wait_for_subscribers(&publisher, 1).await;
        drop(client);

        // The writer notices the reset once it tries to write.
        let frame = sample_frame(64, 64, 0);
        for _ in 0..200 {
            publisher.publish_frame(&frame).unwrap();
            if publisher.subscriber_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(publisher.subscriber_count(), 0);
        publisher.close().await;
    }

    #[tokio::test]
    async fn close_flushes_queued_messages_and_ends_stream() {
        let publisher = Publisher::bind(&loopback(), PublisherOptions::default()).await.unwrap();
        let mut client = TcpStream::connect(publisher.local_addr()).await.unwrap();
        wait_for_subscribers(&publisher, 1).await;

        for _ in 0..3 {
            publisher.publish(WireMessage::new(b"m".to_vec(), b"p".to_vec()));
        }
        publisher.close().await;

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), 3 * (2 * framing::PART_HEADER_LEN + 2));
    }
}
