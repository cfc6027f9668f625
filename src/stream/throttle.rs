//! Stream throttling utilities

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// Extension trait to add throttling to any Stream
pub trait ThrottleExt: Stream {
    /// Throttle the stream to emit at most once per interval
    ///
    /// Uses "latest-wins" semantics - if multiple items arrive
    /// during an interval, only the latest is emitted.
    fn throttle(self, duration: Duration) -> Throttle<Self>
    where
        Self: Sized,
    {
        Throttle::new(self, duration)
    }
}

impl<T: Stream> ThrottleExt for T {}

pin_project! {
    /// A stream combinator that throttles emission rate
    pub struct Throttle<S: Stream> {
        #[pin]
        stream: S,
        interval: Interval,
        pending: Option<S::Item>,
        // An interval tick arrived while nothing was pending.
        ticked: bool,
        done: bool,
    }
}

impl<S: Stream> Throttle<S> {
    /// Create a new throttled stream
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(stream: S, duration: Duration) -> Self {
        let mut interval = interval(duration);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self { stream, interval, pending: None, ticked: false, done: false }
    }
}

impl<S: Stream> Stream for Throttle<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        // Drain everything available, keeping only the latest
        while !*this.done {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.pending = Some(item),
                Poll::Ready(None) => *this.done = true,
                Poll::Pending => break,
            }
        }

        if *this.done {
            // Flush the last item, then end.
            return Poll::Ready(this.pending.take());
        }

        if !*this.ticked && this.interval.poll_tick(cx).is_ready() {
            *this.ticked = true;
        }

        if *this.ticked && this.pending.is_some() {
            *this.ticked = false;
            return Poll::Ready(this.pending.take());
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::channel::mpsc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_latest() {
        let mut throttled = futures::stream::iter(1..=5).throttle(Duration::from_millis(100));
        assert_eq!(throttled.next().await, Some(5));
        assert_eq!(throttled.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn emits_at_most_once_per_interval() {
        let (tx, rx) = mpsc::unbounded();
        let mut throttled = rx.throttle(Duration::from_millis(100));

        for i in 1..=3 {
            tx.unbounded_send(i).unwrap();
        }
        assert_eq!(throttled.next().await, Some(3));

        let start = Instant::now();
        tx.unbounded_send(4).unwrap();
        tx.unbounded_send(5).unwrap();
        assert_eq!(throttled.next().await, Some(5));
        assert!(start.elapsed() >= Duration::from_millis(99));

        drop(tx);
        assert_eq!(throttled.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_source_does_not_end_the_stream() {
        let (tx, rx) = mpsc::unbounded();
        let mut throttled = rx.throttle(Duration::from_millis(50));

        let idle = tokio::time::timeout(Duration::from_millis(500), throttled.next()).await;
        assert!(idle.is_err(), "stream must stay open while the source is idle");

        tx.unbounded_send(7).unwrap();
        assert_eq!(throttled.next().await, Some(7));
    }
}
