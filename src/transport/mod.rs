//! Pub/sub transport over TCP
//!
//! One [`Publisher`] binds an endpoint; any number of [`Subscriber`]s connect
//! to it, before or after it starts. Messages use the multipart framing from
//! [`crate::wire::framing`]. Delivery is best-effort: a subscriber that falls
//! behind misses messages rather than holding the publisher back.

pub mod publisher;
pub mod subscriber;

pub use publisher::{PublishOutcome, PublishStats, Publisher, PublisherOptions};
pub use subscriber::{SubscribeStats, Subscriber, SubscriberOptions};
