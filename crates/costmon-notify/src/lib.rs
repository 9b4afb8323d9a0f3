//! Fan-out of monitoring events to in-process subscribers.
//!
//! Every subscriber owns a bounded queue. [`broadcaster::NotificationBroadcaster`]
//! delivers with a non-blocking send over a snapshot of the subscriber set, so
//! a slow consumer only loses its own events and never stalls the monitoring
//! loop. Closed subscribers are pruned on the next broadcast.

pub mod broadcaster;
pub mod routing;


pub use broadcaster::{DeliveryReport, NotificationBroadcaster, Subscription};
pub use routing::SeverityRoute;
