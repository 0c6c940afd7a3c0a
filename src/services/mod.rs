//! Business logic: push channel client, local fan-out, classification, relay hub.

pub mod auth;
pub mod categorizer;
pub mod channel;
pub mod classifier;
pub mod hub;
pub mod registry;
pub mod sse;

pub use auth::TriggerAuth;
pub use categorizer::HttpCategorizer;
pub use channel::{ChannelLease, ChannelState, EventChannel, HttpPushTransport, ReconnectPolicy, SessionCredentials};
pub use classifier::{Categorizer, ClassificationState, ClassifierPipeline, ClassifierSettings, EventSink};
pub use hub::EventHub;
pub use registry::{Delivery, Subscription, SubscriptionRegistry};
