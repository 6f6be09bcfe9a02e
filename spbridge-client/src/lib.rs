//! Part of spbridge, an industrial protocol to [Sparkplug B](https://sparkplug.eclipse.org/) gateway.
//!
//! This library defines the traits and types used to implement broker transports, along with
//! the [RetryController] every long lived connection in the gateway is wrapped in.
//!
//! # Feature Flags
//!
//! - `channel-client`: Enables the channel based [EventLoop] and [Client] implementation. Disabled by default.
//!

mod retry;
mod traits;
mod types;
mod utils;

pub use retry::{ConnectionState, RetryConfig, RetryController, RetryPhase};
pub use traits::{Client, Connector, DynClient, DynConnector, DynEventLoop, EventLoop};
pub use types::*;
pub use utils::topic_and_payload_to_event;

/// A basic [EventLoop] and [Client] implementation based on channels
///
/// Useful for writing tests where it is not appropriate to be running a real MQTT client and broker setup
#[cfg(any(feature = "channel-client", doc))]
pub mod channel;
