//! Part of spbridge, an industrial protocol to [Sparkplug B](https://sparkplug.eclipse.org/) gateway.
//!
//! An [rumqttc] backed implementation of the [spbridge_client::EventLoop], [spbridge_client::Client]
//! and [spbridge_client::Connector] traits.
//!
//! The event loop never reconnects on its own. Connection attempts are requested through the
//! [Connector] returned by the event loop, normally by a [spbridge_client::RetryController].

mod client;
mod options;

pub use client::{Client, Connector, EventLoop};
pub use options::MqttOptions;
