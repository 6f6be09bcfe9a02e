//! spbridge bridges industrial field devices to a [Sparkplug B](https://sparkplug.eclipse.org/)
//! MQTT broker.
//!
//! Field adapters report sampled tag values to a single edge node which owns the Sparkplug device
//! lifecycle, publishes each metric on its own interval and buffers data while the broker is
//! unreachable.
//!
//! The library re-exports the workspace crates:
//!
//! - [node]: the bridge itself, its registry and the offline log
//! - [client]: transport traits, the retry controller and the rumqtt implementation
//! - [types]: Sparkplug B payload, topic and naming utilities
//!
//! and provides the pieces of the `spbridge` gateway binary: [config], [adapters] and
//! [supervisor].

pub use spbridge_node as node;
pub use spbridge_types as types;
pub mod client {
    pub use spbridge_client::*;

    pub mod mqtt_client {
        pub use spbridge_client_rumqtt as rumqtt;
    }
}

pub mod adapters;
pub mod config;
pub mod supervisor;
