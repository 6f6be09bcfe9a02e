//! Part of spbridge, an industrial protocol to [Sparkplug B](https://sparkplug.eclipse.org/) gateway.
//!
//! Payload, topic and naming types shared by the client and node crates.

pub mod constants;

mod generated {
    pub(crate) mod sparkplug_payload;
}

/// generated types
pub mod payload;

pub mod topic;

pub mod utils;
