//! Part of spbridge, an industrial protocol to [Sparkplug B](https://sparkplug.eclipse.org/) gateway.
//!
//! The bridge presents every field device reported to it as a Sparkplug device under a single
//! edge node. It owns the device and metric registry, issues NBIRTH/DBIRTH/DDATA/DDEATH messages,
//! publishes each metric on its own interval and buffers data in an [OfflineLog] while the
//! broker is unreachable, replaying it once the session is re-established.
//!
//! See [BridgeBuilder] on how to create a [Bridge].

mod bridge;
mod builder;
mod engine;
mod error;
mod handle;
pub mod offline;
mod registry;

pub use bridge::Bridge;
pub use builder::{BridgeBuilder, BridgeConfig};
pub use error::{BuildError, HandleError, StoreError};
pub use handle::BridgeHandle;
pub use offline::{
    DynMessageStore, MemoryStore, MessageStore, OfflineLog, OutboundMessage, RedbStore,
    StoredMessage,
};
pub use registry::{DeviceStatus, DeviceSummary, MetricSnapshot};
