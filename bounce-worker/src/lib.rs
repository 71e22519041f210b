//! Bounce worker - classifies MTA bounce events and notifies mailing platforms.
//!
//! This library provides the modules behind the `bounce-worker` binary:
//! - `classify`: which bounce categories are handled, and which are soft
//! - `dispatch`: routing by original sender to the platform APIs
//! - `stats`: counters in a round-robin store
//! - `logging`: timestamped log sinks and the tracing bridge
//!
//! ## Architecture
//!
//! ```text
//! MTA pipe → BounceEvent → DispatchRouter → MailWizz / Interspire
//!                                  ↓
//!                        StatsRecorder + stats log
//! ```

pub mod classify;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod logging;
pub mod probe;
pub mod stats;

// Re-export commonly used types
pub use classify::{BounceCategory, BounceClassifier, BounceType};
pub use config::Config;
pub use dispatch::{
    Destination, DestinationSettings, DispatchReport, DispatchRouter, FormDestination,
    SenderCounter, XmlDestination,
};
pub use event::BounceEvent;
pub use logging::{LogMode, LogSink};
pub use probe::EndpointProbe;
pub use stats::{StatsRecorder, StoreLayout};
