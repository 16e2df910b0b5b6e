//! livecast core - shared types for broadcast scheduling
//!
//! This crate provides the domain types shared between the process-line
//! codec (`livecast-protocol`) and the scheduler daemon (`livecastd`).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod broadcast;
pub mod channel;
pub mod clock;
pub mod error;
pub mod event;
pub mod running;
pub mod shell;

// Re-exports for convenience
pub use broadcast::{flv_output_args, BroadcastId, BroadcastInput, PlannedBroadcast, PrivacyStatus};
pub use channel::{ChannelId, ChannelKind, OutputChannel, PlannedChannel, Platform};
pub use clock::{system_clock, Clock, FixedClock, SharedClock, SystemClock};
pub use error::{BroadcastResult, LiveBroadcastError, OutputError};
pub use event::{ExternalEventId, StreamEvent};
pub use running::RunningBroadcast;
pub use shell::{is_shell_safe, shell_quote};
