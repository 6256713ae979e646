//! On-disk state: diagnostic artifacts, the heartbeat file and the pattern log

pub mod artifacts;
pub mod heartbeat;
pub mod patterns;

pub use artifacts::{ArtifactPaths, ArtifactStore};
pub use heartbeat::{Heartbeat, HeartbeatRecord, HeartbeatStatus};
pub use patterns::{PatternEvent, PatternKind, PatternLog};
