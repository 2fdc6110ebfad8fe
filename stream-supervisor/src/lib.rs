//! Stream supervisor for live camera viewing.
//!
//! Turns RTSP camera feeds into browser-playable HLS by running one ffmpeg
//! process per stream id and keeping it alive. It handles:
//!
//! - **Launching**: idempotent start, credential-safe command lines, early
//!   failure detection with the transcoder's own stderr as the reason
//! - **Health**: a periodic check of process liveness and manifest freshness
//! - **Recovery**: bounded, delayed relaunch of dead or wedged transcoders
//! - **Cleanup**: removal of aged output from streams no longer running
//!
//! # Architecture
//!
//! ```text
//! Browser <--HLS files-- output_root/<id>/ <--ffmpeg-- RTSP camera
//!                             ^
//!        request layer --> Supervisor --> health monitor / janitor
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use stream_supervisor::{Credentials, StreamSpec, Supervisor, SupervisorConfig};
//! use std::path::PathBuf;
//!
//! let supervisor = Supervisor::new(SupervisorConfig::new(PathBuf::from("/tmp/hls")))?;
//! supervisor.spawn_health_monitor();
//! supervisor.spawn_janitor();
//!
//! let outcome = supervisor
//!     .start(StreamSpec::new("cam1_p0", "rtsp://10.0.0.5/ch1")
//!         .with_credentials(Credentials::new("admin", "secret")))
//!     .await?;
//! println!("Playlist: {}", outcome.playlist_url);
//!
//! // On exit
//! supervisor.shutdown().await;
//! ```
//!
//! # Output layout
//!
//! | Path | Description |
//! |------|-------------|
//! | `<output_root>/<id>/stream.m3u8` | Live playlist, rewritten every chunk |
//! | `<output_root>/<id>/segment_NNNNN.ts` | Rolling 2-second chunks |

pub mod command;
pub mod config;
pub mod credentials;
pub mod diagnostics;
pub mod error;
pub mod health;
mod janitor;
pub mod launcher;
pub mod quality;
mod recovery;
pub mod registry;
mod supervisor;
pub mod terminate;

pub use config::{StreamSpec, SupervisorConfig};
pub use credentials::Credentials;
pub use error::{ConfigError, SupervisorError};
pub use health::{HealthReport, StreamHealth};
pub use launcher::StartOutcome;
pub use quality::QualityProfile;
pub use registry::{StreamRegistry, StreamStatus};
pub use supervisor::Supervisor;
