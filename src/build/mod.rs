//! Graph building: configuration, coordination and reporting

mod cancel;
mod config;
mod coordinator;
mod error;
mod lock;
mod report;

pub use cancel::CancellationToken;
pub use config::{BuildConfig, ConfigError};
pub use coordinator::GraphBuildCoordinator;
pub use error::{BuildError, BuildFailure, BuildStage};
pub use lock::GraphLocks;
pub use report::{BuildReport, GraphStats, GraphValidation, LeveledNode, ReembedReport};
