pub mod config;
pub mod error;
pub mod jira;
pub mod model;
pub mod net;
pub mod run;
pub mod sink;
pub mod source;

pub use config::{load_config, BranchMode, CollectOptions, EtlConfig, SourceKind};
pub use error::{ErrorKind, EtlError, EtlResult};
pub use model::*;
pub use run::{Orchestrator, RunOutcome};
