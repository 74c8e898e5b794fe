//! Common types for readygate: errors, configuration, selectors and telemetry

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod leader_election;
pub mod metrics;
pub mod selector;
pub mod telemetry;

pub use config::{HandlerConfig, ValidatedConfig, WorkloadWatch};
pub use error::Error;
pub use selector::NodeSelector;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Key namespace reserved for taints owned by readygate
pub const TAINT_KEY_PREFIX: &str = "readygate.dev";

/// Effect applied to every managed taint
pub const TAINT_EFFECT_NO_SCHEDULE: &str = "NoSchedule";

/// Node annotation recording when the node first carried no managed taints
pub const FIRST_READY_ANNOTATION: &str = "readygate.dev/first-time-ready";

/// Field manager and event reporting component name
pub const FIELD_MANAGER: &str = "readygate";

/// Default path of the handler configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/readygate/config.yaml";
