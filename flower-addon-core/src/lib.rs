pub mod crd;
pub mod error;
pub mod partition;
pub mod registration;
pub mod values;

pub use error::{AppError, AppResult};

/// The name of the flower addon, as registered with the hub's addon framework.
pub const ADDON_NAME: &str = "flower-addon";

/// The namespace into which the addon agent is installed on member clusters.
pub const AGENT_INSTALL_NAMESPACE: &str = "flower-addon";
