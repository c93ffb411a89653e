//! Runtime configuration.

use anyhow::{Context, Result};
use serde::Deserialize;

use flower_addon_core::registration::{SignerLocation, FLOWER_CA_SECRET_NAME, FLOWER_CA_SECRET_NAMESPACE, FLOWER_CA_SIGNER_NAME};
use flower_addon_core::values::{FlowerAddonValues, DEFAULT_IMAGE_PULL_POLICY, DEFAULT_SUPERLINK_ADDRESS, DEFAULT_SUPERLINK_PORT, DEFAULT_SUPERNODE_IMAGE};

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,
    /// The port used for HTTP values, metrics and healthchecks.
    #[serde(default = "Config::default_http_port")]
    pub http_port: u16,

    /// The Kubernetes namespace of the hub in which this manager runs.
    pub namespace: String,
    /// The name of the pod on which this instance is running.
    pub pod_name: String,

    /// The signer name of the flower private CA.
    #[serde(default = "Config::default_signer_name")]
    pub signer_name: String,
    /// The name of the secret holding the CA signing key material.
    #[serde(default = "Config::default_ca_secret_name")]
    pub ca_secret_name: String,
    /// The namespace of the secret holding the CA signing key material.
    #[serde(default = "Config::default_ca_secret_namespace")]
    pub ca_secret_namespace: String,

    /// The SuperLink address rendered for every cluster unless overridden.
    #[serde(default = "Config::default_superlink_address")]
    pub superlink_address: String,
    /// The SuperLink Fleet API port rendered for every cluster unless overridden.
    #[serde(default = "Config::default_superlink_port")]
    pub superlink_port: u16,
    /// The SuperNode image rendered for every cluster unless overridden.
    #[serde(default = "Config::default_supernode_image")]
    pub supernode_image: String,
    /// The image pull policy rendered for every cluster unless overridden.
    #[serde(default = "Config::default_image_pull_policy")]
    pub image_pull_policy: String,

    /// Whether CSRs addressed to the flower signer are approved by this manager.
    #[serde(default = "Config::default_auto_approve_csrs")]
    pub auto_approve_csrs: bool,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Parses the runtime environment of the manager, applying defaults for everything optional.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        envy::from_env().context("error building config from env")
    }

    /// The location of the external signer this manager admits CSRs for.
    pub fn signer_location(&self) -> SignerLocation {
        SignerLocation {
            signer_name: self.signer_name.clone(),
            ca_secret_namespace: self.ca_secret_namespace.clone(),
            ca_secret_name: self.ca_secret_name.clone(),
        }
    }

    /// The default addon values, before any per-cluster layering.
    pub fn default_values(&self) -> FlowerAddonValues {
        FlowerAddonValues {
            super_link_address: self.superlink_address.clone(),
            super_link_port: self.superlink_port,
            image: self.supernode_image.clone(),
            image_pull_policy: self.image_pull_policy.clone(),
            ..Default::default()
        }
    }

    fn default_http_port() -> u16 {
        8080
    }

    fn default_signer_name() -> String {
        FLOWER_CA_SIGNER_NAME.into()
    }

    fn default_ca_secret_name() -> String {
        FLOWER_CA_SECRET_NAME.into()
    }

    fn default_ca_secret_namespace() -> String {
        FLOWER_CA_SECRET_NAMESPACE.into()
    }

    fn default_superlink_address() -> String {
        DEFAULT_SUPERLINK_ADDRESS.into()
    }

    fn default_superlink_port() -> u16 {
        DEFAULT_SUPERLINK_PORT
    }

    fn default_supernode_image() -> String {
        DEFAULT_SUPERNODE_IMAGE.into()
    }

    fn default_image_pull_policy() -> String {
        DEFAULT_IMAGE_PULL_POLICY.into()
    }

    fn default_auto_approve_csrs() -> bool {
        true
    }
}
