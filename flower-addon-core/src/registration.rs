//! Registration policy for clusters joining the flower addon fleet.
//!
//! A joining cluster presents a certificate signing request addressed to the flower private CA
//! signer. This module decides what that request must look like and whether a presented request
//! may proceed toward signing. Signing itself belongs to the external signer controller, which
//! only learns from this module *which* signer name and CA secret it must react to.
//!
//! Admission is intentionally limited to a signer name check. Trust in the identity of the
//! requester is established by the hub's control plane before a request can reach this policy,
//! so the request payload is not inspected.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// The signer name of the flower private CA.
pub const FLOWER_CA_SIGNER_NAME: &str = "flower.io/flower-ca";
/// The name of the secret holding the flower CA signing key material.
pub const FLOWER_CA_SECRET_NAME: &str = "flower-ca-signing-secret";
/// The namespace of the secret holding the flower CA signing key material.
pub const FLOWER_CA_SECRET_NAMESPACE: &str = "open-cluster-management";
/// The prefix of the subject user of a flower cluster's certificate.
pub const SUBJECT_USER_PREFIX: &str = "system:flower:cluster:";
/// The group carried by the certificates of all flower clusters.
pub const FLOWER_CLUSTERS_GROUP: &str = "system:flower:clusters";

/// The subject a cluster's certificate is requested for.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct CsrSubject {
    pub user: String,
    pub groups: Vec<String>,
}

/// The CSR parameters a joining cluster must present.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct CsrRequestSpec {
    pub signer_name: String,
    pub subject: CsrSubject,
}

/// The outcome of evaluating a CSR against the registration policy.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionDecision {
    /// Whether the CSR may proceed toward signing.
    pub approved: bool,
    /// The signer name the CSR was evaluated against.
    pub signer_name: String,
}

/// The location of the external signer and its CA key material.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignerLocation {
    pub signer_name: String,
    pub ca_secret_namespace: String,
    pub ca_secret_name: String,
}

impl Default for SignerLocation {
    fn default() -> Self {
        Self {
            signer_name: FLOWER_CA_SIGNER_NAME.into(),
            ca_secret_namespace: FLOWER_CA_SECRET_NAMESPACE.into(),
            ca_secret_name: FLOWER_CA_SECRET_NAME.into(),
        }
    }
}

/// Decide whether a presented CSR may proceed toward signing.
pub trait CsrAdmission {
    /// Evaluate a CSR by its declared signer name and raw request payload.
    fn admit(&self, signer_name: &str, payload: &[u8]) -> AdmissionDecision;
}

/// Describe the external authority which performs the actual signing.
///
/// Implementors never sign anything themselves.
pub trait SignerDescriptor {
    fn signer_identity(&self) -> SignerLocation;
}

/// The flower addon registration policy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistrationPolicy {
    signer: SignerLocation,
}

impl RegistrationPolicy {
    /// Create a new instance bound to the given signer.
    pub fn new(signer: SignerLocation) -> Self {
        Self { signer }
    }

    /// Build the CSR parameters the given cluster must present.
    ///
    /// The output depends only on the cluster name, so a cluster retrying registration always
    /// presents an identical request.
    pub fn build_csr_spec(&self, cluster_name: &str) -> AppResult<CsrRequestSpec> {
        if cluster_name.is_empty() {
            return Err(AppError::InvalidInput("cluster name of a CSR subject must not be empty".into()));
        }
        Ok(CsrRequestSpec {
            signer_name: self.signer.signer_name.clone(),
            subject: CsrSubject {
                user: format!("{}{}", SUBJECT_USER_PREFIX, cluster_name),
                groups: vec![FLOWER_CLUSTERS_GROUP.into()],
            },
        })
    }
}

impl CsrAdmission for RegistrationPolicy {
    fn admit(&self, signer_name: &str, _payload: &[u8]) -> AdmissionDecision {
        let approved = signer_name == self.signer.signer_name;
        if !approved {
            tracing::debug!(signer_name, expected = %self.signer.signer_name, "rejecting CSR for foreign signer");
        }
        AdmissionDecision {
            approved,
            signer_name: self.signer.signer_name.clone(),
        }
    }
}

impl SignerDescriptor for RegistrationPolicy {
    fn signer_identity(&self) -> SignerLocation {
        self.signer.clone()
    }
}
