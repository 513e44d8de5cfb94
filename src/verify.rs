//! Post-remediation verification of the target service.

pub mod container;
pub mod probe;
pub mod stability;

pub use container::{ContainerIdentity, ContainerInspector, DockerInspector};
pub use probe::{HealthProbe, HttpHealthProbe, ProbeResponse};
pub use stability::{StabilityVerifier, VerificationResult, VerificationSettings};
