// ABOUTME: Core identifier and value types shared across the crate.
// ABOUTME: Phantom-typed ids, validated stack names, and version comparison.

mod id;
mod stack_name;
mod version;

pub use id::{
    DeploymentId, EnvironmentId, Id, ProductDeploymentId, ProductGroupId, ProductId, StackId,
};
pub use stack_name::{StackName, StackNameError};
pub use version::{SemVer, VersionRelation, compare, parse_semver};
