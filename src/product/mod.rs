// ABOUTME: Product deployment aggregate and the sequential orchestrator.
// ABOUTME: Exports the aggregate, commands, outcomes, guard, and error types.

mod error;
mod guard;
mod orchestrator;
mod product;

pub use error::{OrchestrationError, OrchestrationErrorKind, ProductError};
pub use guard::{ActiveGuard, GuardHeld, GuardInfo, GuardRegistry};
pub use orchestrator::{
    DeployProductCommand, ProductOperationOutcome, ProductOrchestrator, StackConfig, StackOutcome,
    StackOutcomeKind, UpgradeProductCommand,
};
pub use product::{
    ProductDeployment, ProductDeploymentStatus, StackDeploymentEntry, StackEntryStatus, StackSeed,
};
