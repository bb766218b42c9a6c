// ABOUTME: Variable resolution for stack templates.
// ABOUTME: Tiered precedence merge, constraint validation, placeholder substitution.

mod error;
mod resolver;
mod template;

pub use error::{ResolutionError, ResolutionErrors};
pub use resolver::{ResolvedTemplate, ValueTiers, effective_values, resolve};
pub use template::{StackTemplate, VariableKind, VariableSpec};
