// ABOUTME: Stack template and variable specification types.
// ABOUTME: Templates carry compose-like content plus typed variable declarations.

use serde::{Deserialize, Serialize};

/// Declared type of a stack variable. Values are always carried as strings;
/// the kind constrains what the string must parse as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    #[default]
    String,
    Integer,
    Boolean,
    Number,
}

/// Declaration of one variable in a stack template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,

    #[serde(default)]
    pub default: Option<String>,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub kind: VariableKind,

    /// Regex the value must fully match, if set.
    #[serde(default)]
    pub pattern: Option<String>,

    /// Lower bound for integer/number kinds.
    #[serde(default)]
    pub min: Option<f64>,

    /// Upper bound for integer/number kinds.
    #[serde(default)]
    pub max: Option<f64>,
}

impl VariableSpec {
    /// A plain optional string variable with no constraints.
    pub fn plain(name: &str) -> Self {
        Self {
            name: name.to_string(),
            default: None,
            required: false,
            kind: VariableKind::String,
            pattern: None,
            min: None,
            max: None,
        }
    }

    pub fn with_default(mut self, value: &str) -> Self {
        self.default = Some(value.to_string());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn kind(mut self, kind: VariableKind) -> Self {
        self.kind = kind;
        self
    }
}

/// A deployable stack template: compose-like content with `${VAR}` placeholders
/// plus the declared variables. Parsing and merging of the compose content
/// itself happens upstream; here it is opaque text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackTemplate {
    pub content: String,

    #[serde(default)]
    pub variables: Vec<VariableSpec>,
}

impl StackTemplate {
    pub fn new(content: impl Into<String>, variables: Vec<VariableSpec>) -> Self {
        Self {
            content: content.into(),
            variables,
        }
    }
}
