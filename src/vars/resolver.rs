// ABOUTME: Tiered variable merging, validation, and placeholder substitution.
// ABOUTME: Single merge path shared by fresh-deploy and upgrade flows.

use std::collections::BTreeMap;

use super::error::{ResolutionError, ResolutionErrors};
use super::template::{StackTemplate, VariableKind, VariableSpec};

/// Optional value tiers layered over template defaults, lowest precedence
/// first: previously-deployed values (upgrade path), shared/product-level
/// overrides, per-stack explicit overrides. Each later tier overwrites keys
/// present in earlier tiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueTiers<'a> {
    pub previous: Option<&'a BTreeMap<String, String>>,
    pub shared: Option<&'a BTreeMap<String, String>>,
    pub overrides: Option<&'a BTreeMap<String, String>>,
}

impl<'a> ValueTiers<'a> {
    pub fn fresh(
        shared: Option<&'a BTreeMap<String, String>>,
        overrides: Option<&'a BTreeMap<String, String>>,
    ) -> Self {
        Self {
            previous: None,
            shared,
            overrides,
        }
    }

    pub fn upgrade(
        previous: &'a BTreeMap<String, String>,
        shared: Option<&'a BTreeMap<String, String>>,
        overrides: Option<&'a BTreeMap<String, String>>,
    ) -> Self {
        Self {
            previous: Some(previous),
            shared,
            overrides,
        }
    }
}

/// A successfully resolved template: fully substituted content plus the
/// effective variable map that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTemplate {
    pub content: String,
    pub values: BTreeMap<String, String>,
}

/// Build the effective value map for a template. Template defaults seed the
/// map; tiers overlay in precedence order. The same order serves both deploy
/// and upgrade — losing it loses user customizations on every upgrade.
pub fn effective_values(template: &StackTemplate, tiers: ValueTiers<'_>) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();

    for spec in &template.variables {
        if let Some(default) = &spec.default {
            values.insert(spec.name.clone(), default.clone());
        }
    }

    for tier in [tiers.previous, tiers.shared, tiers.overrides]
        .into_iter()
        .flatten()
    {
        for (k, v) in tier {
            values.insert(k.clone(), v.clone());
        }
    }

    values
}

/// Resolve a template against the given value tiers.
///
/// Validation runs before substitution: required variables must have a
/// non-blank effective value, and provided values must satisfy their declared
/// kind, pattern, and bounds. If anything fails, no content is substituted and
/// every failure is returned. Placeholders that survive substitution without
/// an inline default are reported as unresolved.
///
/// Pure function of its inputs; no I/O and no environment access.
///
/// # Errors
///
/// Returns `ResolutionErrors` carrying every individual failure.
pub fn resolve(
    template: &StackTemplate,
    tiers: ValueTiers<'_>,
) -> Result<ResolvedTemplate, ResolutionErrors> {
    let values = effective_values(template, tiers);

    let mut errors = Vec::new();

    for spec in &template.variables {
        match values.get(&spec.name) {
            Some(value) if !value.trim().is_empty() => {
                errors.extend(check_constraints(spec, value));
            }
            _ => {
                if spec.required {
                    errors.push(ResolutionError::RequiredVariableMissing {
                        name: spec.name.clone(),
                    });
                }
            }
        }
    }

    if !errors.is_empty() {
        return Err(ResolutionErrors::new(errors));
    }

    let (content, unresolved) = substitute(&template.content, &values);
    if !unresolved.is_empty() {
        return Err(ResolutionErrors::new(
            unresolved
                .into_iter()
                .map(|name| ResolutionError::UnresolvedVariable { name })
                .collect(),
        ));
    }

    Ok(ResolvedTemplate { content, values })
}

fn check_constraints(spec: &VariableSpec, value: &str) -> Vec<ResolutionError> {
    let mut errors = Vec::new();
    let fail = |reason: String| ResolutionError::ValidationFailed {
        name: spec.name.clone(),
        reason,
    };

    let numeric = match spec.kind {
        VariableKind::String => None,
        VariableKind::Integer => match value.parse::<i64>() {
            Ok(n) => Some(n as f64),
            Err(_) => {
                errors.push(fail(format!("'{value}' is not an integer")));
                None
            }
        },
        VariableKind::Number => match value.parse::<f64>() {
            Ok(n) => Some(n),
            Err(_) => {
                errors.push(fail(format!("'{value}' is not a number")));
                None
            }
        },
        VariableKind::Boolean => {
            if !matches!(value, "true" | "false") {
                errors.push(fail(format!("'{value}' is not 'true' or 'false'")));
            }
            None
        }
    };

    if let Some(n) = numeric {
        if let Some(min) = spec.min
            && n < min
        {
            errors.push(fail(format!("{n} is below minimum {min}")));
        }
        if let Some(max) = spec.max
            && n > max
        {
            errors.push(fail(format!("{n} is above maximum {max}")));
        }
    }

    if let Some(pattern) = &spec.pattern {
        match regex::Regex::new(&format!("^(?:{pattern})$")) {
            Ok(re) => {
                if !re.is_match(value) {
                    errors.push(fail(format!("'{value}' does not match pattern '{pattern}'")));
                }
            }
            Err(e) => errors.push(fail(format!("invalid pattern '{pattern}': {e}"))),
        }
    }

    errors
}

/// Substitute `${VAR}` and `${VAR:-default}` placeholders. Placeholders with
/// no effective value and no inline default are left literally in the text and
/// their names returned. Malformed placeholders (unterminated, empty name)
/// pass through untouched.
fn substitute(content: &str, values: &BTreeMap<String, String>) -> (String, Vec<String>) {
    let mut out = String::with_capacity(content.len());
    let mut unresolved = Vec::new();
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            // Unterminated placeholder; keep the tail as-is.
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };

        let inner = &after[..end];
        let (name, inline_default) = match inner.split_once(":-") {
            Some((n, d)) => (n, Some(d)),
            None => (inner, None),
        };

        if !is_valid_name(name) {
            out.push_str(&rest[start..start + 2 + end + 1]);
        } else if let Some(value) = values.get(name) {
            out.push_str(value);
        } else if let Some(default) = inline_default {
            out.push_str(default);
        } else {
            out.push_str(&rest[start..start + 2 + end + 1]);
            if !unresolved.contains(&name.to_string()) {
                unresolved.push(name.to_string());
            }
        }

        rest = &after[end + 1..];
    }

    out.push_str(rest);
    (out, unresolved)
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
