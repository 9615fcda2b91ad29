// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service definition files.
//!
//! One JSON document per service under `/etc/backend.ai/service-defs`,
//! consumed by the kernel runner when a client starts an in-kernel app.
//! Command arguments substitute `{name}` variables from a base set plus the
//! `ref` outputs of prestart actions.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Service definition errors
#[derive(Debug, Error)]
pub enum ServiceDefError {
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown variable {{{0}}} in template")]
    UnknownVariable(String),

    #[error("unclosed variable reference in {0:?}")]
    UnclosedVariable(String),
}

/// A step run before the service command starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrestartAction {
    pub action: PrestartActionKind,
    #[serde(default)]
    pub args: serde_json::Value,
    /// Variable name the action's output is bound to.
    #[serde(default)]
    pub r#ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrestartActionKind {
    WriteFile,
    WriteTempfile,
    RunCommand,
    Mkdir,
    Log,
}

/// One service definition document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceDefinition {
    pub command: Vec<String>,
    pub noop: bool,
    pub url_template: Option<String>,
    pub prestart_actions: Vec<PrestartAction>,
    pub env: IndexMap<String, String>,
    pub allowed_envs: Vec<String>,
    pub allowed_arguments: Vec<String>,
    pub default_arguments: IndexMap<String, serde_json::Value>,
}

impl ServiceDefinition {
    pub fn from_json(text: &str) -> Result<Self, ServiceDefError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Render the command with `{name}` variables substituted.
    pub fn render_command(
        &self,
        variables: &IndexMap<String, String>,
    ) -> Result<Vec<String>, ServiceDefError> {
        self.command
            .iter()
            .map(|arg| substitute(arg, variables))
            .collect()
    }
}

/// Substitute `{name}` references; `{{` and `}}` escape literal braces.
pub fn substitute(
    template: &str,
    variables: &IndexMap<String, String>,
) -> Result<String, ServiceDefError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    name.push(inner);
                }
                if !closed {
                    return Err(ServiceDefError::UnclosedVariable(template.to_string()));
                }
                let value = variables
                    .get(&name)
                    .ok_or(ServiceDefError::UnknownVariable(name))?;
                out.push_str(value);
            }
            _ => out.push(ch),
        }
    }
    Ok(out)
}

#[cfg(test)]
#[path = "service_defs_tests.rs"]
mod tests;
