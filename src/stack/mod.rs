pub mod renderer;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use renderer::DefaultStackRenderer;

/// Opens and closes every rendered template stack section.
pub const STACK_SECTION_SEPARATOR: &str = "----";

pub const DEFAULT_TERSE_LIMIT: usize = 10;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TraceStyle {
    #[default]
    Full,
    Terse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFormat {
    #[serde(default)]
    pub style: TraceStyle,
    /// Maximum number of frame lines in [`TraceStyle::Terse`], the "hidden" note included.
    #[serde(default = "default_terse_limit")]
    pub terse_limit: usize,
}

fn default_terse_limit() -> usize {
    DEFAULT_TERSE_LIMIT
}

impl Default for StackFormat {
    fn default() -> Self {
        Self {
            style: TraceStyle::default(),
            terse_limit: default_terse_limit(),
        }
    }
}

/// Position of an instruction inside a template source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Template name; empty for templates created from a string.
    pub template: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.template.is_empty() {
            write!(f, "in nameless template")?;
        } else {
            write!(f, "in template \"{}\"", self.template)?;
        }
        write!(f, " at line {}, column {}", self.line, self.column)
    }
}

/// A call-chain entry as produced by a typical tree-walking evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFrame {
    /// Canonical form of the instruction, e.g. `${user.name}` or `#include "footer"`.
    pub description: String,
    pub location: Option<SourceLocation>,
}

impl SourceFrame {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            location: None,
        }
    }

    pub fn at(mut self, template: impl Into<String>, line: u32, column: u32) -> Self {
        self.location = Some(SourceLocation {
            template: template.into(),
            line,
            column,
        });
        self
    }
}

impl fmt::Display for SourceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)?;
        if let Some(location) = &self.location {
            write!(f, "  [{location}]")?;
        }
        Ok(())
    }
}
