//! # Template Rendering
//!
//! Renders target secrets from `spec.target.template` and evaluates the
//! per-value expressions used by `transform` rewrites and webhook URLs.
//!
//! Expressions use handlebars syntax. Go-style leading-dot field access
//! (`{{ .key }}`, `{{ . }}`, `{{- .key -}}`) is accepted and normalized before
//! rendering. Rendering is strict: referencing a missing key is an error.
//!
//! ## Module Structure
//!
//! - `engine.rs` - precedence rules turning a `Template` into rendered data and metadata
//! - `functions.rs` - helper library registered per engine version

mod engine;
mod functions;

pub(crate) use engine::render_value;
pub use engine::{
    render, RenderedSecret, SourceKind, TemplateSourceRef, TemplateDefaults, TemplateSources,
};

use crate::crd::EngineVersion;
use handlebars::Handlebars;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("{0}")]
    Expression(String),
    #[error("unable to execute template at {field}: {source}")]
    Field {
        field: String,
        #[source]
        source: Box<TemplateError>,
    },
    #[error("output of {field} is not a YAML map: {source}")]
    OutputNotMap {
        field: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{kind} {name} referenced by the template was not found")]
    SourceNotFound { kind: SourceKind, name: String },
    #[error("key {key} not found in {kind} {name}")]
    SourceKeyNotFound {
        kind: SourceKind,
        name: String,
        key: String,
    },
}

impl TemplateError {
    fn at(field: impl Into<String>, source: TemplateError) -> Self {
        TemplateError::Field {
            field: field.into(),
            source: Box::new(source),
        }
    }
}

/// Evaluates a single expression against a set of variables
pub trait Renderer: Send + Sync {
    fn render(&self, expr: &str, vars: &serde_json::Value) -> Result<String, TemplateError>;
}

/// Handlebars-backed [`Renderer`]
///
/// Strict mode, no HTML escaping, helper library chosen by engine version.
pub struct HandlebarsRenderer {
    registry: Handlebars<'static>,
}

impl std::fmt::Debug for HandlebarsRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlebarsRenderer").finish_non_exhaustive()
    }
}

impl HandlebarsRenderer {
    #[must_use]
    pub fn new(version: EngineVersion) -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        match version {
            EngineVersion::V1 => functions::register_v1(&mut registry),
            EngineVersion::V2 => functions::register_v2(&mut registry),
        }
        Self { registry }
    }
}

impl Renderer for HandlebarsRenderer {
    fn render(&self, expr: &str, vars: &serde_json::Value) -> Result<String, TemplateError> {
        let normalized = normalize_expression(expr);
        self.registry
            .render_template(&normalized, vars)
            .map_err(|e| TemplateError::Expression(e.to_string()))
    }
}

static MUSTACHE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{(.*?)\}\}").expect("Failed to compile mustache regex - this should never happen")
});

static DOT_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[\s(=])\.([A-Za-z_][A-Za-z0-9_-]*)")
        .expect("Failed to compile dot-field regex - this should never happen")
});

static LONE_DOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[\s(])\.(\s|\)|$)")
        .expect("Failed to compile lone-dot regex - this should never happen")
});

/// Rewrite Go-style field access inside `{{ }}` blocks into handlebars paths
///
/// `{{ .key }}` becomes `{{ key }}`, a lone `.` becomes `this` and the Go
/// whitespace trim markers `{{-`/`-}}` become `{{~`/`~}}`. Text outside of
/// blocks is left untouched.
#[must_use]
pub fn normalize_expression(expr: &str) -> Cow<'_, str> {
    if !expr.contains("{{") {
        return Cow::Borrowed(expr);
    }
    MUSTACHE.replace_all(expr, |caps: &Captures<'_>| {
        let mut inner = caps[1].to_string();
        if let Some(rest) = inner.strip_prefix("- ") {
            inner = format!("~ {rest}");
        }
        if let Some(rest) = inner.strip_suffix(" -") {
            inner = format!("{rest} ~");
        }
        let inner = DOT_FIELD.replace_all(&inner, "${1}${2}");
        let inner = LONE_DOT.replace_all(&inner, "${1}this${2}");
        format!("{{{{{inner}}}}}")
    })
}
