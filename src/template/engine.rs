//! # Template Engine
//!
//! Applies a `Template` to the aggregated source data.
//!
//! Precedence, later stages overwrite earlier ones:
//!
//! 1. the aggregated data itself, only when `mergePolicy: Merge` is set or the
//!    template has neither `data` nor `templateFrom`
//! 2. `templateFrom` entries in declaration order
//! 3. `template.data`
//!
//! Labels and annotations default to the owning resource's own metadata.
//! `template.metadata` replaces those defaults wholesale, and `templateFrom`
//! entries targeting `Labels`/`Annotations` are added on top.

use super::{HandlebarsRenderer, Renderer, TemplateError};
use crate::crd::{MergePolicy, Template, TemplateFrom, TemplateRef, TemplateScope, TemplateTarget};
use crate::provider::SecretData;
use std::collections::BTreeMap;
use std::fmt;

/// Kind of in-cluster resource a `templateFrom` entry reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceKind {
    ConfigMap,
    Secret,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::ConfigMap => f.write_str("ConfigMap"),
            SourceKind::Secret => f.write_str("Secret"),
        }
    }
}

/// In-cluster resource referenced by a template
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TemplateSourceRef {
    pub kind: SourceKind,
    pub name: String,
}

impl TemplateSourceRef {
    /// Key used in `status.sourceVersions`
    #[must_use]
    pub fn status_key(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

/// Contents of the config maps and secrets a template references
#[derive(Debug, Clone, Default)]
pub struct TemplateSources {
    pub resources: BTreeMap<TemplateSourceRef, BTreeMap<String, String>>,
}

impl TemplateSources {
    /// Every config map and secret referenced by `template`, deduplicated
    #[must_use]
    pub fn referenced(template: &Template) -> Vec<TemplateSourceRef> {
        let mut refs: Vec<TemplateSourceRef> = template
            .template_from
            .iter()
            .flat_map(|tf| {
                let config_map = tf.config_map.as_ref().map(|r| TemplateSourceRef {
                    kind: SourceKind::ConfigMap,
                    name: r.name.clone(),
                });
                let secret = tf.secret.as_ref().map(|r| TemplateSourceRef {
                    kind: SourceKind::Secret,
                    name: r.name.clone(),
                });
                config_map.into_iter().chain(secret)
            })
            .collect();
        refs.sort();
        refs.dedup();
        refs
    }

    pub fn insert(&mut self, source: TemplateSourceRef, data: BTreeMap<String, String>) {
        self.resources.insert(source, data);
    }

    fn get(&self, kind: SourceKind, name: &str) -> Result<&BTreeMap<String, String>, TemplateError> {
        self.resources
            .get(&TemplateSourceRef {
                kind,
                name: name.to_string(),
            })
            .ok_or_else(|| TemplateError::SourceNotFound {
                kind,
                name: name.to_string(),
            })
    }
}

/// Metadata the target secret gets when the template does not override it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateDefaults {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// Fully rendered target secret content
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedSecret {
    pub data: SecretData,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub type_: String,
}

impl RenderedSecret {
    /// Secret content used when there is no template at all
    #[must_use]
    pub fn untemplated(data: SecretData, defaults: &TemplateDefaults) -> Self {
        Self {
            data,
            labels: defaults.labels.clone(),
            annotations: defaults.annotations.clone(),
            type_: crate::constants::DEFAULT_SECRET_TYPE.to_string(),
        }
    }
}

/// Render `template` against the aggregated `data`
pub fn render(
    template: &Template,
    data: &SecretData,
    sources: &TemplateSources,
    defaults: &TemplateDefaults,
) -> Result<RenderedSecret, TemplateError> {
    let renderer = HandlebarsRenderer::new(template.engine_version);
    let vars = data_vars(data);

    let mut out = RenderedSecret {
        type_: template
            .r#type
            .clone()
            .unwrap_or_else(|| crate::constants::DEFAULT_SECRET_TYPE.to_string()),
        ..RenderedSecret::default()
    };

    let keep_inputs = template.merge_policy == MergePolicy::Merge
        || (template.data.is_empty() && template.template_from.is_empty());
    if keep_inputs {
        out.data = data.clone();
    }

    let metadata = template.metadata.as_ref();
    out.labels = match metadata.and_then(|m| m.labels.as_ref()) {
        Some(labels) => render_map(&renderer, labels, &vars, "metadata.labels")?,
        None => defaults.labels.clone(),
    };
    out.annotations = match metadata.and_then(|m| m.annotations.as_ref()) {
        Some(annotations) => render_map(&renderer, annotations, &vars, "metadata.annotations")?,
        None => defaults.annotations.clone(),
    };

    for (index, entry) in template.template_from.iter().enumerate() {
        let rendered = render_template_from(&renderer, index, entry, &vars, sources)?;
        let target = match entry.target {
            TemplateTarget::Data => {
                out.data
                    .extend(rendered.into_iter().map(|(k, v)| (k, v.into_bytes())));
                continue;
            }
            TemplateTarget::Labels => &mut out.labels,
            TemplateTarget::Annotations => &mut out.annotations,
        };
        target.extend(rendered);
    }

    for (key, expr) in &template.data {
        let value = renderer
            .render(expr, &vars)
            .map_err(|e| TemplateError::at(format!("data.{key}"), e))?;
        out.data.insert(key.clone(), value.into_bytes());
    }

    Ok(out)
}

fn render_template_from(
    renderer: &HandlebarsRenderer,
    index: usize,
    entry: &TemplateFrom,
    vars: &serde_json::Value,
    sources: &TemplateSources,
) -> Result<BTreeMap<String, String>, TemplateError> {
    let field = format!("templateFrom[{index}]");
    let mut out = BTreeMap::new();

    if let Some(literal) = &entry.literal {
        let rendered = renderer
            .render(literal, vars)
            .map_err(|e| TemplateError::at(format!("{field}.literal"), e))?;
        out.extend(parse_yaml_map(&rendered, &field)?);
    }
    if let Some(config_map) = &entry.config_map {
        let data = sources.get(SourceKind::ConfigMap, &config_map.name)?;
        render_items(renderer, SourceKind::ConfigMap, config_map, data, vars, &field, &mut out)?;
    }
    if let Some(secret) = &entry.secret {
        let data = sources.get(SourceKind::Secret, &secret.name)?;
        render_items(renderer, SourceKind::Secret, secret, data, vars, &field, &mut out)?;
    }

    Ok(out)
}

/// Render the selected keys of a referenced resource
///
/// Without `items` every key is rendered as `Values`.
fn render_items(
    renderer: &HandlebarsRenderer,
    kind: SourceKind,
    reference: &TemplateRef,
    data: &BTreeMap<String, String>,
    vars: &serde_json::Value,
    field: &str,
    out: &mut BTreeMap<String, String>,
) -> Result<(), TemplateError> {
    let selected: Vec<(&str, TemplateScope)> = if reference.items.is_empty() {
        data.keys().map(|k| (k.as_str(), TemplateScope::Values)).collect()
    } else {
        reference
            .items
            .iter()
            .map(|item| (item.key.as_str(), item.template_as))
            .collect()
    };

    for (key, scope) in selected {
        let expr = data.get(key).ok_or_else(|| TemplateError::SourceKeyNotFound {
            kind,
            name: reference.name.clone(),
            key: key.to_string(),
        })?;
        let item_field = format!("{field}.{kind}.{}.{key}", reference.name);
        match scope {
            TemplateScope::Values => {
                let value = renderer
                    .render(expr, vars)
                    .map_err(|e| TemplateError::at(item_field, e))?;
                out.insert(key.to_string(), value);
            }
            TemplateScope::KeysAndValues => {
                let mut scoped = vars.clone();
                if let Some(obj) = scoped.as_object_mut() {
                    obj.insert("targetKey".to_string(), key.into());
                    obj.insert("targetValue".to_string(), expr.as_str().into());
                }
                let rendered_key = renderer
                    .render(key, &scoped)
                    .map_err(|e| TemplateError::at(format!("{item_field}(key)"), e))?;
                let rendered_value = renderer
                    .render(expr, &scoped)
                    .map_err(|e| TemplateError::at(item_field, e))?;
                out.insert(rendered_key, rendered_value);
            }
        }
    }
    Ok(())
}

fn render_map(
    renderer: &HandlebarsRenderer,
    map: &BTreeMap<String, String>,
    vars: &serde_json::Value,
    field: &str,
) -> Result<BTreeMap<String, String>, TemplateError> {
    map.iter()
        .map(|(k, expr)| {
            renderer
                .render(expr, vars)
                .map(|v| (k.clone(), v))
                .map_err(|e| TemplateError::at(format!("{field}.{k}"), e))
        })
        .collect()
}

fn parse_yaml_map(rendered: &str, field: &str) -> Result<BTreeMap<String, String>, TemplateError> {
    if rendered.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let parsed: BTreeMap<String, serde_yaml::Value> =
        serde_yaml::from_str(rendered).map_err(|source| TemplateError::OutputNotMap {
            field: field.to_string(),
            source,
        })?;
    Ok(parsed
        .into_iter()
        .map(|(k, v)| {
            let value = match v {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Null => String::new(),
                other => serde_yaml::to_string(&other)
                    .map(|s| s.trim_end().to_string())
                    .unwrap_or_default(),
            };
            (k, value)
        })
        .collect())
}

/// Template variables: one string per data key
fn data_vars(data: &SecretData) -> serde_json::Value {
    serde_json::Value::Object(
        data.iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    serde_json::Value::String(String::from_utf8_lossy(v).into_owned()),
                )
            })
            .collect(),
    )
}

/// Render a single expression with `value` bound, used by `transform` rewrites
pub(crate) fn render_value(
    renderer: &dyn Renderer,
    expr: &str,
    value: &[u8],
) -> Result<String, TemplateError> {
    let vars = serde_json::json!({ "value": String::from_utf8_lossy(value) });
    renderer.render(expr, &vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{TemplateMetadata, TemplateRefItem};

    fn data(pairs: &[(&str, &str)]) -> SecretData {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    fn template_with_data(pairs: &[(&str, &str)], merge_policy: MergePolicy) -> Template {
        Template {
            data: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            merge_policy,
            ..Template::default()
        }
    }

    #[test]
    fn test_merge_policy_keeps_inputs_as_floor() {
        let template = template_with_data(&[("k", "{{.k}}-t")], MergePolicy::Merge);
        let out = render(
            &template,
            &data(&[("k", "v"), ("j", "w")]),
            &TemplateSources::default(),
            &TemplateDefaults::default(),
        )
        .unwrap();
        assert_eq!(out.data, data(&[("k", "v-t"), ("j", "w")]));
    }

    #[test]
    fn test_replace_policy_drops_inputs() {
        let template = template_with_data(&[("k", "{{.k}}-t")], MergePolicy::Replace);
        let out = render(
            &template,
            &data(&[("k", "v"), ("j", "w")]),
            &TemplateSources::default(),
            &TemplateDefaults::default(),
        )
        .unwrap();
        assert_eq!(out.data, data(&[("k", "v-t")]));
        assert_eq!(out.type_, "Opaque");
    }

    #[test]
    fn test_empty_template_passes_inputs_through() {
        let out = render(
            &Template::default(),
            &data(&[("a", "1")]),
            &TemplateSources::default(),
            &TemplateDefaults::default(),
        )
        .unwrap();
        assert_eq!(out.data, data(&[("a", "1")]));
    }

    #[test]
    fn test_template_data_wins_over_template_from() {
        let mut template = template_with_data(&[("k", "from-data")], MergePolicy::Replace);
        template.template_from = vec![TemplateFrom {
            literal: Some("k: from-literal\nother: \"{{ .a }}\"".to_string()),
            ..TemplateFrom::default()
        }];
        let out = render(
            &template,
            &data(&[("a", "1")]),
            &TemplateSources::default(),
            &TemplateDefaults::default(),
        )
        .unwrap();
        assert_eq!(out.data, data(&[("k", "from-data"), ("other", "1")]));
    }

    #[test]
    fn test_keys_and_values_render_both_sides() {
        let mut template = Template::default();
        template.template_from = vec![TemplateFrom {
            config_map: Some(TemplateRef {
                name: "tpl".to_string(),
                items: vec![TemplateRefItem {
                    key: "{{ .prefix }}-url".to_string(),
                    template_as: TemplateScope::KeysAndValues,
                }],
            }),
            ..TemplateFrom::default()
        }];
        let mut sources = TemplateSources::default();
        sources.insert(
            TemplateSourceRef {
                kind: SourceKind::ConfigMap,
                name: "tpl".to_string(),
            },
            BTreeMap::from([(
                "{{ .prefix }}-url".to_string(),
                "https://{{ .host }}".to_string(),
            )]),
        );
        let out = render(
            &template,
            &data(&[("prefix", "db"), ("host", "example.com")]),
            &sources,
            &TemplateDefaults::default(),
        )
        .unwrap();
        assert_eq!(out.data, data(&[("db-url", "https://example.com")]));
    }

    #[test]
    fn test_missing_template_source_fails() {
        let mut template = Template::default();
        template.template_from = vec![TemplateFrom {
            secret: Some(TemplateRef {
                name: "absent".to_string(),
                items: vec![],
            }),
            ..TemplateFrom::default()
        }];
        let err = render(
            &template,
            &SecretData::new(),
            &TemplateSources::default(),
            &TemplateDefaults::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::SourceNotFound { kind: SourceKind::Secret, .. }));
    }

    #[test]
    fn test_metadata_replaces_defaults() {
        let defaults = TemplateDefaults {
            labels: BTreeMap::from([("team".to_string(), "a".to_string())]),
            annotations: BTreeMap::from([("note".to_string(), "x".to_string())]),
        };
        let mut template = template_with_data(&[("k", "v")], MergePolicy::Replace);
        template.metadata = Some(TemplateMetadata {
            labels: Some(BTreeMap::from([("app".to_string(), "{{ .name }}".to_string())])),
            annotations: None,
        });
        template.template_from = vec![TemplateFrom {
            literal: Some("extra: \"yes\"".to_string()),
            target: TemplateTarget::Labels,
            ..TemplateFrom::default()
        }];
        let out = render(&template, &data(&[("name", "api")]), &TemplateSources::default(), &defaults)
            .unwrap();
        assert_eq!(
            out.labels,
            BTreeMap::from([
                ("app".to_string(), "api".to_string()),
                ("extra".to_string(), "yes".to_string()),
            ])
        );
        assert_eq!(out.annotations, defaults.annotations);
    }

    #[test]
    fn test_render_error_names_field() {
        let template = template_with_data(&[("k", "{{ .missing }}")], MergePolicy::Replace);
        let err = render(
            &template,
            &SecretData::new(),
            &TemplateSources::default(),
            &TemplateDefaults::default(),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("unable to execute template at data.k"));
    }
}
