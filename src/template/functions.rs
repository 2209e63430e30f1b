//! # Template Functions
//!
//! Helper library available to template expressions.
//!
//! The handlebars built-ins (`if`, `unless`, `each`, `with`, `lookup`, `eq`,
//! `ne`, `and`, `or`, `not`, `len`) are always available. On top of those:
//!
//! | v2          | v1             |
//! |-------------|----------------|
//! | `upper`     | `upper`        |
//! | `lower`     | `lower`        |
//! | `title`     |                |
//! | `trim`      |                |
//! | `replace`   |                |
//! | `quote`     |                |
//! | `toString`  | `toString`     |
//! | `toJson`    | `toJSON`       |
//! | `fromJson`  | `fromJSON`     |
//! | `b64enc`    | `base64encode` |
//! | `b64dec`    | `base64decode` |
//! | `sha256sum` |                |

use base64::{engine::general_purpose::STANDARD, Engine as _};
use handlebars::{
    handlebars_helper, Context, Handlebars, Helper, HelperDef, RenderContext, RenderError,
    RenderErrorReason, ScopedJson,
};
use serde_json::Value;
use sha2::{Digest, Sha256};

handlebars_helper!(upper: |s: str| s.to_uppercase());
handlebars_helper!(lower: |s: str| s.to_lowercase());
handlebars_helper!(title: |s: str| title_case(s));
handlebars_helper!(trim: |s: str| s.trim().to_string());
handlebars_helper!(replace: |old: str, new: str, s: str| s.replace(old, new));
handlebars_helper!(quote: |v: Json| Value::String(stringify(v)).to_string());
handlebars_helper!(to_string: |v: Json| stringify(v));
handlebars_helper!(to_json: |v: Json| v.to_string());
handlebars_helper!(b64enc: |s: str| STANDARD.encode(s));
handlebars_helper!(sha256sum: |s: str| hex_digest(s.as_bytes()));

pub(super) fn register_v2(registry: &mut Handlebars<'static>) {
    registry.register_helper("upper", Box::new(upper));
    registry.register_helper("lower", Box::new(lower));
    registry.register_helper("title", Box::new(title));
    registry.register_helper("trim", Box::new(trim));
    registry.register_helper("replace", Box::new(replace));
    registry.register_helper("quote", Box::new(quote));
    registry.register_helper("toString", Box::new(to_string));
    registry.register_helper("toJson", Box::new(to_json));
    registry.register_helper("fromJson", Box::new(FromJson));
    registry.register_helper("b64enc", Box::new(b64enc));
    registry.register_helper("b64dec", Box::new(B64Dec));
    registry.register_helper("sha256sum", Box::new(sha256sum));
}

pub(super) fn register_v1(registry: &mut Handlebars<'static>) {
    registry.register_helper("upper", Box::new(upper));
    registry.register_helper("lower", Box::new(lower));
    registry.register_helper("toString", Box::new(to_string));
    registry.register_helper("toJSON", Box::new(to_json));
    registry.register_helper("fromJSON", Box::new(FromJson));
    registry.register_helper("base64encode", Box::new(b64enc));
    registry.register_helper("base64decode", Box::new(B64Dec));
}

/// Parses its string argument as JSON and returns the value
///
/// The result can be fed to `lookup`, `each` or `with`.
struct FromJson;

impl HelperDef for FromJson {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let raw = string_param(h, "fromJson")?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| RenderErrorReason::Other(format!("fromJson: invalid JSON: {e}")))?;
        Ok(ScopedJson::Derived(value))
    }
}

/// Decodes standard base64, invalid UTF-8 is replaced
struct B64Dec;

impl HelperDef for B64Dec {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let raw = string_param(h, "b64dec")?;
        let decoded = STANDARD
            .decode(raw.trim())
            .map_err(|e| RenderErrorReason::Other(format!("b64dec: invalid base64: {e}")))?;
        Ok(ScopedJson::Derived(Value::String(
            String::from_utf8_lossy(&decoded).into_owned(),
        )))
    }
}

fn string_param(h: &Helper<'_>, helper: &'static str) -> Result<String, RenderError> {
    let param = h
        .param(0)
        .ok_or(RenderErrorReason::ParamNotFoundForIndex(helper, 0))?;
    Ok(stringify(param.value()))
}

/// Plain string for strings, JSON text for everything else
fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::crd::EngineVersion;
    use crate::template::{HandlebarsRenderer, Renderer};
    use serde_json::json;

    fn render(version: EngineVersion, expr: &str) -> String {
        HandlebarsRenderer::new(version)
            .render(
                expr,
                &json!({"name": "db user", "doc": "{\"a\":{\"b\":\"c\"}}", "enc": "aGVsbG8="}),
            )
            .unwrap()
    }

    #[test]
    fn test_v2_string_helpers() {
        assert_eq!(render(EngineVersion::V2, "{{upper name}}"), "DB USER");
        assert_eq!(render(EngineVersion::V2, "{{title name}}"), "Db User");
        assert_eq!(render(EngineVersion::V2, "{{replace \" \" \"_\" name}}"), "db_user");
        assert_eq!(render(EngineVersion::V2, "{{quote name}}"), "\"db user\"");
    }

    #[test]
    fn test_v2_json_helpers() {
        assert_eq!(
            render(EngineVersion::V2, "{{lookup (lookup (fromJson doc) \"a\") \"b\"}}"),
            "c"
        );
        assert_eq!(render(EngineVersion::V2, "{{toJson (fromJson doc)}}"), "{\"a\":{\"b\":\"c\"}}");
    }

    #[test]
    fn test_v2_encoding_helpers() {
        assert_eq!(render(EngineVersion::V2, "{{b64dec enc}}"), "hello");
        assert_eq!(render(EngineVersion::V2, "{{b64enc (b64dec enc)}}"), "aGVsbG8=");
        assert_eq!(
            render(EngineVersion::V2, "{{sha256sum \"abc\"}}"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_v1_helper_names() {
        assert_eq!(render(EngineVersion::V1, "{{base64decode enc}}"), "hello");
        assert_eq!(render(EngineVersion::V1, "{{toJSON (fromJSON doc)}}"), "{\"a\":{\"b\":\"c\"}}");
        let err = HandlebarsRenderer::new(EngineVersion::V1)
            .render("{{b64dec enc}}", &json!({"enc": "aGVsbG8="}));
        assert!(err.is_err());
    }

    #[test]
    fn test_from_json_rejects_invalid_input() {
        let err = HandlebarsRenderer::new(EngineVersion::V2)
            .render("{{fromJson v}}", &json!({"v": "{not json"}))
            .unwrap_err();
        assert!(err.to_string().contains("fromJson"));
    }
}
