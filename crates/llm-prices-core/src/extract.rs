//! Pull the model name and token counts out of a raw provider API response.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PriceError, Result};
use crate::matching::Clause;
use crate::provider::Provider;
use crate::usage::{Dimension, Usage};

/// How to read usage from one API flavor's responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageExtractor {
    pub api_flavor: String,
    /// Where the usage object lives in the response.
    pub root: ExtractPath,
    pub model_path: ExtractPath,
    pub mappings: Vec<UsageMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageMapping {
    /// Relative to the extractor's `root`.
    pub path: ExtractPath,
    pub dest: Dimension,
    pub required: bool,
}

/// A single key, or a list of steps to descend through. The last step must
/// be a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractPath {
    Key(ExtractStep),
    Steps(Vec<ExtractStep>),
}

impl ExtractPath {
    pub fn steps(&self) -> &[ExtractStep] {
        match self {
            Self::Key(step) => std::slice::from_ref(step),
            Self::Steps(steps) => steps,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        match self.steps().last() {
            None => Err("extraction path may not be empty".into()),
            Some(ExtractStep::ArrayMatch(_)) => Err(format!(
                "extraction path `{}` ends with an array match",
                dotted(&[], self.steps())
            )),
            Some(ExtractStep::Key(_)) => self.steps().iter().try_for_each(|step| match step {
                ExtractStep::ArrayMatch(m) => m.match_logic.validate(),
                ExtractStep::Key(_) => Ok(()),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractStep {
    Key(String),
    ArrayMatch(ArrayMatch),
}

/// Picks the first mapping in an array whose `field` is a string matching
/// `match`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArrayMatch {
    #[serde(rename = "type")]
    pub kind: ArrayMatchTag,
    pub field: String,
    #[serde(rename = "match")]
    pub match_logic: Clause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrayMatchTag {
    #[serde(rename = "array-match")]
    ArrayMatch,
}

impl ArrayMatch {
    fn select<'v>(&self, items: &'v [Value]) -> Option<&'v Value> {
        items.iter().find(|item| {
            item.get(&self.field)
                .and_then(Value::as_str)
                .is_some_and(|v| self.match_logic.is_match(v))
        })
    }
}

impl fmt::Display for ExtractStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::ArrayMatch(m) => write!(f, "[{} {}]", m.field, m.match_logic),
        }
    }
}

impl UsageExtractor {
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.root.validate()?;
        self.model_path.validate()?;
        self.mappings.iter().try_for_each(|m| m.path.validate())
    }
}

/// Extract `(model name, usage)` from a provider's response body.
///
/// With several extractors `api_flavor` picks one; with a single extractor it
/// may be omitted.
pub fn extract_usage(provider: &Provider, response: &Value, api_flavor: Option<&str>) -> Result<(String, Usage)> {
    let extractor = pick_extractor(provider, api_flavor)?;
    if !response.is_object() {
        return Err(PriceError::Extract(format!(
            "expected response data to be a mapping, got {}",
            type_name(response)
        )));
    }

    let model = match lookup(extractor.model_path.steps(), response, &[])? {
        Some(Value::String(s)) => s.clone(),
        Some(other) => return Err(wrong_type(extractor.model_path.steps(), &[], "a string", other)),
        None => return Err(missing(extractor.model_path.steps(), &[])),
    };

    let root = extractor.root.steps();
    let usage_obj = match lookup(root, response, &[])? {
        Some(obj @ Value::Object(_)) => obj,
        Some(other) => return Err(wrong_type(root, &[], "a mapping", other)),
        None => return Err(missing(root, &[])),
    };

    let mut usage = Usage::default();
    let mut found = false;
    for mapping in &extractor.mappings {
        let path = mapping.path.steps();
        match lookup(path, usage_obj, root)? {
            Some(v) => {
                let n = v.as_u64().ok_or_else(|| wrong_type(path, root, "a non-negative integer", v))?;
                usage.add(mapping.dest, n);
                found = true;
            }
            None if mapping.required => return Err(missing(path, root)),
            None => {}
        }
    }

    if !found {
        return Err(PriceError::Extract(format!(
            "no usage information found at `{}`",
            dotted(root, &[])
        )));
    }
    Ok((model, usage))
}

fn pick_extractor<'p>(provider: &'p Provider, api_flavor: Option<&str>) -> Result<&'p UsageExtractor> {
    match (api_flavor, provider.extractors.as_slice()) {
        (_, []) => Err(PriceError::Extract(format!(
            "provider `{}` has no usage extractors",
            provider.id
        ))),
        (None, [only]) => Ok(only),
        (None, _) => Err(PriceError::Extract(format!(
            "provider `{}` has several extractors, pass an api flavor",
            provider.id
        ))),
        (Some(flavor), all) => all.iter().find(|e| e.api_flavor == flavor).ok_or_else(|| {
            let allowed: Vec<&str> = all.iter().map(|e| e.api_flavor.as_str()).collect();
            PriceError::Extract(format!(
                "unknown api flavor `{flavor}`, allowed values: {}",
                allowed.join(", ")
            ))
        }),
    }
}

/// Follow `path` from `data`. `Ok(None)` when a key is absent or no array
/// item matches; a step applied to the wrong kind of value is an error.
fn lookup<'v>(path: &[ExtractStep], data: &'v Value, prefix: &[ExtractStep]) -> Result<Option<&'v Value>> {
    let mut current = data;
    for (i, step) in path.iter().enumerate() {
        let next = match (step, current) {
            (ExtractStep::Key(key), Value::Object(obj)) => obj.get(key),
            (ExtractStep::ArrayMatch(m), Value::Array(items)) => m.select(items),
            (ExtractStep::Key(_), other) => return Err(wrong_type(&path[..i], prefix, "a mapping", other)),
            (ExtractStep::ArrayMatch(_), other) => return Err(wrong_type(&path[..i], prefix, "an array", other)),
        };
        match next {
            Some(v) => current = v,
            None => return Ok(None),
        }
    }
    match path.last() {
        Some(ExtractStep::Key(_)) => Ok(Some(current)),
        Some(ExtractStep::ArrayMatch(_)) => Err(PriceError::Extract(format!(
            "extraction path `{}` ends with an array match",
            dotted(prefix, path)
        ))),
        None => Err(PriceError::Extract("empty extraction path".into())),
    }
}

fn dotted(prefix: &[ExtractStep], path: &[ExtractStep]) -> String {
    prefix.iter().chain(path).map(ToString::to_string).collect::<Vec<_>>().join(".")
}

fn missing(path: &[ExtractStep], prefix: &[ExtractStep]) -> PriceError {
    PriceError::Extract(format!("missing value at `{}`", dotted(prefix, path)))
}

fn wrong_type(path: &[ExtractStep], prefix: &[ExtractStep], expected: &str, got: &Value) -> PriceError {
    PriceError::Extract(format!(
        "expected `{}` value to be {expected}, got {}",
        dotted(prefix, path),
        type_name(got)
    ))
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider(extractors: Value) -> Provider {
        serde_json::from_value(json!({
            "id": "openai",
            "name": "OpenAI",
            "api_pattern": "https://api\\.openai\\.com",
            "extractors": extractors,
            "models": []
        }))
        .unwrap()
    }

    fn chat_extractor() -> Value {
        json!({
            "api_flavor": "chat",
            "root": "usage",
            "model_path": "model",
            "mappings": [
                {"path": "prompt_tokens", "dest": "input_tokens", "required": true},
                {"path": ["prompt_tokens_details", "cached_tokens"], "dest": "cache_read_tokens", "required": false},
                {"path": "completion_tokens", "dest": "output_tokens", "required": true}
            ]
        })
    }

    #[test]
    fn extracts_model_and_usage() {
        let p = provider(json!([chat_extractor()]));
        let body = json!({
            "model": "gpt-4o-2024-08-06",
            "usage": {"prompt_tokens": 100, "completion_tokens": 20, "prompt_tokens_details": {"cached_tokens": 40}}
        });
        let (model, usage) = extract_usage(&p, &body, None).unwrap();
        assert_eq!(model, "gpt-4o-2024-08-06");
        assert_eq!(usage.input_tokens, Some(100));
        assert_eq!(usage.cache_read_tokens, Some(40));
        assert_eq!(usage.output_tokens, Some(20));
    }

    #[test]
    fn optional_mappings_may_be_missing() {
        let p = provider(json!([chat_extractor()]));
        let body = json!({"model": "gpt-4o", "usage": {"prompt_tokens": 1, "completion_tokens": 2}});
        let (_, usage) = extract_usage(&p, &body, Some("chat")).unwrap();
        assert_eq!(usage.cache_read_tokens, None);
    }

    #[test]
    fn required_mapping_missing_names_the_path() {
        let p = provider(json!([chat_extractor()]));
        let body = json!({"model": "gpt-4o", "usage": {"prompt_tokens": 1}});
        let err = extract_usage(&p, &body, None).unwrap_err().to_string();
        assert!(err.contains("usage.completion_tokens"), "{err}");
    }

    #[test]
    fn wrong_types_are_reported() {
        let p = provider(json!([chat_extractor()]));
        let body = json!({"model": 4, "usage": {}});
        let err = extract_usage(&p, &body, None).unwrap_err().to_string();
        assert!(err.contains("`model` value to be a string, got number"), "{err}");

        let err = extract_usage(&p, &json!([1, 2]), None).unwrap_err().to_string();
        assert!(err.contains("got array"), "{err}");
    }

    #[test]
    fn flavor_selection() {
        let mut responses = chat_extractor();
        responses["api_flavor"] = json!("responses");
        let p = provider(json!([chat_extractor(), responses]));
        let body = json!({"model": "gpt-4o", "usage": {"prompt_tokens": 1, "completion_tokens": 2}});

        assert!(extract_usage(&p, &body, None).is_err());
        assert!(extract_usage(&p, &body, Some("responses")).is_ok());
        let err = extract_usage(&p, &body, Some("embeddings")).unwrap_err().to_string();
        assert!(err.contains("allowed values: chat, responses"), "{err}");
    }

    fn responses_extractor() -> Value {
        json!({
            "api_flavor": "responses",
            "root": ["output", {"type": "array-match", "field": "type", "match": {"equals": "message"}}, "usage"],
            "model_path": "model",
            "mappings": [
                {"path": "input_tokens", "dest": "input_tokens", "required": true},
                {"path": "output_tokens", "dest": "output_tokens", "required": true}
            ]
        })
    }

    #[test]
    fn array_match_picks_the_first_matching_item() {
        let p = provider(json!([responses_extractor()]));
        let body = json!({
            "model": "gpt-4.1",
            "output": [
                {"type": "reasoning", "usage": {"input_tokens": 1, "output_tokens": 1}},
                {"type": "message", "usage": {"input_tokens": 300, "output_tokens": 50}},
                {"type": "message", "usage": {"input_tokens": 7, "output_tokens": 7}}
            ]
        });
        let (model, usage) = extract_usage(&p, &body, None).unwrap();
        assert_eq!(model, "gpt-4.1");
        assert_eq!(usage, Usage::new(300, 50));
        assert!(p.validate().is_ok());
    }

    #[test]
    fn array_match_without_a_match_is_missing() {
        let p = provider(json!([responses_extractor()]));
        let body = json!({"model": "gpt-4.1", "output": [{"type": "reasoning"}]});
        let err = extract_usage(&p, &body, None).unwrap_err().to_string();
        assert!(err.starts_with("cannot extract usage: missing value at `output.[type "), "{err}");

        let body = json!({"model": "gpt-4.1", "output": {"type": "message"}});
        let err = extract_usage(&p, &body, None).unwrap_err().to_string();
        assert!(err.contains("`output` value to be an array, got mapping"), "{err}");
    }

    #[test]
    fn paths_must_end_with_a_key() {
        let mut bad = responses_extractor();
        bad["root"] = json!(["output", {"type": "array-match", "field": "type", "match": {"equals": "message"}}]);
        let p = provider(json!([bad]));
        let err = p.validate().unwrap_err();
        assert!(err.contains("ends with an array match"), "{err}");

        let mut empty = chat_extractor();
        empty["model_path"] = json!([]);
        assert!(provider(json!([empty])).validate().is_err());
    }

    #[test]
    fn provider_without_extractors() {
        let p = provider(json!([]));
        assert!(matches!(extract_usage(&p, &json!({}), None), Err(PriceError::Extract(_))));
    }
}
