use anyhow::Context;
use jaq_interpret::FilterT;
use minijinja::{Environment, Error as TemplateError, ErrorKind, Value};
use std::collections::HashMap;

use crate::types::LogRecord;

/// Name under which the per-source message template is registered; named
/// sub-templates from the configuration live alongside it in the same
/// environment.
const MESSAGE_TEMPLATE: &str = "_message";

/// Split a raw API log line into its leading timestamp token and payload.
/// Lines without a whitespace separator (or with nothing before it) are
/// malformed and yield `None`.
pub fn split_timestamp(line: &str) -> Option<(&str, &str)> {
    let (time, message) = line.split_once(|c: char| c.is_whitespace())?;
    if time.is_empty() {
        return None;
    }
    Some((time, message))
}

/// Renders parsed log records through the configured template pipeline.
///
/// One formatter is compiled per log source (template compilation errors
/// surface at construction, not per line). Rendering exposes the record
/// fields plus `vars` to the template, along with the `jq`, `json_encode`,
/// `json_decode` and `map_add` functions.
pub struct LineFormatter {
    env: Environment<'static>,
}

impl LineFormatter {
    pub fn new(template: &str, named_templates: &HashMap<String, String>) -> anyhow::Result<Self> {
        let mut env = Environment::new();
        env.add_function("jq", jq);
        env.add_function("json_encode", json_encode);
        env.add_function("json_decode", json_decode);
        env.add_function("map_add", map_add);

        // Cross-template references resolve at render time, so the order
        // these are added in does not matter.
        for (name, source) in named_templates {
            env.add_template_owned(name.clone(), source.clone())
                .with_context(|| format!("compiling named template '{name}'"))?;
        }
        env.add_template_owned(MESSAGE_TEMPLATE.to_string(), template.to_string())
            .context("compiling message template")?;

        Ok(Self { env })
    }

    pub fn render(&self, record: &LogRecord) -> anyhow::Result<String> {
        let template = self.env.get_template(MESSAGE_TEMPLATE)?;
        let rendered = template.render(Value::from_serialize(record))?;
        Ok(rendered)
    }
}

fn invalid(msg: String) -> TemplateError {
    TemplateError::new(ErrorKind::InvalidOperation, msg)
}

/// Parse `payload` as a JSON object and evaluate a jq expression against it.
/// When the filter produces multiple outputs, the last one wins.
fn jq(payload: String, expr: String) -> Result<Value, TemplateError> {
    let input: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&payload)
        .map_err(|e| invalid(format!("payload is not a JSON object: {e}")))?;

    let (main, errs) = jaq_parse::parse(&expr, jaq_parse::main());
    let Some(main) = main else {
        return Err(invalid(format!("invalid jq query '{expr}'")));
    };
    if !errs.is_empty() {
        return Err(invalid(format!("invalid jq query '{expr}'")));
    }

    let mut defs = jaq_interpret::ParseCtx::new(Vec::new());
    defs.insert_natives(jaq_core::core());
    defs.insert_defs(jaq_std::std());
    let filter = defs.compile(main);
    if !defs.errs.is_empty() {
        return Err(invalid(format!("jq query '{expr}' failed to compile")));
    }

    let inputs = jaq_interpret::RcIter::new(core::iter::empty());
    let ctx = jaq_interpret::Ctx::new([], &inputs);
    let mut result = Value::UNDEFINED;
    for output in filter.run((ctx, jaq_interpret::Val::from(serde_json::Value::Object(input)))) {
        let val = output.map_err(|e| invalid(format!("jq query '{expr}' failed: {e}")))?;
        result = Value::from_serialize(serde_json::Value::from(val));
    }
    Ok(result)
}

/// Encode any template value as compact JSON text.
fn json_encode(value: Value) -> Result<String, TemplateError> {
    serde_json::to_string(&value).map_err(|e| invalid(format!("json_encode failed: {e}")))
}

/// Decode JSON text into a key/value mapping.
fn json_decode(text: String) -> Result<Value, TemplateError> {
    let map: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&text).map_err(|e| invalid(format!("json_decode failed: {e}")))?;
    Ok(Value::from_serialize(map))
}

/// Insert `key` into a mapping, treating an absent mapping as empty, and
/// return the updated mapping.
fn map_add(map: Value, key: String, value: Value) -> Result<Value, TemplateError> {
    let mut map: serde_json::Map<String, serde_json::Value> =
        if map.is_undefined() || map.is_none() {
            serde_json::Map::new()
        } else {
            serde_json::to_value(&map)
                .ok()
                .and_then(|v| v.as_object().cloned())
                .ok_or_else(|| invalid("map_add expects a mapping".to_string()))?
        };
    let value =
        serde_json::to_value(&value).map_err(|e| invalid(format!("map_add failed: {e}")))?;
    map.insert(key, value);
    Ok(Value::from_serialize(map))
}
