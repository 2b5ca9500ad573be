use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;

use crate::filter::SourceFilter;

/// One declarative rule naming a logical group of pods to watch.
#[derive(Debug, Clone, Deserialize)]
pub struct LogSourceConfig {
    pub name: String,
    pub namespace: Option<String>,
    pub labels: String,
    pub template: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Top-level configuration file shape. YAML is a superset of JSON, so both
/// file formats parse through the same deserializer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalConfig {
    pub namespace: Option<String>,
    pub template: Option<String>,
    #[serde(default)]
    pub templates: HashMap<String, String>,
    #[serde(default)]
    pub vars: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub sources: Vec<LogSourceConfig>,
}

pub fn load_config(path: &str) -> anyhow::Result<GlobalConfig> {
    let data =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
    let config: GlobalConfig =
        serde_yaml::from_str(&data).with_context(|| format!("parsing config file {path}"))?;
    Ok(config)
}

/// Namespace and template a source actually runs with.
#[derive(Debug, Clone)]
pub struct EffectiveSource {
    pub namespace: String,
    pub template: String,
}

/// Resolve the namespace/template a source runs with. A present global value
/// wins over the per-source value; this direction is intentional and must not
/// be inverted. Missing on both levels is a configuration error for that
/// source only.
pub fn resolve_overrides(
    global: &GlobalConfig,
    source: &LogSourceConfig,
) -> anyhow::Result<EffectiveSource> {
    let namespace = global
        .namespace
        .as_ref()
        .or(source.namespace.as_ref())
        .with_context(|| format!("source '{}' has no namespace", source.name.trim()))?;
    let template = global
        .template
        .as_ref()
        .or(source.template.as_ref())
        .with_context(|| format!("source '{}' has no template", source.name.trim()))?;
    Ok(EffectiveSource {
        namespace: namespace.clone(),
        template: template.clone(),
    })
}

/// Print a summary of the configuration as seen through the active filters.
pub fn print_info(config: &GlobalConfig, filter: &SourceFilter) {
    println!(
        "Global namespace:  {}",
        config.namespace.as_deref().unwrap_or("")
    );
    println!(
        "Global template:   {}",
        config.template.as_deref().unwrap_or("")
    );

    let mut tags: Vec<&str> = Vec::new();
    let mut names: Vec<&str> = Vec::new();
    for source in config.sources.iter().filter(|s| filter.matches(s)) {
        names.push(source.name.trim());
        for tag in &source.tags {
            if !tags.contains(&tag.as_str()) {
                tags.push(tag);
            }
        }
    }

    println!("Tags:");
    for tag in tags {
        println!("\t{tag}");
    }
    println!("Sources:");
    for name in names {
        println!("\t{name}");
    }
}
