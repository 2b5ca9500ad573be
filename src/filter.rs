use crate::config::LogSourceConfig;

/// Name and tag predicates applied to log sources before discovery starts.
/// An empty list disables that predicate.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    /// Exact-match allow-list against the trimmed source name.
    pub names: Vec<String>,
    /// Source must carry every one of these tags.
    pub all_tags: Vec<String>,
    /// Source must carry at least one of these tags.
    pub any_tags: Vec<String>,
}

impl SourceFilter {
    pub fn new(names: Vec<String>, all_tags: Vec<String>, any_tags: Vec<String>) -> Self {
        Self {
            names,
            all_tags,
            any_tags,
        }
    }

    pub fn matches(&self, source: &LogSourceConfig) -> bool {
        self.matches_name(&source.name) && self.matches_tags(&source.tags)
    }

    fn matches_name(&self, name: &str) -> bool {
        self.names.is_empty() || self.names.iter().any(|n| n == name.trim())
    }

    fn matches_tags(&self, tags: &[String]) -> bool {
        if !self.all_tags.is_empty() && !self.all_tags.iter().all(|t| tags.contains(t)) {
            return false;
        }
        if !self.any_tags.is_empty() && !self.any_tags.iter().any(|t| tags.contains(t)) {
            return false;
        }
        true
    }
}
