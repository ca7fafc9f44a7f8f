//! URL rule sets.
//!
//! Every policy axis of the engine (what to cache, what to try from the cache
//! first, what to refetch, ...) is a [`RuleSet`]: a list of include patterns and
//! a list of exclude patterns. A URL is included when it matches at least one
//! include pattern and none of the exclude patterns.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Something that can decide whether a URL matches.
pub trait UrlPredicate: fmt::Debug + Send + Sync {
    /// Check if the URL matches.
    fn matches(&self, url: &str) -> bool;

    /// Source text of the predicate, if it has one.
    fn source(&self) -> Option<&str> {
        None
    }
}

impl UrlPredicate for Regex {
    fn matches(&self, url: &str) -> bool {
        self.is_match(url)
    }

    fn source(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

/// Check if a URL is included by the given include and exclude predicates.
///
/// Exclude predicates are only evaluated when an include predicate matched.
pub fn is_included<P>(url: &str, include: &[P], exclude: &[P]) -> bool
where
    P: AsRef<dyn UrlPredicate>,
{
    include.iter().any(|p| p.as_ref().matches(url))
        && !exclude.iter().any(|p| p.as_ref().matches(url))
}

/// Escape the characters that have a special meaning in a regex.
pub fn escape_regex_special_characters(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        if matches!(
            c,
            '/' | '-'
                | '\\'
                | '^'
                | '$'
                | '*'
                | '+'
                | '?'
                | '.'
                | '('
                | ')'
                | '|'
                | '['
                | ']'
                | '{'
                | '}'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// The location a worker script lives in: its URL up to the last `/`.
pub fn current_location(location: &Url) -> &str {
    let href = location.as_str();
    match href.rfind('/') {
        Some(index) => &href[..index],
        None => href,
    }
}

/// The origin of a worker script URL.
pub fn current_origin(location: &Url) -> String {
    location.origin().ascii_serialization()
}

/// Include and exclude patterns for one policy axis.
#[derive(Clone, Default)]
pub struct RuleSet {
    include: Vec<Arc<dyn UrlPredicate>>,
    exclude: Vec<Arc<dyn UrlPredicate>>,
}

impl RuleSet {
    /// Compile a rule set from regex patterns.
    pub fn new<I, E>(include: I, exclude: E) -> Result<Self, ConfigError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Ok(Self {
            include: compile_patterns(include)?,
            exclude: compile_patterns(exclude)?,
        })
    }

    /// Build a rule set from arbitrary predicates.
    pub fn from_predicates(
        include: Vec<Arc<dyn UrlPredicate>>,
        exclude: Vec<Arc<dyn UrlPredicate>>,
    ) -> Self {
        Self { include, exclude }
    }

    /// Include every URL.
    pub fn every() -> Self {
        Self {
            include: vec![literal_regex(".*")],
            exclude: Vec::new(),
        }
    }

    /// Include nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Every URL that starts with the given prefix, taken literally.
    pub fn prefix(prefix: &str) -> Self {
        let pattern = format!("^{}.*", escape_regex_special_characters(prefix));
        Self {
            include: vec![literal_regex(&pattern)],
            exclude: Vec::new(),
        }
    }

    /// Every resource from the worker location.
    pub fn from_location(location: &Url) -> Self {
        Self::prefix(current_location(location))
    }

    /// Every resource from the worker origin.
    pub fn from_origin(location: &Url) -> Self {
        Self::prefix(&current_origin(location))
    }

    /// The local development server.
    pub fn localhost() -> Self {
        Self {
            include: vec![literal_regex("localhost:8080")],
            exclude: Vec::new(),
        }
    }

    /// Add exclude patterns.
    pub fn excluding<E>(mut self, exclude: E) -> Result<Self, ConfigError>
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        self.exclude.extend(compile_patterns(exclude)?);
        Ok(self)
    }

    /// Check if the URL is included by this rule set.
    pub fn includes(&self, url: &str) -> bool {
        is_included(url, &self.include, &self.exclude)
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources = |list: &[Arc<dyn UrlPredicate>]| -> Vec<String> {
            list.iter()
                .map(|p| p.source().map_or_else(|| format!("{:?}", p), str::to_string))
                .collect()
        };
        f.debug_struct("RuleSet")
            .field("include", &sources(&self.include))
            .field("exclude", &sources(&self.exclude))
            .finish()
    }
}

/// Serialized form of a rule set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSetPatterns {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl TryFrom<RuleSetPatterns> for RuleSet {
    type Error = ConfigError;

    fn try_from(patterns: RuleSetPatterns) -> Result<Self, Self::Error> {
        RuleSet::new(patterns.include, patterns.exclude)
    }
}

impl<'de> Deserialize<'de> for RuleSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let patterns = RuleSetPatterns::deserialize(deserializer)?;
        RuleSet::try_from(patterns).map_err(serde::de::Error::custom)
    }
}

fn compile_patterns<I>(patterns: I) -> Result<Vec<Arc<dyn UrlPredicate>>, ConfigError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|pattern| {
            let pattern = pattern.as_ref();
            Regex::new(pattern)
                .map(|regex| Arc::new(regex) as Arc<dyn UrlPredicate>)
                .map_err(|source| ConfigError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })
        })
        .collect()
}

fn literal_regex(pattern: &str) -> Arc<dyn UrlPredicate> {
    Arc::new(Regex::new(pattern).expect("built-in patterns are valid regexes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct EndsWith(&'static str);

    impl UrlPredicate for EndsWith {
        fn matches(&self, url: &str) -> bool {
            url.ends_with(self.0)
        }
    }

    #[test]
    fn test_empty_include_never_matches() {
        let rules = RuleSet::none();
        assert!(!rules.includes("https://example.com/app.js"));
        assert!(!rules.includes(""));
    }

    #[test]
    fn test_every_matches_everything() {
        let rules = RuleSet::every();
        assert!(rules.includes("https://example.com/app.js"));
        assert!(rules.includes(""));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let rules = RuleSet::new([r"\.js$"], [r"vendor/"]).unwrap();
        assert!(rules.includes("https://example.com/app.js"));
        assert!(!rules.includes("https://example.com/vendor/lib.js"));
        assert!(!rules.includes("https://example.com/style.css"));
    }

    #[test]
    fn test_exclude_ignored_without_include_match() {
        let rules = RuleSet::new(Vec::<String>::new(), [".*"]).unwrap();
        assert!(!rules.includes("https://example.com/app.js"));
    }

    #[test]
    fn test_search_not_full_match() {
        let rules = RuleSet::new(["app"], Vec::<String>::new()).unwrap();
        assert!(rules.includes("https://example.com/js/app.min.js?v=3"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = RuleSet::new(["(unclosed"], Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn test_escape_special_characters() {
        assert_eq!(
            escape_regex_special_characters("https://a.b/c?d=(1)"),
            r"https:\/\/a\.b\/c\?d=\(1\)"
        );
        assert_eq!(escape_regex_special_characters("x-y|z"), r"x\-y\|z");
    }

    #[test]
    fn test_location_rules() {
        let location = Url::parse("https://signor-pipo.itch.io/game/sw.js").unwrap();
        assert_eq!(current_location(&location), "https://signor-pipo.itch.io/game");
        assert_eq!(current_origin(&location), "https://signor-pipo.itch.io");

        let rules = RuleSet::from_location(&location);
        assert!(rules.includes("https://signor-pipo.itch.io/game/assets/a.png"));
        assert!(!rules.includes("https://signor-pipo.itch.io/other/a.png"));
        // The dot is literal.
        assert!(!rules.includes("https://signor-pipoXitch.io/game/a.png"));

        let origin = RuleSet::from_origin(&location);
        assert!(origin.includes("https://signor-pipo.itch.io/other/a.png"));
        assert!(!origin.includes("https://cdn.example.com/signor-pipo.itch.io"));
    }

    #[test]
    fn test_custom_predicates() {
        let rules = RuleSet::from_predicates(
            vec![Arc::new(EndsWith(".js"))],
            vec![Arc::new(EndsWith("sw.js"))],
        );
        assert!(rules.includes("https://example.com/app.js"));
        assert!(!rules.includes("https://example.com/sw.js"));
    }

    #[test]
    fn test_deserialize_rule_set() {
        let rules: RuleSet =
            serde_json::from_str(r#"{ "include": ["\\.png$"], "exclude": ["thumb"] }"#).unwrap();
        assert!(rules.includes("https://example.com/a.png"));
        assert!(!rules.includes("https://example.com/thumb.png"));

        let err = serde_json::from_str::<RuleSet>(r#"{ "include": ["["] }"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_localhost() {
        let rules = RuleSet::localhost();
        assert!(rules.includes("http://localhost:8080/game"));
        assert!(!rules.includes("https://example.com/game"));
    }
}
