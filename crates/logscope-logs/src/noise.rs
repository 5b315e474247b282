use regex::Regex;

use logscope_store::TermPattern;
use logscope_types::{LogEvent, TaggedEvent};

/// Prefix marking a noise pattern as a regular expression
const REGEX_PREFIX: &str = "re:";

/// Health checks and load balancer probes
pub const DEFAULT_NOISE_PATTERNS: &[&str] = &["/health", "ELB-HealthChecker", "kube-probe"];

/// A single noise matcher
#[derive(Clone, Debug)]
enum Matcher {
    /// Plain substring, also usable as a server-side exclusion
    Literal(String),

    /// Regular expression, client-side only
    Pattern(Regex),
}

impl Matcher {
    fn matches(&self, message: &str) -> bool {
        match self {
            Self::Literal(s) => message.contains(s.as_str()),
            Self::Pattern(re) => re.is_match(message),
        }
    }
}

/// Classifies log messages as signal or noise
#[derive(Clone, Debug, Default)]
pub struct NoiseFilter {
    matchers: Vec<Matcher>,
}

impl NoiseFilter {
    /// Create a filter from pattern strings.
    ///
    /// Patterns starting with `re:` are compiled as regular expressions,
    /// everything else is a case-sensitive substring.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let matchers = patterns
            .iter()
            .map(|p| p.as_ref())
            .filter(|p| !p.is_empty())
            .map(|p| match p.strip_prefix(REGEX_PREFIX) {
                Some(re) => Regex::new(re).map(Matcher::Pattern),
                None => Ok(Matcher::Literal(p.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { matchers })
    }

    /// Filter that treats nothing as noise
    pub fn none() -> Self {
        Self::default()
    }

    /// Filter with the built-in health check patterns
    pub fn health_checks() -> Self {
        Self {
            matchers: DEFAULT_NOISE_PATTERNS
                .iter()
                .map(|p| Matcher::Literal((*p).to_string()))
                .collect(),
        }
    }

    /// Check if a message is noise
    pub fn is_noise(&self, message: &str) -> bool {
        self.matchers.iter().any(|m| m.matches(message))
    }

    /// Tag an event without dropping it
    pub fn tag(&self, event: LogEvent) -> TaggedEvent {
        if self.is_noise(&event.message) {
            TaggedEvent::noise(event)
        } else {
            TaggedEvent::signal(event)
        }
    }

    /// Literal matchers, the ones a store can exclude server-side
    pub fn literals(&self) -> Vec<&str> {
        self.matchers
            .iter()
            .filter_map(|m| match m {
                Matcher::Literal(s) => Some(s.as_str()),
                Matcher::Pattern(_) => None,
            })
            .collect()
    }

    /// Combine a query filter pattern with exclusions for every literal matcher
    pub fn exclusion_pattern(&self, base: Option<&str>) -> Option<String> {
        TermPattern::with_exclusions(base, &self.literals())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_patterns() {
        let filter = NoiseFilter::new(&["/health", "ELB-HealthChecker"]).unwrap();
        assert!(filter.is_noise("GET /health 200 2ms"));
        assert!(filter.is_noise("\"ELB-HealthChecker/2.0\" 200"));
        assert!(!filter.is_noise("POST /orders 500 upstream timeout"));
    }

    #[test]
    fn test_regex_patterns() {
        let filter = NoiseFilter::new(&[r"re:^(START|END|REPORT) RequestId"]).unwrap();
        assert!(filter.is_noise("START RequestId: 8f5 Version: $LATEST"));
        assert!(!filter.is_noise("ERROR RequestId: 8f5 failed"));
        assert!(filter.literals().is_empty());
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        assert!(NoiseFilter::new(&["re:("]).is_err());
    }

    #[test]
    fn test_tag_keeps_noise() {
        let filter = NoiseFilter::health_checks();
        let tagged = filter.tag(LogEvent::new(1, "GET /health", "s"));
        assert!(tagged.noise);
        assert_eq!(tagged.event.message, "GET /health");
        assert!(!filter.tag(LogEvent::new(1, "boom", "s")).noise);
    }

    #[test]
    fn test_exclusion_pattern_skips_regexes() {
        let filter = NoiseFilter::new(&["/health", "re:^START"]).unwrap();
        assert_eq!(
            filter.exclusion_pattern(Some("ERROR")).as_deref(),
            Some(r#"ERROR -"/health""#)
        );
        assert_eq!(NoiseFilter::none().exclusion_pattern(None), None);
    }
}
