//! Client-side evaluation of unstructured filter patterns
//!
//! Supports the term subset of the CloudWatch Logs pattern syntax:
//! `ERROR timeout` (all terms), `?ERROR ?WARN` (any term), `-"/health"`
//! (exclude term) and double-quoted terms. JSON (`{ ... }`) and
//! space-delimited (`[ ... ]`) patterns are not evaluated client-side.

/// A parsed term pattern
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TermPattern {
    required: Vec<String>,
    any_of: Vec<String>,
    excluded: Vec<String>,
}

impl TermPattern {
    /// Parse a pattern. Returns None for structured patterns.
    pub fn parse(pattern: &str) -> Option<Self> {
        let trimmed = pattern.trim();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return None;
        }

        let mut parsed = Self::default();
        for token in tokenize(trimmed) {
            if let Some(term) = token.strip_prefix('-') {
                parsed.excluded.push(unquote(term));
            } else if let Some(term) = token.strip_prefix('?') {
                parsed.any_of.push(unquote(term));
            } else {
                parsed.required.push(unquote(&token));
            }
        }
        parsed.required.retain(|t| !t.is_empty());
        parsed.any_of.retain(|t| !t.is_empty());
        parsed.excluded.retain(|t| !t.is_empty());
        Some(parsed)
    }

    /// Check if a message matches this pattern
    pub fn matches(&self, message: &str) -> bool {
        if self.excluded.iter().any(|t| message.contains(t.as_str())) {
            return false;
        }
        if !self.required.iter().all(|t| message.contains(t.as_str())) {
            return false;
        }
        self.any_of.is_empty() || self.any_of.iter().any(|t| message.contains(t.as_str()))
    }

    /// Render a literal as an exclusion term, e.g. `-"/health"`
    pub fn exclusion_term(literal: &str) -> String {
        format!("-\"{}\"", literal.replace('\\', "\\\\").replace('"', "\\\""))
    }

    /// Append exclusion terms to an optional base pattern.
    ///
    /// Structured base patterns cannot carry term exclusions and are
    /// returned unchanged.
    pub fn with_exclusions(base: Option<&str>, literals: &[&str]) -> Option<String> {
        let base = base.map(str::trim).filter(|b| !b.is_empty());
        if literals.is_empty() || base.is_some_and(|b| b.starts_with('{') || b.starts_with('[')) {
            return base.map(str::to_string);
        }

        let mut terms: Vec<String> = base.map(str::to_string).into_iter().collect();
        terms.extend(literals.iter().map(|l| Self::exclusion_term(l)));
        Some(terms.join(" "))
    }
}

/// Split on whitespace outside double quotes
fn tokenize(pattern: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in pattern.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn unquote(term: &str) -> String {
    let Some(inner) = term.strip_prefix('"').and_then(|t| t.strip_suffix('"')) else {
        return term.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_terms() {
        let pattern = TermPattern::parse("ERROR timeout").unwrap();
        assert!(pattern.matches("ERROR: upstream timeout"));
        assert!(!pattern.matches("ERROR: bad request"));
    }

    #[test]
    fn test_any_of_terms() {
        let pattern = TermPattern::parse("?ERROR ?WARN").unwrap();
        assert!(pattern.matches("WARN disk at 91%"));
        assert!(!pattern.matches("INFO started"));
    }

    #[test]
    fn test_excluded_quoted_terms() {
        let pattern = TermPattern::parse(r#"GET -"/health" -"ELB-HealthChecker""#).unwrap();
        assert!(pattern.matches("GET /api/users 200"));
        assert!(!pattern.matches("GET /health 200"));
        assert!(!pattern.matches("GET / 200 ELB-HealthChecker/2.0"));
    }

    #[test]
    fn test_structured_patterns_are_not_parsed() {
        assert!(TermPattern::parse(r#"{ $.level = "error" }"#).is_none());
        assert!(TermPattern::parse("[ip, user, ...]").is_none());
    }

    #[test]
    fn test_with_exclusions_round_trips_through_parse() {
        let combined = TermPattern::with_exclusions(Some("ERROR"), &["/health", r#"say "hi""#])
            .unwrap();
        assert_eq!(combined, r#"ERROR -"/health" -"say \"hi\"""#);

        let parsed = TermPattern::parse(&combined).unwrap();
        assert!(parsed.matches("ERROR in /api"));
        assert!(!parsed.matches("ERROR in /health"));
        assert!(!parsed.matches(r#"ERROR they say "hi""#));
    }

    #[test]
    fn test_with_exclusions_leaves_structured_base_alone() {
        let base = r#"{ $.status = 500 }"#;
        assert_eq!(
            TermPattern::with_exclusions(Some(base), &["/health"]).as_deref(),
            Some(base)
        );
        assert_eq!(TermPattern::with_exclusions(None, &[]), None);
    }
}
