//! Pattern types shared by access-control dimensions and path exclusions.

use regex::Regex;

/// Glob-style pattern: `*` matches any run of characters, `?` exactly one.
/// The whole value must match.
#[derive(Debug, Clone)]
pub struct WildcardPattern {
    source: String,
    regex: Regex,
}

impl WildcardPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        let mut buf = [0u8; 4];
        for ch in pattern.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                c => expr.push_str(&regex::escape(c.encode_utf8(&mut buf))),
            }
        }
        expr.push('$');

        Ok(Self {
            source: pattern.to_string(),
            regex: Regex::new(&expr)?,
        })
    }

    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Matches by exact equality, or by regex when the entry compiles as one.
#[derive(Debug, Clone)]
pub struct TextPattern {
    source: String,
    regex: Option<Regex>,
}

impl TextPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            source: pattern.to_string(),
            regex: Regex::new(pattern).ok(),
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        value == self.source || self.regex.as_ref().is_some_and(|re| re.is_match(value))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Compile a list of wildcard patterns, naming the offending entry on failure.
pub fn compile_wildcards(patterns: &[String]) -> Result<Vec<WildcardPattern>, String> {
    patterns
        .iter()
        .map(|p| WildcardPattern::new(p).map_err(|e| format!("`{}`: {}", p, e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_anchoring() {
        let p = WildcardPattern::new("/api/v1/*").unwrap();
        assert!(p.matches("/api/v1/users"));
        assert!(p.matches("/api/v1/users/42/profile"));
        assert!(!p.matches("/x/api/v1/users"));

        let exact = WildcardPattern::new("/api/v1/users/profile").unwrap();
        assert!(exact.matches("/api/v1/users/profile"));
        assert!(!exact.matches("/api/v1/users/settings"));
    }

    #[test]
    fn test_wildcard_escapes_regex_syntax() {
        let p = WildcardPattern::new("/files/v1.0/?.txt").unwrap();
        assert!(p.matches("/files/v1.0/a.txt"));
        assert!(!p.matches("/files/v1x0/a.txt"));
        assert!(!p.matches("/files/v1.0/ab.txt"));
    }

    #[test]
    fn test_text_pattern_regex_or_exact() {
        let re = TextPattern::new("(?i)curl/.*");
        assert!(re.matches("curl/8.1.2"));
        assert!(re.matches("CURL/7"));
        assert!(!re.matches("Mozilla/5.0"));

        // Not a valid regex: only exact equality applies.
        let broken = TextPattern::new("bot[");
        assert!(broken.matches("bot["));
        assert!(!broken.matches("bot"));
    }
}
