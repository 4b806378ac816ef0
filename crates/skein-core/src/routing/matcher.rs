use std::fmt;

use regex::Regex;

use crate::error::ValidationError;
use crate::routing::grammar::{self, MULTI_WILDCARD, SINGLE_WILDCARD};

/// A topic pattern compiled to an anchored regular expression.
///
/// Built once when a binding is created (or reloaded from storage) and then
/// evaluated against every routing key a publish resolves.
#[derive(Clone)]
pub struct TopicMatcher {
    pattern: String,
    regex: Regex,
}

impl TopicMatcher {
    /// Validate `pattern` and compile it.
    pub fn compile(pattern: &str) -> Result<Self, ValidationError> {
        grammar::validate_pattern(pattern)?;
        let source = regex_source(pattern);
        // Every validated pattern maps to escaped literals and two fixed
        // character classes, which the regex crate always accepts.
        let regex = Regex::new(&source).expect("validated pattern compiles");
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, routing_key: &str) -> bool {
        self.regex.is_match(routing_key)
    }

    /// The pattern this matcher was compiled from.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The anchored regular expression source, e.g. `^logs\.[^.]+$`.
    pub fn source(&self) -> &str {
        self.regex.as_str()
    }
}

impl fmt::Debug for TopicMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicMatcher")
            .field("pattern", &self.pattern)
            .field("regex", &self.regex.as_str())
            .finish()
    }
}

/// Translate a validated pattern into its anchored regex source.
fn regex_source(pattern: &str) -> String {
    let segments: Vec<String> = pattern
        .split('.')
        .map(|segment| match segment {
            SINGLE_WILDCARD => "[^.]+".to_string(),
            MULTI_WILDCARD => ".*".to_string(),
            literal => regex::escape(literal),
        })
        .collect();
    format!("^{}$", segments.join(r"\."))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct evaluation of the wildcard semantics, without regexes:
    /// `*` consumes one or more non-dot characters, `#` consumes any run of
    /// characters (possibly empty), literals match exactly.
    fn reference_match(pattern: &str, key: &str) -> bool {
        fn go(tokens: &[&str], key: &str) -> bool {
            let Some((first, rest)) = tokens.split_first() else {
                return key.is_empty();
            };
            match *first {
                "*" => {
                    let run = key.find('.').unwrap_or(key.len());
                    (1..=run).any(|n| go(rest, &key[n..]))
                }
                "#" => (0..=key.len()).any(|n| go(rest, &key[n..])),
                literal => key.strip_prefix(literal).is_some_and(|tail| go(rest, tail)),
            }
        }

        let mut tokens = Vec::new();
        for (i, segment) in pattern.split('.').enumerate() {
            if i > 0 {
                tokens.push(".");
            }
            tokens.push(segment);
        }
        go(&tokens, key)
    }

    #[test]
    fn compiled_sources() {
        let cases = [
            ("logs.error", r"^logs\.error$"),
            ("logs.*", r"^logs\.[^.]+$"),
            ("logs.#", r"^logs\..*$"),
            ("app.*.logs.#", r"^app\.[^.]+\.logs\..*$"),
            ("#", r"^.*$"),
            ("my-app.v_2", r"^my\-app\.v_2$"),
        ];
        for (pattern, expected) in cases {
            let matcher = TopicMatcher::compile(pattern).unwrap();
            assert_eq!(matcher.source(), expected, "{pattern}");
            assert_eq!(matcher.pattern(), pattern);
        }
    }

    #[test]
    fn single_wildcard_is_exactly_one_segment() {
        let m = TopicMatcher::compile("logs.*").unwrap();
        assert!(m.matches("logs.error"));
        assert!(!m.matches("logs"));
        assert!(!m.matches("logs.a.b"));
    }

    #[test]
    fn multi_wildcard_needs_the_dot() {
        let m = TopicMatcher::compile("logs.#").unwrap();
        assert!(m.matches("logs.a"));
        assert!(m.matches("logs.a.b"));
        assert!(!m.matches("logs"));
        assert!(!m.matches("logsx.a"));
    }

    #[test]
    fn leading_multi_wildcard() {
        let m = TopicMatcher::compile("#.error").unwrap();
        assert!(m.matches("app.error"));
        assert!(m.matches("a.b.error"));
        assert!(!m.matches("error"));
    }

    #[test]
    fn lone_hash_matches_everything() {
        let m = TopicMatcher::compile("#").unwrap();
        for key in ["logs", "logs.error", "a.b.c"] {
            assert!(m.matches(key), "{key}");
        }
    }

    #[test]
    fn invalid_pattern_does_not_compile() {
        assert!(TopicMatcher::compile("x.**").is_err());
        assert!(TopicMatcher::compile("").is_err());
    }

    #[test]
    fn compiled_matcher_agrees_with_direct_evaluation() {
        let patterns = [
            "#", "*", "*.*", "logs", "logs.*", "logs.#", "#.error", "logs.*.error",
            "app.*.logs.#", "*.b.#", "#.b.*", "a.#.c",
        ];
        let keys = [
            "a", "logs", "error", "logs.error", "logs.api.error", "logs.api.info",
            "app.error", "a.b.c", "a.b.error", "app.web.logs.x", "app.web.logs",
            "x.b.y", "x.b", "a.c", "a.x.y.c", "logs.a.b",
        ];
        for pattern in patterns {
            let matcher = TopicMatcher::compile(pattern).unwrap();
            for key in keys {
                assert_eq!(
                    matcher.matches(key),
                    reference_match(pattern, key),
                    "pattern {pattern:?} key {key:?}"
                );
            }
        }
    }
}
