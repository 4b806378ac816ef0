//! Dot-segment grammar shared by routing keys and topic patterns.
//!
//! A routing key is one or more segments of `[A-Za-z0-9_-]+` joined by `.`.
//! A pattern follows the same grammar, except that a segment may instead be
//! exactly `*` (one segment) or `#` (zero or more characters, dots included).

use crate::error::{Subject, ValidationError};

/// Longest accepted routing key or pattern, in characters.
pub const MAX_LEN: usize = 255;

pub const SINGLE_WILDCARD: &str = "*";
pub const MULTI_WILDCARD: &str = "#";

const ADJACENT_WILDCARDS: [&str; 4] = ["**", "##", "*#", "#*"];

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Checks shared by keys and patterns, in rule order.
fn validate_common(
    input: &str,
    subject: Subject,
    allowed: impl Fn(char) -> bool,
) -> Result<(), ValidationError> {
    if input.is_empty() {
        return Err(ValidationError::Empty(subject));
    }
    let len = input.chars().count();
    if len > MAX_LEN {
        return Err(ValidationError::TooLong {
            subject,
            len,
            max: MAX_LEN,
        });
    }
    if let Some(found) = input.chars().find(|c| !allowed(*c)) {
        return Err(ValidationError::InvalidCharacters { subject, found });
    }
    if input.starts_with('.') {
        return Err(ValidationError::LeadingDot(subject));
    }
    if input.ends_with('.') {
        return Err(ValidationError::TrailingDot(subject));
    }
    if input.contains("..") {
        return Err(ValidationError::ConsecutiveDots(subject));
    }
    Ok(())
}

/// Validate a routing key used at publish time.
pub fn validate_routing_key(key: &str) -> Result<(), ValidationError> {
    validate_common(key, Subject::RoutingKey, |c| c == '.' || is_segment_char(c))
}

/// Validate a binding pattern.
pub fn validate_pattern(pattern: &str) -> Result<(), ValidationError> {
    validate_common(pattern, Subject::Pattern, |c| {
        c == '.' || c == '*' || c == '#' || is_segment_char(c)
    })?;

    if ADJACENT_WILDCARDS.iter().any(|pair| pattern.contains(pair)) {
        return Err(ValidationError::AdjacentWildcards(pattern.to_string()));
    }

    let partial = pattern.split('.').any(|segment| {
        segment.contains(['*', '#']) && segment != SINGLE_WILDCARD && segment != MULTI_WILDCARD
    });
    if partial {
        return Err(ValidationError::PartialWildcard(pattern.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_keys() {
        for key in ["logs", "logs.error", "app-1.user_events.created", "a.b.c.d"] {
            assert!(validate_routing_key(key).is_ok(), "{key} should be valid");
        }
    }

    #[test]
    fn accepts_well_formed_patterns() {
        for pattern in ["#", "*", "logs.*", "logs.#", "#.error", "app.*.logs.#", "*.*"] {
            assert!(validate_pattern(pattern).is_ok(), "{pattern} should be valid");
        }
    }

    #[test]
    fn empty_input() {
        assert_eq!(
            validate_routing_key(""),
            Err(ValidationError::Empty(Subject::RoutingKey))
        );
        assert_eq!(
            validate_pattern(""),
            Err(ValidationError::Empty(Subject::Pattern))
        );
    }

    #[test]
    fn length_limit_is_inclusive() {
        let max = "a".repeat(MAX_LEN);
        assert!(validate_routing_key(&max).is_ok());

        let too_long = "a".repeat(MAX_LEN + 1);
        assert_eq!(
            validate_routing_key(&too_long),
            Err(ValidationError::TooLong {
                subject: Subject::RoutingKey,
                len: 256,
                max: 255
            })
        );
        assert!(matches!(
            validate_pattern(&too_long),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let accented = "é".repeat(130);
        assert_eq!(
            validate_routing_key(&accented),
            Err(ValidationError::InvalidCharacters {
                subject: Subject::RoutingKey,
                found: 'é'
            })
        );

        assert_eq!(
            validate_routing_key(&"é".repeat(300)),
            Err(ValidationError::TooLong {
                subject: Subject::RoutingKey,
                len: 300,
                max: 255
            })
        );
    }

    #[test]
    fn wildcards_are_invalid_characters_in_keys() {
        assert_eq!(
            validate_routing_key("logs.*"),
            Err(ValidationError::InvalidCharacters {
                subject: Subject::RoutingKey,
                found: '*'
            })
        );
        assert!(matches!(
            validate_routing_key("logs.#"),
            Err(ValidationError::InvalidCharacters { found: '#', .. })
        ));
        assert!(matches!(
            validate_pattern("logs error"),
            Err(ValidationError::InvalidCharacters { found: ' ', .. })
        ));
        assert!(matches!(
            validate_pattern("logs.$"),
            Err(ValidationError::InvalidCharacters { found: '$', .. })
        ));
    }

    #[test]
    fn dot_placement() {
        assert_eq!(
            validate_routing_key(".x"),
            Err(ValidationError::LeadingDot(Subject::RoutingKey))
        );
        assert_eq!(
            validate_pattern("x."),
            Err(ValidationError::TrailingDot(Subject::Pattern))
        );
        assert_eq!(
            validate_routing_key("x..y"),
            Err(ValidationError::ConsecutiveDots(Subject::RoutingKey))
        );
        assert_eq!(validate_pattern("."), Err(ValidationError::LeadingDot(Subject::Pattern)));
    }

    #[test]
    fn adjacent_wildcards() {
        for pattern in ["x.**", "x.##", "x.*#", "x.#*", "**"] {
            assert_eq!(
                validate_pattern(pattern),
                Err(ValidationError::AdjacentWildcards(pattern.to_string())),
                "{pattern}"
            );
        }
    }

    #[test]
    fn partial_wildcard_segments() {
        for pattern in ["log*", "logs.err#", "a#b", "*x.y"] {
            assert_eq!(
                validate_pattern(pattern),
                Err(ValidationError::PartialWildcard(pattern.to_string())),
                "{pattern}"
            );
        }
    }

    #[test]
    fn earlier_rules_win() {
        // leading dot is reported before the adjacent-wildcard rule
        assert_eq!(
            validate_pattern(".**"),
            Err(ValidationError::LeadingDot(Subject::Pattern))
        );
        // invalid character is reported before dot placement
        assert!(matches!(
            validate_routing_key(".a!"),
            Err(ValidationError::InvalidCharacters { found: '!', .. })
        ));
    }

    #[test]
    fn messages_name_the_subject() {
        let err = validate_pattern("x..y").unwrap_err();
        assert_eq!(err.to_string(), "pattern cannot contain consecutive dots");
        assert_eq!(err.subject(), Subject::Pattern);

        let err = validate_routing_key("").unwrap_err();
        assert_eq!(err.to_string(), "routing key cannot be empty");
    }
}
