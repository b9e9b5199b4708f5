//! Topic exchange binding patterns.
//!
//! Routing keys are dot-separated words. A binding pattern may use:
//! - `*` to match exactly one word: `"orders.*"` matches `"orders.created"`
//!   but not `"orders.us.created"`
//! - `#` to match zero or more words: `"orders.#"` matches `"orders"`,
//!   `"orders.created"` and `"orders.us.created"`

const SEPARATOR: char = '.';
const WILDCARD_ONE: &str = "*";
const WILDCARD_ANY: &str = "#";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    One,
    Any,
}

/// A parsed binding pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingPattern {
    segments: Vec<Segment>,
    original: String,
}

impl RoutingPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        let original = pattern.into();
        let segments = original
            .split(SEPARATOR)
            .map(|word| match word {
                WILDCARD_ONE => Segment::One,
                WILDCARD_ANY => Segment::Any,
                lit => Segment::Literal(lit.to_string()),
            })
            .collect();
        Self { segments, original }
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Does a message published with `routing_key` match this binding?
    pub fn matches(&self, routing_key: &str) -> bool {
        let words: Vec<&str> = routing_key.split(SEPARATOR).collect();
        match_segments(&self.segments, &words)
    }
}

fn match_segments(pattern: &[Segment], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((Segment::Any, rest)) => {
            // `#` swallows 0..=len words
            (0..=words.len()).any(|skip| match_segments(rest, &words[skip..]))
        }
        Some((Segment::One, rest)) => !words.is_empty() && match_segments(rest, &words[1..]),
        Some((Segment::Literal(lit), rest)) => {
            words.first().is_some_and(|w| w == lit) && match_segments(rest, &words[1..])
        }
    }
}
