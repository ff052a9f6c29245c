use thiserror::Error;

/// Error returned when a content-type pattern is not `*`, `type/*`, or
/// `type/subtype`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid content type pattern: {0:?}")]
pub struct InvalidPattern(String);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    /// `*` — matches every content type.
    Any,
    /// `type/*` — matches on the major type.
    Major(String),
    /// `type/subtype` — exact match.
    Exact(String),
}

/// The set of content types eligible for compression.
///
/// Built once at middleware configuration and shared read-only by every
/// request. An empty set without a wildcard compresses nothing.
#[derive(Debug, Clone)]
pub struct CompressibleTypes {
    patterns: Vec<Pattern>,
}

impl CompressibleTypes {
    /// Every content type is eligible.
    pub fn any() -> Self {
        Self {
            patterns: vec![Pattern::Any],
        }
    }

    /// No content type is eligible.
    pub fn none() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Builds a pattern set from `*`, `type/*`, and `type/subtype` entries.
    pub fn new<I, S>(patterns: I) -> Result<Self, InvalidPattern>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        for pattern in patterns {
            parsed.push(parse_pattern(pattern.as_ref())?);
        }
        Ok(Self { patterns: parsed })
    }

    /// Reports whether a response with `content_type` should be compressed.
    ///
    /// Parameters after `;` are ignored and matching is case-insensitive.
    pub fn eligible(&self, content_type: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        self.patterns.iter().any(|pattern| match pattern {
            Pattern::Any => true,
            Pattern::Major(major) => essence
                .split_once('/')
                .is_some_and(|(m, _)| m == major.as_str()),
            Pattern::Exact(exact) => essence == *exact,
        })
    }
}

fn parse_pattern(pattern: &str) -> Result<Pattern, InvalidPattern> {
    let trimmed = pattern.trim().to_ascii_lowercase();
    if trimmed == "*" {
        return Ok(Pattern::Any);
    }

    match trimmed.split_once('/') {
        Some((major, "*")) if !major.is_empty() && !major.contains('*') => {
            Ok(Pattern::Major(major.to_owned()))
        }
        Some((major, sub))
            if !major.is_empty()
                && !sub.is_empty()
                && !major.contains('*')
                && !sub.contains('*') =>
        {
            Ok(Pattern::Exact(trimmed))
        }
        _ => Err(InvalidPattern(pattern.to_owned())),
    }
}
