// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Semantic identity parsing and pattern matching.
//!
//! Identities name services and agents as `project[:stack[:context]]`.
//! Wildcards (`*`) are legal only in query patterns, never in stored keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a single identity segment.
pub const MAX_SEGMENT_LEN: usize = 64;

/// Maximum number of colon-separated segments.
pub const MAX_SEGMENTS: usize = 3;

/// Errors from identity or pattern parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("identity is empty")]
    Empty,

    #[error("too many segments ({0}, max {MAX_SEGMENTS})")]
    TooManySegments(usize),

    #[error("segment '{0}' contains invalid characters")]
    BadCharacter(String),

    #[error("segment '{0}' exceeds {MAX_SEGMENT_LEN} characters")]
    SegmentTooLong(String),

    #[error("wildcard '*' is not allowed here")]
    WildcardNotAllowed,
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Split raw input into segments, dropping trailing empty segments.
///
/// `myapp::` normalizes to `myapp`; an empty segment in the middle is a
/// character error (it cannot match the segment charset).
fn split_segments(raw: &str) -> Result<Vec<&str>, IdentityError> {
    if raw.trim().is_empty() {
        return Err(IdentityError::Empty);
    }
    let mut segments: Vec<&str> = raw.split(':').collect();
    while segments.last() == Some(&"") {
        segments.pop();
    }
    if segments.is_empty() {
        return Err(IdentityError::Empty);
    }
    if segments.len() > MAX_SEGMENTS {
        return Err(IdentityError::TooManySegments(segments.len()));
    }
    Ok(segments)
}

fn check_segment(segment: &str, allow_wildcard: bool) -> Result<(), IdentityError> {
    if segment.is_empty() {
        return Err(IdentityError::BadCharacter(segment.to_string()));
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(IdentityError::SegmentTooLong(segment.to_string()));
    }
    for c in segment.chars() {
        if c == '*' {
            if !allow_wildcard {
                return Err(IdentityError::WildcardNotAllowed);
            }
        } else if !is_segment_char(c) {
            return Err(IdentityError::BadCharacter(segment.to_string()));
        }
    }
    Ok(())
}

/// A parsed, normalized semantic identity: `project[:stack[:context]]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub project: String,
    pub stack: Option<String>,
    pub context: Option<String>,
}

impl Identity {
    /// Parse an identity, rejecting wildcards.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let segments = split_segments(raw)?;
        for segment in &segments {
            check_segment(segment, false)?;
        }
        Ok(Self {
            project: segments[0].to_string(),
            stack: segments.get(1).map(|s| s.to_string()),
            context: segments.get(2).map(|s| s.to_string()),
        })
    }

    /// The canonical string form used as the store key.
    pub fn canonical(&self) -> String {
        let mut s = self.project.clone();
        if let Some(ref stack) = self.stack {
            s.push(':');
            s.push_str(stack);
            if let Some(ref context) = self.context {
                s.push(':');
                s.push_str(context);
            }
        }
        s
    }

    /// Segment at position 0..3, if present.
    pub fn segment(&self, index: usize) -> Option<&str> {
        match index {
            0 => Some(self.project.as_str()),
            1 => self.stack.as_deref(),
            2 => self.context.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// One position of an identity pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    /// `*` matches any value, including an absent segment.
    Any,
    Literal(String),
}

/// A query pattern over identities.
///
/// A missing position matches anything; `*` matches anything; otherwise the
/// position must be equal to the identity's segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPattern {
    segments: Vec<PatternSegment>,
}

impl IdentityPattern {
    /// Parse a pattern, allowing wildcards.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let segments = split_segments(raw)?;
        let mut parsed = Vec::with_capacity(segments.len());
        for segment in &segments {
            check_segment(segment, true)?;
            if *segment == "*" {
                parsed.push(PatternSegment::Any);
            } else {
                parsed.push(PatternSegment::Literal(segment.to_string()));
            }
        }
        Ok(Self { segments: parsed })
    }

    /// Whether any position is a wildcard.
    pub fn has_wildcard(&self) -> bool {
        self.segments.iter().any(|s| *s == PatternSegment::Any)
    }

    /// Match against a parsed identity.
    pub fn matches(&self, id: &Identity) -> bool {
        for index in 0..MAX_SEGMENTS {
            match self.segments.get(index) {
                None | Some(PatternSegment::Any) => continue,
                Some(PatternSegment::Literal(want)) => {
                    if id.segment(index) != Some(want.as_str()) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// A SQL `LIKE` prefilter that is a superset of [`Self::matches`].
    ///
    /// Rows selected by the prefilter must still be confirmed with
    /// `matches`; this only narrows the scan using the leading literal
    /// segments. `%` and `_` in literals are escaped with `\`.
    pub fn sql_like_prefix(&self) -> String {
        let mut prefix = String::new();
        for segment in &self.segments {
            match segment {
                PatternSegment::Any => break,
                PatternSegment::Literal(lit) => {
                    if !prefix.is_empty() {
                        prefix.push(':');
                    }
                    for c in lit.chars() {
                        if c == '%' || c == '_' || c == '\\' {
                            prefix.push('\\');
                        }
                        prefix.push(c);
                    }
                }
            }
        }
        prefix.push('%');
        prefix
    }
}

impl fmt::Display for IdentityPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .segments
            .iter()
            .map(|s| match s {
                PatternSegment::Any => "*",
                PatternSegment::Literal(lit) => lit.as_str(),
            })
            .collect();
        f.write_str(&parts.join(":"))
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
