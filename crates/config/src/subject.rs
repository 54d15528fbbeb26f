// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Subjects, subject filters and consumer group names.
//!
//! Subjects are dot-delimited hierarchical names (`example_topic.a.test`).
//! A [`Subject`] is always concrete and is what a message is published on.
//! A [`SubjectFilter`] may contain wildcard tokens:
//!
//! - `*` matches exactly one token (`example_topic.*` matches `example_topic.a`)
//! - `>` matches one or more trailing tokens and must be the last token
//!   (`example_topic.>` matches `example_topic.a` and `example_topic.a.test`)
//!
//! Wildcards are only recognized as whole tokens; `a*` is a literal token.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const SINGLE_TOKEN_WILDCARD: &str = "*";
const TRAILING_WILDCARD: &str = ">";

/// Splits a raw subject into tokens, rejecting empty input, whitespace and
/// empty tokens.
fn split_tokens<'a>(raw: &'a str, kind: &str) -> Result<Vec<&'a str>, String> {
    if raw.trim().is_empty() {
        return Err(format!("{kind} must be non-empty"));
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(format!("{kind} `{raw}` must not contain whitespace"));
    }
    let tokens: Vec<&str> = raw.split('.').collect();
    if tokens.iter().any(|token| token.is_empty()) {
        return Err(format!("{kind} `{raw}` must not contain empty tokens"));
    }
    Ok(tokens)
}

/// A concrete subject messages are published on.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
#[schemars(with = "String")]
pub struct Subject(String);

impl Subject {
    /// Parses and validates a concrete subject.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let tokens = split_tokens(raw, "subject")?;
        if tokens
            .iter()
            .any(|token| *token == SINGLE_TOKEN_WILDCARD || *token == TRAILING_WILDCARD)
        {
            return Err(format!(
                "subject `{raw}` must not contain wildcard tokens (`*` or `>`)"
            ));
        }
        Ok(Self(raw.to_owned()))
    }

    /// Returns the subject as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the dot-separated tokens of this subject.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::borrow::Borrow<str> for Subject {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Subject {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value.as_str())
    }
}

impl From<Subject> for String {
    fn from(value: Subject) -> Self {
        value.0
    }
}

/// A subscription filter, possibly containing `*` and `>` wildcards.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
#[schemars(with = "String")]
pub struct SubjectFilter(String);

impl SubjectFilter {
    /// Parses and validates a subject filter.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let tokens = split_tokens(raw, "subject filter")?;
        if let Some(position) = tokens.iter().position(|token| *token == TRAILING_WILDCARD) {
            if position + 1 != tokens.len() {
                return Err(format!(
                    "subject filter `{raw}`: `>` must be the last token"
                ));
            }
        }
        Ok(Self(raw.to_owned()))
    }

    /// Returns the filter as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` when the filter contains no wildcard token.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        !self
            .0
            .split('.')
            .any(|token| token == SINGLE_TOKEN_WILDCARD || token == TRAILING_WILDCARD)
    }

    /// Returns `true` when `subject` is selected by this filter.
    #[must_use]
    pub fn matches(&self, subject: &Subject) -> bool {
        // Most subscriptions on a hot path are literal.
        if self.0 == subject.0 {
            return true;
        }

        let mut subject_tokens = subject.tokens();
        for token in self.0.split('.') {
            match token {
                TRAILING_WILDCARD => return subject_tokens.next().is_some(),
                SINGLE_TOKEN_WILDCARD => {
                    if subject_tokens.next().is_none() {
                        return false;
                    }
                }
                literal => {
                    if subject_tokens.next() != Some(literal) {
                        return false;
                    }
                }
            }
        }
        subject_tokens.next().is_none()
    }
}

impl AsRef<str> for SubjectFilter {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for SubjectFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for SubjectFilter {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value.as_str())
    }
}

impl From<SubjectFilter> for String {
    fn from(value: SubjectFilter) -> Self {
        value.0
    }
}

impl From<Subject> for SubjectFilter {
    fn from(value: Subject) -> Self {
        Self(value.0)
    }
}

/// Name of a durable consumer group.
///
/// Group names are single tokens: no dots, no wildcards, no whitespace.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
#[schemars(with = "String")]
pub struct GroupName(String);

impl GroupName {
    /// Parses and validates a consumer group name.
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.trim().is_empty() {
            return Err("consumer group name must be non-empty".to_owned());
        }
        if raw
            .chars()
            .any(|c| c.is_whitespace() || c == '.' || c == '*' || c == '>')
        {
            return Err(format!(
                "consumer group name `{raw}` must not contain whitespace, `.`, `*` or `>`"
            ));
        }
        Ok(Self(raw.to_owned()))
    }

    /// Returns the group name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the owned group name.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for GroupName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for GroupName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for GroupName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value.as_str())
    }
}

impl From<GroupName> for String {
    fn from(value: GroupName) -> Self {
        value.0
    }
}
