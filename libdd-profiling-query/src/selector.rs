// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Label selectors: the predicate the storage evaluates to pick rows.
//!
//! ```text
//! memory:alloc_space:bytes:space:bytes{job="default",pod=~"web-.*"}
//! allocs
//! {job!="batch"}
//! ```
//!
//! The head names the profile, optionally followed by the sample type and
//! unit, period type and unit, and `delta`. Matchers use `=`, `!=`, `=~` and
//! `!~`; regular expressions are anchored at both ends. A label the row
//! doesn't have matches as the empty string.

use crate::error::QueryError;
use crate::labels::{LabelSet, METRIC_NAME_LABEL};
use crate::storage::SampleKind;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MatchType {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

#[derive(Clone, Debug)]
pub struct Matcher {
    name: String,
    match_type: MatchType,
    value: String,
    regex: Option<Regex>,
}

impl Matcher {
    pub fn new(
        match_type: MatchType,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, QueryError> {
        let value = value.into();
        let regex = match match_type {
            MatchType::Regex | MatchType::NotRegex => Some(
                Regex::new(&format!("^(?:{value})$"))
                    .map_err(|err| QueryError::invalid(format!("invalid regex {value:?}: {err}")))?,
            ),
            MatchType::Equal | MatchType::NotEqual => None,
        };
        Ok(Self {
            name: name.into(),
            match_type,
            value,
            regex,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn match_type(&self) -> MatchType {
        self.match_type
    }

    pub fn matches(&self, value: Option<&str>) -> bool {
        let value = value.unwrap_or_default();
        match (self.match_type, &self.regex) {
            (MatchType::Equal, _) => value == self.value,
            (MatchType::NotEqual, _) => value != self.value,
            (MatchType::Regex, Some(regex)) => regex.is_match(value),
            (MatchType::NotRegex, Some(regex)) => !regex.is_match(value),
            // Regex matchers are only built with their regex.
            (MatchType::Regex | MatchType::NotRegex, None) => false,
        }
    }
}

/// Constrains the sample kind. Unset fields match anything.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProfileTypeSelector {
    pub name: String,
    pub sample_type: Option<String>,
    pub sample_unit: Option<String>,
    pub period_type: Option<String>,
    pub period_unit: Option<String>,
    pub delta: Option<bool>,
}

impl ProfileTypeSelector {
    fn parse(head: &str) -> Result<Self, QueryError> {
        let parts: Vec<&str> = head.split(':').collect();
        let invalid = || QueryError::invalid(format!("invalid profile type {head:?}"));
        if parts[0].is_empty()
            || parts
                .iter()
                .any(|part| part.contains(|c: char| c.is_whitespace() || c == '"' || c == '}'))
        {
            return Err(invalid());
        }
        let mut selector = ProfileTypeSelector {
            name: parts[0].to_string(),
            ..Default::default()
        };
        match parts.len() {
            1 => {}
            5 | 6 => {
                selector.sample_type = Some(parts[1].to_string());
                selector.sample_unit = Some(parts[2].to_string());
                selector.period_type = Some(parts[3].to_string());
                selector.period_unit = Some(parts[4].to_string());
                if let Some(delta) = parts.get(5) {
                    if *delta != "delta" {
                        return Err(invalid());
                    }
                    selector.delta = Some(true);
                }
            }
            _ => return Err(invalid()),
        }
        Ok(selector)
    }

    pub fn matches(&self, kind: &SampleKind) -> bool {
        fn field(expected: &Option<String>, actual: &str) -> bool {
            expected.as_deref().map_or(true, |expected| expected == actual)
        }
        self.name == kind.name
            && field(&self.sample_type, &kind.sample_type)
            && field(&self.sample_unit, &kind.sample_unit)
            && field(&self.period_type, &kind.period_type)
            && field(&self.period_unit, &kind.period_unit)
            && self.delta.map_or(true, |delta| delta == kind.delta)
    }
}

#[derive(Clone, Debug)]
pub struct Selector {
    source: String,
    profile: Option<ProfileTypeSelector>,
    matchers: Vec<Matcher>,
}

impl Selector {
    pub fn parse(query: &str) -> Result<Self, QueryError> {
        let source = query.trim();
        if source.is_empty() {
            return Err(QueryError::invalid("query must not be empty"));
        }
        let (head, body) = match source.find('{') {
            Some(open) => (&source[..open], Some(&source[open..])),
            None => (source, None),
        };
        let head = head.trim();
        let profile = if head.is_empty() {
            None
        } else {
            Some(ProfileTypeSelector::parse(head)?)
        };
        let matchers = match body {
            Some(body) => parse_matchers(body)?,
            None => Vec::new(),
        };
        if profile.is_none() && matchers.is_empty() {
            return Err(QueryError::invalid(format!("query {source:?} selects nothing")));
        }
        Ok(Self {
            source: source.to_string(),
            profile,
            matchers,
        })
    }

    pub fn profile_type(&self) -> Option<&ProfileTypeSelector> {
        self.profile.as_ref()
    }

    pub fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }

    /// Whether a row of `kind` in the series `labels` is selected. The
    /// `__name__` label refers to the kind's name.
    pub fn matches(&self, kind: &SampleKind, labels: &LabelSet) -> bool {
        if let Some(profile) = &self.profile {
            if !profile.matches(kind) {
                return false;
            }
        }
        self.matchers.iter().all(|matcher| {
            let value = if matcher.name == METRIC_NAME_LABEL {
                Some(kind.name.as_str())
            } else {
                labels.get(&matcher.name)
            };
            matcher.matches(value)
        })
    }
}

impl FromStr for Selector {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn skip_whitespace(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn eat(&mut self, prefix: &str) -> bool {
        match self.rest.strip_prefix(prefix) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn ident(&mut self) -> Option<&'a str> {
        let end = self
            .rest
            .char_indices()
            .find(|(i, c)| !(c.is_ascii_alphabetic() || *c == '_' || (*i > 0 && c.is_ascii_digit())))
            .map_or(self.rest.len(), |(i, _)| i);
        if end == 0 {
            return None;
        }
        let (ident, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(ident)
    }

    fn quoted(&mut self) -> Result<String, QueryError> {
        if !self.eat("\"") {
            return Err(QueryError::invalid("expected a quoted label value"));
        }
        let rest = self.rest;
        let mut value = String::new();
        let mut chars = rest.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.rest = &rest[i + 1..];
                    return Ok(value);
                }
                '\\' => match chars.next() {
                    Some((_, escaped @ ('"' | '\\'))) => value.push(escaped),
                    _ => return Err(QueryError::invalid("invalid escape in label value")),
                },
                c => value.push(c),
            }
        }
        Err(QueryError::invalid("unterminated label value"))
    }
}

fn parse_matchers(body: &str) -> Result<Vec<Matcher>, QueryError> {
    let inner = body
        .strip_prefix('{')
        .and_then(|body| body.strip_suffix('}'))
        .ok_or_else(|| QueryError::invalid(format!("unbalanced braces in {body:?}")))?;
    let mut cursor = Cursor { rest: inner };
    let mut matchers = Vec::new();
    loop {
        cursor.skip_whitespace();
        if cursor.rest.is_empty() {
            break;
        }
        let name = cursor
            .ident()
            .ok_or_else(|| QueryError::invalid(format!("expected a label name at {:?}", cursor.rest)))?;
        cursor.skip_whitespace();
        let match_type = if cursor.eat("=~") {
            MatchType::Regex
        } else if cursor.eat("!~") {
            MatchType::NotRegex
        } else if cursor.eat("!=") {
            MatchType::NotEqual
        } else if cursor.eat("=") {
            MatchType::Equal
        } else {
            return Err(QueryError::invalid(format!(
                "expected a match operator after {name:?}"
            )));
        };
        cursor.skip_whitespace();
        let value = cursor.quoted()?;
        matchers.push(Matcher::new(match_type, name, value)?);
        cursor.skip_whitespace();
        if !cursor.eat(",") && !cursor.rest.is_empty() {
            return Err(QueryError::invalid(format!(
                "expected ',' or '}}' at {:?}",
                cursor.rest
            )));
        }
    }
    Ok(matchers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn kind(name: &str) -> SampleKind {
        SampleKind {
            name: name.into(),
            sample_type: "alloc_objects".into(),
            sample_unit: "count".into(),
            period_type: "space".into(),
            period_unit: "bytes".into(),
            delta: false,
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        LabelSet::from_pairs(pairs.iter().copied()).unwrap()
    }

    #[test]
    fn full_profile_type() {
        let selector: Selector = r#"memory:alloc_objects:count:space:bytes{job="default"}"#
            .parse()
            .unwrap();
        let series = labels(&[("job", "default")]);
        assert!(selector.matches(&kind("memory"), &series));
        assert!(!selector.matches(&kind("cpu"), &series));
        assert!(!selector.matches(&kind("memory"), &labels(&[("job", "other")])));

        let mut delta = kind("memory");
        delta.delta = true;
        assert!(selector.matches(&delta, &series));
        let delta_only = Selector::parse("memory:alloc_objects:count:space:bytes:delta").unwrap();
        assert!(delta_only.matches(&delta, &series));
        assert!(!delta_only.matches(&kind("memory"), &series));
    }

    #[test]
    fn empty_period_fields() {
        let selector = Selector::parse("fgprof:samples:count::").unwrap();
        let profile = selector.profile_type().unwrap();
        assert_eq!(profile.period_type.as_deref(), Some(""));
        assert_eq!(profile.period_unit.as_deref(), Some(""));
    }

    #[test]
    fn matcher_kinds() {
        let selector =
            Selector::parse(r#"{job!="batch", pod=~"web-.*" ,zone!~"eu.*",__name__="allocs",}"#)
                .unwrap();
        assert_eq!(selector.matchers().len(), 4);
        assert!(selector.matches(&kind("allocs"), &labels(&[("pod", "web-1"), ("zone", "us")])));
        assert!(!selector.matches(&kind("allocs"), &labels(&[("pod", "xweb-1")])));
        assert!(!selector.matches(&kind("allocs"), &labels(&[("pod", "web-1"), ("job", "batch")])));
        assert!(!selector.matches(&kind("cpu"), &labels(&[("pod", "web-1")])));
    }

    #[test]
    fn absent_labels_match_as_empty() {
        let selector = Selector::parse(r#"allocs{job=""}"#).unwrap();
        assert!(selector.matches(&kind("allocs"), &LabelSet::default()));
        assert!(!selector.matches(&kind("allocs"), &labels(&[("job", "a")])));
    }

    #[test]
    fn escapes() {
        let selector = Selector::parse(r#"{path="a\"b\\c"}"#).unwrap();
        assert!(selector.matches(&kind("allocs"), &labels(&[("path", r#"a"b\c"#)])));
    }

    #[test]
    fn invalid_queries() {
        for query in [
            "",
            "   ",
            "{}",
            "a:b",
            "a:b:c:d:e:f",
            "a:b:c:d:e:f:g",
            r#"{job="a""#,
            r#"{job="a"} trailing"#,
            r#"{job=a}"#,
            r#"{job~"a"}"#,
            r#"{1job="a"}"#,
            r#"{job="a" pod="b"}"#,
            r#"{job=~"("}"#,
            r#"{job="\n"}"#,
        ] {
            let err = Selector::parse(query).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{query:?}");
        }
    }
}
