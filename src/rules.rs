//! Rule engine deciding which entries each agent may process.
//!
//! A rule is written as `FieldName=Spec`. Text fields take a regex pattern
//! (case-insensitive with a `(?i)` prefix); `EntryContentLength` takes a
//! numeric operator over the token count; `NeverMatch` is a placeholder that
//! matches nothing, used to disable a rule without deleting it.
//!
//! Malformed rules are a fatal configuration error surfaced at load time,
//! never a permissive default at evaluation time.

use crate::content;
use crate::types::{EnricherError, Entry, Feed, Result};
use regex::Regex;
use std::borrow::Cow;
use std::str::FromStr;

/// Closed set of attributes a rule may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleField {
    EntryTitle,
    EntryUrl,
    EntryContent,
    EntryAuthor,
    EntryTag,
    EntryContentLength,
    FeedSiteUrl,
    FeedTitle,
    FeedCategoryTitle,
    NeverMatch,
}

impl FromStr for RuleField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "EntryTitle" => Ok(Self::EntryTitle),
            "EntryURL" => Ok(Self::EntryUrl),
            "EntryContent" => Ok(Self::EntryContent),
            "EntryAuthor" => Ok(Self::EntryAuthor),
            "EntryTag" => Ok(Self::EntryTag),
            "EntryContentLength" => Ok(Self::EntryContentLength),
            "FeedSiteURL" => Ok(Self::FeedSiteUrl),
            "FeedTitle" => Ok(Self::FeedTitle),
            "FeedCategoryTitle" => Ok(Self::FeedCategoryTitle),
            "NeverMatch" => Ok(Self::NeverMatch),
            other => Err(format!("unsupported field name: {other}")),
        }
    }
}

/// Numeric comparison against the token count of entry content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericOp {
    Gt(u64),
    Ge(u64),
    Lt(u64),
    Le(u64),
    Eq(u64),
    /// Closed interval: both bounds inclusive.
    Between(u64, u64),
}

impl NumericOp {
    fn parse(spec: &str) -> std::result::Result<Self, String> {
        let (op, rest) = spec
            .split_once(':')
            .ok_or_else(|| format!("missing ':' in numeric spec '{spec}'"))?;
        let parse_num = |s: &str| {
            s.trim()
                .parse::<u64>()
                .map_err(|_| format!("invalid number '{}' in numeric spec '{spec}'", s.trim()))
        };
        match op {
            "gt" => Ok(Self::Gt(parse_num(rest)?)),
            "ge" => Ok(Self::Ge(parse_num(rest)?)),
            "lt" => Ok(Self::Lt(parse_num(rest)?)),
            "le" => Ok(Self::Le(parse_num(rest)?)),
            "eq" => Ok(Self::Eq(parse_num(rest)?)),
            "between" => {
                let (lo, hi) = rest
                    .split_once(',')
                    .ok_or_else(|| format!("between spec '{spec}' needs 'min,max'"))?;
                let (lo, hi) = (parse_num(lo)?, parse_num(hi)?);
                if lo > hi {
                    return Err(format!("between spec '{spec}' has min > max"));
                }
                Ok(Self::Between(lo, hi))
            }
            other => Err(format!("unknown numeric operator '{other}'")),
        }
    }

    pub fn matches(&self, value: u64) -> bool {
        match *self {
            Self::Gt(n) => value > n,
            Self::Ge(n) => value >= n,
            Self::Lt(n) => value < n,
            Self::Le(n) => value <= n,
            Self::Eq(n) => value == n,
            Self::Between(lo, hi) => lo <= value && value <= hi,
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    /// Compiled once at load time and cached for the process lifetime.
    Pattern(Regex),
    Numeric(NumericOp),
    Never,
}

/// A single compiled allow or deny rule.
#[derive(Debug, Clone)]
pub struct Rule {
    field: RuleField,
    matcher: Matcher,
    raw: String,
}

impl Rule {
    /// Parse and compile `FieldName=Spec`. Any malformed input is an error.
    pub fn parse(raw: &str) -> Result<Rule> {
        let rule_err = |reason: String| EnricherError::Rule {
            rule: raw.to_string(),
            reason,
        };

        let (field_name, spec) = raw
            .split_once('=')
            .ok_or_else(|| rule_err("missing '=' separator".to_string()))?;
        let field = RuleField::from_str(field_name.trim()).map_err(rule_err)?;
        let spec = spec.trim();

        let matcher = match field {
            RuleField::NeverMatch => Matcher::Never,
            RuleField::EntryContentLength => {
                Matcher::Numeric(NumericOp::parse(spec).map_err(rule_err)?)
            }
            _ => {
                if spec.is_empty() {
                    return Err(rule_err("empty pattern".to_string()));
                }
                Matcher::Pattern(
                    Regex::new(spec).map_err(|e| rule_err(format!("bad regex: {e}")))?,
                )
            }
        };

        Ok(Rule {
            field,
            matcher,
            raw: raw.to_string(),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    fn matches(&self, entry: &Entry, feed: &Feed) -> bool {
        match &self.matcher {
            Matcher::Never => false,
            Matcher::Numeric(op) => op.matches(content::content_tokens(&entry.content) as u64),
            Matcher::Pattern(re) => re.is_match(&field_value(self.field, entry, feed)),
        }
    }
}

/// Text value of a field selector. Missing optional attributes read as empty.
fn field_value<'a>(field: RuleField, entry: &'a Entry, feed: &'a Feed) -> Cow<'a, str> {
    match field {
        RuleField::EntryTitle => Cow::Borrowed(entry.title.as_str()),
        RuleField::EntryUrl => Cow::Borrowed(entry.url.as_str()),
        RuleField::EntryContent => Cow::Owned(content::extract_text(&entry.content)),
        RuleField::EntryAuthor => Cow::Borrowed(entry.author.as_str()),
        RuleField::EntryTag => Cow::Owned(entry.tags.join(",")),
        RuleField::FeedSiteUrl => Cow::Borrowed(feed.site_url.as_str()),
        RuleField::FeedTitle => Cow::Borrowed(feed.title.as_str()),
        RuleField::FeedCategoryTitle => Cow::Owned(
            feed.category
                .as_ref()
                .map(|c| c.title.clone())
                .unwrap_or_default(),
        ),
        RuleField::EntryContentLength | RuleField::NeverMatch => Cow::Borrowed(""),
    }
}

/// Verdict of evaluating an agent's rules against one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

/// An agent's compiled allow and deny rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    allow: Vec<Rule>,
    deny: Vec<Rule>,
}

impl RuleSet {
    /// Compile raw rule strings. Fails on the first malformed rule so that
    /// misconfiguration stops the service at startup.
    pub fn compile(allow: &[String], deny: &[String]) -> Result<RuleSet> {
        let compile_all = |raw: &[String]| -> Result<Vec<Rule>> {
            raw.iter().map(|r| Rule::parse(r)).collect()
        };
        Ok(RuleSet {
            allow: compile_all(allow)?,
            deny: compile_all(deny)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }

    /// Deny rules always win: any deny match rejects regardless of allow
    /// rules. With no deny match, any allow match accepts; an empty allow
    /// set accepts by default.
    pub fn evaluate(&self, entry: &Entry, feed: &Feed) -> Verdict {
        if self.deny.iter().any(|r| r.matches(entry, feed)) {
            return Verdict::Reject;
        }
        if self.allow.is_empty() {
            return Verdict::Accept;
        }
        if self.allow.iter().any(|r| r.matches(entry, feed)) {
            Verdict::Accept
        } else {
            Verdict::Reject
        }
    }
}
