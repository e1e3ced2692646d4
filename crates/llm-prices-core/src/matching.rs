use std::fmt;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Boolean rule deciding whether a string names a provider or model.
///
/// In JSON each clause is a single-key object, e.g. `{"starts_with": "gpt-4"}`
/// or `{"or": [{"equals": "gemini"}, {"equals": "google-gla"}]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clause {
    StartsWith(String),
    EndsWith(String),
    Contains(String),
    Equals(String),
    Regex(Pattern),
    Or(Vec<Clause>),
    And(Vec<Clause>),
}

impl Clause {
    /// Literal clauses ignore case; regex clauses search anywhere in the
    /// candidate and are case-sensitive unless the pattern says otherwise.
    pub fn is_match(&self, candidate: &str) -> bool {
        self.matches(&candidate.to_lowercase(), candidate)
    }

    fn matches(&self, lowered: &str, raw: &str) -> bool {
        match self {
            Self::StartsWith(s) => lowered.starts_with(&s.to_lowercase()),
            Self::EndsWith(s) => lowered.ends_with(&s.to_lowercase()),
            Self::Contains(s) => lowered.contains(&s.to_lowercase()),
            Self::Equals(s) => lowered == s.to_lowercase(),
            Self::Regex(p) => p.is_match(raw),
            Self::Or(children) => children.iter().any(|c| c.matches(lowered, raw)),
            Self::And(children) => children.iter().all(|c| c.matches(lowered, raw)),
        }
    }

    /// Check that every `or`/`and` has pairwise distinct children.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Or(children) | Self::And(children) => {
                for (i, a) in children.iter().enumerate() {
                    if children[i + 1..].contains(a) {
                        return Err(format!("duplicate clause {a}"));
                    }
                    a.validate()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, op: &str, children: &[Clause]| {
            write!(f, "{op}[")?;
            for (i, c) in children.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{c}")?;
            }
            f.write_str("]")
        };
        match self {
            Self::StartsWith(s) => write!(f, "starts_with({s:?})"),
            Self::EndsWith(s) => write!(f, "ends_with({s:?})"),
            Self::Contains(s) => write!(f, "contains({s:?})"),
            Self::Equals(s) => write!(f, "equals({s:?})"),
            Self::Regex(p) => write!(f, "regex({:?})", p.as_str()),
            Self::Or(children) => join(f, "or", children),
            Self::And(children) => join(f, "and", children),
        }
    }
}

/// A regex compiled once when the dataset is loaded.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Pattern::new(&source).map_err(serde::de::Error::custom)
    }
}
