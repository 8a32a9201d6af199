use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::de;

pub const AGENT_TAG: &str = "agent";

/// A workflow tag as returned by the N8N API. Depending on the N8N version and
/// endpoint a tag is a bare string, `{ name }` or `{ id, text }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tag {
    Name(String),
    Object {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Other(Value),
}

impl Tag {
    /// Resolved display text of the tag, if it has any.
    pub fn text(&self) -> Option<&str> {
        let raw = match self {
            Tag::Name(name) => Some(name.as_str()),
            Tag::Object { name, text, .. } => name
                .as_deref()
                .filter(|n| !n.trim().is_empty())
                .or(text.as_deref()),
            Tag::Other(_) => None,
        };
        raw.map(str::trim).filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    #[serde(deserialize_with = "de::string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub active: bool,
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub tags: Vec<Tag>,
}

impl WorkflowSummary {
    pub fn has_agent_tag(&self) -> bool {
        self.tags
            .iter()
            .filter_map(Tag::text)
            .any(|t| t.eq_ignore_ascii_case(AGENT_TAG))
    }

    /// Resolved tag names in declaration order, without duplicates.
    pub fn tag_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for text in self.tags.iter().filter_map(Tag::text) {
            if !names.iter().any(|n| n == text) {
                names.push(text.to_string());
            }
        }
        names
    }
}
