use serde::{Deserialize, Serialize};

/// Routing flags and values carried alongside an entry.
///
/// Only these four fields are recognized; anything else is dropped on write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognizedFields {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(
        rename = "redirectFlow",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub redirect_flow: Option<String>,
    #[serde(
        rename = "redirectNode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub redirect_node: Option<String>,
}

/// A question/answer pair with its routing metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub questions: Vec<String>,
    pub answer: String,
    #[serde(flatten)]
    pub fields: RecognizedFields,
    /// Provenance tag, fixed when the entry is first saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Entry {
    pub fn new(questions: Vec<String>, answer: impl Into<String>) -> Self {
        Self {
            questions,
            answer: answer.into(),
            ..Default::default()
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.fields.enabled = enabled;
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.fields.action = Some(action.into());
        self
    }

    pub fn with_redirect(mut self, flow: impl Into<String>, node: impl Into<String>) -> Self {
        self.fields.redirect_flow = Some(flow.into());
        self.fields.redirect_node = Some(node.into());
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.fields.enabled
    }
}

/// An entry together with the id it is stored under.
///
/// This is also the on-disk shape of the local record store: `{id, data}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub id: String,
    pub data: Entry,
}

/// Pagination window over a store-ordered listing.
///
/// `offset` defaults to the start and `limit` to the rest of the collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Page {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }

    pub fn offset(offset: usize) -> Self {
        Self {
            limit: None,
            offset: Some(offset),
        }
    }

    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}
