//! Record type shared by unit tests.

use replica_core::{Record, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Doc {
    pub id: Option<String>,
    pub text: String,
    pub updated_at: Option<Timestamp>,
}

impl Record for Doc {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    fn updated_at(&self) -> Option<Timestamp> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: Timestamp) {
        self.updated_at = Some(at);
    }
}

/// A document that has never been saved remotely.
pub(crate) fn new_doc(text: &str) -> Doc {
    Doc {
        id: None,
        text: text.to_string(),
        updated_at: None,
    }
}

/// A document with an id and optional modification time.
pub(crate) fn doc(id: &str, text: &str, updated_at: Option<u64>) -> Doc {
    Doc {
        id: Some(id.to_string()),
        text: text.to_string(),
        updated_at: updated_at.map(Timestamp),
    }
}
