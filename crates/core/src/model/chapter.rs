use serde::{Deserialize, Serialize};

/// A titled, contiguous unit of reading material.
///
/// Chapters are derived from the reading text on every load and never
/// persisted; `ordinal` is the index completion records refer to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chapter {
    pub ordinal: u32,
    pub title: String,
    pub body: String,
}
