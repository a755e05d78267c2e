use serde::{Deserialize, Serialize};

use crate::document::Document;

/// Decides the content that results from applying an incoming edit to the
/// stored document.
pub trait ResolutionPolicy: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn resolve(&self, current: &Document, incoming: String) -> String;
}

/// The incoming content replaces the stored content unconditionally. No
/// merge, no version check. Concurrent edits typed elsewhere are lost.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl ResolutionPolicy for LastWriteWins {
    fn name(&self) -> &'static str {
        "last-write-wins"
    }

    fn resolve(&self, _current: &Document, incoming: String) -> String {
        incoming
    }
}

/// Which connections receive `document-updated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FanOut {
    /// Every connected client, so document lists stay fresh.
    #[default]
    All,
    /// Only clients that have the document open.
    Interested,
}
