//! Cache keys for rendered pages

use std::fmt;
use std::sync::Arc;

use folio_render::QualityMode;

/// Identity of an open document
///
/// Cheap to clone; the pipeline copies it into every key and task.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(Arc<str>);

impl DocumentId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Identifies one cacheable render: document, page and quality mode
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub document: DocumentId,
    pub page: usize,
    pub mode: QualityMode,
}

impl RenderKey {
    pub fn new(document: impl Into<DocumentId>, page: usize, mode: QualityMode) -> Self {
        Self { document: document.into(), page, mode }
    }

    pub fn belongs_to(&self, document: &DocumentId) -> bool {
        &self.document == document
    }
}

impl fmt::Display for RenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.document, self.page, self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_modes_are_distinct_keys() {
        let preview = RenderKey::new("doc", 5, QualityMode::Preview);
        let export = RenderKey::new("doc", 5, QualityMode::Export);
        assert_ne!(preview, export);

        let keys: HashSet<_> = [preview.clone(), export, preview].into_iter().collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_display() {
        let key = RenderKey::new("A", 5, QualityMode::Preview);
        assert_eq!(key.to_string(), "A#5@preview");
    }

    #[test]
    fn test_belongs_to() {
        let key = RenderKey::new("A", 0, QualityMode::Export);
        assert!(key.belongs_to(&DocumentId::from("A")));
        assert!(!key.belongs_to(&DocumentId::from("B")));
    }
}
