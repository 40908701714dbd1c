//! Open document registry
//!
//! Maps document ids to the sources renders are read from. Render workers
//! look documents up here on every render, so a closed document fails fast
//! with [`RenderError::DocumentClosed`].

use std::collections::HashMap;
use std::sync::Arc;

use folio_cache::DocumentId;
use folio_render::{DocumentSource, RenderError, RenderResult};
use parking_lot::RwLock;

/// Registry of open documents
#[derive(Default)]
pub struct DocumentRegistry {
    documents: RwLock<HashMap<DocumentId, Arc<dyn DocumentSource>>>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document. Returns the source previously registered under
    /// `id`, if any.
    pub fn open(
        &self,
        id: DocumentId,
        source: Arc<dyn DocumentSource>,
    ) -> Option<Arc<dyn DocumentSource>> {
        self.documents.write().insert(id, source)
    }

    /// Unregister a document. Returns `true` if it was open.
    pub fn close(&self, id: &DocumentId) -> bool {
        self.documents.write().remove(id).is_some()
    }

    pub fn get(&self, id: &DocumentId) -> Option<Arc<dyn DocumentSource>> {
        self.documents.read().get(id).cloned()
    }

    pub fn is_open(&self, id: &DocumentId) -> bool {
        self.documents.read().contains_key(id)
    }

    /// Page count of an open document
    pub fn page_count(&self, id: &DocumentId) -> RenderResult<usize> {
        self.get(id)
            .map(|source| source.page_count())
            .ok_or_else(|| RenderError::DocumentClosed(id.to_string()))
    }

    /// Check that `page` exists in an open document
    pub fn check_page(&self, id: &DocumentId, page: usize) -> RenderResult<()> {
        let page_count = self.page_count(id)?;
        if page < page_count {
            Ok(())
        } else {
            Err(RenderError::PageOutOfRange { page, page_count })
        }
    }

    /// Ids of all open documents
    pub fn open_documents(&self) -> Vec<DocumentId> {
        self.documents.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_render::SyntheticDocument;

    #[test]
    fn test_open_and_close() {
        let registry = DocumentRegistry::new();
        let id = DocumentId::new("a");

        assert!(registry.open(id.clone(), Arc::new(SyntheticDocument::letter(3))).is_none());
        assert!(registry.is_open(&id));
        assert_eq!(registry.page_count(&id), Ok(3));
        assert_eq!(registry.open_documents(), vec![id.clone()]);

        assert!(registry.close(&id));
        assert!(!registry.close(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reopen_returns_previous() {
        let registry = DocumentRegistry::new();
        let id = DocumentId::new("a");
        registry.open(id.clone(), Arc::new(SyntheticDocument::letter(3)));

        let previous = registry.open(id.clone(), Arc::new(SyntheticDocument::letter(5)));
        assert_eq!(previous.map(|p| p.page_count()), Some(3));
        assert_eq!(registry.page_count(&id), Ok(5));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_check_page() {
        let registry = DocumentRegistry::new();
        let id = DocumentId::new("a");
        registry.open(id.clone(), Arc::new(SyntheticDocument::letter(2)));

        assert!(registry.check_page(&id, 1).is_ok());
        assert_eq!(
            registry.check_page(&id, 2),
            Err(RenderError::PageOutOfRange { page: 2, page_count: 2 })
        );
        assert_eq!(
            registry.check_page(&DocumentId::new("missing"), 0),
            Err(RenderError::DocumentClosed("missing".to_string()))
        );
    }
}
