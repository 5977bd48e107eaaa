//! Registry of files stored in the book, keyed by internal archive path.

use std::collections::HashMap;

/// Where a stored file came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOrigin {
    /// Produced by the assembler itself (cover page, TOC page, styles).
    Generated,
    /// Supplied by the caller or imported from a reference in a chapter.
    Imported(String),
}

impl ResourceOrigin {
    pub fn source(&self) -> Option<&str> {
        match self {
            ResourceOrigin::Generated => None,
            ResourceOrigin::Imported(source) => Some(source),
        }
    }
}

/// Insertion-ordered map from internal path to origin. A path is stored at
/// most once.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    order: Vec<String>,
    entries: HashMap<String, ResourceOrigin>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` and leaves the existing entry alone when `path` is
    /// already registered.
    pub fn register(&mut self, path: &str, origin: ResourceOrigin) -> bool {
        if self.entries.contains_key(path) {
            return false;
        }
        self.order.push(path.to_string());
        self.entries.insert(path.to_string(), origin);
        true
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn origin(&self, path: &str) -> Option<&ResourceOrigin> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResourceOrigin)> {
        self.order
            .iter()
            .filter_map(|path| self.entries.get(path).map(|origin| (path.as_str(), origin)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_once() {
        let mut registry = ResourceRegistry::new();
        assert!(registry.register("images/a.png", ResourceOrigin::Imported("a.png".into())));
        assert!(!registry.register("images/a.png", ResourceOrigin::Imported("other/a.png".into())));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.origin("images/a.png").and_then(|o| o.source()), Some("a.png"));
    }

    #[test]
    fn test_iteration_keeps_insertion_order() {
        let mut registry = ResourceRegistry::new();
        registry.register("b.css", ResourceOrigin::Generated);
        registry.register("a.xhtml", ResourceOrigin::Imported("a.xhtml".into()));
        let paths: Vec<_> = registry.iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["b.css", "a.xhtml"]);
        assert_eq!(registry.origin("b.css").and_then(|o| o.source()), None);
    }
}
