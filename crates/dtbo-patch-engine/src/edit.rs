//! Span edits materialised in one linear pass.

use std::ops::Range;

use tracing::warn;

/// Replacement of `span` in the source by `replacement`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub span: Range<usize>,
    pub replacement: String,
}

/// Edits collected against one source document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditList {
    edits: Vec<Edit>,
}

impl EditList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces `span` with `replacement`.
    pub fn replace(&mut self, span: Range<usize>, replacement: impl Into<String>) {
        self.edits.push(Edit {
            span,
            replacement: replacement.into(),
        });
    }

    /// Inserts `text` at `pos`.
    pub fn insert(&mut self, pos: usize, text: impl Into<String>) {
        self.replace(pos..pos, text);
    }

    /// Removes `span`.
    pub fn delete(&mut self, span: Range<usize>) {
        self.replace(span, String::new());
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Edit> {
        self.edits.iter()
    }

    /// Builds the edited document.
    ///
    /// Edits apply in span order; insertions at the same offset keep the order
    /// they were added in. An edit overlapping one already applied, or lying
    /// outside the source, is dropped with a warning.
    pub fn apply(&self, source: &str) -> String {
        let mut ordered: Vec<&Edit> = self.edits.iter().collect();
        ordered.sort_by_key(|edit| edit.span.start);

        let extra: usize = ordered.iter().map(|edit| edit.replacement.len()).sum();
        let mut out = String::with_capacity(source.len() + extra);
        let mut cursor = 0;

        for edit in ordered {
            let Range { start, end } = edit.span;
            if start < cursor || end < start || end > source.len() {
                warn!("Dropping overlapping edit at {}..{}", start, end);
                continue;
            }
            let (Some(gap), true) = (source.get(cursor..start), source.is_char_boundary(end)) else {
                warn!("Dropping edit at {}..{} off a char boundary", start, end);
                continue;
            };
            out.push_str(gap);
            out.push_str(&edit.replacement);
            cursor = end;
        }
        out.push_str(&source[cursor..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_is_identity() {
        let source = "a {\n};\n";
        assert_eq!(EditList::new().apply(source), source);
    }

    #[test]
    fn test_apply_out_of_order() {
        let mut edits = EditList::new();
        edits.replace(6..9, "XYZW");
        edits.delete(0..2);
        edits.insert(4, "+");
        assert_eq!(edits.apply("0123456789"), "23+45XYZW9");
        assert_eq!(edits.len(), 3);
    }

    #[test]
    fn test_insertions_keep_order() {
        let mut edits = EditList::new();
        edits.replace(0..1, "A");
        edits.insert(1, "b");
        edits.insert(1, "c");
        assert_eq!(edits.apply("a-"), "Abc-");
    }

    #[test]
    fn test_overlap_is_dropped() {
        let mut edits = EditList::new();
        edits.replace(0..4, "x");
        edits.replace(2..6, "y");
        edits.replace(8..20, "z");
        assert_eq!(edits.apply("0123456789"), "x456789");
    }
}
