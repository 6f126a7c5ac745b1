//! Node location and panel scoping.
//!
//! Timing blocks are found by a forward text search for their name prefix and
//! measured with the leaf rule: the block ends at the first `;` after the
//! first `}` following its name. Ownership is answered by [`DocumentTree`], a
//! one-pass structural scan that records every `{ ... }` span with a parent
//! link, so scope queries walk explicit parents instead of rescanning text.

use std::ops::Range;

/// A located node block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Offset of the first byte of the node name.
    pub start: usize,
    /// Offset just past the terminating `;`.
    pub end: usize,
    /// Node name, e.g. `timing@wqhd_sdc_144`.
    pub name: String,
}

impl Block {
    /// Byte range of the block.
    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Block text within `text`.
    pub fn text<'a>(&self, text: &'a str) -> &'a str {
        &text[self.span()]
    }
}

/// Outcome of one forward search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSearch {
    /// A complete block.
    Found(Block),
    /// The name was found at `at` but no terminator follows it.
    Unterminated { at: usize },
}

pub(crate) fn token_end(bytes: &[u8], from: usize) -> usize {
    let mut pos = from;
    while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() && bytes[pos] != b'{' {
        pos += 1;
    }
    pos
}

/// Finds the next block whose name starts with `prefix`, searching from
/// `from`. Matches must begin a token and be followed by `{`.
pub fn find_next_block(text: &str, prefix: &str, from: usize) -> Option<BlockSearch> {
    if prefix.is_empty() {
        return None;
    }
    let bytes = text.as_bytes();
    let mut search = from;
    loop {
        let start = search + text.get(search..)?.find(prefix)?;
        search = start + prefix.len();

        if start > 0 && !matches!(bytes[start - 1], b' ' | b'\t' | b'\n' | b'\r' | b':') {
            continue;
        }
        let name_end = token_end(bytes, start);
        let mut brace = name_end;
        while brace < bytes.len() && bytes[brace].is_ascii_whitespace() {
            brace += 1;
        }
        if bytes.get(brace) != Some(&b'{') {
            continue;
        }

        let Some(close) = text[brace..].find('}').map(|rel| brace + rel) else {
            return Some(BlockSearch::Unterminated { at: start });
        };
        let Some(semi) = text[close..].find(';').map(|rel| close + rel) else {
            return Some(BlockSearch::Unterminated { at: start });
        };
        return Some(BlockSearch::Found(Block {
            start,
            end: semi + 1,
            name: text[start..name_end].to_string(),
        }));
    }
}

/// Iterator over successive [`find_next_block`] results.
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    text: &'a str,
    prefix: &'a str,
    pos: usize,
}

impl Iterator for Blocks<'_> {
    type Item = BlockSearch;

    fn next(&mut self) -> Option<Self::Item> {
        let found = find_next_block(self.text, self.prefix, self.pos)?;
        self.pos = match &found {
            BlockSearch::Found(block) => block.end,
            BlockSearch::Unterminated { at } => at + self.prefix.len(),
        };
        Some(found)
    }
}

/// Scans all blocks named with `prefix` in document order.
pub fn blocks<'a>(text: &'a str, prefix: &'a str) -> Blocks<'a> {
    Blocks {
        text,
        prefix,
        pos: 0,
    }
}

/// Leading spaces and tabs of the line containing `pos`.
pub fn line_indent(text: &str, pos: usize) -> &str {
    let line_start = text[..pos].rfind('\n').map_or(0, |nl| nl + 1);
    let width = text[line_start..pos]
        .bytes()
        .take_while(|b| matches!(b, b' ' | b'\t'))
        .count();
    &text[line_start..line_start + width]
}

/// Index of a node in a [`DocumentTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

/// One `{ ... }` span of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpan {
    /// Name token preceding the opening brace.
    pub name: String,
    /// Offset of the `{`.
    pub open: usize,
    /// Offset of the matching `}`; `None` when the document ends first.
    pub close: Option<usize>,
    /// Enclosing node.
    pub parent: Option<NodeId>,
}

impl NodeSpan {
    fn encloses(&self, pos: usize) -> bool {
        self.open < pos && self.close.map_or(true, |close| pos <= close)
    }
}

/// How the panels of the run are classified while resolving scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopePolicy {
    /// Panels owned by the active profile.
    pub active_panels: Vec<String>,
    /// Panels owned by other known profiles.
    pub foreign_panels: Vec<String>,
    /// Substrings marking engineering or variant panels.
    pub engineering_markers: Vec<String>,
    /// Prefix shared by every panel node name.
    pub panel_prefix: String,
}

/// Result of a scope query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Inside a panel of the active profile.
    Panel {
        /// Panel node name.
        panel: String,
        /// Offset of the panel's opening brace.
        anchor: usize,
    },
    /// Inside an engineering or variant panel.
    Excluded,
    /// Inside a panel of another profile.
    Foreign,
    /// Inside a panel no profile knows about.
    Unrecognized,
    /// Not inside any panel.
    Outside,
}

impl Scope {
    /// Returns true if blocks in this scope may be modified.
    pub fn is_in_scope(&self) -> bool {
        matches!(self, Scope::Panel { .. })
    }

    /// Panel anchor for in-scope results.
    pub fn anchor(&self) -> Option<usize> {
        match self {
            Scope::Panel { anchor, .. } => Some(*anchor),
            _ => None,
        }
    }

    /// Short name of the classification.
    pub fn label(&self) -> &'static str {
        match self {
            Scope::Panel { .. } => "panel",
            Scope::Excluded => "excluded",
            Scope::Foreign => "foreign",
            Scope::Unrecognized => "unrecognized",
            Scope::Outside => "outside",
        }
    }
}

/// Arena of node spans with parent links.
#[derive(Debug, Clone, Default)]
pub struct DocumentTree {
    nodes: Vec<NodeSpan>,
}

impl DocumentTree {
    /// Builds the tree in one pass. Braces inside quoted strings and comments
    /// are ignored; a stray `}` with nothing open is ignored as well.
    pub fn parse(text: &str) -> Self {
        let bytes = text.as_bytes();
        let mut nodes: Vec<NodeSpan> = Vec::new();
        let mut stack: Vec<usize> = Vec::new();
        let mut stmt_start = 0;
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'"' => {
                    i += 1;
                    while i < bytes.len() && bytes[i] != b'"' {
                        if bytes[i] == b'\\' {
                            i += 1;
                        }
                        i += 1;
                    }
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    i = text[i + 2..].find("*/").map_or(bytes.len(), |rel| i + 2 + rel + 1);
                }
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    i = text[i..].find('\n').map_or(bytes.len(), |rel| i + rel);
                }
                b'{' => {
                    let name = text[stmt_start..i]
                        .split_whitespace()
                        .last()
                        .unwrap_or_default()
                        .to_string();
                    nodes.push(NodeSpan {
                        name,
                        open: i,
                        close: None,
                        parent: stack.last().copied().map(NodeId),
                    });
                    stack.push(nodes.len() - 1);
                    stmt_start = i + 1;
                }
                b'}' => {
                    if let Some(idx) = stack.pop() {
                        nodes[idx].close = Some(i);
                    }
                    stmt_start = i + 1;
                }
                b';' => stmt_start = i + 1,
                _ => {}
            }
            i += 1;
        }

        Self { nodes }
    }

    /// Returns the node with the given id.
    pub fn node(&self, id: NodeId) -> &NodeSpan {
        &self.nodes[id.0]
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the document has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Innermost node whose braces enclose `pos`.
    pub fn enclosing(&self, pos: usize) -> Option<NodeId> {
        let opened = self.nodes.partition_point(|node| node.open < pos);
        (0..opened)
            .rev()
            .find(|&idx| self.nodes[idx].encloses(pos))
            .map(NodeId)
    }

    /// Ancestors of `pos`, innermost first.
    pub fn ancestors(&self, pos: usize) -> impl Iterator<Item = &NodeSpan> + '_ {
        std::iter::successors(self.enclosing(pos), |&id| self.node(id).parent)
            .map(|id| self.node(id))
    }

    /// Resolves which panel, if any, owns the block starting at `pos`.
    pub fn resolve_scope(&self, pos: usize, policy: &ScopePolicy) -> Scope {
        for node in self.ancestors(pos) {
            let name = node.name.as_str();
            if policy
                .engineering_markers
                .iter()
                .any(|marker| !marker.is_empty() && name.contains(marker.as_str()))
            {
                return Scope::Excluded;
            }
            if policy.active_panels.iter().any(|panel| panel == name) {
                return Scope::Panel {
                    panel: name.to_string(),
                    anchor: node.open,
                };
            }
            if policy.foreign_panels.iter().any(|panel| panel == name) {
                return Scope::Foreign;
            }
            if !policy.panel_prefix.is_empty() && name.starts_with(policy.panel_prefix.as_str()) {
                return Scope::Unrecognized;
            }
        }
        Scope::Outside
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"/dts-v1/;
/ {
	fragment@0 {
		__overlay__ {
			qcom,mdss_dsi_panel_A {
				compatible = "qcom,{not-a-node}";
				/* legacy { */
// unused { 
				timing@one {
					cell-index = <0x0>;
				};
				timing@two {
					cell-index = <0x1>;
				};
			};
			qcom,mdss_dsi_panel_A_evt {
				timing@eng {
					cell-index = <0x0>;
				};
			};
			qcom,mdss_dsi_panel_B {
				timing@foreign {
				};
			};
			qcom,mdss_dsi_panel_C {
				wrapper {
					timing@unknown {
					};
				};
			};
		};
	};
	timing@orphan {
	};
};
"#;

    fn policy() -> ScopePolicy {
        ScopePolicy {
            active_panels: vec!["qcom,mdss_dsi_panel_A".to_string()],
            foreign_panels: vec!["qcom,mdss_dsi_panel_B".to_string()],
            engineering_markers: vec!["_evt".to_string()],
            panel_prefix: "qcom,mdss_dsi_panel_".to_string(),
        }
    }

    fn found(text: &str) -> Vec<Block> {
        blocks(text, "timing@")
            .filter_map(|search| match search {
                BlockSearch::Found(block) => Some(block),
                BlockSearch::Unterminated { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_find_blocks_in_order() {
        let names: Vec<String> = found(DOC).into_iter().map(|b| b.name).collect();
        assert_eq!(
            names,
            vec![
                "timing@one",
                "timing@two",
                "timing@eng",
                "timing@foreign",
                "timing@unknown",
                "timing@orphan"
            ]
        );
    }

    #[test]
    fn test_block_extent_is_leaf_rule() {
        let block = found(DOC).remove(0);
        assert_eq!(
            block.text(DOC),
            "timing@one {\n\t\t\t\t\tcell-index = <0x0>;\n\t\t\t\t};"
        );
        assert_eq!(line_indent(DOC, block.start), "\t\t\t\t");
    }

    #[test]
    fn test_find_requires_brace_and_token_start() {
        let text = "ref = \"/timing@x\";\nxtiming@y {\n};\ntiming@z;\n";
        assert!(find_next_block(text, "timing@", 0).is_none());
    }

    #[test]
    fn test_unterminated_block() {
        let text = "timing@a {\n\tcell-index = <0>;\n";
        assert_eq!(
            find_next_block(text, "timing@", 0),
            Some(BlockSearch::Unterminated { at: 0 })
        );
        let text = "timing@a {\n};";
        assert!(matches!(
            find_next_block(text, "timing@", 0),
            Some(BlockSearch::Found(_))
        ));
    }

    #[test]
    fn test_tree_ignores_strings_and_comments() {
        let tree = DocumentTree::parse(DOC);
        let names: Vec<&str> = (0..tree.len())
            .map(|i| tree.node(NodeId(i)).name.as_str())
            .collect();
        assert!(!names.iter().any(|n| n.contains("legacy") || n == &"unused"));
        assert!(!names.iter().any(|n| n.contains("not-a-node")));
        assert_eq!(names[0], "/");
        assert!(tree.nodes.iter().all(|n| n.close.is_some()));
    }

    #[test]
    fn test_resolve_scope_classification() {
        let tree = DocumentTree::parse(DOC);
        let policy = policy();
        let blocks = found(DOC);
        let scope = |name: &str| {
            let block = blocks.iter().find(|b| b.name == name).unwrap();
            tree.resolve_scope(block.start, &policy)
        };

        let panel_open = DOC.find("qcom,mdss_dsi_panel_A {").unwrap() + "qcom,mdss_dsi_panel_A ".len();
        assert_eq!(
            scope("timing@one"),
            Scope::Panel {
                panel: "qcom,mdss_dsi_panel_A".to_string(),
                anchor: panel_open
            }
        );
        assert_eq!(scope("timing@two").anchor(), Some(panel_open));
        assert_eq!(scope("timing@eng"), Scope::Excluded);
        assert_eq!(scope("timing@foreign"), Scope::Foreign);
        assert_eq!(scope("timing@unknown"), Scope::Unrecognized);
        assert_eq!(scope("timing@orphan"), Scope::Outside);
    }

    #[test]
    fn test_engineering_marker_wins_over_panel_match() {
        let text = "qcom,mdss_dsi_panel_A_evt {\n\ttiming@x {\n\t};\n};\n";
        let policy = ScopePolicy {
            active_panels: vec!["qcom,mdss_dsi_panel_A_evt".to_string()],
            ..policy()
        };
        let tree = DocumentTree::parse(text);
        let pos = text.find("timing@x").unwrap();
        assert_eq!(tree.resolve_scope(pos, &policy), Scope::Excluded);
    }
}
