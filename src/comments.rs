use crate::store::Document;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// What to do with a comment whose declared parent is not in the fetched set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanPolicy {
    Drop,
    PromoteToRoot,
}

impl OrphanPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "drop" => Some(Self::Drop),
            "promote" => Some(Self::PromoteToRoot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatComment {
    pub id: String,
    pub parent_id: Option<String>,
    pub author_id: String,
    pub content: String,
    pub created_at: String,
}

impl FlatComment {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            parent_id: doc
                .str_field("parentId")
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            author_id: doc.str_field("authorId").unwrap_or_default().to_string(),
            content: doc.str_field("content").unwrap_or_default().to_string(),
            created_at: doc
                .str_field("createdAt")
                .unwrap_or(doc.created_at.as_str())
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: FlatComment,
    pub depth: usize,
    /// Visual indentation; equals `depth` up to the cap, then stays flat.
    pub indent: usize,
    pub orphaned: bool,
    pub replies: Vec<CommentNode>,
}

pub fn indent_level(depth: usize, cap: usize) -> usize {
    depth.min(cap)
}

/// Rebuilds the reply tree from a flat comment list.
///
/// Roots are comments without a parent; every other comment hangs under its
/// parent, siblings ordered by `created_at`. Each id appears at most once, so
/// duplicates and reply cycles cannot loop. Orphans (and cycle members, which no
/// root reaches) follow `policy`.
pub fn build_tree(
    flat: &[FlatComment],
    policy: OrphanPolicy,
    indent_cap: usize,
) -> Vec<CommentNode> {
    let mut ordered: Vec<&FlatComment> = Vec::with_capacity(flat.len());
    let mut seen_ids = HashSet::new();
    for c in flat {
        if seen_ids.insert(c.id.as_str()) {
            ordered.push(c);
        }
    }
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let mut children: HashMap<&str, Vec<&FlatComment>> = HashMap::new();
    for &c in &ordered {
        if let Some(parent) = c.parent_id.as_deref() {
            children.entry(parent).or_default().push(c);
        }
    }

    let mut placed: HashSet<&str> = HashSet::new();
    let mut roots = Vec::new();
    for &c in &ordered {
        if c.parent_id.is_none() {
            roots.push(attach(c, 0, false, &children, &mut placed, indent_cap));
        }
    }

    let unplaced = ordered
        .iter()
        .filter(|c| !placed.contains(c.id.as_str()))
        .count();
    if unplaced > 0 {
        match policy {
            OrphanPolicy::Drop => {
                log::debug!("dropped {} orphaned comments", unplaced);
            }
            OrphanPolicy::PromoteToRoot => {
                for &c in &ordered {
                    if !placed.contains(c.id.as_str()) {
                        roots.push(attach(c, 0, true, &children, &mut placed, indent_cap));
                    }
                }
            }
        }
    }
    roots
}

fn attach<'a>(
    comment: &'a FlatComment,
    depth: usize,
    orphaned: bool,
    children: &HashMap<&str, Vec<&'a FlatComment>>,
    placed: &mut HashSet<&'a str>,
    indent_cap: usize,
) -> CommentNode {
    placed.insert(comment.id.as_str());
    let mut replies = Vec::new();
    if let Some(kids) = children.get(comment.id.as_str()) {
        for &kid in kids {
            if placed.contains(kid.id.as_str()) {
                continue;
            }
            replies.push(attach(kid, depth + 1, false, children, placed, indent_cap));
        }
    }
    CommentNode {
        comment: comment.clone(),
        depth,
        indent: indent_level(depth, indent_cap),
        orphaned,
        replies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(id: &str, parent: Option<&str>, at: &str) -> FlatComment {
        FlatComment {
            id: id.into(),
            parent_id: parent.map(|p| p.to_string()),
            author_id: "u".into(),
            content: format!("comment {}", id),
            created_at: at.into(),
        }
    }

    fn collect_ids(nodes: &[CommentNode], out: &mut Vec<String>) {
        for n in nodes {
            out.push(n.comment.id.clone());
            collect_ids(&n.replies, out);
        }
    }

    #[test]
    fn roots_and_replies_each_appear_once() {
        let flat = vec![
            c("r2", None, "2024-01-02"),
            c("a", Some("r1"), "2024-01-03"),
            c("r1", None, "2024-01-01"),
            c("b", Some("a"), "2024-01-04"),
            c("c", Some("r1"), "2024-01-05"),
        ];
        let tree = build_tree(&flat, OrphanPolicy::Drop, 4);
        let roots: Vec<_> = tree.iter().map(|n| n.comment.id.as_str()).collect();
        assert_eq!(roots, vec!["r1", "r2"]);

        let r1 = &tree[0];
        let kids: Vec<_> = r1.replies.iter().map(|n| n.comment.id.as_str()).collect();
        assert_eq!(kids, vec!["a", "c"]);
        assert_eq!(r1.replies[0].replies[0].comment.id, "b");
        assert_eq!(r1.replies[0].replies[0].depth, 2);

        let mut all = Vec::new();
        collect_ids(&tree, &mut all);
        all.sort();
        assert_eq!(all, vec!["a", "b", "c", "r1", "r2"]);
    }

    #[test]
    fn orphans_follow_the_policy() {
        let flat = vec![
            c("r", None, "1"),
            c("o", Some("gone"), "2"),
            c("o-child", Some("o"), "3"),
        ];
        let dropped = build_tree(&flat, OrphanPolicy::Drop, 4);
        assert_eq!(dropped.len(), 1);
        assert!(dropped[0].replies.is_empty());

        let promoted = build_tree(&flat, OrphanPolicy::PromoteToRoot, 4);
        assert_eq!(promoted.len(), 2);
        assert_eq!(promoted[1].comment.id, "o");
        assert!(promoted[1].orphaned);
        assert_eq!(promoted[1].replies[0].comment.id, "o-child");
    }

    #[test]
    fn cycles_and_duplicates_do_not_loop() {
        let flat = vec![
            c("x", Some("y"), "1"),
            c("y", Some("x"), "2"),
            c("r", None, "3"),
            c("r", None, "4"),
        ];
        assert_eq!(build_tree(&flat, OrphanPolicy::Drop, 4).len(), 1);
        let promoted = build_tree(&flat, OrphanPolicy::PromoteToRoot, 4);
        let mut all = Vec::new();
        collect_ids(&promoted, &mut all);
        all.sort();
        assert_eq!(all, vec!["r", "x", "y"]);
    }

    #[test]
    fn indentation_is_capped_but_depth_is_kept() {
        let mut flat = vec![c("0", None, "0")];
        for i in 1..7 {
            flat.push(c(&i.to_string(), Some(&(i - 1).to_string()), &i.to_string()));
        }
        let tree = build_tree(&flat, OrphanPolicy::Drop, 4);
        let mut node = &tree[0];
        while let Some(next) = node.replies.first() {
            node = next;
        }
        assert_eq!(node.depth, 6);
        assert_eq!(node.indent, 4);
    }
}
