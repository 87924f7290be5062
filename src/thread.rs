// src/thread.rs
use crate::models::Comment;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
}

/// Deepest nesting level rendered; replies below it are listed beside their
/// ancestor at this level.
pub const MAX_DEPTH: usize = 32;

impl CommentNode {
    /// Number of comments in this subtree, including this one.
    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(&node.replies);
        }
        count
    }
}

fn oldest_first(a: &Comment, b: &Comment) -> Ordering {
    a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
}

fn newest_first(a: &Comment, b: &Comment) -> Ordering {
    oldest_first(b, a)
}

/// Builds the reply forest for one stock's comments.
///
/// Top-level comments come back newest first, replies at every depth oldest
/// first. A reply whose parent is missing, or that points at itself, is
/// promoted to the top level. Every input comment appears exactly once in
/// the output, even when the parent links form a cycle. Nesting never goes
/// past [`MAX_DEPTH`], so arbitrarily long reply chains stay cheap to walk
/// and serialize.
pub fn build_comment_tree(comments: Vec<Comment>) -> Vec<CommentNode> {
    let n = comments.len();
    let index: HashMap<&str, usize> = comments
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();

    let mut roots = Vec::new();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, comment) in comments.iter().enumerate() {
        let parent = comment
            .parent_comment
            .as_deref()
            .filter(|parent| *parent != comment.id)
            .and_then(|parent| index.get(parent));
        match parent {
            Some(&p) => children[p].push(i),
            None => roots.push(i),
        }
    }
    drop(index);

    // Anything not reachable from a root sits on a parent cycle; those are
    // visited after the real roots, newest first.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| newest_first(&comments[a], &comments[b]));
    roots.sort_by(|&a, &b| newest_first(&comments[a], &comments[b]));

    // Ancestors are always placed before their descendants.
    let mut visited = vec![false; n];
    let mut depth = vec![0usize; n];
    let mut host: Vec<Option<usize>> = vec![None; n];
    let mut placed = Vec::with_capacity(n);
    for start in roots.into_iter().chain(order) {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        placed.push(start);
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            for &k in &children[i] {
                if visited[k] {
                    continue;
                }
                visited[k] = true;
                if depth[i] < MAX_DEPTH {
                    host[k] = Some(i);
                    depth[k] = depth[i] + 1;
                } else {
                    host[k] = host[i];
                    depth[k] = depth[i];
                }
                placed.push(k);
                stack.push(k);
            }
        }
    }

    let mut slots: Vec<Option<Comment>> = comments.into_iter().map(Some).collect();
    let mut replies: Vec<Vec<CommentNode>> = (0..n).map(|_| Vec::new()).collect();
    let mut forest = Vec::new();
    for &i in placed.iter().rev() {
        let comment = match slots[i].take() {
            Some(comment) => comment,
            None => continue,
        };
        let mut kids = std::mem::take(&mut replies[i]);
        kids.sort_by(|a, b| oldest_first(&a.comment, &b.comment));
        let node = CommentNode {
            comment,
            replies: kids,
        };
        match host[i] {
            Some(h) => replies[h].push(node),
            None => forest.push(node),
        }
    }
    forest.sort_by(|a, b| newest_first(&a.comment, &b.comment));
    forest
}
