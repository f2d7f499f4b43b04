//! Comment thread assembly.
//!
//! Turns the flat comment list of a publication into top-level comments with
//! their direct replies. Only one level of nesting exists: a reply whose parent
//! is not a top-level comment in the input is an orphan and is left out, as is
//! any reply whose parent was deleted.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::{Comment, CommentThread};

fn chronological(a: &Comment, b: &Comment) -> Ordering {
    a.created_at
        .total_cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Group `comments` into threads ordered by the parent's `created_at`, each
/// with its replies in ascending `created_at`. Pure and deterministic.
pub fn assemble(comments: &[Comment]) -> Vec<CommentThread> {
    let mut roots: Vec<&Comment> = Vec::new();
    let mut replies_by_parent: HashMap<&str, Vec<&Comment>> = HashMap::new();

    for comment in comments {
        match comment.parent() {
            None => roots.push(comment),
            Some(parent) => replies_by_parent.entry(parent).or_default().push(comment),
        }
    }

    roots.sort_by(|a, b| chronological(a, b));

    let threads: Vec<CommentThread> = roots
        .into_iter()
        .map(|root| {
            let mut replies: Vec<Comment> = replies_by_parent
                .remove(root.id.as_str())
                .unwrap_or_default()
                .into_iter()
                .cloned()
                .collect();
            replies.sort_by(chronological);
            CommentThread {
                parent: root.clone(),
                replies,
            }
        })
        .collect();

    let orphans: usize = replies_by_parent.values().map(Vec::len).sum();
    if orphans > 0 {
        tracing::debug!(orphans, "Dropped replies without a top-level parent");
    }

    threads
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: &str, created_at: f64, parent_id: Option<&str>) -> Comment {
        Comment {
            id: id.to_string(),
            publication_id: "p1".to_string(),
            author_uid: format!("author-{}", id),
            author_username: id.to_string(),
            author_avatar_url: None,
            text: format!("text of {}", id),
            created_at,
            parent_id: parent_id.map(str::to_string),
        }
    }

    fn parent_ids(threads: &[CommentThread]) -> Vec<&str> {
        threads.iter().map(|t| t.id()).collect()
    }

    #[test]
    fn test_roots_and_replies_are_chronological() {
        let comments = vec![
            comment("r30", 30.0, None),
            comment("r10", 10.0, None),
            comment("r20", 20.0, None),
            comment("late-reply", 50.0, Some("r10")),
            comment("early-reply", 15.0, Some("r10")),
        ];

        let threads = assemble(&comments);

        assert_eq!(parent_ids(&threads), vec!["r10", "r20", "r30"]);
        let replies: Vec<&str> = threads[0].replies.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(replies, vec!["early-reply", "late-reply"]);
        assert!(threads[1].replies.is_empty());
    }

    #[test]
    fn test_orphans_are_excluded() {
        let comments = vec![
            comment("a", 1.0, None),
            comment("c", 2.0, Some("nonexistent")),
        ];

        let threads = assemble(&comments);

        assert_eq!(threads.len(), 1);
        assert!(threads
            .iter()
            .all(|t| t.parent.id != "c" && t.replies.iter().all(|r| r.id != "c")));
    }

    #[test]
    fn test_reply_to_reply_is_dropped() {
        let comments = vec![
            comment("root", 1.0, None),
            comment("reply", 2.0, Some("root")),
            comment("nested", 3.0, Some("reply")),
        ];

        let threads = assemble(&comments);

        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].replies.len(), 1);
        assert_eq!(threads[0].replies[0].id, "reply");
    }

    #[test]
    fn test_deleting_parent_hides_its_replies() {
        let comments = vec![
            comment("kept", 1.0, None),
            comment("reply-to-deleted", 2.0, Some("deleted")),
        ];

        assert_eq!(parent_ids(&assemble(&comments)), vec!["kept"]);
    }

    #[test]
    fn test_empty_parent_id_counts_as_root() {
        let comments = vec![comment("a", 1.0, Some(""))];
        assert_eq!(parent_ids(&assemble(&comments)), vec!["a"]);
    }

    #[test]
    fn test_assemble_is_idempotent_and_order_independent() {
        let comments = vec![
            comment("b", 5.0, None),
            comment("a", 5.0, None),
            comment("x", 7.0, Some("a")),
            comment("y", 6.0, Some("b")),
        ];
        let mut reversed = comments.clone();
        reversed.reverse();

        let first = assemble(&comments);
        assert_eq!(first, assemble(&comments));
        assert_eq!(first, assemble(&reversed));
        assert_eq!(parent_ids(&first), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(assemble(&[]).is_empty());
    }
}
