use std::collections::HashSet;

use serde::Serialize;

use crate::dom::{Document, NodeId};

use super::{
    identity::{resolve, ResolvedId},
    rules::{classify, Classification, VIDEO},
};

// Set to true to trace every scan
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// A candidate that was tagged during this scan and is ready for session
/// wiring.
#[derive(Debug, Clone)]
pub struct Detected {
    pub node: NodeId,
    pub identity: ResolvedId,
    pub classification: Classification,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionStats {
    pub scans: u64,
    pub fallback_scans: u64,
    pub tagged: u64,
}

/// Finds candidate videos and tags each one exactly once.
///
/// The processed set is the only idempotence guard; structural-change scans,
/// the fallback scan and the periodic rescan all consult it.
#[derive(Debug, Default)]
pub struct DetectionEngine {
    processed: HashSet<NodeId>,
    stats: DetectionStats,
}

impl DetectionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `root` and everything under it.
    pub fn scan(&mut self, doc: &Document, root: NodeId) -> Vec<Detected> {
        self.stats.scans += 1;
        let found = self.scan_subtree(doc, root);
        if !found.is_empty() {
            log_info!("scan of {} tagged {} new video(s)", root, found.len());
        }
        found
    }

    /// Handle one batch of added subtrees. When none of them holds a new
    /// candidate, the whole document is scanned once as a fallback.
    pub fn on_structural_change(&mut self, doc: &Document, added: &[NodeId]) -> Vec<Detected> {
        let mut found = Vec::new();
        for node in added.iter().copied().filter(|n| doc.is_attached(*n)) {
            self.stats.scans += 1;
            found.extend(self.scan_subtree(doc, node));
        }

        if found.is_empty() && !added.is_empty() {
            self.stats.fallback_scans += 1;
            found = self.scan_subtree(doc, doc.root());
            if !found.is_empty() {
                log_info!("fallback scan found {} missed video(s)", found.len());
            }
        }

        found
    }

    fn scan_subtree(&mut self, doc: &Document, root: NodeId) -> Vec<Detected> {
        if !doc.is_attached(root) {
            return Vec::new();
        }

        let mut found = Vec::new();
        for node in doc.query_all(root, &VIDEO) {
            if self.processed.contains(&node) {
                continue;
            }

            let classification = classify(doc, node);
            if !classification.is_candidate() {
                log_debug!("{} rejected: {:?}", node, classification);
                continue;
            }

            let Some(identity) = resolve(doc, node) else {
                continue;
            };

            self.processed.insert(node);
            self.stats.tagged += 1;
            log_debug!("{} tagged as {} ({:?})", node, identity.id, identity.source);
            found.push(Detected {
                node,
                identity,
                classification,
            });
        }
        found
    }

    pub fn is_processed(&self, node: NodeId) -> bool {
        self.processed.contains(&node)
    }

    pub fn tracked_count(&self) -> usize {
        self.processed.len()
    }

    pub fn stats(&self) -> DetectionStats {
        self.stats
    }

    /// Drop tags for elements that left the document. Returns how many were
    /// tagged.
    pub fn forget(&mut self, removed: &[NodeId]) -> usize {
        let before = self.processed.len();
        for node in removed {
            self.processed.remove(node);
        }
        let forgotten = before - self.processed.len();
        if forgotten > 0 {
            log_debug!("forgot {} removed video(s)", forgotten);
        }
        forgotten
    }

    /// Forget every tag so the next scan re-discovers the current document.
    pub fn reset(&mut self) {
        self.processed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{ElementSpec, Rect};

    fn reel(doc: &mut Document, parent: NodeId, code: &str) -> NodeId {
        let article = doc.insert(parent, ElementSpec::new("article")).unwrap();
        doc.insert(article, ElementSpec::new("a").attr("href", &format!("/reel/{code}/")))
            .unwrap();
        doc.insert(
            article,
            ElementSpec::new("video")
                .attr("playsinline", "")
                .rect(Rect::new(0.0, 0.0, 360.0, 640.0)),
        )
        .unwrap()
    }

    #[test]
    fn double_scan_tags_each_candidate_once() {
        let mut doc = Document::new();
        let root = doc.root();
        reel(&mut doc, root, "A");
        reel(&mut doc, root, "B");

        let mut engine = DetectionEngine::new();
        let first = engine.scan(&doc, root);
        assert_eq!(first.len(), 2);
        let after_one = engine.tracked_count();

        let second = engine.scan(&doc, root);
        assert!(second.is_empty());
        assert_eq!(engine.tracked_count(), after_one);
        assert_eq!(engine.stats().tagged, 2);
    }

    #[test]
    fn targeted_scan_only_sees_added_subtree() {
        let mut doc = Document::new();
        let root = doc.root();
        let feed = doc.insert(root, ElementSpec::new("main")).unwrap();
        let mut engine = DetectionEngine::new();

        let first = reel(&mut doc, feed, "A");
        let found = engine.on_structural_change(&doc, &[first]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].identity.id, "A");
        assert_eq!(engine.stats().fallback_scans, 0);
    }

    #[test]
    fn empty_batch_triggers_single_fallback_scan() {
        let mut doc = Document::new();
        let root = doc.root();
        let missed = reel(&mut doc, root, "MISSED");
        let noise = doc.insert(root, ElementSpec::new("span")).unwrap();

        let mut engine = DetectionEngine::new();
        let found = engine.on_structural_change(&doc, &[noise]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].node, missed);
        assert_eq!(engine.stats().fallback_scans, 1);

        // Same batch again: fallback runs but finds nothing new.
        let found = engine.on_structural_change(&doc, &[noise]);
        assert!(found.is_empty());
        assert_eq!(engine.stats().fallback_scans, 2);
        assert_eq!(engine.tracked_count(), 1);
    }

    #[test]
    fn hidden_video_is_picked_up_once_it_gets_a_size() {
        let mut doc = Document::new();
        let root = doc.root();
        let video = doc
            .insert(root, ElementSpec::new("video").attr("playsinline", ""))
            .unwrap();

        let mut engine = DetectionEngine::new();
        assert!(engine.scan(&doc, root).is_empty());
        assert!(!engine.is_processed(video));

        doc.set_rect(video, Rect::new(0.0, 0.0, 400.0, 400.0)).unwrap();
        assert_eq!(engine.scan(&doc, root).len(), 1);
        assert!(engine.is_processed(video));
    }

    #[test]
    fn reset_allows_rediscovery() {
        let mut doc = Document::new();
        let root = doc.root();
        reel(&mut doc, root, "A");

        let mut engine = DetectionEngine::new();
        assert_eq!(engine.scan(&doc, root).len(), 1);
        engine.reset();
        assert_eq!(engine.tracked_count(), 0);
        assert_eq!(engine.scan(&doc, root).len(), 1);
    }

    #[test]
    fn removed_reels_leave_no_tags_behind() {
        let mut doc = Document::new();
        let root = doc.root();
        let mut engine = DetectionEngine::new();

        for i in 0..40 {
            let video = reel(&mut doc, root, &format!("R{i}"));
            let article = doc.element(video).unwrap().parent().unwrap();
            assert_eq!(engine.on_structural_change(&doc, &[article]).len(), 1);

            let removed = doc.remove(article).unwrap();
            assert_eq!(engine.forget(&removed), 1);
        }

        assert_eq!(engine.tracked_count(), 0);
        assert_eq!(engine.stats().tagged, 40);
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn detached_nodes_are_skipped() {
        let mut doc = Document::new();
        let root = doc.root();
        let video = reel(&mut doc, root, "GONE");
        let article = doc.element(video).unwrap().parent().unwrap();
        doc.remove(article).unwrap();

        let mut engine = DetectionEngine::new();
        assert!(engine.on_structural_change(&doc, &[article]).is_empty());
        assert!(engine.scan(&doc, root).is_empty());
    }
}
