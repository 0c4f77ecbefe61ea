use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::core::types::{AnalysisItem, AnalysisResult, PostAggregate};
use crate::orchestration::observer::RunObserver;

/// Groups per-image results into per-post records, keeping first-seen post
/// order. Results are appended in arrival order.
pub struct PostAggregator {
    posts: Vec<PostAggregate>,
    index: HashMap<String, usize>,
    rejected: HashSet<String>,
    observer: Arc<dyn RunObserver>,
}

impl PostAggregator {
    pub fn new(observer: Arc<dyn RunObserver>) -> Self {
        Self {
            posts: Vec::new(),
            index: HashMap::new(),
            rejected: HashSet::new(),
            observer,
        }
    }

    /// Returns false when the result was discarded because its post lacks
    /// the metadata needed to create an aggregate.
    pub fn add(&mut self, item: &AnalysisItem, result: AnalysisResult) -> bool {
        if let Some(&slot) = self.index.get(&item.post_id) {
            self.posts[slot].push(item.image_path.clone(), result);
            return true;
        }

        if self.rejected.contains(&item.post_id) {
            return false;
        }

        let username = match item.username() {
            Some(username) => username.to_string(),
            None => {
                self.observer
                    .post_dropped(&item.post_id, "missing username metadata");
                self.rejected.insert(item.post_id.clone());
                return false;
            }
        };

        let mut post = PostAggregate::new(item.post_id.clone(), username);
        post.push(item.image_path.clone(), result);
        self.index.insert(item.post_id.clone(), self.posts.len());
        self.posts.push(post);
        true
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    /// Hand the finished aggregates over, leaving the aggregator empty
    pub fn take_posts(&mut self) -> Vec<PostAggregate> {
        self.index.clear();
        self.rejected.clear();
        std::mem::take(&mut self.posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::HookSlide;
    use crate::orchestration::observer::RecordingObserver;

    fn hook(confidence: f64) -> AnalysisResult {
        AnalysisResult::HookSlide(HookSlide {
            is_hook_slide: false,
            confidence,
            theme: None,
            text: None,
            target_vibe: None,
        })
    }

    fn item(post: &str, path: &str) -> AnalysisItem {
        AnalysisItem::new(post, path).with_metadata("username", "ana")
    }

    #[test]
    fn test_groups_by_post_in_first_seen_order() {
        let mut aggregator = PostAggregator::new(Arc::new(RecordingObserver::default()));

        assert!(aggregator.add(&item("p2", "b1.jpg"), hook(0.1)));
        assert!(aggregator.add(&item("p1", "a1.jpg"), hook(0.2)));
        assert!(aggregator.add(&item("p2", "b2.jpg"), hook(0.3)));

        let posts = aggregator.take_posts();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].post_id, "p2");
        assert_eq!(posts[0].image_paths(), ["b1.jpg", "b2.jpg"]);
        assert_eq!(posts[0].analyses(), [hook(0.1), hook(0.3)]);
        assert_eq!(posts[1].post_id, "p1");
        assert_eq!(posts[1].username, "ana");

        for post in &posts {
            assert_eq!(post.image_paths().len(), post.analyses().len());
        }
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_post_without_username_is_dropped_once() {
        let observer = Arc::new(RecordingObserver::default());
        let mut aggregator = PostAggregator::new(observer.clone());

        let anonymous = AnalysisItem::new("p9", "x.jpg");
        assert!(!aggregator.add(&anonymous, hook(0.5)));
        assert!(!aggregator.add(&anonymous, hook(0.6)));
        assert!(aggregator.add(&item("p1", "a.jpg"), hook(0.7)));

        assert_eq!(observer.dropped_posts(), vec!["p9".to_string()]);
        assert_eq!(aggregator.len(), 1);
    }
}
