use std::collections::HashMap;

use uuid::Uuid;

use crate::dom::NodeId;

/// One element's playback subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub handle: Uuid,
    pub node: NodeId,
}

/// Entity id to subscriptions, plus the node reverse index. Nothing is
/// stored on the host elements; tearing down means clearing this.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    by_entity: HashMap<String, Vec<Subscription>>,
    by_node: HashMap<NodeId, String>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `node` under `entity_id`. `None` if the node already is.
    pub fn subscribe(&mut self, entity_id: &str, node: NodeId) -> Option<Uuid> {
        if self.by_node.contains_key(&node) {
            return None;
        }
        let handle = Uuid::new_v4();
        self.by_entity
            .entry(entity_id.to_string())
            .or_default()
            .push(Subscription { handle, node });
        self.by_node.insert(node, entity_id.to_string());
        Some(handle)
    }

    pub fn unsubscribe(&mut self, node: NodeId) -> Option<(String, Subscription)> {
        let entity_id = self.by_node.remove(&node)?;
        let subs = self.by_entity.get_mut(&entity_id)?;
        let index = subs.iter().position(|s| s.node == node)?;
        let subscription = subs.swap_remove(index);
        if subs.is_empty() {
            self.by_entity.remove(&entity_id);
        }
        Some((entity_id, subscription))
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }

    pub fn entity_count(&self) -> usize {
        self.by_entity.len()
    }

    /// Drop every subscription. Returns how many there were.
    pub fn detach_all(&mut self) -> usize {
        let count = self.by_node.len();
        self.by_entity.clear();
        self.by_node.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_indexes_both_ways() {
        let mut registry = ListenerRegistry::new();
        let first = registry.subscribe("A", NodeId(3)).unwrap();
        let second = registry.subscribe("A", NodeId(7)).unwrap();
        assert_ne!(first, second);
        assert!(registry.subscribe("B", NodeId(3)).is_none());

        assert_eq!(registry.entity_count(), 1);
        assert_eq!(registry.len(), 2);

        let (entity, subscription) = registry.unsubscribe(NodeId(7)).unwrap();
        assert_eq!(entity, "A");
        assert_eq!(subscription.handle, second);
        assert_eq!(registry.entity_count(), 1);
    }

    #[test]
    fn unsubscribe_removes_empty_entities() {
        let mut registry = ListenerRegistry::new();
        let handle = registry.subscribe("A", NodeId(3)).unwrap();

        let (entity, subscription) = registry.unsubscribe(NodeId(3)).unwrap();
        assert_eq!(entity, "A");
        assert_eq!(subscription.handle, handle);
        assert_eq!(registry.entity_count(), 0);
        assert!(registry.unsubscribe(NodeId(3)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn detach_all_clears_everything() {
        let mut registry = ListenerRegistry::new();
        registry.subscribe("A", NodeId(1));
        registry.subscribe("B", NodeId(2));
        assert_eq!(registry.detach_all(), 2);
        assert_eq!(registry.entity_count(), 0);
        assert!(registry.unsubscribe(NodeId(1)).is_none());
    }
}
