//! Navigation events published by the host integration
//!
//! The host owns routing; it publishes every location change on a
//! [`NavigationBus`] and the engine subscribes. Nothing here hooks the
//! host's history implementation.

use tokio::sync::broadcast;
use tracing::debug;

use crate::types::ItemId;

/// Buffered events per subscriber before lagging
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationEvent {
    /// Location string, e.g. `#/details?id=abc`
    pub location: String,
}

impl NavigationEvent {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NavigationBus {
    tx: broadcast::Sender<NavigationEvent>,
}

impl Default for NavigationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NavigationEvent> {
        self.tx.subscribe()
    }

    /// Publish a location change. Returns the number of subscribers reached.
    pub fn publish(&self, location: impl Into<String>) -> usize {
        let event = NavigationEvent::new(location);
        debug!(location = %event.location, "Publishing navigation");
        self.tx.send(event).unwrap_or(0)
    }
}

/// `id` query parameter of a location (`#/details?id=abc&serverId=x` → `abc`)
pub fn location_item_id(location: &str) -> Option<ItemId> {
    let (_, query) = location.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.eq_ignore_ascii_case("id"))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
        .map(ItemId::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_item_id() {
        assert_eq!(location_item_id("#/details?id=abc&serverId=1"), Some(ItemId::from("abc")));
        assert_eq!(location_item_id("#/video?serverId=1&id=xyz"), Some(ItemId::from("xyz")));
        assert_eq!(location_item_id("#/details?id="), None);
        assert_eq!(location_item_id("#/home"), None);
        // parentId is not the item id
        assert_eq!(location_item_id("#/list?parentId=p"), None);
    }

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = NavigationBus::new();
        let mut rx = bus.subscribe();
        assert_eq!(bus.publish("#/home"), 1);
        assert_eq!(rx.recv().await.unwrap(), NavigationEvent::new("#/home"));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = NavigationBus::new();
        assert_eq!(bus.publish("#/home"), 0);
    }
}
