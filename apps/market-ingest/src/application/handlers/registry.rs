//! Channel → handler lookup, built once at startup and read-only afterwards.

use std::collections::HashMap;

use super::{SharedHandler, Subscription};

/// Handlers indexed by channel, preserving registration order.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<SharedHandler>,
    by_channel: HashMap<String, Vec<SharedHandler>>,
}

impl HandlerRegistry {
    /// Build a registry from handlers in registration order.
    #[must_use]
    pub fn new(handlers: Vec<SharedHandler>) -> Self {
        let mut by_channel: HashMap<String, Vec<SharedHandler>> = HashMap::new();
        for handler in &handlers {
            by_channel
                .entry(handler.channel().to_string())
                .or_default()
                .push(SharedHandler::clone(handler));
        }
        Self {
            handlers,
            by_channel,
        }
    }

    /// Handlers registered for a channel, in registration order.
    #[must_use]
    pub fn handlers_for(&self, channel: &str) -> &[SharedHandler] {
        self.by_channel
            .get(channel)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every handler, in registration order.
    #[must_use]
    pub fn handlers(&self) -> &[SharedHandler] {
        &self.handlers
    }

    /// One subscription per handler, in registration order.
    pub fn subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.handlers.iter().map(|h| h.subscription())
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels: Vec<&str> = self.handlers.iter().map(|h| h.channel()).collect();
        f.debug_struct("HandlerRegistry")
            .field("channels", &channels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::application::handlers::{ChannelHandler, HandleOutcome, HandlerError};
    use crate::domain::normalize::Payload;

    struct Named(Subscription);

    #[async_trait]
    impl ChannelHandler for Named {
        fn subscription(&self) -> &Subscription {
            &self.0
        }

        async fn handle(&self, _payload: Payload) -> Result<HandleOutcome, HandlerError> {
            Ok(HandleOutcome::Stored)
        }
    }

    fn handler(channel: &str) -> SharedHandler {
        Arc::new(Named(Subscription::new(channel)))
    }

    #[test]
    fn groups_by_channel_in_order() {
        let first = handler("price");
        let second = handler("news");
        let third = handler("price");
        let registry = HandlerRegistry::new(vec![first.clone(), second, third.clone()]);

        let price = registry.handlers_for("price");
        assert_eq!(price.len(), 2);
        assert!(Arc::ptr_eq(&price[0], &first));
        assert!(Arc::ptr_eq(&price[1], &third));
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry
                .subscriptions()
                .map(|s| s.channel.as_str())
                .collect::<Vec<_>>(),
            vec!["price", "news", "price"]
        );
    }

    #[test]
    fn unknown_channel_is_empty() {
        let registry = HandlerRegistry::new(vec![handler("price")]);
        assert!(registry.handlers_for("gex").is_empty());
    }
}
