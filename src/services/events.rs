//! Conventional event shapes for the recipe app's mutations.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::channel::Channel;
use crate::models::notification::{entity_payload, FavoriteChange, UserNotification};
use crate::services::publisher::EventPublisher;

/// Publishes `<entity>:created|updated|deleted` with the standard body.
pub struct EntityEvents<'a> {
    publisher: &'a EventPublisher,
    entity: &'a str,
}

impl<'a> EntityEvents<'a> {
    fn emit(&self, verb: &str, id: &str, snapshot: Option<Value>, author_id: &str) {
        match Channel::for_entity(self.entity, verb) {
            Ok(channel) => self
                .publisher
                .publish(&channel, &entity_payload(self.entity, id, snapshot, Some(author_id))),
            Err(e) => warn!(entity = %self.entity, verb, error = %e, "invalid entity channel"),
        }
    }

    fn snapshot<T: Serialize + ?Sized>(&self, snapshot: &T) -> Option<Value> {
        match serde_json::to_value(snapshot) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(entity = %self.entity, error = %e, "snapshot serialization failed");
                None
            }
        }
    }

    pub fn created<T: Serialize + ?Sized>(&self, id: &str, snapshot: &T, author_id: &str) {
        if let Some(snapshot) = self.snapshot(snapshot) {
            self.emit("created", id, Some(snapshot), author_id);
        }
    }

    pub fn updated<T: Serialize + ?Sized>(&self, id: &str, snapshot: &T, author_id: &str) {
        if let Some(snapshot) = self.snapshot(snapshot) {
            self.emit("updated", id, Some(snapshot), author_id);
        }
    }

    pub fn deleted(&self, id: &str, author_id: &str) {
        self.emit("deleted", id, None, author_id);
    }
}

impl EventPublisher {
    /// Event helpers for one entity type (`recipe`, `blog`, `comment`, ...).
    pub fn entity<'a>(&'a self, entity: &'a str) -> EntityEvents<'a> {
        EntityEvents {
            publisher: self,
            entity,
        }
    }

    pub fn favorite_added(&self, recipe_id: &str, user_id: &str) {
        self.favorite(Channel::FavoriteAdded, recipe_id, user_id);
    }

    pub fn favorite_removed(&self, recipe_id: &str, user_id: &str) {
        self.favorite(Channel::FavoriteRemoved, recipe_id, user_id);
    }

    fn favorite(&self, channel: Channel, recipe_id: &str, user_id: &str) {
        let change = FavoriteChange {
            recipe_id: recipe_id.to_string(),
            user_id: user_id.to_string(),
        };
        self.publish(&channel, &change);
    }

    /// Announce a persisted user notification on `notification:created`.
    ///
    /// Self-notifications are suppressed; returns whether an event was queued.
    pub fn notification_created(&self, notification: &UserNotification) -> bool {
        if notification.is_self_notification() {
            debug!(user_id = %notification.user_id, "self notification suppressed");
            return false;
        }
        self.publish(&Channel::NotificationCreated, notification);
        true
    }
}
