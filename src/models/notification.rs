//! Payloads API servers attach to change notifications.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `{"<entity>Id": id, "<entity>": snapshot, "authorId": actor}`.
///
/// The snapshot is omitted for deletions, `authorId` when no user is known.
pub fn entity_payload(
    entity: &str,
    id: &str,
    snapshot: Option<Value>,
    author_id: Option<&str>,
) -> Value {
    let mut body = Map::new();
    body.insert(format!("{}Id", entity), Value::String(id.to_string()));
    if let Some(snapshot) = snapshot {
        body.insert(entity.to_string(), snapshot);
    }
    if let Some(author_id) = author_id {
        body.insert("authorId".to_string(), Value::String(author_id.to_string()));
    }
    Value::Object(body)
}

/// Body of `favorite:added` / `favorite:removed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteChange {
    pub recipe_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RecipeLike,
    RecipeComment,
    BlogLike,
    BlogComment,
    CommentLike,
    CommentReply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Recipe,
    Blog,
    Comment,
}

/// A per-user notification, announced on `notification:created` once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserNotification {
    /// Recipient.
    pub user_id: String,
    /// User who performed the action.
    pub actor_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub target_type: TargetType,
    pub target_id: String,
}

impl UserNotification {
    /// Users are never notified about their own actions.
    pub fn is_self_notification(&self) -> bool {
        self.user_id == self.actor_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_payload_with_snapshot() {
        let payload = entity_payload("recipe", "r1", Some(json!({ "title": "Pho" })), Some("u1"));
        assert_eq!(
            payload,
            json!({ "recipeId": "r1", "recipe": { "title": "Pho" }, "authorId": "u1" })
        );
    }

    #[test]
    fn entity_payload_for_delete_has_no_snapshot() {
        let payload = entity_payload("blog", "b9", None, Some("u2"));
        assert_eq!(payload, json!({ "blogId": "b9", "authorId": "u2" }));
    }

    #[test]
    fn notification_wire_names() {
        let n = UserNotification {
            user_id: "u1".into(),
            actor_id: "u2".into(),
            kind: NotificationKind::CommentReply,
            target_type: TargetType::Comment,
            target_id: "c3".into(),
        };
        assert_eq!(
            serde_json::to_value(&n).unwrap(),
            json!({
                "userId": "u1",
                "actorId": "u2",
                "type": "comment_reply",
                "targetType": "comment",
                "targetId": "c3"
            })
        );
        assert!(!n.is_self_notification());
    }
}
