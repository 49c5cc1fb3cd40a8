//! Channel names and naming conventions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name the client registry uses for "every channel".
pub const WILDCARD: &str = "*";

/// Characters Redis treats as glob syntax in PSUBSCRIBE; never valid in a channel name.
const PATTERN_CHARS: [char; 4] = ['*', '?', '[', ']'];

/// A pub/sub channel, named `<entity>:<verb>`.
///
/// Known channels get their own variant; anything else that is a valid name
/// flows through as [`Channel::Other`] so new channels need no code change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Channel {
    RecipeCreated,
    RecipeUpdated,
    RecipeDeleted,
    BlogCreated,
    BlogUpdated,
    BlogDeleted,
    CommentCreated,
    CommentDeleted,
    FavoriteAdded,
    FavoriteRemoved,
    NotificationCreated,
    Other(String),
}

impl Channel {
    const KNOWN: [Channel; 11] = [
        Channel::RecipeCreated,
        Channel::RecipeUpdated,
        Channel::RecipeDeleted,
        Channel::BlogCreated,
        Channel::BlogUpdated,
        Channel::BlogDeleted,
        Channel::CommentCreated,
        Channel::CommentDeleted,
        Channel::FavoriteAdded,
        Channel::FavoriteRemoved,
        Channel::NotificationCreated,
    ];

    /// Default relay subscription list: every known channel.
    pub fn defaults() -> Vec<Channel> {
        Self::KNOWN.to_vec()
    }

    /// Build `<entity>:<verb>`, validating the result.
    pub fn for_entity(entity: &str, verb: &str) -> Result<Self, InvalidChannel> {
        format!("{}:{}", entity, verb).parse()
    }

    pub fn as_str(&self) -> &str {
        match self {
            Channel::RecipeCreated => "recipe:created",
            Channel::RecipeUpdated => "recipe:updated",
            Channel::RecipeDeleted => "recipe:deleted",
            Channel::BlogCreated => "blog:created",
            Channel::BlogUpdated => "blog:updated",
            Channel::BlogDeleted => "blog:deleted",
            Channel::CommentCreated => "comment:created",
            Channel::CommentDeleted => "comment:deleted",
            Channel::FavoriteAdded => "favorite:added",
            Channel::FavoriteRemoved => "favorite:removed",
            Channel::NotificationCreated => "notification:created",
            Channel::Other(name) => name,
        }
    }

    /// Entity half of the name (`recipe` for `recipe:created`).
    pub fn entity(&self) -> &str {
        self.as_str().split(':').next().unwrap_or_default()
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Channel::Other(_))
    }
}

impl FromStr for Channel {
    type Err = InvalidChannel;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if name.is_empty() {
            return Err(InvalidChannel::Empty);
        }
        if name.contains(&PATTERN_CHARS[..]) {
            return Err(InvalidChannel::Pattern(name.to_string()));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(InvalidChannel::Whitespace(name.to_string()));
        }
        let known = Self::KNOWN.iter().find(|c| c.as_str() == name).cloned();
        Ok(known.unwrap_or_else(|| Channel::Other(name.to_string())))
    }
}

impl TryFrom<String> for Channel {
    type Error = InvalidChannel;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidChannel {
    #[error("channel name is empty")]
    Empty,
    #[error("channel name contains pattern characters: {0}")]
    Pattern(String),
    #[error("channel name contains whitespace: {0}")]
    Whitespace(String),
}

/// Key a client registration is filed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Channel(Channel),
    Wildcard,
}

impl FromStr for Topic {
    type Err = InvalidChannel;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if name == WILDCARD {
            Ok(Topic::Wildcard)
        } else {
            name.parse().map(Topic::Channel)
        }
    }
}

impl From<Channel> for Topic {
    fn from(channel: Channel) -> Self {
        Topic::Channel(channel)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Channel(c) => fmt::Display::fmt(c, f),
            Topic::Wildcard => f.write_str(WILDCARD),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_channels() {
        assert_eq!("recipe:created".parse::<Channel>(), Ok(Channel::RecipeCreated));
        assert_eq!("favorite:removed".parse::<Channel>(), Ok(Channel::FavoriteRemoved));
        assert_eq!(
            "notification:created".parse::<Channel>(),
            Ok(Channel::NotificationCreated)
        );
    }

    #[test]
    fn unknown_channels_pass_through() {
        let channel: Channel = "rating:added".parse().unwrap();
        assert_eq!(channel, Channel::Other("rating:added".to_string()));
        assert!(!channel.is_known());
        assert_eq!(channel.entity(), "rating");
        assert_eq!(channel.to_string(), "rating:added");
    }

    #[test]
    fn rejects_empty_and_patterns() {
        assert_eq!("".parse::<Channel>(), Err(InvalidChannel::Empty));
        assert!(matches!(
            "recipe:*".parse::<Channel>(),
            Err(InvalidChannel::Pattern(_))
        ));
        assert!(matches!(
            "blog:[cd]eleted".parse::<Channel>(),
            Err(InvalidChannel::Pattern(_))
        ));
        assert!(matches!(
            "recipe:created ".parse::<Channel>(),
            Err(InvalidChannel::Whitespace(_))
        ));
    }

    #[test]
    fn defaults_cover_every_known_channel() {
        let defaults = Channel::defaults();
        assert_eq!(defaults.len(), 11);
        assert!(defaults.iter().all(Channel::is_known));
    }

    #[test]
    fn for_entity_builds_name() {
        assert_eq!(Channel::for_entity("blog", "updated"), Ok(Channel::BlogUpdated));
        assert!(Channel::for_entity("recipe", "*").is_err());
    }

    #[test]
    fn serde_uses_plain_names() {
        let json = serde_json::to_string(&Channel::CommentDeleted).unwrap();
        assert_eq!(json, "\"comment:deleted\"");
        let back: Channel = serde_json::from_str("\"comment:deleted\"").unwrap();
        assert_eq!(back, Channel::CommentDeleted);
        assert!(serde_json::from_str::<Channel>("\"\"").is_err());
    }

    #[test]
    fn topic_wildcard() {
        assert_eq!("*".parse::<Topic>(), Ok(Topic::Wildcard));
        assert_eq!(
            "blog:created".parse::<Topic>(),
            Ok(Topic::Channel(Channel::BlogCreated))
        );
        assert_eq!(Topic::Wildcard.to_string(), "*");
    }
}
