//! Room keys
//!
//! A `RoomKey` names the topic a room broadcasts for: one forum, article or
//! poll. Keys are plain values; two keys built from the same parts are equal
//! and resolve to the same room.

use std::fmt;
use std::str::FromStr;

use crate::utils::error::RoomKeyError;

/// Kind of application entity a room is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicType {
    Forum,
    Article,
    Poll,
}

impl TopicType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicType::Forum => "forum",
            TopicType::Article => "article",
            TopicType::Poll => "poll",
        }
    }
}

impl fmt::Display for TopicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicType {
    type Err = RoomKeyError;

    /// Accepts singular, plural and single-letter spellings, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RoomKeyError::MissingType);
        }
        match s.to_ascii_lowercase().as_str() {
            "forum" | "forums" | "f" => Ok(TopicType::Forum),
            "article" | "articles" | "a" => Ok(TopicType::Article),
            "poll" | "polls" | "p" => Ok(TopicType::Poll),
            _ => Err(RoomKeyError::UnknownType(s.to_string())),
        }
    }
}

/// Identifies exactly one room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    topic_type: TopicType,
    topic_id: String,
}

impl RoomKey {
    pub fn new(topic_type: TopicType, topic_id: impl Into<String>) -> Result<Self, RoomKeyError> {
        let topic_id = topic_id.into();
        if topic_id.trim().is_empty() {
            return Err(RoomKeyError::MissingId);
        }
        Ok(Self {
            topic_type,
            topic_id,
        })
    }

    /// Builds a key from the raw `{type}` and `{id}` parts of a request.
    pub fn parse(topic_type: &str, topic_id: &str) -> Result<Self, RoomKeyError> {
        let topic_type = topic_type.parse()?;
        Self::new(topic_type, topic_id)
    }

    pub fn topic_type(&self) -> TopicType {
        self.topic_type
    }

    pub fn topic_id(&self) -> &str {
        &self.topic_id
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.topic_type, self.topic_id)
    }
}
