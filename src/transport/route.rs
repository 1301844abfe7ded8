use crate::broker::RoomKey;
use crate::utils::error::RoomKeyError;

/// Path prefix of the subscribe endpoint: `/websocket/{type}/{id}`.
pub const SUBSCRIBE_PREFIX: &str = "websocket";

/// Path prefix of the HTTP publish endpoint: `/publish/{type}/{id}`.
pub const PUBLISH_PREFIX: &str = "publish";

/// Extracts the room key from a subscribe request path.
pub fn room_key_from_path(path: &str) -> Result<RoomKey, RoomKeyError> {
    room_key_under(SUBSCRIBE_PREFIX, path)
}

/// Extracts the room key from a publish request path.
pub fn room_key_from_publish_path(path: &str) -> Result<RoomKey, RoomKeyError> {
    room_key_under(PUBLISH_PREFIX, path)
}

fn room_key_under(prefix: &str, path: &str) -> Result<RoomKey, RoomKeyError> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());

    if segments.next() != Some(prefix) {
        return Err(RoomKeyError::UnknownRoute(path.to_string()));
    }
    let topic_type = segments.next().ok_or(RoomKeyError::MissingType)?;
    let topic_id = segments.next().ok_or(RoomKeyError::MissingId)?;
    if segments.next().is_some() {
        return Err(RoomKeyError::UnknownRoute(path.to_string()));
    }

    RoomKey::parse(topic_type, topic_id)
}

/// Path a client connects to for `key`.
pub fn path_for(key: &RoomKey) -> String {
    format!(
        "/{SUBSCRIBE_PREFIX}/{}/{}",
        key.topic_type(),
        key.topic_id()
    )
}

/// Path a publisher posts to for `key`.
pub fn publish_path_for(key: &RoomKey) -> String {
    format!("/{PUBLISH_PREFIX}/{}/{}", key.topic_type(), key.topic_id())
}
