use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, RoomId, UserId};

/// Hard cap on message content. Longer content is truncated, not rejected.
pub const MESSAGE_MAX_LENGTH: usize = 250;

/// Truncate message content to [`MESSAGE_MAX_LENGTH`] characters.
/// Counts chars, not bytes, so multibyte content never splits a code point.
pub fn truncate_content(content: &str) -> String {
    if content.chars().count() <= MESSAGE_MAX_LENGTH {
        return content.to_owned();
    }
    content.chars().take(MESSAGE_MAX_LENGTH).collect()
}

/// A registered user. `id` is the identity provider's subject and never
/// changes; `profile_pic_url` may be refreshed on login.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub email: String,
    pub created_at: String,
    pub profile_pic_url: Option<String>,
}

/// A chatroom row. `name` stays empty for 1:1 rooms.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chatroom {
    pub id: RoomId,
    pub name: String,
    pub created_by: UserId,
    pub created_at: String,
}

/// Join record linking a chatroom to a user. Unique per (chatroom, user).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatroomMember {
    pub chatroom_id: RoomId,
    pub user_id: UserId,
    pub joined_at: String,
}

/// A persisted message. `id` is store-assigned and monotonically
/// increasing within a room; `created_at` is server-assigned.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chatroom_id: RoomId,
    pub user_id: UserId,
    pub content: String,
    pub created_at: String,
}

/// Member entry as returned by the chatroom list: the join record enriched
/// with the user's profile.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemberProfile {
    pub user_id: UserId,
    pub display_name: String,
    pub email: String,
    pub profile_pic_url: Option<String>,
}

/// A chatroom as the list endpoint returns it: members, last message, and
/// a display picture derived from the other member's profile picture.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatroomSummary {
    pub id: RoomId,
    pub name: String,
    pub created_by: UserId,
    pub created_at: String,
    pub members: Vec<MemberProfile>,
    pub last_message: Option<Message>,
    pub chatroom_pic_url: Option<String>,
}
