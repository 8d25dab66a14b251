use crate::errors::ApiError;
use crate::ids::{RoomId, UserId};
use crate::models::Message;

/// Boundary between the messaging surface and durable storage.
///
/// The REST send path writes through this; the live fan-out path does not
/// touch it. Broadcast and persistence share no lock and no call path.
pub trait MessagePersistenceGateway: Send + Sync {
    /// True iff `user_id` is currently a member of `chatroom_id`.
    fn authorize_membership(&self, chatroom_id: &RoomId, user_id: &UserId) -> Result<bool, ApiError>;

    /// Persist a message with a store-assigned id and server timestamp.
    ///
    /// Trims surrounding whitespace and truncates to
    /// [`crate::models::MESSAGE_MAX_LENGTH`] characters before storing.
    /// Fails with `Forbidden` when the sender is not a member and
    /// `Validation` when the content is empty after trimming.
    fn append_message(
        &self,
        chatroom_id: &RoomId,
        user_id: &UserId,
        content: &str,
    ) -> Result<Message, ApiError>;
}
