use chitchat_core::errors::ApiError;
use chitchat_core::gateway::MessagePersistenceGateway;
use chitchat_core::ids::{RoomId, UserId};
use chitchat_core::models::{truncate_content, Message};

use crate::chatrooms::ChatroomRepo;
use crate::database::Database;
use crate::messages::MessageRepo;

/// [`MessagePersistenceGateway`] backed by the SQLite repos.
pub struct StoreGateway {
    chatrooms: ChatroomRepo,
    messages: MessageRepo,
}

impl StoreGateway {
    pub fn new(db: Database) -> Self {
        Self {
            chatrooms: ChatroomRepo::new(db.clone()),
            messages: MessageRepo::new(db),
        }
    }
}

impl MessagePersistenceGateway for StoreGateway {
    fn authorize_membership(&self, chatroom_id: &RoomId, user_id: &UserId) -> Result<bool, ApiError> {
        Ok(self.chatrooms.is_member(chatroom_id, user_id)?)
    }

    fn append_message(
        &self,
        chatroom_id: &RoomId,
        user_id: &UserId,
        content: &str,
    ) -> Result<Message, ApiError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ApiError::Validation("message content is empty".into()));
        }

        if !self.authorize_membership(chatroom_id, user_id)? {
            return Err(ApiError::Forbidden(
                "user is not a member of this chatroom".into(),
            ));
        }

        let content = truncate_content(content);
        Ok(self.messages.append(chatroom_id, user_id, &content)?)
    }
}
