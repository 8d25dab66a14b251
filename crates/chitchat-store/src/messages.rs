use chrono::Utc;
use tracing::instrument;

use chitchat_core::ids::{RoomId, UserId};
use chitchat_core::models::Message;

use crate::database::Database;
use crate::error::StoreError;

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a message row with a store-assigned id and server timestamp.
    /// Content is stored as given; trimming and truncation happen at the
    /// gateway boundary.
    #[instrument(skip(self, content), fields(room_id = %room_id, user_id = %user_id))]
    pub fn append(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        content: &str,
    ) -> Result<Message, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO messages (chatroom_id, user_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![room_id.as_str(), user_id.as_str(), content, now],
            )?;
            Ok(Message {
                id: conn.last_insert_rowid(),
                chatroom_id: room_id.clone(),
                user_id: user_id.clone(),
                content: content.to_owned(),
                created_at: now,
            })
        })
    }

    /// All messages in a room, oldest first. The AUTOINCREMENT id is the
    /// ordering key; timestamps follow it.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub fn list_for_room(&self, room_id: &RoomId) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chatroom_id, user_id, content, created_at
                 FROM messages WHERE chatroom_id = ?1
                 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map([room_id.as_str()], |row| {
                    Ok(Message {
                        id: row.get(0)?,
                        chatroom_id: RoomId::from_raw(row.get::<_, String>(1)?),
                        user_id: UserId::from_raw(row.get::<_, String>(2)?),
                        content: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
