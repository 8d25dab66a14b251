use chrono::Utc;
use tracing::instrument;

use chitchat_core::ids::{RoomId, UserId};
use chitchat_core::models::{Chatroom, ChatroomMember, ChatroomSummary, MemberProfile, Message};

use crate::database::Database;
use crate::error::StoreError;

pub struct ChatroomRepo {
    db: Database,
}

impl ChatroomRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get or create the 1:1 chatroom for an unordered pair of users.
    ///
    /// Returns the existing room when one already holds exactly these two
    /// members, so repeated creates never produce a duplicate pair. The
    /// boolean reports whether a new room was created.
    #[instrument(skip(self), fields(user_id = %creator))]
    pub fn get_or_create_direct(
        &self,
        creator: &UserId,
        contact: &UserId,
    ) -> Result<(Chatroom, bool), StoreError> {
        if let Some(existing) = self.find_for_pair(creator, contact)? {
            return Ok((existing, false));
        }

        self.db.with_conn(|conn| {
            let id = RoomId::new();
            let now = Utc::now().to_rfc3339();

            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO chatrooms (id, name, created_by, created_at) VALUES (?1, '', ?2, ?3)",
                rusqlite::params![id.as_str(), creator.as_str(), now],
            )?;
            tx.execute(
                "INSERT INTO chatroom_members (chatroom_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.as_str(), creator.as_str(), now],
            )?;
            tx.execute(
                "INSERT INTO chatroom_members (chatroom_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.as_str(), contact.as_str(), now],
            )?;
            tx.commit()?;

            Ok((
                Chatroom {
                    id,
                    name: String::new(),
                    created_by: creator.clone(),
                    created_at: now,
                },
                true,
            ))
        })
    }

    /// Find the 1:1 chatroom holding exactly this pair of members.
    #[instrument(skip(self))]
    pub fn find_for_pair(&self, a: &UserId, b: &UserId) -> Result<Option<Chatroom>, StoreError> {
        self.db.with_conn(|conn| {
            let room = conn
                .query_row(
                    "SELECT c.id, c.name, c.created_by, c.created_at
                     FROM chatrooms c
                     JOIN chatroom_members m1 ON c.id = m1.chatroom_id AND m1.user_id = ?1
                     JOIN chatroom_members m2 ON c.id = m2.chatroom_id AND m2.user_id = ?2
                     WHERE (
                         SELECT COUNT(*) FROM chatroom_members cm WHERE cm.chatroom_id = c.id
                     ) = 2
                     LIMIT 1",
                    rusqlite::params![a.as_str(), b.as_str()],
                    row_to_chatroom,
                )
                .ok();
            Ok(room)
        })
    }

    /// Get a chatroom by id.
    #[instrument(skip(self), fields(room_id = %id))]
    pub fn get(&self, id: &RoomId) -> Result<Chatroom, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_by, created_at FROM chatrooms WHERE id = ?1",
                [id.as_str()],
                row_to_chatroom,
            )
            .map_err(|_| StoreError::NotFound(format!("chatroom {id}")))
        })
    }

    /// The join record linking a user to a chatroom, if any.
    #[instrument(skip(self), fields(room_id = %room_id, user_id = %user_id))]
    pub fn member(&self, room_id: &RoomId, user_id: &UserId) -> Result<Option<ChatroomMember>, StoreError> {
        self.db.with_conn(|conn| {
            let record = conn
                .query_row(
                    "SELECT chatroom_id, user_id, joined_at FROM chatroom_members
                     WHERE chatroom_id = ?1 AND user_id = ?2 LIMIT 1",
                    rusqlite::params![room_id.as_str(), user_id.as_str()],
                    |row| {
                        Ok(ChatroomMember {
                            chatroom_id: RoomId::from_raw(row.get::<_, String>(0)?),
                            user_id: UserId::from_raw(row.get::<_, String>(1)?),
                            joined_at: row.get(2)?,
                        })
                    },
                )
                .ok();
            Ok(record)
        })
    }

    /// True iff the user is a current member of the chatroom.
    pub fn is_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool, StoreError> {
        Ok(self.member(room_id, user_id)?.is_some())
    }

    /// List the caller's chatrooms, newest-created first, each with its
    /// member profiles, last message, and a display picture taken from the
    /// other member's profile picture.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list_for_user(&self, user_id: &UserId) -> Result<Vec<ChatroomSummary>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.created_by, c.created_at
                 FROM chatrooms c
                 JOIN chatroom_members cm ON c.id = cm.chatroom_id
                 WHERE cm.user_id = ?1
                 ORDER BY c.created_at DESC",
            )?;
            let rooms = stmt
                .query_map([user_id.as_str()], row_to_chatroom)?
                .collect::<Result<Vec<_>, _>>()?;

            let mut summaries = Vec::with_capacity(rooms.len());
            for room in rooms {
                let mut member_stmt = conn.prepare(
                    "SELECT u.id, u.display_name, u.email, u.profile_pic_url
                     FROM chatroom_members cm
                     JOIN users u ON cm.user_id = u.id
                     WHERE cm.chatroom_id = ?1
                     ORDER BY cm.id",
                )?;
                let members = member_stmt
                    .query_map([room.id.as_str()], |row| {
                        Ok(MemberProfile {
                            user_id: UserId::from_raw(row.get::<_, String>(0)?),
                            display_name: row.get(1)?,
                            email: row.get(2)?,
                            profile_pic_url: row.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                let last_message = conn
                    .query_row(
                        "SELECT id, chatroom_id, user_id, content, created_at
                         FROM messages WHERE chatroom_id = ?1
                         ORDER BY id DESC LIMIT 1",
                        [room.id.as_str()],
                        row_to_message,
                    )
                    .ok();

                let chatroom_pic_url = members
                    .iter()
                    .find(|m| &m.user_id != user_id)
                    .and_then(|m| m.profile_pic_url.clone());

                summaries.push(ChatroomSummary {
                    id: room.id,
                    name: room.name,
                    created_by: room.created_by,
                    created_at: room.created_at,
                    members,
                    last_message,
                    chatroom_pic_url,
                });
            }
            Ok(summaries)
        })
    }

    /// Member profiles for a single chatroom.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub fn members(&self, room_id: &RoomId) -> Result<Vec<MemberProfile>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.display_name, u.email, u.profile_pic_url
                 FROM chatroom_members cm
                 JOIN users u ON cm.user_id = u.id
                 WHERE cm.chatroom_id = ?1
                 ORDER BY cm.id",
            )?;
            let members = stmt
                .query_map([room_id.as_str()], |row| {
                    Ok(MemberProfile {
                        user_id: UserId::from_raw(row.get::<_, String>(0)?),
                        display_name: row.get(1)?,
                        email: row.get(2)?,
                        profile_pic_url: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(members)
        })
    }
}

fn row_to_chatroom(row: &rusqlite::Row<'_>) -> Result<Chatroom, rusqlite::Error> {
    Ok(Chatroom {
        id: RoomId::from_raw(row.get::<_, String>(0)?),
        name: row.get(1)?,
        created_by: UserId::from_raw(row.get::<_, String>(2)?),
        created_at: row.get(3)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, rusqlite::Error> {
    Ok(Message {
        id: row.get(0)?,
        chatroom_id: RoomId::from_raw(row.get::<_, String>(1)?),
        user_id: UserId::from_raw(row.get::<_, String>(2)?),
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}
