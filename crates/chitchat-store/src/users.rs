use chrono::Utc;
use tracing::instrument;

use chitchat_core::ids::UserId;
use chitchat_core::models::User;

use crate::database::Database;
use crate::error::StoreError;

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert a user from the identity provider's record at login time.
    ///
    /// First login inserts the row; later logins refresh `profile_pic_url`
    /// when the provider reports a new value. The id is immutable.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn upsert_login(
        &self,
        id: &UserId,
        display_name: &str,
        email: &str,
        photo_url: Option<&str>,
    ) -> Result<User, StoreError> {
        self.db.with_conn(|conn| {
            let existing = conn
                .query_row(
                    "SELECT id, display_name, email, created_at, profile_pic_url
                     FROM users WHERE email = ?1",
                    [email],
                    row_to_user,
                )
                .ok();

            match existing {
                None => {
                    let now = Utc::now().to_rfc3339();
                    conn.execute(
                        "INSERT INTO users (id, display_name, email, created_at, profile_pic_url)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![id.as_str(), display_name, email, now, photo_url],
                    )?;
                    Ok(User {
                        id: id.clone(),
                        display_name: display_name.to_owned(),
                        email: email.to_owned(),
                        created_at: now,
                        profile_pic_url: photo_url.map(str::to_owned),
                    })
                }
                Some(mut user) => {
                    if let Some(url) = photo_url {
                        if user.profile_pic_url.as_deref() != Some(url) {
                            conn.execute(
                                "UPDATE users SET profile_pic_url = ?1 WHERE email = ?2",
                                rusqlite::params![url, email],
                            )?;
                            user.profile_pic_url = Some(url.to_owned());
                        }
                    }
                    Ok(user)
                }
            }
        })
    }

    /// Get a user by id.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<User, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, display_name, email, created_at, profile_pic_url
                 FROM users WHERE id = ?1",
                [id.as_str()],
                row_to_user,
            )
            .map_err(|_| StoreError::NotFound(format!("user {id}")))
        })
    }

    /// Exact-match contact search by email, excluding the caller.
    #[instrument(skip(self))]
    pub fn find_by_email(&self, email: &str, exclude: &UserId) -> Result<Vec<User>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, display_name, email, created_at, profile_pic_url
                 FROM users WHERE email = ?1 AND id != ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![email, exclude.as_str()], row_to_user)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<User, rusqlite::Error> {
    Ok(User {
        id: UserId::from_raw(row.get::<_, String>(0)?),
        display_name: row.get(1)?,
        email: row.get(2)?,
        created_at: row.get(3)?,
        profile_pic_url: row.get(4)?,
    })
}
