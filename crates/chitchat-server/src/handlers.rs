//! REST handlers: login, contact search, chatrooms, messages, health.
//!
//! Every endpoint takes a bearer credential verified against the identity
//! provider, and the body's `user_id` must equal the verified subject.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use chitchat_core::errors::ApiError;
use chitchat_core::gateway::MessagePersistenceGateway;
use chitchat_core::ids::{RoomId, UserId};
use chitchat_core::models::{ChatroomSummary, MemberProfile, Message};
use chitchat_identity::IdentityProvider;
use chitchat_store::chatrooms::ChatroomRepo;
use chitchat_store::messages::MessageRepo;
use chitchat_store::users::UserRepo;
use chitchat_store::{Database, StoreGateway};

use crate::http::{bearer_token, HttpError};
use crate::server::AppState;

/// Shared state available to all REST handlers.
pub struct HandlerState {
    pub users: UserRepo,
    pub chatrooms: ChatroomRepo,
    pub messages: MessageRepo,
    pub gateway: Arc<dyn MessagePersistenceGateway>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl HandlerState {
    pub fn new(db: Database, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            users: UserRepo::new(db.clone()),
            chatrooms: ChatroomRepo::new(db.clone()),
            messages: MessageRepo::new(db.clone()),
            gateway: Arc::new(StoreGateway::new(db)),
            identity,
        }
    }

    /// Verify the bearer credential and require the claimed user id to
    /// match the token subject.
    async fn authenticate(&self, headers: &HeaderMap, claimed: &UserId) -> Result<(), ApiError> {
        let token = bearer_token(headers)?;
        let claims = self.identity.verify_token(token).await.map_err(ApiError::from)?;
        if &claims.uid != claimed {
            return Err(ApiError::Forbidden("user id does not match token".into()));
        }
        Ok(())
    }
}

// ── Request / response bodies ──

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub status: String,
    pub username: String,
    pub profile_pic_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub search: String,
}

#[derive(Debug, Serialize)]
pub struct Contact {
    pub id: UserId,
    pub display_name: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub contacts: Vec<Contact>,
}

#[derive(Debug, Deserialize)]
pub struct ChatroomListRequest {
    pub user_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct ChatroomListResponse {
    pub chatrooms: Vec<ChatroomSummary>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChatroomRequest {
    pub user_id: UserId,
    pub contact_id: Option<UserId>,
}

#[derive(Debug, Serialize)]
pub struct CreatedChatroom {
    pub id: RoomId,
    pub name: String,
    pub created_by: UserId,
    pub created_at: String,
    pub members: Vec<MemberProfile>,
}

#[derive(Debug, Serialize)]
pub struct CreateChatroomResponse {
    pub status: String,
    pub chatroom: CreatedChatroom,
}

#[derive(Debug, Deserialize)]
pub struct MessageListRequest {
    pub user_id: UserId,
    pub chatroom_id: Option<RoomId>,
}

#[derive(Debug, Serialize)]
pub struct MessageListResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub user_id: UserId,
    pub chatroom_id: Option<RoomId>,
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub live_connections: usize,
    pub open_rooms: usize,
}

// ── Handlers ──

/// POST /user/login: upsert the caller's profile from the provider record.
pub async fn user_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, HttpError> {
    let token = bearer_token(&headers)?;
    let profile = state.handlers.identity.fetch_profile(token).await?;

    if profile.uid != req.user_id {
        return Err(ApiError::Forbidden("user id does not match token".into()).into());
    }

    let (Some(display_name), Some(email)) = (profile.display_name, profile.email) else {
        return Err(ApiError::Validation("user has no display name or email".into()).into());
    };

    let user = state.handlers.users.upsert_login(
        &profile.uid,
        &display_name,
        &email,
        profile.photo_url.as_deref(),
    )?;

    tracing::info!(user_id = %user.id, "user logged in");
    Ok(Json(LoginResponse {
        status: "success".into(),
        username: user.display_name,
        profile_pic_url: user.profile_pic_url,
    }))
}

/// POST /user/new-chat/search: exact-match contact lookup by email.
pub async fn search_contacts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    state.handlers.authenticate(&headers, &req.user_id).await?;

    let search = req.search.trim();
    if search.is_empty() {
        return Ok(Json(SearchResponse { contacts: Vec::new() }));
    }

    let contacts = state
        .handlers
        .users
        .find_by_email(search, &req.user_id)?
        .into_iter()
        .map(|u| Contact {
            id: u.id,
            display_name: u.display_name,
            email: u.email,
        })
        .collect();

    Ok(Json(SearchResponse { contacts }))
}

/// POST /chatroom/list: the caller's chatrooms with members and last message.
pub async fn list_chatrooms(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatroomListRequest>,
) -> Result<Json<ChatroomListResponse>, HttpError> {
    state.handlers.authenticate(&headers, &req.user_id).await?;

    let chatrooms = state.handlers.chatrooms.list_for_user(&req.user_id)?;
    Ok(Json(ChatroomListResponse { chatrooms }))
}

/// POST /chatroom/create: get or create the 1:1 room for a pair of users.
pub async fn create_chatroom(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateChatroomRequest>,
) -> Result<Json<CreateChatroomResponse>, HttpError> {
    state.handlers.authenticate(&headers, &req.user_id).await?;

    let Some(contact_id) = req.contact_id else {
        return Err(ApiError::Validation("contact id is required".into()).into());
    };
    if contact_id == req.user_id {
        return Err(ApiError::Validation("cannot create chatroom with self".into()).into());
    }

    let (room, created) = state
        .handlers
        .chatrooms
        .get_or_create_direct(&req.user_id, &contact_id)?;
    let members = state.handlers.chatrooms.members(&room.id)?;

    if created {
        tracing::info!(room_id = %room.id, user_id = %req.user_id, "chatroom created");
    }

    Ok(Json(CreateChatroomResponse {
        status: "success".into(),
        chatroom: CreatedChatroom {
            id: room.id,
            name: room.name,
            created_by: room.created_by,
            created_at: room.created_at,
            members,
        },
    }))
}

/// POST /message/list: a chatroom's messages, members only.
pub async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MessageListRequest>,
) -> Result<Json<MessageListResponse>, HttpError> {
    state.handlers.authenticate(&headers, &req.user_id).await?;

    let Some(chatroom_id) = req.chatroom_id else {
        return Err(ApiError::Validation("missing chatroom_id".into()).into());
    };

    if !state.handlers.gateway.authorize_membership(&chatroom_id, &req.user_id)? {
        return Err(ApiError::Forbidden("user is not a member of this chatroom".into()).into());
    }

    let messages = state.handlers.messages.list_for_room(&chatroom_id)?;
    Ok(Json(MessageListResponse { messages }))
}

/// POST /message/send: persist a message through the gateway.
///
/// Writes through the persistence gateway only; the live fan-out path is
/// a separate, independent route.
pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, HttpError> {
    state.handlers.authenticate(&headers, &req.user_id).await?;

    let Some(chatroom_id) = req.chatroom_id else {
        return Err(ApiError::Validation("missing chatroom_id".into()).into());
    };
    let Some(content) = req.content else {
        return Err(ApiError::Validation("missing content".into()).into());
    };

    let message = state
        .handlers
        .gateway
        .append_message(&chatroom_id, &req.user_id, &content)?;

    tracing::debug!(room_id = %chatroom_id, message_id = message.id, "message stored");
    Ok(Json(SendMessageResponse {
        status: "success".into(),
    }))
}

/// GET /health: process liveness plus fan-out occupancy.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        live_connections: state.registry.total(),
        open_rooms: state.registry.open_rooms(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RoomChannel;
    use crate::registry::ConnectionRegistry;
    use crate::server::AppState;
    use axum::http::{header, HeaderValue};
    use chitchat_core::models::MESSAGE_MAX_LENGTH;
    use chitchat_identity::{IdentityError, MockIdentity};

    fn fixture() -> (AppState, Arc<MockIdentity>) {
        let identity = Arc::new(MockIdentity::new());
        identity.accept("tok-ada", MockIdentity::profile("uid-ada", "Ada", "ada@example.com"));
        identity.accept("tok-bob", MockIdentity::profile("uid-bob", "Bob", "bob@example.com"));
        identity.accept("tok-eve", MockIdentity::profile("uid-eve", "Eve", "eve@example.com"));

        let db = Database::in_memory().unwrap();
        let registry = Arc::new(ConnectionRegistry::new(32));
        let channel = Arc::new(RoomChannel::new(Arc::clone(&registry)));
        let handlers = Arc::new(HandlerState::new(
            db,
            identity.clone() as Arc<dyn IdentityProvider>,
        ));
        (
            AppState {
                handlers,
                registry,
                channel,
            },
            identity,
        )
    }

    fn auth(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    async fn login(state: &AppState, token: &str, uid: &str) {
        user_login(
            State(state.clone()),
            auth(token),
            Json(LoginRequest {
                user_id: UserId::from_raw(uid),
            }),
        )
        .await
        .unwrap();
    }

    async fn make_room(state: &AppState, token: &str, uid: &str, contact: &str) -> RoomId {
        let resp = create_chatroom(
            State(state.clone()),
            auth(token),
            Json(CreateChatroomRequest {
                user_id: UserId::from_raw(uid),
                contact_id: Some(UserId::from_raw(contact)),
            }),
        )
        .await
        .unwrap();
        resp.0.chatroom.id.clone()
    }

    #[tokio::test]
    async fn login_upserts_profile() {
        let (state, _) = fixture();
        let resp = user_login(
            State(state.clone()),
            auth("tok-ada"),
            Json(LoginRequest {
                user_id: UserId::from_raw("uid-ada"),
            }),
        )
        .await
        .unwrap();
        assert_eq!(resp.0.status, "success");
        assert_eq!(resp.0.username, "Ada");

        let stored = state.handlers.users.get(&UserId::from_raw("uid-ada")).unwrap();
        assert_eq!(stored.email, "ada@example.com");
    }

    #[tokio::test]
    async fn login_rejects_mismatched_user_id() {
        let (state, _) = fixture();
        let err = user_login(
            State(state),
            auth("tok-ada"),
            Json(LoginRequest {
                user_id: UserId::from_raw("uid-bob"),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn login_without_bearer_is_unauthenticated() {
        let (state, _) = fixture();
        let err = user_login(
            State(state),
            HeaderMap::new(),
            Json(LoginRequest {
                user_id: UserId::from_raw("uid-ada"),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, ApiError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn login_requires_provider_name_and_email() {
        let (state, identity) = fixture();
        identity.accept(
            "tok-ghost",
            chitchat_identity::IdentityProfile {
                uid: UserId::from_raw("uid-ghost"),
                display_name: None,
                email: None,
                photo_url: None,
            },
        );

        let err = user_login(
            State(state),
            auth("tok-ghost"),
            Json(LoginRequest {
                user_id: UserId::from_raw("uid-ghost"),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn provider_outage_is_internal() {
        let (state, identity) = fixture();
        identity.fail_with(IdentityError::Provider {
            status: 503,
            body: "down".into(),
        });

        let err = user_login(
            State(state),
            auth("tok-ada"),
            Json(LoginRequest {
                user_id: UserId::from_raw("uid-ada"),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, ApiError::Internal(_)));
    }

    #[tokio::test]
    async fn search_blank_returns_empty() {
        let (state, _) = fixture();
        login(&state, "tok-ada", "uid-ada").await;

        let resp = search_contacts(
            State(state),
            auth("tok-ada"),
            Json(SearchRequest {
                user_id: UserId::from_raw("uid-ada"),
                search: "   ".into(),
            }),
        )
        .await
        .unwrap();
        assert!(resp.0.contacts.is_empty());
    }

    #[tokio::test]
    async fn search_finds_exact_email() {
        let (state, _) = fixture();
        login(&state, "tok-ada", "uid-ada").await;
        login(&state, "tok-bob", "uid-bob").await;

        let resp = search_contacts(
            State(state),
            auth("tok-ada"),
            Json(SearchRequest {
                user_id: UserId::from_raw("uid-ada"),
                search: "bob@example.com".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(resp.0.contacts.len(), 1);
        assert_eq!(resp.0.contacts[0].id.as_str(), "uid-bob");
    }

    #[tokio::test]
    async fn create_chatroom_requires_contact() {
        let (state, _) = fixture();
        login(&state, "tok-ada", "uid-ada").await;

        let err = create_chatroom(
            State(state),
            auth("tok-ada"),
            Json(CreateChatroomRequest {
                user_id: UserId::from_raw("uid-ada"),
                contact_id: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn create_chatroom_rejects_self_chat() {
        let (state, _) = fixture();
        login(&state, "tok-ada", "uid-ada").await;

        let err = create_chatroom(
            State(state),
            auth("tok-ada"),
            Json(CreateChatroomRequest {
                user_id: UserId::from_raw("uid-ada"),
                contact_id: Some(UserId::from_raw("uid-ada")),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn duplicate_create_returns_same_room() {
        let (state, _) = fixture();
        login(&state, "tok-ada", "uid-ada").await;
        login(&state, "tok-bob", "uid-bob").await;

        let first = make_room(&state, "tok-ada", "uid-ada", "uid-bob").await;
        let second = make_room(&state, "tok-ada", "uid-ada", "uid-bob").await;
        // Same pair from the other side as well
        let third = make_room(&state, "tok-bob", "uid-bob", "uid-ada").await;
        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn chatroom_list_shows_membership_and_last_message() {
        let (state, _) = fixture();
        login(&state, "tok-ada", "uid-ada").await;
        login(&state, "tok-bob", "uid-bob").await;
        let room = make_room(&state, "tok-ada", "uid-ada", "uid-bob").await;

        send_message(
            State(state.clone()),
            auth("tok-ada"),
            Json(SendMessageRequest {
                user_id: UserId::from_raw("uid-ada"),
                chatroom_id: Some(room.clone()),
                content: Some("hello bob".into()),
            }),
        )
        .await
        .unwrap();

        let resp = list_chatrooms(
            State(state),
            auth("tok-bob"),
            Json(ChatroomListRequest {
                user_id: UserId::from_raw("uid-bob"),
            }),
        )
        .await
        .unwrap();
        assert_eq!(resp.0.chatrooms.len(), 1);
        let summary = &resp.0.chatrooms[0];
        assert_eq!(summary.id, room);
        assert_eq!(summary.members.len(), 2);
        assert_eq!(summary.last_message.as_ref().unwrap().content, "hello bob");
    }

    #[tokio::test]
    async fn non_member_forbidden_on_list_and_send() {
        let (state, _) = fixture();
        login(&state, "tok-ada", "uid-ada").await;
        login(&state, "tok-bob", "uid-bob").await;
        login(&state, "tok-eve", "uid-eve").await;
        let room = make_room(&state, "tok-ada", "uid-ada", "uid-bob").await;

        // Eve's credential is valid, but she is not in the room
        let err = list_messages(
            State(state.clone()),
            auth("tok-eve"),
            Json(MessageListRequest {
                user_id: UserId::from_raw("uid-eve"),
                chatroom_id: Some(room.clone()),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, ApiError::Forbidden(_)));

        let err = send_message(
            State(state),
            auth("tok-eve"),
            Json(SendMessageRequest {
                user_id: UserId::from_raw("uid-eve"),
                chatroom_id: Some(room),
                content: Some("let me in".into()),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn send_truncates_long_content() {
        let (state, _) = fixture();
        login(&state, "tok-ada", "uid-ada").await;
        login(&state, "tok-bob", "uid-bob").await;
        let room = make_room(&state, "tok-ada", "uid-ada", "uid-bob").await;

        send_message(
            State(state.clone()),
            auth("tok-ada"),
            Json(SendMessageRequest {
                user_id: UserId::from_raw("uid-ada"),
                chatroom_id: Some(room.clone()),
                content: Some("z".repeat(300)),
            }),
        )
        .await
        .unwrap();

        let resp = list_messages(
            State(state),
            auth("tok-ada"),
            Json(MessageListRequest {
                user_id: UserId::from_raw("uid-ada"),
                chatroom_id: Some(room),
            }),
        )
        .await
        .unwrap();
        assert_eq!(resp.0.messages.len(), 1);
        assert_eq!(resp.0.messages[0].content.chars().count(), MESSAGE_MAX_LENGTH);
    }

    #[tokio::test]
    async fn messages_listed_in_send_order() {
        let (state, _) = fixture();
        login(&state, "tok-ada", "uid-ada").await;
        login(&state, "tok-bob", "uid-bob").await;
        let room = make_room(&state, "tok-ada", "uid-ada", "uid-bob").await;

        for (token, uid, text) in [
            ("tok-ada", "uid-ada", "one"),
            ("tok-bob", "uid-bob", "two"),
            ("tok-ada", "uid-ada", "three"),
        ] {
            send_message(
                State(state.clone()),
                auth(token),
                Json(SendMessageRequest {
                    user_id: UserId::from_raw(uid),
                    chatroom_id: Some(room.clone()),
                    content: Some(text.into()),
                }),
            )
            .await
            .unwrap();
        }

        let resp = list_messages(
            State(state),
            auth("tok-bob"),
            Json(MessageListRequest {
                user_id: UserId::from_raw("uid-bob"),
                chatroom_id: Some(room),
            }),
        )
        .await
        .unwrap();
        let contents: Vec<&str> = resp.0.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        let ids: Vec<i64> = resp.0.messages.iter().map(|m| m.id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn health_reports_occupancy() {
        let (state, _) = fixture();
        let resp = health(State(state)).await;
        assert_eq!(resp.0.status, "healthy");
        assert_eq!(resp.0.live_connections, 0);
        assert_eq!(resp.0.open_rooms, 0);
    }
}
