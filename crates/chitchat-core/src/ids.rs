use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// UserId values normally arrive as the identity provider's subject and are
// built with from_raw; new() exists for fixtures.
branded_id!(UserId, "user");
branded_id!(RoomId, "room");
branded_id!(ConnectionId, "conn");

/// Store-assigned message identifier. AUTOINCREMENT, monotonic per room.
pub type MessageId = i64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_has_prefix() {
        let id = RoomId::new();
        assert!(id.as_str().starts_with("room_"), "got: {id}");
    }

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_raw_preserves_provider_subject() {
        let id = UserId::from_raw("firebase-uid-abc123");
        assert_eq!(id.as_str(), "firebase-uid-abc123");
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let id = RoomId::new();
        let s = id.to_string();
        let parsed: RoomId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serde_roundtrip() {
        let id = RoomId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: RoomId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn monotonic_ordering() {
        let ids: Vec<RoomId> = (0..100).map(|_| RoomId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
