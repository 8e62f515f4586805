//! Typed identifiers.
//!
//! Every entity id is a UUID behind its own newtype so a `ListId` can never be
//! handed to a function expecting a `BoardId`. Parsing rejects malformed
//! strings before anything touches the store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an id from its string form.
            ///
            /// # Errors
            ///
            /// Returns `CoreError::Validation` for malformed input.
            pub fn parse(s: &str) -> Result<Self, CoreError> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| CoreError::Validation(format!("malformed {} id: {:?}", $label, s)))
            }

            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
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
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id!(UserId, "user");
define_id!(WorkspaceId, "workspace");
define_id!(BoardId, "board");
define_id!(ListId, "list");
define_id!(CardId, "card");
define_id!(CommentId, "comment");
define_id!(ActivityId, "activity");
define_id!(NotificationId, "notification");
