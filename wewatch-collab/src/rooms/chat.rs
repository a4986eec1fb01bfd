use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use uuid::Uuid;

use crate::{
    ChatMessageData, ChatPayload, CollabContext, CollabEvent, DatabaseError, MessageRemovedPayload,
    NewChatMessage, NewReaction, PrimaryKey, ReactionData, ReactionPayload, UserData,
};

use super::{require_host, require_member, RoomError};

/// Messages longer than this are rejected
pub const MAX_MESSAGE_LENGTH: usize = 1000;
/// How many messages a history request returns at most
pub const HISTORY_LIMIT: i64 = 100;

lazy_static! {
    static ref ALLOWED_EMOJI: HashSet<&'static str> = [
        "👍", "👎", "❤️", "😂", "😮", "😢", "😡", "🔥", "👏", "🎉", "🍿", "😱", "🤔", "💯",
    ]
    .into_iter()
    .collect();
}

pub fn is_allowed_emoji(emoji: &str) -> bool {
    ALLOWED_EMOJI.contains(emoji)
}

/// Trims a chat message and checks its length
pub fn validate_message(message: &str) -> Result<String, &'static str> {
    let message = message.trim();

    if message.is_empty() {
        return Err("message cannot be empty");
    }

    if message.chars().count() > MAX_MESSAGE_LENGTH {
        return Err("message is too long");
    }

    Ok(message.to_string())
}

/// A stored chat message with the reactions to it
#[derive(Debug, Clone)]
pub struct ChatEntry {
    pub message: ChatMessageData,
    pub reactions: Vec<ReactionData>,
}

#[derive(Debug)]
pub struct NewPlainReaction {
    pub emoji: String,
    pub session_id: Option<Uuid>,
    pub message_id: Option<PrimaryKey>,
}

/// Stored room and session chat
pub struct ChatManager {
    context: CollabContext,
}

impl ChatManager {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Posts a message to the room itself, outside of any session
    pub async fn post_room_message(
        &self,
        room_id: PrimaryKey,
        user: &UserData,
        message: &str,
    ) -> Result<ChatMessageData, RoomError> {
        let message = validate_message(message).map_err(RoomError::InvalidInput)?;
        require_member(self.context.database.as_ref(), room_id, user.id).await?;

        let stored = self
            .context
            .database
            .create_chat_message(NewChatMessage {
                room_id,
                session_id: None,
                user_id: user.id,
                message,
                created_at: self.context.clock.now(),
            })
            .await?;

        self.context.emit(CollabEvent::RoomChat {
            room_id,
            data: ChatPayload::from(&stored),
        });

        Ok(stored)
    }

    /// Posts a message to an active watch session
    pub async fn post_session_message(
        &self,
        session_id: Uuid,
        user: &UserData,
        message: &str,
    ) -> Result<ChatMessageData, RoomError> {
        let message = validate_message(message).map_err(RoomError::InvalidInput)?;

        let session = self.context.database.watch_session_by_uuid(session_id).await?;
        if !session.is_active() {
            return Err(RoomError::InvalidInput("session has ended"));
        }

        require_member(self.context.database.as_ref(), session.room_id, user.id).await?;

        let stored = self
            .context
            .database
            .create_chat_message(NewChatMessage {
                room_id: session.room_id,
                session_id: Some(session_id),
                user_id: user.id,
                message,
                created_at: self.context.clock.now(),
            })
            .await?;

        self.context.emit(CollabEvent::ChatMessage {
            room_id: session.room_id,
            data: ChatPayload::from(&stored),
        });

        Ok(stored)
    }

    /// The latest messages of a room, or of one of its sessions, oldest first
    pub async fn history(
        &self,
        room_id: PrimaryKey,
        user: &UserData,
        session_id: Option<Uuid>,
    ) -> Result<Vec<ChatEntry>, RoomError> {
        let database = &self.context.database;

        let room = database.room_by_id(room_id).await?;
        if !room.is_public {
            require_member(database.as_ref(), room_id, user.id).await?;
        }

        let messages = database.chat_history(room_id, session_id, HISTORY_LIMIT).await?;
        let ids: Vec<_> = messages.iter().map(|m| m.id).collect();

        let mut reactions: HashMap<PrimaryKey, Vec<ReactionData>> = HashMap::new();
        for reaction in database.reactions_for_messages(&ids).await? {
            if let Some(message_id) = reaction.message_id {
                reactions.entry(message_id).or_default().push(reaction);
            }
        }

        Ok(messages
            .into_iter()
            .map(|message| ChatEntry {
                reactions: reactions.remove(&message.id).unwrap_or_default(),
                message,
            })
            .collect())
    }

    /// Edits a message. Only its author may do so.
    pub async fn edit(
        &self,
        room_id: PrimaryKey,
        message_id: PrimaryKey,
        user: &UserData,
        message: &str,
    ) -> Result<ChatMessageData, RoomError> {
        let message = validate_message(message).map_err(RoomError::InvalidInput)?;
        let existing = self.message_in_room(room_id, message_id).await?;

        if existing.user_id != user.id {
            return Err(RoomError::NotAuthor);
        }

        let edited = self
            .context
            .database
            .update_chat_message(message_id, message)
            .await?;

        self.context.emit(CollabEvent::RoomMessageEdited {
            room_id,
            data: ChatPayload::from(&edited),
        });

        Ok(edited)
    }

    /// Deletes a message. Only its author may do so.
    pub async fn delete(
        &self,
        room_id: PrimaryKey,
        message_id: PrimaryKey,
        user: &UserData,
    ) -> Result<(), RoomError> {
        let existing = self.message_in_room(room_id, message_id).await?;

        if existing.user_id != user.id {
            return Err(RoomError::NotAuthor);
        }

        self.context.database.delete_chat_message(message_id).await?;

        self.context.emit(CollabEvent::RoomMessageDeleted {
            room_id,
            data: MessageRemovedPayload {
                message_id,
                user_id: user.id,
            },
        });

        Ok(())
    }

    /// Hides a message on behalf of the host
    pub async fn remove(
        &self,
        room_id: PrimaryKey,
        message_id: PrimaryKey,
        user: &UserData,
    ) -> Result<ChatMessageData, RoomError> {
        let room = self.context.database.room_by_id(room_id).await?;
        require_host(&room, user.id)?;

        self.message_in_room(room_id, message_id).await?;

        let removed = self
            .context
            .database
            .mark_chat_message_removed(message_id)
            .await?;

        self.context.emit(CollabEvent::RoomMessageRemoved {
            room_id,
            data: MessageRemovedPayload {
                message_id,
                user_id: user.id,
            },
        });

        Ok(removed)
    }

    /// Stores a reaction to a room, session, or message
    pub async fn react(
        &self,
        room_id: PrimaryKey,
        user: &UserData,
        reaction: NewPlainReaction,
    ) -> Result<ReactionData, RoomError> {
        if !is_allowed_emoji(&reaction.emoji) {
            return Err(RoomError::InvalidInput("emoji is not allowed"));
        }

        require_member(self.context.database.as_ref(), room_id, user.id).await?;

        if let Some(message_id) = reaction.message_id {
            self.message_in_room(room_id, message_id).await?;
        }

        if let Some(session_id) = reaction.session_id {
            let session = self.context.database.watch_session_by_uuid(session_id).await?;

            if session.room_id != room_id {
                return Err(RoomError::InvalidInput("session belongs to another room"));
            }
        }

        let stored = self
            .context
            .database
            .create_reaction(NewReaction {
                user_id: user.id,
                room_id,
                session_id: reaction.session_id,
                message_id: reaction.message_id,
                emoji: reaction.emoji,
                created_at: self.context.clock.now(),
            })
            .await?;

        self.context.emit(CollabEvent::Reaction {
            room_id,
            data: ReactionPayload::from_data(&stored, user.username.clone()),
        });

        Ok(stored)
    }

    async fn message_in_room(
        &self,
        room_id: PrimaryKey,
        message_id: PrimaryKey,
    ) -> Result<ChatMessageData, RoomError> {
        let message = self.context.database.chat_message_by_id(message_id).await?;

        if message.room_id != room_id {
            return Err(RoomError::Db(DatabaseError::NotFound {
                resource: "chat message",
                identifier: "id",
            }));
        }

        Ok(message)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_support::TestCollab;

    #[tokio::test]
    async fn timestamps_come_from_the_clock() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let guest = test.user("guest").await;
        let room = test.room(&host).await;

        test.clock.advance(chrono::Duration::hours(3));
        let now = test.context().clock.now();

        let member = test.collab.rooms.join(room.id, &guest).await.unwrap();
        let message = test
            .collab
            .chat
            .post_room_message(room.id, &guest, "fashionably late")
            .await
            .unwrap();

        assert_eq!(member.joined_at, now);
        assert_eq!(message.created_at, now);
        assert!(room.created_at < now);
    }

    #[test]
    fn message_validation() {
        assert_eq!(validate_message("  hi ").unwrap(), "hi");
        assert!(validate_message("   ").is_err());
        assert!(validate_message(&"a".repeat(MAX_MESSAGE_LENGTH)).is_ok());
        assert!(validate_message(&"a".repeat(MAX_MESSAGE_LENGTH + 1)).is_err());
    }

    #[tokio::test]
    async fn only_members_post_and_authors_edit() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let guest = test.user("guest").await;
        let room = test.room(&host).await;

        let denied = test.collab.chat.post_room_message(room.id, &guest, "hi").await;
        assert!(matches!(denied, Err(RoomError::NotMember)));

        test.member(&room, &guest).await;

        let message = test
            .collab
            .chat
            .post_room_message(room.id, &guest, "hello there")
            .await
            .unwrap();

        let not_author = test
            .collab
            .chat
            .edit(room.id, message.id, &host, "mine now")
            .await;
        assert!(matches!(not_author, Err(RoomError::NotAuthor)));

        let edited = test
            .collab
            .chat
            .edit(room.id, message.id, &guest, "hello again")
            .await
            .unwrap();
        assert!(edited.is_edited);

        let removed = test
            .collab
            .chat
            .remove(room.id, message.id, &host)
            .await
            .unwrap();
        assert!(removed.deleted_by_host);

        let guest_remove = test.collab.chat.remove(room.id, message.id, &guest).await;
        assert!(matches!(guest_remove, Err(RoomError::NotHost)));
    }

    #[tokio::test]
    async fn history_carries_reactions() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let room = test.room(&host).await;

        let first = test
            .collab
            .chat
            .post_room_message(room.id, &host, "first")
            .await
            .unwrap();
        test.collab
            .chat
            .post_room_message(room.id, &host, "second")
            .await
            .unwrap();

        test.collab
            .chat
            .react(
                room.id,
                &host,
                NewPlainReaction {
                    emoji: "🍿".to_string(),
                    session_id: None,
                    message_id: Some(first.id),
                },
            )
            .await
            .unwrap();

        let history = test.collab.chat.history(room.id, &host, None).await.unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message.message, "first");
        assert_eq!(history[0].reactions.len(), 1);
        assert!(history[1].reactions.is_empty());

        let bad_emoji = test
            .collab
            .chat
            .react(
                room.id,
                &host,
                NewPlainReaction {
                    emoji: "🦀".to_string(),
                    session_id: None,
                    message_id: None,
                },
            )
            .await;
        assert!(matches!(bad_emoji, Err(RoomError::InvalidInput(_))));
    }
}
