use log::warn;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    CollabContext, CollabEvent, ChatPayload, PlaybackCommand, PlaybackState, PrimaryKey,
    ReactionPayload,
};

use super::{is_allowed_emoji, validate_message, RoomConnection};

/// Frames a client may send over its socket
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Fields are inline, same as the outbound event
    PlaybackControl(PlaybackInput),
    ChatMessage { data: ChatInput },
    Reaction { data: ReactionInput },
}

#[derive(Debug, Deserialize)]
pub struct PlaybackInput {
    pub command: PlaybackCommand,
    pub timestamp: f64,
    pub media_item_id: Option<PrimaryKey>,
    pub seek_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ChatInput {
    pub message: String,
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ReactionInput {
    pub emoji: String,
    pub session_id: Option<Uuid>,
    pub message_id: Option<PrimaryKey>,
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Unknown message type \"{0}\"")]
    UnknownType(String),
    #[error("Only the host can control playback")]
    Forbidden,
    #[error("{0}")]
    Invalid(&'static str),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

const MESSAGE_TYPES: [&str; 3] = ["playback_control", "chat_message", "reaction"];

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let envelope: Envelope = serde_json::from_str(text)?;

        if !MESSAGE_TYPES.contains(&envelope.kind.as_str()) {
            return Err(MessageError::UnknownType(envelope.kind));
        }

        Ok(serde_json::from_str(text)?)
    }

    /// Fans the message out to the sender's room
    pub async fn handle(
        self,
        context: &CollabContext,
        connection: &RoomConnection,
    ) -> Result<(), MessageError> {
        match self {
            Self::PlaybackControl(input) => handle_playback(context, connection, input).await,
            Self::ChatMessage { data } => {
                let message = validate_message(&data.message).map_err(MessageError::Invalid)?;

                context.emit(CollabEvent::ChatMessage {
                    room_id: connection.room_id,
                    data: ChatPayload {
                        id: None,
                        room_id: connection.room_id,
                        session_id: data.session_id,
                        user_id: connection.user_id,
                        username: connection.username.clone(),
                        message,
                        is_edited: false,
                        deleted_by_host: false,
                        created_at: context.clock.now(),
                    },
                });

                Ok(())
            }
            Self::Reaction { data } => {
                if !is_allowed_emoji(&data.emoji) {
                    return Err(MessageError::Invalid("emoji is not allowed"));
                }

                context.emit(CollabEvent::Reaction {
                    room_id: connection.room_id,
                    data: ReactionPayload {
                        id: None,
                        user_id: connection.user_id,
                        username: connection.username.clone(),
                        emoji: data.emoji,
                        session_id: data.session_id,
                        message_id: data.message_id,
                        created_at: context.clock.now(),
                    },
                });

                Ok(())
            }
        }
    }
}

async fn handle_playback(
    context: &CollabContext,
    connection: &RoomConnection,
    input: PlaybackInput,
) -> Result<(), MessageError> {
    if !connection.is_host {
        return Err(MessageError::Forbidden);
    }

    let valid_time = |t: f64| t.is_finite() && t >= 0.;

    if !valid_time(input.timestamp) || !input.seek_time.map_or(true, valid_time) {
        return Err(MessageError::Invalid("playback times must be non-negative seconds"));
    }

    context.emit(CollabEvent::PlaybackControl {
        room_id: connection.room_id,
        command: input.command,
        timestamp: input.timestamp,
        media_item_id: input.media_item_id,
        seek_time: input.seek_time,
        user_id: connection.user_id,
    });

    let (state, time) = match input.command {
        PlaybackCommand::Play => (Some(PlaybackState::Playing), input.timestamp),
        PlaybackCommand::Pause => (Some(PlaybackState::Paused), input.timestamp),
        PlaybackCommand::Seek => (None, input.seek_time.unwrap_or(input.timestamp)),
        PlaybackCommand::Load => (Some(PlaybackState::Paused), 0.),
    };

    if let Err(e) = context
        .database
        .update_playback(connection.room_id, state, Some(time))
        .await
    {
        warn!(
            "Could not persist playback state of room {}: {}",
            connection.room_id, e
        );
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use serde_json::Value;

    use super::*;
    use crate::test_support::TestCollab;

    #[test]
    fn parses_the_allow_list() {
        let playback = ClientMessage::parse(
            r#"{"type":"playback_control","command":"seek","timestamp":3.5,"seek_time":90}"#,
        )
        .unwrap();
        assert!(matches!(
            playback,
            ClientMessage::PlaybackControl(PlaybackInput {
                command: PlaybackCommand::Seek,
                seek_time: Some(_),
                ..
            })
        ));

        let chat = ClientMessage::parse(r#"{"type":"chat_message","data":{"message":"hi"}}"#).unwrap();
        assert!(matches!(chat, ClientMessage::ChatMessage { .. }));

        assert!(matches!(
            ClientMessage::parse(r#"{"type":"session_ended","data":{}}"#),
            Err(MessageError::UnknownType(kind)) if kind == "session_ended"
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"reaction"}"#),
            Err(MessageError::Malformed(_))
        ));
        assert!(matches!(ClientMessage::parse("not json"), Err(MessageError::Malformed(_))));
    }

    #[tokio::test]
    async fn playback_is_host_only_and_fans_out_to_everyone() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let guest = test.user("guest").await;
        let room = test.room(&host).await;

        let mut host_handle = test.collab.rooms.connect(room.id, &host).await.unwrap();
        let mut guest_handle = test.collab.rooms.connect(room.id, &guest).await.unwrap();
        let mut host_outbox = host_handle.take_outbox().unwrap();
        let mut guest_outbox = guest_handle.take_outbox().unwrap();

        // Presence of the guest
        host_outbox.try_recv().unwrap();

        let frame = r#"{"type":"playback_control","command":"play","timestamp":12.5}"#;

        let denied = guest_handle.handle_text(frame).await;
        assert!(matches!(denied, Err(MessageError::Forbidden)));
        assert!(host_outbox.try_recv().is_err(), "forbidden frames are dropped");

        host_handle.handle_text(frame).await.unwrap();

        for outbox in [&mut host_outbox, &mut guest_outbox] {
            let value: Value = serde_json::from_str(&outbox.try_recv().unwrap()).unwrap();
            assert_eq!(value["type"], "playback_control");
            assert_eq!(value["command"], "play");
            assert_eq!(value["timestamp"], 12.5);
            assert_eq!(value["user_id"], host.id);
        }

        let stored = test.context().database.room_by_id(room.id).await.unwrap();
        assert_eq!(stored.playback_state, PlaybackState::Playing);
        assert_eq!(stored.playback_time, 12.5);
    }

    #[tokio::test]
    async fn chat_and_reactions_are_relayed_with_sender() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let room = test.room(&host).await;

        let mut handle = test.collab.rooms.connect(room.id, &host).await.unwrap();
        let mut outbox = handle.take_outbox().unwrap();

        handle
            .handle_text(r#"{"type":"chat_message","data":{"message":"  hello  "}}"#)
            .await
            .unwrap();

        let value: Value = serde_json::from_str(&outbox.try_recv().unwrap()).unwrap();
        assert_eq!(value["type"], "chat_message");
        assert_eq!(value["data"]["message"], "hello");
        assert_eq!(value["data"]["username"], "host");

        let rejected = handle
            .handle_text(r#"{"type":"reaction","data":{"emoji":"🦀"}}"#)
            .await;
        assert!(matches!(rejected, Err(MessageError::Invalid(_))));

        handle
            .handle_text(r#"{"type":"reaction","data":{"emoji":"🔥"}}"#)
            .await
            .unwrap();

        let value: Value = serde_json::from_str(&outbox.try_recv().unwrap()).unwrap();
        assert_eq!(value["type"], "reaction");
        assert_eq!(value["data"]["emoji"], "🔥");

        let history = test
            .context()
            .database
            .chat_history(room.id, None, 100)
            .await
            .unwrap();
        assert!(history.is_empty(), "socket chat is not stored");
    }
}
