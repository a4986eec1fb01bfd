use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    query, Decode, Error as SqlxError, PgPool, Postgres, Row, Type,
};
use uuid::Uuid;

use super::*;

/// A postgres database implementation for wewatch
pub struct PgDatabase {
    pool: PgPool,
}

const MEMBER_SELECT: &str = "
    SELECT
        room_members.*,
        users.username,
        users.email,
        users.password,
        users.created_at AS user_created_at
    FROM room_members
        INNER JOIN users ON room_members.user_id = users.id";

const CHAT_SELECT: &str = "
    SELECT
        chat_messages.*,
        users.username
    FROM chat_messages
        INNER JOIN users ON chat_messages.user_id = users.id";

impl PgDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| e.any())?;

        Ok(Self { pool })
    }

    /// Applies the embedded migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        let row = query("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "id"))?;

        user_from_row(&row)
    }

    async fn user_by_email(&self, email: &str) -> Result<UserData> {
        let row = query("SELECT * FROM users WHERE lower(email) = lower($1)")
            .bind(email)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "email"))?;

        user_from_row(&row)
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserData> {
        self.user_by_email(&new_user.email)
            .await
            .conflict_or_ok("user", "email", &new_user.email)?;

        let row = query(
            "INSERT INTO users (username, email, password, created_at) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&new_user.password)
        .bind(new_user.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_or_any(e, "user", "username", &new_user.username))?;

        user_from_row(&row)
    }

    async fn room_by_id(&self, room_id: PrimaryKey) -> Result<RoomData> {
        let row = query("SELECT * FROM rooms WHERE id = $1")
            .bind(room_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("room", "id"))?;

        room_from_row(&row)
    }

    async fn list_rooms(&self, limit: i64) -> Result<Vec<RoomData>> {
        query("SELECT * FROM rooms ORDER BY created_at DESC, id DESC LIMIT $1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?
            .iter()
            .map(room_from_row)
            .collect()
    }

    async fn create_room(&self, new_room: NewRoom) -> Result<RoomData> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let row = query(
            "INSERT INTO rooms (name, description, host_id, is_public, is_temporary, created_at)
            VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(&new_room.name)
        .bind(&new_room.description)
        .bind(new_room.host_id)
        .bind(new_room.is_public)
        .bind(new_room.is_temporary)
        .bind(new_room.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        let room = room_from_row(&row)?;

        query("INSERT INTO room_members (room_id, user_id, role, joined_at) VALUES ($1, $2, 'host', $3)")
            .bind(room.id)
            .bind(room.host_id)
            .bind(room.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        tx.commit().await.map_err(|e| e.any())?;

        Ok(room)
    }

    async fn create_instant_watch(
        &self,
        new_room: NewRoom,
        new_session: NewWatchSession,
    ) -> Result<(RoomData, WatchSessionData)> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let row = query(
            "INSERT INTO rooms (name, description, host_id, is_public, is_temporary, created_at)
            VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(&new_room.name)
        .bind(&new_room.description)
        .bind(new_room.host_id)
        .bind(new_room.is_public)
        .bind(new_room.is_temporary)
        .bind(new_room.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        let room = room_from_row(&row)?;

        query("INSERT INTO room_members (room_id, user_id, role, joined_at) VALUES ($1, $2, 'host', $3)")
            .bind(room.id)
            .bind(room.host_id)
            .bind(room.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        let row = query(
            "INSERT INTO watch_sessions (session_id, room_id, host_id, watch_type, started_at)
            VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(new_session.session_id)
        .bind(room.id)
        .bind(new_session.host_id)
        .bind(new_session.watch_type.as_str())
        .bind(new_session.started_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        let session = session_from_row(&row)?;
        tx.commit().await.map_err(|e| e.any())?;

        Ok((room, session))
    }

    async fn update_room_status(&self, updated: UpdatedRoomStatus) -> Result<RoomData> {
        let row = query(
            "UPDATE rooms SET
                currently_playing = COALESCE($2, currently_playing),
                coming_next = COALESCE($3, coming_next),
                is_screen_sharing = COALESCE($4, is_screen_sharing)
            WHERE id = $1 RETURNING *",
        )
        .bind(updated.id)
        .bind(updated.currently_playing)
        .bind(updated.coming_next)
        .bind(updated.is_screen_sharing)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("room", "id"))?;

        room_from_row(&row)
    }

    async fn update_loop_mode(&self, room_id: PrimaryKey, loop_mode: LoopMode) -> Result<RoomData> {
        let row = query("UPDATE rooms SET loop_mode = $2 WHERE id = $1 RETURNING *")
            .bind(room_id)
            .bind(loop_mode.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("room", "id"))?;

        room_from_row(&row)
    }

    async fn update_playback(
        &self,
        room_id: PrimaryKey,
        state: Option<PlaybackState>,
        time: Option<f64>,
    ) -> Result<()> {
        let result = query(
            "UPDATE rooms SET
                playback_state = COALESCE($2, playback_state),
                playback_time = COALESCE($3, playback_time)
            WHERE id = $1",
        )
        .bind(room_id)
        .bind(state.map(|s| s.as_str()))
        .bind(time)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "room",
                identifier: "id",
            });
        }

        Ok(())
    }

    async fn delete_room(&self, room_id: PrimaryKey) -> Result<()> {
        let result = query("DELETE FROM rooms WHERE id = $1")
            .bind(room_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "room",
                identifier: "id",
            });
        }

        Ok(())
    }

    async fn room_members(&self, room_id: PrimaryKey) -> Result<Vec<RoomMemberData>> {
        let sql = format!("{MEMBER_SELECT} WHERE room_members.room_id = $1 ORDER BY room_members.id");

        query(&sql)
            .bind(room_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?
            .iter()
            .map(member_from_row)
            .collect()
    }

    async fn room_member(&self, room_id: PrimaryKey, user_id: PrimaryKey) -> Result<RoomMemberData> {
        let sql = format!(
            "{MEMBER_SELECT} WHERE room_members.room_id = $1 AND room_members.user_id = $2"
        );

        let row = query(&sql)
            .bind(room_id)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("room member", "user_id"))?;

        member_from_row(&row)
    }

    async fn create_room_member(&self, new_member: NewRoomMember) -> Result<RoomMemberData> {
        query("INSERT INTO room_members (room_id, user_id, role, joined_at) VALUES ($1, $2, $3, $4)")
            .bind(new_member.room_id)
            .bind(new_member.user_id)
            .bind(new_member.role.as_str())
            .bind(new_member.joined_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                unique_or_any(e, "room member", "user_id", &new_member.user_id.to_string())
            })?;

        self.room_member(new_member.room_id, new_member.user_id)
            .await
    }

    async fn delete_room_member(&self, room_id: PrimaryKey, user_id: PrimaryKey) -> Result<()> {
        let result = query("DELETE FROM room_members WHERE room_id = $1 AND user_id = $2")
            .bind(room_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "room member",
                identifier: "user_id",
            });
        }

        Ok(())
    }

    async fn room_invite_by_token(&self, token: &str) -> Result<RoomInviteData> {
        let row = query("SELECT * FROM room_invites WHERE token = $1")
            .bind(token)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("room invite", "token"))?;

        invite_from_row(&row)
    }

    async fn room_invites(&self, room_id: PrimaryKey) -> Result<Vec<RoomInviteData>> {
        query("SELECT * FROM room_invites WHERE room_id = $1 ORDER BY id")
            .bind(room_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?
            .iter()
            .map(invite_from_row)
            .collect()
    }

    async fn create_room_invite(&self, new_invite: NewRoomInvite) -> Result<RoomInviteData> {
        let row = query(
            "INSERT INTO room_invites (token, room_id, inviter_id, invitee_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(&new_invite.token)
        .bind(new_invite.room_id)
        .bind(new_invite.inviter_id)
        .bind(new_invite.invitee_id)
        .bind(new_invite.expires_at)
        .bind(new_invite.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_or_any(e, "room invite", "token", &new_invite.token))?;

        invite_from_row(&row)
    }

    async fn set_invite_status(&self, invite_id: PrimaryKey, status: InviteStatus) -> Result<RoomInviteData> {
        let row = query("UPDATE room_invites SET status = $2 WHERE id = $1 RETURNING *")
            .bind(invite_id)
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("room invite", "id"))?;

        invite_from_row(&row)
    }

    async fn accept_room_invite(
        &self,
        invite_id: PrimaryKey,
        user_id: PrimaryKey,
        mark_accepted: bool,
        joined_at: DateTime<Utc>,
    ) -> Result<RoomMemberData> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let row = query("SELECT * FROM room_invites WHERE id = $1 FOR UPDATE")
            .bind(invite_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| e.not_found_or("room invite", "id"))?;

        let invite = invite_from_row(&row)?;

        query("INSERT INTO room_members (room_id, user_id, role, joined_at) VALUES ($1, $2, 'member', $3)")
            .bind(invite.room_id)
            .bind(user_id)
            .bind(joined_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| unique_or_any(e, "room member", "user_id", &user_id.to_string()))?;

        if mark_accepted {
            query("UPDATE room_invites SET status = 'accepted' WHERE id = $1")
                .bind(invite_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;
        }

        tx.commit().await.map_err(|e| e.any())?;

        self.room_member(invite.room_id, user_id).await
    }

    async fn delete_room_invite(&self, invite_id: PrimaryKey) -> Result<()> {
        let result = query("DELETE FROM room_invites WHERE id = $1")
            .bind(invite_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "room invite",
                identifier: "id",
            });
        }

        Ok(())
    }

    async fn watch_session_by_id(&self, session_pk: PrimaryKey) -> Result<WatchSessionData> {
        let row = query("SELECT * FROM watch_sessions WHERE id = $1")
            .bind(session_pk)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("watch session", "id"))?;

        session_from_row(&row)
    }

    async fn watch_session_by_uuid(&self, session_id: Uuid) -> Result<WatchSessionData> {
        let row = query("SELECT * FROM watch_sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("watch session", "session_id"))?;

        session_from_row(&row)
    }

    async fn active_watch_session(&self, room_id: PrimaryKey) -> Result<Option<WatchSessionData>> {
        let row = query("SELECT * FROM watch_sessions WHERE room_id = $1 AND ended_at IS NULL")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| e.any())?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn create_watch_session(&self, new_session: NewWatchSession) -> Result<WatchSessionData> {
        let result = query(
            "INSERT INTO watch_sessions (session_id, room_id, host_id, watch_type, started_at)
            VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(new_session.session_id)
        .bind(new_session.room_id)
        .bind(new_session.host_id)
        .bind(new_session.watch_type.as_str())
        .bind(new_session.started_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => session_from_row(&row),
            Err(e) if is_unique_violation(&e) => {
                // The partial index refused a second active session
                let active = self.active_watch_session(new_session.room_id).await?;

                Err(DatabaseError::Conflict {
                    resource: "active watch session",
                    field: "session_id",
                    value: active
                        .map(|s| s.session_id.to_string())
                        .unwrap_or_default(),
                })
            }
            Err(e) => Err(e.any()),
        }
    }

    async fn end_watch_session(
        &self,
        session_pk: PrimaryKey,
        ended_at: DateTime<Utc>,
    ) -> Result<EndedSessionData> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let row = query(
            "UPDATE watch_sessions SET ended_at = $2
            WHERE id = $1 AND ended_at IS NULL RETURNING *",
        )
        .bind(session_pk)
        .bind(ended_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        let Some(row) = row else {
            // Already ended, nothing to clean up
            drop(tx);
            let session = self.watch_session_by_id(session_pk).await?;

            return Ok(EndedSessionData {
                session,
                ended_now: false,
                removed_media: vec![],
                room_deleted: false,
            });
        };

        let session = session_from_row(&row)?;

        let removed_media = query("DELETE FROM temporary_media_items WHERE session_id = $1 RETURNING *")
            .bind(session.session_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| e.any())?
            .iter()
            .map(temporary_media_from_row)
            .collect::<Result<Vec<_>>>()?;

        let room_deleted = query("DELETE FROM rooms WHERE id = $1 AND is_temporary = true")
            .bind(session.room_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?
            .rows_affected()
            > 0;

        tx.commit().await.map_err(|e| e.any())?;

        Ok(EndedSessionData {
            session,
            ended_now: true,
            removed_media,
            room_deleted,
        })
    }

    async fn stale_temporary_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<WatchSessionData>> {
        query(
            "SELECT watch_sessions.* FROM watch_sessions
                INNER JOIN rooms ON watch_sessions.room_id = rooms.id
            WHERE watch_sessions.ended_at IS NULL
                AND watch_sessions.started_at < $1
                AND rooms.is_temporary = true
            ORDER BY watch_sessions.started_at",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?
        .iter()
        .map(session_from_row)
        .collect()
    }

    async fn temporary_media_by_id(&self, item_id: PrimaryKey) -> Result<TemporaryMediaData> {
        let row = query("SELECT * FROM temporary_media_items WHERE id = $1")
            .bind(item_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("temporary media item", "id"))?;

        temporary_media_from_row(&row)
    }

    async fn temporary_media_for_session(&self, session_id: Uuid) -> Result<Vec<TemporaryMediaData>> {
        query("SELECT * FROM temporary_media_items WHERE session_id = $1 ORDER BY id")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?
            .iter()
            .map(temporary_media_from_row)
            .collect()
    }

    async fn create_temporary_media(&self, new_media: NewTemporaryMedia) -> Result<TemporaryMediaData> {
        // Ending the session deletes its media, so the row only goes in while it is still active
        let row = query(
            "INSERT INTO temporary_media_items
                (session_id, room_id, uploader_id, file_path, mime_type, size, poster_url, duration, created_at)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9
            WHERE EXISTS (SELECT 1 FROM watch_sessions WHERE session_id = $1 AND ended_at IS NULL)
            RETURNING *",
        )
        .bind(new_media.session_id)
        .bind(new_media.room_id)
        .bind(new_media.uploader_id)
        .bind(&new_media.file_path)
        .bind(&new_media.mime_type)
        .bind(new_media.size)
        .bind(&new_media.poster_url)
        .bind(new_media.duration)
        .bind(new_media.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.any())?
        .ok_or(DatabaseError::NotFound {
            resource: "active watch session",
            identifier: "session_id",
        })?;

        temporary_media_from_row(&row)
    }

    async fn delete_temporary_media(&self, item_id: PrimaryKey) -> Result<()> {
        let result = query("DELETE FROM temporary_media_items WHERE id = $1")
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "temporary media item",
                identifier: "id",
            });
        }

        Ok(())
    }

    async fn media_items_for_room(&self, room_id: PrimaryKey) -> Result<Vec<MediaItemData>> {
        query("SELECT * FROM media_items WHERE room_id = $1 ORDER BY id")
            .bind(room_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?
            .iter()
            .map(media_item_from_row)
            .collect()
    }

    async fn create_media_item(&self, new_item: NewMediaItem) -> Result<MediaItemData> {
        let row = query(
            "INSERT INTO media_items (room_id, uploader_id, title, file_path, mime_type, size, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(new_item.room_id)
        .bind(new_item.uploader_id)
        .bind(&new_item.title)
        .bind(&new_item.file_path)
        .bind(&new_item.mime_type)
        .bind(new_item.size)
        .bind(new_item.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        media_item_from_row(&row)
    }

    async fn chat_message_by_id(&self, message_id: PrimaryKey) -> Result<ChatMessageData> {
        let sql = format!("{CHAT_SELECT} WHERE chat_messages.id = $1");

        let row = query(&sql)
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("chat message", "id"))?;

        chat_message_from_row(&row)
    }

    async fn chat_history(
        &self,
        room_id: PrimaryKey,
        session_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ChatMessageData>> {
        let sql = format!(
            "{CHAT_SELECT}
            WHERE chat_messages.room_id = $1
                AND chat_messages.session_id IS NOT DISTINCT FROM $2
            ORDER BY chat_messages.id DESC
            LIMIT $3"
        );

        let mut history = query(&sql)
            .bind(room_id)
            .bind(session_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?
            .iter()
            .map(chat_message_from_row)
            .collect::<Result<Vec<_>>>()?;

        history.reverse();
        Ok(history)
    }

    async fn create_chat_message(&self, new_message: NewChatMessage) -> Result<ChatMessageData> {
        let row = query(
            "INSERT INTO chat_messages (room_id, session_id, user_id, message, created_at)
            VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(new_message.room_id)
        .bind(new_message.session_id)
        .bind(new_message.user_id)
        .bind(&new_message.message)
        .bind(new_message.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.chat_message_by_id(column(&row, "id")?).await
    }

    async fn update_chat_message(&self, message_id: PrimaryKey, message: String) -> Result<ChatMessageData> {
        let result = query("UPDATE chat_messages SET message = $2, is_edited = true WHERE id = $1")
            .bind(message_id)
            .bind(&message)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "chat message",
                identifier: "id",
            });
        }

        self.chat_message_by_id(message_id).await
    }

    async fn mark_chat_message_removed(&self, message_id: PrimaryKey) -> Result<ChatMessageData> {
        let result = query("UPDATE chat_messages SET deleted_by_host = true WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "chat message",
                identifier: "id",
            });
        }

        self.chat_message_by_id(message_id).await
    }

    async fn delete_chat_message(&self, message_id: PrimaryKey) -> Result<()> {
        let result = query("DELETE FROM chat_messages WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "chat message",
                identifier: "id",
            });
        }

        Ok(())
    }

    async fn create_reaction(&self, new_reaction: NewReaction) -> Result<ReactionData> {
        let row = query(
            "INSERT INTO reactions (user_id, room_id, session_id, message_id, emoji, created_at)
            VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(new_reaction.user_id)
        .bind(new_reaction.room_id)
        .bind(new_reaction.session_id)
        .bind(new_reaction.message_id)
        .bind(&new_reaction.emoji)
        .bind(new_reaction.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        reaction_from_row(&row)
    }

    async fn reactions_for_messages(&self, message_ids: &[PrimaryKey]) -> Result<Vec<ReactionData>> {
        query("SELECT * FROM reactions WHERE message_id = ANY($1) ORDER BY id")
            .bind(message_ids.to_vec())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?
            .iter()
            .map(reaction_from_row)
            .collect()
    }

    async fn theater_by_id(&self, theater_id: PrimaryKey) -> Result<TheaterData> {
        let row = query("SELECT * FROM theaters WHERE id = $1")
            .bind(theater_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("theater", "id"))?;

        theater_from_row(&row)
    }

    async fn theaters_for_session(&self, session_pk: PrimaryKey) -> Result<Vec<TheaterData>> {
        query("SELECT * FROM theaters WHERE session_id = $1 ORDER BY theater_number")
            .bind(session_pk)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?
            .iter()
            .map(theater_from_row)
            .collect()
    }

    async fn create_next_theater(
        &self,
        session_pk: PrimaryKey,
        max_seats: i32,
        created_at: DateTime<Utc>,
    ) -> Result<TheaterData> {
        let row = query(
            "INSERT INTO theaters (session_id, theater_number, max_seats, created_at)
            SELECT $1, (COUNT(*) + 1)::int, $2, $3 FROM theaters WHERE session_id = $1
            RETURNING *",
        )
        .bind(session_pk)
        .bind(max_seats)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_or_any(e, "theater", "theater_number", "next"))?;

        theater_from_row(&row)
    }

    async fn rename_theater(&self, theater_id: PrimaryKey, name: Option<String>) -> Result<TheaterData> {
        let row = query("UPDATE theaters SET custom_name = $2 WHERE id = $1 RETURNING *")
            .bind(theater_id)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("theater", "id"))?;

        theater_from_row(&row)
    }

    async fn theater_assignments(&self, theater_id: PrimaryKey) -> Result<Vec<TheaterAssignmentData>> {
        query("SELECT * FROM theater_assignments WHERE theater_id = $1 ORDER BY seat_number")
            .bind(theater_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?
            .iter()
            .map(assignment_from_row)
            .collect()
    }

    async fn assignment_for_user(
        &self,
        session_pk: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<Option<TheaterAssignmentData>> {
        let row = query("SELECT * FROM theater_assignments WHERE session_id = $1 AND user_id = $2")
            .bind(session_pk)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| e.any())?;

        row.as_ref().map(assignment_from_row).transpose()
    }

    async fn assign_seat(&self, assignment: SeatAssignment) -> Result<TheaterAssignmentData> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        query("SELECT id FROM theaters WHERE id = $1 AND session_id = $2 FOR UPDATE")
            .bind(assignment.theater_id)
            .bind(assignment.session_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| e.not_found_or("theater", "id"))?;

        let existing = query(
            "SELECT * FROM theater_assignments WHERE session_id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(assignment.session_id)
        .bind(assignment.user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| e.any())?
        .as_ref()
        .map(assignment_from_row)
        .transpose()?;

        if let Some(existing) = &existing {
            if existing.theater_id == assignment.theater_id
                && existing.seat_row == assignment.seat_row
                && existing.seat_col == assignment.seat_col
            {
                return Ok(existing.clone());
            }
        }

        let moves_theater = existing
            .as_ref()
            .map_or(true, |e| e.theater_id != assignment.theater_id);

        if moves_theater {
            let claimed = query(
                "UPDATE theaters SET occupied_seats = occupied_seats + 1
                WHERE id = $1 AND occupied_seats < max_seats",
            )
            .bind(assignment.theater_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?
            .rows_affected();

            if claimed == 0 {
                return Err(DatabaseError::Full { resource: "theater" });
            }

            if let Some(existing) = &existing {
                query(
                    "UPDATE theaters SET occupied_seats = GREATEST(occupied_seats - 1, 0)
                    WHERE id = $1",
                )
                .bind(existing.theater_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;
            }
        }

        let seat_row = assignment.seat_row.to_string();
        let seat_number = assignment.seat_number.to_string();

        let row = match &existing {
            Some(existing) => query(
                "UPDATE theater_assignments SET
                    theater_id = $2, seat_row = $3, seat_col = $4, seat_number = $5, assigned_at = $6
                WHERE id = $1 RETURNING *",
            )
            .bind(existing.id)
            .bind(assignment.theater_id)
            .bind(&seat_row)
            .bind(assignment.seat_col)
            .bind(assignment.seat_number)
            .bind(assignment.assigned_at)
            .fetch_one(&mut *tx)
            .await,
            None => query(
                "INSERT INTO theater_assignments
                    (user_id, session_id, theater_id, seat_row, seat_col, seat_number, assigned_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
            )
            .bind(assignment.user_id)
            .bind(assignment.session_id)
            .bind(assignment.theater_id)
            .bind(&seat_row)
            .bind(assignment.seat_col)
            .bind(assignment.seat_number)
            .bind(assignment.assigned_at)
            .fetch_one(&mut *tx)
            .await,
        }
        .map_err(|e| unique_or_any(e, "seat", "seat_number", &seat_number))?;

        let data = assignment_from_row(&row)?;
        tx.commit().await.map_err(|e| e.any())?;

        Ok(data)
    }

    async fn remove_assignment(
        &self,
        session_pk: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<TheaterAssignmentData> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let row = query(
            "DELETE FROM theater_assignments WHERE session_id = $1 AND user_id = $2 RETURNING *",
        )
        .bind(session_pk)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| e.not_found_or("theater assignment", "user_id"))?;

        let removed = assignment_from_row(&row)?;

        query("UPDATE theaters SET occupied_seats = GREATEST(occupied_seats - 1, 0) WHERE id = $1")
            .bind(removed.theater_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        tx.commit().await.map_err(|e| e.any())?;

        Ok(removed)
    }

    async fn clear_ended_session_assignments(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let theater_ids: Vec<PrimaryKey> = query(
            "DELETE FROM theater_assignments
            USING watch_sessions
            WHERE theater_assignments.session_id = watch_sessions.id
                AND watch_sessions.ended_at IS NOT NULL
            RETURNING theater_assignments.theater_id",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| e.any())?
        .iter()
        .map(|row| column(row, "theater_id"))
        .collect::<Result<_>>()?;

        for theater_id in &theater_ids {
            query("UPDATE theaters SET occupied_seats = GREATEST(occupied_seats - 1, 0) WHERE id = $1")
                .bind(*theater_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;
        }

        tx.commit().await.map_err(|e| e.any())?;

        Ok(theater_ids.len() as u64)
    }

    async fn broadcast_permission(
        &self,
        session_pk: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<Option<BroadcastPermissionData>> {
        let row = query("SELECT * FROM broadcast_permissions WHERE session_id = $1 AND user_id = $2")
            .bind(session_pk)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| e.any())?;

        row.as_ref().map(permission_from_row).transpose()
    }

    async fn active_broadcast_permissions(&self, session_pk: PrimaryKey) -> Result<Vec<BroadcastPermissionData>> {
        query(
            "SELECT * FROM broadcast_permissions
            WHERE session_id = $1 AND is_active = true
            ORDER BY granted_at, id",
        )
        .bind(session_pk)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?
        .iter()
        .map(permission_from_row)
        .collect()
    }

    async fn pending_broadcast_request(
        &self,
        session_pk: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<Option<BroadcastRequestData>> {
        let row = query(
            "SELECT * FROM broadcast_requests
            WHERE session_id = $1 AND user_id = $2 AND status = 'pending'",
        )
        .bind(session_pk)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.any())?;

        row.as_ref().map(request_from_row).transpose()
    }

    async fn broadcast_request_by_id(&self, request_id: PrimaryKey) -> Result<BroadcastRequestData> {
        let row = query("SELECT * FROM broadcast_requests WHERE id = $1")
            .bind(request_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("broadcast request", "id"))?;

        request_from_row(&row)
    }

    async fn broadcast_requests(
        &self,
        session_pk: PrimaryKey,
        status: Option<BroadcastRequestStatus>,
    ) -> Result<Vec<BroadcastRequestData>> {
        query(
            "SELECT * FROM broadcast_requests
            WHERE session_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY id",
        )
        .bind(session_pk)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?
        .iter()
        .map(request_from_row)
        .collect()
    }

    async fn create_broadcast_request(&self, new_request: NewBroadcastRequest) -> Result<BroadcastRequestData> {
        let row = query(
            "INSERT INTO broadcast_requests (session_id, user_id, message, requested_at)
            VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(new_request.session_id)
        .bind(new_request.user_id)
        .bind(&new_request.message)
        .bind(new_request.requested_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            unique_or_any(e, "broadcast request", "user_id", &new_request.user_id.to_string())
        })?;

        request_from_row(&row)
    }

    async fn grant_broadcast(&self, grant: BroadcastGrant) -> Result<BroadcastPermissionData> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let row = query(
            "INSERT INTO broadcast_permissions (session_id, user_id, granted_by, is_active, granted_at)
            VALUES ($1, $2, $3, true, $4)
            ON CONFLICT (session_id, user_id) DO UPDATE SET
                granted_by = EXCLUDED.granted_by,
                is_active = true,
                granted_at = EXCLUDED.granted_at,
                revoked_at = NULL
            RETURNING *",
        )
        .bind(grant.session_id)
        .bind(grant.user_id)
        .bind(grant.granted_by)
        .bind(grant.granted_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        let permission = permission_from_row(&row)?;

        query(
            "UPDATE broadcast_requests SET status = 'approved', responded_by = $3, responded_at = $4
            WHERE session_id = $1 AND user_id = $2 AND status = 'pending'",
        )
        .bind(grant.session_id)
        .bind(grant.user_id)
        .bind(grant.granted_by)
        .bind(grant.granted_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        tx.commit().await.map_err(|e| e.any())?;

        Ok(permission)
    }

    async fn revoke_broadcast(
        &self,
        session_pk: PrimaryKey,
        user_id: PrimaryKey,
        revoked_at: DateTime<Utc>,
    ) -> Result<BroadcastPermissionData> {
        let row = query(
            "UPDATE broadcast_permissions SET is_active = false, revoked_at = $3
            WHERE session_id = $1 AND user_id = $2 RETURNING *",
        )
        .bind(session_pk)
        .bind(user_id)
        .bind(revoked_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("broadcast permission", "user_id"))?;

        permission_from_row(&row)
    }

    async fn respond_broadcast_request(
        &self,
        request_id: PrimaryKey,
        status: BroadcastRequestStatus,
        responded_by: PrimaryKey,
        responded_at: DateTime<Utc>,
    ) -> Result<BroadcastRequestData> {
        let row = query(
            "UPDATE broadcast_requests SET status = $2, responded_by = $3, responded_at = $4
            WHERE id = $1 RETURNING *",
        )
        .bind(request_id)
        .bind(status.as_str())
        .bind(responded_by)
        .bind(responded_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("broadcast request", "id"))?;

        request_from_row(&row)
    }

    async fn tv_content_by_id(&self, content_id: PrimaryKey) -> Result<TvContentData> {
        let row = query("SELECT * FROM room_tv_content WHERE id = $1")
            .bind(content_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("tv content", "id"))?;

        tv_content_from_row(&row)
    }

    async fn active_tv_content(&self, room_id: PrimaryKey, now: DateTime<Utc>) -> Result<Option<TvContentData>> {
        let row = query(
            "SELECT * FROM room_tv_content
            WHERE room_id = $1 AND ends_at > $2
            ORDER BY starts_at DESC, id DESC
            LIMIT 1",
        )
        .bind(room_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.any())?;

        row.as_ref().map(tv_content_from_row).transpose()
    }

    async fn create_tv_content(&self, new_content: NewTvContent) -> Result<TvContentData> {
        let row = query(
            "INSERT INTO room_tv_content
                (room_id, session_id, kind, title, body, media_url, created_by, starts_at, ends_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING *",
        )
        .bind(new_content.room_id)
        .bind(new_content.session_id)
        .bind(new_content.kind.as_str())
        .bind(&new_content.title)
        .bind(&new_content.body)
        .bind(&new_content.media_url)
        .bind(new_content.created_by)
        .bind(new_content.starts_at)
        .bind(new_content.ends_at)
        .bind(new_content.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        tv_content_from_row(&row)
    }

    async fn delete_tv_content(&self, content_id: PrimaryKey) -> Result<()> {
        let result = query("DELETE FROM room_tv_content WHERE id = $1")
            .bind(content_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "tv content",
                identifier: "id",
            });
        }

        Ok(())
    }
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        DatabaseError::Internal(Box::new(self))
    }

    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource,
                identifier,
            },
            e => Self::any(e),
        }
    }
}

fn is_unique_violation(error: &SqlxError) -> bool {
    error
        .as_database_error()
        .map_or(false, |e| e.is_unique_violation())
}

fn unique_or_any(
    error: SqlxError,
    resource: &'static str,
    field: &'static str,
    value: &str,
) -> DatabaseError {
    if is_unique_violation(&error) {
        DatabaseError::Conflict {
            resource,
            field,
            value: value.to_string(),
        }
    } else {
        error.any()
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get(name).map_err(|e| e.any())
}

fn text_column<T>(row: &PgRow, name: &str) -> Result<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    let value: String = column(row, name)?;
    value
        .parse()
        .map_err(|e: UnknownVariant| DatabaseError::Internal(Box::new(e)))
}

fn user_from_row(row: &PgRow) -> Result<UserData> {
    Ok(UserData {
        id: column(row, "id")?,
        username: column(row, "username")?,
        email: column(row, "email")?,
        password: column(row, "password")?,
        created_at: column(row, "created_at")?,
    })
}

fn room_from_row(row: &PgRow) -> Result<RoomData> {
    Ok(RoomData {
        id: column(row, "id")?,
        name: column(row, "name")?,
        description: column(row, "description")?,
        host_id: column(row, "host_id")?,
        is_public: column(row, "is_public")?,
        is_temporary: column(row, "is_temporary")?,
        playback_state: text_column(row, "playback_state")?,
        playback_time: column(row, "playback_time")?,
        loop_mode: text_column(row, "loop_mode")?,
        currently_playing: column(row, "currently_playing")?,
        coming_next: column(row, "coming_next")?,
        is_screen_sharing: column(row, "is_screen_sharing")?,
        created_at: column(row, "created_at")?,
    })
}

fn member_from_row(row: &PgRow) -> Result<RoomMemberData> {
    Ok(RoomMemberData {
        id: column(row, "id")?,
        room_id: column(row, "room_id")?,
        role: text_column(row, "role")?,
        user: UserData {
            id: column(row, "user_id")?,
            username: column(row, "username")?,
            email: column(row, "email")?,
            password: column(row, "password")?,
            created_at: column(row, "user_created_at")?,
        },
        joined_at: column(row, "joined_at")?,
    })
}

fn invite_from_row(row: &PgRow) -> Result<RoomInviteData> {
    Ok(RoomInviteData {
        id: column(row, "id")?,
        room_id: column(row, "room_id")?,
        inviter_id: column(row, "inviter_id")?,
        invitee_id: column(row, "invitee_id")?,
        token: column(row, "token")?,
        status: text_column(row, "status")?,
        expires_at: column(row, "expires_at")?,
        created_at: column(row, "created_at")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<WatchSessionData> {
    Ok(WatchSessionData {
        id: column(row, "id")?,
        session_id: column(row, "session_id")?,
        room_id: column(row, "room_id")?,
        host_id: column(row, "host_id")?,
        watch_type: text_column(row, "watch_type")?,
        started_at: column(row, "started_at")?,
        ended_at: column(row, "ended_at")?,
    })
}

fn temporary_media_from_row(row: &PgRow) -> Result<TemporaryMediaData> {
    Ok(TemporaryMediaData {
        id: column(row, "id")?,
        session_id: column(row, "session_id")?,
        room_id: column(row, "room_id")?,
        uploader_id: column(row, "uploader_id")?,
        file_path: column(row, "file_path")?,
        mime_type: column(row, "mime_type")?,
        size: column(row, "size")?,
        poster_url: column(row, "poster_url")?,
        duration: column(row, "duration")?,
        created_at: column(row, "created_at")?,
    })
}

fn media_item_from_row(row: &PgRow) -> Result<MediaItemData> {
    Ok(MediaItemData {
        id: column(row, "id")?,
        room_id: column(row, "room_id")?,
        uploader_id: column(row, "uploader_id")?,
        title: column(row, "title")?,
        file_path: column(row, "file_path")?,
        mime_type: column(row, "mime_type")?,
        size: column(row, "size")?,
        poster_url: column(row, "poster_url")?,
        duration: column(row, "duration")?,
        created_at: column(row, "created_at")?,
    })
}

fn chat_message_from_row(row: &PgRow) -> Result<ChatMessageData> {
    Ok(ChatMessageData {
        id: column(row, "id")?,
        room_id: column(row, "room_id")?,
        session_id: column(row, "session_id")?,
        user_id: column(row, "user_id")?,
        username: column(row, "username")?,
        message: column(row, "message")?,
        is_edited: column(row, "is_edited")?,
        deleted_by_host: column(row, "deleted_by_host")?,
        created_at: column(row, "created_at")?,
    })
}

fn reaction_from_row(row: &PgRow) -> Result<ReactionData> {
    Ok(ReactionData {
        id: column(row, "id")?,
        user_id: column(row, "user_id")?,
        room_id: column(row, "room_id")?,
        session_id: column(row, "session_id")?,
        message_id: column(row, "message_id")?,
        emoji: column(row, "emoji")?,
        created_at: column(row, "created_at")?,
    })
}

fn theater_from_row(row: &PgRow) -> Result<TheaterData> {
    Ok(TheaterData {
        id: column(row, "id")?,
        session_id: column(row, "session_id")?,
        theater_number: column(row, "theater_number")?,
        custom_name: column(row, "custom_name")?,
        occupied_seats: column(row, "occupied_seats")?,
        max_seats: column(row, "max_seats")?,
        created_at: column(row, "created_at")?,
    })
}

fn assignment_from_row(row: &PgRow) -> Result<TheaterAssignmentData> {
    let seat_row: String = column(row, "seat_row")?;
    let seat_row = seat_row.chars().next().ok_or_else(|| {
        DatabaseError::Internal(Box::new(UnknownVariant {
            kind: "seat row",
            value: seat_row.clone(),
        }))
    })?;

    Ok(TheaterAssignmentData {
        id: column(row, "id")?,
        user_id: column(row, "user_id")?,
        session_id: column(row, "session_id")?,
        theater_id: column(row, "theater_id")?,
        seat_row,
        seat_col: column(row, "seat_col")?,
        seat_number: column(row, "seat_number")?,
        assigned_at: column(row, "assigned_at")?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<BroadcastPermissionData> {
    Ok(BroadcastPermissionData {
        id: column(row, "id")?,
        session_id: column(row, "session_id")?,
        user_id: column(row, "user_id")?,
        granted_by: column(row, "granted_by")?,
        is_active: column(row, "is_active")?,
        granted_at: column(row, "granted_at")?,
        revoked_at: column(row, "revoked_at")?,
    })
}

fn request_from_row(row: &PgRow) -> Result<BroadcastRequestData> {
    Ok(BroadcastRequestData {
        id: column(row, "id")?,
        session_id: column(row, "session_id")?,
        user_id: column(row, "user_id")?,
        status: text_column(row, "status")?,
        message: column(row, "message")?,
        requested_at: column(row, "requested_at")?,
        responded_by: column(row, "responded_by")?,
        responded_at: column(row, "responded_at")?,
    })
}

fn tv_content_from_row(row: &PgRow) -> Result<TvContentData> {
    Ok(TvContentData {
        id: column(row, "id")?,
        room_id: column(row, "room_id")?,
        session_id: column(row, "session_id")?,
        kind: text_column(row, "kind")?,
        title: column(row, "title")?,
        body: column(row, "body")?,
        media_url: column(row, "media_url")?,
        created_by: column(row, "created_by")?,
        starts_at: column(row, "starts_at")?,
        ends_at: column(row, "ends_at")?,
        created_at: column(row, "created_at")?,
    })
}
