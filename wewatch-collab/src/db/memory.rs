use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::*;

/// A record store that lives in process memory.
///
/// Every table sits behind one lock, so each trait method is trivially atomic.
#[derive(Default)]
pub struct MemoryDatabase {
    tables: Mutex<Tables>,
}

#[derive(Debug, Clone)]
struct MemberRow {
    id: PrimaryKey,
    room_id: PrimaryKey,
    user_id: PrimaryKey,
    role: MemberRole,
    joined_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    last_id: PrimaryKey,
    users: BTreeMap<PrimaryKey, UserData>,
    rooms: BTreeMap<PrimaryKey, RoomData>,
    members: BTreeMap<PrimaryKey, MemberRow>,
    invites: BTreeMap<PrimaryKey, RoomInviteData>,
    sessions: BTreeMap<PrimaryKey, WatchSessionData>,
    temporary_media: BTreeMap<PrimaryKey, TemporaryMediaData>,
    media_items: BTreeMap<PrimaryKey, MediaItemData>,
    chat_messages: BTreeMap<PrimaryKey, ChatMessageData>,
    reactions: BTreeMap<PrimaryKey, ReactionData>,
    theaters: BTreeMap<PrimaryKey, TheaterData>,
    assignments: BTreeMap<PrimaryKey, TheaterAssignmentData>,
    permissions: BTreeMap<PrimaryKey, BroadcastPermissionData>,
    requests: BTreeMap<PrimaryKey, BroadcastRequestData>,
    tv_content: BTreeMap<PrimaryKey, TvContentData>,
}

fn not_found(resource: &'static str, identifier: &'static str) -> DatabaseError {
    DatabaseError::NotFound {
        resource,
        identifier,
    }
}

fn conflict(resource: &'static str, field: &'static str, value: impl ToString) -> DatabaseError {
    DatabaseError::Conflict {
        resource,
        field,
        value: value.to_string(),
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tables {
    fn next_id(&mut self) -> PrimaryKey {
        self.last_id += 1;
        self.last_id
    }

    fn user(&self, user_id: PrimaryKey) -> Result<&UserData> {
        self.users
            .get(&user_id)
            .ok_or_else(|| not_found("user", "id"))
    }

    fn room(&self, room_id: PrimaryKey) -> Result<&RoomData> {
        self.rooms
            .get(&room_id)
            .ok_or_else(|| not_found("room", "id"))
    }

    fn room_mut(&mut self, room_id: PrimaryKey) -> Result<&mut RoomData> {
        self.rooms
            .get_mut(&room_id)
            .ok_or_else(|| not_found("room", "id"))
    }

    fn member_data(&self, row: &MemberRow) -> Result<RoomMemberData> {
        Ok(RoomMemberData {
            id: row.id,
            room_id: row.room_id,
            role: row.role,
            user: self.user(row.user_id)?.clone(),
            joined_at: row.joined_at,
        })
    }

    fn member_row(&self, room_id: PrimaryKey, user_id: PrimaryKey) -> Option<&MemberRow> {
        self.members
            .values()
            .find(|m| m.room_id == room_id && m.user_id == user_id)
    }

    fn insert_room(&mut self, new_room: NewRoom) -> Result<RoomData> {
        self.user(new_room.host_id)?;

        let now = new_room.created_at;
        let room = RoomData {
            id: self.next_id(),
            name: new_room.name,
            description: new_room.description,
            host_id: new_room.host_id,
            is_public: new_room.is_public,
            is_temporary: new_room.is_temporary,
            playback_state: PlaybackState::Paused,
            playback_time: 0.,
            loop_mode: LoopMode::None,
            currently_playing: None,
            coming_next: None,
            is_screen_sharing: false,
            created_at: now,
        };

        self.rooms.insert(room.id, room.clone());
        self.insert_member(NewRoomMember {
            user_id: room.host_id,
            room_id: room.id,
            role: MemberRole::Host,
            joined_at: now,
        })?;

        Ok(room)
    }

    fn insert_member(&mut self, new_member: NewRoomMember) -> Result<RoomMemberData> {
        self.room(new_member.room_id)?;
        self.user(new_member.user_id)?;

        if self
            .member_row(new_member.room_id, new_member.user_id)
            .is_some()
        {
            return Err(conflict("room member", "user_id", new_member.user_id));
        }

        let row = MemberRow {
            id: self.next_id(),
            room_id: new_member.room_id,
            user_id: new_member.user_id,
            role: new_member.role,
            joined_at: new_member.joined_at,
        };

        self.members.insert(row.id, row.clone());
        self.member_data(&row)
    }

    fn active_session(&self, room_id: PrimaryKey) -> Option<&WatchSessionData> {
        self.sessions
            .values()
            .find(|s| s.room_id == room_id && s.is_active())
    }

    fn insert_session(&mut self, new_session: NewWatchSession) -> Result<WatchSessionData> {
        self.room(new_session.room_id)?;

        if let Some(active) = self.active_session(new_session.room_id) {
            return Err(conflict("active watch session", "session_id", active.session_id));
        }

        let session = WatchSessionData {
            id: self.next_id(),
            session_id: new_session.session_id,
            room_id: new_session.room_id,
            host_id: new_session.host_id,
            watch_type: new_session.watch_type,
            started_at: new_session.started_at,
            ended_at: None,
        };

        self.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    /// Removes everything a session owns except temporary media
    fn remove_session_children(&mut self, session_pk: PrimaryKey) {
        self.assignments.retain(|_, a| a.session_id != session_pk);
        self.theaters.retain(|_, t| t.session_id != session_pk);
        self.permissions.retain(|_, p| p.session_id != session_pk);
        self.requests.retain(|_, r| r.session_id != session_pk);
    }

    fn remove_room(&mut self, room_id: PrimaryKey) {
        let sessions: Vec<_> = self
            .sessions
            .values()
            .filter(|s| s.room_id == room_id)
            .map(|s| s.id)
            .collect();

        for session_pk in sessions {
            self.remove_session_children(session_pk);
            self.sessions.remove(&session_pk);
        }

        self.rooms.remove(&room_id);
        self.members.retain(|_, m| m.room_id != room_id);
        self.invites.retain(|_, i| i.room_id != room_id);
        self.temporary_media.retain(|_, m| m.room_id != room_id);
        self.media_items.retain(|_, m| m.room_id != room_id);
        self.chat_messages.retain(|_, m| m.room_id != room_id);
        self.reactions.retain(|_, r| r.room_id != room_id);
        self.tv_content.retain(|_, c| c.room_id != room_id);
    }

    fn session(&self, session_pk: PrimaryKey) -> Result<&WatchSessionData> {
        self.sessions
            .get(&session_pk)
            .ok_or_else(|| not_found("watch session", "id"))
    }

    fn adjust_occupancy(&mut self, theater_id: PrimaryKey, delta: i32) {
        if let Some(theater) = self.theaters.get_mut(&theater_id) {
            theater.occupied_seats = (theater.occupied_seats + delta).clamp(0, theater.max_seats);
        }
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        self.tables.lock().user(user_id).cloned()
    }

    async fn user_by_email(&self, email: &str) -> Result<UserData> {
        self.tables
            .lock()
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or_else(|| not_found("user", "email"))
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserData> {
        let mut tables = self.tables.lock();

        for user in tables.users.values() {
            if user.email.eq_ignore_ascii_case(&new_user.email) {
                return Err(conflict("user", "email", &new_user.email));
            }

            if user.username == new_user.username {
                return Err(conflict("user", "username", &new_user.username));
            }
        }

        let user = UserData {
            id: tables.next_id(),
            username: new_user.username,
            email: new_user.email,
            password: new_user.password,
            created_at: new_user.created_at,
        };

        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn room_by_id(&self, room_id: PrimaryKey) -> Result<RoomData> {
        self.tables.lock().room(room_id).cloned()
    }

    async fn list_rooms(&self, limit: i64) -> Result<Vec<RoomData>> {
        let tables = self.tables.lock();

        Ok(tables
            .rooms
            .values()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn create_room(&self, new_room: NewRoom) -> Result<RoomData> {
        self.tables.lock().insert_room(new_room)
    }

    async fn create_instant_watch(
        &self,
        new_room: NewRoom,
        new_session: NewWatchSession,
    ) -> Result<(RoomData, WatchSessionData)> {
        let mut tables = self.tables.lock();
        let room = tables.insert_room(new_room)?;

        let session = tables.insert_session(NewWatchSession {
            room_id: room.id,
            ..new_session
        })?;

        Ok((room, session))
    }

    async fn update_room_status(&self, updated: UpdatedRoomStatus) -> Result<RoomData> {
        let mut tables = self.tables.lock();
        let room = tables.room_mut(updated.id)?;

        if let Some(playing) = updated.currently_playing {
            room.currently_playing = Some(playing);
        }

        if let Some(next) = updated.coming_next {
            room.coming_next = Some(next);
        }

        if let Some(sharing) = updated.is_screen_sharing {
            room.is_screen_sharing = sharing;
        }

        Ok(room.clone())
    }

    async fn update_loop_mode(&self, room_id: PrimaryKey, loop_mode: LoopMode) -> Result<RoomData> {
        let mut tables = self.tables.lock();
        let room = tables.room_mut(room_id)?;

        room.loop_mode = loop_mode;
        Ok(room.clone())
    }

    async fn update_playback(
        &self,
        room_id: PrimaryKey,
        state: Option<PlaybackState>,
        time: Option<f64>,
    ) -> Result<()> {
        let mut tables = self.tables.lock();
        let room = tables.room_mut(room_id)?;

        if let Some(state) = state {
            room.playback_state = state;
        }

        if let Some(time) = time {
            room.playback_time = time;
        }

        Ok(())
    }

    async fn delete_room(&self, room_id: PrimaryKey) -> Result<()> {
        let mut tables = self.tables.lock();

        tables.room(room_id)?;
        tables.remove_room(room_id);

        Ok(())
    }

    async fn room_members(&self, room_id: PrimaryKey) -> Result<Vec<RoomMemberData>> {
        let tables = self.tables.lock();

        tables
            .members
            .values()
            .filter(|m| m.room_id == room_id)
            .map(|m| tables.member_data(m))
            .collect()
    }

    async fn room_member(&self, room_id: PrimaryKey, user_id: PrimaryKey) -> Result<RoomMemberData> {
        let tables = self.tables.lock();
        let row = tables
            .member_row(room_id, user_id)
            .ok_or_else(|| not_found("room member", "user_id"))?;

        tables.member_data(row)
    }

    async fn create_room_member(&self, new_member: NewRoomMember) -> Result<RoomMemberData> {
        self.tables.lock().insert_member(new_member)
    }

    async fn delete_room_member(&self, room_id: PrimaryKey, user_id: PrimaryKey) -> Result<()> {
        let mut tables = self.tables.lock();
        let id = tables
            .member_row(room_id, user_id)
            .map(|m| m.id)
            .ok_or_else(|| not_found("room member", "user_id"))?;

        tables.members.remove(&id);
        Ok(())
    }

    async fn room_invite_by_token(&self, token: &str) -> Result<RoomInviteData> {
        self.tables
            .lock()
            .invites
            .values()
            .find(|i| i.token == token)
            .cloned()
            .ok_or_else(|| not_found("room invite", "token"))
    }

    async fn room_invites(&self, room_id: PrimaryKey) -> Result<Vec<RoomInviteData>> {
        Ok(self
            .tables
            .lock()
            .invites
            .values()
            .filter(|i| i.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn create_room_invite(&self, new_invite: NewRoomInvite) -> Result<RoomInviteData> {
        let mut tables = self.tables.lock();

        tables.room(new_invite.room_id)?;

        if tables.invites.values().any(|i| i.token == new_invite.token) {
            return Err(conflict("room invite", "token", &new_invite.token));
        }

        let invite = RoomInviteData {
            id: tables.next_id(),
            room_id: new_invite.room_id,
            inviter_id: new_invite.inviter_id,
            invitee_id: new_invite.invitee_id,
            token: new_invite.token,
            status: InviteStatus::Pending,
            expires_at: new_invite.expires_at,
            created_at: new_invite.created_at,
        };

        tables.invites.insert(invite.id, invite.clone());
        Ok(invite)
    }

    async fn set_invite_status(&self, invite_id: PrimaryKey, status: InviteStatus) -> Result<RoomInviteData> {
        let mut tables = self.tables.lock();
        let invite = tables
            .invites
            .get_mut(&invite_id)
            .ok_or_else(|| not_found("room invite", "id"))?;

        invite.status = status;
        Ok(invite.clone())
    }

    async fn accept_room_invite(
        &self,
        invite_id: PrimaryKey,
        user_id: PrimaryKey,
        mark_accepted: bool,
        joined_at: DateTime<Utc>,
    ) -> Result<RoomMemberData> {
        let mut tables = self.tables.lock();
        let room_id = tables
            .invites
            .get(&invite_id)
            .map(|i| i.room_id)
            .ok_or_else(|| not_found("room invite", "id"))?;

        let member = tables.insert_member(NewRoomMember {
            user_id,
            room_id,
            role: MemberRole::Member,
            joined_at,
        })?;

        if mark_accepted {
            if let Some(invite) = tables.invites.get_mut(&invite_id) {
                invite.status = InviteStatus::Accepted;
            }
        }

        Ok(member)
    }

    async fn delete_room_invite(&self, invite_id: PrimaryKey) -> Result<()> {
        self.tables
            .lock()
            .invites
            .remove(&invite_id)
            .map(|_| ())
            .ok_or_else(|| not_found("room invite", "id"))
    }

    async fn watch_session_by_id(&self, session_pk: PrimaryKey) -> Result<WatchSessionData> {
        self.tables.lock().session(session_pk).cloned()
    }

    async fn watch_session_by_uuid(&self, session_id: Uuid) -> Result<WatchSessionData> {
        self.tables
            .lock()
            .sessions
            .values()
            .find(|s| s.session_id == session_id)
            .cloned()
            .ok_or_else(|| not_found("watch session", "session_id"))
    }

    async fn active_watch_session(&self, room_id: PrimaryKey) -> Result<Option<WatchSessionData>> {
        Ok(self.tables.lock().active_session(room_id).cloned())
    }

    async fn create_watch_session(&self, new_session: NewWatchSession) -> Result<WatchSessionData> {
        self.tables.lock().insert_session(new_session)
    }

    async fn end_watch_session(
        &self,
        session_pk: PrimaryKey,
        ended_at: DateTime<Utc>,
    ) -> Result<EndedSessionData> {
        let mut tables = self.tables.lock();
        let session = tables.session(session_pk)?.clone();

        if !session.is_active() {
            return Ok(EndedSessionData {
                session,
                ended_now: false,
                removed_media: vec![],
                room_deleted: false,
            });
        }

        let removed_media: Vec<_> = tables
            .temporary_media
            .values()
            .filter(|m| m.session_id == session.session_id)
            .cloned()
            .collect();

        for media in &removed_media {
            tables.temporary_media.remove(&media.id);
        }

        let mut ended = session;
        ended.ended_at = Some(ended_at);
        tables.sessions.insert(ended.id, ended.clone());

        let room_deleted = tables
            .rooms
            .get(&ended.room_id)
            .map_or(false, |r| r.is_temporary);

        if room_deleted {
            tables.remove_room(ended.room_id);
        }

        Ok(EndedSessionData {
            session: ended,
            ended_now: true,
            removed_media,
            room_deleted,
        })
    }

    async fn stale_temporary_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<WatchSessionData>> {
        let tables = self.tables.lock();

        Ok(tables
            .sessions
            .values()
            .filter(|s| s.is_active() && s.started_at < cutoff)
            .filter(|s| tables.rooms.get(&s.room_id).map_or(false, |r| r.is_temporary))
            .cloned()
            .collect())
    }

    async fn temporary_media_by_id(&self, item_id: PrimaryKey) -> Result<TemporaryMediaData> {
        self.tables
            .lock()
            .temporary_media
            .get(&item_id)
            .cloned()
            .ok_or_else(|| not_found("temporary media item", "id"))
    }

    async fn temporary_media_for_session(&self, session_id: Uuid) -> Result<Vec<TemporaryMediaData>> {
        Ok(self
            .tables
            .lock()
            .temporary_media
            .values()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn create_temporary_media(&self, new_media: NewTemporaryMedia) -> Result<TemporaryMediaData> {
        let mut tables = self.tables.lock();

        tables.room(new_media.room_id)?;

        let is_active = tables
            .sessions
            .values()
            .any(|s| s.session_id == new_media.session_id && s.is_active());

        if !is_active {
            return Err(not_found("active watch session", "session_id"));
        }

        let media = TemporaryMediaData {
            id: tables.next_id(),
            session_id: new_media.session_id,
            room_id: new_media.room_id,
            uploader_id: new_media.uploader_id,
            file_path: new_media.file_path,
            mime_type: new_media.mime_type,
            size: new_media.size,
            poster_url: new_media.poster_url,
            duration: new_media.duration,
            created_at: new_media.created_at,
        };

        tables.temporary_media.insert(media.id, media.clone());
        Ok(media)
    }

    async fn delete_temporary_media(&self, item_id: PrimaryKey) -> Result<()> {
        self.tables
            .lock()
            .temporary_media
            .remove(&item_id)
            .map(|_| ())
            .ok_or_else(|| not_found("temporary media item", "id"))
    }

    async fn media_items_for_room(&self, room_id: PrimaryKey) -> Result<Vec<MediaItemData>> {
        Ok(self
            .tables
            .lock()
            .media_items
            .values()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn create_media_item(&self, new_item: NewMediaItem) -> Result<MediaItemData> {
        let mut tables = self.tables.lock();

        tables.room(new_item.room_id)?;

        let item = MediaItemData {
            id: tables.next_id(),
            room_id: new_item.room_id,
            uploader_id: new_item.uploader_id,
            title: new_item.title,
            file_path: new_item.file_path,
            mime_type: new_item.mime_type,
            size: new_item.size,
            poster_url: None,
            duration: None,
            created_at: new_item.created_at,
        };

        tables.media_items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn chat_message_by_id(&self, message_id: PrimaryKey) -> Result<ChatMessageData> {
        self.tables
            .lock()
            .chat_messages
            .get(&message_id)
            .cloned()
            .ok_or_else(|| not_found("chat message", "id"))
    }

    async fn chat_history(
        &self,
        room_id: PrimaryKey,
        session_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ChatMessageData>> {
        let tables = self.tables.lock();

        let mut history: Vec<_> = tables
            .chat_messages
            .values()
            .rev()
            .filter(|m| m.room_id == room_id && m.session_id == session_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();

        history.reverse();
        Ok(history)
    }

    async fn create_chat_message(&self, new_message: NewChatMessage) -> Result<ChatMessageData> {
        let mut tables = self.tables.lock();

        tables.room(new_message.room_id)?;
        let username = tables.user(new_message.user_id)?.username.clone();

        let message = ChatMessageData {
            id: tables.next_id(),
            room_id: new_message.room_id,
            session_id: new_message.session_id,
            user_id: new_message.user_id,
            username,
            message: new_message.message,
            is_edited: false,
            deleted_by_host: false,
            created_at: new_message.created_at,
        };

        tables.chat_messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn update_chat_message(&self, message_id: PrimaryKey, message: String) -> Result<ChatMessageData> {
        let mut tables = self.tables.lock();
        let stored = tables
            .chat_messages
            .get_mut(&message_id)
            .ok_or_else(|| not_found("chat message", "id"))?;

        stored.message = message;
        stored.is_edited = true;

        Ok(stored.clone())
    }

    async fn mark_chat_message_removed(&self, message_id: PrimaryKey) -> Result<ChatMessageData> {
        let mut tables = self.tables.lock();
        let stored = tables
            .chat_messages
            .get_mut(&message_id)
            .ok_or_else(|| not_found("chat message", "id"))?;

        stored.deleted_by_host = true;
        Ok(stored.clone())
    }

    async fn delete_chat_message(&self, message_id: PrimaryKey) -> Result<()> {
        let mut tables = self.tables.lock();

        tables
            .chat_messages
            .remove(&message_id)
            .ok_or_else(|| not_found("chat message", "id"))?;
        tables
            .reactions
            .retain(|_, r| r.message_id != Some(message_id));

        Ok(())
    }

    async fn create_reaction(&self, new_reaction: NewReaction) -> Result<ReactionData> {
        let mut tables = self.tables.lock();

        tables.room(new_reaction.room_id)?;

        if let Some(message_id) = new_reaction.message_id {
            if !tables.chat_messages.contains_key(&message_id) {
                return Err(not_found("chat message", "id"));
            }
        }

        let reaction = ReactionData {
            id: tables.next_id(),
            user_id: new_reaction.user_id,
            room_id: new_reaction.room_id,
            session_id: new_reaction.session_id,
            message_id: new_reaction.message_id,
            emoji: new_reaction.emoji,
            created_at: new_reaction.created_at,
        };

        tables.reactions.insert(reaction.id, reaction.clone());
        Ok(reaction)
    }

    async fn reactions_for_messages(&self, message_ids: &[PrimaryKey]) -> Result<Vec<ReactionData>> {
        Ok(self
            .tables
            .lock()
            .reactions
            .values()
            .filter(|r| r.message_id.map_or(false, |id| message_ids.contains(&id)))
            .cloned()
            .collect())
    }

    async fn theater_by_id(&self, theater_id: PrimaryKey) -> Result<TheaterData> {
        self.tables
            .lock()
            .theaters
            .get(&theater_id)
            .cloned()
            .ok_or_else(|| not_found("theater", "id"))
    }

    async fn theaters_for_session(&self, session_pk: PrimaryKey) -> Result<Vec<TheaterData>> {
        let mut theaters: Vec<_> = self
            .tables
            .lock()
            .theaters
            .values()
            .filter(|t| t.session_id == session_pk)
            .cloned()
            .collect();

        theaters.sort_by_key(|t| t.theater_number);
        Ok(theaters)
    }

    async fn create_next_theater(
        &self,
        session_pk: PrimaryKey,
        max_seats: i32,
        created_at: DateTime<Utc>,
    ) -> Result<TheaterData> {
        let mut tables = self.tables.lock();

        tables.session(session_pk)?;

        let count = tables
            .theaters
            .values()
            .filter(|t| t.session_id == session_pk)
            .count() as i32;

        let theater = TheaterData {
            id: tables.next_id(),
            session_id: session_pk,
            theater_number: count + 1,
            custom_name: None,
            occupied_seats: 0,
            max_seats,
            created_at,
        };

        tables.theaters.insert(theater.id, theater.clone());
        Ok(theater)
    }

    async fn rename_theater(&self, theater_id: PrimaryKey, name: Option<String>) -> Result<TheaterData> {
        let mut tables = self.tables.lock();
        let theater = tables
            .theaters
            .get_mut(&theater_id)
            .ok_or_else(|| not_found("theater", "id"))?;

        theater.custom_name = name;
        Ok(theater.clone())
    }

    async fn theater_assignments(&self, theater_id: PrimaryKey) -> Result<Vec<TheaterAssignmentData>> {
        let mut assignments: Vec<_> = self
            .tables
            .lock()
            .assignments
            .values()
            .filter(|a| a.theater_id == theater_id)
            .cloned()
            .collect();

        assignments.sort_by_key(|a| a.seat_number);
        Ok(assignments)
    }

    async fn assignment_for_user(
        &self,
        session_pk: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<Option<TheaterAssignmentData>> {
        Ok(self
            .tables
            .lock()
            .assignments
            .values()
            .find(|a| a.session_id == session_pk && a.user_id == user_id)
            .cloned())
    }

    async fn assign_seat(&self, assignment: SeatAssignment) -> Result<TheaterAssignmentData> {
        let mut tables = self.tables.lock();

        let target = tables
            .theaters
            .get(&assignment.theater_id)
            .filter(|t| t.session_id == assignment.session_id)
            .cloned()
            .ok_or_else(|| not_found("theater", "id"))?;

        let existing = tables
            .assignments
            .values()
            .find(|a| a.session_id == assignment.session_id && a.user_id == assignment.user_id)
            .cloned();

        if let Some(existing) = &existing {
            if existing.theater_id == assignment.theater_id
                && existing.seat_row == assignment.seat_row
                && existing.seat_col == assignment.seat_col
            {
                return Ok(existing.clone());
            }
        }

        let seat_taken = tables.assignments.values().any(|a| {
            a.theater_id == assignment.theater_id
                && a.seat_row == assignment.seat_row
                && a.seat_col == assignment.seat_col
        });

        if seat_taken {
            return Err(conflict("seat", "seat_number", assignment.seat_number));
        }

        let moves_theater = existing
            .as_ref()
            .map_or(true, |e| e.theater_id != assignment.theater_id);

        if moves_theater && target.is_full() {
            return Err(DatabaseError::Full { resource: "theater" });
        }

        let id = match &existing {
            Some(existing) => {
                if moves_theater {
                    tables.adjust_occupancy(existing.theater_id, -1);
                }

                existing.id
            }
            None => tables.next_id(),
        };

        if moves_theater {
            tables.adjust_occupancy(target.id, 1);
        }

        let data = TheaterAssignmentData {
            id,
            user_id: assignment.user_id,
            session_id: assignment.session_id,
            theater_id: assignment.theater_id,
            seat_row: assignment.seat_row,
            seat_col: assignment.seat_col,
            seat_number: assignment.seat_number,
            assigned_at: assignment.assigned_at,
        };

        tables.assignments.insert(id, data.clone());
        Ok(data)
    }

    async fn remove_assignment(
        &self,
        session_pk: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<TheaterAssignmentData> {
        let mut tables = self.tables.lock();
        let existing = tables
            .assignments
            .values()
            .find(|a| a.session_id == session_pk && a.user_id == user_id)
            .cloned()
            .ok_or_else(|| not_found("theater assignment", "user_id"))?;

        tables.assignments.remove(&existing.id);
        tables.adjust_occupancy(existing.theater_id, -1);

        Ok(existing)
    }

    async fn clear_ended_session_assignments(&self) -> Result<u64> {
        let mut tables = self.tables.lock();

        let stranded: Vec<_> = tables
            .assignments
            .values()
            .filter(|a| {
                tables
                    .sessions
                    .get(&a.session_id)
                    .map_or(true, |s| !s.is_active())
            })
            .map(|a| (a.id, a.theater_id))
            .collect();

        for (id, theater_id) in &stranded {
            tables.assignments.remove(id);
            tables.adjust_occupancy(*theater_id, -1);
        }

        Ok(stranded.len() as u64)
    }

    async fn broadcast_permission(
        &self,
        session_pk: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<Option<BroadcastPermissionData>> {
        Ok(self
            .tables
            .lock()
            .permissions
            .values()
            .find(|p| p.session_id == session_pk && p.user_id == user_id)
            .cloned())
    }

    async fn active_broadcast_permissions(&self, session_pk: PrimaryKey) -> Result<Vec<BroadcastPermissionData>> {
        let mut permissions: Vec<_> = self
            .tables
            .lock()
            .permissions
            .values()
            .filter(|p| p.session_id == session_pk && p.is_active)
            .cloned()
            .collect();

        permissions.sort_by_key(|p| (p.granted_at, p.id));
        Ok(permissions)
    }

    async fn pending_broadcast_request(
        &self,
        session_pk: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<Option<BroadcastRequestData>> {
        Ok(self
            .tables
            .lock()
            .requests
            .values()
            .find(|r| {
                r.session_id == session_pk
                    && r.user_id == user_id
                    && r.status == BroadcastRequestStatus::Pending
            })
            .cloned())
    }

    async fn broadcast_request_by_id(&self, request_id: PrimaryKey) -> Result<BroadcastRequestData> {
        self.tables
            .lock()
            .requests
            .get(&request_id)
            .cloned()
            .ok_or_else(|| not_found("broadcast request", "id"))
    }

    async fn broadcast_requests(
        &self,
        session_pk: PrimaryKey,
        status: Option<BroadcastRequestStatus>,
    ) -> Result<Vec<BroadcastRequestData>> {
        Ok(self
            .tables
            .lock()
            .requests
            .values()
            .filter(|r| r.session_id == session_pk)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect())
    }

    async fn create_broadcast_request(&self, new_request: NewBroadcastRequest) -> Result<BroadcastRequestData> {
        let mut tables = self.tables.lock();

        tables.session(new_request.session_id)?;

        let pending = tables.requests.values().any(|r| {
            r.session_id == new_request.session_id
                && r.user_id == new_request.user_id
                && r.status == BroadcastRequestStatus::Pending
        });

        if pending {
            return Err(conflict("broadcast request", "user_id", new_request.user_id));
        }

        let request = BroadcastRequestData {
            id: tables.next_id(),
            session_id: new_request.session_id,
            user_id: new_request.user_id,
            status: BroadcastRequestStatus::Pending,
            message: new_request.message,
            requested_at: new_request.requested_at,
            responded_by: None,
            responded_at: None,
        };

        tables.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn grant_broadcast(&self, grant: BroadcastGrant) -> Result<BroadcastPermissionData> {
        let mut tables = self.tables.lock();

        tables.session(grant.session_id)?;

        let existing = tables
            .permissions
            .values()
            .find(|p| p.session_id == grant.session_id && p.user_id == grant.user_id)
            .map(|p| p.id);

        let id = match existing {
            Some(id) => id,
            None => tables.next_id(),
        };

        let permission = BroadcastPermissionData {
            id,
            session_id: grant.session_id,
            user_id: grant.user_id,
            granted_by: grant.granted_by,
            is_active: true,
            granted_at: grant.granted_at,
            revoked_at: None,
        };

        tables.permissions.insert(id, permission.clone());

        for request in tables.requests.values_mut() {
            if request.session_id == grant.session_id
                && request.user_id == grant.user_id
                && request.status == BroadcastRequestStatus::Pending
            {
                request.status = BroadcastRequestStatus::Approved;
                request.responded_by = Some(grant.granted_by);
                request.responded_at = Some(grant.granted_at);
            }
        }

        Ok(permission)
    }

    async fn revoke_broadcast(
        &self,
        session_pk: PrimaryKey,
        user_id: PrimaryKey,
        revoked_at: DateTime<Utc>,
    ) -> Result<BroadcastPermissionData> {
        let mut tables = self.tables.lock();
        let permission = tables
            .permissions
            .values_mut()
            .find(|p| p.session_id == session_pk && p.user_id == user_id)
            .ok_or_else(|| not_found("broadcast permission", "user_id"))?;

        permission.is_active = false;
        permission.revoked_at = Some(revoked_at);

        Ok(permission.clone())
    }

    async fn respond_broadcast_request(
        &self,
        request_id: PrimaryKey,
        status: BroadcastRequestStatus,
        responded_by: PrimaryKey,
        responded_at: DateTime<Utc>,
    ) -> Result<BroadcastRequestData> {
        let mut tables = self.tables.lock();
        let request = tables
            .requests
            .get_mut(&request_id)
            .ok_or_else(|| not_found("broadcast request", "id"))?;

        request.status = status;
        request.responded_by = Some(responded_by);
        request.responded_at = Some(responded_at);

        Ok(request.clone())
    }

    async fn tv_content_by_id(&self, content_id: PrimaryKey) -> Result<TvContentData> {
        self.tables
            .lock()
            .tv_content
            .get(&content_id)
            .cloned()
            .ok_or_else(|| not_found("tv content", "id"))
    }

    async fn active_tv_content(&self, room_id: PrimaryKey, now: DateTime<Utc>) -> Result<Option<TvContentData>> {
        Ok(self
            .tables
            .lock()
            .tv_content
            .values()
            .filter(|c| c.room_id == room_id && c.is_active(now))
            .max_by_key(|c| (c.starts_at, c.id))
            .cloned())
    }

    async fn create_tv_content(&self, new_content: NewTvContent) -> Result<TvContentData> {
        let mut tables = self.tables.lock();

        tables.room(new_content.room_id)?;

        let content = TvContentData {
            id: tables.next_id(),
            room_id: new_content.room_id,
            session_id: new_content.session_id,
            kind: new_content.kind,
            title: new_content.title,
            body: new_content.body,
            media_url: new_content.media_url,
            created_by: new_content.created_by,
            starts_at: new_content.starts_at,
            ends_at: new_content.ends_at,
            created_at: new_content.created_at,
        };

        tables.tv_content.insert(content.id, content.clone());
        Ok(content)
    }

    async fn delete_tv_content(&self, content_id: PrimaryKey) -> Result<()> {
        self.tables
            .lock()
            .tv_content
            .remove(&content_id)
            .map(|_| ())
            .ok_or_else(|| not_found("tv content", "id"))
    }
}

#[cfg(test)]
mod test {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::*;

    async fn setup(db: &MemoryDatabase, is_temporary: bool) -> (UserData, RoomData) {
        let user = db
            .create_user(NewUser {
                username: format!("host-{}", Uuid::new_v4()),
                email: format!("{}@example.com", Uuid::new_v4()),
                password: "hash".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let room = db
            .create_room(NewRoom {
                name: "Movie night".to_string(),
                description: String::new(),
                host_id: user.id,
                is_public: true,
                is_temporary,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        (user, room)
    }

    fn new_session(room: &RoomData, watch_type: WatchType) -> NewWatchSession {
        NewWatchSession {
            session_id: Uuid::new_v4(),
            room_id: room.id,
            host_id: room.host_id,
            watch_type,
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn room_creation_adds_host_membership() {
        let db = MemoryDatabase::new();
        let (user, room) = setup(&db, false).await;

        let member = db.room_member(room.id, user.id).await.unwrap();
        assert_eq!(member.role, MemberRole::Host);
    }

    #[tokio::test]
    async fn only_one_active_session_per_room() {
        let db = MemoryDatabase::new();
        let (_, room) = setup(&db, false).await;

        let first = db
            .create_watch_session(new_session(&room, WatchType::Video))
            .await
            .unwrap();

        let second = db
            .create_watch_session(new_session(&room, WatchType::Video))
            .await;

        match second {
            Err(DatabaseError::Conflict { value, .. }) => {
                assert_eq!(value, first.session_id.to_string(), "conflict names the active session")
            }
            other => panic!("expected a conflict, got {other:?}"),
        }

        db.end_watch_session(first.id, Utc::now()).await.unwrap();
        db.create_watch_session(new_session(&room, WatchType::Video))
            .await
            .expect("a new session can start after the previous one ended");
    }

    #[tokio::test]
    async fn ending_temporary_session_cascades() {
        let db = MemoryDatabase::new();
        let (user, room) = setup(&db, true).await;
        let session = db
            .create_watch_session(new_session(&room, WatchType::Video))
            .await
            .unwrap();

        db.create_temporary_media(NewTemporaryMedia {
            session_id: session.session_id,
            room_id: room.id,
            uploader_id: user.id,
            file_path: "temp/a.mp4".to_string(),
            mime_type: "video/mp4".to_string(),
            size: 10,
            poster_url: None,
            duration: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        let ended_at = Utc::now();
        let ended = db.end_watch_session(session.id, ended_at).await.unwrap();

        // The room takes the session row with it, so the report is the last record of the end time
        assert_eq!(ended.session.ended_at, Some(ended_at));
        assert!(ended.ended_now);
        assert_eq!(ended.removed_media.len(), 1);
        assert!(ended.room_deleted);
        assert!(db.room_by_id(room.id).await.is_err());
        assert!(db
            .temporary_media_for_session(session.session_id)
            .await
            .unwrap()
            .is_empty());

        let again = db.end_watch_session(session.id, Utc::now()).await;
        assert!(again.is_err(), "the session went away with its room");
    }

    #[tokio::test]
    async fn temporary_media_needs_an_active_session() {
        let db = MemoryDatabase::new();
        let (user, room) = setup(&db, false).await;
        let session = db
            .create_watch_session(new_session(&room, WatchType::Video))
            .await
            .unwrap();

        let media = || NewTemporaryMedia {
            session_id: session.session_id,
            room_id: room.id,
            uploader_id: user.id,
            file_path: "temp/a.mp4".to_string(),
            mime_type: "video/mp4".to_string(),
            size: 10,
            poster_url: None,
            duration: None,
            created_at: Utc::now(),
        };

        db.create_temporary_media(media()).await.unwrap();
        db.end_watch_session(session.id, Utc::now()).await.unwrap();

        let refused = db.create_temporary_media(media()).await;
        assert!(matches!(refused, Err(DatabaseError::NotFound { .. })));
        assert!(db
            .temporary_media_for_session(session.session_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn seat_assignment_keeps_counters_exact() {
        let db = MemoryDatabase::new();
        let (host, room) = setup(&db, false).await;
        let session = db
            .create_watch_session(new_session(&room, WatchType::Cinema3d))
            .await
            .unwrap();

        let first = db.create_next_theater(session.id, 2, Utc::now()).await.unwrap();
        let second = db.create_next_theater(session.id, 2, Utc::now()).await.unwrap();
        assert_eq!(second.theater_number, 2);

        let seat = |theater_id, col| SeatAssignment {
            session_id: session.id,
            user_id: host.id,
            theater_id,
            seat_row: 'A',
            seat_col: col,
            seat_number: col,
            assigned_at: Utc::now(),
        };

        db.assign_seat(seat(first.id, 1)).await.unwrap();
        db.assign_seat(seat(first.id, 1)).await.unwrap();
        assert_eq!(db.theater_by_id(first.id).await.unwrap().occupied_seats, 1, "same seat is a no-op");

        db.assign_seat(seat(first.id, 2)).await.unwrap();
        assert_eq!(db.theater_by_id(first.id).await.unwrap().occupied_seats, 1, "moving within a theater");

        db.assign_seat(seat(second.id, 1)).await.unwrap();
        assert_eq!(db.theater_by_id(first.id).await.unwrap().occupied_seats, 0);
        assert_eq!(db.theater_by_id(second.id).await.unwrap().occupied_seats, 1);

        db.remove_assignment(session.id, host.id).await.unwrap();
        assert_eq!(db.theater_by_id(second.id).await.unwrap().occupied_seats, 0);
    }

    #[tokio::test]
    async fn chat_history_is_latest_oldest_first() {
        let db = MemoryDatabase::new();
        let (user, room) = setup(&db, false).await;

        for i in 0..5 {
            db.create_chat_message(NewChatMessage {
                room_id: room.id,
                session_id: None,
                user_id: user.id,
                message: format!("message {i}"),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }

        let history = db.chat_history(room.id, None, 3).await.unwrap();
        let bodies: Vec<_> = history.iter().map(|m| m.message.as_str()).collect();

        assert_eq!(bodies, ["message 2", "message 3", "message 4"]);
        assert!(db
            .chat_history(room.id, Some(Uuid::new_v4()), 3)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn most_recent_tv_content_wins() {
        let db = MemoryDatabase::new();
        let (user, room) = setup(&db, false).await;
        let now = Utc::now();

        let content = |title: &str, starts_in: i64, ends_in: i64| NewTvContent {
            room_id: room.id,
            session_id: None,
            kind: TvContentKind::Announcement,
            title: title.to_string(),
            body: None,
            media_url: None,
            created_by: user.id,
            starts_at: now + Duration::minutes(starts_in),
            ends_at: now + Duration::minutes(ends_in),
            created_at: now,
        };

        db.create_tv_content(content("old", -30, -10)).await.unwrap();
        db.create_tv_content(content("earlier", -20, 20)).await.unwrap();
        db.create_tv_content(content("latest", -5, 20)).await.unwrap();

        let active = db.active_tv_content(room.id, now).await.unwrap().unwrap();
        assert_eq!(active.title, "latest");
    }
}
