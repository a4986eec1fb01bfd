use chrono::{DateTime, Utc};
use log::info;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    media_token,
    rooms::{require_member, RoomError},
    BroadcastGrant, BroadcastPayload, BroadcastPermissionData, BroadcastRequestData,
    BroadcastRequestStatus, CollabContext, CollabEvent, DatabaseError, MediaJoin, MediaToken,
    MediaTokenError, NewBroadcastRequest, PrimaryKey, RoomData, UserData, WatchSessionData,
};

use super::{active_session, SessionError};

const MAX_REQUEST_MESSAGE_LENGTH: usize = 200;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Only the host can do this")]
    NotHost,
    #[error("The host can always broadcast")]
    IsHost,
    #[error("Broadcast permission is already active")]
    AlreadyActive,
    #[error("A broadcast request is already pending")]
    AlreadyPending,
    #[error("User is not broadcasting")]
    NotActive,
    #[error("Broadcast request is not pending")]
    NotPending,
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    MediaToken(#[from] MediaTokenError),
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// Someone allowed to publish into a session
#[derive(Debug, Clone)]
pub struct Broadcaster {
    pub user_id: PrimaryKey,
    pub is_host: bool,
    pub granted_at: DateTime<Utc>,
}

/// Decides who may publish audio and video into a session.
///
/// Per user the state moves from none to pending on request, to active on grant,
/// and to revoked on revoke. Revoked users may request again.
pub struct BroadcastArbiter {
    context: CollabContext,
}

impl BroadcastArbiter {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    pub async fn request(
        &self,
        session_id: Uuid,
        user: &UserData,
        message: Option<String>,
    ) -> Result<BroadcastRequestData, BroadcastError> {
        let (session, room) = active_session(&self.context, session_id).await?;
        let database = &self.context.database;

        if session.host_id == user.id {
            return Err(BroadcastError::IsHost);
        }

        require_member(database.as_ref(), room.id, user.id).await?;

        let message = message.map(|m| m.trim().to_string()).filter(|m| !m.is_empty());
        if message
            .as_ref()
            .is_some_and(|m| m.chars().count() > MAX_REQUEST_MESSAGE_LENGTH)
        {
            return Err(BroadcastError::InvalidInput("request message is too long"));
        }

        if self.is_active(&session, user.id).await? {
            return Err(BroadcastError::AlreadyActive);
        }

        let request = database
            .create_broadcast_request(NewBroadcastRequest {
                session_id: session.id,
                user_id: user.id,
                message,
                requested_at: self.context.clock.now(),
            })
            .await
            .map_err(|e| match e {
                DatabaseError::Conflict { .. } => BroadcastError::AlreadyPending,
                e => BroadcastError::Db(e),
            })?;

        self.context.emit(CollabEvent::BroadcastRequested {
            room_id: room.id,
            data: BroadcastPayload {
                session_id,
                user_id: user.id,
                request_id: Some(request.id),
                message: request.message.clone(),
            },
        });

        Ok(request)
    }

    /// Lets a user publish, approving their pending request if there is one
    pub async fn grant(
        &self,
        session_id: Uuid,
        host: &UserData,
        user_id: PrimaryKey,
    ) -> Result<BroadcastPermissionData, BroadcastError> {
        let (session, room) = self.hosted_session(session_id, host).await?;
        let database = &self.context.database;

        if user_id == session.host_id {
            return Err(BroadcastError::IsHost);
        }

        require_member(database.as_ref(), room.id, user_id).await?;

        if self.is_active(&session, user_id).await? {
            return Err(BroadcastError::AlreadyActive);
        }

        let pending = database.pending_broadcast_request(session.id, user_id).await?;

        let permission = database
            .grant_broadcast(BroadcastGrant {
                session_id: session.id,
                user_id,
                granted_by: host.id,
                granted_at: self.context.clock.now(),
            })
            .await?;

        info!("{} may now broadcast in session {}", user_id, session_id);

        self.context.emit(CollabEvent::BroadcastGranted {
            room_id: room.id,
            data: BroadcastPayload {
                session_id,
                user_id,
                request_id: pending.map(|r| r.id),
                message: None,
            },
        });

        Ok(permission)
    }

    pub async fn revoke(
        &self,
        session_id: Uuid,
        host: &UserData,
        user_id: PrimaryKey,
    ) -> Result<BroadcastPermissionData, BroadcastError> {
        let (session, room) = self.hosted_session(session_id, host).await?;

        if !self.is_active(&session, user_id).await? {
            return Err(BroadcastError::NotActive);
        }

        let permission = self
            .context
            .database
            .revoke_broadcast(session.id, user_id, self.context.clock.now())
            .await?;

        info!("{} may no longer broadcast in session {}", user_id, session_id);

        self.context.emit(CollabEvent::BroadcastRevoked {
            room_id: room.id,
            data: BroadcastPayload {
                session_id,
                user_id,
                request_id: None,
                message: None,
            },
        });

        Ok(permission)
    }

    pub async fn decline(
        &self,
        session_id: Uuid,
        host: &UserData,
        request_id: PrimaryKey,
    ) -> Result<BroadcastRequestData, BroadcastError> {
        let (session, room) = self.hosted_session(session_id, host).await?;
        let database = &self.context.database;

        let request = database.broadcast_request_by_id(request_id).await?;

        if request.session_id != session.id || request.status != BroadcastRequestStatus::Pending {
            return Err(BroadcastError::NotPending);
        }

        let declined = database
            .respond_broadcast_request(
                request_id,
                BroadcastRequestStatus::Declined,
                host.id,
                self.context.clock.now(),
            )
            .await?;

        self.context.emit(CollabEvent::BroadcastRequestDeclined {
            room_id: room.id,
            data: BroadcastPayload {
                session_id,
                user_id: declined.user_id,
                request_id: Some(declined.id),
                message: None,
            },
        });

        Ok(declined)
    }

    /// Everyone currently allowed to publish, the host first
    pub async fn active(&self, session_id: Uuid) -> Result<Vec<Broadcaster>, BroadcastError> {
        let session = self.context.database.watch_session_by_uuid(session_id).await?;

        let mut broadcasters = vec![Broadcaster {
            user_id: session.host_id,
            is_host: true,
            granted_at: session.started_at,
        }];

        let permissions = self
            .context
            .database
            .active_broadcast_permissions(session.id)
            .await?;

        broadcasters.extend(
            permissions
                .into_iter()
                .filter(|p| p.user_id != session.host_id)
                .map(|p| Broadcaster {
                    user_id: p.user_id,
                    is_host: false,
                    granted_at: p.granted_at,
                }),
        );

        Ok(broadcasters)
    }

    /// Requests of a session, optionally of one status. Only the host sees them.
    pub async fn requests(
        &self,
        session_id: Uuid,
        host: &UserData,
        status: Option<BroadcastRequestStatus>,
    ) -> Result<Vec<BroadcastRequestData>, BroadcastError> {
        let session = self.context.database.watch_session_by_uuid(session_id).await?;

        if session.host_id != host.id {
            return Err(BroadcastError::NotHost);
        }

        Ok(self
            .context
            .database
            .broadcast_requests(session.id, status)
            .await?)
    }

    /// Mints a token for the media service. Only broadcasters may publish with it.
    pub async fn media_token(&self, session_id: Uuid, user: &UserData) -> Result<MediaToken, BroadcastError> {
        let (session, room) = active_session(&self.context, session_id).await?;

        if !room.is_public {
            require_member(self.context.database.as_ref(), room.id, user.id).await?;
        }

        let can_publish = session.host_id == user.id || self.is_active(&session, user.id).await?;
        let room_name = session_id.to_string();

        Ok(media_token(
            self.context.config.livekit.as_ref(),
            MediaJoin {
                room: &room_name,
                identity: user.id.to_string(),
                name: &user.username,
                can_publish,
            },
            self.context.clock.now(),
        )?)
    }

    async fn is_active(&self, session: &WatchSessionData, user_id: PrimaryKey) -> Result<bool, BroadcastError> {
        Ok(self
            .context
            .database
            .broadcast_permission(session.id, user_id)
            .await?
            .is_some_and(|p| p.is_active))
    }

    async fn hosted_session(
        &self,
        session_id: Uuid,
        host: &UserData,
    ) -> Result<(WatchSessionData, RoomData), BroadcastError> {
        let (session, room) = active_session(&self.context, session_id).await?;

        if session.host_id != host.id {
            return Err(BroadcastError::NotHost);
        }

        Ok((session, room))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{test_support::TestCollab, WatchType};

    async fn session_with_guest(test: &TestCollab) -> (UserData, UserData, WatchSessionData) {
        let host = test.user("host").await;
        let guest = test.user("guest").await;
        let room = test.room(&host).await;
        test.member(&room, &guest).await;

        let session = test
            .collab
            .sessions
            .start(room.id, &host, WatchType::Cinema3d)
            .await
            .unwrap();

        (host, guest, session)
    }

    #[tokio::test]
    async fn request_grant_revoke_cycle() {
        let test = TestCollab::new();
        let (host, guest, session) = session_with_guest(&test).await;
        let arbiter = &test.collab.broadcast;
        let id = session.session_id;

        let request = arbiter
            .request(id, &guest, Some("let me share".to_string()))
            .await
            .unwrap();
        assert_eq!(request.status, BroadcastRequestStatus::Pending);

        let twice = arbiter.request(id, &guest, None).await;
        assert!(matches!(twice, Err(BroadcastError::AlreadyPending)));

        arbiter.grant(id, &host, guest.id).await.unwrap();

        let again = arbiter.grant(id, &host, guest.id).await;
        assert!(matches!(again, Err(BroadcastError::AlreadyActive)));
        assert_eq!(
            again.unwrap_err().to_string(),
            "Broadcast permission is already active"
        );

        let requests = arbiter.requests(id, &host, None).await.unwrap();
        assert_eq!(requests[0].status, BroadcastRequestStatus::Approved);
        assert_eq!(requests[0].responded_by, Some(host.id));

        let active = arbiter.active(id).await.unwrap();
        let users: Vec<_> = active.iter().map(|b| (b.user_id, b.is_host)).collect();
        assert_eq!(users, [(host.id, true), (guest.id, false)], "host is listed first");

        arbiter.revoke(id, &host, guest.id).await.unwrap();
        let not_active = arbiter.revoke(id, &host, guest.id).await;
        assert!(matches!(not_active, Err(BroadcastError::NotActive)));

        arbiter
            .request(id, &guest, None)
            .await
            .expect("revoked users may ask again");
    }

    #[tokio::test]
    async fn host_only_decisions() {
        let test = TestCollab::new();
        let (host, guest, session) = session_with_guest(&test).await;
        let arbiter = &test.collab.broadcast;
        let id = session.session_id;

        let host_request = arbiter.request(id, &host, None).await;
        assert!(matches!(host_request, Err(BroadcastError::IsHost)));

        let request = arbiter.request(id, &guest, None).await.unwrap();

        let not_host = arbiter.grant(id, &guest, guest.id).await;
        assert!(matches!(not_host, Err(BroadcastError::NotHost)));

        let declined = arbiter.decline(id, &host, request.id).await.unwrap();
        assert_eq!(declined.status, BroadcastRequestStatus::Declined);

        let twice = arbiter.decline(id, &host, request.id).await;
        assert!(matches!(twice, Err(BroadcastError::NotPending)));
    }

    #[tokio::test]
    async fn media_tokens_need_configuration() {
        let test = TestCollab::new();
        let (_, guest, session) = session_with_guest(&test).await;

        let result = test.collab.broadcast.media_token(session.session_id, &guest).await;
        assert!(matches!(
            result,
            Err(BroadcastError::MediaToken(MediaTokenError::NotConfigured))
        ));
    }
}
