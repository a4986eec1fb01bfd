use chrono::Duration;
use log::info;

use crate::{
    random_string, CollabContext, CollabEvent, DatabaseError, InviteStatus, MemberPayload,
    NewRoomInvite, PrimaryKey, RoomData, RoomInviteData, RoomMemberData, UserData,
};

use super::{require_member, RoomError};

const INVITE_TOKEN_LENGTH: usize = 32;

#[derive(Debug, Default)]
pub struct NewPlainInvite {
    /// Restricts the invite to a single user
    pub invitee_id: Option<PrimaryKey>,
    pub expires_in: Option<Duration>,
}

pub struct InviteManager {
    context: CollabContext,
}

impl InviteManager {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    pub async fn create(
        &self,
        room_id: PrimaryKey,
        inviter: &UserData,
        new_invite: NewPlainInvite,
    ) -> Result<RoomInviteData, RoomError> {
        require_member(self.context.database.as_ref(), room_id, inviter.id).await?;

        if new_invite.expires_in.is_some_and(|d| d <= Duration::zero()) {
            return Err(RoomError::InvalidInput("expiry must be in the future"));
        }

        if let Some(invitee_id) = new_invite.invitee_id {
            self.context.database.user_by_id(invitee_id).await?;
        }

        let now = self.context.clock.now();
        let invite = self
            .context
            .database
            .create_room_invite(NewRoomInvite {
                token: random_string(INVITE_TOKEN_LENGTH),
                room_id,
                inviter_id: inviter.id,
                invitee_id: new_invite.invitee_id,
                expires_at: new_invite.expires_in.map(|d| now + d),
                created_at: now,
            })
            .await?;

        info!("{} created invite {} for room {}", inviter.username, invite.id, room_id);

        Ok(invite)
    }

    pub async fn list(&self, room_id: PrimaryKey, user: &UserData) -> Result<Vec<RoomInviteData>, RoomError> {
        require_member(self.context.database.as_ref(), room_id, user.id).await?;

        Ok(self.context.database.room_invites(room_id).await?)
    }

    /// Looks an invite up by its token, along with the room it leads to
    pub async fn invite(&self, token: &str) -> Result<(RoomInviteData, RoomData), RoomError> {
        let invite = self.context.database.room_invite_by_token(token).await?;
        let room = self.context.database.room_by_id(invite.room_id).await?;

        Ok((invite, room))
    }

    /// Accepts an invite, making `user` a member of its room
    pub async fn accept(&self, token: &str, user: &UserData) -> Result<RoomMemberData, RoomError> {
        let database = &self.context.database;
        let invite = database.room_invite_by_token(token).await?;

        match database.room_member(invite.room_id, user.id).await {
            Ok(_) => return Err(RoomError::AlreadyMember),
            Err(DatabaseError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        self.check_valid(&invite).await?;

        if invite.invitee_id.is_some_and(|id| id != user.id) {
            return Err(RoomError::NotInvitee);
        }

        // Open invites stay usable by others, personal ones are spent
        let member = database
            .accept_room_invite(
                invite.id,
                user.id,
                invite.invitee_id.is_some(),
                self.context.clock.now(),
            )
            .await
            .map_err(|e| match e {
                DatabaseError::Conflict { .. } => RoomError::AlreadyMember,
                e => RoomError::Db(e),
            })?;

        self.context.emit(CollabEvent::MemberJoined {
            room_id: invite.room_id,
            data: MemberPayload::from(&member),
        });

        Ok(member)
    }

    pub async fn decline(&self, token: &str, user: &UserData) -> Result<RoomInviteData, RoomError> {
        let invite = self.context.database.room_invite_by_token(token).await?;

        if invite.invitee_id != Some(user.id) {
            return Err(RoomError::NotInvitee);
        }

        self.check_valid(&invite).await?;

        Ok(self
            .context
            .database
            .set_invite_status(invite.id, InviteStatus::Declined)
            .await?)
    }

    /// Deletes an invite. The inviter and the room host may do so.
    pub async fn revoke(&self, token: &str, user: &UserData) -> Result<(), RoomError> {
        let invite = self.context.database.room_invite_by_token(token).await?;
        let room = self.context.database.room_by_id(invite.room_id).await?;

        if invite.inviter_id != user.id && room.host_id != user.id {
            return Err(RoomError::NotHost);
        }

        self.context.database.delete_room_invite(invite.id).await?;

        Ok(())
    }

    /// Fails for spent invites, marking pending ones that ran out as expired
    async fn check_valid(&self, invite: &RoomInviteData) -> Result<(), RoomError> {
        if invite.is_valid(self.context.clock.now()) {
            return Ok(());
        }

        if invite.status == InviteStatus::Pending {
            self.context
                .database
                .set_invite_status(invite.id, InviteStatus::Expired)
                .await?;
        }

        Err(RoomError::InvalidInvite)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_support::TestCollab;

    #[tokio::test]
    async fn accepting_twice_reports_membership() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let guest = test.user("guest").await;
        let room = test.room(&host).await;

        let invite = test
            .collab
            .invites
            .create(room.id, &host, NewPlainInvite::default())
            .await
            .unwrap();

        let member = test.collab.invites.accept(&invite.token, &guest).await.unwrap();
        assert_eq!(member.user.id, guest.id);

        let again = test.collab.invites.accept(&invite.token, &guest).await;
        assert!(matches!(again, Err(RoomError::AlreadyMember)));
    }

    #[tokio::test]
    async fn personal_invites_are_spent_and_expire() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let guest = test.user("guest").await;
        let stranger = test.user("stranger").await;
        let room = test.room(&host).await;

        let personal = test
            .collab
            .invites
            .create(
                room.id,
                &host,
                NewPlainInvite {
                    invitee_id: Some(guest.id),
                    expires_in: Some(Duration::hours(1)),
                },
            )
            .await
            .unwrap();

        let wrong_user = test.collab.invites.accept(&personal.token, &stranger).await;
        assert!(matches!(wrong_user, Err(RoomError::NotInvitee)));

        test.clock.advance(Duration::hours(2));

        let expired = test.collab.invites.accept(&personal.token, &guest).await;
        assert!(matches!(expired, Err(RoomError::InvalidInvite)));

        let (stored, _) = test.collab.invites.invite(&personal.token).await.unwrap();
        assert_eq!(stored.status, InviteStatus::Expired);
    }

    #[tokio::test]
    async fn only_members_invite() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let outsider = test.user("outsider").await;
        let room = test.room(&host).await;

        let denied = test
            .collab
            .invites
            .create(room.id, &outsider, NewPlainInvite::default())
            .await;
        assert!(matches!(denied, Err(RoomError::NotMember)));

        let invite = test
            .collab
            .invites
            .create(room.id, &host, NewPlainInvite::default())
            .await
            .unwrap();

        let not_allowed = test.collab.invites.revoke(&invite.token, &outsider).await;
        assert!(matches!(not_allowed, Err(RoomError::NotHost)));

        test.collab.invites.revoke(&invite.token, &host).await.unwrap();
        assert!(test.collab.invites.invite(&invite.token).await.is_err());
    }
}
