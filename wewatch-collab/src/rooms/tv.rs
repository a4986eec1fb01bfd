use chrono::Duration;
use uuid::Uuid;

use crate::{
    CollabContext, CollabEvent, DatabaseError, NewTvContent, PrimaryKey, TvContentData,
    TvContentKind, TvContentPayload, TvContentRemovedPayload, UserData,
};

use super::{require_host, RoomError};

/// The longest a piece of content may stay on the TV
pub const MAX_TV_DURATION_IN_HOURS: i64 = 24;

#[derive(Debug)]
pub struct NewPlainTvContent {
    pub kind: TvContentKind,
    pub title: String,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub session_id: Option<Uuid>,
    /// How long the content stays up, starting now
    pub duration: Duration,
}

/// The in-room TV, showing announcements and media picked by the host
pub struct TvManager {
    context: CollabContext,
}

impl TvManager {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    pub async fn create(
        &self,
        room_id: PrimaryKey,
        user: &UserData,
        content: NewPlainTvContent,
    ) -> Result<TvContentData, RoomError> {
        let room = self.context.database.room_by_id(room_id).await?;
        require_host(&room, user.id)?;

        let title = content.title.trim().to_string();

        if title.is_empty() {
            return Err(RoomError::InvalidInput("title cannot be empty"));
        }

        if content.duration <= Duration::zero()
            || content.duration > Duration::hours(MAX_TV_DURATION_IN_HOURS)
        {
            return Err(RoomError::InvalidInput("duration must be between zero and a day"));
        }

        if content.kind == TvContentKind::Media && content.media_url.is_none() {
            return Err(RoomError::InvalidInput("media content needs a media url"));
        }

        let now = self.context.clock.now();
        let created = self
            .context
            .database
            .create_tv_content(NewTvContent {
                room_id,
                session_id: content.session_id,
                kind: content.kind,
                title,
                body: content.body,
                media_url: content.media_url,
                created_by: user.id,
                starts_at: now,
                ends_at: now + content.duration,
                created_at: now,
            })
            .await?;

        self.context.emit(CollabEvent::RoomTvContentCreated {
            room_id,
            data: TvContentPayload::from(&created),
        });

        Ok(created)
    }

    /// What the TV currently shows, if anything
    pub async fn active(&self, room_id: PrimaryKey) -> Result<Option<TvContentData>, RoomError> {
        self.context.database.room_by_id(room_id).await?;

        Ok(self
            .context
            .database
            .active_tv_content(room_id, self.context.clock.now())
            .await?)
    }

    pub async fn remove(
        &self,
        room_id: PrimaryKey,
        content_id: PrimaryKey,
        user: &UserData,
    ) -> Result<(), RoomError> {
        let room = self.context.database.room_by_id(room_id).await?;
        require_host(&room, user.id)?;

        let content = self.context.database.tv_content_by_id(content_id).await?;
        if content.room_id != room_id {
            return Err(RoomError::Db(DatabaseError::NotFound {
                resource: "tv content",
                identifier: "id",
            }));
        }

        self.context.database.delete_tv_content(content_id).await?;

        self.context.emit(CollabEvent::RoomTvContentRemoved {
            room_id,
            data: TvContentRemovedPayload { content_id },
        });

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_support::TestCollab;

    fn announcement(title: &str, minutes: i64) -> NewPlainTvContent {
        NewPlainTvContent {
            kind: TvContentKind::Announcement,
            title: title.to_string(),
            body: None,
            media_url: None,
            session_id: None,
            duration: Duration::minutes(minutes),
        }
    }

    #[tokio::test]
    async fn latest_active_content_is_shown() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let room = test.room(&host).await;
        let tv = &test.collab.tv;

        tv.create(room.id, &host, announcement("Intermission", 30)).await.unwrap();
        test.clock.advance(Duration::minutes(1));
        tv.create(room.id, &host, announcement("Trailer", 5)).await.unwrap();

        let shown = tv.active(room.id).await.unwrap().unwrap();
        assert_eq!(shown.title, "Trailer");

        test.clock.advance(Duration::minutes(10));
        let shown = tv.active(room.id).await.unwrap().unwrap();
        assert_eq!(shown.title, "Intermission", "the trailer ran out");

        test.clock.advance(Duration::hours(1));
        assert!(tv.active(room.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_the_host_controls_the_tv() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let guest = test.user("guest").await;
        let room = test.room(&host).await;

        let denied = test
            .collab
            .tv
            .create(room.id, &guest, announcement("Hi", 5))
            .await;
        assert!(matches!(denied, Err(RoomError::NotHost)));

        let empty = test
            .collab
            .tv
            .create(room.id, &host, announcement("   ", 5))
            .await;
        assert!(matches!(empty, Err(RoomError::InvalidInput(_))));

        let content = test
            .collab
            .tv
            .create(room.id, &host, announcement("Hi", 5))
            .await
            .unwrap();

        test.collab.tv.remove(room.id, content.id, &host).await.unwrap();
        assert!(test.collab.tv.active(room.id).await.unwrap().is_none());
    }
}
