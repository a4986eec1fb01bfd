use log::{info, warn};
use uuid::Uuid;

use crate::{
    mime_for_path, random_string,
    rooms::require_member,
    sanitize_file_name, CollabContext, CollabEvent, DatabaseError, MediaItemData, MediaPayload,
    MediaRemovedPayload, NewMediaItem, NewTemporaryMedia, PrimaryKey, SpooledFile,
    TemporaryMediaData, UserData, MAX_UPLOAD_SIZE,
};

use super::{active_session, SessionError};

const FILE_PREFIX_LENGTH: usize = 8;

/// A file received from a client
#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub contents: SpooledFile,
}

/// Optional details a client may attach to a temporary upload
#[derive(Debug, Default)]
pub struct MediaDetails {
    pub poster_url: Option<String>,
    pub duration: Option<f64>,
}

/// Uploads of session and room media
pub struct MediaManager {
    context: CollabContext,
}

impl UploadedFile {
    /// Checks the file and returns its content type and a unique name to store it under
    fn prepare(&self) -> Result<(&'static str, String), SessionError> {
        if self.contents.size() == 0 {
            return Err(SessionError::InvalidInput("file is empty"));
        }

        if self.contents.size() > MAX_UPLOAD_SIZE as u64 {
            return Err(SessionError::InvalidInput("file is too large"));
        }

        let name = sanitize_file_name(&self.file_name);
        let mime = mime_for_path(&name)
            .ok_or(SessionError::InvalidInput("only mp4, avi, mov, mkv and webm files are allowed"))?;

        Ok((mime, format!("{}-{}", random_string(FILE_PREFIX_LENGTH), name)))
    }
}

impl MediaManager {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Stores a file that lives only as long as the session does
    pub async fn upload_temporary(
        &self,
        session_id: Uuid,
        user: &UserData,
        file: UploadedFile,
        details: MediaDetails,
    ) -> Result<TemporaryMediaData, SessionError> {
        let (session, room) = active_session(&self.context, session_id).await?;
        require_member(self.context.database.as_ref(), room.id, user.id).await?;

        let (mime_type, name) = file.prepare()?;
        let file_path = format!("temp/{}/{}", session_id, name);

        self.context.files.save(&file_path, &file.contents).await?;

        let created = self
            .context
            .database
            .create_temporary_media(NewTemporaryMedia {
                session_id: session.session_id,
                room_id: room.id,
                uploader_id: user.id,
                file_path: file_path.clone(),
                mime_type: mime_type.to_string(),
                size: file.contents.size() as i64,
                poster_url: details.poster_url,
                duration: details.duration,
                created_at: self.context.clock.now(),
            })
            .await;

        // The session may have ended while the file was being stored
        let media = match created {
            Ok(media) => media,
            Err(e) => {
                self.context.remove_file(&file_path).await;

                return Err(match e {
                    DatabaseError::NotFound { .. } => SessionError::Ended,
                    e => e.into(),
                });
            }
        };

        info!(
            "{} uploaded {} ({} bytes) to session {}",
            user.username, media.file_path, media.size, session_id
        );

        self.context.emit(CollabEvent::TemporaryMediaItemAdded {
            room_id: room.id,
            data: MediaPayload::from(&media),
        });

        Ok(media)
    }

    pub async fn temporary(&self, session_id: Uuid) -> Result<Vec<TemporaryMediaData>, SessionError> {
        self.context.database.watch_session_by_uuid(session_id).await?;

        Ok(self
            .context
            .database
            .temporary_media_for_session(session_id)
            .await?)
    }

    /// Deletes a temporary item. Its uploader and the session host may do so.
    pub async fn delete_temporary(
        &self,
        session_id: Uuid,
        item_id: PrimaryKey,
        user: &UserData,
    ) -> Result<(), SessionError> {
        let session = self.context.database.watch_session_by_uuid(session_id).await?;
        let media = self.context.database.temporary_media_by_id(item_id).await?;

        if media.session_id != session_id {
            return Err(SessionError::InvalidInput("item belongs to another session"));
        }

        if media.uploader_id != user.id && session.host_id != user.id {
            return Err(SessionError::NotHost);
        }

        self.context.database.delete_temporary_media(item_id).await?;

        self.context.emit(CollabEvent::TemporaryMediaItemDeleted {
            room_id: media.room_id,
            data: MediaRemovedPayload {
                id: media.id,
                session_id,
            },
        });

        self.context.remove_file(&media.file_path).await;

        Ok(())
    }

    /// Stores a file that belongs to the room for good
    pub async fn upload_permanent(
        &self,
        room_id: PrimaryKey,
        user: &UserData,
        title: Option<String>,
        file: UploadedFile,
    ) -> Result<MediaItemData, SessionError> {
        require_member(self.context.database.as_ref(), room_id, user.id).await?;

        let (mime_type, name) = file.prepare()?;
        let file_path = format!("media/{}/{}", room_id, name);

        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| sanitize_file_name(&file.file_name));

        self.context.files.save(&file_path, &file.contents).await?;

        let created = self
            .context
            .database
            .create_media_item(NewMediaItem {
                room_id,
                uploader_id: user.id,
                title,
                file_path: file_path.clone(),
                mime_type: mime_type.to_string(),
                size: file.contents.size() as i64,
                created_at: self.context.clock.now(),
            })
            .await;

        match created {
            Ok(item) => Ok(item),
            Err(e) => {
                warn!("Could not store media item for room {}: {}", room_id, e);
                self.context.remove_file(&file_path).await;
                Err(e.into())
            }
        }
    }

    pub async fn room_media(&self, room_id: PrimaryKey, user: &UserData) -> Result<Vec<MediaItemData>, SessionError> {
        let room = self.context.database.room_by_id(room_id).await?;

        if !room.is_public {
            require_member(self.context.database.as_ref(), room_id, user.id).await?;
        }

        Ok(self.context.database.media_items_for_room(room_id).await?)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        test_support::TestCollab, ArcedDatabase, FileError, FileStore, LocalFileStore, WatchType,
    };

    /// Stores files normally, then ends the session the file was uploaded to
    struct EndsSessionOnSave {
        inner: LocalFileStore,
        database: ArcedDatabase,
    }

    #[async_trait]
    impl FileStore for EndsSessionOnSave {
        async fn save(&self, relative: &str, upload: &SpooledFile) -> Result<(), FileError> {
            self.inner.save(relative, upload).await?;

            let session_id: Uuid = relative.split('/').nth(1).unwrap().parse().unwrap();
            let session = self.database.watch_session_by_uuid(session_id).await.unwrap();
            self.database
                .end_watch_session(session.id, chrono::Utc::now())
                .await
                .unwrap();

            Ok(())
        }

        async fn delete(&self, relative: &str) -> Result<(), FileError> {
            self.inner.delete(relative).await
        }
    }

    async fn movie(test: &TestCollab, name: &str) -> UploadedFile {
        test.upload(name, b"not really a movie").await
    }

    #[tokio::test]
    async fn uploads_are_stored_under_the_session() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let room = test.room(&host).await;
        let session = test
            .collab
            .sessions
            .start(room.id, &host, WatchType::Video)
            .await
            .unwrap();

        let media = test
            .collab
            .media
            .upload_temporary(
                session.session_id,
                &host,
                movie(&test, "Night of the Living Dead.MP4").await,
                MediaDetails::default(),
            )
            .await
            .unwrap();

        assert!(media.file_path.starts_with(&format!("temp/{}/", session.session_id)));
        assert!(media.file_path.ends_with("Night_of_the_Living_Dead.MP4"));
        assert_eq!(media.mime_type, "video/mp4");
        assert!(test.upload_dir.path().join(&media.file_path).exists());

        let refused = test
            .collab
            .media
            .upload_temporary(
                session.session_id,
                &host,
                movie(&test, "script.sh").await,
                MediaDetails::default(),
            )
            .await;
        assert!(matches!(refused, Err(SessionError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn upload_racing_the_session_end_leaves_nothing_behind() {
        let test = TestCollab::with_files(|root, database| {
            Arc::new(EndsSessionOnSave {
                inner: LocalFileStore::new(root),
                database,
            })
        });
        let host = test.user("host").await;
        let room = test.room(&host).await;
        let session = test
            .collab
            .sessions
            .start(room.id, &host, WatchType::Video)
            .await
            .unwrap();

        let result = test
            .collab
            .media
            .upload_temporary(
                session.session_id,
                &host,
                movie(&test, "late.mp4").await,
                MediaDetails::default(),
            )
            .await;

        assert!(matches!(result, Err(SessionError::Ended)));
        assert!(test
            .collab
            .media
            .temporary(session.session_id)
            .await
            .unwrap()
            .is_empty());

        let session_dir = test.upload_dir.path().join(format!("temp/{}", session.session_id));
        assert!(!session_dir.exists(), "the stored file was removed again");
    }

    #[tokio::test]
    async fn ending_the_session_removes_its_files() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let room = test.room(&host).await;
        let session = test
            .collab
            .sessions
            .start(room.id, &host, WatchType::Video)
            .await
            .unwrap();

        let media = test
            .collab
            .media
            .upload_temporary(
                session.session_id,
                &host,
                movie(&test, "a.webm").await,
                MediaDetails::default(),
            )
            .await
            .unwrap();

        let ended = test.collab.sessions.end(session.session_id, &host).await.unwrap();

        assert_eq!(ended.removed_media.len(), 1);
        assert!(!test.upload_dir.path().join(&media.file_path).exists());
        assert!(test
            .collab
            .media
            .temporary(session.session_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn only_uploader_or_host_deletes() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let guest = test.user("guest").await;
        let other = test.user("other").await;
        let room = test.room(&host).await;
        test.member(&room, &guest).await;
        test.member(&room, &other).await;

        let session = test
            .collab
            .sessions
            .start(room.id, &host, WatchType::Video)
            .await
            .unwrap();

        let media = test
            .collab
            .media
            .upload_temporary(
                session.session_id,
                &guest,
                movie(&test, "clip.mov").await,
                MediaDetails::default(),
            )
            .await
            .unwrap();

        let denied = test
            .collab
            .media
            .delete_temporary(session.session_id, media.id, &other)
            .await;
        assert!(matches!(denied, Err(SessionError::NotHost)));

        test.collab
            .media
            .delete_temporary(session.session_id, media.id, &host)
            .await
            .unwrap();
        assert!(!test.upload_dir.path().join(&media.file_path).exists());
    }
}
