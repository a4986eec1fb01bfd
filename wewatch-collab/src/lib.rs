mod auth;
mod config;
mod db;
mod events;
mod files;
mod hub;
mod livekit;
mod reaper;
pub mod rooms;
pub mod sessions;
mod util;

use std::sync::Arc;

use log::{error, warn};

pub use auth::*;
pub use config::*;
pub use db::*;
pub use events::*;
pub use files::*;
pub use hub::*;
pub use livekit::*;
pub use reaper::*;
pub use util::*;

use rooms::{ChatManager, InviteManager, RoomManager, TvManager};
use sessions::{BroadcastArbiter, MediaManager, SessionManager, TheaterAllocator};

/// The wewatch collab system, facilitating rooms, watch sessions, theaters, and more.
pub struct Collab {
    context: CollabContext,

    pub auth: Auth,
    pub rooms: RoomManager,
    pub invites: InviteManager,
    pub chat: ChatManager,
    pub tv: TvManager,
    pub sessions: SessionManager,
    pub media: MediaManager,
    pub theaters: TheaterAllocator,
    pub broadcast: BroadcastArbiter,
}

/// A type passed to various components of the collab system, to access state and emit events.
#[derive(Clone)]
pub struct CollabContext {
    pub config: Arc<Config>,
    pub database: ArcedDatabase,
    pub files: Arc<dyn FileStore>,
    pub hub: Arc<Hub>,
    pub clock: Arc<dyn Clock>,
}

impl Collab {
    pub fn new(
        config: Config,
        database: ArcedDatabase,
        files: Arc<dyn FileStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let context = CollabContext {
            config: Arc::new(config),
            database,
            files,
            hub: Arc::new(Hub::new()),
            clock,
        };

        Self {
            auth: Auth::new(&context),
            rooms: RoomManager::new(&context),
            invites: InviteManager::new(&context),
            chat: ChatManager::new(&context),
            tv: TvManager::new(&context),
            sessions: SessionManager::new(&context),
            media: MediaManager::new(&context),
            theaters: TheaterAllocator::new(&context),
            broadcast: BroadcastArbiter::new(&context),
            context,
        }
    }

    pub fn context(&self) -> &CollabContext {
        &self.context
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.context.hub
    }

    /// Creates the reaper for temporary sessions. It does nothing until spawned.
    pub fn reaper(&self) -> Reaper {
        Reaper::new(&self.context)
    }
}

impl CollabContext {
    /// Fans an event out to everyone connected to its room
    pub fn emit(&self, event: CollabEvent) -> BroadcastReport {
        self.emit_except(event, None)
    }

    /// Fans an event out to everyone connected to its room except one connection.
    /// Clients evicted along the way are announced as disconnected.
    pub fn emit_except(
        &self,
        event: CollabEvent,
        exclude: Option<rooms::RoomConnectionId>,
    ) -> BroadcastReport {
        let frame = match serde_json::to_string(&event) {
            Ok(json) => Frame::from(json),
            Err(e) => {
                error!("Could not serialize {:?}: {}", event, e);
                return BroadcastReport::default();
            }
        };

        let room_id = event.room_id();
        let report = self.hub.broadcast(room_id, frame, exclude);

        for client in &report.evicted {
            self.emit(CollabEvent::UserDisconnected {
                room_id,
                data: PresencePayload {
                    user_id: client.user_id,
                    username: client.username.clone(),
                    connections: self.hub.connection_count(room_id),
                },
            });
        }

        report
    }

    /// Deletes an uploaded file, logging instead of failing
    pub async fn remove_file(&self, path: &str) {
        if let Err(e) = self.files.delete(path).await {
            warn!("Could not remove uploaded file {}: {}", path, e);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{path::Path, sync::Arc};

    use chrono::Utc;

    use crate::{sessions::UploadedFile, *};

    /// A collab instance backed entirely by memory, with a manual clock
    pub struct TestCollab {
        pub collab: Collab,
        pub clock: Arc<ManualClock>,
        pub upload_dir: tempfile::TempDir,
    }

    impl TestCollab {
        pub fn new() -> Self {
            Self::with_files(|root, _| Arc::new(LocalFileStore::new(root)))
        }

        /// Like [TestCollab::new], with a file store built from the upload dir and the database
        pub fn with_files<F>(files: F) -> Self
        where
            F: FnOnce(&Path, ArcedDatabase) -> Arc<dyn FileStore>,
        {
            let upload_dir = tempfile::tempdir().expect("temp dir is created");
            let clock = Arc::new(ManualClock::new(Utc::now()));
            let database: ArcedDatabase = Arc::new(MemoryDatabase::new());

            let mut config = Config::with_secret("test-secret");
            config.upload_dir = upload_dir.path().to_path_buf();

            let collab = Collab::new(
                config,
                database.clone(),
                files(upload_dir.path(), database),
                clock.clone(),
            );

            Self {
                collab,
                clock,
                upload_dir,
            }
        }

        pub fn context(&self) -> &CollabContext {
            self.collab.context()
        }

        /// Inserts a user directly, skipping password hashing
        pub async fn user(&self, name: &str) -> UserData {
            self.context()
                .database
                .create_user(NewUser {
                    username: name.to_string(),
                    email: format!("{name}@example.com"),
                    password: "not-a-hash".to_string(),
                    created_at: self.clock.now(),
                })
                .await
                .expect("user is created")
        }

        pub async fn room(&self, host: &UserData) -> RoomData {
            self.collab
                .rooms
                .create_room(host, "Movie night".to_string(), String::new(), true)
                .await
                .expect("room is created")
        }

        /// Adds `user` to the room as a plain member
        pub async fn member(&self, room: &RoomData, user: &UserData) {
            self.context()
                .database
                .create_room_member(NewRoomMember {
                    user_id: user.id,
                    room_id: room.id,
                    role: MemberRole::Member,
                    joined_at: self.clock.now(),
                })
                .await
                .expect("member is added");
        }

        /// Spools `data` the way an incoming upload would be
        pub async fn upload(&self, file_name: &str, data: &[u8]) -> UploadedFile {
            let spool = self.upload_dir.path().join(SPOOL_DIR);
            let mut writer = SpooledFile::create(&spool).await.expect("spool is created");
            writer.write(data).await.expect("chunk is spooled");

            UploadedFile {
                file_name: file_name.to_string(),
                contents: writer.finish().await.expect("spool is flushed"),
            }
        }
    }
}
