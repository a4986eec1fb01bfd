use log::{error, info};
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

use crate::{sessions::finish_session, CollabContext};

/// Ends abandoned sessions in temporary rooms, along with the rooms and their uploads
pub struct Reaper {
    context: CollabContext,
}

/// What a single pass of the reaper did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapReport {
    pub sessions_ended: usize,
    pub rooms_deleted: usize,
    pub media_removed: usize,
    pub assignments_cleared: u64,
    pub failures: usize,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Reaper {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Runs a single pass. Failures are logged and counted, never returned.
    pub async fn reap(&self) -> ReapReport {
        let mut report = ReapReport::default();
        let now = self.context.clock.now();
        let cutoff = now - self.context.config.session_ttl;

        let stale = match self.context.database.stale_temporary_sessions(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                error!("Could not look up stale sessions: {}", e);
                report.failures += 1;
                vec![]
            }
        };

        for session in stale {
            match finish_session(&self.context, &session, now).await {
                Ok(ended) if ended.ended_now => {
                    report.sessions_ended += 1;
                    report.media_removed += ended.removed_media.len();

                    if ended.room_deleted {
                        report.rooms_deleted += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Could not end stale session {}: {}", session.session_id, e);
                    report.failures += 1;
                }
            }
        }

        match self.context.database.clear_ended_session_assignments().await {
            Ok(cleared) => report.assignments_cleared = cleared,
            Err(e) => {
                error!("Could not clear stranded seat assignments: {}", e);
                report.failures += 1;
            }
        }

        if !report.is_empty() {
            info!("Reaped {:?}", report);
        }

        report
    }

    /// Runs the reaper every configured interval until the runtime shuts down
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.context.config.reaper_interval;
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!("Reaping temporary sessions every {}s", period.as_secs());

            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                self.reap().await;
            }
        })
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;
    use crate::{sessions::MediaDetails, test_support::TestCollab, WatchType};

    #[tokio::test]
    async fn reaps_abandoned_instant_watches_after_the_ttl() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let reaper = test.collab.reaper();

        let (room, session) = test
            .collab
            .sessions
            .instant_watch(&host, None, WatchType::Video)
            .await
            .unwrap();

        let media = test
            .collab
            .media
            .upload_temporary(
                session.session_id,
                &host,
                test.upload("movie.mp4", b"frames").await,
                MediaDetails::default(),
            )
            .await
            .unwrap();

        test.clock.advance(Duration::minutes(29));
        assert!(reaper.reap().await.is_empty(), "nothing is stale yet");

        test.clock.advance(Duration::minutes(2));
        let report = reaper.reap().await;

        assert_eq!(report.sessions_ended, 1);
        assert_eq!(report.rooms_deleted, 1);
        assert_eq!(report.media_removed, 1);
        assert!(test.context().database.room_by_id(room.id).await.is_err());
        assert!(!test.upload_dir.path().join(&media.file_path).exists());

        assert!(
            reaper.reap().await.is_empty(),
            "a second pass over the same clock changes nothing"
        );
    }

    #[tokio::test]
    async fn regular_rooms_are_never_reaped() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let room = test.room(&host).await;

        test.collab
            .sessions
            .start(room.id, &host, WatchType::Video)
            .await
            .unwrap();

        test.clock.advance(Duration::hours(5));
        assert!(test.collab.reaper().reap().await.is_empty());

        let active = test.collab.sessions.active(room.id).await.unwrap();
        assert!(active.is_some(), "the session keeps running");
    }

    #[tokio::test]
    async fn clears_seats_of_ended_sessions() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let room = test.room(&host).await;

        let session = test
            .collab
            .sessions
            .start(room.id, &host, WatchType::Cinema3d)
            .await
            .unwrap();
        let seat = test.collab.theaters.join(session.session_id, &host).await.unwrap();

        test.collab.sessions.end(session.session_id, &host).await.unwrap();

        let report = test.collab.reaper().reap().await;
        assert_eq!(report.assignments_cleared, 1);

        let theater = test.context().database.theater_by_id(seat.theater_id).await.unwrap();
        assert_eq!(theater.occupied_seats, 0);
    }
}
