use std::fmt;

use log::{debug, info};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    rooms::{require_member, RoomError},
    CollabContext, CollabEvent, DatabaseError, PrimaryKey, SeatAssignment, SeatPayload,
    TheaterAssignmentData, TheaterData, TheaterPayload, UserData, WatchSessionData, WatchType,
};

use super::{active_session, SessionError};

/// Rows of seats in a theater, front to back
pub const SEAT_ROWS: [char; 7] = ['A', 'B', 'C', 'D', 'E', 'F', 'G'];
pub const SEATS_PER_ROW: i32 = 6;
pub const THEATER_CAPACITY: i32 = SEAT_ROWS.len() as i32 * SEATS_PER_ROW;

/// How often a join re-runs get-or-create after losing a race for a seat
const MAX_JOIN_ATTEMPTS: usize = 8;
const MAX_THEATER_NAME_LENGTH: usize = 50;

/// A seat in a theater, such as C4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Seat {
    pub row: char,
    pub col: i32,
}

#[derive(Debug, Error)]
pub enum TheaterError {
    #[error("Theaters only exist in 3d cinema sessions")]
    NotCinema,
    #[error("Only the host can do this")]
    NotHost,
    #[error("Seat {0} doesn't exist")]
    InvalidSeat(String),
    #[error("Seat is already taken")]
    SeatTaken,
    #[error("Theater is full")]
    Full,
    #[error("User has no seat in this session")]
    NotSeated,
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

impl Seat {
    pub fn new(row: char, col: i32) -> Result<Self, TheaterError> {
        let row = row.to_ascii_uppercase();

        if !SEAT_ROWS.contains(&row) || !(1..=SEATS_PER_ROW).contains(&col) {
            return Err(TheaterError::InvalidSeat(format!("{row}{col}")));
        }

        Ok(Self { row, col })
    }

    /// Zero based, A is 0
    pub fn row_index(&self) -> i32 {
        self.row as i32 - 'A' as i32
    }

    /// Numbers seats 1 to 42, row by row
    pub fn number(&self) -> i32 {
        self.row_index() * SEATS_PER_ROW + self.col
    }

    /// Every seat in row-major order
    pub fn all() -> impl Iterator<Item = Seat> {
        SEAT_ROWS
            .into_iter()
            .flat_map(|row| (1..=SEATS_PER_ROW).map(move |col| Seat { row, col }))
    }

    fn of(assignment: &TheaterAssignmentData) -> Self {
        Self {
            row: assignment.seat_row,
            col: assignment.seat_col,
        }
    }
}

impl fmt::Display for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row, self.col)
    }
}

/// A theater together with who sits where
#[derive(Debug, Clone)]
pub struct Occupancy {
    pub theater: TheaterData,
    pub assignments: Vec<TheaterAssignmentData>,
}

/// Seats users of 3d cinema sessions, opening new theaters as existing ones fill up
pub struct TheaterAllocator {
    context: CollabContext,
}

impl TheaterAllocator {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Returns the first theater with a free seat, creating the next one if all are full
    pub async fn get_or_create(&self, session: &WatchSessionData) -> Result<TheaterData, TheaterError> {
        let database = &self.context.database;
        let theaters = database.theaters_for_session(session.id).await?;

        if let Some(theater) = theaters.into_iter().find(|t| !t.is_full()) {
            return Ok(theater);
        }

        let created = database
            .create_next_theater(session.id, THEATER_CAPACITY, self.context.clock.now())
            .await;

        match created {
            Ok(theater) => {
                info!(
                    "Opened theater {} for session {}",
                    theater.theater_number, session.session_id
                );
                Ok(theater)
            }
            // Someone else opened it first
            Err(DatabaseError::Conflict { .. }) => database
                .theaters_for_session(session.id)
                .await?
                .into_iter()
                .find(|t| !t.is_full())
                .ok_or(TheaterError::Full),
            Err(e) => Err(e.into()),
        }
    }

    /// Seats a user in the first free seat, or returns their existing seat
    pub async fn join(&self, session_id: Uuid, user: &UserData) -> Result<TheaterAssignmentData, TheaterError> {
        let session = self.cinema_session(session_id, user).await?;
        let database = &self.context.database;

        if let Some(existing) = database.assignment_for_user(session.id, user.id).await? {
            return Ok(existing);
        }

        for attempt in 1..=MAX_JOIN_ATTEMPTS {
            let theater = match self.get_or_create(&session).await {
                Ok(theater) => theater,
                Err(TheaterError::Full) => continue,
                Err(e) => return Err(e),
            };

            let taken: Vec<_> = database
                .theater_assignments(theater.id)
                .await?
                .iter()
                .map(Seat::of)
                .collect();

            let Some(seat) = Seat::all().find(|s| !taken.contains(s)) else {
                continue;
            };

            match self.place(&session, user.id, theater.id, seat).await {
                Ok(assignment) => return Ok(assignment),
                Err(TheaterError::Full) | Err(TheaterError::SeatTaken) => {
                    debug!(
                        "Lost the race for seat {} in theater {} (attempt {})",
                        seat, theater.id, attempt
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(TheaterError::Full)
    }

    /// Moves a user to a specific seat
    pub async fn assign(
        &self,
        session_id: Uuid,
        user: &UserData,
        theater_id: PrimaryKey,
        seat: Seat,
    ) -> Result<TheaterAssignmentData, TheaterError> {
        let session = self.cinema_session(session_id, user).await?;
        let theater = self.context.database.theater_by_id(theater_id).await?;

        if theater.session_id != session.id {
            return Err(TheaterError::InvalidInput("theater belongs to another session"));
        }

        self.place(&session, user.id, theater_id, seat).await
    }

    /// Frees the user's seat
    pub async fn leave(&self, session_id: Uuid, user: &UserData) -> Result<TheaterAssignmentData, TheaterError> {
        let session = self.context.database.watch_session_by_uuid(session_id).await?;

        let removed = self
            .context
            .database
            .remove_assignment(session.id, user.id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => TheaterError::NotSeated,
                e => TheaterError::Db(e),
            })?;

        self.context.emit(CollabEvent::TheaterLeft {
            room_id: session.room_id,
            data: SeatPayload::new(&removed, session_id),
        });

        Ok(removed)
    }

    /// Theaters of a session, ordered by number
    pub async fn theaters(&self, session_id: Uuid) -> Result<Vec<TheaterData>, TheaterError> {
        let session = self.context.database.watch_session_by_uuid(session_id).await?;

        Ok(self.context.database.theaters_for_session(session.id).await?)
    }

    pub async fn occupancy(&self, theater_id: PrimaryKey) -> Result<Occupancy, TheaterError> {
        let theater = self.context.database.theater_by_id(theater_id).await?;
        let assignments = self.context.database.theater_assignments(theater_id).await?;

        Ok(Occupancy {
            theater,
            assignments,
        })
    }

    /// Renames a theater, or resets it to its number when `name` is `None`
    pub async fn rename(
        &self,
        theater_id: PrimaryKey,
        user: &UserData,
        name: Option<String>,
    ) -> Result<TheaterData, TheaterError> {
        let theater = self.context.database.theater_by_id(theater_id).await?;
        let session = self.context.database.watch_session_by_id(theater.session_id).await?;

        if session.host_id != user.id {
            return Err(TheaterError::NotHost);
        }

        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());

        if name
            .as_ref()
            .is_some_and(|n| n.chars().count() > MAX_THEATER_NAME_LENGTH)
        {
            return Err(TheaterError::InvalidInput("theater name is too long"));
        }

        let renamed = self.context.database.rename_theater(theater_id, name).await?;

        self.context.emit(CollabEvent::TheaterRenamed {
            room_id: session.room_id,
            data: TheaterPayload::from(&renamed),
        });

        Ok(renamed)
    }

    async fn cinema_session(&self, session_id: Uuid, user: &UserData) -> Result<WatchSessionData, TheaterError> {
        let (session, room) = active_session(&self.context, session_id).await?;

        if session.watch_type != WatchType::Cinema3d {
            return Err(TheaterError::NotCinema);
        }

        require_member(self.context.database.as_ref(), room.id, user.id).await?;

        Ok(session)
    }

    async fn place(
        &self,
        session: &WatchSessionData,
        user_id: PrimaryKey,
        theater_id: PrimaryKey,
        seat: Seat,
    ) -> Result<TheaterAssignmentData, TheaterError> {
        let assignment = self
            .context
            .database
            .assign_seat(SeatAssignment {
                session_id: session.id,
                user_id,
                theater_id,
                seat_row: seat.row,
                seat_col: seat.col,
                seat_number: seat.number(),
                assigned_at: self.context.clock.now(),
            })
            .await
            .map_err(|e| match e {
                DatabaseError::Full { .. } => TheaterError::Full,
                DatabaseError::Conflict { .. } => TheaterError::SeatTaken,
                e => TheaterError::Db(e),
            })?;

        self.context.emit(CollabEvent::TheaterAssigned {
            room_id: session.room_id,
            data: SeatPayload::new(&assignment, session.session_id),
        });

        Ok(assignment)
    }
}
