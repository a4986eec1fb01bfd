use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::error;
use thiserror::Error;
use wewatch_collab::{
    rooms::RoomError,
    sessions::{BroadcastError, SessionError, TheaterError},
    AuthError, DatabaseError, FileError, MediaTokenError,
};

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Forbidden(String),
    #[error("{resource}:{identifier} not found")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("Unknown internal error: {0}")]
    Unknown(String),
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn forbidden(error: impl ToString) -> Self {
        Self::Forbidden(error.to_string())
    }

    fn bad_request(error: impl ToString) -> Self {
        Self::BadRequest(error.to_string())
    }

    fn conflict(error: impl ToString) -> Self {
        Self::Conflict(error.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if let Self::Unknown(message) = &self {
            error!("Request failed: {}", message);
        }

        (self.as_status_code(), self.to_string()).into_response()
    }
}

impl From<DatabaseError> for ServerError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound {
                resource,
                identifier,
            } => Self::NotFound {
                resource,
                identifier,
            },
            e @ DatabaseError::Conflict { .. } => Self::conflict(e),
            e @ DatabaseError::Full { .. } => Self::conflict(e),
            e => Self::Unknown(e.to_string()),
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::InvalidCredentials => Self::Unauthorized("Invalid credentials"),
            AuthError::InvalidToken => Self::Unauthorized("Invalid or expired token"),
            AuthError::Db(e) => e.into(),
            e => Self::Unknown(e.to_string()),
        }
    }
}

impl From<FileError> for ServerError {
    fn from(value: FileError) -> Self {
        match value {
            e @ (FileError::InvalidPath(_) | FileError::TooLarge) => Self::bad_request(e),
            e => Self::Unknown(e.to_string()),
        }
    }
}

impl From<MediaTokenError> for ServerError {
    fn from(value: MediaTokenError) -> Self {
        match value {
            e @ MediaTokenError::NotConfigured => Self::Unavailable(e.to_string()),
            e => Self::Unknown(e.to_string()),
        }
    }
}

impl From<RoomError> for ServerError {
    fn from(value: RoomError) -> Self {
        match value {
            RoomError::Db(e) => e.into(),
            e @ RoomError::AlreadyMember => Self::conflict(e),
            e @ (RoomError::InvalidInvite | RoomError::InvalidInput(_)) => Self::bad_request(e),
            e => Self::forbidden(e),
        }
    }
}

impl From<SessionError> for ServerError {
    fn from(value: SessionError) -> Self {
        match value {
            SessionError::Room(e) => e.into(),
            SessionError::File(e) => e.into(),
            SessionError::Db(e) => e.into(),
            e @ SessionError::NotHost => Self::forbidden(e),
            e @ SessionError::AlreadyActive(_) => Self::conflict(e),
            e => Self::bad_request(e),
        }
    }
}

impl From<TheaterError> for ServerError {
    fn from(value: TheaterError) -> Self {
        match value {
            TheaterError::Session(e) => e.into(),
            TheaterError::Room(e) => e.into(),
            TheaterError::Db(e) => e.into(),
            e @ TheaterError::NotHost => Self::forbidden(e),
            e @ (TheaterError::SeatTaken | TheaterError::Full) => Self::conflict(e),
            TheaterError::NotSeated => Self::NotFound {
                resource: "theater assignment",
                identifier: "user",
            },
            e => Self::bad_request(e),
        }
    }
}

impl From<BroadcastError> for ServerError {
    fn from(value: BroadcastError) -> Self {
        match value {
            BroadcastError::Session(e) => e.into(),
            BroadcastError::Room(e) => e.into(),
            BroadcastError::MediaToken(e) => e.into(),
            BroadcastError::Db(e) => e.into(),
            e @ BroadcastError::NotHost => Self::forbidden(e),
            e @ BroadcastError::AlreadyPending => Self::conflict(e),
            e => Self::bad_request(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn domain_errors_map_to_status_codes() {
        let cases: Vec<(ServerError, StatusCode)> = vec![
            (RoomError::NotMember.into(), StatusCode::FORBIDDEN),
            (RoomError::AlreadyMember.into(), StatusCode::CONFLICT),
            (
                SessionError::AlreadyActive("abc".to_string()).into(),
                StatusCode::CONFLICT,
            ),
            (BroadcastError::AlreadyActive.into(), StatusCode::BAD_REQUEST),
            (TheaterError::Full.into(), StatusCode::CONFLICT),
            (AuthError::InvalidToken.into(), StatusCode::UNAUTHORIZED),
            (
                BroadcastError::MediaToken(MediaTokenError::NotConfigured).into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                TheaterError::Session(SessionError::Db(DatabaseError::NotFound {
                    resource: "watch session",
                    identifier: "session_id",
                }))
                .into(),
                StatusCode::NOT_FOUND,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.as_status_code(), status, "{error}");
        }
    }

    #[test]
    fn conflicts_keep_their_message() {
        let error: ServerError = SessionError::AlreadyActive("S1".to_string()).into();

        assert_eq!(error.to_string(), "Room already has an active watch session: S1");
    }
}
