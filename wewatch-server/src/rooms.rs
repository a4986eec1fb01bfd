use axum::{
    extract::{DefaultBodyLimit, Multipart, Path},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json,
};
use chrono::Duration;
use uuid::Uuid;
use wewatch_collab::{
    rooms::NewPlainTvContent, PrimaryKey, UpdatedRoomStatus, WatchType, MAX_UPLOAD_SIZE,
};

use crate::{
    auth::Session,
    context::ServerContext,
    errors::ServerResult,
    schemas::{
        InstantWatchSchema, LoopModeUpdateSchema, NewRoomSchema, NewSessionSchema,
        NewTvContentSchema, RoomStatusSchema, ValidatedJson,
    },
    serialized::{
        EndedSession, InstantWatch, Media, Room, RoomMember, ToSerialized, TvContent,
        WatchSession,
    },
    uploads::UploadForm,
    Router,
};

#[utoipa::path(
    get,
    path = "/api/rooms",
    tag = "rooms",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<Room>, description = "The latest rooms, newest first")
    )
)]
async fn list_rooms(_session: Session, context: ServerContext) -> ServerResult<Json<Vec<Room>>> {
    let rooms = context.collab.rooms.latest().await?;

    Ok(Json(rooms.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/rooms",
    tag = "rooms",
    request_body = NewRoomSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 201, body = Room)
    )
)]
async fn create_room(
    session: Session,
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<NewRoomSchema>,
) -> ServerResult<(StatusCode, Json<Room>)> {
    let room = context
        .collab
        .rooms
        .create_room(
            &session.user,
            body.name,
            body.description.unwrap_or_default(),
            body.is_public.unwrap_or(true),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(room.to_serialized())))
}

#[utoipa::path(
    get,
    path = "/api/rooms/{id}",
    tag = "rooms",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Room)
    )
)]
async fn room(
    _session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
) -> ServerResult<Json<Room>> {
    let room = context.collab.rooms.room(room_id).await?;

    Ok(Json(room.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/api/rooms/{id}",
    tag = "rooms",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "Room, its sessions and its uploads were deleted"),
        (status = 403, description = "Only the host can delete a room")
    )
)]
async fn delete_room(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
) -> ServerResult<StatusCode> {
    context.collab.rooms.delete_room(room_id, &session.user).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/rooms/{id}/join",
    tag = "rooms",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = RoomMember),
        (status = 403, description = "Private rooms can only be joined with an invite"),
        (status = 409, description = "Already a member")
    )
)]
async fn join_room(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
) -> ServerResult<Json<RoomMember>> {
    let member = context.collab.rooms.join(room_id, &session.user).await?;

    Ok(Json(member.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/api/rooms/{id}/members",
    tag = "rooms",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<RoomMember>)
    )
)]
async fn members(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
) -> ServerResult<Json<Vec<RoomMember>>> {
    let members = context.collab.rooms.members(room_id, &session.user).await?;

    Ok(Json(members.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/rooms/instant-watch",
    tag = "rooms",
    request_body = InstantWatchSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 201, body = InstantWatch, description = "A temporary public room with a running session")
    )
)]
async fn instant_watch(
    session: Session,
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<InstantWatchSchema>,
) -> ServerResult<(StatusCode, Json<InstantWatch>)> {
    let watch_type = body.watch_type.map(Into::into).unwrap_or(WatchType::Video);

    let (room, watch_session) = context
        .collab
        .sessions
        .instant_watch(&session.user, body.name, watch_type)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InstantWatch {
            room: room.to_serialized(),
            session: watch_session.to_serialized(),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/rooms/{id}/watch-session",
    tag = "sessions",
    request_body = NewSessionSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 201, body = WatchSession),
        (status = 409, description = "The room already has an active session, which the message names")
    )
)]
async fn start_session(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<NewSessionSchema>,
) -> ServerResult<(StatusCode, Json<WatchSession>)> {
    let watch_type = body.watch_type.map(Into::into).unwrap_or(WatchType::Video);

    let watch_session = context
        .collab
        .sessions
        .start(room_id, &session.user, watch_type)
        .await?;

    Ok((StatusCode::CREATED, Json(watch_session.to_serialized())))
}

#[utoipa::path(
    get,
    path = "/api/rooms/{id}/active-session",
    tag = "sessions",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Option<WatchSession>, description = "The active session, or null")
    )
)]
async fn active_session(
    _session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
) -> ServerResult<Json<Option<WatchSession>>> {
    let active = context.collab.sessions.active(room_id).await?;

    Ok(Json(active.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/rooms/watch-sessions/{session_id}/end",
    tag = "sessions",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = EndedSession),
        (status = 403, description = "Only the host can end a session")
    )
)]
async fn end_session(
    session: Session,
    context: ServerContext,
    Path(session_id): Path<Uuid>,
) -> ServerResult<Json<EndedSession>> {
    let ended = context.collab.sessions.end(session_id, &session.user).await?;

    Ok(Json(ended.to_serialized()))
}

#[utoipa::path(
    put,
    path = "/api/rooms/{id}/status",
    tag = "rooms",
    request_body = RoomStatusSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Room)
    )
)]
async fn update_status(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<RoomStatusSchema>,
) -> ServerResult<Json<Room>> {
    let room = context
        .collab
        .rooms
        .update_status(
            room_id,
            &session.user,
            UpdatedRoomStatus {
                id: room_id,
                currently_playing: body.currently_playing,
                coming_next: body.coming_next,
                is_screen_sharing: body.is_screen_sharing,
            },
        )
        .await?;

    Ok(Json(room.to_serialized()))
}

#[utoipa::path(
    put,
    path = "/api/rooms/{id}/loop-mode",
    tag = "rooms",
    request_body = LoopModeUpdateSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Room)
    )
)]
async fn update_loop_mode(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<LoopModeUpdateSchema>,
) -> ServerResult<Json<Room>> {
    let room = context
        .collab
        .rooms
        .update_loop_mode(room_id, &session.user, body.loop_mode.into())
        .await?;

    Ok(Json(room.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/api/rooms/{id}/media",
    tag = "media",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<Media>)
    )
)]
async fn room_media(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
) -> ServerResult<Json<Vec<Media>>> {
    let media = context.collab.media.room_media(room_id, &session.user).await?;

    Ok(Json(media.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/rooms/{id}/media",
    tag = "media",
    request_body(content = String, content_type = "multipart/form-data", description = "A `file` part and an optional `title`"),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 201, body = Media)
    )
)]
async fn upload_room_media(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
    multipart: Multipart,
) -> ServerResult<(StatusCode, Json<Media>)> {
    let form = UploadForm::read(&context, multipart).await?;
    let title = form.text("title");

    let item = context
        .collab
        .media
        .upload_permanent(room_id, &session.user, title, form.file)
        .await?;

    Ok((StatusCode::CREATED, Json(item.to_serialized())))
}

#[utoipa::path(
    get,
    path = "/api/rooms/{id}/tv",
    tag = "tv",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Option<TvContent>, description = "What the room TV currently shows, or null")
    )
)]
async fn tv(
    _session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
) -> ServerResult<Json<Option<TvContent>>> {
    let content = context.collab.tv.active(room_id).await?;

    Ok(Json(content.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/rooms/{id}/tv",
    tag = "tv",
    request_body = NewTvContentSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 201, body = TvContent)
    )
)]
async fn create_tv_content(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<NewTvContentSchema>,
) -> ServerResult<(StatusCode, Json<TvContent>)> {
    let content = context
        .collab
        .tv
        .create(
            room_id,
            &session.user,
            NewPlainTvContent {
                kind: body.kind.into(),
                title: body.title,
                body: body.body,
                media_url: body.media_url,
                session_id: body.session_id,
                duration: Duration::minutes(body.duration_in_minutes),
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(content.to_serialized())))
}

#[utoipa::path(
    delete,
    path = "/api/rooms/{id}/tv/{content_id}",
    tag = "tv",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "Content was taken off the TV")
    )
)]
async fn remove_tv_content(
    session: Session,
    context: ServerContext,
    Path((room_id, content_id)): Path<(PrimaryKey, PrimaryKey)>,
) -> ServerResult<StatusCode> {
    context
        .collab
        .tv
        .remove(room_id, content_id, &session.user)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_rooms).post(create_room))
        .route("/instant-watch", post(instant_watch))
        .route("/watch-sessions/:session_id/end", post(end_session))
        .route("/:id", get(room).delete(delete_room))
        .route("/:id/join", post(join_room))
        .route("/:id/members", get(members))
        .route("/:id/watch-session", post(start_session))
        .route("/:id/active-session", get(active_session))
        .route("/:id/status", put(update_status))
        .route("/:id/loop-mode", put(update_loop_mode))
        .route(
            "/:id/media",
            get(room_media)
                .post(upload_room_media)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE)),
        )
        .route("/:id/tv", get(tv).post(create_tv_content))
        .route("/:id/tv/:content_id", delete(remove_tv_content))
}

#[cfg(test)]
mod test {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::test_support::TestServer;

    #[tokio::test]
    async fn second_session_conflicts_and_names_the_first() {
        let server = TestServer::new();
        let (_, host) = server.user("host").await;

        let (status, room) = server
            .call(
                Method::POST,
                "/api/rooms",
                Some(&host),
                Some(json!({ "name": "Movie night" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let room_id = room["id"].as_i64().unwrap();

        let start = format!("/api/rooms/{room_id}/watch-session");
        let (status, first) = server
            .call(Method::POST, &start, Some(&host), Some(json!({ "watch_type": "video" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let first_id = first["session_id"].as_str().unwrap().to_string();

        let (status, message) = server
            .call(Method::POST, &start, Some(&host), Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(
            message.as_str().unwrap().contains(&first_id),
            "the conflict names the active session"
        );
    }

    #[tokio::test]
    async fn ending_a_session_clears_the_active_one() {
        let server = TestServer::new();
        let (_, host) = server.user("host").await;
        let (_, guest) = server.user("guest").await;

        let (_, room) = server
            .call(
                Method::POST,
                "/api/rooms",
                Some(&host),
                Some(json!({ "name": "Movie night" })),
            )
            .await;
        let room_id = room["id"].as_i64().unwrap();

        let (_, started) = server
            .call(
                Method::POST,
                &format!("/api/rooms/{room_id}/watch-session"),
                Some(&host),
                Some(json!({})),
            )
            .await;
        let session_id = started["session_id"].as_str().unwrap();
        let end = format!("/api/rooms/watch-sessions/{session_id}/end");

        let (status, _) = server.call(Method::POST, &end, Some(&guest), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = server.call(Method::POST, &end, Some(&host), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, active) = server
            .call(
                Method::GET,
                &format!("/api/rooms/{room_id}/active-session"),
                Some(&guest),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(active.is_null());
    }

    #[tokio::test]
    async fn instant_watch_creates_a_temporary_room() {
        let server = TestServer::new();
        let (_, host) = server.user("host").await;

        let (status, body) = server
            .call(
                Method::POST,
                "/api/rooms/instant-watch",
                Some(&host),
                Some(json!({ "watch_type": "3d_cinema" })),
            )
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["room"]["is_temporary"], true);
        assert_eq!(body["room"]["name"], "host's watch party");
        assert_eq!(body["session"]["watch_type"], "3d_cinema");
    }

    #[tokio::test]
    async fn only_the_host_updates_a_room() {
        let server = TestServer::new();
        let (_, host) = server.user("host").await;
        let (_, guest) = server.user("guest").await;

        let (_, room) = server
            .call(
                Method::POST,
                "/api/rooms",
                Some(&host),
                Some(json!({ "name": "Movie night" })),
            )
            .await;
        let room_id = room["id"].as_i64().unwrap();
        let loop_mode = format!("/api/rooms/{room_id}/loop-mode");

        let (status, _) = server
            .call(
                Method::PUT,
                &loop_mode,
                Some(&guest),
                Some(json!({ "loop_mode": "playlist-once" })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, updated) = server
            .call(
                Method::PUT,
                &loop_mode,
                Some(&host),
                Some(json!({ "loop_mode": "playlist-once" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["loop_mode"], "playlist-once");

        let (status, _) = server
            .call(
                Method::POST,
                "/api/rooms",
                Some(&host),
                Some(json!({ "name": "" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "names cannot be empty");
    }

    #[tokio::test]
    async fn public_rooms_can_be_joined_once() {
        let server = TestServer::new();
        let (_, host) = server.user("host").await;
        let (_, guest) = server.user("guest").await;

        let (_, room) = server
            .call(
                Method::POST,
                "/api/rooms",
                Some(&host),
                Some(json!({ "name": "Movie night" })),
            )
            .await;
        let join = format!("/api/rooms/{}/join", room["id"]);

        let (status, member) = server.call(Method::POST, &join, Some(&guest), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(member["role"], "member");

        let (status, _) = server.call(Method::POST, &join, Some(&guest), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, members) = server
            .call(
                Method::GET,
                &format!("/api/rooms/{}/members", room["id"]),
                Some(&guest),
                None,
            )
            .await;
        assert_eq!(members.as_array().unwrap().len(), 2);
    }
}
