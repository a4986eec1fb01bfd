use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json,
};
use uuid::Uuid;
use wewatch_collab::{
    sessions::{MediaDetails, Seat as CollabSeat},
    PrimaryKey, MAX_UPLOAD_SIZE,
};

use crate::{
    auth::Session,
    context::ServerContext,
    errors::{ServerError, ServerResult},
    schemas::{
        BroadcastDeclineSchema, BroadcastRequestSchema, BroadcastTargetSchema, ChatSchema,
        RequestsQuery, SeatSchema, ValidatedJson,
    },
    serialized::{
        BroadcastPermission, BroadcastRequest, Broadcaster, ChatMessage, Media, MediaToken, Seat,
        Theater, ToSerialized, WatchSession,
    },
    uploads::UploadForm,
    Router,
};

#[utoipa::path(
    get,
    path = "/api/sessions/{id}",
    tag = "sessions",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = WatchSession)
    )
)]
async fn watch_session(
    _session: Session,
    context: ServerContext,
    Path(session_id): Path<Uuid>,
) -> ServerResult<Json<WatchSession>> {
    let watch_session = context.collab.sessions.session(session_id).await?;

    Ok(Json(watch_session.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/chat",
    tag = "chat",
    request_body = ChatSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 201, body = ChatMessage, description = "Stored and sent to the room as chat_message")
    )
)]
async fn post_session_message(
    session: Session,
    context: ServerContext,
    Path(session_id): Path<Uuid>,
    ValidatedJson(body): ValidatedJson<ChatSchema>,
) -> ServerResult<(StatusCode, Json<ChatMessage>)> {
    let message = context
        .collab
        .chat
        .post_session_message(session_id, &session.user, &body.message)
        .await?;

    Ok((StatusCode::CREATED, Json(message.to_serialized())))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/theaters",
    tag = "theaters",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<Theater>, description = "Theaters of the session by number")
    )
)]
async fn theaters(
    _session: Session,
    context: ServerContext,
    Path(session_id): Path<Uuid>,
) -> ServerResult<Json<Vec<Theater>>> {
    let theaters = context.collab.theaters.theaters(session_id).await?;

    Ok(Json(theaters.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/theaters/join",
    tag = "theaters",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Seat, description = "The seat the user was given, or already had")
    )
)]
async fn join_theater(
    session: Session,
    context: ServerContext,
    Path(session_id): Path<Uuid>,
) -> ServerResult<Json<Seat>> {
    let seat = context.collab.theaters.join(session_id, &session.user).await?;

    Ok(Json(seat.to_serialized()))
}

#[utoipa::path(
    put,
    path = "/api/sessions/{id}/seat",
    tag = "theaters",
    request_body = SeatSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Seat),
        (status = 409, description = "Seat is taken or theater is full")
    )
)]
async fn assign_seat(
    session: Session,
    context: ServerContext,
    Path(session_id): Path<Uuid>,
    ValidatedJson(body): ValidatedJson<SeatSchema>,
) -> ServerResult<Json<Seat>> {
    let row = body
        .row
        .chars()
        .next()
        .ok_or_else(|| ServerError::BadRequest("Row is missing".to_string()))?;

    let seat = context
        .collab
        .theaters
        .assign(
            session_id,
            &session.user,
            body.theater_id,
            CollabSeat::new(row, body.col)?,
        )
        .await?;

    Ok(Json(seat.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/api/sessions/{id}/seat",
    tag = "theaters",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "User left their seat"),
        (status = 404, description = "User had no seat")
    )
)]
async fn leave_seat(
    session: Session,
    context: ServerContext,
    Path(session_id): Path<Uuid>,
) -> ServerResult<StatusCode> {
    context.collab.theaters.leave(session_id, &session.user).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/broadcast/request",
    tag = "broadcast",
    request_body = BroadcastRequestSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = BroadcastRequest),
        (status = 409, description = "A request is already pending")
    )
)]
async fn request_broadcast(
    session: Session,
    context: ServerContext,
    Path(session_id): Path<Uuid>,
    ValidatedJson(body): ValidatedJson<BroadcastRequestSchema>,
) -> ServerResult<Json<BroadcastRequest>> {
    let request = context
        .collab
        .broadcast
        .request(session_id, &session.user, body.message)
        .await?;

    Ok(Json(request.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/broadcast/grant",
    tag = "broadcast",
    request_body = BroadcastTargetSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = BroadcastPermission),
        (status = 400, description = "Broadcast permission is already active")
    )
)]
async fn grant_broadcast(
    session: Session,
    context: ServerContext,
    Path(session_id): Path<Uuid>,
    ValidatedJson(body): ValidatedJson<BroadcastTargetSchema>,
) -> ServerResult<Json<BroadcastPermission>> {
    let permission = context
        .collab
        .broadcast
        .grant(session_id, &session.user, body.user_id)
        .await?;

    Ok(Json(permission.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/broadcast/revoke",
    tag = "broadcast",
    request_body = BroadcastTargetSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = BroadcastPermission)
    )
)]
async fn revoke_broadcast(
    session: Session,
    context: ServerContext,
    Path(session_id): Path<Uuid>,
    ValidatedJson(body): ValidatedJson<BroadcastTargetSchema>,
) -> ServerResult<Json<BroadcastPermission>> {
    let permission = context
        .collab
        .broadcast
        .revoke(session_id, &session.user, body.user_id)
        .await?;

    Ok(Json(permission.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/broadcast/decline",
    tag = "broadcast",
    request_body = BroadcastDeclineSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = BroadcastRequest)
    )
)]
async fn decline_broadcast(
    session: Session,
    context: ServerContext,
    Path(session_id): Path<Uuid>,
    ValidatedJson(body): ValidatedJson<BroadcastDeclineSchema>,
) -> ServerResult<Json<BroadcastRequest>> {
    let request = context
        .collab
        .broadcast
        .decline(session_id, &session.user, body.request_id)
        .await?;

    Ok(Json(request.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/broadcast/active",
    tag = "broadcast",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<Broadcaster>, description = "Everyone allowed to publish, the host first")
    )
)]
async fn active_broadcasters(
    _session: Session,
    context: ServerContext,
    Path(session_id): Path<Uuid>,
) -> ServerResult<Json<Vec<Broadcaster>>> {
    let active = context.collab.broadcast.active(session_id).await?;

    Ok(Json(active.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/broadcast/requests",
    tag = "broadcast",
    params(RequestsQuery),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<BroadcastRequest>)
    )
)]
async fn broadcast_requests(
    session: Session,
    context: ServerContext,
    Path(session_id): Path<Uuid>,
    Query(query): Query<RequestsQuery>,
) -> ServerResult<Json<Vec<BroadcastRequest>>> {
    let requests = context
        .collab
        .broadcast
        .requests(session_id, &session.user, query.status.map(Into::into))
        .await?;

    Ok(Json(requests.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/media-token",
    tag = "broadcast",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = MediaToken),
        (status = 503, description = "The media service is not configured")
    )
)]
async fn media_token(
    session: Session,
    context: ServerContext,
    Path(session_id): Path<Uuid>,
) -> ServerResult<Json<MediaToken>> {
    let token = context
        .collab
        .broadcast
        .media_token(session_id, &session.user)
        .await?;

    Ok(Json(token.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/media",
    tag = "media",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<Media>)
    )
)]
async fn session_media(
    _session: Session,
    context: ServerContext,
    Path(session_id): Path<Uuid>,
) -> ServerResult<Json<Vec<Media>>> {
    let media = context.collab.media.temporary(session_id).await?;

    Ok(Json(media.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/media",
    tag = "media",
    request_body(content = String, content_type = "multipart/form-data", description = "A `file` part, with optional `poster_url` and `duration` parts"),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 201, body = Media, description = "Stored until the session ends")
    )
)]
async fn upload_session_media(
    session: Session,
    context: ServerContext,
    Path(session_id): Path<Uuid>,
    multipart: Multipart,
) -> ServerResult<(StatusCode, Json<Media>)> {
    let form = UploadForm::read(&context, multipart).await?;

    let duration = form
        .text("duration")
        .map(|d| d.parse::<f64>())
        .transpose()
        .map_err(|_| ServerError::BadRequest("Duration must be a number".to_string()))?;

    let details = MediaDetails {
        poster_url: form.text("poster_url"),
        duration,
    };

    let media = context
        .collab
        .media
        .upload_temporary(session_id, &session.user, form.file, details)
        .await?;

    Ok((StatusCode::CREATED, Json(media.to_serialized())))
}

#[utoipa::path(
    delete,
    path = "/api/sessions/{id}/media/{item_id}",
    tag = "media",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "Item and its file were deleted")
    )
)]
async fn delete_session_media(
    session: Session,
    context: ServerContext,
    Path((session_id, item_id)): Path<(Uuid, PrimaryKey)>,
) -> ServerResult<StatusCode> {
    context
        .collab
        .media
        .delete_temporary(session_id, item_id, &session.user)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(watch_session))
        .route("/:id/chat", post(post_session_message))
        .route("/:id/theaters", get(theaters))
        .route("/:id/theaters/join", post(join_theater))
        .route("/:id/seat", put(assign_seat).delete(leave_seat))
        .route("/:id/broadcast/request", post(request_broadcast))
        .route("/:id/broadcast/grant", post(grant_broadcast))
        .route("/:id/broadcast/revoke", post(revoke_broadcast))
        .route("/:id/broadcast/decline", post(decline_broadcast))
        .route("/:id/broadcast/active", get(active_broadcasters))
        .route("/:id/broadcast/requests", get(broadcast_requests))
        .route("/:id/media-token", get(media_token))
        .route(
            "/:id/media",
            get(session_media)
                .post(upload_session_media)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE)),
        )
        .route("/:id/media/:item_id", delete(delete_session_media))
}
