use axum::{
    extract::{Path, Query},
    http::StatusCode,
    routing::{get, post, put},
    Json,
};
use wewatch_collab::{rooms::NewPlainReaction, PrimaryKey};

use crate::{
    auth::Session,
    context::ServerContext,
    errors::ServerResult,
    schemas::{ChatSchema, HistoryQuery, ReactionSchema, ValidatedJson},
    serialized::{ChatMessage, Reaction, ToSerialized},
    Router,
};

#[utoipa::path(
    post,
    path = "/api/rooms/{id}/chat",
    tag = "chat",
    request_body = ChatSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 201, body = ChatMessage, description = "Stored and sent to the room as room_chat")
    )
)]
async fn post_room_message(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<ChatSchema>,
) -> ServerResult<(StatusCode, Json<ChatMessage>)> {
    let message = context
        .collab
        .chat
        .post_room_message(room_id, &session.user, &body.message)
        .await?;

    Ok((StatusCode::CREATED, Json(message.to_serialized())))
}

#[utoipa::path(
    get,
    path = "/api/rooms/{id}/chat/history",
    tag = "chat",
    params(HistoryQuery),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<ChatMessage>, description = "Up to 100 messages, oldest first")
    )
)]
async fn history(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
    Query(query): Query<HistoryQuery>,
) -> ServerResult<Json<Vec<ChatMessage>>> {
    let entries = context
        .collab
        .chat
        .history(room_id, &session.user, query.session_id)
        .await?;

    Ok(Json(entries.to_serialized()))
}

#[utoipa::path(
    put,
    path = "/api/rooms/{id}/chat/{message_id}",
    tag = "chat",
    request_body = ChatSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = ChatMessage),
        (status = 403, description = "Only the author can edit a message")
    )
)]
async fn edit_message(
    session: Session,
    context: ServerContext,
    Path((room_id, message_id)): Path<(PrimaryKey, PrimaryKey)>,
    ValidatedJson(body): ValidatedJson<ChatSchema>,
) -> ServerResult<Json<ChatMessage>> {
    let message = context
        .collab
        .chat
        .edit(room_id, message_id, &session.user, &body.message)
        .await?;

    Ok(Json(message.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/api/rooms/{id}/chat/{message_id}",
    tag = "chat",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "Message was deleted by its author")
    )
)]
async fn delete_message(
    session: Session,
    context: ServerContext,
    Path((room_id, message_id)): Path<(PrimaryKey, PrimaryKey)>,
) -> ServerResult<StatusCode> {
    context
        .collab
        .chat
        .delete(room_id, message_id, &session.user)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/rooms/{id}/chat/{message_id}/remove",
    tag = "chat",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = ChatMessage, description = "Message is hidden by the host")
    )
)]
async fn remove_message(
    session: Session,
    context: ServerContext,
    Path((room_id, message_id)): Path<(PrimaryKey, PrimaryKey)>,
) -> ServerResult<Json<ChatMessage>> {
    let message = context
        .collab
        .chat
        .remove(room_id, message_id, &session.user)
        .await?;

    Ok(Json(message.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/rooms/{id}/reactions",
    tag = "chat",
    request_body = ReactionSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 201, body = Reaction),
        (status = 400, description = "Emoji is not on the allow list")
    )
)]
async fn react(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<ReactionSchema>,
) -> ServerResult<(StatusCode, Json<Reaction>)> {
    let reaction = context
        .collab
        .chat
        .react(
            room_id,
            &session.user,
            NewPlainReaction {
                emoji: body.emoji,
                session_id: body.session_id,
                message_id: body.message_id,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(reaction.to_serialized())))
}

pub fn router() -> Router {
    Router::new()
        .route("/:id/chat", post(post_room_message))
        .route("/:id/chat/history", get(history))
        .route(
            "/:id/chat/:message_id",
            put(edit_message).delete(delete_message),
        )
        .route("/:id/chat/:message_id/remove", post(remove_message))
        .route("/:id/reactions", post(react))
}
