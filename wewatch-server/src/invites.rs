use axum::{
    extract::Path,
    http::StatusCode,
    routing::{get, post},
    Json,
};
use wewatch_collab::{rooms::NewPlainInvite, PrimaryKey};

use crate::{
    auth::Session,
    context::ServerContext,
    errors::ServerResult,
    schemas::{NewInviteSchema, ValidatedJson},
    serialized::{Invite, InviteDetails, RoomMember, ToSerialized},
    Router,
};

#[utoipa::path(
    post,
    path = "/api/rooms/{id}/invites",
    tag = "invites",
    request_body = NewInviteSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 201, body = Invite)
    )
)]
async fn create_invite(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<NewInviteSchema>,
) -> ServerResult<(StatusCode, Json<Invite>)> {
    let invite = context
        .collab
        .invites
        .create(
            room_id,
            &session.user,
            NewPlainInvite {
                invitee_id: body.invitee_id,
                expires_in: body.expires_in(),
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(invite.to_serialized())))
}

#[utoipa::path(
    get,
    path = "/api/rooms/{id}/invites",
    tag = "invites",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<Invite>)
    )
)]
async fn list_invites(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<PrimaryKey>,
) -> ServerResult<Json<Vec<Invite>>> {
    let invites = context.collab.invites.list(room_id, &session.user).await?;

    Ok(Json(invites.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/api/invites/{token}",
    tag = "invites",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = InviteDetails, description = "The invite and the room it leads to")
    )
)]
async fn invite(
    _session: Session,
    context: ServerContext,
    Path(token): Path<String>,
) -> ServerResult<Json<InviteDetails>> {
    let (invite, room) = context.collab.invites.invite(&token).await?;

    Ok(Json(InviteDetails {
        invite: invite.to_serialized(),
        room: room.to_serialized(),
    }))
}

#[utoipa::path(
    post,
    path = "/api/invites/{token}/accept",
    tag = "invites",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = RoomMember),
        (status = 409, description = "User is already a member of this room")
    )
)]
async fn accept_invite(
    session: Session,
    context: ServerContext,
    Path(token): Path<String>,
) -> ServerResult<Json<RoomMember>> {
    let member = context.collab.invites.accept(&token, &session.user).await?;

    Ok(Json(member.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/invites/{token}/decline",
    tag = "invites",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Invite)
    )
)]
async fn decline_invite(
    session: Session,
    context: ServerContext,
    Path(token): Path<String>,
) -> ServerResult<Json<Invite>> {
    let invite = context.collab.invites.decline(&token, &session.user).await?;

    Ok(Json(invite.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/api/invites/{token}",
    tag = "invites",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "Invite was revoked by its inviter or the host")
    )
)]
async fn revoke_invite(
    session: Session,
    context: ServerContext,
    Path(token): Path<String>,
) -> ServerResult<StatusCode> {
    context.collab.invites.revoke(&token, &session.user).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Routes under `/api/rooms`
pub fn room_router() -> Router {
    Router::new().route("/:id/invites", post(create_invite).get(list_invites))
}

/// Routes under `/api/invites`
pub fn router() -> Router {
    Router::new()
        .route("/:token", get(invite).delete(revoke_invite))
        .route("/:token/accept", post(accept_invite))
        .route("/:token/decline", post(decline_invite))
}

#[cfg(test)]
mod test {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::test_support::TestServer;

    #[tokio::test]
    async fn invites_are_accepted_once() {
        let server = TestServer::new();
        let (host_user, host) = server.user("host").await;
        let (_, guest) = server.user("guest").await;

        let room = server
            .collab()
            .rooms
            .create_room(&host_user, "Secret screening".to_string(), String::new(), false)
            .await
            .unwrap();

        let (status, invite) = server
            .call(
                Method::POST,
                &format!("/api/rooms/{}/invites", room.id),
                Some(&host),
                Some(json!({ "expires_in_hours": 24 })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(invite["status"], "pending");
        assert!(invite["expires_at"].is_string());

        let token = invite["token"].as_str().unwrap();

        let (status, details) = server
            .call(Method::GET, &format!("/api/invites/{token}"), Some(&guest), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(details["room"]["name"], "Secret screening");

        let accept = format!("/api/invites/{token}/accept");

        let (status, member) = server.call(Method::POST, &accept, Some(&guest), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(member["role"], "member");

        let (status, message) = server.call(Method::POST, &accept, Some(&guest), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(message.as_str().unwrap().contains("already a member"));
    }

    #[tokio::test]
    async fn personal_invites_belong_to_the_invitee() {
        let server = TestServer::new();
        let (host_user, host) = server.user("host").await;
        let (invitee_user, invitee) = server.user("invitee").await;
        let (_, stranger) = server.user("stranger").await;

        let room = server
            .collab()
            .rooms
            .create_room(&host_user, "Secret screening".to_string(), String::new(), false)
            .await
            .unwrap();

        let (_, invite) = server
            .call(
                Method::POST,
                &format!("/api/rooms/{}/invites", room.id),
                Some(&host),
                Some(json!({ "invitee_id": invitee_user.id })),
            )
            .await;
        let token = invite["token"].as_str().unwrap();

        let (status, _) = server
            .call(
                Method::POST,
                &format!("/api/invites/{token}/accept"),
                Some(&stranger),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, declined) = server
            .call(
                Method::POST,
                &format!("/api/invites/{token}/decline"),
                Some(&invitee),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(declined["status"], "declined");

        let (status, _) = server
            .call(Method::DELETE, &format!("/api/invites/{token}"), Some(&host), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = server
            .call(Method::GET, &format!("/api/invites/{token}"), Some(&host), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
