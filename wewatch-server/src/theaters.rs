use axum::{
    extract::Path,
    routing::{get, put},
    Json,
};
use wewatch_collab::PrimaryKey;

use crate::{
    auth::Session,
    context::ServerContext,
    errors::ServerResult,
    schemas::{TheaterNameSchema, ValidatedJson},
    serialized::{Occupancy, Theater, ToSerialized},
    Router,
};

#[utoipa::path(
    put,
    path = "/api/theaters/{id}/name",
    tag = "theaters",
    request_body = TheaterNameSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Theater),
        (status = 403, description = "Only the session host can rename theaters")
    )
)]
async fn rename_theater(
    session: Session,
    context: ServerContext,
    Path(theater_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<TheaterNameSchema>,
) -> ServerResult<Json<Theater>> {
    let theater = context
        .collab
        .theaters
        .rename(theater_id, &session.user, body.name)
        .await?;

    Ok(Json(theater.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/api/theaters/{id}/occupancy",
    tag = "theaters",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Occupancy)
    )
)]
async fn occupancy(
    _session: Session,
    context: ServerContext,
    Path(theater_id): Path<PrimaryKey>,
) -> ServerResult<Json<Occupancy>> {
    let occupancy = context.collab.theaters.occupancy(theater_id).await?;

    Ok(Json(occupancy.to_serialized()))
}

pub fn router() -> Router {
    Router::new()
        .route("/:id/name", put(rename_theater))
        .route("/:id/occupancy", get(occupancy))
}

#[cfg(test)]
mod test {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use wewatch_collab::WatchType;

    use crate::test_support::TestServer;

    #[tokio::test]
    async fn hosts_rename_and_everyone_sees_occupancy() {
        let server = TestServer::new();
        let (host_user, host) = server.user("host").await;
        let (guest_user, guest) = server.user("guest").await;

        let room = server
            .collab()
            .rooms
            .create_room(&host_user, "Movie night".to_string(), String::new(), true)
            .await
            .unwrap();
        server.collab().rooms.join(room.id, &guest_user).await.unwrap();

        let session = server
            .collab()
            .sessions
            .start(room.id, &host_user, WatchType::Cinema3d)
            .await
            .unwrap();

        let seat = server
            .collab()
            .theaters
            .join(session.session_id, &guest_user)
            .await
            .unwrap();
        let theater = format!("/api/theaters/{}", seat.theater_id);

        let (status, _) = server
            .call(
                Method::PUT,
                &format!("{theater}/name"),
                Some(&guest),
                Some(json!({ "name": "Balcony" })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, renamed) = server
            .call(
                Method::PUT,
                &format!("{theater}/name"),
                Some(&host),
                Some(json!({ "name": "Balcony" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(renamed["name"], "Balcony");

        let (status, occupancy) = server
            .call(Method::GET, &format!("{theater}/occupancy"), Some(&guest), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(occupancy["theater"]["name"], "Balcony");
        assert_eq!(occupancy["seats"][0]["user_id"], guest_user.id);

        let (_, reset) = server
            .call(Method::PUT, &format!("{theater}/name"), Some(&host), Some(json!({})))
            .await;
        assert_eq!(reset["name"], "Theater 1");
    }
}
