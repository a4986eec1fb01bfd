use std::time::Duration;

use axum::{
    async_trait,
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        FromRef, FromRequestParts, Path,
    },
    http::request::Parts,
    response::Response,
    routing::get,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use log::{debug, warn};
use tokio::time::{interval, timeout, MissedTickBehavior};
use wewatch_collab::{rooms::RoomConnectionHandle, Outbox, PrimaryKey, UserData};

use crate::{
    auth::query_token,
    context::ServerContext,
    errors::{ServerError, ServerResult},
    Router,
};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// The user of a socket upgrade, authenticated by `?token=` alone
pub struct SocketUser(pub UserData);

#[async_trait]
impl<S> FromRequestParts<S> for SocketUser
where
    S: Send + Sync,
    ServerContext: FromRef<S>,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let context = ServerContext::from_ref(state);

        let token = query_token(parts).ok_or(ServerError::Unauthorized("Missing token"))?;
        let user = context.collab.auth.user_from_token(&token).await?;

        Ok(Self(user))
    }
}

#[utoipa::path(
    get,
    path = "/api/rooms/{id}/ws",
    tag = "rooms",
    params(
        ("token" = String, Query, description = "The token issued at login")
    ),
    responses(
        (status = 101, description = "Switches to a websocket of json frames shaped { type, data }"),
        (status = 401, description = "The token is missing or invalid")
    )
)]
async fn connect(
    context: ServerContext,
    SocketUser(user): SocketUser,
    Path(room_id): Path<PrimaryKey>,
    upgrade: WebSocketUpgrade,
) -> ServerResult<Response> {
    let handle = context.collab.rooms.connect(room_id, &user).await?;

    Ok(upgrade.on_upgrade(move |socket| serve_socket(socket, handle)))
}

/// Runs a connection until either side is done, then unregisters it
async fn serve_socket(socket: WebSocket, mut handle: RoomConnectionHandle) {
    let Some(outbox) = handle.take_outbox() else {
        return;
    };

    let (sender, receiver) = socket.split();
    let writer = tokio::spawn(write_frames(sender, outbox));

    read_frames(receiver, &handle).await;

    // Unregistering closes the outbox, which lets the writer finish
    drop(handle);

    if let Err(e) = writer.await {
        warn!("Socket writer failed: {}", e);
    }
}

async fn read_frames(mut receiver: SplitStream<WebSocket>, handle: &RoomConnectionHandle) {
    let connection = handle.connection();

    loop {
        let message = match timeout(READ_TIMEOUT, receiver.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                debug!("Connection {} errored: {}", connection.id, e);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(
                    "Connection {} of {} timed out",
                    connection.id, connection.username
                );
                break;
            }
        };

        match message {
            Message::Text(text) => {
                if let Err(e) = handle.handle_text(&text).await {
                    warn!(
                        "Dropped frame from {} in room {}: {}",
                        connection.username, connection.room_id, e
                    );
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Drains the outbox into the socket, pinging while it is idle
async fn write_frames(mut sender: SplitSink<WebSocket, Message>, mut outbox: Outbox) {
    let mut ping = interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick completes immediately
    ping.tick().await;

    loop {
        tokio::select! {
            frame = outbox.recv() => {
                let Some(frame) = frame else {
                    break;
                };

                if sender.send(Message::Text(frame.to_string())).await.is_err() {
                    return;
                }
            }
            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    return;
                }
            }
        }
    }

    let close = CloseFrame {
        code: close_code::NORMAL,
        reason: "".into(),
    };

    let _ = sender.send(Message::Close(Some(close))).await;
}

pub fn router() -> Router {
    Router::new().route("/:id/ws", get(connect))
}

#[cfg(test)]
mod test {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };

    use crate::test_support::TestServer;

    fn upgrade_request(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn refuses_upgrades_without_a_token() {
        let server = TestServer::new();
        let (host_user, host) = server.user("host").await;

        let room = server
            .collab()
            .rooms
            .create_room(&host_user, "Movie night".to_string(), String::new(), true)
            .await
            .unwrap();

        let response = server
            .send(upgrade_request(&format!("/api/rooms/{}/ws", room.id)))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = server
            .send(upgrade_request(&format!(
                "/api/rooms/{}/ws?token=not-a-token",
                room.id
            )))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Bearer headers aren't accepted on upgrades
        let mut request = upgrade_request(&format!("/api/rooms/{}/ws", room.id));
        request.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {host}").parse().unwrap(),
        );
        assert_eq!(server.send(request).await.status(), StatusCode::UNAUTHORIZED);
    }
}
