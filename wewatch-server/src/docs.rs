use std::borrow::BorrowMut;

use axum::{response::IntoResponse, Json};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::{auth, chat, invites, rooms, schemas, serialized, sessions, theaters, ws};

#[derive(OpenApi)]
#[openapi(
    modifiers(&Security),
    info(
        description = "wewatch-server exposes rooms, watch sessions, theaters and broadcasting for watch parties"
    ),
    paths(
        auth::register,
        auth::login,
        auth::logout,
        auth::me,
        rooms::list_rooms,
        rooms::create_room,
        rooms::room,
        rooms::delete_room,
        rooms::join_room,
        rooms::members,
        rooms::instant_watch,
        rooms::start_session,
        rooms::active_session,
        rooms::end_session,
        rooms::update_status,
        rooms::update_loop_mode,
        rooms::room_media,
        rooms::upload_room_media,
        rooms::tv,
        rooms::create_tv_content,
        rooms::remove_tv_content,
        chat::post_room_message,
        chat::history,
        chat::edit_message,
        chat::delete_message,
        chat::remove_message,
        chat::react,
        invites::create_invite,
        invites::list_invites,
        invites::invite,
        invites::accept_invite,
        invites::decline_invite,
        invites::revoke_invite,
        sessions::watch_session,
        sessions::post_session_message,
        sessions::theaters,
        sessions::join_theater,
        sessions::assign_seat,
        sessions::leave_seat,
        sessions::request_broadcast,
        sessions::grant_broadcast,
        sessions::revoke_broadcast,
        sessions::decline_broadcast,
        sessions::active_broadcasters,
        sessions::broadcast_requests,
        sessions::media_token,
        sessions::session_media,
        sessions::upload_session_media,
        sessions::delete_session_media,
        theaters::rename_theater,
        theaters::occupancy,
        ws::connect,
    ),
    components(schemas(
        schemas::LoginSchema,
        schemas::RegisterSchema,
        schemas::NewRoomSchema,
        schemas::WatchTypeSchema,
        schemas::InstantWatchSchema,
        schemas::NewSessionSchema,
        schemas::RoomStatusSchema,
        schemas::LoopModeSchema,
        schemas::LoopModeUpdateSchema,
        schemas::ChatSchema,
        schemas::ReactionSchema,
        schemas::NewInviteSchema,
        schemas::SeatSchema,
        schemas::TheaterNameSchema,
        schemas::BroadcastRequestSchema,
        schemas::BroadcastTargetSchema,
        schemas::BroadcastDeclineSchema,
        schemas::RequestStatusSchema,
        schemas::TvKindSchema,
        schemas::NewTvContentSchema,
        serialized::User,
        serialized::LoginResult,
        serialized::Room,
        serialized::RoomMember,
        serialized::WatchSession,
        serialized::InstantWatch,
        serialized::EndedSession,
        serialized::ChatMessage,
        serialized::Reaction,
        serialized::Invite,
        serialized::InviteDetails,
        serialized::TvContent,
        serialized::Media,
        serialized::Theater,
        serialized::Seat,
        serialized::Occupancy,
        serialized::Broadcaster,
        serialized::BroadcastRequest,
        serialized::BroadcastPermission,
        serialized::MediaToken,
    ))
)]
pub struct ApiDoc;

struct Security;

impl Modify for Security {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.borrow_mut() {
            let scheme = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("Bearer <token>")
                .build();

            components.add_security_scheme("BearerAuth", SecurityScheme::Http(scheme))
        }
    }
}

pub async fn docs() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
