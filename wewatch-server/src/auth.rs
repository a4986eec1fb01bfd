use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Query},
    http::{header, request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use log::info;
use serde::Deserialize;
use wewatch_collab::{Credentials, NewPlainUser, UserData};

use crate::{
    context::ServerContext,
    errors::{ServerError, ServerResult},
    schemas::{LoginSchema, RegisterSchema, ValidatedJson},
    serialized::{LoginResult, ToSerialized, User},
    Router,
};

/// The cookie login tokens are stored in
pub const TOKEN_COOKIE: &str = "wewatch_token";

/// The user behind a request, resolved from its token
pub struct Session {
    pub user: UserData,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Finds the token of a request. The Authorization header wins over the cookie,
/// which wins over the query string.
fn request_token(parts: &Parts) -> Result<Option<String>, ServerError> {
    if let Some(authorization) = parts.headers.get(header::AUTHORIZATION) {
        let value = authorization
            .to_str()
            .map_err(|_| ServerError::Unauthorized("Authorization must be Bearer"))?;

        let parts: Vec<_> = value.split_ascii_whitespace().collect();

        return match parts.as_slice() {
            ["Bearer", token] => Ok(Some(token.to_string())),
            _ => Err(ServerError::Unauthorized("Authorization must be Bearer")),
        };
    }

    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get(TOKEN_COOKIE) {
        return Ok(Some(cookie.value().to_string()));
    }

    Ok(query_token(parts))
}

/// Reads `?token=` and nothing else
pub fn query_token(parts: &Parts) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|q| q.0.token)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
    ServerContext: FromRef<S>,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let context = ServerContext::from_ref(state);

        let token = request_token(parts)?.ok_or(ServerError::Unauthorized("Missing authorization"))?;
        let user = context.collab.auth.user_from_token(&token).await?;

        Ok(Self { user })
    }
}

fn token_cookie(context: &ServerContext, token: String) -> Cookie<'static> {
    let lifetime = context.collab.config().token_lifetime;

    Cookie::build((TOKEN_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(lifetime.num_seconds()))
        .build()
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "auth",
    request_body = RegisterSchema,
    responses(
        (status = 201, body = LoginResult),
        (status = 409, description = "Username or email is taken")
    )
)]
async fn register(
    context: ServerContext,
    jar: CookieJar,
    ValidatedJson(body): ValidatedJson<RegisterSchema>,
) -> ServerResult<impl IntoResponse> {
    let user = context
        .collab
        .auth
        .register(NewPlainUser {
            username: body.username,
            email: body.email,
            password: body.password,
        })
        .await?;

    let token = context.collab.auth.issue_token(&user)?;

    info!("{} registered", user.username);

    let result = LoginResult {
        user: user.to_serialized(),
        token: token.clone(),
    };

    Ok((
        StatusCode::CREATED,
        jar.add(token_cookie(&context, token)),
        Json(result),
    ))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginSchema,
    responses(
        (status = 200, body = LoginResult),
        (status = 401, description = "Invalid credentials")
    )
)]
async fn login(
    context: ServerContext,
    jar: CookieJar,
    ValidatedJson(body): ValidatedJson<LoginSchema>,
) -> ServerResult<impl IntoResponse> {
    let (user, token) = context
        .collab
        .auth
        .login(Credentials {
            email: body.email,
            password: body.password,
        })
        .await?;

    let result = LoginResult {
        user: user.to_serialized(),
        token: token.clone(),
    };

    Ok((jar.add(token_cookie(&context, token)), Json(result)))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "auth",
    responses(
        (status = 204, description = "The token cookie was cleared")
    )
)]
async fn logout(jar: CookieJar) -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        jar.remove(Cookie::build(TOKEN_COOKIE).path("/")),
    )
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = User),
        (status = 401, description = "Missing or invalid token")
    )
)]
async fn me(session: Session) -> Json<User> {
    Json(session.user.to_serialized())
}

pub fn router() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

#[cfg(test)]
mod test {
    use axum::http::{header, Method, StatusCode};
    use serde_json::json;

    use crate::test_support::TestServer;

    #[tokio::test]
    async fn register_login_and_me() {
        let server = TestServer::new();

        let (status, body) = server
            .call(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({
                    "username": "ada",
                    "email": "ada@example.com",
                    "password": "correct horse"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["username"], "ada");

        let (status, _) = server
            .call(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({
                    "username": "ada2",
                    "email": "ada@example.com",
                    "password": "correct horse"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT, "emails are unique");

        let (status, _) = server
            .call(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": "ada@example.com", "password": "wrong password" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = server
            .call(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": "ada@example.com", "password": "correct horse" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let token = body["token"].as_str().unwrap();
        let (status, me) = server.call(Method::GET, "/api/auth/me", Some(token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn tokens_are_read_from_cookie_and_query() {
        let server = TestServer::new();
        let (_, token) = server.user("ada").await;

        let response = server
            .send(
                axum::http::Request::get("/api/auth/me")
                    .header(header::COOKIE, format!("wewatch_token={token}"))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let (status, _) = server
            .call(Method::GET, &format!("/api/auth/me?token={token}"), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = server.call(Method::GET, "/api/auth/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = server
            .call(Method::GET, "/api/auth/me", Some("not-a-token"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn login_sets_an_http_only_cookie() {
        let server = TestServer::new();
        server.user("ada").await;

        let response = server
            .send(
                axum::http::Request::post("/api/auth/login")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(axum::body::Body::from(
                        json!({ "email": "ada@example.com", "password": "correct horse" }).to_string(),
                    ))
                    .unwrap(),
            )
            .await;

        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();

        assert!(cookie.starts_with("wewatch_token="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=604800"));
    }
}
