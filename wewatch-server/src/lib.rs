use std::{
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
};
use log::{info, warn};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use wewatch_collab::{Collab, Config};

mod auth;
mod chat;
mod context;
mod docs;
mod errors;
mod invites;
mod rooms;
mod schemas;
mod serialized;
mod sessions;
mod theaters;
mod uploads;
mod ws;

pub use context::ServerContext;
pub use errors::{ServerError, ServerResult};

pub type Router = axum::Router<ServerContext>;

/// Builds the complete application with every route and layer
pub fn app(context: ServerContext) -> axum::Router {
    let api_router = Router::new()
        .nest("/auth", auth::router())
        .nest(
            "/rooms",
            rooms::router()
                .merge(chat::router())
                .merge(invites::room_router())
                .merge(ws::router()),
        )
        .nest("/sessions", sessions::router())
        .nest("/theaters", theaters::router())
        .nest("/invites", invites::router())
        .route("/docs.json", get(docs::docs));

    Router::new()
        .nest("/api", api_router)
        .merge(uploads::router())
        .layer(cors(context.collab.config()))
        .with_state(context)
}

fn cors(config: &Config) -> CorsLayer {
    let origin = HeaderValue::from_str(&config.allowed_origin).unwrap_or_else(|_| {
        warn!(
            "Allowed origin \"{}\" is not a valid header value, using {}",
            config.allowed_origin,
            Config::DEFAULT_ORIGIN
        );
        HeaderValue::from_static(Config::DEFAULT_ORIGIN)
    });

    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::RANGE])
}

/// Starts the wewatch server
pub async fn run_server(collab: Arc<Collab>) -> std::io::Result<()> {
    let port = collab.config().port;
    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();

    let listener = TcpListener::bind(&addr).await?;

    info!("Listening on {}", addr);

    axum::serve(listener, app(ServerContext::new(collab))).await
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        response::Response,
    };
    use serde_json::Value;
    use tower::ServiceExt;
    use wewatch_collab::{
        Collab, Config, LocalFileStore, MemoryDatabase, NewPlainUser, SystemClock, UserData,
    };

    use crate::{app, ServerContext};

    /// The full router over an in-memory store and a temporary upload directory
    pub struct TestServer {
        pub context: ServerContext,
        pub upload_dir: tempfile::TempDir,
    }

    impl TestServer {
        pub fn new() -> Self {
            let upload_dir = tempfile::tempdir().expect("temp dir is created");

            let mut config = Config::with_secret("test-secret");
            config.upload_dir = upload_dir.path().to_path_buf();

            let collab = Collab::new(
                config,
                Arc::new(MemoryDatabase::new()),
                Arc::new(LocalFileStore::new(upload_dir.path())),
                Arc::new(SystemClock),
            );

            Self {
                context: ServerContext::new(Arc::new(collab)),
                upload_dir,
            }
        }

        pub fn collab(&self) -> &Collab {
            &self.context.collab
        }

        pub async fn send(&self, request: Request<Body>) -> Response {
            app(self.context.clone())
                .oneshot(request)
                .await
                .expect("router is infallible")
        }

        /// Sends a json request and returns the status with the parsed body.
        /// Bodies that aren't json come back as a string value.
        pub async fn call(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut request = Request::builder().method(method).uri(uri);

            if let Some(token) = token {
                request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }

            let request = match body {
                Some(body) => request
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string())),
                None => request.body(Body::empty()),
            }
            .unwrap();

            let response = self.send(request).await;
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();

            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes)
                    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
            };

            (status, value)
        }

        /// Registers `<name>@example.com` with the password "correct horse"
        pub async fn user(&self, name: &str) -> (UserData, String) {
            let auth = &self.collab().auth;

            let user = auth
                .register(NewPlainUser {
                    username: name.to_string(),
                    email: format!("{name}@example.com"),
                    password: "correct horse".to_string(),
                })
                .await
                .expect("user is registered");

            let token = auth.issue_token(&user).expect("token is issued");

            (user, token)
        }
    }
}

#[cfg(test)]
mod test {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };

    use crate::test_support::TestServer;

    #[tokio::test]
    async fn cors_allows_the_configured_origin_with_credentials() {
        let server = TestServer::new();

        let response = server
            .send(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/rooms")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;

        let headers = response.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn serves_the_api_document() {
        let server = TestServer::new();

        let (status, body) = server.call(Method::GET, "/api/docs.json", None, None).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/api/rooms"].is_object());
        assert!(body["paths"]["/api/sessions/{id}/broadcast/grant"].is_object());
    }
}
