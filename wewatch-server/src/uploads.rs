use std::collections::HashMap;

use axum::{
    extract::{multipart::Field, Multipart, Path, Request},
    http::{header, HeaderValue, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use tower::ServiceExt;
use tower_http::services::ServeDir;
use wewatch_collab::{mime_for_path, sessions::UploadedFile, SpooledFile, SPOOL_DIR};

use crate::{
    context::ServerContext,
    errors::{ServerError, ServerResult},
    Router,
};

/// A multipart upload: the `file` part plus every text part by name
pub struct UploadForm {
    pub file: UploadedFile,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    /// Reads every part, spooling the file to disk as it arrives
    pub async fn read(context: &ServerContext, mut multipart: Multipart) -> ServerResult<Self> {
        let mut file = None;
        let mut fields = HashMap::new();

        while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
            let name = field.name().unwrap_or_default().to_string();

            if name == "file" {
                file = Some(read_file(context, field).await?);
            } else {
                fields.insert(name, field.text().await.map_err(bad_multipart)?);
            }
        }

        let file = file.ok_or_else(|| ServerError::BadRequest("Missing file".to_string()))?;

        Ok(Self { file, fields })
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

async fn read_file(context: &ServerContext, mut field: Field<'_>) -> ServerResult<UploadedFile> {
    let file_name = field
        .file_name()
        .map(ToString::to_string)
        .ok_or_else(|| ServerError::BadRequest("File has no name".to_string()))?;

    let mut writer = SpooledFile::create(&context.upload_dir().join(SPOOL_DIR)).await?;

    while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
        writer.write(&chunk).await?;
    }

    Ok(UploadedFile {
        file_name,
        contents: writer.finish().await?,
    })
}

fn bad_multipart(error: impl ToString) -> ServerError {
    ServerError::BadRequest(error.to_string())
}

/// Serves an uploaded file, honoring range requests
async fn serve_upload(
    context: ServerContext,
    Path(path): Path<String>,
    mut request: Request,
) -> ServerResult<Response> {
    // Covers parent segments and the upload spool
    if path.split(['/', '\\']).any(|segment| segment.starts_with('.')) {
        return Err(ServerError::BadRequest("Invalid path".to_string()));
    }

    let relative = request
        .uri()
        .path()
        .strip_prefix("/uploads")
        .unwrap_or_default()
        .to_string();

    *request.uri_mut() = relative
        .parse::<Uri>()
        .map_err(|_| ServerError::BadRequest("Invalid path".to_string()))?;

    let mut response = ServeDir::new(context.upload_dir())
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {})
        .into_response();

    if response.status().is_success() {
        if let Some(mime) = mime_for_path(&path) {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
        }
    }

    Ok(response)
}

pub fn router() -> Router {
    Router::new().route("/uploads/*path", get(serve_upload))
}

#[cfg(test)]
mod test {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };

    use crate::test_support::TestServer;

    fn write_upload(server: &TestServer, relative: &str, data: &[u8]) {
        let path = server.upload_dir.path().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    #[tokio::test]
    async fn serves_ranges_with_video_types() {
        let server = TestServer::new();
        write_upload(&server, "media/1/abc-film.mkv", b"0123456789");

        let response = server
            .send(
                Request::get("/uploads/media/1/abc-film.mkv")
                    .header(header::RANGE, "bytes=2-5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "video/x-matroska"
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"2345");
    }

    #[tokio::test]
    async fn rejects_parent_segments() {
        let server = TestServer::new();

        let response = server
            .send(
                Request::get("/uploads/media/../../secret.mp4")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        write_upload(&server, ".spool/partial", b"0123");
        let spooled = server
            .send(Request::get("/uploads/.spool/partial").body(Body::empty()).unwrap())
            .await;
        assert_eq!(spooled.status(), StatusCode::BAD_REQUEST);

        let missing = server
            .send(Request::get("/uploads/media/nothing.mp4").body(Body::empty()).unwrap())
            .await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
