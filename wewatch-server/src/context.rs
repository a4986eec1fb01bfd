use std::{convert::Infallible, path::Path, sync::Arc};

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use wewatch_collab::Collab;

#[derive(Clone, FromRef)]
pub struct ServerContext {
    pub collab: Arc<Collab>,
}

impl ServerContext {
    pub fn new(collab: Arc<Collab>) -> Self {
        Self { collab }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.collab.config().upload_dir
    }
}

/// Lets handlers take the context directly instead of through `State`
#[async_trait]
impl FromRequestParts<ServerContext> for ServerContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        _parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        Ok(state.clone())
    }
}
