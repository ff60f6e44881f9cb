use std::error::Error;

use poem::error::ResponseError;

#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("persona {0} not found")]
    PersonaNotFound(i64),
    #[error("persona {0} is not eligible for restore")]
    RestoreNotEligible(i64),
    #[error("failed to parse URL: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("deserialization failed: {0}")]
    DeserializeJson(#[from] serde_json::Error),
    #[error("inconsistent pool state")]
    InconsistentState,
    #[error(transparent)]
    Other(Box<dyn Error + Send + Sync>),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl poem_openapi::ApiResponse for PoolError {
    fn meta() -> poem_openapi::registry::MetaResponses {
        poem_openapi::registry::MetaResponses {
            responses: Vec::new(),
        }
    }

    fn register(_registry: &mut poem_openapi::registry::Registry) {}
}

impl ResponseError for PoolError {
    fn status(&self) -> poem::http::StatusCode {
        match self {
            PoolError::PersonaNotFound(_) => poem::http::StatusCode::NOT_FOUND,
            PoolError::RestoreNotEligible(_) => poem::http::StatusCode::CONFLICT,
            _ => poem::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl PoolError {
    pub fn other<E: Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Other(Box::new(err))
    }
}
