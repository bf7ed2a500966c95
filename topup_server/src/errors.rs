use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use log::error;
use thiserror::Error;
use topup_engine::{CreditError, LedgerError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("Authentication Error. {0}")]
    AuthenticationError(String),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("The service is temporarily unavailable. {0}")]
    TemporarilyUnavailable(String),
    #[error("The payment gateway could not complete the request. {0}")]
    GatewayError(String),
    #[error("The webhook could not be processed and was stored for replay. {0}")]
    DeadLettered(String),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationError(_) => StatusCode::UNAUTHORIZED,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::TemporarilyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::GatewayError(_) => StatusCode::BAD_GATEWAY,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DeadLettered(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

impl From<CreditError> for ServerError {
    fn from(e: CreditError) -> Self {
        match e {
            CreditError::Validation(_) => Self::InvalidRequestBody(e.to_string()),
            CreditError::InvalidSignature(_) => Self::AuthenticationError(e.to_string()),
            CreditError::UserNotFound(_) | CreditError::PaymentRecordNotFound(_) | CreditError::ChargeNotFound(_) => {
                Self::NoRecordFound(e.to_string())
            },
            CreditError::LockUnavailable(_) | CreditError::Storage(_) => Self::TemporarilyUnavailable(e.to_string()),
            CreditError::Gateway(_) => Self::GatewayError(e.to_string()),
            CreditError::ConsistencyViolation(_) => {
                error!("🚨️ {e}");
                Self::BackendError(e.to_string())
            },
        }
    }
}

impl From<LedgerError> for ServerError {
    fn from(e: LedgerError) -> Self {
        Self::InitializeError(e.to_string())
    }
}
