use log::error;
use rocket::{http::Status, response::Responder, serde::json::Json, Request};
use serde::Serialize;
use thiserror::Error;

use crate::model::{coordinator::Rejection, ledger::StoreError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

/// The JSON body of every error response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Error {
    pub fn status(&self) -> Status {
        match self {
            Self::Rejected(rejection) => match rejection {
                Rejection::MalformedProof(_) => Status::BadRequest,
                Rejection::InvalidProof(_) => Status::Unauthorized,
                Rejection::PredicateNotSatisfied(_) => Status::Forbidden,
                Rejection::ElectionNotFound(_) => Status::NotFound,
                Rejection::ElectionNotOpen(_) => Status::Locked,
                Rejection::UnknownCandidate(_) => Status::UnprocessableEntity,
                Rejection::AlreadyVoted => Status::Conflict,
                Rejection::StorageUnavailable | Rejection::VerificationTimeout => {
                    Status::ServiceUnavailable
                }
                Rejection::VerifierFault => Status::InternalServerError,
            },
            Self::Store(_) => Status::ServiceUnavailable,
            Self::BadRequest(_) => Status::BadRequest,
            Self::NotFound(_) => Status::NotFound,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Rejected(rejection) => rejection.code(),
            Self::Store(_) => "storage_unavailable",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        // Store details stay in the log.
        let message = match &self {
            Self::Store(e) => {
                error!("Vote store failure: {e}");
                Rejection::StorageUnavailable.to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody::new(self.code(), message);
        (self.status(), Json(body)).respond_to(req)
    }
}
