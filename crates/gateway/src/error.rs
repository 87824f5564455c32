//! Gateway errors and their HTTP mapping.
//!
//! Handlers return [`ApiError`]. Only messages written for the caller reach
//! the response body; upstream failures are logged in full and answered with
//! a generic message.

use std::borrow::Cow;

use {
    axum::{
        Json,
        extract::rejection::JsonRejection,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    thiserror::Error,
    tracing::error,
};

pub const NOT_CONNECTED: &str = "WhatsApp session is not connected";

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Contacts(#[from] rollcall_contacts::Error),

    #[error(transparent)]
    WhatsApp(#[from] rollcall_whatsapp::Error),

    #[error(transparent)]
    Mail(#[from] rollcall_mail::Error),

    #[error(transparent)]
    Cron(#[from] rollcall_cron::Error),

    #[error("no WhatsApp channel is configured")]
    NoChannel,

    #[error("email delivery is not configured")]
    MailDisabled,

    /// Nothing in the batch was delivered.
    #[error("mail batch failed for all {failed} recipients")]
    MailBatchFailed { failed: usize },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── HTTP mapping ─────────────────────────────────────────────────────────────

/// An error response: `{"error": message}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: Cow<'static, str>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    /// An upstream failure answered with a generic message.
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn not_connected() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, NOT_CONNECTED)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Map a domain error. `fallback` is what the caller sees when the
    /// failure is ours rather than theirs.
    pub fn from_error(error: Error, fallback: &'static str) -> Self {
        use {rollcall_contacts::Error as C, rollcall_whatsapp::Error as W};

        match error {
            Error::Contacts(C::Invalid { message, .. }) => Self::bad_request(message),
            Error::Contacts(C::Conflict { .. }) => Self::conflict("User already registered"),
            Error::Contacts(C::NotFound { .. }) => Self::not_found("User not found"),
            Error::WhatsApp(W::NoSession | W::StaleHandle { .. }) => Self::not_connected(),
            Error::WhatsApp(W::InvalidDestination { destination }) => {
                Self::bad_request(format!("Invalid WhatsApp destination: {destination}"))
            },
            Error::Cron(rollcall_cron::Error::JobNotFound { .. }) => {
                Self::not_found("Announcement not found")
            },
            Error::Cron(e) if e.is_invalid_input() => Self::bad_request(e.to_string()),
            Error::NoChannel => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "WhatsApp channel is not configured",
            ),
            Error::MailDisabled => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "Email delivery is not configured",
            ),
            other => {
                error!(error = %other, "{fallback}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, fallback)
            },
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self::from_error(error, "Internal server error")
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

/// Attach a client-facing fallback message to a fallible call.
pub trait OrApiError<T> {
    fn or_api(self, fallback: &'static str) -> std::result::Result<T, ApiError>;
}

impl<T, E: Into<Error>> OrApiError<T> for std::result::Result<T, E> {
    fn or_api(self, fallback: &'static str) -> std::result::Result<T, ApiError> {
        self.map_err(|e| ApiError::from_error(e.into(), fallback))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn contacts(e: rollcall_contacts::Error) -> Error {
        Error::Contacts(e)
    }

    #[rstest]
    #[case(contacts(rollcall_contacts::Error::invalid("email", "Email address is invalid")), StatusCode::BAD_REQUEST, "Email address is invalid")]
    #[case(contacts(rollcall_contacts::Error::conflict("4477")), StatusCode::CONFLICT, "User already registered")]
    #[case(contacts(rollcall_contacts::Error::not_found("4477")), StatusCode::NOT_FOUND, "User not found")]
    #[case(Error::WhatsApp(rollcall_whatsapp::Error::NoSession), StatusCode::SERVICE_UNAVAILABLE, NOT_CONNECTED)]
    #[case(Error::WhatsApp(rollcall_whatsapp::Error::StaleHandle { lease: 1, current: 2 }), StatusCode::SERVICE_UNAVAILABLE, NOT_CONNECTED)]
    #[case(Error::Cron(rollcall_cron::Error::job_not_found("x")), StatusCode::NOT_FOUND, "Announcement not found")]
    #[case(Error::Cron(rollcall_cron::Error::invalid("scheduled time is in the past")), StatusCode::BAD_REQUEST, "scheduled time is in the past")]
    fn maps_domain_errors(
        #[case] error: Error,
        #[case] status: StatusCode,
        #[case] message: &str,
    ) {
        let api = ApiError::from_error(error, "Failed");
        assert_eq!(api.status(), status);
        assert_eq!(api.message(), message);
    }

    #[test]
    fn upstream_detail_is_not_echoed() {
        let api = ApiError::from_error(
            Error::WhatsApp(rollcall_whatsapp::Error::send_failed("socket hang up at 10.0.0.7")),
            "Failed to send contact file",
        );
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.message(), "Failed to send contact file");

        let api = ApiError::from(Error::message("database is locked"));
        assert_eq!(api.message(), "Internal server error");
    }
}
