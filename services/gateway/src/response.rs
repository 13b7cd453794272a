use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use gw_protocol::HttpErrorEnvelope;
use std::fmt::Display;

pub type HttpResponse = Response;

pub(crate) fn json_error(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> HttpResponse {
    (
        status,
        Json(HttpErrorEnvelope {
            code: code.into(),
            message: message.into(),
            details: None,
        }),
    )
        .into_response()
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::BAD_REQUEST, gw_protocol::error_codes::INVALID_ARGS, message)
}

pub fn internal_error(err: impl Display) -> HttpResponse {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, gw_protocol::error_codes::INTERNAL_ERROR, err.to_string())
}

/// The upgrade endpoint's own failure convention: a refused upgrade
/// is reported as a 200 with the error encoded in the body rather than a
/// non-2xx status, since the client that sent a malformed upgrade request
/// is usually a WebSocket library that only surfaces the HTTP status, not
/// the body, on a non-101 response.
pub fn upgrade_refused(code: &str, message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::OK, code, message)
}
