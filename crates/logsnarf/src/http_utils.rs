// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    header,
    http::{self, HeaderMap},
    Response, StatusCode,
};
use serde_json::json;
use tracing::{debug, error, warn};

pub type HttpResponse = Response<Full<Bytes>>;

/// Logs the given message and returns it as the JSON body of a response
/// with the given status code.
///
/// Success statuses are logged at debug, client errors at warn and
/// everything else at error.
///
/// Response body format:
/// {
///     "message": message
/// }
pub fn log_and_create_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    if status.is_success() {
        debug!("{message}");
    } else if status.is_client_error() {
        warn!("{message}");
    } else {
        error!("{message}");
    }
    let body = json!({ "message": message }).to_string();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
}

/// Empty response, for statuses such as 204 that must not carry a body.
pub fn create_empty_http_response(status: StatusCode) -> http::Result<HttpResponse> {
    Response::builder().status(status).body(Full::new(Bytes::new()))
}

/// Rejects requests whose declared Content-Length exceeds
/// `max_content_length`.
///
/// Returns None if the request may proceed. Chunked uploads and requests
/// without the header are let through; their size is enforced while the body
/// is read.
pub fn verify_request_content_length(
    header_map: &HeaderMap,
    max_content_length: usize,
    error_message_prefix: &str,
) -> Option<http::Result<HttpResponse>> {
    let content_length_header = header_map.get(header::CONTENT_LENGTH)?;
    let content_length = match content_length_header
        .to_str()
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        Some(res) => res,
        None => {
            return Some(log_and_create_http_response(
                &format!("{error_message_prefix}: Invalid Content-Length header"),
                StatusCode::BAD_REQUEST,
            ));
        }
    };
    if content_length > max_content_length {
        return Some(log_and_create_http_response(
            &format!("{error_message_prefix}: Payload too large"),
            StatusCode::PAYLOAD_TOO_LARGE,
        ));
    }
    None
}
