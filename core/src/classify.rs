//! Response classification.
//!
//! Every response passes through two pure steps, in order: `decode` turns the
//! raw body into a `Body`, then `classify` maps the status code onto success
//! or an `ApiError`. `process` runs both.

use crate::error::ApiError;
use crate::http::HttpResponse;
use crate::types::{ApiResponse, Body};

/// Decode a response body. Never fails: unparseable bodies are kept as `Raw`.
///
/// JSON parsing is attempted when the content type mentions `json` or when
/// no content type was sent at all.
pub fn decode(response: HttpResponse) -> ApiResponse {
    let body = if response.body.trim().is_empty() {
        Body::Empty
    } else {
        let json_like = response
            .header("content-type")
            .map_or(true, |ct| ct.to_ascii_lowercase().contains("json"));
        if json_like {
            match serde_json::from_str(&response.body) {
                Ok(value) => Body::Json(value),
                Err(_) => Body::Raw(response.body),
            }
        } else {
            Body::Raw(response.body)
        }
    };

    ApiResponse {
        status: response.status,
        headers: response.headers,
        body,
    }
}

/// Map the status code of a decoded response onto success or an error kind.
pub fn classify(response: ApiResponse) -> Result<ApiResponse, ApiError> {
    match response.status {
        200..=299 => Ok(response),
        404 => Err(ApiError::NotFound),
        400..=499 => Err(ApiError::Client {
            status: response.status,
            body: response.body.to_string(),
        }),
        500..=599 => Err(ApiError::Server {
            status: response.status,
            body: response.body.to_string(),
        }),
        _ => Err(ApiError::UnexpectedStatus {
            status: response.status,
            body: response.body.to_string(),
        }),
    }
}

/// `decode` followed by `classify`.
pub fn process(response: HttpResponse) -> Result<ApiResponse, ApiError> {
    classify(decode(response))
}
