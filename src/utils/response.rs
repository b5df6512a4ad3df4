//! HTTP response construction for the GraphQL endpoint

use http::{header, HeaderValue, Response, StatusCode};

use crate::core::{PipelineError, PipelineResponse};

/// Standard content types
pub mod content_type {
    pub const TEXT_PLAIN: &str = "text/plain";
    pub const APPLICATION_JSON: &str = "application/json";
    pub const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4";
}

pub struct ResponseBuilder;

impl ResponseBuilder {
    pub fn success_http(body: Vec<u8>, content_type: Option<&str>) -> Response<Vec<u8>> {
        Self::with_status(StatusCode::OK, body, content_type)
    }

    pub fn with_status(status: StatusCode, body: Vec<u8>, content_type: Option<&str>) -> Response<Vec<u8>> {
        let mut builder = Response::builder().status(status);

        if let Some(ct) = content_type {
            match HeaderValue::from_str(ct) {
                Ok(header_value) => {
                    builder = builder.header(header::CONTENT_TYPE, header_value);
                }
                Err(e) => {
                    log::error!("Invalid content type '{ct}': {e}");
                }
            }
        }

        builder.body(body).unwrap_or_else(|e| {
            log::error!("Failed to build response: {e}");
            Self::error_http(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        })
    }

    pub fn error_http(status: StatusCode, message: &str) -> Response<Vec<u8>> {
        let mut resp = Response::new(message.as_bytes().to_vec());
        *resp.status_mut() = status;
        resp.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(content_type::TEXT_PLAIN),
        );
        resp
    }

    /// 400 for malformed input, 200 whenever the pipeline ran
    pub fn graphql(response: &PipelineResponse) -> Response<Vec<u8>> {
        let status = if response.malformed {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::OK
        };
        Self::with_status(status, response.to_vec(), Some(content_type::APPLICATION_JSON))
    }

    /// The pipeline could not run at all
    pub fn graphql_failure(err: &PipelineError, debug: bool) -> Response<Vec<u8>> {
        let status = if matches!(err, PipelineError::MalformedInput(_)) {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = serde_json::json!({ "errors": [err.to_graphql_error(debug)] });
        Self::with_status(
            status,
            serde_json::to_vec(&body).unwrap_or_default(),
            Some(content_type::APPLICATION_JSON),
        )
    }
}
