use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{header, Method, Response, StatusCode};
use pingora::{
    apps::http_app::ServeHttp, protocols::http::ServerSession, services::listening::Service,
};

use crate::{
    config::Config,
    core::{PipelineError, PipelineResult},
    orchestration::{RequestDeadline, RequestPipeline},
    plugin::prometheus::gather_metrics,
    utils::{
        request::parse_request,
        response::{content_type, ResponseBuilder},
    },
};

/// HTTP application serving the GraphQL endpoint and, optionally, metrics.
pub struct GraphQLHttpApp {
    pipeline: Arc<RequestPipeline>,
    endpoint: String,
    metrics_path: Option<String>,
    timeout: Duration,
    max_body_bytes: usize,
    debug: bool,
}

impl GraphQLHttpApp {
    pub fn new(cfg: &Config, pipeline: Arc<RequestPipeline>) -> Self {
        Self {
            pipeline,
            endpoint: cfg.graphql.endpoint.clone(),
            metrics_path: cfg.graphql.metrics_path.clone(),
            timeout: Duration::from_millis(cfg.execution.timeout_ms),
            max_body_bytes: cfg.graphql.max_body_bytes,
            debug: cfg.graphql.debug,
        }
    }

    /// Listening service without listeners; the caller adds them
    pub fn graphql_http_service(cfg: &Config, pipeline: Arc<RequestPipeline>) -> Service<Self> {
        Service::new("GraphQL HTTP".to_string(), Self::new(cfg, pipeline))
    }

    /// Answer one request once its parts are known
    pub async fn serve(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        content_type_header: Option<&str>,
        body: &[u8],
    ) -> Response<Vec<u8>> {
        if self.metrics_path.as_deref() == Some(path) && method == Method::GET {
            return ResponseBuilder::success_http(gather_metrics(), Some(content_type::PROMETHEUS_TEXT));
        }

        if path != self.endpoint {
            return ResponseBuilder::error_http(StatusCode::NOT_FOUND, "Not Found");
        }

        if method != Method::GET && method != Method::POST {
            let mut resp = ResponseBuilder::error_http(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
            resp.headers_mut()
                .insert(header::ALLOW, header::HeaderValue::from_static("GET, POST"));
            return resp;
        }

        let raw = match parse_request(method, query, content_type_header, body) {
            Ok(raw) => raw,
            Err(e) => {
                log::debug!("Rejected {method} {path}: {e}");
                return ResponseBuilder::graphql_failure(&e, self.debug);
            }
        };

        let deadline = RequestDeadline::after(self.timeout);
        match self.pipeline.execute(raw, deadline).await {
            Ok(response) => ResponseBuilder::graphql(&response),
            Err(e) => {
                log::error!("Request pipeline failed: {e}");
                ResponseBuilder::graphql_failure(&e, self.debug)
            }
        }
    }
}

#[async_trait]
impl ServeHttp for GraphQLHttpApp {
    async fn response(&self, http_session: &mut ServerSession) -> Response<Vec<u8>> {
        http_session.set_keepalive(None);

        let (method, path, query, content_type_header) = {
            let req_header = http_session.req_header();
            (
                req_header.method.clone(),
                req_header.uri.path().to_string(),
                req_header.uri.query().map(str::to_string),
                req_header
                    .headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
            )
        };

        let body = if method == Method::POST {
            match read_request_body(http_session, self.max_body_bytes).await {
                Ok(body) => body,
                Err(e) => return ResponseBuilder::graphql_failure(&e, self.debug),
            }
        } else {
            Bytes::new()
        };

        self.serve(
            &method,
            &path,
            query.as_deref(),
            content_type_header.as_deref(),
            &body,
        )
        .await
    }
}

async fn read_request_body(
    http_session: &mut ServerSession,
    limit: usize,
) -> PipelineResult<Bytes> {
    let mut body_data = BytesMut::new();
    while let Some(bytes) = http_session
        .read_request_body()
        .await
        .map_err(|e| PipelineError::MalformedInput(format!("Failed to read request body: {e}")))?
    {
        append_body_chunk(&mut body_data, &bytes, limit)?;
    }
    Ok(body_data.freeze())
}

fn append_body_chunk(body: &mut BytesMut, chunk: &[u8], limit: usize) -> PipelineResult<()> {
    if body.len() + chunk.len() > limit {
        return Err(PipelineError::MalformedInput(format!(
            "Request body exceeds {limit} bytes"
        )));
    }
    body.extend_from_slice(chunk);
    Ok(())
}
