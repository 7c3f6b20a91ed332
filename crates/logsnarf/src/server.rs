// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP front door: `POST /ingress/<token>` with the raw drain body.
//!
//! The body is streamed into the parser as it arrives, so memory use does
//! not grow with the upload size. Outcomes map onto a fixed set of statuses:
//! 204 when the upload was accepted, 403 for an unknown token, 500 for any
//! internal failure, 404/405 for wrong routes and 413 for oversized bodies.

use crate::errors::IngestError;
use crate::http_utils::{
    create_empty_http_response, log_and_create_http_response, verify_request_content_length,
    HttpResponse,
};
use crate::ingest::Ingestor;
use futures::{future, TryStreamExt};
use http_body_util::{BodyStream, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::service::service_fn;
use hyper::{http, Method, Request, StatusCode};
use std::error::Error;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub const INGRESS_PATH_PREFIX: &str = "/ingress/";

/// Accepts connections until `shutdown` is cancelled, then lets open
/// connections finish their current request before returning.
pub async fn serve(
    listener: TcpListener,
    ingestor: Arc<Ingestor>,
    max_body_size: usize,
    shutdown: CancellationToken,
) -> io::Result<()> {
    let server = hyper::server::conn::http1::Builder::new();
    let mut joinset = tokio::task::JoinSet::new();

    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {addr}");
    }

    loop {
        let conn = tokio::select! {
            () = shutdown.cancelled() => break,
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("Server error: {e}");
                    return Err(e);
                }
                Ok((conn, _)) => conn,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => match finished {
                Err(e) if e.is_panic() => {
                    error!("Connection handler panicked: {:?}", e);
                    continue;
                },
                Ok(()) | Err(_) => continue,
            },
        };

        let conn = hyper_util::rt::TokioIo::new(conn);
        let server = server.clone();
        let ingestor = Arc::clone(&ingestor);
        let shutdown = shutdown.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            let ingestor = Arc::clone(&ingestor);
            async move { handle_request(req, ingestor, max_body_size).await }
        });
        joinset.spawn(async move {
            let connection = server.serve_connection(conn, service);
            let mut connection = std::pin::pin!(connection);
            tokio::select! {
                res = connection.as_mut() => {
                    if let Err(e) = res {
                        debug!("Connection error: {e}");
                    }
                }
                () = shutdown.cancelled() => {
                    connection.as_mut().graceful_shutdown();
                    if let Err(e) = connection.await {
                        debug!("Connection error during shutdown: {e}");
                    }
                }
            }
        });
    }

    debug!("Waiting for {} open connections", joinset.len());
    while joinset.join_next().await.is_some() {}
    info!("Server stopped");
    Ok(())
}

/// Routes one request. Never fails on ingestion errors; those become
/// status codes.
pub async fn handle_request<B>(
    req: Request<B>,
    ingestor: Arc<Ingestor>,
    max_body_size: usize,
) -> http::Result<HttpResponse>
where
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<Box<dyn Error + Send + Sync>>,
{
    let Some(token) = req
        .uri()
        .path()
        .strip_prefix(INGRESS_PATH_PREFIX)
        .filter(|token| !token.is_empty() && !token.contains('/'))
        .map(str::to_string)
    else {
        return log_and_create_http_response(
            &format!("No route for {}", req.uri().path()),
            StatusCode::NOT_FOUND,
        );
    };

    if req.method() != Method::POST {
        return log_and_create_http_response(
            &format!("Method {} not allowed", req.method()),
            StatusCode::METHOD_NOT_ALLOWED,
        );
    }

    if let Some(response) =
        verify_request_content_length(req.headers(), max_body_size, "Error ingesting logs")
    {
        return response;
    }

    let stream = BodyStream::new(Limited::new(req.into_body(), max_body_size))
        .try_filter_map(|frame| future::ready(Ok(frame.into_data().ok())))
        .map_err(io::Error::other);
    let reader = std::pin::pin!(StreamReader::new(stream));

    match ingestor.ingest(&token, reader).await {
        Ok(report) => {
            debug!(
                "Accepted {} lines with {} metrics",
                report.lines, report.metrics
            );
            create_empty_http_response(StatusCode::NO_CONTENT)
        }
        Err(IngestError::CredentialsNotFound) => {
            log_and_create_http_response("Invalid token", StatusCode::FORBIDDEN)
        }
        Err(IngestError::Read(e)) if is_length_limit(&e) => log_and_create_http_response(
            "Error ingesting logs: Payload too large",
            StatusCode::PAYLOAD_TOO_LARGE,
        ),
        Err(e) => {
            error!("Error ingesting logs: {e}");
            log_and_create_http_response("Internal error", StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn is_length_limit(e: &io::Error) -> bool {
    e.get_ref()
        .is_some_and(|inner| inner.downcast_ref::<LengthLimitError>().is_some())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::credentials::FileFetcher;
    use crate::credentials_store::tests::credentials;
    use crate::credentials_store::CredentialsStore;
    use crate::decoder::DecoderRegistry;
    use crate::influxdb::HttpConnector;
    use crate::notifier::TracingNotifier;
    use crate::writer::{Writer, WriterConfig};
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use std::time::Duration;

    const LINE: &str = "245 <45>1 2019-11-25T18:28:00.226738+00:00 host heroku worker.1 - - source=worker.1 dyno=d sample#load_avg_1m=0.03\n";

    fn setup() -> (Arc<Ingestor>, Arc<Writer>) {
        setup_with_destination("http://127.0.0.1:1/metrics")
    }

    fn setup_with_destination(url: &str) -> (Arc<Ingestor>, Arc<Writer>) {
        let fetcher = FileFetcher::from_credentials([credentials("secret-token", url)]);
        let store = Arc::new(CredentialsStore::new(
            Arc::new(fetcher),
            Duration::from_secs(5),
            Duration::from_millis(100),
        ));
        let writer = Arc::new(Writer::new(
            Arc::new(HttpConnector::new(reqwest::Client::new())),
            WriterConfig::default(),
            Arc::new(TracingNotifier),
        ));
        let ingestor = Arc::new(Ingestor::new(
            store,
            DecoderRegistry::default(),
            Arc::clone(&writer),
        ));
        (ingestor, writer)
    }

    fn request(method: Method, path: &str, body: &'static str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    async fn body_string(response: HttpResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_accepts_drain_upload() {
        let (ingestor, writer) = setup();
        let response = handle_request(
            request(Method::POST, "/ingress/secret-token", LINE),
            ingestor,
            1024,
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(body_string(response).await, "");
        assert_eq!(writer.pending("secret-token"), 1);
    }

    #[tokio::test]
    async fn test_unknown_token_is_forbidden() {
        let (ingestor, _) = setup();
        let response = handle_request(request(Method::POST, "/ingress/nope", LINE), ingestor, 1024)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_string(response).await,
            r#"{"message":"Invalid token"}"#
        );
    }

    #[tokio::test]
    async fn test_internal_errors_are_not_exposed() {
        let (ingestor, _) = setup_with_destination("http://internal-influx.corp:8086/");
        let response = handle_request(
            request(Method::POST, "/ingress/secret-token", LINE),
            ingestor,
            1024,
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_string(response).await;
        assert_eq!(body, r#"{"message":"Internal error"}"#);
        assert!(!body.contains("internal-influx.corp"));
    }

    #[tokio::test]
    async fn test_unknown_routes() {
        let (ingestor, _) = setup();
        for path in ["/", "/ingress/", "/ingress/a/b", "/health"] {
            let response = handle_request(
                request(Method::POST, path, LINE),
                Arc::clone(&ingestor),
                1024,
            )
            .await
            .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
        }
    }

    #[tokio::test]
    async fn test_only_post_is_allowed() {
        let (ingestor, _) = setup();
        let response = handle_request(
            request(Method::GET, "/ingress/secret-token", ""),
            ingestor,
            1024,
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_while_streaming() {
        let (ingestor, writer) = setup();
        let response = handle_request(
            request(Method::POST, "/ingress/secret-token", LINE),
            ingestor,
            16,
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(writer.pending("secret-token"), 0);
    }

    #[tokio::test]
    async fn test_oversized_content_length_is_rejected_upfront() {
        let (ingestor, _) = setup();
        let mut req = request(Method::POST, "/ingress/secret-token", LINE);
        req.headers_mut()
            .insert(hyper::header::CONTENT_LENGTH, "4096".parse().unwrap());
        let response = handle_request(req, ingestor, 1024).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_serves_over_tcp_until_shutdown() {
        let (ingestor, writer) = setup();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, ingestor, 1024, shutdown.clone()));

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{addr}/ingress/secret-token"))
            .body(LINE)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

        let response = client
            .post(format!("http://{addr}/ingress/other"))
            .body(LINE)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
        assert_eq!(writer.pending("secret-token"), 1);

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
