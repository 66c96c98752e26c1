//! HTTP/1 client over a Unix domain socket.
//!
//! Firecracker serves its control API on a Unix socket rather than TCP, so
//! requests go through hyper's connection-level API on a `UnixStream`.

use std::path::Path;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;

use crate::ExecutorError;

/// Send a JSON request to a Firecracker API socket and return the response body.
///
/// `uri_path` is the path component only (e.g. `/boot-source`). Firecracker
/// requires a `Host` header, which is set to `localhost`.
///
/// # Errors
/// Returns [`ExecutorError::ApiError`] on connection errors or a non-2xx status.
pub(crate) async fn api_request(
    socket_path: &Path,
    method: Method,
    uri_path: &str,
    body: Option<&serde_json::Value>,
) -> Result<String, ExecutorError> {
    let stream = UnixStream::connect(socket_path).await.map_err(|e| {
        ExecutorError::ApiError(format!("connect to {}: {e}", socket_path.display()))
    })?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| ExecutorError::ApiError(format!("HTTP handshake: {e}")))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("firecracker API connection closed: {e}");
        }
    });

    let body_bytes = body.map(|v| Bytes::from(v.to_string())).unwrap_or_default();
    let content_len = body_bytes.len();

    let uri: Uri = uri_path
        .parse()
        .map_err(|e| ExecutorError::ApiError(format!("invalid URI path {uri_path}: {e}")))?;

    let mut builder = Request::builder()
        .method(method.clone())
        .uri(uri)
        .header("Host", "localhost")
        .header("Accept", "application/json");

    if content_len > 0 {
        builder = builder
            .header("Content-Type", "application/json")
            .header("Content-Length", content_len.to_string());
    }

    let req = builder
        .body(Full::new(body_bytes))
        .map_err(|e| ExecutorError::ApiError(format!("build request: {e}")))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| ExecutorError::ApiError(format!("{method} {uri_path}: {e}")))?;

    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| ExecutorError::ApiError(format!("read response body: {e}")))?
        .to_bytes();
    let text = String::from_utf8_lossy(&bytes).into_owned();

    if !status.is_success() {
        return Err(ExecutorError::ApiError(format!(
            "HTTP {status} from {method} {uri_path}: {text}"
        )));
    }

    tracing::trace!(%method, uri = uri_path, %status, "firecracker API request ok");
    Ok(text)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[tokio::test]
    async fn api_request_to_missing_socket_is_api_error() {
        let socket = PathBuf::from("/nonexistent/litegix/firecracker.sock");
        let result = api_request(&socket, Method::GET, "/", None).await;
        match result {
            Err(ExecutorError::ApiError(msg)) => {
                assert!(msg.contains("connect to"), "unexpected message: {msg}");
            }
            other => panic!("expected ApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn api_request_reports_non_success_status() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::UnixListener;

        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir: {e}"),
        };
        let socket = dir.path().join("api.sock");
        let listener = match UnixListener::bind(&socket) {
            Ok(l) => l,
            Err(e) => panic!("bind: {e}"),
        };

        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let body = r#"{"fault_message":"bad drive"}"#;
                let resp = format!(
                    "HTTP/1.1 400 Bad Request\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(resp.as_bytes()).await;
            }
        });

        let body = serde_json::json!({ "drive_id": "rootfs" });
        let result = api_request(&socket, Method::PUT, "/drives/rootfs", Some(&body)).await;
        match result {
            Err(ExecutorError::ApiError(msg)) => {
                assert!(msg.contains("400"), "status must be reported: {msg}");
                assert!(msg.contains("bad drive"), "fault message must be reported: {msg}");
            }
            other => panic!("expected ApiError, got {other:?}"),
        }
    }
}
