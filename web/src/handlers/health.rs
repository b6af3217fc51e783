//! Health check endpoint.

use axum::http::StatusCode;

/// Liveness probe.
///
/// Returns 200 while the process is serving requests. Dependencies are not
/// checked; a throttled store shows up as 503 on the entry routes instead.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_is_ok() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
