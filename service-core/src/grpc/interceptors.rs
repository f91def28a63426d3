//! gRPC interceptors and metadata helpers.
//!
//! Provides:
//! - Trace context logging (W3C traceparent) and request ID recording
//! - Tenant extraction from the `x-tenant-id` metadata entry

use tonic::{Request, Status};
use uuid::Uuid;

/// gRPC metadata key for W3C traceparent header.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// gRPC metadata key for request ID.
pub const REQUEST_ID_KEY: &str = "x-request-id";

/// gRPC metadata key carrying the calling tenant.
pub const TENANT_ID_KEY: &str = "x-tenant-id";

/// Interceptor that records the incoming trace context on the current span.
///
/// ```ignore
/// use service_core::grpc::interceptors::trace_context_interceptor;
///
/// let svc = InvoicingServiceServer::with_interceptor(svc, trace_context_interceptor);
/// ```
#[allow(clippy::result_large_err)]
pub fn trace_context_interceptor(request: Request<()>) -> Result<Request<()>, Status> {
    if let Some(traceparent) = request.metadata().get(TRACEPARENT_KEY)
        && let Ok(traceparent_str) = traceparent.to_str()
    {
        tracing::debug!(traceparent = %traceparent_str, "Received trace context");
    }

    if let Some(request_id) = request.metadata().get(REQUEST_ID_KEY)
        && let Ok(request_id_str) = request_id.to_str()
    {
        tracing::Span::current().record("request_id", request_id_str);
    }

    Ok(request)
}

/// Extract the traceparent value from incoming request metadata.
pub fn extract_traceparent<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get(TRACEPARENT_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Extract request ID from incoming gRPC request metadata.
pub fn extract_request_id<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get(REQUEST_ID_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Extract the tenant from request metadata.
///
/// Every tenant-scoped RPC requires this entry; a missing or malformed value is
/// rejected as `UNAUTHENTICATED`.
#[allow(clippy::result_large_err)]
pub fn extract_tenant_id<T>(request: &Request<T>) -> Result<Uuid, Status> {
    let raw = request
        .metadata()
        .get(TENANT_ID_KEY)
        .ok_or_else(|| Status::unauthenticated("Missing x-tenant-id metadata"))?
        .to_str()
        .map_err(|_| Status::unauthenticated("Malformed x-tenant-id metadata"))?;

    Uuid::parse_str(raw).map_err(|_| Status::unauthenticated("x-tenant-id must be a UUID"))
}
