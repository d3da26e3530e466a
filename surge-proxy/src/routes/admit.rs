//! Admission endpoint.
//!
//! Every request that is not a health or metrics route lands here. It is
//! wrapped in a dispatch unit, handed to the scheduler, and answered with the
//! response of whichever backend the unit was dispatched to.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
};
use surge_core::{Admitted, DispatchUnit};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::admission::{decode_body, AdmissionFields};
use crate::error::ProxyError;
use crate::metrics::{self, DispatchTimer};
use crate::state::AppState;
use crate::transport::{BackendResponse, ForwardRequest};

/// Admit any request and relay the backend's answer
///
/// ANY /*
pub async fn admit(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    state.stats.lock().await.requests_total += 1;

    let result = admit_and_wait(&state, method, uri, headers, body).await;
    state.stats.lock().await.record(result.as_ref().map(|_| ()));

    let response = result?;
    let mut reply = (response.status, response.body).into_response();
    reply.headers_mut().remove(header::CONTENT_TYPE);
    reply.headers_mut().extend(response.headers);
    Ok(reply)
}

async fn admit_and_wait(
    state: &Arc<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<BackendResponse, ProxyError> {
    let (body, fields) = decode_body(&headers, &body)
        .and_then(|body| {
            let fields = AdmissionFields::extract(body.as_ref(), &state.config)?;
            Ok((body, fields))
        })
        .map_err(|e| {
            metrics::record_admission("rejected");
            debug!(error = %e, "Malformed request rejected");
            e
        })?;

    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let request = ForwardRequest::new(method, path_and_query, headers, body);

    let (tx, rx) = oneshot::channel();
    let transport = state.transport.clone();
    let unit = DispatchUnit::new(fields.meta, move |backend| async move {
        let timer = DispatchTimer::start(&backend.address);
        let result = transport.forward(&backend, &request).await;
        match &result {
            Ok(response) => timer.finish(response.status.as_str()),
            Err(e) => {
                warn!(
                    backend = %backend.id,
                    address = %backend.address,
                    error = %e,
                    "Backend call failed"
                );
                timer.finish("error");
            }
        }
        let _ = tx.send(result);
    });

    let admitted = state.scheduler.submit(unit, fields.bundle).map_err(|e| {
        metrics::record_admission("rejected");
        debug!(error = %e, "Admission rejected");
        ProxyError::from(e)
    })?;
    metrics::record_admission(match admitted {
        Admitted::Queued { .. } => "queued",
        Admitted::Buffered { .. } => "buffered",
        Admitted::BundleQueued { .. } => "bundle_completed",
    });
    metrics::observe_scheduler(&state.scheduler.stats());

    rx.await.map_err(|_| {
        ProxyError::Dropped("request was discarded before reaching a backend".to_string())
    })?
}
