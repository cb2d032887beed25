//! # Endpoint Resolver
//!
//! Wraps every backend call with the per-method endpoint cache, discovery
//! on fault, ticket renewal for membership mutations, and a bounded
//! fixed-delay retry for rate limiting.
//!
//! ## Call Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         invoke(request)                                 │
//! │                                                                         │
//! │  ticket? ── none ──► NoAccessRight                                     │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  endpoint = default URL + cached host + cached auth-cache token        │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  call ──► Ok ─────────────────────────────────────────► response       │
//! │     │                                                                   │
//! │     └─► fault                                                           │
//! │          ├─ discovery (once): fault names host/token, or the method    │
//! │          │  was never resolved: cache what was found, persist the      │
//! │          │  cache, re-issue against the resolved endpoint              │
//! │          ├─ RateLimited: fixed delay, retry (bounded)                  │
//! │          ├─ AuthenticationFailed on a mutation: renew ticket (bounded) │
//! │          └─ otherwise ─────────────────────────────────► Fault         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::{Backoff, Constant};
use tracing::{debug, info, warn};

use crate::backend::{BackendRequest, BackendResponse, Endpoint, FaultKind, ServiceMethod};
use crate::error::{SyncError, SyncResult};
use crate::session::SessionContext;

/// Fault classification of a surfaced backend error, if it is one.
pub(crate) fn fault_kind(err: &SyncError) -> Option<FaultKind> {
    match err {
        SyncError::Fault { fault, .. } => Some(fault.kind()),
        _ => None,
    }
}

/// Builds the endpoint for `method` from the default URL and the cache.
///
/// A cached host is only used alongside a cached token, unless the call is
/// the re-issue right after discovery.
async fn resolve(
    ctx: &SessionContext,
    method: ServiceMethod,
    discovered: bool,
) -> SyncResult<(Endpoint, bool)> {
    let mut url = ctx.config.service.url_for(method)?;

    let state = ctx.state.lock().await;
    let entry = state.deltas.endpoint(method.name());
    let resolved = entry.is_some();
    let auth_cache_token = entry.and_then(|e| e.token()).map(str::to_string);

    let host = entry
        .and_then(|e| e.host())
        .filter(|_| discovered || auth_cache_token.is_some());
    if let Some(host) = host {
        if url.set_host(Some(host)).is_err() {
            warn!(method = %method, host = %host, "Cached host is not usable, keeping default");
        }
    }

    debug!(
        method = %method,
        host = url.host_str().unwrap_or_default(),
        cached_token = auth_cache_token.is_some(),
        "Resolved endpoint"
    );

    Ok((
        Endpoint {
            method,
            url,
            auth_cache_token,
        },
        resolved,
    ))
}

/// Issues `request`, applying discovery and the retry policy.
pub(crate) async fn invoke(
    ctx: &SessionContext,
    request: &BackendRequest,
) -> SyncResult<BackendResponse> {
    let method = request.method();
    let operation = method.name();

    let Some(mut ticket) = ctx.credentials.current_ticket().await else {
        warn!(method = %method, "No ticket for backend call");
        return Err(SyncError::NoAccessRight {
            operation: operation.to_string(),
        });
    };

    let (mut endpoint, mut resolved) = resolve(ctx, method, false).await?;
    let mut discovered = false;
    let mut rate_limited = 0u32;
    let mut renewals = 0u32;
    let mut pacing = Constant::new(ctx.config.rate_limit_backoff());

    loop {
        let fault = match ctx.backend.call(&endpoint, &ticket, request).await {
            Ok(response) => {
                debug!(method = %method, "Backend call succeeded");
                return Ok(response);
            }
            Err(fault) => fault,
        };

        let kind = fault.kind();
        debug!(method = %method, code = %fault.code, ?kind, "Backend fault");

        if !discovered {
            let (token, host) = fault.endpoint_hints();
            let hinted = token.is_some() || host.is_some();

            if hinted || !resolved {
                discovered = true;
                if hinted {
                    info!(method = %method, host = ?host, "Discovered endpoint from fault");
                } else {
                    warn!(method = %method, "Fault carried no endpoint, keeping default host");
                }

                ctx.state
                    .lock()
                    .await
                    .deltas
                    .record_endpoint(operation, token, host);
                if let Err(e) = ctx.persist_deltas().await {
                    warn!(method = %method, error = %e, "Failed to persist endpoint cache");
                }

                let unclassified = matches!(kind, FaultKind::Other);
                if hinted || unclassified {
                    (endpoint, resolved) = resolve(ctx, method, true).await?;
                    continue;
                }
            }
        }

        match kind {
            FaultKind::RateLimited if rate_limited < ctx.config.retry.max_rate_limit_retries => {
                rate_limited += 1;
                let delay = pacing.next_backoff().unwrap_or_default();
                warn!(method = %method, attempt = rate_limited, ?delay, "Rate limited, backing off");
                tokio::time::sleep(delay).await;
            }
            FaultKind::RateLimited => {
                warn!(method = %method, attempts = rate_limited + 1, "Rate limit retries exhausted");
                return Err(SyncError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: rate_limited + 1,
                });
            }
            FaultKind::AuthenticationFailed
                if method.is_mutation() && renewals < ctx.config.retry.max_auth_refresh_attempts =>
            {
                renewals += 1;
                info!(method = %method, attempt = renewals, "Renewing ticket after authentication fault");
                match ctx.credentials.renew_ticket().await {
                    Some(renewed) => ticket = renewed,
                    None => {
                        return Err(SyncError::NoAccessRight {
                            operation: operation.to_string(),
                        })
                    }
                }
            }
            _ => return Err(SyncError::fault(operation, fault)),
        }
    }
}
