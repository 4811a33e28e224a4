//! Axum middleware that resolves the node context for every request.
//!
//! The resolved context is attached to request extensions for handlers to
//! read, and the tenant/country/locale are echoed back on the response when
//! a tenant was named. Body-level `node_context` fields are not visible
//! here; handlers that parse a body re-run resolution with it included.

use std::sync::Arc;

use axum::extract::{RawPathParams, Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::CookieJar;
use tracing::{debug, warn};

use crate::{ContextResolver, RequestSignals};

/// Build transport signals from request parts. Route parameters are only
/// present once routing has matched, hence the `Option`.
fn signals_from_request(
    req: &Request,
    cookies: &CookieJar,
    params: Option<&RawPathParams>,
) -> RequestSignals {
    let mut signals = RequestSignals::new();

    for (name, value) in req.headers() {
        if let Ok(v) = value.to_str() {
            signals
                .headers
                .insert(name.as_str().to_lowercase(), v.to_string());
        }
    }

    if let Some(params) = params {
        for (name, value) in params.iter() {
            signals
                .route_params
                .insert(name.to_string(), value.to_string());
        }
    }

    for cookie in cookies.iter() {
        signals
            .cookies
            .insert(cookie.name().to_string(), cookie.value().to_string());
    }

    signals
}

pub async fn resolve_node_context(
    State(resolver): State<Arc<ContextResolver>>,
    cookies: CookieJar,
    params: Option<RawPathParams>,
    mut req: Request,
    next: Next,
) -> Response {
    let signals = signals_from_request(&req, &cookies, params.as_ref());

    let resolved = match resolver.resolve_request(signals).await {
        Ok(resolved) => resolved,
        Err(e) => {
            // Tenant lookup failures degrade to an unenriched context; the
            // request itself still proceeds.
            warn!(error = %e, "tenant lookup failed during context resolution");
            let signals = signals_from_request(&req, &cookies, params.as_ref());
            let context = resolver.resolve(&signals);
            crate::ResolvedContext {
                context,
                tenant: None,
                signals,
            }
        }
    };

    debug!(
        tenant = %resolved.context.tenant,
        country = %resolved.context.country,
        locale = %resolved.context.locale,
        "node context resolved"
    );

    let echo = if resolved.context.tenant.is_empty() {
        None
    } else {
        Some((
            resolved.context.tenant.clone(),
            resolved.context.country.clone(),
            resolved.context.locale.clone(),
        ))
    };

    req.extensions_mut().insert(resolved);
    let mut response = next.run(req).await;

    if let Some((tenant, country, locale)) = echo {
        let prefix = &resolver.config().header_prefix;
        for (suffix, value) in [("Tenant", tenant), ("Country", country), ("Locale", locale)] {
            let name = format!("{}{}", prefix, suffix).to_lowercase();
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name),
                HeaderValue::from_str(&value),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
    }

    response
}
