//! Node-context resolution.
//!
//! Derives a per-request [`NodeContext`] from transport-level signals with a
//! fixed precedence per field: header, route parameter, cookie, structured
//! body field, configured default. The resolved context may then be enriched
//! once from the tenant directory; enrichment is a pure merge that never
//! overrides caller-supplied values.

pub mod middleware;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cb_common::{NodeContext, Result};
use cb_common::node_context::FIELD_NAMES;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Prefix for transport headers, e.g. `X-CityBus-Country`.
    pub header_prefix: String,
    /// Prefix for cookies, e.g. `citybus_country`.
    pub cookie_prefix: String,
    /// Fields that must be non-empty for `is_valid` gating.
    pub required_fields: Vec<String>,
    pub default_locale: String,
    pub default_processing_region: String,
    pub default_residency_class: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            header_prefix: "X-CityBus-".to_string(),
            cookie_prefix: "citybus_".to_string(),
            required_fields: vec!["country".to_string(), "tenant".to_string()],
            default_locale: "ar-SA".to_string(),
            default_processing_region: "me-central-1".to_string(),
            default_residency_class: "sovereign".to_string(),
        }
    }
}

impl ContextConfig {
    /// Header name for a context field: prefix + capitalized field name.
    pub fn header_name(&self, field: &str) -> String {
        let mut chars = field.chars();
        let capitalized = match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        };
        format!("{}{}", self.header_prefix, capitalized)
    }

    /// Cookie name for a context field: prefix + lower-cased field name.
    pub fn cookie_name(&self, field: &str) -> String {
        format!("{}{}", self.cookie_prefix, field.to_lowercase())
    }
}

// ============================================================================
// Request Signals
// ============================================================================

/// Transport-level inputs to resolution, decoupled from any HTTP framework
/// so the resolver stays a pure function.
#[derive(Debug, Clone, Default)]
pub struct RequestSignals {
    /// Header names stored lower-cased.
    pub headers: HashMap<String, String>,
    pub route_params: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    /// Structured request body, consulted at `node_context.<field>`.
    pub body: Option<serde_json::Value>,
}

impl RequestSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_lowercase(), value.into());
        self
    }

    pub fn with_route_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.route_params.insert(name.into(), value.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    fn body_field(&self, field: &str) -> Option<String> {
        self.body
            .as_ref()
            .and_then(|b| b.get("node_context"))
            .and_then(|ctx| ctx.get(field))
            .and_then(|v| v.as_str())
            .map(String::from)
    }
}

// ============================================================================
// Tenant Directory
// ============================================================================

/// A tenant as seen by the context layer: enough to tag events and to fill
/// hierarchy-derived context fields. The full directory CRUD lives elsewhere.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: String,
    pub handle: String,
    pub name: String,
    /// Hierarchy-derived context used for enrichment.
    pub context: NodeContext,
}

/// Lookup collaborator consumed by the resolver. Handle takes precedence
/// over identifier.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn find_by_handle_or_id(&self, key: &str) -> Result<Option<Tenant>>;
}

/// Config-seeded directory for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryTenantDirectory {
    tenants: Vec<Tenant>,
}

impl InMemoryTenantDirectory {
    pub fn new(tenants: Vec<Tenant>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn find_by_handle_or_id(&self, key: &str) -> Result<Option<Tenant>> {
        if let Some(t) = self.tenants.iter().find(|t| t.handle == key) {
            return Ok(Some(t.clone()));
        }
        Ok(self.tenants.iter().find(|t| t.id == key).cloned())
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Context plus the tenant resolved for it, computed at most once per
/// request and carried together so later consumers never re-query.
#[derive(Debug, Clone)]
pub struct ResolvedContext {
    pub context: NodeContext,
    pub tenant: Option<Tenant>,
    /// The signals the context was derived from, kept so handlers that see
    /// the request body can re-run resolution with the body included.
    pub signals: RequestSignals,
}

impl ResolvedContext {
    pub fn is_valid(&self, config: &ContextConfig) -> bool {
        self.context.is_valid(&config.required_fields)
    }
}

pub struct ContextResolver {
    config: ContextConfig,
    directory: Arc<dyn TenantDirectory>,
}

impl ContextResolver {
    pub fn new(config: ContextConfig, directory: Arc<dyn TenantDirectory>) -> Self {
        Self { config, directory }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Resolve every context field from the signals, applying documented
    /// defaults for fields no signal supplied. Callers that also have a
    /// tenant should go through [`resolve_request`](Self::resolve_request),
    /// where the tenant's values take precedence over configured defaults.
    pub fn resolve(&self, signals: &RequestSignals) -> NodeContext {
        self.apply_defaults(self.resolve_fields(signals))
    }

    /// Field resolution without the configured `locale`, `processingRegion`,
    /// and `residencyClass` defaults. Those three stay empty here so tenant
    /// enrichment can fill them; `apply_defaults` runs last.
    fn resolve_fields(&self, signals: &RequestSignals) -> NodeContext {
        let mut resolved: HashMap<&str, String> = HashMap::new();
        for field in FIELD_NAMES {
            let value = signals
                .header(&self.config.header_name(field))
                .map(String::from)
                .or_else(|| signals.route_params.get(field).cloned())
                .or_else(|| signals.cookies.get(&self.config.cookie_name(field)).cloned())
                .or_else(|| signals.body_field(field))
                .unwrap_or_default();
            resolved.insert(field, value);
        }

        let take = |resolved: &mut HashMap<&str, String>, field: &str| -> String {
            resolved.remove(field).unwrap_or_default()
        };
        let or_default = |value: String, default: &str| -> String {
            if value.is_empty() {
                default.to_string()
            } else {
                value
            }
        };

        NodeContext {
            country: take(&mut resolved, "country"),
            city_or_theme: take(&mut resolved, "cityOrTheme"),
            sector: take(&mut resolved, "sector"),
            category: take(&mut resolved, "category"),
            subcategory: take(&mut resolved, "subcategory"),
            tenant: take(&mut resolved, "tenant"),
            channel: or_default(take(&mut resolved, "channel"), "api"),
            surface: or_default(take(&mut resolved, "surface"), "ops-dashboard"),
            persona: or_default(take(&mut resolved, "persona"), "admin"),
            brand: take(&mut resolved, "brand"),
            theme: take(&mut resolved, "theme"),
            locale: take(&mut resolved, "locale"),
            processing_region: take(&mut resolved, "processingRegion"),
            residency_class: take(&mut resolved, "residencyClass"),
            version: or_default(take(&mut resolved, "version"), "1"),
        }
    }

    /// Fill `locale`, `processingRegion` and `residencyClass` from the
    /// configured defaults when still empty. Runs after tenant enrichment.
    fn apply_defaults(&self, mut context: NodeContext) -> NodeContext {
        if context.locale.is_empty() {
            context.locale = self.config.default_locale.clone();
        }
        if context.processing_region.is_empty() {
            context.processing_region = self.config.default_processing_region.clone();
        }
        if context.residency_class.is_empty() {
            context.residency_class = self.config.default_residency_class.clone();
        }
        context
    }

    /// Look up the tenant named by the context, handle first then id.
    /// Returns `None` without a directory call when the field is empty.
    pub async fn lookup_tenant(&self, context: &NodeContext) -> Result<Option<Tenant>> {
        if context.tenant.is_empty() {
            return Ok(None);
        }
        self.directory.find_by_handle_or_id(&context.tenant).await
    }

    /// Full resolution chain: resolve fields, look the tenant up once,
    /// enrich empty hierarchy fields from it, and only then fall back to the
    /// configured defaults, so a tenant's locale, processing region or
    /// residency class beats the configured fallback.
    pub async fn resolve_request(&self, signals: RequestSignals) -> Result<ResolvedContext> {
        let context = self.resolve_fields(&signals);
        let tenant = self.lookup_tenant(&context).await?;
        let context = match &tenant {
            Some(t) => context.enriched_with(&t.context),
            None => context,
        };
        let context = self.apply_defaults(context);
        Ok(ResolvedContext {
            context,
            tenant,
            signals,
        })
    }
}
