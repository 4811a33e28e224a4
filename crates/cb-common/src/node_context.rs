//! Node context: the tenant/locale/region tagging attached to a request and
//! stamped onto every event it produces.
//!
//! Constructed once per request, optionally enriched from the resolved
//! tenant via a pure merge, and never persisted on its own.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The 14 resolvable field names plus `version`, in resolution order.
pub const FIELD_NAMES: [&str; 15] = [
    "country",
    "cityOrTheme",
    "sector",
    "category",
    "subcategory",
    "tenant",
    "channel",
    "surface",
    "persona",
    "brand",
    "theme",
    "locale",
    "processingRegion",
    "residencyClass",
    "version",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeContext {
    pub country: String,
    pub city_or_theme: String,
    pub sector: String,
    pub category: String,
    pub subcategory: String,
    pub tenant: String,
    pub channel: String,
    pub surface: String,
    pub persona: String,
    pub brand: String,
    pub theme: String,
    pub locale: String,
    pub processing_region: String,
    pub residency_class: String,
    pub version: String,
}

impl Default for NodeContext {
    fn default() -> Self {
        Self {
            country: String::new(),
            city_or_theme: String::new(),
            sector: String::new(),
            category: String::new(),
            subcategory: String::new(),
            tenant: String::new(),
            channel: "api".to_string(),
            surface: "ops-dashboard".to_string(),
            persona: "admin".to_string(),
            brand: String::new(),
            theme: String::new(),
            locale: String::new(),
            processing_region: String::new(),
            residency_class: String::new(),
            version: "1".to_string(),
        }
    }
}

impl NodeContext {
    /// Look up a field by its wire name (camelCase, as in [`FIELD_NAMES`]).
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "country" => &self.country,
            "cityOrTheme" => &self.city_or_theme,
            "sector" => &self.sector,
            "category" => &self.category,
            "subcategory" => &self.subcategory,
            "tenant" => &self.tenant,
            "channel" => &self.channel,
            "surface" => &self.surface,
            "persona" => &self.persona,
            "brand" => &self.brand,
            "theme" => &self.theme,
            "locale" => &self.locale,
            "processingRegion" => &self.processing_region,
            "residencyClass" => &self.residency_class,
            "version" => &self.version,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// True iff every named required field is non-empty. Gates sensitive
    /// operations; publishing is never blocked by an invalid context.
    pub fn is_valid(&self, required_fields: &[String]) -> bool {
        required_fields
            .iter()
            .all(|f| self.field(f).map(|v| !v.is_empty()).unwrap_or(false))
    }

    /// Produce a new context with empty hierarchy fields filled from the
    /// tenant's own context. Caller-supplied values are never overridden;
    /// only `country`, `cityOrTheme`, `sector`, `category`, `locale`,
    /// `processingRegion` and `residencyClass` participate.
    pub fn enriched_with(&self, tenant_ctx: &NodeContext) -> NodeContext {
        fn fill(own: &str, tenant: &str) -> String {
            if own.is_empty() {
                tenant.to_string()
            } else {
                own.to_string()
            }
        }

        NodeContext {
            country: fill(&self.country, &tenant_ctx.country),
            city_or_theme: fill(&self.city_or_theme, &tenant_ctx.city_or_theme),
            sector: fill(&self.sector, &tenant_ctx.sector),
            category: fill(&self.category, &tenant_ctx.category),
            locale: fill(&self.locale, &tenant_ctx.locale),
            processing_region: fill(&self.processing_region, &tenant_ctx.processing_region),
            residency_class: fill(&self.residency_class, &tenant_ctx.residency_class),
            ..self.clone()
        }
    }
}
