//! Field-projection summaries for oversized objects
//!
//! Each response type has a configured list of essential fields. The summary
//! keeps those fields (plus the primary identifier) and tells the client how to
//! fetch the full object. Types without a profile fall back to their first few
//! scalar fields and are flagged for operators.

use crate::config::{FieldProfile, GovernorConfig};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Identifier field assumed for unconfigured types
pub const DEFAULT_ID_FIELD: &str = "id";

/// Request parameter asking for the untruncated object
pub const ALL_FIELDS_PARAM: &str = "fields";
pub const ALL_FIELDS_VALUE: &str = "all";

/// Whether a summary dropped fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryKind {
    Preview,
    Full,
}

/// Request shape that returns the full object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailsRequest {
    pub endpoint: String,
    pub parameters: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryMeta {
    pub kind: SummaryKind,
    pub total_fields: usize,
    pub projected_fields: Vec<String>,
    pub details_available: DetailsRequest,
}

/// Condensed object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    pub summary: IndexMap<String, Value>,
    pub meta: SummaryMeta,
}

/// Summary plus what operators need to know about how it was built
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOutcome {
    pub response: SummaryResponse,
    /// No field profile existed; the scalar fallback was used
    pub unconfigured: bool,
    /// The object had no primary identifier to project
    pub missing_identifier: bool,
}

/// Projects objects onto their essential fields
#[derive(Debug, Clone)]
pub struct Summarizer {
    /// Keyed by lowercased type name
    profiles: HashMap<String, FieldProfile>,
    fallback_field_count: usize,
}

impl Summarizer {
    pub fn new(profiles: HashMap<String, FieldProfile>, fallback_field_count: usize) -> Self {
        let profiles = profiles
            .into_iter()
            .map(|(name, profile)| (name.to_lowercase(), profile))
            .collect();
        Self {
            profiles,
            fallback_field_count,
        }
    }

    pub fn from_config(config: &GovernorConfig) -> Self {
        Self::new(config.essential_fields.clone(), config.fallback_field_count)
    }

    /// Field profile for a type, if configured
    pub fn profile(&self, type_name: &str) -> Option<&FieldProfile> {
        self.profiles.get(&type_name.to_lowercase())
    }

    /// Summarize `object` as an instance of `type_name` served at `endpoint`
    ///
    /// The drill-down points at the profile's `details_endpoint` when one is
    /// configured and at `endpoint` otherwise.
    pub fn summarize(
        &self,
        type_name: &str,
        endpoint: &str,
        object: &Map<String, Value>,
    ) -> SummaryOutcome {
        let profile = self.profile(type_name);
        let id_field = profile.map_or(DEFAULT_ID_FIELD, |p| p.id_field.as_str());

        let projected = match profile {
            Some(profile) => project_configured(object, profile),
            None => {
                warn!(
                    "No essential fields configured for type '{}'; using first {} scalar fields",
                    type_name, self.fallback_field_count
                );
                project_fallback(object, id_field, self.fallback_field_count)
            }
        };

        let missing_identifier = !object.contains_key(id_field);
        if missing_identifier {
            warn!(
                "Object of type '{}' has no '{}' field; drill-down cannot address it",
                type_name, id_field
            );
        }

        let summary: IndexMap<String, Value> = projected
            .iter()
            .filter_map(|field| object.get(field).map(|v| (field.clone(), v.clone())))
            .collect();

        let kind = if projected.len() < object.len() {
            SummaryKind::Preview
        } else {
            SummaryKind::Full
        };

        let mut parameters = IndexMap::new();
        parameters.insert(
            id_field.to_string(),
            object.get(id_field).cloned().unwrap_or(Value::Null),
        );
        parameters.insert(
            ALL_FIELDS_PARAM.to_string(),
            Value::String(ALL_FIELDS_VALUE.to_string()),
        );

        let endpoint = profile
            .and_then(|p| p.details_endpoint.clone())
            .unwrap_or_else(|| endpoint.to_string());

        debug!(
            "Summarized '{}': {} of {} fields ({:?})",
            type_name,
            projected.len(),
            object.len(),
            kind
        );

        SummaryOutcome {
            response: SummaryResponse {
                summary,
                meta: SummaryMeta {
                    kind,
                    total_fields: object.len(),
                    projected_fields: projected,
                    details_available: DetailsRequest {
                        endpoint,
                        parameters,
                    },
                },
            },
            unconfigured: profile.is_none(),
            missing_identifier,
        }
    }
}

/// Configured fields in configured order, identifier first unless listed
fn project_configured(object: &Map<String, Value>, profile: &FieldProfile) -> Vec<String> {
    let mut projected = Vec::with_capacity(profile.fields.len() + 1);
    let id_listed = profile.fields.iter().any(|f| f == &profile.id_field);
    if !id_listed && object.contains_key(&profile.id_field) {
        projected.push(profile.id_field.clone());
    }
    for field in &profile.fields {
        if object.contains_key(field) && !projected.contains(field) {
            projected.push(field.clone());
        }
    }
    projected
}

/// Identifier plus the first `count` scalar fields in source order
fn project_fallback(object: &Map<String, Value>, id_field: &str, count: usize) -> Vec<String> {
    let mut projected = Vec::with_capacity(count + 1);
    if object.contains_key(id_field) {
        projected.push(id_field.to_string());
    }
    projected.extend(
        object
            .iter()
            .filter(|(name, value)| name.as_str() != id_field && is_scalar(value))
            .take(count)
            .map(|(name, _)| name.clone()),
    );
    projected
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}
