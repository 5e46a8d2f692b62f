//! Saved filter records
//!
//! A saved filter is a named, reusable query expression over the task store.
//! The expression text arrives already syntax-checked; this crate never parses it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A named, user-defined query expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedFilter {
    /// Opaque unique identifier, assigned by the store
    pub id: String,

    /// Display name (not required to be unique)
    pub name: String,

    /// Optional free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Expression source text
    pub filter: String,

    /// Parsed structured form of the expression, if the caller has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<serde_json::Value>,

    /// Project the filter is scoped to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,

    /// Visible across all projects when true
    #[serde(default)]
    pub is_global: bool,

    /// Set once at creation
    pub created: DateTime<Utc>,

    /// Bumped on every successful mutation
    pub updated: DateTime<Utc>,
}

impl SavedFilter {
    /// Build a record from a creation payload
    pub fn from_new(id: String, fields: NewFilter, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: fields.name,
            description: fields.description,
            filter: fields.filter,
            expression: fields.expression,
            project_id: fields.project_id,
            is_global: fields.is_global,
            created: now,
            updated: now,
        }
    }

    /// Merge a partial update into this record
    ///
    /// `id` and `created` are not part of [`FilterPatch`] and are therefore
    /// never touched.
    pub fn apply(&mut self, patch: FilterPatch, now: DateTime<Utc>) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(filter) = patch.filter {
            self.filter = filter;
        }
        if let Some(expression) = patch.expression {
            self.expression = expression;
        }
        if let Some(project_id) = patch.project_id {
            self.project_id = project_id;
        }
        if let Some(is_global) = patch.is_global {
            self.is_global = is_global;
        }
        self.updated = now;
    }

    /// Whether this filter is visible from the given project
    pub fn visible_in_project(&self, project_id: i64) -> bool {
        self.is_global || self.project_id == Some(project_id)
    }

    /// Rough in-memory footprint of the stored field values, in bytes
    pub fn estimated_size(&self) -> u64 {
        let strings = self.id.len()
            + self.name.len()
            + self.description.as_ref().map_or(0, String::len)
            + self.filter.len();
        let expression = self.expression.as_ref().map_or(0, estimate_json_size);
        let project = if self.project_id.is_some() { 8 } else { 0 };
        // is_global (4) + created (8) + updated (8)
        (strings + expression + project + 20) as u64
    }
}

/// Size estimate for an arbitrary JSON value
fn estimate_json_size(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Null => 0,
        serde_json::Value::Bool(_) => 4,
        serde_json::Value::Number(_) => 8,
        serde_json::Value::String(s) => s.len(),
        serde_json::Value::Array(items) => items.iter().map(estimate_json_size).sum(),
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| k.len() + estimate_json_size(v))
            .sum(),
    }
}

/// Fields supplied when creating a filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewFilter {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub filter: String,

    #[serde(default)]
    pub expression: Option<serde_json::Value>,

    #[serde(default)]
    pub project_id: Option<i64>,

    #[serde(default)]
    pub is_global: bool,
}

impl NewFilter {
    /// Create a payload with the required fields
    pub fn new(name: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: filter.into(),
            ..Default::default()
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the parsed expression
    pub fn with_expression(mut self, expression: serde_json::Value) -> Self {
        self.expression = Some(expression);
        self
    }

    /// Scope the filter to a project
    pub fn with_project(mut self, project_id: i64) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Mark the filter as visible in every project
    pub fn global(mut self) -> Self {
        self.is_global = true;
        self
    }
}

/// Partial update for an existing filter
///
/// The outer `Option` means "leave unchanged"; for nullable fields the inner
/// `Option` distinguishes "set" from "clear". In JSON, an absent key leaves the
/// field alone and an explicit `null` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expression: Option<Option<serde_json::Value>>,

    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub project_id: Option<Option<i64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_global: Option<bool>,
}

impl FilterPatch {
    /// Rename the filter
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replace the expression source text
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Set or clear the description
    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    /// Set or clear the project scope
    pub fn project_id(mut self, project_id: Option<i64>) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Toggle global visibility
    pub fn is_global(mut self, is_global: bool) -> Self {
        self.is_global = Some(is_global);
        self
    }

    /// True when the patch changes nothing but the `updated` stamp
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.filter.is_none()
            && self.expression.is_none()
            && self.project_id.is_none()
            && self.is_global.is_none()
    }
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
