//! Typed blueprint document.
//!
//! Mirrors the compiler's schema: a name, a `vars` block, and resource
//! groups whose resources carry `source` / `kind` / `id` / `settings` /
//! `use`. Settings keep insertion order so the serialized text is stable.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub blueprint_name: String,
    pub vars: BlueprintVars,
    pub resource_groups: Vec<ResourceGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintVars {
    pub project_id: String,
    pub deployment_name: String,
    pub region: String,
    pub zone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub group: String,
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub source: String,
    pub kind: String,
    pub id: String,
    pub settings: Settings,
    #[serde(rename = "use", default, skip_serializing_if = "Vec::is_empty")]
    pub uses: Vec<String>,
}

impl Resource {
    /// A terraform-kind resource with no settings yet.
    pub fn terraform(source: &str, id: &str) -> Self {
        Self {
            source: source.to_string(),
            kind: "terraform".to_string(),
            id: id.to_string(),
            settings: Settings::default(),
            uses: Vec::new(),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_uses(mut self, uses: Vec<String>) -> Self {
        self.uses = uses;
        self
    }
}

/// Ordered `settings` map of a resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(Mapping);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a setting.
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(Value::String(key.to_string()), value.into());
        self
    }

    /// Append a setting only when `value` is present.
    pub fn set_opt(self, key: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Blueprint {
    /// All resources across groups, in document order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resource_groups.iter().flat_map(|g| g.resources.iter())
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources().find(|r| r.id == id)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
