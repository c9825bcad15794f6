//! Policy Model & Loader (C5): the typed policy document, per-tenant
//! overrides, and a YAML loader that never throws into the request path.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, warn};

/// Rule set: which PII types trigger which action, and model/app allow-
/// and block-lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyRules {
    pub block_if: Vec<String>,
    pub mask_if: Vec<String>,
    pub warn_if: Vec<String>,
    pub allowed_models: Vec<String>,
    pub blocked_models: Vec<String>,
    pub allowed_apps: Vec<String>,
    pub blocked_apps: Vec<String>,
}

impl Default for PolicyRules {
    fn default() -> Self {
        Self {
            block_if: Vec::new(),
            mask_if: Vec::new(),
            warn_if: Vec::new(),
            allowed_models: Vec::new(),
            blocked_models: Vec::new(),
            allowed_apps: vec!["*".to_string()],
            blocked_apps: Vec::new(),
        }
    }
}

impl PolicyRules {
    /// Zero-value rules for an override that specifies nothing: empty
    /// block/mask/warn, `["*"]` allowed apps, empty (= any) allowed models.
    /// An override never inherits from the default rule set.
    pub fn override_default() -> Self {
        Self::default()
    }

    pub fn is_model_allowed(&self, model: &str) -> bool {
        if self.blocked_models.iter().any(|m| m == model) {
            return false;
        }
        self.allowed_models.is_empty() || self.allowed_models.iter().any(|m| m == model)
    }

    pub fn is_app_allowed(&self, app_id: &str) -> bool {
        if self.blocked_apps.iter().any(|a| a == app_id) {
            return false;
        }
        self.allowed_apps.is_empty()
            || self.allowed_apps.iter().any(|a| a == "*")
            || self.allowed_apps.iter().any(|a| a == app_id)
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_name() -> String {
    "Default Compliance Policy".to_string()
}

/// Missing `rules` falls back to the *full* default policy's rule set
/// (blocks CRITICAL types, masks EMAIL/PHONE, warns IP_ADDRESS/DATE_OF_BIRTH)
/// — unlike an override's missing fields, which fall back to `PolicyRules`'s
/// own zero-value defaults. See `PolicyRules::default` for that distinction.
fn default_top_level_rules() -> PolicyRules {
    default_policy().rules
}

/// A compliance policy document: default rules plus per-tenant overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_top_level_rules")]
    pub rules: PolicyRules,
    #[serde(default)]
    pub org_overrides: HashMap<String, PolicyRules>,
}

impl Default for Policy {
    fn default() -> Self {
        default_policy()
    }
}

impl Policy {
    /// Effective rules for a tenant: its override if present, else the
    /// default rules. Overrides replace, never merge with, the default.
    pub fn rules_for(&self, tenant_id: Option<&str>) -> &PolicyRules {
        match tenant_id.and_then(|t| self.org_overrides.get(t)) {
            Some(rules) => rules,
            None => &self.rules,
        }
    }
}

/// The built-in default policy: blocks CRITICAL types, masks EMAIL/PHONE,
/// warns on IP_ADDRESS/DATE_OF_BIRTH, allows every model and app.
pub fn default_policy() -> Policy {
    Policy {
        version: "1.0".to_string(),
        name: "Default Compliance Policy".to_string(),
        description: "Blocks critical PII and masks medium-risk PII".to_string(),
        rules: PolicyRules {
            block_if: vec!["AADHAAR".into(), "PAN".into(), "CREDIT_CARD".into(), "SSN".into()],
            mask_if: vec!["EMAIL".into(), "PHONE".into()],
            warn_if: vec!["IP_ADDRESS".into(), "DATE_OF_BIRTH".into()],
            allowed_models: Vec::new(),
            blocked_models: Vec::new(),
            allowed_apps: vec!["*".to_string()],
            blocked_apps: Vec::new(),
        },
        org_overrides: HashMap::new(),
    }
}

/// Loads policy documents from YAML, falling back to the default policy on
/// any parse failure — the loader never throws into the request path.
#[derive(Debug, Clone, Default)]
pub struct PolicyLoader;

impl PolicyLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load from a YAML file path. Missing file, empty file, or parse
    /// failure all fall back to the default policy, with a logged warning.
    pub fn load_from_file(&self, path: &std::path::Path) -> Policy {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "policy file not found, using default policy");
                return default_policy();
            }
        };
        self.load_from_str(&contents)
    }

    /// Load from a YAML string, falling back to the default policy on
    /// malformed or empty content.
    pub fn load_from_str(&self, yaml: &str) -> Policy {
        if yaml.trim().is_empty() {
            warn!("empty policy document, using default policy");
            return default_policy();
        }
        match serde_yaml::from_str::<Policy>(yaml) {
            Ok(policy) => policy,
            Err(e) => {
                error!(error = %e, "failed to parse policy document, using default policy");
                default_policy()
            }
        }
    }
}
