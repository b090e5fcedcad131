use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ModelIdentity
// ---------------------------------------------------------------------------

/// A locally installed (or remotely served) model, as the engine knows it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelIdentity {
    /// Human-readable catalog name.
    pub name: String,
    /// Engine-specific tag (e.g. `qwen2.5:0.5b`).
    pub tag: String,
}

impl ModelIdentity {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.tag)
    }
}

// ---------------------------------------------------------------------------
// ModelKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    #[default]
    Local,
    /// Served by a remote API; physical measurement is impossible.
    #[serde(alias = "api")]
    Remote,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

impl std::str::FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" | "api" => Ok(Self::Remote),
            _ => Err(format!("invalid model kind: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// ModelSpec
// ---------------------------------------------------------------------------

pub const DEFAULT_DECLARED_CONTEXT: u32 = 4096;

/// Everything the controller needs to know about one model before a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub identity: ModelIdentity,
    pub kind: ModelKind,
    /// Maximum context the model advertises.
    pub declared_context: u32,
    pub capabilities: Vec<String>,
    /// Billions of active parameters, used for remote energy estimates.
    pub active_params_b: Option<f64>,
    /// Filled from the installed-model listing once the tag is resolved.
    pub size_bytes: Option<u64>,
}

impl ModelSpec {
    pub fn local(name: impl Into<String>, tag: impl Into<String>, declared_context: u32) -> Self {
        Self {
            identity: ModelIdentity::new(name, tag),
            kind: ModelKind::Local,
            declared_context,
            capabilities: Vec::new(),
            active_params_b: None,
            size_bytes: None,
        }
    }

    pub fn declares(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn size_gb(&self) -> Option<f64> {
        self.size_bytes
            .filter(|b| *b > 0)
            .map(|b| (b as f64 / 1e9 * 100.0).round() / 100.0)
    }
}

/// A model reported by the engine's installed-model listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledModel {
    pub tag: String,
    pub size_bytes: u64,
}

/// Resolve a catalog tag against the engine's installed models, accepting the
/// implicit `:latest` suffix.
pub fn resolve_installed_tag<'a>(tag: &str, installed: &'a [InstalledModel]) -> Option<&'a InstalledModel> {
    let latest = format!("{tag}:latest");
    installed
        .iter()
        .find(|m| m.tag == tag)
        .or_else(|| installed.iter().find(|m| m.tag == latest))
}

// ---------------------------------------------------------------------------
// ModelDirectory
// ---------------------------------------------------------------------------

/// Immutable tag → friendly-name mapping, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ModelDirectory {
    by_tag: HashMap<String, String>,
}

impl ModelDirectory {
    pub fn from_specs<'a>(specs: impl IntoIterator<Item = &'a ModelSpec>) -> Self {
        let by_tag = specs
            .into_iter()
            .map(|s| (s.identity.tag.clone(), s.identity.name.clone()))
            .collect();
        Self { by_tag }
    }

    /// Friendly name for a tag. Unknown tags fall back to a cleaned-up
    /// version of the raw tag; the fallback is cosmetic only.
    pub fn friendly_name(&self, tag: &str) -> String {
        let bare = tag.strip_suffix(":latest").unwrap_or(tag);
        if let Some(name) = self.by_tag.get(tag).or_else(|| self.by_tag.get(bare)) {
            return name.clone();
        }
        if tag.contains("hf.co/") {
            let last = bare.rsplit('/').next().unwrap_or(bare);
            return last
                .replace("-GGUF", "")
                .replace("-gguf", "")
                .replace("-Q4_K_M", "");
        }
        bare.to_string()
    }

    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_installed_tag_latest() {
        let installed = vec![
            InstalledModel {
                tag: "llama3.2:latest".into(),
                size_bytes: 10,
            },
            InstalledModel {
                tag: "qwen2.5:0.5b".into(),
                size_bytes: 20,
            },
        ];
        assert_eq!(
            resolve_installed_tag("llama3.2", &installed).map(|m| m.tag.as_str()),
            Some("llama3.2:latest")
        );
        assert_eq!(
            resolve_installed_tag("qwen2.5:0.5b", &installed).map(|m| m.size_bytes),
            Some(20)
        );
        assert!(resolve_installed_tag("phi3", &installed).is_none());
    }

    #[test]
    fn test_friendly_name_lookup_and_fallback() {
        let specs = vec![ModelSpec::local("Qwen 2.5 (0.5B)", "qwen2.5:0.5b", 32768)];
        let dir = ModelDirectory::from_specs(&specs);
        assert_eq!(dir.friendly_name("qwen2.5:0.5b"), "Qwen 2.5 (0.5B)");
        assert_eq!(dir.friendly_name("mistral:latest"), "mistral");
        assert_eq!(
            dir.friendly_name("hf.co/bartowski/SmolLM2-1.7B-Instruct-GGUF:latest"),
            "SmolLM2-1.7B-Instruct"
        );
    }

    #[test]
    fn test_model_kind_parse() {
        assert_eq!("api".parse::<ModelKind>().unwrap(), ModelKind::Remote);
        assert_eq!("LOCAL".parse::<ModelKind>().unwrap(), ModelKind::Local);
        assert!("cloud".parse::<ModelKind>().is_err());
    }
}
