//! Model list sourced from the host framework's config.yaml.

use std::path::PathBuf;

use ccproxy_pipeline::{ModelConfig, ModelListProvider};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
struct HostConfigFile {
    #[serde(default)]
    model_list: Vec<ModelConfig>,
}

/// Re-reads the file on every fetch, so a routing-table reload picks up
/// edits without a restart.
pub(crate) struct YamlModelProvider {
    path: PathBuf,
}

impl YamlModelProvider {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ModelListProvider for YamlModelProvider {
    fn models(&self) -> Vec<ModelConfig> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "could not read model list");
                return Vec::new();
            }
        };
        match serde_yaml::from_str::<HostConfigFile>(&raw) {
            Ok(file) => file.model_list,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "invalid model list yaml");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_model_list() {
        let yaml = r#"
model_list:
  - model_name: background
    litellm_params:
      model: claude-haiku-4-5
      api_base: https://api.anthropic.com
"#;
        let file: HostConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.model_list.len(), 1);
        assert_eq!(file.model_list[0].model_name, "background");
        assert_eq!(file.model_list[0].litellm_params.model, "claude-haiku-4-5");
    }

    #[test]
    fn missing_file_yields_empty_list() {
        let provider = YamlModelProvider::new(PathBuf::from("/nonexistent/config.yaml"));
        assert!(provider.models().is_empty());
    }
}
