//! Run configuration loaded from a JSON file.
//!
//! Every field has a default, so `{}` is a valid config. API keys are read
//! from the environment by the agents and never appear here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agents::editor::DEFAULT_EDITOR_MODEL;
use crate::agents::reviewer::DEFAULT_REVIEWER_MODEL;
use crate::agents::search::DEFAULT_SEARCH_MODEL;
use crate::model::AppProfile;
use crate::pipeline::PipelineInput;
use crate::session::SessionPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub topic: String,
    pub social_query: Option<String>,
    pub app_name: String,
    pub app_description: String,
    /// Inline feature notes for the target application.
    pub app_features: Option<String>,
    /// File whose contents are used as feature notes when `app_features` is
    /// unset. Relative paths resolve against the config file's directory.
    pub app_features_path: Option<PathBuf>,
    pub run_search: bool,
    pub run_social: bool,
    pub session: SessionPolicy,
    pub session_description: Option<String>,
    pub search_model: String,
    pub reviewer_model: String,
    pub editor_model: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            topic: "pain points in current note-taking apps in the AI era".to_string(),
            social_query: Some("AI in notes".to_string()),
            app_name: "Tuon.io".to_string(),
            app_description: "A note-taking app that integrates AI into the creative workflow, \
                              helping users capture, organize, and develop ideas effortlessly."
                .to_string(),
            app_features: None,
            app_features_path: None,
            run_search: true,
            run_social: true,
            session: SessionPolicy::reuse_latest(),
            session_description: None,
            search_model: DEFAULT_SEARCH_MODEL.to_string(),
            reviewer_model: DEFAULT_REVIEWER_MODEL.to_string(),
            editor_model: DEFAULT_EDITOR_MODEL.to_string(),
        }
    }
}

impl RunConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let (Some(features), Some(dir)) = (&config.app_features_path, path.parent()) {
            if features.is_relative() {
                config.app_features_path = Some(dir.join(features));
            }
        }
        Ok(config)
    }

    /// Feature notes, reading `app_features_path` if needed. A missing
    /// features file is logged and treated as no notes.
    pub fn features(&self) -> Option<String> {
        if let Some(inline) = &self.app_features {
            return Some(inline.clone());
        }
        let path = self.app_features_path.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not read features file");
                None
            }
        }
    }

    pub fn app_profile(&self) -> AppProfile {
        AppProfile {
            name: self.app_name.clone(),
            description: self.app_description.clone(),
            features: self.features(),
        }
    }

    pub fn pipeline_input(&self) -> PipelineInput {
        PipelineInput {
            topic: self.topic.clone(),
            social_query: self.social_query.clone(),
            app: self.app_profile(),
            session: self.session,
            run_search: self.run_search,
            run_social: self.run_social,
            session_description: self.session_description.clone(),
        }
    }
}
