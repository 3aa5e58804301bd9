//! Persona (system instruction) sources for the live session.

use std::path::PathBuf;

use crate::config::Config;
use crate::error::{PipelineError, Result};

pub trait PersonaProvider: Send + Sync {
    fn load(&self) -> Result<String>;
}

pub struct InlinePersona(pub String);

impl PersonaProvider for InlinePersona {
    fn load(&self) -> Result<String> {
        non_empty(self.0.clone())
    }
}

pub struct FilePersona(pub PathBuf);

impl PersonaProvider for FilePersona {
    fn load(&self) -> Result<String> {
        let text = std::fs::read_to_string(&self.0).map_err(|e| {
            PipelineError::Config(format!("cannot read persona {}: {}", self.0.display(), e))
        })?;
        non_empty(text)
    }
}

fn non_empty(text: String) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::Config("persona is empty".into()));
    }
    Ok(trimmed.to_string())
}

/// The persona file wins over the inline prompt when one is configured.
pub fn from_config(config: &Config) -> Box<dyn PersonaProvider> {
    if config.persona_file.trim().is_empty() {
        Box::new(InlinePersona(config.persona_prompt.to_string()))
    } else {
        Box::new(FilePersona(PathBuf::from(&config.persona_file)))
    }
}
