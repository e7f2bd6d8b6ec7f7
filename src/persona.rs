use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ConfigurationError};
use crate::prompt::PromptBuilder;

/// One character profile as stored in the catalog file.
///
/// Field keys follow the file format. Everything except `id` may be absent in
/// the file; [`PromptBuilder`] reports missing fields when rendering. Keys the
/// relay does not use are kept in `extra` and listed back unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonaRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Visual_Description", default, skip_serializing_if = "Option::is_none")]
    pub visual_description: Option<String>,
    #[serde(rename = "Personality", default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    #[serde(rename = "Roleplay_Examples", default, skip_serializing_if = "Option::is_none")]
    pub roleplay_examples: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct PersonaCatalog {
    records: Vec<PersonaRecord>,
}

impl PersonaCatalog {
    pub fn new(records: Vec<PersonaRecord>) -> anyhow::Result<Self> {
        let mut seen = HashSet::new();
        for r in &records {
            if !seen.insert(r.id.as_str()) {
                anyhow::bail!("duplicate persona id '{}'", r.id);
            }
        }
        Ok(Self { records })
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading persona catalog {}", path.display()))?;
        let records: Vec<PersonaRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing persona catalog {}", path.display()))?;
        let catalog = Self::new(records)?;
        tracing::info!(path = %path.display(), personas = catalog.records.len(), "persona catalog loaded");
        Ok(catalog)
    }

    pub fn list(&self) -> &[PersonaRecord] {
        &self.records
    }

    pub fn find(&self, id: &str) -> Result<&PersonaRecord, ChatError> {
        self.records
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| ChatError::PersonaNotFound(id.to_string()))
    }

    /// Renders every persona once so broken records fail at startup.
    pub fn validate(&self, builder: &PromptBuilder) -> Result<(), ConfigurationError> {
        for r in &self.records {
            builder.build(r)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_persona(id: &str) -> PersonaRecord {
    PersonaRecord {
        id: id.into(),
        name: Some(format!("{id} the Bard")),
        visual_description: Some("A tall figure in a green cloak".into()),
        personality: Some("Cheerful and curious".into()),
        roleplay_examples: Some("*strums lute* Well met!".into()),
        extra: Default::default(),
    }
}
