//! Known artifact intents and the structure their content must have.

use crate::error::{Error, Result};

const DEFAULT_MAX_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Markdown,
    Json,
}

/// Structural contract for generated or edited artifact content.
#[derive(Debug, Clone)]
pub struct ArtifactSchema {
    pub format: ArtifactFormat,
    /// Markdown: headings that must appear as lines. Json: top-level keys.
    pub required: Vec<String>,
    pub max_bytes: usize,
}

impl ArtifactSchema {
    pub fn markdown(required_headings: &[&str]) -> Self {
        Self {
            format: ArtifactFormat::Markdown,
            required: required_headings.iter().map(|h| h.to_string()).collect(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub fn json(required_keys: &[&str]) -> Self {
        Self {
            format: ArtifactFormat::Json,
            required: required_keys.iter().map(|k| k.to_string()).collect(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    /// Format inferred from the path extension, with no required structure.
    pub fn for_path(path: &str) -> Self {
        if path.ends_with(".json") {
            Self::json(&[])
        } else {
            Self::markdown(&[])
        }
    }

    pub fn validate(&self, path: &str, content: &str) -> Result<()> {
        let reject = |reason: String| Err(Error::validation("artifact", "content", format!("{path}: {reason}")));

        if content.trim().is_empty() {
            return reject("content is empty".to_string());
        }
        if content.len() > self.max_bytes {
            return reject(format!("{} bytes exceeds the {} byte limit", content.len(), self.max_bytes));
        }
        if content.contains('\0') {
            return reject("contains a NUL byte".to_string());
        }

        match self.format {
            ArtifactFormat::Markdown => {
                for heading in &self.required {
                    let present = content
                        .lines()
                        .any(|line| line.trim_end() == heading || line.trim_end().starts_with(&format!("{heading}:")));
                    if !present {
                        return reject(format!("missing heading '{heading}'"));
                    }
                }
            }
            ArtifactFormat::Json => {
                let value: serde_json::Value = match serde_json::from_str(content) {
                    Ok(v) => v,
                    Err(e) => return reject(format!("not valid JSON: {e}")),
                };
                if !self.required.is_empty() {
                    let Some(object) = value.as_object() else {
                        return reject("expected a JSON object".to_string());
                    };
                    for key in &self.required {
                        if !object.contains_key(key) {
                            return reject(format!("missing key '{key}'"));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// One intent the proposal engine can generate content for.
#[derive(Debug, Clone)]
pub struct ArtifactTemplate {
    pub intent: &'static str,
    pub template_ref: &'static str,
    pub path: &'static str,
    pub description: &'static str,
    pub schema: ArtifactSchema,
}

#[derive(Debug, Clone)]
pub struct ArtifactCatalog {
    templates: Vec<ArtifactTemplate>,
}

impl Default for ArtifactCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ArtifactCatalog {
    pub fn builtin() -> Self {
        Self {
            templates: vec![
                ArtifactTemplate {
                    intent: "generate_status_report",
                    template_ref: "status_report",
                    path: "artifacts/status-report.md",
                    description: "Phase, RAID counts and open items",
                    schema: ArtifactSchema::markdown(&["# Status Report", "## Summary", "## Open Items"]),
                },
                ArtifactTemplate {
                    intent: "generate_project_charter",
                    template_ref: "project_charter",
                    path: "artifacts/charter.md",
                    description: "Purpose, approach and known risks",
                    schema: ArtifactSchema::markdown(&["# Project Charter", "## Purpose", "## Approach"]),
                },
                ArtifactTemplate {
                    intent: "generate_raid_log",
                    template_ref: "raid_log",
                    path: "artifacts/raid-log.md",
                    description: "Every RAID item in one table",
                    schema: ArtifactSchema::markdown(&["# RAID Log", "## Register"]),
                },
            ],
        }
    }

    pub fn templates(&self) -> &[ArtifactTemplate] {
        &self.templates
    }

    pub fn resolve(&self, intent: &str) -> Result<&ArtifactTemplate> {
        self.templates.iter().find(|t| t.intent == intent).ok_or_else(|| {
            let known: Vec<&str> = self.templates.iter().map(|t| t.intent).collect();
            Error::validation(
                "proposal",
                "intent",
                format!("unknown intent '{intent}' (expected one of: {})", known.join(", ")),
            )
        })
    }

    /// Schema for a path: the catalog entry's if one writes there, else by extension.
    pub fn schema_for_path(&self, path: &str) -> ArtifactSchema {
        self.templates
            .iter()
            .find(|t| t.path == path)
            .map(|t| t.schema.clone())
            .unwrap_or_else(|| ArtifactSchema::for_path(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_intent_lists_known_ones() {
        let err = ArtifactCatalog::builtin().resolve("generate_haiku").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("generate_status_report"));
        assert!(message.contains("generate_raid_log"));
    }

    #[test]
    fn markdown_requires_headings() {
        let schema = ArtifactSchema::markdown(&["# Status Report", "## Summary"]);
        assert!(schema.validate("a.md", "# Status Report\n\n## Summary\nok\n").is_ok());
        assert!(schema.validate("a.md", "# Status Report: P1\n\n## Summary\n").is_ok());
        assert!(schema.validate("a.md", "# Status Report\n").is_err());
    }

    #[test]
    fn rejects_nul_and_oversized_content() {
        let mut schema = ArtifactSchema::markdown(&[]);
        assert!(schema.validate("a.md", "bad\0byte").is_err());
        schema.max_bytes = 4;
        assert!(schema.validate("a.md", "too long").is_err());
    }

    #[test]
    fn json_must_parse_and_carry_keys() {
        let schema = ArtifactSchema::json(&["title"]);
        assert!(schema.validate("a.json", r#"{"title": "x"}"#).is_ok());
        assert!(schema.validate("a.json", r#"{"name": "x"}"#).is_err());
        assert!(schema.validate("a.json", "{not json").is_err());
    }

    #[test]
    fn path_schema_falls_back_to_extension() {
        let catalog = ArtifactCatalog::builtin();
        assert_eq!(catalog.schema_for_path("artifacts/notes.json").format, ArtifactFormat::Json);
        assert_eq!(catalog.schema_for_path("artifacts/charter.md").required.len(), 3);
    }
}
