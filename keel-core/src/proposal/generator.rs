//! Content generation seam.
//!
//! Anything that produces artifact text (templates, a model, a remote
//! service) implements [`ContentGenerator`]. Its output is treated as
//! untrusted and validated against the artifact schema before it can become
//! part of a proposal.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::{Project, RaidItem, RaidStatus, RaidSummary, WorkflowRecord};

/// Repository state handed to a generator, all read at one revision.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub intent: String,
    pub project: Project,
    pub workflow: WorkflowRecord,
    pub raid_items: Vec<RaidItem>,
    /// Current content of the target artifact, if it exists.
    pub current_content: Option<String>,
    pub revision: Option<String>,
    pub requested_by: String,
    pub generated_at: DateTime<Utc>,
}

impl GenerationContext {
    /// Flat `name -> value` view used by template rendering.
    pub fn variables(&self) -> BTreeMap<&'static str, String> {
        let summary = RaidSummary::from_items(&self.raid_items);
        let mut vars = BTreeMap::new();
        vars.insert("project.key", self.project.key.clone());
        vars.insert("project.name", self.project.name.clone());
        vars.insert("project.methodology", self.project.methodology.as_str().to_string());
        vars.insert(
            "project.description",
            self.project
                .description
                .clone()
                .unwrap_or_else(|| "_No description recorded._".to_string()),
        );
        vars.insert("project.created_at", self.project.created_at.format("%Y-%m-%d").to_string());
        vars.insert("project.created_by", self.project.created_by.clone());
        vars.insert("workflow.state", self.workflow.state.as_str().to_string());
        vars.insert(
            "workflow.entered_at",
            self.workflow.entered_at.format("%Y-%m-%d").to_string(),
        );
        vars.insert(
            "workflow.next",
            self.workflow
                .state
                .successors()
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        );
        vars.insert("raid.total", summary.total.to_string());
        vars.insert("raid.open", summary.open.to_string());
        vars.insert("raid.risks", summary.risks.to_string());
        vars.insert("raid.assumptions", summary.assumptions.to_string());
        vars.insert("raid.issues", summary.issues.to_string());
        vars.insert("raid.dependencies", summary.dependencies.to_string());
        vars.insert("raid.critical_open", summary.critical_open.to_string());
        vars.insert("raid.open_table", self.open_items_table());
        vars.insert("raid.full_table", self.full_table());
        vars.insert("revision", self.revision.clone().unwrap_or_else(|| "none".to_string()));
        vars.insert("requested_by", self.requested_by.clone());
        vars.insert("generated_at", self.generated_at.format("%Y-%m-%d %H:%M UTC").to_string());
        vars
    }

    fn open_items_table(&self) -> String {
        let open: Vec<&RaidItem> = self
            .raid_items
            .iter()
            .filter(|i| matches!(i.status, RaidStatus::Open | RaidStatus::InProgress))
            .collect();
        if open.is_empty() {
            return "_No open items._".to_string();
        }
        let mut table = String::from("| Id | Type | Title | Priority | Owner |\n|---|---|---|---|---|\n");
        for item in open {
            table.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                item.id,
                item.item_type.as_str(),
                escape_cell(&item.title),
                item.priority.as_str(),
                item.owner.as_deref().map(escape_cell).unwrap_or_else(|| "-".to_string()),
            ));
        }
        table.trim_end().to_string()
    }

    fn full_table(&self) -> String {
        if self.raid_items.is_empty() {
            return "_The register is empty._".to_string();
        }
        let mut table = String::from(
            "| Id | Type | Title | Status | Priority | Impact | Likelihood | Due |\n|---|---|---|---|---|---|---|---|\n",
        );
        for item in &self.raid_items {
            table.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} | {} |\n",
                item.id,
                item.item_type.as_str(),
                escape_cell(&item.title),
                item.status.as_str(),
                item.priority.as_str(),
                item.impact.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
                item.likelihood.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
                item.due_date.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
            ));
        }
        table.trim_end().to_string()
    }
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

pub trait ContentGenerator: Send + Sync {
    /// Render the template named `template_ref` for `context`.
    fn generate(&self, template_ref: &str, context: &GenerationContext) -> Result<String>;
}

/// Renders `{{name}}` placeholders from [`GenerationContext::variables`].
#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator {
    templates: HashMap<String, String>,
}

impl TemplateGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generator preloaded with the built-in artifact templates.
    pub fn builtin() -> Self {
        Self::new()
            .with_template("status_report", STATUS_REPORT)
            .with_template("project_charter", PROJECT_CHARTER)
            .with_template("raid_log", RAID_LOG)
    }

    pub fn with_template(mut self, template_ref: &str, body: &str) -> Self {
        self.templates.insert(template_ref.to_string(), body.to_string());
        self
    }
}

impl ContentGenerator for TemplateGenerator {
    fn generate(&self, template_ref: &str, context: &GenerationContext) -> Result<String> {
        let template = self.templates.get(template_ref).ok_or_else(|| Error::Generator {
            template_ref: template_ref.to_string(),
            reason: "no such template".to_string(),
        })?;
        render(template_ref, template, &context.variables())
    }
}

fn render(template_ref: &str, template: &str, vars: &BTreeMap<&'static str, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| Error::Generator {
            template_ref: template_ref.to_string(),
            reason: "unterminated placeholder".to_string(),
        })?;
        let name = after[..end].trim();
        let value = vars.get(name).ok_or_else(|| Error::Generator {
            template_ref: template_ref.to_string(),
            reason: format!("unknown placeholder '{name}'"),
        })?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

const STATUS_REPORT: &str = "# Status Report: {{project.name}}

| Field | Value |
|---|---|
| Project | {{project.key}} |
| Methodology | {{project.methodology}} |
| Phase | {{workflow.state}} (since {{workflow.entered_at}}) |
| Next phases | {{workflow.next}} |
| Revision | {{revision}} |
| Generated | {{generated_at}} by {{requested_by}} |

## Summary

{{raid.open}} of {{raid.total}} RAID items are open, {{raid.critical_open}} of them critical.

## RAID Overview

| Risks | Assumptions | Issues | Dependencies |
|---|---|---|---|
| {{raid.risks}} | {{raid.assumptions}} | {{raid.issues}} | {{raid.dependencies}} |

## Open Items

{{raid.open_table}}
";

const PROJECT_CHARTER: &str = "# Project Charter: {{project.name}}

## Purpose

{{project.description}}

## Approach

Methodology: {{project.methodology}}. The project was opened on {{project.created_at}} by {{project.created_by}}
and is currently in the {{workflow.state}} phase.

## Known Risks and Constraints

{{raid.open_table}}

## Approval

Prepared by {{requested_by}} on {{generated_at}}.
";

const RAID_LOG: &str = "# RAID Log: {{project.name}}

Revision {{revision}}, generated {{generated_at}}.

## Register

{{raid.full_table}}
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Methodology, WorkflowRecord};

    fn context() -> GenerationContext {
        let now = Utc::now();
        GenerationContext {
            intent: "generate_status_report".into(),
            project: Project {
                key: "P1".into(),
                name: "Apollo".into(),
                methodology: Methodology::Agile,
                description: None,
                created_at: now,
                created_by: "dana".into(),
                raid_counter: 0,
            },
            workflow: WorkflowRecord::initial("dana", now),
            raid_items: Vec::new(),
            current_content: None,
            revision: None,
            requested_by: "dana".into(),
            generated_at: now,
        }
    }

    #[test]
    fn builtin_templates_only_use_known_placeholders() {
        let generator = TemplateGenerator::builtin();
        for template in ["status_report", "project_charter", "raid_log"] {
            let text = generator.generate(template, &context()).unwrap();
            assert!(text.contains("Apollo"));
            assert!(!text.contains("{{"));
        }
    }

    #[test]
    fn unknown_placeholder_is_a_generator_error() {
        let generator = TemplateGenerator::new().with_template("t", "hello {{ nobody }}");
        let err = generator.generate("t", &context()).unwrap_err();
        assert!(matches!(err, Error::Generator { ref reason, .. } if reason.contains("nobody")));
    }

    #[test]
    fn unterminated_placeholder_is_rejected() {
        let generator = TemplateGenerator::new().with_template("t", "hello {{ project.key");
        assert!(generator.generate("t", &context()).is_err());
    }

    #[test]
    fn missing_template_is_reported() {
        let err = TemplateGenerator::new().generate("nope", &context()).unwrap_err();
        assert!(matches!(err, Error::Generator { .. }));
    }
}
