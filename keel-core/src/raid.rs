//! RAID register: risks, assumptions, issues and dependencies.
//!
//! One file per item under `raid/`, named by id. Ids come from a counter kept
//! in `project.json`, bumped in the same commit that creates the item.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::error::{Error, Result};
use crate::models::*;
use crate::projects::load_project;
use crate::repo::Change;
use crate::shared::{to_document, Shared, PROJECT_FILE, RAID_DIR};

const MAX_TITLE_LEN: usize = 200;

#[derive(Clone)]
pub struct RaidRegister {
    shared: Arc<Shared>,
}

impl RaidRegister {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn create(&self, project_key: &str, input: CreateRaidItemInput, actor: &Actor) -> Result<RaidItem> {
        actor.validate()?;
        let title = validate_title(&input.title)?;
        validate_scale("impact", input.impact)?;
        validate_scale("likelihood", input.likelihood)?;
        let owner = normalize_owner(input.owner)?;

        let shared = &self.shared;
        shared.locks.with(project_key, || {
            let head = shared.require_project(project_key)?;
            let mut project = load_project(shared, project_key, &head)?;
            project.raid_counter += 1;

            let now = Utc::now();
            let item = RaidItem {
                id: format!("{}-{}", input.item_type.id_prefix(), project.raid_counter),
                item_type: input.item_type,
                title,
                description: input.description.unwrap_or_default(),
                status: input.status.unwrap_or(RaidStatus::Open),
                owner,
                priority: input.priority.unwrap_or(Priority::Medium),
                impact: input.impact,
                likelihood: input.likelihood,
                due_date: input.due_date,
                created_at: now,
                updated_at: now,
            };

            let commit = shared.commit(
                project_key,
                &[
                    Change::write(item_path(&item.id), to_document(&item)?),
                    Change::write(PROJECT_FILE, to_document(&project)?),
                ],
                format!("Add {} {}: {}", item.item_type.as_str(), item.id, item.title),
                &actor.name,
                Some(&head),
            )?;

            shared.audit.record(
                &AuditEvent::new(
                    AuditEventType::RaidItemCreated,
                    project_key,
                    &actor.name,
                    format!("Created {} {}", item.item_type.as_str(), item.id),
                )
                .with_resource(commit)
                .with_correlation(actor.correlation_id.clone())
                .with_details(json!({
                    "id": item.id,
                    "type": item.item_type.as_str(),
                    "title": item.title,
                    "priority": item.priority.as_str(),
                })),
            );

            Ok(item)
        })
    }

    pub fn get(&self, project_key: &str, id: &str) -> Result<RaidItem> {
        validate_item_id(id)?;
        let head = self.shared.require_project(project_key)?;
        self.shared
            .read_json(project_key, &head, &item_path(id))?
            .ok_or_else(|| Error::not_found("raid_item", format!("{project_key}/{id}")))
    }

    /// Items matching every set filter field, in insertion order.
    pub fn list(&self, project_key: &str, filter: &RaidFilter) -> Result<Vec<RaidItem>> {
        let head = self.shared.require_project(project_key)?;
        Ok(load_items(&self.shared, project_key, &head)?
            .into_iter()
            .filter(|item| filter.matches(item))
            .collect())
    }

    /// Like [`RaidRegister::list`], for untyped filter values.
    pub fn query(&self, project_key: &str, query: RaidQuery) -> Result<Vec<RaidItem>> {
        let filter = query.into_filter()?;
        self.list(project_key, &filter)
    }

    pub fn update(
        &self,
        project_key: &str,
        id: &str,
        patch: UpdateRaidItemInput,
        actor: &Actor,
    ) -> Result<RaidItem> {
        actor.validate()?;
        validate_item_id(id)?;
        if patch.is_empty() {
            return Err(Error::validation("raid_item", "patch", "no fields to update"));
        }
        let title = patch.title.as_deref().map(validate_title).transpose()?;
        validate_scale("impact", patch.impact)?;
        validate_scale("likelihood", patch.likelihood)?;
        let owner = normalize_owner(patch.owner.clone())?;

        let shared = &self.shared;
        shared.locks.with(project_key, || {
            let head = shared.require_project(project_key)?;
            let existing: RaidItem = shared
                .read_json(project_key, &head, &item_path(id))?
                .ok_or_else(|| Error::not_found("raid_item", format!("{project_key}/{id}")))?;

            let mut changed = Vec::new();
            let mut item = existing.clone();
            if let Some(title) = title {
                item.title = title;
            }
            if let Some(description) = patch.description {
                item.description = description;
            }
            if let Some(status) = patch.status {
                item.status = status;
            }
            if owner.is_some() {
                item.owner = owner;
            }
            if let Some(priority) = patch.priority {
                item.priority = priority;
            }
            if patch.impact.is_some() {
                item.impact = patch.impact;
            }
            if patch.likelihood.is_some() {
                item.likelihood = patch.likelihood;
            }
            if patch.due_date.is_some() {
                item.due_date = patch.due_date;
            }
            for (field, differs) in [
                ("title", item.title != existing.title),
                ("description", item.description != existing.description),
                ("status", item.status != existing.status),
                ("owner", item.owner != existing.owner),
                ("priority", item.priority != existing.priority),
                ("impact", item.impact != existing.impact),
                ("likelihood", item.likelihood != existing.likelihood),
                ("due_date", item.due_date != existing.due_date),
            ] {
                if differs {
                    changed.push(field);
                }
            }
            item.updated_at = Utc::now();

            let commit = shared.commit(
                project_key,
                &[Change::write(item_path(id), to_document(&item)?)],
                format!("Update {} {}", item.item_type.as_str(), id),
                &actor.name,
                Some(&head),
            )?;

            shared.audit.record(
                &AuditEvent::new(
                    AuditEventType::RaidItemUpdated,
                    project_key,
                    &actor.name,
                    format!("Updated {} {}", item.item_type.as_str(), id),
                )
                .with_resource(commit)
                .with_correlation(actor.correlation_id.clone())
                .with_details(json!({ "id": id, "changed": changed })),
            );

            Ok(item)
        })
    }

    pub fn delete(&self, project_key: &str, id: &str, actor: &Actor) -> Result<()> {
        actor.validate()?;
        validate_item_id(id)?;

        let shared = &self.shared;
        shared.locks.with(project_key, || {
            let head = shared.require_project(project_key)?;
            let existing: RaidItem = shared
                .read_json(project_key, &head, &item_path(id))?
                .ok_or_else(|| Error::not_found("raid_item", format!("{project_key}/{id}")))?;

            let commit = shared.commit(
                project_key,
                &[Change::delete(item_path(id))],
                format!("Remove {} {}", existing.item_type.as_str(), id),
                &actor.name,
                Some(&head),
            )?;

            shared.audit.record(
                &AuditEvent::new(
                    AuditEventType::RaidItemDeleted,
                    project_key,
                    &actor.name,
                    format!("Deleted {} {}", existing.item_type.as_str(), id),
                )
                .with_resource(commit)
                .with_correlation(actor.correlation_id.clone())
                .with_details(json!({ "id": id, "title": existing.title })),
            );

            Ok(())
        })
    }

    /// Counts by type and status.
    pub fn summary(&self, project_key: &str) -> Result<RaidSummary> {
        let items = self.list(project_key, &RaidFilter::default())?;
        Ok(RaidSummary::from_items(&items))
    }
}

fn item_path(id: &str) -> String {
    format!("{RAID_DIR}{id}.json")
}

/// All items at a revision, ordered by id sequence.
pub(crate) fn load_items(shared: &Shared, project_key: &str, revision: &str) -> Result<Vec<RaidItem>> {
    let mut items = Vec::new();
    for path in shared.store.list_at(project_key, revision, RAID_DIR)? {
        if !path.ends_with(".json") {
            continue;
        }
        if let Some(item) = shared.read_json::<RaidItem>(project_key, revision, &path)? {
            items.push(item);
        }
    }
    items.sort_by_key(RaidItem::sequence);
    Ok(items)
}

fn validate_item_id(id: &str) -> Result<()> {
    let valid = id
        .split_once('-')
        .is_some_and(|(prefix, _)| RaidType::ALL.iter().any(|t| t.id_prefix() == prefix))
        && parse_sequence(id).is_some();
    if valid {
        Ok(())
    } else {
        Err(Error::validation(
            "raid_item",
            "id",
            format!("'{id}' is not a RAID id (expected e.g. R-1, A-2, I-3, D-4)"),
        ))
    }
}

fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(Error::validation(
            "raid_item",
            "title",
            format!("must be 1 to {MAX_TITLE_LEN} characters"),
        ));
    }
    Ok(title.to_string())
}

fn validate_scale(field: &'static str, value: Option<u8>) -> Result<()> {
    match value {
        Some(v) if !(1..=5).contains(&v) => Err(Error::validation(
            "raid_item",
            field,
            format!("{v} is outside the 1-5 scale"),
        )),
        _ => Ok(()),
    }
}

fn normalize_owner(owner: Option<String>) -> Result<Option<String>> {
    match owner.map(|o| o.trim().to_string()) {
        Some(o) if o.is_empty() => Err(Error::validation("raid_item", "owner", "must not be blank")),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_ids_need_a_known_prefix_and_number() {
        assert!(validate_item_id("R-1").is_ok());
        assert!(validate_item_id("D-42").is_ok());
        for bad in ["X-1", "R-", "R1", "../R-1", "R-1/x"] {
            assert!(validate_item_id(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn scale_is_one_to_five() {
        assert!(validate_scale("impact", Some(0)).is_err());
        assert!(validate_scale("impact", Some(6)).is_err());
        assert!(validate_scale("impact", Some(5)).is_ok());
        assert!(validate_scale("impact", None).is_ok());
    }
}
