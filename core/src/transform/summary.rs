//! Structured outcome of a run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::models::ErrorMarker;

/// One error-marked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetFailure {
    pub entity_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Per-widget counts across the entities of a group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetSummary {
    pub widget: String,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<WidgetFailure>,
}

impl WidgetSummary {
    pub fn new(widget: &str) -> Self {
        Self {
            widget: widget.to_string(),
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// Every entity processed and results persisted
    Completed,
    /// Group-level error: nothing persisted
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub group_by: String,
    pub status: GroupStatus,
    pub entities: usize,
    /// Results persisted (successes and error markers)
    pub results: usize,
    /// Widgets in execution order
    pub widgets: Vec<WidgetSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorMarker>,
    pub duration_ms: u64,
}

impl GroupSummary {
    pub fn is_completed(&self) -> bool {
        self.status == GroupStatus::Completed
    }

    pub fn widget(&self, name: &str) -> Option<&WidgetSummary> {
        self.widgets.iter().find(|w| w.widget == name)
    }

    pub fn failed_results(&self) -> usize {
        self.widgets.iter().map(|w| w.failed).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Groups in configuration order
    pub groups: Vec<GroupSummary>,
}

impl RunSummary {
    pub fn group(&self, group_by: &str) -> Option<&GroupSummary> {
        self.groups.iter().find(|g| g.group_by == group_by)
    }

    pub fn is_success(&self) -> bool {
        self.groups.iter().all(GroupSummary::is_completed)
    }

    /// Process exit code: 0 when every group completed, 1 otherwise.
    ///
    /// Error-marked results of non-required widgets do not fail the run.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}", self.run_id)?;
        for group in &self.groups {
            match (&group.status, &group.error) {
                (GroupStatus::Failed, Some(error)) => {
                    writeln!(f, "  ✗ {} [{}] {}", group.group_by, error.kind, error.message)?;
                }
                _ => writeln!(
                    f,
                    "  ✓ {}: {} entities, {} results ({} errors) in {} ms",
                    group.group_by,
                    group.entities,
                    group.results,
                    group.failed_results(),
                    group.duration_ms
                )?,
            }
            for widget in &group.widgets {
                if widget.failed > 0 {
                    writeln!(f, "      {}: {} ok, {} failed", widget.widget, widget.succeeded, widget.failed)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str, status: GroupStatus) -> GroupSummary {
        GroupSummary {
            group_by: name.into(),
            status,
            entities: 2,
            results: 2,
            widgets: vec![WidgetSummary {
                widget: "stats".into(),
                succeeded: 1,
                failed: 1,
                failures: vec![WidgetFailure {
                    entity_id: "2".into(),
                    kind: ErrorKind::QueryTimeout,
                    message: "slow".into(),
                }],
            }],
            error: None,
            duration_ms: 5,
        }
    }

    fn summary(groups: Vec<GroupSummary>) -> RunSummary {
        RunSummary {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            groups,
        }
    }

    #[test]
    fn test_exit_code() {
        let ok = summary(vec![group("taxon", GroupStatus::Completed)]);
        assert_eq!(ok.exit_code(), 0);
        assert_eq!(ok.group("taxon").unwrap().failed_results(), 1);

        let mut failed = group("plot", GroupStatus::Failed);
        failed.error = Some(ErrorMarker {
            kind: ErrorKind::CyclicWidgetDependency,
            message: "a -> b".into(),
        });
        let run = summary(vec![group("taxon", GroupStatus::Completed), failed]);
        assert_eq!(run.exit_code(), 1);
        assert!(run.to_string().contains("✗ plot [CyclicWidgetDependencyError] a -> b"));
    }

    #[test]
    fn test_serializes_status() {
        let json = serde_json::to_value(summary(vec![group("taxon", GroupStatus::Completed)])).unwrap();
        assert_eq!(json["groups"][0]["status"], "completed");
        assert!(json["groups"][0].get("error").is_none());
        assert_eq!(json["groups"][0]["widgets"][0]["failures"][0]["kind"], "QueryTimeoutError");
    }
}
