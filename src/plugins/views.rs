//! Filtering and column sorting for the experiment list screen.

use crate::core::error::{LabbookError, Result};
use crate::plugins::experiments::{Experiment, ExperimentStatus, ExperimentWithUpdates};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Status,
    CreatedAt,
    #[default]
    UpdatedAt,
}

impl SortKey {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "name" => Ok(SortKey::Name),
            "status" => Ok(SortKey::Status),
            "created_at" => Ok(SortKey::CreatedAt),
            "updated_at" => Ok(SortKey::UpdatedAt),
            other => Err(LabbookError::ValidationError(format!(
                "Unknown sort key '{}'",
                other
            ))),
        }
    }

    fn compare(&self, a: &Experiment, b: &Experiment) -> Ordering {
        match self {
            SortKey::Name => a.name.cmp(&b.name),
            // Text order of the display label, as the list header sorts it.
            SortKey::Status => a.status.as_str().cmp(b.status.as_str()),
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn toggled(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// Defaults to all statuses, most recently updated first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub status: Option<ExperimentStatus>,
    pub sort: SortKey,
    pub direction: SortDirection,
}

impl ListQuery {
    pub fn with_status(mut self, status: Option<ExperimentStatus>) -> Self {
        self.status = status;
        self
    }

    /// Clicking the active column flips direction; a new column starts ascending.
    pub fn toggle_sort(&mut self, key: SortKey) {
        if self.sort == key {
            self.direction = self.direction.toggled();
        } else {
            self.sort = key;
            self.direction = SortDirection::Asc;
        }
    }

    pub fn apply<'a>(&self, rows: &'a [ExperimentWithUpdates]) -> Vec<&'a ExperimentWithUpdates> {
        let mut out: Vec<&ExperimentWithUpdates> = rows
            .iter()
            .filter(|row| self.status.is_none_or(|s| row.experiment.status == s))
            .collect();
        // Stable sort keeps store order (updated_at desc, id desc) among ties.
        out.sort_by(|a, b| {
            let ord = self.sort.compare(&a.experiment, &b.experiment);
            match self.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
        out
    }
}
