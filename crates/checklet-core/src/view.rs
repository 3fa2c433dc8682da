use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use tracing::trace;

use crate::task::Task;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterMode {
    #[default]
    All,
    Active,
    Completed,
}

impl FilterMode {
    pub fn names() -> [&'static str; 3] {
        ["all", "active", "completed"]
    }

    fn admits(self, task: &Task) -> bool {
        match self {
            FilterMode::All => true,
            FilterMode::Active => !task.done,
            FilterMode::Completed => task.done,
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterMode::All => "all",
            FilterMode::Active => "active",
            FilterMode::Completed => "completed",
        };
        f.write_str(name)
    }
}

impl FromStr for FilterMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(FilterMode::All),
            "active" | "pending" => Ok(FilterMode::Active),
            "completed" | "done" => Ok(FilterMode::Completed),
            other => Err(anyhow!("invalid filter mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViewQuery {
    pub mode: FilterMode,
    pub query: String,
    pub list_id: String,
}

impl ViewQuery {
    pub fn new(mode: FilterMode, query: impl Into<String>, list_id: impl Into<String>) -> Self {
        Self {
            mode,
            query: query.into(),
            list_id: list_id.into(),
        }
    }
}

/// Read-only projection of `tasks` for display: active list only, filter
/// mode, search, then open tasks before done ones, newest first within each
/// group. Ties keep collection order.
#[tracing::instrument(skip(tasks), fields(total = tasks.len()))]
pub fn project<'a>(tasks: &'a [Task], q: &ViewQuery) -> Vec<&'a Task> {
    let needle = q.query.trim().to_lowercase();

    let mut out: Vec<&Task> = tasks
        .iter()
        .filter(|task| task.list_id == q.list_id)
        .filter(|task| q.mode.admits(task))
        .filter(|task| needle.is_empty() || task.text.to_lowercase().contains(&needle))
        .collect();

    out.sort_by_key(|task| (task.done, Reverse(task.created_at)));
    trace!(visible = out.len(), "projected view");
    out
}
