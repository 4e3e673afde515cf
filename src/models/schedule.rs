// Scheduler output: ordered targets for the next probing round.

use serde::Serialize;

/// Why a target was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    /// Highest delay variance among already-measured targets.
    Ranked,
    /// Uniform random draw from the catalog.
    Blind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTarget {
    pub target_id: String,
    pub selection: Selection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub agent_id: String,
    /// Ranked picks first, then blind picks.
    pub entries: Vec<ScheduledTarget>,
}

impl Schedule {
    pub fn target_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.target_id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, selection: Selection) -> usize {
        self.entries
            .iter()
            .filter(|e| e.selection == selection)
            .count()
    }
}
