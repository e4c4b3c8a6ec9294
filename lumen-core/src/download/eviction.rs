use std::path::PathBuf;

use super::catalog::CatalogRow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlannedEviction {
    pub id: i64,
    pub url: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Default)]
pub(crate) struct EvictionPlan {
    pub planned: Vec<PlannedEviction>,
    pub skipped_pinned: usize,
    pub total_bytes_before: u64,
    pub total_bytes_after: u64,
}

/// Picks at most `max_deletes` rows to delete, in the given (least recently
/// accessed first) order, until `total_bytes` fits in `capacity`. Pinned
/// rows are skipped and do not count against `max_deletes`.
pub(crate) fn plan_evictions(
    candidates: Vec<CatalogRow>,
    total_bytes: u64,
    capacity: u64,
    max_deletes: usize,
    is_pinned: impl Fn(&str) -> bool,
) -> EvictionPlan {
    let mut plan = EvictionPlan {
        total_bytes_before: total_bytes,
        ..EvictionPlan::default()
    };

    let mut total = total_bytes;
    for row in candidates {
        if total <= capacity || plan.planned.len() >= max_deletes {
            break;
        }
        if is_pinned(&row.url) {
            plan.skipped_pinned += 1;
            continue;
        }
        total = total.saturating_sub(row.size);
        plan.planned.push(PlannedEviction {
            id: row.id,
            url: row.url,
            path: row.path,
            size: row.size,
        });
    }

    plan.total_bytes_after = total;
    plan
}
