//! Criterion matching over candidate resources.
//!
//! Pure functions: no I/O, no shared state. Safe to call from any number of tasks
//! against the same candidate slice.

use job_types::{Criterion, Resource};

/// Whether `resource` satisfies every constraint `criterion` sets.
///
/// id, name, and version must be equal and status equal ignoring case; the criterion's
/// tags must be a subset of the resource's tags.
pub fn matches<R: Resource + ?Sized>(criterion: &Criterion, resource: &R) -> bool {
    if let Some(id) = criterion.id() {
        if id != resource.id() {
            return false;
        }
    }
    if let Some(name) = criterion.name() {
        if name != resource.name() {
            return false;
        }
    }
    if let Some(version) = criterion.version() {
        if version != resource.version() {
            return false;
        }
    }
    if let Some(status) = criterion.status() {
        if !status.eq_ignore_ascii_case(resource.status_name()) {
            return false;
        }
    }
    criterion.tags().is_subset(resource.tags())
}

/// Candidates matching `criterion`, keeping input order.
///
/// When the criterion names no status and `default_status` is given, only candidates in
/// `default_status` are returned.
pub fn filter<R>(criterion: &Criterion, candidates: &[R], default_status: Option<&str>) -> Vec<R>
where
    R: Resource + Clone,
{
    let effective = match default_status {
        Some(status) => criterion.with_default_status(status),
        None => criterion.clone(),
    };
    candidates
        .iter()
        .filter(|c| matches(&effective, *c))
        .cloned()
        .collect()
}
