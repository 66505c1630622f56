//! Retention selection
//!
//! Archives are bucketed by calendar day, ISO week and calendar month of
//! their creation time. For each granularity the newest archive of each of
//! the N most recent buckets is kept; the result is the union of the three
//! selections. Bucketing uses the archive's wall-clock timestamp as recorded
//! by the archive engine.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDateTime};

use crate::models::{Archive, RetentionPolicy};

/// Calendar bucket an archive falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bucket {
    /// (year, day of year)
    Day(i32, u32),
    /// (ISO year, ISO week)
    Week(i32, u32),
    /// (year, month)
    Month(i32, u32),
}

pub fn day_bucket(at: &NaiveDateTime) -> Bucket {
    Bucket::Day(at.year(), at.ordinal())
}

pub fn week_bucket(at: &NaiveDateTime) -> Bucket {
    let week = at.iso_week();
    Bucket::Week(week.year(), week.week())
}

pub fn month_bucket(at: &NaiveDateTime) -> Bucket {
    Bucket::Month(at.year(), at.month())
}

/// Newest archive of each of the `count` most recent buckets
fn keep_per_bucket<'a>(
    newest_first: &[&'a Archive],
    count: u32,
    bucket_of: fn(&NaiveDateTime) -> Bucket,
    keep: &mut BTreeSet<String>,
) {
    let mut seen: Option<Bucket> = None;
    let mut taken = 0;
    for archive in newest_first {
        if taken >= count {
            break;
        }
        let bucket = bucket_of(&archive.created_at);
        if seen != Some(bucket) {
            seen = Some(bucket);
            keep.insert(archive.name.clone());
            taken += 1;
        }
    }
}

/// Names of the archives the policy retains
///
/// `archives` is expected newest first; the order is re-established here
/// so a caller's ordering mistake cannot cause a wrong deletion. Pure and
/// deterministic.
pub fn select_to_keep(archives: &[Archive], policy: &RetentionPolicy) -> BTreeSet<String> {
    let mut ordered: Vec<&Archive> = archives.iter().collect();
    ordered.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.name.cmp(&a.name))
    });

    let mut keep = BTreeSet::new();
    keep_per_bucket(&ordered, policy.daily, day_bucket, &mut keep);
    keep_per_bucket(&ordered, policy.weekly, week_bucket, &mut keep);
    keep_per_bucket(&ordered, policy.monthly, month_bucket, &mut keep);
    keep
}

/// Archives the policy would delete, newest first
pub fn select_to_delete(archives: &[Archive], policy: &RetentionPolicy) -> Vec<Archive> {
    let keep = select_to_keep(archives, policy);
    let mut doomed: Vec<Archive> = archives
        .iter()
        .filter(|a| !keep.contains(&a.name))
        .cloned()
        .collect();
    doomed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    doomed
}
