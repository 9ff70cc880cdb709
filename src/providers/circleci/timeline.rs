//! Row layout for a workflow's job timeline.
//!
//! Each job gets a single effective parent: the dependency that finished
//! last, i.e. the one that actually gated its start. The parent links form a
//! forest under a virtual root, which is packed post-order into contiguous
//! row ranges: a leaf takes one row, an inner job spans exactly the rows of
//! its children. Siblings never overlap.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;

use super::types::{Job, Status};

/// Half-open range of row units `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowRange {
    pub start: usize,
    pub end: usize,
}

impl RowRange {
    /// Number of row units covered.
    pub fn span(&self) -> usize {
        self.end - self.start
    }
}

/// Parent links and packed rows for one workflow's jobs.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    /// Effective parent per job id; `None` is the virtual root.
    pub parents: HashMap<String, Option<String>>,
    /// Children per parent in traversal order; the `None` key lists roots.
    pub children: HashMap<Option<String>, Vec<String>>,
    pub rows: HashMap<String, RowRange>,
    /// Total row units, i.e. the chart height.
    pub height: usize,
}

/// One drawable job rectangle; x is in minutes since the earliest start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub job_id: String,
    pub name: String,
    pub status: Status,
    pub job_number: Option<u64>,
    /// Name of the effective parent, if any
    pub after: Option<String>,
    pub rows: RowRange,
    pub start_minutes: f64,
    pub end_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chart {
    pub bars: Vec<Bar>,
    pub height: usize,
    /// Minutes between the earliest start and the latest stop.
    pub span_minutes: f64,
}

/// Lays out `jobs` (in crawl order) into non-overlapping rows.
///
/// Children are visited by start time, jobs without one last; equal
/// keys keep crawl order. Dependencies that are unknown or have not
/// stopped are ignored, so such a job may end up under the root.
pub fn layout(jobs: &[Job]) -> Layout {
    let by_id: HashMap<&str, &Job> = jobs.iter().map(|job| (job.id.as_str(), job)).collect();

    let parents: HashMap<String, Option<String>> = jobs
        .iter()
        .map(|job| (job.id.clone(), effective_parent(job, &by_id)))
        .collect();

    let mut children: HashMap<Option<String>, Vec<String>> = HashMap::new();
    children.insert(None, Vec::new());
    for job in jobs {
        children.entry(Some(job.id.clone())).or_default();
    }
    for job in jobs {
        let parent = parents.get(&job.id).cloned().flatten();
        children.entry(parent).or_default().push(job.id.clone());
    }
    for ids in children.values_mut() {
        // Stable: equal start times keep crawl order
        ids.sort_by_key(|id| start_key(by_id.get(id.as_str()).and_then(|j| j.started_at)));
    }

    let mut packer = Packer {
        children: &children,
        rows: HashMap::new(),
        visited: HashSet::new(),
    };
    let mut height = packer.pack(None, 0);

    // A parent cycle is unreachable from the root; lay it out as extra roots
    // so every job still owns a row.
    for job in jobs {
        if !packer.visited.contains(job.id.as_str()) {
            warn!("Job {} is not reachable from the root, placing it at the bottom", job.id);
            height = packer.pack(Some(job.id.as_str()), height);
        }
    }

    Layout {
        parents,
        rows: packer.rows,
        children,
        height,
    }
}

fn start_key(started_at: Option<DateTime<Utc>>) -> (bool, Option<DateTime<Utc>>) {
    (started_at.is_none(), started_at)
}

fn effective_parent(job: &Job, by_id: &HashMap<&str, &Job>) -> Option<String> {
    let finished = job.dependencies.iter().filter_map(|dep| match by_id.get(dep.as_str()) {
        Some(dep_job) => dep_job.stopped_at.map(|stop| (stop, dep_job)),
        None => {
            debug!("Job {} depends on unknown job {dep}", job.id);
            None
        }
    });

    // max_by_key keeps the last maximum, so ties go to the later-listed dependency
    finished
        .max_by_key(|(stop, _)| *stop)
        .map(|(_, dep_job)| dep_job.id.clone())
}

struct Packer<'a> {
    children: &'a HashMap<Option<String>, Vec<String>>,
    rows: HashMap<String, RowRange>,
    visited: HashSet<String>,
}

impl Packer<'_> {
    /// Assigns rows to the subtree under `node` starting at row `y`;
    /// returns the first row after it.
    fn pack(&mut self, node: Option<&str>, y: usize) -> usize {
        if let Some(id) = node {
            self.visited.insert(id.to_string());
        }

        let children = self.children;
        let kids: Vec<&String> = children
            .get(&node.map(ToString::to_string))
            .map(|ids| ids.iter().filter(|id| !self.visited.contains(*id)).collect())
            .unwrap_or_default();

        let end = if kids.is_empty() {
            // The root with no jobs has no rows
            if node.is_some() {
                y + 1
            } else {
                y
            }
        } else {
            let mut next = y;
            for kid in kids {
                if !self.visited.contains(kid) {
                    next = self.pack(Some(kid.as_str()), next);
                }
            }
            next
        };

        if let Some(id) = node {
            self.rows.insert(id.to_string(), RowRange { start: y, end });
        }
        end
    }
}

impl Layout {
    /// Job ids in depth-first order from the root, parents before their
    /// children. Jobs stuck in a parent cycle follow, ordered by row.
    pub fn traversal(&self) -> Vec<&str> {
        let mut order = Vec::with_capacity(self.rows.len());
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = self
            .children
            .get(&None)
            .map(|roots| roots.iter().rev().map(String::as_str).collect())
            .unwrap_or_default();

        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            if let Some(kids) = self.children.get(&Some(id.to_string())) {
                stack.extend(kids.iter().rev().map(String::as_str));
            }
        }

        let mut stranded: Vec<&str> = self
            .rows
            .keys()
            .map(String::as_str)
            .filter(|id| !seen.contains(id))
            .collect();
        stranded.sort_by_key(|id| (self.rows[*id].start, self.rows[*id].end, *id));
        order.extend(stranded);
        order
    }

    /// Rectangle geometry for every job with both a start and a stop time,
    /// in [`Layout::traversal`] order. Jobs without them keep their rows but
    /// get no bar.
    pub fn chart(&self, jobs: &[Job]) -> Chart {
        let t0 = jobs.iter().filter_map(|job| job.started_at).min();
        let t1 = jobs.iter().filter_map(|job| job.stopped_at).max();

        let minutes_since = |t: DateTime<Utc>, origin: DateTime<Utc>| {
            #[allow(clippy::cast_precision_loss)]
            let millis = (t - origin).num_milliseconds() as f64;
            millis / 60_000.0
        };

        let by_id: HashMap<&str, &Job> = jobs.iter().map(|job| (job.id.as_str(), job)).collect();
        let bars: Vec<Bar> = match t0 {
            Some(t0) => self
                .traversal()
                .into_iter()
                .filter_map(|id| {
                    let job = by_id.get(id)?;
                    let (start, stop) = (job.started_at?, job.stopped_at?);
                    let rows = *self.rows.get(id)?;
                    let after = self
                        .parents
                        .get(id)
                        .cloned()
                        .flatten()
                        .and_then(|parent| by_id.get(parent.as_str()).map(|p| p.name.clone()));
                    Some(Bar {
                        job_id: job.id.clone(),
                        name: job.name.clone(),
                        status: job.status.clone(),
                        job_number: job.job_number,
                        after,
                        rows,
                        start_minutes: minutes_since(start, t0),
                        end_minutes: minutes_since(stop, t0),
                    })
                })
                .collect(),
            None => Vec::new(),
        };

        let span_minutes = match (t0, t1) {
            (Some(t0), Some(t1)) if t1 > t0 => minutes_since(t1, t0),
            _ => 0.0,
        };

        Chart {
            bars,
            height: self.height,
            span_minutes,
        }
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: i64) -> Option<DateTime<Utc>> {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        Some(base + chrono::Duration::minutes(minute))
    }

    fn intersects(a: &RowRange, b: &RowRange) -> bool {
        a.start < b.end && b.start < a.end
    }

    fn create_job(id: &str, deps: &[&str], start: Option<i64>, stop: Option<i64>) -> Job {
        Job {
            id: id.to_string(),
            name: format!("{id}-job"),
            status: Status::Success,
            job_number: None,
            started_at: start.and_then(at),
            stopped_at: stop.and_then(at),
            dependencies: deps.iter().map(ToString::to_string).collect(),
        }
    }

    fn range(start: usize, end: usize) -> RowRange {
        RowRange { start, end }
    }

    /// Siblings are disjoint and every parent spans exactly its children.
    fn assert_well_packed(layout: &Layout) {
        for (parent, kids) in &layout.children {
            for (i, a) in kids.iter().enumerate() {
                for b in &kids[i + 1..] {
                    assert!(
                        !intersects(&layout.rows[a], &layout.rows[b]),
                        "siblings {a} and {b} overlap"
                    );
                }
            }
            if let (Some(parent), false) = (parent, kids.is_empty()) {
                let covered: usize = kids.iter().map(|k| layout.rows[k].span()).sum();
                let start = kids.iter().map(|k| layout.rows[k].start).min().unwrap();
                let end = kids.iter().map(|k| layout.rows[k].end).max().unwrap();
                assert_eq!(layout.rows[parent], range(start, end));
                assert_eq!(covered, end - start, "children of {parent} leave a gap");
            }
        }
    }

    #[test]
    fn test_join_hangs_under_latest_finishing_dependency() {
        let jobs = vec![
            create_job("A", &[], None, Some(10)),
            create_job("B", &[], None, Some(20)),
            create_job("C", &["A", "B"], None, None),
        ];

        let layout = layout(&jobs);

        assert_eq!(layout.parents["C"], Some("B".to_string()));
        assert_eq!(layout.children[&None], vec!["A", "B"]);
        assert_eq!(layout.children[&Some("B".to_string())], vec!["C"]);
        assert_eq!(layout.rows["A"], range(0, 1));
        assert_eq!(layout.rows["B"], range(1, 2));
        assert_eq!(layout.rows["C"], range(1, 2));
        assert_eq!(layout.height, 2);
    }

    #[test]
    fn test_fan_out_parent_spans_children() {
        let jobs = vec![
            create_job("checkout", &[], Some(0), Some(1)),
            create_job("unit", &["checkout"], Some(1), Some(5)),
            create_job("lint", &["checkout"], Some(1), Some(2)),
            create_job("e2e", &["checkout"], Some(2), Some(9)),
            create_job("deploy", &["unit", "e2e", "lint"], Some(9), Some(10)),
            create_job("docs", &[], Some(0), Some(3)),
        ];

        let layout = layout(&jobs);

        assert_eq!(layout.parents["deploy"], Some("e2e".to_string()));
        assert_eq!(layout.rows["checkout"], range(0, 3));
        assert_eq!(layout.rows["docs"], range(3, 4));
        assert_eq!(layout.height, 4);
        assert_well_packed(&layout);
    }

    #[test]
    fn test_children_ordered_by_start_time() {
        let jobs = vec![
            create_job("root", &[], Some(0), Some(1)),
            create_job("late", &["root"], Some(5), Some(6)),
            create_job("never", &["root"], None, None),
            create_job("early", &["root"], Some(2), Some(3)),
        ];

        let layout = layout(&jobs);

        assert_eq!(
            layout.children[&Some("root".to_string())],
            vec!["early", "late", "never"]
        );
        assert_eq!(layout.rows["early"], range(0, 1));
        assert_eq!(layout.rows["never"], range(2, 3));
    }

    #[test]
    fn test_dangling_dependency_falls_back_to_root() {
        let jobs = vec![
            create_job("A", &[], Some(0), Some(1)),
            create_job("B", &["ghost"], Some(1), Some(2)),
        ];

        let layout = layout(&jobs);

        assert_eq!(layout.parents["B"], None);
        assert_eq!(layout.height, 2);
        assert_well_packed(&layout);
    }

    #[test]
    fn test_unfinished_dependencies_give_no_parent() {
        let jobs = vec![
            create_job("build", &[], Some(0), None),
            create_job("test", &["build"], None, None),
        ];

        let layout = layout(&jobs);

        assert_eq!(layout.parents["test"], None);
        assert_eq!(layout.children[&None], vec!["build", "test"]);
    }

    #[test]
    fn test_equal_stop_times_pick_later_listed_dependency() {
        let jobs = vec![
            create_job("A", &[], Some(0), Some(4)),
            create_job("B", &[], Some(0), Some(4)),
            create_job("C", &["A", "B"], Some(4), Some(5)),
        ];

        assert_eq!(layout(&jobs).parents["C"], Some("B".to_string()));
    }

    #[test]
    fn test_dependency_cycle_does_not_hang() {
        let jobs = vec![
            create_job("A", &["B"], Some(0), Some(1)),
            create_job("B", &["A"], Some(1), Some(2)),
            create_job("C", &[], Some(0), Some(1)),
        ];

        let layout = layout(&jobs);

        assert_eq!(layout.rows.len(), 3);
        assert_eq!(layout.rows["C"], range(0, 1));
        // A spans B, which cannot revisit A
        assert_eq!(layout.rows["A"], range(1, 2));
        assert_eq!(layout.rows["B"], range(1, 2));
        assert_eq!(layout.height, 2);
    }

    #[test]
    fn test_empty_workflow_has_no_rows() {
        let layout = layout(&[]);
        assert_eq!(layout.height, 0);
        assert!(layout.chart(&[]).bars.is_empty());
    }

    #[test]
    fn test_chart_rescales_to_earliest_start_and_skips_untimed_jobs() {
        let jobs = vec![
            create_job("A", &[], Some(3), Some(5)),
            create_job("B", &["A"], Some(5), Some(9)),
            create_job("C", &[], None, None),
        ];

        let layout = layout(&jobs);
        let chart = layout.chart(&jobs);

        assert_eq!(chart.height, 2);
        assert_eq!(chart.span_minutes, 6.0);
        assert_eq!(chart.bars.len(), 2);
        assert_eq!(chart.bars[0].job_id, "A");
        assert_eq!(chart.bars[0].start_minutes, 0.0);
        assert_eq!(chart.bars[1].start_minutes, 2.0);
        assert_eq!(chart.bars[1].end_minutes, 6.0);
        assert_eq!(chart.bars[1].after.as_deref(), Some("A-job"));
        // C still holds a row below the timed jobs
        assert_eq!(layout.rows["C"], range(1, 2));
    }

    #[test]
    fn test_traversal_lists_parents_before_children() {
        let jobs = vec![
            create_job("A", &[], Some(0), Some(1)),
            create_job("B", &["A"], Some(1), Some(2)),
            create_job("C", &["A"], Some(1), Some(3)),
            create_job("D", &[], Some(0), Some(2)),
        ];

        assert_eq!(layout(&jobs).traversal(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_traversal_appends_cycle_members() {
        let jobs = vec![
            create_job("A", &["B"], Some(0), Some(1)),
            create_job("B", &["A"], Some(0), Some(1)),
        ];

        let layout = layout(&jobs);
        let order = layout.traversal();

        assert_eq!(order.len(), 2);
        assert!(order.contains(&"A") && order.contains(&"B"));
    }
}
