//! Changeset detection over a stream of per-file revisions.
//!
//! CVS commits one file at a time, so a single logical commit surfaces as a
//! spread of per-file revisions sharing an author and log message within a
//! small time window. The `Clusterer` ingests the revision history of each
//! file and groups those spreads into repository-wide changesets, keyed on
//! (branch, author, log, commitid) with a fuzz window as the tie-breaker on
//! time.
//!
//! Only the main line of history is grouped: trunk revisions and the `1.1.1`
//! vendor branch. Revisions on other branches are dropped, and the usual CVS
//! import artifacts (a `1.1` shadowed by `1.1.1.1`, dead vendor imports,
//! vendor revisions after trunk development has started) are suppressed.

use std::{
    cmp::Ordering,
    collections::HashMap,
    path::{Path, PathBuf},
};

use binary_heap_plus::BinaryHeap;
use chrono::{DateTime, Utc};
use rcs_file::Num;

/// Default fuzz window, in seconds.
pub const CHANGESET_FUZZ_SEC: i64 = 300;

pub const HEAD_BRANCH: &[u8] = b"HEAD";
pub const VENDOR_BRANCH: &[u8] = b"VENDOR";

/// One revision of one file, as fed into the clusterer.
#[derive(Debug, Clone)]
pub struct RevisionInfo {
    pub num: Num,
    pub date: DateTime<Utc>,
    pub author: Vec<u8>,
    pub state: Vec<u8>,
    pub log: Vec<u8>,
    pub commit_id: Option<Vec<u8>>,
}

/// One revision of one file, as grouped into a changeset.
#[derive(Debug, Clone)]
pub struct FileRevision {
    /// Repository-relative path of the file.
    pub path: PathBuf,
    /// Where the revision's content comes from: the ",v" file on disk, or the
    /// path to hand to a remote checkout.
    pub rcs_path: PathBuf,
    pub num: Num,
    pub date: DateTime<Utc>,
    pub state: Vec<u8>,
}

impl FileRevision {
    pub fn is_dead(&self) -> bool {
        self.state == b"dead"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DiscreteKey {
    branch: Vec<u8>,
    author: Vec<u8>,
    log: Vec<u8>,
    commit_id: Option<Vec<u8>>,
}

/// A clustered changeset: the key fields, the covered time interval, and the
/// file revisions folded into it.
#[derive(Debug, Clone)]
pub struct Changeset {
    pub branch: Vec<u8>,
    pub author: Vec<u8>,
    pub log: Vec<u8>,
    pub commit_id: Option<Vec<u8>>,
    pub min_time: DateTime<Utc>,
    pub max_time: DateTime<Utc>,
    pub revisions: Vec<FileRevision>,
}

impl Changeset {
    /// True when the other interval lies within the fuzz window of this one.
    fn within_fuzz(&self, other: &Changeset, fuzz_sec: i64) -> bool {
        (self.min_time - other.max_time).num_seconds() < fuzz_sec
            && (other.min_time - self.max_time).num_seconds() < fuzz_sec
    }

    fn contains_path(&self, path: &Path) -> bool {
        self.revisions.iter().any(|rev| rev.path == path)
    }

    fn conflicts_with(&self, other: &Changeset) -> bool {
        other
            .revisions
            .iter()
            .any(|rev| self.contains_path(&rev.path))
    }

    /// Folds `other` in front of this changeset, widening the interval.
    fn absorb(&mut self, mut other: Changeset) {
        self.min_time = self.min_time.min(other.min_time);
        self.max_time = self.max_time.max(other.max_time);
        other.revisions.append(&mut self.revisions);
        self.revisions = other.revisions;
    }

    #[allow(clippy::type_complexity)]
    fn sort_key(&self) -> (DateTime<Utc>, DateTime<Utc>, &[u8], &[u8], &[u8], Option<&[u8]>) {
        (
            self.max_time,
            self.min_time,
            &self.branch,
            &self.author,
            &self.log,
            self.commit_id.as_deref(),
        )
    }
}

impl PartialEq for Changeset {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for Changeset {}

impl PartialOrd for Changeset {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Changeset {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Groups per-file revisions into changesets.
#[derive(Debug)]
pub struct Clusterer {
    fuzz_sec: i64,
    sets: HashMap<DiscreteKey, Vec<Changeset>>,
}

impl Clusterer {
    pub fn new(fuzz_sec: i64) -> Self {
        Self {
            fuzz_sec,
            sets: HashMap::new(),
        }
    }

    /// Feeds the full revision history of one file into the clusterer.
    ///
    /// `path` is the repository-relative path; `rcs_path` is where the
    /// revisions' contents can be fetched from later.
    pub fn add_file_history(&mut self, path: &Path, rcs_path: &Path, revisions: Vec<RevisionInfo>) {
        let mut revisions = revisions;
        // Revision number descending first so that 1.1.1.1 sorts ahead of its
        // shadow 1.1, then a stable sort by time.
        revisions.sort_by(|a, b| b.num.cmp(&a.num));
        revisions.sort_by(|a, b| a.date.cmp(&b.date));

        let mut novendor = false;
        let mut have_initial_revision = false;
        let mut last_vendor_dead = false;

        for rev in revisions {
            let dead = rev.state == b"dead";

            if rev.num.is_initial_vendor() {
                if have_initial_revision || dead {
                    continue;
                }
                last_vendor_dead = false;
                have_initial_revision = true;
            } else if rev.num.is_vendor_revision() {
                if novendor {
                    continue;
                }
                last_vendor_dead = dead;
            } else if rev.num.is_trunk_revision() {
                let parts = rev.num.parts();
                if parts == [1, 1].as_ref() {
                    if have_initial_revision {
                        continue;
                    }
                    if dead {
                        continue;
                    }
                    have_initial_revision = true;
                } else if parts[0] == 1 {
                    novendor = true;
                }
                if last_vendor_dead && dead {
                    // The vendor branch already deleted the file; a trunk
                    // revision repeating the deletion carries no change.
                    last_vendor_dead = false;
                    continue;
                }
                last_vendor_dead = false;
            } else {
                // Trunk-only materialization.
                continue;
            }

            let branch = if rev.num.is_trunk_revision() {
                HEAD_BRANCH.to_vec()
            } else {
                VENDOR_BRANCH.to_vec()
            };

            log::trace!(
                "{}: rev {} on {}",
                path.display(),
                rev.num,
                String::from_utf8_lossy(&branch)
            );

            self.add_revision(
                DiscreteKey {
                    branch,
                    author: rev.author,
                    log: rev.log,
                    commit_id: rev.commit_id,
                },
                FileRevision {
                    path: path.to_path_buf(),
                    rcs_path: rcs_path.to_path_buf(),
                    num: rev.num,
                    date: rev.date,
                    state: rev.state,
                },
            );
        }
    }

    fn add_revision(&mut self, key: DiscreteKey, file_rev: FileRevision) {
        let mut set = Changeset {
            branch: key.branch.clone(),
            author: key.author.clone(),
            log: key.log.clone(),
            commit_id: key.commit_id.clone(),
            min_time: file_rev.date,
            max_time: file_rev.date,
            revisions: vec![file_rev],
        };

        let windows = self.sets.entry(key).or_default();
        let fuzz_sec = self.fuzz_sec;

        // Keep folding mergeable windows in: widening the interval can bring
        // further windows into range. A window already touching the same path
        // stays separate; two revisions of one file never share a changeset.
        while let Some(idx) = windows
            .iter()
            .position(|window| set.within_fuzz(window, fuzz_sec) && !set.conflicts_with(window))
        {
            set.absorb(windows.swap_remove(idx));
        }

        windows.push(set);
    }

    /// Consumes the clusterer, returning changesets ordered by ascending
    /// `max_time` with deterministic tie-breaks.
    pub fn into_changesets(self) -> Vec<Changeset> {
        let mut heap = BinaryHeap::new_min();
        for window in self.sets.into_values().flatten() {
            heap.push(window);
        }
        heap.into_iter_sorted().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(s: &str) -> Num {
        s.parse().unwrap()
    }

    fn at(ts: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(ts, 0).unwrap()
    }

    fn rev(n: &str, ts: i64, author: &str, state: &str, log: &str) -> RevisionInfo {
        RevisionInfo {
            num: num(n),
            date: at(ts),
            author: author.as_bytes().to_vec(),
            state: state.as_bytes().to_vec(),
            log: log.as_bytes().to_vec(),
            commit_id: None,
        }
    }

    fn add(clusterer: &mut Clusterer, path: &str, revisions: Vec<RevisionInfo>) {
        clusterer.add_file_history(Path::new(path), Path::new(path), revisions);
    }

    #[test]
    fn test_groups_within_fuzz() {
        let mut clusterer = Clusterer::new(300);
        add(&mut clusterer, "a", vec![rev("1.1", 100, "jdoe", "Exp", "add")]);
        add(&mut clusterer, "b", vec![rev("1.1", 150, "jdoe", "Exp", "add")]);
        add(&mut clusterer, "c", vec![rev("1.1", 9000, "jdoe", "Exp", "add")]);

        let sets = clusterer.into_changesets();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].revisions.len(), 2);
        assert_eq!(sets[0].min_time, at(100));
        assert_eq!(sets[0].max_time, at(150));
        assert_eq!(sets[1].revisions.len(), 1);
    }

    #[test]
    fn test_interval_widening_chains() {
        // 100 and 500 are more than the fuzz apart, but 300 bridges them.
        let mut clusterer = Clusterer::new(300);
        add(&mut clusterer, "a", vec![rev("1.1", 100, "jdoe", "Exp", "x")]);
        add(&mut clusterer, "b", vec![rev("1.1", 500, "jdoe", "Exp", "x")]);
        assert_eq!(clusterer.sets.values().flatten().count(), 2);

        let mut clusterer = Clusterer::new(300);
        add(&mut clusterer, "a", vec![rev("1.1", 100, "jdoe", "Exp", "x")]);
        add(&mut clusterer, "b", vec![rev("1.1", 500, "jdoe", "Exp", "x")]);
        add(&mut clusterer, "c", vec![rev("1.1", 300, "jdoe", "Exp", "x")]);
        let sets = clusterer.into_changesets();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].revisions.len(), 3);
    }

    #[test]
    fn test_differing_keys_split() {
        let mut clusterer = Clusterer::new(300);
        add(&mut clusterer, "a", vec![rev("1.1", 100, "jdoe", "Exp", "x")]);
        add(&mut clusterer, "b", vec![rev("1.1", 101, "ebb", "Exp", "x")]);
        add(&mut clusterer, "c", vec![rev("1.1", 102, "jdoe", "Exp", "y")]);

        assert_eq!(clusterer.into_changesets().len(), 3);
    }

    #[test]
    fn test_commit_ids_split() {
        let mut clusterer = Clusterer::new(300);
        for (path, id) in &[("a", "cafe1"), ("b", "cafe2")] {
            let mut info = rev("1.1", 100, "jdoe", "Exp", "same log");
            info.commit_id = Some(id.as_bytes().to_vec());
            add(&mut clusterer, path, vec![info]);
        }

        assert_eq!(clusterer.into_changesets().len(), 2);
    }

    #[test]
    fn test_same_path_never_shares_a_changeset() {
        let mut clusterer = Clusterer::new(300);
        add(
            &mut clusterer,
            "a",
            vec![
                rev("1.1", 100, "jdoe", "Exp", "x"),
                rev("1.2", 120, "jdoe", "Exp", "x"),
            ],
        );

        let sets = clusterer.into_changesets();
        assert_eq!(sets.len(), 2);
        for set in sets {
            assert_eq!(set.revisions.len(), 1);
        }
    }

    #[test]
    fn test_vendor_shadows_initial_revision() {
        let mut clusterer = Clusterer::new(300);
        add(
            &mut clusterer,
            "a",
            vec![
                rev("1.1", 100, "jdoe", "Exp", "Initial revision"),
                rev("1.1.1.1", 100, "jdoe", "Exp", "import"),
            ],
        );

        let sets = clusterer.into_changesets();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].branch, VENDOR_BRANCH);
        assert_eq!(sets[0].revisions[0].num, num("1.1.1.1"));
    }

    #[test]
    fn test_dead_vendor_import_is_skipped() {
        let mut clusterer = Clusterer::new(300);
        add(
            &mut clusterer,
            "a",
            vec![
                rev("1.1.1.1", 100, "jdoe", "dead", "bad import"),
                rev("1.1", 200, "jdoe", "Exp", "real add"),
            ],
        );

        let sets = clusterer.into_changesets();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].revisions[0].num, num("1.1"));
        assert_eq!(sets[0].branch, HEAD_BRANCH);
    }

    #[test]
    fn test_no_vendor_after_trunk_development() {
        let mut clusterer = Clusterer::new(300);
        add(
            &mut clusterer,
            "a",
            vec![
                rev("1.1.1.1", 100, "jdoe", "Exp", "import"),
                rev("1.1", 100, "jdoe", "Exp", "Initial revision"),
                rev("1.2", 1000, "jdoe", "Exp", "trunk work"),
                rev("1.1.1.2", 2000, "jdoe", "Exp", "late import"),
            ],
        );

        let sets = clusterer.into_changesets();
        assert_eq!(sets.len(), 2);
        assert!(sets
            .iter()
            .all(|set| set.revisions.iter().all(|r| r.num != num("1.1.1.2"))));
    }

    #[test]
    fn test_side_branches_are_dropped() {
        let mut clusterer = Clusterer::new(300);
        add(
            &mut clusterer,
            "a",
            vec![
                rev("1.1", 100, "jdoe", "Exp", "add"),
                rev("1.1.2.1", 200, "jdoe", "Exp", "branch work"),
            ],
        );

        let sets = clusterer.into_changesets();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].revisions[0].num, num("1.1"));
    }

    #[test]
    fn test_ordering_and_confluence() {
        let feed = |order: &[usize]| {
            let files = [
                ("a", vec![rev("1.1", 100, "jdoe", "Exp", "x"), rev("1.2", 700, "ebb", "Exp", "y")]),
                ("b", vec![rev("1.1", 130, "jdoe", "Exp", "x")]),
                ("c", vec![rev("1.1", 650, "ebb", "Exp", "y")]),
            ];
            let mut clusterer = Clusterer::new(300);
            for &idx in order {
                let (path, revisions) = &files[idx];
                add(&mut clusterer, path, revisions.clone());
            }
            clusterer
                .into_changesets()
                .into_iter()
                .map(|set| {
                    let mut paths: Vec<_> = set
                        .revisions
                        .iter()
                        .map(|r| r.path.display().to_string())
                        .collect();
                    paths.sort();
                    (set.max_time, paths)
                })
                .collect::<Vec<_>>()
        };

        let want = vec![
            (at(130), vec!["a".into(), "b".into()]),
            (at(700), vec!["a".into(), "c".into()]),
        ];

        assert_eq!(feed(&[0, 1, 2]), want);
        assert_eq!(feed(&[2, 1, 0]), want);
        assert_eq!(feed(&[1, 2, 0]), want);
    }
}
