//! The visit driver: fetches a CVS repository's history, clusters it into
//! changesets, materializes each changeset in a working tree, and emits the
//! hashed objects to the sink as a linear chain of commits capped by a
//! snapshot.

use std::{
    collections::BTreeMap,
    io::BufReader,
    os::unix::prelude::OsStrExt,
    path::{Path, PathBuf},
};

use changeset::{Changeset, Clusterer, RevisionInfo, CHANGESET_FUZZ_SEC};
use cvs_client::{Client, CvsUrl, Scheme};
use git_objects::{
    scan_directory, Commit, ObjectId, Person, Snapshot, SnapshotBranch, TargetKind,
};
use rcs_file::RcsFile;
use tempfile::TempDir;

use crate::{discovery, rsync, sink::Sink, Error};

const TEMPORARY_DIR_PREFIX: &str = "cvs-archive-import-";

pub const DEFAULT_BRANCH: &[u8] = b"HEAD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitOutcome {
    Eventful,
    Uneventful,
    Failed,
    NotFound,
}

#[derive(Debug)]
pub struct VisitSummary {
    pub outcome: VisitOutcome,
    pub snapshot: Option<ObjectId>,
    pub commits: usize,
}

/// Where a file revision's bytes come from during materialization.
enum ContentSource {
    /// Reconstructed and keyword-expanded straight from the ",v" files.
    Local,
    /// Checked out one revision at a time over the wire; log messages are
    /// re-read from the still-seekable rlog stream.
    Remote {
        client: Client,
        reader: BufReader<std::fs::File>,
        offsets: rlog::Offsets,
    },
}

pub struct Loader<S> {
    sink: S,
    url: CvsUrl,
    origin_url: String,
    fuzz_sec: i64,
    temp_base: PathBuf,
    cvsroot_override: Option<PathBuf>,
    max_content_size: Option<u64>,
}

impl<S: Sink> Loader<S> {
    pub fn new(sink: S, url: &str) -> Result<Self, Error> {
        let url = CvsUrl::parse(url)?;
        Ok(Self {
            sink,
            origin_url: url.to_string(),
            url,
            fuzz_sec: CHANGESET_FUZZ_SEC,
            temp_base: std::env::temp_dir(),
            cvsroot_override: None,
            max_content_size: None,
        })
    }

    /// Records snapshots under a different origin URL than the fetch URL.
    pub fn with_origin_url(mut self, origin_url: &str) -> Self {
        self.origin_url = origin_url.to_string();
        self
    }

    /// Uses an existing CVSROOT copy instead of fetching one.
    pub fn with_cvsroot<P: Into<PathBuf>>(mut self, cvsroot: P) -> Self {
        self.cvsroot_override = Some(cvsroot.into());
        self
    }

    pub fn with_temp_dir<P: Into<PathBuf>>(mut self, temp_base: P) -> Self {
        self.temp_base = temp_base.into();
        self
    }

    pub fn with_fuzz_sec(mut self, fuzz_sec: i64) -> Self {
        self.fuzz_sec = fuzz_sec;
        self
    }

    pub fn with_max_content_size(mut self, max: Option<u64>) -> Self {
        self.max_content_size = max;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Runs one visit. Errors are folded into the outcome; the objects
    /// already handed to the sink stay there, which is safe because the sink
    /// is content-addressed.
    pub async fn load(&mut self) -> VisitSummary {
        match self.visit().await {
            Ok(summary) => summary,
            Err(e) => {
                log::error!("visit of {} failed: {}", self.origin_url, e);
                VisitSummary {
                    outcome: if e.is_not_found() {
                        VisitOutcome::NotFound
                    } else {
                        VisitOutcome::Failed
                    },
                    snapshot: None,
                    commits: 0,
                }
            }
        }
    }

    async fn visit(&mut self) -> Result<VisitSummary, Error> {
        let worktree = tempfile::Builder::new()
            .prefix(TEMPORARY_DIR_PREFIX)
            .tempdir_in(&self.temp_base)?;
        std::fs::create_dir(worktree.path().join(self.url.module()))?;

        // Keeps a temporary CVSROOT copy alive for the whole visit.
        let mut _cvsroot_guard: Option<TempDir> = None;

        let (changesets, mut source) = match self.url.scheme {
            Scheme::File => {
                let path = Path::new(&self.url.path);
                if !path.exists() {
                    return Err(Error::NotFound(format!(
                        "no repository at {}",
                        path.display()
                    )));
                }
                let cvsroot = self
                    .cvsroot_override
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(self.url.cvsroot()));
                (self.cluster_local(&cvsroot)?, ContentSource::Local)
            }
            Scheme::Rsync => {
                let cvsroot = match &self.cvsroot_override {
                    Some(path) => path.clone(),
                    None => {
                        let dir = tempfile::Builder::new()
                            .prefix(TEMPORARY_DIR_PREFIX)
                            .tempdir_in(&self.temp_base)?;
                        let path = dir.path().to_path_buf();
                        _cvsroot_guard = Some(dir);
                        path
                    }
                };
                rsync::fetch_cvs_repo_with_rsync(
                    self.url.host()?,
                    self.url.cvsroot(),
                    self.url.module(),
                    &cvsroot,
                )
                .await?;
                (self.cluster_local(&cvsroot)?, ContentSource::Local)
            }
            Scheme::Pserver | Scheme::Ssh | Scheme::Fake => {
                let mut client = Client::connect(&self.url).await?;
                log::info!(
                    "fetching CVS rlog from {}",
                    self.origin_url
                );
                let rlog_file = client.fetch_rlog().await?;
                let mut reader = BufReader::new(rlog_file);
                let (histories, offsets) = rlog::parse(&mut reader)?;

                let mut clusterer = Clusterer::new(self.fuzz_sec);
                let server_cvsroot = PathBuf::from(self.url.cvsroot());
                for history in histories {
                    let raw = PathBuf::from(std::ffi::OsStr::from_bytes(&history.path));
                    let munged = discovery::munge_rcs_path(&raw, &server_cvsroot);
                    let revisions = history
                        .revisions
                        .into_iter()
                        .map(|entry| RevisionInfo {
                            num: entry.rev,
                            date: entry.date,
                            author: entry.author,
                            state: entry.state,
                            log: entry.log,
                            commit_id: entry.commit_id,
                        })
                        .collect();
                    clusterer.add_file_history(&munged, &raw, revisions);
                }

                (
                    clusterer.into_changesets(),
                    ContentSource::Remote {
                        client,
                        reader,
                        offsets,
                    },
                )
            }
        };

        log::info!(
            "{} changeset(s) found for {}",
            changesets.len(),
            self.origin_url
        );

        let (last_commit, commits) = self
            .materialize(worktree.path(), changesets, &mut source)
            .await?;

        let mut branches = BTreeMap::new();
        if let Some(commit) = &last_commit {
            branches.insert(
                DEFAULT_BRANCH.to_vec(),
                SnapshotBranch {
                    target_kind: TargetKind::Revision,
                    target: commit.id,
                },
            );
        }
        let snapshot = Snapshot::new(branches);

        let outcome = match self.sink.latest_snapshot(&self.origin_url)? {
            Some(previous) if previous.id == snapshot.id => VisitOutcome::Uneventful,
            _ => VisitOutcome::Eventful,
        };
        let snapshot_id = snapshot.id;
        log::debug!("snapshot id {}", snapshot_id);
        self.sink.add_snapshot(snapshot)?;

        if let ContentSource::Remote { client, .. } = source {
            client.shutdown().await?;
        }

        Ok(VisitSummary {
            outcome,
            snapshot: Some(snapshot_id),
            commits,
        })
    }

    /// Walks the local CVSROOT and clusters every file's history.
    fn cluster_local(&self, cvsroot: &Path) -> Result<Vec<Changeset>, Error> {
        if !discovery::has_rcs_files(cvsroot) {
            return Err(Error::NotFound(format!(
                "directory {} does not contain any valid RCS files",
                cvsroot.display()
            )));
        }
        if !cvsroot.join("CVSROOT").is_dir() {
            log::warn!(
                "the CVS repository at {} lacks a CVSROOT directory; \
                 this might be an incomplete copy of the repository",
                cvsroot.display()
            );
        }

        log::info!("walking CVS module {}", self.url.module());
        let mut clusterer = Clusterer::new(self.fuzz_sec);
        for path in discovery::find_rcs_files(cvsroot, self.url.module())? {
            let rcs = RcsFile::open(&path)?;
            let mut revisions = Vec::with_capacity(rcs.deltas.len());
            for (num, delta) in &rcs.deltas {
                revisions.push(RevisionInfo {
                    num: num.clone(),
                    date: delta.date,
                    author: delta.author.clone(),
                    state: delta.state.clone().unwrap_or_else(|| b"Exp".to_vec()),
                    log: rcs.log(num)?.to_vec(),
                    commit_id: delta.commit_id.clone(),
                });
            }

            let munged = discovery::munge_rcs_path(&path, cvsroot);
            clusterer.add_file_history(&munged, &path, revisions);
        }

        Ok(clusterer.into_changesets())
    }

    /// Applies each changeset to the working tree in order, hashing the tree
    /// and emitting (contents, directories, commit) per changeset.
    async fn materialize(
        &mut self,
        worktree: &Path,
        changesets: Vec<Changeset>,
        source: &mut ContentSource,
    ) -> Result<(Option<Commit>, usize), Error> {
        let mut last: Option<Commit> = None;
        let mut count = 0usize;

        for set in changesets {
            log::info!(
                "changeset from {} by {} on branch {}",
                set.max_time,
                String::from_utf8_lossy(&set.author),
                String::from_utf8_lossy(&set.branch)
            );

            let first = match set.revisions.first() {
                Some(first) => first.clone(),
                None => continue,
            };
            let message = match source {
                ContentSource::Local => {
                    RcsFile::open(&first.rcs_path)?.log(&first.num)?.to_vec()
                }
                ContentSource::Remote {
                    reader, offsets, ..
                } => rlog::getlog(
                    reader,
                    offsets,
                    first.rcs_path.as_os_str().as_bytes(),
                    &first.num,
                )?,
            };

            for rev in &set.revisions {
                let wtpath = worktree.join(&rev.path);
                log::trace!("rev {} of file {}", rev.num, rev.path.display());

                if rev.is_dead() {
                    match std::fs::remove_file(&wtpath) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                    continue;
                }

                if let Some(parent) = wtpath.parent() {
                    std::fs::create_dir_all(parent)?;
                }

                match source {
                    ContentSource::Local => {
                        let rcs = RcsFile::open(&rev.rcs_path)?;
                        let bytes = rcs_file::keyword::expand(&rev.rcs_path, &rcs, &rev.num)?;
                        std::fs::write(&wtpath, bytes)?;
                    }
                    ContentSource::Remote { client, .. } => {
                        let dest = wtpath.parent().unwrap_or(worktree);
                        let checkout = client
                            .checkout(
                                &rev.path.to_string_lossy(),
                                &rev.num.to_string(),
                                dest,
                                true,
                            )
                            .await?;
                        checkout.persist(&wtpath).map_err(|e| Error::Io(e.error))?;
                    }
                }
            }

            let scan = scan_directory(worktree, self.max_content_size)?;
            let commit = Commit::new(
                scan.root,
                last.as_ref().map(|commit| commit.id),
                Person::from_fullname(set.author.clone()),
                set.max_time,
                message,
            );
            log::debug!("commit id {}", commit.id);

            self.sink.add_contents(scan.contents)?;
            self.sink.add_skipped_contents(scan.skipped)?;
            self.sink.add_directories(scan.directories)?;
            self.sink.add_commits(vec![commit.clone()])?;

            count += 1;
            last = Some(commit);
        }

        Ok((last, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn install_module(cvsroot: &Path, module: &str, files: &[(&str, &[u8])]) {
        std::fs::create_dir_all(cvsroot.join("CVSROOT")).unwrap();
        for (name, bytes) in files {
            let path = cvsroot.join(module).join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, bytes).unwrap();
        }
    }

    async fn load(cvsroot: &Path, module: &str, sink: MemorySink) -> (VisitSummary, MemorySink) {
        let url = format!("file://{}/{}", cvsroot.display(), module);
        let mut sink = sink;
        sink.set_origin(&url);
        let mut loader = Loader::new(sink, &url).unwrap();
        let summary = loader.load().await;
        (summary, loader.into_sink())
    }

    fn snapshot_head(sink: &MemorySink, summary: &VisitSummary) -> Commit {
        let snapshot = sink.snapshots.get(&summary.snapshot.unwrap()).unwrap();
        let branch = snapshot.branches.get(DEFAULT_BRANCH.as_ref()).unwrap();
        sink.commits.get(&branch.target).unwrap().clone()
    }

    const HELLO_V: &[u8] = b"head\t1.2;
access;
symbols;
locks; strict;
comment\t@ * @;


1.2
date\t2021.08.11.19.08.27;\tauthor jdoe;\tstate Exp;
branches;
next\t1.1;

1.1
date\t2021.08.11.19.00.00;\tauthor jdoe;\tstate Exp;
branches;
next\t;


desc
@@


1.2
log
@fix the greeting
@
text
@hello, world
@


1.1
log
@Initial revision
@
text
@d1 1
a1 1
hello world
@
";

    const README_V: &[u8] = b"head\t1.1;
access;
symbols;
locks; strict;


1.1
date\t2021.08.11.19.00.10;\tauthor jdoe;\tstate Exp;
branches;
next\t;


desc
@@


1.1
log
@Initial revision
@
text
@runbaby readme
@
";

    const GONE_V: &[u8] = b"head\t1.2;
access;
symbols;
locks; strict;


1.2
date\t2021.08.11.19.30.00;\tauthor jdoe;\tstate dead;
branches;
next\t1.1;

1.1
date\t2021.08.11.19.10.00;\tauthor jdoe;\tstate Exp;
branches;
next\t;


desc
@@


1.2
log
@remove gone
@
text
@@


1.1
log
@add gone
@
text
@@
";

    const A_V: &[u8] = b"head\t1.1;
access;
symbols;
locks; strict;


1.1
date\t2021.08.11.19.00.00;\tauthor jdoe;\tstate Exp;
branches;
next\t;
commitid\taaa111;


desc
@@


1.1
log
@same log
@
text
@a
@
";

    const B_V: &[u8] = b"head\t1.1;
access;
symbols;
locks; strict;


1.1
date\t2021.08.11.19.00.00;\tauthor jdoe;\tstate Exp;
branches;
next\t;
commitid\tbbb222;


desc
@@


1.1
log
@same log
@
text
@b
@
";

    const ALPHA_V: &[u8] = b"head\t1.1;
access;
symbols;
locks; strict;


1.1
date\t2021.08.11.19.08.27;\tauthor jdoe;\tstate Exp;
branches;
next\t;


desc
@@


1.1
log
@add alpha
@
text
@/* $Id$ */
alpha
@
";

    const NOEOL_V: &[u8] = b"head\t1.1;
access;
symbols;
locks; strict;


1.1
date\t2021.08.11.19.09.00;\tauthor jdoe;\tstate Exp;
branches;
next\t;


desc
@@


1.1
log
@add noeol
@
text
@no newline at end@
";

    #[tokio::test]
    async fn test_local_visit() {
        let dir = tempfile::tempdir().unwrap();
        install_module(
            dir.path(),
            "runbaby",
            &[("hello.c,v", HELLO_V), ("README,v", README_V)],
        );

        let (summary, sink) = load(dir.path(), "runbaby", MemorySink::new()).await;

        assert_eq!(summary.outcome, VisitOutcome::Eventful);
        assert_eq!(summary.commits, 2);
        assert_eq!(sink.contents.len(), 3);
        assert_eq!(sink.commits.len(), 2);
        assert_eq!(sink.directories.len(), 4);

        // The snapshot names the tip of the chain, whose parent is the
        // initial changeset.
        let head = snapshot_head(&sink, &summary);
        assert_eq!(head.message, b"fix the greeting\n");
        assert_eq!(head.parents.len(), 1);
        let parent = sink.commits.get(&head.parents[0]).unwrap();
        assert_eq!(parent.message, b"Initial revision\n");
        assert!(parent.parents.is_empty());
        assert!(head.date >= parent.date);
        assert_eq!(head.author.fullname, b"jdoe");
        assert_eq!(head.kind, "CVS");
        assert!(head.synthetic);
    }

    #[tokio::test]
    async fn test_second_visit_is_uneventful() {
        let dir = tempfile::tempdir().unwrap();
        install_module(
            dir.path(),
            "runbaby",
            &[("hello.c,v", HELLO_V), ("README,v", README_V)],
        );

        let (first, sink) = load(dir.path(), "runbaby", MemorySink::new()).await;
        assert_eq!(first.outcome, VisitOutcome::Eventful);

        let (second, sink) = load(dir.path(), "runbaby", sink).await;
        assert_eq!(second.outcome, VisitOutcome::Uneventful);
        assert_eq!(first.snapshot, second.snapshot);
        assert_eq!(sink.commits.len(), 2);
    }

    #[tokio::test]
    async fn test_dead_revisions_and_commit_ids() {
        let dir = tempfile::tempdir().unwrap();
        install_module(
            dir.path(),
            "dino",
            &[
                ("a.c,v", A_V),
                ("b.c,v", B_V),
                ("Attic/gone.c,v", GONE_V),
            ],
        );

        let (summary, sink) = load(dir.path(), "dino", MemorySink::new()).await;

        // Matching author, log, and time, but distinct commitids: a.c and
        // b.c stay separate. Plus the add and the dead removal of gone.c.
        assert_eq!(summary.commits, 4);
        assert_eq!(sink.contents.len(), 3);

        // After the dead revision, the tip tree holds only a.c and b.c.
        let head = snapshot_head(&sink, &summary);
        assert_eq!(head.message, b"remove gone\n");
        let root = sink.directories.get(&head.tree).unwrap();
        assert_eq!(root.entries.len(), 1);
        assert_eq!(root.entries[0].name, b"dino");
        let module = sink.directories.get(&root.entries[0].target).unwrap();
        let names: Vec<_> = module.entries.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec![b"a.c".to_vec(), b"b.c".to_vec()]);

        // Timestamps stay monotone along the chain.
        let mut commit = head;
        while let Some(parent_id) = commit.parents.first() {
            let parent = sink.commits.get(parent_id).unwrap().clone();
            assert!(commit.date >= parent.date);
            commit = parent;
        }
    }

    #[tokio::test]
    async fn test_keyword_expansion_and_missing_eol() {
        let dir = tempfile::tempdir().unwrap();
        install_module(
            dir.path(),
            "keywords",
            &[("alpha,v", ALPHA_V), ("noeol,v", NOEOL_V)],
        );

        let (summary, sink) = load(dir.path(), "keywords", MemorySink::new()).await;
        assert_eq!(summary.outcome, VisitOutcome::Eventful);

        let expanded = b"/* $Id: alpha,v 1.1 2021/08/11 19:08:27 jdoe Exp $ */\nalpha\n";
        assert!(sink
            .contents
            .values()
            .any(|content| content.data == expanded));

        // The missing trailing newline survives into the content hash.
        assert!(sink
            .contents
            .values()
            .any(|content| content.data == b"no newline at end"));
    }

    #[tokio::test]
    async fn test_missing_repository_is_not_found() {
        let sink = MemorySink::new();
        let mut loader = Loader::new(sink, "file:///nonexistent/path/module").unwrap();
        let summary = loader.load().await;
        assert_eq!(summary.outcome, VisitOutcome::NotFound);
        assert!(summary.snapshot.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_rcs_file_fails_the_visit() {
        let dir = tempfile::tempdir().unwrap();
        install_module(
            dir.path(),
            "broken",
            &[("ok.c,v", A_V), ("bad.c,v", b"head\t1.1;\nthis is not RCS\n")],
        );

        let (summary, _sink) = load(dir.path(), "broken", MemorySink::new()).await;
        assert_eq!(summary.outcome, VisitOutcome::Failed);
    }
}
