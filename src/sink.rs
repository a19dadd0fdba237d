//! The content-addressed sink the materializer feeds.
//!
//! The real archive storage lives elsewhere; the loader only relies on the
//! operations below, all of which are idempotent by object hash. The bundled
//! [`MemorySink`] backs the CLI and the tests.

use std::collections::HashMap;

use git_objects::{Commit, Content, Directory, ObjectId, SkippedContent, Snapshot};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("sink error: {0}")]
pub struct SinkError(pub String);

pub trait Sink {
    fn add_contents(&mut self, contents: Vec<Content>) -> Result<(), SinkError>;
    fn add_skipped_contents(&mut self, contents: Vec<SkippedContent>) -> Result<(), SinkError>;
    fn add_directories(&mut self, directories: Vec<Directory>) -> Result<(), SinkError>;
    fn add_commits(&mut self, commits: Vec<Commit>) -> Result<(), SinkError>;
    fn add_snapshot(&mut self, snapshot: Snapshot) -> Result<(), SinkError>;

    /// The most recent snapshot recorded for this origin, used to decide
    /// whether a visit was eventful.
    fn latest_snapshot(&self, origin_url: &str) -> Result<Option<Snapshot>, SinkError>;
}

/// An in-memory sink, deduplicating by object id.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub contents: HashMap<ObjectId, Content>,
    pub skipped_contents: HashMap<ObjectId, SkippedContent>,
    pub directories: HashMap<ObjectId, Directory>,
    pub commits: HashMap<ObjectId, Commit>,
    pub snapshots: HashMap<ObjectId, Snapshot>,
    latest: HashMap<String, ObjectId>,
    origin: Option<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates snapshots stored from now on with `origin_url`, so
    /// `latest_snapshot` can answer per origin. Visit bookkeeping proper
    /// belongs to the archive, not the loader.
    pub fn set_origin(&mut self, origin_url: &str) {
        self.origin = Some(origin_url.to_string());
    }
}

impl Sink for MemorySink {
    fn add_contents(&mut self, contents: Vec<Content>) -> Result<(), SinkError> {
        for content in contents {
            self.contents.insert(content.id, content);
        }
        Ok(())
    }

    fn add_skipped_contents(&mut self, contents: Vec<SkippedContent>) -> Result<(), SinkError> {
        for content in contents {
            self.skipped_contents.insert(content.id, content);
        }
        Ok(())
    }

    fn add_directories(&mut self, directories: Vec<Directory>) -> Result<(), SinkError> {
        for directory in directories {
            self.directories.insert(directory.id, directory);
        }
        Ok(())
    }

    fn add_commits(&mut self, commits: Vec<Commit>) -> Result<(), SinkError> {
        for commit in commits {
            self.commits.insert(commit.id, commit);
        }
        Ok(())
    }

    fn add_snapshot(&mut self, snapshot: Snapshot) -> Result<(), SinkError> {
        if let Some(origin) = &self.origin {
            self.latest.insert(origin.clone(), snapshot.id);
        }
        self.snapshots.insert(snapshot.id, snapshot);
        Ok(())
    }

    fn latest_snapshot(&self, origin_url: &str) -> Result<Option<Snapshot>, SinkError> {
        Ok(self
            .latest
            .get(origin_url)
            .and_then(|id| self.snapshots.get(id))
            .cloned())
    }
}
