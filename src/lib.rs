//! Ingests the history of a CVS repository and converts it into a linear
//! chain of content-addressed commits on a single branch, capped by a
//! snapshot.
//!
//! The heavy lifting lives in the member crates: `rcs-file` reads ",v" files,
//! `rlog` parses remote history streams, `cvs-client` speaks the wire
//! protocol, `changeset` groups per-file revisions into commits, and
//! `git-objects` provides the object model. This crate drives them through a
//! visit and feeds the results to a [`Sink`].

mod discovery;
mod error;
mod loader;
mod rsync;
mod sink;

pub use error::Error;
pub use loader::{Loader, VisitOutcome, VisitSummary, DEFAULT_BRANCH};
pub use sink::{MemorySink, Sink, SinkError};
