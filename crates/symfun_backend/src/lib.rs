#![allow(dead_code)]

pub mod linker;
pub mod mode;
pub mod profiling;
pub mod reuse;
pub mod rewrite;
pub mod rewrites;

pub use linker::{Executable, LinkOptions, Linker, Monitor, NodeEvent, RunError};
pub use mode::{Mode, ModeError, ModeRegistry, ModeSpec, ResolvedMode};
pub use profiling::ProfileStats;
pub use rewrite::engine::{optimize, RewriteOptions, RewriteReport, StageReport};
pub use rewrite::{Rewrite, RewriteDatabase, RewriteError, RewriteQuery, Stage, StageKind};
