//! The rewrite database: ordered, tagged stages of graph rewrites.

pub mod engine;
pub mod query;

use symfun_common::config::DEFAULT_MAX_REWRITE_ITERS;
use symfun_graph::{alias, AliasedMemoryError, FunctionGraph, GraphError, NodeId, VarId};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

pub use query::RewriteQuery;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RewriteError {
    #[error("a stage named '{0}' is already registered")]
    DuplicateStage(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    AliasedMemory(#[from] AliasedMemoryError),
}

/// A node-level rewrite.  Returns replacements for the node's outputs, or `None` on no match.
/// Nodes it added are pruned again unless a replacement made them reachable.
pub type LocalFn = Rc<dyn Fn(&mut FunctionGraph, NodeId) -> Result<Option<Vec<VarId>>, GraphError>>;

/// A whole-graph rewrite.  Returns whether it changed the graph.
pub type GlobalFn = Rc<dyn Fn(&mut FunctionGraph) -> Result<bool, RewriteError>>;

#[derive(Clone)]
pub enum Action {
    Local(LocalFn),
    Global(GlobalFn),
}

#[derive(Clone)]
pub struct Rewrite {
    pub name: String,
    pub tags: BTreeSet<String>,
    pub action: Action,
}

fn tag_set(tags: &[&str]) -> BTreeSet<String> {
    tags.iter().map(|tag| tag.to_string()).collect()
}

impl Rewrite {
    pub fn local(
        name: &str,
        tags: &[&str],
        f: impl Fn(&mut FunctionGraph, NodeId) -> Result<Option<Vec<VarId>>, GraphError> + 'static,
    ) -> Self {
        Rewrite {
            name: name.to_owned(),
            tags: tag_set(tags),
            action: Action::Local(Rc::new(f)),
        }
    }

    pub fn global(
        name: &str,
        tags: &[&str],
        f: impl Fn(&mut FunctionGraph) -> Result<bool, RewriteError> + 'static,
    ) -> Self {
        Rewrite {
            name: name.to_owned(),
            tags: tag_set(tags),
            action: Action::Global(Rc::new(f)),
        }
    }

    /// The labels a query matches against: the rewrite's tags plus its own name.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.name.as_str()))
    }
}

impl fmt::Debug for Rewrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.action {
            Action::Local(_) => "local",
            Action::Global(_) => "global",
        };
        write!(f, "Rewrite({} {}, {:?})", kind, self.name, self.tags)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageKind {
    /// Repeats until an iteration applies nothing, or `max_iters` iterations have run.
    FixedPoint { max_iters: usize },
    Once,
}

impl StageKind {
    pub fn fixed_point() -> Self {
        StageKind::FixedPoint {
            max_iters: DEFAULT_MAX_REWRITE_ITERS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Stage {
    pub name: String,
    pub position: f64,
    pub tags: BTreeSet<String>,
    pub kind: StageKind,
    /// The stage may introduce destructive nodes, so aliasing is validated after it runs.
    pub may_destroy: bool,
    pub rewrites: Vec<Rewrite>,
}

impl Stage {
    pub fn new(name: &str, position: f64, kind: StageKind) -> Self {
        Stage {
            name: name.to_owned(),
            position,
            tags: BTreeSet::new(),
            kind,
            may_destroy: false,
            rewrites: Vec::new(),
        }
    }

    pub fn tagged(mut self, tags: &[&str]) -> Self {
        self.tags.extend(tag_set(tags));
        self
    }

    pub fn destructive(mut self) -> Self {
        self.may_destroy = true;
        self
    }

    pub fn with(mut self, rewrite: Rewrite) -> Self {
        self.rewrites.push(rewrite);
        self
    }
}

/// A stage as selected by a query, with only the rewrites the query admits.
#[derive(Clone, Debug)]
pub struct SelectedStage<'a> {
    pub stage: &'a Stage,
    pub rewrites: Vec<&'a Rewrite>,
}

#[derive(Clone, Debug, Default)]
pub struct RewriteDatabase {
    /// Sorted by position; stages at equal positions keep registration order.
    stages: Vec<Stage>,
}

impl RewriteDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: Stage) -> Result<(), RewriteError> {
        if self.stage(&stage.name).is_some() {
            return Err(RewriteError::DuplicateStage(stage.name));
        }
        let index = self
            .stages
            .iter()
            .position(|existing| existing.position > stage.position)
            .unwrap_or(self.stages.len());
        self.stages.insert(index, stage);
        Ok(())
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn select(&self, query: &RewriteQuery) -> Vec<SelectedStage<'_>> {
        self.stages
            .iter()
            .filter(|stage| query.admits_stage(stage))
            .filter_map(|stage| {
                let rewrites = stage
                    .rewrites
                    .iter()
                    .filter(|rewrite| query.selects(rewrite))
                    .collect::<Vec<_>>();
                if rewrites.is_empty() {
                    None
                } else {
                    Some(SelectedStage { stage, rewrites })
                }
            })
            .collect()
    }
}

/// Applies `pairs` as one replacement.  Once the graph holds destroyers, a replacement that
/// would leave it failing aliasing validation is refused: the graph is left unchanged and
/// `false` is returned.
pub fn replace_validated(
    fgraph: &mut FunctionGraph,
    pairs: &[(VarId, VarId)],
) -> Result<bool, GraphError> {
    if !fgraph.has_destroyers() {
        fgraph.replace_all(pairs)?;
        return Ok(true);
    }
    let mut trial = fgraph.clone();
    trial.replace_all(pairs)?;
    if let Err(err) = alias::validate(&trial) {
        log::trace!("refusing replacement {:?}: {}", pairs, err);
        return Ok(false);
    }
    *fgraph = trial;
    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;

    fn noop(name: &str, tags: &[&str]) -> Rewrite {
        Rewrite::global(name, tags, |_| Ok(false))
    }

    #[test]
    fn stages_are_kept_in_position_order() {
        let mut db = RewriteDatabase::new();
        db.register(Stage::new("late", 10.0, StageKind::Once).with(noop("a", &["x"])))
            .unwrap();
        db.register(Stage::new("early", 1.0, StageKind::Once).with(noop("b", &["x"])))
            .unwrap();
        db.register(Stage::new("tie", 10.0, StageKind::Once).with(noop("c", &["x"])))
            .unwrap();

        let names = db
            .stages()
            .iter()
            .map(|stage| stage.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["early", "late", "tie"]);
        assert_eq!(
            db.register(Stage::new("early", 3.0, StageKind::Once)),
            Err(RewriteError::DuplicateStage("early".to_owned()))
        );
    }

    #[test]
    fn stages_without_selected_rewrites_are_skipped() {
        let mut db = RewriteDatabase::new();
        db.register(
            Stage::new("s", 1.0, StageKind::fixed_point())
                .with(noop("safe", &["fast_run"]))
                .with(noop("risky", &["unsafe"])),
        )
        .unwrap();

        let selected = db.select(&RewriteQuery::including(&["fast_run"]));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].rewrites.len(), 1);
        assert_eq!(selected[0].rewrites[0].name, "safe");

        assert!(db
            .select(&RewriteQuery::including(&["stabilize"]))
            .is_empty());
    }
}
