use crate::rewrite::{Rewrite, Stage};
use std::collections::BTreeSet;

/// Selects rewrites by tag.
///
/// A rewrite is selected when its labels (its tags and its name) meet `include`, contain all of
/// `require`, and avoid `exclude`.  A whole stage is dropped when its name or one of its tags is
/// excluded, or when it sits past `position_cutoff`.
#[derive(Clone, Debug, PartialEq)]
pub struct RewriteQuery {
    pub include: BTreeSet<String>,
    pub require: BTreeSet<String>,
    pub exclude: BTreeSet<String>,
    pub position_cutoff: f64,
}

impl Default for RewriteQuery {
    fn default() -> Self {
        RewriteQuery {
            include: BTreeSet::new(),
            require: BTreeSet::new(),
            exclude: BTreeSet::new(),
            position_cutoff: f64::INFINITY,
        }
    }
}

fn extend(set: &mut BTreeSet<String>, tags: &[&str]) {
    set.extend(tags.iter().map(|tag| tag.to_string()));
}

impl RewriteQuery {
    /// Selects nothing.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn including(tags: &[&str]) -> Self {
        Self::default().include(tags)
    }

    pub fn include(mut self, tags: &[&str]) -> Self {
        extend(&mut self.include, tags);
        self
    }

    pub fn require(mut self, tags: &[&str]) -> Self {
        extend(&mut self.require, tags);
        self
    }

    pub fn exclude(mut self, tags: &[&str]) -> Self {
        extend(&mut self.exclude, tags);
        self
    }

    pub fn cutoff(mut self, position: f64) -> Self {
        self.position_cutoff = position;
        self
    }

    pub fn selects(&self, rewrite: &Rewrite) -> bool {
        let labels = rewrite.labels().collect::<BTreeSet<_>>();
        labels.iter().any(|label| self.include.contains(*label))
            && self
                .require
                .iter()
                .all(|tag| labels.contains(tag.as_str()))
            && !labels.iter().any(|label| self.exclude.contains(*label))
    }

    pub fn admits_stage(&self, stage: &Stage) -> bool {
        stage.position <= self.position_cutoff
            && !self.exclude.contains(&stage.name)
            && stage.tags.is_disjoint(&self.exclude)
    }
}
