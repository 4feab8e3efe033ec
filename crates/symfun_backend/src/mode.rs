//! Modes pair an optimizer query with a linker.

use crate::linker::perform::PerformLinker;
use crate::linker::plan::PlanLinker;
use crate::linker::Linker;
use crate::rewrite::RewriteQuery;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ModeError {
    #[error("no mode named '{0}' is registered")]
    UnknownMode(String),
    #[error("no optimizer named '{0}' is registered")]
    UnknownOptimizer(String),
    #[error("no linker named '{0}' is registered")]
    UnknownLinker(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Mode {
    pub optimizer: RewriteQuery,
    pub linker: String,
    pub profile: bool,
}

impl Mode {
    pub fn new(optimizer: RewriteQuery, linker: &str) -> Self {
        Mode {
            optimizer,
            linker: linker.to_owned(),
            profile: false,
        }
    }

    pub fn including(&self, tags: &[&str]) -> Self {
        Mode {
            optimizer: self.optimizer.clone().include(tags),
            ..self.clone()
        }
    }

    pub fn excluding(&self, tags: &[&str]) -> Self {
        Mode {
            optimizer: self.optimizer.clone().exclude(tags),
            ..self.clone()
        }
    }

    pub fn requiring(&self, tags: &[&str]) -> Self {
        Mode {
            optimizer: self.optimizer.clone().require(tags),
            ..self.clone()
        }
    }

    pub fn profiled(&self) -> Self {
        Mode {
            profile: true,
            ..self.clone()
        }
    }
}

/// How a caller asks for a mode.
#[derive(Clone, Debug, PartialEq)]
pub enum ModeSpec {
    Named(String),
    Custom { optimizer: String, linker: String },
    Mode(Mode),
}

impl Default for ModeSpec {
    fn default() -> Self {
        ModeSpec::Named("FAST_RUN".to_owned())
    }
}

impl From<&str> for ModeSpec {
    fn from(name: &str) -> Self {
        ModeSpec::Named(name.to_owned())
    }
}

impl From<Mode> for ModeSpec {
    fn from(mode: Mode) -> Self {
        ModeSpec::Mode(mode)
    }
}

#[derive(Clone)]
pub struct ResolvedMode {
    pub optimizer: RewriteQuery,
    pub linker: Rc<dyn Linker>,
    pub profile: bool,
}

impl fmt::Debug for ResolvedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedMode")
            .field("optimizer", &self.optimizer)
            .field("linker", &self.linker.name())
            .field("profile", &self.profile)
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct ModeRegistry {
    modes: BTreeMap<String, Mode>,
    optimizers: BTreeMap<String, RewriteQuery>,
    linkers: BTreeMap<String, Rc<dyn Linker>>,
}

impl ModeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let fast_run = RewriteQuery::including(&["fast_run"]);

        let mut registry = ModeRegistry::new();
        registry.register_optimizer("None", RewriteQuery::none());
        registry.register_optimizer("merge", RewriteQuery::including(&["merge"]));
        registry.register_optimizer("fast_compile", RewriteQuery::including(&["fast_compile"]));
        registry.register_optimizer("fast_run", fast_run.clone());
        registry.register_optimizer("fast_run_stable", fast_run.clone().exclude(&["unstable"]));
        registry.register_optimizer("stabilize", fast_run.clone().cutoff(1.5));
        registry.register_optimizer("unsafe", fast_run.clone().include(&["unsafe"]));
        registry.register_optimizer(
            "o2",
            RewriteQuery::including(&["fast_compile", "stabilize"]),
        );
        registry.register_optimizer("o3", fast_run.exclude(&["inplace"]));

        registry.register_linker(Rc::new(PerformLinker));
        registry.register_linker(Rc::new(PlanLinker));

        for (name, optimizer, linker) in [
            ("FAST_COMPILE", "fast_compile", "perform"),
            ("FAST_RUN", "fast_run", "plan"),
            ("FAST_RUN_STABLE", "fast_run_stable", "plan"),
        ] {
            let query = registry.optimizers[optimizer].clone();
            registry.register_mode(name, Mode::new(query, linker));
        }
        registry
    }

    pub fn register_mode(&mut self, name: &str, mode: Mode) {
        self.modes.insert(name.to_owned(), mode);
    }

    pub fn register_optimizer(&mut self, name: &str, query: RewriteQuery) {
        self.optimizers.insert(name.to_owned(), query);
    }

    pub fn register_linker(&mut self, linker: Rc<dyn Linker>) {
        self.linkers.insert(linker.name().to_owned(), linker);
    }

    pub fn get_mode(&self, name: &str) -> Result<&Mode, ModeError> {
        self.modes
            .get(name)
            .ok_or_else(|| ModeError::UnknownMode(name.to_owned()))
    }

    pub fn optimizer(&self, name: &str) -> Result<&RewriteQuery, ModeError> {
        self.optimizers
            .get(name)
            .ok_or_else(|| ModeError::UnknownOptimizer(name.to_owned()))
    }

    pub fn linker(&self, name: &str) -> Result<Rc<dyn Linker>, ModeError> {
        self.linkers
            .get(name)
            .cloned()
            .ok_or_else(|| ModeError::UnknownLinker(name.to_owned()))
    }

    pub fn resolve(&self, spec: &ModeSpec) -> Result<ResolvedMode, ModeError> {
        let (optimizer, linker, profile) = match spec {
            ModeSpec::Named(name) => {
                let mode = self.get_mode(name)?;
                (mode.optimizer.clone(), mode.linker.as_str(), mode.profile)
            }
            ModeSpec::Custom { optimizer, linker } => {
                (self.optimizer(optimizer)?.clone(), linker.as_str(), false)
            }
            ModeSpec::Mode(mode) => (mode.optimizer.clone(), mode.linker.as_str(), mode.profile),
        };
        Ok(ResolvedMode {
            optimizer,
            linker: self.linker(linker)?,
            profile,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rewrites::standard_database;

    fn selected_rewrites(query: &RewriteQuery) -> Vec<String> {
        let db = standard_database().unwrap();
        db.select(query)
            .into_iter()
            .flat_map(|selected| selected.rewrites.into_iter().map(|r| r.name.clone()))
            .collect()
    }

    #[test]
    fn standard_modes_resolve() {
        let registry = ModeRegistry::standard();
        let fast_run = registry.resolve(&"FAST_RUN".into()).unwrap();
        assert_eq!(fast_run.linker.name(), "plan");
        let fast_compile = registry.resolve(&"FAST_COMPILE".into()).unwrap();
        assert_eq!(fast_compile.linker.name(), "perform");

        let custom = registry
            .resolve(&ModeSpec::Custom {
                optimizer: "None".to_owned(),
                linker: "perform".to_owned(),
            })
            .unwrap();
        assert_eq!(custom.optimizer, RewriteQuery::none());
    }

    #[test]
    fn unknown_names_are_errors() {
        let registry = ModeRegistry::standard();
        assert_eq!(
            registry.resolve(&"FAST_WALK".into()).unwrap_err(),
            ModeError::UnknownMode("FAST_WALK".to_owned())
        );
        assert_eq!(
            registry
                .resolve(&ModeSpec::Custom {
                    optimizer: "o9".to_owned(),
                    linker: "plan".to_owned(),
                })
                .unwrap_err(),
            ModeError::UnknownOptimizer("o9".to_owned())
        );
        let mode = registry.get_mode("FAST_RUN").unwrap().clone();
        assert_eq!(
            registry
                .resolve(&ModeSpec::Mode(Mode {
                    linker: "jit".to_owned(),
                    ..mode
                }))
                .unwrap_err(),
            ModeError::UnknownLinker("jit".to_owned())
        );
    }

    #[test]
    fn optimizer_tags_select_the_right_rewrites() {
        let registry = ModeRegistry::standard();

        let fast_run = selected_rewrites(registry.optimizer("fast_run").unwrap());
        assert!(fast_run.contains(&"div_by_constant".to_owned()));
        assert!(fast_run.contains(&"make_inplace".to_owned()));
        assert!(!fast_run.contains(&"sub_self".to_owned()));
        assert!(!fast_run.contains(&"print_current_graph".to_owned()));

        let stable = selected_rewrites(registry.optimizer("fast_run_stable").unwrap());
        assert!(!stable.contains(&"div_by_constant".to_owned()));
        assert!(stable.contains(&"mul_self".to_owned()));

        let unsafe_rewrites = selected_rewrites(registry.optimizer("unsafe").unwrap());
        assert!(unsafe_rewrites.contains(&"sub_self".to_owned()));

        let stabilize = selected_rewrites(registry.optimizer("stabilize").unwrap());
        assert!(stabilize.contains(&"log1p".to_owned()));
        assert!(!stabilize.contains(&"mul_self".to_owned()));

        let o3 = selected_rewrites(registry.optimizer("o3").unwrap());
        assert!(!o3.contains(&"make_inplace".to_owned()));

        assert!(selected_rewrites(registry.optimizer("None").unwrap()).is_empty());
    }

    #[test]
    fn mode_helpers_adjust_the_query() {
        let registry = ModeRegistry::standard();
        let mode = registry
            .get_mode("FAST_RUN")
            .unwrap()
            .excluding(&["inplace"])
            .including(&["unsafe"]);
        let names = selected_rewrites(&mode.optimizer);
        assert!(!names.contains(&"make_inplace".to_owned()));
        assert!(names.contains(&"div_self".to_owned()));

        let required = mode.requiring(&["canonicalize"]);
        let names = selected_rewrites(&required.optimizer);
        assert!(names.iter().all(|name| [
            "add_zero", "mul_one", "neg_neg"
        ]
        .contains(&name.as_str())));
    }
}
