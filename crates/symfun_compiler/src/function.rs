//! Compiling a graph into a callable [`Function`].

use crate::{Error, ErrorKind};
use symfun_backend::linker::{Executable, LinkOptions};
use symfun_backend::reuse::{insert_deepcopy, InputContract, OutputContract};
use symfun_backend::rewrites::standard_database;
use symfun_backend::{
    optimize, ModeRegistry, ModeSpec, ProfileStats, RewriteDatabase, RewriteOptions,
    RewriteReport,
};
use symfun_common::config::{CompileOptions, OnUnusedInput, ProfileMode};
use symfun_graph::{
    alias, FunctionGraph, Graph, SharedError, SharedValue, Type, Value, VarId, VarKind,
};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;

/// A declared input.
#[derive(Clone, Debug, PartialEq)]
pub struct In {
    pub var: VarId,
    pub name: Option<String>,
    /// The function may overwrite the argument's buffer.
    pub mutable: bool,
    /// Arguments must already have the input's dtype instead of being upcast to it.
    pub strict: bool,
    /// Outputs may alias the argument's buffer.
    pub borrow: bool,
    /// The expression written back after each call.  Only shared values can be updated.
    pub update: Option<VarId>,
}

impl In {
    pub fn new(var: VarId) -> Self {
        In {
            var,
            name: None,
            mutable: false,
            strict: false,
            borrow: false,
            update: None,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    pub fn mutable(mut self) -> Self {
        self.mutable = true;
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn borrow(mut self) -> Self {
        self.borrow = true;
        self
    }

    pub fn update(mut self, expr: VarId) -> Self {
        self.update = Some(expr);
        self
    }
}

impl From<VarId> for In {
    fn from(var: VarId) -> Self {
        In::new(var)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Out {
    pub var: VarId,
    /// The returned value may alias an input or another output instead of being a fresh copy.
    pub borrow: bool,
}

impl Out {
    pub fn new(var: VarId) -> Self {
        Out { var, borrow: false }
    }

    pub fn borrow(mut self) -> Self {
        self.borrow = true;
        self
    }
}

impl From<VarId> for Out {
    fn from(var: VarId) -> Self {
        Out::new(var)
    }
}

#[derive(Clone, Debug, Default)]
pub struct FunctionSpec {
    pub inputs: Vec<In>,
    pub outputs: Vec<Out>,
    /// `(shared value, expression)` pairs for shared values that are not declared as inputs.
    pub updates: Vec<(VarId, VarId)>,
    pub mode: ModeSpec,
    pub options: CompileOptions,
    pub link: LinkOptions,
}

impl FunctionSpec {
    pub fn new<I: Into<In>, O: Into<Out>>(
        inputs: impl IntoIterator<Item = I>,
        outputs: impl IntoIterator<Item = O>,
    ) -> Self {
        FunctionSpec {
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: impl Into<ModeSpec>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_update(mut self, shared: VarId, expr: VarId) -> Self {
        self.updates.push((shared, expr));
        self
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_link(mut self, link: LinkOptions) -> Self {
        self.link = link;
        self
    }
}

#[derive(Clone, Debug)]
struct Argument {
    var: VarId,
    name: Option<String>,
    ty: Type,
    mutable: bool,
    strict: bool,
    borrow: bool,
}

impl Argument {
    fn coerce(&self, index: usize, value: &Value) -> Result<Value, Error> {
        let mismatch = || -> Error {
            ErrorKind::ArgumentType {
                index,
                expected: self.ty.clone(),
                got: value.ty(),
            }
            .into()
        };
        if !self.ty.accepts_shape(value.shape()) {
            return Err(mismatch());
        }
        if value.dtype() == self.ty.dtype {
            Ok(value.clone())
        } else if !self.strict && value.dtype().can_cast_safely_to(self.ty.dtype) {
            Ok(value.cast(self.ty.dtype))
        } else {
            Err(mismatch())
        }
    }
}

#[derive(Clone, Debug)]
struct SharedSlot {
    var: VarId,
    value: SharedValue,
    borrow: bool,
    update: Option<VarId>,
}

/// The resolved calling convention: explicit arguments first, then every shared value the
/// function reads or updates.
#[derive(Clone, Debug)]
struct Signature {
    arguments: Vec<Argument>,
    shared: Vec<SharedSlot>,
    /// Other variables bound to the container of a shared slot, with that slot's variable.
    aliases: Vec<(VarId, VarId)>,
    outputs: Vec<Out>,
}

/// Every root variable that `vars` depend on in `graph`.
fn graph_roots(graph: &Graph, vars: impl IntoIterator<Item = VarId>) -> BTreeSet<VarId> {
    let mut roots = BTreeSet::new();
    let mut visited = BTreeSet::new();
    let mut stack = vars.into_iter().collect::<Vec<_>>();
    while let Some(var) = stack.pop() {
        if !visited.insert(var) {
            continue;
        }
        match graph.var(var).producer() {
            Some((node, _)) => stack.extend(&graph.node(node).inputs),
            None => {
                roots.insert(var);
            }
        }
    }
    roots
}

impl Signature {
    fn collect(graph: &Graph, spec: &FunctionSpec) -> Result<Self, Error> {
        let mut arguments = Vec::new();
        let mut shared: Vec<SharedSlot> = Vec::new();
        let mut declared = BTreeSet::new();

        for (index, input) in spec.inputs.iter().enumerate() {
            let var = input.var;
            if !declared.insert(var) {
                return Err(ErrorKind::DuplicateInput { index, var }.into());
            }
            match &graph.var(var).kind {
                VarKind::Input => {
                    if input.update.is_some() {
                        return Err(ErrorKind::UpdateOnNonShared { var }.into());
                    }
                    arguments.push(Argument {
                        var,
                        name: input.name.clone().or_else(|| graph.var(var).name.clone()),
                        ty: graph.ty(var).clone(),
                        mutable: input.mutable,
                        strict: input.strict,
                        borrow: input.borrow,
                    });
                }
                VarKind::Shared(value) => {
                    if shared.iter().any(|slot| slot.value.same_container(value)) {
                        return Err(ErrorKind::DuplicateInput { index, var }.into());
                    }
                    shared.push(SharedSlot {
                        var,
                        value: value.clone(),
                        borrow: input.borrow,
                        update: input.update,
                    });
                }
                VarKind::Constant(_) | VarKind::Output { .. } => {
                    return Err(ErrorKind::InvalidInput { index, var }.into());
                }
            }
        }

        for &(target, expr) in &spec.updates {
            let VarKind::Shared(value) = &graph.var(target).kind else {
                return Err(ErrorKind::UpdateOnNonShared { var: target }.into());
            };
            match shared
                .iter_mut()
                .find(|slot| slot.value.same_container(value))
            {
                Some(slot) if slot.update.is_some() => {
                    return Err(ErrorKind::DuplicateUpdate { name: value.name() }.into());
                }
                Some(slot) => slot.update = Some(expr),
                None => shared.push(SharedSlot {
                    var: target,
                    value: value.clone(),
                    borrow: false,
                    update: Some(expr),
                }),
            }
        }

        let reads = graph_roots(
            graph,
            spec.outputs
                .iter()
                .map(|out| out.var)
                .chain(shared.iter().filter_map(|slot| slot.update)),
        );
        let mut aliases = Vec::new();
        for var in reads {
            let Some(value) = graph.var(var).shared() else {
                continue;
            };
            match shared.iter().find(|slot| slot.value.same_container(value)) {
                Some(slot) if slot.var != var => aliases.push((var, slot.var)),
                Some(_) => {}
                None => shared.push(SharedSlot {
                    var,
                    value: value.clone(),
                    borrow: false,
                    update: None,
                }),
            }
        }

        for slot in &shared {
            if slot.value.is_released() {
                return Err(SharedError::Released {
                    name: slot.value.name(),
                }
                .into());
            }
            if let Some(expr) = slot.update {
                let expected = slot.value.ty();
                let got = graph.ty(expr);
                if got.dtype != expected.dtype || got.ndim() != expected.ndim() {
                    return Err(ErrorKind::UpdateTypeMismatch {
                        name: slot.value.name(),
                        expected,
                        got: got.clone(),
                    }
                    .into());
                }
            }
        }

        Ok(Signature {
            arguments,
            shared,
            aliases,
            outputs: spec.outputs.clone(),
        })
    }

    fn inputs(&self) -> Vec<VarId> {
        self.arguments
            .iter()
            .map(|arg| arg.var)
            .chain(self.shared.iter().map(|slot| slot.var))
            .collect()
    }

    fn updated(&self) -> impl Iterator<Item = (&SharedSlot, VarId)> {
        self.shared
            .iter()
            .filter_map(|slot| slot.update.map(|expr| (slot, expr)))
    }

    fn outputs(&self) -> Vec<VarId> {
        self.outputs
            .iter()
            .map(|out| out.var)
            .chain(self.updated().map(|(_, expr)| expr))
            .collect()
    }

    fn input_contracts(&self) -> Vec<InputContract> {
        self.arguments
            .iter()
            .map(|arg| InputContract {
                var: arg.var,
                borrow: arg.borrow,
                updated: false,
            })
            .chain(self.shared.iter().map(|slot| InputContract {
                var: slot.var,
                borrow: slot.borrow,
                updated: slot.update.is_some(),
            }))
            .collect()
    }

    fn output_contracts(&self) -> Vec<OutputContract> {
        self.outputs
            .iter()
            .map(|out| OutputContract {
                borrow: out.borrow,
                update_of: None,
            })
            .chain(self.updated().map(|(slot, _)| OutputContract {
                borrow: false,
                update_of: Some(slot.var),
            }))
            .collect()
    }
}

/// The rewrite database and mode registry a compilation draws on.
#[derive(Clone)]
pub struct Compiler {
    pub modes: ModeRegistry,
    pub rewrites: RewriteDatabase,
}

impl Compiler {
    pub fn new(modes: ModeRegistry, rewrites: RewriteDatabase) -> Self {
        Compiler { modes, rewrites }
    }

    pub fn standard() -> Result<Self, Error> {
        Ok(Compiler {
            modes: ModeRegistry::standard(),
            rewrites: standard_database()?,
        })
    }

    pub fn compile(&self, graph: &Graph, spec: &FunctionSpec) -> Result<Function, Error> {
        let start = Instant::now();
        let options = &spec.options;
        let mode = self.modes.resolve(&spec.mode)?;
        let signature = Signature::collect(graph, spec)?;

        let mut fgraph = FunctionGraph::capture(
            graph,
            &signature.inputs(),
            &signature.outputs(),
            options.require_output_dependence,
        )?;
        for &(alias, canonical) in &signature.aliases {
            fgraph.replace(alias, canonical)?;
        }

        let used = fgraph
            .outputs()
            .iter()
            .flat_map(|&output| fgraph.root_ancestors(output))
            .collect::<BTreeSet<_>>();
        for (index, arg) in signature.arguments.iter().enumerate() {
            if used.contains(&arg.var) {
                continue;
            }
            match options.on_unused_input {
                OnUnusedInput::Raise => {
                    return Err(ErrorKind::UnusedInput {
                        index,
                        name: arg.name.clone(),
                    }
                    .into());
                }
                OnUnusedInput::Warn => log::warn!(
                    "input {}{} is not used to compute any output",
                    index,
                    arg.name
                        .as_ref()
                        .map(|name| format!(" '{}'", name))
                        .unwrap_or_default()
                ),
                OnUnusedInput::Ignore => {}
            }
        }

        for arg in signature.arguments.iter().filter(|arg| !arg.mutable) {
            fgraph.supervisor_mut().protect(arg.var);
        }
        for slot in signature.shared.iter().filter(|slot| slot.update.is_none()) {
            fgraph.supervisor_mut().protect(slot.var);
        }
        if !options.accept_inplace {
            alias::check_no_inplace(&fgraph)?;
        }

        let rewrite_start = Instant::now();
        let (report, _) = optimize(
            &self.rewrites,
            &mode.optimizer,
            &mut fgraph,
            &RewriteOptions {
                max_iters: options.max_rewrite_iters,
                progress: options.progress,
            },
        )?;
        let rewrite_time = rewrite_start.elapsed();

        let copies = insert_deepcopy(
            &mut fgraph,
            &signature.input_contracts(),
            &signature.output_contracts(),
        )?;
        let orderings = alias::validate(&fgraph)?;
        log::debug!(
            "compiled graph ({} protective copies):\n{}",
            copies,
            fgraph
        );

        let link_start = Instant::now();
        let executable = mode.linker.link(&fgraph, &orderings, &spec.link)?;
        let link_time = link_start.elapsed();

        let profile = if mode.profile || options.profile == ProfileMode::Enabled {
            Some(ProfileStats {
                compile_time: start.elapsed(),
                rewrite_time,
                link_time,
                ..Default::default()
            })
        } else {
            None
        };

        Ok(Function {
            executable,
            signature,
            fgraph,
            report,
            profile,
        })
    }
}

/// Gives every input the graph may overwrite its own buffer when the caller passed storage that
/// another input also reads.
fn separate_writable_inputs(inputs: &mut [Value], writable: &[bool]) {
    for index in 0..inputs.len() {
        if !writable[index] {
            continue;
        }
        let aliased = inputs
            .iter()
            .enumerate()
            .any(|(other, value)| other != index && inputs[index].shares_storage(value));
        if aliased {
            log::debug!("copying input {} apart from an input sharing its storage", index);
            inputs[index] = inputs[index].deep_copy();
        }
    }
}

/// A compiled graph.  Calls take one value per explicit input and return one value per output;
/// shared values are read before and updated after each call.
pub struct Function {
    executable: Box<dyn Executable>,
    signature: Signature,
    fgraph: FunctionGraph,
    report: RewriteReport,
    profile: Option<ProfileStats>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("inputs", &self.input_count())
            .field("outputs", &self.output_count())
            .field("graph", &self.fgraph)
            .finish()
    }
}

impl Function {
    pub fn call(&mut self, args: &[Value]) -> Result<Vec<Value>, Error> {
        let start = Instant::now();

        let arguments = &self.signature.arguments;
        if args.len() != arguments.len() {
            return Err(ErrorKind::ArgumentCount {
                expected: arguments.len(),
                got: args.len(),
            }
            .into());
        }
        let mut inputs = Vec::with_capacity(args.len() + self.signature.shared.len());
        for (index, (arg, value)) in arguments.iter().zip(args).enumerate() {
            inputs.push(arg.coerce(index, value)?);
        }
        for slot in &self.signature.shared {
            inputs.push(slot.value.get_value(true)?);
        }
        let writable = arguments
            .iter()
            .map(|arg| arg.mutable)
            .chain(self.signature.shared.iter().map(|slot| slot.update.is_some()))
            .collect::<Vec<_>>();
        separate_writable_inputs(&mut inputs, &writable);

        let mut outputs = self.executable.run(inputs, self.profile.as_mut())?;

        let updates = outputs.split_off(self.signature.outputs.len());
        for ((slot, _), value) in self.signature.updated().zip(updates) {
            slot.value.set_value(value, true)?;
        }

        if let Some(profile) = &mut self.profile {
            profile.record_call(start.elapsed());
        }
        Ok(outputs)
    }

    pub fn input_count(&self) -> usize {
        self.signature.arguments.len()
    }

    pub fn output_count(&self) -> usize {
        self.signature.outputs.len()
    }

    /// The optimized graph the function executes.
    pub fn graph(&self) -> &FunctionGraph {
        &self.fgraph
    }

    pub fn report(&self) -> &RewriteReport {
        &self.report
    }

    pub fn warnings(&self) -> &[String] {
        &self.report.warnings
    }

    pub fn profile(&self) -> Option<&ProfileStats> {
        self.profile.as_ref()
    }
}
