use crate::data::dtype::Type;
use crate::data::op::{Op, OpError, ScalarOp};
use crate::data::value::Value;
use crate::shared::SharedValue;
use id_collections::{id_type, IdVec};

#[id_type]
pub struct VarId(pub usize);

#[id_type]
pub struct NodeId(pub usize);

#[derive(Clone, Debug)]
pub enum VarKind {
    Input,
    Shared(SharedValue),
    Constant(Value),
    Output { node: NodeId, index: usize },
}

#[derive(Clone, Debug)]
pub struct Variable {
    pub ty: Type,
    pub kind: VarKind,
    pub name: Option<String>,
}

impl Variable {
    pub fn is_root(&self) -> bool {
        !matches!(self.kind, VarKind::Output { .. })
    }

    pub fn producer(&self) -> Option<(NodeId, usize)> {
        match self.kind {
            VarKind::Output { node, index } => Some((node, index)),
            _ => None,
        }
    }

    pub fn constant(&self) -> Option<&Value> {
        match &self.kind {
            VarKind::Constant(value) => Some(value),
            _ => None,
        }
    }

    pub fn shared(&self) -> Option<&SharedValue> {
        match &self.kind {
            VarKind::Shared(shared) => Some(shared),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub op: Op,
    pub inputs: Vec<VarId>,
    pub outputs: Vec<VarId>,
}

/// Symbolic expression builder.  Variables and nodes are append-only; compilation captures a
/// private copy of the part it needs as a [`crate::FunctionGraph`].
#[derive(Clone, Debug)]
pub struct Graph {
    pub(crate) vars: IdVec<VarId, Variable>,
    pub(crate) nodes: IdVec<NodeId, Node>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            vars: IdVec::new(),
            nodes: IdVec::new(),
        }
    }

    pub fn var(&self, var: VarId) -> &Variable {
        &self.vars[var]
    }

    pub fn ty(&self, var: VarId) -> &Type {
        &self.vars[var].ty
    }

    pub fn node(&self, node: NodeId) -> &Node {
        &self.nodes[node]
    }

    pub fn input(&mut self, ty: Type, name: impl Into<String>) -> VarId {
        self.vars.push(Variable {
            ty,
            kind: VarKind::Input,
            name: Some(name.into()),
        })
    }

    pub fn constant(&mut self, value: Value) -> VarId {
        self.vars.push(Variable {
            ty: value.ty(),
            kind: VarKind::Constant(value),
            name: None,
        })
    }

    /// A variable standing for the current contents of `shared`.  Each call creates a distinct
    /// variable over the same container.
    pub fn shared(&mut self, shared: &SharedValue) -> VarId {
        self.vars.push(Variable {
            ty: shared.ty(),
            kind: VarKind::Shared(shared.clone()),
            name: Some(shared.name()),
        })
    }

    pub fn apply(&mut self, op: Op, inputs: &[VarId]) -> Result<Vec<VarId>, OpError> {
        let input_types = inputs
            .iter()
            .map(|&var| self.vars[var].ty.clone())
            .collect::<Vec<_>>();
        let output_types = op.infer_types(&input_types)?;

        let node = NodeId(self.nodes.len());
        let outputs = output_types
            .into_iter()
            .enumerate()
            .map(|(index, ty)| {
                self.vars.push(Variable {
                    ty,
                    kind: VarKind::Output { node, index },
                    name: None,
                })
            })
            .collect::<Vec<_>>();

        let pushed = self.nodes.push(Node {
            op,
            inputs: inputs.to_vec(),
            outputs: outputs.clone(),
        });
        debug_assert_eq!(pushed, node);
        Ok(outputs)
    }

    /// Applies a single-output op.
    pub fn apply1(&mut self, op: Op, inputs: &[VarId]) -> Result<VarId, OpError> {
        let name = op.name();
        let outputs = self.apply(op, inputs)?;
        match outputs[..] {
            [output] => Ok(output),
            _ => Err(OpError::OutputCount {
                op: name,
                expected: 1,
                got: outputs.len(),
            }),
        }
    }

    pub fn elemwise(&mut self, scalar: ScalarOp, inputs: &[VarId]) -> Result<VarId, OpError> {
        self.apply1(Op::elemwise(scalar), inputs)
    }

    pub fn add(&mut self, a: VarId, b: VarId) -> Result<VarId, OpError> {
        self.elemwise(ScalarOp::Add, &[a, b])
    }

    pub fn sub(&mut self, a: VarId, b: VarId) -> Result<VarId, OpError> {
        self.elemwise(ScalarOp::Sub, &[a, b])
    }

    pub fn mul(&mut self, a: VarId, b: VarId) -> Result<VarId, OpError> {
        self.elemwise(ScalarOp::Mul, &[a, b])
    }

    pub fn div(&mut self, a: VarId, b: VarId) -> Result<VarId, OpError> {
        self.elemwise(ScalarOp::Div, &[a, b])
    }

    pub fn neg(&mut self, a: VarId) -> Result<VarId, OpError> {
        self.elemwise(ScalarOp::Neg, &[a])
    }

    pub fn exp(&mut self, a: VarId) -> Result<VarId, OpError> {
        self.elemwise(ScalarOp::Exp, &[a])
    }

    pub fn log(&mut self, a: VarId) -> Result<VarId, OpError> {
        self.elemwise(ScalarOp::Log, &[a])
    }

    pub fn sum(&mut self, a: VarId) -> Result<VarId, OpError> {
        self.apply1(Op::Sum, &[a])
    }

    pub fn reshape(&mut self, a: VarId, shape: Vec<usize>) -> Result<VarId, OpError> {
        self.apply1(Op::Reshape(shape), &[a])
    }

    pub fn view(&mut self, a: VarId) -> Result<VarId, OpError> {
        self.apply1(Op::ViewOp, &[a])
    }

    pub fn deep_copy(&mut self, a: VarId) -> Result<VarId, OpError> {
        self.apply1(Op::DeepCopy, &[a])
    }
}
