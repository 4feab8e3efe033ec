//! The primitive table.
//!
//! Every primitive declares its structural contract here through explicit `match` tables: arity,
//! output type inference, which inputs it overwrites (its destroy map), which outputs are views
//! of inputs (its view map), and how each linker back end executes it.  The aliasing analysis
//! and reuse planner only ever look at these declarations, never at a kernel.

use crate::data::dtype::{DType, Type};
use crate::data::value::Value;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum OpError {
    #[error("{op} expects {expected} inputs but was given {got}")]
    Arity {
        op: String,
        expected: usize,
        got: usize,
    },
    #[error("{op} cannot combine inputs of types {lhs} and {rhs}")]
    StaticShapeMismatch { op: String, lhs: Type, rhs: Type },
    #[error("{op} cannot combine arrays of shapes {shapes:?}")]
    IncompatibleShapes { op: String, shapes: Vec<Vec<usize>> },
    #[error("{op} cannot overwrite an input of type {input} with an output of type {output}")]
    InplaceTypeMismatch { op: String, input: Type, output: Type },
    #[error("cannot reshape an array of type {from} to shape {to:?}")]
    BadReshape { from: Type, to: Vec<usize> },
    #[error("shape {shape:?} does not describe {len} elements")]
    BadElementCount { shape: Vec<usize>, len: usize },
    #[error("index {index} out of bounds for an array of {len} elements")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("input {index} of {op} must have type {expected}, found {got}")]
    InputType {
        op: String,
        index: usize,
        expected: Type,
        got: Type,
    },
    #[error("{op} produced {got} outputs, expected {expected}")]
    OutputCount {
        op: String,
        expected: usize,
        got: usize,
    },
    #[error("{0}")]
    Custom(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarOp {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Exp,
    Log,
    Log1p,
    Sqr,
}

impl ScalarOp {
    pub fn arity(self) -> usize {
        match self {
            ScalarOp::Add | ScalarOp::Sub | ScalarOp::Mul | ScalarOp::Div => 2,
            ScalarOp::Neg | ScalarOp::Exp | ScalarOp::Log | ScalarOp::Log1p | ScalarOp::Sqr => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarOp::Add => "add",
            ScalarOp::Sub => "sub",
            ScalarOp::Mul => "mul",
            ScalarOp::Div => "true_div",
            ScalarOp::Neg => "neg",
            ScalarOp::Exp => "exp",
            ScalarOp::Log => "log",
            ScalarOp::Log1p => "log1p",
            ScalarOp::Sqr => "sqr",
        }
    }

    fn output_dtype(self, upcast: DType) -> DType {
        match self {
            ScalarOp::Div | ScalarOp::Exp | ScalarOp::Log | ScalarOp::Log1p => DType::Float64,
            ScalarOp::Add | ScalarOp::Sub | ScalarOp::Mul | ScalarOp::Neg | ScalarOp::Sqr => {
                upcast.max(DType::Int64)
            }
        }
    }

    pub fn apply(self, args: &[f64]) -> f64 {
        match self {
            ScalarOp::Add => args[0] + args[1],
            ScalarOp::Sub => args[0] - args[1],
            ScalarOp::Mul => args[0] * args[1],
            ScalarOp::Div => args[0] / args[1],
            ScalarOp::Neg => -args[0],
            ScalarOp::Exp => args[0].exp(),
            ScalarOp::Log => args[0].ln(),
            ScalarOp::Log1p => args[0].ln_1p(),
            ScalarOp::Sqr => args[0] * args[0],
        }
    }
}

pub type PerformFn = Rc<dyn Fn(&[Value]) -> Result<Vec<Value>, OpError>>;

/// A primitive wrapping a host closure with declared input and output types.  It only has an
/// interpretive implementation.
#[derive(Clone)]
pub struct FromFunctionOp {
    pub name: String,
    pub itypes: Vec<Type>,
    pub otypes: Vec<Type>,
    pub func: PerformFn,
}

impl PartialEq for FromFunctionOp {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.itypes == other.itypes
            && self.otypes == other.otypes
            && Rc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for FromFunctionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromFunctionOp")
            .field("name", &self.name)
            .field("itypes", &self.itypes)
            .field("otypes", &self.otypes)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    /// `inplace = Some(i)` overwrites input `i` with the result.
    Elemwise {
        scalar: ScalarOp,
        inplace: Option<usize>,
    },
    /// Sum of all elements, as a 0-d array.
    Sum,
    /// View of the (contiguous) input with a new shape.
    Reshape(Vec<usize>),
    /// Identity view.
    ViewOp,
    /// Identity copy into fresh storage.
    DeepCopy,
    /// Fresh array of the input's type and runtime shape, filled with a constant.
    Fill { value: f64 },
    Cast(DType),
    FromFunction(FromFunctionOp),
}

/// Linker back ends a primitive can supply a thunk for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Backend {
    Perform,
    Plan,
}

/// A pre-specialized kernel.  The second argument is a buffer left over from a previous call for
/// output 0, which the thunk may write into when it is uniquely owned and the right size.
pub type Thunk = Box<dyn Fn(&[Value], Option<Value>) -> Result<Vec<Value>, OpError>>;

pub fn from_function(
    name: impl Into<String>,
    itypes: Vec<Type>,
    otypes: Vec<Type>,
    func: impl Fn(&[Value]) -> Result<Vec<Value>, OpError> + 'static,
) -> Op {
    Op::FromFunction(FromFunctionOp {
        name: name.into(),
        itypes,
        otypes,
        func: Rc::new(func),
    })
}

impl Op {
    pub fn elemwise(scalar: ScalarOp) -> Op {
        Op::Elemwise {
            scalar,
            inplace: None,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Op::Elemwise {
                scalar,
                inplace: None,
            } => scalar.name().to_owned(),
            Op::Elemwise {
                scalar,
                inplace: Some(input),
            } => format!("{}{{inplace={}}}", scalar.name(), input),
            Op::Sum => "sum".to_owned(),
            Op::Reshape(shape) => format!("reshape{{{:?}}}", shape),
            Op::ViewOp => "view_op".to_owned(),
            Op::DeepCopy => "deep_copy".to_owned(),
            Op::Fill { value } => format!("fill{{{}}}", value),
            Op::Cast(dtype) => format!("cast{{{}}}", dtype),
            Op::FromFunction(custom) => custom.name.clone(),
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Op::Elemwise { scalar, .. } => scalar.arity(),
            Op::Sum
            | Op::Reshape(_)
            | Op::ViewOp
            | Op::DeepCopy
            | Op::Fill { .. }
            | Op::Cast(_) => 1,
            Op::FromFunction(custom) => custom.itypes.len(),
        }
    }

    pub fn infer_types(&self, inputs: &[Type]) -> Result<Vec<Type>, OpError> {
        if inputs.len() != self.arity() {
            return Err(OpError::Arity {
                op: self.name(),
                expected: self.arity(),
                got: inputs.len(),
            });
        }

        match self {
            Op::Elemwise { scalar, inplace } => {
                let dtype = scalar.output_dtype(
                    inputs
                        .iter()
                        .map(|ty| ty.dtype)
                        .fold(DType::Bool, DType::upcast),
                );

                let mut shape: Option<Type> = None;
                for ty in inputs.iter().filter(|ty| !ty.is_scalar()) {
                    shape = Some(match shape {
                        None => ty.clone(),
                        Some(prev) => match prev.unify_shape(ty) {
                            Some(unified) => Type::new(dtype, unified),
                            None => {
                                return Err(OpError::StaticShapeMismatch {
                                    op: self.name(),
                                    lhs: prev,
                                    rhs: ty.clone(),
                                })
                            }
                        },
                    });
                }
                let output = match shape {
                    Some(ty) => ty.with_dtype(dtype),
                    None => Type::scalar(dtype),
                };

                if let Some(input) = inplace {
                    if inputs[*input] != output {
                        return Err(OpError::InplaceTypeMismatch {
                            op: self.name(),
                            input: inputs[*input].clone(),
                            output,
                        });
                    }
                }
                Ok(vec![output])
            }

            Op::Sum => {
                let dtype = inputs[0].dtype.max(DType::Int64);
                Ok(vec![Type::scalar(dtype)])
            }

            Op::Reshape(shape) => {
                let known: Option<usize> = inputs[0].shape.iter().copied().product();
                if let Some(len) = known {
                    if len != shape.iter().product::<usize>() {
                        return Err(OpError::BadReshape {
                            from: inputs[0].clone(),
                            to: shape.clone(),
                        });
                    }
                }
                Ok(vec![Type::new(
                    inputs[0].dtype,
                    shape.iter().map(|&dim| Some(dim)).collect(),
                )])
            }

            Op::ViewOp | Op::DeepCopy | Op::Fill { .. } => Ok(vec![inputs[0].clone()]),

            Op::Cast(dtype) => Ok(vec![inputs[0].with_dtype(*dtype)]),

            Op::FromFunction(custom) => {
                for (index, (expected, got)) in custom.itypes.iter().zip(inputs).enumerate() {
                    if expected.dtype != got.dtype || expected.unify_shape(got).is_none() {
                        return Err(OpError::InputType {
                            op: self.name(),
                            index,
                            expected: expected.clone(),
                            got: got.clone(),
                        });
                    }
                }
                Ok(custom.otypes.clone())
            }
        }
    }

    /// Pairs `(output, input)` where the output is written over the input's storage.
    pub fn destroy_map(&self) -> Vec<(usize, usize)> {
        match self {
            Op::Elemwise {
                inplace: Some(input),
                ..
            } => vec![(0, *input)],
            _ => Vec::new(),
        }
    }

    /// Pairs `(output, input)` where the output is a view of the input's storage.
    pub fn view_map(&self) -> Vec<(usize, usize)> {
        match self {
            Op::Reshape(_) | Op::ViewOp => vec![(0, 0)],
            _ => Vec::new(),
        }
    }

    pub fn is_destructive(&self) -> bool {
        !self.destroy_map().is_empty()
    }

    pub fn is_pure_view(&self) -> bool {
        !self.view_map().is_empty() && !self.is_destructive()
    }

    /// Inputs this op could overwrite to produce its output, judged on types alone.  Whether doing
    /// so is safe in a given graph is the reuse planner's business.
    pub fn reuse_candidates(&self, inputs: &[Type], outputs: &[Type]) -> Vec<usize> {
        match self {
            Op::Elemwise { inplace: None, .. } => inputs
                .iter()
                .enumerate()
                .filter(|(_, ty)| **ty == outputs[0])
                .map(|(index, _)| index)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// This op rewritten to overwrite `input`, if it has such a form.
    pub fn destructive_variant(&self, input: usize) -> Option<Op> {
        match self {
            Op::Elemwise {
                scalar,
                inplace: None,
            } if input < scalar.arity() => Some(Op::Elemwise {
                scalar: *scalar,
                inplace: Some(input),
            }),
            _ => None,
        }
    }

    pub fn perform(&self, inputs: &[Value]) -> Result<Vec<Value>, OpError> {
        if inputs.len() != self.arity() {
            return Err(OpError::Arity {
                op: self.name(),
                expected: self.arity(),
                got: inputs.len(),
            });
        }

        match self {
            Op::Elemwise { scalar, inplace } => {
                let dtype = scalar.output_dtype(
                    inputs
                        .iter()
                        .map(|value| value.dtype())
                        .fold(DType::Bool, DType::upcast),
                );
                let (shape, data) = elemwise_kernel(&self.name(), *scalar, inputs)?;
                match inplace {
                    None => Ok(vec![Value::new(dtype, shape, data)?]),
                    Some(input) => {
                        let target = &inputs[*input];
                        if target.shape() != &shape[..] || target.dtype() != dtype {
                            return Err(OpError::InplaceTypeMismatch {
                                op: self.name(),
                                input: target.ty(),
                                output: Type::new(dtype, shape.into_iter().map(Some).collect()),
                            });
                        }
                        target.overwrite(data)?;
                        Ok(vec![target.clone()])
                    }
                }
            }

            Op::Sum => {
                let dtype = inputs[0].dtype().max(DType::Int64);
                let total = inputs[0].with_data(|data| data.iter().sum());
                Ok(vec![Value::scalar(dtype, total)])
            }

            Op::Reshape(shape) => match inputs[0].view_with_shape(shape.clone()) {
                Ok(view) => Ok(vec![view]),
                Err(_) => Err(OpError::BadReshape {
                    from: inputs[0].ty(),
                    to: shape.clone(),
                }),
            },

            Op::ViewOp => Ok(vec![inputs[0].clone()]),

            Op::DeepCopy => Ok(vec![inputs[0].deep_copy()]),

            Op::Fill { value } => Ok(vec![Value::filled(
                inputs[0].dtype(),
                inputs[0].shape().to_vec(),
                *value,
            )]),

            Op::Cast(dtype) => Ok(vec![inputs[0].cast(*dtype)]),

            Op::FromFunction(custom) => {
                let outputs = (custom.func)(inputs)?;
                if outputs.len() != custom.otypes.len() {
                    return Err(OpError::OutputCount {
                        op: self.name(),
                        expected: custom.otypes.len(),
                        got: outputs.len(),
                    });
                }
                Ok(outputs)
            }
        }
    }

    /// The thunk table.  `None` means the back end has no implementation of its own for this
    /// primitive and must fall back to `perform`.
    pub fn thunk(&self, backend: Backend) -> Option<Thunk> {
        match (backend, self) {
            (Backend::Perform, _) => {
                let op = self.clone();
                Some(Box::new(move |inputs, _| op.perform(inputs)))
            }

            (Backend::Plan, Op::FromFunction(_)) => None,

            (
                Backend::Plan,
                Op::Elemwise {
                    scalar,
                    inplace: None,
                },
            ) => {
                let scalar = *scalar;
                let name = self.name();
                Some(Box::new(move |inputs, reusable| {
                    let dtype = scalar.output_dtype(
                        inputs
                            .iter()
                            .map(|value| value.dtype())
                            .fold(DType::Bool, DType::upcast),
                    );
                    let (shape, data) = elemwise_kernel(&name, scalar, inputs)?;
                    match reusable {
                        Some(buffer)
                            if buffer.is_uniquely_owned()
                                && buffer.shape() == &shape[..]
                                && buffer.dtype() == dtype =>
                        {
                            buffer.overwrite(data)?;
                            Ok(vec![buffer])
                        }
                        _ => Ok(vec![Value::new(dtype, shape, data)?]),
                    }
                }))
            }

            (Backend::Plan, _) => {
                let op = self.clone();
                Some(Box::new(move |inputs, _| op.perform(inputs)))
            }
        }
    }
}

fn elemwise_kernel(
    name: &str,
    scalar: ScalarOp,
    inputs: &[Value],
) -> Result<(Vec<usize>, Vec<f64>), OpError> {
    let mut shape: Option<&[usize]> = None;
    for value in inputs.iter().filter(|value| !value.shape().is_empty()) {
        match shape {
            None => shape = Some(value.shape()),
            Some(prev) if prev == value.shape() => {}
            Some(_) => {
                return Err(OpError::IncompatibleShapes {
                    op: name.to_owned(),
                    shapes: inputs.iter().map(|value| value.shape().to_vec()).collect(),
                })
            }
        }
    }
    let shape = shape.unwrap_or(&[]).to_vec();
    let len: usize = shape.iter().product();

    // Materialize operands first so that an input appearing twice, or an output overwriting one
    // of its own inputs, always reads pre-call data.
    let operands: Vec<Vec<f64>> = inputs.iter().map(|value| value.to_vec()).collect();
    let mut args = vec![0.0; inputs.len()];
    let data = (0..len)
        .map(|i| {
            for (arg, operand) in args.iter_mut().zip(&operands) {
                *arg = if operand.len() == 1 { operand[0] } else { operand[i] };
            }
            scalar.apply(&args)
        })
        .collect();
    Ok((shape, data))
}
