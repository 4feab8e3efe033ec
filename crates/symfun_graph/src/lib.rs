#![allow(dead_code)]

pub mod alias;
pub mod data;
pub mod fgraph;
pub mod graph;
pub mod pretty_print;
pub mod shared;

pub use alias::{AliasedMemoryError, Supervisor};
pub use data::dtype::{DType, Type};
pub use data::op::{Backend, Op, OpError, ScalarOp, Thunk};
pub use data::value::Value;
pub use fgraph::{Client, FunctionGraph, GraphError, Orderings};
pub use graph::{Graph, Node, NodeId, VarId, VarKind, Variable};
pub use shared::{SharedError, SharedValue};
