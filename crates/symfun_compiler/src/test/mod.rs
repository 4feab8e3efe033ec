
mod test_equivalence;
mod test_linking;
mod test_shared;

use crate::{Compiler, Function};
use symfun_graph::{DType, Type};

pub fn compiler() -> Compiler {
    let _ = env_logger::builder().is_test(true).try_init();
    Compiler::standard().unwrap()
}

pub fn fvec() -> Type {
    Type::vector(DType::Float64)
}

pub fn op_names(function: &Function) -> Vec<String> {
    let mut names = function
        .graph()
        .live_nodes()
        .map(|(_, node)| node.op.name())
        .collect::<Vec<_>>();
    names.sort();
    names
}
