use crate::rewrite::{Rewrite, Stage, StageKind};

/// Logs the graph as it stands at this point of the pipeline.  Selected only by the
/// `print_graph` tag.
pub fn print_graph() -> Rewrite {
    Rewrite::global("print_current_graph", &["print_graph"], |fgraph| {
        log::debug!("current graph:\n{}", fgraph);
        Ok(false)
    })
}

pub fn stage() -> Stage {
    Stage::new("print_graph", 101.0, StageKind::Once).with(print_graph())
}
