use crate::progress_ui::ProgressMode;

/// Number of scan iterations a fixed-point rewrite stage may spend before giving up on reaching
/// a fixpoint.  A stage that hits this budget still leaves a valid graph behind.
pub const DEFAULT_MAX_REWRITE_ITERS: usize = 16;

/// What to do with an input that was declared but that no output depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum OnUnusedInput {
    #[default]
    Raise,
    Warn,
    Ignore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ProfileMode {
    #[default]
    Disabled,
    Enabled,
}

#[derive(Clone, Debug)]
pub struct CompileOptions {
    pub on_unused_input: OnUnusedInput,

    /// Reject outputs that depend on none of the declared inputs.
    pub require_output_dependence: bool,

    /// Accept user graphs that already contain destructive operations.
    pub accept_inplace: bool,

    /// Overrides the per-stage iteration budget of every fixed-point stage.
    pub max_rewrite_iters: Option<usize>,

    pub progress: ProgressMode,
    pub profile: ProfileMode,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            on_unused_input: OnUnusedInput::default(),
            require_output_dependence: false,
            accept_inplace: false,
            max_rewrite_iters: None,
            progress: ProgressMode::default(),
            profile: ProfileMode::default(),
        }
    }
}

/// Options consumed by the `plan` linker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlanOptions {
    /// Free each intermediate right after its last consumer runs.  When disabled, buffers stay
    /// in their slots between calls and are reused if nothing else holds them.
    pub allow_gc: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self { allow_gc: true }
    }
}
