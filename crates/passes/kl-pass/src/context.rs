//! State threaded through every pass of one compilation unit

use crate::diagnostics::Diagnostics;
use indexmap::IndexMap;
use kl_copy::GlobalSubstitutionMap;
use kl_ir::{DeclId, DeclTable, Function};
use rustc_hash::FxHashMap;

/// What the coroutine pass synthesized for one suspend function or lambda
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoroutineInfo {
    /// State-machine class
    pub class: DeclId,
    /// Constructor taking every explicit parameter and the completion
    pub constructor: DeclId,
    /// Factory constructor over captured values, lambdas only
    pub factory: Option<DeclId>,
    /// Resume entry point
    pub invoke_suspend: DeclId,
    /// `label` field
    pub label: DeclId,
    /// Fields holding explicit parameters, in parameter order
    pub parameter_fields: Vec<DeclId>,
    /// Fields holding locals spilled across suspension points
    pub spilled_fields: Vec<DeclId>,
    /// Number of suspension points
    pub suspension_points: u32,
}

/// Caches shared between passes, owned by the pipeline context
#[derive(Debug, Clone, Default)]
pub struct LoweringCaches {
    /// Where copied declarations went
    pub global_substitutions: GlobalSubstitutionMap,
    /// Inline callees with their own inline calls already expanded
    pub inline_bodies: FxHashMap<DeclId, Function>,
    /// State machines, keyed by the lowered function or lambda
    pub coroutines: IndexMap<DeclId, CoroutineInfo>,
}

/// Mutable state of lowering one unit
#[derive(Debug, Clone)]
pub struct LoweringContext {
    /// Descriptor table
    pub decls: DeclTable,
    /// Recoverable errors and warnings
    pub diagnostics: Diagnostics,
    /// Cross-pass caches
    pub caches: LoweringCaches,
}

impl LoweringContext {
    /// Context over a descriptor table
    pub fn new(decls: DeclTable) -> Self {
        Self {
            decls,
            diagnostics: Diagnostics::default(),
            caches: LoweringCaches::default(),
        }
    }

    /// Give back the descriptor table
    pub fn into_decls(self) -> DeclTable {
        self.decls
    }
}
