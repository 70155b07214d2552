//! Access to bodies of inline functions compiled in other modules

use kl_ir::visit::walk_class;
use kl_ir::{Class, DeclId, DeclTable, Declaration, Function, IrModule, Visitor};
use rustc_hash::FxHashMap;

/// On-demand deserializer of inline function bodies from dependencies
pub trait InlineBodyProvider {
    /// Body of `callee`, or `None` when it cannot be produced
    fn inline_body(&self, decls: &mut DeclTable, callee: DeclId) -> Option<Function>;
}

/// Provider for units without dependencies
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExternalBodies;

impl InlineBodyProvider for NoExternalBodies {
    fn inline_body(&self, _decls: &mut DeclTable, _callee: DeclId) -> Option<Function> {
        None
    }
}

/// Serves bodies out of a separately compiled module sharing the table
#[derive(Debug, Clone, Default)]
pub struct ModuleBodies {
    bodies: FxHashMap<DeclId, Function>,
}

impl ModuleBodies {
    /// Index every function with a body in `module`
    pub fn new(module: &IrModule) -> Self {
        Self {
            bodies: index_functions(module, |_| true),
        }
    }

    /// Number of functions available
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Whether no function is available
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

impl InlineBodyProvider for ModuleBodies {
    fn inline_body(&self, _decls: &mut DeclTable, callee: DeclId) -> Option<Function> {
        self.bodies.get(&callee).cloned()
    }
}

/// Top-level and member functions with bodies accepted by `keep`
pub(crate) fn index_functions(module: &IrModule, keep: impl Fn(DeclId) -> bool) -> FxHashMap<DeclId, Function> {
    struct Indexer<Keep> {
        keep: Keep,
        found: FxHashMap<DeclId, Function>,
    }

    impl<Keep: Fn(DeclId) -> bool> Visitor for Indexer<Keep> {
        fn visit_function(&mut self, function: &Function) {
            if function.body.is_some() && (self.keep)(function.decl) {
                self.found.insert(function.decl, function.clone());
            }
        }

        fn visit_class(&mut self, class: &Class) {
            walk_class(self, class);
        }
    }

    let mut indexer = Indexer {
        keep,
        found: FxHashMap::default(),
    };
    for file in &module.files {
        for declaration in &file.declarations {
            match declaration {
                Declaration::Function(function) => indexer.visit_function(function),
                Declaration::Class(class) => indexer.visit_class(class),
                Declaration::Field(_) => {}
            }
        }
    }
    indexer.found
}
