//! Kiln IR and symbol model.
//!
//! Lowering consumes a fully typed tree ([`IrModule`]) together with a
//! descriptor table ([`DeclTable`]). Tree nodes own their children and
//! refer to declarations only through [`DeclId`] handles, which keeps a
//! declaration's identity separate from the node that happens to declare it.

pub mod builder;
pub mod decl;
pub mod pretty;
pub mod tree;
pub mod ty;
pub mod verify;
pub mod visit;

pub use builder::IrBuilder;
pub use decl::{
    Builtins, ClassSignature, DeclId, DeclKind, DeclTable, Descriptor, FunctionSignature, Intrinsic, Modifiers,
    Signature,
};
pub use tree::{
    BinaryOp, BlockOrigin, Call, Class, Declaration, Expr, ExprKind, Field, Function, IrFile, IrModule, Literal,
    Stmt, UnaryOp, ValueParameter, Variable,
};
pub use ty::Type;
pub use verify::{IrViolation, verify_function, verify_module};
pub use visit::{MutVisitor, Visitor};

use serde::{Deserialize, Serialize};

/// Everything the front end hands to lowering, in serializable form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationUnit {
    /// Descriptor table, interner included
    pub decls: DeclTable,
    /// Typed tree
    pub module: IrModule,
}

impl CompilationUnit {
    /// Bundle a table and module
    pub fn new(decls: DeclTable, module: IrModule) -> Self {
        Self { decls, module }
    }

    /// Find a declaration by name, searching files then class members
    pub fn find_function(&self, name: &str) -> Option<&Function> {
        fn search<'unit>(
            declarations: &'unit [Declaration],
            decls: &DeclTable,
            name: &str,
        ) -> Option<&'unit Function> {
            declarations.iter().find_map(|declaration| match declaration {
                Declaration::Function(function) if decls.name(function.decl) == name => Some(function),
                Declaration::Class(class) => search(&class.declarations, decls, name),
                Declaration::Function(_) | Declaration::Field(_) => None,
            })
        }
        self.module
            .files
            .iter()
            .find_map(|file| search(&file.declarations, &self.decls, name))
    }
}
