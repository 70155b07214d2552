//! Three-phase deep copy of IR subtrees.
//!
//! 1. *Create* walks the subtree top-down and allocates a placeholder
//!    descriptor for every declaration found in it.
//! 2. *Initialize* fills each placeholder's signature, substituting
//!    types and redirecting references to other copied declarations.
//!    Placeholders may refer to each other freely because they are
//!    arena handles, not references.
//! 3. *Copy* clones the tree and rewrites every handle through the map.
//!
//! Only declarations introduced inside the copied subtree are renamed;
//! anything the subtree merely refers to keeps its identity.

use crate::global::{GlobalSubstitutionMap, SubstitutedDecl};
use crate::substitution::{SubstitutionMap, TypeSubstitutor};
use kl_ir::visit::{
    Visitor, walk_class, walk_class_mut, walk_expr, walk_expr_mut, walk_function, walk_function_mut, walk_stmt,
    walk_stmt_mut,
};
use kl_ir::{
    Class, ClassSignature, DeclId, DeclTable, Descriptor, Expr, ExprKind, Field, Function, FunctionSignature,
    MutVisitor, Signature, Stmt, Type,
};
use std::convert::Infallible;
use tracing::trace;

/// Copies subtrees, remembering every substitution it made
#[derive(Debug, Clone, Default)]
pub struct DeepCopier {
    scope_owner: Option<DeclId>,
    history: SubstitutionMap,
}

impl DeepCopier {
    /// Copier whose top-level copies are owned by `scope_owner`
    pub fn new(scope_owner: Option<DeclId>) -> Self {
        Self {
            scope_owner,
            history: SubstitutionMap::default(),
        }
    }

    /// Every substitution made so far, later copies winning
    pub fn history(&self) -> &SubstitutionMap {
        &self.history
    }

    /// Copy a function, its signature and body
    pub fn copy_function(
        &mut self,
        decls: &mut DeclTable,
        function: &Function,
        types: Option<&TypeSubstitutor>,
    ) -> Function {
        let mut collector = DeclCollector::default();
        collector.visit_function(function);
        let map = self.prepare(decls, &collector.found, types);
        let mut copy = function.clone();
        remap(&map, types, |remapper| remapper.visit_function(&mut copy));
        copy
    }

    /// Copy an expression
    pub fn copy_expr(&mut self, decls: &mut DeclTable, expr: &Expr, types: Option<&TypeSubstitutor>) -> Expr {
        let mut collector = DeclCollector::default();
        collector.visit_expr(expr);
        let map = self.prepare(decls, &collector.found, types);
        let mut copy = expr.clone();
        remap(&map, types, |remapper| remapper.visit_expr(&mut copy));
        copy
    }

    /// Copy a statement list
    pub fn copy_statements(
        &mut self,
        decls: &mut DeclTable,
        statements: &[Stmt],
        types: Option<&TypeSubstitutor>,
    ) -> Vec<Stmt> {
        let mut collector = DeclCollector::default();
        for stmt in statements {
            collector.visit_stmt(stmt);
        }
        let map = self.prepare(decls, &collector.found, types);
        let mut copy = statements.to_vec();
        remap(&map, types, |remapper| {
            copy.iter_mut().try_for_each(|stmt| remapper.visit_stmt(stmt))
        });
        copy
    }

    /// Publish the history into the unit-wide map
    pub fn record_into(&self, global: &mut GlobalSubstitutionMap, inlined_function: DeclId) {
        for (original, replacement) in self.history.iter() {
            global.insert(
                original,
                SubstitutedDecl {
                    inlined_function,
                    replacement,
                },
            );
        }
    }

    /// Create and initialize phases for one subtree
    fn prepare(&mut self, decls: &mut DeclTable, found: &[DeclId], types: Option<&TypeSubstitutor>) -> SubstitutionMap {
        let mut map = SubstitutionMap::default();
        for &old in found {
            let placeholder = create_placeholder(decls, old);
            map.insert(old, placeholder);
        }
        for (old, new) in map.iter() {
            let initialized = self.initialize(decls, &map, old, types);
            let descriptor = decls.get_mut(new);
            descriptor.owner = initialized.owner;
            descriptor.signature = initialized.signature;
            descriptor.overrides = initialized.overrides;
        }
        trace!(copied = map.len(), "deep copy prepared");
        self.history.extend(&map);
        map
    }

    fn initialize(
        &self,
        decls: &DeclTable,
        map: &SubstitutionMap,
        old: DeclId,
        types: Option<&TypeSubstitutor>,
    ) -> Initialized {
        let descriptor = decls.get(old);
        let signature = match &descriptor.signature {
            Signature::Function(signature) => Signature::Function(FunctionSignature {
                type_params: signature.type_params.clone(),
                dispatch_receiver: signature.dispatch_receiver.map(|param| map.map_or_same(param)),
                extension_receiver: signature.extension_receiver.map(|param| map.map_or_same(param)),
                params: signature.params.iter().map(|param| map.map_or_same(*param)).collect(),
                return_type: map.substitute_type(&signature.return_type, types),
            }),
            Signature::Class(signature) => Signature::Class(ClassSignature {
                super_types: signature
                    .super_types
                    .iter()
                    .map(|ty| map.substitute_type(ty, types))
                    .collect(),
                members: signature.members.iter().map(|member| map.map_or_same(*member)).collect(),
            }),
            Signature::Value(ty) => Signature::Value(map.substitute_type(ty, types)),
            Signature::ReturnTarget(ty) => Signature::ReturnTarget(map.substitute_type(ty, types)),
            Signature::TypeParameter => Signature::TypeParameter,
            Signature::Pending => Signature::Pending,
        };
        let owner = descriptor
            .owner
            .map(|owner| map.get(owner).or(self.scope_owner).unwrap_or(owner));
        Initialized {
            owner,
            signature,
            overrides: descriptor
                .overrides
                .iter()
                .map(|overridden| map.map_or_same(*overridden))
                .collect(),
        }
    }
}

struct Initialized {
    owner: Option<DeclId>,
    signature: Signature,
    overrides: Vec<DeclId>,
}

fn create_placeholder(decls: &mut DeclTable, old: DeclId) -> DeclId {
    let original = decls.get(old).clone();
    let name = if original.modifiers.anonymous {
        original.name
    } else {
        decls.fresh_copy_name(old)
    };
    decls.alloc(Descriptor {
        name,
        kind: original.kind,
        owner: None,
        modifiers: original.modifiers,
        signature: Signature::Pending,
        overrides: Vec::new(),
        copied_from: Some(old),
        intrinsic: original.intrinsic,
    })
}

fn remap(
    map: &SubstitutionMap,
    types: Option<&TypeSubstitutor>,
    run: impl FnOnce(&mut Remapper<'_>) -> Result<(), Infallible>,
) {
    let mut remapper = Remapper { map, types };
    match run(&mut remapper) {
        Ok(()) => {}
        Err(never) => match never {},
    }
}

/// Collects declarations introduced by a subtree, top-down
#[derive(Default)]
struct DeclCollector {
    found: Vec<DeclId>,
}

impl Visitor for DeclCollector {
    fn visit_function(&mut self, function: &Function) {
        self.found.push(function.decl);
        self.found.extend(function.explicit_params().map(|param| param.decl));
        walk_function(self, function);
    }

    fn visit_class(&mut self, class: &Class) {
        self.found.push(class.decl);
        walk_class(self, class);
    }

    fn visit_field(&mut self, field: &Field) {
        self.found.push(field.decl);
        if let Some(initializer) = &field.initializer {
            self.visit_expr(initializer);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        if let Stmt::Variable(variable) = stmt {
            self.found.push(variable.decl);
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::ReturnableBlock { target, .. } => self.found.push(*target),
            ExprKind::SuspensionPoint { id, .. } => self.found.push(*id),
            _ => {}
        }
        walk_expr(self, expr);
    }
}

/// Rewrites handles and types of a cloned subtree
struct Remapper<'map> {
    map: &'map SubstitutionMap,
    types: Option<&'map TypeSubstitutor>,
}

impl Remapper<'_> {
    fn decl(&self, decl: &mut DeclId) {
        *decl = self.map.map_or_same(*decl);
    }

    fn ty(&self, ty: &mut Type) {
        *ty = self.map.substitute_type(ty, self.types);
    }
}

impl MutVisitor for Remapper<'_> {
    type Error = Infallible;

    fn visit_function(&mut self, function: &mut Function) -> Result<(), Infallible> {
        self.decl(&mut function.decl);
        let receivers = function
            .dispatch_receiver
            .iter_mut()
            .chain(function.extension_receiver.iter_mut());
        for param in receivers.chain(function.params.iter_mut()) {
            self.decl(&mut param.decl);
        }
        walk_function_mut(self, function)
    }

    fn visit_class(&mut self, class: &mut Class) -> Result<(), Infallible> {
        self.decl(&mut class.decl);
        walk_class_mut(self, class)
    }

    fn visit_field(&mut self, field: &mut Field) -> Result<(), Infallible> {
        self.decl(&mut field.decl);
        match &mut field.initializer {
            Some(initializer) => self.visit_expr(initializer),
            None => Ok(()),
        }
    }

    fn visit_stmt(&mut self, stmt: &mut Stmt) -> Result<(), Infallible> {
        if let Stmt::Variable(variable) = stmt {
            self.decl(&mut variable.decl);
        }
        walk_stmt_mut(self, stmt)
    }

    fn visit_expr(&mut self, expr: &mut Expr) -> Result<(), Infallible> {
        self.ty(&mut expr.ty);
        match &mut expr.kind {
            ExprKind::GetValue(decl)
            | ExprKind::SetValue { target: decl, .. }
            | ExprKind::GetField { field: decl, .. }
            | ExprKind::SetField { field: decl, .. }
            | ExprKind::FunctionReference { target: decl, .. }
            | ExprKind::ReturnableBlock { target: decl, .. }
            | ExprKind::Return { target: decl, .. }
            | ExprKind::SuspensionPoint { id: decl, .. } => self.decl(decl),
            ExprKind::Call(call) => {
                self.decl(&mut call.callee);
                for ty in &mut call.type_args {
                    self.ty(ty);
                }
            }
            ExprKind::Vararg { element_type, .. } => self.ty(element_type),
            ExprKind::Const(_)
            | ExprKind::Invoke { .. }
            | ExprKind::Lambda(_)
            | ExprKind::Block { .. }
            | ExprKind::If { .. }
            | ExprKind::While { .. }
            | ExprKind::Binary { .. }
            | ExprKind::Unary { .. }
            | ExprKind::Throw(_)
            | ExprKind::Cast(_)
            | ExprKind::SuspendableExpression { .. } => {}
        }
        walk_expr_mut(self, expr)
    }
}
