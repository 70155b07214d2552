//! Visitor infrastructure for traversing and rewriting the tree.
//!
//! The `walk_*` functions match every node kind exhaustively, so a new
//! [`ExprKind`] variant cannot be added without deciding how each walk
//! reaches its children.

use crate::tree::{Call, Class, Declaration, Expr, ExprKind, Field, Function, IrFile, IrModule, Stmt};

/// Read-only visitor; override a method and call the matching `walk_*`
/// function to keep descending
pub trait Visitor {
    /// Visit a function, lambda or constructor
    fn visit_function(&mut self, function: &Function) {
        walk_function(self, function);
    }

    /// Visit a class
    fn visit_class(&mut self, class: &Class) {
        walk_class(self, class);
    }

    /// Visit a field or top-level property
    fn visit_field(&mut self, field: &Field) {
        if let Some(initializer) = &field.initializer {
            self.visit_expr(initializer);
        }
    }

    /// Visit a statement
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    /// Visit an expression
    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }
}

/// Visit every declaration of a module
pub fn walk_module<V: Visitor + ?Sized>(visitor: &mut V, module: &IrModule) {
    for file in &module.files {
        walk_file(visitor, file);
    }
}

/// Visit every declaration of a file
pub fn walk_file<V: Visitor + ?Sized>(visitor: &mut V, file: &IrFile) {
    for declaration in &file.declarations {
        walk_declaration(visitor, declaration);
    }
}

/// Dispatch on a declaration
pub fn walk_declaration<V: Visitor + ?Sized>(visitor: &mut V, declaration: &Declaration) {
    match declaration {
        Declaration::Function(function) => visitor.visit_function(function),
        Declaration::Class(class) => visitor.visit_class(class),
        Declaration::Field(field) => visitor.visit_field(field),
    }
}

/// Defaults, then body
pub fn walk_function<V: Visitor + ?Sized>(visitor: &mut V, function: &Function) {
    for param in function.explicit_params() {
        if let Some(default) = &param.default {
            visitor.visit_expr(default);
        }
    }
    if let Some(body) = &function.body {
        for stmt in body {
            visitor.visit_stmt(stmt);
        }
    }
}

/// Members in order
pub fn walk_class<V: Visitor + ?Sized>(visitor: &mut V, class: &Class) {
    for declaration in &class.declarations {
        walk_declaration(visitor, declaration);
    }
}

/// Children of a statement
pub fn walk_stmt<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match stmt {
        Stmt::Variable(variable) => {
            if let Some(initializer) = &variable.initializer {
                visitor.visit_expr(initializer);
            }
        }
        Stmt::Expr(expr) => visitor.visit_expr(expr),
        Stmt::Function(function) => visitor.visit_function(function),
        Stmt::Class(class) => visitor.visit_class(class),
    }
}

fn walk_call<V: Visitor + ?Sized>(visitor: &mut V, call: &Call) {
    if let Some(receiver) = &call.dispatch_receiver {
        visitor.visit_expr(receiver);
    }
    if let Some(receiver) = &call.extension_receiver {
        visitor.visit_expr(receiver);
    }
    for arg in call.args.iter().flatten() {
        visitor.visit_expr(arg);
    }
}

/// Children of an expression, in evaluation order
pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Const(_) | ExprKind::GetValue(_) => {}
        ExprKind::SetValue { value, .. } => visitor.visit_expr(value),
        ExprKind::GetField { receiver, .. } => {
            if let Some(receiver) = receiver {
                visitor.visit_expr(receiver);
            }
        }
        ExprKind::SetField { receiver, value, .. } => {
            if let Some(receiver) = receiver {
                visitor.visit_expr(receiver);
            }
            visitor.visit_expr(value);
        }
        ExprKind::Call(call) => walk_call(visitor, call),
        ExprKind::Invoke { callee, args } => {
            visitor.visit_expr(callee);
            for arg in args {
                visitor.visit_expr(arg);
            }
        }
        ExprKind::Lambda(function) => visitor.visit_function(function),
        ExprKind::FunctionReference {
            dispatch_receiver,
            extension_receiver,
            ..
        } => {
            for receiver in [dispatch_receiver, extension_receiver].into_iter().flatten() {
                visitor.visit_expr(receiver);
            }
        }
        ExprKind::Block { statements, .. } | ExprKind::ReturnableBlock { statements, .. } => {
            for stmt in statements {
                visitor.visit_stmt(stmt);
            }
        }
        ExprKind::Return { value, .. }
        | ExprKind::Unary { operand: value, .. }
        | ExprKind::Throw(value)
        | ExprKind::Cast(value) => visitor.visit_expr(value),
        ExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            visitor.visit_expr(condition);
            visitor.visit_expr(then_branch);
            if let Some(else_branch) = else_branch {
                visitor.visit_expr(else_branch);
            }
        }
        ExprKind::While { condition, body } => {
            visitor.visit_expr(condition);
            visitor.visit_expr(body);
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            visitor.visit_expr(lhs);
            visitor.visit_expr(rhs);
        }
        ExprKind::Vararg { elements, .. } => {
            for element in elements {
                visitor.visit_expr(element);
            }
        }
        ExprKind::SuspendableExpression {
            suspension_point_id,
            result,
        } => {
            visitor.visit_expr(suspension_point_id);
            visitor.visit_expr(result);
        }
        ExprKind::SuspensionPoint {
            result,
            resume_result,
            ..
        } => {
            visitor.visit_expr(result);
            visitor.visit_expr(resume_result);
        }
    }
}

/// In-place rewriting visitor; `Error` lets passes abort a walk
pub trait MutVisitor {
    /// Error propagated out of the walk
    type Error;

    /// Visit a function, lambda or constructor
    fn visit_function(&mut self, function: &mut Function) -> Result<(), Self::Error> {
        walk_function_mut(self, function)
    }

    /// Visit a class
    fn visit_class(&mut self, class: &mut Class) -> Result<(), Self::Error> {
        walk_class_mut(self, class)
    }

    /// Visit a field or top-level property
    fn visit_field(&mut self, field: &mut Field) -> Result<(), Self::Error> {
        match &mut field.initializer {
            Some(initializer) => self.visit_expr(initializer),
            None => Ok(()),
        }
    }

    /// Visit a statement
    fn visit_stmt(&mut self, stmt: &mut Stmt) -> Result<(), Self::Error> {
        walk_stmt_mut(self, stmt)
    }

    /// Visit an expression
    fn visit_expr(&mut self, expr: &mut Expr) -> Result<(), Self::Error> {
        walk_expr_mut(self, expr)
    }
}

/// Rewrite every declaration of a module
pub fn walk_module_mut<V: MutVisitor + ?Sized>(visitor: &mut V, module: &mut IrModule) -> Result<(), V::Error> {
    for file in &mut module.files {
        walk_file_mut(visitor, file)?;
    }
    Ok(())
}

/// Rewrite every declaration of a file
pub fn walk_file_mut<V: MutVisitor + ?Sized>(visitor: &mut V, file: &mut IrFile) -> Result<(), V::Error> {
    for declaration in &mut file.declarations {
        walk_declaration_mut(visitor, declaration)?;
    }
    Ok(())
}

/// Dispatch on a declaration
pub fn walk_declaration_mut<V: MutVisitor + ?Sized>(
    visitor: &mut V,
    declaration: &mut Declaration,
) -> Result<(), V::Error> {
    match declaration {
        Declaration::Function(function) => visitor.visit_function(function),
        Declaration::Class(class) => visitor.visit_class(class),
        Declaration::Field(field) => visitor.visit_field(field),
    }
}

/// Defaults, then body
pub fn walk_function_mut<V: MutVisitor + ?Sized>(visitor: &mut V, function: &mut Function) -> Result<(), V::Error> {
    let receivers = function
        .dispatch_receiver
        .iter_mut()
        .chain(function.extension_receiver.iter_mut());
    for param in receivers.chain(function.params.iter_mut()) {
        if let Some(default) = &mut param.default {
            visitor.visit_expr(default)?;
        }
    }
    if let Some(body) = &mut function.body {
        for stmt in body {
            visitor.visit_stmt(stmt)?;
        }
    }
    Ok(())
}

/// Members in order
pub fn walk_class_mut<V: MutVisitor + ?Sized>(visitor: &mut V, class: &mut Class) -> Result<(), V::Error> {
    for declaration in &mut class.declarations {
        walk_declaration_mut(visitor, declaration)?;
    }
    Ok(())
}

/// Children of a statement
pub fn walk_stmt_mut<V: MutVisitor + ?Sized>(visitor: &mut V, stmt: &mut Stmt) -> Result<(), V::Error> {
    match stmt {
        Stmt::Variable(variable) => match &mut variable.initializer {
            Some(initializer) => visitor.visit_expr(initializer),
            None => Ok(()),
        },
        Stmt::Expr(expr) => visitor.visit_expr(expr),
        Stmt::Function(function) => visitor.visit_function(function),
        Stmt::Class(class) => visitor.visit_class(class),
    }
}

fn walk_call_mut<V: MutVisitor + ?Sized>(visitor: &mut V, call: &mut Call) -> Result<(), V::Error> {
    if let Some(receiver) = &mut call.dispatch_receiver {
        visitor.visit_expr(receiver)?;
    }
    if let Some(receiver) = &mut call.extension_receiver {
        visitor.visit_expr(receiver)?;
    }
    for arg in call.args.iter_mut().flatten() {
        visitor.visit_expr(arg)?;
    }
    Ok(())
}

/// Children of an expression, in evaluation order
pub fn walk_expr_mut<V: MutVisitor + ?Sized>(visitor: &mut V, expr: &mut Expr) -> Result<(), V::Error> {
    match &mut expr.kind {
        ExprKind::Const(_) | ExprKind::GetValue(_) => Ok(()),
        ExprKind::SetValue { value, .. }
        | ExprKind::Return { value, .. }
        | ExprKind::Unary { operand: value, .. }
        | ExprKind::Throw(value)
        | ExprKind::Cast(value) => visitor.visit_expr(value),
        ExprKind::GetField { receiver, .. } => match receiver {
            Some(receiver) => visitor.visit_expr(receiver),
            None => Ok(()),
        },
        ExprKind::SetField { receiver, value, .. } => {
            if let Some(receiver) = receiver {
                visitor.visit_expr(receiver)?;
            }
            visitor.visit_expr(value)
        }
        ExprKind::Call(call) => walk_call_mut(visitor, call),
        ExprKind::Invoke { callee, args } => {
            visitor.visit_expr(callee)?;
            for arg in args {
                visitor.visit_expr(arg)?;
            }
            Ok(())
        }
        ExprKind::Lambda(function) => visitor.visit_function(function),
        ExprKind::FunctionReference {
            dispatch_receiver,
            extension_receiver,
            ..
        } => {
            for receiver in [dispatch_receiver, extension_receiver].into_iter().flatten() {
                visitor.visit_expr(receiver)?;
            }
            Ok(())
        }
        ExprKind::Block { statements, .. } | ExprKind::ReturnableBlock { statements, .. } => {
            for stmt in statements {
                visitor.visit_stmt(stmt)?;
            }
            Ok(())
        }
        ExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            visitor.visit_expr(condition)?;
            visitor.visit_expr(then_branch)?;
            match else_branch {
                Some(else_branch) => visitor.visit_expr(else_branch),
                None => Ok(()),
            }
        }
        ExprKind::While { condition, body } => {
            visitor.visit_expr(condition)?;
            visitor.visit_expr(body)
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            visitor.visit_expr(lhs)?;
            visitor.visit_expr(rhs)
        }
        ExprKind::Vararg { elements, .. } => {
            for element in elements {
                visitor.visit_expr(element)?;
            }
            Ok(())
        }
        ExprKind::SuspendableExpression {
            suspension_point_id,
            result,
        } => {
            visitor.visit_expr(suspension_point_id)?;
            visitor.visit_expr(result)
        }
        ExprKind::SuspensionPoint {
            result,
            resume_result,
            ..
        } => {
            visitor.visit_expr(result)?;
            visitor.visit_expr(resume_result)
        }
    }
}

/// Whether any expression under `expr` (itself included) satisfies
/// `predicate`; nested function and class bodies are searched too
pub fn any_expr(expr: &Expr, predicate: &mut dyn FnMut(&Expr) -> bool) -> bool {
    struct Finder<'pred> {
        predicate: &'pred mut dyn FnMut(&Expr) -> bool,
        found: bool,
    }

    impl Visitor for Finder<'_> {
        fn visit_expr(&mut self, expr: &Expr) {
            if self.found {
                return;
            }
            if (self.predicate)(expr) {
                self.found = true;
                return;
            }
            walk_expr(self, expr);
        }
    }

    let mut finder = Finder {
        predicate,
        found: false,
    };
    finder.visit_expr(expr);
    finder.found
}
