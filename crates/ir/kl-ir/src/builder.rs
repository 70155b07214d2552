//! Convenience constructors for descriptors and typed nodes

use crate::decl::{DeclId, DeclKind, DeclTable, Descriptor, FunctionSignature, Modifiers, Signature};
use crate::tree::{BinaryOp, BlockOrigin, Call, Expr, ExprKind, Function, Literal, Stmt, ValueParameter, Variable};
use crate::ty::Type;
use kl_span::FileSpan;

/// Builds nodes at one source location, deriving types from the table
pub struct IrBuilder<'decls> {
    decls: &'decls mut DeclTable,
    span: FileSpan,
}

impl<'decls> IrBuilder<'decls> {
    /// Builder emitting nodes at `span`
    pub fn new(decls: &'decls mut DeclTable, span: FileSpan) -> Self {
        Self { decls, span }
    }

    /// Underlying descriptor table
    pub fn decls(&mut self) -> &mut DeclTable {
        &mut *self.decls
    }

    /// Span given to built nodes
    pub fn span(&self) -> FileSpan {
        self.span
    }

    /// Allocate a descriptor
    pub fn declare(
        &mut self,
        name: &str,
        kind: DeclKind,
        owner: Option<DeclId>,
        modifiers: Modifiers,
        signature: Signature,
    ) -> DeclId {
        let name = self.decls.intern(name);
        self.decls
            .alloc(Descriptor::new(name, kind, owner, signature).with_modifiers(modifiers))
    }

    /// Local variable descriptor
    pub fn variable(&mut self, name: &str, owner: DeclId, ty: Type, mutable: bool) -> DeclId {
        let modifiers = Modifiers {
            mutable,
            ..Modifiers::default()
        };
        self.declare(name, DeclKind::Variable, Some(owner), modifiers, Signature::Value(ty))
    }

    /// Value parameter descriptor
    pub fn parameter(&mut self, name: &str, owner: DeclId, ty: Type) -> DeclId {
        self.declare(
            name,
            DeclKind::ValueParameter,
            Some(owner),
            Modifiers::default(),
            Signature::Value(ty),
        )
    }

    /// Field descriptor
    pub fn field(&mut self, name: &str, owner: Option<DeclId>, ty: Type, mutable: bool) -> DeclId {
        let modifiers = Modifiers {
            mutable,
            ..Modifiers::default()
        };
        self.declare(name, DeclKind::Field, owner, modifiers, Signature::Value(ty))
    }

    /// Function declaration with fresh parameters and no body
    pub fn function(
        &mut self,
        name: &str,
        owner: Option<DeclId>,
        params: &[(&str, Type)],
        return_type: Type,
        modifiers: Modifiers,
    ) -> Function {
        let decl = self.declare(name, DeclKind::Function, owner, modifiers, Signature::Pending);
        let params: Vec<_> = params
            .iter()
            .map(|(param, ty)| ValueParameter::new(self.parameter(param, decl, ty.clone()), self.span))
            .collect();
        self.decls.get_mut(decl).signature = Signature::Function(FunctionSignature {
            type_params: Vec::new(),
            dispatch_receiver: None,
            extension_receiver: None,
            params: params.iter().map(|param| param.decl).collect(),
            return_type,
        });
        Function {
            decl,
            type_params: Vec::new(),
            dispatch_receiver: None,
            extension_receiver: None,
            params,
            body: None,
            span: self.span,
        }
    }

    /// Record the function's receivers, params and type params in its signature
    pub fn sync_signature(&mut self, function: &Function) {
        let return_type = self.decls.return_type(function.decl);
        self.decls.get_mut(function.decl).signature = Signature::Function(FunctionSignature {
            type_params: function.type_params.clone(),
            dispatch_receiver: function.dispatch_receiver.as_ref().map(|param| param.decl),
            extension_receiver: function.extension_receiver.as_ref().map(|param| param.decl),
            params: function.params.iter().map(|param| param.decl).collect(),
            return_type,
        });
    }

    fn expr(&self, kind: ExprKind, ty: Type) -> Expr {
        Expr::new(kind, ty, self.span)
    }

    /// Integer constant
    pub fn int(&self, value: i64) -> Expr {
        self.expr(ExprKind::Const(Literal::Int(value)), Type::Int)
    }

    /// String constant
    pub fn string(&self, value: &str) -> Expr {
        self.expr(ExprKind::Const(Literal::String(value.to_string())), Type::String)
    }

    /// Boolean constant
    pub fn boolean(&self, value: bool) -> Expr {
        self.expr(ExprKind::Const(Literal::Bool(value)), Type::Bool)
    }

    /// `Unit`
    pub fn unit(&self) -> Expr {
        Expr::unit(self.span)
    }

    /// `null`
    pub fn null(&self) -> Expr {
        self.expr(ExprKind::Const(Literal::Null), Type::Any)
    }

    /// Read of a variable or parameter
    pub fn get(&self, decl: DeclId) -> Expr {
        let ty = self.decls.value_type(decl).cloned().unwrap_or(Type::Any);
        self.expr(ExprKind::GetValue(decl), ty)
    }

    /// Assignment to a variable
    pub fn set(&self, target: DeclId, value: Expr) -> Expr {
        self.expr(
            ExprKind::SetValue {
                target,
                value: Box::new(value),
            },
            Type::Unit,
        )
    }

    /// Field read
    pub fn get_field(&self, receiver: Option<Expr>, field: DeclId) -> Expr {
        let ty = self.decls.value_type(field).cloned().unwrap_or(Type::Any);
        self.expr(
            ExprKind::GetField {
                receiver: receiver.map(Box::new),
                field,
            },
            ty,
        )
    }

    /// Field write
    pub fn set_field(&self, receiver: Option<Expr>, field: DeclId, value: Expr) -> Expr {
        self.expr(
            ExprKind::SetField {
                receiver: receiver.map(Box::new),
                field,
                value: Box::new(value),
            },
            Type::Unit,
        )
    }

    /// Direct call typed by the callee's return type
    pub fn call(&self, callee: DeclId, args: Vec<Expr>) -> Expr {
        self.call_with(Call::new(callee, args))
    }

    /// Direct call from a prepared [`Call`]
    pub fn call_with(&self, call: Call) -> Expr {
        let ty = self.decls.return_type(call.callee);
        self.expr(ExprKind::Call(Box::new(call)), ty)
    }

    /// Call of a function-typed value
    pub fn invoke(&self, callee: Expr, args: Vec<Expr>) -> Expr {
        let ty = match &callee.ty {
            Type::Function { ret, .. } => (**ret).clone(),
            _ => Type::Any,
        };
        self.expr(
            ExprKind::Invoke {
                callee: Box::new(callee),
                args,
            },
            ty,
        )
    }

    /// Lambda literal typed from its signature
    pub fn lambda(&self, function: Function) -> Expr {
        let descriptor = self.decls.get(function.decl);
        let suspend = descriptor.modifiers.suspend;
        let params = function
            .extension_receiver
            .iter()
            .chain(function.params.iter())
            .map(|param| self.decls.value_type(param.decl).cloned().unwrap_or(Type::Any))
            .collect();
        let ty = Type::function(params, self.decls.return_type(function.decl), suspend);
        self.expr(ExprKind::Lambda(Box::new(function)), ty)
    }

    /// `return` to a function or returnable block
    pub fn ret(&self, target: DeclId, value: Expr) -> Expr {
        self.expr(
            ExprKind::Return {
                target,
                value: Box::new(value),
            },
            Type::Nothing,
        )
    }

    /// Plain block of the given type
    pub fn block(&self, statements: Vec<Stmt>, ty: Type) -> Expr {
        self.expr(
            ExprKind::Block {
                statements,
                origin: BlockOrigin::Plain,
            },
            ty,
        )
    }

    /// Binary operation
    pub fn binary(&self, op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        let ty = if op.is_comparison() { Type::Bool } else { lhs.ty.clone() };
        self.expr(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
        )
    }

    /// Conditional; typed `Unit` without an else branch
    pub fn if_then(&self, condition: Expr, then_branch: Expr, else_branch: Option<Expr>) -> Expr {
        let ty = match &else_branch {
            Some(_) => then_branch.ty.clone(),
            None => Type::Unit,
        };
        self.expr(
            ExprKind::If {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch: else_branch.map(Box::new),
            },
            ty,
        )
    }

    /// `throw`
    pub fn throw(&self, value: Expr) -> Expr {
        self.expr(ExprKind::Throw(Box::new(value)), Type::Nothing)
    }

    /// Implicit cast
    pub fn cast(&self, value: Expr, ty: Type) -> Expr {
        self.expr(ExprKind::Cast(Box::new(value)), ty)
    }

    /// `val`/`var` statement
    pub fn declare_local(&self, decl: DeclId, initializer: Option<Expr>) -> Stmt {
        Stmt::Variable(Variable {
            decl,
            initializer,
            span: self.span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_takes_return_type_from_signature() {
        let mut decls = DeclTable::new();
        let mut builder = IrBuilder::new(&mut decls, FileSpan::default());
        let function = builder.function("twice", None, &[("x", Type::Int)], Type::Int, Modifiers::default());
        let arg = builder.int(4);
        let call = builder.call(function.decl, vec![arg]);
        assert_eq!(call.ty, Type::Int);
        assert_eq!(builder.decls().function_signature(function.decl).unwrap().params.len(), 1);
    }

    #[test]
    fn test_lambda_type_reflects_suspend() {
        let mut decls = DeclTable::new();
        let mut builder = IrBuilder::new(&mut decls, FileSpan::default());
        let modifiers = Modifiers {
            suspend: true,
            lambda: true,
            ..Modifiers::default()
        };
        let lambda = builder.function("<anonymous>", None, &[("it", Type::Int)], Type::String, modifiers);
        let expr = builder.lambda(lambda);
        assert_eq!(expr.ty, Type::function(vec![Type::Int], Type::String, true));
    }
}
