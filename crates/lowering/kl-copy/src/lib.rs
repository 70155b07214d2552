//! Deep copy and descriptor substitution.
//!
//! Duplicating IR safely means every declaration inside the duplicate
//! gets a brand-new descriptor, and every reference inside the duplicate
//! is pointed at it. [`DeepCopier`] does that for one subtree at a time;
//! [`GlobalSubstitutionMap`] remembers where originals went so code
//! outside a copy can be retargeted later.

mod copier;
mod error;
mod global;
mod substitution;

pub use copier::DeepCopier;
pub use error::CopyError;
pub use global::{GlobalSubstitutionMap, SubstitutedDecl};
pub use substitution::{SubstitutionMap, TypeSubstitutor};

#[cfg(test)]
mod tests {
    use super::*;
    use kl_ir::{
        BinaryOp, BlockOrigin, Class, ClassSignature, DeclId, DeclKind, DeclTable, Expr, ExprKind, Function, IrBuilder,
        Modifiers, Signature, Stmt, Type, verify_function,
    };
    use kl_span::FileSpan;

    /// `fun outer(p: Int): Int { val x = p + captured; fun local(): Int = x; return local() }`
    fn sample(decls: &mut DeclTable) -> (Function, DeclId) {
        let mut builder = IrBuilder::new(decls, FileSpan::default());
        let enclosing = builder.function("enclosing", None, &[("captured", Type::Int)], Type::Unit, Modifiers::default());
        let captured = enclosing.params[0].decl;
        let mut outer = builder.function("outer", None, &[("p", Type::Int)], Type::Int, Modifiers::default());
        let x = builder.variable("x", outer.decl, Type::Int, false);
        let local_modifiers = Modifiers {
            local: true,
            ..Modifiers::default()
        };
        let mut local = builder.function("local", Some(outer.decl), &[], Type::Int, local_modifiers);
        local.body = Some(vec![Stmt::Expr(builder.ret(local.decl, builder.get(x)))]);
        let sum = builder.binary(BinaryOp::Add, builder.get(outer.params[0].decl), builder.get(captured));
        let call = builder.call(local.decl, Vec::new());
        outer.body = Some(vec![
            builder.declare_local(x, Some(sum)),
            Stmt::Function(local),
            Stmt::Expr(builder.ret(outer.decl, call)),
        ]);
        (outer, captured)
    }

    fn declared_variable(function: &Function) -> DeclId {
        match &function.body.as_ref().unwrap()[0] {
            Stmt::Variable(variable) => variable.decl,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_copy_mints_fresh_descriptors() {
        let mut decls = DeclTable::new();
        let (outer, _) = sample(&mut decls);
        let mut copier = DeepCopier::new(None);
        let copy = copier.copy_function(&mut decls, &outer, None);

        assert_ne!(copy.decl, outer.decl);
        assert_ne!(copy.params[0].decl, outer.params[0].decl);
        let old_x = declared_variable(&outer);
        let new_x = declared_variable(&copy);
        assert_ne!(old_x, new_x);
        assert_eq!(decls[new_x].copied_from, Some(old_x));
        assert_eq!(decls[new_x].owner, Some(copy.decl));
        assert!(decls.name(new_x).starts_with("x_"));
        assert!(!decls[copy.decl].is_pending());
        assert_eq!(verify_function(&copy, &decls), Ok(()));
        // outer, p, x, local
        assert_eq!(copier.history().len(), 4);
    }

    #[test]
    fn test_references_outside_subtree_are_kept() {
        let mut decls = DeclTable::new();
        let (outer, captured) = sample(&mut decls);
        let copy = DeepCopier::new(None).copy_function(&mut decls, &outer, None);
        let Stmt::Variable(variable) = &copy.body.as_ref().unwrap()[0] else {
            panic!("expected variable");
        };
        let ExprKind::Binary { lhs, rhs, .. } = &variable.initializer.as_ref().unwrap().kind else {
            panic!("expected binary");
        };
        assert_eq!(lhs.kind, ExprKind::GetValue(copy.params[0].decl));
        assert_eq!(rhs.kind, ExprKind::GetValue(captured));
    }

    #[test]
    fn test_nested_local_function_is_rewired() {
        let mut decls = DeclTable::new();
        let (outer, _) = sample(&mut decls);
        let copy = DeepCopier::new(None).copy_function(&mut decls, &outer, None);
        let body = copy.body.as_ref().unwrap();
        let Stmt::Function(local) = &body[1] else {
            panic!("expected local function");
        };
        let Stmt::Expr(Expr {
            kind: ExprKind::Return { target, value },
            ..
        }) = &body[2]
        else {
            panic!("expected return");
        };
        assert_eq!(*target, copy.decl);
        assert_eq!(value.as_call().unwrap().callee, local.decl);
        assert_eq!(decls[local.decl].owner, Some(copy.decl));
    }

    #[test]
    fn test_generic_copies_are_specialised_and_distinct() {
        let mut decls = DeclTable::new();
        let mut builder = IrBuilder::new(&mut decls, FileSpan::default());
        let type_param = builder.declare(
            "T",
            DeclKind::TypeParameter,
            None,
            Modifiers::default(),
            Signature::TypeParameter,
        );
        let inline = Modifiers {
            inline: true,
            ..Modifiers::default()
        };
        let mut identity = builder.function("identity", None, &[("value", Type::Param(type_param))], Type::Param(type_param), inline);
        identity.type_params.push(type_param);
        builder.sync_signature(&identity);
        identity.body = Some(vec![Stmt::Expr(builder.ret(identity.decl, builder.get(identity.params[0].decl)))]);

        let mut copier = DeepCopier::new(None);
        let as_int = copier.copy_function(&mut decls, &identity, Some(&TypeSubstitutor::new(&[type_param], &[Type::Int])));
        let as_string =
            copier.copy_function(&mut decls, &identity, Some(&TypeSubstitutor::new(&[type_param], &[Type::String])));

        assert_ne!(as_int.decl, as_string.decl);
        assert_ne!(decls.name(as_int.decl), decls.name(as_string.decl));
        assert_eq!(decls.return_type(as_int.decl), Type::Int);
        assert_eq!(decls.return_type(as_string.decl), Type::String);
        assert_eq!(decls.value_type(as_string.params[0].decl), Some(&Type::String));
        let Stmt::Expr(ret) = &as_int.body.as_ref().unwrap()[0] else {
            panic!("expected return");
        };
        let ExprKind::Return { value, .. } = &ret.kind else {
            panic!("expected return");
        };
        assert_eq!(value.ty, Type::Int);
    }

    #[test]
    fn test_anonymous_class_keeps_name_and_types_follow_copy() {
        let mut decls = DeclTable::new();
        let mut builder = IrBuilder::new(&mut decls, FileSpan::default());
        let mut make = builder.function("make", None, &[], Type::Any, Modifiers::default());
        let anonymous = Modifiers {
            anonymous: true,
            local: true,
            ..Modifiers::default()
        };
        let object = builder.declare(
            "<no name provided>",
            DeclKind::Class,
            Some(make.decl),
            anonymous,
            Signature::Class(ClassSignature::default()),
        );
        let holder = builder.variable("holder", make.decl, Type::class(object), false);
        make.body = Some(vec![
            Stmt::Class(Class {
                decl: object,
                declarations: Vec::new(),
                span: FileSpan::default(),
            }),
            builder.declare_local(holder, Some(builder.null())),
            Stmt::Expr(builder.block(Vec::new(), Type::Unit)),
        ]);

        let mut copier = DeepCopier::new(None);
        let copy = copier.copy_function(&mut decls, &make, None);
        let new_object = copier.history().get(object).unwrap();
        let new_holder = copier.history().get(holder).unwrap();
        assert_ne!(new_object, object);
        assert_eq!(decls.name(new_object), decls.name(object));
        assert_eq!(decls.value_type(new_holder), Some(&Type::class(new_object)));

        let mut global = GlobalSubstitutionMap::default();
        copier.record_into(&mut global, make.decl);
        let entry = global.resolve(object).unwrap().unwrap();
        assert_eq!(entry.replacement, new_object);
        assert_eq!(entry.inlined_function, make.decl);
        let Stmt::Expr(block) = &copy.body.as_ref().unwrap()[2] else {
            panic!("expected block");
        };
        assert!(matches!(block.kind, ExprKind::Block { origin: BlockOrigin::Plain, .. }));
    }

    #[test]
    fn test_copy_expr_renames_lambda_parameters() {
        let mut decls = DeclTable::new();
        let mut builder = IrBuilder::new(&mut decls, FileSpan::default());
        let modifiers = Modifiers {
            lambda: true,
            ..Modifiers::default()
        };
        let mut lambda = builder.function("<anonymous>", None, &[("it", Type::Int)], Type::Int, modifiers);
        lambda.body = Some(vec![Stmt::Expr(builder.ret(lambda.decl, builder.get(lambda.params[0].decl)))]);
        let original_param = lambda.params[0].decl;
        let expr = builder.lambda(lambda);

        let copy = DeepCopier::new(None).copy_expr(&mut decls, &expr, None);
        let ExprKind::Lambda(copied) = &copy.kind else {
            panic!("expected lambda");
        };
        assert_ne!(copied.params[0].decl, original_param);
        assert_eq!(copy.ty, expr.ty);
    }
}
