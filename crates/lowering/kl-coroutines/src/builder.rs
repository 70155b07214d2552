//! Synthesis of the coroutine class for one suspend function or lambda

use crate::machine::StateMachine;
use indexmap::IndexMap;
use kl_ir::{
    Call, Class, ClassSignature, DeclId, DeclKind, Declaration, Expr, Field, Function, IrBuilder, Modifiers,
    Signature, Stmt, Type, ValueParameter,
};
use kl_pass::{CoroutineInfo, LoweringContext};
use std::iter;
use tracing::debug;

pub(crate) struct BuiltCoroutine {
    pub(crate) class: Class,
    pub(crate) info: CoroutineInfo,
}

/// Build the class for `function`. `captured` is `Some` for suspend
/// lambdas and lists the outer variables the lambda closes over; they
/// become leading constructor parameters bound by the factory.
pub(crate) fn build_coroutine(
    ctx: &mut LoweringContext,
    mut function: Function,
    captured: Option<&[DeclId]>,
) -> BuiltCoroutine {
    let span = function.span;
    let builtins = ctx.decls.builtins().clone();
    let is_lambda = captured.is_some();
    let bound = captured.map(<[DeclId]>::to_vec).unwrap_or_default();
    let unbound: Vec<DeclId> = function.explicit_params().map(|param| param.decl).collect();
    let explicit: Vec<DeclId> = bound.iter().chain(&unbound).copied().collect();
    let return_type = ctx.decls.return_type(function.decl);
    let name = format!(
        "{}$COROUTINE${}",
        ctx.decls.name(function.decl),
        ctx.caches.coroutines.len()
    );
    let owner = if is_lambda {
        None
    } else {
        ctx.decls.get(function.decl).owner
    };

    let mut builder = IrBuilder::new(&mut ctx.decls, span);
    let class = builder.declare(&name, DeclKind::Class, owner, Modifiers::default(), Signature::Pending);
    let label = builder.field("label", Some(class), Type::Int, true);
    let specs: Vec<(String, Type)> = explicit
        .iter()
        .map(|&param| {
            let decls = builder.decls();
            (decls.name(param), decls.value_type(param).cloned().unwrap_or(Type::Any))
        })
        .collect();
    let mut parameter_fields = IndexMap::new();
    for (&param, (field_name, ty)) in explicit.iter().zip(&specs) {
        parameter_fields.insert(param, builder.field(field_name, Some(class), ty.clone(), false));
    }
    let completion_type = Type::class(builtins.continuation_impl);
    let mut members = MemberBuilder { builder, class };

    let mut constructor = members.constructor(&specs);
    let completion = members.push_param(&mut constructor.function, "completion", completion_type.clone());
    let mut body = vec![
        members.set_this_field(constructor.this, builtins.completion, members.builder.get(completion)),
        members.set_this_field(constructor.this, label, members.builder.int(0)),
    ];
    for (field, param) in parameter_fields.values().zip(&constructor.function.params) {
        body.push(members.set_this_field(constructor.this, *field, members.builder.get(param.decl)));
    }
    constructor.function.body = Some(body);

    let mut invoke_suspend = members.member("invokeSuspend", &[], Type::Any, Modifiers::default());
    let resumed_with = members.push_param(
        &mut invoke_suspend.function,
        "result",
        Type::class(builtins.result_class),
    );
    members.overrides(&invoke_suspend, builtins.invoke_suspend);

    let mut synthesized = Vec::new();
    let mut factory_decl = None;
    if is_lambda {
        // factory(captured...) binds captured values; `create` adds the rest
        let mut factory = members.constructor(&specs[..bound.len()]);
        let mut body = vec![members.set_this_field(factory.this, builtins.completion, members.builder.null())];
        for (field, param) in parameter_fields.values().zip(&factory.function.params) {
            body.push(members.set_this_field(factory.this, *field, members.builder.get(param.decl)));
        }
        factory.function.body = Some(body);
        factory_decl = Some(factory.function.decl);

        let mut create = members.member("create", &specs[bound.len()..], Type::class(class), Modifiers::default());
        members.push_param(&mut create.function, "completion", completion_type);
        members.overrides(&create, builtins.create);
        let mut args: Vec<Expr> = parameter_fields
            .values()
            .take(bound.len())
            .map(|&field| members.this_field(create.this, field))
            .collect();
        args.extend(
            create
                .function
                .params
                .iter()
                .map(|param| members.builder.get(param.decl)),
        );
        let instance = members.builder.call(constructor.function.decl, args);
        create.function.body = Some(vec![Stmt::Expr(members.builder.ret(create.function.decl, instance))]);

        let suspend = Modifiers {
            suspend: true,
            ..Modifiers::default()
        };
        let mut invoke = members.member("invoke", &specs[bound.len()..], return_type.clone(), suspend);
        members.overrides(&invoke, builtins.invoke);
        let mut args: Vec<Expr> = invoke
            .function
            .params
            .iter()
            .map(|param| members.builder.get(param.decl))
            .collect();
        args.push(members.builder.call(builtins.get_continuation, Vec::new()));
        let created = members.builder.call_with(Call {
            dispatch_receiver: Some(members.builder.get(invoke.this)),
            ..Call::new(create.function.decl, args)
        });
        let resumed = resume_new(&members.builder, invoke_suspend.function.decl, created, builtins.result_success);
        let value = members.builder.cast(resumed, return_type.clone());
        invoke.function.body = Some(vec![Stmt::Expr(members.builder.ret(invoke.function.decl, value))]);

        synthesized.extend([factory.function, create.function, invoke.function]);
    }

    let machine = StateMachine {
        function: function.decl,
        class,
        invoke_suspend: invoke_suspend.function.decl,
        this: invoke_suspend.this,
        resumed_with,
        label,
        parameter_fields,
        return_type: return_type.clone(),
        span,
    };
    let lowered = machine.lower_body(ctx, function.body.take().unwrap_or_default());
    let mut invoke_suspend = invoke_suspend.function;
    invoke_suspend.body = Some(lowered.statements);

    let mut super_types = vec![Type::class(builtins.continuation_impl)];
    if is_lambda {
        let params = unbound
            .iter()
            .map(|&param| ctx.decls.value_type(param).cloned().unwrap_or(Type::Any))
            .collect();
        super_types.push(Type::function(params, return_type, true));
    }
    let fields: Vec<DeclId> = iter::once(label)
        .chain(machine.parameter_fields.values().copied())
        .chain(lowered.spilled_fields.iter().copied())
        .collect();
    let constructor_decl = constructor.function.decl;
    let functions: Vec<Function> = iter::once(constructor.function)
        .chain(synthesized)
        .chain(iter::once(invoke_suspend))
        .collect();
    ctx.decls.get_mut(class).signature = Signature::Class(ClassSignature {
        super_types,
        members: fields
            .iter()
            .copied()
            .chain(functions.iter().map(|function| function.decl))
            .collect(),
    });

    let declarations = fields
        .iter()
        .map(|&decl| {
            Declaration::Field(Field {
                decl,
                initializer: None,
                span,
            })
        })
        .chain(functions.into_iter().map(Declaration::Function))
        .collect();

    debug!(
        class = %name,
        points = lowered.suspension_points,
        spilled = lowered.spilled_fields.len(),
        "built coroutine class"
    );
    BuiltCoroutine {
        class: Class {
            decl: class,
            declarations,
            span,
        },
        info: CoroutineInfo {
            class,
            constructor: constructor_decl,
            factory: factory_decl,
            invoke_suspend: machine.invoke_suspend,
            label,
            parameter_fields: machine.parameter_fields.values().copied().collect(),
            spilled_fields: lowered.spilled_fields,
            suspension_points: lowered.suspension_points,
        },
    }
}

/// Body of a function that starts its coroutine:
/// `return Coroutine(params..., getContinuation()).invokeSuspend(success(Unit))`
pub(crate) fn start_body(ctx: &mut LoweringContext, function: &Function, info: &CoroutineInfo) -> Vec<Stmt> {
    let builtins = ctx.decls.builtins().clone();
    let return_type = ctx.decls.return_type(function.decl);
    let builder = IrBuilder::new(&mut ctx.decls, function.span);
    let mut args: Vec<Expr> = function
        .explicit_params()
        .map(|param| builder.get(param.decl))
        .collect();
    args.push(builder.call(builtins.get_continuation, Vec::new()));
    let instance = builder.call(info.constructor, args);
    let resumed = resume_new(&builder, info.invoke_suspend, instance, builtins.result_success);
    vec![Stmt::Expr(builder.ret(function.decl, builder.cast(resumed, return_type)))]
}

/// `instance.invokeSuspend(success(Unit))`
fn resume_new(builder: &IrBuilder<'_>, invoke_suspend: DeclId, instance: Expr, success: DeclId) -> Expr {
    let unit = builder.call(success, vec![builder.unit()]);
    builder.call_with(Call {
        dispatch_receiver: Some(instance),
        ..Call::new(invoke_suspend, vec![unit])
    })
}

struct Member {
    function: Function,
    /// `this` inside the member
    this: DeclId,
}

struct MemberBuilder<'decls> {
    builder: IrBuilder<'decls>,
    class: DeclId,
}

impl MemberBuilder<'_> {
    fn member(&mut self, name: &str, params: &[(String, Type)], return_type: Type, modifiers: Modifiers) -> Member {
        let params: Vec<(&str, Type)> = params.iter().map(|(name, ty)| (name.as_str(), ty.clone())).collect();
        let mut function = self
            .builder
            .function(name, Some(self.class), &params, return_type, modifiers);
        let this = self
            .builder
            .parameter("<this>", function.decl, Type::class(self.class));
        function.dispatch_receiver = Some(ValueParameter::new(this, self.builder.span()));
        self.builder.sync_signature(&function);
        Member { function, this }
    }

    fn constructor(&mut self, params: &[(String, Type)]) -> Member {
        let member = self.member("<init>", params, Type::class(self.class), Modifiers::default());
        self.builder.decls().get_mut(member.function.decl).kind = DeclKind::Constructor;
        member
    }

    fn push_param(&mut self, function: &mut Function, name: &str, ty: Type) -> DeclId {
        let param = self.builder.parameter(name, function.decl, ty);
        function.params.push(ValueParameter::new(param, self.builder.span()));
        self.builder.sync_signature(function);
        param
    }

    fn overrides(&mut self, member: &Member, base: DeclId) {
        self.builder.decls().get_mut(member.function.decl).overrides = vec![base];
    }

    fn this_field(&self, this: DeclId, field: DeclId) -> Expr {
        self.builder.get_field(Some(self.builder.get(this)), field)
    }

    fn set_this_field(&self, this: DeclId, field: DeclId, value: Expr) -> Stmt {
        Stmt::Expr(self.builder.set_field(Some(self.builder.get(this)), field, value))
    }
}
