//! Descriptor table: the semantic identity of every declaration.
//!
//! Tree nodes only carry a [`DeclId`]; names, owners, modifiers and
//! signatures live here. Copying a declaration always allocates a new
//! descriptor, so two nodes never share an identity.

use crate::ty::Type;
use derive_more::Display;
use kl_intern::{Interner, Symbol};
use la_arena::{Arena, Idx, RawIdx};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Stable handle to a descriptor in a [`DeclTable`]
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct DeclId(Idx<Descriptor>);

impl DeclId {
    /// Rebuild a handle from its raw index
    pub fn from_raw(raw: u32) -> Self {
        Self(Idx::from_raw(RawIdx::from(raw)))
    }

    /// Raw arena index
    pub fn into_raw(self) -> u32 {
        u32::from(self.0.into_raw())
    }
}

impl fmt::Debug for DeclId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "DeclId({})", self.into_raw())
    }
}

impl fmt::Display for DeclId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.into_raw())
    }
}

impl Serialize for DeclId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.into_raw())
    }
}

impl<'de> Deserialize<'de> for DeclId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(Self::from_raw)
    }
}

/// What sort of declaration a descriptor names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum DeclKind {
    /// Class, object or interface
    #[display("class")]
    Class,
    /// Function, lambda or accessor
    #[display("function")]
    Function,
    /// Class constructor
    #[display("constructor")]
    Constructor,
    /// Class field or top-level property
    #[display("field")]
    Field,
    /// Local variable
    #[display("variable")]
    Variable,
    /// Value parameter, including receivers
    #[display("parameter")]
    ValueParameter,
    /// Generic type parameter
    #[display("type parameter")]
    TypeParameter,
    /// Target of `return` inside an inlined body
    #[display("return target")]
    ReturnTarget,
}

/// Declaration modifiers the lowering passes care about
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools, reason = "Modifier flags mirror source modifiers")]
pub struct Modifiers {
    /// Marked for inline expansion
    pub inline: bool,
    /// Suspend function, or suspend lambda
    pub suspend: bool,
    /// `var` rather than `val`
    pub mutable: bool,
    /// Declared in a separately compiled module
    pub external: bool,
    /// Anonymous object class
    pub anonymous: bool,
    /// No body; resolved through overrides
    #[serde(rename = "abstract")]
    pub is_abstract: bool,
    /// Function-typed parameter excluded from lambda inlining
    pub noinline: bool,
    /// Vararg parameter
    pub vararg: bool,
    /// Function created from a lambda literal
    pub lambda: bool,
    /// Declared inside a function body
    pub local: bool,
}

/// Compiler intrinsics recognised by identity rather than by body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Intrinsic {
    /// Inline-marked helper that must never be inlined
    #[display("runWithoutSuspension")]
    RunWithoutSuspension,
    /// Unwraps a suspend call result; stripped by delegation
    #[display("returnIfSuspended")]
    ReturnIfSuspended,
    /// The "still suspended" sentinel
    #[display("COROUTINE_SUSPENDED")]
    CoroutineSuspended,
    /// Continuation of the current suspend frame
    #[display("getContinuation")]
    GetContinuation,
    /// Wrap a value in a successful result
    #[display("success")]
    ResultSuccess,
    /// Unwrap a result, rethrowing a failure
    #[display("getOrThrow")]
    ResultGetOrThrow,
    /// Failure carried by a result, or null
    #[display("exceptionOrNull")]
    ResultExceptionOrNull,
    /// Placeholder for spilling live locals
    #[display("saveState")]
    SaveState,
    /// Placeholder for reloading spilled locals
    #[display("restoreState")]
    RestoreState,
}

/// Signature of a function or constructor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    /// Generic parameters
    pub type_params: Vec<DeclId>,
    /// `this` of a member
    pub dispatch_receiver: Option<DeclId>,
    /// Receiver of an extension
    pub extension_receiver: Option<DeclId>,
    /// Value parameters in declaration order
    pub params: Vec<DeclId>,
    /// Declared return type
    pub return_type: Type,
}

/// Signature of a class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSignature {
    /// Direct supertypes
    pub super_types: Vec<Type>,
    /// Member declarations
    pub members: Vec<DeclId>,
}

/// Signature data, filled in after allocation for copies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signature {
    /// Placeholder allocated but not yet initialised
    Pending,
    /// Function or constructor
    Function(FunctionSignature),
    /// Class
    Class(ClassSignature),
    /// Variable, parameter or field of the given type
    Value(Type),
    /// Generic type parameter
    TypeParameter,
    /// Returnable block yielding the given type
    ReturnTarget(Type),
}

/// Semantic identity of one declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Declared name
    pub name: Symbol,
    /// Declaration kind
    pub kind: DeclKind,
    /// Containing declaration
    pub owner: Option<DeclId>,
    /// Modifiers
    #[serde(default)]
    pub modifiers: Modifiers,
    /// Signature
    pub signature: Signature,
    /// Members this one overrides
    #[serde(default)]
    pub overrides: Vec<DeclId>,
    /// Descriptor this one was copied from
    #[serde(default)]
    pub copied_from: Option<DeclId>,
    /// Intrinsic this descriptor stands for
    #[serde(default)]
    pub intrinsic: Option<Intrinsic>,
}

impl Descriptor {
    /// Descriptor with default modifiers
    pub fn new(name: Symbol, kind: DeclKind, owner: Option<DeclId>, signature: Signature) -> Self {
        Self {
            name,
            kind,
            owner,
            modifiers: Modifiers::default(),
            signature,
            overrides: Vec::new(),
            copied_from: None,
            intrinsic: None,
        }
    }

    /// Replace the modifiers
    #[must_use]
    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    /// Whether the signature still has to be initialised
    pub fn is_pending(&self) -> bool {
        matches!(self.signature, Signature::Pending)
    }
}

/// Declarations every unit can refer to without declaring them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Builtins {
    /// Base class of synthesized coroutines
    pub continuation_impl: DeclId,
    /// `ContinuationImpl.completion`
    pub completion: DeclId,
    /// Abstract resume entry point
    pub invoke_suspend: DeclId,
    /// Abstract factory of suspend lambdas
    pub create: DeclId,
    /// Abstract `invoke` of suspend function objects
    pub invoke: DeclId,
    /// `Result` class
    pub result_class: DeclId,
    /// `runWithoutSuspension`
    pub run_without_suspension: DeclId,
    /// `returnIfSuspended`
    pub return_if_suspended: DeclId,
    /// `COROUTINE_SUSPENDED`
    pub coroutine_suspended: DeclId,
    /// `getContinuation`
    pub get_continuation: DeclId,
    /// `Result.success`
    pub result_success: DeclId,
    /// `Result.getOrThrow`
    pub result_get_or_throw: DeclId,
    /// `Result.exceptionOrNull`
    pub result_exception_or_null: DeclId,
    /// `saveState` marker
    pub save_state: DeclId,
    /// `restoreState` marker
    pub restore_state: DeclId,
}

impl Builtins {
    fn declare(arena: &mut Arena<Descriptor>, interner: &Interner) -> Self {
        let mut alloc = |name: &str, kind: DeclKind, owner: Option<DeclId>, signature: Signature| {
            DeclId(arena.alloc(Descriptor::new(interner.intern(name), kind, owner, signature)))
        };

        let continuation_impl = alloc("ContinuationImpl", DeclKind::Class, None, Signature::Pending);
        let continuation = Type::class(continuation_impl);
        let result_class = alloc("Result", DeclKind::Class, None, Signature::Class(ClassSignature::default()));
        let result = Type::class(result_class);

        let completion = alloc(
            "completion",
            DeclKind::Field,
            Some(continuation_impl),
            Signature::Value(Type::Any),
        );
        let mut member = |name: &str, params: &[(&str, Type)], return_type: Type| {
            let function = alloc(name, DeclKind::Function, Some(continuation_impl), Signature::Pending);
            let receiver = alloc(
                "<this>",
                DeclKind::ValueParameter,
                Some(function),
                Signature::Value(continuation.clone()),
            );
            let params = params
                .iter()
                .map(|(param, ty)| {
                    alloc(*param, DeclKind::ValueParameter, Some(function), Signature::Value(ty.clone()))
                })
                .collect::<Vec<_>>();
            (function, receiver, params, return_type)
        };
        let members = [
            member("invokeSuspend", &[("result", result.clone())], Type::Any),
            member("create", &[("completion", continuation.clone())], continuation.clone()),
            member("invoke", &[], Type::Any),
        ];
        let mut function_ids = Vec::new();
        for (function, receiver, params, return_type) in members {
            arena[function.0].signature = Signature::Function(FunctionSignature {
                type_params: Vec::new(),
                dispatch_receiver: Some(receiver),
                extension_receiver: None,
                params,
                return_type,
            });
            arena[function.0].modifiers.is_abstract = true;
            function_ids.push(function);
        }
        let [invoke_suspend, create, invoke] = [function_ids[0], function_ids[1], function_ids[2]];
        arena[invoke.0].modifiers.suspend = true;
        arena[continuation_impl.0].signature = Signature::Class(ClassSignature {
            super_types: vec![Type::Any],
            members: vec![completion, invoke_suspend, create, invoke],
        });

        let mut intrinsic = |name: &str, kind: Intrinsic, params: &[(&str, Type)], return_type: Type, modifiers: Modifiers| {
            let function = DeclId(arena.alloc(Descriptor::new(
                interner.intern(name),
                DeclKind::Function,
                None,
                Signature::Pending,
            )));
            let params = params
                .iter()
                .map(|(param, ty)| {
                    DeclId(arena.alloc(Descriptor::new(
                        interner.intern(*param),
                        DeclKind::ValueParameter,
                        Some(function),
                        Signature::Value(ty.clone()),
                    )))
                })
                .collect::<Vec<_>>();
            let descriptor = &mut arena[function.0];
            descriptor.signature = Signature::Function(FunctionSignature {
                type_params: Vec::new(),
                dispatch_receiver: None,
                extension_receiver: None,
                params,
                return_type,
            });
            descriptor.modifiers = modifiers;
            descriptor.intrinsic = Some(kind);
            function
        };
        let plain = Modifiers::default();
        let block = Type::function(Vec::new(), Type::Any, false);

        Self {
            continuation_impl,
            completion,
            invoke_suspend,
            create,
            invoke,
            result_class,
            run_without_suspension: intrinsic(
                "runWithoutSuspension",
                Intrinsic::RunWithoutSuspension,
                &[("block", block)],
                Type::Any,
                Modifiers {
                    inline: true,
                    ..plain
                },
            ),
            return_if_suspended: intrinsic(
                "returnIfSuspended",
                Intrinsic::ReturnIfSuspended,
                &[("argument", Type::Any)],
                Type::Any,
                Modifiers {
                    suspend: true,
                    ..plain
                },
            ),
            coroutine_suspended: intrinsic(
                "COROUTINE_SUSPENDED",
                Intrinsic::CoroutineSuspended,
                &[],
                Type::Any,
                plain,
            ),
            get_continuation: intrinsic(
                "getContinuation",
                Intrinsic::GetContinuation,
                &[],
                continuation,
                plain,
            ),
            result_success: intrinsic(
                "success",
                Intrinsic::ResultSuccess,
                &[("value", Type::Any)],
                result.clone(),
                plain,
            ),
            result_get_or_throw: intrinsic(
                "getOrThrow",
                Intrinsic::ResultGetOrThrow,
                &[("result", result.clone())],
                Type::Any,
                plain,
            ),
            result_exception_or_null: intrinsic(
                "exceptionOrNull",
                Intrinsic::ResultExceptionOrNull,
                &[("result", result)],
                Type::Any,
                plain,
            ),
            save_state: intrinsic("saveState", Intrinsic::SaveState, &[], Type::Unit, plain),
            restore_state: intrinsic("restoreState", Intrinsic::RestoreState, &[], Type::Unit, plain),
        }
    }
}

/// Arena of descriptors plus the counters used to name copies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "DeclTableRepr", into = "DeclTableRepr")]
pub struct DeclTable {
    arena: Arena<Descriptor>,
    interner: Interner,
    copy_counter: u32,
    temp_counter: u32,
    builtins: Builtins,
}

#[derive(Serialize, Deserialize)]
struct DeclTableRepr {
    interner: Interner,
    descriptors: Vec<Descriptor>,
    copy_counter: u32,
    temp_counter: u32,
    builtins: Builtins,
}

impl From<DeclTableRepr> for DeclTable {
    fn from(repr: DeclTableRepr) -> Self {
        Self {
            arena: repr.descriptors.into_iter().collect(),
            interner: repr.interner,
            copy_counter: repr.copy_counter,
            temp_counter: repr.temp_counter,
            builtins: repr.builtins,
        }
    }
}

impl From<DeclTable> for DeclTableRepr {
    fn from(table: DeclTable) -> Self {
        Self {
            descriptors: table.arena.iter().map(|(_, descriptor)| descriptor.clone()).collect(),
            interner: table.interner,
            copy_counter: table.copy_counter,
            temp_counter: table.temp_counter,
            builtins: table.builtins,
        }
    }
}

impl DeclTable {
    /// Fresh table with its own interner
    pub fn new() -> Self {
        Self::with_interner(Interner::new())
    }

    /// Fresh table sharing an existing interner
    pub fn with_interner(interner: Interner) -> Self {
        let mut arena = Arena::new();
        let builtins = Builtins::declare(&mut arena, &interner);
        Self {
            arena,
            interner,
            copy_counter: 0,
            temp_counter: 0,
            builtins,
        }
    }

    /// Interner backing every name in the table
    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    /// Intern a name
    pub fn intern(&self, text: &str) -> Symbol {
        self.interner.intern(text)
    }

    /// Builtin declarations
    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// Allocate a descriptor
    pub fn alloc(&mut self, descriptor: Descriptor) -> DeclId {
        DeclId(self.arena.alloc(descriptor))
    }

    /// Descriptor for `id`
    pub fn get(&self, id: DeclId) -> &Descriptor {
        &self.arena[id.0]
    }

    /// Mutable descriptor for `id`
    pub fn get_mut(&mut self, id: DeclId) -> &mut Descriptor {
        &mut self.arena[id.0]
    }

    /// Number of descriptors, builtins included
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Whether the table is empty; never true once builtins exist
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Iterate over all descriptors in allocation order
    pub fn iter(&self) -> impl Iterator<Item = (DeclId, &Descriptor)> + '_ {
        self.arena.iter().map(|(idx, descriptor)| (DeclId(idx), descriptor))
    }

    /// Resolved name of a declaration
    pub fn name(&self, id: DeclId) -> String {
        self.interner.resolve(self.get(id).name)
    }

    /// Next value of the global copy counter
    pub fn next_copy_index(&mut self) -> u32 {
        let index = self.copy_counter;
        self.copy_counter += 1;
        index
    }

    /// `original_N` name for a fresh copy of `original`
    pub fn fresh_copy_name(&mut self, original: DeclId) -> Symbol {
        let index = self.next_copy_index();
        let name = format!("{}_{index}", self.name(original));
        self.interner.intern(&name)
    }

    /// Next value of the temporary counter
    pub fn next_temporary_index(&mut self) -> u32 {
        let index = self.temp_counter;
        self.temp_counter += 1;
        index
    }

    /// Type of a variable, parameter, field or return target
    pub fn value_type(&self, id: DeclId) -> Option<&Type> {
        match &self.get(id).signature {
            Signature::Value(ty) | Signature::ReturnTarget(ty) => Some(ty),
            _ => None,
        }
    }

    /// Function signature, if `id` names a function
    pub fn function_signature(&self, id: DeclId) -> Option<&FunctionSignature> {
        match &self.get(id).signature {
            Signature::Function(signature) => Some(signature),
            _ => None,
        }
    }

    /// Class signature, if `id` names a class
    pub fn class_signature(&self, id: DeclId) -> Option<&ClassSignature> {
        match &self.get(id).signature {
            Signature::Class(signature) => Some(signature),
            _ => None,
        }
    }

    /// Return type of a function, or the yielded type of a return target
    pub fn return_type(&self, id: DeclId) -> Type {
        match &self.get(id).signature {
            Signature::Function(signature) => signature.return_type.clone(),
            Signature::ReturnTarget(ty) => ty.clone(),
            _ => Type::Unit,
        }
    }

    /// Intrinsic the declaration stands for
    pub fn intrinsic(&self, id: DeclId) -> Option<Intrinsic> {
        self.get(id).intrinsic
    }

    /// Whether the declaration is a suspend function or lambda
    pub fn is_suspend(&self, id: DeclId) -> bool {
        self.get(id).modifiers.suspend
    }

    /// Whether `param` only accepts lambdas that get inlined
    pub fn accepts_inline_lambda(&self, param: DeclId) -> bool {
        let descriptor = self.get(param);
        if descriptor.kind != DeclKind::ValueParameter || descriptor.modifiers.noinline {
            return false;
        }
        let owner_inline = descriptor
            .owner
            .is_some_and(|owner| self.get(owner).modifiers.inline);
        owner_inline && self.value_type(param).is_some_and(Type::is_function)
    }

    /// Whether `class` is `base` or inherits from it
    pub fn is_subclass_of(&self, class: DeclId, base: DeclId) -> bool {
        let mut pending = vec![class];
        let mut seen = Vec::new();
        while let Some(current) = pending.pop() {
            if current == base {
                return true;
            }
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            if let Some(signature) = self.class_signature(current) {
                pending.extend(signature.super_types.iter().filter_map(Type::class_id));
            }
        }
        false
    }

    /// Whether `member` is `target` or overrides it, transitively
    pub fn overrides(&self, member: DeclId, target: DeclId) -> bool {
        let mut pending = vec![member];
        let mut seen = Vec::new();
        while let Some(current) = pending.pop() {
            if current == target {
                return true;
            }
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            pending.extend(self.get(current).overrides.iter().copied());
        }
        false
    }
}

impl Default for DeclTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<DeclId> for DeclTable {
    type Output = Descriptor;

    fn index(&self, id: DeclId) -> &Descriptor {
        self.get(id)
    }
}

impl IndexMut<DeclId> for DeclTable {
    fn index_mut(&mut self, id: DeclId) -> &mut Descriptor {
        self.get_mut(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_initialised() {
        let decls = DeclTable::new();
        let builtins = decls.builtins();
        assert!(decls.iter().all(|(_, descriptor)| !descriptor.is_pending()));
        assert_eq!(decls.intrinsic(builtins.return_if_suspended), Some(Intrinsic::ReturnIfSuspended));
        assert!(decls.is_suspend(builtins.invoke));
        assert!(decls[builtins.run_without_suspension].modifiers.inline);
        let signature = decls.class_signature(builtins.continuation_impl).unwrap();
        assert!(signature.members.contains(&builtins.invoke_suspend));
    }

    #[test]
    fn test_fresh_copy_names_are_unique() {
        let mut decls = DeclTable::new();
        let name = decls.intern("box");
        let original = decls.alloc(Descriptor::new(name, DeclKind::Function, None, Signature::Pending));
        let first = decls.fresh_copy_name(original);
        let second = decls.fresh_copy_name(original);
        assert_ne!(first, second);
        assert_eq!(decls.interner().resolve(first), "box_0");
        assert_eq!(decls.interner().resolve(second), "box_1");
    }

    #[test]
    fn test_decl_id_round_trips_through_json() {
        let id = DeclId::from_raw(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "42");
        let back: DeclId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_table_round_trips_through_json() {
        let mut decls = DeclTable::new();
        let name = decls.intern("value");
        let id = decls.alloc(Descriptor::new(name, DeclKind::Variable, None, Signature::Value(Type::Int)));
        let json = serde_json::to_string(&decls).unwrap();
        let restored: DeclTable = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.len(), decls.len());
        assert_eq!(restored.name(id), "value");
        assert_eq!(restored.value_type(id), Some(&Type::Int));
    }
}
