//! Type substitution and the per-copy declaration map

use indexmap::IndexMap;
use kl_ir::{DeclId, Type};
use rustc_hash::FxHashMap;

/// Maps type parameters to the type arguments of one call site
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeSubstitutor {
    map: FxHashMap<DeclId, Type>,
}

impl TypeSubstitutor {
    /// Pair `params` with `args`; extra entries on either side are ignored
    pub fn new(params: &[DeclId], args: &[Type]) -> Self {
        Self {
            map: params.iter().copied().zip(args.iter().cloned()).collect(),
        }
    }

    /// Whether nothing gets substituted
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Replace every substituted type parameter in `ty`
    pub fn substitute(&self, ty: &Type) -> Type {
        ty.map(&mut |inner: &Type| match inner {
            Type::Param(param) => self.map.get(param).cloned(),
            _ => None,
        })
    }
}

/// Old declaration to fresh declaration, in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionMap {
    map: IndexMap<DeclId, DeclId>,
}

impl SubstitutionMap {
    /// Record that `old` is replaced by `new`
    pub fn insert(&mut self, old: DeclId, new: DeclId) {
        self.map.insert(old, new);
    }

    /// Replacement of `old`, if any
    pub fn get(&self, old: DeclId) -> Option<DeclId> {
        self.map.get(&old).copied()
    }

    /// Replacement of `old`, or `old` itself
    pub fn map_or_same(&self, old: DeclId) -> DeclId {
        self.get(old).unwrap_or(old)
    }

    /// Whether `old` is replaced
    pub fn contains(&self, old: DeclId) -> bool {
        self.map.contains_key(&old)
    }

    /// Number of replacements
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether nothing is replaced
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Replacements in discovery order
    pub fn iter(&self) -> impl Iterator<Item = (DeclId, DeclId)> + '_ {
        self.map.iter().map(|(old, new)| (*old, *new))
    }

    /// Add every entry of `other`, later entries winning
    pub fn extend(&mut self, other: &Self) {
        self.map.extend(other.iter());
    }

    /// Apply `types`, then redirect classes that were themselves copied
    pub fn substitute_type(&self, ty: &Type, types: Option<&TypeSubstitutor>) -> Type {
        let ty = types.map_or_else(|| ty.clone(), |types| types.substitute(ty));
        self.redirect_classes(&ty)
    }

    fn redirect_classes(&self, ty: &Type) -> Type {
        ty.map(&mut |inner: &Type| match inner {
            Type::Class { class, args } => self.get(*class).map(|class| Type::Class {
                class,
                args: args.iter().map(|arg| self.redirect_classes(arg)).collect(),
            }),
            _ => None,
        })
    }
}
