//! Types attached to descriptors and expressions

use crate::decl::{DeclId, DeclTable};
use serde::{Deserialize, Serialize};

/// A fully resolved type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// `Unit`
    Unit,
    /// Type of expressions that never complete normally
    Nothing,
    /// `Boolean`
    Bool,
    /// `Int`
    Int,
    /// `Double`
    Float,
    /// `String`
    String,
    /// Nullable top type
    Any,
    /// Class instance
    Class {
        /// Class declaration
        class: DeclId,
        /// Type arguments
        args: Vec<Type>,
    },
    /// Reference to a type parameter
    Param(DeclId),
    /// Array of elements, the shape varargs arrive in
    Array(Box<Type>),
    /// Function type
    Function {
        /// Parameter types, receiver first for lambdas with receiver
        params: Vec<Type>,
        /// Return type
        ret: Box<Type>,
        /// Whether the function type is `suspend`
        suspend: bool,
    },
}

impl Type {
    /// Non-generic class type
    pub fn class(class: DeclId) -> Self {
        Self::Class {
            class,
            args: Vec::new(),
        }
    }

    /// Function type
    pub fn function(params: Vec<Self>, ret: Self, suspend: bool) -> Self {
        Self::Function {
            params,
            ret: Box::new(ret),
            suspend,
        }
    }

    /// Whether this is `Unit`
    pub fn is_unit(&self) -> bool {
        matches!(self, Self::Unit)
    }

    /// Whether this is any function type
    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function { .. })
    }

    /// Whether this is a suspend function type
    pub fn is_suspend_function(&self) -> bool {
        matches!(self, Self::Function { suspend: true, .. })
    }

    /// Class declaration of a class type
    pub fn class_id(&self) -> Option<DeclId> {
        match self {
            Self::Class { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// Rebuild the type top-down; `replace` returning `Some` stops descent
    #[must_use]
    pub fn map(&self, replace: &mut impl FnMut(&Self) -> Option<Self>) -> Self {
        if let Some(replacement) = replace(self) {
            return replacement;
        }
        match self {
            Self::Class { class, args } => Self::Class {
                class: *class,
                args: args.iter().map(|arg| arg.map(replace)).collect(),
            },
            Self::Array(element) => Self::Array(Box::new(element.map(replace))),
            Self::Function {
                params,
                ret,
                suspend,
            } => Self::Function {
                params: params.iter().map(|param| param.map(replace)).collect(),
                ret: Box::new(ret.map(replace)),
                suspend: *suspend,
            },
            Self::Unit
            | Self::Nothing
            | Self::Bool
            | Self::Int
            | Self::Float
            | Self::String
            | Self::Any
            | Self::Param(_) => self.clone(),
        }
    }

    /// Human readable form using declaration names
    pub fn display(&self, decls: &DeclTable) -> String {
        match self {
            Self::Unit => "Unit".to_string(),
            Self::Nothing => "Nothing".to_string(),
            Self::Bool => "Boolean".to_string(),
            Self::Int => "Int".to_string(),
            Self::Float => "Double".to_string(),
            Self::String => "String".to_string(),
            Self::Any => "Any?".to_string(),
            Self::Class { class, args } if args.is_empty() => decls.name(*class),
            Self::Class { class, args } => {
                let args: Vec<_> = args.iter().map(|arg| arg.display(decls)).collect();
                format!("{}<{}>", decls.name(*class), args.join(", "))
            }
            Self::Param(param) => decls.name(*param),
            Self::Array(element) => format!("Array<{}>", element.display(decls)),
            Self::Function {
                params,
                ret,
                suspend,
            } => {
                let params: Vec<_> = params.iter().map(|param| param.display(decls)).collect();
                let prefix = if *suspend { "suspend " } else { "" };
                format!("{prefix}({}) -> {}", params.join(", "), ret.display(decls))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_replaces_nested_params() {
        let param = DeclId::from_raw(7);
        let ty = Type::function(vec![Type::Param(param)], Type::Array(Box::new(Type::Param(param))), false);
        let mapped = ty.map(&mut |inner: &Type| (*inner == Type::Param(param)).then_some(Type::Int));
        assert_eq!(mapped, Type::function(vec![Type::Int], Type::Array(Box::new(Type::Int)), false));
    }

    #[test]
    fn test_display() {
        let decls = DeclTable::new();
        let result = Type::class(decls.builtins().result_class);
        assert_eq!(result.display(&decls), "Result");
        assert_eq!(Type::function(vec![Type::Int], Type::Unit, true).display(&decls), "suspend (Int) -> Unit");
    }
}
