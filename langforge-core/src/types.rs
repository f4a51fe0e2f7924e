//! Value types shared by type inference and the backends.
//!
//! The set of base types is small and fixed. Each backend spells them
//! through a [`TypeMapping`] so that every backend agrees on what a
//! variable's type is even though they write it differently.

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaseType {
    Int,
    Float,
    Bool,
    String,
    List,
    Dict,
    /// Unknown or dynamically typed.
    Any,
}

impl BaseType {
    pub fn name(self) -> &'static str {
        match self {
            BaseType::Int => "int",
            BaseType::Float => "float",
            BaseType::Bool => "bool",
            BaseType::String => "string",
            BaseType::List => "list",
            BaseType::Dict => "dict",
            BaseType::Any => "any",
        }
    }

    pub fn from_name(name: &str) -> Option<BaseType> {
        Some(match name {
            "int" | "i32" | "i64" | "integer" => BaseType::Int,
            "float" | "f32" | "f64" | "double" => BaseType::Float,
            "bool" | "boolean" => BaseType::Bool,
            "string" | "str" => BaseType::String,
            "list" | "array" => BaseType::List,
            "dict" | "map" => BaseType::Dict,
            "any" => BaseType::Any,
            _ => return None,
        })
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, BaseType::Int | BaseType::Float)
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeInfo {
    pub base: BaseType,
    pub array: bool,
    pub pointer: bool,
    pub constant: bool,
}

impl TypeInfo {
    pub const fn new(base: BaseType) -> Self {
        TypeInfo {
            base,
            array: false,
            pointer: false,
            constant: false,
        }
    }

    pub const INT: TypeInfo = TypeInfo::new(BaseType::Int);
    pub const FLOAT: TypeInfo = TypeInfo::new(BaseType::Float);
    pub const BOOL: TypeInfo = TypeInfo::new(BaseType::Bool);
    pub const STRING: TypeInfo = TypeInfo::new(BaseType::String);
    pub const ANY: TypeInfo = TypeInfo::new(BaseType::Any);

    pub fn array_of(self) -> Self {
        TypeInfo {
            array: true,
            ..self
        }
    }

    pub fn pointer_to(self) -> Self {
        TypeInfo {
            pointer: true,
            ..self
        }
    }

    pub fn constant(self) -> Self {
        TypeInfo {
            constant: true,
            ..self
        }
    }

    pub fn is_numeric(&self) -> bool {
        !self.array && !self.pointer && self.base.is_numeric()
    }

    pub fn is_float(&self) -> bool {
        self.is_numeric() && self.base == BaseType::Float
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constant {
            f.write_str("const ")?;
        }
        write!(f, "{}", self.base)?;
        if self.pointer {
            f.write_str("*")?;
        }
        if self.array {
            f.write_str("[]")?;
        }
        Ok(())
    }
}

/// How one backend spells each base type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    pub int: &'static str,
    pub float: &'static str,
    pub bool: &'static str,
    pub string: &'static str,
    pub list: &'static str,
    pub dict: &'static str,
    pub any: &'static str,
    /// Spelling of any array or pointer type, when the backend has a
    /// single opaque reference type.
    pub reference: Option<&'static str>,
    style: ModifierStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModifierStyle {
    C,
    Opaque,
    Python,
}

impl TypeMapping {
    pub fn c() -> Self {
        TypeMapping {
            int: "int",
            float: "double",
            bool: "bool",
            string: "const char*",
            list: "void*",
            dict: "void*",
            any: "int",
            reference: None,
            style: ModifierStyle::C,
        }
    }

    pub fn wat() -> Self {
        TypeMapping {
            int: "i32",
            float: "f64",
            bool: "i32",
            string: "i32",
            list: "i32",
            dict: "i32",
            any: "i32",
            reference: Some("i32"),
            style: ModifierStyle::Opaque,
        }
    }

    pub fn llvm() -> Self {
        TypeMapping {
            int: "i32",
            float: "double",
            bool: "i1",
            string: "ptr",
            list: "ptr",
            dict: "ptr",
            any: "i32",
            reference: Some("ptr"),
            style: ModifierStyle::Opaque,
        }
    }

    pub fn python() -> Self {
        TypeMapping {
            int: "int",
            float: "float",
            bool: "bool",
            string: "str",
            list: "list",
            dict: "dict",
            any: "object",
            reference: None,
            style: ModifierStyle::Python,
        }
    }

    pub fn base(&self, base: BaseType) -> &'static str {
        match base {
            BaseType::Int => self.int,
            BaseType::Float => self.float,
            BaseType::Bool => self.bool,
            BaseType::String => self.string,
            BaseType::List => self.list,
            BaseType::Dict => self.dict,
            BaseType::Any => self.any,
        }
    }

    pub fn spell(&self, ty: &TypeInfo) -> String {
        let base = self.base(ty.base);
        match self.style {
            ModifierStyle::Opaque => match self.reference {
                Some(reference) if ty.array || ty.pointer => reference.to_string(),
                _ => base.to_string(),
            },
            ModifierStyle::Python if ty.array => format!("list[{base}]"),
            ModifierStyle::Python => base.to_string(),
            ModifierStyle::C => {
                let mut out = String::new();
                if ty.constant && !base.starts_with("const ") {
                    out.push_str("const ");
                }
                out.push_str(base);
                if ty.array || ty.pointer {
                    out.push('*');
                }
                out
            }
        }
    }
}

/// Memoized pairwise type compatibility.
#[derive(Debug, Default)]
pub struct CompatibilityCache {
    known: HashMap<(BaseType, BaseType), bool>,
    hits: usize,
}

impl CompatibilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identical types are compatible, `int` and `float` coerce into
    /// each other, and `any` is compatible with everything.
    pub fn compatible(&mut self, a: BaseType, b: BaseType) -> bool {
        if let Some(known) = self.known.get(&(a, b)) {
            self.hits += 1;
            return *known;
        }
        let result = a == b
            || (a.is_numeric() && b.is_numeric())
            || a == BaseType::Any
            || b == BaseType::Any;
        self.known.insert((a, b), result);
        result
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}
