//! Structural protocols: named capability sets checked by shape.
//!
//! A type conforms to a protocol when it has every non-optional method
//! (with a compatible signature) and property the protocol asks for,
//! including everything inherited through `extends`. Structural types
//! come from configuration or are extracted from `class` declarations.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::ast::{NodeId, SourceAst};
use crate::shape::{Construct, ConstructTable};
use crate::typecheck::TypeInferencer;
use crate::types::{BaseType, CompatibilityCache};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSignature {
    /// Parameter type names.
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

impl MethodSignature {
    pub fn new<I, S>(params: I, returns: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MethodSignature {
            params: params.into_iter().map(Into::into).collect(),
            returns: returns.map(str::to_string),
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub readonly: bool,
}

impl PropertyDef {
    pub fn new(ty: impl Into<String>) -> Self {
        PropertyDef {
            ty: ty.into(),
            optional: false,
            readonly: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub name: String,
    #[serde(default)]
    pub methods: BTreeMap<String, MethodSignature>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDef>,
    #[serde(default)]
    pub extends: Vec<String>,
}

impl Protocol {
    pub fn new(name: impl Into<String>) -> Self {
        Protocol {
            name: name.into(),
            ..Protocol::default()
        }
    }

    pub fn with_method(mut self, name: impl Into<String>, signature: MethodSignature) -> Self {
        self.methods.insert(name.into(), signature);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, property: PropertyDef) -> Self {
        self.properties.insert(name.into(), property);
        self
    }

    pub fn extending(mut self, parent: impl Into<String>) -> Self {
        self.extends.push(parent.into());
        self
    }
}

/// The members a concrete type actually has.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralType {
    pub name: String,
    #[serde(default)]
    pub methods: BTreeMap<String, MethodSignature>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDef>,
}

impl StructuralType {
    pub fn new(name: impl Into<String>) -> Self {
        StructuralType {
            name: name.into(),
            ..StructuralType::default()
        }
    }

    pub fn with_method(mut self, name: impl Into<String>, signature: MethodSignature) -> Self {
        self.methods.insert(name.into(), signature);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.properties.insert(name.into(), PropertyDef::new(ty));
        self
    }

    /// Members of a `class` declaration: functions become methods with
    /// `any` parameters, assignments become properties typed by their
    /// initial value.
    pub fn from_class(types: &mut TypeInferencer<'_>, ast: &SourceAst, table: &ConstructTable, id: NodeId) -> Option<Self> {
        let Construct::Class { name, members } = table.resolve(ast, id).1 else {
            return None;
        };
        let mut structure = StructuralType::new(name);
        for member in members {
            let (member, construct) = table.resolve(ast, *member);
            match construct {
                Construct::Function { name, params, .. } => {
                    let returns = types.return_type(member);
                    let signature = MethodSignature::new(
                        params.iter().map(|_| BaseType::Any.name()),
                        Some(returns.base.name()),
                    );
                    structure.methods.insert(name.to_string(), signature);
                }
                Construct::Assign { target, value } => {
                    let ty = types.type_of(None, value);
                    structure
                        .properties
                        .insert(target.to_string(), PropertyDef::new(ty.base.name()));
                }
                _ => {}
            }
        }
        Some(structure)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConformanceResult {
    pub compatible: bool,
    pub missing_features: Vec<String>,
}

impl ConformanceResult {
    fn from_missing(missing_features: Vec<String>) -> Self {
        ConformanceResult {
            compatible: missing_features.is_empty(),
            missing_features,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    #[error("'{0}' is declared as both a method and a property")]
    MemberKindConflict(String),
    #[error("method '{0}' is declared with incompatible signatures")]
    IncompatibleMethod(String),
    #[error("property '{0}' is declared with incompatible types")]
    IncompatibleProperty(String),
}

/// Combine several protocols into one requirement.
pub fn compose(name: &str, parts: &[&Protocol]) -> Result<Protocol, CompositionError> {
    let mut compat = CompatibilityCache::new();
    let mut composed = Protocol::new(name);

    for part in parts {
        for (method, signature) in &part.methods {
            if composed.properties.contains_key(method) {
                return Err(CompositionError::MemberKindConflict(method.clone()));
            }
            match composed.methods.get_mut(method) {
                Some(existing) => {
                    if !signatures_match(&mut compat, existing, signature) {
                        return Err(CompositionError::IncompatibleMethod(method.clone()));
                    }
                    existing.optional &= signature.optional;
                }
                None => {
                    composed.methods.insert(method.clone(), signature.clone());
                }
            }
        }
        for (property, def) in &part.properties {
            if composed.methods.contains_key(property) {
                return Err(CompositionError::MemberKindConflict(property.clone()));
            }
            match composed.properties.get_mut(property) {
                Some(existing) => {
                    if !type_names_match(&mut compat, &existing.ty, &def.ty) {
                        return Err(CompositionError::IncompatibleProperty(property.clone()));
                    }
                    existing.optional &= def.optional;
                    existing.readonly |= def.readonly;
                }
                None => {
                    composed.properties.insert(property.clone(), def.clone());
                }
            }
        }
        for parent in &part.extends {
            if !composed.extends.contains(parent) {
                composed.extends.push(parent.clone());
            }
        }
    }
    Ok(composed)
}

fn type_names_match(compat: &mut CompatibilityCache, a: &str, b: &str) -> bool {
    match (BaseType::from_name(a), BaseType::from_name(b)) {
        (Some(a), Some(b)) => compat.compatible(a, b),
        _ => a == b,
    }
}

fn signatures_match(
    compat: &mut CompatibilityCache,
    required: &MethodSignature,
    actual: &MethodSignature,
) -> bool {
    let params = required.params.len() == actual.params.len()
        && required
            .params
            .iter()
            .zip(&actual.params)
            .all(|(a, b)| type_names_match(compat, a, b));
    let returns = match (&required.returns, &actual.returns) {
        (Some(a), Some(b)) => type_names_match(compat, a, b),
        _ => true,
    };
    params && returns
}

/// Registry of protocols and structural types with memoized checks.
#[derive(Debug, Default)]
pub struct ProtocolChecker {
    protocols: HashMap<String, Protocol>,
    types: HashMap<String, StructuralType>,
    results: HashMap<(String, String), ConformanceResult>,
    compat: CompatibilityCache,
}

impl ProtocolChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a protocol. Cached results for it and for every
    /// protocol extending it, directly or not, are dropped.
    pub fn register_protocol(&mut self, protocol: Protocol) {
        let stale = self.extenders_of(&protocol.name);
        self.results.retain(|(_, name), _| !stale.contains(name));
        self.protocols.insert(protocol.name.clone(), protocol);
    }

    pub fn register_type(&mut self, structure: StructuralType) {
        self.results.retain(|(name, _), _| *name != structure.name);
        self.types.insert(structure.name.clone(), structure);
    }

    /// `name` plus every registered protocol that inherits from it.
    fn extenders_of(&self, name: &str) -> HashSet<String> {
        let mut found = HashSet::from([name.to_string()]);
        loop {
            let before = found.len();
            for protocol in self.protocols.values() {
                if protocol.extends.iter().any(|parent| found.contains(parent)) {
                    found.insert(protocol.name.clone());
                }
            }
            if found.len() == before {
                return found;
            }
        }
    }

    pub fn protocol(&self, name: &str) -> Option<&Protocol> {
        self.protocols.get(name)
    }

    pub fn structure(&self, name: &str) -> Option<&StructuralType> {
        self.types.get(name)
    }

    /// Extract and register every class declared at the top of `ast`.
    /// Classes already registered under the same name are kept.
    pub fn register_classes(&mut self, ast: &SourceAst, table: &ConstructTable) -> Vec<String> {
        let mut types = TypeInferencer::new(ast, table);
        types.infer_program();
        let mut names = Vec::new();
        for item in table.body(ast, ast.root()) {
            let (id, construct) = table.resolve(ast, item);
            let Construct::Class { name, .. } = construct else {
                continue;
            };
            if !self.types.contains_key(name) {
                if let Some(structure) = StructuralType::from_class(&mut types, ast, table, id) {
                    debug!(class = name, methods = structure.methods.len(), "extracted structural type");
                    self.types.insert(name.to_string(), structure);
                }
            }
            names.push(name.to_string());
        }
        names
    }

    /// Number of memoized conformance results.
    pub fn cached_results(&self) -> usize {
        self.results.len()
    }

    pub fn check(&mut self, type_name: &str, protocol_name: &str) -> ConformanceResult {
        let key = (type_name.to_string(), protocol_name.to_string());
        if let Some(result) = self.results.get(&key) {
            return result.clone();
        }

        let result = match self.types.get(type_name).cloned() {
            Some(structure) => self.check_structure(&structure, protocol_name),
            None => ConformanceResult::from_missing(vec![format!("type: {type_name}")]),
        };
        self.results.insert(key, result.clone());
        result
    }

    /// Check a structure that need not be registered.
    pub fn check_structure(&mut self, structure: &StructuralType, protocol_name: &str) -> ConformanceResult {
        let mut missing = Vec::new();
        let mut visited = HashSet::new();
        self.collect_missing(structure, protocol_name, &mut visited, &mut missing);
        ConformanceResult::from_missing(missing)
    }

    fn collect_missing(
        &mut self,
        structure: &StructuralType,
        protocol_name: &str,
        visited: &mut HashSet<String>,
        missing: &mut Vec<String>,
    ) {
        if !visited.insert(protocol_name.to_string()) {
            return;
        }
        let Some(protocol) = self.protocols.get(protocol_name).cloned() else {
            missing.push(format!("protocol: {protocol_name}"));
            return;
        };

        for parent in &protocol.extends {
            self.collect_missing(structure, parent, visited, missing);
        }
        for (name, required) in &protocol.methods {
            if required.optional {
                continue;
            }
            let feature = match structure.methods.get(name) {
                None => format!("method: {name}"),
                Some(actual) if !signatures_match(&mut self.compat, required, actual) => {
                    format!("method: {name} (signature mismatch)")
                }
                Some(_) => continue,
            };
            push_unique(missing, feature);
        }
        for (name, required) in &protocol.properties {
            if required.optional {
                continue;
            }
            let feature = match structure.properties.get(name) {
                None => format!("property: {name}"),
                Some(actual) if !type_names_match(&mut self.compat, &required.ty, &actual.ty) => {
                    format!("property: {name} (type mismatch)")
                }
                Some(_) => continue,
            };
            push_unique(missing, feature);
        }
    }
}

fn push_unique(missing: &mut Vec<String>, feature: String) {
    if !missing.contains(&feature) {
        missing.push(feature);
    }
}
