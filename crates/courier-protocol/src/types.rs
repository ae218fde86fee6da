//! Addressing and call types.
//!
//! An [`EndpointName`] says *where* a call goes, an [`InterfaceShape`]
//! says *what* may be called there, and a [`CallDescriptor`] is one
//! concrete call. [`CorrelationId`] pairs a call that wants an answer with
//! the answer.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Value, ValueKind};

// ---------------------------------------------------------------------------
// Interface shapes
// ---------------------------------------------------------------------------

/// One callable method: its name and the kind of each parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodSignature {
    pub name: String,
    pub params: Vec<ValueKind>,
}

impl MethodSignature {
    /// Returns `true` if `args` can be passed to this method.
    pub fn accepts(&self, args: &[Value]) -> bool {
        self.params.len() == args.len()
            && self
                .params
                .iter()
                .zip(args)
                .all(|(param, arg)| param.accepts(arg.kind()))
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

/// The set of methods an endpoint exposes.
///
/// Methods may be overloaded by parameter kinds; [`InterfaceShape::resolve`]
/// picks the first declared overload the arguments fit.
///
/// ```
/// use courier_protocol::{InterfaceShape, Value, ValueKind};
///
/// let echo = InterfaceShape::new("Echo").method("double", [ValueKind::Int]);
/// assert!(echo.resolve("double", &[Value::Int(21)]).is_some());
/// assert!(echo.resolve("double", &[Value::from("21")]).is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceShape {
    name: String,
    methods: Vec<MethodSignature>,
}

impl InterfaceShape {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Adds a method. Builder style.
    pub fn method(
        mut self,
        name: impl Into<String>,
        params: impl IntoIterator<Item = ValueKind>,
    ) -> Self {
        self.methods.push(MethodSignature {
            name: name.into(),
            params: params.into_iter().collect(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodSignature] {
        &self.methods
    }

    /// Returns `true` if any overload is called `method`.
    pub fn has_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.name == method)
    }

    /// Finds the overload of `method` that `args` fit.
    pub fn resolve(&self, method: &str, args: &[Value]) -> Option<&MethodSignature> {
        self.methods
            .iter()
            .find(|m| m.name == method && m.accepts(args))
    }
}

// ---------------------------------------------------------------------------
// EndpointName
// ---------------------------------------------------------------------------

/// The address of an endpoint: a unique name plus the interface it speaks.
///
/// Two names are the same endpoint only if both parts match, so a
/// `"ticks"` channel and a `"ticks"` remote with a different interface
/// never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointName {
    name: String,
    interface: String,
}

impl EndpointName {
    pub fn new(name: impl Into<String>, shape: &InterfaceShape) -> Self {
        Self {
            name: name.into(),
            interface: shape.name().to_owned(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name of the interface shape behind this endpoint.
    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl fmt::Display for EndpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.name, self.interface)
    }
}

// ---------------------------------------------------------------------------
// CallDescriptor
// ---------------------------------------------------------------------------

/// One method call, ready to be sent anywhere.
///
/// Fields are private and there are no setters: once built, a descriptor
/// is never changed, only cloned and moved. The argument type tags are
/// not stored separately; each [`Value`] carries its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallDescriptor {
    endpoint: EndpointName,
    method: String,
    args: Vec<Value>,
}

impl CallDescriptor {
    pub fn new(endpoint: EndpointName, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            endpoint,
            method: method.into(),
            args,
        }
    }

    pub fn endpoint(&self) -> &EndpointName {
        &self.endpoint
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// The argument type tags, in order.
    pub fn signature(&self) -> Vec<ValueKind> {
        self.args.iter().map(Value::kind).collect()
    }
}

impl fmt::Display for CallDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.endpoint, self.method, self.args.len())
    }
}

// ---------------------------------------------------------------------------
// CorrelationId
// ---------------------------------------------------------------------------

/// A random 128-bit token naming one in-flight call that expects a result.
///
/// Encoded as 32 lowercase hex digits, so it survives formats without
/// native 128-bit integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(u128);

impl CorrelationId {
    /// Draws a fresh id from the thread-local RNG.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn from_u128(raw: u128) -> Self {
        Self(raw)
    }

    pub fn into_inner(self) -> u128 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Serialize for CorrelationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CorrelationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        u128::from_str_radix(&hex, 16)
            .map(CorrelationId)
            .map_err(serde::de::Error::custom)
    }
}

// =========================================================================
// Tests
// =========================================================================
