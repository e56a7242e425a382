// Type Descriptors
// Descriptor model consumed by the bridge.
//
// Descriptors are immutable once built and shared through `Rc`; the bridge
// keys its caches on their identity.

use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
    InOut,
}

/// Ownership transferred across the boundary along with a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transfer {
    Nothing,
    Container,
    Everything,
}

/// Lifetime of a callback handed to native code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Valid only for the duration of the call.
    Call,
    /// Invoked once, then released.
    Async,
    /// Released when native code calls the linked destroy-notify.
    Notified,
    Forever,
}

/// Physical representation of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    /// Plain contiguous memory with fixed or externally known length.
    C,
    /// Reference-counted growable array.
    Array,
    /// Reference-counted vector of pointers.
    PtrArray,
    /// Reference-counted byte vector.
    ByteArray,
}

#[derive(Debug, Clone)]
pub struct ArrayType {
    pub kind: ArrayKind,
    pub element: Rc<TypeInfo>,
    pub fixed_size: Option<usize>,
    /// Index of the argument carrying the length.
    pub length_arg: Option<usize>,
    pub zero_terminated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordType {
    pub name: String,
    pub size: usize,
}

impl RecordType {
    pub fn new(name: impl Into<String>, size: usize) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            size,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectType {
    pub name: String,
    /// Native runtime type identifier.
    pub type_id: u64,
}

#[derive(Debug, Clone)]
pub struct EnumType {
    pub name: String,
    /// Underlying integer storage.
    pub storage: TypeTag,
    pub is_flags: bool,
    pub members: Vec<(String, i64)>,
}

impl EnumType {
    pub fn new(name: impl Into<String>, storage: TypeTag, members: &[(&str, i64)]) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            storage,
            is_flags: false,
            members: members.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
        })
    }

    pub fn flags(name: impl Into<String>, storage: TypeTag, members: &[(&str, i64)]) -> Rc<Self> {
        let mut ty = Self::new(name, storage, members);
        if let Some(inner) = Rc::get_mut(&mut ty) {
            inner.is_flags = true;
        }
        ty
    }

    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.members
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.members
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(n, _)| n.as_str())
    }
}

/// Scalar and string tags, shared by enum storage and declarative signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Void,
    Boolean,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Unichar,
    Utf8,
    Filename,
}

impl TypeTag {
    pub fn from_name(name: &str) -> Option<Self> {
        let tag = match name {
            "void" => TypeTag::Void,
            "boolean" | "bool" => TypeTag::Boolean,
            "int8" | "i8" => TypeTag::Int8,
            "uint8" | "u8" | "byte" => TypeTag::UInt8,
            "int16" | "i16" => TypeTag::Int16,
            "uint16" | "u16" => TypeTag::UInt16,
            "int32" | "i32" | "int" => TypeTag::Int32,
            "uint32" | "u32" | "uint" => TypeTag::UInt32,
            "int64" | "i64" => TypeTag::Int64,
            "uint64" | "u64" => TypeTag::UInt64,
            "float" | "f32" => TypeTag::Float,
            "double" | "f64" => TypeTag::Double,
            "unichar" => TypeTag::Unichar,
            "utf8" | "string" => TypeTag::Utf8,
            "filename" => TypeTag::Filename,
            _ => return None,
        };
        Some(tag)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            TypeTag::Int8
                | TypeTag::UInt8
                | TypeTag::Int16
                | TypeTag::UInt16
                | TypeTag::Int32
                | TypeTag::UInt32
                | TypeTag::Int64
                | TypeTag::UInt64
                | TypeTag::Unichar
        )
    }
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Scalar(TypeTag),
    Array(ArrayType),
    SList(Rc<TypeInfo>),
    List(Rc<TypeInfo>),
    Hash {
        key: Rc<TypeInfo>,
        value: Rc<TypeInfo>,
    },
    Record(Rc<RecordType>),
    Enum(Rc<EnumType>),
    Object(Rc<ObjectType>),
    Callback(Rc<dyn CallableDescriptor>),
    Error,
}

#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub kind: TypeKind,
    pub pointer: bool,
}

impl TypeInfo {
    fn make(kind: TypeKind, pointer: bool) -> Rc<Self> {
        Rc::new(Self { kind, pointer })
    }

    pub fn scalar(tag: TypeTag) -> Rc<Self> {
        let pointer = matches!(tag, TypeTag::Utf8 | TypeTag::Filename);
        Self::make(TypeKind::Scalar(tag), pointer)
    }

    /// Untyped `void *`.
    pub fn pointer() -> Rc<Self> {
        Self::make(TypeKind::Scalar(TypeTag::Void), true)
    }

    pub fn array(kind: ArrayKind, element: Rc<TypeInfo>) -> ArrayBuilder {
        ArrayBuilder {
            array: ArrayType {
                kind,
                element,
                fixed_size: None,
                length_arg: None,
                zero_terminated: false,
            },
        }
    }

    pub fn slist(element: Rc<TypeInfo>) -> Rc<Self> {
        Self::make(TypeKind::SList(element), true)
    }

    pub fn list(element: Rc<TypeInfo>) -> Rc<Self> {
        Self::make(TypeKind::List(element), true)
    }

    pub fn hash(key: Rc<TypeInfo>, value: Rc<TypeInfo>) -> Rc<Self> {
        Self::make(TypeKind::Hash { key, value }, true)
    }

    pub fn record(ty: Rc<RecordType>, pointer: bool) -> Rc<Self> {
        Self::make(TypeKind::Record(ty), pointer)
    }

    pub fn enumeration(ty: Rc<EnumType>) -> Rc<Self> {
        Self::make(TypeKind::Enum(ty), false)
    }

    pub fn object(ty: Rc<ObjectType>) -> Rc<Self> {
        Self::make(TypeKind::Object(ty), true)
    }

    pub fn callback(ty: Rc<dyn CallableDescriptor>) -> Rc<Self> {
        Self::make(TypeKind::Callback(ty), true)
    }

    pub fn error() -> Rc<Self> {
        Self::make(TypeKind::Error, true)
    }

    pub fn tag(&self) -> Option<TypeTag> {
        match self.kind {
            TypeKind::Scalar(tag) => Some(tag),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeKind::Scalar(TypeTag::Void)) && !self.pointer
    }

    pub fn name(&self) -> String {
        match &self.kind {
            TypeKind::Scalar(TypeTag::Void) if self.pointer => "pointer".to_string(),
            TypeKind::Scalar(tag) => format!("{:?}", tag).to_lowercase(),
            TypeKind::Array(a) => format!("array of {}", a.element.name()),
            TypeKind::SList(e) => format!("slist of {}", e.name()),
            TypeKind::List(e) => format!("list of {}", e.name()),
            TypeKind::Hash { key, value } => format!("hash of {} to {}", key.name(), value.name()),
            TypeKind::Record(r) => r.name.clone(),
            TypeKind::Enum(e) => e.name.clone(),
            TypeKind::Object(o) => o.name.clone(),
            TypeKind::Callback(c) => c.qualified_name(),
            TypeKind::Error => "error".to_string(),
        }
    }
}

pub struct ArrayBuilder {
    array: ArrayType,
}

impl ArrayBuilder {
    pub fn fixed_size(mut self, size: usize) -> Self {
        self.array.fixed_size = Some(size);
        self
    }

    pub fn length_arg(mut self, index: usize) -> Self {
        self.array.length_arg = Some(index);
        self
    }

    pub fn zero_terminated(mut self) -> Self {
        self.array.zero_terminated = true;
        self
    }

    pub fn build(self) -> Rc<TypeInfo> {
        TypeInfo::make(TypeKind::Array(self.array), true)
    }
}

/// One argument of a callable descriptor.
#[derive(Debug, Clone)]
pub struct ArgInfo {
    pub name: String,
    pub direction: Direction,
    pub transfer: Transfer,
    pub ty: Rc<TypeInfo>,
    pub caller_allocates: bool,
    /// Optional or nullable: absent values are allowed.
    pub optional: bool,
    pub scope: Option<Scope>,
    pub closure: Option<usize>,
    pub destroy: Option<usize>,
}

impl ArgInfo {
    pub fn new(name: impl Into<String>, ty: Rc<TypeInfo>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::In,
            transfer: Transfer::Nothing,
            ty,
            caller_allocates: false,
            optional: false,
            scope: None,
            closure: None,
            destroy: None,
        }
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn transfer(mut self, transfer: Transfer) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn caller_allocates(mut self) -> Self {
        self.caller_allocates = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn closure(mut self, index: usize) -> Self {
        self.closure = Some(index);
        self
    }

    pub fn destroy(mut self, index: usize) -> Self {
        self.destroy = Some(index);
        self
    }
}

/// What an implicit receiver is.
#[derive(Debug, Clone)]
pub enum Receiver {
    Object(Rc<ObjectType>),
    Record(Rc<RecordType>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallableKind {
    Function {
        symbol: String,
        is_method: bool,
        is_constructor: bool,
    },
    Signal,
    VFunc,
    Callback,
}

/// Source of a callable's shape, supplied by the type-descriptor adapter.
pub trait CallableDescriptor: fmt::Debug {
    fn namespace(&self) -> &str;
    fn name(&self) -> &str;
    fn kind(&self) -> CallableKind;
    fn container(&self) -> Option<Receiver>;
    fn n_args(&self) -> usize;
    fn arg(&self, index: usize) -> ArgInfo;
    fn return_type(&self) -> Rc<TypeInfo>;
    fn caller_owns(&self) -> Transfer;
    fn can_throw(&self) -> bool;

    fn qualified_name(&self) -> String {
        if self.namespace().is_empty() {
            self.name().to_string()
        } else {
            format!("{}.{}", self.namespace(), self.name())
        }
    }
}

/// In-memory callable descriptor.
#[derive(Debug, Clone)]
pub struct CallableInfo {
    pub namespace: String,
    pub name: String,
    pub kind: CallableKind,
    pub container: Option<Receiver>,
    pub args: Vec<ArgInfo>,
    pub return_type: Rc<TypeInfo>,
    pub caller_owns: Transfer,
    pub can_throw: bool,
}

impl CallableInfo {
    pub fn function(namespace: &str, name: &str, symbol: &str) -> Self {
        Self::with_kind(
            namespace,
            name,
            CallableKind::Function {
                symbol: symbol.to_string(),
                is_method: false,
                is_constructor: false,
            },
        )
    }

    pub fn callback(namespace: &str, name: &str) -> Self {
        Self::with_kind(namespace, name, CallableKind::Callback)
    }

    pub fn signal(namespace: &str, name: &str, container: Receiver) -> Self {
        let mut info = Self::with_kind(namespace, name, CallableKind::Signal);
        info.container = Some(container);
        info
    }

    fn with_kind(namespace: &str, name: &str, kind: CallableKind) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind,
            container: None,
            args: Vec::new(),
            return_type: TypeInfo::scalar(TypeTag::Void),
            caller_owns: Transfer::Nothing,
            can_throw: false,
        }
    }

    /// Turns a function into a method on `container`.
    pub fn method(mut self, container: Receiver) -> Self {
        if let CallableKind::Function { is_method, .. } = &mut self.kind {
            *is_method = true;
        }
        self.container = Some(container);
        self
    }

    pub fn arg(mut self, arg: ArgInfo) -> Self {
        self.args.push(arg);
        self
    }

    pub fn returns(mut self, ty: Rc<TypeInfo>, transfer: Transfer) -> Self {
        self.return_type = ty;
        self.caller_owns = transfer;
        self
    }

    pub fn throws(mut self) -> Self {
        self.can_throw = true;
        self
    }

    pub fn build(self) -> Rc<dyn CallableDescriptor> {
        Rc::new(self)
    }
}

impl CallableDescriptor for CallableInfo {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CallableKind {
        self.kind.clone()
    }

    fn container(&self) -> Option<Receiver> {
        self.container.clone()
    }

    fn n_args(&self) -> usize {
        self.args.len()
    }

    fn arg(&self, index: usize) -> ArgInfo {
        self.args[index].clone()
    }

    fn return_type(&self) -> Rc<TypeInfo> {
        self.return_type.clone()
    }

    fn caller_owns(&self) -> Transfer {
        self.caller_owns
    }

    fn can_throw(&self) -> bool {
        self.can_throw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_lookup() {
        let ty = EnumType::new("Demo.Mode", TypeTag::Int32, &[("fast", 1), ("slow", 2)]);
        assert_eq!(ty.value_of("FAST"), Some(1));
        assert_eq!(ty.name_of(2), Some("slow"));
        assert_eq!(ty.name_of(3), None);
        assert!(EnumType::flags("Demo.Bits", TypeTag::UInt32, &[]).is_flags);
    }

    #[test]
    fn test_type_names() {
        let arr = TypeInfo::array(ArrayKind::C, TypeInfo::scalar(TypeTag::Int32))
            .fixed_size(3)
            .build();
        assert_eq!(arr.name(), "array of int32");
        assert_eq!(TypeInfo::pointer().name(), "pointer");
        assert!(TypeInfo::scalar(TypeTag::Void).is_void());
        assert!(TypeInfo::scalar(TypeTag::Utf8).pointer);
    }

    #[test]
    fn test_qualified_name() {
        let info = CallableInfo::function("Demo", "frob", "demo_frob").build();
        assert_eq!(info.qualified_name(), "Demo.frob");
        assert_eq!(CallableInfo::callback("", "cb").qualified_name(), "cb");
    }
}
