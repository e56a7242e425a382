// Callable Declarations
// Textual and JSON signature declarations

use super::{Callable, Extra, Param, ParamKind};
use crate::error::{BridgeError, BridgeResult};
use crate::types::{Direction, EnumType, RecordType, Transfer, TypeInfo, TypeTag};
use crate::wrappers::RecordMarshaller;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ffi::c_void;
use std::rc::Rc;

/// Shape of one declared parameter.
#[derive(Debug, Clone)]
pub enum ParamShape {
    Typed(Rc<TypeInfo>),
    Record(Rc<RecordType>),
    /// Enumeration; `storage` overrides the default C `int`.
    Enum {
        ty: Rc<EnumType>,
        storage: Option<Rc<TypeInfo>>,
    },
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub direction: Direction,
    pub transfer: Transfer,
    pub shape: ParamShape,
    /// Return value only: boolean reporting whether out values are valid.
    pub phantom: bool,
}

impl ParamDecl {
    pub fn new(shape: ParamShape) -> Self {
        Self {
            direction: Direction::In,
            transfer: Transfer::Nothing,
            shape,
            phantom: false,
        }
    }

    pub fn typed(ty: Rc<TypeInfo>) -> Self {
        Self::new(ParamShape::Typed(ty))
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn transfer(mut self, transfer: Transfer) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn phantom(mut self) -> Self {
        self.phantom = true;
        self
    }
}

/// Signature declared without a backing descriptor.
#[derive(Debug, Clone)]
pub struct CallableDecl {
    pub name: String,
    pub address: Option<usize>,
    pub ret: Option<ParamDecl>,
    pub args: Vec<ParamDecl>,
    pub throws: bool,
}

#[derive(Deserialize)]
struct RawCallable {
    name: String,
    #[serde(default)]
    addr: Option<usize>,
    #[serde(default)]
    ret: Option<RawParam>,
    #[serde(default)]
    args: Vec<RawParam>,
    #[serde(default)]
    throws: bool,
}

#[derive(Deserialize)]
struct RawParam {
    #[serde(default)]
    dir: Option<String>,
    #[serde(default)]
    xfer: bool,
    #[serde(default, rename = "type")]
    ty: Option<String>,
    #[serde(default)]
    record: Option<String>,
    #[serde(default, rename = "enum")]
    enumeration: Option<RawEnum>,
    #[serde(default)]
    phantom: bool,
}

#[derive(Deserialize)]
struct RawEnum {
    name: String,
    #[serde(default)]
    flags: bool,
    values: BTreeMap<String, i64>,
}

fn type_from_name(name: &str) -> Option<Rc<TypeInfo>> {
    match name {
        "pointer" | "ptr" => Some(TypeInfo::pointer()),
        other => TypeTag::from_name(other).map(TypeInfo::scalar),
    }
}

impl CallableDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            ret: None,
            args: Vec::new(),
            throws: false,
        }
    }

    pub fn arg(mut self, arg: ParamDecl) -> Self {
        self.args.push(arg);
        self
    }

    pub fn returns(mut self, ret: ParamDecl) -> Self {
        self.ret = Some(ret);
        self
    }

    pub fn throws(mut self) -> Self {
        self.throws = true;
        self
    }

    /// Parses a JSON signature table; record names resolve through `records`.
    pub fn from_json(json: &str, records: &dyn RecordMarshaller) -> BridgeResult<Self> {
        let raw: RawCallable = serde_json::from_str(json).map_err(|e| BridgeError::Signature {
            name: "<json>".to_string(),
            reason: e.to_string(),
        })?;
        let name = raw.name.clone();
        let param = |raw: RawParam| parse_param(&name, raw, records);
        Ok(Self {
            address: raw.addr,
            ret: raw.ret.map(param).transpose()?,
            args: raw.args.into_iter().map(param).collect::<BridgeResult<_>>()?,
            throws: raw.throws,
            name: raw.name,
        })
    }
}

fn parse_param(
    callable: &str,
    raw: RawParam,
    records: &dyn RecordMarshaller,
) -> BridgeResult<ParamDecl> {
    let bad = |reason: String| BridgeError::Signature {
        name: callable.to_string(),
        reason,
    };

    let direction = match raw.dir.as_deref() {
        None | Some("in") => Direction::In,
        Some("out") => Direction::Out,
        Some("inout") => Direction::InOut,
        Some(other) => return Err(bad(format!("bad direction `{}'", other))),
    };

    let typed = match &raw.ty {
        Some(name) => {
            Some(type_from_name(name).ok_or_else(|| bad(format!("unknown type `{}'", name)))?)
        }
        None => None,
    };

    let shape = if let Some(record) = &raw.record {
        let ty = records
            .lookup(record)
            .ok_or_else(|| bad(format!("unknown record `{}'", record)))?;
        ParamShape::Record(ty)
    } else if let Some(spec) = raw.enumeration {
        let members: Vec<(&str, i64)> = spec.values.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        let storage = typed.as_ref().and_then(|t| t.tag()).unwrap_or(TypeTag::Int32);
        let ty = if spec.flags {
            EnumType::flags(spec.name, storage, &members)
        } else {
            EnumType::new(spec.name, storage, &members)
        };
        ParamShape::Enum { ty, storage: typed }
    } else if let Some(ty) = typed {
        ParamShape::Typed(ty)
    } else {
        return Err(bad("parameter needs one of type, record or enum".to_string()));
    };

    Ok(ParamDecl {
        direction,
        transfer: if raw.xfer {
            Transfer::Everything
        } else {
            Transfer::Nothing
        },
        shape,
        phantom: raw.phantom,
    })
}

fn declared_param(decl: &ParamDecl, direction: Direction, extras: &mut Vec<Extra>) -> Param {
    let (ty, kind) = match &decl.shape {
        ParamShape::Typed(ty) => (Some(ty.clone()), ParamKind::Typed),
        ParamShape::Record(record) => {
            extras.push(Extra::Record(record.clone()));
            (None, ParamKind::Record(extras.len() - 1))
        }
        ParamShape::Enum { ty, storage } => {
            extras.push(Extra::Enum(ty.clone()));
            (storage.clone(), ParamKind::Enum(extras.len() - 1))
        }
    };
    Param {
        name: None,
        arg: None,
        ty,
        dir: direction,
        transfer: decl.transfer,
        caller_allocates: false,
        internal: false,
        internal_user_data: false,
        call_scoped_user_data: false,
        n_closures: 0,
        kind,
    }
}

impl Callable {
    pub(crate) fn from_decl(
        decl: &CallableDecl,
        address: Option<*mut c_void>,
    ) -> BridgeResult<Callable> {
        let address = address
            .or(decl.address.map(|a| a as *mut c_void))
            .unwrap_or(std::ptr::null_mut());
        let mut extras = Vec::new();
        let (retval, ignore_retval) = match &decl.ret {
            Some(ret) => (declared_param(ret, Direction::Out, &mut extras), ret.phantom),
            None => (
                Param::typed(TypeInfo::scalar(TypeTag::Void), Direction::Out, Transfer::Nothing),
                false,
            ),
        };
        let params = decl
            .args
            .iter()
            .map(|arg| declared_param(arg, arg.direction, &mut extras))
            .collect();
        Callable::from_parts(
            decl.name.clone(),
            address,
            retval,
            params,
            extras,
            decl.throws,
            ignore_retval,
        )
    }
}
