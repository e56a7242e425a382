// Callable Builder
// Resolves descriptors into parameter plans and call interfaces

use super::{Callable, Extra, Param, ParamKind};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::symbols::SymbolResolver;
use crate::types::{
    ArrayKind, CallableDescriptor, CallableKind, Direction, Scope, TypeInfo, TypeKind, TypeTag,
};
use libffi::middle::{Cif, Type};
use std::cell::Cell;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;
use tracing::debug;

/// Upper bound on declared arguments.
pub(crate) const MAX_ARGS: usize = 63;

/// Parameters of a descriptor, fetched on first use.
struct LazyParams<'d> {
    descriptor: &'d dyn CallableDescriptor,
    params: Vec<Option<Param>>,
}

impl<'d> LazyParams<'d> {
    fn new(descriptor: &'d dyn CallableDescriptor) -> Self {
        let params = (0..descriptor.n_args()).map(|_| None).collect();
        Self { descriptor, params }
    }

    fn len(&self) -> usize {
        self.params.len()
    }

    fn get(&mut self, index: usize) -> &mut Param {
        let descriptor = self.descriptor;
        self.params[index].get_or_insert_with(|| Param::from_arg(descriptor.arg(index)))
    }

    fn finish(mut self) -> Vec<Param> {
        (0..self.len()).for_each(|i| {
            self.get(i);
        });
        self.params.into_iter().flatten().collect()
    }
}

fn mark_array_length(params: &mut LazyParams<'_>, ty: &TypeInfo) {
    if let TypeKind::Array(array) = &ty.kind {
        if let (ArrayKind::C, Some(length)) = (array.kind, array.length_arg) {
            if length < params.len() {
                params.get(length).internal = true;
            }
        }
    }
}

pub(crate) fn prepare_cif(name: &str, args: Vec<Type>, ret: Type) -> BridgeResult<Cif> {
    if args.len() > MAX_ARGS + 2 {
        return Err(BridgeError::PrepCif {
            name: name.to_string(),
            reason: format!("{} arguments exceed the supported maximum", args.len()),
        });
    }
    panic::catch_unwind(AssertUnwindSafe(|| Cif::new(args, ret))).map_err(|_| {
        BridgeError::PrepCif {
            name: name.to_string(),
            reason: "invalid type layout".to_string(),
        }
    })
}

impl Callable {
    pub(crate) fn from_descriptor(
        descriptor: &Rc<dyn CallableDescriptor>,
        address: Option<*mut c_void>,
        symbols: &dyn SymbolResolver,
        config: &BridgeConfig,
    ) -> BridgeResult<Callable> {
        let name = descriptor.qualified_name();
        let nargs = descriptor.n_args();
        if nargs > MAX_ARGS {
            return Err(BridgeError::PrepCif {
                name,
                reason: format!("{} arguments exceed the supported maximum", nargs),
            });
        }

        let (label, has_self, address) = match descriptor.kind() {
            CallableKind::Function {
                symbol,
                is_method,
                is_constructor,
            } => {
                let resolved = symbols
                    .resolve(descriptor.namespace(), &symbol)
                    .map_err(|reason| BridgeError::SymbolNotFound {
                        name: name.clone(),
                        symbol: symbol.clone(),
                        reason,
                    })?;
                ("fun", is_method && !is_constructor, resolved)
            }
            CallableKind::Signal => ("sig", true, address.unwrap_or(ptr::null_mut())),
            CallableKind::VFunc => ("vfn", false, address.unwrap_or(ptr::null_mut())),
            CallableKind::Callback => ("cbk", false, address.unwrap_or(ptr::null_mut())),
        };

        let retval = Param::typed(
            descriptor.return_type(),
            Direction::Out,
            descriptor.caller_owns(),
        );

        let mut params = LazyParams::new(descriptor.as_ref());
        let mut ignore_retval = false;
        let returns_boolean = retval.tag() == Some(TypeTag::Boolean) && !retval.is_void();
        let return_type = descriptor.return_type();
        mark_array_length(&mut params, &return_type);

        for argi in 0..nargs {
            let (ty, closure, destroy, scope, dir) = {
                let param = params.get(argi);
                let arg = param.arg.clone();
                (
                    param.ty.clone(),
                    arg.as_ref().and_then(|a| a.closure),
                    arg.as_ref().and_then(|a| a.destroy),
                    arg.as_ref().and_then(|a| a.scope),
                    param.dir,
                )
            };

            if returns_boolean && dir != Direction::In {
                ignore_retval = true;
            }
            if let Some(ty) = &ty {
                mark_array_length(&mut params, ty);
            }

            if let Some(index) = closure.filter(|&i| i < nargs) {
                let data = params.get(index);
                let is_callback = data
                    .ty
                    .as_ref()
                    .map_or(false, |t| matches!(t.kind, TypeKind::Callback(_)));
                if !is_callback {
                    data.internal = true;
                }
                if index == argi {
                    data.internal_user_data = true;
                }
                data.n_closures = data.n_closures.saturating_add(1);
                if scope == Some(Scope::Call) {
                    data.call_scoped_user_data = true;
                }
            }

            if let Some(index) = destroy.filter(|&i| i < nargs) {
                params.get(index).internal = true;
            }
        }

        let mut params = params.finish();

        let closure_marshal = config.closure_marshal_fixup
            && descriptor.namespace() == "GObject"
            && descriptor.name() == "ClosureMarshal"
            && params.len() > 3;
        if closure_marshal {
            params[2].internal = true;
        }

        let throws = descriptor.can_throw();
        let mut ffi_args = Vec::with_capacity(nargs + 2);
        if has_self {
            ffi_args.push(Type::pointer());
        }
        ffi_args.extend(params.iter().map(Param::ffi_type));
        if throws {
            ffi_args.push(Type::pointer());
        }
        let cif = prepare_cif(&name, ffi_args, retval.ffi_type_for_return())?;

        debug!(callable = %name, nargs, has_self, throws, "built callable");

        Ok(Callable {
            name,
            label,
            descriptor: Some(descriptor.clone()),
            address,
            user_data: Cell::new(ptr::null_mut()),
            has_self,
            throws,
            ignore_retval,
            closure_marshal,
            receiver: if has_self { descriptor.container() } else { None },
            cif,
            retval,
            params,
            extras: Vec::new(),
        })
    }

    pub(crate) fn from_parts(
        name: String,
        address: *mut c_void,
        retval: Param,
        params: Vec<Param>,
        extras: Vec<Extra>,
        throws: bool,
        ignore_retval: bool,
    ) -> BridgeResult<Callable> {
        if params.len() > MAX_ARGS {
            return Err(BridgeError::Signature {
                name,
                reason: format!("{} arguments exceed the supported maximum", params.len()),
            });
        }
        let mut ffi_args: Vec<Type> = params.iter().map(Param::ffi_type).collect();
        if throws {
            ffi_args.push(Type::pointer());
        }
        let cif = prepare_cif(&name, ffi_args, retval.ffi_type_for_return())?;
        debug!(callable = %name, nargs = params.len(), "declared callable");

        Ok(Callable {
            name,
            label: "efn",
            descriptor: None,
            address,
            user_data: Cell::new(ptr::null_mut()),
            has_self: false,
            throws,
            ignore_retval,
            closure_marshal: false,
            receiver: None,
            cif,
            retval,
            params,
            extras,
        })
    }
}

impl Param {
    fn ffi_type_for_return(&self) -> Type {
        match (self.kind, &self.ty) {
            (ParamKind::Record(_), _) => Type::pointer(),
            (ParamKind::Enum(_), None) => Type::c_int(),
            (_, Some(ty)) => super::ffi_type_of(ty),
            (ParamKind::Typed, None) => Type::void(),
        }
    }
}
