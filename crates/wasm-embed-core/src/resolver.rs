//! Export resolution: export name to callable function.
//!
//! A module's export descriptors and its instance's externs are index-aligned,
//! so a name is resolved by finding its export index in the module and taking
//! the instance extern at that index. The module's name index maps every name
//! to its first occurrence, which matches a linear scan from index 0.

use std::sync::Arc;

use tracing::debug;

use wasm_embed_common::RuntimeError;

use crate::externs::{Extern, ExternKind};
use crate::{Function, Instance, Module};

/// Resolve the function exported as `name`.
///
/// # Errors
///
/// Returns `ExportNotFound` if no export has that name, `ExportKindMismatch`
/// if the first export with that name is not a function, `Instantiation` if
/// `instance` was not created from `module`, or `UseAfterDestroy` if the
/// instance or an owner was released.
pub fn resolve_function(
    module: &Module,
    instance: &Instance,
    name: &str,
) -> Result<Function, RuntimeError> {
    let (index, kind) = lookup(module, name)?;

    if kind != ExternKind::Function {
        return Err(RuntimeError::ExportKindMismatch {
            name: name.to_string(),
            expected: ExternKind::Function.to_string(),
            actual: kind.to_string(),
        });
    }

    let function = extern_at(instance, index, name)?.into_function()?;
    debug!(name, index, "Function export resolved");
    Ok(function)
}

/// The instance extern at `index`, which must carry the export name `name`.
fn extern_at(instance: &Instance, index: usize, name: &str) -> Result<Extern, RuntimeError> {
    let ext = instance.get_extern(index)?;
    if ext.name() != name {
        return Err(RuntimeError::instantiation(format!(
            "instance export {index} is '{}', expected '{name}'; instance was created from another module",
            ext.name()
        )));
    }
    Ok(ext)
}

fn lookup(module: &Module, name: &str) -> Result<(usize, ExternKind), RuntimeError> {
    let index = module
        .export_index(name)
        .ok_or_else(|| RuntimeError::export_not_found(name))?;
    Ok((index, module.export(index)?.kind))
}

/// A module paired with an instance created from it.
#[derive(Debug, Clone, Copy)]
pub struct ExportResolver<'a> {
    module: &'a Module,
    instance: &'a Instance,
}

impl<'a> ExportResolver<'a> {
    /// Pair `module` with `instance`.
    ///
    /// # Errors
    ///
    /// Returns `Instantiation` if the instance was not created from a module
    /// with the same content and engine.
    pub fn new(module: &'a Module, instance: &'a Instance) -> Result<Self, RuntimeError> {
        let same_engine = Arc::ptr_eq(module.registry(), instance.registry());
        if !same_engine
            || module.content_hash() != instance.module_hash()
            || module.num_exports() != instance.num_exports()
        {
            return Err(RuntimeError::instantiation(format!(
                "instance was not created from module {}",
                module.content_hash()
            )));
        }

        Ok(Self { module, instance })
    }

    /// Resolve the function exported as `name`.
    pub fn function(&self, name: &str) -> Result<Function, RuntimeError> {
        resolve_function(self.module, self.instance, name)
    }

    /// Resolve the extern exported as `name`, of any kind.
    pub fn extern_by_name(&self, name: &str) -> Result<Extern, RuntimeError> {
        let (index, _) = lookup(self.module, name)?;
        extern_at(self.instance, index, name)
    }

    /// Names of all function exports, in export order.
    pub fn function_names(&self) -> impl Iterator<Item = &'a str> + 'a {
        self.module
            .exports()
            .iter()
            .filter(|export| export.is_function())
            .map(|export| export.name.as_str())
    }
}
