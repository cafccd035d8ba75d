//! Attribute access and method dispatch.
//!
//! De-virtualized call sites go through [`MethodCache`]: the vtable slot a
//! call site names is resolved once per (class, method) and revalidated
//! against a global epoch that every class attribute store or delete bumps.
//! A slot that no longer holds a plain function falls back to dynamic
//! lookup, and an instance dictionary entry always shadows the class.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::trace;

use super::{ReturnCheck, Vm, VmErrorKind, VmResult, err};
use crate::runtime_io::RuntimeIo;
use crate::types::TypeDescr;
use crate::vm::builtins::{self, make_native};
use crate::vm::prim;
use crate::vm::utils::{make_class, make_string, matches_descr, type_name};
use crate::vm::value::{Class, Object, ObjectData, Value};

#[derive(Debug, Clone)]
pub enum VtableSlot {
    /// Call this function directly with the receiver prepended.
    Direct(Value),
    /// Look the attribute up by name and call whatever it is.
    NeedsDynamic,
}

struct CacheEntry {
    epoch: u64,
    /// Keeps the class alive so its address is not reused while cached.
    _class: Rc<Class>,
    slot: VtableSlot,
}

#[derive(Default)]
pub(super) struct MethodCache {
    epoch: u64,
    entries: FxHashMap<usize, FxHashMap<String, CacheEntry>>,
}

impl MethodCache {
    pub(super) fn invalidate(&mut self) {
        self.epoch += 1;
    }

    fn resolve(&mut self, class: &Rc<Class>, name: &str) -> Option<VtableSlot> {
        let key = Rc::as_ptr(class) as usize;
        if let Some(entry) = self.entries.get(&key).and_then(|m| m.get(name))
            && entry.epoch == self.epoch
        {
            return Some(entry.slot.clone());
        }
        let slot = match class.lookup(name)? {
            f @ Value::Object(_) if is_function(&f) => VtableSlot::Direct(f),
            _ => VtableSlot::NeedsDynamic,
        };
        trace!(class = %class.name, name, ?slot, "method cache fill");
        self.entries.entry(key).or_default().insert(
            name.to_string(),
            CacheEntry {
                epoch: self.epoch,
                _class: Rc::clone(class),
                slot: slot.clone(),
            },
        );
        Some(slot)
    }
}

fn is_function(v: &Value) -> bool {
    matches!(v.as_object().map(|o| &o.data), Some(ObjectData::Function(_)))
}

fn no_attribute(owner: &Value, name: &str) -> super::VmError {
    err(
        VmErrorKind::AttributeError,
        format!("'{}' object has no attribute '{}'", type_name(owner), name),
    )
}

impl Vm {
    /// Resolves a vtable call for the receiver's runtime class.
    pub fn resolve_method(&mut self, receiver: &Value, name: &str) -> VmResult<VtableSlot> {
        let Some(obj) = receiver.as_object() else {
            return Err(no_attribute(receiver, name));
        };
        let ObjectData::Instance(inst) = &obj.data else {
            return Ok(VtableSlot::NeedsDynamic);
        };
        if obj.has_attr(name) {
            return Ok(VtableSlot::NeedsDynamic);
        }
        self.method_cache
            .resolve(&inst.class, name)
            .ok_or_else(|| no_attribute(receiver, name))
    }

    /// `InvokeMethod`: receiver and arguments are on the stack.
    pub(super) fn invoke_method<IO: RuntimeIo>(
        &mut self,
        name: &str,
        argc: usize,
        ret: Option<&TypeDescr>,
        io: &mut IO,
    ) -> VmResult<()> {
        let args = self.pop_n(argc)?;
        let receiver = self.pop()?;
        let check = ret.map(|expected| ReturnCheck {
            expected: expected.clone(),
            target: format!("{}.{}", type_name(&receiver), name),
        });
        match self.resolve_method(&receiver, name)? {
            VtableSlot::Direct(func) => {
                let mut full = Vec::with_capacity(argc + 1);
                full.push(receiver);
                full.extend(args);
                self.call_value(func, full, Vec::new(), check, io)
            }
            VtableSlot::NeedsDynamic => {
                let callee = self.get_attr(&receiver, name)?;
                self.call_value(callee, args, Vec::new(), check, io)
            }
        }
    }

    // ========== attributes ==========

    pub fn get_attr(&self, owner: &Value, name: &str) -> VmResult<Value> {
        let Some(obj) = owner.as_object() else {
            return Err(no_attribute(owner, name));
        };
        match &obj.data {
            ObjectData::Instance(inst) => {
                if let Some(off) = inst.class.field_offset(name) {
                    let stored = inst.fields.borrow().get(off).cloned().flatten();
                    return match (stored, &inst.class.fields[off].1) {
                        (Some(v), TypeDescr::Prim(p)) => prim::box_value(*p, &v),
                        (Some(v), _) => Ok(v),
                        (None, _) => Err(no_attribute(owner, name)),
                    };
                }
                if let Some(v) = obj.get_attr(name) {
                    return Ok(v);
                }
                if name == "__class__" {
                    return Ok(make_class(Rc::clone(&inst.class)));
                }
                match inst.class.lookup(name) {
                    Some(f) if is_function(&f) => Ok(Value::Object(Rc::new(Object::new(
                        ObjectData::BoundMethod {
                            receiver: owner.clone(),
                            func: f,
                        },
                    )))),
                    Some(v) => Ok(v),
                    None => Err(no_attribute(owner, name)),
                }
            }
            ObjectData::Class(class) => match name {
                "__name__" => Ok(make_string(class.name.clone())),
                _ => class.lookup(name).ok_or_else(|| {
                    err(
                        VmErrorKind::AttributeError,
                        format!("type object '{}' has no attribute '{}'", class.name, name),
                    )
                }),
            },
            ObjectData::Module { index, name: module } => {
                let m = &self.modules[*index];
                match m.globals.get(name) {
                    Some(v) => Ok(v.clone()),
                    None if m.lenient => Ok(Value::None),
                    None => Err(err(
                        VmErrorKind::AttributeError,
                        format!("module '{}' has no attribute '{}'", module, name),
                    )),
                }
            }
            ObjectData::Function(f) if name == "__name__" => Ok(make_string(
                f.qualname.rsplit('.').next().unwrap_or(&f.qualname),
            )),
            data => match builtins::method_for(data, name) {
                Some(func) => Ok(make_native(func, Some(owner.clone()))),
                None => obj.get_attr(name).ok_or_else(|| no_attribute(owner, name)),
            },
        }
    }

    pub fn set_attr(&mut self, owner: &Value, name: &str, value: Value) -> VmResult<()> {
        let Some(obj) = owner.as_object() else {
            return Err(no_attribute(owner, name));
        };
        match &obj.data {
            ObjectData::Instance(inst) => {
                if let Some(off) = inst.class.field_offset(name) {
                    let descr = &inst.class.fields[off].1;
                    let stored = match descr {
                        TypeDescr::Prim(p) => prim::unbox(*p, &value)?,
                        d if matches_descr(&value, d) => value,
                        d => {
                            return Err(err(
                                VmErrorKind::TypeError,
                                format!(
                                    "expected '{}' for attribute '{}', got '{}'",
                                    d,
                                    name,
                                    type_name(&value)
                                ),
                            ));
                        }
                    };
                    inst.fields.borrow_mut()[off] = Some(stored);
                    return Ok(());
                }
                if obj.set_attr(name, value) {
                    Ok(())
                } else {
                    Err(no_attribute(owner, name))
                }
            }
            ObjectData::Class(class) => {
                class.attrs.borrow_mut().insert(name.to_string(), value);
                self.method_cache.invalidate();
                Ok(())
            }
            ObjectData::Module { index, .. } => {
                self.modules[*index].globals.insert(name.to_string(), value);
                Ok(())
            }
            _ => {
                if obj.set_attr(name, value) {
                    Ok(())
                } else {
                    Err(no_attribute(owner, name))
                }
            }
        }
    }

    pub fn del_attr(&mut self, owner: &Value, name: &str) -> VmResult<()> {
        let Some(obj) = owner.as_object() else {
            return Err(no_attribute(owner, name));
        };
        let removed = match &obj.data {
            ObjectData::Instance(inst) => match inst.class.field_offset(name) {
                Some(off) => inst.fields.borrow_mut()[off].take().is_some(),
                None => obj.del_attr(name),
            },
            ObjectData::Class(class) => {
                let removed = class.attrs.borrow_mut().remove(name).is_some();
                self.method_cache.invalidate();
                removed
            }
            ObjectData::Module { index, .. } => {
                self.modules[*index].globals.remove(name).is_some()
            }
            _ => obj.del_attr(name),
        };
        if removed {
            Ok(())
        } else {
            Err(no_attribute(owner, name))
        }
    }

    /// `LoadField`: direct slot read, with a by-name fallback for objects
    /// whose class has a different layout.
    pub(super) fn load_field(&self, owner: &Value, offset: usize, name: &str) -> VmResult<Value> {
        if let Some(ObjectData::Instance(inst)) = owner.as_object().map(|o| &o.data)
            && inst.class.fields.get(offset).is_some_and(|(n, _)| n == name)
        {
            return inst
                .fields
                .borrow()
                .get(offset)
                .cloned()
                .flatten()
                .ok_or_else(|| no_attribute(owner, name));
        }
        let v = self.get_attr(owner, name)?;
        Ok(v)
    }

    pub(super) fn store_field(
        &mut self,
        owner: &Value,
        offset: usize,
        name: &str,
        value: Value,
    ) -> VmResult<()> {
        if let Some(ObjectData::Instance(inst)) = owner.as_object().map(|o| &o.data)
            && inst.class.fields.get(offset).is_some_and(|(n, _)| n == name)
        {
            inst.fields.borrow_mut()[offset] = Some(value);
            return Ok(());
        }
        self.set_attr(owner, name, value)
    }
}
