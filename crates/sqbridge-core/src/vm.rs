//! The virtual machine: evaluation stack, call frames and object operations.
//!
//! Stack indices are frame relative. Positive indices count from the base
//! of the current frame starting at 1 (inside a native closure, 1 is `this`
//! and 2.. are the arguments); negative indices count from the top, -1
//! being the topmost slot. Index 0 is never valid.
//!
//! A call expects `[callee, this, arg1, .., argN]` on top of the stack. It
//! consumes all of them and, if requested, pushes exactly one result.

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::closure::NativeClosure;
use crate::compiler::ScriptCompiler;
use crate::config::{VmConfig, VmProperty};
use crate::error::VmError;
use crate::extensions::Extensions;
use crate::object::{ClassObject, HeapObject, InstanceObject, ReleaseHook, UserDataObject};
use crate::stack_guard::StackGuard;
use crate::table::Table;
use crate::type_hash::TypeHash;
use crate::value::{ObjectRef, Value, ValueKind};

/// Metamethod invoked for reads of missing instance slots.
pub const META_GET: &str = "_get";
/// Metamethod invoked for writes of missing instance slots.
pub const META_SET: &str = "_set";
/// Metamethod invoked on a freshly cloned instance with the original as argument.
pub const META_CLONED: &str = "_cloned";
/// Metamethod used to render an instance as text.
pub const META_TOSTRING: &str = "_tostring";
/// Name of the class member run when a class is called.
pub const CONSTRUCTOR: &str = "constructor";

static NEXT_VM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a [`Vm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmId(u64);

impl VmId {
    fn next() -> Self {
        VmId(NEXT_VM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vm#{}", self.0)
    }
}

struct Frame {
    base: usize,
    closure: ObjectRef,
}

/// A single-threaded scripting VM.
pub struct Vm {
    id: VmId,
    config: VmConfig,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    root: ObjectRef,
    const_table: ObjectRef,
    last_error: Option<VmError>,
    deferred: Vec<Value>,
    extensions: Extensions,
    compiler: Option<Box<dyn ScriptCompiler>>,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let id = VmId::next();
        debug!(target: "sqbridge::vm", %id, "vm created");
        Self {
            id,
            stack: Vec::with_capacity(config.initial_stack_size()),
            config,
            frames: Vec::new(),
            root: ObjectRef::new(HeapObject::Table(Default::default())),
            const_table: ObjectRef::new(HeapObject::Table(Default::default())),
            last_error: None,
            deferred: Vec::new(),
            extensions: Extensions::new(),
            compiler: None,
        }
    }

    pub fn id(&self) -> VmId {
        self.id
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn set_property(&mut self, property: VmProperty, value: usize) {
        self.config.set(property, value);
    }

    // ---------------------------------------------------------------
    // Stack
    // ---------------------------------------------------------------

    fn frame_base(&self) -> usize {
        self.frames.last().map_or(0, |frame| frame.base)
    }

    /// Number of slots in the current frame.
    pub fn top(&self) -> usize {
        self.stack.len() - self.frame_base()
    }

    /// Absolute stack depth, independent of frames.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pop `count` values from the current frame.
    pub fn pop(&mut self, count: usize) -> Result<(), VmError> {
        let top = self.top();
        if count > top {
            return Err(VmError::StackUnderflow { count, top });
        }
        let len = self.stack.len();
        self.stack.truncate(len - count);
        Ok(())
    }

    /// Pop and return the topmost value of the current frame.
    pub fn pop_value(&mut self) -> Result<Value, VmError> {
        if self.top() == 0 {
            return Err(VmError::StackUnderflow { count: 1, top: 0 });
        }
        self.stack.pop().ok_or(VmError::StackUnderflow { count: 1, top: 0 })
    }

    /// Resize the current frame, filling new slots with null.
    pub fn set_top(&mut self, top: usize) {
        let base = self.frame_base();
        self.stack.resize(base + top, Value::Null);
    }

    pub(crate) fn truncate_stack(&mut self, depth: usize) {
        self.stack.truncate(depth.max(self.frame_base()));
    }

    /// Open a scope that restores the current stack depth when dropped.
    pub fn guard(&mut self) -> StackGuard<'_> {
        StackGuard::new(self)
    }

    fn resolve(&self, index: isize) -> Result<usize, VmError> {
        let base = self.frame_base();
        let len = self.stack.len();
        let position = match index {
            i if i > 0 => Some(base + i as usize - 1),
            i if i < 0 => len.checked_sub(i.unsigned_abs()),
            _ => None,
        };
        match position {
            Some(p) if p >= base && p < len => Ok(p),
            _ => Err(VmError::InvalidIndex {
                index,
                top: len - base,
            }),
        }
    }

    pub fn get(&self, index: isize) -> Result<&Value, VmError> {
        let position = self.resolve(index)?;
        Ok(&self.stack[position])
    }

    pub fn value_at(&self, index: isize) -> Result<Value, VmError> {
        self.get(index).cloned()
    }

    pub fn kind_at(&self, index: isize) -> Result<ValueKind, VmError> {
        self.get(index).map(Value::kind)
    }

    /// Overwrite a slot in place.
    pub fn replace(&mut self, index: isize, value: Value) -> Result<Value, VmError> {
        let position = self.resolve(index)?;
        Ok(std::mem::replace(&mut self.stack[position], value))
    }

    /// Push a copy of the value at `index`.
    pub fn push_copy(&mut self, index: isize) -> Result<(), VmError> {
        let value = self.value_at(index)?;
        self.push(value);
        Ok(())
    }

    /// Remove a slot, shifting the ones above it down.
    pub fn remove(&mut self, index: isize) -> Result<Value, VmError> {
        let position = self.resolve(index)?;
        Ok(self.stack.remove(position))
    }

    // ---------------------------------------------------------------
    // Object creation
    // ---------------------------------------------------------------

    pub fn root_table(&self) -> Value {
        Value::Object(self.root.clone())
    }

    /// Table of compile-time constants.
    pub fn const_table(&self) -> Value {
        Value::Object(self.const_table.clone())
    }

    pub fn new_table(&self) -> Value {
        Value::Object(ObjectRef::new(HeapObject::Table(Default::default())))
    }

    pub fn new_array(&self, items: Vec<Value>) -> Value {
        Value::Object(ObjectRef::new(HeapObject::Array(items.into())))
    }

    /// Create a class, optionally inheriting from `base`.
    pub fn new_class(&self, base: Option<&Value>) -> Result<Value, VmError> {
        let base = match base {
            Some(value) => Some(Self::expect_class(value)?.clone()),
            None => None,
        };
        Ok(Value::Object(ObjectRef::new(HeapObject::Class(ClassObject::new(base)))))
    }

    pub fn new_closure(&self, closure: NativeClosure) -> Value {
        Value::Object(ObjectRef::new(HeapObject::Closure(closure)))
    }

    pub fn new_user_data(&self, data: Box<dyn Any>) -> Value {
        Value::Object(ObjectRef::new(HeapObject::UserData(UserDataObject::new(data))))
    }

    /// Create an instance of `class` without running its constructor.
    pub fn create_instance(&self, class: &Value) -> Result<Value, VmError> {
        let class_ref = Self::expect_class(class)?;
        let mut fields = Table::new();
        if let Some(class_object) = class_ref.heap().as_class() {
            class_object.field_defaults(&mut fields);
        }
        Ok(Value::Object(ObjectRef::new(HeapObject::Instance(
            InstanceObject::new(class_ref.clone(), fields),
        ))))
    }

    fn expect_class(value: &Value) -> Result<&ObjectRef, VmError> {
        match value {
            Value::Object(object) if object.kind() == ValueKind::Class => Ok(object),
            other => Err(VmError::WrongType {
                expected: "class",
                actual: other.type_name(),
            }),
        }
    }

    fn expect_instance(value: &Value) -> Result<&InstanceObject, VmError> {
        value.heap().and_then(HeapObject::as_instance).ok_or(VmError::WrongType {
            expected: "instance",
            actual: value.type_name(),
        })
    }

    // ---------------------------------------------------------------
    // Slots
    // ---------------------------------------------------------------

    fn key_name(key: &Value) -> String {
        match key {
            Value::String(s) => s.to_string(),
            Value::Integer(i) => i.to_string(),
            other => other.type_name().to_string(),
        }
    }

    fn not_found(key: &Value) -> VmError {
        VmError::IndexNotFound(Self::key_name(key))
    }

    fn array_index(items: &[Value], key: &Value) -> Option<usize> {
        key.as_integer()
            .and_then(|i| usize::try_from(i).ok())
            .filter(|&i| i < items.len())
    }

    /// Create or overwrite a slot in a table or class.
    pub fn new_slot(&mut self, object: &Value, key: Value, value: Value) -> Result<(), VmError> {
        if key.is_null() {
            return Err(Self::not_found(&key));
        }
        match object.heap() {
            Some(HeapObject::Table(table)) => {
                table.borrow_mut().insert(key, value);
                Ok(())
            }
            Some(HeapObject::Class(class)) => {
                class.members_mut().insert(key, value);
                Ok(())
            }
            _ => Err(VmError::WrongType {
                expected: "table or class",
                actual: object.type_name(),
            }),
        }
    }

    /// Write an existing slot; instances fall back to the `_set` metamethod.
    pub fn set_slot(&mut self, object: &Value, key: Value, value: Value) -> Result<(), VmError> {
        let result = match object.heap() {
            Some(HeapObject::Table(table)) => table
                .borrow_mut()
                .set_existing(&key, value)
                .then_some(())
                .ok_or_else(|| Self::not_found(&key)),
            Some(HeapObject::Array(items)) => {
                let mut items = items.borrow_mut();
                match Self::array_index(&items, &key) {
                    Some(i) => {
                        items[i] = value;
                        Ok(())
                    }
                    None => Err(Self::not_found(&key)),
                }
            }
            Some(HeapObject::Class(class)) => class
                .members_mut()
                .set_existing(&key, value)
                .then_some(())
                .ok_or_else(|| Self::not_found(&key)),
            Some(HeapObject::Instance(instance)) => {
                if instance.fields_mut().set_existing(&key, value.clone()) {
                    Ok(())
                } else {
                    let setter = instance
                        .class_object()
                        .and_then(|class| class.lookup(&Value::from(META_SET)));
                    match setter {
                        Some(setter) => self.call_value(&setter, object, &[key, value]).map(drop),
                        None => Err(Self::not_found(&key)),
                    }
                }
            }
            _ => Err(VmError::WrongType {
                expected: "table, array, class or instance",
                actual: object.type_name(),
            }),
        };
        result.inspect_err(|err| self.record_error(err))
    }

    /// Read a slot; instances fall back to the `_get` metamethod.
    pub fn get_slot(&mut self, object: &Value, key: &Value) -> Result<Value, VmError> {
        if let Some(value) = self.raw_get(object, key) {
            return Ok(value);
        }
        let result = match object.heap().and_then(HeapObject::as_instance) {
            Some(instance) => {
                let getter = instance
                    .class_object()
                    .and_then(|class| class.lookup(&Value::from(META_GET)));
                match getter {
                    Some(getter) => self.call_value(&getter, object, std::slice::from_ref(key)),
                    None => Err(Self::not_found(key)),
                }
            }
            None if object.kind().is_object() => Err(Self::not_found(key)),
            None => Err(VmError::WrongType {
                expected: "table, array, class or instance",
                actual: object.type_name(),
            }),
        };
        result.inspect_err(|err| self.record_error(err))
    }

    /// Read a slot without invoking metamethods.
    pub fn raw_get(&self, object: &Value, key: &Value) -> Option<Value> {
        match object.heap()? {
            HeapObject::Table(table) => table.borrow().get(key).cloned(),
            HeapObject::Array(items) => {
                let items = items.borrow();
                Self::array_index(&items, key).map(|i| items[i].clone())
            }
            HeapObject::Class(class) => class.lookup(key),
            HeapObject::Instance(instance) => {
                let field = instance.fields().get(key).cloned();
                field.or_else(|| instance.class_object().and_then(|class| class.lookup(key)))
            }
            HeapObject::Closure(_) | HeapObject::UserData(_) => None,
        }
    }

    /// Check for a slot without invoking metamethods.
    pub fn has_slot(&self, object: &Value, key: &Value) -> bool {
        self.raw_get(object, key).is_some()
    }

    /// Delete a table or class slot, returning the removed value.
    pub fn delete_slot(&mut self, object: &Value, key: &Value) -> Result<Value, VmError> {
        let removed = match object.heap() {
            Some(HeapObject::Table(table)) => table.borrow_mut().remove(key),
            Some(HeapObject::Class(class)) => class.members_mut().remove(key),
            _ => {
                return Err(VmError::WrongType {
                    expected: "table or class",
                    actual: object.type_name(),
                });
            }
        };
        removed.ok_or_else(|| Self::not_found(key))
    }

    /// Number of entries of an aggregate, or characters of a string.
    pub fn len(&self, object: &Value) -> Result<usize, VmError> {
        match object {
            Value::String(s) => Ok(s.chars().count()),
            Value::Object(object_ref) => match object_ref.heap() {
                HeapObject::Table(table) => Ok(table.borrow().len()),
                HeapObject::Array(items) => Ok(items.borrow().len()),
                HeapObject::Class(class) => Ok(class.members().len()),
                HeapObject::Instance(instance) => Ok(instance.fields().len()),
                _ => Err(VmError::WrongType {
                    expected: "aggregate",
                    actual: object.type_name(),
                }),
            },
            _ => Err(VmError::WrongType {
                expected: "aggregate",
                actual: object.type_name(),
            }),
        }
    }

    /// Snapshot of an aggregate's key/value pairs in iteration order.
    pub fn entries(&self, object: &Value) -> Result<Vec<(Value, Value)>, VmError> {
        let collect = |table: &Table| {
            table
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Vec<_>>()
        };
        match object.heap() {
            Some(HeapObject::Table(table)) => Ok(collect(&table.borrow())),
            Some(HeapObject::Array(items)) => Ok(items
                .borrow()
                .iter()
                .enumerate()
                .map(|(i, v)| (Value::Integer(i as i64), v.clone()))
                .collect()),
            Some(HeapObject::Class(class)) => Ok(collect(&class.members())),
            Some(HeapObject::Instance(instance)) => Ok(collect(&instance.fields())),
            _ => Err(VmError::WrongType {
                expected: "aggregate",
                actual: object.type_name(),
            }),
        }
    }

    // ---------------------------------------------------------------
    // Calls
    // ---------------------------------------------------------------

    /// Call the value below the top `nparams` slots.
    ///
    /// `nparams` counts `this` and must be at least 1. The callee and its
    /// parameters are consumed; the result is pushed when `push_result` is
    /// set.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call(&mut self, nparams: usize, push_result: bool) -> Result<(), VmError> {
        let top = self.top();
        if nparams == 0 || top < nparams + 1 {
            return Err(VmError::StackUnderflow {
                count: nparams + 1,
                top,
            });
        }
        let callee_position = self.stack.len() - nparams - 1;
        let callee = self.stack[callee_position].clone();
        let result = self.invoke(&callee, callee_position + 1, nparams);
        self.stack.truncate(callee_position);
        if self.frames.is_empty() {
            self.flush_deferred();
        }
        match result {
            Ok(value) => {
                if push_result {
                    self.push(value);
                }
                Ok(())
            }
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    fn invoke(&mut self, callee: &Value, base: usize, nparams: usize) -> Result<Value, VmError> {
        let Value::Object(object) = callee else {
            return Err(VmError::NotCallable(callee.type_name()));
        };
        match object.heap() {
            HeapObject::Closure(closure) => {
                if self.frames.len() >= self.config.max_call_depth() {
                    warn!(target: "sqbridge::vm", depth = self.frames.len(), "call depth exceeded");
                    return Err(VmError::StackOverflow(self.frames.len()));
                }
                closure.check(&self.stack[base..base + nparams])?;
                let func = closure.func().clone();
                self.frames.push(Frame {
                    base,
                    closure: object.clone(),
                });
                let returned = func(self);
                let result = match returned {
                    Ok(count) if count > 0 && self.top() > 0 => {
                        Ok(self.stack.last().cloned().unwrap_or_default())
                    }
                    Ok(_) => Ok(Value::Null),
                    Err(err) => Err(err),
                };
                self.frames.pop();
                result
            }
            HeapObject::Class(class) => {
                let instance = self.create_instance(callee)?;
                if let Some(constructor) = class.lookup(&Value::from(CONSTRUCTOR)) {
                    self.stack[base] = instance.clone();
                    self.invoke(&constructor, base, nparams)?;
                }
                Ok(instance)
            }
            other => Err(VmError::NotCallable(other.kind().name())),
        }
    }

    /// Call `callee` with an explicit `this` and arguments.
    pub fn call_value(&mut self, callee: &Value, this: &Value, args: &[Value]) -> Result<Value, VmError> {
        self.push(callee.clone());
        self.push(this.clone());
        for arg in args {
            self.push(arg.clone());
        }
        self.call(args.len() + 1, true)?;
        self.pop_value()
    }

    /// Look up `name` on `object` and call it with `object` as `this`.
    pub fn call_method(&mut self, object: &Value, name: &str, args: &[Value]) -> Result<Value, VmError> {
        let method = self.get_slot(object, &Value::from(name))?;
        self.call_value(&method, object, args)
    }

    /// Call a function stored in the root table with the root table as `this`.
    pub fn call_global(&mut self, name: &str, args: &[Value]) -> Result<Value, VmError> {
        let root = self.root_table();
        self.call_method(&root, name, args)
    }

    /// Free variable `n` of the running native closure.
    pub fn free_variable(&self, n: usize) -> Result<Value, VmError> {
        let frame = self
            .frames
            .last()
            .ok_or_else(|| VmError::IndexNotFound(format!("free variable {n}")))?;
        frame
            .closure
            .heap()
            .as_closure()
            .and_then(|closure| closure.free_vars().get(n).cloned())
            .ok_or_else(|| VmError::IndexNotFound(format!("free variable {n}")))
    }

    /// Number of active native frames.
    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    /// Name of the running native closure.
    pub fn current_function(&self) -> Option<&str> {
        self.frames
            .last()
            .and_then(|frame| frame.closure.heap().as_closure())
            .map(NativeClosure::name)
    }

    /// Copy a value the way script-side `clone` does.
    ///
    /// Tables and arrays are copied shallowly; instances get a fresh
    /// instance of the same class with copied fields, after which the
    /// class's `_cloned` metamethod runs on the copy with the original as
    /// its argument. Everything else is returned as is.
    pub fn clone_value(&mut self, value: &Value) -> Result<Value, VmError> {
        let Some(heap) = value.heap() else {
            return Ok(value.clone());
        };
        match heap {
            HeapObject::Table(table) => {
                let copy = table.borrow().clone();
                Ok(Value::Object(ObjectRef::new(HeapObject::Table(copy.into()))))
            }
            HeapObject::Array(items) => Ok(self.new_array(items.borrow().clone())),
            HeapObject::Instance(instance) => {
                let fields = instance.fields().clone();
                let copy = Value::Object(ObjectRef::new(HeapObject::Instance(InstanceObject::new(
                    instance.class().clone(),
                    fields,
                ))));
                let hook = instance
                    .class_object()
                    .and_then(|class| class.lookup(&Value::from(META_CLONED)));
                if let Some(hook) = hook {
                    self.call_value(&hook, &copy, std::slice::from_ref(value))?;
                }
                Ok(copy)
            }
            _ => Ok(value.clone()),
        }
    }

    /// Render a value as text, using `_tostring` for instances that define it.
    pub fn tostring(&mut self, value: &Value) -> Result<Rc<str>, VmError> {
        let text = match value {
            Value::String(s) => return Ok(s.clone()),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::UserPointer(p) => format!("(userpointer : {p:#x})"),
            Value::Object(object) => {
                let hook = object
                    .heap()
                    .as_instance()
                    .and_then(InstanceObject::class_object)
                    .and_then(|class| class.lookup(&Value::from(META_TOSTRING)));
                match hook {
                    Some(hook) => {
                        let rendered = self.call_value(&hook, value, &[])?;
                        return match rendered {
                            Value::String(s) => Ok(s),
                            other => Err(VmError::WrongType {
                                expected: "string",
                                actual: other.type_name(),
                            }),
                        };
                    }
                    None => format!("({} : {:#x})", object.kind().name(), object.address()),
                }
            }
        };
        Ok(Rc::from(text))
    }

    // ---------------------------------------------------------------
    // Host payloads and type tags
    // ---------------------------------------------------------------

    /// Attach a host payload to an instance, returning the previous one.
    pub fn set_instance_payload(
        &self,
        instance: &Value,
        payload: Box<dyn Any>,
    ) -> Result<Option<Box<dyn Any>>, VmError> {
        Ok(Self::expect_instance(instance)?.set_payload(payload))
    }

    /// Install the finalizer run with the payload when the object dies.
    pub fn set_release_hook(&self, object: &Value, hook: Option<ReleaseHook>) -> Result<(), VmError> {
        match object.heap() {
            Some(HeapObject::Instance(instance)) => instance.set_release_hook(hook),
            Some(HeapObject::UserData(data)) => data.set_release_hook(hook),
            _ => {
                return Err(VmError::WrongType {
                    expected: "instance or userdata",
                    actual: object.type_name(),
                });
            }
        }
        Ok(())
    }

    pub fn set_type_tag(&self, object: &Value, tag: TypeHash) -> Result<(), VmError> {
        match object.heap() {
            Some(HeapObject::Class(class)) => class.set_type_tag(tag),
            Some(HeapObject::UserData(data)) => data.set_type_tag(tag),
            _ => {
                return Err(VmError::WrongType {
                    expected: "class or userdata",
                    actual: object.type_name(),
                });
            }
        }
        Ok(())
    }

    /// Type tag of a class, of an instance's class, or of user data.
    pub fn type_tag(&self, value: &Value) -> Option<TypeHash> {
        match value.heap()? {
            HeapObject::Class(class) => class.type_tag(),
            HeapObject::Instance(instance) => instance.type_tag(),
            HeapObject::UserData(data) => data.type_tag(),
            _ => None,
        }
    }

    /// Check whether a class or instance carries `tag` anywhere in its class chain.
    pub fn instance_of_tag(&self, value: &Value, tag: TypeHash) -> bool {
        match value.heap() {
            Some(HeapObject::Class(class)) => class.has_tag(tag),
            Some(HeapObject::Instance(instance)) => {
                instance.class_object().is_some_and(|class| class.has_tag(tag))
            }
            Some(HeapObject::UserData(data)) => data.type_tag() == Some(tag),
            _ => false,
        }
    }

    // ---------------------------------------------------------------
    // Errors
    // ---------------------------------------------------------------

    /// Record a script error and return it for propagation.
    pub fn raise_error(&mut self, message: impl Into<String>) -> VmError {
        let err = VmError::Raised(message.into());
        self.last_error = Some(err.clone());
        err
    }

    fn record_error(&mut self, err: &VmError) {
        self.last_error = Some(err.clone());
    }

    pub fn last_error(&self) -> Option<&VmError> {
        self.last_error.as_ref()
    }

    pub fn reset_error(&mut self) {
        self.last_error = None;
    }

    // ---------------------------------------------------------------
    // Deferred releases
    // ---------------------------------------------------------------

    /// Keep `value` alive until the outermost call returns.
    pub fn defer_release(&mut self, value: Value) {
        self.deferred.push(value);
    }

    pub fn pending_releases(&self) -> usize {
        self.deferred.len()
    }

    pub fn flush_deferred(&mut self) {
        if !self.deferred.is_empty() {
            debug!(target: "sqbridge::vm", count = self.deferred.len(), "flushing deferred releases");
            self.deferred.clear();
        }
    }

    // ---------------------------------------------------------------
    // Host state and compiler hook
    // ---------------------------------------------------------------

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn set_compiler(&mut self, compiler: impl ScriptCompiler + 'static) {
        self.compiler = Some(Box::new(compiler));
    }

    pub fn has_compiler(&self) -> bool {
        self.compiler.is_some()
    }

    /// Compile source text with the installed compiler.
    pub fn compile_buffer(&mut self, source: &str, source_name: &str) -> Result<Value, VmError> {
        let mut compiler = self.compiler.take().ok_or(VmError::NoCompiler)?;
        debug!(target: "sqbridge::vm", source_name, "compiling");
        let result = compiler.compile(self, source, source_name);
        self.compiler = Some(compiler);
        result.inspect_err(|err| self.record_error(err))
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("id", &self.id)
            .field("stack_depth", &self.stack.len())
            .field("call_depth", &self.frames.len())
            .field("last_error", &self.last_error)
            .finish()
    }
}
