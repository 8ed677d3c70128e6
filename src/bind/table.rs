//! Table, constant table and enumeration builders.

use sqbridge_core::{Value, ValueKind, Vm, VmError};
use tracing::debug;

use super::{bind_function, bind_overload, bind_raw, new_slot};
use crate::error::{BindError, BindResult};
use crate::forward::NativeFunction;
use crate::handle::Object;
use crate::marshal::ToScript;

/// Push `value` and take the resulting slot value back off the stack.
pub(crate) fn to_value<V: ToScript>(vm: &mut Vm, value: V) -> BindResult<Value> {
    value.to_script(vm)?;
    Ok(vm.pop_value()?)
}

/// Builder over a script table.
///
/// Every call writes through to the table immediately.
///
/// # Example
///
/// ```
/// use sqbridge::{Table, Value, Vm};
///
/// let mut vm = Vm::new();
/// Table::root(&mut vm)
///     .func("Add", |a: i32, b: i32| a + b)?
///     .set_value("version", 3)?;
///
/// let sum = vm.call_global("Add", &[Value::Integer(2), Value::Integer(3)])?;
/// assert_eq!(sum, Value::Integer(5));
/// # Ok::<(), sqbridge::BindError>(())
/// ```
#[derive(Debug)]
pub struct Table<'vm> {
    vm: &'vm mut Vm,
    object: Value,
}

impl<'vm> Table<'vm> {
    /// A new, empty table.
    pub fn new(vm: &'vm mut Vm) -> Self {
        let object = vm.new_table();
        Self { vm, object }
    }

    /// The VM's root table.
    pub fn root(vm: &'vm mut Vm) -> Self {
        let object = vm.root_table();
        Self { vm, object }
    }

    /// Wrap an existing table.
    pub fn from_value(vm: &'vm mut Vm, object: Value) -> BindResult<Self> {
        if object.kind() != ValueKind::Table {
            return Err(BindError::mismatch("table", object.type_name()));
        }
        Ok(Self { vm, object })
    }

    /// Bind a function under `name`.
    ///
    /// The supplied argument count must match the function's parameter
    /// list, unless its last parameter is a [`FormatStr`](crate::FormatStr).
    pub fn func<M, F>(self, name: &str, f: F) -> BindResult<Self>
    where
        M: 'static,
        F: NativeFunction<M>,
    {
        bind_function(self.vm, &self.object, name, f)?;
        Ok(self)
    }

    /// Bind one overload of `name`, selected by argument count.
    ///
    /// ```ignore
    /// Table::root(&mut vm)
    ///     .overload("area", |side: f64| side * side)?
    ///     .overload("area", |w: f64, h: f64| w * h)?;
    /// ```
    pub fn overload<M, F>(self, name: &str, f: F) -> BindResult<Self>
    where
        M: 'static,
        F: NativeFunction<M>,
    {
        bind_overload(self.vm, &self.object, name, f)?;
        Ok(self)
    }

    /// Bind a function under an integer key.
    pub fn func_at<M, F>(self, index: i64, f: F) -> BindResult<Self>
    where
        M: 'static,
        F: NativeFunction<M>,
    {
        let name = index.to_string();
        let closure = self.vm.new_closure(crate::forward::native_closure(&name, f, true));
        self.vm.new_slot(&self.object, Value::Integer(index), closure)?;
        Ok(self)
    }

    /// Bind a raw VM closure.
    ///
    /// `params` counts `this`; negative means "at least", zero skips the
    /// check. `typemask` uses the compact letter syntax of
    /// [`TypeMask::parse`](sqbridge_core::TypeMask::parse).
    pub fn squirrel_func<F>(self, name: &str, f: F, params: isize, typemask: Option<&str>) -> BindResult<Self>
    where
        F: Fn(&mut Vm) -> Result<usize, VmError> + 'static,
    {
        bind_raw(self.vm, &self.object, name, f, params, typemask)?;
        Ok(self)
    }

    /// Store a value under `name`.
    pub fn set_value<V: ToScript>(self, name: &str, value: V) -> BindResult<Self> {
        let value = to_value(self.vm, value)?;
        new_slot(self.vm, &self.object, name, value)?;
        Ok(self)
    }

    /// Store a value under an integer key.
    pub fn set_index<V: ToScript>(self, index: i64, value: V) -> BindResult<Self> {
        let value = to_value(self.vm, value)?;
        self.vm.new_slot(&self.object, Value::Integer(index), value)?;
        Ok(self)
    }

    /// Store a nested table, class or any other script value under `name`.
    pub fn bind(self, name: &str, value: Value) -> BindResult<Self> {
        new_slot(self.vm, &self.object, name, value)?;
        Ok(self)
    }

    pub fn value(&self) -> &Value {
        &self.object
    }

    pub fn vm(&mut self) -> &mut Vm {
        self.vm
    }

    pub fn into_value(self) -> Value {
        self.object
    }

    /// Handle to the table, tied to this VM.
    pub fn into_object(self) -> Object {
        Object::from_value(self.vm, self.object)
    }
}

/// Builder over the VM's constant table.
#[derive(Debug)]
pub struct ConstTable<'vm> {
    vm: &'vm mut Vm,
    object: Value,
}

impl<'vm> ConstTable<'vm> {
    pub fn new(vm: &'vm mut Vm) -> Self {
        let object = vm.const_table();
        Self { vm, object }
    }

    /// Define the constant `name`.
    pub fn const_value<V: ToScript>(self, name: &str, value: V) -> BindResult<Self> {
        let value = to_value(self.vm, value)?;
        new_slot(self.vm, &self.object, name, value)?;
        debug!(target: "sqbridge::registry", name, "bound constant");
        Ok(self)
    }

    /// Start an enumeration stored in this constant table.
    pub fn enumeration(self, name: &str) -> Enumeration<'vm> {
        Enumeration::new(self.vm, name)
    }
}

/// Builder for a named group of integer constants.
///
/// # Example
///
/// ```
/// use sqbridge::{Enumeration, Value, Vm};
///
/// let mut vm = Vm::new();
/// // Values: North=0, East=1, South=10, West=11
/// Enumeration::new(&mut vm, "Direction")
///     .auto_value("North")?
///     .auto_value("East")?
///     .value("South", 10)?
///     .auto_value("West")?
///     .build()?;
///
/// let consts = vm.const_table();
/// let direction = vm.raw_get(&consts, &Value::from("Direction")).unwrap();
/// assert_eq!(vm.raw_get(&direction, &Value::from("West")), Some(Value::Integer(11)));
/// # Ok::<(), sqbridge::BindError>(())
/// ```
#[derive(Debug)]
pub struct Enumeration<'vm> {
    vm: &'vm mut Vm,
    name: String,
    values: Vec<(String, i64)>,
    next_value: i64,
}

impl<'vm> Enumeration<'vm> {
    pub fn new(vm: &'vm mut Vm, name: &str) -> Self {
        Self {
            vm,
            name: name.to_string(),
            values: Vec::new(),
            next_value: 0,
        }
    }

    /// Add an entry with an explicit value.
    ///
    /// The next auto-increment value becomes `value + 1`.
    pub fn value(mut self, name: &str, value: i64) -> BindResult<Self> {
        self.check_unique(name)?;
        self.values.push((name.to_string(), value));
        self.next_value = value.wrapping_add(1);
        Ok(self)
    }

    /// Add an entry with the next auto-incremented value.
    pub fn auto_value(self, name: &str) -> BindResult<Self> {
        let value = self.next_value;
        self.value(name, value)
    }

    fn check_unique(&self, name: &str) -> BindResult<()> {
        if self.values.iter().any(|(existing, _)| existing == name) {
            return Err(BindError::DuplicateRegistration(format!("{}.{}", self.name, name)));
        }
        Ok(())
    }

    /// Store the enumeration in the constant table.
    pub fn build(self) -> BindResult<Value> {
        let table = self.vm.new_table();
        for (name, value) in &self.values {
            new_slot(self.vm, &table, name, Value::Integer(*value))?;
        }
        let consts = self.vm.const_table();
        new_slot(self.vm, &consts, &self.name, table.clone())?;
        debug!(target: "sqbridge::registry", name = %self.name, entries = self.values.len(), "bound enumeration");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::errors;
    use crate::marshal::FormatStr;

    #[test]
    fn functions_and_values_on_root() {
        let mut vm = Vm::new();
        Table::root(&mut vm)
            .func("Add", |a: i32, b: i32| a + b)
            .unwrap()
            .set_value("name", "bridge")
            .unwrap();

        let sum = vm.call_global("Add", &[Value::Integer(2), Value::Integer(3)]).unwrap();
        assert_eq!(sum, Value::Integer(5));
        let root = vm.root_table();
        assert_eq!(vm.raw_get(&root, &Value::from("name")).unwrap().as_str(), Some("bridge"));
    }

    #[test]
    fn nested_tables_and_index_keys() {
        let mut vm = Vm::new();
        let math = Table::new(&mut vm)
            .func_at(0, |a: i64| a * 2)
            .unwrap()
            .set_index(1, 1.5f64)
            .unwrap()
            .into_value();
        Table::root(&mut vm).bind("math", math.clone()).unwrap();

        let doubled = vm.raw_get(&math, &Value::Integer(0)).unwrap();
        assert_eq!(
            vm.call_value(&doubled, &math, &[Value::Integer(21)]).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(vm.raw_get(&math, &Value::Integer(1)), Some(Value::Float(1.5)));
    }

    #[test]
    fn overloads_share_a_name() {
        let mut vm = Vm::new();
        Table::root(&mut vm)
            .overload("pick", || 0i32)
            .unwrap()
            .overload("pick", |a: i32| a)
            .unwrap()
            .overload("pick", |a: i32, b: i32| a + b)
            .unwrap();

        assert_eq!(vm.call_global("pick", &[]).unwrap(), Value::Integer(0));
        assert_eq!(vm.call_global("pick", &[Value::Integer(4)]).unwrap(), Value::Integer(4));
        assert_eq!(
            vm.call_global("pick", &[Value::Integer(4), Value::Integer(5)]).unwrap(),
            Value::Integer(9)
        );
        let err = vm
            .call_global("pick", &[Value::Integer(1), Value::Integer(2), Value::Integer(3)])
            .unwrap_err();
        assert_eq!(err.to_string(), "wrong number of parameters");
    }

    #[test]
    fn raw_closures_check_params_and_types() {
        let mut vm = Vm::new();
        Table::root(&mut vm)
            .squirrel_func(
                "count",
                |vm| {
                    let n = vm.top() as i64 - 1;
                    vm.push(Value::Integer(n));
                    Ok(1)
                },
                -2,
                Some(".n"),
            )
            .unwrap();

        assert_eq!(
            vm.call_global("count", &[Value::Integer(1), Value::Integer(2)]).unwrap(),
            Value::Integer(2)
        );
        assert!(vm.call_global("count", &[]).is_err());
        assert!(vm.call_global("count", &[Value::from("x")]).is_err());
        assert!(Table::root(&mut vm).squirrel_func("bad", |_| Ok(0), 0, Some("q")).is_err());
    }

    #[test]
    fn formatted_tail_argument() {
        let mut vm = Vm::new();
        Table::root(&mut vm)
            .func("describe", |text: FormatStr| text.into_string())
            .unwrap();
        let args = [Value::from("%s:%03d"), Value::from("id"), Value::Integer(7)];
        assert_eq!(vm.call_global("describe", &args).unwrap().as_str(), Some("id:007"));
        assert!(!errors::occurred(&vm));
    }

    #[test]
    fn constants_and_enumerations() {
        let mut vm = Vm::new();
        ConstTable::new(&mut vm)
            .const_value("PI", 3.25f64)
            .unwrap()
            .enumeration("Color")
            .value("Red", 1)
            .unwrap()
            .auto_value("Green")
            .unwrap()
            .build()
            .unwrap();

        let consts = vm.const_table();
        assert_eq!(vm.raw_get(&consts, &Value::from("PI")), Some(Value::Float(3.25)));
        let color = vm.raw_get(&consts, &Value::from("Color")).unwrap();
        assert_eq!(vm.raw_get(&color, &Value::from("Green")), Some(Value::Integer(2)));
    }

    #[test]
    fn duplicate_enumeration_entry_fails() {
        let mut vm = Vm::new();
        let result = Enumeration::new(&mut vm, "E").auto_value("A").unwrap().auto_value("A");
        assert!(matches!(result, Err(BindError::DuplicateRegistration(_))));
    }

    #[test]
    fn from_value_requires_a_table() {
        let mut vm = Vm::new();
        assert!(Table::from_value(&mut vm, Value::Integer(1)).is_err());
        let table = vm.new_table();
        assert!(Table::from_value(&mut vm, table).is_ok());
    }
}
