//! Callable handles with typed calls from the host.

use sqbridge_core::Vm;
use tracing::debug;

use super::Object;
use crate::error::{BindResult, errors};
use crate::marshal::{FromScript, ScriptArgs};

/// A script callable together with the environment it is called on.
///
/// # Example
///
/// ```
/// use sqbridge::{Function, Table, Vm};
///
/// let mut vm = Vm::new();
/// Table::root(&mut vm).func("add", |a: i32, b: i32| a + b)?;
///
/// let add = Function::global(&mut vm, "add")?;
/// assert_eq!(add.call::<i32, _>(&mut vm, (2, 3))?, 5);
/// # Ok::<(), sqbridge::BindError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Function {
    env: Object,
    func: Object,
}

impl Function {
    pub fn new(env: Object, func: Object) -> Self {
        Self { env, func }
    }

    /// Look `name` up on `env` and call it with `env` as `this`.
    pub fn from_slot(vm: &mut Vm, env: &Object, name: &str) -> BindResult<Self> {
        let func = env.get_slot(vm, name)?;
        Ok(Self::new(env.clone(), func))
    }

    /// A function stored in the root table.
    pub fn global(vm: &mut Vm, name: &str) -> BindResult<Self> {
        let root = Object::from_value(vm, vm.root_table());
        Self::from_slot(vm, &root, name)
    }

    pub fn env(&self) -> &Object {
        &self.env
    }

    pub fn func(&self) -> &Object {
        &self.func
    }

    pub fn is_null(&self) -> bool {
        self.func.is_null()
    }

    /// Call with `args` and convert the result to `R`.
    ///
    /// Failures are recorded for [`errors::occurred`], including a result
    /// that does not convert to `R`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call<R, Args>(&self, vm: &mut Vm, args: Args) -> BindResult<R>
    where
        R: FromScript,
        Args: ScriptArgs,
    {
        self.invoke(vm, args, |vm| R::from_script(vm, -1))
            .map_err(|err| errors::report(vm, err))
    }

    /// Call with `args`, discarding the result.
    pub fn execute<Args: ScriptArgs>(&self, vm: &mut Vm, args: Args) -> BindResult<()> {
        self.invoke(vm, args, |_| Ok(()))
            .map_err(|err| errors::report(vm, err))
    }

    fn invoke<R, Args, F>(&self, vm: &mut Vm, args: Args, read: F) -> BindResult<R>
    where
        Args: ScriptArgs,
        F: FnOnce(&mut Vm) -> BindResult<R>,
    {
        self.env.check_context(vm)?;
        self.func.check_context(vm)?;
        let mut guard = vm.guard();
        guard.push(self.func.value());
        guard.push(self.env.value());
        args.push_all(&mut guard)?;
        guard.call(Args::COUNT + 1, true)?;
        read(&mut guard)
    }

    /// Release both parts. Calling it again is a no-op.
    pub fn release(&mut self) {
        self.env.release();
        self.func.release();
    }

    /// Release both parts, handing the environment to the VM's deferred
    /// release queue if this handle holds its last reference.
    ///
    /// Use this from inside native calls, where finalizing the environment
    /// in place could destroy an object that is still in use.
    pub fn release_gently(&mut self, vm: &mut Vm) {
        let env = self.env.take();
        if env.is_owned() && env.ref_count() <= 1 {
            debug!(target: "sqbridge::vm", "deferring release of function environment");
            vm.defer_release(env.value());
        }
        drop(env);
        self.func.release();
    }
}

impl FromScript for Function {
    /// The callable at `index`, with the root table as environment.
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        let func = Object::from_stack(vm, index)?;
        let env = Object::from_value(vm, vm.root_table());
        Ok(Self::new(env, func))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Table;
    use crate::config::BindingConfig;
    use crate::error::BindError;

    #[test]
    fn typed_call_and_execute() {
        let mut vm = Vm::new();
        Table::root(&mut vm)
            .func("mul", |a: i64, b: i64| a * b)
            .unwrap()
            .func("noop", || {})
            .unwrap();

        let mul = Function::global(&mut vm, "mul").unwrap();
        assert_eq!(mul.call::<i64, _>(&mut vm, (6i64, 7i64)).unwrap(), 42);
        Function::global(&mut vm, "noop")
            .unwrap()
            .execute(&mut vm, ())
            .unwrap();
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn failed_calls_keep_the_stack_balanced() {
        let mut vm = Vm::new();
        Table::root(&mut vm).func("mul", |a: i64, b: i64| a * b).unwrap();
        let mul = Function::global(&mut vm, "mul").unwrap();

        let err = mul.call::<i64, _>(&mut vm, (1i64,)).unwrap_err();
        assert!(matches!(err, BindError::Vm(_)));
        assert!(mul.call::<bool, _>(&mut vm, (1i64, 2i64)).unwrap());

        BindingConfig::default().with_number_coercion(false).apply(&mut vm);
        let err = mul.call::<bool, _>(&mut vm, (1i64, 2i64)).unwrap_err();
        assert!(matches!(err, BindError::TypeMismatch { .. }));
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn failed_calls_are_visible_to_the_error_query() {
        let mut vm = Vm::new();
        Table::root(&mut vm)
            .func("name", || "text".to_string())
            .unwrap()
            .func("mul", |a: i64, b: i64| a * b)
            .unwrap();
        let name = Function::global(&mut vm, "name").unwrap();
        assert!(!errors::occurred(&vm));

        let err = name.call::<i64, _>(&mut vm, ()).unwrap_err();
        assert!(matches!(err, BindError::TypeMismatch { .. }));
        assert!(errors::occurred(&vm));
        assert_eq!(errors::message(&vm), Some(err.to_string()));

        errors::clear(&mut vm);
        let mul = Function::global(&mut vm, "mul").unwrap();
        assert!(mul.execute(&mut vm, (1i64,)).is_err());
        assert_eq!(
            errors::last(&vm),
            Some(BindError::ArgumentCountMismatch { expected: 2, actual: 1 })
        );
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn missing_global_fails() {
        let mut vm = Vm::new();
        assert!(Function::global(&mut vm, "nope").is_err());
    }

    #[test]
    fn release_gently_defers_the_last_environment_reference() {
        let mut vm = Vm::new();
        let env = vm.new_table();
        let func = vm.new_closure(sqbridge_core::NativeClosure::from_fn("f", |_vm| Ok(0)));
        let mut function = Function::new(Object::from_value(&vm, env), Object::from_value(&vm, func));

        function.release_gently(&mut vm);
        assert!(function.is_null());
        assert!(function.env().is_null());
        assert_eq!(vm.pending_releases(), 1);
        vm.flush_deferred();
        assert_eq!(vm.pending_releases(), 0);
    }

    #[test]
    fn release_gently_drops_shared_environments_in_place() {
        let mut vm = Vm::new();
        let env = vm.new_table();
        let mut function = Function::new(Object::from_value(&vm, env.clone()), Object::null());
        function.release_gently(&mut vm);
        assert_eq!(vm.pending_releases(), 0);
        assert_eq!(env.ref_count(), 1);
    }
}
