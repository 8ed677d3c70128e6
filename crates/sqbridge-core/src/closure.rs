//! Native closures: host callables the VM can invoke.
//!
//! A native closure receives the VM with a fresh frame whose index 1 is
//! `this` and whose indices 2.. are the arguments. It returns the number of
//! values it left on top of the stack as its result (0 or 1).

use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;

use crate::error::VmError;
use crate::value::{Value, ValueKind};
use crate::vm::Vm;

/// Native callable signature.
pub type NativeFn = Rc<dyn Fn(&mut Vm) -> Result<usize, VmError>>;

/// Parameter count check applied before a native closure runs.
///
/// Counts include `this`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamCheck {
    #[default]
    Any,
    Exact(usize),
    AtLeast(usize),
}

impl ParamCheck {
    /// Build from a signed count: negative means "at least |n|".
    pub fn from_count(count: isize) -> Self {
        match count {
            0 => ParamCheck::Any,
            n if n < 0 => ParamCheck::AtLeast(n.unsigned_abs()),
            n => ParamCheck::Exact(n as usize),
        }
    }

    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            ParamCheck::Any => true,
            ParamCheck::Exact(n) => count == n,
            ParamCheck::AtLeast(n) => count >= n,
        }
    }
}

bitflags! {
    /// Set of value kinds accepted for one parameter position.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeMask: u16 {
        const NULL = 1 << 0;
        const BOOL = 1 << 1;
        const INTEGER = 1 << 2;
        const FLOAT = 1 << 3;
        const STRING = 1 << 4;
        const USER_POINTER = 1 << 5;
        const TABLE = 1 << 6;
        const ARRAY = 1 << 7;
        const CLASS = 1 << 8;
        const INSTANCE = 1 << 9;
        const CLOSURE = 1 << 10;
        const USER_DATA = 1 << 11;

        const NUMBER = Self::INTEGER.bits() | Self::FLOAT.bits();
        const ANY = (1 << 12) - 1;
    }
}

impl TypeMask {
    pub fn of(kind: ValueKind) -> Self {
        TypeMask::from_bits_truncate(1 << u8::from(kind))
    }

    pub fn accepts(&self, kind: ValueKind) -> bool {
        self.contains(TypeMask::of(kind))
    }

    /// Parse a compact type mask string, one entry per parameter.
    ///
    /// Letters: `o` null, `b` bool, `i` integer, `f` float, `n` number,
    /// `s` string, `p` user pointer, `t` table, `a` array, `y` class,
    /// `x` instance, `c` closure, `u` user data, `.` any. Alternatives for
    /// the same parameter are joined with `|`.
    pub fn parse(spec: &str) -> Result<Vec<TypeMask>, VmError> {
        let mut masks = Vec::new();
        let mut chars = spec.chars().peekable();
        while let Some(c) = chars.next() {
            let mut mask = Self::letter(c).ok_or_else(|| VmError::InvalidTypeMask(spec.to_string()))?;
            while chars.peek() == Some(&'|') {
                chars.next();
                let next = chars
                    .next()
                    .and_then(Self::letter)
                    .ok_or_else(|| VmError::InvalidTypeMask(spec.to_string()))?;
                mask |= next;
            }
            masks.push(mask);
        }
        Ok(masks)
    }

    fn letter(c: char) -> Option<TypeMask> {
        Some(match c {
            'o' => TypeMask::NULL,
            'b' => TypeMask::BOOL,
            'i' => TypeMask::INTEGER,
            'f' => TypeMask::FLOAT,
            'n' => TypeMask::NUMBER,
            's' => TypeMask::STRING,
            'p' => TypeMask::USER_POINTER,
            't' => TypeMask::TABLE,
            'a' => TypeMask::ARRAY,
            'y' => TypeMask::CLASS,
            'x' => TypeMask::INSTANCE,
            'c' => TypeMask::CLOSURE,
            'u' => TypeMask::USER_DATA,
            '.' => TypeMask::ANY,
            _ => return None,
        })
    }

    /// Names of the accepted kinds joined with `|`.
    pub fn describe(&self) -> String {
        if *self == TypeMask::ANY {
            return "any".to_string();
        }
        (0..ValueKind::COUNT)
            .filter_map(|raw| ValueKind::try_from(raw).ok())
            .filter(|kind| self.accepts(*kind))
            .map(ValueKind::name)
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// A host function object living in the VM's object space.
#[derive(Clone)]
pub struct NativeClosure {
    name: Rc<str>,
    func: NativeFn,
    free_vars: Vec<Value>,
    params: ParamCheck,
    typemask: Vec<TypeMask>,
}

impl NativeClosure {
    pub fn new(name: impl Into<Rc<str>>, func: NativeFn) -> Self {
        Self {
            name: name.into(),
            func,
            free_vars: Vec::new(),
            params: ParamCheck::Any,
            typemask: Vec::new(),
        }
    }

    /// Create from a plain closure.
    pub fn from_fn<F>(name: impl Into<Rc<str>>, f: F) -> Self
    where
        F: Fn(&mut Vm) -> Result<usize, VmError> + 'static,
    {
        Self::new(name, Rc::new(f))
    }

    pub fn with_free_vars(mut self, free_vars: Vec<Value>) -> Self {
        self.free_vars = free_vars;
        self
    }

    pub fn with_params(mut self, params: ParamCheck) -> Self {
        self.params = params;
        self
    }

    pub fn with_typemask(mut self, typemask: Vec<TypeMask>) -> Self {
        self.typemask = typemask;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn func(&self) -> &NativeFn {
        &self.func
    }

    pub fn free_vars(&self) -> &[Value] {
        &self.free_vars
    }

    pub fn params(&self) -> ParamCheck {
        self.params
    }

    /// Validate a call's parameters (including `this`).
    pub(crate) fn check(&self, args: &[Value]) -> Result<(), VmError> {
        if !self.params.accepts(args.len()) {
            return Err(VmError::WrongParameterCount);
        }
        for (position, (mask, value)) in self.typemask.iter().zip(args).enumerate() {
            if !mask.accepts(value.kind()) {
                return Err(VmError::InvalidParameterType {
                    index: position + 1,
                    actual: value.type_name(),
                    expected: mask.describe(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for NativeClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeClosure")
            .field("name", &self.name)
            .field("free_vars", &self.free_vars.len())
            .field("params", &self.params)
            .finish()
    }
}
