//! Strings and characters.

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use sqbridge_core::{Value, Vm};

use super::{FromScript, ToScript};
use crate::config::BindingConfig;
use crate::error::{BindError, BindResult};
use crate::format;

/// Read the text of a slot, converting non-strings when string coercion is
/// enabled.
fn read_text(vm: &mut Vm, index: isize) -> BindResult<Rc<str>> {
    let value = vm.value_at(index)?;
    match value {
        Value::String(s) => Ok(s),
        other if BindingConfig::current(vm).coerce_strings => Ok(vm.tostring(&other)?),
        other => Err(BindError::mismatch("string", other.type_name())),
    }
}

impl FromScript for String {
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        read_text(vm, index).map(|s| s.to_string())
    }
}

impl ToScript for String {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        vm.push(Value::from(self));
        Ok(())
    }
}

impl ToScript for &str {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        vm.push(Value::from(self));
        Ok(())
    }
}

impl FromScript for Rc<str> {
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        read_text(vm, index)
    }
}

impl ToScript for Rc<str> {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        vm.push(Value::String(self));
        Ok(())
    }
}

/// A one-character string, or an integer code point.
impl FromScript for char {
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        let value = vm.get(index)?;
        let ch = match value {
            Value::String(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) => Some(ch),
                    _ => None,
                }
            }
            Value::Integer(i) => u32::try_from(*i).ok().and_then(char::from_u32),
            _ => None,
        };
        ch.ok_or_else(|| BindError::mismatch("char", value.type_name()))
    }
}

impl ToScript for char {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        vm.push(Value::from(self.to_string()));
        Ok(())
    }
}

// ============================================================================
// ScriptStr
// ============================================================================

/// Text read from a slot, holding a strong reference to the value it came
/// from for as long as the text is alive.
#[derive(Clone)]
pub struct ScriptStr {
    text: Rc<str>,
    source: Value,
}

impl ScriptStr {
    /// The value the text was read from.
    pub fn source(&self) -> &Value {
        &self.source
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl Deref for ScriptStr {
    type Target = str;

    fn deref(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for ScriptStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for ScriptStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.text, f)
    }
}

impl FromScript for ScriptStr {
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        let source = vm.value_at(index)?;
        let text = read_text(vm, index)?;
        Ok(ScriptStr { text, source })
    }
}

impl ToScript for ScriptStr {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        vm.push(Value::String(self.text));
        Ok(())
    }
}

// ============================================================================
// FormatStr
// ============================================================================

/// A string parameter that formats surplus call arguments.
///
/// As the last parameter of a bound function, a `FormatStr` accepts any
/// number of extra script arguments. When extras are supplied, the declared
/// argument is used as a printf-style format string and the extras as its
/// parameters; otherwise it is read as a plain string.
///
/// ```ignore
/// table.func("log", |level: i32, message: FormatStr| println!("{level}: {message}"))?;
/// // script: log(1, "%s has %d items", "cart", 3)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormatStr(pub String);

impl FormatStr {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for FormatStr {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormatStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromScript for FormatStr {
    const AUTO_FORMAT: bool = true;

    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        String::from_script(vm, index).map(FormatStr)
    }

    fn from_script_tail(vm: &mut Vm, index: isize, top: usize) -> BindResult<Self> {
        let extras = usize::try_from(index)
            .ok()
            .filter(|&position| top > position)
            .map(|position| top - position);
        let Some(extras) = extras else {
            return Self::from_script(vm, index);
        };
        let pattern = read_text(vm, index)?;
        let args = (1..=extras as isize)
            .map(|offset| vm.value_at(index + offset))
            .collect::<Result<Vec<_>, _>>()?;
        format::format(vm, &pattern, &args).map(FormatStr)
    }
}

impl ToScript for FormatStr {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        self.0.to_script(vm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_round_trip() {
        let mut vm = Vm::new();
        "hello".to_script(&mut vm).unwrap();
        assert_eq!(String::from_script(&mut vm, -1).unwrap(), "hello");
        let shared = Rc::<str>::from_script(&mut vm, -1).unwrap();
        assert_eq!(&*shared, "hello");
    }

    #[test]
    fn non_strings_use_tostring() {
        let mut vm = Vm::new();
        vm.push(Value::Integer(12));
        assert_eq!(String::from_script(&mut vm, -1).unwrap(), "12");

        BindingConfig::default().with_string_coercion(false).apply(&mut vm);
        assert_eq!(
            String::from_script(&mut vm, -1),
            Err(BindError::mismatch("string", "integer"))
        );
    }

    #[test]
    fn chars_accept_single_characters_and_code_points() {
        let mut vm = Vm::new();
        'λ'.to_script(&mut vm).unwrap();
        assert_eq!(char::from_script(&mut vm, -1).unwrap(), 'λ');
        vm.push(Value::Integer(65));
        assert_eq!(char::from_script(&mut vm, -1).unwrap(), 'A');
        vm.push(Value::from("ab"));
        assert!(char::from_script(&mut vm, -1).is_err());
    }

    #[test]
    fn script_str_keeps_source() {
        let mut vm = Vm::new();
        vm.push(Value::from("kept"));
        let text = ScriptStr::from_script(&mut vm, -1).unwrap();
        vm.pop(1).unwrap();
        assert_eq!(&*text, "kept");
        assert_eq!(text.source().as_str(), Some("kept"));
    }

    #[test]
    fn format_str_formats_surplus_arguments() {
        let mut vm = Vm::new();
        vm.push(Value::from("%s=%d"));
        vm.push(Value::from("x"));
        vm.push(Value::Integer(4));
        let formatted = FormatStr::from_script_tail(&mut vm, 1, 3).unwrap();
        assert_eq!(formatted.as_str(), "x=4");

        let plain = FormatStr::from_script_tail(&mut vm, 1, 1).unwrap();
        assert_eq!(plain.as_str(), "%s=%d");
    }
}
