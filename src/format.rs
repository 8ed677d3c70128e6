//! printf-style formatting of script values.
//!
//! Supports the flags `- + space # 0`, width, precision and the conversions
//! `d i u x X o c s f F e E g G` plus `%%`. C length modifiers (`h l L q j
//! z t`) are accepted and ignored. `%s` renders any value through the VM's
//! `tostring`; numeric conversions accept integers and floats.

use std::iter::{Peekable, repeat_n};
use std::str::Chars;

use sqbridge_core::{Value, Vm};

use crate::config::BindingConfig;
use crate::error::{BindError, BindResult};

#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    left: bool,
    plus: bool,
    space: bool,
    alternate: bool,
    zero: bool,
}

#[derive(Debug, Clone, Copy)]
struct Spec {
    flags: Flags,
    width: Option<usize>,
    precision: Option<usize>,
    conversion: char,
}

/// Format `args` according to the printf-style `format` string.
///
/// Fails when the string needs more arguments than given, when an argument
/// does not fit its conversion, or when the result grows past
/// [`BindingConfig::max_format_length`]. Surplus arguments are ignored.
///
/// ```
/// use sqbridge::{Value, Vm};
///
/// let mut vm = Vm::new();
/// let text = sqbridge::format::format(&mut vm, "%s:%03d", &[Value::from("id"), Value::Integer(7)])?;
/// assert_eq!(text, "id:007");
/// # Ok::<(), sqbridge::BindError>(())
/// ```
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn format(vm: &mut Vm, format: &str, args: &[Value]) -> BindResult<String> {
    let limit = BindingConfig::current(vm).max_format_length;
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    let mut args = args.iter();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.next_if_eq(&'%').is_some() {
            out.push('%');
            continue;
        }
        let spec = parse_spec(&mut chars, limit)?;
        let arg = args
            .next()
            .ok_or_else(|| BindError::Format("not enough parameters for the given format string".into()))?;
        render(vm, &mut out, &spec, arg)?;
        if out.len() > limit {
            return Err(BindError::Format(format!("formatted string exceeds {limit} bytes")));
        }
    }
    Ok(out)
}

fn parse_number(chars: &mut Peekable<Chars<'_>>) -> Option<usize> {
    let mut n: usize = 0;
    let mut any = false;
    while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
        chars.next();
        any = true;
        n = n.saturating_mul(10).saturating_add(digit as usize);
    }
    any.then_some(n)
}

fn parse_spec(chars: &mut Peekable<Chars<'_>>, limit: usize) -> BindResult<Spec> {
    let mut flags = Flags::default();
    loop {
        match chars.peek() {
            Some('-') => flags.left = true,
            Some('+') => flags.plus = true,
            Some(' ') => flags.space = true,
            Some('#') => flags.alternate = true,
            Some('0') => flags.zero = true,
            _ => break,
        }
        chars.next();
    }

    let width = parse_number(chars);
    let precision = match chars.next_if_eq(&'.') {
        Some(_) => Some(parse_number(chars).unwrap_or(0)),
        None => None,
    };
    if width.max(precision).is_some_and(|n| n > limit) {
        return Err(BindError::Format("width or precision too long".into()));
    }

    while chars.next_if(|c| matches!(c, 'h' | 'l' | 'L' | 'q' | 'j' | 'z' | 't')).is_some() {}

    let conversion = chars
        .next()
        .ok_or_else(|| BindError::Format("incomplete format specification".into()))?;
    if !"diuxXocsfFeEgG".contains(conversion) {
        return Err(BindError::Format(format!("invalid format '%{conversion}'")));
    }
    Ok(Spec {
        flags,
        width,
        precision,
        conversion,
    })
}

fn render(vm: &mut Vm, out: &mut String, spec: &Spec, arg: &Value) -> BindResult<()> {
    match spec.conversion {
        'd' | 'i' => {
            let n = integer_arg(arg)?;
            let prefix = sign(n < 0, spec.flags);
            let digits = with_precision(n.unsigned_abs().to_string(), spec.precision);
            pad(out, spec, prefix, &digits, spec.precision.is_none());
        }
        'u' | 'x' | 'X' | 'o' => {
            let n = integer_arg(arg)? as u64;
            let digits = match spec.conversion {
                'x' => format!("{n:x}"),
                'X' => format!("{n:X}"),
                'o' => format!("{n:o}"),
                _ => n.to_string(),
            };
            let mut digits = with_precision(digits, spec.precision);
            let prefix = match spec.conversion {
                'x' if spec.flags.alternate && n != 0 => "0x",
                'X' if spec.flags.alternate && n != 0 => "0X",
                _ => "",
            };
            if spec.conversion == 'o' && spec.flags.alternate && !digits.starts_with('0') {
                digits.insert(0, '0');
            }
            pad(out, spec, prefix, &digits, spec.precision.is_none());
        }
        'c' => {
            let code = integer_arg(arg)?;
            let c = u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| BindError::Format(format!("invalid character code {code}")))?;
            pad(out, spec, "", c.encode_utf8(&mut [0; 4]), false);
        }
        's' => {
            let text = vm.tostring(arg)?;
            let body: String = match spec.precision {
                Some(precision) => text.chars().take(precision).collect(),
                None => text.to_string(),
            };
            pad(out, spec, "", &body, false);
        }
        _ => {
            let v = float_arg(arg)?;
            let prefix = sign(v.is_sign_negative() && !v.is_nan(), spec.flags);
            let body = float_body(v.abs(), spec);
            pad(out, spec, prefix, &body, v.is_finite());
        }
    }
    Ok(())
}

fn integer_arg(arg: &Value) -> BindResult<i64> {
    match arg {
        Value::Integer(n) => Ok(*n),
        Value::Float(f) => Ok(*f as i64),
        _ => Err(BindError::Format(format!(
            "integer expected for the specified format, got {}",
            arg.type_name()
        ))),
    }
}

fn float_arg(arg: &Value) -> BindResult<f64> {
    match arg {
        Value::Float(f) => Ok(*f),
        Value::Integer(n) => Ok(*n as f64),
        _ => Err(BindError::Format(format!(
            "float expected for the specified format, got {}",
            arg.type_name()
        ))),
    }
}

fn sign(negative: bool, flags: Flags) -> &'static str {
    if negative {
        "-"
    } else if flags.plus {
        "+"
    } else if flags.space {
        " "
    } else {
        ""
    }
}

/// Integer precision is a minimum digit count; `.0` prints zero as nothing.
fn with_precision(digits: String, precision: Option<usize>) -> String {
    match precision {
        Some(0) if digits == "0" => String::new(),
        Some(p) if digits.len() < p => {
            let mut padded: String = repeat_n('0', p - digits.len()).collect();
            padded.push_str(&digits);
            padded
        }
        _ => digits,
    }
}

fn pad(out: &mut String, spec: &Spec, prefix: &str, body: &str, zero_fill: bool) {
    let len = prefix.chars().count() + body.chars().count();
    let fill = spec.width.unwrap_or(0).saturating_sub(len);
    if spec.flags.left {
        out.push_str(prefix);
        out.push_str(body);
        out.extend(repeat_n(' ', fill));
    } else if zero_fill && spec.flags.zero {
        out.push_str(prefix);
        out.extend(repeat_n('0', fill));
        out.push_str(body);
    } else {
        out.extend(repeat_n(' ', fill));
        out.push_str(prefix);
        out.push_str(body);
    }
}

fn float_body(v: f64, spec: &Spec) -> String {
    let precision = spec.precision.unwrap_or(6);
    let text = if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        "inf".to_string()
    } else {
        match spec.conversion.to_ascii_lowercase() {
            'f' => format!("{:.*}", precision, v),
            'e' => exponential(v, precision),
            _ => general(v, precision, spec.flags.alternate),
        }
    };
    if spec.conversion.is_ascii_uppercase() {
        text.to_ascii_uppercase()
    } else {
        text
    }
}

fn split_exponent(text: &str) -> (&str, i32) {
    match text.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse().unwrap_or(0)),
        None => (text, 0),
    }
}

/// `d.ddde+XX`, with at least two exponent digits.
fn exponential(v: f64, precision: usize) -> String {
    let text = format!("{:.*e}", precision, v);
    let (mantissa, exponent) = split_exponent(&text);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
}

fn strip_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn general(v: f64, precision: usize, alternate: bool) -> String {
    let precision = precision.max(1);
    let exponent = if v == 0.0 {
        0
    } else {
        split_exponent(&format!("{:.*e}", precision - 1, v)).1
    };
    if exponent < -4 || exponent >= precision as i32 {
        let text = exponential(v, precision - 1);
        if alternate {
            return text;
        }
        let (mantissa, rest) = text.split_at(text.find('e').unwrap_or(text.len()));
        format!("{}{rest}", strip_zeros(mantissa))
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        let text = format!("{:.*}", decimals, v);
        if alternate { text } else { strip_zeros(&text).to_string() }
    }
}
