//! Native symbol names for types and methods.
//!
//! Characters that are not ASCII alphanumerics are escaped so that every
//! internal name maps to a distinct valid linker symbol:
//! `/` becomes `_`, `_` becomes `_1`, `;` becomes `_2`, `[` becomes `_3`, and
//! anything else becomes `_0` followed by four lowercase hex digits of its
//! UTF-16 code unit.
use std::fmt::Write;

pub fn mangle(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x2f => out.push('_'),
            0x5f => out.push_str("_1"),
            0x3b => out.push_str("_2"),
            0x5b => out.push_str("_3"),
            u if u < 0x80 && (u as u8).is_ascii_alphanumeric() => out.push(u as u8 as char),
            u => {
                let _ = write!(out, "_0{u:04x}");
            }
        }
    }
    out
}

/// Native name of a class type: `L<mangled>_2`.
pub fn class_native_name(name: &str) -> String {
    format!("L{}_2", mangle(name))
}

/// Native name of an array type, from its component's native name.
pub fn array_native_name(component: &str) -> String {
    format!("_3{component}")
}

/// Symbol of a class's static storage.
pub fn static_native_name(name: &str) -> String {
    format!("static_{}", mangle(name))
}

/// `Java_<class>_<method>`.
pub fn jni_name(class: &str, method: &str) -> String {
    format!("Java_{}_{}", mangle(class), mangle(method))
}

/// `Java_<class>_<method>__<parameters>`, used for overloaded natives.
pub fn overloaded_jni_name(class: &str, method: &str, parameters: &str) -> String {
    format!("{}__{}", jni_name(class, method), mangle(parameters))
}
