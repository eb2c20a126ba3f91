//! Best-effort resolution of function identities to display names.
//!
//! Resolution never fails: interned identities come out of the session's
//! name table, raw code addresses go through the dynamic loader, and
//! anything else is printed as the token's hex form.

use std::collections::HashMap;

use crate::ident::FnId;

/// A resolved identity: the owning module (shared object or binary) and a
/// human-readable function name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub module: String,
    pub name: String,
}

/// Resolve `id` against the name table first, then the dynamic loader,
/// then fall back to hex with an empty module.
pub(crate) fn resolve(id: FnId, names: &HashMap<FnId, String>, exe: &str) -> Symbol {
    if let Some(name) = names.get(&id) {
        return Symbol {
            module: exe.to_string(),
            name: name.clone(),
        };
    }
    if let Some(sym) = resolve_dynamic(id) {
        return sym;
    }
    Symbol {
        module: String::new(),
        name: format!("{:#x}", id.as_raw()),
    }
}

/// Demangled display form, hash suffix stripped. Non-mangled input passes
/// through unchanged.
fn prettify(raw: &str) -> String {
    format!("{:#}", rustc_demangle::demangle(raw))
}

/// Ask the dynamic loader about an address-shaped identity. Only finds
/// symbols the loader knows about (exported or in a shared object); plain
/// static functions miss and fall through to the hex form.
#[cfg(unix)]
fn resolve_dynamic(id: FnId) -> Option<Symbol> {
    use std::ffi::CStr;

    let addr = id.as_raw() as usize as *const libc::c_void;
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    // dladdr only searches loaded-object address ranges; it never
    // dereferences the pointer, so garbage identities are safe here.
    if unsafe { libc::dladdr(addr, &mut info) } == 0 || info.dli_sname.is_null() {
        return None;
    }
    let raw = unsafe { CStr::from_ptr(info.dli_sname) }.to_string_lossy();
    let module = if info.dli_fname.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(info.dli_fname) }
            .to_string_lossy()
            .into_owned()
    };
    Some(Symbol {
        module,
        name: prettify(&raw),
    })
}

#[cfg(not(unix))]
fn resolve_dynamic(_id: FnId) -> Option<Symbol> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_entries_win() {
        let mut names = HashMap::new();
        names.insert(FnId::from_raw(3), "crate::parse".to_string());
        let sym = resolve(FnId::from_raw(3), &names, "/bin/app");
        assert_eq!(sym.name, "crate::parse");
        assert_eq!(sym.module, "/bin/app");
    }

    #[test]
    fn unknown_identity_falls_back_to_hex() {
        let names = HashMap::new();
        let sym = resolve(FnId::from_raw(0x1234), &names, "/bin/app");
        assert_eq!(sym.name, "0x1234");
        assert!(sym.module.is_empty());
    }

    #[test]
    fn real_code_address_resolves_without_panicking() {
        // Test binaries rarely export symbols, so a miss (hex fallback) is
        // acceptable; what matters is a non-empty name either way.
        let names = HashMap::new();
        let addr = resolve as usize as u64;
        let sym = resolve(FnId::from_raw(addr), &names, "");
        assert!(!sym.name.is_empty());
    }

    #[test]
    fn mangled_rust_symbols_are_prettified() {
        let pretty = prettify("_ZN4core3fmt5write17h1234567890abcdefE");
        assert_eq!(pretty, "core::fmt::write");
    }

    #[test]
    fn plain_symbols_pass_through() {
        assert_eq!(prettify("malloc"), "malloc");
    }
}
