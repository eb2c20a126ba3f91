//! Opaque function identities.

use std::sync::OnceLock;

/// Identifies a traced function. Equality-comparable and hashable; the bit
/// pattern is never interpreted beyond serving as a key for best-effort
/// symbol lookup at report time.
///
/// Integrations with real code addresses wrap them with [`FnId::from_raw`];
/// name-based integrations intern through the session, which hands out
/// sequential tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FnId(u64);

impl FnId {
    pub const fn from_raw(raw: u64) -> Self {
        FnId(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Per-call-site cache for one function's interned identity.
///
/// Code-generation layers declare one `static` per instrumented function so
/// interning happens once; every later call is a single atomic load.
pub struct CallSite {
    name: &'static str,
    id: OnceLock<FnId>,
}

impl CallSite {
    pub const fn new(name: &'static str) -> Self {
        CallSite {
            name,
            id: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The cached identity, interning via `intern` on first use.
    pub(crate) fn id_or_intern(&self, intern: impl FnOnce(&'static str) -> FnId) -> FnId {
        *self.id.get_or_init(|| intern(self.name))
    }
}
