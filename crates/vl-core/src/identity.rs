//! Deterministic identities for virtual libraries.
//!
//! A virtual library's visible `Id` (and its primary image tag) is the 32-bit
//! FNV-1a hash of its name, rendered in decimal so it looks like any other
//! numeric id the upstream server hands out. The mapping is re-derived from
//! the configured library set on every lookup; nothing is cached.
//!
//! 32 bits is only safe because the configured set is small (a handful to a
//! few dozen names). Collisions are not resolved here: [`IdentityRegistry::collisions`]
//! reports them so configuration loading can reject the set outright.

use std::sync::Arc;

use crate::config::Library;

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut state = FNV32_OFFSET_BASIS;
    for byte in bytes {
        state ^= u32::from(*byte);
        state = state.wrapping_mul(FNV32_PRIME);
    }
    state
}

/// Hash a library name to its managed identity.
pub fn hash_name(name: &str) -> String {
    fnv1a32(name.as_bytes()).to_string()
}

/// Lookup table between managed identities and configured libraries.
///
/// Cheaply cloneable; every clone shares the same immutable library slice.
#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    libraries: Arc<[Library]>,
}

impl IdentityRegistry {
    /// Build a registry over the given libraries, in configured order.
    pub fn new(libraries: impl Into<Arc<[Library]>>) -> Self {
        Self {
            libraries: libraries.into(),
        }
    }

    /// All configured libraries, in configured order.
    pub fn libraries(&self) -> &[Library] {
        &self.libraries
    }

    /// The managed identity of a library.
    pub fn id_of(&self, library: &Library) -> String {
        hash_name(&library.name)
    }

    /// Whether `id` is the identity of some configured library.
    pub fn is_managed(&self, id: &str) -> bool {
        self.resolve(id).is_some()
    }

    /// Find the library whose identity is `id`.
    pub fn resolve(&self, id: &str) -> Option<&Library> {
        if id.is_empty() {
            return None;
        }
        self.libraries.iter().find(|lib| hash_name(&lib.name) == id)
    }

    /// Pairs of configured names that hash to the same identity.
    pub fn collisions(&self) -> Vec<(String, String)> {
        let mut found = Vec::new();
        for (i, a) in self.libraries.iter().enumerate() {
            for b in &self.libraries[i + 1..] {
                if a.name != b.name && hash_name(&a.name) == hash_name(&b.name) {
                    found.push((a.name.clone(), b.name.clone()));
                }
            }
        }
        found
    }
}
