//! C1: process-wide type registry.
//!
//! Keyed global state behind a lock, looked up far more often than mutated,
//! giving every element type and primitive kind a stable, comparable
//! identity without relying on `std::any::TypeId` collisions across crate
//! versions.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::RwLock;

/// Stable runtime descriptor for a tensor element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDescriptor {
    id: u32,
    size_bytes: u8,
    is_float: bool,
    name: &'static str,
}

impl TypeDescriptor {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes as usize
    }

    pub fn is_float(&self) -> bool {
        self.is_float
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

struct TypeRegistryInner {
    by_name: HashMap<&'static str, TypeDescriptor>,
    next_id: u32,
}

static REGISTRY: OnceLock<RwLock<TypeRegistryInner>> = OnceLock::new();

fn registry() -> &'static RwLock<TypeRegistryInner> {
    REGISTRY.get_or_init(|| {
        RwLock::new(TypeRegistryInner {
            by_name: HashMap::new(),
            next_id: 0,
        })
    })
}

/// Registers (if not already present) and returns the descriptor for `name`.
///
/// First call for a given name allocates a new id; subsequent calls return
/// the same descriptor. Ids are never reused within the process.
pub fn type_descriptor(name: &'static str, size_bytes: u8, is_float: bool) -> TypeDescriptor {
    if let Some(desc) = registry().read().by_name.get(name) {
        return *desc;
    }
    let mut guard = registry().write();
    if let Some(desc) = guard.by_name.get(name) {
        return *desc;
    }
    let id = guard.next_id;
    guard.next_id += 1;
    let desc = TypeDescriptor {
        id,
        size_bytes,
        is_float,
        name,
    };
    guard.by_name.insert(name, desc);
    desc
}

/// Element-type identity, the `T` in C1's `type_id<T>()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    F16,
    I8,
    U8,
}

impl ElementType {
    pub fn descriptor(self) -> TypeDescriptor {
        match self {
            ElementType::F32 => type_descriptor("f32", 4, true),
            ElementType::F16 => type_descriptor("f16", 2, true),
            ElementType::I8 => type_descriptor("i8", 1, false),
            ElementType::U8 => type_descriptor("u8", 1, false),
        }
    }

    pub fn size_bytes(self) -> usize {
        self.descriptor().size_bytes()
    }

    /// Parses the single-byte `.nnd` data-type tag (§6).
    pub fn from_nnd_tag(tag: u8) -> Option<Self> {
        match tag {
            b'F' => Some(ElementType::F32),
            b'H' => Some(ElementType::F16),
            b'b' => Some(ElementType::I8),
            b'B' => Some(ElementType::U8),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_is_stable_across_calls() {
        let a = type_descriptor("widget", 4, true);
        let b = type_descriptor("widget", 4, true);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn distinct_names_get_distinct_ids() {
        let a = type_descriptor("widget-a", 4, true);
        let b = type_descriptor("widget-b", 4, true);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn element_type_sizes() {
        assert_eq!(ElementType::F32.size_bytes(), 4);
        assert_eq!(ElementType::F16.size_bytes(), 2);
        assert_eq!(ElementType::I8.size_bytes(), 1);
        assert_eq!(ElementType::U8.size_bytes(), 1);
    }

    #[test]
    fn nnd_tag_roundtrip() {
        assert_eq!(ElementType::from_nnd_tag(b'F'), Some(ElementType::F32));
        assert_eq!(ElementType::from_nnd_tag(b'H'), Some(ElementType::F16));
        assert_eq!(ElementType::from_nnd_tag(b'b'), Some(ElementType::I8));
        assert_eq!(ElementType::from_nnd_tag(b'B'), Some(ElementType::U8));
        assert_eq!(ElementType::from_nnd_tag(b'Z'), None);
    }
}
