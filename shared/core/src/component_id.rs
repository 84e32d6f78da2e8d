use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_COMPONENT_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a task or mixture, handed out once at construction.
/// Two components built separately never share an id, even when their
/// names and contents are equal.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(u64);

impl ComponentId {
    pub fn next() -> Self {
        Self(NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

impl From<ComponentId> for u64 {
    fn from(id: ComponentId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let a = ComponentId::next();
        let b = ComponentId::next();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn test_display() {
        let id = ComponentId::next();
        assert_eq!(id.to_string(), format!("C{}", u64::from(id)));
    }
}
