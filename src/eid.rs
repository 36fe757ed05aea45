use rusty_ulid::Ulid;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Opaque identifier for saved stacks, refinement steps and temp files.
/// ULIDs sort by creation time, so ids created later compare greater.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Eid(String);

impl Eid {
    pub fn new() -> Eid {
        Eid(Ulid::generate().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Eid {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Eid> for String {
    fn from(id: Eid) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique_and_ulid_sized() {
        let a = Eid::new();
        let b = Eid::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 26);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = Eid::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        assert_eq!(serde_json::from_str::<Eid>(&json).unwrap(), id);
    }
}
