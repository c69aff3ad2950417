//! Run identifier.
//!
//! ULID なので生成順にソートでき、ログ上で run を時系列に並べられる。

use std::fmt;

use serde::{Serialize, Serializer};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(Ulid);

impl RunId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

impl Serialize for RunId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_prefix() {
        let ulid = Ulid::new();
        assert_eq!(RunId(ulid).to_string(), format!("run-{ulid}"));
    }

    #[test]
    fn later_ids_sort_after_earlier_ones() {
        let a = RunId(Ulid::from_parts(1_000, 0));
        let b = RunId(Ulid::from_parts(2_000, 0));
        assert!(a < b);
    }

    #[test]
    fn serializes_as_display_string() {
        let id = RunId::generate();
        let v = serde_json::to_value(id).unwrap();
        assert_eq!(v, serde_json::Value::String(id.to_string()));
    }
}
