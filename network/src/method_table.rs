//! Static mapping from RPC method names to the capabilities a peer must
//! advertise to serve them.

use agentmesh_types::{Capability, CapabilitySet};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct MethodTable {
    entries: HashMap<String, CapabilitySet>,
}

impl MethodTable {
    /// A table with no methods. Every `route` on it returns `None`.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The well-known methods of an agent network.
    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        let defaults: [(&[&str], &'static str); 6] = [
            (&["observe", "query", "store", "retract"], Capability::STORAGE_ACCESS),
            (&["translate", "summarize"], Capability::LANGUAGE_MODEL),
            (&["infer", "explain"], Capability::INFERENCE_LOGIC),
            (&["validate"], Capability::VALIDATION_LOGIC),
            (&["ask_user", "notify_user"], Capability::INTERACTIVE_IO),
            (&["evolve_schema", "describe_schema"], Capability::SCHEMA_MANAGEMENT),
        ];
        for (methods, capability) in defaults {
            for method in methods {
                table.insert(*method, CapabilitySet::from_static(&[capability]));
            }
        }
        table
    }

    /// Add or replace the requirement for `method`. Returns the previous
    /// requirement, if any.
    pub fn insert(
        &mut self,
        method: impl Into<String>,
        required: CapabilitySet,
    ) -> Option<CapabilitySet> {
        self.entries.insert(method.into(), required)
    }

    pub fn required(&self, method: &str) -> Option<&CapabilitySet> {
        self.entries.get(method)
    }

    pub fn contains(&self, method: &str) -> bool {
        self.entries.contains_key(method)
    }

    /// Method names in sorted order.
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MethodTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_well_known_methods() {
        let table = MethodTable::with_defaults();
        assert_eq!(table.len(), 14);
        assert!(table.required("observe").unwrap().contains("storage-access"));
        assert!(table.required("summarize").unwrap().contains("language-model"));
        assert!(table.required("explain").unwrap().contains("inference-logic"));
        assert!(table.required("validate").unwrap().contains("validation-logic"));
        assert!(table.required("notify_user").unwrap().contains("interactive-io"));
        assert!(table
            .required("describe_schema")
            .unwrap()
            .contains("schema-management"));
        assert!(table.required("teleport").is_none());
    }

    #[test]
    fn insert_replaces_requirement() {
        let mut table = MethodTable::with_defaults();
        let both = CapabilitySet::parse(["storage-access", "validation-logic"]).unwrap();
        let previous = table.insert("store", both.clone()).unwrap();
        assert_eq!(previous.len(), 1);
        assert_eq!(table.required("store"), Some(&both));
    }

    #[test]
    fn empty_table_knows_nothing() {
        let table = MethodTable::empty();
        assert!(table.is_empty());
        assert!(!table.contains("observe"));
        assert!(table.methods().is_empty());
    }
}
