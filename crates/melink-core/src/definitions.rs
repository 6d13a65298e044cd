//! Definition catalog lookup
//!
//! The ECU reports objects by numeric id only; the catalog supplies the
//! human name and shape. The protocol engine consults the catalog purely
//! for labeling; decode correctness never depends on a lookup hit.

use std::collections::HashMap;

use crate::model::{EcuObjectDefinition, EcuObjectKind};

/// Read-only id-to-definition lookup consumed by the codec and the
/// interaction layer
pub trait DefinitionLookup: Send + Sync {
    /// Look up the catalog entry for an object id
    fn lookup(&self, id: u16) -> Option<EcuObjectDefinition>;

    /// All telemetry channels in the catalog, ordered by id
    fn datalinks(&self) -> Vec<EcuObjectDefinition>;
}

/// In-memory definition catalog
#[derive(Debug, Clone, Default)]
pub struct DefinitionStore {
    objects: HashMap<u16, EcuObjectDefinition>,
}

impl DefinitionStore {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from its JSON form (an array of definitions)
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        let objects: Vec<EcuObjectDefinition> = serde_json::from_str(json)?;
        let mut store = Self::new();
        for object in objects {
            store.insert(object);
        }
        Ok(store)
    }

    /// Add or replace a catalog entry
    pub fn insert(&mut self, object: EcuObjectDefinition) {
        self.objects.insert(object.id, object);
    }

    /// Number of catalog entries
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// All entries of one kind, ordered by id
    pub fn objects_of_kind(&self, kind: EcuObjectKind) -> Vec<EcuObjectDefinition> {
        let mut objects: Vec<_> = self
            .objects
            .values()
            .filter(|o| o.kind == kind)
            .cloned()
            .collect();
        objects.sort_by_key(|o| o.id);
        objects
    }

    /// A small fixed catalog for the simulator and for tests
    pub fn demo() -> Self {
        let mut store = Self::new();
        let tables = [
            (1u16, "VE Table"),
            (2, "Ignition Timing"),
            (3, "AFR Target"),
            (4, "Boost Target"),
        ];
        for (id, name) in tables {
            store.insert(EcuObjectDefinition {
                id,
                name: name.to_string(),
                category: "Tuning".to_string(),
                kind: EcuObjectKind::Table,
            });
        }

        let datalinks = [
            (10u16, "RPM"),
            (11, "MAP"),
            (12, "TPS"),
            (13, "CLT"),
            (14, "IAT"),
            (15, "Battery Voltage"),
        ];
        for (id, name) in datalinks {
            store.insert(EcuObjectDefinition {
                id,
                name: name.to_string(),
                category: "Sensors".to_string(),
                kind: EcuObjectKind::DataLink,
            });
        }

        let drivers = [(20u16, "Fuel Driver"), (21, "Spark Driver"), (22, "Idle Driver")];
        for (id, name) in drivers {
            store.insert(EcuObjectDefinition {
                id,
                name: name.to_string(),
                category: "Outputs".to_string(),
                kind: EcuObjectKind::Driver,
            });
        }

        store
    }
}

impl DefinitionLookup for DefinitionStore {
    fn lookup(&self, id: u16) -> Option<EcuObjectDefinition> {
        self.objects.get(&id).cloned()
    }

    fn datalinks(&self) -> Vec<EcuObjectDefinition> {
        self.objects_of_kind(EcuObjectKind::DataLink)
    }
}
