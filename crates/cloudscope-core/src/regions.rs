//! Region and partition metadata
//!
//! The [`RegionProvider`] answers "which regions exist" and "is this service
//! regionalized in this partition". Metadata is loaded from JSON and can be
//! swapped at runtime, which publishes [`ChangeEvent::RegionsChanged`].

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::events::{ChangeBus, ChangeEvent};
use crate::identity::{Partition, Region};

/// Serialized form of the partition/region table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMetadata {
    pub default_region: String,
    pub partitions: Vec<PartitionMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionMetadata {
    pub id: String,
    pub display_name: String,
    pub global_region_id: String,
    /// Services with a single endpoint for the whole partition
    #[serde(default)]
    pub global_services: BTreeSet<String>,
    pub regions: Vec<RegionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionEntry {
    pub id: String,
    pub display_name: String,
}

impl RegionMetadata {
    /// Parse metadata from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let metadata: RegionMetadata = serde_json::from_str(json)
            .map_err(|e| Error::parse(format!("Invalid region metadata: {}", e)))?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Load metadata from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    fn validate(&self) -> Result<()> {
        let known = |id: &str| {
            self.partitions
                .iter()
                .any(|p| p.regions.iter().any(|r| r.id == id))
        };
        if !known(&self.default_region) {
            return Err(Error::parse(format!(
                "Default region '{}' is not listed in any partition",
                self.default_region
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RegionTable {
    partitions: IndexMap<String, Partition>,
    regions: IndexMap<String, Region>,
    global_services: HashMap<String, BTreeSet<String>>,
    default_region: Option<String>,
}

impl From<&RegionMetadata> for RegionTable {
    fn from(metadata: &RegionMetadata) -> Self {
        let mut table = RegionTable {
            default_region: Some(metadata.default_region.clone()),
            ..Default::default()
        };
        for p in &metadata.partitions {
            table.partitions.insert(
                p.id.clone(),
                Partition {
                    id: p.id.clone(),
                    display_name: p.display_name.clone(),
                    global_region_id: p.global_region_id.clone(),
                },
            );
            table
                .global_services
                .insert(p.id.clone(), p.global_services.clone());
            for r in &p.regions {
                table.regions.insert(
                    r.id.clone(),
                    Region::new(r.id.clone(), r.display_name.clone(), p.id.clone()),
                );
            }
        }
        table
    }
}

/// Region/partition lookups backed by swappable metadata.
#[derive(Debug)]
pub struct RegionProvider {
    table: RwLock<RegionTable>,
    bus: Arc<ChangeBus>,
}

impl RegionProvider {
    pub fn new(bus: Arc<ChangeBus>, metadata: &RegionMetadata) -> Self {
        Self {
            table: RwLock::new(RegionTable::from(metadata)),
            bus,
        }
    }

    /// Replace the metadata and publish `RegionsChanged`
    pub fn replace(&self, metadata: &RegionMetadata) {
        *self.table.write().unwrap_or_else(PoisonError::into_inner) =
            RegionTable::from(metadata);
        log::debug!("Region metadata replaced");
        self.bus.publish(ChangeEvent::RegionsChanged);
    }

    /// All regions, in metadata order
    pub fn regions(&self) -> Vec<Region> {
        self.read().regions.values().cloned().collect()
    }

    /// Regions of one partition
    pub fn regions_in(&self, partition_id: &str) -> Vec<Region> {
        self.read()
            .regions
            .values()
            .filter(|r| r.partition_id == partition_id)
            .cloned()
            .collect()
    }

    pub fn region(&self, id: &str) -> Result<Region> {
        self.read()
            .regions
            .get(id)
            .cloned()
            .ok_or_else(|| Error::region_not_found(id))
    }

    pub fn partitions(&self) -> Vec<Partition> {
        self.read().partitions.values().cloned().collect()
    }

    pub fn partition(&self, id: &str) -> Option<Partition> {
        self.read().partitions.get(id).cloned()
    }

    pub fn default_region(&self) -> Option<Region> {
        let table = self.read();
        table
            .default_region
            .as_ref()
            .and_then(|id| table.regions.get(id))
            .cloned()
    }

    /// Whether `service` has one endpoint for the whole partition
    pub fn is_service_global(&self, service: &str, partition_id: &str) -> bool {
        self.read()
            .global_services
            .get(partition_id)
            .is_some_and(|s| s.contains(service))
    }

    /// The region that serves global services of a partition
    pub fn global_region(&self, partition_id: &str) -> Option<Region> {
        let table = self.read();
        table
            .partitions
            .get(partition_id)
            .and_then(|p| table.regions.get(&p.global_region_id))
            .cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegionTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }
}
