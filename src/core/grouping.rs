use crate::core::spectral_index::IndexObservation;
use crate::types::{BaselineError, BaselineResult, BoundingBox, GridSpec, PathRow};
use std::collections::BTreeMap;

/// Named WRS-2 tile with its native pixel grid
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialUnit {
    pub name: String,
    pub path_row: PathRow,
    pub grid: GridSpec,
}

impl SpatialUnit {
    pub fn new(name: impl Into<String>, path_row: PathRow, grid: GridSpec) -> Self {
        Self {
            name: name.into(),
            path_row,
            grid,
        }
    }

    pub fn footprint(&self) -> BoundingBox {
        self.grid.extent()
    }
}

/// Path/row index of the spatial units a run may touch
#[derive(Debug, Clone, Default)]
pub struct SpatialUnitTable {
    units: BTreeMap<PathRow, SpatialUnit>,
}

impl SpatialUnitTable {
    /// Build the table; each path/row may appear only once
    pub fn new(units: Vec<SpatialUnit>) -> BaselineResult<Self> {
        let mut table: BTreeMap<PathRow, SpatialUnit> = BTreeMap::new();
        for unit in units {
            if let Some(existing) = table.get(&unit.path_row) {
                return Err(BaselineError::InvalidConfiguration(format!(
                    "Spatial units {} and {} share path/row {}",
                    existing.name, unit.name, unit.path_row
                )));
            }
            table.insert(unit.path_row, unit);
        }
        Ok(Self { units: table })
    }

    pub fn get(&self, path_row: &PathRow) -> Option<&SpatialUnit> {
        self.units.get(path_row)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Units whose footprint intersects `roi`, in path/row order
    pub fn intersecting<'a>(&'a self, roi: &'a BoundingBox) -> impl Iterator<Item = &'a SpatialUnit> + 'a {
        self.units.values().filter(move |unit| unit.footprint().intersects(roi))
    }
}

/// Time-ordered observations of one spatial unit
#[derive(Debug, Clone)]
pub struct ProcessingUnit {
    pub unit: SpatialUnit,
    pub observations: Vec<IndexObservation>,
}

impl ProcessingUnit {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn path_row(&self) -> PathRow {
        self.unit.path_row
    }

    pub fn grid(&self) -> GridSpec {
        self.unit.grid
    }
}

/// Partition observations into processing units.
///
/// Membership is an exact join on the observation's own path/row metadata; the
/// region of interest only selects which units are produced. Observations whose
/// path/row is not a selected unit are dropped.
pub fn group_observations(
    observations: Vec<IndexObservation>,
    table: &SpatialUnitTable,
    roi: &BoundingBox,
) -> Vec<ProcessingUnit> {
    let mut groups: BTreeMap<PathRow, ProcessingUnit> = table
        .intersecting(roi)
        .map(|unit| {
            (
                unit.path_row,
                ProcessingUnit {
                    unit: unit.clone(),
                    observations: Vec::new(),
                },
            )
        })
        .collect();

    let total = observations.len();
    let mut dropped = 0usize;
    for obs in observations {
        match groups.get_mut(&obs.metadata.path_row) {
            Some(group) => group.observations.push(obs),
            None => dropped += 1,
        }
    }

    for group in groups.values_mut() {
        group.observations.sort_by(|a, b| {
            a.metadata
                .acquired
                .cmp(&b.metadata.acquired)
                .then_with(|| a.metadata.product_id.cmp(&b.metadata.product_id))
        });
        if group.is_empty() {
            log::warn!("Spatial unit {} ({}) has no observations", group.unit.name, group.path_row());
        } else {
            log::debug!("Spatial unit {} ({}): {} observations", group.unit.name, group.path_row(), group.len());
        }
    }

    log::info!(
        "Grouped {} observations into {} processing units ({} outside the selected units)",
        total - dropped,
        groups.len(),
        dropped
    );

    groups.into_values().collect()
}
