use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use error_stack::{Report, ResultExt};
use gdal::raster::rasterize;
use gdal::vector::Geometry;
use gdal::DriverManager;
use log::{debug, warn};

use crate::error::{GroupingError, Result};
use crate::raster::Raster;
use crate::utils::majority;
use crate::vector::{AttrValue, FeatureLayer};

pub const COUNT_FIELD: &str = "COUNT";
pub const MAJORITY_FIELD: &str = "MAJORITY";

#[derive(Debug, Clone, PartialEq)]
pub struct ZonalRow {
    pub zone: i64,
    pub count: u64,
    pub majority: i64,
}

/// Majority statistic per zone, sorted by zone id. Zones that covered no valid
/// cell have no row.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonalTable {
    pub zone_field: String,
    pub rows: Vec<ZonalRow>,
}

impl ZonalTable {
    /// Name of the first column, holding the zone id.
    pub fn key_column(&self) -> String {
        format!("{}_", self.zone_field)
    }

    pub fn get(&self, zone: i64) -> Option<&ZonalRow> {
        self.rows
            .binary_search_by_key(&zone, |row| row.zone)
            .ok()
            .map(|i| &self.rows[i])
    }

    pub fn has_column(&self, column: &str) -> bool {
        column == COUNT_FIELD || column == MAJORITY_FIELD || column == self.key_column()
    }

    pub fn value(&self, zone: i64, column: &str) -> Option<AttrValue> {
        let row = self.get(zone)?;
        match column {
            COUNT_FIELD => Some(AttrValue::Integer(row.count as i64)),
            MAJORITY_FIELD => Some(AttrValue::Integer(row.majority)),
            c if c == self.key_column() => Some(AttrValue::Integer(row.zone)),
            _ => None,
        }
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .change_context(GroupingError::Io)
            .attach_printable_lazy(|| format!("creating {}", path.display()))?;
        let mut writer = csv::Writer::from_writer(file);

        let headers: Vec<String> = vec![
            self.key_column(),
            String::from(COUNT_FIELD),
            String::from(MAJORITY_FIELD),
        ];
        writer
            .write_record(headers)
            .change_context(GroupingError::Csv)?;

        for row in &self.rows {
            let record: Vec<String> = vec![
                row.zone.to_string(),
                row.count.to_string(),
                row.majority.to_string(),
            ];
            writer
                .write_record(record)
                .change_context(GroupingError::Csv)?;
        }

        writer
            .flush()
            .change_context(GroupingError::Csv)
            .attach_printable_lazy(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

/// Tallies raster values per zone.
///
/// `zone_cells` holds, for every cell of `values`, a 1-based index into
/// `zone_ids` (0 outside every zone). NoData cells are skipped.
pub fn tally_zones(
    zone_cells: &[i32],
    values: &Raster<i32>,
    zone_ids: &[i64],
    zone_field: &str,
) -> Result<ZonalTable> {
    if zone_cells.len() != values.data.len() {
        return Err(Report::new(GroupingError::GridMismatch(format!(
            "zone grid has {} cells, value raster {}",
            zone_cells.len(),
            values.data.len()
        ))));
    }

    let mut counts: BTreeMap<i64, HashMap<i64, u64>> = BTreeMap::new();

    for (&burn, &value) in zone_cells.iter().zip(values.data.iter()) {
        if burn <= 0 || values.is_no_data(value) {
            continue;
        }
        let Some(&zone) = zone_ids.get(burn as usize - 1) else {
            continue;
        };
        *counts
            .entry(zone)
            .or_default()
            .entry(value as i64)
            .or_insert(0) += 1;
    }

    let rows: Vec<ZonalRow> = counts
        .iter()
        .filter_map(|(&zone, zone_counts)| {
            let (value, _) = majority(zone_counts)?;
            let count: u64 = zone_counts.values().sum();
            Some(ZonalRow {
                zone,
                count,
                majority: value,
            })
        })
        .collect();

    Ok(ZonalTable {
        zone_field: zone_field.to_string(),
        rows,
    })
}

/// Zonal statistics (MAJORITY) of `values` over the polygons of `zones`.
///
/// Polygons are burned onto a grid aligned with the value raster; a cell
/// belongs to a zone when its centre falls inside the polygon.
pub fn zonal_statistics_majority(
    zones: &FeatureLayer,
    zone_field: &str,
    values: &Raster<i32>,
) -> Result<ZonalTable> {
    zones.require_field(zone_field)?;

    let mut geometries: Vec<Geometry> = Vec::new();
    let mut zone_ids: Vec<i64> = Vec::new();
    for record in &zones.records {
        let (Some(geometry), Some(zone)) = (&record.geometry, record.key(zone_field)) else {
            warn!(
                "zone fid {} has no geometry or no {} value, skipped",
                record.fid, zone_field
            );
            continue;
        };
        geometries.push(geometry.clone());
        zone_ids.push(zone);
    }

    if geometries.is_empty() {
        return Ok(ZonalTable {
            zone_field: zone_field.to_string(),
            rows: Vec::new(),
        });
    }

    let driver = DriverManager::get_driver_by_name("MEM").change_context(GroupingError::Gdal)?;
    let mut dataset = driver
        .create_with_band_type::<i32, _>("", values.width as _, values.height as _, 1)
        .change_context(GroupingError::Gdal)
        .attach_printable("allocating zone grid")?;
    dataset
        .set_geo_transform(&values.geo_transform)
        .change_context(GroupingError::Gdal)?;
    if !values.projection.is_empty() {
        dataset
            .set_projection(&values.projection)
            .change_context(GroupingError::Gdal)?;
    }

    let burn_values: Vec<f64> = (1..=geometries.len()).map(|i| i as f64).collect();
    rasterize(&mut dataset, &[1], &geometries, &burn_values, None)
        .change_context(GroupingError::Gdal)
        .attach_printable_lazy(|| format!("rasterizing {} zones", geometries.len()))?;

    let zone_cells: Vec<i32> = dataset
        .rasterband(1)
        .change_context(GroupingError::Gdal)?
        .read_as::<i32>(
            (0, 0),
            (values.width, values.height),
            (values.width, values.height),
            None,
        )
        .change_context(GroupingError::Gdal)?
        .data;

    let table = tally_zones(&zone_cells, values, &zone_ids, zone_field)?;
    debug!(
        "{} of {} zones received a majority value",
        table.rows.len(),
        zone_ids.len()
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lulc() -> Raster<i32> {
        // 4x2 grid, -9999 is nodata
        Raster::<i32>::from_parts(vec![24, 24, 22, 23, 24, 21, 23, -9999], 4, 2, Some(-9999.0))
            .unwrap()
    }

    #[test]
    fn test_tally_zones_majority() {
        let zone_cells = vec![1, 1, 2, 2, 1, 1, 2, 2];
        let table = tally_zones(&zone_cells, &lulc(), &[10, 20], "FID").unwrap();

        assert_eq!(table.rows.len(), 2);
        assert_eq!(
            table.get(10),
            Some(&ZonalRow {
                zone: 10,
                count: 4,
                majority: 24
            })
        );
        // 22, 23, 23 with the nodata cell dropped
        assert_eq!(
            table.get(20),
            Some(&ZonalRow {
                zone: 20,
                count: 3,
                majority: 23
            })
        );
    }

    #[test]
    fn test_tally_zones_tie_takes_lowest() {
        let zone_cells = vec![0, 0, 1, 1, 0, 0, 0, 0];
        let table = tally_zones(&zone_cells, &lulc(), &[5], "FID").unwrap();
        assert_eq!(table.get(5).map(|r| r.majority), Some(22));
    }

    #[test]
    fn test_zone_with_only_nodata_has_no_row() {
        let zone_cells = vec![1, 1, 1, 1, 1, 1, 1, 2];
        let table = tally_zones(&zone_cells, &lulc(), &[0, 1], "FID").unwrap();
        assert!(table.get(0).is_some());
        assert!(table.get(1).is_none());
    }

    #[test]
    fn test_tally_zones_rejects_mismatched_grid() {
        let err = tally_zones(&[1, 1, 1], &lulc(), &[0], "FID").unwrap_err();
        assert!(matches!(
            err.current_context(),
            GroupingError::GridMismatch(_)
        ));
    }

    #[test]
    fn test_table_columns() {
        let table = ZonalTable {
            zone_field: "FID".to_string(),
            rows: vec![ZonalRow {
                zone: 3,
                count: 12,
                majority: 22,
            }],
        };
        assert_eq!(table.key_column(), "FID_");
        assert!(table.has_column(MAJORITY_FIELD));
        assert!(!table.has_column("MEAN"));
        assert_eq!(table.value(3, MAJORITY_FIELD), Some(AttrValue::Integer(22)));
        assert_eq!(table.value(3, COUNT_FIELD), Some(AttrValue::Integer(12)));
        assert_eq!(table.value(4, MAJORITY_FIELD), None);
    }

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zon_stat.csv");
        let table = ZonalTable {
            zone_field: "FID".to_string(),
            rows: vec![
                ZonalRow {
                    zone: 0,
                    count: 40,
                    majority: 24,
                },
                ZonalRow {
                    zone: 1,
                    count: 12,
                    majority: 71,
                },
            ],
        };
        table.write_csv(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["FID_,COUNT,MAJORITY", "0,40,24", "1,12,71"]);
    }
}
