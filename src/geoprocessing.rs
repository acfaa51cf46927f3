use crate::error::Result;
use crate::field_join;
use crate::raster::Raster;
use crate::spatial_join;
use crate::vector::FeatureLayer;
use crate::zonal::{self, ZonalTable};

/// The geoprocessing steps the sub-catchment preparation depends on.
pub trait Geoprocessor {
    /// Per zone, the most frequent cell value of `raster` (NoData ignored).
    fn zonal_statistics_majority(
        &self,
        zones: &FeatureLayer,
        zone_field: &str,
        raster: &Raster<i32>,
    ) -> Result<ZonalTable>;

    /// One-to-one, keep-all join taking `join_fields` from the join feature
    /// with the largest overlap.
    fn spatial_join_largest_overlap(
        &self,
        target: &FeatureLayer,
        join: &FeatureLayer,
        join_fields: &[&str],
    ) -> Result<FeatureLayer>;

    /// Copies `fields` of `table` onto records whose `in_field` matches the
    /// table's zone id. Returns the number of matched records.
    fn join_field(
        &self,
        layer: &mut FeatureLayer,
        in_field: &str,
        table: &ZonalTable,
        fields: &[&str],
    ) -> Result<usize>;
}

/// Geoprocessing backed by GDAL/OGR rasterization and geometry operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalGeoprocessor;

impl Geoprocessor for GdalGeoprocessor {
    fn zonal_statistics_majority(
        &self,
        zones: &FeatureLayer,
        zone_field: &str,
        raster: &Raster<i32>,
    ) -> Result<ZonalTable> {
        zonal::zonal_statistics_majority(zones, zone_field, raster)
    }

    fn spatial_join_largest_overlap(
        &self,
        target: &FeatureLayer,
        join: &FeatureLayer,
        join_fields: &[&str],
    ) -> Result<FeatureLayer> {
        spatial_join::spatial_join_largest_overlap(target, join, join_fields)
    }

    fn join_field(
        &self,
        layer: &mut FeatureLayer,
        in_field: &str,
        table: &ZonalTable,
        fields: &[&str],
    ) -> Result<usize> {
        field_join::join_field(layer, in_field, table, fields)
    }
}
