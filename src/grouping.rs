use std::path::{Path, PathBuf};

use error_stack::Report;
use log::info;

use crate::classification::{
    check_rule_tables, classify_conduits, classify_subcatchments, ClassificationSummary, AGE_FIELD,
    CATEGORY_FIELD, LAND_COVER_CLASSES, MATERIAL_FIELD, MUSYM_FIELD, SOIL_TEXTURES,
};
use crate::error::{GroupingError, Result};
use crate::geoprocessing::{GdalGeoprocessor, Geoprocessor};
use crate::raster::Raster;
use crate::vector::{dataset_files, remove_dataset, FeatureLayer, FID_FIELD};
use crate::zonal::{ZonalTable, MAJORITY_FIELD};

/// Soil attributes carried over by the spatial join.
pub const SOIL_JOIN_FIELDS: [&str; 4] = ["AREASYMBOL", "SPATIALVER", MUSYM_FIELD, "MUKEY"];

#[derive(Debug, Clone)]
pub struct SubcatchmentConfig {
    /// Working directory; relative file names below resolve against it.
    pub wd: PathBuf,
    pub subcatchments: String,
    pub lulc: String,
    pub soiltypes: String,
    pub out_feature_class: String,
    pub out_table: String,
    pub overwrite_output: bool,
    pub summary_csv: Option<String>,
    pub geojson: Option<String>,
}

impl Default for SubcatchmentConfig {
    fn default() -> Self {
        SubcatchmentConfig {
            wd: PathBuf::from("."),
            subcatchments: String::from("Subcatchments_example.shp"),
            lulc: String::from("lulc_layer_fl_resample.tif"),
            soiltypes: String::from("soiltypes_fl.shp"),
            out_feature_class: String::from("Subcat_FL_polygon.shp"),
            out_table: String::from("zon_stat.csv"),
            overwrite_output: true,
            summary_csv: None,
            geojson: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConduitConfig {
    pub wd: PathBuf,
    pub conduits: String,
    pub material_field: String,
    pub age_field: String,
    pub summary_csv: Option<String>,
}

impl Default for ConduitConfig {
    fn default() -> Self {
        ConduitConfig {
            wd: PathBuf::from("."),
            conduits: String::from("Conduit.shp"),
            material_field: String::from(MATERIAL_FIELD),
            age_field: String::from(AGE_FIELD),
            summary_csv: None,
        }
    }
}

/// Prepares an output location: removes what is there when overwriting is
/// enabled, refuses otherwise.
fn prepare_output(path: &Path, overwrite: bool) -> Result<()> {
    let exists = dataset_files(path).iter().any(|f| f.exists());
    if !exists {
        return Ok(());
    }
    if !overwrite {
        return Err(Report::new(GroupingError::OutputExists(
            path.display().to_string(),
        )));
    }
    remove_dataset(path)
}

/// Runs zonal statistics, spatial join and field join, returning the joined
/// sub-catchment layer (with `MUSYM` and `MAJORITY`) and the zonal table.
pub fn prepare_subcatchments<G: Geoprocessor>(
    geoprocessor: &G,
    subcatchments: &FeatureLayer,
    lulc: &Raster<i32>,
    soiltypes: &FeatureLayer,
) -> Result<(FeatureLayer, ZonalTable)> {
    info!(
        "zonal statistics (MAJORITY) over {} sub-catchments",
        subcatchments.records.len()
    );
    let table = geoprocessor.zonal_statistics_majority(subcatchments, FID_FIELD, lulc)?;

    info!(
        "spatial join of {} soil polygons (largest overlap)",
        soiltypes.records.len()
    );
    let mut joined =
        geoprocessor.spatial_join_largest_overlap(subcatchments, soiltypes, &SOIL_JOIN_FIELDS)?;

    info!("joining {} onto {}", MAJORITY_FIELD, FID_FIELD);
    let matched = geoprocessor.join_field(&mut joined, FID_FIELD, &table, &[MAJORITY_FIELD])?;
    info!(
        "{} of {} sub-catchments received {}",
        matched,
        joined.records.len(),
        MAJORITY_FIELD
    );

    Ok((joined, table))
}

fn log_unique_values(layer: &FeatureLayer) {
    for value in layer.unique_values(MUSYM_FIELD) {
        let texture = SOIL_TEXTURES
            .get(value.as_str())
            .copied()
            .unwrap_or("unmapped");
        info!("Unique value of - {}: {} ({})", MUSYM_FIELD, value, texture);
    }
    for value in layer.unique_values(MAJORITY_FIELD) {
        let class = value
            .parse::<i64>()
            .ok()
            .and_then(|code| LAND_COVER_CLASSES.get(&code).copied())
            .unwrap_or("unmapped");
        info!(
            "Unique value of - {}: {} ({})",
            MAJORITY_FIELD, value, class
        );
    }
}

/// Groups sub-catchments by soil texture and dominant land cover, writing the
/// zonal table and a new sub-catchment layer with a `Category` field.
pub fn group_subcatchments(config: &SubcatchmentConfig) -> Result<ClassificationSummary> {
    group_subcatchments_with(&GdalGeoprocessor, config)
}

pub fn group_subcatchments_with<G: Geoprocessor>(
    geoprocessor: &G,
    config: &SubcatchmentConfig,
) -> Result<ClassificationSummary> {
    check_rule_tables()?;

    let wd = config.wd.as_path();
    let out_feature_class = wd.join(&config.out_feature_class);
    let out_table = wd.join(&config.out_table);
    let geojson = config.geojson.as_ref().map(|g| wd.join(g));
    let summary_csv = config.summary_csv.as_ref().map(|s| wd.join(s));

    // every output is checked before any work is done
    let outputs = [
        Some(&out_table),
        Some(&out_feature_class),
        geojson.as_ref(),
        summary_csv.as_ref(),
    ];
    for output in outputs.into_iter().flatten() {
        prepare_output(output, config.overwrite_output)?;
    }

    let subcatchments = FeatureLayer::read(wd.join(&config.subcatchments))?;
    let lulc = Raster::<i32>::read(wd.join(&config.lulc))?;
    let soiltypes = FeatureLayer::read(wd.join(&config.soiltypes))?;

    let (mut joined, table) =
        prepare_subcatchments(geoprocessor, &subcatchments, &lulc, &soiltypes)?;
    table.write_csv(&out_table)?;
    info!("zonal table written to {}", out_table.display());

    log_unique_values(&joined);

    let summary = classify_subcatchments(&mut joined)?;
    summary.log("sub-catchments");

    joined.write(&out_feature_class)?;
    info!(
        "{} written with field {}",
        out_feature_class.display(),
        CATEGORY_FIELD
    );

    if let Some(geojson) = &geojson {
        joined.write_geojson(geojson)?;
    }
    if let Some(summary_csv) = &summary_csv {
        summary.write_csv(summary_csv)?;
    }

    Ok(summary)
}

/// Groups conduits by material and age, adding `Category` to the conduit
/// layer in place.
pub fn group_conduits(config: &ConduitConfig) -> Result<ClassificationSummary> {
    check_rule_tables()?;

    let wd = config.wd.as_path();
    let conduits_path = wd.join(&config.conduits);

    let mut conduits = FeatureLayer::read(&conduits_path)?;
    let summary = classify_conduits(&mut conduits, &config.material_field, &config.age_field)?;
    summary.log("conduits");

    let values: Vec<(i64, String)> = summary
        .assigned
        .iter()
        .map(|(fid, category)| (*fid, category.to_string()))
        .collect();
    let updated = FeatureLayer::write_text_field(&conduits_path, CATEGORY_FIELD, &values)?;
    info!(
        "{} of {} conduits in {} updated with field {}",
        updated,
        values.len(),
        conduits_path.display(),
        CATEGORY_FIELD
    );

    if let Some(summary_csv) = &config.summary_csv {
        summary.write_csv(wd.join(summary_csv))?;
    }

    Ok(summary)
}
