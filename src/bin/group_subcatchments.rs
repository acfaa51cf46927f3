extern crate clap;

use std::path::PathBuf;

use clap::Parser;
use error_stack::Report;

use paragroup::error::GroupingError;
use paragroup::grouping::{group_subcatchments, SubcatchmentConfig};

#[derive(Parser)]
struct Opts {
    /// Path to the working directory
    path_to_wd: String,

    /// Sub-catchment polygon layer
    #[clap(long, default_value = "Subcatchments_example.shp")]
    subcatchments: String,

    /// Land use / land cover raster
    #[clap(long, default_value = "lulc_layer_fl_resample.tif")]
    lulc: String,

    /// Soil map unit polygon layer
    #[clap(long, default_value = "soiltypes_fl.shp")]
    soiltypes: String,

    /// Output sub-catchment layer with the Category field
    #[clap(long, default_value = "Subcat_FL_polygon.shp")]
    out_feature_class: String,

    /// Zonal statistics table
    #[clap(long, default_value = "zon_stat.csv")]
    out_table: String,

    /// Fail instead of replacing existing outputs
    #[clap(long, default_value = "false")]
    no_overwrite: bool,

    /// Write per-category counts to this CSV
    #[clap(long)]
    summary_csv: Option<String>,

    /// Also export the categorized sub-catchments as GeoJSON
    #[clap(long)]
    geojson: Option<String>,
}

fn main() -> Result<(), Report<GroupingError>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts: Opts = Opts::parse();

    let config = SubcatchmentConfig {
        wd: PathBuf::from(&opts.path_to_wd),
        subcatchments: opts.subcatchments,
        lulc: opts.lulc,
        soiltypes: opts.soiltypes,
        out_feature_class: opts.out_feature_class,
        out_table: opts.out_table,
        overwrite_output: !opts.no_overwrite,
        summary_csv: opts.summary_csv,
        geojson: opts.geojson,
    };

    let _ = group_subcatchments(&config)?;

    Ok(())
}
