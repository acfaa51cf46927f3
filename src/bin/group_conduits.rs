extern crate clap;

use std::path::PathBuf;

use clap::Parser;
use error_stack::Report;

use paragroup::error::GroupingError;
use paragroup::grouping::{group_conduits, ConduitConfig};

#[derive(Parser)]
struct Opts {
    /// Path to the working directory
    path_to_wd: String,

    /// Conduit line layer, updated in place
    #[clap(long, default_value = "Conduit.shp")]
    conduits: String,

    /// Field holding the material type (Smooth, Concrete, Rough, Unknown or missing)
    #[clap(long, default_value = "MATERIAL")]
    material_field: String,

    /// Field holding the age class (New, Old)
    #[clap(long, default_value = "Age")]
    age_field: String,

    /// Write per-category counts to this CSV
    #[clap(long)]
    summary_csv: Option<String>,
}

fn main() -> Result<(), Report<GroupingError>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts: Opts = Opts::parse();

    let config = ConduitConfig {
        wd: PathBuf::from(&opts.path_to_wd),
        conduits: opts.conduits,
        material_field: opts.material_field,
        age_field: opts.age_field,
        summary_csv: opts.summary_csv,
    };

    let _ = group_conduits(&config)?;

    Ok(())
}

// RUST_LOG=debug ./group_conduits /geodata/flagstaff_swmm/
