extern crate lazy_static;

pub mod classification;
pub mod error;
pub mod field_join;
pub mod geoprocessing;
pub mod grouping;
pub mod raster;
pub mod spatial_join;
pub mod utils;
pub mod vector;
pub mod zonal;
