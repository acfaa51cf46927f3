use std::path::Path;

use error_stack::{Report, ResultExt};
use gdal::raster::GdalType;
use gdal::Dataset;

use crate::error::{GroupingError, Result};

/// A single band raster held in memory, row-major from the upper-left cell.
#[derive(Debug, Clone)]
pub struct Raster<T> {
    pub data: Vec<T>,
    pub width: usize,
    pub height: usize,
    pub geo_transform: [f64; 6],
    pub projection: String,
    pub no_data: Option<f64>,
}

impl<T> Raster<T>
where
    T: GdalType + Copy + Into<f64>,
{
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Raster<T>> {
        let path = path.as_ref();
        let dataset = Dataset::open(path)
            .change_context(GroupingError::Gdal)
            .attach_printable_lazy(|| format!("opening raster {}", path.display()))?;

        let geo_transform = dataset
            .geo_transform()
            .change_context(GroupingError::Gdal)
            .attach_printable_lazy(|| format!("{} has no geotransform", path.display()))?;
        let projection = dataset.projection();
        let (width, height) = dataset.raster_size();

        let band = dataset
            .rasterband(1)
            .change_context(GroupingError::Gdal)
            .attach_printable_lazy(|| format!("reading band 1 of {}", path.display()))?;
        let no_data = band.no_data_value();
        let buffer = band
            .read_as::<T>((0, 0), (width, height), (width, height), None)
            .change_context(GroupingError::Gdal)
            .attach_printable_lazy(|| format!("reading band 1 of {}", path.display()))?;

        Ok(Raster {
            data: buffer.data,
            width,
            height,
            geo_transform,
            projection,
            no_data,
        })
    }

    pub fn from_parts(
        data: Vec<T>,
        width: usize,
        height: usize,
        no_data: Option<f64>,
    ) -> Result<Raster<T>> {
        if data.len() != width * height {
            return Err(Report::new(GroupingError::GridMismatch(format!(
                "{} cells for a {}x{} raster",
                data.len(),
                width,
                height
            ))));
        }
        Ok(Raster {
            data,
            width,
            height,
            geo_transform: [0.0, 1.0, 0.0, height as f64, 0.0, -1.0],
            projection: String::new(),
            no_data,
        })
    }

    pub fn is_no_data(&self, value: T) -> bool {
        let value: f64 = value.into();
        match self.no_data {
            Some(nd) if nd.is_nan() => value.is_nan(),
            Some(nd) => value == nd,
            None => false,
        }
    }
}
