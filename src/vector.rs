use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use error_stack::{Report, ResultExt};
use gdal::spatial_ref::SpatialRef;
use gdal::vector::{Feature, FieldValue, Geometry, LayerAccess, OGRFieldType, OGRwkbGeometryType};
use gdal::{Dataset, DatasetOptions, DriverManager, GdalOpenFlags, LayerOptions};
use geojson::{Feature as GeoJsonFeature, FeatureCollection};
use log::{debug, warn};

use crate::error::{GroupingError, Result};

/// Name under which the feature id is addressed, as in an attribute table.
pub const FID_FIELD: &str = "FID";

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Integer(i64),
    Real(f64),
    Text(String),
    /// Calendar date as `YYYY-MM-DD`.
    Date(String),
    /// Date and time in RFC 3339 form.
    DateTime(String),
    Null,
}

impl AttrValue {
    /// Integer view of the value. Reals are truncated toward zero and numeric
    /// text is parsed, since attribute tables are not consistent about either.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Integer(v) => Some(*v),
            AttrValue::Real(v) if v.is_finite() => Some(v.trunc() as i64),
            AttrValue::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn from_field_value(value: Option<FieldValue>) -> AttrValue {
        match value {
            None => AttrValue::Null,
            Some(FieldValue::IntegerValue(v)) => AttrValue::Integer(v as i64),
            Some(FieldValue::Integer64Value(v)) => AttrValue::Integer(v),
            Some(FieldValue::RealValue(v)) => AttrValue::Real(v),
            Some(FieldValue::StringValue(v)) => AttrValue::Text(v),
            Some(FieldValue::DateValue(d)) => AttrValue::Date(d.to_string()),
            Some(FieldValue::DateTimeValue(dt)) => AttrValue::DateTime(dt.to_rfc3339()),
            Some(FieldValue::IntegerListValue(v)) => AttrValue::Text(join_list(&v)),
            Some(FieldValue::Integer64ListValue(v)) => AttrValue::Text(join_list(&v)),
            Some(FieldValue::RealListValue(v)) => AttrValue::Text(join_list(&v)),
            Some(FieldValue::StringListValue(v)) => AttrValue::Text(v.join(",")),
        }
    }

    fn to_field_value(&self, kind: FieldKind) -> Option<FieldValue> {
        match (kind, self) {
            (_, AttrValue::Null) => None,
            (FieldKind::Integer, v) => v.as_i64().map(|i| match i32::try_from(i) {
                Ok(small) => FieldValue::IntegerValue(small),
                Err(_) => FieldValue::Integer64Value(i),
            }),
            (FieldKind::Integer64, v) => v.as_i64().map(FieldValue::Integer64Value),
            (FieldKind::Real, AttrValue::Integer(i)) => Some(FieldValue::RealValue(*i as f64)),
            (FieldKind::Real, AttrValue::Real(r)) => Some(FieldValue::RealValue(*r)),
            (FieldKind::Real, AttrValue::Text(s)) => {
                s.trim().parse().ok().map(FieldValue::RealValue)
            }
            (FieldKind::Real, _) => None,
            // dates go through OGR's string parsing, see `set_attr`
            (FieldKind::Text | FieldKind::Date | FieldKind::DateTime, v) => {
                Some(FieldValue::StringValue(v.to_string()))
            }
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            AttrValue::Integer(v) => serde_json::Value::from(*v),
            AttrValue::Real(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            AttrValue::Text(s) | AttrValue::Date(s) | AttrValue::DateTime(s) => {
                serde_json::Value::String(s.clone())
            }
            AttrValue::Null => serde_json::Value::Null,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Integer(v) => write!(f, "{}", v),
            AttrValue::Real(v) => write!(f, "{}", v),
            AttrValue::Text(s) | AttrValue::Date(s) | AttrValue::DateTime(s) => f.write_str(s),
            AttrValue::Null => f.write_str("<null>"),
        }
    }
}

fn join_list<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn set_attr(
    feature: &mut Feature,
    field: &FieldDef,
    value: &AttrValue,
) -> gdal::errors::Result<()> {
    let Some(field_value) = value.to_field_value(field.kind) else {
        return Ok(());
    };
    match (field.kind, field_value) {
        (FieldKind::Date | FieldKind::DateTime, FieldValue::StringValue(s)) => {
            feature.set_field_string(&field.name, &s)
        }
        (_, field_value) => feature.set_field(&field.name, &field_value),
    }
}

/// Storage kind of an attribute column. List columns are read as
/// comma-separated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Integer64,
    Real,
    Text,
    Date,
    DateTime,
}

impl FieldKind {
    fn from_ogr(field_type: OGRFieldType::Type) -> FieldKind {
        match field_type {
            OGRFieldType::OFTInteger => FieldKind::Integer,
            OGRFieldType::OFTInteger64 => FieldKind::Integer64,
            OGRFieldType::OFTReal => FieldKind::Real,
            OGRFieldType::OFTDate => FieldKind::Date,
            OGRFieldType::OFTDateTime => FieldKind::DateTime,
            _ => FieldKind::Text,
        }
    }

    fn to_ogr(self) -> OGRFieldType::Type {
        match self {
            FieldKind::Integer => OGRFieldType::OFTInteger,
            FieldKind::Integer64 => OGRFieldType::OFTInteger64,
            FieldKind::Real => OGRFieldType::OFTReal,
            FieldKind::Text => OGRFieldType::OFTString,
            FieldKind::Date => OGRFieldType::OFTDate,
            FieldKind::DateTime => OGRFieldType::OFTDateTime,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(name: &str, kind: FieldKind) -> FieldDef {
        FieldDef {
            name: name.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeatureRecord {
    pub fid: i64,
    pub geometry: Option<Geometry>,
    pub attributes: HashMap<String, AttrValue>,
}

impl FeatureRecord {
    pub fn new(fid: i64) -> FeatureRecord {
        FeatureRecord {
            fid,
            geometry: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_attr(mut self, field: &str, value: AttrValue) -> FeatureRecord {
        self.attributes.insert(field.to_string(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&AttrValue> {
        self.attributes.get(field)
    }

    pub fn set(&mut self, field: &str, value: AttrValue) {
        self.attributes.insert(field.to_string(), value);
    }

    /// Integer key of the record under `field`; `FID` resolves to the feature id.
    pub fn key(&self, field: &str) -> Option<i64> {
        if field == FID_FIELD {
            return Some(self.fid);
        }
        self.get(field).and_then(AttrValue::as_i64)
    }
}

/// A vector layer loaded into memory: schema plus records in source order.
#[derive(Debug, Clone)]
pub struct FeatureLayer {
    pub name: String,
    pub geometry_type: OGRwkbGeometryType::Type,
    pub srs_wkt: Option<String>,
    pub fields: Vec<FieldDef>,
    pub records: Vec<FeatureRecord>,
}

impl FeatureLayer {
    pub fn new(name: &str, fields: Vec<FieldDef>) -> FeatureLayer {
        FeatureLayer {
            name: name.to_string(),
            geometry_type: OGRwkbGeometryType::wkbUnknown,
            srs_wkt: None,
            fields,
            records: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        name == FID_FIELD || self.field(name).is_some()
    }

    pub fn require_field(&self, name: &str) -> Result<()> {
        if self.has_field(name) {
            Ok(())
        } else {
            Err(Report::new(GroupingError::MissingField(name.to_string()))
                .attach_printable(format!("layer {}", self.name)))
        }
    }

    /// Appends a field to the schema. Returns false when it already exists.
    pub fn add_field(&mut self, name: &str, kind: FieldKind) -> bool {
        if self.field(name).is_some() {
            return false;
        }
        self.fields.push(FieldDef::new(name, kind));
        true
    }

    /// Kind a field is written with: 32-bit integer columns holding values
    /// outside the i32 range are widened to 64-bit.
    fn storage_kind(&self, field: &FieldDef) -> FieldKind {
        if field.kind != FieldKind::Integer {
            return field.kind;
        }
        let overflows = self
            .records
            .iter()
            .filter_map(|r| r.get(&field.name).and_then(AttrValue::as_i64))
            .any(|i| i32::try_from(i).is_err());
        if overflows {
            FieldKind::Integer64
        } else {
            FieldKind::Integer
        }
    }

    pub fn unique_values(&self, field: &str) -> BTreeSet<String> {
        self.records
            .iter()
            .map(|r| r.get(field).cloned().unwrap_or(AttrValue::Null).to_string())
            .collect()
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<FeatureLayer> {
        let path = path.as_ref();
        let dataset = Dataset::open(path)
            .change_context(GroupingError::Gdal)
            .attach_printable_lazy(|| format!("opening vector {}", path.display()))?;
        let mut layer = dataset
            .layer(0)
            .change_context(GroupingError::Gdal)
            .attach_printable_lazy(|| format!("{} has no layer", path.display()))?;

        let name = layer.name();
        let srs_wkt = layer.spatial_ref().and_then(|srs| srs.to_wkt().ok());
        let fields: Vec<FieldDef> = layer
            .defn()
            .fields()
            .map(|f| FieldDef {
                name: f.name(),
                kind: FieldKind::from_ogr(f.field_type()),
            })
            .collect();

        let mut geometry_type = OGRwkbGeometryType::wkbUnknown;
        let mut records: Vec<FeatureRecord> = Vec::new();
        for feature in layer.features() {
            let fid = feature
                .fid()
                .map(|f| f as i64)
                .unwrap_or(records.len() as i64);
            let geometry = feature.geometry().cloned();
            if geometry_type == OGRwkbGeometryType::wkbUnknown {
                if let Some(g) = &geometry {
                    geometry_type = g.geometry_type();
                }
            }

            let mut attributes = HashMap::new();
            for (field_name, value) in feature.fields() {
                attributes.insert(field_name, AttrValue::from_field_value(value));
            }
            records.push(FeatureRecord {
                fid,
                geometry,
                attributes,
            });
        }

        debug!("read {} features from {}", records.len(), path.display());

        Ok(FeatureLayer {
            name,
            geometry_type,
            srs_wkt,
            fields,
            records,
        })
    }

    /// Writes the layer to a new dataset; the driver follows the file extension.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let driver_name = driver_name_for(path);
        let driver = DriverManager::get_driver_by_name(driver_name)
            .change_context(GroupingError::Gdal)
            .attach_printable_lazy(|| format!("driver {} unavailable", driver_name))?;
        let mut dataset = driver
            .create_vector_only(path)
            .change_context(GroupingError::Gdal)
            .attach_printable_lazy(|| format!("creating {}", path.display()))?;

        let srs = match &self.srs_wkt {
            Some(wkt) => Some(SpatialRef::from_wkt(wkt).change_context(GroupingError::Gdal)?),
            None => None,
        };
        let layer = dataset
            .create_layer(LayerOptions {
                name: &self.name,
                srs: srs.as_ref(),
                ty: self.geometry_type,
                options: None,
            })
            .change_context(GroupingError::Gdal)
            .attach_printable_lazy(|| format!("creating layer {}", self.name))?;

        let fields: Vec<FieldDef> = self
            .fields
            .iter()
            .map(|f| FieldDef::new(&f.name, self.storage_kind(f)))
            .collect();
        let field_defs: Vec<(&str, OGRFieldType::Type)> = fields
            .iter()
            .map(|f| (f.name.as_str(), f.kind.to_ogr()))
            .collect();
        layer
            .create_defn_fields(&field_defs)
            .change_context(GroupingError::Gdal)?;

        for record in &self.records {
            let mut feature = Feature::new(layer.defn()).change_context(GroupingError::Gdal)?;
            if let Some(geometry) = &record.geometry {
                feature
                    .set_geometry(geometry.clone())
                    .change_context(GroupingError::Gdal)?;
            }
            for field in &fields {
                if let Some(value) = record.get(&field.name) {
                    set_attr(&mut feature, field, value)
                        .change_context(GroupingError::Gdal)
                        .attach_printable_lazy(|| {
                            format!("field {} of fid {}", field.name, record.fid)
                        })?;
                }
            }
            feature
                .create(&layer)
                .change_context(GroupingError::Gdal)
                .attach_printable_lazy(|| format!("writing fid {}", record.fid))?;
        }

        debug!(
            "wrote {} features to {}",
            self.records.len(),
            path.display()
        );
        Ok(())
    }

    /// Adds `field` as text to the first layer of an existing dataset when it is
    /// absent, then sets it on the given features. Other features are untouched.
    /// Returns the number of features updated; ids not in the layer are skipped
    /// with a warning.
    pub fn write_text_field<P: AsRef<Path>>(
        path: P,
        field: &str,
        values: &[(i64, String)],
    ) -> Result<usize> {
        let path = path.as_ref();
        let dataset = Dataset::open_ex(
            path,
            DatasetOptions {
                open_flags: GdalOpenFlags::GDAL_OF_UPDATE | GdalOpenFlags::GDAL_OF_VECTOR,
                ..Default::default()
            },
        )
        .change_context(GroupingError::Gdal)
        .attach_printable_lazy(|| format!("opening {} for update", path.display()))?;
        let layer = dataset
            .layer(0)
            .change_context(GroupingError::Gdal)
            .attach_printable_lazy(|| format!("{} has no layer", path.display()))?;

        let exists = layer.defn().fields().any(|f| f.name() == field);
        if !exists {
            layer
                .create_defn_fields(&[(field, OGRFieldType::OFTString)])
                .change_context(GroupingError::Gdal)
                .attach_printable_lazy(|| format!("adding field {}", field))?;
        }

        let mut updated = 0;
        for (fid, value) in values {
            let Some(mut feature) = u64::try_from(*fid).ok().and_then(|f| layer.feature(f)) else {
                warn!(
                    "{} has no feature with fid {}, {} not set",
                    path.display(),
                    fid,
                    field
                );
                continue;
            };
            feature
                .set_field_string(field, value)
                .change_context(GroupingError::Gdal)?;
            layer
                .set_feature(feature)
                .change_context(GroupingError::Gdal)
                .attach_printable_lazy(|| format!("updating fid {}", fid))?;
            updated += 1;
        }

        Ok(updated)
    }

    pub fn to_geojson(&self) -> Result<String> {
        let mut features: Vec<GeoJsonFeature> = Vec::with_capacity(self.records.len());

        for record in &self.records {
            let geometry = match &record.geometry {
                Some(g) => {
                    let json = g.json().change_context(GroupingError::Gdal)?;
                    Some(
                        serde_json::from_str::<geojson::Geometry>(&json)
                            .change_context(GroupingError::Serialization)?,
                    )
                }
                None => None,
            };

            let mut properties = serde_json::Map::new();
            for field in &self.fields {
                let value = record
                    .get(&field.name)
                    .map(AttrValue::to_json)
                    .unwrap_or(serde_json::Value::Null);
                properties.insert(field.name.clone(), value);
            }

            features.push(GeoJsonFeature {
                bbox: None,
                geometry,
                id: Some(geojson::feature::Id::Number(serde_json::Number::from(
                    record.fid,
                ))),
                properties: Some(properties),
                foreign_members: None,
            });
        }

        let collection = FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        };
        serde_json::to_string_pretty(&collection).change_context(GroupingError::Serialization)
    }

    pub fn write_geojson<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let geojson_string = self.to_geojson()?;
        fs::write(path.as_ref(), geojson_string)
            .change_context(GroupingError::Io)
            .attach_printable_lazy(|| format!("writing {}", path.as_ref().display()))
    }
}

pub fn driver_name_for<P: AsRef<Path>>(path: P) -> &'static str {
    let extension = path
        .as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("geojson") | Some("json") => "GeoJSON",
        Some("gpkg") => "GPKG",
        _ => "ESRI Shapefile",
    }
}

/// Every file making up a vector dataset at `path` (shapefile sidecars included).
pub fn dataset_files<P: AsRef<Path>>(path: P) -> Vec<PathBuf> {
    let path = path.as_ref();
    if driver_name_for(path) != "ESRI Shapefile" {
        return vec![path.to_path_buf()];
    }
    ["shp", "shx", "dbf", "prj", "cpg", "qix", "sbn", "sbx"]
        .iter()
        .map(|ext| path.with_extension(ext))
        .collect()
}

pub fn remove_dataset<P: AsRef<Path>>(path: P) -> Result<()> {
    for file in dataset_files(path) {
        if file.exists() {
            fs::remove_file(&file)
                .change_context(GroupingError::Io)
                .attach_printable_lazy(|| format!("removing {}", file.display()))?;
        }
    }
    Ok(())
}
