use std::fmt;

/// Error context for everything that can abort a grouping run.
///
/// Failures are reported through `error_stack::Report<GroupingError>`, with
/// printable attachments naming the path or field involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupingError {
    /// A GDAL/OGR call failed (missing file, unsupported driver, bad geometry).
    Gdal,
    /// Local filesystem failure outside of GDAL.
    Io,
    /// A field the pipeline depends on is not present in a layer or table.
    MissingField(String),
    /// An output exists and overwriting was disabled.
    OutputExists(String),
    /// Reading or writing a CSV table failed.
    Csv,
    /// Serializing an export failed.
    Serialization,
    /// Two rows of a rule table match the same attribute pair.
    RuleOverlap(String),
    /// Cell data does not match the stated grid size.
    GridMismatch(String),
}

impl fmt::Display for GroupingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupingError::Gdal => f.write_str("geoprocessing call failed"),
            GroupingError::Io => f.write_str("filesystem operation failed"),
            GroupingError::MissingField(name) => write!(f, "field {} not found", name),
            GroupingError::OutputExists(path) => {
                write!(
                    f,
                    "output {} already exists and overwriting is disabled",
                    path
                )
            }
            GroupingError::Csv => f.write_str("could not read or write table"),
            GroupingError::Serialization => f.write_str("could not serialize export"),
            GroupingError::RuleOverlap(rows) => write!(f, "rule table rows overlap: {}", rows),
            GroupingError::GridMismatch(detail) => write!(f, "grid size mismatch: {}", detail),
        }
    }
}

impl std::error::Error for GroupingError {}

pub type Result<T> = error_stack::Result<T, GroupingError>;
