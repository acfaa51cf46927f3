use error_stack::Report;
use log::debug;

use crate::error::{GroupingError, Result};
use crate::vector::{AttrValue, FeatureLayer, FieldKind};
use crate::zonal::ZonalTable;

/// Attaches `fields` of `table` to the records of `layer` whose `in_field`
/// equals the table's zone id. Records without a matching row get nulls.
/// Fields already present on the layer are overwritten.
pub fn join_field(
    layer: &mut FeatureLayer,
    in_field: &str,
    table: &ZonalTable,
    fields: &[&str],
) -> Result<usize> {
    layer.require_field(in_field)?;
    for field in fields {
        if !table.has_column(field) {
            return Err(Report::new(GroupingError::MissingField(field.to_string()))
                .attach_printable(format!("zonal table keyed on {}", table.key_column())));
        }
        layer.add_field(field, FieldKind::Integer);
    }

    let mut matched = 0;
    for record in layer.records.iter_mut() {
        let zone = record.key(in_field);
        let row_found = zone.and_then(|z| table.get(z)).is_some();
        for field in fields {
            let value = zone
                .and_then(|z| table.value(z, field))
                .unwrap_or(AttrValue::Null);
            record.set(field, value);
        }
        if row_found {
            matched += 1;
        }
    }

    debug!(
        "joined {:?} onto {} of {} records",
        fields,
        matched,
        layer.records.len()
    );
    Ok(matched)
}
