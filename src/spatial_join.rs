use error_stack::Report;
use gdal::vector::{Envelope, Geometry};
use log::debug;

use crate::error::{GroupingError, Result};
use crate::vector::{AttrValue, FeatureLayer, FeatureRecord, FieldDef, FieldKind};

pub const JOIN_COUNT_FIELD: &str = "Join_Count";
pub const TARGET_FID_FIELD: &str = "TARGET_FID";

/// Index of the candidate with the greatest positive overlap. The first one
/// encountered wins a tie.
pub fn largest_overlap<I>(overlaps: I) -> Option<usize>
where
    I: IntoIterator<Item = (usize, f64)>,
{
    overlaps
        .into_iter()
        .filter(|(_, area)| *area > 0.0 && area.is_finite())
        .fold(None, |acc: Option<(usize, f64)>, (index, area)| match acc {
            Some((_, best)) if area <= best => acc,
            _ => Some((index, area)),
        })
        .map(|(index, _)| index)
}

fn envelopes_overlap(a: &Envelope, b: &Envelope) -> bool {
    a.MinX <= b.MaxX && b.MinX <= a.MaxX && a.MinY <= b.MaxY && b.MinY <= a.MaxY
}

fn overlap_area(target: &Geometry, join: &Geometry) -> f64 {
    if !target.intersects(join) {
        return 0.0;
    }
    target.intersection(join).map(|g| g.area()).unwrap_or(0.0)
}

/// Output name for a join field, suffixed when the target already uses it.
fn output_field_name(fields: &[FieldDef], name: &str) -> String {
    let mut candidate = name.to_string();
    let mut i = 1;
    while fields.iter().any(|f| f.name == candidate) {
        candidate = format!("{}_{}", name, i);
        i += 1;
    }
    candidate
}

/// Output schema of the join: join bookkeeping, the target's own fields, then
/// the requested join fields. Returns the schema and, for each join field, the
/// name it is written under.
fn joined_schema(
    target: &FeatureLayer,
    join: &FeatureLayer,
    join_fields: &[&str],
) -> Result<(Vec<FieldDef>, Vec<String>)> {
    let mut fields: Vec<FieldDef> = vec![
        FieldDef::new(JOIN_COUNT_FIELD, FieldKind::Integer),
        FieldDef::new(TARGET_FID_FIELD, FieldKind::Integer),
    ];
    for field in &target.fields {
        if field.name != JOIN_COUNT_FIELD && field.name != TARGET_FID_FIELD {
            fields.push(field.clone());
        }
    }

    let mut output_names: Vec<String> = Vec::with_capacity(join_fields.len());
    for name in join_fields {
        let def = join.field(name).ok_or_else(|| {
            Report::new(GroupingError::MissingField(name.to_string()))
                .attach_printable(format!("join layer {}", join.name))
        })?;
        let output_name = output_field_name(&fields, name);
        fields.push(FieldDef::new(&output_name, def.kind));
        output_names.push(output_name);
    }

    Ok((fields, output_names))
}

/// One-to-one spatial join keeping all targets.
///
/// Each target record is emitted once, in source order and with its own fid.
/// `join_fields` are copied from the join feature with the largest overlap
/// area; targets without an overlapping join feature get nulls.
pub fn spatial_join_largest_overlap(
    target: &FeatureLayer,
    join: &FeatureLayer,
    join_fields: &[&str],
) -> Result<FeatureLayer> {
    let (fields, output_names) = joined_schema(target, join, join_fields)?;

    let join_envelopes: Vec<Option<Envelope>> = join
        .records
        .iter()
        .map(|r| r.geometry.as_ref().map(|g| g.envelope()))
        .collect();

    let mut output = FeatureLayer {
        name: target.name.clone(),
        geometry_type: target.geometry_type,
        srs_wkt: target.srs_wkt.clone(),
        fields,
        records: Vec::with_capacity(target.records.len()),
    };

    let mut matched = 0;
    for record in &target.records {
        let best: Option<usize> = match &record.geometry {
            Some(target_geometry) => {
                let target_envelope = target_geometry.envelope();
                let overlaps = join
                    .records
                    .iter()
                    .enumerate()
                    .filter_map(|(i, candidate)| {
                        let envelope = join_envelopes[i].as_ref()?;
                        if !envelopes_overlap(&target_envelope, envelope) {
                            return None;
                        }
                        let geometry = candidate.geometry.as_ref()?;
                        Some((i, overlap_area(target_geometry, geometry)))
                    });
                largest_overlap(overlaps)
            }
            None => None,
        };

        let joined = join_record(
            record,
            best.map(|i| &join.records[i]),
            join_fields,
            &output_names,
        );
        if best.is_some() {
            matched += 1;
        }
        output.records.push(joined);
    }

    debug!(
        "spatial join matched {} of {} targets",
        matched,
        target.records.len()
    );
    Ok(output)
}

fn join_record(
    target: &FeatureRecord,
    join: Option<&FeatureRecord>,
    join_fields: &[&str],
    output_names: &[String],
) -> FeatureRecord {
    let mut record = target.clone();
    record.set(JOIN_COUNT_FIELD, AttrValue::Integer(join.is_some() as i64));
    record.set(TARGET_FID_FIELD, AttrValue::Integer(target.fid));

    for (name, output_name) in join_fields.iter().zip(output_names) {
        let value = join
            .and_then(|j| j.get(name))
            .cloned()
            .unwrap_or(AttrValue::Null);
        record.set(output_name, value);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_largest_overlap_picks_greatest_area() {
        assert_eq!(largest_overlap(vec![(0, 2.0), (1, 8.0), (2, 3.5)]), Some(1));
    }

    #[test]
    fn test_largest_overlap_first_wins_tie() {
        assert_eq!(largest_overlap(vec![(3, 5.0), (1, 5.0)]), Some(3));
    }

    #[test]
    fn test_largest_overlap_ignores_touching() {
        assert_eq!(largest_overlap(vec![(0, 0.0), (1, f64::NAN)]), None);
        assert_eq!(largest_overlap(Vec::new()), None);
    }

    #[test]
    fn test_output_field_name_suffixes_collisions() {
        let fields = vec![
            FieldDef::new("MUSYM", FieldKind::Text),
            FieldDef::new("MUSYM_1", FieldKind::Text),
        ];
        assert_eq!(output_field_name(&fields, "MUKEY"), "MUKEY");
        assert_eq!(output_field_name(&fields, "MUSYM"), "MUSYM_2");
    }

    #[test]
    fn test_targets_without_geometry_are_kept_with_nulls() {
        let mut target = FeatureLayer::new(
            "subcatchments",
            vec![FieldDef::new("Name", FieldKind::Text)],
        );
        target
            .records
            .push(FeatureRecord::new(0).with_attr("Name", AttrValue::Text("S1".to_string())));
        target
            .records
            .push(FeatureRecord::new(1).with_attr("Name", AttrValue::Text("S2".to_string())));

        let mut soils = FeatureLayer::new("soils", vec![FieldDef::new("MUSYM", FieldKind::Text)]);
        soils
            .records
            .push(FeatureRecord::new(0).with_attr("MUSYM", AttrValue::Text("13".to_string())));

        let joined = spatial_join_largest_overlap(&target, &soils, &["MUSYM"]).unwrap();

        assert_eq!(joined.records.len(), 2);
        assert_eq!(joined.fields[0].name, JOIN_COUNT_FIELD);
        assert!(joined.has_field("MUSYM"));
        for (i, record) in joined.records.iter().enumerate() {
            assert_eq!(record.fid, i as i64);
            assert_eq!(record.get(JOIN_COUNT_FIELD), Some(&AttrValue::Integer(0)));
            assert_eq!(
                record.get(TARGET_FID_FIELD),
                Some(&AttrValue::Integer(i as i64))
            );
            assert_eq!(record.get("MUSYM"), Some(&AttrValue::Null));
        }
    }

    #[test]
    fn test_missing_join_field_is_an_error() {
        let target = FeatureLayer::new("subcatchments", Vec::new());
        let soils = FeatureLayer::new("soils", vec![FieldDef::new("MUSYM", FieldKind::Text)]);
        let err = spatial_join_largest_overlap(&target, &soils, &["MUKEY"]).unwrap_err();
        assert_eq!(
            err.current_context(),
            &GroupingError::MissingField("MUKEY".to_string())
        );
    }
}
