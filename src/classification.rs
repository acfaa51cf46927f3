//! Category rule tables for sub-catchments and conduits.
//!
//! Each table is an ordered list of rules; the first rule whose attribute
//! groups both contain the record's values decides the category. Records that
//! match no rule stay uncategorized.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::path::Path;

use error_stack::{Report, ResultExt};
use lazy_static::lazy_static;
use log::{debug, info, warn};
use maplit::hashmap;
use serde::Serialize;

use crate::error::{GroupingError, Result};
use crate::vector::{AttrValue, FeatureLayer, FeatureRecord, FieldKind};
use crate::zonal::MAJORITY_FIELD;

pub const CATEGORY_FIELD: &str = "Category";
pub const MUSYM_FIELD: &str = "MUSYM";
pub const MATERIAL_FIELD: &str = "MATERIAL";
pub const AGE_FIELD: &str = "Age";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Category(char);

impl Category {
    pub fn letter(self) -> char {
        self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// soil map unit symbols (MUSYM)
pub const STONY_CLAY_LOAM: &[&str] = &["2", "11", "2A", "2B"];
pub const COBBLY_CLAY_LOAM: &[&str] = &["1", "12", "18", "15A", "15"];
pub const LYNX_LOAM: &[&str] = &["13"];
pub const SANDY_LOAM: &[&str] = &["14", "17"];

// dominant land cover codes (zonal MAJORITY)
pub const HIGH: &[i64] = &[24];
pub const MEDIUM_LOW: &[i64] = &[22, 23];
pub const OPEN: &[i64] = &[21, 52, 42, 0, 71, 95];

lazy_static! {
    pub static ref SOIL_TEXTURES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        for (symbols, texture) in [
            (STONY_CLAY_LOAM, "Stony clay loam"),
            (COBBLY_CLAY_LOAM, "Cobbly clay loam"),
            (LYNX_LOAM, "Lynx loam"),
            (SANDY_LOAM, "Sandy loam"),
        ] {
            for symbol in symbols {
                m.insert(*symbol, texture);
            }
        }
        m
    };
    pub static ref LAND_COVER_CLASSES: HashMap<i64, &'static str> = hashmap! {
        24 => "High",
        22 => "Medium-low",
        23 => "Medium-low",
        0 => "Open",
        21 => "Open",
        42 => "Open",
        52 => "Open",
        71 => "Open",
        95 => "Open",
    };
}

#[derive(Debug, Clone, Copy)]
pub struct SubcatchmentRule {
    pub soils: &'static [&'static str],
    pub codes: &'static [i64],
    pub category: Category,
}

impl SubcatchmentRule {
    pub fn matches(&self, musym: &str, code: i64) -> bool {
        self.soils.contains(&musym) && self.codes.contains(&code)
    }

    fn overlaps(&self, other: &SubcatchmentRule) -> bool {
        self.soils.iter().any(|s| other.soils.contains(s))
            && self.codes.iter().any(|c| other.codes.contains(c))
    }
}

pub static SUBCATCHMENT_RULES: [SubcatchmentRule; 12] = [
    SubcatchmentRule {
        soils: STONY_CLAY_LOAM,
        codes: HIGH,
        category: Category('A'),
    },
    SubcatchmentRule {
        soils: STONY_CLAY_LOAM,
        codes: MEDIUM_LOW,
        category: Category('B'),
    },
    SubcatchmentRule {
        soils: STONY_CLAY_LOAM,
        codes: OPEN,
        category: Category('C'),
    },
    SubcatchmentRule {
        soils: COBBLY_CLAY_LOAM,
        codes: HIGH,
        category: Category('D'),
    },
    SubcatchmentRule {
        soils: COBBLY_CLAY_LOAM,
        codes: MEDIUM_LOW,
        category: Category('E'),
    },
    SubcatchmentRule {
        soils: COBBLY_CLAY_LOAM,
        codes: OPEN,
        category: Category('F'),
    },
    SubcatchmentRule {
        soils: LYNX_LOAM,
        codes: HIGH,
        category: Category('G'),
    },
    SubcatchmentRule {
        soils: LYNX_LOAM,
        codes: MEDIUM_LOW,
        category: Category('H'),
    },
    SubcatchmentRule {
        soils: LYNX_LOAM,
        codes: OPEN,
        category: Category('I'),
    },
    SubcatchmentRule {
        soils: SANDY_LOAM,
        codes: HIGH,
        category: Category('J'),
    },
    SubcatchmentRule {
        soils: SANDY_LOAM,
        codes: MEDIUM_LOW,
        category: Category('K'),
    },
    SubcatchmentRule {
        soils: SANDY_LOAM,
        codes: OPEN,
        category: Category('L'),
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Material {
    /// steel, PVC
    Smooth,
    /// RCP, reinforced concrete
    Concrete,
    /// corrugated metal pipe
    Rough,
    UnknownOrMissing,
}

impl Material {
    pub fn parse(s: &str) -> Option<Material> {
        match s {
            "Smooth" => Some(Material::Smooth),
            "Concrete" => Some(Material::Concrete),
            "Rough" => Some(Material::Rough),
            "Unknown or missing" => Some(Material::UnknownOrMissing),
            _ => None,
        }
    }
}

/// Whether a conduit was installed before or after the reference period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Age {
    New,
    Old,
}

impl Age {
    pub fn parse(s: &str) -> Option<Age> {
        match s {
            "New" => Some(Age::New),
            "Old" => Some(Age::Old),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConduitRule {
    pub material: Material,
    pub age: Age,
    pub category: Category,
}

pub static CONDUIT_RULES: [ConduitRule; 8] = [
    ConduitRule {
        material: Material::Smooth,
        age: Age::New,
        category: Category('A'),
    },
    ConduitRule {
        material: Material::Smooth,
        age: Age::Old,
        category: Category('B'),
    },
    ConduitRule {
        material: Material::Concrete,
        age: Age::New,
        category: Category('C'),
    },
    ConduitRule {
        material: Material::Concrete,
        age: Age::Old,
        category: Category('D'),
    },
    ConduitRule {
        material: Material::Rough,
        age: Age::New,
        category: Category('E'),
    },
    ConduitRule {
        material: Material::Rough,
        age: Age::Old,
        category: Category('F'),
    },
    ConduitRule {
        material: Material::UnknownOrMissing,
        age: Age::New,
        category: Category('G'),
    },
    ConduitRule {
        material: Material::UnknownOrMissing,
        age: Age::Old,
        category: Category('H'),
    },
];

pub fn classify_subcatchment(musym: &str, code: i64) -> Option<Category> {
    SUBCATCHMENT_RULES
        .iter()
        .find(|rule| rule.matches(musym, code))
        .map(|rule| rule.category)
}

pub fn classify_conduit(material: &str, age: &str) -> Option<Category> {
    let material = Material::parse(material)?;
    let age = Age::parse(age)?;
    CONDUIT_RULES
        .iter()
        .find(|rule| rule.material == material && rule.age == age)
        .map(|rule| rule.category)
}

/// Pairs of sub-catchment rule rows that could match the same record.
pub fn subcatchment_rule_overlaps() -> Vec<(usize, usize)> {
    let mut overlaps = Vec::new();
    for i in 0..SUBCATCHMENT_RULES.len() {
        for j in i + 1..SUBCATCHMENT_RULES.len() {
            if SUBCATCHMENT_RULES[i].overlaps(&SUBCATCHMENT_RULES[j]) {
                overlaps.push((i, j));
            }
        }
    }
    overlaps
}

pub fn conduit_rule_overlaps() -> Vec<(usize, usize)> {
    let mut overlaps = Vec::new();
    for i in 0..CONDUIT_RULES.len() {
        for j in i + 1..CONDUIT_RULES.len() {
            let (a, b) = (&CONDUIT_RULES[i], &CONDUIT_RULES[j]);
            if a.material == b.material && a.age == b.age {
                overlaps.push((i, j));
            }
        }
    }
    overlaps
}

/// Fails when any two rows of either table overlap, since rule order would
/// then change the result.
pub fn check_rule_tables() -> Result<()> {
    let subcatchments = subcatchment_rule_overlaps();
    if !subcatchments.is_empty() {
        return Err(
            Report::new(GroupingError::RuleOverlap(format!("{:?}", subcatchments)))
                .attach_printable("sub-catchment rule table"),
        );
    }
    let conduits = conduit_rule_overlaps();
    if !conduits.is_empty() {
        return Err(
            Report::new(GroupingError::RuleOverlap(format!("{:?}", conduits)))
                .attach_printable("conduit rule table"),
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct SummaryRow {
    category: String,
    count: usize,
}

/// Outcome of classifying a layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationSummary {
    pub counts: BTreeMap<Category, usize>,
    pub unmatched: usize,
    /// fid and category of every record a rule matched
    pub assigned: Vec<(i64, Category)>,
}

impl ClassificationSummary {
    fn record(&mut self, fid: i64, category: Option<Category>) {
        match category {
            Some(c) => {
                *self.counts.entry(c).or_insert(0) += 1;
                self.assigned.push((fid, c));
            }
            None => self.unmatched += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum::<usize>() + self.unmatched
    }

    pub fn count(&self, letter: char) -> usize {
        self.counts.get(&Category(letter)).copied().unwrap_or(0)
    }

    pub fn log(&self, what: &str) {
        for (category, count) in &self.counts {
            info!("{} category {}: {}", what, category, count);
        }
        if self.unmatched > 0 {
            warn!(
                "{} of {} {} matched no rule and were left uncategorized",
                self.unmatched,
                self.total(),
                what
            );
        }
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .change_context(GroupingError::Io)
            .attach_printable_lazy(|| format!("creating {}", path.display()))?;
        let mut writer = csv::Writer::from_writer(file);

        for (category, count) in &self.counts {
            writer
                .serialize(SummaryRow {
                    category: category.to_string(),
                    count: *count,
                })
                .change_context(GroupingError::Csv)?;
        }
        writer
            .serialize(SummaryRow {
                category: String::from("unmatched"),
                count: self.unmatched,
            })
            .change_context(GroupingError::Csv)?;

        writer.flush().change_context(GroupingError::Csv)?;
        Ok(())
    }
}

fn text_of<'a>(record: &'a FeatureRecord, field: &str) -> Option<&'a str> {
    record.get(field).and_then(AttrValue::as_str)
}

/// Applies the sub-catchment table to every record, writing `Category`.
/// Records that match no rule keep whatever category they already had.
pub fn classify_subcatchments(layer: &mut FeatureLayer) -> Result<ClassificationSummary> {
    layer.require_field(MUSYM_FIELD)?;
    layer.require_field(MAJORITY_FIELD)?;
    layer.add_field(CATEGORY_FIELD, FieldKind::Text);

    let mut summary = ClassificationSummary::default();
    for record in layer.records.iter_mut() {
        let musym = text_of(record, MUSYM_FIELD);
        let code = record.get(MAJORITY_FIELD).and_then(AttrValue::as_i64);

        let category = match (musym, code) {
            (Some(musym), Some(code)) => classify_subcatchment(musym, code),
            _ => None,
        };

        match category {
            Some(c) => record.set(CATEGORY_FIELD, AttrValue::Text(c.to_string())),
            None => {
                debug!(
                    "sub-catchment fid {} unmatched (MUSYM {:?}, MAJORITY {:?})",
                    record.fid, musym, code
                );
                if record.get(CATEGORY_FIELD).is_none() {
                    record.set(CATEGORY_FIELD, AttrValue::Null);
                }
            }
        }
        summary.record(record.fid, category);
    }

    Ok(summary)
}

/// Applies the conduit table to every record, writing `Category`.
pub fn classify_conduits(
    layer: &mut FeatureLayer,
    material_field: &str,
    age_field: &str,
) -> Result<ClassificationSummary> {
    layer.require_field(material_field)?;
    layer.require_field(age_field)?;
    layer.add_field(CATEGORY_FIELD, FieldKind::Text);

    let mut summary = ClassificationSummary::default();
    for record in layer.records.iter_mut() {
        let material = text_of(record, material_field);
        let age = text_of(record, age_field);

        let category = match (material, age) {
            (Some(material), Some(age)) => classify_conduit(material, age),
            _ => None,
        };

        match category {
            Some(c) => record.set(CATEGORY_FIELD, AttrValue::Text(c.to_string())),
            None => {
                debug!(
                    "conduit fid {} unmatched ({:?}, {:?})",
                    record.fid, material, age
                );
                if record.get(CATEGORY_FIELD).is_none() {
                    record.set(CATEGORY_FIELD, AttrValue::Null);
                }
            }
        }
        summary.record(record.fid, category);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::FieldDef;
    use maplit::hashset;
    use std::collections::HashSet;

    fn text(s: &str) -> AttrValue {
        AttrValue::Text(s.to_string())
    }

    #[test]
    fn test_classify_subcatchment_examples() {
        assert_eq!(classify_subcatchment("2A", 24), Some(Category('A')));
        assert_eq!(classify_subcatchment("13", 23), Some(Category('H')));
        assert_eq!(classify_subcatchment("15A", 95), Some(Category('F')));
        assert_eq!(classify_subcatchment("17", 0), Some(Category('L')));
    }

    #[test]
    fn test_classify_subcatchment_unmatched() {
        assert_eq!(classify_subcatchment("99", 24), None);
        assert_eq!(classify_subcatchment("13", 11), None);
        assert_eq!(classify_subcatchment("2a", 24), None);
        assert_eq!(classify_subcatchment("", 24), None);
    }

    #[test]
    fn test_every_subcatchment_pair_has_one_category() {
        let soils: Vec<&str> = [STONY_CLAY_LOAM, COBBLY_CLAY_LOAM, LYNX_LOAM, SANDY_LOAM].concat();
        let codes: Vec<i64> = [HIGH, MEDIUM_LOW, OPEN].concat();

        let mut seen: HashSet<Category> = HashSet::new();
        for soil in &soils {
            for code in &codes {
                let matching: Vec<&SubcatchmentRule> = SUBCATCHMENT_RULES
                    .iter()
                    .filter(|r| r.matches(soil, *code))
                    .collect();
                assert_eq!(matching.len(), 1, "{} / {}", soil, code);
                assert_eq!(
                    classify_subcatchment(soil, *code),
                    Some(matching[0].category)
                );
                seen.insert(matching[0].category);
            }
        }
        assert_eq!(seen.len(), 12);
    }

    #[test]
    fn test_classify_conduit_examples() {
        assert_eq!(classify_conduit("Concrete", "Old"), Some(Category('D')));
        assert_eq!(
            classify_conduit("Unknown or missing", "New"),
            Some(Category('G'))
        );
        assert_eq!(classify_conduit("Smooth", "New"), Some(Category('A')));
        assert_eq!(classify_conduit("Rough", "Old"), Some(Category('F')));
    }

    #[test]
    fn test_classify_conduit_unmatched() {
        assert_eq!(classify_conduit("PVC", "New"), None);
        assert_eq!(classify_conduit("Concrete", "new"), None);
        assert_eq!(classify_conduit("", ""), None);
    }

    #[test]
    fn test_rule_tables_are_disjoint() {
        assert!(subcatchment_rule_overlaps().is_empty());
        assert!(conduit_rule_overlaps().is_empty());
        assert!(check_rule_tables().is_ok());
    }

    #[test]
    fn test_categories_are_unique_letters() {
        let letters: HashSet<char> = SUBCATCHMENT_RULES
            .iter()
            .map(|r| r.category.letter())
            .collect();
        assert_eq!(letters.len(), SUBCATCHMENT_RULES.len());
        let letters: HashSet<char> = CONDUIT_RULES.iter().map(|r| r.category.letter()).collect();
        assert_eq!(letters, hashset! {'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H'});
    }

    #[test]
    fn test_lookup_descriptions() {
        assert_eq!(SOIL_TEXTURES.get("15A"), Some(&"Cobbly clay loam"));
        assert_eq!(LAND_COVER_CLASSES.get(&52), Some(&"Open"));
        for code in OPEN {
            assert_eq!(LAND_COVER_CLASSES.get(code), Some(&"Open"));
        }
    }

    fn subcatchments() -> FeatureLayer {
        let mut layer = FeatureLayer::new(
            "subcatchments",
            vec![
                FieldDef::new(MUSYM_FIELD, FieldKind::Text),
                FieldDef::new(MAJORITY_FIELD, FieldKind::Integer),
            ],
        );
        layer.records.push(
            FeatureRecord::new(0)
                .with_attr(MUSYM_FIELD, text("2A"))
                .with_attr(MAJORITY_FIELD, AttrValue::Integer(24)),
        );
        layer.records.push(
            FeatureRecord::new(1)
                .with_attr(MUSYM_FIELD, text("13"))
                .with_attr(MAJORITY_FIELD, AttrValue::Real(23.0)),
        );
        layer.records.push(
            FeatureRecord::new(2)
                .with_attr(MUSYM_FIELD, text("99"))
                .with_attr(MAJORITY_FIELD, AttrValue::Integer(24)),
        );
        layer.records.push(
            FeatureRecord::new(3)
                .with_attr(MUSYM_FIELD, AttrValue::Null)
                .with_attr(MAJORITY_FIELD, AttrValue::Null),
        );
        layer
    }

    #[test]
    fn test_classify_subcatchments_layer() {
        let mut layer = subcatchments();
        let summary = classify_subcatchments(&mut layer).unwrap();

        assert!(layer.has_field(CATEGORY_FIELD));
        assert_eq!(layer.records[0].get(CATEGORY_FIELD), Some(&text("A")));
        assert_eq!(layer.records[1].get(CATEGORY_FIELD), Some(&text("H")));
        assert_eq!(layer.records[2].get(CATEGORY_FIELD), Some(&AttrValue::Null));
        assert_eq!(layer.records[3].get(CATEGORY_FIELD), Some(&AttrValue::Null));

        assert_eq!(summary.count('A'), 1);
        assert_eq!(summary.count('H'), 1);
        assert_eq!(summary.unmatched, 2);
        assert_eq!(summary.total(), 4);
        assert_eq!(
            summary.assigned,
            vec![(0, Category('A')), (1, Category('H'))]
        );
    }

    #[test]
    fn test_unmatched_keeps_previous_category() {
        let mut layer = subcatchments();
        layer.add_field(CATEGORY_FIELD, FieldKind::Text);
        layer.records[2].set(CATEGORY_FIELD, text("Z"));

        classify_subcatchments(&mut layer).unwrap();
        assert_eq!(layer.records[2].get(CATEGORY_FIELD), Some(&text("Z")));
    }

    #[test]
    fn test_classify_subcatchments_requires_fields() {
        let mut layer = FeatureLayer::new(
            "subcatchments",
            vec![FieldDef::new(MUSYM_FIELD, FieldKind::Text)],
        );
        let err = classify_subcatchments(&mut layer).unwrap_err();
        assert_eq!(
            err.current_context(),
            &GroupingError::MissingField(MAJORITY_FIELD.to_string())
        );
    }

    #[test]
    fn test_classify_conduits_layer() {
        let mut layer = FeatureLayer::new(
            "conduits",
            vec![
                FieldDef::new(MATERIAL_FIELD, FieldKind::Text),
                FieldDef::new(AGE_FIELD, FieldKind::Text),
            ],
        );
        layer.records.push(
            FeatureRecord::new(0)
                .with_attr(MATERIAL_FIELD, text("Concrete"))
                .with_attr(AGE_FIELD, text("Old")),
        );
        layer.records.push(
            FeatureRecord::new(1)
                .with_attr(MATERIAL_FIELD, text("Clay"))
                .with_attr(AGE_FIELD, text("Old")),
        );
        layer.records.push(
            FeatureRecord::new(2)
                .with_attr(MATERIAL_FIELD, text("Unknown or missing"))
                .with_attr(AGE_FIELD, text("New")),
        );

        let summary = classify_conduits(&mut layer, MATERIAL_FIELD, AGE_FIELD).unwrap();
        assert_eq!(layer.records[0].get(CATEGORY_FIELD), Some(&text("D")));
        assert_eq!(layer.records[1].get(CATEGORY_FIELD), Some(&AttrValue::Null));
        assert_eq!(layer.records[2].get(CATEGORY_FIELD), Some(&text("G")));
        assert_eq!(summary.unmatched, 1);
        assert_eq!(
            summary.assigned,
            vec![(0, Category('D')), (2, Category('G'))]
        );
    }

    #[test]
    fn test_summary_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");

        let mut summary = ClassificationSummary::default();
        summary.record(0, Some(Category('B')));
        summary.record(1, Some(Category('B')));
        summary.record(2, None);
        summary.write_csv(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["category,count", "B,2", "unmatched,1"]);
    }
}
