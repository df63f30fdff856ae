//! Per-record diff against the merged mapping table.

use itemsync_core::{MappingEntry, SalesRecord, UpdateIntent};

use crate::loader::MappingTable;

/// What reconciliation decided for one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    BlankKey,
    Unmapped,
    Unchanged,
    Update(UpdateIntent),
}

/// Fill the record's attributes from the entry; an intent exists only if any value changes.
pub fn propose_update(record: &SalesRecord, entry: &MappingEntry) -> Option<UpdateIntent> {
    let proposed = record.current.filled_from(&entry.fields);
    if proposed == record.current {
        return None;
    }
    Some(UpdateIntent {
        id: record.id.clone(),
        proposed,
    })
}

pub fn reconcile_record(record: &SalesRecord, table: &MappingTable) -> Disposition {
    let Some(key) = record.item_key() else {
        return Disposition::BlankKey;
    };
    let Some(entry) = table.get(&key) else {
        return Disposition::Unmapped;
    };
    match propose_update(record, entry) {
        Some(intent) => Disposition::Update(intent),
        None => Disposition::Unchanged,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageOutcome {
    pub intents: Vec<UpdateIntent>,
    pub blank_key: usize,
    pub unmapped: usize,
    pub unchanged: usize,
}

pub fn reconcile_page(records: &[SalesRecord], table: &MappingTable) -> PageOutcome {
    let mut outcome = PageOutcome::default();
    for record in records {
        match reconcile_record(record, table) {
            Disposition::BlankKey => outcome.blank_key += 1,
            Disposition::Unmapped => outcome.unmapped += 1,
            Disposition::Unchanged => outcome.unchanged += 1,
            Disposition::Update(intent) => outcome.intents.push(intent),
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::merge_sources;
    use itemsync_core::{Classification, MappingRow, RecordId};

    fn cls(fg: Option<&str>, category: Option<&str>, model: Option<&str>, product: Option<&str>) -> Classification {
        Classification {
            fg_classification: fg.map(Into::into),
            category: category.map(Into::into),
            model: model.map(Into::into),
            product: product.map(Into::into),
        }
    }

    fn record(id: i64, item: Option<&str>, current: Classification) -> SalesRecord {
        SalesRecord {
            id: RecordId::Int(id),
            item_number: item.map(Into::into),
            current,
        }
    }

    fn example_table() -> MappingTable {
        merge_sources(
            vec![MappingRow::new("A1", cls(None, Some("X"), None, None))],
            vec![
                MappingRow::new("A1", cls(None, Some("Y"), Some("M1"), None)),
                MappingRow::new("B2", cls(None, None, Some("M2"), None)),
            ],
        )
    }

    #[test]
    fn mapped_value_replaces_a_different_current_value() {
        let table = example_table();
        let rec = record(1, Some("A1"), cls(Some("FG"), Some("Z"), Some("old"), None));
        let Disposition::Update(intent) = reconcile_record(&rec, &table) else {
            panic!("expected an update");
        };
        assert_eq!(intent.id, RecordId::Int(1));
        assert_eq!(intent.proposed, cls(Some("FG"), Some("X"), Some("old"), None));
    }

    #[test]
    fn already_matching_record_is_unchanged() {
        let table = example_table();
        let rec = record(2, Some("B2"), cls(None, None, Some("M2"), None));
        assert_eq!(reconcile_record(&rec, &table), Disposition::Unchanged);
    }

    #[test]
    fn absent_mapping_fields_never_blank_current_values() {
        let table = example_table();
        let rec = record(3, Some("B2"), cls(Some("FG"), Some("cat"), None, Some("prod")));
        let Disposition::Update(intent) = reconcile_record(&rec, &table) else {
            panic!("expected an update");
        };
        assert_eq!(intent.proposed, cls(Some("FG"), Some("cat"), Some("M2"), Some("prod")));
    }

    #[test]
    fn keys_are_trimmed_before_lookup_and_blank_keys_skipped() {
        let table = example_table();
        let rec = record(4, Some("  A1 "), cls(None, None, None, None));
        assert!(matches!(reconcile_record(&rec, &table), Disposition::Update(_)));
        let rec = record(5, Some("   "), cls(None, None, None, None));
        assert_eq!(reconcile_record(&rec, &table), Disposition::BlankKey);
        let rec = record(6, None, cls(None, None, None, None));
        assert_eq!(reconcile_record(&rec, &table), Disposition::BlankKey);
        let rec = record(7, Some("C3"), cls(None, None, None, None));
        assert_eq!(reconcile_record(&rec, &table), Disposition::Unmapped);
    }

    #[test]
    fn empty_string_current_value_counts_as_a_difference() {
        let table = example_table();
        let rec = record(8, Some("A1"), cls(None, Some(""), None, None));
        let Disposition::Update(intent) = reconcile_record(&rec, &table) else {
            panic!("expected an update");
        };
        assert_eq!(intent.proposed.category.as_deref(), Some("X"));
    }

    #[test]
    fn applying_an_intent_reaches_a_fixed_point() {
        let table = example_table();
        let mut rec = record(9, Some("A1"), cls(None, Some("Z"), Some("keep"), None));
        let Disposition::Update(intent) = reconcile_record(&rec, &table) else {
            panic!("expected an update");
        };
        rec.current = intent.proposed;
        assert_eq!(reconcile_record(&rec, &table), Disposition::Unchanged);
    }

    #[test]
    fn page_outcome_counts_each_disposition() {
        let table = example_table();
        let records = vec![
            record(1, Some("A1"), cls(None, Some("Z"), None, None)),
            record(2, Some("B2"), cls(None, None, Some("M2"), None)),
            record(3, Some(""), Classification::default()),
            record(4, Some("nope"), Classification::default()),
            record(5, Some("B2"), Classification::default()),
        ];
        let outcome = reconcile_page(&records, &table);
        assert_eq!(
            outcome.intents.iter().map(|i| i.id.clone()).collect::<Vec<_>>(),
            vec![RecordId::Int(1), RecordId::Int(5)]
        );
        assert_eq!((outcome.blank_key, outcome.unmapped, outcome.unchanged), (1, 1, 1));
    }
}
