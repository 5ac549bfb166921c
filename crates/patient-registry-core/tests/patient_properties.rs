//! Property tests for the patient repository.

use chrono::NaiveDate;
use patient_registry_core::{Database, PatientFields};
use proptest::prelude::*;

fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (1900i32..2030, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn arb_optional() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop_oneof![
        Just(String::new()),
        Just("  ".to_string()),
        "[a-z0-9@.+ -]{1,24}",
    ])
}

prop_compose! {
    fn arb_fields()(
        first_name in "[A-Za-z][A-Za-z' -]{0,19}",
        last_name in "[A-Za-z][A-Za-z' -]{0,19}",
        date_of_birth in arb_date(),
        gender in prop_oneof![
            Just("male".to_string()),
            Just("female".to_string()),
            Just("other".to_string()),
            Just("prefer_not_to_say".to_string()),
            "[a-z]{1,10}",
        ],
        email in arb_optional(),
        phone in arb_optional(),
        address in arb_optional(),
    ) -> PatientFields {
        PatientFields {
            first_name,
            last_name,
            date_of_birth,
            gender,
            email,
            phone,
            address,
        }
    }
}

proptest! {
    #[test]
    fn insert_then_get_returns_normalized_input(fields in arb_fields()) {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_patient(&fields).unwrap();
        let stored = db.get_patient(id).unwrap().unwrap();

        prop_assert_eq!(stored.fields(), fields.normalized());
        prop_assert!(stored.email.as_deref().map_or(true, |e| !e.trim().is_empty()));
    }

    #[test]
    fn list_is_always_name_ordered(batch in prop::collection::vec(arb_fields(), 0..12)) {
        let db = Database::open_in_memory().unwrap();
        for fields in &batch {
            db.insert_patient(fields).unwrap();
        }

        let listed = db.list_patients().unwrap();
        prop_assert_eq!(listed.len(), batch.len());
        for pair in listed.windows(2) {
            let a = (&pair[0].last_name, &pair[0].first_name);
            let b = (&pair[1].last_name, &pair[1].first_name);
            prop_assert!(a <= b, "{:?} listed before {:?}", a, b);
        }
    }

    #[test]
    fn update_of_missing_id_never_creates(fields in arb_fields(), id in 1i64..1000) {
        let db = Database::open_in_memory().unwrap();
        prop_assert!(!db.update_patient(id, &fields).unwrap());
        prop_assert_eq!(db.count_patients().unwrap(), 0);
    }
}
