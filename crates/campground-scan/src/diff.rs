//! Change detection between two availability snapshots.

use crate::scan_types::{DateChanges, Snapshot};

/// Compare a freshly fetched snapshot against the last committed one.
///
/// A date is reported as a whole: the payload is the unit map that exposed the
/// first difference, not a per-unit patch. Consumers must re-evaluate the full
/// date rather than assume a minimal diff.
///
/// - a date missing from `previous` is reported with `current`'s unit map
/// - a unit that is new or whose flag flipped reports `current`'s unit map
/// - a unit that disappeared from `current` reports `previous`'s unit map
///
/// An empty `previous` (first scan) reports every date of `current`.
pub fn diff(previous: &Snapshot, current: &Snapshot) -> DateChanges {
    let mut changes = DateChanges::new();

    for (date, units) in current.iter() {
        let changed = match previous.get(date) {
            None => true,
            Some(old_units) => units
                .iter()
                .any(|(unit, available)| old_units.get(unit) != Some(available)),
        };

        if changed {
            changes.insert(*date, units.clone());
        }
    }

    for (date, old_units) in previous.iter() {
        if changes.contains_key(date) {
            continue;
        }

        let removed = match current.get(date) {
            None => true,
            Some(units) => old_units.keys().any(|unit| !units.contains_key(unit)),
        };

        if removed {
            changes.insert(*date, old_units.clone());
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::scan_types::UnitAvailability;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn snapshot(entries: &[(&str, &str, bool)]) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for (day, unit, available) in entries {
            snapshot.set(date(day), *unit, *available);
        }
        snapshot
    }

    fn units(entries: &[(&str, bool)]) -> UnitAvailability {
        entries.iter().map(|(u, a)| (u.to_string(), *a)).collect()
    }

    #[test]
    fn test_identical_snapshots_have_no_changes() {
        let old = snapshot(&[
            ("2024-06-01", "A", true),
            ("2024-06-01", "B", false),
            ("2024-06-02", "A", false),
        ]);

        assert!(diff(&old, &old).is_empty());
        assert!(diff(&Snapshot::new(), &Snapshot::new()).is_empty());
    }

    #[test]
    fn test_flipped_unit_reports_new_value() {
        let old = snapshot(&[("2024-06-01", "A", true)]);
        let new = snapshot(&[("2024-06-01", "A", false)]);

        let changes = diff(&old, &new);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[&date("2024-06-01")], units(&[("A", false)]));
    }

    #[test]
    fn test_first_scan_reports_every_date() {
        let new = snapshot(&[
            ("2024-06-01", "A", true),
            ("2024-06-02", "A", false),
            ("2024-06-02", "B", true),
        ]);

        let changes = diff(&Snapshot::new(), &new);

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[&date("2024-06-01")], units(&[("A", true)]));
        assert_eq!(
            changes[&date("2024-06-02")],
            units(&[("A", false), ("B", true)])
        );
    }

    #[test]
    fn test_new_unit_reports_full_date() {
        let old = snapshot(&[("2024-06-01", "A", true)]);
        let new = snapshot(&[("2024-06-01", "A", true), ("2024-06-01", "B", false)]);

        let changes = diff(&old, &new);

        assert_eq!(
            changes[&date("2024-06-01")],
            units(&[("A", true), ("B", false)])
        );
    }

    #[test]
    fn test_removed_unit_reports_previous_map() {
        let old = snapshot(&[("2024-06-01", "A", true), ("2024-06-01", "B", true)]);
        let new = snapshot(&[("2024-06-01", "A", true)]);

        let changes = diff(&old, &new);

        assert_eq!(
            changes[&date("2024-06-01")],
            units(&[("A", true), ("B", true)])
        );
    }

    #[test]
    fn test_date_only_in_previous_reports_previous_map() {
        let old = snapshot(&[
            ("2024-06-01", "A", true),
            ("2024-06-02", "A", false),
        ]);
        let new = snapshot(&[("2024-06-01", "A", true)]);

        let changes = diff(&old, &new);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[&date("2024-06-02")], units(&[("A", false)]));
    }

    #[test]
    fn test_flip_takes_precedence_over_removal() {
        let old = snapshot(&[("2024-06-01", "A", true), ("2024-06-01", "B", true)]);
        let new = snapshot(&[("2024-06-01", "A", false)]);

        let changes = diff(&old, &new);

        assert_eq!(changes[&date("2024-06-01")], units(&[("A", false)]));
    }

    #[test]
    fn test_unchanged_dates_are_not_reported() {
        let old = snapshot(&[
            ("2024-06-01", "A", true),
            ("2024-06-02", "A", true),
        ]);
        let new = snapshot(&[
            ("2024-06-01", "A", true),
            ("2024-06-02", "A", false),
        ]);

        let changes = diff(&old, &new);

        assert_eq!(changes.keys().copied().collect::<Vec<_>>(), vec![date("2024-06-02")]);
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let entries = [
            ("2024-06-03", "C", true),
            ("2024-06-01", "A", false),
            ("2024-06-02", "B", true),
            ("2024-06-01", "B", true),
        ];

        let forward: Snapshot = entries
            .iter()
            .map(|(d, u, a)| (date(d), units(&[(*u, *a)])))
            .collect();
        let reversed: Snapshot = entries
            .iter()
            .rev()
            .map(|(d, u, a)| (date(d), units(&[(*u, *a)])))
            .collect();
        let old = snapshot(&[
            ("2024-06-01", "B", false),
            ("2024-06-01", "A", false),
            ("2024-06-04", "D", true),
        ]);

        assert_eq!(forward, reversed);
        assert_eq!(diff(&old, &forward), diff(&old, &reversed));
        assert_eq!(diff(&forward, &old), diff(&reversed, &old));
    }
}
