use hashbrown::HashMap;

use crate::records::{NormalizedVacancy, Year};

/// Groups records by publication year, keeping the input encounter
/// order inside every group
pub fn by_year(records: &[NormalizedVacancy]) -> HashMap<Year, Vec<&NormalizedVacancy>> {
    let mut partition: HashMap<Year, Vec<&NormalizedVacancy>> = HashMap::new();
    for record in records {
        partition.entry(record.year()).or_default().push(record);
    }
    partition
}

/// Same as `by_year`, restricted to titles containing `profession`.
/// The match is a case-sensitive substring, exactly how the profession
/// parameter has always behaved.
pub fn by_year_matching<'a>(
    records: &'a [NormalizedVacancy],
    profession: &str,
) -> HashMap<Year, Vec<&'a NormalizedVacancy>> {
    let mut partition: HashMap<Year, Vec<&NormalizedVacancy>> = HashMap::new();
    for record in records {
        if record.name.contains(profession) {
            partition.entry(record.year()).or_default().push(record);
        }
    }
    partition
}

/// Groups records by area name, keeping encounter order inside every
/// group
pub fn by_area(records: &[NormalizedVacancy]) -> HashMap<&str, Vec<&NormalizedVacancy>> {
    let mut partition: HashMap<&str, Vec<&NormalizedVacancy>> = HashMap::new();
    for record in records {
        partition
            .entry(record.area_name.as_str())
            .or_default()
            .push(record);
    }
    partition
}

/// Drops every area holding less than 1% of `total` records.
///
/// `total` is the full normalized record count, not the sum over the
/// partition, so the filter can run before any ranking is computed.
/// The comparison is exact integer math: an area is kept iff
/// `count / total >= 1/100`.
pub fn retain_significant<'a>(
    mut areas: HashMap<&'a str, Vec<&'a NormalizedVacancy>>,
    total: usize,
) -> HashMap<&'a str, Vec<&'a NormalizedVacancy>> {
    areas.retain(|_, group| group.len() * 100 >= total);
    areas
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::vacancies_reader::parse_published_at;

    fn record(name: &str, area: &str, published_at: &str) -> NormalizedVacancy {
        NormalizedVacancy {
            name: name.to_string(),
            salary_rub: dec!(50000),
            area_name: area.to_string(),
            published_at: parse_published_at(published_at).unwrap(),
        }
    }

    /// `counts` gives the group size per synthetic area
    fn area_spread(counts: &[usize]) -> Vec<NormalizedVacancy> {
        let mut records = Vec::new();
        for (index, count) in counts.iter().enumerate() {
            for _ in 0..*count {
                records.push(record(
                    "Программист",
                    &format!("Город {}", index),
                    "2019-07-05T18:19:56+0300",
                ));
            }
        }
        records
    }

    #[test]
    fn test_year_groups_keep_encounter_order() {
        let records = vec![
            record("Первый", "Москва", "2019-01-05T10:00:00+0300"),
            record("Второй", "Москва", "2018-06-01T10:00:00+0300"),
            record("Третий", "Казань", "2019-11-20T10:00:00+0300"),
        ];
        let partition = by_year(&records);
        assert_eq!(partition.len(), 2);

        let names: Vec<&str> = partition[&2019]
            .iter()
            .map(|record| record.name.as_str())
            .collect();
        assert_eq!(names, vec!["Первый", "Третий"]);
    }

    #[test]
    fn test_profession_match_is_case_sensitive() {
        let records = vec![
            record("Старший программист", "Москва", "2019-01-05T10:00:00+0300"),
            record("Программист 1С", "Москва", "2019-02-05T10:00:00+0300"),
        ];
        let partition = by_year_matching(&records, "Программист");
        assert_eq!(partition[&2019].len(), 1);
        assert_eq!(partition[&2019][0].name, "Программист 1С");
    }

    #[test]
    fn test_empty_profession_matches_everything() {
        let records = vec![
            record("Аналитик", "Москва", "2019-01-05T10:00:00+0300"),
            record("Инженер", "Казань", "2019-02-05T10:00:00+0300"),
        ];
        let partition = by_year_matching(&records, "");
        assert_eq!(partition[&2019].len(), 2);
    }

    #[test]
    fn test_threshold_drops_small_areas() {
        // 200 records: shares 75%, 15%, 6%, 3.5%, 0.5%
        let records = area_spread(&[150, 30, 12, 7, 1]);
        let retained = retain_significant(by_area(&records), records.len());

        assert_eq!(retained.len(), 4);
        assert!(!retained.contains_key("Город 4"));
        for group in retained.values() {
            assert!(group.len() * 100 >= records.len());
        }
    }

    #[test]
    fn test_threshold_keeps_exact_one_percent() {
        // 2 of 200 is exactly 1% and must survive
        let records = area_spread(&[198, 2]);
        let retained = retain_significant(by_area(&records), records.len());
        assert!(retained.contains_key("Город 1"));
    }

    #[test]
    fn test_threshold_is_idempotent() {
        let records = area_spread(&[150, 30, 12, 7, 1]);
        let total = records.len();

        let once = retain_significant(by_area(&records), total);
        let keys_once: Vec<&str> = {
            let mut keys: Vec<&str> = once.keys().copied().collect();
            keys.sort_unstable();
            keys
        };

        let twice = retain_significant(once, total);
        let mut keys_twice: Vec<&str> = twice.keys().copied().collect();
        keys_twice.sort_unstable();
        assert_eq!(keys_once, keys_twice);
    }
}
