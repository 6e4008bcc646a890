use std::collections::BTreeMap;

use hashbrown::HashMap;
use log::*;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::partition;
use crate::records::{NormalizedVacancy, Year};

/// The city rankings never grow past this many entries
pub const RANKING_SIZE: usize = 10;

/// Decimal places of the vacancy-share ratios
const SHARE_PRECISION: u32 = 4;

/// The six datasets every rendering collaborator feeds on.
///
/// Year keys are aligned across the general and the profession tracks:
/// a year with no matching records carries an explicit zero. The city
/// rankings are sorted descending by value; equal values stay in
/// whatever order the partition iteration produced, which is
/// intentionally unspecified.
#[derive(Debug, Default, PartialEq)]
pub struct Report {
    pub salary_by_year: BTreeMap<Year, i64>,
    pub count_by_year: BTreeMap<Year, usize>,
    pub profession_salary_by_year: BTreeMap<Year, i64>,
    pub profession_count_by_year: BTreeMap<Year, usize>,
    pub city_salaries: Vec<(String, i64)>,
    pub city_shares: Vec<(String, Decimal)>,
}

impl Report {
    pub fn print(&self) {
        println!("Salary dynamics by year: {:?}", self.salary_by_year);
        println!("Vacancy count dynamics by year: {:?}", self.count_by_year);
        println!(
            "Salary dynamics by year for the profession: {:?}",
            self.profession_salary_by_year
        );
        println!(
            "Vacancy count dynamics by year for the profession: {:?}",
            self.profession_count_by_year
        );
        println!("Salary level by city (descending): {:?}", self.city_salaries);
        println!("Vacancy share by city (descending): {:?}", self.city_shares);
    }
}

pub trait StatsCalculator {
    /// Reduces the normalized records to the full report.
    ///
    /// `region`, when set, restricts the year-keyed datasets to that
    /// area; the city rankings always cover the whole record set.
    fn calculate(
        &self,
        records: &[NormalizedVacancy],
        profession: &str,
        region: Option<&str>,
    ) -> Report;
}

/// Single-threaded calculator: one pass for the year partitions, one
/// for the city partition
pub struct STStatsCalculator;

impl StatsCalculator for STStatsCalculator {
    fn calculate(
        &self,
        records: &[NormalizedVacancy],
        profession: &str,
        region: Option<&str>,
    ) -> Report {
        let scoped_storage;
        let scoped: &[NormalizedVacancy] = match region {
            Some(region) => {
                scoped_storage = records
                    .iter()
                    .filter(|record| record.area_name == region)
                    .cloned()
                    .collect::<Vec<_>>();
                &scoped_storage
            }
            None => records,
        };

        let general = partition::by_year(scoped);
        let matching = partition::by_year_matching(scoped, profession);

        let mut report = Report::default();
        for (year, group) in &general {
            report.salary_by_year.insert(*year, mean_salary(group));
            report.count_by_year.insert(*year, group.len());

            // the filtered track is zero-filled over the general key
            // universe so the year ranges stay comparable side by side
            let matched = matching.get(year);
            report
                .profession_salary_by_year
                .insert(*year, matched.map(|group| mean_salary(group)).unwrap_or(0));
            report
                .profession_count_by_year
                .insert(*year, matched.map(Vec::len).unwrap_or(0));
        }

        let (city_salaries, city_shares) = city_rankings(records);
        report.city_salaries = city_salaries;
        report.city_shares = city_shares;
        report
    }
}

/// Multithreaded calculator.
/// The per-year reduction is independent across years, so records are
/// assigned to workers by year and the disjoint partial results are
/// merged once every worker has finished.
pub struct MTStatsCalculator {
    num_threads: usize,
}

impl MTStatsCalculator {
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
        }
    }
}

impl StatsCalculator for MTStatsCalculator {
    fn calculate(
        &self,
        records: &[NormalizedVacancy],
        profession: &str,
        region: Option<&str>,
    ) -> Report {
        let mut handles = Vec::new();
        let mut queues = Vec::new();
        for _ in 0..self.num_threads {
            let (queue_tx, queue_rx) = crossbeam_channel::bounded::<NormalizedVacancy>(10000);
            queues.push(queue_tx);
            let profession = profession.to_string();
            let handle =
                std::thread::spawn(move || year_totals(queue_rx.into_iter(), &profession));
            handles.push(handle);
        }

        // the same year always lands on the same worker, so the partial
        // results merge without overlap
        let scoped = records
            .iter()
            .filter(|record| region.map_or(true, |region| record.area_name == region));
        for record in scoped {
            let worker = record.year().rem_euclid(self.num_threads as i32) as usize;
            trace!("Dispatching a {} record to worker {}", record.year(), worker);
            if queues[worker].send(record.clone()).is_err() {
                break;
            }
        }
        // tell the workers that there's no more work
        drop(queues);

        let mut totals: HashMap<Year, YearTotals> = HashMap::new();
        for handle in handles {
            match handle.join() {
                Ok(partial) => totals.extend(partial),
                Err(_) => {
                    // one lost worker only loses its own years
                    error!("A year worker panicked, its years are missing from the report")
                }
            }
        }

        let mut report = report_from_totals(totals);
        let (city_salaries, city_shares) = city_rankings(records);
        report.city_salaries = city_salaries;
        report.city_shares = city_shares;
        report
    }
}

/// Running sums for one year, general track and profession track
struct YearTotals {
    sum: Decimal,
    count: usize,
    matched_sum: Decimal,
    matched_count: usize,
}

fn year_totals(
    records: impl Iterator<Item = NormalizedVacancy>,
    profession: &str,
) -> HashMap<Year, YearTotals> {
    let mut totals: HashMap<Year, YearTotals> = HashMap::new();
    for record in records {
        let entry = totals.entry(record.year()).or_insert(YearTotals {
            sum: Decimal::ZERO,
            count: 0,
            matched_sum: Decimal::ZERO,
            matched_count: 0,
        });
        entry.sum += record.salary_rub;
        entry.count += 1;
        if record.name.contains(profession) {
            entry.matched_sum += record.salary_rub;
            entry.matched_count += 1;
        }
    }
    totals
}

fn report_from_totals(totals: HashMap<Year, YearTotals>) -> Report {
    let mut report = Report::default();
    for (year, totals) in totals {
        report.salary_by_year.insert(year, truncated_mean(totals.sum, totals.count));
        report.count_by_year.insert(year, totals.count);
        report
            .profession_salary_by_year
            .insert(year, truncated_mean(totals.matched_sum, totals.matched_count));
        report
            .profession_count_by_year
            .insert(year, totals.matched_count);
    }
    report
}

fn mean_salary(group: &[&NormalizedVacancy]) -> i64 {
    let sum: Decimal = group.iter().map(|record| record.salary_rub).sum();
    truncated_mean(sum, group.len())
}

fn truncated_mean(sum: Decimal, count: usize) -> i64 {
    if count == 0 {
        return 0;
    }
    (sum / Decimal::from(count as u64))
        .trunc()
        .to_i64()
        .expect("Invariant: a mean salary fits into i64")
}

/// Both rankings are computed from the identical threshold-filtered
/// partition, so their eligible-city sets always agree
fn city_rankings(records: &[NormalizedVacancy]) -> (Vec<(String, i64)>, Vec<(String, Decimal)>) {
    let total = records.len();
    if total == 0 {
        return (Vec::new(), Vec::new());
    }
    let retained = partition::retain_significant(partition::by_area(records), total);

    let mut salaries: Vec<(String, i64)> = retained
        .iter()
        .map(|(area, group)| (area.to_string(), mean_salary(group)))
        .collect();
    salaries.sort_by(|a, b| b.1.cmp(&a.1));
    salaries.truncate(RANKING_SIZE);

    let mut shares: Vec<(String, Decimal)> = retained
        .iter()
        .map(|(area, group)| {
            let share = Decimal::from(group.len() as u64) / Decimal::from(total as u64);
            (area.to_string(), share.round_dp(SHARE_PRECISION))
        })
        .collect();
    shares.sort_by(|a, b| b.1.cmp(&a.1));
    shares.truncate(RANKING_SIZE);

    (salaries, shares)
}
