use std::path::Path;

use log::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::currency::Currency;
use crate::error::PipelineError;
use crate::rates::{MonthKey, RateTable};
use crate::records::{NormalizedVacancy, Vacancy};

/// Where conversion factors come from.
/// `Fixed` uses the built-in reference table; `Monthly` looks rates up
/// by the record's publication month in a table built for this run.
pub enum RatePolicy {
    Fixed,
    Monthly(RateTable),
}

/// What normalization did to the input, with the exclusions counted so
/// they stay observable
pub struct NormalizeOutcome {
    pub records: Vec<NormalizedVacancy>,
    /// Records whose salary range had no bounds at all
    pub without_salary: usize,
    /// Records whose (month, currency) cell was missing from the table
    pub rate_gaps: usize,
}

/// Reduces every vacancy to a single ruble figure.
///
/// A record that cannot be converted (no salary bounds, or no rate for
/// its publication month) is excluded from the output entirely, the way
/// the exports have always been treated: an unconverted salary would
/// poison every mean it participates in.
pub fn normalize(vacancies: Vec<Vacancy>, policy: &RatePolicy) -> NormalizeOutcome {
    let mut outcome = NormalizeOutcome {
        records: Vec::with_capacity(vacancies.len()),
        without_salary: 0,
        rate_gaps: 0,
    };

    for vacancy in vacancies {
        let average = match vacancy.salary.average() {
            Some(average) => average,
            None => {
                outcome.without_salary += 1;
                continue;
            }
        };
        let rate = match rate_for(&vacancy, policy) {
            Some(rate) => rate,
            None => {
                warn!(
                    "No {} rate for {}, dropping \"{}\"",
                    vacancy.salary.currency.code(),
                    MonthKey::of(&vacancy.published_at),
                    vacancy.name
                );
                outcome.rate_gaps += 1;
                continue;
            }
        };

        outcome.records.push(NormalizedVacancy {
            name: vacancy.name,
            salary_rub: average * rate,
            area_name: vacancy.area_name,
            published_at: vacancy.published_at,
        });
    }

    debug!(
        "Normalized {} records ({} without salary, {} rate gaps)",
        outcome.records.len(),
        outcome.without_salary,
        outcome.rate_gaps
    );
    outcome
}

fn rate_for(vacancy: &Vacancy, policy: &RatePolicy) -> Option<Decimal> {
    let currency = vacancy.salary.currency;
    if currency == Currency::Rur {
        return Some(dec!(1));
    }
    match policy {
        RatePolicy::Fixed => Some(currency.fixed_rub_rate()),
        RatePolicy::Monthly(table) => table.get(MonthKey::of(&vacancy.published_at), currency),
    }
}

/// Persists the normalized records as a flat CSV, an audit artifact the
/// rendering collaborators can also feed on
pub fn write_converted_csv<P: AsRef<Path>>(
    records: &[NormalizedVacancy],
    path: P,
) -> Result<(), PipelineError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&["name", "salary", "area_name", "published_at"])?;
    for record in records {
        writer.write_record(&[
            record.name.as_str(),
            &record.salary_rub.to_string(),
            record.area_name.as_str(),
            &record.published_at.to_rfc3339(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
