use chrono::{DateTime, Datelike, FixedOffset};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::currency::Currency;

/// Calendar year of publication, the key of the trend datasets
pub type Year = i32;

/// A salary range as published: either bound may be missing, and the
/// figures are quoted in the publication currency
#[derive(Debug, Clone, PartialEq)]
pub struct Salary {
    pub from: Option<Decimal>,
    pub to: Option<Decimal>,
    pub currency: Currency,
    /// Whether the figures are quoted before tax. Only carried through
    /// for presentation, never used in the math
    pub gross: Option<bool>,
}

impl Salary {
    /// The single representative figure for the range, still in the
    /// publication currency.
    ///
    /// Bounds are truncated to whole units before averaging. A missing
    /// bound does not pull the average down: the present bound is taken
    /// as is. A range with no bounds at all has no usable figure.
    pub fn average(&self) -> Option<Decimal> {
        match (self.from, self.to) {
            (Some(from), Some(to)) => Some((from.trunc() + to.trunc()) / dec!(2)),
            (Some(from), None) => Some(from.trunc()),
            (None, Some(to)) => Some(to.trunc()),
            (None, None) => None,
        }
    }
}

/// One job-vacancy record as parsed from the input, before currency
/// normalization
#[derive(Debug, Clone)]
pub struct Vacancy {
    /// Job title, the target of the profession filter
    pub name: String,
    pub salary: Salary,
    /// City or region the vacancy was published for
    pub area_name: String,
    pub published_at: DateTime<FixedOffset>,
}

impl Vacancy {
    pub fn year(&self) -> Year {
        self.published_at.year()
    }
}

/// A vacancy whose salary has been reduced to a single ruble figure.
/// This is the only shape the partitioners and the aggregator consume.
#[derive(Debug, Clone)]
pub struct NormalizedVacancy {
    pub name: String,
    pub salary_rub: Decimal,
    pub area_name: String,
    pub published_at: DateTime<FixedOffset>,
}

impl NormalizedVacancy {
    pub fn year(&self) -> Year {
        self.published_at.year()
    }
}

/// A raw record handed over by the paginated API collaborator.
/// Unlike a CSV row every optional field really can be absent here,
/// so the completeness policy is looser than the file one.
#[derive(Debug, Clone)]
pub struct RawVacancy {
    pub name: String,
    pub salary_from: Option<Decimal>,
    pub salary_to: Option<Decimal>,
    pub salary_currency: Option<String>,
    pub area_name: String,
    pub published_at: String,
}
