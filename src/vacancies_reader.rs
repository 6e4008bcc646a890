/// Turns raw input (a CSV export or an already-fetched record batch)
/// into typed `Vacancy` values, dropping rows the pipeline cannot use.
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use csv::{ReaderBuilder, StringRecord, Trim};
use log::*;
use regex::Regex;
use rust_decimal::Decimal;

use crate::currency::Currency;
use crate::error::PipelineError;
use crate::records::{RawVacancy, Salary, Vacancy};

/// Columns a usable export must declare. `salary_gross` is optional.
const NAME: &str = "name";
const SALARY_FROM: &str = "salary_from";
const SALARY_TO: &str = "salary_to";
const SALARY_GROSS: &str = "salary_gross";
const SALARY_CURRENCY: &str = "salary_currency";
const AREA_NAME: &str = "area_name";
const PUBLISHED_AT: &str = "published_at";

/// Reads a vacancy export from a CSV file.
///
/// A row is kept only when its field count matches the header and every
/// field carries a value; anything else is dropped without being treated
/// as an error. An empty file or a file with zero usable rows is fatal.
pub fn read_from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Vacancy>, PipelineError> {
    let path = path.as_ref();
    if std::fs::metadata(path)?.len() == 0 {
        return Err(PipelineError::EmptyInput(path.to_path_buf()));
    }

    // the csv crate strips a UTF-8 BOM from the header on its own
    let mut csv_reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_path(path)?;

    let headers = csv_reader.headers()?.clone();
    let columns = match Columns::locate(&headers) {
        Some(columns) => columns,
        None => {
            error!("Input {:?} lacks one of the required columns", path);
            return Err(PipelineError::NoUsableData);
        }
    };

    let tag_re = Regex::new("<.*?>").expect("the tag pattern is a valid regex");

    let mut vacancies = Vec::new();
    let mut dropped = 0usize;
    for record in csv_reader.records() {
        let row = record?;
        match parse_row(&row, &headers, &columns, &tag_re) {
            Some(vacancy) => vacancies.push(vacancy),
            None => {
                dropped += 1;
                debug!("Dropping incomplete row: {:?}", row);
            }
        }
    }

    if vacancies.is_empty() {
        return Err(PipelineError::NoUsableData);
    }
    info!(
        "Parsed {} vacancies from {:?} ({} rows dropped)",
        vacancies.len(),
        path,
        dropped
    );
    Ok(vacancies)
}

/// Accepts a record batch fetched by the API collaborator.
///
/// Salary bounds are genuinely optional there, so a record is kept when
/// it names a vacancy, an area, a known currency, a parseable date and
/// at least one salary bound.
pub fn from_batch(batch: Vec<RawVacancy>) -> Result<Vec<Vacancy>, PipelineError> {
    let total = batch.len();
    let mut vacancies = Vec::new();
    for raw in batch {
        if let Some(vacancy) = parse_raw(raw) {
            vacancies.push(vacancy);
        }
    }

    if vacancies.is_empty() {
        return Err(PipelineError::NoUsableData);
    }
    info!(
        "Accepted {} of {} records from the fetched batch",
        vacancies.len(),
        total
    );
    Ok(vacancies)
}

fn parse_raw(raw: RawVacancy) -> Option<Vacancy> {
    if raw.name.is_empty() || raw.area_name.is_empty() {
        return None;
    }
    let currency = Currency::from_code(raw.salary_currency.as_deref()?)?;
    if raw.salary_from.is_none() && raw.salary_to.is_none() {
        return None;
    }
    let published_at = parse_published_at(&raw.published_at)?;

    Some(Vacancy {
        name: raw.name,
        salary: Salary {
            from: raw.salary_from,
            to: raw.salary_to,
            currency,
            gross: None,
        },
        area_name: raw.area_name,
        published_at,
    })
}

/// Field positions of the required columns within the header
struct Columns {
    name: usize,
    salary_from: usize,
    salary_to: usize,
    salary_gross: Option<usize>,
    salary_currency: usize,
    area_name: usize,
    published_at: usize,
}

impl Columns {
    fn locate(headers: &StringRecord) -> Option<Columns> {
        let find = |name: &str| headers.iter().position(|header| header == name);
        Some(Columns {
            name: find(NAME)?,
            salary_from: find(SALARY_FROM)?,
            salary_to: find(SALARY_TO)?,
            salary_gross: find(SALARY_GROSS),
            salary_currency: find(SALARY_CURRENCY)?,
            area_name: find(AREA_NAME)?,
            published_at: find(PUBLISHED_AT)?,
        })
    }
}

fn parse_row(
    row: &StringRecord,
    headers: &StringRecord,
    columns: &Columns,
    tag_re: &Regex,
) -> Option<Vacancy> {
    // strict export policy: a row is complete or it does not exist
    if row.len() != headers.len() {
        return None;
    }
    if row.iter().any(|field| field.is_empty()) {
        return None;
    }

    let field = |index: usize| clean_value(tag_re, row.get(index).unwrap_or_default());

    let currency = Currency::from_code(&field(columns.salary_currency))?;
    let from = Decimal::from_str(&field(columns.salary_from)).ok()?;
    let to = Decimal::from_str(&field(columns.salary_to)).ok()?;
    let published_at = parse_published_at(&field(columns.published_at))?;
    let gross = columns
        .salary_gross
        .and_then(|index| parse_bool(&field(index)));

    Some(Vacancy {
        name: field(columns.name),
        salary: Salary {
            from: Some(from),
            to: Some(to),
            currency,
            gross,
        },
        area_name: field(columns.area_name),
        published_at,
    })
}

/// Strips markup and collapses the whitespace the export tends to carry
/// inside quoted fields
fn clean_value(tag_re: &Regex, raw: &str) -> String {
    let no_tags = tag_re.replace_all(raw, "");
    let no_breaks = no_tags
        .split('\n')
        .collect::<Vec<_>>()
        .join("; ")
        .replace('\r', "");
    no_breaks.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Publication timestamps come as ISO-8601 with an offset, with or
/// without a colon in it
pub fn parse_published_at(value: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed);
    }
    DateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%z").ok()
}
