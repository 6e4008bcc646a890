use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate};
use hashbrown::{HashMap, HashSet};
use log::*;
use quick_xml::events::Event;
use rust_decimal::Decimal;
use threadpool::ThreadPool;

use crate::currency::Currency;
use crate::error::PipelineError;
use crate::records::Vacancy;

/// How many times a single month query is retried before the month is
/// given up on
pub const FETCH_ATTEMPTS: usize = 3;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// A calendar month, the date resolution of the historical rate table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn of(moment: &DateTime<FixedOffset>) -> MonthKey {
        MonthKey {
            year: moment.year(),
            month: moment.month(),
        }
    }

    /// The reference day the remote source is queried at
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .expect("Invariant: a month key always holds a calendar month")
    }

    fn next(&self) -> MonthKey {
        if self.month == 12 {
            MonthKey {
                year: self.year + 1,
                month: 1,
            }
        } else {
            MonthKey {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// One currency line of a daily quotation sheet: `value` rubles buy
/// `nominal` units of the currency
#[derive(Debug, Clone, PartialEq)]
pub struct DailyQuote {
    pub code: String,
    pub value: Decimal,
    pub nominal: Decimal,
}

/// Anything that can produce the quotation sheet for a reference day.
/// The production implementation talks to the central-bank endpoint;
/// tests stub it out.
pub trait RateSource: Send + Sync {
    fn daily_quotes(&self, date: NaiveDate) -> anyhow::Result<Vec<DailyQuote>>;
}

/// The central-bank daily-rates endpoint (XML over HTTP)
pub struct CbrRateSource {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl CbrRateSource {
    pub fn new() -> Self {
        Self::with_base_url("http://www.cbr.ru/scripts/XML_daily.asp")
    }

    pub fn with_base_url(base_url: &str) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Invariant: the blocking client builds with default TLS");
        Self {
            client,
            base_url: base_url.to_string(),
        }
    }

    fn fetch(&self, url: &str) -> anyhow::Result<String> {
        let text = self
            .client
            .get(url)
            .send()?
            .error_for_status()?
            .text()?;
        Ok(text)
    }
}

impl RateSource for CbrRateSource {
    fn daily_quotes(&self, date: NaiveDate) -> anyhow::Result<Vec<DailyQuote>> {
        let url = format!(
            "{}?date_req={:02}/{:02}/{:04}",
            self.base_url,
            date.day(),
            date.month(),
            date.year()
        );

        let mut last_error = None;
        for attempt in 1..=FETCH_ATTEMPTS {
            match self.fetch(&url) {
                Ok(body) => return parse_quotes(&body),
                Err(err) => {
                    warn!(
                        "Rate query for {} failed (attempt {}/{}): {}",
                        date, attempt, FETCH_ATTEMPTS, err
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.expect("Invariant: at least one attempt was made"))
    }
}

/// The child elements of a `Valute` entry we care about
enum QuoteField {
    Code,
    Nominal,
    Value,
}

/// Pulls the `CharCode`/`Nominal`/`Value` triples out of a daily
/// quotation sheet. Values use a decimal comma.
fn parse_quotes(xml: &str) -> anyhow::Result<Vec<DailyQuote>> {
    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();
    let mut quotes = Vec::new();

    let mut current: Option<QuoteField> = None;
    let mut code = None;
    let mut nominal = None;
    let mut value = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                current = match e.name().as_ref() {
                    b"CharCode" => Some(QuoteField::Code),
                    b"Nominal" => Some(QuoteField::Nominal),
                    b"Value" => Some(QuoteField::Value),
                    _ => None,
                };
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape()?.trim().to_string();
                match current {
                    Some(QuoteField::Code) => code = Some(text),
                    Some(QuoteField::Nominal) => nominal = Decimal::from_str(&text).ok(),
                    Some(QuoteField::Value) => {
                        value = Decimal::from_str(&text.replace(',', ".")).ok()
                    }
                    None => {}
                }
            }
            Ok(Event::End(ref e)) => {
                current = None;
                // an entry missing one of the fields is simply not quoted
                if e.name().as_ref() == b"Valute" {
                    if let (Some(code), Some(nominal), Some(value)) =
                        (code.take(), nominal.take(), value.take())
                    {
                        quotes.push(DailyQuote {
                            code,
                            value,
                            nominal,
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(anyhow::anyhow!("malformed quotation sheet: {}", err)),
            _ => {}
        }
        buf.clear();
    }

    Ok(quotes)
}

/// Conversion factors to rubles keyed by publication month and currency.
/// Built once per run over the full date span of the input, then treated
/// as an immutable snapshot.
#[derive(Debug, Default)]
pub struct RateTable {
    cells: HashMap<(MonthKey, Currency), Decimal>,
}

impl RateTable {
    pub fn new() -> Self {
        Self {
            cells: HashMap::new(),
        }
    }

    pub fn insert(&mut self, month: MonthKey, currency: Currency, rate: Decimal) {
        self.cells.insert((month, currency), rate);
    }

    pub fn get(&self, month: MonthKey, currency: Currency) -> Option<Decimal> {
        self.cells.get(&(month, currency)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Builds the table for every month spanned by `records` and every
    /// non-ruble currency appearing in them.
    ///
    /// Month queries are independent reads into disjoint cells, so they
    /// run on a worker pool. A month whose query keeps failing leaves
    /// its cells missing (the affected records are later skipped, never
    /// converted at a made-up rate); the run only dies when every single
    /// month failed, which means the source is not answering at all.
    pub fn build(
        records: &[Vacancy],
        source: Arc<dyn RateSource>,
        workers: usize,
    ) -> Result<RateTable, PipelineError> {
        let mut table = RateTable::new();

        let currencies: Vec<Currency> = distinct_foreign_currencies(records);
        if currencies.is_empty() {
            debug!("All salaries already in rubles, nothing to fetch");
            return Ok(table);
        }
        let months = match month_span(records) {
            Some((first, last)) => months_between(first, last),
            None => return Err(PipelineError::NoUsableData),
        };

        info!(
            "Fetching rates for {} months x {} currencies",
            months.len(),
            currencies.len()
        );

        let pool = ThreadPool::new(workers.max(1).min(months.len()));
        let (result_tx, result_rx) = crossbeam_channel::bounded(months.len());
        for month in &months {
            let month = *month;
            let source = source.clone();
            let result_tx = result_tx.clone();
            pool.execute(move || {
                let quotes = source.daily_quotes(month.first_day());
                // the receiver only goes away when the run is already over
                let _ = result_tx.send((month, quotes));
            });
        }
        drop(result_tx);

        let mut failed_months = 0usize;
        let mut last_error = String::new();
        for (month, quotes) in result_rx.iter() {
            let quotes = match quotes {
                Ok(quotes) => quotes,
                Err(err) => {
                    error!("No quotation sheet for {}: {}", month, err);
                    failed_months += 1;
                    last_error = err.to_string();
                    continue;
                }
            };
            for currency in &currencies {
                match quotes.iter().find(|quote| quote.code == currency.code()) {
                    Some(quote) if !quote.nominal.is_zero() => {
                        table.insert(month, *currency, quote.value / quote.nominal);
                    }
                    _ => warn!("No {} rate quoted for {}", currency.code(), month),
                }
            }
        }

        if failed_months == months.len() {
            return Err(PipelineError::RateSourceUnavailable(last_error));
        }
        Ok(table)
    }

    /// Persists the table as one row per month, one column per currency.
    /// An audit artifact, regenerable from the inputs.
    pub fn write_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<(), PipelineError> {
        let mut months: Vec<MonthKey> = self
            .cells
            .keys()
            .map(|(month, _)| *month)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        months.sort();
        let mut currencies: Vec<Currency> = self
            .cells
            .keys()
            .map(|(_, currency)| *currency)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        currencies.sort_by_key(|currency| currency.code());

        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["date".to_string()];
        header.extend(currencies.iter().map(|currency| currency.code().to_string()));
        writer.write_record(&header)?;

        for month in &months {
            let mut row = vec![month.to_string()];
            for currency in &currencies {
                row.push(
                    self.get(*month, *currency)
                        .map(|rate| rate.to_string())
                        .unwrap_or_default(),
                );
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// The inclusive month range from the earliest to the latest
/// publication date
pub fn month_span(records: &[Vacancy]) -> Option<(MonthKey, MonthKey)> {
    let first = records
        .iter()
        .map(|vacancy| vacancy.published_at)
        .min()?;
    let last = records
        .iter()
        .map(|vacancy| vacancy.published_at)
        .max()?;
    Some((MonthKey::of(&first), MonthKey::of(&last)))
}

fn months_between(first: MonthKey, last: MonthKey) -> Vec<MonthKey> {
    let mut months = Vec::new();
    let mut month = first;
    while month <= last {
        months.push(month);
        month = month.next();
    }
    months
}

fn distinct_foreign_currencies(records: &[Vacancy]) -> Vec<Currency> {
    let mut seen = HashSet::new();
    let mut currencies = Vec::new();
    for record in records {
        let currency = record.salary.currency;
        if currency != Currency::Rur && seen.insert(currency) {
            currencies.push(currency);
        }
    }
    currencies
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::records::Salary;

    fn vacancy(currency: Currency, published_at: &str) -> Vacancy {
        Vacancy {
            name: "Программист".to_string(),
            salary: Salary {
                from: Some(dec!(100)),
                to: Some(dec!(200)),
                currency,
                gross: None,
            },
            area_name: "Москва".to_string(),
            published_at: crate::vacancies_reader::parse_published_at(published_at).unwrap(),
        }
    }

    /// Replays a fixed quotation sheet for every day it is asked about
    struct FixedSource {
        quotes: Vec<DailyQuote>,
    }

    impl RateSource for FixedSource {
        fn daily_quotes(&self, _date: NaiveDate) -> anyhow::Result<Vec<DailyQuote>> {
            Ok(self.quotes.clone())
        }
    }

    struct DeadSource;

    impl RateSource for DeadSource {
        fn daily_quotes(&self, _date: NaiveDate) -> anyhow::Result<Vec<DailyQuote>> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    #[test]
    fn test_month_span_and_range() {
        let records = vec![
            vacancy(Currency::Usd, "2019-11-05T10:00:00+0300"),
            vacancy(Currency::Usd, "2020-02-01T10:00:00+0300"),
            vacancy(Currency::Usd, "2019-12-31T23:59:59+0300"),
        ];
        let (first, last) = month_span(&records).unwrap();
        assert_eq!(first.to_string(), "2019-11");
        assert_eq!(last.to_string(), "2020-02");

        let months = months_between(first, last);
        let rendered: Vec<String> = months.iter().map(|month| month.to_string()).collect();
        assert_eq!(rendered, vec!["2019-11", "2019-12", "2020-01", "2020-02"]);
    }

    #[test]
    fn test_build_normalizes_by_nominal() {
        let records = vec![vacancy(Currency::Kzt, "2019-07-05T18:19:56+0300")];
        let source = FixedSource {
            quotes: vec![DailyQuote {
                code: "KZT".to_string(),
                value: dec!(15.9803),
                nominal: dec!(100),
            }],
        };
        let table = RateTable::build(&records, Arc::new(source), 2).unwrap();
        let month = MonthKey {
            year: 2019,
            month: 7,
        };
        assert_eq!(table.get(month, Currency::Kzt), Some(dec!(0.159803)));
    }

    #[test]
    fn test_build_skips_rubles_entirely() {
        let records = vec![vacancy(Currency::Rur, "2019-07-05T18:19:56+0300")];
        let table = RateTable::build(&records, Arc::new(DeadSource), 2).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_missing_currency_leaves_a_gap() {
        let records = vec![
            vacancy(Currency::Usd, "2019-07-05T18:19:56+0300"),
            vacancy(Currency::Eur, "2019-07-10T18:19:56+0300"),
        ];
        let source = FixedSource {
            quotes: vec![DailyQuote {
                code: "USD".to_string(),
                value: dec!(63.07),
                nominal: dec!(1),
            }],
        };
        let table = RateTable::build(&records, Arc::new(source), 1).unwrap();
        let month = MonthKey {
            year: 2019,
            month: 7,
        };
        assert_eq!(table.get(month, Currency::Usd), Some(dec!(63.07)));
        assert_eq!(table.get(month, Currency::Eur), None);
    }

    #[test]
    fn test_unreachable_source_is_fatal() {
        let records = vec![vacancy(Currency::Usd, "2019-07-05T18:19:56+0300")];
        let result = RateTable::build(&records, Arc::new(DeadSource), 2);
        assert!(matches!(
            result,
            Err(PipelineError::RateSourceUnavailable(_))
        ));
    }

    #[test]
    fn test_parse_quotes_decimal_comma() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ValCurs Date="05.07.2019" name="Foreign Currency Market">
    <Valute ID="R01235">
        <NumCode>840</NumCode>
        <CharCode>USD</CharCode>
        <Nominal>1</Nominal>
        <Name>Доллар США</Name>
        <Value>63,0756</Value>
    </Valute>
    <Valute ID="R01335">
        <NumCode>398</NumCode>
        <CharCode>KZT</CharCode>
        <Nominal>100</Nominal>
        <Name>Тенге</Name>
        <Value>16,5264</Value>
    </Valute>
</ValCurs>"#;
        let quotes = parse_quotes(xml).unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].code, "USD");
        assert_eq!(quotes[0].value, dec!(63.0756));
        assert_eq!(quotes[1].nominal, dec!(100));
    }

    #[test]
    fn test_snapshot_layout() {
        let mut table = RateTable::new();
        let november = MonthKey {
            year: 2019,
            month: 11,
        };
        let december = MonthKey {
            year: 2019,
            month: 12,
        };
        table.insert(november, Currency::Usd, dec!(63.87));
        table.insert(november, Currency::Eur, dec!(70.46));
        table.insert(december, Currency::Usd, dec!(64.13));

        let path = std::env::temp_dir().join("vacstat_snapshot_test.csv");
        table.write_snapshot(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        let mut lines = written.lines();
        assert_eq!(lines.next(), Some("date,EUR,USD"));
        assert_eq!(lines.next(), Some("2019-11,70.46,63.87"));
        assert_eq!(lines.next(), Some("2019-12,,64.13"));
    }
}
