use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use log::*;

mod app;
mod currency;
mod error;
mod normalizer;
mod partition;
mod rates;
mod records;
mod stats;
mod vacancies_reader;

use crate::app::{PipelineConfig, VacStatApp};
use crate::rates::CbrRateSource;
use crate::stats::{MTStatsCalculator, STStatsCalculator};

const USAGE: &str = "Usage: vacstat <file.csv> <profession> [region] \
    [--monthly-rates] [--workers N] [--snapshot FILE] [--converted FILE]";

fn main() {
    env_logger::init();

    let config = match parse_args(env::args().skip(1).collect()) {
        Some(config) => config,
        None => {
            eprintln!("{}", USAGE);
            process::exit(2);
        }
    };

    info!("Reading CSV file: {:?}", config.input);
    let source = Arc::new(CbrRateSource::new());

    let result = if config.workers <= 1 {
        VacStatApp::run(&config, STStatsCalculator, source)
    } else {
        VacStatApp::run(&config, MTStatsCalculator::new(config.workers), source)
    };

    match result {
        Ok(report) => report.print(),
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    }
}

fn parse_args(args: Vec<String>) -> Option<PipelineConfig> {
    let mut positional = Vec::new();
    let mut monthly_rates = false;
    let mut workers = 1usize;
    let mut rate_snapshot = None;
    let mut converted_out = None;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--monthly-rates" => monthly_rates = true,
            "--workers" => {
                workers = iter.next()?.parse().ok()?;
                if workers == 0 {
                    workers = num_cpus::get();
                }
            }
            "--snapshot" => rate_snapshot = Some(PathBuf::from(iter.next()?)),
            "--converted" => converted_out = Some(PathBuf::from(iter.next()?)),
            _ if arg.starts_with("--") => return None,
            _ => positional.push(arg),
        }
    }

    if positional.len() < 2 || positional.len() > 3 {
        return None;
    }
    let mut positional = positional.into_iter();
    Some(PipelineConfig {
        input: PathBuf::from(positional.next()?),
        profession: positional.next()?,
        region: positional.next(),
        monthly_rates,
        workers,
        rate_snapshot,
        converted_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn test_parse_minimal_args() {
        let config = parse_args(args(&["vacancies.csv", "Программист"])).unwrap();
        assert_eq!(config.input, PathBuf::from("vacancies.csv"));
        assert_eq!(config.profession, "Программист");
        assert_eq!(config.region, None);
        assert!(!config.monthly_rates);
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn test_parse_full_args() {
        let config = parse_args(args(&[
            "vacancies.csv",
            "Программист",
            "Москва",
            "--monthly-rates",
            "--workers",
            "4",
            "--snapshot",
            "rates.csv",
            "--converted",
            "converted.csv",
        ]))
        .unwrap();
        assert_eq!(config.region.as_deref(), Some("Москва"));
        assert!(config.monthly_rates);
        assert_eq!(config.workers, 4);
        assert_eq!(config.rate_snapshot, Some(PathBuf::from("rates.csv")));
        assert_eq!(config.converted_out, Some(PathBuf::from("converted.csv")));
    }

    #[test]
    fn test_parse_rejects_bad_args() {
        assert!(parse_args(args(&["vacancies.csv"])).is_none());
        assert!(parse_args(args(&["vacancies.csv", "x", "--unknown"])).is_none());
        assert!(parse_args(args(&["vacancies.csv", "x", "--workers", "many"])).is_none());
    }
}
