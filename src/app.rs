use std::path::PathBuf;
use std::sync::Arc;

use log::*;

use crate::error::PipelineError;
use crate::normalizer::{self, RatePolicy};
use crate::rates::{RateSource, RateTable};
use crate::stats::{Report, StatsCalculator};
use crate::vacancies_reader;

/// Everything one run is parameterized by.
/// The near-identical task variants (fixed vs. historical rates, with
/// or without a region) are all expressed through this one object.
pub struct PipelineConfig {
    pub input: PathBuf,
    /// Substring the profession-filtered datasets match titles against
    pub profession: String,
    /// Restricts the year-keyed datasets to one area when set
    pub region: Option<String>,
    /// Convert with a rate table built for this run instead of the
    /// fixed reference rates
    pub monthly_rates: bool,
    /// Worker threads for the rate fetch and the year reduction
    pub workers: usize,
    pub rate_snapshot: Option<PathBuf>,
    pub converted_out: Option<PathBuf>,
}

/// The main application
pub struct VacStatApp {}

impl VacStatApp {
    /// Runs the whole pipeline for the file in `config`.
    /// The calculator and the rate source are abstract so single- and
    /// multi-threaded calculators and stubbed sources slot in freely.
    pub fn run(
        config: &PipelineConfig,
        calculator: impl StatsCalculator,
        source: Arc<dyn RateSource>,
    ) -> Result<Report, PipelineError> {
        let vacancies = vacancies_reader::read_from_csv(&config.input)?;

        let policy = if config.monthly_rates {
            let table = RateTable::build(&vacancies, source, config.workers)?;
            if let Some(path) = &config.rate_snapshot {
                table.write_snapshot(path)?;
                info!("Rate table snapshot written to {:?}", path);
            }
            RatePolicy::Monthly(table)
        } else {
            RatePolicy::Fixed
        };

        let outcome = normalizer::normalize(vacancies, &policy);
        info!(
            "Normalized {} records ({} without salary, {} rate gaps)",
            outcome.records.len(),
            outcome.without_salary,
            outcome.rate_gaps
        );
        if outcome.records.is_empty() {
            return Err(PipelineError::NoUsableData);
        }

        if let Some(path) = &config.converted_out {
            normalizer::write_converted_csv(&outcome.records, path)?;
            info!("Converted records written to {:?}", path);
        }

        Ok(calculator.calculate(&outcome.records, &config.profession, config.region.as_deref()))
    }
}
