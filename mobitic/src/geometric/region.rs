use std::collections::BTreeSet;

use polars::prelude::*;

use crate::error::PipelineError;

/// Codes listed in an `EmptyFilterResult`
const SAMPLE_SIZE: usize = 5;

/// A record carrying an administrative code the regional filter can read
pub trait RegionCoded {
    fn region_code(&self) -> &str;
}

/// Regional filter
/// Keeps records whose administrative code starts with an allowed prefix
/// (the department code for BPE `DEPCOM` and IRIS codes).
#[derive(Debug, Clone)]
pub struct RegionFilter {
    allowed: BTreeSet<String>,
    /// Number of leading characters forming the prefix
    prefix_len: usize,
}

impl RegionFilter {
    pub fn new(allowed: BTreeSet<String>, prefix_len: usize) -> Self {
        RegionFilter {
            allowed,
            prefix_len,
        }
    }

    pub fn allowed(&self) -> &BTreeSet<String> {
        &self.allowed
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// First `prefix_len` characters of the trimmed code; `None` for shorter codes
    pub fn prefix<'a>(&self, code: &'a str) -> Option<&'a str> {
        let code = code.trim();
        if self.prefix_len == 0 {
            return None;
        }
        match code.char_indices().nth(self.prefix_len) {
            Some((end, _)) => Some(&code[..end]),
            None if code.chars().count() == self.prefix_len => Some(code),
            None => None,
        }
    }

    pub fn matches(&self, code: &str) -> bool {
        self.prefix(code)
            .map(|prefix| self.allowed.contains(prefix))
            .unwrap_or(false)
    }

    /// Keep the records of the region, in input order
    pub fn filter<T: RegionCoded>(
        &self,
        records: Vec<T>,
        dataset: &str,
    ) -> Result<Vec<T>, PipelineError> {
        let total = records.len();
        let mut sample = Vec::new();
        let mut kept = Vec::with_capacity(total);

        for record in records {
            if self.matches(record.region_code()) {
                kept.push(record);
            } else {
                push_sample(&mut sample, record.region_code());
            }
        }

        self.check_kept(dataset, kept.len(), total, sample)?;
        Ok(kept)
    }

    /// Table variant, applied to the raw census before any geometry is built.
    ///
    /// `code_column` is read as strings; nulls never match.
    pub fn filter_table(
        &self,
        df: &DataFrame,
        code_column: &str,
        dataset: &str,
    ) -> Result<DataFrame, PipelineError> {
        let codes = df
            .column(code_column)?
            .as_materialized_series()
            .cast(&DataType::String)?;
        let codes = codes.str()?;

        let mut sample = Vec::new();
        let mask: BooleanChunked = codes
            .into_iter()
            .map(|code| {
                let code = code.unwrap_or("");
                let keep = self.matches(code);
                if !keep {
                    push_sample(&mut sample, code);
                }
                Some(keep)
            })
            .collect();
        let mask = mask.with_name(code_column.into());

        let filtered = df.filter(&mask)?;
        self.check_kept(dataset, filtered.height(), df.height(), sample)?;
        Ok(filtered)
    }

    fn check_kept(
        &self,
        dataset: &str,
        kept: usize,
        total: usize,
        sample: Vec<String>,
    ) -> Result<(), PipelineError> {
        if kept == 0 {
            return Err(PipelineError::EmptyFilterResult {
                dataset: dataset.to_string(),
                allowed: self.allowed.iter().cloned().collect(),
                sample,
            });
        }
        log::info!(
            "Regional filter kept {} of {} {} (prefixes: {})",
            kept,
            total,
            dataset,
            self.allowed.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        Ok(())
    }
}

fn push_sample(sample: &mut Vec<String>, code: &str) {
    if sample.len() < SAMPLE_SIZE && !sample.iter().any(|c| c == code) {
        sample.push(code.to_string());
    }
}

impl RegionCoded for String {
    fn region_code(&self) -> &str {
        self
    }
}
