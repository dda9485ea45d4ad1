use crate::error::PipelineError;
use crate::geo_core::Reprojector;

/// A record the coordinate reconciler knows how to bring into the target CRS.
///
/// Implementations return `PipelineError::InvalidGeometry` for a record whose
/// coordinates are missing or non-finite; any other error is fatal.
pub trait Reconcile {
    type Output;

    fn reconcile(self, index: usize, reprojector: &Reprojector)
        -> Result<Self::Output, PipelineError>;
}

/// A conversion PROJ rejects for one record's coordinates excludes that record.
/// Transforms that cannot be built at all fail earlier, in `Reprojector::new`.
pub fn record_error(index: usize, error: PipelineError) -> PipelineError {
    match error {
        PipelineError::ReprojectionFailure { from, to, reason } => PipelineError::InvalidGeometry {
            index,
            reason: format!("outside the EPSG:{} to EPSG:{} domain: {}", from, to, reason),
        },
        other => other,
    }
}

/// Output of a reconciliation pass
#[derive(Debug)]
pub struct Reconciled<T> {
    /// Records expressed in the target CRS, in input order
    pub records: Vec<T>,
    /// Number of records dropped for invalid coordinates
    pub excluded: usize,
}

impl<T> Reconciled<T> {
    pub fn from_records<R>(records: Vec<R>, reprojector: &Reprojector) -> Result<Self, PipelineError>
    where
        R: Reconcile<Output = T>,
    {
        let total = records.len();
        let mut reconciled = Vec::with_capacity(total);
        let mut excluded = 0;

        for (index, record) in records.into_iter().enumerate() {
            match record.reconcile(index, reprojector) {
                Ok(record) => reconciled.push(record),
                Err(e) if !e.is_fatal() => {
                    log::debug!("{}", e);
                    excluded += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if excluded > 0 {
            log::warn!(
                "{} of {} records excluded for missing or non-finite coordinates",
                excluded,
                total
            );
        }
        if !reprojector.is_identity() {
            log::info!(
                "Reprojected {} records from EPSG:{} to EPSG:{}",
                reconciled.len(),
                reprojector.source_epsg(),
                reprojector.target_epsg()
            );
        }

        Ok(Reconciled {
            records: reconciled,
            excluded,
        })
    }
}
