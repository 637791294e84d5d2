//! Rollup of container metrics into their pod

use super::containers::ContainerRecord;
use crate::models::ResourceMetrics;

/// Componentwise sum of the metrics of `containers`
///
/// The set is taken as given; a missing container simply contributes nothing.
pub fn aggregate(containers: &[ContainerRecord]) -> ResourceMetrics {
    containers.iter().map(|c| &c.metrics).sum()
}
