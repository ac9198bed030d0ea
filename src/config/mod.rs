use serde::{Deserialize, Serialize};

use crate::clustering::KMeansConfig;
use crate::dimred::onmf::OnmfConfig;
use crate::dimred::pca::PcaConfig;
use crate::dimred::{Reducer, ReductionMethod};
use crate::error::{Result, SubpopError};
use crate::filter::{NoiseFilterConfig, DEFAULT_OFFSET};
use crate::statistics::{MeanVarianceConfig, DEFAULT_MIN_PRESENCE_FRACTION};

/// Settings for a whole subpopulation run. Missing JSON fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubpopConfig {
    pub offset: f64,
    pub min_presence_fraction: f64,
    pub nfeats: usize,
    pub method: ReductionMethod,
    pub pca: PcaConfig,
    pub onmf: OnmfConfig,
    pub kmeans: KMeansConfig,
}

impl Default for SubpopConfig {
    fn default() -> Self {
        Self {
            offset: DEFAULT_OFFSET,
            min_presence_fraction: DEFAULT_MIN_PRESENCE_FRACTION,
            nfeats: 14,
            method: ReductionMethod::Pca,
            pca: PcaConfig::default(),
            onmf: OnmfConfig::default(),
            kmeans: KMeansConfig::default(),
        }
    }
}

impl SubpopConfig {
    /// Parses and validates a configuration. An unrecognized `method` name is a
    /// configuration error naming `method`; any other malformed JSON is an input error.
    pub fn from_json(json: &str) -> Result<Self> {
        let malformed =
            |e: serde_json::Error| SubpopError::input(format!("malformed configuration: {}", e));
        let value: serde_json::Value = serde_json::from_str(json).map_err(malformed)?;
        if let Some(method) = value.get("method").and_then(serde_json::Value::as_str) {
            method.parse::<ReductionMethod>()?;
        }
        let config: SubpopConfig = serde_json::from_value(value).map_err(malformed)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| SubpopError::input(e.to_string()))
    }

    /// Checks the values that do not depend on the data. Bounds involving the gene or
    /// cell count (`nfeats`, `n_clusters`) are checked when the stages run.
    pub fn validate(&self) -> Result<()> {
        if !(self.offset.is_finite() && self.offset > 0.0) {
            return Err(SubpopError::config(
                "offset",
                format!("must be a positive finite number, got {}", self.offset),
            ));
        }
        if !(0.0..1.0).contains(&self.min_presence_fraction) {
            return Err(SubpopError::config(
                "min_presence_fraction",
                format!("must lie in [0, 1), got {}", self.min_presence_fraction),
            ));
        }
        if self.nfeats == 0 {
            return Err(SubpopError::config("nfeats", "must be at least 1"));
        }
        if self.kmeans.n_clusters == 0 {
            return Err(SubpopError::config("n_clusters", "must be at least 1"));
        }
        self.onmf.validate()?;
        // n_clusters is bounded by the data, so only the remaining fields are checked here
        self.kmeans.validate(usize::MAX)
    }

    pub fn statistics(&self) -> MeanVarianceConfig {
        MeanVarianceConfig {
            min_presence_fraction: self.min_presence_fraction,
        }
    }

    pub fn filter(&self) -> NoiseFilterConfig {
        NoiseFilterConfig {
            offset: self.offset,
        }
    }

    /// Reducer for `method` with the configured stage settings.
    pub fn reducer(&self, method: ReductionMethod) -> Reducer {
        match method {
            ReductionMethod::Pca => Reducer::Pca(self.pca),
            ReductionMethod::Onmf => Reducer::Onmf(self.onmf),
        }
    }
}
