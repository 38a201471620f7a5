//! Gradient boosted trees trained by the `gbdt` crate.
//!
//! Every class is fitted as a 0/1 indicator with the squared error loss, one model
//! for binary problems and one model per class (trained in parallel) otherwise.
//! Scores are clipped to `[0, 1]` and normalized per row for multi-class problems.
//! NaN features are passed as unknown values.

use super::{
    metrics::{auc, multi_weighted_logloss},
    Estimator, MlError,
};
use gbdt::{
    config::Config,
    decision_tree::{Data, DataVec, ValueType, VALUE_TYPE_UNKNOWN},
    gradient_boost::GBDT,
};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use tracing::{debug, info};

const LOSS: &str = "SquaredError";
const MIN_PROBABILITY: f64 = 1e-15;

#[derive(Debug, Clone, PartialEq)]
pub enum Objective {
    /// labels 0/1, predictions are probabilities of 1
    Binary,
    /// labels are class indices, predictions are per-class probabilities
    MultiClass { classes: usize },
}

impl Objective {
    fn models(&self) -> usize {
        match self {
            Self::Binary => 1,
            Self::MultiClass { classes } => *classes,
        }
    }
}

/// Score reported for the evaluation set after training
#[derive(Debug, Clone, PartialEq)]
pub enum EvalMetric {
    Auc,
    /// one weight per class index
    MultiWeightedLogloss(Vec<f64>),
}

impl EvalMetric {
    fn name(&self) -> &'static str {
        match self {
            Self::Auc => "auc",
            Self::MultiWeightedLogloss(_) => "wloss",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoostingParams {
    pub objective: Objective,
    pub max_depth: usize,
    pub eta: f64,
    /// share of rows sampled per tree
    pub subsample: f64,
    /// share of features sampled per tree
    pub colsample: f64,
    pub rounds: usize,
    pub min_leaf_size: usize,
    pub eval_metric: EvalMetric,
}

impl BoostingParams {
    pub fn new(objective: Objective, eval_metric: EvalMetric) -> Self {
        Self {
            objective,
            max_depth: 6,
            eta: 0.3,
            subsample: 1.0,
            colsample: 1.0,
            rounds: 100,
            min_leaf_size: 1,
            eval_metric,
        }
    }

    fn config(&self, features: usize) -> Config {
        let mut config = Config::new();
        config.set_feature_size(features as _);
        config.set_max_depth(self.max_depth as _);
        config.set_iterations(self.rounds.max(1) as _);
        config.set_shrinkage(self.eta as _);
        config.set_data_sample_ratio(self.subsample as _);
        config.set_feature_sample_ratio(self.colsample as _);
        config.set_min_leaf_size(self.min_leaf_size as _);
        config.set_loss(LOSS);
        config.set_debug(false);
        config.set_training_optimization_level(2);

        config
    }
}

fn row_values(row: ArrayView1<f64>) -> Vec<ValueType> {
    row.iter()
        .map(|value| {
            if value.is_nan() {
                VALUE_TYPE_UNKNOWN
            } else {
                *value as ValueType
            }
        })
        .collect()
}

fn training_data(features: ArrayView2<f64>, targets: impl Iterator<Item = ValueType>) -> DataVec {
    features
        .rows()
        .into_iter()
        .zip(targets)
        .map(|(row, target)| Data::new_training_data(row_values(row), 1.0, target, None))
        .collect()
}

fn test_data(features: ArrayView2<f64>) -> DataVec {
    features
        .rows()
        .into_iter()
        .map(|row| Data::new_test_data(row_values(row), None))
        .collect()
}

pub struct GradientBoosting {
    params: BoostingParams,
    features: usize,
    models: Vec<GBDT>,
}

impl GradientBoosting {
    pub fn new(params: BoostingParams) -> Self {
        Self {
            params,
            features: 0,
            models: Vec::new(),
        }
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    /// Number of trained `gbdt` models, one per class for multi-class objectives
    pub fn models(&self) -> usize {
        self.models.len()
    }

    /// Whether `label` is the positive class of model `index`
    fn is_positive(&self, index: usize, label: f64) -> bool {
        match self.params.objective {
            Objective::Binary => label == 1.0,
            Objective::MultiClass { .. } => label as usize == index,
        }
    }

    fn check_labels(&self, labels: ArrayView1<f64>) -> Result<(), MlError> {
        let classes = self.params.objective.models().max(2);

        match labels
            .iter()
            .find(|label| !(label.fract() == 0.0 && **label >= 0.0 && (**label as usize) < classes))
        {
            Some(label) => Err(MlError::InvalidLabel(*label)),
            None => Ok(()),
        }
    }

    /// Probabilities, one column per class (a single column for binary objectives)
    pub fn predict_proba(&self, features: ArrayView2<f64>) -> Result<Array2<f64>, MlError> {
        if self.models.is_empty() {
            return Err(MlError::NotFitted);
        }
        if features.ncols() != self.features {
            return Err(MlError::FeatureMismatch {
                expected: self.features,
                features: features.ncols(),
            });
        }

        let data = test_data(features);
        let columns: Vec<Vec<ValueType>> = self.models.par_iter().map(|model| model.predict(&data)).collect();

        let mut probabilities = Array2::<f64>::zeros((features.nrows(), columns.len()));
        for (mut target, column) in probabilities.columns_mut().into_iter().zip(&columns) {
            for (cell, value) in target.iter_mut().zip(column) {
                *cell = f64::from(*value).clamp(0.0, 1.0);
            }
        }

        if let Objective::MultiClass { .. } = self.params.objective {
            probabilities.mapv_inplace(|value| value.max(MIN_PROBABILITY));
            for mut row in probabilities.rows_mut() {
                let total = row.sum();
                row.mapv_inplace(|value| value / total);
            }
        }

        Ok(probabilities)
    }

    fn evaluate(&self, features: ArrayView2<f64>, labels: ArrayView1<f64>) -> Result<f64, MlError> {
        let probabilities = self.predict_proba(features)?;

        Ok(match &self.params.eval_metric {
            EvalMetric::Auc => auc(labels, probabilities.column(0)),
            EvalMetric::MultiWeightedLogloss(weights) => {
                multi_weighted_logloss(labels, probabilities.view(), weights)
            }
        })
    }
}

impl Estimator for GradientBoosting {
    /// `eval` is only scored and logged, `gbdt` trains the full number of rounds
    fn fit(
        &mut self,
        features: ArrayView2<f64>,
        labels: ArrayView1<f64>,
        eval: Option<(ArrayView2<f64>, ArrayView1<f64>)>,
    ) -> Result<(), MlError> {
        self.check_labels(labels)?;
        if features.nrows() == 0 {
            return Err(MlError::NotEnoughRows {
                needed: 1,
                available: 0,
            });
        }
        if features.ncols() == 0 {
            return Err(MlError::NoFeatures);
        }

        let config = self.params.config(features.ncols());
        debug!(
            models = self.params.objective.models(),
            rounds = self.params.rounds,
            "Training gradient boosting"
        );

        let models: Vec<GBDT> = (0..self.params.objective.models())
            .into_par_iter()
            .map(|index| {
                let targets = labels
                    .iter()
                    .map(|label| if self.is_positive(index, *label) { 1.0 } else { 0.0 });
                let mut data = training_data(features, targets);

                let mut model = GBDT::new(&config);
                model.fit(&mut data);
                model
            })
            .collect();

        self.features = features.ncols();
        self.models = models;

        if let Some((eval_features, eval_labels)) = eval {
            let score = self.evaluate(eval_features, eval_labels)?;
            info!("Evaluation {} = {score:.6}", self.params.eval_metric.name());
        }

        Ok(())
    }

    /// Probability of class 1 for binary objectives, most likely class otherwise
    fn predict(&self, features: ArrayView2<f64>) -> Result<Array1<f64>, MlError> {
        let probabilities = self.predict_proba(features)?;

        Ok(match self.params.objective {
            Objective::Binary => probabilities.column(0).to_owned(),
            Objective::MultiClass { .. } => probabilities
                .rows()
                .into_iter()
                .map(|row| {
                    row.iter()
                        .enumerate()
                        .fold((0, f64::NEG_INFINITY), |best, (class, &value)| {
                            if value > best.1 {
                                (class, value)
                            } else {
                                best
                            }
                        })
                        .0 as f64
                })
                .collect(),
        })
    }
}
