use super::{Estimator, MlError};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

/// L2 regularized linear regression with intercept, solved in closed form with a
/// Cholesky decomposition of the regularized normal equations
#[derive(Debug, Clone)]
pub struct Ridge {
    alpha: f64,
    coefficients: Option<Array1<f64>>,
    intercept: f64,
}

impl Default for Ridge {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Ridge {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            coefficients: None,
            intercept: 0.0,
        }
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.coefficients.as_ref()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl Estimator for Ridge {
    fn fit(
        &mut self,
        features: ArrayView2<f64>,
        labels: ArrayView1<f64>,
        _eval: Option<(ArrayView2<f64>, ArrayView1<f64>)>,
    ) -> Result<(), MlError> {
        let (Some(feature_means), Some(label_mean)) = (features.mean_axis(Axis(0)), labels.mean())
        else {
            return Err(MlError::NotEnoughRows {
                needed: 1,
                available: 0,
            });
        };

        let (rows, columns) = features.dim();
        let design = DMatrix::from_fn(rows, columns, |row, column| {
            features[[row, column]] - feature_means[column]
        });
        let targets = DVector::from_iterator(rows, labels.iter().map(|label| label - label_mean));

        // (X'X + alpha I) w = X'y
        let gram = design.tr_mul(&design) + DMatrix::<f64>::identity(columns, columns) * self.alpha;
        let moments = design.tr_mul(&targets);

        let solution = gram.cholesky().ok_or(MlError::Singular)?.solve(&moments);
        let coefficients: Array1<f64> = solution.iter().copied().collect();
        self.intercept = label_mean - feature_means.dot(&coefficients);
        self.coefficients = Some(coefficients);

        Ok(())
    }

    fn predict(&self, features: ArrayView2<f64>) -> Result<Array1<f64>, MlError> {
        let coefficients = self.coefficients.as_ref().ok_or(MlError::NotFitted)?;
        if features.ncols() != coefficients.len() {
            return Err(MlError::FeatureMismatch {
                expected: coefficients.len(),
                features: features.ncols(),
            });
        }

        Ok(features.dot(coefficients) + self.intercept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn recovers_linear_relation_with_small_alpha() {
        let features = array![[0.0, 1.0], [1.0, 0.0], [2.0, 3.0], [3.0, 1.0], [4.0, 5.0]];
        let labels: Array1<f64> = features
            .rows()
            .into_iter()
            .map(|row| 3.0 + 2.0 * row[0] - row[1])
            .collect();

        let mut ridge = Ridge::new(1e-9);
        ridge.fit(features.view(), labels.view(), None).unwrap();

        let coefficients = ridge.coefficients().unwrap();
        assert_relative_eq!(coefficients[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(coefficients[1], -1.0, epsilon = 1e-6);
        assert_relative_eq!(ridge.intercept(), 3.0, epsilon = 1e-6);

        let predicted = ridge.predict(array![[10.0, 10.0]].view()).unwrap();
        assert_relative_eq!(predicted[0], 13.0, epsilon = 1e-5);
    }

    #[test]
    fn alpha_shrinks_towards_the_mean() {
        let features = array![[0.0], [1.0], [2.0], [3.0]];
        let labels = array![0.0, 1.0, 2.0, 3.0];

        let mut ridge = Ridge::default();
        ridge.fit(features.view(), labels.view(), None).unwrap();

        // x'x of the centered feature is 5
        assert_relative_eq!(ridge.coefficients().unwrap()[0], 5.0 / 6.0, epsilon = 1e-12);
        assert_relative_eq!(ridge.intercept(), 1.5 - 1.5 * 5.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn predicting_before_fit_fails() {
        assert!(matches!(
            Ridge::default().predict(array![[1.0]].view()),
            Err(MlError::NotFitted)
        ));
    }
}
