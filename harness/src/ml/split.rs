use super::MlError;
use ndarray::ArrayView1;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::collections::BTreeMap;

/// How rows are divided into a training and a test part
#[derive(Debug, Clone, PartialEq)]
pub enum Split {
    /// seeded shuffle, `ceil(rows * test_size)` test rows
    Random { test_size: f64 },
    /// every class keeps its share in both parts
    Stratified { test_size: f64 },
    /// the last rows form the test part
    Tail(usize),
}

/// Row indices of the training and the test part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

fn test_rows(rows: usize, test_size: f64) -> Result<usize, MlError> {
    let test = (rows as f64 * test_size).ceil() as usize;

    if test == 0 || test >= rows {
        return Err(MlError::NotEnoughRows {
            needed: test + 1,
            available: rows,
        });
    }

    Ok(test)
}

impl Split {
    pub fn indices(&self, labels: ArrayView1<f64>, seed: u64) -> Result<SplitIndices, MlError> {
        let rows = labels.len();

        match self {
            Self::Random { test_size } => {
                let test = test_rows(rows, *test_size)?;

                let mut order: Vec<usize> = (0..rows).collect();
                order.shuffle(&mut StdRng::seed_from_u64(seed));
                let train = order.split_off(test);

                Ok(SplitIndices { train, test: order })
            }
            Self::Stratified { test_size } => stratified(labels, *test_size, seed),
            Self::Tail(test) => {
                if *test == 0 || *test >= rows {
                    return Err(MlError::NotEnoughRows {
                        needed: test + 1,
                        available: rows,
                    });
                }

                Ok(SplitIndices {
                    train: (0..rows - test).collect(),
                    test: (rows - test..rows).collect(),
                })
            }
        }
    }
}

/// Test rows are allocated to classes by the floor of their exact share, the
/// rest goes to the classes with the largest remainders
fn stratified(labels: ArrayView1<f64>, test_size: f64, seed: u64) -> Result<SplitIndices, MlError> {
    let total = test_rows(labels.len(), test_size)?;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut classes: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (row, label) in labels.iter().enumerate() {
        classes.entry(*label as i64).or_default().push(row);
    }

    let shares: Vec<f64> = classes
        .values()
        .map(|rows| rows.len() as f64 * test_size)
        .collect();
    let mut allocation: Vec<usize> = shares.iter().map(|share| share.floor() as usize).collect();

    let mut by_remainder: Vec<usize> = (0..shares.len()).collect();
    by_remainder.sort_by(|&a, &b| {
        let remainder = |index: usize| shares[index] - shares[index].floor();
        remainder(b).total_cmp(&remainder(a)).then(a.cmp(&b))
    });
    let missing = total.saturating_sub(allocation.iter().sum());
    for &class in by_remainder.iter().cycle().take(missing) {
        allocation[class] += 1;
    }

    let (mut train, mut test) = (Vec::new(), Vec::new());
    for (mut rows, take) in classes.into_values().zip(allocation) {
        rows.shuffle(&mut rng);
        let take = take.min(rows.len());
        test.extend_from_slice(&rows[..take]);
        train.extend_from_slice(&rows[take..]);
    }

    train.shuffle(&mut rng);
    test.shuffle(&mut rng);

    Ok(SplitIndices { train, test })
}
