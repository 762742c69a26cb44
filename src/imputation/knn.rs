//! KNN-based imputation

use crate::error::{FeatureError, Result};
use crate::imputation::{is_missing, Imputer};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Ordered float for priority queue
#[derive(Debug, Clone, Copy)]
struct DistanceIdx(f64, usize);

impl PartialEq for DistanceIdx {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DistanceIdx {}

impl PartialOrd for DistanceIdx {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DistanceIdx {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max heap by distance, then by row so ties resolve to the earliest rows
        self.0
            .partial_cmp(&other.0)
            .unwrap_or(Ordering::Equal)
            .then(self.1.cmp(&other.1))
    }
}

/// Distance between two samples over their shared observed features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KnnMetric {
    #[default]
    Euclidean,
    Manhattan,
}

/// How neighbor values are averaged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KnnWeights {
    #[default]
    Uniform,
    Distance,
}

/// KNN-based imputer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnImputer {
    n_neighbors: usize,
    metric: KnnMetric,
    weights: KnnWeights,
    /// Training data (complete rows only)
    complete_data: Option<Array2<f64>>,
    /// Feature means for fallback
    feature_means: Option<Array1<f64>>,
}

impl KnnImputer {
    /// Create new KNN imputer
    pub fn new(n_neighbors: usize) -> Self {
        Self {
            n_neighbors: n_neighbors.max(1),
            metric: KnnMetric::Euclidean,
            weights: KnnWeights::Uniform,
            complete_data: None,
            feature_means: None,
        }
    }

    pub fn with_metric(mut self, metric: KnnMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_weights(mut self, weights: KnnWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn n_neighbors(&self) -> usize {
        self.n_neighbors
    }

    pub fn is_fitted(&self) -> bool {
        self.complete_data.is_some()
    }

    /// Distance between two samples, ignoring NaN positions.
    fn distance(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        let mut count = 0usize;
        let mut accum = 0.0f64;

        for (&ai, &bi) in a.iter().zip(b.iter()) {
            if is_missing(ai) || is_missing(bi) {
                continue;
            }
            count += 1;
            match self.metric {
                KnnMetric::Manhattan => accum += (ai - bi).abs(),
                KnnMetric::Euclidean => {
                    let d = ai - bi;
                    accum += d * d;
                }
            }
        }

        if count == 0 {
            return f64::INFINITY;
        }

        match self.metric {
            KnnMetric::Manhattan => accum / count as f64,
            KnnMetric::Euclidean => (accum / count as f64).sqrt(),
        }
    }

    /// k nearest complete rows, closest first.
    fn find_neighbors(&self, data: &Array2<f64>, sample: ArrayView1<f64>) -> Vec<(usize, f64)> {
        let k = self.n_neighbors;
        let mut heap: BinaryHeap<DistanceIdx> = BinaryHeap::with_capacity(k + 1);

        for (i, row) in data.rows().into_iter().enumerate() {
            let dist = self.distance(sample, row);
            if !dist.is_finite() {
                continue;
            }
            if heap.len() < k {
                heap.push(DistanceIdx(dist, i));
            } else if let Some(&DistanceIdx(max_dist, _)) = heap.peek() {
                if dist < max_dist {
                    heap.pop();
                    heap.push(DistanceIdx(dist, i));
                }
            }
        }

        heap.into_sorted_vec()
            .into_iter()
            .map(|DistanceIdx(d, i)| (i, d))
            .collect()
    }

    fn fallback(&self, feature_idx: usize) -> f64 {
        self.feature_means
            .as_ref()
            .map(|m| m[feature_idx])
            .unwrap_or(0.0)
    }

    /// Impute missing value using neighbors
    fn impute_value(&self, data: &Array2<f64>, neighbors: &[(usize, f64)], feature_idx: usize) -> f64 {
        if neighbors.is_empty() {
            return self.fallback(feature_idx);
        }

        match self.weights {
            KnnWeights::Distance => {
                let mut weighted_sum = 0.0;
                let mut weight_sum = 0.0;

                for &(idx, dist) in neighbors {
                    let weight = if dist < 1e-10 { 1e10 } else { 1.0 / dist };
                    weighted_sum += data[[idx, feature_idx]] * weight;
                    weight_sum += weight;
                }

                if weight_sum > 0.0 {
                    weighted_sum / weight_sum
                } else {
                    self.fallback(feature_idx)
                }
            }
            KnnWeights::Uniform => {
                let sum: f64 = neighbors
                    .iter()
                    .map(|&(idx, _)| data[[idx, feature_idx]])
                    .sum();
                sum / neighbors.len() as f64
            }
        }
    }
}

impl Default for KnnImputer {
    fn default() -> Self {
        Self::new(5)
    }
}

impl Imputer for KnnImputer {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        let complete_rows: Vec<usize> = x
            .rows()
            .into_iter()
            .enumerate()
            .filter(|(_, row)| !row.iter().any(|&v| is_missing(v)))
            .map(|(i, _)| i)
            .collect();

        if complete_rows.is_empty() {
            return Err(FeatureError::DataError(
                "No complete rows found for KNN imputation".to_string(),
            ));
        }

        let complete_data = x.select(Axis(0), &complete_rows);
        let feature_means = complete_data
            .mean_axis(Axis(0))
            .ok_or_else(|| FeatureError::DataError("Failed to compute means".to_string()))?;

        self.complete_data = Some(complete_data);
        self.feature_means = Some(feature_means);

        Ok(())
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let data = self
            .complete_data
            .as_ref()
            .ok_or_else(|| FeatureError::NotFitted("KnnImputer".to_string()))?;

        if x.ncols() != data.ncols() {
            return Err(FeatureError::ShapeError {
                expected: format!("{} features", data.ncols()),
                actual: format!("{} features", x.ncols()),
            });
        }

        let mut result = x.clone();
        for (row_idx, row) in x.rows().into_iter().enumerate() {
            if !row.iter().any(|&v| is_missing(v)) {
                continue;
            }

            let neighbors = self.find_neighbors(data, row);
            for (j, &value) in row.iter().enumerate() {
                if is_missing(value) {
                    result[[row_idx, j]] = self.impute_value(data, &neighbors, j);
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knn_imputer_basic() {
        let data = Array2::from_shape_vec(
            (6, 2),
            vec![
                1.0, 10.0,
                2.0, 20.0,
                3.0, 30.0,
                4.0, 40.0,
                f64::NAN, 25.0,
                2.5, f64::NAN,
            ],
        )
        .unwrap();

        let mut imputer = KnnImputer::new(3);
        let result = imputer.fit_transform(&data).unwrap();

        assert!(!result.iter().any(|&v| v.is_nan()));
        assert!(result[[4, 0]] >= 1.0 && result[[4, 0]] <= 4.0);
        assert!(result[[5, 1]] >= 10.0 && result[[5, 1]] <= 40.0);
    }

    #[test]
    fn test_knn_imputer_distance_weights() {
        let data = Array2::from_shape_vec(
            (5, 2),
            vec![
                0.0, 0.0,
                1.0, 1.0,
                2.0, 2.0,
                3.0, 3.0,
                0.1, f64::NAN,
            ],
        )
        .unwrap();

        let mut imputer = KnnImputer::new(3).with_weights(KnnWeights::Distance);
        let result = imputer.fit_transform(&data).unwrap();

        // Pulled towards the first row
        assert!(result[[4, 1]].abs() < 1.0);
    }

    #[test]
    fn test_single_feature_falls_back_to_mean() {
        let data = Array2::from_shape_vec((4, 1), vec![1.0, 2.0, 6.0, f64::NAN]).unwrap();
        let mut imputer = KnnImputer::new(2).with_metric(KnnMetric::Manhattan);
        let result = imputer.fit_transform(&data).unwrap();
        assert!((result[[3, 0]] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_transform_is_row_independent() {
        let train = Array2::from_shape_vec(
            (4, 2),
            vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 1.5, f64::NAN],
        )
        .unwrap();
        let mut imputer = KnnImputer::new(2);
        let batch = imputer.fit_transform(&train).unwrap();

        let single = Array2::from_shape_vec((1, 2), vec![1.5, f64::NAN]).unwrap();
        let alone = imputer.transform(&single).unwrap();
        assert_eq!(alone[[0, 1]], batch[[3, 1]]);
    }

    #[test]
    fn test_unfitted_transform_fails() {
        let imputer = KnnImputer::new(2);
        let data = Array2::from_shape_vec((1, 1), vec![f64::NAN]).unwrap();
        assert!(matches!(
            imputer.transform(&data),
            Err(FeatureError::NotFitted(_))
        ));
    }
}
