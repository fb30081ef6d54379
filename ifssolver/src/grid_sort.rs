use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Termination and restart settings for the column clustering.
#[derive(Debug, Clone, Copy)]
pub struct KMeansParams {
    /// Independent runs; the most compact one wins.
    pub attempts: usize,
    pub max_iterations: usize,
    /// A run stops once no center moves farther than this.
    pub epsilon: f64,
    pub seed: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        KMeansParams {
            attempts: 10,
            max_iterations: 10,
            epsilon: 1.0,
            seed: 0,
        }
    }
}

/// Result of [`kmeans_1d`].
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    /// Cluster index of every input value.
    pub labels: Vec<usize>,
    pub centers: Vec<f64>,
    /// Sum of squared distances to the assigned centers.
    pub compactness: f64,
}

/// Orders match centers into columns.
///
/// The x coordinates are clustered into `column_count` groups, clamped to between one
/// and the number of centers. Columns come left to right by cluster center, and each column lists its
/// members top to bottom. Returned values are indices into `centers` and together they
/// partition `0..centers.len()`.
///
/// # Examples
/// ```
/// use ifssolver::grid_sort::sort_grid;
///
/// let centers = [(210.0, 5.0), (12.0, 90.0), (10.0, 10.0), (205.0, 80.0)];
/// assert_eq!(sort_grid(&centers, 2), vec![vec![2, 1], vec![0, 3]]);
/// ```
pub fn sort_grid(centers: &[(f64, f64)], column_count: usize) -> Vec<Vec<usize>> {
    sort_grid_with(centers, column_count, &KMeansParams::default())
}

pub fn sort_grid_with(centers: &[(f64, f64)], column_count: usize, params: &KMeansParams) -> Vec<Vec<usize>> {
    if centers.is_empty() {
        return Vec::new();
    }
    let k = column_count.clamp(1, centers.len());

    let xs: Vec<f64> = centers.iter().map(|c| c.0).collect();
    let clustering = kmeans_1d(&xs, k, params);

    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| clustering.centers[a].total_cmp(&clustering.centers[b]));

    order
        .into_iter()
        .map(|cluster| {
            let mut members: Vec<usize> = (0..centers.len()).filter(|&i| clustering.labels[i] == cluster).collect();
            members.sort_by(|&a, &b| centers[a].1.total_cmp(&centers[b].1));
            members
        })
        .filter(|members| !members.is_empty())
        .collect()
}

/// k-means over scalar values with k-means++ seeding.
///
/// `k` must not exceed `values.len()`; clusters that run empty are refilled with the point
/// lying farthest from its own center, so every cluster keeps at least one member.
pub fn kmeans_1d(values: &[f64], k: usize, params: &KMeansParams) -> Clustering {
    let n = values.len();
    let k = k.min(n);
    if k == 0 {
        return Clustering {
            labels: vec![0; n],
            centers: Vec::new(),
            compactness: 0.0,
        };
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<Clustering> = None;
    for _ in 0..params.attempts.max(1) {
        let mut centers = kmeans_plus_plus(values, k, &mut rng);
        let mut labels = vec![0usize; n];

        for iteration in 0..params.max_iterations.max(1) {
            assign_labels(values, &centers, &mut labels);
            refill_empty_clusters(values, &mut centers, &mut labels, k);

            let new_centers = cluster_means(values, &labels, &centers);
            let max_shift = centers
                .iter()
                .zip(new_centers.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            centers = new_centers;
            if max_shift <= params.epsilon || iteration + 1 == params.max_iterations {
                break;
            }
        }
        assign_labels(values, &centers, &mut labels);
        refill_empty_clusters(values, &mut centers, &mut labels, k);
        centers = cluster_means(values, &labels, &centers);

        let compactness = values
            .iter()
            .zip(labels.iter())
            .map(|(v, &l)| (v - centers[l]).powi(2))
            .sum::<f64>();
        if best.as_ref().map_or(true, |b| compactness < b.compactness) {
            best = Some(Clustering {
                labels,
                centers,
                compactness,
            });
        }
    }

    best.unwrap_or_else(|| Clustering {
        labels: vec![0; n],
        centers: vec![0.0; k],
        compactness: 0.0,
    })
}

fn kmeans_plus_plus(values: &[f64], k: usize, rng: &mut StdRng) -> Vec<f64> {
    let n = values.len();
    let mut centers = Vec::with_capacity(k);
    centers.push(values[rng.random_range(0..n)]);

    let mut dist2: Vec<f64> = values.iter().map(|v| (v - centers[0]).powi(2)).collect();
    while centers.len() < k {
        let total: f64 = dist2.iter().sum();
        let chosen = if total <= 0.0 {
            rng.random_range(0..n)
        } else {
            let mut target = rng.random::<f64>() * total;
            let mut chosen = n - 1;
            for (i, d) in dist2.iter().enumerate() {
                target -= d;
                if target <= 0.0 && *d > 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        };
        let center = values[chosen];
        centers.push(center);
        for (d, v) in dist2.iter_mut().zip(values.iter()) {
            *d = d.min((v - center).powi(2));
        }
    }
    centers
}

fn assign_labels(values: &[f64], centers: &[f64], labels: &mut [usize]) {
    for (label, v) in labels.iter_mut().zip(values.iter()) {
        let mut best = 0;
        for (c, center) in centers.iter().enumerate() {
            if (v - center).abs() < (v - centers[best]).abs() {
                best = c;
            }
        }
        *label = best;
    }
}

fn refill_empty_clusters(values: &[f64], centers: &mut [f64], labels: &mut [usize], k: usize) {
    for cluster in 0..k {
        let mut counts = vec![0usize; k];
        for &l in labels.iter() {
            counts[l] += 1;
        }
        if counts[cluster] > 0 {
            continue;
        }
        // farthest point among clusters that can spare one
        let donor = (0..values.len())
            .filter(|&i| counts[labels[i]] > 1)
            .max_by(|&a, &b| {
                let da = (values[a] - centers[labels[a]]).abs();
                let db = (values[b] - centers[labels[b]]).abs();
                da.total_cmp(&db).then(b.cmp(&a))
            });
        if let Some(i) = donor {
            labels[i] = cluster;
            centers[cluster] = values[i];
        }
    }
}

fn cluster_means(values: &[f64], labels: &[usize], previous: &[f64]) -> Vec<f64> {
    let k = previous.len();
    let mut sums = vec![0.0; k];
    let mut counts = vec![0usize; k];
    for (v, &l) in values.iter().zip(labels.iter()) {
        sums[l] += v;
        counts[l] += 1;
    }
    (0..k)
        .map(|c| if counts[c] == 0 { previous[c] } else { sums[c] / counts[c] as f64 })
        .collect()
}
