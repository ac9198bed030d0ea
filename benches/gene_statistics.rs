use criterion::measurement::Measurement;
use criterion::{criterion_group, criterion_main, BenchmarkGroup, BenchmarkId, Criterion};
use nalgebra_sparse::{CooMatrix, CscMatrix, CsrMatrix};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use single_subpop::filter::{filter_genes, NoiseFilterConfig};
use single_subpop::statistics::{mean_variance, MeanVarianceConfig};

#[derive(Clone)]
pub struct ExpressionConfig {
    seed: u64,
    // (genes, cells)
    matrix_sizes: Vec<(usize, usize)>,
    densities: Vec<f64>,
    measurement_time: u64,
    sample_size: usize,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            matrix_sizes: vec![(2000, 500), (20000, 2000), (30000, 10000)],
            densities: vec![0.01, 0.1],
            measurement_time: 10,
            sample_size: 10,
        }
    }
}

fn create_expression_matrix(genes: usize, cells: usize, density: f64, seed: u64) -> CscMatrix<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut coo = CooMatrix::new(genes, cells);
    let total_elements = (genes * cells) as f64 * density;

    for _ in 0..total_elements as usize {
        let gene = rng.random_range(0..genes);
        let cell = rng.random_range(0..cells);
        // Skewed so that gene means spread over a few decades
        let value = rng.random_range(0.0..1.0f64).powi(3) * 50.0;
        coo.push(gene, cell, value);
    }

    (&coo).into()
}

fn configure_group<'a, M: Measurement>(
    c: &'a mut Criterion<M>,
    name: &str,
    config: &ExpressionConfig,
) -> BenchmarkGroup<'a, M> {
    let mut group = c.benchmark_group(name);
    group.measurement_time(Duration::from_secs(config.measurement_time));
    group.sample_size(config.sample_size);
    group
}

pub fn bench_mean_variance(c: &mut Criterion) {
    let config = ExpressionConfig::default();
    let stats_config = MeanVarianceConfig::default();
    let mut group = configure_group(c, "Gene_Mean_Variance", &config);

    for &(genes, cells) in config.matrix_sizes.iter() {
        for &density in config.densities.iter() {
            let seed = config.seed + (genes * cells) as u64;
            let csc = create_expression_matrix(genes, cells, density, seed);
            let csr = CsrMatrix::from(&csc);
            let label = format!("{}x{}_d{}", genes, cells, density);

            group.bench_with_input(BenchmarkId::new("csc", &label), &csc, |b, m| {
                b.iter(|| mean_variance(m, &stats_config).unwrap());
            });

            group.bench_with_input(BenchmarkId::new("csr", &label), &csr, |b, m| {
                b.iter(|| mean_variance(m, &stats_config).unwrap());
            });
        }
    }
    group.finish();
}

pub fn bench_noise_filter(c: &mut Criterion) {
    let config = ExpressionConfig::default();
    let mut group = configure_group(c, "Noise_Filter", &config);

    for &(genes, cells) in config.matrix_sizes.iter() {
        let density = 0.1;
        let seed = config.seed + (genes * cells) as u64;
        let matrix = create_expression_matrix(genes, cells, density, seed);
        let stats = mean_variance(&matrix, &MeanVarianceConfig::default()).unwrap();

        for offset in [1.0, 1.1, 2.0] {
            group.bench_with_input(
                BenchmarkId::new(format!("offset_{}", offset), format!("{}x{}", genes, cells)),
                &offset,
                |b, &offset| {
                    let config = NoiseFilterConfig { offset };
                    b.iter(|| filter_genes(&stats, &matrix, &config).unwrap());
                },
            );
        }
    }
    group.finish();
}

criterion_group!(statistics_benches, bench_mean_variance, bench_noise_filter);
criterion_main!(statistics_benches);
