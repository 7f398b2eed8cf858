//! genetic.rs — Bit-vector genetic search over station subsets
//!
//! Chromosome bit i = station i is deployed. Fitness is the summed pairwise
//! distance of the deployed stations (0 for fewer than two, and 0 for any
//! member count other than `target_size` when one is set).
//!
//! Each generation: fitness-proportional parents, single-point crossover at a
//! cut in [1, len − 1] producing two children, independent bit-flip mutation,
//! population truncated back to its fixed size.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigError;
use crate::error::{LocatorError, Result};
use crate::geometry::DistanceMatrix;

pub type Chromosome = Vec<bool>;

/// Which chromosome the search reports at the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationPolicy {
    /// Fittest chromosome seen in any generation
    #[default]
    BestEver,
    /// Fittest chromosome of the last generation only
    FinalGeneration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticConfig {
    pub population_size: usize,
    pub generations: usize,
    /// Per-bit flip probability
    pub mutation_rate: f64,
    pub termination: TerminationPolicy,
    /// Only chromosomes with exactly this many stations score
    pub target_size: Option<usize>,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population_size: 7,
            generations: 100,
            mutation_rate: 0.05,
            termination: TerminationPolicy::BestEver,
            target_size: None,
        }
    }
}

impl GeneticConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.population_size == 0 {
            return Err(ConfigError::PopulationTooSmall);
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(ConfigError::InvalidMutationRate(self.mutation_rate));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneticOutcome {
    pub best: Chromosome,
    pub best_fitness: f64,
    pub generations_run: usize,
    pub initial_population: Vec<Chromosome>,
    pub final_population: Vec<Chromosome>,
}

impl GeneticOutcome {
    /// Station indices switched on in `best`
    pub fn selected(&self) -> Vec<usize> {
        members(&self.best)
    }
}

pub fn members(genes: &[bool]) -> Vec<usize> {
    genes.iter().enumerate().filter_map(|(i, &on)| on.then_some(i)).collect()
}

// ── Search ────────────────────────────────────────────────────────────────────

pub struct GeneticSearch<'a> {
    distances: &'a DistanceMatrix,
    config: GeneticConfig,
}

impl<'a> GeneticSearch<'a> {
    pub fn new(distances: &'a DistanceMatrix, config: GeneticConfig) -> Self {
        Self { distances, config }
    }

    pub fn fitness(&self, genes: &[bool]) -> f64 {
        let on = members(genes);
        if on.len() < 2 {
            return 0.0;
        }
        if self.config.target_size.is_some_and(|t| t != on.len()) {
            return 0.0;
        }
        self.distances.pairwise_sum(&on)
    }

    /// Random initial population, then `generations` rounds of evolution.
    pub fn run(&self, rng: &mut impl Rng) -> Result<GeneticOutcome> {
        self.config.validate()?;
        let n = self.distances.len();
        let population = (0..self.config.population_size)
            .map(|_| (0..n).map(|_| rng.gen::<bool>()).collect())
            .collect();
        self.run_from(population, rng)
    }

    /// Evolve a caller-supplied initial population.
    pub fn run_from(&self, initial: Vec<Chromosome>, rng: &mut impl Rng) -> Result<GeneticOutcome> {
        self.config.validate()?;
        let n = self.distances.len();
        if n == 0 {
            return Err(LocatorError::InvalidSubset("no stations to choose from".into()));
        }
        if initial.is_empty() || initial.iter().any(|c| c.len() != n) {
            return Err(LocatorError::InvalidSubset(format!(
                "initial population must hold chromosomes of length {n}"
            )));
        }

        let size = initial.len();
        let mut population = initial.clone();
        let mut best_ever = self.fittest(&population);

        for generation in 0..self.config.generations {
            population = self.next_generation(&population, size, rng);
            let gen_best = self.fittest(&population);
            if gen_best.1 > best_ever.1 {
                debug!(generation, fitness = gen_best.1, "new best chromosome");
                best_ever = gen_best;
            }
        }

        let (best, best_fitness) = match self.config.termination {
            TerminationPolicy::BestEver => best_ever,
            TerminationPolicy::FinalGeneration => self.fittest(&population),
        };

        Ok(GeneticOutcome {
            best,
            best_fitness,
            generations_run: self.config.generations,
            initial_population: initial,
            final_population: population,
        })
    }

    /// First chromosome with the highest fitness
    fn fittest(&self, population: &[Chromosome]) -> (Chromosome, f64) {
        let mut best = (population[0].clone(), self.fitness(&population[0]));
        for c in &population[1..] {
            let f = self.fitness(c);
            if f > best.1 {
                best = (c.clone(), f);
            }
        }
        best
    }

    fn next_generation(&self, population: &[Chromosome], size: usize, rng: &mut impl Rng) -> Vec<Chromosome> {
        let fitness: Vec<f64> = population.iter().map(|c| self.fitness(c)).collect();
        let mut next = Vec::with_capacity(size + 1);
        while next.len() < size {
            let a = &population[roulette(&fitness, rng)];
            let b = &population[roulette(&fitness, rng)];
            let (mut c1, mut c2) = crossover(a, b, rng);
            mutate(&mut c1, self.config.mutation_rate, rng);
            mutate(&mut c2, self.config.mutation_rate, rng);
            next.push(c1);
            next.push(c2);
        }
        next.truncate(size);
        next
    }
}

// ── Operators ─────────────────────────────────────────────────────────────────

/// Fitness-proportional pick; uniform when every fitness is zero.
fn roulette(fitness: &[f64], rng: &mut impl Rng) -> usize {
    let total: f64 = fitness.iter().map(|f| f.max(0.0)).sum();
    if total <= 0.0 {
        return rng.gen_range(0..fitness.len());
    }
    let target = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    for (i, f) in fitness.iter().enumerate() {
        cumulative += f.max(0.0);
        if cumulative > target {
            return i;
        }
    }
    fitness.len() - 1
}

/// Single-point crossover; parents shorter than 2 genes are copied unchanged.
fn crossover(a: &[bool], b: &[bool], rng: &mut impl Rng) -> (Chromosome, Chromosome) {
    if a.len() < 2 {
        return (a.to_vec(), b.to_vec());
    }
    let cut = rng.gen_range(1..a.len());
    let c1 = a[..cut].iter().chain(&b[cut..]).copied().collect();
    let c2 = b[..cut].iter().chain(&a[cut..]).copied().collect();
    (c1, c2)
}

fn mutate(genes: &mut [bool], rate: f64, rng: &mut impl Rng) {
    for g in genes.iter_mut() {
        if rng.gen::<f64>() < rate {
            *g = !*g;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DistanceMetric;
    use boom_types::Vec3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn matrix() -> DistanceMatrix {
        let pos: Vec<Vec3> = [
            [0.0, 0.0, 0.0],
            [1000.0, 0.0, 0.0],
            [0.0, 1000.0, 0.0],
            [500.0, 500.0, 500.0],
            [1000.0, 1000.0, 200.0],
            [800.0, 200.0, 50.0],
            [150.0, 850.0, 300.0],
        ].iter().map(|p| Vec3::from(*p)).collect();
        DistanceMatrix::new(&pos, DistanceMetric::Full3d)
    }

    #[test]
    fn test_fitness() {
        let m = matrix();
        let ga = GeneticSearch::new(&m, GeneticConfig::default());
        assert_eq!(ga.fitness(&[false; 7]), 0.0);
        assert_eq!(ga.fitness(&[true, false, false, false, false, false, false]), 0.0);
        let pair = [true, true, false, false, false, false, false];
        assert_eq!(ga.fitness(&pair), 1000.0);

        let sized = GeneticSearch::new(&m, GeneticConfig { target_size: Some(3), ..Default::default() });
        assert_eq!(sized.fitness(&pair), 0.0);
        assert!(sized.fitness(&[true, true, true, false, false, false, false]) > 0.0);
    }

    #[test]
    fn test_population_of_one_without_mutation_is_a_no_op() {
        let m = matrix();
        let config = GeneticConfig { population_size: 1, mutation_rate: 0.0, ..Default::default() };
        let ga = GeneticSearch::new(&m, config);
        let start = vec![vec![true, false, true, true, false, false, true]];
        let out = ga.run_from(start.clone(), &mut StdRng::seed_from_u64(4)).unwrap();
        assert_eq!(out.final_population, start);
        assert_eq!(out.best, start[0]);
        assert_eq!(out.initial_population, start);
    }

    #[test]
    fn test_population_size_is_constant() {
        let m = matrix();
        let ga = GeneticSearch::new(&m, GeneticConfig { generations: 20, ..Default::default() });
        let out = ga.run(&mut StdRng::seed_from_u64(8)).unwrap();
        assert_eq!(out.initial_population.len(), 7);
        assert_eq!(out.final_population.len(), 7);
        assert!(out.final_population.iter().all(|c| c.len() == 7));
    }

    #[test]
    fn test_best_ever_dominates_final_generation() {
        let m = matrix();
        let mut rng = StdRng::seed_from_u64(21);
        let ga = GeneticSearch::new(&m, GeneticConfig { mutation_rate: 0.3, ..Default::default() });
        let out = ga.run(&mut rng).unwrap();
        for c in out.final_population.iter().chain(&out.initial_population) {
            assert!(ga.fitness(c) <= out.best_fitness);
        }
        assert_eq!(ga.fitness(&out.best), out.best_fitness);
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let m = matrix();
        let config = GeneticConfig { target_size: Some(4), ..Default::default() };
        let a = GeneticSearch::new(&m, config.clone()).run(&mut StdRng::seed_from_u64(3)).unwrap();
        let b = GeneticSearch::new(&m, config).run(&mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_crossover_keeps_genes() {
        let mut rng = StdRng::seed_from_u64(1);
        let a = vec![true; 6];
        let b = vec![false; 6];
        let (c1, c2) = crossover(&a, &b, &mut rng);
        let cut = c1.iter().position(|g| !g).unwrap();
        assert!((1..6).contains(&cut));
        assert!(c2[..cut].iter().all(|g| !g) && c2[cut..].iter().all(|g| *g));
    }

    #[test]
    fn test_invalid_config() {
        let m = matrix();
        let ga = GeneticSearch::new(&m, GeneticConfig { population_size: 0, ..Default::default() });
        assert!(matches!(
            ga.run(&mut StdRng::seed_from_u64(0)),
            Err(LocatorError::Config(ConfigError::PopulationTooSmall))
        ));
        let ga = GeneticSearch::new(&m, GeneticConfig { mutation_rate: 1.5, ..Default::default() });
        assert!(ga.run(&mut StdRng::seed_from_u64(0)).is_err());
    }
}
