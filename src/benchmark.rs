use criterion::{black_box, criterion_group, criterion_main, Criterion};
use criterion::measurement::WallTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sts_unfold::model_checking::{belief_support, conditional, memory_product};
use sts_unfold::{MemoryAutomaton, Sts, TransitionMatrixBuilder, TransitionPair};

enum Size {
    SMALL,
    MEDIUM,
    LARGE
}

/// Random POMDP where every state with observation `o` has `o % 3 + 1` actions, so the model
/// is canonical, and every action moves to up to three random successors.
fn setup(size: Size, seed: u64) -> Sts {
    let (num_states, num_observations) = match size {
        Size::SMALL => (50, 5),
        Size::MEDIUM => (500, 20),
        Size::LARGE => (5000, 100)
    };
    let mut rng = StdRng::seed_from_u64(seed);
    let observations: Vec<u32> = (0..num_states).map(|_| rng.gen_range(0, num_observations)).collect();
    let mut builder = TransitionMatrixBuilder::with_capacity(num_states, num_states * 2);
    for s in 0..num_states {
        builder.new_row_group();
        for _ in 0..observations[s] % 3 + 1 {
            let successors: Vec<usize> = (0..rng.gen_range(1, 4)).map(|_| rng.gen_range(0, num_states)).collect();
            let weights: Vec<f64> = successors.iter().map(|_| rng.gen_range(0.1, 1.0)).collect();
            let total: f64 = weights.iter().sum();
            builder.add_row(successors.into_iter().zip(weights.into_iter()).map(|(s, w)| TransitionPair { s, p: w / total }));
        }
    }
    let mut pomdp = Sts::new(builder.build());
    pomdp.add_label("init", vec![0]);
    pomdp.add_label("cond", (0..num_states).filter(|s| observations[*s] == 1));
    pomdp.add_label("target", (0..num_states).filter(|s| observations[*s] == 2));
    pomdp.observations = Some(observations);
    pomdp
}

pub fn belief_support_benchmark(c: &mut Criterion) -> &mut Criterion<WallTime> {
    let pomdp = setup(Size::SMALL, 1);
    c.bench_function("belief support unfolding", |b|
        b.iter(|| belief_support::unfold(black_box(&pomdp))))
}

pub fn memory_product_benchmark(c: &mut Criterion) -> &mut Criterion<WallTime> {
    let pomdp = setup(Size::MEDIUM, 2);
    let memory = MemoryAutomaton::full(3);
    c.bench_function("memory product unfolding", |b|
        b.iter(|| memory_product::unfold(black_box(&pomdp), &memory)))
}

pub fn conditional_benchmark(c: &mut Criterion) -> &mut Criterion<WallTime> {
    let mdp = setup(Size::LARGE, 3);
    c.bench_function("conditional unfolding", |b|
        b.iter(|| conditional::unfold(black_box(&mdp), "cond", "target")))
}

criterion_group!(benches, belief_support_benchmark, memory_product_benchmark, conditional_benchmark);
criterion_main!(benches);
