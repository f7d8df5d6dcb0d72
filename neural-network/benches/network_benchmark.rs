use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ndarray::Array4;
use neural_network::{CrossEntropyLoss, FeatureSpec, Mode, Network, NetworkConfig};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn small_vgg() -> NetworkConfig {
    NetworkConfig {
        in_channels: 3,
        input_size: 32,
        features: vec![
            FeatureSpec::Conv(16),
            FeatureSpec::MaxPool,
            FeatureSpec::Conv(32),
            FeatureSpec::MaxPool,
            FeatureSpec::Conv(64),
            FeatureSpec::MaxPool,
        ],
        batch_norm: true,
        classifier: vec![64],
        dropout: 0.5,
        num_classes: 10,
    }
}

fn network_passes(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0);
    let mut network = match Network::with_rng(small_vgg(), &mut rng) {
        Ok(network) => network,
        Err(e) => panic!("benchmark network is invalid: {e}"),
    };
    let batch = Array4::from_shape_fn((16, 3, 32, 32), |(n, ch, y, x)| {
        ((n + ch * 3 + y * 7 + x * 11) as f32 * 0.01).sin()
    });
    let targets: Vec<usize> = (0..16).map(|i| i % 10).collect();
    let criterion = CrossEntropyLoss::new();

    c.bench_function("eval_forward_16x3x32x32", |b| {
        network.set_mode(Mode::Eval);
        b.iter(|| network.forward(black_box(batch.clone())))
    });

    c.bench_function("train_forward_backward_16x3x32x32", |b| {
        network.set_mode(Mode::Train);
        b.iter(|| -> neural_network::Result<()> {
            network.zero_grad();
            let logits = network.forward(black_box(batch.clone()))?;
            let (_, grad) = criterion.forward(logits.view(), &targets)?;
            network.backward(grad)
        })
    });
}

criterion_group!(benches, network_passes);
criterion_main!(benches);
