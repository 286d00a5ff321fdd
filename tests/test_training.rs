//! End-to-end training behavior: convergence, gradient accumulation and
//! classification evaluation.

use annt::context::{LayerContext, ScratchArena};
use annt::costs::CostFunction;
use annt::layers::{ActivationLayer, DenseLayer, Layer};
use annt::math::VectorOps;
use annt::network::Network;
use annt::optimizers::{Nesterov, Sgd};
use annt::training::{SampleSelection, TrainingDriver};
use annt::utils::{one_hot, SimpleRng};
use approx::assert_relative_eq;

fn xor_data() -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
    (
        vec![
            vec![-1.0, -1.0],
            vec![1.0, -1.0],
            vec![-1.0, 1.0],
            vec![1.0, 1.0],
        ],
        vec![vec![0.0], vec![1.0], vec![1.0], vec![0.0]],
    )
}

#[test]
fn xor_converges_with_nesterov_and_binary_cross_entropy() {
    let mut rng = SimpleRng::new(42);
    let mut net = Network::new();
    net.add(Box::new(DenseLayer::new(2, 4, &mut rng))).unwrap();
    net.add(Box::new(ActivationLayer::tanh())).unwrap();
    net.add(Box::new(DenseLayer::new(4, 1, &mut rng))).unwrap();
    net.add(Box::new(ActivationLayer::sigmoid())).unwrap();

    let (inputs, targets) = xor_data();
    let mut driver = TrainingDriver::new(
        &net,
        Box::new(Nesterov::new(0.1)),
        CostFunction::BinaryCrossEntropy,
    );

    let mut cost = f32::INFINITY;
    for _ in 0..2000 {
        cost = driver.train_batch(&mut net, &inputs, &targets);
        if cost < 0.05 {
            break;
        }
    }
    assert!(cost < 0.1, "xor did not converge, cost {}", cost);

    // Every pattern lands on the right side of 0.5.
    let mut infer = annt::InferenceDriver::new();
    for (input, target) in inputs.iter().zip(&targets) {
        let output = infer.run(&net, input)[0];
        assert_eq!(output > 0.5, target[0] > 0.5, "pattern {:?}", input);
    }
}

#[test]
fn backward_accumulates_gradients_across_calls() {
    let mut rng = SimpleRng::new(42);
    let layer = DenseLayer::new(3, 2, &mut rng);

    let run_backward = |input: &[f32], delta: &[f32], grads: &mut [f32]| {
        let mut arena = ScratchArena::build(layer.scratch_spec(true), 1, 1);
        let mut ctx = LayerContext {
            samples: 1,
            training: true,
            sequence_length: 1,
            math: VectorOps::portable(),
            scratch: &mut arena,
        };
        let mut output = vec![0.0; layer.output_size()];
        layer.forward(input, &mut output, &mut ctx);
        let mut prev = vec![0.0; layer.input_size()];
        layer.backward(input, &output, delta, &mut prev, grads, &mut ctx);
    };

    let input_a = [0.5, -0.2, 0.8];
    let delta_a = [1.0, -0.5];
    let input_b = [-0.3, 0.9, 0.1];
    let delta_b = [0.25, 2.0];

    let mut only_a = vec![0.0; layer.parameter_count()];
    run_backward(&input_a, &delta_a, &mut only_a);
    let mut only_b = vec![0.0; layer.parameter_count()];
    run_backward(&input_b, &delta_b, &mut only_b);

    let mut both = vec![0.0; layer.parameter_count()];
    run_backward(&input_a, &delta_a, &mut both);
    run_backward(&input_b, &delta_b, &mut both);

    for i in 0..both.len() {
        assert_relative_eq!(both[i], only_a[i] + only_b[i], epsilon = 1e-5);
    }
}

#[test]
fn classification_metrics_track_training() {
    // Four linearly separable points in two classes.
    let mut rng = SimpleRng::new(42);
    let mut net = Network::new();
    net.add(Box::new(DenseLayer::new(2, 2, &mut rng))).unwrap();
    net.add(Box::new(ActivationLayer::softmax())).unwrap();

    let inputs = vec![
        vec![2.0, 0.1],
        vec![1.5, -0.2],
        vec![-0.1, 1.8],
        vec![0.2, 2.2],
    ];
    let labels = vec![0usize, 0, 1, 1];
    let targets: Vec<Vec<f32>> = labels.iter().map(|&l| one_hot(l, 2)).collect();

    let mut driver = TrainingDriver::new(
        &net,
        Box::new(Sgd::new(0.5)),
        CostFunction::CrossEntropy,
    );
    for _ in 0..200 {
        driver.train_batch(&mut net, &inputs, &targets);
    }

    let (cost, correct) = driver.test_classification(&net, &inputs, &labels);
    assert_eq!(correct, inputs.len());
    assert!(cost < 0.5, "cost {}", cost);
}

#[test]
fn epoch_selection_modes_cover_the_dataset() {
    let mut rng = SimpleRng::new(42);
    let inputs: Vec<Vec<f32>> = (0..12).map(|i| vec![(i as f32 - 6.0) / 6.0]).collect();
    let targets: Vec<Vec<f32>> = inputs.iter().map(|x| vec![2.0 * x[0] + 0.5]).collect();

    for selection in [
        SampleSelection::Sequential,
        SampleSelection::RandomPick,
        SampleSelection::Shuffle,
    ] {
        let mut net = Network::new();
        net.add(Box::new(DenseLayer::new(1, 1, &mut rng))).unwrap();
        let mut driver =
            TrainingDriver::new(&net, Box::new(Sgd::new(0.1)), CostFunction::Mse);
        driver.set_rng(SimpleRng::new(99));

        for _ in 0..200 {
            driver.train_epoch(&mut net, &inputs, &targets, 3, selection);
        }
        let cost = driver.test_sample(&net, &[0.5], &[1.5]);
        assert!(cost < 0.01, "{:?}: cost {}", selection, cost);
    }
}

#[test]
fn averaged_and_summed_gradients_scale_as_expected() {
    // With plain SGD, an averaged batch of two identical samples must take
    // exactly half the step of the summed version.
    let build = || {
        let mut rng = SimpleRng::new(5);
        let mut net = Network::new();
        net.add(Box::new(DenseLayer::new(1, 1, &mut rng))).unwrap();
        net
    };

    let step = |average: bool| -> Vec<u8> {
        let mut net = build();
        let mut driver = TrainingDriver::new(&net, Box::new(Sgd::new(0.1)), CostFunction::Mse);
        driver.set_average_gradients(average);
        driver.train_batch(&mut net, &[vec![1.0], vec![1.0]], &[vec![3.0], vec![3.0]]);
        let mut bytes = Vec::new();
        net.save_params_to(&mut bytes).unwrap();
        bytes
    };

    let averaged = step(true);
    let summed = step(false);
    assert_ne!(averaged, summed);

    // Reproduce the averaged result by hand: one sample, same learning rate,
    // same gradient as the two-sample mean.
    let mut net = build();
    let mut driver = TrainingDriver::new(&net, Box::new(Sgd::new(0.1)), CostFunction::Mse);
    driver.train_sample(&mut net, &[1.0], &[3.0]);
    let mut bytes = Vec::new();
    net.save_params_to(&mut bytes).unwrap();
    assert_eq!(bytes, averaged);
}
