//! XOR trained end-to-end with Nesterov momentum and binary cross-entropy.
//!
//! Run with `cargo run --example xor`.

use annt::costs::CostFunction;
use annt::layers::{ActivationLayer, DenseLayer};
use annt::network::Network;
use annt::optimizers::Nesterov;
use annt::training::TrainingDriver;
use annt::utils::SimpleRng;

fn main() -> annt::Result<()> {
    let mut rng = SimpleRng::new(42);

    let mut net = Network::new();
    net.add(Box::new(DenseLayer::new(2, 2, &mut rng)))?;
    net.add(Box::new(ActivationLayer::tanh()))?;
    net.add(Box::new(DenseLayer::new(2, 1, &mut rng)))?;
    net.add(Box::new(ActivationLayer::sigmoid()))?;
    println!(
        "network: {} layers, {} trainable parameters",
        net.len(),
        net.parameter_count()
    );

    let inputs = vec![
        vec![-1.0, -1.0],
        vec![1.0, -1.0],
        vec![-1.0, 1.0],
        vec![1.0, 1.0],
    ];
    let targets = vec![vec![0.0], vec![1.0], vec![1.0], vec![0.0]];

    let mut driver = TrainingDriver::new(
        &net,
        Box::new(Nesterov::new(0.1)),
        CostFunction::BinaryCrossEntropy,
    );

    for epoch in 0..1000 {
        let cost = driver.train_batch(&mut net, &inputs, &targets);
        if epoch % 100 == 0 {
            println!("epoch {:4}  cost {:.6}", epoch, cost);
        }
    }

    println!("\ntrained outputs:");
    let mut infer = annt::InferenceDriver::new();
    for (input, target) in inputs.iter().zip(&targets) {
        let output = infer.run(&net, input)[0];
        println!(
            "  ({:+.0}, {:+.0}) -> {:.4}  (want {:.0})",
            input[0], input[1], output, target[0]
        );
    }
    Ok(())
}
