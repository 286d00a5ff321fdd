//! Sequence learning with a GRU: predict the next value of a square wave.
//!
//! Training samples are grouped into sequences with `set_sequence_length`, so
//! the recurrent state carries across positions within a sequence and resets
//! between batches. Run with `cargo run --example sequence`.

use annt::costs::CostFunction;
use annt::layers::{DenseLayer, GruLayer};
use annt::network::Network;
use annt::optimizers::Adam;
use annt::training::TrainingDriver;
use annt::utils::SimpleRng;

const SEQ_LEN: usize = 8;

// Square wave with period 4: 0 0 1 1 0 0 1 1 ...
fn wave(t: usize) -> f32 {
    if (t / 2) % 2 == 0 {
        0.0
    } else {
        1.0
    }
}

fn main() -> annt::Result<()> {
    let mut rng = SimpleRng::new(42);

    let mut net = Network::new();
    net.add(Box::new(GruLayer::new(1, 8, &mut rng)))?;
    net.add(Box::new(DenseLayer::new(8, 1, &mut rng)))?;

    // One sequence of SEQ_LEN positions per batch; each position's target is
    // the next value of the wave.
    let inputs: Vec<Vec<f32>> = (0..SEQ_LEN).map(|t| vec![wave(t)]).collect();
    let targets: Vec<Vec<f32>> = (0..SEQ_LEN).map(|t| vec![wave(t + 1)]).collect();

    let mut driver = TrainingDriver::new(&net, Box::new(Adam::new(0.01)), CostFunction::Mse);
    driver.set_sequence_length(SEQ_LEN);

    for epoch in 0..500 {
        let cost = driver.train_batch(&mut net, &inputs, &targets);
        if epoch % 50 == 0 {
            println!("epoch {:3}  cost {:.6}", epoch, cost);
        }
    }

    // Feed the wave one step at a time; the hidden state persists across
    // calls until reset_state.
    let mut infer = annt::InferenceDriver::new();
    println!("\npredictions over one period:");
    infer.reset_state();
    for t in 0..SEQ_LEN {
        let prediction = infer.run(&net, &[wave(t)])[0];
        println!(
            "  t={}  input {:.0}  predicted next {:.3}  (want {:.0})",
            t,
            wave(t),
            prediction,
            wave(t + 1)
        );
    }
    Ok(())
}
