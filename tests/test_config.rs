//! JSON-configured networks driven end to end.

use annt::config::{ArchitectureConfig, TrainingSettings};
use annt::training::{SampleSelection, TrainingDriver};
use annt::utils::{LrSchedule, StepDecay};

#[test]
fn json_configured_xor_trains() {
    let architecture = ArchitectureConfig::from_str(
        r#"{
            "seed": 42,
            "layers": [
                { "type": "dense", "inputs": 2, "outputs": 4 },
                { "type": "activation", "activation": "tanh" },
                { "type": "dense", "inputs": 4, "outputs": 1 },
                { "type": "activation", "activation": "sigmoid" }
            ]
        }"#,
    )
    .unwrap();
    let settings = TrainingSettings::from_str(
        r#"{
            "optimizer": "nesterov",
            "cost": "binary_cross_entropy",
            "learning_rate": 0.1,
            "batch_size": 4,
            "epochs": 2000
        }"#,
    )
    .unwrap();

    let mut net = architecture.build_network().unwrap();
    let mut driver = TrainingDriver::new(
        &net,
        settings.build_optimizer().unwrap(),
        settings.cost_function().unwrap(),
    );

    let inputs = vec![
        vec![-1.0, -1.0],
        vec![1.0, -1.0],
        vec![-1.0, 1.0],
        vec![1.0, 1.0],
    ];
    let targets = vec![vec![0.0], vec![1.0], vec![1.0], vec![0.0]];

    let mut cost = f32::INFINITY;
    for _ in 0..settings.epochs {
        cost = driver.train_epoch(
            &mut net,
            &inputs,
            &targets,
            settings.batch_size,
            SampleSelection::Sequential,
        );
        if cost < 0.05 {
            break;
        }
    }
    assert!(cost < 0.1, "configured xor did not converge, cost {}", cost);
}

#[test]
fn recurrent_architecture_builds_from_json() {
    let architecture = ArchitectureConfig::from_str(
        r#"{
            "seed": 7,
            "layers": [
                { "type": "gru", "inputs": 1, "outputs": 4 },
                { "type": "lstm", "inputs": 4, "outputs": 4 },
                { "type": "recurrent", "inputs": 4, "outputs": 2 },
                { "type": "dense", "inputs": 2, "outputs": 1 }
            ]
        }"#,
    )
    .unwrap();
    let net = architecture.build_network().unwrap();
    assert_eq!(net.len(), 4);
    assert_eq!(net.input_size(), 1);
    assert_eq!(net.output_size(), 1);
    assert!(net.parameter_count() > 0);
}

#[test]
fn schedule_feeds_the_driver_learning_rate() {
    let architecture = ArchitectureConfig::from_str(
        r#"{
            "seed": 1,
            "layers": [ { "type": "dense", "inputs": 1, "outputs": 1 } ]
        }"#,
    )
    .unwrap();
    let settings = TrainingSettings::from_str(
        r#"{
            "optimizer": "sgd",
            "cost": "mse",
            "learning_rate": 0.1,
            "batch_size": 2,
            "epochs": 6
        }"#,
    )
    .unwrap();

    let mut net = architecture.build_network().unwrap();
    let mut driver = TrainingDriver::new(
        &net,
        settings.build_optimizer().unwrap(),
        settings.cost_function().unwrap(),
    );
    let schedule = StepDecay::new(settings.learning_rate, 2, 0.5);

    let inputs = vec![vec![0.0], vec![1.0]];
    let targets = vec![vec![0.5], vec![1.5]];
    for epoch in 0..settings.epochs {
        driver.set_learning_rate(schedule.lr_for_epoch(epoch));
        driver.train_epoch(
            &mut net,
            &inputs,
            &targets,
            settings.batch_size,
            SampleSelection::Sequential,
        );
    }
    // Two decays over six epochs.
    assert!((driver.learning_rate() - 0.025).abs() < 1e-7);
}
