//! Pooling delta routing and index-map consistency.

use annt::context::{LayerContext, ScratchArena};
use annt::layers::{AveragePoolingLayer, BorderMode, Layer, MaxPoolingLayer};
use annt::math::VectorOps;
use approx::assert_relative_eq;

// Forward then backward over one shared arena, as the drivers do.
fn forward_backward(layer: &dyn Layer, input: &[f32], delta: &[f32]) -> (Vec<f32>, Vec<f32>) {
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
    let mut prev_delta = vec![0.0; layer.input_size()];
    let mut gradients = vec![0.0; layer.parameter_count()];
    layer.backward(
        input,
        &output,
        delta,
        &mut prev_delta,
        &mut gradients,
        &mut ctx,
    );
    (output, prev_delta)
}

#[test]
fn max_pooling_routes_the_whole_delta_to_the_winner() {
    let layer = MaxPoolingLayer::new(4, 4, 1, 2);
    #[rustfmt::skip]
    let input = [
        1.0, 5.0,  2.0, 1.0,
        3.0, 2.0,  8.0, 0.0,
        0.0, 1.0,  1.0, 2.0,
        7.0, 2.0,  3.0, 4.0,
    ];
    let delta = [10.0, 20.0, 30.0, 40.0];
    let (output, prev) = forward_backward(&layer, &input, &delta);

    assert_eq!(output, vec![5.0, 8.0, 7.0, 4.0]);
    // Winners sit at indices 1, 6, 12 and 15; everything else gets zero.
    let mut expected = vec![0.0; 16];
    expected[1] = 10.0;
    expected[6] = 20.0;
    expected[12] = 30.0;
    expected[15] = 40.0;
    assert_eq!(prev, expected);
}

#[test]
fn average_pooling_splits_delta_evenly_in_valid_mode() {
    let layer = AveragePoolingLayer::new(4, 4, 1, 2);
    let input = [1.0; 16];
    let delta = [4.0, 8.0, 12.0, 16.0];
    let (output, prev) = forward_backward(&layer, &input, &delta);

    assert!(output.iter().all(|&v| v == 1.0));
    // Each window has four contributors, so each gets delta / 4.
    for (i, &p) in prev.iter().enumerate() {
        let window = (i / 8) * 2 + (i % 4) / 2;
        assert_relative_eq!(p, delta[window] / 4.0);
    }
}

#[test]
fn same_mode_average_divides_by_actual_contributors() {
    // 3x3 input, 2x2 window, Same borders: corner windows cover fewer cells.
    let layer = AveragePoolingLayer::new(3, 3, 1, 2).with_border_mode(BorderMode::Same);
    let input = [2.0; 9];
    let (output, prev) = forward_backward(&layer, &input, &[1.0; 4]);

    // Averages stay 2.0 regardless of contributor count.
    assert!(output.iter().all(|&v| (v - 2.0).abs() < 1e-6));
    // Every input feeds exactly one window, so the delta sum is preserved.
    let sum: f32 = prev.iter().sum();
    assert_relative_eq!(sum, 4.0, epsilon = 1e-6);
}

#[test]
fn delta_mass_is_preserved_through_both_variants() {
    let input: Vec<f32> = (0..36).map(|i| ((i * 7) % 13) as f32 - 6.0).collect();
    let delta: Vec<f32> = (0..9).map(|i| i as f32 + 1.0).collect();
    let total: f32 = delta.iter().sum();

    let max = MaxPoolingLayer::new(6, 6, 1, 2);
    let (_, prev) = forward_backward(&max, &input, &delta);
    assert_relative_eq!(prev.iter().sum::<f32>(), total, epsilon = 1e-5);

    let avg = AveragePoolingLayer::new(6, 6, 1, 2);
    let (_, prev) = forward_backward(&avg, &input, &delta);
    assert_relative_eq!(prev.iter().sum::<f32>(), total, epsilon = 1e-5);
}

#[test]
fn depth_planes_pool_independently() {
    let layer = MaxPoolingLayer::new(2, 2, 2, 2);
    let input = [1.0, 2.0, 3.0, 4.0, 40.0, 30.0, 20.0, 10.0];
    let (output, prev) = forward_backward(&layer, &input, &[1.0, 1.0]);

    assert_eq!(output, vec![4.0, 40.0]);
    assert_eq!(prev, vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
}

#[test]
fn strided_max_pooling_skips_uncovered_inputs() {
    // 5x5 input with a 2x2 window at stride 2 leaves the last row and column
    // outside every window; their deltas must be zero.
    let layer = MaxPoolingLayer::new(5, 5, 1, 2);
    let input: Vec<f32> = (0..25).map(|i| i as f32).collect();
    let delta = [1.0; 4];
    let (_, prev) = forward_backward(&layer, &input, &delta);

    for x in 0..5 {
        assert_eq!(prev[4 * 5 + x], 0.0, "uncovered bottom row at x={}", x);
    }
    for y in 0..5 {
        assert_eq!(prev[y * 5 + 4], 0.0, "uncovered right column at y={}", y);
    }
}
