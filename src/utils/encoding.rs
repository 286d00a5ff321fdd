//! Label encoding helpers for classification tasks.

/// Encode an integer class label as a one-hot vector of length `classes`.
///
/// # Panics
///
/// Panics if `label >= classes`.
///
/// # Examples
///
/// ```
/// let v = annt::utils::one_hot(3, 10);
/// assert_eq!(v.len(), 10);
/// assert_eq!(v[3], 1.0);
/// assert_eq!(v.iter().sum::<f32>(), 1.0);
/// ```
pub fn one_hot(label: usize, classes: usize) -> Vec<f32> {
    assert!(
        label < classes,
        "label {} out of range for {} classes",
        label,
        classes
    );
    let mut v = vec![0.0; classes];
    v[label] = 1.0;
    v
}

/// Index of the largest element; ties resolve to the earliest index.
///
/// Returns 0 for an empty slice so callers can treat the result as a class
/// label without an extra branch.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}
