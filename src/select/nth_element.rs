use rand::Rng;

/// Returns the k-th smallest value (0-indexed) of `values`, reordering the
/// slice in place. Expected linear time via randomized quickselect; values
/// are ordered by `f64::total_cmp`.
pub fn nth_element(values: &mut [f64], k: usize) -> f64 {
    assert!(k < values.len(), "selection rank is out of bounds");
    if values.len() == 1 {
        return values[0];
    }
    let pivot_index = rand::thread_rng().gen_range(0..values.len());
    let last = values.len() - 1;
    values.swap(pivot_index, last);
    let pivot = values[last];
    let mut i = 0;
    for j in 0..last {
        if values[j].total_cmp(&pivot).is_le() {
            values.swap(i, j);
            i += 1;
        }
    }
    values.swap(i, last);
    if k == i {
        values[i]
    } else if k < i {
        nth_element(&mut values[..i], k)
    } else {
        nth_element(&mut values[i + 1..], k - i - 1)
    }
}
