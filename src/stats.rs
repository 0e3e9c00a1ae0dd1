//! Robust statistics over pixel samples

/// Returns the median of the samples or `None` if there is none
///
/// The samples are partially reordered. An even number of samples returns the
/// mean of the two middle values.
pub fn median_in_place(samples: &mut [f64]) -> Option<f64> {
    let n = samples.len();
    if n == 0 {
        return None;
    }
    let (lower, upper, _) = samples.select_nth_unstable_by(n / 2, f64::total_cmp);
    let upper = *upper;
    if n % 2 == 1 {
        Some(upper)
    } else {
        let lower = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(0.5 * (lower + upper))
    }
}
/// Returns the median of the samples or `None` if there is none
pub fn median<I: IntoIterator<Item = f64>>(samples: I) -> Option<f64> {
    let mut samples: Vec<f64> = samples.into_iter().collect();
    median_in_place(&mut samples)
}
/// Returns the mean of the samples or `None` if there is none
pub fn mean(samples: &[f64]) -> Option<f64> {
    (!samples.is_empty()).then(|| samples.iter().sum::<f64>() / samples.len() as f64)
}
/// Returns the population standard deviation (zero degree of freedom)
pub fn std(samples: &[f64]) -> Option<f64> {
    let mean = mean(samples)?;
    let var = samples
        .iter()
        .map(|x| x - mean)
        .fold(0f64, |s, x| s + x * x)
        / samples.len() as f64;
    Some(var.sqrt())
}
/// Returns the median and the standard deviation of the samples
pub fn median_std(samples: &mut [f64]) -> Option<(f64, f64)> {
    let std = std(samples)?;
    median_in_place(samples).map(|median| (median, std))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median([3., 1., 2.]), Some(2.));
        assert_eq!(median([4., 1., 3., 2.]), Some(2.5));
        assert_eq!(median([7.]), Some(7.));
        assert_eq!(median(std::iter::empty()), None);
    }

    #[test]
    fn population_std() {
        let samples = [2., 4., 4., 4., 5., 5., 7., 9.];
        assert!((std(&samples).unwrap() - 2.).abs() < 1e-12);
        assert_eq!(std(&[]), None);
    }

    #[test]
    fn median_and_std() {
        let mut samples = vec![5., 5., 5., 100.];
        let (median, std) = median_std(&mut samples).unwrap();
        assert_eq!(median, 5.);
        assert!((std - 1692.1875f64.sqrt()).abs() < 1e-12);
    }
}
