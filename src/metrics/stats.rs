//! 样本统计

/// 平均值与 95 分位
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub avg: f64,
    pub p95: f64,
}

impl Summary {
    /// 样本为空时返回 None
    pub fn of(samples: &mut [f64]) -> Option<Self> {
        let avg = mean(samples)?;
        let p95 = percentile_nearest_rank(samples, 95.0)?;
        Some(Self { avg, p95 })
    }

    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            avg: f(self.avg),
            p95: f(self.p95),
        }
    }
}

pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

/// 最近秩百分位：排序后取第 ceil(p/100 * n) 个样本
///
/// 会就地排序 `samples`
pub fn percentile_nearest_rank(samples: &mut [f64], p: f64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_by(f64::total_cmp);
    let n = samples.len();
    let rank = ((p / 100.0) * n as f64).ceil() as usize;
    let index = rank.clamp(1, n) - 1;
    Some(samples[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_unavailable() {
        assert_eq!(mean(&[]), None);
        assert_eq!(percentile_nearest_rank(&mut [], 95.0), None);
        assert_eq!(Summary::of(&mut []), None);
    }

    #[test]
    fn test_single_sample() {
        let summary = Summary::of(&mut [0.7]).unwrap();
        assert_eq!(summary.avg, 0.7);
        assert_eq!(summary.p95, 0.7);
    }

    #[test]
    fn test_five_samples() {
        let mut samples = vec![1.6, 1.0, 2.0, 1.3, 1.2];
        let summary = Summary::of(&mut samples).unwrap();
        assert!((summary.avg - 1.42).abs() < 1e-9);
        assert_eq!(summary.p95, 2.0);
    }

    #[test]
    fn test_percentile_ranks() {
        let mut samples: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile_nearest_rank(&mut samples, 95.0), Some(95.0));
        assert_eq!(percentile_nearest_rank(&mut samples, 50.0), Some(50.0));
        assert_eq!(percentile_nearest_rank(&mut samples, 100.0), Some(100.0));
        assert_eq!(percentile_nearest_rank(&mut samples, 0.0), Some(1.0));
    }

    #[test]
    fn test_percentile_within_bounds() {
        let mut samples = vec![3.5, 0.2, 9.1, 4.4, 4.4, 0.9, 7.0];
        let p = percentile_nearest_rank(&mut samples, 95.0).unwrap();
        assert!((0.2..=9.1).contains(&p));
    }
}
