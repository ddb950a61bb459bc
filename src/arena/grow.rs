//! 增长尺寸计算

use tracing::error;

use crate::config::GrowStrategy;

fn align_up(n: usize, alignment: usize) -> usize {
    let a = alignment.max(1);
    n.div_ceil(a).saturating_mul(a)
}

/// 计算新 buffer 的容量（记录数）
///
/// 1. `ceil((used - dead + needed) * (1 + grow_percent/100))`，按对齐向上取整，
///    且不小于 `initial_capacity`；
/// 2. 超过 `limit` 时退回 `used - dead + needed + grow_delta`；
/// 3. 仍超过 `limit` 视为配置错误，直接 panic。
pub fn grow_size(
    used:     usize,
    dead:     usize,
    needed:   usize,
    limit:    usize,
    strategy: &GrowStrategy,
    what:     &str,
) -> usize {
    assert!(used >= dead, "{what}: used {used} < dead {dead}");
    match try_grow_size(used, dead, needed, limit, strategy) {
        Some(size) => size,
        None => {
            let requested = (used - dead).saturating_add(needed).saturating_add(strategy.grow_delta);
            fail_new_size(requested, limit, what)
        }
    }
}

/// 与 [`grow_size`] 相同的计算，超过 `limit` 时返回 None
pub fn try_grow_size(
    used:     usize,
    dead:     usize,
    needed:   usize,
    limit:    usize,
    strategy: &GrowStrategy,
) -> Option<usize> {
    let live_needed = used.saturating_sub(dead).saturating_add(needed);

    let scaled = (live_needed as u128 * (100 + strategy.grow_percent as u128)).div_ceil(100);
    let scaled = usize::try_from(scaled).unwrap_or(usize::MAX);
    let wanted = align_up(scaled.max(strategy.initial_capacity), strategy.alignment);
    if wanted <= limit {
        return Some(wanted);
    }

    let minimal = live_needed.saturating_add(strategy.grow_delta);
    if minimal <= limit {
        return Some(align_up(minimal, strategy.alignment).min(limit));
    }
    None
}

/// 容量上限由索引位宽决定，越界说明位宽配置不足以容纳数据量
fn fail_new_size(requested: usize, limit: usize, what: &str) -> ! {
    error!(requested, limit, what, "fatal sizing error");
    panic!("{what}: requested size {requested} exceeds maximum size {limit}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy() -> GrowStrategy {
        GrowStrategy::default().initial_capacity(0).alignment(1).grow_delta(10)
    }

    #[test]
    fn grows_by_percent_of_live() {
        assert_eq!(grow_size(100, 40, 20, 1000, &strategy(), "t"), 120);
        assert_eq!(grow_size(3, 0, 0, 1000, &strategy(), "t"), 5);
    }

    #[test]
    fn respects_initial_capacity_and_alignment() {
        let s = strategy().initial_capacity(64).alignment(16);
        assert_eq!(grow_size(0, 0, 1, 1000, &s, "t"), 64);
        assert_eq!(grow_size(100, 0, 0, 1000, &s, "t"), 160);
    }

    #[test]
    fn falls_back_to_fixed_delta_near_limit() {
        // 1.5 * 100 = 150 > 120，改用 100 + 10
        assert_eq!(grow_size(100, 0, 0, 120, &strategy(), "t"), 110);
    }

    #[test]
    fn clamps_aligned_fallback_to_limit() {
        let s = strategy().alignment(16);
        assert_eq!(grow_size(100, 0, 0, 115, &s, "t"), 112);
        assert_eq!(grow_size(100, 0, 0, 111, &s, "t"), 111);
    }

    #[test]
    #[should_panic(expected = "exceeds maximum size")]
    fn over_limit_is_fatal() {
        grow_size(100, 0, 20, 125, &strategy(), "t");
    }

    #[test]
    fn try_variant_reports_over_limit() {
        assert_eq!(try_grow_size(100, 0, 20, 125, &strategy()), None);
        assert_eq!(try_grow_size(100, 0, 0, 120, &strategy()), Some(110));
    }
}
