use crate::model::{ChartData, TimeSpanType};

const DAY_SECS: i64 = 86_400;

/// `type` 查询参数 → (start, end, 桶宽)。未知取值按 day 处理
pub fn dashboard_time(kind: Option<&str>, now: i64) -> (i64, i64, TimeSpanType) {
    let (days, span) = match kind.unwrap_or("day") {
        "month" => (30, TimeSpanType::Day),
        "two_week" => (15, TimeSpanType::Day),
        "week" => (7, TimeSpanType::Day),
        _ => (1, TimeSpanType::Hour),
    };
    (now - days * DAY_SECS, now, span)
}

/// 补齐稀疏的桶序列
///
/// 首尾按桶宽向 `start`/`end` 延伸出零值点；相邻两点相差 2~3 个桶时补满零值点，
/// 超过 3 个桶时只在两端各放一个零值标记。两端都是零值的空档不补，零值端点旁不放标记，
/// 这样对输出再跑一次结果不变。
pub fn fill_gaps(data: Vec<ChartData>, start: i64, end: i64, span: TimeSpanType) -> Vec<ChartData> {
    let step = span.seconds();
    let (Some(first), Some(last)) = (data.first(), data.last()) else {
        return data;
    };

    let mut leading = first.timestamp;
    while leading - step >= start {
        leading -= step;
    }
    let mut trailing = last.timestamp;
    while trailing + step <= end {
        trailing += step;
    }

    let mut points = Vec::with_capacity(data.len() + 2);
    if leading != first.timestamp {
        points.push(ChartData::zero(leading));
    }
    let trailing_point = (trailing != last.timestamp).then(|| ChartData::zero(trailing));
    points.extend(data);
    points.extend(trailing_point);

    let mut out = Vec::with_capacity(points.len() * 2);
    let mut iter = points.into_iter();
    let Some(mut prev) = iter.next() else {
        return out;
    };
    for curr in iter {
        let buckets = (curr.timestamp - prev.timestamp) / step;
        let prev_ts = prev.timestamp;
        let prev_empty = prev.is_empty();
        out.push(prev);

        if buckets > 3 {
            if !prev_empty {
                out.push(ChartData::zero(prev_ts + step));
            }
            if !curr.is_empty() {
                out.push(ChartData::zero(curr.timestamp - step));
            }
        } else if buckets > 1 && !(prev_empty && curr.is_empty()) {
            let mut ts = prev_ts + step;
            while ts < curr.timestamp {
                out.push(ChartData::zero(ts));
                ts += step;
            }
        }
        prev = curr;
    }
    out.push(prev);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: i64 = 3600;

    fn point(hour: i64) -> ChartData {
        ChartData {
            timestamp: hour * H,
            request_count: 1,
            used_amount: 0.5,
            exception_count: 0,
        }
    }

    fn hours(points: &[ChartData]) -> Vec<i64> {
        points.iter().map(|p| p.timestamp / H).collect()
    }

    #[test]
    fn short_gaps_fill_and_long_gaps_get_markers() {
        let data = vec![point(0), point(1), point(5), point(9)];
        let out = fill_gaps(data, 0, 9 * H, TimeSpanType::Hour);
        assert_eq!(hours(&out), vec![0, 1, 2, 4, 5, 6, 8, 9]);

        let out = fill_gaps(vec![point(0), point(3)], 0, 3 * H, TimeSpanType::Hour);
        assert_eq!(hours(&out), vec![0, 1, 2, 3]);
        assert!(out[1].is_empty() && out[2].is_empty());
    }

    #[test]
    fn long_gaps_never_get_more_than_two_markers() {
        for gap in 4..50 {
            let out = fill_gaps(vec![point(0), point(gap)], 0, gap * H, TimeSpanType::Hour);
            assert_eq!(out.len(), 4, "gap {gap}");
        }
    }

    #[test]
    fn edges_extend_towards_the_window() {
        let out = fill_gaps(vec![point(10), point(11)], 0, 20 * H + 100, TimeSpanType::Hour);
        let hs = hours(&out);
        assert_eq!(hs.first(), Some(&0));
        assert_eq!(hs.last(), Some(&20));
        // 零值端点旁不放标记
        assert_eq!(hs, vec![0, 9, 10, 11, 12, 20]);
    }

    #[test]
    fn filling_is_idempotent() {
        let cases = vec![
            vec![point(0), point(1), point(5), point(9)],
            vec![point(3), point(5), point(20)],
            vec![point(2)],
            vec![point(1), point(4), point(6)],
        ];
        for data in cases {
            let once = fill_gaps(data, 0, 24 * H, TimeSpanType::Hour);
            let twice = fill_gaps(once.clone(), 0, 24 * H, TimeSpanType::Hour);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn empty_input_stays_empty() {
        assert!(fill_gaps(vec![], 0, 10, TimeSpanType::Day).is_empty());
    }

    #[test]
    fn ranges_by_type() {
        let now = 100 * DAY_SECS;
        assert_eq!(dashboard_time(None, now), (now - DAY_SECS, now, TimeSpanType::Hour));
        assert_eq!(dashboard_time(Some("week"), now).2, TimeSpanType::Day);
        assert_eq!(dashboard_time(Some("two_week"), now).0, now - 15 * DAY_SECS);
        assert_eq!(dashboard_time(Some("month"), now).0, now - 30 * DAY_SECS);
        assert_eq!(dashboard_time(Some("bogus"), now).2, TimeSpanType::Hour);
    }
}
