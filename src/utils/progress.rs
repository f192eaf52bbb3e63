use std::time::{Duration, Instant};

/// 初始及完成时显示的速度
pub const ZERO_SPEED: &str = "0.00 MB/s";

/// 两次重新计算速度之间的最小间隔
pub const SAMPLE_WINDOW: Duration = Duration::from_millis(200);

/// 超过这个时长后，窗口内无法计算时改用整体平均速度
pub const WARMUP_PERIOD: Duration = Duration::from_millis(500);

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// 速度估算器
///
/// 进度事件非常密集且增量不均匀，直接算瞬时速度会来回跳。这里只在距离
/// 上次采样超过 200ms 且字节数有增长时才重新计算；否则保持原值，
/// 仅在还没有任何读数时用整体平均速度顶上。每个分片结束时用整体平均
/// 速度重新对齐采样点。
#[derive(Debug, Clone)]
pub struct SpeedEstimator {
    started_at: Instant,
    last_sample_at: Instant,
    last_sample_bytes: u64,
    /// 当前显示速度（字节/秒）
    rate: f64,
}

impl SpeedEstimator {
    pub fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            last_sample_at: started_at,
            last_sample_bytes: 0,
            rate: 0.0,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn displayed(&self) -> String {
        format_speed(self.rate)
    }

    /// 传输层进度事件
    pub fn sample(&mut self, now: Instant, cumulative: u64) -> String {
        let elapsed = now.saturating_duration_since(self.last_sample_at);
        let delta = cumulative.saturating_sub(self.last_sample_bytes);

        if elapsed >= SAMPLE_WINDOW && delta > 0 {
            self.rate = delta as f64 / elapsed.as_secs_f64();
            self.last_sample_at = now;
            self.last_sample_bytes = cumulative;
        } else if self.rate <= 0.0 {
            if let Some(average) = self.average(now, cumulative, WARMUP_PERIOD) {
                self.rate = average;
            }
        }

        self.displayed()
    }

    /// 分片完成时调用
    pub fn resync(&mut self, now: Instant, cumulative: u64) -> String {
        if let Some(average) = self.average(now, cumulative, Duration::ZERO) {
            self.rate = average;
        }
        self.last_sample_at = now;
        self.last_sample_bytes = cumulative;

        self.displayed()
    }

    pub fn finish(&mut self) -> String {
        self.rate = 0.0;
        self.displayed()
    }

    fn average(&self, now: Instant, cumulative: u64, min_elapsed: Duration) -> Option<f64> {
        let total = now.saturating_duration_since(self.started_at);
        if total.is_zero() || total < min_elapsed || cumulative == 0 {
            return None;
        }
        Some(cumulative as f64 / total.as_secs_f64())
    }
}

/// 格式化速度，保留两位小数
pub fn format_speed(bytes_per_second: f64) -> String {
    let mb = if bytes_per_second.is_finite() && bytes_per_second > 0.0 {
        bytes_per_second / BYTES_PER_MB
    } else {
        0.0
    };
    format!("{:.2} MB/s", mb)
}

/// 上传中显示的百分比，最后一个分片确认前最多 99
pub fn display_percent(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (loaded as u128 * 100) / total as u128;
    percent.min(99) as u8
}

/// 格式化字节数
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const UNIT_SIZE: f64 = 1024.0;

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(0.0), ZERO_SPEED);
        assert_eq!(format_speed(MB as f64 * 12.5), "12.50 MB/s");
        assert_eq!(format_speed(f64::NAN), ZERO_SPEED);
        assert_eq!(format_speed(-5.0), ZERO_SPEED);
    }

    #[test]
    fn test_display_percent_caps_at_99() {
        assert_eq!(display_percent(0, 100), 0);
        assert_eq!(display_percent(50, 100), 50);
        assert_eq!(display_percent(999, 1000), 99);
        assert_eq!(display_percent(1000, 1000), 99);
        assert_eq!(display_percent(5, 0), 0);
        assert_eq!(display_percent(u64::MAX, u64::MAX), 99);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(100 * MB), "100.00 MB");
    }

    #[test]
    fn test_recompute_after_window() {
        let start = Instant::now();
        let mut estimator = SpeedEstimator::new(start);

        let speed = estimator.sample(start + ms(250), 5 * MB);
        assert_eq!(speed, "20.00 MB/s");

        let speed = estimator.sample(start + ms(500), 6 * MB);
        assert_eq!(speed, "4.00 MB/s");
    }

    #[test]
    fn test_no_change_inside_window() {
        let start = Instant::now();
        let mut estimator = SpeedEstimator::new(start);
        estimator.sample(start + ms(1000), 10 * MB);
        let before = estimator.displayed();

        // 间隔小于 200ms 且没有新字节，速度不能跳回 0
        for i in 1..=20 {
            let speed = estimator.sample(start + ms(1000 + i * 50), 10 * MB);
            assert_eq!(speed, before);
        }
    }

    #[test]
    fn test_stays_zero_during_warmup() {
        let start = Instant::now();
        let mut estimator = SpeedEstimator::new(start);

        assert_eq!(estimator.sample(start + ms(100), MB), ZERO_SPEED);
        assert_eq!(estimator.sample(start + ms(150), 2 * MB), ZERO_SPEED);
    }

    #[test]
    fn test_average_fallback_after_warmup() {
        let start = Instant::now();
        let mut estimator = SpeedEstimator::new(start);

        // 锚点移到 900ms 且还没有读数
        estimator.resync(start + ms(900), 0);
        assert_eq!(estimator.displayed(), ZERO_SPEED);

        // 距离锚点只有 100ms，不能按窗口计算，改用整体平均：2MB / 1s
        let speed = estimator.sample(start + ms(1000), 2 * MB);
        assert_eq!(speed, "2.00 MB/s");

        // 已经有读数后，窗口内的事件不再改变显示值
        let speed = estimator.sample(start + ms(1050), 2 * MB);
        assert_eq!(speed, "2.00 MB/s");
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let start = Instant::now();
        let mut estimator = SpeedEstimator::new(start);
        estimator.resync(start + ms(900), 0);
        estimator.sample(start + ms(1000), 2 * MB);

        // 距锚点正好 200ms，按窗口重新计算：2MB / 0.2s
        let speed = estimator.sample(start + ms(1100), 2 * MB);
        assert_eq!(speed, "10.00 MB/s");
    }

    #[test]
    fn test_resync_uses_cumulative_average() {
        let start = Instant::now();
        let mut estimator = SpeedEstimator::new(start);
        estimator.sample(start + ms(200), 8 * MB);
        assert_eq!(estimator.displayed(), "40.00 MB/s");

        let speed = estimator.resync(start + ms(2000), 10 * MB);
        assert_eq!(speed, "5.00 MB/s");

        // 新的锚点：2000ms / 10MB
        let speed = estimator.sample(start + ms(2500), 11 * MB);
        assert_eq!(speed, "2.00 MB/s");
    }

    #[test]
    fn test_finish_resets_to_zero() {
        let start = Instant::now();
        let mut estimator = SpeedEstimator::new(start);
        estimator.sample(start + ms(300), 3 * MB);
        assert_ne!(estimator.displayed(), ZERO_SPEED);

        assert_eq!(estimator.finish(), ZERO_SPEED);
    }
}
