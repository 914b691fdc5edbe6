use anyhow::{Result, anyhow};

use crate::digest::util::now_epoch_secs;

/// Half-open `[start, end)` range of Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: i64,
    pub end: i64,
}

impl FetchWindow {
    pub fn ending_at(end: i64, lookback_hours: u64) -> Result<Self> {
        let span = i64::try_from(lookback_hours)
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .ok_or_else(|| anyhow!("lookback of {lookback_hours}h is out of range"))?;
        Ok(Self {
            start: end - span,
            end,
        })
    }

    pub fn lookback_from_now(lookback_hours: u64) -> Result<Self> {
        let now = i64::try_from(now_epoch_secs()?)?;
        Self::ending_at(now, lookback_hours)
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::FetchWindow;

    #[test]
    fn window_is_inclusive_start_exclusive_end() {
        let window = FetchWindow::ending_at(100_000, 1).expect("window");
        assert_eq!(window.start, 96_400);
        assert!(window.contains(96_400));
        assert!(window.contains(99_999));
        assert!(!window.contains(100_000));
        assert!(!window.contains(96_399));
    }
}
