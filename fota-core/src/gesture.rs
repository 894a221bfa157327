/// Reset button gesture detection
///
/// Fed with timestamped button edges by the control loop. Edges arriving within
/// the debounce time of the last accepted edge are bounce and ignored.
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetGesture {
    /// Held for the long-press time and released: erase credentials
    Long,
    /// Two presses inside the double-press window: full wipe
    Double,
}

#[derive(Debug, Clone, Copy)]
pub struct GestureTiming {
    pub long_press: Duration,
    pub double_press_window: Duration,
    pub debounce: Duration,
}

impl Default for GestureTiming {
    fn default() -> Self {
        Self {
            long_press: Duration::from_millis(3000),
            double_press_window: Duration::from_millis(500),
            debounce: Duration::from_millis(50),
        }
    }
}

pub struct ResetGestureDetector {
    timing: GestureTiming,
    last_edge: Option<Instant>,
    pressed_since: Option<Instant>,
    first_press: Option<Instant>,
    swallow_release: bool,
}

impl ResetGestureDetector {
    pub fn new(timing: GestureTiming) -> Self {
        Self {
            timing,
            last_edge: None,
            pressed_since: None,
            first_press: None,
            swallow_release: false,
        }
    }

    pub fn on_edge(&mut self, pressed: bool, now: Instant) -> Option<ResetGesture> {
        if let Some(last) = self.last_edge {
            if now.saturating_duration_since(last) < self.timing.debounce {
                return None;
            }
        }
        self.last_edge = Some(now);

        if pressed {
            self.on_press(now)
        } else {
            self.on_release(now)
        }
    }

    fn on_press(&mut self, now: Instant) -> Option<ResetGesture> {
        if let Some(first) = self.first_press.take() {
            if now.saturating_duration_since(first) <= self.timing.double_press_window {
                self.pressed_since = None;
                self.swallow_release = true;
                log::info!("Double press detected");
                return Some(ResetGesture::Double);
            }
        }
        self.first_press = Some(now);
        self.pressed_since = Some(now);
        None
    }

    fn on_release(&mut self, now: Instant) -> Option<ResetGesture> {
        if self.swallow_release {
            self.swallow_release = false;
            return None;
        }
        let since = self.pressed_since.take()?;
        if now.saturating_duration_since(since) >= self.timing.long_press {
            self.first_press = None;
            log::info!("Long press detected");
            return Some(ResetGesture::Long);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(base: Instant, n: u64) -> Instant {
        base + Duration::from_millis(n)
    }

    #[test]
    fn test_short_press_does_nothing() {
        let t = Instant::now();
        let mut d = ResetGestureDetector::new(GestureTiming::default());
        assert_eq!(d.on_edge(true, t), None);
        assert_eq!(d.on_edge(false, ms(t, 200)), None);
    }

    #[test]
    fn test_long_press() {
        let t = Instant::now();
        let mut d = ResetGestureDetector::new(GestureTiming::default());
        d.on_edge(true, t);
        assert_eq!(d.on_edge(false, ms(t, 3200)), Some(ResetGesture::Long));
    }

    #[test]
    fn test_double_press() {
        let t = Instant::now();
        let mut d = ResetGestureDetector::new(GestureTiming::default());
        d.on_edge(true, t);
        d.on_edge(false, ms(t, 100));
        assert_eq!(d.on_edge(true, ms(t, 300)), Some(ResetGesture::Double));
        // The second release belongs to the double press
        assert_eq!(d.on_edge(false, ms(t, 400)), None);
    }

    #[test]
    fn test_presses_outside_window_are_separate() {
        let t = Instant::now();
        let mut d = ResetGestureDetector::new(GestureTiming::default());
        d.on_edge(true, t);
        d.on_edge(false, ms(t, 100));
        assert_eq!(d.on_edge(true, ms(t, 800)), None);
        assert_eq!(d.on_edge(false, ms(t, 900)), None);
    }

    #[test]
    fn test_bounce_is_ignored() {
        let t = Instant::now();
        let mut d = ResetGestureDetector::new(GestureTiming::default());
        d.on_edge(true, t);
        // Contact bounce right after the press must not count as a second press
        assert_eq!(d.on_edge(false, ms(t, 5)), None);
        assert_eq!(d.on_edge(true, ms(t, 10)), None);
        assert_eq!(d.on_edge(false, ms(t, 3100)), Some(ResetGesture::Long));
    }
}
