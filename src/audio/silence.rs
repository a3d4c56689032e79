//! End-of-utterance detection from audio energy samples
//!
//! Pure and clock-injected: no device access, testable with synthetic
//! frames and instants.

use std::time::{Duration, Instant};

/// Why a recording ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfUtterance {
    /// Sustained silence exceeded the silence timeout
    Silence,
    /// The unconditional utterance cap fired
    MaxDuration,
}

/// Detects the end of one utterance from a stream of energy frames
///
/// Two independent deadlines run per recording: a silence countdown armed
/// whenever mean frame energy drops below the activity threshold, and a
/// hard cap started at [`SilenceDetector::start`]. Whichever passes first
/// fires exactly once; the other is cancelled.
#[derive(Debug)]
pub struct SilenceDetector {
    activity_threshold: u8,
    silence_timeout: Duration,
    max_utterance: Duration,
    silence_since: Option<Instant>,
    started_at: Option<Instant>,
    fired: bool,
}

impl SilenceDetector {
    /// Create a detector with the given thresholds
    #[must_use]
    pub fn new(activity_threshold: u8, silence_timeout: Duration, max_utterance: Duration) -> Self {
        Self {
            activity_threshold,
            silence_timeout,
            max_utterance,
            silence_since: None,
            started_at: None,
            fired: false,
        }
    }

    /// Arm the detector for a new recording starting at `now`
    pub fn start(&mut self, now: Instant) {
        self.started_at = Some(now);
        self.silence_since = None;
        self.fired = false;
    }

    /// Cancel both deadlines (manual stop path)
    pub fn reset(&mut self) {
        self.started_at = None;
        self.silence_since = None;
        self.fired = false;
    }

    /// Whether the detector is armed and has not yet fired
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.started_at.is_some() && !self.fired
    }

    /// Feed one frame of 0-255 energy samples observed at `now`
    ///
    /// Returns the end-of-utterance signal at most once per recording.
    pub fn observe(&mut self, frame: &[u8], now: Instant) -> Option<EndOfUtterance> {
        let started_at = self.started_at?;
        if self.fired {
            return None;
        }

        if now.duration_since(started_at) >= self.max_utterance {
            self.fired = true;
            return Some(EndOfUtterance::MaxDuration);
        }

        if mean_energy(frame) < self.activity_threshold {
            let silence_since = *self.silence_since.get_or_insert(now);
            if now.duration_since(silence_since) >= self.silence_timeout {
                self.fired = true;
                return Some(EndOfUtterance::Silence);
            }
        } else {
            // Any active frame disarms the silence countdown.
            self.silence_since = None;
        }

        None
    }
}

/// Mean energy of a frame on the 0-255 scale
///
/// An empty frame counts as silence.
#[must_use]
pub fn mean_energy(frame: &[u8]) -> u8 {
    if frame.is_empty() {
        return 0;
    }
    let sum: u64 = frame.iter().map(|&v| u64::from(v)).sum();
    #[allow(clippy::cast_possible_truncation)]
    {
        (sum / frame.len() as u64) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> SilenceDetector {
        SilenceDetector::new(10, Duration::from_secs(8), Duration::from_secs(40))
    }

    #[test]
    fn silence_fires_after_timeout() {
        let mut det = detector();
        let t0 = Instant::now();
        det.start(t0);

        assert_eq!(det.observe(&[0; 64], t0), None);
        assert_eq!(det.observe(&[0; 64], t0 + Duration::from_secs(4)), None);
        assert_eq!(
            det.observe(&[0; 64], t0 + Duration::from_secs(8)),
            Some(EndOfUtterance::Silence)
        );
        // Fires at most once.
        assert_eq!(det.observe(&[0; 64], t0 + Duration::from_secs(9)), None);
    }

    #[test]
    fn activity_disarms_silence_countdown() {
        let mut det = detector();
        let t0 = Instant::now();
        det.start(t0);

        assert_eq!(det.observe(&[0; 64], t0), None);
        // Loud frame at 7s resets the countdown.
        assert_eq!(det.observe(&[120; 64], t0 + Duration::from_secs(7)), None);
        assert_eq!(det.observe(&[0; 64], t0 + Duration::from_secs(8)), None);
        // Silence measured from 8s, so 15s is not yet enough...
        assert_eq!(det.observe(&[0; 64], t0 + Duration::from_secs(15)), None);
        // ...but 16s is.
        assert_eq!(
            det.observe(&[0; 64], t0 + Duration::from_secs(16)),
            Some(EndOfUtterance::Silence)
        );
    }

    #[test]
    fn threshold_boundary_counts_as_activity() {
        let mut det = detector();
        let t0 = Instant::now();
        det.start(t0);

        // Mean exactly at the threshold is activity, not silence.
        assert_eq!(det.observe(&[10; 64], t0), None);
        assert_eq!(det.observe(&[10; 64], t0 + Duration::from_secs(20)), None);
    }

    #[test]
    fn max_duration_fires_despite_activity() {
        let mut det = detector();
        let t0 = Instant::now();
        det.start(t0);

        for s in 0..40 {
            assert_eq!(det.observe(&[200; 64], t0 + Duration::from_secs(s)), None);
        }
        assert_eq!(
            det.observe(&[200; 64], t0 + Duration::from_secs(40)),
            Some(EndOfUtterance::MaxDuration)
        );
    }

    #[test]
    fn max_duration_wins_when_both_due() {
        let mut det =
            SilenceDetector::new(10, Duration::from_secs(8), Duration::from_secs(8));
        let t0 = Instant::now();
        det.start(t0);
        det.observe(&[0; 64], t0);
        // Both deadlines pass at t0+8; the hard cap is checked first.
        assert_eq!(
            det.observe(&[0; 64], t0 + Duration::from_secs(8)),
            Some(EndOfUtterance::MaxDuration)
        );
    }

    #[test]
    fn reset_cancels_pending_deadlines() {
        let mut det = detector();
        let t0 = Instant::now();
        det.start(t0);
        det.observe(&[0; 64], t0);
        det.reset();

        assert!(!det.is_active());
        assert_eq!(det.observe(&[0; 64], t0 + Duration::from_secs(60)), None);
    }

    #[test]
    fn restart_rearms_after_firing() {
        let mut det = detector();
        let t0 = Instant::now();
        det.start(t0);
        det.observe(&[0; 64], t0);
        assert!(det.observe(&[0; 64], t0 + Duration::from_secs(8)).is_some());

        let t1 = t0 + Duration::from_secs(20);
        det.start(t1);
        assert!(det.is_active());
        assert_eq!(det.observe(&[0; 64], t1), None);
        assert_eq!(
            det.observe(&[0; 64], t1 + Duration::from_secs(8)),
            Some(EndOfUtterance::Silence)
        );
    }

    #[test]
    fn mean_energy_of_empty_frame_is_silence() {
        assert_eq!(mean_energy(&[]), 0);
        assert_eq!(mean_energy(&[255; 4]), 255);
        assert_eq!(mean_energy(&[0, 20]), 10);
    }
}
