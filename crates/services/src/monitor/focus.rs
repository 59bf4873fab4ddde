use exam_core::model::ViolationKind;

/// Signal delivered by the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    Visibility { visible: bool },
    Focus { focused: bool },
    /// The host is about to navigate away or close.
    BeforeTeardown,
}

/// Debounces visibility and focus changes into violations.
///
/// Losing visibility or focus yields one violation; repeats are ignored
/// until the host reports the page visible or focused again.
#[derive(Debug, Clone, Default)]
pub struct FocusTracker {
    hidden: bool,
    blurred: bool,
}

impl FocusTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, signal: HostSignal) -> Option<ViolationKind> {
        match signal {
            HostSignal::Visibility { visible: true } => {
                self.hidden = false;
                None
            }
            HostSignal::Visibility { visible: false } => {
                (!std::mem::replace(&mut self.hidden, true)).then_some(ViolationKind::TabHidden)
            }
            HostSignal::Focus { focused: true } => {
                self.blurred = false;
                None
            }
            HostSignal::Focus { focused: false } => {
                (!std::mem::replace(&mut self.blurred, true))
                    .then_some(ViolationKind::WindowBlurred)
            }
            HostSignal::BeforeTeardown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_is_reported_once_per_episode() {
        let mut tracker = FocusTracker::new();
        let hide = HostSignal::Visibility { visible: false };
        assert_eq!(tracker.observe(hide), Some(ViolationKind::TabHidden));
        assert_eq!(tracker.observe(hide), None);
        assert_eq!(tracker.observe(HostSignal::Visibility { visible: true }), None);
        assert_eq!(tracker.observe(hide), Some(ViolationKind::TabHidden));
    }

    #[test]
    fn blur_and_hide_are_tracked_separately() {
        let mut tracker = FocusTracker::new();
        assert_eq!(
            tracker.observe(HostSignal::Focus { focused: false }),
            Some(ViolationKind::WindowBlurred)
        );
        assert_eq!(
            tracker.observe(HostSignal::Visibility { visible: false }),
            Some(ViolationKind::TabHidden)
        );
        assert_eq!(tracker.observe(HostSignal::Focus { focused: false }), None);
        assert_eq!(tracker.observe(HostSignal::BeforeTeardown), None);
    }
}
