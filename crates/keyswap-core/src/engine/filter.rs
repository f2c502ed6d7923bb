// Keyswap Remap Filter
// The per-keystroke hot path run inside the global event filter callback

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use crate::engine::TapControl;
use crate::input::{EventKind, KeyEvent, KeyboardType, KeyboardTypeRegistry};
use crate::key::{KeyCode, SCAN_SIZE};
use crate::layout::LayoutTable;
use crate::rules::RuleStore;

/// What the filter did with one event.
///
/// The event itself is always handed back to the OS; the filter never drops
/// events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Passed through unchanged
    PassThrough,
    /// Key code rewritten in place
    Remapped { from: KeyCode, to: KeyCode },
    /// The OS had disabled the filter; it was switched back on
    Rearmed,
    /// The OS had disabled the filter and switching it back on failed
    RearmFailed,
}

impl Disposition {
    /// Returns true if the event's key code was rewritten
    pub fn is_remapped(self) -> bool {
        matches!(self, Disposition::Remapped { .. })
    }
}

/// Shared state read by the filter callback.
///
/// Holds only what the hot path needs. Everything here is either immutable,
/// atomic, or behind a lock held for the length of a table lookup; nothing
/// blocks on the main context, allocates, or does I/O.
pub struct RemapFilter {
    layout: Arc<LayoutTable>,
    rules: Arc<RuleStore>,
    keyboards: Arc<KeyboardTypeRegistry>,
    /// Set while an OS filter is installed
    active: AtomicBool,
    /// A self re-enable failed; the main context must tear down
    rearm_failed: AtomicBool,
    /// Successful self re-enables not yet reported
    rearms: AtomicU64,
    /// Per physical key: code its key-down was rewritten to, plus one
    /// (0 while the key is not held under a rewrite)
    held: [AtomicU16; SCAN_SIZE],
}

impl RemapFilter {
    /// Create an inactive filter over shared layout, rules and keyboard registry
    pub fn new(
        layout: Arc<LayoutTable>,
        rules: Arc<RuleStore>,
        keyboards: Arc<KeyboardTypeRegistry>,
    ) -> Self {
        Self {
            layout,
            rules,
            keyboards,
            active: AtomicBool::new(false),
            rearm_failed: AtomicBool::new(false),
            rearms: AtomicU64::new(0),
            held: std::array::from_fn(|_| AtomicU16::new(0)),
        }
    }

    /// Handle one intercepted event, rewriting its key code if a rule applies.
    ///
    /// 1. OS "filter disabled" notices re-arm the filter and pass through.
    /// 2. Anything but key-down/key-up passes through.
    /// 3. Nothing is rewritten while no filter is installed.
    /// 4. The keyboard type is posted for the main context to record.
    /// 5. A key-up mirrors its key-down: it gets the code the key-down was
    ///    rewritten to, or passes through, whatever the rules and layout
    ///    say now.
    /// 6. A key-down's code is resolved to a character under the current
    ///    layout; the first enabled, applicable rule containing that
    ///    character supplies the partner, whose key code replaces the
    ///    event's.
    pub fn handle<E: KeyEvent + ?Sized>(&self, event: &mut E, tap: &dyn TapControl) -> Disposition {
        let kind = event.kind();
        if kind.is_tap_disabled() {
            return if tap.reenable() {
                self.rearms.fetch_add(1, Ordering::Relaxed);
                Disposition::Rearmed
            } else {
                self.rearm_failed.store(true, Ordering::Release);
                Disposition::RearmFailed
            };
        }
        if !kind.is_key() || !self.active.load(Ordering::Acquire) {
            return Disposition::PassThrough;
        }

        let keyboard = event.keyboard_type();
        self.keyboards.observe(keyboard);

        let from = event.key_code();
        let Some(held) = from.scan_index().map(|idx| &self.held[idx]) else {
            return Disposition::PassThrough;
        };
        if kind == EventKind::KeyUp {
            return match held.swap(0, Ordering::AcqRel) {
                0 => Disposition::PassThrough,
                code => {
                    let to = KeyCode(code - 1);
                    event.set_key_code(to);
                    Disposition::Remapped { from, to }
                }
            };
        }

        match self.replacement(from, keyboard) {
            Some(to) => {
                held.store(to.code() + 1, Ordering::Release);
                event.set_key_code(to);
                Disposition::Remapped { from, to }
            }
            None => {
                held.store(0, Ordering::Release);
                Disposition::PassThrough
            }
        }
    }

    fn replacement(&self, from: KeyCode, keyboard: KeyboardType) -> Option<KeyCode> {
        // One generation for both lookups, even if a rebuild lands meanwhile
        let layout = self.layout.snapshot();
        let c = layout.character(from)?;
        self.rules.replacement(c, keyboard, &layout)
    }

    /// Whether events are currently being rewritten
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        if active {
            // Keys held before the filter existed were never rewritten
            for held in &self.held {
                held.store(0, Ordering::Relaxed);
            }
        }
        self.active.store(active, Ordering::Release);
    }

    /// Consume the "re-enable failed" flag
    pub(crate) fn take_rearm_failed(&self) -> bool {
        self.rearm_failed.swap(false, Ordering::AcqRel)
    }

    /// Consume the count of successful re-enables
    pub(crate) fn take_rearms(&self) -> u64 {
        self.rearms.swap(0, Ordering::Relaxed)
    }

    /// Layout table consulted on every event
    pub fn layout(&self) -> &Arc<LayoutTable> {
        &self.layout
    }

    /// Rule store consulted on every event
    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    /// Registry fed with observed keyboard types
    pub fn keyboards(&self) -> &Arc<KeyboardTypeRegistry> {
        &self.keyboards
    }
}

impl std::fmt::Debug for RemapFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemapFilter")
            .field("active", &self.is_active())
            .field("layout", &self.layout)
            .field("rules", &self.rules)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NoTap;
    use crate::headless::StaticLayout;
    use crate::input::{EventKind, KeyboardType, SyntheticEvent};
    use crate::rules::MemoryStore;

    struct Rearm(bool);

    impl TapControl for Rearm {
        fn reenable(&self) -> bool {
            self.0
        }
    }

    fn ab_filter() -> RemapFilter {
        let layout = Arc::new(LayoutTable::new(Arc::new(StaticLayout::from_pairs(&[
            (0, "a"),
            (1, "b"),
            (2, "c"),
        ]))));
        layout.rebuild().unwrap();
        let rules = Arc::new(RuleStore::load(Arc::new(MemoryStore::new())));
        rules.add("a", "b", None, &layout.snapshot()).unwrap();
        let filter = RemapFilter::new(layout, rules, Arc::new(KeyboardTypeRegistry::new()));
        filter.set_active(true);
        filter
    }

    #[test]
    fn test_swaps_both_directions() {
        let filter = ab_filter();

        let mut down_a = SyntheticEvent::key_down(0, 40);
        assert_eq!(
            filter.handle(&mut down_a, &NoTap),
            Disposition::Remapped { from: KeyCode(0), to: KeyCode(1) }
        );
        assert_eq!(down_a.key_code, KeyCode(1));

        let mut up_a = SyntheticEvent::key_up(0, 40);
        filter.handle(&mut up_a, &NoTap);
        assert_eq!(up_a.key_code, KeyCode(1));

        let mut down_b = SyntheticEvent::key_down(1, 40);
        filter.handle(&mut down_b, &NoTap);
        assert_eq!(down_b.key_code, KeyCode(0));
        let mut up_b = SyntheticEvent::key_up(1, 40);
        filter.handle(&mut up_b, &NoTap);
        assert_eq!(up_b.key_code, KeyCode(0));
    }

    #[test]
    fn test_key_up_mirrors_key_down() {
        let filter = ab_filter();

        let mut down = SyntheticEvent::key_down(0, 40);
        assert!(filter.handle(&mut down, &NoTap).is_remapped());
        // The rule goes away while the key is held
        let id = filter.rules().rules()[0].id;
        filter.rules().remove(id);

        let mut up = SyntheticEvent::key_up(0, 40);
        assert_eq!(
            filter.handle(&mut up, &NoTap),
            Disposition::Remapped { from: KeyCode(0), to: KeyCode(1) }
        );
        assert_eq!(up.key_code, KeyCode(1));

        // Released once; the next press follows the current rules
        let mut down = SyntheticEvent::key_down(0, 40);
        assert_eq!(filter.handle(&mut down, &NoTap), Disposition::PassThrough);
        let mut up = SyntheticEvent::key_up(0, 40);
        assert_eq!(filter.handle(&mut up, &NoTap), Disposition::PassThrough);
    }

    #[test]
    fn test_key_up_of_unrewritten_press_passes_through() {
        let filter = ab_filter();

        // Key-down was not rewritten, so a rule added meanwhile is ignored
        let mut up = SyntheticEvent::key_up(0, 40);
        assert_eq!(filter.handle(&mut up, &NoTap), Disposition::PassThrough);
        assert_eq!(up.key_code, KeyCode(0));
    }

    #[test]
    fn test_unrelated_key_untouched() {
        let filter = ab_filter();
        let mut event = SyntheticEvent::key_down(2, 40);
        assert_eq!(filter.handle(&mut event, &NoTap), Disposition::PassThrough);
        assert_eq!(event.key_code, KeyCode(2));

        let mut unmapped = SyntheticEvent::key_down(99, 40);
        assert_eq!(filter.handle(&mut unmapped, &NoTap), Disposition::PassThrough);
    }

    #[test]
    fn test_non_key_events_pass_through() {
        let filter = ab_filter();
        let mut event = SyntheticEvent::of_kind(EventKind::FlagsChanged, 0, 40);
        assert_eq!(filter.handle(&mut event, &NoTap), Disposition::PassThrough);
        assert_eq!(event.key_code, KeyCode(0));
    }

    #[test]
    fn test_inactive_filter_passes_through() {
        let filter = ab_filter();
        filter.set_active(false);
        let mut event = SyntheticEvent::key_down(0, 40);
        assert_eq!(filter.handle(&mut event, &NoTap), Disposition::PassThrough);
        assert_eq!(event.key_code, KeyCode(0));
    }

    #[test]
    fn test_tap_disabled_rearms() {
        let filter = ab_filter();
        for kind in [EventKind::TapDisabledByTimeout, EventKind::TapDisabledByUserInput] {
            let mut event = SyntheticEvent::of_kind(kind, 0, 40);
            assert_eq!(filter.handle(&mut event, &Rearm(true)), Disposition::Rearmed);
            assert_eq!(event.key_code, KeyCode(0));
        }
        assert_eq!(filter.take_rearms(), 2);
        assert!(!filter.take_rearm_failed());
    }

    #[test]
    fn test_failed_rearm_is_flagged() {
        let filter = ab_filter();
        let mut event = SyntheticEvent::of_kind(EventKind::TapDisabledByTimeout, 0, 40);
        assert_eq!(filter.handle(&mut event, &Rearm(false)), Disposition::RearmFailed);
        assert!(filter.take_rearm_failed());
        assert!(!filter.take_rearm_failed());
    }

    #[test]
    fn test_keyboard_type_is_posted_not_recorded() {
        let filter = ab_filter();
        filter.handle(&mut SyntheticEvent::key_down(2, 58), &NoTap);

        assert!(filter.keyboards().observed().is_empty());
        filter.keyboards().drain_pending();
        assert_eq!(filter.keyboards().observed(), vec![KeyboardType(58)]);
    }

    #[test]
    fn test_partner_missing_from_layout_passes_through() {
        let filter = ab_filter();
        // New layout no longer produces 'b'
        let source = StaticLayout::from_pairs(&[(0, "a"), (2, "c")]);
        let layout = LayoutTable::new(Arc::new(source));
        layout.rebuild().unwrap();
        let filter = RemapFilter::new(
            Arc::new(layout),
            filter.rules().clone(),
            filter.keyboards().clone(),
        );
        filter.set_active(true);

        let mut event = SyntheticEvent::key_down(0, 40);
        assert_eq!(filter.handle(&mut event, &NoTap), Disposition::PassThrough);
        assert_eq!(event.key_code, KeyCode(0));
    }
}
