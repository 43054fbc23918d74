//! Outbound notifications: visual/audio effects and unit observers.
//!
//! Both are collaborators lent to [`World::update`](crate::world::World::update)
//! through [`Hooks`]; the world itself keeps only plain data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::math::{Fixed, Vec3Fixed};
use crate::unit::{Unit, UnitReference};

/// Fire-and-forget sink for renderer and audio effects.
pub trait EffectSink {
    /// Attach a fire effect to a unit.
    fn spawn_fire(&mut self, unit: UnitReference, at: Vec3Fixed, radius: Fixed);

    /// Fade the fire attached to a unit.
    fn fade_fire(&mut self, unit: UnitReference);

    /// Start an ambient or music track.
    fn play_ambient(&mut self, track: &str);
}

/// Sink that drops every effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEffects;

impl EffectSink for NullEffects {
    fn spawn_fire(&mut self, _unit: UnitReference, _at: Vec3Fixed, _radius: Fixed) {}
    fn fade_fire(&mut self, _unit: UnitReference) {}
    fn play_ambient(&mut self, _track: &str) {}
}

/// A recorded effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Fire attached to a unit.
    FireSpawned {
        /// Burning unit.
        unit: UnitReference,
        /// Render position at ignition.
        at: Vec3Fixed,
    },
    /// Fire faded.
    FireFaded {
        /// Unit whose fire faded.
        unit: UnitReference,
    },
    /// Track started.
    Ambient(String),
}

/// Sink that records effects in order, for tests and headless runs.
#[derive(Debug, Clone, Default)]
pub struct EffectLog {
    effects: Vec<Effect>,
}

impl EffectLog {
    /// Recorded effects.
    #[must_use]
    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// Number of fires started.
    #[must_use]
    pub fn fires_started(&self) -> usize {
        self.effects
            .iter()
            .filter(|e| matches!(e, Effect::FireSpawned { .. }))
            .count()
    }

    /// Number of fires faded.
    #[must_use]
    pub fn fires_faded(&self) -> usize {
        self.effects
            .iter()
            .filter(|e| matches!(e, Effect::FireFaded { .. }))
            .count()
    }

    /// Take all recorded effects.
    pub fn drain(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }
}

impl EffectSink for EffectLog {
    fn spawn_fire(&mut self, unit: UnitReference, at: Vec3Fixed, _radius: Fixed) {
        self.effects.push(Effect::FireSpawned { unit, at });
    }

    fn fade_fire(&mut self, unit: UnitReference) {
        self.effects.push(Effect::FireFaded { unit });
    }

    fn play_ambient(&mut self, track: &str) {
        self.effects.push(Effect::Ambient(track.to_owned()));
    }
}

/// Handle of a registered observer, stored on units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ObserverId(pub u32);

/// Unit transitions reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitEvent {
    /// The unit completed construction or production.
    Born,
    /// The unit was killed.
    Killed,
}

/// Listener notified synchronously at unit transitions.
pub trait UnitObserver {
    /// Handle an event on `unit`.
    fn on_unit_event(&mut self, event: UnitEvent, unit: &Unit);
}

/// Observers keyed by handle.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: BTreeMap<ObserverId, Box<dyn UnitObserver>>,
    next_id: u32,
}

impl ObserverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer and return its handle.
    pub fn register(&mut self, observer: Box<dyn UnitObserver>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.insert(id, observer);
        id
    }

    /// Remove an observer.
    pub fn unregister(&mut self, id: ObserverId) -> Option<Box<dyn UnitObserver>> {
        self.observers.remove(&id)
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether no observer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Notify every observer the unit lists. Stale handles are skipped.
    pub fn notify(&mut self, event: UnitEvent, unit: &Unit) {
        for id in unit.observers() {
            if let Some(observer) = self.observers.get_mut(id) {
                observer.on_unit_event(event, unit);
            }
        }
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.observers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Collaborators lent to the world for one update.
pub struct Hooks<'a> {
    /// Effect sink.
    pub effects: &'a mut dyn EffectSink,
    /// Kill and birth observers.
    pub observers: &'a mut ObserverRegistry,
}

impl<'a> Hooks<'a> {
    /// Bundle collaborators.
    pub fn new(effects: &'a mut dyn EffectSink, observers: &'a mut ObserverRegistry) -> Self {
        Self { effects, observers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TotalUpgrade;
    use crate::math::GridPos;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder(Rc<RefCell<Vec<(UnitEvent, UnitReference)>>>);

    impl UnitObserver for Recorder {
        fn on_unit_event(&mut self, event: UnitEvent, unit: &Unit) {
            self.0.borrow_mut().push((event, unit.reference()));
        }
    }

    fn unit() -> Unit {
        let tech = crate::testing::tech();
        let ut = &tech.unit_types()[0];
        Unit::new(3, 1, GridPos::ZERO, ut, TotalUpgrade::default())
    }

    #[test]
    fn test_notify_reaches_registered_observers_only() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        let a = registry.register(Box::new(Recorder(Rc::clone(&seen))));
        let _b = registry.register(Box::new(Recorder(Rc::clone(&seen))));

        let mut u = unit();
        u.add_observer(a);
        u.add_observer(a);
        registry.notify(UnitEvent::Killed, &u);
        assert_eq!(&*seen.borrow(), &[(UnitEvent::Killed, UnitReference::new(1, 3))]);
    }

    #[test]
    fn test_unregistered_handle_is_skipped() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        let a = registry.register(Box::new(Recorder(Rc::clone(&seen))));
        let mut u = unit();
        u.add_observer(a);
        assert!(registry.unregister(a).is_some());
        registry.notify(UnitEvent::Killed, &u);
        assert!(seen.borrow().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_effect_log_counts() {
        let mut log = EffectLog::default();
        let r = UnitReference::new(0, 1);
        log.spawn_fire(r, Vec3Fixed::ZERO, Fixed::ONE);
        log.fade_fire(r);
        log.play_ambient("wind");
        assert_eq!(log.fires_started(), 1);
        assert_eq!(log.fires_faded(), 1);
        assert_eq!(log.drain().len(), 3);
        assert!(log.effects().is_empty());
    }
}
