//! Subscribers to twilight state changes.
//!
//! Each listener is bound to a [`DeliveryContext`], a dedicated thread that
//! runs its callbacks in the order they were posted. Publishing only posts
//! to those threads, so a slow or failing listener never holds up the
//! scheduler or the other listeners.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Sender, channel};
use std::thread;

use chrono::{DateTime, Utc};

use crate::twilight::TwilightState;

/// Callback interface for twilight state changes.
pub trait TwilightListener: Send + Sync {
    /// Called on the listener's delivery context after every published change.
    ///
    /// `None` means the state became unknown (no location, or no sunrise or
    /// sunset today at this latitude).
    fn on_twilight_state_changed(&self, state: Option<TwilightState>) -> Result<()>;

    /// Called when a wake-up crosses sunrise or sunset without the boundaries
    /// themselves changing.
    fn on_day_night_changed(&self, _state: TwilightState, _is_night: bool) -> Result<()> {
        Ok(())
    }
}

/// What a call to [`ListenerRegistry::publish`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publication {
    /// Same boundaries and same day/night answer; nobody was notified.
    Unchanged,
    /// New boundaries (or a transition to/from unknown); state listeners notified.
    StateChanged,
    /// Same boundaries but the day/night answer flipped.
    DayNightFlipped,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A serial execution context for listener callbacks.
///
/// Jobs posted to one context run one at a time in posting order. A job that
/// panics is logged and skipped; the context keeps running. The thread exits
/// once every handle to the context has been dropped.
#[derive(Clone)]
pub struct DeliveryContext {
    id: u64,
    name: Arc<str>,
    sender: Sender<Job>,
}

impl DeliveryContext {
    /// Spawn a new context thread.
    pub fn spawn(name: &str) -> Result<Self> {
        let (sender, receiver) = channel::<Job>();
        let thread_name = name.to_string();

        thread::Builder::new()
            .name(format!("twilightr-{name}"))
            .spawn(move || {
                for job in receiver {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        log_pipe!();
                        log_error!("Listener on '{thread_name}' panicked during delivery");
                    }
                }
            })
            .with_context(|| format!("Failed to spawn delivery context '{name}'"))?;

        Ok(Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name),
            sender,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job. Returns false if the context thread is gone.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender.send(Box::new(job)).is_ok()
    }

    fn same_as(&self, other: &DeliveryContext) -> bool {
        self.id == other.id
    }
}

/// Identity of a listener: the address of its shared allocation.
type ListenerKey = usize;

fn listener_key(listener: &Arc<dyn TwilightListener>) -> ListenerKey {
    Arc::as_ptr(listener) as *const () as usize
}

struct Registration {
    listener: Arc<dyn TwilightListener>,
    context: DeliveryContext,
    /// Cleared on unregister so already-posted deliveries are dropped.
    /// Shared by every context the listener has been bound to.
    active: Arc<AtomicBool>,
}

/// Listener set plus the last published state.
///
/// Not synchronised on its own; the scheduler keeps it behind the same lock
/// as the rest of its state so that comparing against and replacing the last
/// state is one atomic step.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: HashMap<ListenerKey, Registration>,
    last_state: Option<TwilightState>,
    /// Day/night answer at the last notification, if a state was known
    last_is_night: Option<bool>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener, or move it to a different delivery context.
    ///
    /// Registering the same listener with the same context again changes
    /// nothing. Returns true if the listener was not registered before.
    ///
    /// On a move, deliveries already queued on the old context still run,
    /// and the new context holds back its first job until they have.
    pub fn register(&mut self, listener: Arc<dyn TwilightListener>, context: DeliveryContext) -> bool {
        let key = listener_key(&listener);

        let active = match self.listeners.get(&key) {
            Some(existing) if existing.context.same_as(&context) => return false,
            Some(existing) => {
                let (drained_tx, drained_rx) = channel::<()>();
                // If the old thread is gone the sender is dropped with the
                // job and the wait below returns at once.
                existing.context.post(move || {
                    let _ = drained_tx.send(());
                });
                context.post(move || {
                    let _ = drained_rx.recv();
                });
                Arc::clone(&existing.active)
            }
            None => Arc::new(AtomicBool::new(true)),
        };

        let newly_added = !self.listeners.contains_key(&key);
        self.listeners.insert(
            key,
            Registration {
                listener,
                context,
                active,
            },
        );
        newly_added
    }

    /// Remove a listener. Deliveries already queued for it are dropped.
    pub fn unregister(&mut self, listener: &Arc<dyn TwilightListener>) -> bool {
        match self.listeners.remove(&listener_key(listener)) {
            Some(registration) => {
                registration.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// The last published state.
    pub fn current_state(&self) -> Option<TwilightState> {
        self.last_state
    }

    /// Record `state` as evaluated at `now` and notify listeners of what changed.
    ///
    /// State listeners hear only about boundary changes. A flip of the
    /// day/night answer under unchanged boundaries goes to
    /// [`TwilightListener::on_day_night_changed`] instead.
    pub fn publish(&mut self, state: Option<TwilightState>, now: DateTime<Utc>) -> Publication {
        let is_night = state.map(|s| s.is_night(now));

        if self.last_state != state {
            self.last_state = state;
            self.last_is_night = is_night;
            self.notify_all(state);
            return Publication::StateChanged;
        }

        match (state, is_night) {
            (Some(state), Some(flag)) if self.last_is_night != Some(flag) => {
                self.last_is_night = Some(flag);
                self.dispatch(move |listener| listener.on_day_night_changed(state, flag));
                Publication::DayNightFlipped
            }
            _ => Publication::Unchanged,
        }
    }

    /// Post `state` to every registered listener's context.
    ///
    /// Returns how many deliveries were queued.
    pub fn notify_all(&self, state: Option<TwilightState>) -> usize {
        self.dispatch(move |listener| listener.on_twilight_state_changed(state))
    }

    fn dispatch<F>(&self, deliver: F) -> usize
    where
        F: Fn(&dyn TwilightListener) -> Result<()> + Clone + Send + 'static,
    {
        let mut queued = 0;

        for registration in self.listeners.values() {
            let listener = Arc::clone(&registration.listener);
            let active = Arc::clone(&registration.active);
            let context_name = registration.context.name.clone();
            let deliver = deliver.clone();

            let posted = registration.context.post(move || {
                if !active.load(Ordering::SeqCst) {
                    return;
                }
                if let Err(e) = deliver(listener.as_ref()) {
                    log_pipe!();
                    log_error!("Listener on '{context_name}' failed: {e}");
                }
            });

            if posted {
                queued += 1;
            } else {
                log_pipe!();
                log_warning!(
                    "Delivery context '{}' has shut down; skipping its listener",
                    registration.context.name()
                );
            }
        }

        queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::Log;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Mutex;
    use std::sync::mpsc::Receiver;
    use std::time::Duration as StdDuration;

    const WAIT: StdDuration = StdDuration::from_secs(2);

    struct Recorder {
        tag: &'static str,
        sink: Mutex<Sender<(&'static str, Option<TwilightState>)>>,
    }

    impl TwilightListener for Recorder {
        fn on_twilight_state_changed(&self, state: Option<TwilightState>) -> Result<()> {
            let _ = self.sink.lock().unwrap().send((self.tag, state));
            Ok(())
        }
    }

    struct Failing;

    impl TwilightListener for Failing {
        fn on_twilight_state_changed(&self, _state: Option<TwilightState>) -> Result<()> {
            anyhow::bail!("theme service unavailable")
        }
    }

    struct Panicking;

    impl TwilightListener for Panicking {
        fn on_twilight_state_changed(&self, _state: Option<TwilightState>) -> Result<()> {
            panic!("listener bug");
        }
    }

    fn recorder(
        tag: &'static str,
    ) -> (
        Arc<dyn TwilightListener>,
        Receiver<(&'static str, Option<TwilightState>)>,
    ) {
        let (tx, rx) = channel();
        let listener: Arc<dyn TwilightListener> = Arc::new(Recorder {
            tag,
            sink: Mutex::new(tx),
        });
        (listener, rx)
    }

    fn state(day: u32) -> TwilightState {
        let base = Utc.with_ymd_and_hms(2024, 4, day, 0, 0, 0).unwrap();
        TwilightState::new(
            base - Duration::hours(4),
            base + Duration::hours(6),
            base + Duration::hours(19),
            base + Duration::hours(30),
        )
        .unwrap()
    }

    fn noon(day: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_publish_dedups_equal_states() {
        Log::set_enabled(false);
        let mut registry = ListenerRegistry::new();
        let (listener, rx) = recorder("a");
        registry.register(listener, DeliveryContext::spawn("test-dedup").unwrap());

        let at = noon(1);
        assert_eq!(registry.publish(Some(state(1)), at), Publication::StateChanged);
        assert_eq!(registry.publish(Some(state(1)), at), Publication::Unchanged);
        assert_eq!(registry.publish(Some(state(2)), at), Publication::StateChanged);
        assert_eq!(registry.publish(None, at), Publication::StateChanged);
        assert_eq!(registry.publish(None, at), Publication::Unchanged);

        assert_eq!(rx.recv_timeout(WAIT).unwrap().1, Some(state(1)));
        assert_eq!(rx.recv_timeout(WAIT).unwrap().1, Some(state(2)));
        assert_eq!(rx.recv_timeout(WAIT).unwrap().1, None);
        assert!(rx.recv_timeout(StdDuration::from_millis(100)).is_err());
        assert_eq!(registry.current_state(), None);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = ListenerRegistry::new();
        let context = DeliveryContext::spawn("test-idempotent").unwrap();
        let (listener, rx) = recorder("a");

        assert!(registry.register(Arc::clone(&listener), context.clone()));
        assert!(!registry.register(Arc::clone(&listener), context));
        assert_eq!(registry.len(), 1);

        registry.notify_all(Some(state(3)));
        assert!(rx.recv_timeout(WAIT).is_ok());
        assert!(rx.recv_timeout(StdDuration::from_millis(100)).is_err());
    }

    #[test]
    fn test_moving_to_new_context_keeps_one_registration() {
        let mut registry = ListenerRegistry::new();
        let (listener, rx) = recorder("a");
        registry.register(Arc::clone(&listener), DeliveryContext::spawn("test-old").unwrap());
        assert!(!registry.register(Arc::clone(&listener), DeliveryContext::spawn("test-new").unwrap()));
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.notify_all(Some(state(4))), 1);
        assert_eq!(rx.recv_timeout(WAIT).unwrap().1, Some(state(4)));
    }

    #[test]
    fn test_moving_context_keeps_queued_deliveries_in_order() {
        let mut registry = ListenerRegistry::new();
        let old_context = DeliveryContext::spawn("test-move-old").unwrap();
        let (gate_tx, gate_rx) = channel::<()>();
        old_context.post(move || {
            let _ = gate_rx.recv();
        });

        let (listener, rx) = recorder("moved");
        registry.register(Arc::clone(&listener), old_context);
        registry.publish(Some(state(11)), noon(11));

        registry.register(Arc::clone(&listener), DeliveryContext::spawn("test-move-new").unwrap());
        registry.publish(Some(state(12)), noon(12));

        // Nothing may overtake the delivery stuck behind the gate
        assert!(rx.recv_timeout(StdDuration::from_millis(200)).is_err());
        gate_tx.send(()).unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap().1, Some(state(11)));
        assert_eq!(rx.recv_timeout(WAIT).unwrap().1, Some(state(12)));
        assert!(rx.recv_timeout(StdDuration::from_millis(100)).is_err());
    }

    #[test]
    fn test_unregister_after_move_drops_old_queue() {
        let mut registry = ListenerRegistry::new();
        let old_context = DeliveryContext::spawn("test-move-drop").unwrap();
        let (gate_tx, gate_rx) = channel::<()>();
        old_context.post(move || {
            let _ = gate_rx.recv();
        });

        let (listener, rx) = recorder("gone");
        registry.register(Arc::clone(&listener), old_context);
        registry.publish(Some(state(13)), noon(13));
        registry.register(Arc::clone(&listener), DeliveryContext::spawn("test-move-drop-new").unwrap());
        registry.unregister(&listener);
        gate_tx.send(()).unwrap();

        assert!(rx.recv_timeout(StdDuration::from_millis(300)).is_err());
    }

    #[test]
    fn test_unregistered_listener_is_not_notified() {
        let mut registry = ListenerRegistry::new();
        let context = DeliveryContext::spawn("test-unregister").unwrap();
        let (kept, kept_rx) = recorder("kept");
        let (removed, removed_rx) = recorder("removed");
        registry.register(kept, context.clone());
        registry.register(Arc::clone(&removed), context);

        assert!(registry.unregister(&removed));
        assert!(!registry.unregister(&removed));
        registry.publish(Some(state(5)), noon(5));

        assert_eq!(kept_rx.recv_timeout(WAIT).unwrap().0, "kept");
        assert!(removed_rx.recv_timeout(StdDuration::from_millis(200)).is_err());
    }

    #[test]
    fn test_unregister_drops_queued_delivery() {
        let mut registry = ListenerRegistry::new();
        let context = DeliveryContext::spawn("test-queued").unwrap();
        let (gate_tx, gate_rx) = channel::<()>();
        // Block the context so the delivery stays queued
        context.post(move || {
            let _ = gate_rx.recv();
        });

        let (listener, rx) = recorder("late");
        registry.register(Arc::clone(&listener), context);
        registry.publish(Some(state(6)), noon(6));
        registry.unregister(&listener);
        gate_tx.send(()).unwrap();

        assert!(rx.recv_timeout(StdDuration::from_millis(300)).is_err());
    }

    #[test]
    fn test_failing_listeners_do_not_block_others() {
        Log::set_enabled(false);
        let mut registry = ListenerRegistry::new();
        let shared = DeliveryContext::spawn("test-isolation").unwrap();
        let (good, rx) = recorder("good");

        registry.register(Arc::new(Failing), shared.clone());
        registry.register(Arc::new(Panicking), shared.clone());
        registry.register(good, shared);

        registry.publish(Some(state(7)), noon(7));
        registry.publish(Some(state(8)), noon(8));

        assert_eq!(rx.recv_timeout(WAIT).unwrap().1, Some(state(7)));
        assert_eq!(rx.recv_timeout(WAIT).unwrap().1, Some(state(8)));
    }

    #[test]
    fn test_delivery_happens_off_the_publishing_thread() {
        let mut registry = ListenerRegistry::new();
        let (tx, rx) = channel();

        struct ThreadProbe(Mutex<Sender<thread::ThreadId>>);
        impl TwilightListener for ThreadProbe {
            fn on_twilight_state_changed(&self, _state: Option<TwilightState>) -> Result<()> {
                let _ = self.0.lock().unwrap().send(thread::current().id());
                Ok(())
            }
        }

        registry.register(
            Arc::new(ThreadProbe(Mutex::new(tx))),
            DeliveryContext::spawn("test-thread").unwrap(),
        );
        registry.publish(Some(state(9)), noon(9));
        assert_ne!(rx.recv_timeout(WAIT).unwrap(), thread::current().id());
    }

    #[test]
    fn test_day_night_flip_uses_separate_callback() {
        struct FlipRecorder(Mutex<Sender<String>>);
        impl TwilightListener for FlipRecorder {
            fn on_twilight_state_changed(&self, _state: Option<TwilightState>) -> Result<()> {
                let _ = self.0.lock().unwrap().send("state".to_string());
                Ok(())
            }
            fn on_day_night_changed(&self, _state: TwilightState, is_night: bool) -> Result<()> {
                let _ = self.0.lock().unwrap().send(format!("night={is_night}"));
                Ok(())
            }
        }

        let mut registry = ListenerRegistry::new();
        let (tx, rx) = channel();
        registry.register(
            Arc::new(FlipRecorder(Mutex::new(tx))),
            DeliveryContext::spawn("test-flip").unwrap(),
        );

        let today = state(10);
        assert_eq!(registry.publish(Some(today), noon(10)), Publication::StateChanged);
        // Same boundaries after sunset
        let evening = today.sunset + Duration::minutes(1);
        assert_eq!(registry.publish(Some(today), evening), Publication::DayNightFlipped);
        assert_eq!(registry.publish(Some(today), evening), Publication::Unchanged);

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "state");
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "night=true");
        assert!(rx.recv_timeout(StdDuration::from_millis(100)).is_err());
    }
}
