//! Event bus
//!
//! `EventBus` composes the subscription registry, argument adaptation, and
//! an executor into subscribe/unsubscribe/emit semantics:
//!
//! - handlers fire in **reverse registration order** (newest first)
//! - `emit` dispatches over a snapshot, so handlers may subscribe,
//!   unsubscribe, or emit from inside their own invocation
//! - once-handlers are removed right after their invocation returns, or
//!   before submission when they are delivered through the executor

use crate::callback::{Arg, IntoCallback};
use crate::config::BusConfig;
use crate::error::{DispatchError, Result};
use crate::pool::{Executor, Inline};
use crate::registry::{Delivery, Subscription, SubscriptionRegistry};
use std::sync::Arc;

/// In-process topic dispatcher
///
/// Cloning yields another handle to the same registry and executor.
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<SubscriptionRegistry>,
    executor: Arc<dyn Executor>,
}

impl EventBus {
    /// Create a bus that delivers everything on the emitting thread
    pub fn new() -> Self {
        Self::with_executor(Arc::new(Inline))
    }

    /// Create a bus with a custom executor for asynchronous delivery
    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Self {
            registry: Arc::new(SubscriptionRegistry::new()),
            executor,
        }
    }

    /// Create a bus from configuration
    pub fn from_config(config: &BusConfig) -> Result<Self> {
        Ok(Self::with_executor(config.build_executor()?))
    }

    /// Name of the executor used for asynchronous delivery
    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    /// Register a handler on a topic
    ///
    /// Fails with `NotAFunction` if `handler` is a dynamic value that does
    /// not hold a callback.
    pub fn subscribe<H, M>(&self, topic: &str, handler: H) -> Result<()>
    where
        H: IntoCallback<M>,
    {
        self.register(topic, handler, false, Delivery::Sync)
    }

    /// Register a handler that fires on the next emit only
    pub fn subscribe_once<H, M>(&self, topic: &str, handler: H) -> Result<()>
    where
        H: IntoCallback<M>,
    {
        self.register(topic, handler, true, Delivery::Sync)
    }

    /// Register a handler that is always delivered through the executor
    pub fn subscribe_async<H, M>(&self, topic: &str, handler: H) -> Result<()>
    where
        H: IntoCallback<M>,
    {
        self.register(topic, handler, false, Delivery::Async)
    }

    /// Register a one-shot handler delivered through the executor
    pub fn subscribe_once_async<H, M>(&self, topic: &str, handler: H) -> Result<()>
    where
        H: IntoCallback<M>,
    {
        self.register(topic, handler, true, Delivery::Async)
    }

    fn register<H, M>(&self, topic: &str, handler: H, once: bool, delivery: Delivery) -> Result<()>
    where
        H: IntoCallback<M>,
    {
        let callback = handler.into_callback()?;
        let subscription = Subscription::new(callback, once, delivery);

        tracing::debug!(
            topic = %topic,
            subscription = %subscription.id(),
            handler = subscription.callback().name(),
            arity = subscription.callback().arity(),
            once,
            delivery = ?delivery,
            "Handler subscribed"
        );

        self.registry.insert(topic, subscription);
        Ok(())
    }

    /// Remove every handler on the topic wrapping the same callable
    ///
    /// Returns `NoHandlers` if the topic has no handlers. A callable that
    /// matches nothing on a non-empty topic is not an error.
    pub fn unsubscribe<H, M>(&self, topic: &str, handler: H) -> Result<()>
    where
        H: IntoCallback<M>,
    {
        let callback = match handler.into_callback() {
            Ok(callback) => callback,
            // Nothing non-invokable is ever registered, so nothing matches
            Err(_) if self.registry.has_handlers(topic) => return Ok(()),
            Err(_) => return Err(DispatchError::no_handlers(topic)),
        };

        let removed = self.registry.remove_by_identity(topic, &callback)?;
        tracing::debug!(
            topic = %topic,
            handler = callback.name(),
            removed,
            "Handler unsubscribed"
        );
        Ok(())
    }

    /// Remove all handlers for the topic
    pub fn unregister(&self, topic: &str) -> Result<()> {
        let removed = self.registry.clear(topic)?;
        tracing::debug!(topic = %topic, removed, "Topic unregistered");
        Ok(())
    }

    /// Invoke the topic's handlers with `args`
    ///
    /// No-op when the topic has no handlers. Handlers run newest first on
    /// the calling thread, except those registered with
    /// [`subscribe_async`](Self::subscribe_async), which go to the executor.
    ///
    /// # Panics
    ///
    /// Panics if an argument's type does not match the parameter type a
    /// handler declares at that position. This is a programmer error and
    /// is not masked.
    pub fn emit(&self, topic: &str, args: Vec<Arg>) {
        self.dispatch(topic, args, Delivery::Sync);
    }

    /// Like [`emit`](Self::emit), but every handler goes to the executor
    ///
    /// Blocks only while a bounded pool queue is full. A rejected
    /// submission (closed pool) is logged and the handler skipped.
    pub fn emit_async(&self, topic: &str, args: Vec<Arg>) {
        self.dispatch(topic, args, Delivery::Async);
    }

    fn dispatch(&self, topic: &str, args: Vec<Arg>, mode: Delivery) {
        let handlers = self.registry.snapshot(topic);
        if handlers.is_empty() {
            return;
        }

        let args: Arc<[Arg]> = args.into();
        for (index, subscription) in handlers.into_iter().enumerate().rev() {
            let delivery = match mode {
                Delivery::Async => Delivery::Async,
                Delivery::Sync => subscription.delivery(),
            };

            match delivery {
                Delivery::Sync => {
                    invoke(topic, &subscription, &args);
                    if subscription.is_once() {
                        claim(&self.registry, topic, index, &subscription);
                    }
                }
                Delivery::Async => {
                    // A queued once-handler must not be seen by a later emit
                    if subscription.is_once() && !claim(&self.registry, topic, index, &subscription)
                    {
                        continue;
                    }

                    let owned_topic = topic.to_string();
                    let args = Arc::clone(&args);
                    let id = subscription.id();
                    let task = Box::new(move || invoke(&owned_topic, &subscription, &args));

                    if let Err(e) = self.executor.submit(task) {
                        tracing::warn!(
                            topic = %topic,
                            subscription = %id,
                            executor = self.executor.name(),
                            error = %e,
                            "Failed to submit handler"
                        );
                    }
                }
            }
        }
    }

    /// Whether any handler is registered on the topic
    pub fn has_subscribers(&self, topic: &str) -> bool {
        self.registry.has_handlers(topic)
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        self.registry.handler_count(topic)
    }

    /// Topics with at least one handler, sorted
    pub fn topics(&self) -> Vec<String> {
        self.registry.topics()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("executor", &self.executor.name())
            .field("topics", &self.registry.topics())
            .finish()
    }
}

fn invoke(topic: &str, subscription: &Subscription, args: &[Arg]) {
    let callback = subscription.callback();
    if let Err(e) = callback.call(args) {
        panic!(
            "handler `{}` on topic '{}' could not be invoked: {}",
            callback.name(),
            topic,
            e
        );
    }
}

/// Remove a once-subscription; `false` if another dispatch already took it
fn claim(
    registry: &SubscriptionRegistry,
    topic: &str,
    index: usize,
    subscription: &Subscription,
) -> bool {
    let removed = registry
        .remove_subscription(topic, index, subscription.id())
        .is_some();
    if removed {
        tracing::debug!(
            topic = %topic,
            subscription = %subscription.id(),
            "Once handler removed"
        );
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::callback::Callback;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn test_emit_unknown_topic_is_noop() {
        let bus = EventBus::new();
        bus.emit("never", args![1_i32, "x"]);
        bus.emit_async("never", args![]);
        assert!(bus.topics().is_empty());
    }

    #[test]
    fn test_subscribe_counts_per_registration() {
        let bus = EventBus::new();
        let count = counter();
        let handler = |count: Arc<AtomicUsize>| {
            count.fetch_add(1, Ordering::SeqCst);
        };

        bus.subscribe("sub", handler).unwrap();
        bus.emit("sub", args![Arc::clone(&count)]);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        bus.subscribe("sub", handler).unwrap();
        bus.emit("sub", args![Arc::clone(&count)]);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_subscribe_rejects_non_function() {
        let bus = EventBus::new();
        let value: Arg = Arc::new(String::from("wrong fn"));
        assert!(matches!(
            bus.subscribe("sub", value),
            Err(DispatchError::NotAFunction)
        ));
        assert!(matches!(
            bus.subscribe_once("sub", None::<Callback>),
            Err(DispatchError::FunctionIsNil)
        ));
        assert!(!bus.has_subscribers("sub"));
    }

    #[test]
    fn test_reverse_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.subscribe("t", move || order.lock().unwrap().push(label))
                .unwrap();
        }

        bus.emit("t", args![]);
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[test]
    fn test_once_fires_once() {
        let bus = EventBus::new();
        let count = counter();
        let c = Arc::clone(&count);
        bus.subscribe_once("once", move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        bus.emit("once", args![]);
        bus.emit("once", args![]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!bus.has_subscribers("once"));
    }

    #[test]
    fn test_once_and_repeating_mix() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = Arc::clone(&log);
        bus.subscribe_once("exit", move |at: u64| l.lock().unwrap().push(format!("once {}", at)))
            .unwrap();
        let l = Arc::clone(&log);
        bus.subscribe("exit", move |at: u64| l.lock().unwrap().push(format!("simple {}", at)))
            .unwrap();

        bus.emit("exit", args![7_u64]);
        bus.emit("exit", args![8_u64]);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["simple 7", "once 7", "simple 8"]
        );
    }

    fn unreachable_report(_data: String) {
        panic!("unsubscribed handler was called");
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();

        bus.subscribe("hr", unreachable_report).unwrap();
        bus.unsubscribe("hr", unreachable_report).unwrap();
        assert_eq!(bus.handler_count("hr"), 0);
        bus.emit("hr", args![String::from("report")]);

        assert!(matches!(
            bus.unsubscribe("hr", unreachable_report),
            Err(DispatchError::NoHandlers { .. })
        ));
    }

    #[test]
    fn test_unsubscribe_non_matching_is_lenient() {
        let bus = EventBus::new();
        bus.subscribe("t", || {}).unwrap();

        bus.unsubscribe("t", |_data: String| {}).unwrap();
        let not_a_fn: Arg = Arc::new(5_i32);
        bus.unsubscribe("t", not_a_fn).unwrap();
        assert_eq!(bus.handler_count("t"), 1);
    }

    #[test]
    fn test_unregister() {
        let bus = EventBus::new();
        bus.subscribe("t", || {}).unwrap();
        bus.subscribe("t", || {}).unwrap();
        bus.subscribe("t", || {}).unwrap();

        bus.unregister("t").unwrap();
        assert_eq!(bus.handler_count("t"), 0);
        assert!(matches!(
            bus.unregister("t"),
            Err(DispatchError::NoHandlers { .. })
        ));
    }

    #[test]
    fn test_argument_adaptation_through_emit() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = Arc::clone(&log);
        bus.subscribe("follower", move |name: &'static str| {
            l.lock().unwrap().push(format!("new follower: {}", name))
        })
        .unwrap();
        let l = Arc::clone(&log);
        bus.subscribe("follower", move || l.lock().unwrap().push("you have a new follower".to_string()))
            .unwrap();
        let l = Arc::clone(&log);
        bus.subscribe("follower", move |name: &'static str, last: &'static str| {
            l.lock().unwrap().push(format!("name: {}|{}", name, last))
        })
        .unwrap();

        bus.emit("follower", args!["hello"]);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "name: hello|",
                "you have a new follower",
                "new follower: hello"
            ]
        );
    }

    #[test]
    #[should_panic(expected = "could not be invoked")]
    fn test_argument_type_mismatch_panics() {
        let bus = EventBus::new();
        bus.subscribe("t", |_n: i64| {}).unwrap();
        bus.emit("t", args![String::from("not a number")]);
    }

    #[test]
    fn test_async_subscription_runs_on_executor() {
        let pool = Arc::new(crate::pool::WorkerPool::new(2, 8).unwrap());
        let bus = EventBus::with_executor(pool.clone());
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = Mutex::new(tx);
        bus.subscribe_async("t", move || {
            let name = std::thread::current().name().map(str::to_string);
            tx.lock().unwrap().send(name).unwrap();
        })
        .unwrap();

        bus.emit("t", args![]);
        let name = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert!(name.starts_with("dispatch-worker-"));
        assert_eq!(bus.executor_name(), "pool");
    }

    #[test]
    fn test_emit_async_after_shutdown_is_logged_not_run() {
        let pool = Arc::new(crate::pool::WorkerPool::new(1, 4).unwrap());
        let bus = EventBus::with_executor(pool.clone());
        let count = counter();
        let c = Arc::clone(&count);
        bus.subscribe("t", move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        pool.shutdown();
        bus.emit_async("t", args![]);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.handler_count("t"), 1);
    }

    #[test]
    fn test_clone_shares_registry() {
        let bus = EventBus::new();
        let other = bus.clone();
        other.subscribe("t", || {}).unwrap();
        assert!(bus.has_subscribers("t"));
    }
}
