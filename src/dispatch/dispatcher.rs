//! Ordered multi-subscriber callback registry.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Error type callbacks may fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a callback hands back to the dispatcher.
pub enum Reply {
    /// The callback finished its work.
    Done,
    /// The callback started asynchronous work; a failure is logged when it
    /// settles.
    Deferred(BoxFuture<'static, Result<(), BoxError>>),
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Done => f.write_str("Done"),
            Reply::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// A subscribed callback, invoked with the event name and its arguments.
///
/// Identity is the allocation: unregistering requires a clone of the same
/// `Arc` that was registered.
pub type Callback<A> = Arc<dyn Fn(&str, &A) -> Result<Reply, BoxError> + Send + Sync>;

/// Wrap an infallible closure as a [`Callback`].
pub fn handler<A: 'static, F>(f: F) -> Callback<A>
where
    F: Fn(&str, &A) + Send + Sync + 'static,
{
    Arc::new(move |event: &str, args: &A| {
        f(event, args);
        Ok(Reply::Done)
    })
}

/// Wrap a fallible closure as a [`Callback`].
pub fn fallible<A: 'static, F>(f: F) -> Callback<A>
where
    F: Fn(&str, &A) -> Result<(), BoxError> + Send + Sync + 'static,
{
    Arc::new(move |event: &str, args: &A| f(event, args).map(|()| Reply::Done))
}

/// Wrap a closure returning a future as a [`Callback`].
pub fn deferred<A: 'static, F, Fut>(f: F) -> Callback<A>
where
    F: Fn(&str, &A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |event: &str, args: &A| Ok(Reply::Deferred(Box::pin(f(event, args)))))
}

struct Subscription<A> {
    callback: Callback<A>,
    once: bool,
}

impl<A> Clone for Subscription<A> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
            once: self.once,
        }
    }
}

impl<A> Subscription<A> {
    fn matches(&self, callback: &Callback<A>, once: bool) -> bool {
        self.once == once && same_callback(&self.callback, callback)
    }
}

fn same_callback<A>(a: &Callback<A>, b: &Callback<A>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Event dispatcher.
///
/// Callbacks run synchronously on [`dispatch`](Self::dispatch), in
/// registration order, against a snapshot of the subscriptions taken before
/// the first one is invoked. Callbacks may therefore register or unregister
/// freely; changes apply from the next dispatch on. The one exception is a
/// once subscription removed by a concurrent or nested dispatch: it is
/// skipped, so it never fires twice.
///
/// A failing or panicking callback is logged and never prevents delivery to
/// the remaining ones. Cloning yields a handle to the same registry.
pub struct Dispatcher<A> {
    subscriptions: Arc<Mutex<HashMap<String, Vec<Subscription<A>>>>>,
    allowed: Option<Arc<HashSet<String>>>,
}

impl<A> Clone for Dispatcher<A> {
    fn clone(&self) -> Self {
        Self {
            subscriptions: Arc::clone(&self.subscriptions),
            allowed: self.allowed.clone(),
        }
    }
}

impl<A> Default for Dispatcher<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for Dispatcher<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscriptions = self.subscriptions.lock();
        let mut counts: Vec<_> = subscriptions.iter().map(|(k, v)| (k.clone(), v.len())).collect();
        counts.sort();
        f.debug_struct("Dispatcher")
            .field("subscriptions", &counts)
            .field("allowed", &self.allowed)
            .finish()
    }
}

impl<A> Dispatcher<A> {
    /// Create a dispatcher accepting any event name.
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            allowed: None,
        }
    }

    /// Create a dispatcher that only accepts registrations for `events`.
    pub fn with_events<I, S>(events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            allowed: Some(Arc::new(events.into_iter().map(Into::into).collect())),
        }
    }

    /// Subscribe `callback` to `event`.
    ///
    /// A callback registered several times is invoked once per registration.
    /// Returns `false` only if `event` is outside the allow-list.
    pub fn register(&self, event: &str, callback: Callback<A>, once: bool) -> bool {
        if let Some(allowed) = &self.allowed {
            if !allowed.contains(event) {
                return false;
            }
        }

        self.subscriptions
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(Subscription { callback, once });
        true
    }

    /// Alias for [`register`](Self::register) with `once = false`.
    pub fn on(&self, event: &str, callback: Callback<A>) -> bool {
        self.register(event, callback, false)
    }

    /// Alias for [`register`](Self::register) with `once = true`.
    pub fn once(&self, event: &str, callback: Callback<A>) -> bool {
        self.register(event, callback, true)
    }

    /// Remove one subscription matching all of `event`, `callback` and
    /// `once`. Returns `false` if none matched.
    pub fn unregister(&self, event: &str, callback: &Callback<A>, once: bool) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let Some(list) = subscriptions.get_mut(event) else {
            return false;
        };

        match list.iter().position(|s| s.matches(callback, once)) {
            Some(index) => {
                list.remove(index);
                if list.is_empty() {
                    subscriptions.remove(event);
                }
                true
            }
            None => false,
        }
    }

    /// Number of subscriptions for `event`.
    pub fn listeners(&self, event: &str) -> usize {
        self.subscriptions.lock().get(event).map_or(0, Vec::len)
    }

    /// Invoke every callback subscribed to `event`.
    pub fn dispatch(&self, event: &str, args: &A) {
        let snapshot = match self.subscriptions.lock().get(event) {
            Some(list) => list.clone(),
            None => return,
        };

        for subscription in snapshot {
            // A once subscription fires only for whoever removes it.
            if subscription.once && !self.unregister(event, &subscription.callback, true) {
                continue;
            }

            let callback = &subscription.callback;
            match std::panic::catch_unwind(AssertUnwindSafe(|| callback(event, args))) {
                Ok(Ok(Reply::Done)) => {}
                Ok(Ok(Reply::Deferred(pending))) => watch_deferred(event, pending),
                Ok(Err(e)) => {
                    warn!(event, error = %e, "event callback failed (ignored)");
                }
                Err(_panic) => {
                    warn!(event, "event callback panicked (ignored)");
                }
            }
        }
    }
}

impl<A: Clone + Send + 'static> Dispatcher<A> {
    /// Subscribe once to `event` and receive `(event, args)` on its next
    /// dispatch.
    ///
    /// Returns `None` if `event` is outside the allow-list. The receiver
    /// fails if the subscription is dropped without firing.
    pub fn future_on(&self, event: &str) -> Option<oneshot::Receiver<(String, A)>> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let callback = handler(move |event: &str, args: &A| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send((event.to_string(), args.clone()));
            }
        });

        self.once(event, callback).then_some(rx)
    }
}

fn watch_deferred(event: &str, pending: BoxFuture<'static, Result<(), BoxError>>) {
    let event = event.to_string();
    let watched = async move {
        match AssertUnwindSafe(pending).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(event = %event, error = %e, "deferred event callback failed (ignored)"),
            Err(_panic) => warn!(event = %event, "deferred event callback panicked (ignored)"),
        }
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(watched);
        }
        Err(_) => {
            if watched.now_or_never().is_none() {
                debug!("deferred event callback pending outside a runtime (dropped)");
            }
        }
    }
}
