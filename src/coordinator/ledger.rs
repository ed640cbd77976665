//! Deduplication and throttling ledger.
//!
//! The ledger tracks, per [`RequestKey`]:
//!
//! - the in-flight request, if any, with the list of callers waiting on it;
//! - when the key last completed successfully, to throttle early re-issues.
//!
//! A caller arriving while a key is in flight is attached as one more
//! subscriber instead of starting a second upstream call. When the call
//! completes, the single outcome is delivered to every subscriber. Outcomes are
//! type-erased so one registry can hold requests of any result type; each
//! subscriber downcasts back to the type it expects.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::warn;

use crate::coordinator::{PriorityTimings, RequestKey, RequestPriority, TtlCache};
use crate::error::CoordinatorError;

/// Type-erased outcome shared by every caller of one in-flight request.
pub type SharedOutcome = Result<Arc<dyn Any + Send + Sync>, CoordinatorError>;

#[derive(Debug)]
struct InFlight {
    ticket: u64,
    subscribers: Vec<oneshot::Sender<SharedOutcome>>,
    dispatch: Option<AbortHandle>,
}

/// In-flight registry and last-success table.
#[derive(Debug)]
pub struct DedupLedger {
    in_flight: HashMap<RequestKey, InFlight>,
    last_success: TtlCache<RequestKey>,
    next_ticket: u64,
}

impl DedupLedger {
    /// Create an empty ledger.
    ///
    /// `retention` is how long success stamps are kept; it should be at least the
    /// longest minimum re-issue interval.
    pub fn new(retention: Duration) -> Self {
        Self {
            in_flight: HashMap::new(),
            last_success: TtlCache::new(retention),
            next_ticket: 0,
        }
    }

    /// Check whether `key` may be issued at `priority`.
    ///
    /// Returns `Err(retry_after)` when the key completed successfully less than
    /// the priority's throttle window ago.
    pub fn check_throttle(
        &self,
        key: &RequestKey,
        priority: RequestPriority,
        timings: &PriorityTimings,
        now: Instant,
    ) -> Result<(), Duration> {
        let Some(elapsed) = self.last_success.get_age(key, now) else {
            return Ok(());
        };
        let window = priority.throttle_window(timings);
        if elapsed < window {
            Err(window - elapsed)
        } else {
            Ok(())
        }
    }

    /// Attach one more caller to the in-flight request for `key`.
    ///
    /// Returns `None` when nothing is in flight for the key.
    pub fn attach(&mut self, key: &RequestKey) -> Option<oneshot::Receiver<SharedOutcome>> {
        let entry = self.in_flight.get_mut(key)?;
        let (sender, receiver) = oneshot::channel();
        entry.subscribers.push(sender);
        Some(receiver)
    }

    /// Register a new in-flight request for `key`.
    ///
    /// Returns the ticket the dispatch must [`complete`](Self::complete) with and
    /// the registering caller's receiver. Callers attach first; registering over
    /// an existing entry detaches its subscribers.
    pub fn register(&mut self, key: &RequestKey) -> (u64, oneshot::Receiver<SharedOutcome>) {
        let (sender, receiver) = oneshot::channel();
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.in_flight.insert(
            key.clone(),
            InFlight {
                ticket,
                subscribers: vec![sender],
                dispatch: None,
            },
        );
        (ticket, receiver)
    }

    /// Remember the running dispatch task so it can be aborted on reset.
    pub fn set_dispatch(&mut self, key: &RequestKey, ticket: u64, handle: AbortHandle) {
        if let Some(entry) = self.in_flight.get_mut(key).filter(|e| e.ticket == ticket) {
            entry.dispatch = Some(handle);
        }
    }

    /// Finish the in-flight request registered under `ticket`.
    ///
    /// Records the success stamp on `Ok`, removes the entry either way and
    /// delivers `outcome` to every subscriber. Returns how many subscribers were
    /// still listening; a stale ticket delivers nothing.
    pub fn complete(
        &mut self,
        key: &RequestKey,
        ticket: u64,
        outcome: SharedOutcome,
        now: Instant,
    ) -> usize {
        let matches = self.in_flight.get(key).is_some_and(|e| e.ticket == ticket);
        if !matches {
            return 0;
        }
        let Some(entry) = self.in_flight.remove(key) else {
            return 0;
        };

        if outcome.is_ok() {
            self.last_success.insert(key.clone(), now);
        }

        entry
            .subscribers
            .into_iter()
            .filter_map(|subscriber| subscriber.send(outcome.clone()).ok())
            .count()
    }

    /// Number of in-flight requests.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether `key` is in flight.
    pub fn is_in_flight(&self, key: &RequestKey) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Number of callers waiting on `key`.
    pub fn subscriber_count(&self, key: &RequestKey) -> usize {
        self.in_flight.get(key).map_or(0, |e| e.subscribers.len())
    }

    /// Drop expired success stamps.
    pub fn cleanup(&mut self, now: Instant) {
        self.last_success.cleanup(now);
    }

    /// Abort every running dispatch and drop every registration.
    ///
    /// Waiting callers observe their sender being dropped. Returns the number of
    /// registrations removed. Success stamps are kept.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.in_flight.len();
        for (_, entry) in self.in_flight.drain() {
            if let Some(dispatch) = entry.dispatch {
                dispatch.abort();
            }
        }
        count
    }
}

/// Wait for a shared outcome and downcast it to the caller's result type.
pub(crate) async fn await_outcome<T>(
    key: &RequestKey,
    priority: RequestPriority,
    receiver: oneshot::Receiver<SharedOutcome>,
) -> Result<T, CoordinatorError>
where
    T: Clone + Send + Sync + 'static,
{
    match receiver.await {
        Err(_) => {
            warn!(key = %key, priority = %priority, "request dropped before completion");
            Err(CoordinatorError::Cancelled)
        }
        Ok(Err(err)) => Err(err),
        Ok(Ok(value)) => value.downcast::<T>().map(Arc::unwrap_or_clone).map_err(|_| {
            warn!(
                key = %key,
                priority = %priority,
                expected = std::any::type_name::<T>(),
                "shared outcome has a different result type"
            );
            CoordinatorError::CastingError { key: key.clone() }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn ledger() -> DedupLedger {
        DedupLedger::new(secs(60))
    }

    fn timings() -> PriorityTimings {
        PriorityTimings::default()
    }

    fn register(
        ledger: &mut DedupLedger,
        key: &RequestKey,
    ) -> (u64, oneshot::Receiver<SharedOutcome>) {
        assert!(ledger.attach(key).is_none());
        ledger.register(key)
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_registration() {
        let mut ledger = ledger();
        let key = RequestKey::from("quotes|ids=1");

        let (ticket, first) = register(&mut ledger, &key);
        let mut attached = Vec::new();
        for _ in 0..9 {
            attached.push(ledger.attach(&key).unwrap());
        }
        assert_eq!(ledger.subscriber_count(&key), 10);
        assert_eq!(ledger.in_flight_count(), 1);

        let delivered = ledger.complete(&key, ticket, Ok(Arc::new(42u32)), Instant::now());
        assert_eq!(delivered, 10);
        assert!(!ledger.is_in_flight(&key));

        let value = await_outcome::<u32>(&key, RequestPriority::Normal, first).await;
        assert_eq!(value.unwrap(), 42);
        for receiver in attached {
            let value = await_outcome::<u32>(&key, RequestPriority::Normal, receiver).await;
            assert_eq!(value.unwrap(), 42);
        }
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_not_stamped() {
        let mut ledger = ledger();
        let key = RequestKey::from("chart|coin=bitcoin");
        let now = Instant::now();

        let (ticket, receiver) = register(&mut ledger, &key);
        ledger.complete(&key, ticket, Err(CoordinatorError::Cancelled), now);

        assert!(matches!(
            await_outcome::<u32>(&key, RequestPriority::Normal, receiver).await,
            Err(CoordinatorError::Cancelled)
        ));
        assert!(ledger.check_throttle(&key, RequestPriority::Low, &timings(), now).is_ok());
    }

    #[test]
    fn test_throttle_after_success() {
        let mut ledger = ledger();
        let key = RequestKey::from("listings");
        let now = Instant::now();

        let (ticket, _receiver) = register(&mut ledger, &key);
        ledger.complete(&key, ticket, Ok(Arc::new(())), now);

        let retry_after = ledger
            .check_throttle(&key, RequestPriority::Normal, &timings(), now + secs(4))
            .unwrap_err();
        assert_eq!(retry_after, secs(6));
        assert!(
            ledger
                .check_throttle(&key, RequestPriority::Normal, &timings(), now + secs(10))
                .is_ok()
        );
    }

    #[test]
    fn test_high_priority_floor() {
        let mut ledger = ledger();
        let key = RequestKey::from("listings|sort=price");
        let now = Instant::now();

        let (ticket, _receiver) = register(&mut ledger, &key);
        ledger.complete(&key, ticket, Ok(Arc::new(())), now);

        let half_second = now + Duration::from_millis(500);
        assert!(
            ledger
                .check_throttle(&key, RequestPriority::High, &timings(), half_second)
                .is_err()
        );

        // Past the floor but well within the nominal High interval.
        let later = now + Duration::from_millis(1200);
        assert!(
            ledger
                .check_throttle(&key, RequestPriority::High, &timings(), later)
                .is_ok()
        );
        assert!(
            ledger
                .check_throttle(&key, RequestPriority::Normal, &timings(), later)
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_mismatched_type_is_casting_error() {
        let mut ledger = ledger();
        let key = RequestKey::from("logos|ids=1");

        let (ticket, receiver) = register(&mut ledger, &key);
        ledger.complete(&key, ticket, Ok(Arc::new("not a number".to_string())), Instant::now());

        assert!(matches!(
            await_outcome::<u32>(&key, RequestPriority::Normal, receiver).await,
            Err(CoordinatorError::CastingError { .. })
        ));
    }

    #[test]
    fn test_stale_ticket_is_ignored() {
        let mut ledger = ledger();
        let key = RequestKey::from("quotes|ids=1");

        let (old_ticket, _old) = register(&mut ledger, &key);
        ledger.cancel_all();
        let (_new_ticket, _new) = register(&mut ledger, &key);

        let delivered = ledger.complete(&key, old_ticket, Ok(Arc::new(1u8)), Instant::now());
        assert_eq!(delivered, 0);
        assert!(ledger.is_in_flight(&key));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        (buffer, tracing::subscriber::set_default(subscriber))
    }

    #[tokio::test]
    async fn test_casting_error_is_logged_with_key_and_priority() {
        let (logs, _guard) = capture_logs();
        let mut ledger = ledger();
        let key = RequestKey::from("logos|ids=1");

        let (ticket, receiver) = register(&mut ledger, &key);
        ledger.complete(&key, ticket, Ok(Arc::new(7u64)), Instant::now());
        assert!(
            await_outcome::<u32>(&key, RequestPriority::High, receiver)
                .await
                .is_err()
        );

        let output = logs.contents();
        assert!(output.contains("WARN"));
        assert!(output.contains("different result type"));
        assert!(output.contains("key=logos|ids=1"));
        assert!(output.contains("priority=HIGH"));
    }

    #[tokio::test]
    async fn test_dropped_request_is_logged() {
        let (logs, _guard) = capture_logs();
        let mut ledger = ledger();
        let key = RequestKey::from("quotes|ids=1027");

        let (_ticket, receiver) = register(&mut ledger, &key);
        ledger.cancel_all();
        assert!(
            await_outcome::<u32>(&key, RequestPriority::Low, receiver)
                .await
                .is_err()
        );

        let output = logs.contents();
        assert!(output.contains("request dropped before completion"));
        assert!(output.contains("key=quotes|ids=1027"));
        assert!(output.contains("priority=LOW"));
    }

    #[tokio::test]
    async fn test_cancel_all_detaches_waiters() {
        let mut ledger = ledger();
        let key = RequestKey::from("quotes|ids=1");

        let (_ticket, receiver) = register(&mut ledger, &key);
        assert_eq!(ledger.cancel_all(), 1);
        assert_eq!(ledger.in_flight_count(), 0);
        assert!(matches!(
            await_outcome::<u32>(&key, RequestPriority::Normal, receiver).await,
            Err(CoordinatorError::Cancelled)
        ));
    }
}
