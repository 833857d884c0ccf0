//! EventHandler - actor that owns the state store and the event log
//!
//! Every mutation and every read that must see a consistent view goes through
//! one command channel, so the snapshot is always the fold of the log.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::control::{Intent, IntentQueue, TriggerController, TriggerPhase, TriggerState};
use crate::events::{Cursor, DEFAULT_SUBSCRIBER_BUFFER, Event, EventLog};
use crate::state::{State, StateStore};

use super::messages::{HandlerCommand, HandlerError, HandlerResponse, StartAt};

/// Default capacity of the actor's command channel
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

/// Settings for a new [`EventHandler`]
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Entries each subscriber may have queued before it is evicted
    pub subscriber_buffer: usize,
    pub command_buffer: usize,
    /// Artifacts known up front, reported as not started
    pub artifacts: Vec<String>,
    /// Initial auto-trigger flags
    pub triggers: TriggerController,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            artifacts: Vec::new(),
            triggers: TriggerController::default(),
        }
    }
}

impl HandlerConfig {
    /// State the handler starts from before any event is handled
    pub fn initial_state(&self) -> State {
        let mut state = State::with_artifacts(self.artifacts.iter().cloned());
        for phase in TriggerPhase::ALL {
            state.set_auto_trigger(phase, self.triggers.get(phase));
        }
        state
    }
}

/// Everything the actor owns
struct Core {
    store: StateStore,
    log: EventLog,
    triggers: TriggerController,
}

impl Core {
    fn new(config: &HandlerConfig) -> Self {
        Self {
            store: StateStore::new(config.initial_state()),
            log: EventLog::new(config.subscriber_buffer),
            triggers: config.triggers,
        }
    }

    /// Validate, enrich, fold and append in one step
    fn handle(&mut self, mut event: Event) -> HandlerResponse<u64> {
        if let Err(e) = event.validate() {
            warn!(error = %e, "EventHandler: rejecting malformed event");
            return Err(e.into());
        }
        event.enrich_error();
        self.store.apply(&event);
        Ok(self.log.append(event))
    }

    fn subscribe(&mut self, start: StartAt) -> HandlerResponse<Cursor> {
        let from = match start {
            StartAt::Sequence(from) => from,
            StartAt::Tail => self.log.tail(),
        };
        Ok(self.log.subscribe(from)?)
    }

    /// Flip a trigger and mirror it into the state together
    fn set_trigger(&mut self, phase: TriggerPhase, enabled: bool) -> bool {
        let changed = self.triggers.set(phase, enabled);
        self.store.set_auto_trigger(phase, enabled);
        if changed {
            info!(%phase, enabled, "Auto-trigger changed");
        }
        changed
    }
}

/// Handle to send commands to the EventHandler
#[derive(Clone)]
pub struct EventHandler {
    tx: mpsc::Sender<HandlerCommand>,
    intents: Arc<IntentQueue>,
}

impl EventHandler {
    /// Spawn a new EventHandler actor
    pub fn spawn(config: HandlerConfig) -> Self {
        debug!(?config, "spawn: called");
        let core = Core::new(&config);
        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));

        tokio::spawn(actor_loop(core, rx));

        info!("EventHandler spawned");

        Self {
            tx,
            intents: Arc::new(IntentQueue::new()),
        }
    }

    async fn request<T>(&self, cmd: HandlerCommand, reply_rx: oneshot::Receiver<T>) -> HandlerResponse<T> {
        self.tx.send(cmd).await.map_err(|_| HandlerError::ChannelError)?;
        reply_rx.await.map_err(|_| HandlerError::ChannelError)
    }

    // === Producer side ===

    /// Record an event; returns its sequence number in the log
    pub async fn handle(&self, event: Event) -> HandlerResponse<u64> {
        debug!(event_type = event.event_type(), "handle: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(HandlerCommand::Handle { event, reply: reply_tx }, reply_rx)
            .await?
    }

    /// Same as [`EventHandler::handle`] for producers outside the runtime
    ///
    /// Panics if called from within an async context.
    pub fn blocking_handle(&self, event: Event) -> HandlerResponse<u64> {
        debug!(event_type = event.event_type(), "blocking_handle: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .blocking_send(HandlerCommand::Handle { event, reply: reply_tx })
            .map_err(|_| HandlerError::ChannelError)?;
        reply_rx.blocking_recv().map_err(|_| HandlerError::ChannelError)?
    }

    // === Observer side ===

    /// Current snapshot of the pipeline state
    pub async fn get_state(&self) -> HandlerResponse<State> {
        debug!("get_state: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(HandlerCommand::GetState { reply: reply_tx }, reply_rx)
            .await
    }

    /// Cursor over every entry from sequence `from` onwards
    pub async fn subscribe(&self, from: u64) -> HandlerResponse<Cursor> {
        debug!(from, "subscribe: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(
            HandlerCommand::Subscribe {
                start: StartAt::Sequence(from),
                reply: reply_tx,
            },
            reply_rx,
        )
        .await?
    }

    /// Full history followed by live entries
    pub async fn events(&self) -> HandlerResponse<Cursor> {
        debug!("events: called");
        self.subscribe(0).await
    }

    /// Live entries only, starting at the current tail
    #[deprecated(note = "use `events`, which replays the full history first")]
    pub async fn event_log(&self) -> HandlerResponse<Cursor> {
        debug!("event_log: called");
        self.tail().await
    }

    /// Live entries only; the non-deprecated spelling used by the transport
    pub async fn tail(&self) -> HandlerResponse<Cursor> {
        debug!("tail: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(
            HandlerCommand::Subscribe {
                start: StartAt::Tail,
                reply: reply_tx,
            },
            reply_rx,
        )
        .await?
    }

    /// Number of entries in the log
    pub async fn log_len(&self) -> HandlerResponse<u64> {
        debug!("log_len: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(HandlerCommand::LogLength { reply: reply_tx }, reply_rx)
            .await
    }

    /// Number of live subscribers
    pub async fn subscriber_count(&self) -> HandlerResponse<usize> {
        debug!("subscriber_count: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(HandlerCommand::SubscriberCount { reply: reply_tx }, reply_rx)
            .await
    }

    // === Trigger controller ===

    /// Set a phase's auto-trigger; returns true if it changed
    pub async fn set_trigger(&self, phase: TriggerPhase, enabled: bool) -> HandlerResponse<bool> {
        debug!(%phase, enabled, "set_trigger: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(
            HandlerCommand::SetTrigger {
                phase,
                enabled,
                reply: reply_tx,
            },
            reply_rx,
        )
        .await
    }

    pub async fn get_trigger(&self, phase: TriggerPhase) -> HandlerResponse<bool> {
        debug!(%phase, "get_trigger: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(HandlerCommand::GetTrigger { phase, reply: reply_tx }, reply_rx)
            .await
    }

    /// AutoBuild / AutoSync / AutoDeploy
    pub async fn auto_execute(&self, phase: TriggerPhase, state: TriggerState) -> HandlerResponse<()> {
        debug!(%phase, enabled = state.enabled, "auto_execute: called");
        self.set_trigger(phase, state.enabled).await.map(|_| ())
    }

    // === Intents ===

    /// Request a one-shot run of the flagged phases
    pub fn execute(&self, intent: Intent) {
        debug!(?intent, "execute: called");
        self.intents.set(intent);
    }

    /// Read and clear one pending intent
    pub fn consume_intent(&self, phase: TriggerPhase) -> bool {
        self.intents.consume(phase)
    }

    pub fn pending_intents(&self) -> Intent {
        self.intents.pending()
    }

    /// Wait until some intent is pending
    pub async fn wait_for_intent(&self) {
        self.intents.wait().await;
    }

    /// Stop the actor; open cursors end once they drain
    pub async fn shutdown(&self) -> HandlerResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(HandlerCommand::Shutdown)
            .await
            .map_err(|_| HandlerError::ChannelError)
    }
}

/// The actor loop
async fn actor_loop(mut core: Core, mut rx: mpsc::Receiver<HandlerCommand>) {
    debug!("EventHandler actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            HandlerCommand::Handle { event, reply } => {
                debug!(event_type = event.event_type(), "actor_loop: Handle command");
                let result = core.handle(event);
                let _ = reply.send(result);
            }

            HandlerCommand::GetState { reply } => {
                debug!("actor_loop: GetState command");
                let _ = reply.send(core.store.snapshot());
            }

            HandlerCommand::Subscribe { start, reply } => {
                debug!(?start, "actor_loop: Subscribe command");
                let result = core.subscribe(start);
                let _ = reply.send(result);
            }

            HandlerCommand::LogLength { reply } => {
                debug!("actor_loop: LogLength command");
                let _ = reply.send(core.log.tail());
            }

            HandlerCommand::SubscriberCount { reply } => {
                debug!("actor_loop: SubscriberCount command");
                let _ = reply.send(core.log.subscriber_count());
            }

            HandlerCommand::SetTrigger { phase, enabled, reply } => {
                debug!(%phase, enabled, "actor_loop: SetTrigger command");
                let _ = reply.send(core.set_trigger(phase, enabled));
            }

            HandlerCommand::GetTrigger { phase, reply } => {
                debug!(%phase, "actor_loop: GetTrigger command");
                let _ = reply.send(core.triggers.get(phase));
            }

            HandlerCommand::Shutdown => {
                debug!("actor_loop: Shutdown command");
                info!("EventHandler shutting down");
                break;
            }
        }
    }

    debug!("EventHandler actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{COMPLETE, FAILED, IN_PROGRESS, StreamError, SUCCEEDED};
    use crate::state::fold;
    use crate::status::StatusCode;
    use proptest::prelude::*;
    use std::time::Duration;

    async fn drain(cursor: &mut Cursor, count: usize) -> Vec<Event> {
        let mut events = Vec::with_capacity(count);
        for _ in 0..count {
            let entry = tokio::time::timeout(Duration::from_secs(1), cursor.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            events.push(entry.event.clone());
        }
        events
    }

    #[tokio::test]
    async fn test_build_scenario() {
        let handler = EventHandler::spawn(HandlerConfig::default());
        handler.handle(Event::build("a", IN_PROGRESS)).await.unwrap();
        handler.handle(Event::build("a", COMPLETE)).await.unwrap();

        let state = handler.get_state().await.unwrap();
        assert_eq!(state.build_state.artifacts["a"], COMPLETE);
        assert_eq!(state.build_state.status_code, StatusCode::BuildSuccess);
        handler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_returns_sequence() {
        let handler = EventHandler::spawn(HandlerConfig::default());
        assert_eq!(handler.handle(Event::deploy(IN_PROGRESS)).await.unwrap(), 0);
        assert_eq!(handler.handle(Event::deploy(COMPLETE)).await.unwrap(), 1);
        assert_eq!(handler.log_len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_port_scenario() {
        let handler = EventHandler::spawn(HandlerConfig::default());
        handler.handle(Event::port_forward(8080, 80, "service", "web")).await.unwrap();
        handler.handle(Event::port_forward(8080, 8080, "service", "web")).await.unwrap();

        let state = handler.get_state().await.unwrap();
        assert_eq!(state.forwarded_ports.len(), 1);
        assert_eq!(state.forwarded_ports[&8080].remote_port, 8080);
    }

    #[tokio::test]
    async fn test_malformed_event_never_reaches_store() {
        let handler = EventHandler::spawn(HandlerConfig::default());
        let err = handler.handle(Event::build("", IN_PROGRESS)).await.unwrap_err();
        assert!(matches!(err, HandlerError::Malformed(_)));
        assert!(handler.handle(Event::deploy("Exploded")).await.is_err());

        assert_eq!(handler.log_len().await.unwrap(), 0);
        assert_eq!(handler.get_state().await.unwrap(), State::default());
    }

    #[tokio::test]
    async fn test_unknown_error_fallback() {
        let handler = EventHandler::spawn(HandlerConfig::default());
        handler.handle(Event::deploy_failed("kaboom")).await.unwrap();

        let state = handler.get_state().await.unwrap();
        assert_eq!(state.deploy_state.status, FAILED);
        assert_eq!(state.deploy_state.status_code, StatusCode::DeployUnknown);

        let mut cursor = handler.events().await.unwrap();
        let logged = drain(&mut cursor, 1).await.remove(0);
        let err = logged.actionable_err().unwrap();
        assert_eq!(err.err_code, StatusCode::DeployUnknown);
        assert!(err.suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_known_error_is_classified() {
        let handler = EventHandler::spawn(HandlerConfig::default());
        handler
            .handle(Event::build_failed("app", "write /var/lib/docker: no space left on device"))
            .await
            .unwrap();

        let state = handler.get_state().await.unwrap();
        assert_eq!(state.build_state.status_code, StatusCode::BuildDockerNoSpaceErr);
    }

    #[tokio::test]
    async fn test_replay_equivalence() {
        let handler = EventHandler::spawn(HandlerConfig::default());
        let mut early = handler.events().await.unwrap();
        for n in 0..10 {
            handler.handle(Event::build(&format!("a{n}"), IN_PROGRESS)).await.unwrap();
        }
        let mut late = handler.events().await.unwrap();

        assert_eq!(drain(&mut early, 10).await, drain(&mut late, 10).await);
    }

    #[tokio::test]
    async fn test_subscribers_agree_on_order() {
        let handler = EventHandler::spawn(HandlerConfig::default());
        let mut first = handler.events().await.unwrap();
        let mut second = handler.events().await.unwrap();

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let handler = handler.clone();
                tokio::spawn(async move {
                    for n in 0..10 {
                        handler
                            .handle(Event::build(&format!("p{p}-{n}"), IN_PROGRESS))
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }

        let a = drain(&mut first, 40).await;
        let b = drain(&mut second, 40).await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_tail_only_cursor_skips_history() {
        let handler = EventHandler::spawn(HandlerConfig::default());
        handler.handle(Event::deploy(IN_PROGRESS)).await.unwrap();
        let mut cursor = handler.tail().await.unwrap();
        assert_eq!(cursor.position(), 1);

        handler.handle(Event::deploy(COMPLETE)).await.unwrap();
        assert_eq!(drain(&mut cursor, 1).await, vec![Event::deploy(COMPLETE)]);
    }

    #[tokio::test]
    #[allow(deprecated)]
    async fn test_event_log_is_tail_only() {
        let handler = EventHandler::spawn(HandlerConfig::default());
        handler.handle(Event::deploy(IN_PROGRESS)).await.unwrap();
        let cursor = handler.event_log().await.unwrap();
        assert_eq!(cursor.position(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_past_tail_is_rejected() {
        let handler = EventHandler::spawn(HandlerConfig::default());
        let err = handler.subscribe(3).await.unwrap_err();
        assert_eq!(err, HandlerError::CursorOutOfRange { from: 3, tail: 0 });
    }

    #[tokio::test]
    async fn test_slow_subscriber_isolation() {
        let handler = EventHandler::spawn(HandlerConfig {
            subscriber_buffer: 4,
            ..Default::default()
        });
        let mut slow = handler.events().await.unwrap();
        let mut fast = handler.events().await.unwrap();

        for n in 0..20 {
            handler.handle(Event::build(&format!("a{n}"), IN_PROGRESS)).await.unwrap();
            drain(&mut fast, 1).await;
        }

        // producer and the fast subscriber were never held up
        assert_eq!(handler.log_len().await.unwrap(), 20);
        assert_eq!(handler.subscriber_count().await.unwrap(), 1);

        drain(&mut slow, 4).await;
        assert!(matches!(slow.next().await, Some(Err(StreamError::SlowConsumer { .. }))));
    }

    #[tokio::test]
    async fn test_trigger_mirror() {
        let handler = EventHandler::spawn(HandlerConfig::default());
        handler
            .auto_execute(TriggerPhase::Sync, TriggerState { enabled: false })
            .await
            .unwrap();

        assert!(!handler.get_trigger(TriggerPhase::Sync).await.unwrap());
        let state = handler.get_state().await.unwrap();
        assert!(!state.file_sync_state.auto_trigger);
        assert!(state.build_state.auto_trigger);
        assert!(state.deploy_state.auto_trigger);
    }

    #[tokio::test]
    async fn test_trigger_last_write_wins() {
        let handler = EventHandler::spawn(HandlerConfig::default());
        assert!(handler.set_trigger(TriggerPhase::Deploy, false).await.unwrap());
        assert!(!handler.set_trigger(TriggerPhase::Deploy, false).await.unwrap());
        assert!(handler.set_trigger(TriggerPhase::Deploy, true).await.unwrap());
        assert!(handler.get_state().await.unwrap().deploy_state.auto_trigger);
    }

    #[tokio::test]
    async fn test_initial_config_is_reflected() {
        let handler = EventHandler::spawn(HandlerConfig {
            artifacts: vec!["app".to_string()],
            triggers: TriggerController::new(false, true, true),
            ..Default::default()
        });
        let state = handler.get_state().await.unwrap();
        assert!(!state.build_state.auto_trigger);
        assert_eq!(state.build_state.artifacts["app"], crate::events::NOT_STARTED);
        assert!(!handler.get_trigger(TriggerPhase::Build).await.unwrap());
    }

    #[tokio::test]
    async fn test_intent_exactly_once() {
        let handler = EventHandler::spawn(HandlerConfig::default());
        handler.execute(Intent {
            build: true,
            ..Default::default()
        });
        handler.wait_for_intent().await;
        assert!(handler.consume_intent(TriggerPhase::Build));
        assert!(!handler.consume_intent(TriggerPhase::Build));
        assert!(handler.pending_intents().is_empty());
    }

    #[tokio::test]
    async fn test_intent_shared_between_clones() {
        let handler = EventHandler::spawn(HandlerConfig::default());
        let driver = handler.clone();
        handler.execute(Intent {
            deploy: true,
            ..Default::default()
        });
        assert!(driver.consume_intent(TriggerPhase::Deploy));
    }

    #[tokio::test]
    async fn test_shutdown_ends_cursors() {
        let handler = EventHandler::spawn(HandlerConfig::default());
        handler.handle(Event::status_check(SUCCEEDED)).await.unwrap();
        let mut cursor = handler.events().await.unwrap();
        handler.shutdown().await.unwrap();

        assert!(cursor.next().await.unwrap().is_ok());
        let end = tokio::time::timeout(Duration::from_secs(1), cursor.next()).await.unwrap();
        assert!(end.is_none());
        assert_eq!(
            handler.handle(Event::deploy(IN_PROGRESS)).await,
            Err(HandlerError::ChannelError)
        );
    }

    #[test]
    fn test_blocking_handle_from_thread() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let handler = rt.block_on(async { EventHandler::spawn(HandlerConfig::default()) });

        let producer = handler.clone();
        let seq = std::thread::spawn(move || producer.blocking_handle(Event::deploy(COMPLETE)))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(seq, 0);

        let state = rt.block_on(handler.get_state()).unwrap();
        assert_eq!(state.deploy_state.status_code, StatusCode::DeploySuccess);
    }

    fn arb_status() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just(IN_PROGRESS), Just(COMPLETE), Just(FAILED), Just(SUCCEEDED)]
    }

    fn arb_event() -> impl Strategy<Value = Event> {
        prop_oneof![
            ("[abc]", arb_status()).prop_map(|(a, s)| Event::build(&a, if s == SUCCEEDED { COMPLETE } else { s })),
            arb_status().prop_map(|s| Event::deploy(if s == SUCCEEDED { COMPLETE } else { s })),
            arb_status().prop_map(|s| Event::status_check(if s == COMPLETE { SUCCEEDED } else { s })),
            ("[xy]", arb_status()).prop_map(|(r, s)| Event::resource_status_check(&r, s, "")),
            (1i32..4, 1i32..100).prop_map(|(l, r)| Event::port_forward(8000 + l, r, "service", "web")),
            ("[ab]", 0u32..5, arb_status()).prop_map(|(i, n, s)| Event::file_sync(&i, n, s)),
            (0u32..3, arb_status()).prop_map(|(i, s)| Event::dev_loop(i, s)),
            "[a-z ]{0,20}".prop_map(|e| Event::deploy_failed(&e)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// The live snapshot always equals a pure fold of the logged entries
        #[test]
        fn prop_fold_consistency(events in prop::collection::vec(arb_event(), 0..40)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let config = HandlerConfig::default();
                let initial = config.initial_state();
                let handler = EventHandler::spawn(config);
                for event in &events {
                    handler.handle(event.clone()).await.unwrap();
                }

                let live = handler.get_state().await.unwrap();
                let mut cursor = handler.events().await.unwrap();
                let logged = drain(&mut cursor, events.len()).await;
                assert_eq!(live, fold(initial, &logged));
            });
        }
    }
}
