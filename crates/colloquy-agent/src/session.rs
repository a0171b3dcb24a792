//! Session state management and send orchestration

use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;

use colloquy_ai::{
    ChatTransport, Message, Provider, RequestOptions, ResponseFormat, StreamEvent,
    StreamingSession, UsageRecord,
};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    compaction::{self, CompactionConfig},
    compose::{ComposeOptions, compose},
    conversation::{CompressionPolicy, Conversation, ConversationSummary},
    error::{Error, Result},
    events::SessionEvent,
    handle::{BusyGuard, SessionHandle},
    store::Store,
    usage::UsageState,
};

/// How long a finished stream's text stays readable before it is cleared
pub const DEFAULT_STREAM_GRACE: Duration = Duration::from_millis(300);

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Provider used for sends
    pub provider: Provider,
    /// Model identifier passed to the provider
    pub model: String,
    /// Maximum tokens per reply (provider default when unset)
    pub max_tokens: Option<u32>,
    pub temperature: f32,
    /// Inject the strict-format instruction into every request
    pub strict_mode: bool,
    /// Stream replies when the provider supports it
    pub use_streaming: bool,
    pub format: ResponseFormat,
    /// Window and block sizes; the window is shared with truncation
    pub compaction: CompactionConfig,
    pub stream_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            provider: Provider::GigaChat,
            model: Provider::GigaChat.default_model().to_string(),
            max_tokens: None,
            temperature: 0.0,
            strict_mode: false,
            use_streaming: false,
            format: ResponseFormat::Text,
            compaction: CompactionConfig::default(),
            stream_grace: DEFAULT_STREAM_GRACE,
        }
    }
}

/// One conversation: history, summaries, usage, and the transports it talks to
pub struct ChatSession {
    config: SessionConfig,
    policy: CompressionPolicy,
    conversation: Conversation,
    usage: UsageState,
    transports: HashMap<Provider, Arc<dyn ChatTransport>>,
    store: Arc<dyn Store>,
    streaming: Arc<Mutex<StreamingSession>>,
    stream_generation: Arc<AtomicU64>,
    event_tx: broadcast::Sender<SessionEvent>,
    handle: SessionHandle,
}

impl ChatSession {
    /// Create a session, resuming whatever the store holds
    pub fn new(mut config: SessionConfig, store: Arc<dyn Store>) -> Self {
        // A zero window would let summarization swallow the pending turn
        config.compaction.window_size = config.compaction.window_size.max(1);

        let conversation = Conversation::restore(store.load_messages(), store.load_summaries());
        let (event_tx, _) = broadcast::channel(256);

        Self {
            policy: store.load_compression_policy(),
            usage: store.load_usage(),
            conversation,
            config,
            transports: HashMap::new(),
            store,
            streaming: Arc::new(Mutex::new(StreamingSession::new())),
            stream_generation: Arc::new(AtomicU64::new(0)),
            event_tx,
            handle: SessionHandle::new(),
        }
    }

    /// Register a transport for the provider it reports
    pub fn with_transport(mut self, transport: Arc<dyn ChatTransport>) -> Self {
        self.add_transport(transport);
        self
    }

    /// Register (or replace) a transport for the provider it reports
    pub fn add_transport(&mut self, transport: Arc<dyn ChatTransport>) {
        self.transports.insert(transport.provider(), transport);
    }

    /// Providers with a registered transport
    pub fn available_providers(&self) -> Vec<Provider> {
        Provider::all()
            .into_iter()
            .filter(|p| self.transports.contains_key(p))
            .collect()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Get a cloneable handle for aborting and busy checks
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Abort the current send
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Whether a send is in flight
    pub fn is_busy(&self) -> bool {
        self.handle.is_busy()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn messages(&self) -> &[Message] {
        &self.conversation.messages
    }

    pub fn summaries(&self) -> &[ConversationSummary] {
        self.conversation.summaries()
    }

    pub fn compressed_through(&self) -> usize {
        self.conversation.compressed_through()
    }

    pub fn usage(&self) -> &UsageState {
        &self.usage
    }

    pub fn policy(&self) -> CompressionPolicy {
        self.policy
    }

    /// Snapshot of the streaming buffer
    pub fn streaming(&self) -> StreamingSession {
        self.streaming.lock().clone()
    }

    /// Change the compression policy and persist it
    pub fn set_policy(&mut self, policy: CompressionPolicy) {
        self.policy = policy;
        self.store.save_compression_policy(policy);
    }

    pub fn set_strict_mode(&mut self, enabled: bool) {
        self.config.strict_mode = enabled;
    }

    pub fn set_streaming(&mut self, enabled: bool) {
        self.config.use_streaming = enabled;
    }

    pub fn set_format(&mut self, format: ResponseFormat) {
        self.config.format = format;
    }

    pub fn set_max_tokens(&mut self, max_tokens: Option<u32>) {
        self.config.max_tokens = max_tokens;
    }

    pub fn set_temperature(&mut self, temperature: f32) {
        self.config.temperature = temperature;
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.config.model = model.into();
    }

    /// Switch provider. The model resets to the provider's default.
    pub fn set_provider(&mut self, provider: Provider) -> Result<()> {
        if !self.transports.contains_key(&provider) {
            return Err(Error::NoTransport(provider));
        }
        if self.config.provider != provider {
            self.config.provider = provider;
            self.config.model = provider.default_model().to_string();
        }
        Ok(())
    }

    /// The exact messages the next request would carry
    pub fn context(&self) -> Vec<Message> {
        compose(
            &self.conversation.messages,
            self.conversation.summaries(),
            self.conversation.compressed_through(),
            &self.compose_options(),
        )
    }

    /// Empty messages and summaries. Usage is kept.
    pub fn clear_conversation(&mut self) {
        self.conversation.clear();
        self.store.clear_messages();
        self.store.clear_summaries();
        self.stream_generation.fetch_add(1, Ordering::SeqCst);
        self.streaming.lock().reset();
        let _ = self.event_tx.send(SessionEvent::Cleared);
    }

    /// Zero the session usage of the current provider
    pub fn reset_session_usage(&mut self) {
        let provider = self.config.provider;
        self.usage.reset_session(provider);
        self.store.save_usage(&self.usage);
        let _ = self.event_tx.send(SessionEvent::UsageUpdated {
            provider,
            last_request: self.usage.last_request(provider),
        });
    }

    /// Send one user turn and return the assistant reply.
    ///
    /// Empty input is ignored (`Ok(None)`). On failure the user message is
    /// rolled back and the error is both stored on the conversation and
    /// returned. Dropping the returned future rolls the turn back as well.
    pub async fn send(&mut self, input: &str) -> Result<Option<Message>> {
        if input.is_empty() {
            return Ok(None);
        }

        let provider = self.config.provider;
        let transport = self
            .transports
            .get(&provider)
            .cloned()
            .ok_or(Error::NoTransport(provider))?;

        let cancel = self.handle.begin();
        let _busy = BusyGuard(self.handle.clone());

        self.conversation.is_loading = false;
        self.conversation.is_streaming = false;
        self.conversation.is_summarizing = false;
        self.conversation.error = None;
        self.conversation.messages.push(Message::user(input));
        let _ = self.event_tx.send(SessionEvent::SendStart);

        let mut turn = PendingTurn {
            session: self,
            settled: false,
        };
        let result = turn.session.run_turn(transport.as_ref(), &cancel).await;
        turn.settled = true;
        let outcome = turn.session.finish_turn(provider, result);

        let _ = turn.session.event_tx.send(SessionEvent::SendEnd);
        outcome
    }

    async fn run_turn(
        &mut self,
        transport: &dyn ChatTransport,
        cancel: &CancellationToken,
    ) -> Result<(Message, Option<UsageRecord>)> {
        if self.policy == CompressionPolicy::Summarize {
            self.run_compaction(transport, cancel).await;
        }

        let context = self.context();
        self.exchange(transport, &context, cancel).await
    }

    /// Commit the reply, or roll the pending user message back
    fn finish_turn(
        &mut self,
        provider: Provider,
        result: Result<(Message, Option<UsageRecord>)>,
    ) -> Result<Option<Message>> {
        self.conversation.is_loading = false;
        self.conversation.is_streaming = false;

        match result {
            Ok((message, usage)) => {
                self.conversation.messages.push(message.clone());
                self.store.save_messages(&self.conversation.messages);
                if let Some(usage) = usage {
                    self.record_usage(provider, &usage);
                }
                let _ = self.event_tx.send(SessionEvent::MessageEnd {
                    message: message.clone(),
                });
                Ok(Some(message))
            }
            Err(e) => {
                self.conversation.pop_uncompressed();
                let message = e.to_string();
                tracing::debug!("Send failed: {}", message);
                self.conversation.error = Some(message.clone());
                let _ = self.event_tx.send(SessionEvent::Error { message });
                Err(e)
            }
        }
    }

    /// Undo a turn whose future was dropped before it settled
    fn abandon_turn(&mut self) {
        tracing::debug!("Send dropped before completion; rolling back");
        self.conversation.pop_uncompressed();
        self.conversation.is_loading = false;
        self.conversation.is_streaming = false;
        self.conversation.is_summarizing = false;
        self.stream_generation.fetch_add(1, Ordering::SeqCst);
        self.streaming.lock().reset();
        let _ = self.event_tx.send(SessionEvent::SendEnd);
    }

    fn compose_options(&self) -> ComposeOptions {
        ComposeOptions {
            policy: self.policy,
            strict_mode: self.config.strict_mode,
            window_size: self.config.compaction.window_size,
        }
    }

    fn request_options(&self) -> RequestOptions {
        let mut options = RequestOptions::new(self.config.model.clone())
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature);
        options.format = self.config.format;
        options
    }

    fn record_usage(&mut self, provider: Provider, usage: &UsageRecord) {
        self.usage.merge(provider, usage);
        self.store.save_usage(&self.usage);
        let _ = self.event_tx.send(SessionEvent::UsageUpdated {
            provider,
            last_request: *usage,
        });
    }

    /// At most one summarization pass. Failures only degrade the context.
    async fn run_compaction(&mut self, transport: &dyn ChatTransport, cancel: &CancellationToken) {
        let count = self.conversation.messages.len();
        let cursor = self.conversation.compressed_through();
        if !compaction::needs_compaction(count, cursor, self.config.compaction.window_size) {
            return;
        }
        let Some(range) = compaction::select_block(count, cursor, &self.config.compaction) else {
            return;
        };

        self.conversation.is_summarizing = true;
        let _ = self.event_tx.send(SessionEvent::CompactionStart {
            messages: range.len(),
        });

        let block = self.conversation.messages[range].to_vec();
        let result = tokio::select! {
            _ = cancel.cancelled() => Err("Summarization aborted".to_string()),
            r = compaction::summarize_block(
                &block,
                &self.config.model,
                &self.config.compaction,
                transport,
            ) => r,
        };
        self.conversation.is_summarizing = false;

        match result.map_err(Error::Compaction) {
            Ok(result) => {
                let summarized = result.summary.original_message_count;
                if !self.conversation.record_summary(result.summary) {
                    return;
                }
                self.store.save_summaries(self.conversation.summaries());
                self.record_usage(transport.provider(), &result.usage);

                let compressed_through = self.conversation.compressed_through();
                tracing::info!(
                    "Summarized {} messages, compressed through {}",
                    summarized,
                    compressed_through
                );
                let _ = self.event_tx.send(SessionEvent::CompactionEnd {
                    summarized,
                    compressed_through,
                });
            }
            Err(e) => {
                tracing::warn!("{}; sending uncompressed context", e);
                let _ = self.event_tx.send(SessionEvent::CompactionFailed {
                    message: e.to_string(),
                });
            }
        }
    }

    /// One request/response round-trip, streamed when possible
    async fn exchange(
        &mut self,
        transport: &dyn ChatTransport,
        context: &[Message],
        cancel: &CancellationToken,
    ) -> Result<(Message, Option<UsageRecord>)> {
        let options = self.request_options();
        self.conversation.is_loading = true;

        if self.config.use_streaming && transport.supports_streaming() {
            return self.stream_exchange(transport, context, &options, cancel).await;
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(colloquy_ai::Error::Aborted.into()),
            r = transport.send(context, &options) => r?,
        };
        Ok((response.message, Some(response.usage)))
    }

    async fn stream_exchange(
        &mut self,
        transport: &dyn ChatTransport,
        context: &[Message],
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<(Message, Option<UsageRecord>)> {
        let generation = self.stream_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.streaming.lock().start();
        self.conversation.is_streaming = true;
        let _ = self.event_tx.send(SessionEvent::StreamStart);

        let opened = tokio::select! {
            _ = cancel.cancelled() => Err(colloquy_ai::Error::Aborted),
            r = transport.stream(context, options) => r,
        };
        let mut events = match opened {
            Ok(events) => events,
            Err(e) => {
                self.streaming.lock().reset();
                return Err(e.into());
            }
        };
        self.conversation.is_loading = false;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    self.streaming.lock().reset();
                    return Err(colloquy_ai::Error::Aborted.into());
                }
                e = events.next() => e,
            };
            // A stream that just stops counts as finished without usage
            let event = next.unwrap_or(StreamEvent::Done { usage: None });
            self.streaming.lock().apply(&event);

            match event {
                StreamEvent::Delta { text } => {
                    let _ = self.event_tx.send(SessionEvent::StreamDelta { text });
                }
                StreamEvent::Done { usage } => {
                    let message = self.streaming.lock().to_message();
                    self.schedule_stream_clear(generation);
                    return Ok((message, usage));
                }
                StreamEvent::Error { message } => {
                    return Err(colloquy_ai::Error::Sse(message).into());
                }
            }
        }
    }

    /// Clear the finished stream's buffer after the grace window, unless a
    /// newer stream has started since.
    fn schedule_stream_clear(&self, generation: u64) {
        let streaming = Arc::clone(&self.streaming);
        let current = Arc::clone(&self.stream_generation);
        let event_tx = self.event_tx.clone();
        let grace = self.config.stream_grace;

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if current.load(Ordering::SeqCst) == generation {
                streaming.lock().reset();
                let _ = event_tx.send(SessionEvent::StreamCleared);
            }
        });
    }
}

/// Rolls back a send whose future is dropped mid-flight
struct PendingTurn<'a> {
    session: &'a mut ChatSession,
    settled: bool,
}

impl Drop for PendingTurn<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.session.abandon_turn();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::STRICT_MODE_INSTRUCTION;
    use crate::conversation::ledger_total;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use colloquy_ai::{ChatEventStream, ChatResponse, Role};

    /// What the mock does for one call
    enum Reply {
        Text(&'static str, UsageRecord),
        Fail,
        Stream(Vec<StreamEvent>),
        Hang,
    }

    struct MockTransport {
        provider: Provider,
        streaming: bool,
        replies: Mutex<Vec<Reply>>,
        /// Every request as (messages, options)
        calls: Mutex<Vec<(Vec<Message>, RequestOptions)>>,
    }

    impl MockTransport {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                provider: Provider::GigaChat,
                streaming: false,
                replies: Mutex::new(replies),
                calls: Mutex::new(vec![]),
            })
        }

        fn streaming(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                provider: Provider::GigaChat,
                streaming: true,
                replies: Mutex::new(replies),
                calls: Mutex::new(vec![]),
            })
        }

        fn next_reply(&self, messages: &[Message], options: &RequestOptions) -> Reply {
            self.calls.lock().push((messages.to_vec(), options.clone()));
            let mut replies = self.replies.lock();
            if replies.is_empty() {
                Reply::Text("ok", UsageRecord::new(1, 1, 2))
            } else {
                replies.remove(0)
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        fn call(&self, idx: usize) -> (Vec<Message>, RequestOptions) {
            self.calls.lock()[idx].clone()
        }
    }

    #[async_trait]
    impl ChatTransport for MockTransport {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn send(
            &self,
            messages: &[Message],
            options: &RequestOptions,
        ) -> colloquy_ai::Result<ChatResponse> {
            match self.next_reply(messages, options) {
                Reply::Text(text, usage) => Ok(ChatResponse {
                    message: Message::assistant(text),
                    usage,
                }),
                Reply::Fail => Err(colloquy_ai::Error::api(500, "server error")),
                Reply::Hang => std::future::pending().await,
                Reply::Stream(_) => panic!("stream reply on blocking call"),
            }
        }

        fn supports_streaming(&self) -> bool {
            self.streaming
        }

        async fn stream(
            &self,
            messages: &[Message],
            options: &RequestOptions,
        ) -> colloquy_ai::Result<ChatEventStream> {
            match self.next_reply(messages, options) {
                Reply::Stream(events) => Ok(Box::pin(futures::stream::iter(events))),
                Reply::Fail => Err(colloquy_ai::Error::api(500, "server error")),
                Reply::Hang => Ok(Box::pin(async_stream::stream! {
                    yield StreamEvent::Delta { text: "partial".into() };
                    std::future::pending::<()>().await;
                })),
                Reply::Text(..) => panic!("blocking reply on stream call"),
            }
        }
    }

    fn session_with(transport: Arc<MockTransport>, store: Arc<MemoryStore>) -> ChatSession {
        ChatSession::new(SessionConfig::default(), store).with_transport(transport)
    }

    fn seeded_store(count: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let messages: Vec<Message> = (0..count)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("u{}", i))
                } else {
                    Message::assistant(format!("a{}", i))
                }
            })
            .collect();
        store.save_messages(&messages);
        store
    }

    fn assert_cursor_invariant(session: &ChatSession) {
        assert_eq!(session.compressed_through(), ledger_total(session.summaries()));
        assert!(session.compressed_through() <= session.messages().len());
    }

    #[tokio::test]
    async fn test_blocking_send_appends_reply_and_usage() {
        let transport = MockTransport::new(vec![Reply::Text("Hello!", UsageRecord::new(10, 5, 15))]);
        let store = Arc::new(MemoryStore::new());
        let mut session = session_with(transport.clone(), store.clone());

        let reply = session.send("Hi").await.unwrap();
        assert_eq!(reply, Some(Message::assistant("Hello!")));
        assert_eq!(
            session.messages(),
            &[Message::user("Hi"), Message::assistant("Hello!")]
        );
        assert_eq!(store.load_messages().len(), 2);
        assert_eq!(session.usage().last_request(Provider::GigaChat), UsageRecord::new(10, 5, 15));
        assert_eq!(store.load_usage(), *session.usage());
        assert!(!session.is_busy());
        assert!(!session.conversation().is_busy());
    }

    #[tokio::test]
    async fn test_empty_input_is_ignored() {
        let transport = MockTransport::new(vec![]);
        let mut session = session_with(transport.clone(), Arc::new(MemoryStore::new()));
        assert_eq!(session.send("").await.unwrap(), None);
        assert_eq!(transport.call_count(), 0);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_missing_transport() {
        let mut session = ChatSession::new(SessionConfig::default(), Arc::new(MemoryStore::new()));
        let err = session.send("hi").await.unwrap_err();
        assert!(matches!(err, Error::NoTransport(Provider::GigaChat)));
        assert!(session.messages().is_empty());
        assert!(session.set_provider(Provider::Yandex).is_err());
    }

    #[tokio::test]
    async fn test_transport_error_rolls_back_pending_turn() {
        let transport = MockTransport::new(vec![Reply::Fail]);
        let store = seeded_store(2);
        let mut session = session_with(transport, store.clone());
        let mut rx = session.subscribe();

        let err = session.send("doomed").await.unwrap_err();
        assert!(matches!(err, Error::Ai(colloquy_ai::Error::Api { status: 500, .. })));
        assert_eq!(session.messages().len(), 2);
        assert_eq!(store.load_messages().len(), 2);
        assert!(session.conversation().error.as_deref().unwrap().contains("server error"));
        assert!(session.usage().session(Provider::GigaChat).is_zero());
        assert!(!session.is_busy());

        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::Error { .. }) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_dropped_send_rolls_back_pending_turn() {
        let transport = MockTransport::new(vec![Reply::Hang]);
        let store = Arc::new(MemoryStore::new());
        let mut session = session_with(transport, store.clone());

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), session.send("dropped")).await;
        assert!(timed_out.is_err());
        assert!(session.messages().is_empty());
        assert!(!session.conversation().is_busy());
        assert!(!session.is_busy());

        session.send("next").await.unwrap();
        assert_eq!(
            store.load_messages(),
            vec![Message::user("next"), Message::assistant("ok")]
        );
    }

    #[tokio::test]
    async fn test_dropped_stream_discards_partial_text() {
        let transport = MockTransport::streaming(vec![Reply::Hang]);
        let mut session = session_with(transport, seeded_store(2));
        session.set_streaming(true);
        let mut rx = session.subscribe();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), session.send("dropped")).await;
        assert!(timed_out.is_err());
        assert_eq!(session.messages().len(), 2);
        assert!(!session.conversation().is_streaming);
        assert_eq!(session.streaming(), StreamingSession::default());

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(last, Some(SessionEvent::SendEnd));
    }

    #[tokio::test]
    async fn test_usage_aggregation_and_reset() {
        let transport = MockTransport::new(vec![
            Reply::Text("one", UsageRecord::new(10, 5, 15)),
            Reply::Text("two", UsageRecord::new(8, 3, 11)),
        ]);
        let mut session = session_with(transport, Arc::new(MemoryStore::new()));
        session.send("a").await.unwrap();
        session.send("b").await.unwrap();

        let usage = session.usage();
        assert_eq!(usage.session(Provider::GigaChat), UsageRecord::new(18, 8, 26));
        assert_eq!(usage.last_request(Provider::GigaChat), UsageRecord::new(8, 3, 11));

        session.reset_session_usage();
        assert!(session.usage().session(Provider::GigaChat).is_zero());
        assert_eq!(session.usage().lifetime(Provider::GigaChat), UsageRecord::new(18, 8, 26));
        assert_eq!(
            session.usage().last_request(Provider::GigaChat),
            UsageRecord::new(8, 3, 11)
        );
    }

    #[tokio::test]
    async fn test_summarize_schedule_one_block_per_turn() {
        // 24 stored + the new user turn = 25 uncompressed
        let transport = MockTransport::new(vec![
            Reply::Text("summary one", UsageRecord::default()),
            Reply::Text("reply one", UsageRecord::default()),
            Reply::Text("summary two", UsageRecord::default()),
            Reply::Text("reply two", UsageRecord::default()),
        ]);
        let store = seeded_store(24);
        store.save_compression_policy(CompressionPolicy::Summarize);
        let mut session = session_with(transport.clone(), store.clone());
        assert_eq!(session.policy(), CompressionPolicy::Summarize);

        session.send("u24").await.unwrap();
        // First pass folds [0, 10)
        let (summary_request, options) = transport.call(0);
        assert_eq!(summary_request.len(), 11);
        assert_eq!(summary_request[1], Message::user("u0"));
        assert_eq!(options.max_tokens, Some(500));
        assert_eq!(session.compressed_through(), 10);
        assert_eq!(session.summaries()[0].content, "summary one");
        assert_eq!(store.load_summaries().len(), 1);
        assert_cursor_invariant(&session);

        // The turn goes out as [summary] + messages[10..25]
        let (turn, _) = transport.call(1);
        assert_eq!(turn.len(), 16);
        assert_eq!(turn[0].role, Role::System);
        assert!(turn[0].content.contains("(part 1): summary one"));
        assert_eq!(turn[1], Message::user("u10"));

        // 27 messages with the next turn, 17 uncompressed: eligible 7
        session.send("u26").await.unwrap();
        let (summary_request, _) = transport.call(2);
        assert_eq!(summary_request.len(), 8);
        assert_eq!(summary_request[1], Message::user("u10"));
        assert_eq!(session.compressed_through(), 17);
        assert_eq!(session.messages().len(), 28);
        assert!(session.messages().len() - session.compressed_through() >= 10);
        assert_cursor_invariant(&session);
    }

    #[tokio::test]
    async fn test_no_compaction_within_window() {
        let transport = MockTransport::new(vec![]);
        let store = seeded_store(9);
        store.save_compression_policy(CompressionPolicy::Summarize);
        let mut session = session_with(transport.clone(), store);

        session.send("u9").await.unwrap();
        assert_eq!(transport.call_count(), 1);
        assert!(session.summaries().is_empty());
    }

    #[tokio::test]
    async fn test_compaction_failure_sends_uncompressed() {
        let transport = MockTransport::new(vec![
            Reply::Fail,
            Reply::Text("still answered", UsageRecord::default()),
        ]);
        let store = seeded_store(12);
        store.save_compression_policy(CompressionPolicy::Summarize);
        let mut session = session_with(transport.clone(), store);
        let mut rx = session.subscribe();

        let reply = session.send("u12").await.unwrap();
        assert_eq!(reply, Some(Message::assistant("still answered")));
        assert_eq!(session.compressed_through(), 0);
        assert!(session.summaries().is_empty());
        assert!(session.conversation().error.is_none());

        let (turn, _) = transport.call(1);
        assert_eq!(turn.len(), 13);

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.iter().any(|e| matches!(e, SessionEvent::CompactionFailed { .. })));
    }

    #[tokio::test]
    async fn test_empty_summary_is_a_failure() {
        let transport = MockTransport::new(vec![
            Reply::Text("", UsageRecord::default()),
            Reply::Text("answer", UsageRecord::default()),
        ]);
        let store = seeded_store(14);
        store.save_compression_policy(CompressionPolicy::Summarize);
        let mut session = session_with(transport, store);

        session.send("u14").await.unwrap();
        assert_eq!(session.compressed_through(), 0);
        assert_cursor_invariant(&session);
    }

    #[tokio::test]
    async fn test_failed_turn_keeps_committed_summary() {
        let transport = MockTransport::new(vec![
            Reply::Text("kept summary", UsageRecord::default()),
            Reply::Fail,
        ]);
        let store = seeded_store(14);
        store.save_compression_policy(CompressionPolicy::Summarize);
        let mut session = session_with(transport, store.clone());

        assert!(session.send("u14").await.is_err());
        assert_eq!(session.messages().len(), 14);
        assert_eq!(session.compressed_through(), 5);
        assert_eq!(store.load_summaries().len(), 1);
        assert_cursor_invariant(&session);
    }

    #[tokio::test]
    async fn test_truncate_policy_sends_window() {
        let transport = MockTransport::new(vec![]);
        let store = seeded_store(20);
        let mut session = session_with(transport.clone(), store);
        session.set_policy(CompressionPolicy::Truncate);

        session.send("u20").await.unwrap();
        let (turn, _) = transport.call(0);
        // Last 10 of 21 start at index 11 (assistant), so the head moves to 12
        assert_eq!(turn.len(), 9);
        assert_eq!(turn[0], Message::user("u12"));
    }

    #[tokio::test]
    async fn test_strict_mode_is_never_persisted() {
        let transport = MockTransport::new(vec![]);
        let store = Arc::new(MemoryStore::new());
        let mut session = session_with(transport.clone(), store.clone());
        session.set_strict_mode(true);

        session.send("q").await.unwrap();
        let (turn, _) = transport.call(0);
        assert_eq!(turn[0], Message::system(STRICT_MODE_INSTRUCTION));
        assert!(store
            .load_messages()
            .iter()
            .all(|m| m.content != STRICT_MODE_INSTRUCTION));
    }

    #[tokio::test]
    async fn test_clear_keeps_usage() {
        let transport = MockTransport::new(vec![
            Reply::Text("s", UsageRecord::new(2, 2, 4)),
            Reply::Text("r", UsageRecord::new(10, 5, 15)),
        ]);
        let store = seeded_store(12);
        store.save_compression_policy(CompressionPolicy::Summarize);
        let mut session = session_with(transport, store.clone());
        session.send("u12").await.unwrap();
        assert!(!session.summaries().is_empty());

        let usage_before = session.usage().clone();
        session.clear_conversation();

        assert!(session.messages().is_empty());
        assert!(session.summaries().is_empty());
        assert_eq!(session.compressed_through(), 0);
        assert_eq!(*session.usage(), usage_before);
        assert!(store.load_messages().is_empty());
        assert!(store.load_summaries().is_empty());
        assert_eq!(store.load_usage(), usage_before);
    }

    #[tokio::test]
    async fn test_resume_discards_inconsistent_ledger() {
        let store = seeded_store(4);
        store.save_summaries(&[ConversationSummary::new("stale", 12)]);
        let session = session_with(MockTransport::new(vec![]), store);
        assert_eq!(session.compressed_through(), 0);
        assert!(session.summaries().is_empty());
        assert_eq!(session.messages().len(), 4);
    }

    #[tokio::test]
    async fn test_streaming_send() {
        let transport = MockTransport::streaming(vec![Reply::Stream(vec![
            StreamEvent::Delta { text: "Hi".into() },
            StreamEvent::Delta { text: " there".into() },
            StreamEvent::Done {
                usage: Some(UsageRecord::new(5, 2, 7)),
            },
        ])]);
        let mut session = session_with(transport, Arc::new(MemoryStore::new()));
        session.set_streaming(true);
        let mut rx = session.subscribe();

        let reply = session.send("hello").await.unwrap();
        assert_eq!(reply, Some(Message::assistant("Hi there")));
        assert_eq!(session.usage().last_request(Provider::GigaChat), UsageRecord::new(5, 2, 7));

        let streaming = session.streaming();
        assert!(streaming.is_complete());
        assert_eq!(streaming.text(), "Hi there");

        let deltas: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                SessionEvent::StreamDelta { text } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec!["Hi", " there"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_buffer_cleared_after_grace() {
        let transport = MockTransport::streaming(vec![Reply::Stream(vec![
            StreamEvent::Delta { text: "done".into() },
            StreamEvent::Done { usage: None },
        ])]);
        let mut session = session_with(transport, Arc::new(MemoryStore::new()));
        session.set_streaming(true);

        session.send("go").await.unwrap();
        assert_eq!(session.streaming().text(), "done");
        // No usage reported, totals untouched
        assert!(session.usage().lifetime(Provider::GigaChat).is_zero());

        tokio::time::sleep(DEFAULT_STREAM_GRACE + Duration::from_millis(50)).await;
        assert_eq!(session.streaming(), StreamingSession::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_stream_survives_old_grace_timer() {
        let transport = MockTransport::streaming(vec![
            Reply::Stream(vec![
                StreamEvent::Delta { text: "first".into() },
                StreamEvent::Done { usage: None },
            ]),
            Reply::Stream(vec![
                StreamEvent::Delta { text: "second".into() },
                StreamEvent::Done { usage: None },
            ]),
        ]);
        let mut session = session_with(transport, Arc::new(MemoryStore::new()));
        session.set_streaming(true);

        session.send("one").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        session.send("two").await.unwrap();
        // First timer fires here but belongs to an older stream
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(session.streaming().text(), "second");
    }

    #[tokio::test]
    async fn test_stream_error_discards_buffer() {
        let transport = MockTransport::streaming(vec![Reply::Stream(vec![
            StreamEvent::Delta { text: "par".into() },
            StreamEvent::Error {
                message: "connection reset".into(),
            },
        ])]);
        let mut session = session_with(transport, Arc::new(MemoryStore::new()));
        session.set_streaming(true);

        let err = session.send("go").await.unwrap_err();
        assert!(matches!(err, Error::Ai(colloquy_ai::Error::Sse(_))));
        assert_eq!(session.streaming(), StreamingSession::default());
        assert!(session.messages().is_empty());
        assert!(!session.conversation().is_streaming);
    }

    #[tokio::test]
    async fn test_streaming_falls_back_to_blocking() {
        let transport = MockTransport::new(vec![Reply::Text("blocking", UsageRecord::default())]);
        let mut session = session_with(transport, Arc::new(MemoryStore::new()));
        session.set_streaming(true);
        let reply = session.send("go").await.unwrap();
        assert_eq!(reply, Some(Message::assistant("blocking")));
    }

    #[tokio::test]
    async fn test_abort_blocking_send() {
        let transport = MockTransport::new(vec![Reply::Hang]);
        let mut session = session_with(transport, Arc::new(MemoryStore::new()));
        let handle = session.handle();

        let aborter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(handle.is_busy());
            handle.abort();
        });

        let err = session.send("wait").await.unwrap_err();
        assert!(err.is_aborted());
        assert!(session.messages().is_empty());
        assert!(!session.is_busy());
        aborter.await.unwrap();
    }

    #[tokio::test]
    async fn test_abort_stream_mid_flight() {
        let transport = MockTransport::streaming(vec![Reply::Hang]);
        let mut session = session_with(transport, Arc::new(MemoryStore::new()));
        session.set_streaming(true);
        let handle = session.handle();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.abort();
        });

        let err = session.send("wait").await.unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(session.streaming(), StreamingSession::default());
    }

    #[tokio::test]
    async fn test_request_options_follow_config() {
        let transport = MockTransport::new(vec![]);
        let mut session = session_with(transport.clone(), Arc::new(MemoryStore::new()));
        session.set_model("GigaChat-2-Max");
        session.set_max_tokens(Some(256));
        session.set_temperature(0.7);
        session.set_format(ResponseFormat::Json);

        session.send("q").await.unwrap();
        let (_, options) = transport.call(0);
        assert_eq!(options.model, "GigaChat-2-Max");
        assert_eq!(options.max_tokens, Some(256));
        assert_eq!(options.temperature, 0.7);
        assert_eq!(options.format, ResponseFormat::Json);
    }

    #[tokio::test]
    async fn test_set_policy_persists() {
        let store = Arc::new(MemoryStore::new());
        let mut session = session_with(MockTransport::new(vec![]), store.clone());
        session.set_policy(CompressionPolicy::Truncate);
        assert_eq!(store.load_compression_policy(), CompressionPolicy::Truncate);
    }

    #[tokio::test]
    async fn test_compose_idempotent_through_session() {
        let store = seeded_store(30);
        store.save_summaries(&[ConversationSummary::new("s", 10)]);
        store.save_compression_policy(CompressionPolicy::Summarize);
        let session = session_with(MockTransport::new(vec![]), store);
        assert_eq!(session.context(), session.context());
        assert_eq!(session.context().len(), 21);
    }
}
