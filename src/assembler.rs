//! Block assembly for the incremental event stream.
//!
//! The Messages API streams a response as content blocks identified by a
//! numeric index: a `content_block_start` opens a block, any number of
//! `content_block_delta` events extend it, and a `content_block_stop` closes
//! it. Text blocks are forwarded incrementally; tool-use blocks buffer their
//! partial-JSON input until the block closes, for example:
//!
//! ```text
//! content_block_start  index=1  tool_use name="render_surface"
//! content_block_delta  index=1  input_json_delta "{\"surf"
//! content_block_delta  index=1  input_json_delta "aceId\":\"s1\"}"
//! content_block_stop   index=1
//! ```
//!
//! The [`BlockAssembler`] accumulates these fragments and emits a completed
//! [`ToolInvocation`] when the stop event arrives, but only when the buffer
//! parses as JSON and the tool-name-keyed [`ToolRegistry`] recognizes the
//! name. Malformed buffers, empty buffers, and unknown names are dropped
//! without raising — a corrupt tool call must not take down the text that
//! streamed alongside it.
//!
//! Indexes may be reused across non-overlapping block lifetimes (a stop
//! followed by a new start at the same index); entries are deleted on stop
//! so the map stays bounded.

use crate::types::{ContentDelta, StartedBlock, StreamEvent, StreamItem, ToolInvocation};
use std::collections::HashMap;
use std::sync::Arc;

/// Parser for one tool's raw input; returning `None` drops the invocation.
pub type ToolParser = Arc<dyn Fn(serde_json::Value) -> Option<serde_json::Value> + Send + Sync>;

/// Name-keyed dispatch table for tool input parsers.
///
/// The registry is supplied by the consumer: it decides which tool names the
/// pipeline surfaces at all, and how their raw JSON input is shaped before a
/// [`ToolInvocation`] is emitted. Unrecognized names yield nothing.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    parsers: HashMap<String, ToolParser>,
}

impl ToolRegistry {
    /// Create an empty registry (every tool name is unknown)
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parser for `name`
    pub fn register<F>(&mut self, name: impl Into<String>, parser: F)
    where
        F: Fn(serde_json::Value) -> Option<serde_json::Value> + Send + Sync + 'static,
    {
        self.parsers.insert(name.into(), Arc::new(parser));
    }

    /// Register `name` with an identity parser that accepts any input
    pub fn register_passthrough(&mut self, name: impl Into<String>) {
        self.register(name, Some);
    }

    /// Whether `name` has a registered parser
    pub fn contains(&self, name: &str) -> bool {
        self.parsers.contains_key(name)
    }

    /// Run the parser for `name`, if one is registered
    pub fn parse(&self, name: &str, input: serde_json::Value) -> Option<serde_json::Value> {
        self.parsers.get(name).and_then(|parser| parser(input))
    }

    /// Registered tool names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parsers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.parsers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Pluggable seam for external schema validation of tool inputs.
///
/// Validation itself is a collaborator concern; the pipeline only provides
/// the hook. The default implementation accepts everything.
#[async_trait::async_trait]
pub trait ToolInputValidator: Send + Sync {
    async fn validate(&self, name: &str, input: &serde_json::Value) -> crate::Result<()>;
}

/// Validator that approves every input
pub struct AcceptAllValidator;

#[async_trait::async_trait]
impl ToolInputValidator for AcceptAllValidator {
    async fn validate(&self, _name: &str, _input: &serde_json::Value) -> crate::Result<()> {
        Ok(())
    }
}

/// Per-index accumulator state. Created on start, consumed on stop.
#[derive(Debug)]
enum BlockAccumulator {
    /// A text run; deltas are forwarded immediately, nothing buffers here
    Text,
    /// A tool call whose JSON input grows across deltas
    ToolUse { name: String, buffer: String },
    /// A block kind this client does not understand; deltas are swallowed
    Opaque,
}

/// Assembles raw stream events into text chunks and tool invocations.
///
/// This is a pure, single-threaded state machine: exactly one event is
/// processed at a time, in arrival order, and outputs are yielded in the
/// same relative order as the events that produced them. The accumulator
/// map is owned exclusively by the assembler for the lifetime of one
/// logical request; [`BlockAssembler::reset`] clears it between requests
/// (never mid-stream).
pub struct BlockAssembler {
    accumulators: HashMap<usize, BlockAccumulator>,
    registry: Arc<ToolRegistry>,
}

impl BlockAssembler {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            accumulators: HashMap::new(),
            registry,
        }
    }

    /// Drop all in-flight accumulators, readying the assembler for a fresh
    /// logical request.
    pub fn reset(&mut self) {
        self.accumulators.clear();
    }

    /// Process one event, returning any items it completed.
    ///
    /// Text deltas yield immediately (one [`StreamItem::Text`] per delta, in
    /// arrival order). Tool invocations yield on `content_block_stop`, and
    /// only when the accumulated buffer is non-empty, parses as JSON, and
    /// the registry recognizes the tool name. Every tolerated anomaly —
    /// unmatched index, malformed buffer, unknown name — is a no-op, never
    /// an error.
    pub fn process_event(&mut self, event: StreamEvent) -> Vec<StreamItem> {
        match event {
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let accumulator = match content_block {
                    StartedBlock::Text { .. } => BlockAccumulator::Text,
                    StartedBlock::ToolUse { name, .. } => BlockAccumulator::ToolUse {
                        name,
                        buffer: String::new(),
                    },
                    StartedBlock::Unknown => BlockAccumulator::Opaque,
                };
                self.accumulators.insert(index, accumulator);
                Vec::new()
            }

            StreamEvent::ContentBlockDelta { index, delta } => {
                let Some(accumulator) = self.accumulators.get_mut(&index) else {
                    // Delta for an index we never opened; tolerated.
                    tracing::debug!(index, "delta for unknown block index, ignoring");
                    return Vec::new();
                };

                match (accumulator, delta) {
                    (BlockAccumulator::Text, ContentDelta::TextDelta { text }) => {
                        // Text streams through immediately, it is never
                        // buffered to completion.
                        vec![StreamItem::Text(text)]
                    }
                    (
                        BlockAccumulator::ToolUse { buffer, .. },
                        ContentDelta::InputJsonDelta { partial_json },
                    ) => {
                        buffer.push_str(&partial_json);
                        Vec::new()
                    }
                    // Mismatched delta kind or an opaque block: swallow.
                    _ => Vec::new(),
                }
            }

            StreamEvent::ContentBlockStop { index } => {
                let Some(accumulator) = self.accumulators.remove(&index) else {
                    tracing::debug!(index, "stop for unknown block index, ignoring");
                    return Vec::new();
                };

                match accumulator {
                    BlockAccumulator::ToolUse { name, buffer } => {
                        self.finish_tool_block(&name, &buffer)
                    }
                    BlockAccumulator::Text | BlockAccumulator::Opaque => Vec::new(),
                }
            }

            // Message lifecycle events carry no block content.
            StreamEvent::MessageStart { .. }
            | StreamEvent::MessageDelta { .. }
            | StreamEvent::MessageStop
            | StreamEvent::Ping
            | StreamEvent::Error { .. }
            | StreamEvent::Unknown => Vec::new(),
        }
    }

    /// Close out a tool block: parse the buffer and dispatch through the
    /// registry. All failure paths drop silently.
    fn finish_tool_block(&self, name: &str, buffer: &str) -> Vec<StreamItem> {
        if buffer.is_empty() {
            tracing::debug!(tool = name, "tool block closed with empty input, dropping");
            return Vec::new();
        }

        let raw: serde_json::Value = match serde_json::from_str(buffer) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(tool = name, %err, "tool input was not valid JSON, dropping");
                return Vec::new();
            }
        };

        match self.registry.parse(name, raw) {
            Some(input) => vec![StreamItem::ToolUse(ToolInvocation::new(name, input))],
            None => {
                tracing::debug!(tool = name, "tool not registered or parser declined, dropping");
                Vec::new()
            }
        }
    }

    /// Number of blocks currently open (diagnostics only)
    pub fn open_blocks(&self) -> usize {
        self.accumulators.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with(names: &[&str]) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        for name in names {
            registry.register_passthrough(*name);
        }
        Arc::new(registry)
    }

    fn text_start(index: usize) -> StreamEvent {
        StreamEvent::ContentBlockStart {
            index,
            content_block: StartedBlock::Text {
                text: String::new(),
            },
        }
    }

    fn tool_start(index: usize, name: &str) -> StreamEvent {
        StreamEvent::ContentBlockStart {
            index,
            content_block: StartedBlock::ToolUse {
                id: format!("toolu_{index}"),
                name: name.to_string(),
            },
        }
    }

    fn text_delta(index: usize, text: &str) -> StreamEvent {
        StreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::TextDelta {
                text: text.to_string(),
            },
        }
    }

    fn json_delta(index: usize, fragment: &str) -> StreamEvent {
        StreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::InputJsonDelta {
                partial_json: fragment.to_string(),
            },
        }
    }

    fn stop(index: usize) -> StreamEvent {
        StreamEvent::ContentBlockStop { index }
    }

    #[test]
    fn test_text_deltas_stream_in_arrival_order() {
        let mut assembler = BlockAssembler::new(registry_with(&[]));

        assert!(assembler.process_event(text_start(0)).is_empty());

        let mut chunks = Vec::new();
        for fragment in ["Hel", "lo ", "World!"] {
            let items = assembler.process_event(text_delta(0, fragment));
            assert_eq!(items.len(), 1);
            match &items[0] {
                StreamItem::Text(text) => chunks.push(text.clone()),
                other => panic!("expected text chunk, got {:?}", other),
            }
        }

        assert_eq!(chunks, vec!["Hel", "lo ", "World!"]);
        assert_eq!(chunks.concat(), "Hello World!");
        assert!(assembler.process_event(stop(0)).is_empty());
        assert_eq!(assembler.open_blocks(), 0);
    }

    #[test]
    fn test_tool_block_assembles_fragmented_json() {
        let mut assembler = BlockAssembler::new(registry_with(&["render_surface"]));

        assembler.process_event(tool_start(1, "render_surface"));
        assert!(assembler.process_event(json_delta(1, r#"{"surf"#)).is_empty());
        assert!(
            assembler
                .process_event(json_delta(1, r#"aceId":"s1"}"#))
                .is_empty()
        );

        let items = assembler.process_event(stop(1));
        assert_eq!(items.len(), 1);
        match &items[0] {
            StreamItem::ToolUse(invocation) => {
                assert_eq!(invocation.name, "render_surface");
                assert_eq!(invocation.input, json!({"surfaceId": "s1"}));
            }
            other => panic!("expected tool invocation, got {:?}", other),
        }
    }

    #[test]
    fn test_unregistered_tool_name_yields_nothing() {
        let mut assembler = BlockAssembler::new(registry_with(&[]));

        assembler.process_event(tool_start(0, "mystery_tool"));
        assembler.process_event(json_delta(0, r#"{"a":1}"#));
        assert!(assembler.process_event(stop(0)).is_empty());
    }

    #[test]
    fn test_empty_tool_buffer_yields_nothing() {
        let mut assembler = BlockAssembler::new(registry_with(&["render_surface"]));

        assembler.process_event(tool_start(0, "render_surface"));
        assert!(assembler.process_event(stop(0)).is_empty());
    }

    #[test]
    fn test_malformed_tool_json_drops_silently() {
        let mut assembler = BlockAssembler::new(registry_with(&["render_surface"]));

        assembler.process_event(tool_start(0, "render_surface"));
        assembler.process_event(json_delta(0, r#"{"surfaceId": "#));
        // Buffer never completed; stop must not panic or error.
        assert!(assembler.process_event(stop(0)).is_empty());
    }

    #[test]
    fn test_parser_can_reshape_or_decline_input() {
        let mut registry = ToolRegistry::new();
        registry.register("strict_tool", |input| {
            input.get("surfaceId").is_some().then_some(input)
        });
        let registry = Arc::new(registry);

        let mut assembler = BlockAssembler::new(registry.clone());
        assembler.process_event(tool_start(0, "strict_tool"));
        assembler.process_event(json_delta(0, r#"{"other":"x"}"#));
        assert!(assembler.process_event(stop(0)).is_empty());

        let mut assembler = BlockAssembler::new(registry);
        assembler.process_event(tool_start(0, "strict_tool"));
        assembler.process_event(json_delta(0, r#"{"surfaceId":"s1"}"#));
        assert_eq!(assembler.process_event(stop(0)).len(), 1);
    }

    #[test]
    fn test_unmatched_delta_and_stop_are_noops() {
        let mut assembler = BlockAssembler::new(registry_with(&[]));

        assert!(assembler.process_event(text_delta(7, "orphan")).is_empty());
        assert!(assembler.process_event(stop(7)).is_empty());
    }

    #[test]
    fn test_index_reuse_after_stop() {
        let mut assembler = BlockAssembler::new(registry_with(&["tool_a", "tool_b"]));

        assembler.process_event(tool_start(0, "tool_a"));
        assembler.process_event(json_delta(0, r#"{"n":1}"#));
        let first = assembler.process_event(stop(0));
        assert_eq!(first.len(), 1);

        // Same index, new lifetime: state must not leak between blocks.
        assembler.process_event(tool_start(0, "tool_b"));
        assembler.process_event(json_delta(0, r#"{"n":2}"#));
        let second = assembler.process_event(stop(0));
        assert_eq!(second.len(), 1);
        match &second[0] {
            StreamItem::ToolUse(invocation) => {
                assert_eq!(invocation.name, "tool_b");
                assert_eq!(invocation.input, json!({"n": 2}));
            }
            other => panic!("expected tool invocation, got {:?}", other),
        }
    }

    #[test]
    fn test_interleaved_blocks_preserve_close_order() {
        let mut assembler = BlockAssembler::new(registry_with(&["tool_a", "tool_b"]));

        assembler.process_event(tool_start(0, "tool_a"));
        assembler.process_event(tool_start(1, "tool_b"));
        assembler.process_event(json_delta(0, r#"{"a":1}"#));
        assembler.process_event(json_delta(1, r#"{"b":2}"#));

        // Block 1 closes before block 0; outputs must follow close order.
        let first = assembler.process_event(stop(1));
        let second = assembler.process_event(stop(0));
        match (&first[0], &second[0]) {
            (StreamItem::ToolUse(b), StreamItem::ToolUse(a)) => {
                assert_eq!(b.name, "tool_b");
                assert_eq!(a.name, "tool_a");
            }
            other => panic!("expected two tool invocations, got {:?}", other),
        }
    }

    #[test]
    fn test_text_and_tool_interleaved() {
        let mut assembler = BlockAssembler::new(registry_with(&["render_surface"]));

        assembler.process_event(text_start(0));
        let items = assembler.process_event(text_delta(0, "Before the tool. "));
        assert_eq!(items, vec![StreamItem::Text("Before the tool. ".into())]);
        assembler.process_event(stop(0));

        assembler.process_event(tool_start(1, "render_surface"));
        assembler.process_event(json_delta(1, r#"{"surfaceId":"s1"}"#));
        let items = assembler.process_event(stop(1));
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_reset_clears_in_flight_state() {
        let mut assembler = BlockAssembler::new(registry_with(&["render_surface"]));

        assembler.process_event(tool_start(0, "render_surface"));
        assembler.process_event(json_delta(0, r#"{"surfaceId":"s1"}"#));
        assert_eq!(assembler.open_blocks(), 1);

        assembler.reset();
        assert_eq!(assembler.open_blocks(), 0);
        // A stop after reset has nothing to close.
        assert!(assembler.process_event(stop(0)).is_empty());
    }

    #[test]
    fn test_message_lifecycle_events_produce_nothing() {
        let mut assembler = BlockAssembler::new(registry_with(&[]));

        assert!(
            assembler
                .process_event(StreamEvent::MessageStart {
                    message: json!({"id": "msg_1"})
                })
                .is_empty()
        );
        assert!(assembler.process_event(StreamEvent::Ping).is_empty());
        assert!(assembler.process_event(StreamEvent::MessageStop).is_empty());
    }

    #[test]
    fn test_unknown_block_kind_swallows_deltas() {
        let mut assembler = BlockAssembler::new(registry_with(&[]));

        assembler.process_event(StreamEvent::ContentBlockStart {
            index: 0,
            content_block: StartedBlock::Unknown,
        });
        assert!(assembler.process_event(text_delta(0, "ignored")).is_empty());
        assert!(assembler.process_event(stop(0)).is_empty());
    }
}
