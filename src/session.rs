//! Invocation driver.
//!
//! A `Relay` owns at most one running invocation. Each invocation gets its
//! own decoder, dispatcher, pacing queue and reassembler; nothing is shared
//! between invocations except the presentation channel.

use crate::config::Config;
use crate::dispatch::{Dispatcher, MetricsSample, ToolInvocationEvent};
use crate::error::{Error, Result};
use crate::frame::{Decoded, FrameDecoder};
use crate::pacing::PacingQueue;
use crate::present::PresentEvent;
use crate::reassemble::{Reassembler, Segment};
use crate::transport::{Connector, InvocationParams, TransportError};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The producer sent the done marker.
    Done,
    /// The connection closed without a done marker.
    Closed,
    Cancelled,
}

/// Everything one invocation produced.
#[derive(Debug)]
pub struct Transcript {
    pub raw_text: String,
    pub segments: Vec<Segment>,
    pub tool_log: Vec<ToolInvocationEvent>,
    pub metrics: Option<MetricsSample>,
    pub status: Option<String>,
    pub final_answer: Option<String>,
    pub caption: Option<String>,
    pub outcome: Outcome,
}

impl Transcript {
    pub fn visible_text(&self) -> String {
        self.segments.iter().map(ToString::to_string).collect()
    }
}

/// Cancels one invocation from another task (e.g. a Ctrl-C handler).
#[derive(Debug, Clone)]
pub struct Canceller {
    cancel: CancellationToken,
    purge: CancellationToken,
    hard: bool,
}

impl Canceller {
    /// Stop reading frames. Queued text still drains unless hard cancel is
    /// configured.
    pub fn cancel(&self) {
        if self.hard {
            self.purge.cancel();
        }
        self.cancel.cancel();
    }
}

struct Invocation {
    cancel: CancellationToken,
    purge: CancellationToken,
    handle: JoinHandle<Result<Transcript>>,
}

pub struct Relay<C: Connector> {
    connector: Arc<C>,
    config: Config,
    events: mpsc::UnboundedSender<PresentEvent>,
    active: Option<Invocation>,
}

impl<C: Connector> Relay<C> {
    pub fn new(connector: C, config: Config, events: mpsc::UnboundedSender<PresentEvent>) -> Self {
        Self {
            connector: Arc::new(connector),
            config,
            events,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Start an invocation. A running one is hard-cancelled and awaited
    /// first, so two invocations never write to the surface at once.
    pub async fn start(&mut self, params: InvocationParams) {
        if let Some(prior) = self.active.take() {
            debug!("Superseding running invocation");
            prior.purge.cancel();
            prior.cancel.cancel();
            match prior.handle.await {
                Ok(Ok(transcript)) => {
                    debug!(outcome = ?transcript.outcome, "Superseded invocation ended");
                }
                Ok(Err(e)) => debug!("Superseded invocation failed: {e}"),
                Err(e) => warn!("Superseded invocation task failed: {e}"),
            }
        }

        let cancel = CancellationToken::new();
        let purge = CancellationToken::new();
        let handle = tokio::spawn(run_invocation(
            Arc::clone(&self.connector),
            params,
            self.config.clone(),
            self.events.clone(),
            cancel.clone(),
            purge.clone(),
        ));
        self.active = Some(Invocation {
            cancel,
            purge,
            handle,
        });
    }

    pub fn canceller(&self) -> Option<Canceller> {
        self.active.as_ref().map(|inv| Canceller {
            cancel: inv.cancel.clone(),
            purge: inv.purge.clone(),
            hard: self.config.pacing.hard_cancel,
        })
    }

    pub fn cancel(&self) {
        if let Some(canceller) = self.canceller() {
            canceller.cancel();
        }
    }

    /// Wait for the running invocation to finish, including its pacing
    /// drain.
    pub async fn wait(&mut self) -> Result<Transcript> {
        let invocation = self.active.take().ok_or(Error::Idle)?;
        invocation.handle.await?
    }
}

async fn run_invocation<C: Connector>(
    connector: Arc<C>,
    params: InvocationParams,
    config: Config,
    events: mpsc::UnboundedSender<PresentEvent>,
    cancel: CancellationToken,
    purge: CancellationToken,
) -> Result<Transcript> {
    let _ = events.send(PresentEvent::Started {
        agent_id: params.agent_id.clone(),
        thread_id: params.thread_id.clone(),
    });

    let mut dispatcher = Dispatcher::new(events.clone());
    let pacing = PacingQueue::spawn(
        Reassembler::new(config.reassembly.max_block_chars),
        events.clone(),
        config.pacing.clone(),
        purge,
    );

    let read = read_stream(connector.as_ref(), &params, &mut dispatcher, &pacing, &cancel).await;

    let outcome = match read {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(agent = %params.agent_id, "Invocation failed: {e}");
            pacing.purge();
            pacing.finish().await?;
            // After the flush so the failure is the last thing shown.
            let _ = events.send(PresentEvent::Failed(e.to_string()));
            let _ = events.send(PresentEvent::Finished);
            return Err(e.into());
        }
    };

    let reassembler = pacing.finish().await?;
    let _ = events.send(PresentEvent::Finished);

    let session = dispatcher.into_session();
    debug!(
        ?outcome,
        raw_chars = session.raw_text.chars().count(),
        tools = session.tool_log.len(),
        suppressed = session.suppressed_tokens,
        "Invocation finished"
    );

    Ok(Transcript {
        raw_text: session.raw_text,
        segments: reassembler.into_visible(),
        tool_log: session.tool_log,
        metrics: session.metrics,
        status: session.status,
        final_answer: session.final_answer,
        caption: session.caption,
        outcome,
    })
}

async fn read_stream<C: Connector>(
    connector: &C,
    params: &InvocationParams,
    dispatcher: &mut Dispatcher,
    pacing: &PacingQueue,
    cancel: &CancellationToken,
) -> std::result::Result<Outcome, TransportError> {
    let mut stream = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(Outcome::Cancelled),
        opened = connector.open(params) => opened?,
    };

    let mut decoder = FrameDecoder::new();
    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(Outcome::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk?;

        for raw in decoder.feed(&chunk) {
            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            match raw.decode() {
                Ok(Decoded::Done) => return Ok(Outcome::Done),
                Ok(Decoded::Frame(frame)) => {
                    if let Some(item) = dispatcher.dispatch(frame) {
                        pacing.push(item);
                    }
                }
                Err(e) => warn!("Dropping undecodable frame: {e}"),
            }
        }
    }

    decoder.finish();
    Ok(Outcome::Closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PacingConfig;
    use crate::render::Rendered;
    use crate::transport::{ByteStream, ReplayConnector};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;

    fn token(text: &str) -> String {
        format!(
            "event: token\ndata: {}\n\n",
            serde_json::json!({ "token": text })
        )
    }

    fn capture() -> String {
        let mut s = String::new();
        s.push_str("event: status\ndata: {\"status\":\"Thinking...\"}\n\n");
        s.push_str(
            "event: tool_status\ndata: {\"tool_name\":\"search\",\"status\":\"running\",\"is_start\":1,\"input\":\"rust\"}\n\n",
        );
        s.push_str(
            "event: tool_status\ndata: {\"tool_name\":\"search\",\"status\":\"done\",\"is_start\":0,\"output\":\"3 hits\"}\n\n",
        );
        for fragment in [
            "hello ",
            "!#block#!",
            r#"{"type":"json","content":{"a":1}}"#,
            "!#/block#!",
            " world",
        ] {
            s.push_str(&token(fragment));
        }
        s.push_str("event: done\ndata: [DONE]\n\n");
        s.push_str(&token("after done"));
        s
    }

    fn config() -> Config {
        Config {
            pacing: PacingConfig::immediate(),
            ..Config::default()
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PresentEvent>) -> Vec<PresentEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    enum Step {
        Chunk(String),
        Fail,
        Hang,
    }

    struct Scripted(Vec<Step>);

    #[async_trait]
    impl Connector for Scripted {
        async fn open(&self, _params: &InvocationParams) -> std::result::Result<ByteStream, TransportError> {
            let mut items = Vec::new();
            let mut hang = false;
            for step in &self.0 {
                match step {
                    Step::Chunk(s) => items.push(Ok(Bytes::from(s.clone()))),
                    Step::Fail => items.push(Err(TransportError::Status {
                        status: 502,
                        message: "upstream reset".into(),
                    })),
                    Step::Hang => hang = true,
                }
            }
            let items = stream::iter(items);
            if hang {
                Ok(Box::pin(items.chain(stream::pending())))
            } else {
                Ok(Box::pin(items))
            }
        }
    }

    #[tokio::test]
    async fn test_end_to_end_replay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut relay = Relay::new(ReplayConnector::from_bytes(capture(), 7), config(), tx);
        relay.start(InvocationParams::new("agent", "hi")).await;
        let transcript = relay.wait().await.unwrap();

        assert_eq!(transcript.outcome, Outcome::Done);
        assert_eq!(transcript.segments.len(), 3);
        assert_eq!(transcript.segments[0], Segment::Text("hello ".into()));
        assert_eq!(
            transcript.segments[1],
            Segment::Block(Rendered::Json("{\n  \"a\": 1\n}".into()))
        );
        assert_eq!(transcript.segments[2], Segment::Text(" world".into()));
        assert!(!transcript.raw_text.contains("after done"));
        assert_eq!(transcript.status.as_deref(), Some("Thinking..."));

        assert_eq!(transcript.tool_log.len(), 2);
        let lines: Vec<String> = transcript.tool_log.iter().map(|t| t.log_line(80)).collect();
        assert!(lines.iter().all(|l| l.contains("search")));

        let events = drain(&mut rx);
        assert!(matches!(events.first(), Some(PresentEvent::Started { .. })));
        assert!(matches!(events.last(), Some(PresentEvent::Finished)));
    }

    #[tokio::test]
    async fn test_frame_boundaries_do_not_change_output() {
        let mut texts = Vec::new();
        for chunk in [1, 3, 64, 4096] {
            let (tx, _rx) = mpsc::unbounded_channel();
            let mut relay = Relay::new(ReplayConnector::from_bytes(capture(), chunk), config(), tx);
            relay.start(InvocationParams::new("agent", "hi")).await;
            let transcript = relay.wait().await.unwrap();
            texts.push((transcript.visible_text(), transcript.segments.len()));
        }
        assert!(texts.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_closed_without_done() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let capture = format!("{}{}", token("a !#block#!{\"type\""), "event: tok");
        let mut relay = Relay::new(ReplayConnector::from_bytes(capture, 16), config(), tx);
        relay.start(InvocationParams::new("agent", "hi")).await;
        let transcript = relay.wait().await.unwrap();

        assert_eq!(transcript.outcome, Outcome::Closed);
        assert_eq!(transcript.visible_text(), "a !#block#!{\"type\"");
    }

    #[tokio::test]
    async fn test_transport_fault_reports_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = Scripted(vec![Step::Chunk(token("partial")), Step::Fail]);
        let mut relay = Relay::new(connector, config(), tx);
        relay.start(InvocationParams::new("agent", "hi")).await;

        let err = relay.wait().await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Status { status: 502, .. })));

        let events = drain(&mut rx);
        let failures = events
            .iter()
            .filter(|ev| matches!(ev, PresentEvent::Failed(_)))
            .count();
        assert_eq!(failures, 1);
        assert!(matches!(events.last(), Some(PresentEvent::Finished)));
    }

    #[tokio::test]
    async fn test_fault_notice_follows_flushed_text() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = Scripted(vec![
            Step::Chunk(token("x !#block#!{\"type\"")),
            Step::Fail,
        ]);
        let mut relay = Relay::new(connector, config(), tx);
        relay.start(InvocationParams::new("agent", "hi")).await;
        assert!(relay.wait().await.is_err());

        let events = drain(&mut rx);
        let failed = events
            .iter()
            .position(|ev| matches!(ev, PresentEvent::Failed(_)))
            .unwrap();
        assert_eq!(failed, events.len() - 2);
        assert!(!events[..failed]
            .iter()
            .any(|ev| matches!(ev, PresentEvent::Finished)));
    }

    #[tokio::test]
    async fn test_undecodable_frame_skipped_mid_stream() {
        let capture = format!(
            "{}event: token\ndata: {{not json\n\n{}{}event: done\ndata: [DONE]\n\n",
            token("before "),
            token("!#block#!{\"type\":\"json\",\"content\":[1]}!#/block#!"),
            token(" after"),
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut relay = Relay::new(ReplayConnector::from_bytes(capture, 5), config(), tx);
        relay.start(InvocationParams::new("agent", "hi")).await;
        let transcript = relay.wait().await.unwrap();

        assert_eq!(transcript.outcome, Outcome::Done);
        assert_eq!(transcript.segments.len(), 3);
        assert_eq!(transcript.segments[0], Segment::Text("before ".into()));
        assert_eq!(
            transcript.segments[1],
            Segment::Block(Rendered::Json("[\n  1\n]".into()))
        );
        assert_eq!(transcript.segments[2], Segment::Text(" after".into()));
    }

    #[tokio::test]
    async fn test_soft_cancel_drains_queued_text() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = Scripted(vec![Step::Chunk(token("hello")), Step::Hang]);
        let mut relay = Relay::new(connector, config(), tx);
        relay.start(InvocationParams::new("agent", "hi")).await;

        // Wait until the token reached the surface.
        while let Some(ev) = rx.recv().await {
            if matches!(ev, PresentEvent::Segment(_)) {
                break;
            }
        }
        relay.cancel();
        let transcript = relay.wait().await.unwrap();

        assert_eq!(transcript.outcome, Outcome::Cancelled);
        assert_eq!(transcript.visible_text(), "hello");
    }

    #[tokio::test]
    async fn test_start_supersedes_running_invocation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = Scripted(vec![Step::Chunk(token("first")), Step::Hang]);
        let mut relay = Relay::new(connector, config(), tx);
        relay.start(InvocationParams::new("agent", "one")).await;
        relay.start(InvocationParams::new("agent", "two")).await;
        assert!(relay.is_active());
        relay.cancel();
        let transcript = relay.wait().await.unwrap();
        assert_eq!(transcript.outcome, Outcome::Cancelled);

        let events = drain(&mut rx);
        let started: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, ev)| matches!(ev, PresentEvent::Started { .. }))
            .map(|(i, _)| i)
            .collect();
        let finished: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, ev)| matches!(ev, PresentEvent::Finished))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(started.len(), 2);
        assert_eq!(finished.len(), 2);
        assert!(finished[0] < started[1]);
    }

    #[tokio::test]
    async fn test_wait_without_invocation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut relay = Relay::new(ReplayConnector::from_bytes(Vec::<u8>::new(), 8), config(), tx);
        assert!(matches!(relay.wait().await, Err(Error::Idle)));
    }
}
