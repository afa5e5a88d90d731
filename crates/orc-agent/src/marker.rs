//! Inline marker parser — demultiplexes `[THINKING]`/`[SUMMARY]` regions out
//! of a streamed assistant turn.
//!
//! Grounded in `async_streaming_agent.py`'s `_process_buffer` state machine:
//! three states (`OUTSIDE`, `IN_THINKING`, `IN_SUMMARY`), transitions driven
//! by the first occurrence of a marker anywhere in the buffer, tokens inside
//! an open marker withheld until the closing tag arrives. Unlike the
//! original's "rescan the whole buffer every token" approach, this only
//! scans the unconsumed suffix (`scanned` tracks the last position already
//! searched), so total work across a turn is `O(total bytes)` rather than
//! quadratic.

const THINKING_OPEN: &str = "[THINKING]";
const THINKING_CLOSE: &str = "[/THINKING]";
const SUMMARY_OPEN: &str = "[SUMMARY]";
const SUMMARY_CLOSE: &str = "[/SUMMARY]";
const RESPONSE_TAG: &str = "[RESPONSE]";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Outside,
    InThinking,
    InSummary,
}

/// One piece of classified output produced while parsing a turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarkerEvent {
    Normal(String),
    Thinking(String),
    Summary(String),
}

/// Streaming state machine over one turn's worth of tokens.
///
/// `feed` is called once per token received from the LLM; `finish` is
/// called once after the stream ends to flush anything still buffered
/// (e.g. an unterminated `[THINKING]` region consumes the rest of the
/// turn).
pub struct MarkerParser {
    buffer: String,
    scanned: usize,
    state: State,
}

impl Default for MarkerParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkerParser {
    pub fn new() -> Self {
        Self { buffer: String::new(), scanned: 0, state: State::Outside }
    }

    /// Append one token and return any events it completed.
    pub fn feed(&mut self, token: &str) -> Vec<MarkerEvent> {
        self.buffer.push_str(token);
        self.drain()
    }

    /// Flush whatever remains buffered at end of turn, tolerating an
    /// unclosed `[THINKING]`/`[SUMMARY]` region by emitting it as that kind.
    pub fn finish(&mut self) -> Vec<MarkerEvent> {
        let mut events = Vec::new();
        if self.scanned < self.buffer.len() {
            let text = self.buffer[self.scanned..].to_string();
            events.push(match self.state {
                State::Outside => MarkerEvent::Normal(text),
                State::InThinking => MarkerEvent::Thinking(text),
                State::InSummary => MarkerEvent::Summary(text),
            });
            self.scanned = self.buffer.len();
        }
        events
    }

    /// The raw, unmodified concatenation of every token fed so far —
    /// used after the turn completes to extract `[PLAN]`/`[FILE_*]` blocks.
    pub fn full_text(&self) -> &str {
        &self.buffer
    }

    fn drain(&mut self) -> Vec<MarkerEvent> {
        let mut events = Vec::new();
        loop {
            match self.state {
                State::Outside => {
                    let rest = &self.buffer[self.scanned..];
                    let hit = [
                        (rest.find(THINKING_OPEN), THINKING_OPEN, true, false),
                        (rest.find(SUMMARY_OPEN), SUMMARY_OPEN, false, false),
                        (rest.find(THINKING_CLOSE), THINKING_CLOSE, false, true),
                        (rest.find(SUMMARY_CLOSE), SUMMARY_CLOSE, false, true),
                    ]
                    .into_iter()
                    .filter_map(|(pos, lit, enters_thinking, discard)| {
                        pos.map(|p| (p, lit, enters_thinking, discard))
                    })
                    .min_by_key(|(p, ..)| *p);

                    match hit {
                        Some((rel_pos, literal, enters_thinking, discard)) => {
                            let abs_pos = self.scanned + rel_pos;
                            if abs_pos > self.scanned {
                                events.push(MarkerEvent::Normal(
                                    self.buffer[self.scanned..abs_pos].to_string(),
                                ));
                            }
                            self.scanned = abs_pos + literal.len();
                            if !discard {
                                self.state =
                                    if enters_thinking { State::InThinking } else { State::InSummary };
                            }
                            continue;
                        }
                        None => {
                            let hold = partial_suffix_len(rest, &[THINKING_OPEN, SUMMARY_OPEN]);
                            let emit_end = self.buffer.len() - hold;
                            if emit_end > self.scanned {
                                events.push(MarkerEvent::Normal(
                                    self.buffer[self.scanned..emit_end].to_string(),
                                ));
                                self.scanned = emit_end;
                            }
                            break;
                        }
                    }
                }
                State::InThinking => {
                    let rest = &self.buffer[self.scanned..];
                    match rest.find(THINKING_CLOSE) {
                        Some(rel) => {
                            let abs = self.scanned + rel;
                            events
                                .push(MarkerEvent::Thinking(self.buffer[self.scanned..abs].to_string()));
                            self.scanned = abs + THINKING_CLOSE.len();
                            if self.buffer[self.scanned..].starts_with(RESPONSE_TAG) {
                                self.scanned += RESPONSE_TAG.len();
                            }
                            self.state = State::Outside;
                            continue;
                        }
                        None => break,
                    }
                }
                State::InSummary => {
                    let rest = &self.buffer[self.scanned..];
                    match rest.find(SUMMARY_CLOSE) {
                        Some(rel) => {
                            let abs = self.scanned + rel;
                            events
                                .push(MarkerEvent::Summary(self.buffer[self.scanned..abs].to_string()));
                            self.scanned = abs + SUMMARY_CLOSE.len();
                            self.state = State::Outside;
                            continue;
                        }
                        None => break,
                    }
                }
            }
        }
        events
    }
}

/// Longest suffix of `s` that is a strict prefix of some marker literal —
/// held back so a marker split across two tokens isn't missed.
fn partial_suffix_len(s: &str, markers: &[&str]) -> usize {
    let bytes = s.as_bytes();
    let mut best = 0;
    for marker in markers {
        let mbytes = marker.as_bytes();
        let max_k = (mbytes.len() - 1).min(bytes.len());
        for k in (1..=max_k).rev() {
            if bytes[bytes.len() - k..] == mbytes[..k] {
                best = best.max(k);
                break;
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut MarkerParser, tokens: &[&str]) -> Vec<MarkerEvent> {
        let mut events = Vec::new();
        for t in tokens {
            events.extend(parser.feed(t));
        }
        events.extend(parser.finish());
        events
    }

    #[test]
    fn scenario_s3_single_chunk() {
        let mut parser = MarkerParser::new();
        let events = feed_all(&mut parser, &["Hello [THINKING]internal[/THINKING][RESPONSE]World"]);
        assert_eq!(
            events,
            vec![
                MarkerEvent::Normal("Hello ".into()),
                MarkerEvent::Thinking("internal".into()),
                MarkerEvent::Normal("World".into()),
            ]
        );
    }

    #[test]
    fn marker_split_across_tokens_is_not_emitted_early() {
        let mut parser = MarkerParser::new();
        let events = feed_all(&mut parser, &["hi [THINK", "ING]secret[/THINK", "ING]bye"]);
        assert_eq!(
            events,
            vec![
                MarkerEvent::Normal("hi ".into()),
                MarkerEvent::Thinking("secret".into()),
                MarkerEvent::Normal("bye".into()),
            ]
        );
    }

    #[test]
    fn unclosed_thinking_consumes_rest_of_turn() {
        let mut parser = MarkerParser::new();
        let events = feed_all(&mut parser, &["before [THINKING]", "forever and ever"]);
        assert_eq!(
            events,
            vec![
                MarkerEvent::Normal("before ".into()),
                MarkerEvent::Thinking("forever and ever".into()),
            ]
        );
    }

    #[test]
    fn unmatched_closing_tag_is_discarded() {
        let mut parser = MarkerParser::new();
        let events = feed_all(&mut parser, &["oops [/THINKING] still here"]);
        assert_eq!(
            events,
            vec![
                MarkerEvent::Normal("oops ".into()),
                MarkerEvent::Normal(" still here".into()),
            ]
        );
    }

    #[test]
    fn summary_block_is_extracted_and_forwarded() {
        let mut parser = MarkerParser::new();
        let events =
            feed_all(&mut parser, &["[SUMMARY]did the thing[/SUMMARY]ok done"]);
        assert_eq!(
            events,
            vec![
                MarkerEvent::Summary("did the thing".into()),
                MarkerEvent::Normal("ok done".into()),
            ]
        );
    }

    #[test]
    fn outside_with_no_marker_forwards_immediately() {
        let mut parser = MarkerParser::new();
        let events = parser.feed("just plain text");
        assert_eq!(events, vec![MarkerEvent::Normal("just plain text".into())]);
    }

    #[test]
    fn full_text_retains_raw_markers_for_later_extraction() {
        let mut parser = MarkerParser::new();
        parser.feed("[PLAN]body[/PLAN] tail");
        assert_eq!(parser.full_text(), "[PLAN]body[/PLAN] tail");
    }
}
