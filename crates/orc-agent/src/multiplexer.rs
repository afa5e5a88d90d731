//! OutputMultiplexer — serializes interleaved per-agent streaming output
//! into one ordered, human-readable terminal stream.
//!
//! Grounded in `multi_agent_orchestrator.py`'s `OutputManager`: a single
//! lock around each individual write (never held across a write call's
//! caller logic), per-agent ANSI coloring assigned at registration time,
//! and a separator line emitted whenever the "current" agent changes so
//! interleaved streams stay legible without a banner on every line.

use orc_core::{AgentId, AgentRole};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

/// Color palette cycled across agents in registration order. ANSI codes
/// only — the multiplexer never owns a terminal capability check, matching
/// the original's unconditional `\033[...]` escapes.
const PALETTE: &[&str] = &[
    "\x1b[36m", // cyan
    "\x1b[35m", // magenta
    "\x1b[33m", // yellow
    "\x1b[32m", // green
    "\x1b[34m", // blue
    "\x1b[31m", // red
];
const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    Normal,
    Thinking,
    Summary,
    Status,
    Error,
    Success,
}

struct AgentEntry {
    role: AgentRole,
    color: &'static str,
}

struct MuxState<W> {
    writer: W,
    agents: HashMap<AgentId, AgentEntry>,
    current_agent: Option<AgentId>,
    next_color: usize,
}

/// Serializes writes from N concurrently streaming agents. Generic over the
/// sink so tests can assert on a `Vec<u8>` instead of real stdout.
pub struct OutputMultiplexer<W: Write + Send = std::io::Stdout> {
    state: Mutex<MuxState<W>>,
}

impl OutputMultiplexer<std::io::Stdout> {
    pub fn new() -> Self {
        Self::with_writer(std::io::stdout())
    }
}

impl Default for OutputMultiplexer<std::io::Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> OutputMultiplexer<W> {
    pub fn with_writer(writer: W) -> Self {
        Self {
            state: Mutex::new(MuxState {
                writer,
                agents: HashMap::new(),
                current_agent: None,
                next_color: 0,
            }),
        }
    }

    pub fn register(&self, agent_id: AgentId, role: AgentRole) {
        let mut state = self.state.lock().unwrap();
        let color = PALETTE[state.next_color % PALETTE.len()];
        state.next_color += 1;
        state.agents.insert(agent_id, AgentEntry { role, color });
    }

    /// Write one chunk of classified output for `agent_id`. Holds the lock
    /// only for the duration of this single write.
    pub fn write(&self, agent_id: &AgentId, text: &str, kind: OutputKind) {
        if kind == OutputKind::Summary {
            return self.write_summary(agent_id, text);
        }
        let mut state = self.state.lock().unwrap();
        self.emit_separator_if_agent_changed(&mut state, agent_id);
        let (color, label) = Self::color_and_label(&state, agent_id);
        let formatted = match kind {
            OutputKind::Normal => format!("{color}{text}{RESET}"),
            OutputKind::Thinking => format!("{color}{DIM}(thinking) {text}{RESET}"),
            OutputKind::Status => format!("{color}[{label} status]{RESET} {text}\n"),
            OutputKind::Error => format!("\x1b[31m[{label} error]{RESET} {text}\n"),
            OutputKind::Success => format!("\x1b[32m[{label} ok]{RESET} {text}\n"),
            OutputKind::Summary => unreachable!(),
        };
        let _ = state.writer.write_all(formatted.as_bytes());
        let _ = state.writer.flush();
    }

    pub fn write_status(&self, agent_id: &AgentId, status: &str, message: &str) {
        self.write(agent_id, &format!("{status}: {message}"), OutputKind::Status);
    }

    /// `SUMMARY` writes are framed by `===` rules regardless of which agent
    /// is currently "in focus" — they don't participate in the normal
    /// agent-switch separator bookkeeping.
    pub fn write_summary(&self, agent_id: &AgentId, text: &str) {
        let mut state = self.state.lock().unwrap();
        let (color, label) = Self::color_and_label(&state, agent_id);
        let framed = format!(
            "{color}{BOLD}=== SUMMARY ({label}) ==={RESET}\n{text}\n{color}{BOLD}========================={RESET}\n"
        );
        let _ = state.writer.write_all(framed.as_bytes());
        let _ = state.writer.flush();
    }

    /// Emit a closing separator for `agent_id` and release it as "current".
    pub fn finalize(&self, agent_id: &AgentId) {
        let mut state = self.state.lock().unwrap();
        let (color, label) = Self::color_and_label(&state, agent_id);
        let line = format!("\n{color}{DIM}--- {label} done ---{RESET}\n");
        let _ = state.writer.write_all(line.as_bytes());
        if state.current_agent.as_ref() == Some(agent_id) {
            state.current_agent = None;
        }
    }

    fn emit_separator_if_agent_changed(&self, state: &mut MuxState<W>, agent_id: &AgentId) {
        if state.current_agent.as_ref() != Some(agent_id) {
            if let Some(previous) = &state.current_agent {
                let (color, label) = Self::color_and_label(state, previous);
                let sep = format!("\n{color}{DIM}--- end {label} ---{RESET}\n");
                let _ = state.writer.write_all(sep.as_bytes());
            }
            state.current_agent = Some(agent_id.clone());
        }
    }

    fn color_and_label(state: &MuxState<W>, agent_id: &AgentId) -> (&'static str, String) {
        match state.agents.get(agent_id) {
            Some(entry) => (entry.color, format!("{}:{}", entry.role.as_str(), agent_id)),
            None => ("\x1b[37m", agent_id.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_core::AgentId;

    fn sink() -> OutputMultiplexer<Vec<u8>> {
        OutputMultiplexer::with_writer(Vec::new())
    }

    fn dump(mux: &OutputMultiplexer<Vec<u8>>) -> String {
        let state = mux.state.lock().unwrap();
        String::from_utf8_lossy(&state.writer).to_string()
    }

    #[test]
    fn write_emits_text_for_single_agent() {
        let mux = sink();
        let a = AgentId::new("aaaaaaaa");
        mux.register(a.clone(), AgentRole::Main);
        mux.write(&a, "hello", OutputKind::Normal);
        assert!(dump(&mux).contains("hello"));
    }

    #[test]
    fn switching_agents_emits_a_separator() {
        let mux = sink();
        let a = AgentId::new("aaaaaaaa");
        let b = AgentId::new("bbbbbbbb");
        mux.register(a.clone(), AgentRole::Main);
        mux.register(b.clone(), AgentRole::Reviewer);
        mux.write(&a, "from a", OutputKind::Normal);
        mux.write(&b, "from b", OutputKind::Normal);
        let out = dump(&mux);
        assert!(out.contains("end"));
        assert!(out.find("from a").unwrap() < out.find("end").unwrap());
        assert!(out.find("end").unwrap() < out.find("from b").unwrap());
    }

    #[test]
    fn summary_is_framed_with_equals_rules() {
        let mux = sink();
        let a = AgentId::new("aaaaaaaa");
        mux.register(a.clone(), AgentRole::Main);
        mux.write(&a, "task complete", OutputKind::Summary);
        let out = dump(&mux);
        assert!(out.contains("=== SUMMARY"));
        assert!(out.contains("task complete"));
    }
}
