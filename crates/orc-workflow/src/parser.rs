//! PlanParser — turns a `[PLAN]...[/PLAN]` block of free text into a
//! structured `Plan`, or recognizes it as a legacy file-operation plan and
//! declines (returns `None`) so the caller can fall back to single-turn
//! dispatch.
//!
//! Grounded exactly in `plan_parser.py`: workflow detection requires a
//! `## Workflow:` header and at least one `### Step` block; symbolic
//! `Step N` dependencies are rewritten to real step ids only after every
//! step in the block has been assigned one, and a bare 8-hex-character
//! token is taken as a literal step id and passed through unchanged.

use crate::plan::{new_short_id, Plan, PlanStep};
use regex::Regex;
use std::sync::OnceLock;

fn plan_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)\[PLAN\](.*?)\[/PLAN\]").unwrap())
}

fn workflow_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^##\s*Workflow:\s*(.+)$").unwrap())
}

fn step_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^###\s*Step\s+(\d+)\s*:\s*(.*)$").unwrap())
}

fn next_section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(###|##)\s").unwrap())
}

fn step_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Step\s+(\d+)").unwrap())
}

fn literal_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([0-9a-f]{8})\b").unwrap())
}

fn kv_pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""?([\w_]+)"?\s*:\s*"([^"]*)""#).unwrap())
}

fn estimated_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\s*(\w*)").unwrap())
}

fn total_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?mi)^-?\s*Total Estimated Time\s*:\s*(.+)$").unwrap())
}

fn cost_estimate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?mi)^-?\s*Cost Estimate\s*:\s*\$?([\d.]+)").unwrap())
}

/// Either a reference to the N-th listed step (1-indexed, rewritten after
/// parsing) or a literal step id that passes straight through.
enum DepToken {
    Symbolic(usize),
    Literal(String),
}

pub struct PlanParser;

impl PlanParser {
    /// Locate the first `[PLAN]` block and parse it as a workflow plan.
    /// Returns `None` if there's no plan block, or the block has no
    /// `###`/`Step` markers (a legacy file-operation plan instead).
    pub fn parse(text: &str) -> Option<Plan> {
        let captures = plan_block_re().captures(text)?;
        let body = captures.get(1)?.as_str();

        if !body.contains("###") && !body.contains("Step") {
            return None;
        }

        let name = workflow_header_re()
            .captures(body)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_else(|| "Unnamed Workflow".to_string());

        let description = Self::extract_description(body);

        let mut plan = Plan::new(None, name, description);
        let mut dep_tokens: Vec<Vec<DepToken>> = Vec::new();

        let headers: Vec<_> = step_header_re().captures_iter(body).collect();
        for (i, capture) in headers.iter().enumerate() {
            let full_match = capture.get(0).unwrap();
            let step_description = capture[2].trim().to_string();
            let block_start = full_match.end();
            let block_end = headers
                .get(i + 1)
                .map(|next| next.get(0).unwrap().start())
                .unwrap_or(body.len());
            let block = &body[block_start..block_end];
            let block = match next_section_re().find(block) {
                Some(m) if m.start() > 0 => &block[..m.start()],
                Some(_) => "",
                None => block,
            };

            let (agent, tool, arguments, deps, estimated_time) = Self::parse_step_fields(block);
            let mut step = PlanStep::new(
                Some(new_short_id()),
                step_description,
                agent,
                tool,
                arguments,
                Vec::new(),
            );
            step.estimated_time = estimated_time;
            plan.add_step(step);
            dep_tokens.push(deps);
        }

        // Rewrite symbolic `Step N` references to the Nth listed step's id,
        // now that every step has a real one. Literal 8-hex ids pass through.
        for (i, tokens) in dep_tokens.into_iter().enumerate() {
            let mut resolved = Vec::new();
            for token in tokens {
                match token {
                    DepToken::Symbolic(n) => {
                        if let Some(step) = plan.steps.get(n.saturating_sub(1)) {
                            resolved.push(step.step_id.clone());
                        }
                    }
                    DepToken::Literal(id) => resolved.push(id),
                }
            }
            plan.steps[i].dependencies = resolved;
        }

        if let Some(c) = total_time_re().captures(body) {
            plan.metadata.insert("total_estimated_time".to_string(), c[1].trim().to_string());
        }
        if let Some(c) = cost_estimate_re().captures(body) {
            plan.metadata.insert("cost_estimate".to_string(), c[1].to_string());
        }

        Some(plan)
    }

    fn extract_description(body: &str) -> String {
        let after_header = match workflow_header_re().find(body) {
            Some(m) => &body[m.end()..],
            None => body,
        };
        let end = step_header_re().find(after_header).map(|m| m.start()).unwrap_or(after_header.len());
        after_header[..end].trim().to_string()
    }

    /// Scan a step block's `-`-prefixed (or bare) `key: value` lines for the
    /// recognized keys, returning `(agent, tool, arguments, deps, estimated_time_secs)`.
    fn parse_step_fields(block: &str) -> (String, Option<String>, serde_json::Value, Vec<DepToken>, u64) {
        let mut agent = "main".to_string();
        let mut tool = None;
        let mut arguments = serde_json::json!({});
        let mut deps = Vec::new();
        let mut estimated_time = 30u64;

        for raw_line in block.lines() {
            let line = raw_line.trim().trim_start_matches('-').trim();
            let Some((key, value)) = line.split_once(':') else { continue };
            let key = key.trim();
            let value = value.trim();

            if key.eq_ignore_ascii_case("agent") {
                if let Some(token) = value.split_whitespace().next() {
                    agent = token.to_lowercase();
                }
            } else if key.eq_ignore_ascii_case("tool") {
                if let Some(token) = value.split_whitespace().next() {
                    tool = Some(token.to_string());
                }
            } else if key.eq_ignore_ascii_case("arguments") {
                arguments = Self::parse_arguments(value);
            } else if key.eq_ignore_ascii_case("dependencies") {
                deps = Self::parse_dependencies(value);
            } else if key.eq_ignore_ascii_case("estimated time") {
                estimated_time = Self::parse_estimated_time(value);
            }
        }

        (agent, tool, arguments, deps, estimated_time)
    }

    fn parse_arguments(value: &str) -> serde_json::Value {
        if value.starts_with('{') {
            if let Ok(parsed) = serde_json::from_str(value) {
                return parsed;
            }
        }
        let mut map = serde_json::Map::new();
        for capture in kv_pair_re().captures_iter(value) {
            map.insert(capture[1].to_string(), serde_json::Value::String(capture[2].to_string()));
        }
        serde_json::Value::Object(map)
    }

    /// Scans the whole value for every `Step N` and 8-hex-char token,
    /// independent of how they're delimited (comma, "and", whitespace, ...),
    /// mirroring the original's `re.findall` over the full `deps_text`.
    fn parse_dependencies(value: &str) -> Vec<DepToken> {
        if value.is_empty() || value.eq_ignore_ascii_case("none") {
            return Vec::new();
        }
        let mut found: Vec<(usize, DepToken)> = Vec::new();
        for c in step_ref_re().captures_iter(value) {
            if let Ok(n) = c[1].parse::<usize>() {
                found.push((c.get(0).unwrap().start(), DepToken::Symbolic(n)));
            }
        }
        for c in literal_id_re().captures_iter(value) {
            found.push((c.get(0).unwrap().start(), DepToken::Literal(c[1].to_string())));
        }
        found.sort_by_key(|(pos, _)| *pos);
        found.into_iter().map(|(_, token)| token).collect()
    }

    fn parse_estimated_time(value: &str) -> u64 {
        let Some(c) = estimated_time_re().captures(value) else { return 30 };
        let Ok(n) = c[1].parse::<u64>() else { return 30 };
        let unit = c.get(2).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
        if unit.starts_with('h') {
            n * 3600
        } else if unit.starts_with('m') {
            n * 60
        } else {
            n
        }
    }
}
