//! Dependency resolver: groups a tool-call batch into execution levels.
//!
//! Rules:
//! - A side-effect call (per descriptor, or any unknown tool) depends on
//!   every call earlier in the batch.
//! - A read-only call depends on nothing, unless an earlier call touches the
//!   same resource (the `path` / `src` / `dest` argument), in which case it
//!   waits for that call.
//!
//! The graph is topologically sorted into levels; calls inside one level may
//! run concurrently.

use std::collections::HashMap;

use crate::tool::{ToolCall, ToolDescriptor};

/// Resource touched by a call, for conflict detection. Filesystem-style
/// tools name their target via `path` (or `src`/`dest` for moves).
fn resource_keys(call: &ToolCall) -> Vec<String> {
    let Ok(args) = call.parsed_arguments() else {
        return Vec::new();
    };
    ["path", "src", "dest"]
        .iter()
        .filter_map(|k| args.get(*k).and_then(|v| v.as_str()).map(str::to_string))
        .collect()
}

fn is_side_effect(call: &ToolCall, descriptors: &HashMap<String, ToolDescriptor>) -> bool {
    match descriptors.get(&call.name) {
        Some(d) => d.side_effect,
        // Unknown tools are executed conservatively.
        None => true,
    }
}

/// Returns batch indexes grouped into levels; every call appears exactly
/// once, and a call's dependencies are all in earlier levels.
pub fn execution_levels(
    calls: &[ToolCall],
    descriptors: &HashMap<String, ToolDescriptor>,
) -> Vec<Vec<usize>> {
    let side_effect: Vec<bool> = calls
        .iter()
        .map(|c| is_side_effect(c, descriptors))
        .collect();
    let resources: Vec<Vec<String>> = calls.iter().map(resource_keys).collect();

    let mut deps: Vec<Vec<usize>> = Vec::with_capacity(calls.len());
    for i in 0..calls.len() {
        if side_effect[i] {
            deps.push((0..i).collect());
            continue;
        }
        let mut mine = Vec::new();
        for j in 0..i {
            let shares_resource = resources[i]
                .iter()
                .any(|r| resources[j].contains(r));
            if shares_resource {
                mine.push(j);
            }
        }
        deps.push(mine);
    }

    let mut levels = Vec::new();
    let mut scheduled = vec![false; calls.len()];
    let mut remaining = calls.len();
    while remaining > 0 {
        let mut level: Vec<usize> = Vec::new();
        for i in 0..calls.len() {
            if !scheduled[i] && deps[i].iter().all(|j| scheduled[*j]) {
                level.push(i);
            }
        }
        if level.is_empty() {
            // Unreachable with the rules above (deps always point backwards),
            // but never spin: run the rest sequentially.
            for (i, done) in scheduled.iter().enumerate() {
                if !done {
                    levels.push(vec![i]);
                }
            }
            break;
        }
        for &i in &level {
            scheduled[i] = true;
        }
        remaining -= level.len();
        levels.push(level);
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args.into(),
        }
    }

    fn descriptors(specs: &[(&str, bool)]) -> HashMap<String, ToolDescriptor> {
        specs
            .iter()
            .map(|(name, side_effect)| {
                (
                    name.to_string(),
                    ToolDescriptor {
                        name: name.to_string(),
                        description: String::new(),
                        input_schema: serde_json::json!({}),
                        server: "s".into(),
                        cacheable: !side_effect,
                        side_effect: *side_effect,
                    },
                )
            })
            .collect()
    }

    /// **Scenario**: Independent reads form a single concurrent level.
    #[test]
    fn independent_reads_one_level() {
        let calls = vec![
            call("1", "read_text", r#"{"path":"a"}"#),
            call("2", "read_text", r#"{"path":"b"}"#),
            call("3", "read_text", r#"{"path":"c"}"#),
        ];
        let levels = execution_levels(&calls, &descriptors(&[("read_text", false)]));
        assert_eq!(levels, vec![vec![0, 1, 2]]);
    }

    /// **Scenario**: `[read a, write b, read c]` schedules the reads
    /// concurrently first, then the write.
    #[test]
    fn write_after_reads() {
        let calls = vec![
            call("1", "read_text", r#"{"path":"a"}"#),
            call("2", "write_text", r#"{"path":"b","content":"x"}"#),
            call("3", "read_text", r#"{"path":"c"}"#),
        ];
        let d = descriptors(&[("read_text", false), ("write_text", true)]);
        let levels = execution_levels(&calls, &d);
        assert_eq!(levels, vec![vec![0, 2], vec![1]]);
    }

    /// **Scenario**: Two writes execute strictly sequentially.
    #[test]
    fn writes_are_sequential() {
        let calls = vec![
            call("1", "write_text", r#"{"path":"a"}"#),
            call("2", "write_text", r#"{"path":"b"}"#),
        ];
        let d = descriptors(&[("write_text", true)]);
        let levels = execution_levels(&calls, &d);
        assert_eq!(levels, vec![vec![0], vec![1]]);
    }

    /// **Scenario**: Reads of the same path do not run concurrently.
    #[test]
    fn same_path_reads_serialize() {
        let calls = vec![
            call("1", "read_text", r#"{"path":"shared"}"#),
            call("2", "read_text", r#"{"path":"shared"}"#),
            call("3", "read_text", r#"{"path":"other"}"#),
        ];
        let d = descriptors(&[("read_text", false)]);
        let levels = execution_levels(&calls, &d);
        assert_eq!(levels, vec![vec![0, 2], vec![1]]);
    }

    /// **Scenario**: Unknown tools are treated as side effects.
    #[test]
    fn unknown_tool_conservative() {
        let calls = vec![
            call("1", "read_text", r#"{"path":"a"}"#),
            call("2", "mystery_tool", r#"{}"#),
        ];
        let d = descriptors(&[("read_text", false)]);
        let levels = execution_levels(&calls, &d);
        assert_eq!(levels, vec![vec![0], vec![1]]);
    }

    /// **Scenario**: A move conflicts with a read of its destination.
    #[test]
    fn move_conflicts_with_read() {
        let calls = vec![
            call("1", "read_text", r#"{"path":"x"}"#),
            call("2", "move_path", r#"{"src":"a","dest":"x"}"#),
        ];
        let d = descriptors(&[("read_text", false), ("move_path", true)]);
        let levels = execution_levels(&calls, &d);
        assert_eq!(levels, vec![vec![0], vec![1]]);
    }
}
