//! Domain heuristic: keyword clusters → a micro-menu of at most 8 tools.
//!
//! When a query clearly belongs to a known domain, the classifier prompt
//! carries a tiny domain-scoped menu instead of the full tool list, keeping
//! the prompt small for local models.

use crate::memory::ToolHit;
use crate::tool::ToolDescriptor;

/// Maximum entries in a micro-menu.
const MICRO_MENU_CAP: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Domain {
    System,
    Fs,
    Ingestion,
}

const SYSTEM_HITS: &[&str] = &[
    "mcp", "server", "router", "agent", "surreal", "health", "status", "restart", "logs", "cpu",
    "ram",
];
const FS_HITS: &[&str] = &[
    "file", "folder", "directory", "path", "ls", "read", "write", "append", "mv", "cp", "find",
];
const INGEST_HITS: &[&str] = &["ingest", "index", "knowledge", "rag", "upload"];

/// Lightweight domain detector for local/system commands.
pub fn detect_domain(normalized_query: &str) -> Option<Domain> {
    let has = |keys: &[&str]| keys.iter().any(|k| normalized_query.contains(k));
    if has(SYSTEM_HITS) {
        return Some(Domain::System);
    }
    if has(FS_HITS) {
        return Some(Domain::Fs);
    }
    if has(INGEST_HITS) {
        return Some(Domain::Ingestion);
    }
    None
}

fn domain_defaults(domain: Domain) -> &'static [(&'static str, &'static str)] {
    match domain {
        Domain::System => &[
            ("list_active_mcp_servers", "List MCP servers and status"),
            ("get_system_health", "Check router/agent/MCP health"),
            ("read_service_logs", "Tail orchestrator and server logs"),
            ("check_resource_usage", "CPU/RAM/disk usage"),
            ("add_mcp_server", "Add or update an MCP server"),
            ("install_mcp_package", "Install an MCP server package"),
        ],
        Domain::Fs => &[
            ("list_dir", "List folder contents"),
            ("path_info", "Inspect a path"),
            ("read_text", "Read a text file"),
            ("write_text", "Write a text file"),
            ("append_text", "Append to a file"),
            ("find_files", "Find files by pattern or extension"),
            ("move_path", "Move or rename a path"),
            ("copy_path", "Copy a file or directory"),
        ],
        Domain::Ingestion => &[
            ("ingest_file", "Queue a file for ingestion"),
            ("get_ingestion_status", "Check the ingestion queue"),
            ("parse_mcp_config", "Parse and install MCP config text"),
        ],
    }
}

/// Builds a tiny domain-scoped menu: semantic hits first, then domain
/// defaults that actually exist in the discovered menu. Returns `None` when
/// no domain matched or nothing qualifies.
pub fn build_micro_menu(
    domain: Option<Domain>,
    semantic_hits: &[ToolHit],
    menu: &[ToolDescriptor],
) -> Option<String> {
    let domain = domain?;

    let mut seen = std::collections::HashSet::new();
    let mut entries: Vec<String> = Vec::new();

    for hit in semantic_hits {
        if entries.len() >= MICRO_MENU_CAP {
            break;
        }
        if seen.insert(hit.name.clone()) {
            entries.push(format!("- {}: {}", hit.name, truncate(&hit.description, 120)));
        }
    }

    for (name, description) in domain_defaults(domain) {
        if entries.len() >= MICRO_MENU_CAP {
            break;
        }
        if !menu.iter().any(|d| d.name == *name) {
            continue;
        }
        if seen.insert((*name).to_string()) {
            entries.push(format!("- {name}: {description}"));
        }
    }

    if entries.is_empty() {
        None
    } else {
        Some(format!("Micro Menu (local tools):\n{}", entries.join("\n")))
    }
}

/// Full-menu summary for the classifier prompt: one line per tool.
pub fn menu_summary(menu: &[ToolDescriptor]) -> String {
    menu.iter()
        .map(|d| format!("- {} [{}]: {}", d.name, d.server, truncate(&d.description, 120)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            description: format!("{name} description"),
            input_schema: serde_json::json!({}),
            server: "srv".into(),
            cacheable: false,
            side_effect: false,
        }
    }

    /// **Scenario**: Keyword clusters map to their domains.
    #[test]
    fn domain_detection() {
        assert_eq!(detect_domain("restart the mcp server"), Some(Domain::System));
        assert_eq!(detect_domain("list files in the folder"), Some(Domain::Fs));
        assert_eq!(detect_domain("ingest this document"), Some(Domain::Ingestion));
        assert_eq!(detect_domain("tell me a joke"), None);
    }

    /// **Scenario**: The micro-menu is capped at 8 entries and only lists
    /// tools that exist in the discovered menu.
    #[test]
    fn micro_menu_capped_and_filtered() {
        let menu: Vec<ToolDescriptor> = [
            "list_dir", "path_info", "read_text", "write_text", "append_text", "find_files",
            "move_path", "copy_path",
        ]
        .iter()
        .map(|n| descriptor(n))
        .collect();

        let hits = vec![
            ToolHit {
                name: "read_text".into(),
                description: "read a file".into(),
                score: 0.9,
            },
            ToolHit {
                name: "search_web".into(),
                description: "web".into(),
                score: 0.8,
            },
        ];

        let micro = build_micro_menu(Some(Domain::Fs), &hits, &menu).unwrap();
        let lines: Vec<&str> = micro.lines().filter(|l| l.starts_with("- ")).collect();
        assert!(lines.len() <= 8);
        // Semantic hits come first, even ones outside the domain defaults.
        assert!(lines[0].starts_with("- read_text"));
        assert!(lines[1].starts_with("- search_web"));
        // No duplicate read_text from defaults.
        assert_eq!(lines.iter().filter(|l| l.contains("read_text")).count(), 1);
    }

    /// **Scenario**: No domain → no micro menu.
    #[test]
    fn no_domain_no_menu() {
        assert!(build_micro_menu(None, &[], &[]).is_none());
    }

    /// **Scenario**: Defaults absent from the discovered menu are skipped;
    /// all-absent with no hits yields None.
    #[test]
    fn absent_defaults_skipped() {
        assert!(build_micro_menu(Some(Domain::Fs), &[], &[descriptor("unrelated")]).is_none());
    }
}
