use std::collections::HashMap;

/// Display configuration for a tool the assistant may invoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// Lookup table from tool name to its display configuration.
///
/// Built once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    tools: HashMap<&'static str, ToolConfig>,
}

impl ToolCatalog {
    pub fn new(tools: impl IntoIterator<Item = ToolConfig>) -> Self {
        Self {
            tools: tools.into_iter().map(|tool| (tool.id, tool)).collect(),
        }
    }

    pub fn loopdesk() -> Self {
        Self::new(builtin_tools())
    }

    pub fn get(&self, id: &str) -> Option<&ToolConfig> {
        self.tools.get(id)
    }

    /// Display name for `id`, or `id` itself when the tool is unknown.
    pub fn label<'a>(&'a self, id: &'a str) -> &'a str {
        self.get(id).map_or(id, |tool| tool.name)
    }

    /// Status line shown while a tool is running.
    pub fn activity(&self, id: &str) -> String {
        match self.get(id) {
            Some(tool) => format!("{} – {}…", tool.name, tool.description),
            None => format!("Använder {}…", id),
        }
    }
}

fn builtin_tools() -> Vec<ToolConfig> {
    vec![
        ToolConfig {
            id: "allabolag",
            name: "Allabolag",
            description: "Scrapa bolagsdata",
        },
        ToolConfig {
            id: "bolagsverket",
            name: "Bolagsverket",
            description: "Officiell bolagsinfo",
        },
        ToolConfig {
            id: "vinnova",
            name: "Vinnova",
            description: "Projektfinansiering",
        },
        ToolConfig {
            id: "kungorelser",
            name: "Kungörelser",
            description: "Konkurs & likvidation",
        },
        ToolConfig {
            id: "rss",
            name: "RSS-hanterare",
            description: "Hantera nyhetsflöden",
        },
        ToolConfig {
            id: "web_search",
            name: "Webbsökning",
            description: "Söker på webben",
        },
    ]
}
