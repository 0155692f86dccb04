//! Tool catalog: the unified, uniquely-named tool list shown to the model.
//!
//! Provides:
//! - Qualified names of the form `provider__tool`
//! - Deterministic ordering (provider registration order, then provider order)
//! - Serialization into Responses API function tools
//!
//! The catalog is built once, after every launch has settled, and never
//! changes afterwards.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::inference::types::FunctionTool;

use super::session::{ProviderSession, SessionState};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Separator between the provider name and the tool name.
pub const TOOL_SEPARATOR: &str = "__";

/// Longest function name the model accepts.
const MAX_FUNCTION_NAME_LEN: usize = 64;

// ─── Qualified names ─────────────────────────────────────────────────────────

/// Join a provider and tool name into a catalog key.
pub fn qualify(provider: &str, tool: &str) -> String {
    format!("{provider}{TOOL_SEPARATOR}{tool}")
}

/// Split a catalog key into `(provider, tool)` at the first separator.
///
/// Returns `None` when the separator is missing or either half is empty.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    let (provider, tool) = name.split_once(TOOL_SEPARATOR)?;
    if provider.is_empty() || tool.is_empty() {
        return None;
    }
    Some((provider, tool))
}

/// Whether `name` is usable as a model function name.
fn is_valid_function_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_FUNCTION_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ─── ToolCatalog ─────────────────────────────────────────────────────────────

/// One model-facing tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedToolEntry {
    pub qualified_name: String,
    /// Back-reference to the owning provider (by name, never by handle).
    pub provider: String,
    pub tool: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Ordered, immutable list of every tool from every Ready provider.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    entries: Vec<UnifiedToolEntry>,
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    /// Build the catalog from sessions in registration order.
    ///
    /// Sessions that are not Ready contribute nothing. A provider that lists
    /// the same tool name twice keeps the first one.
    pub fn build<'a, I>(sessions: I) -> Self
    where
        I: IntoIterator<Item = &'a ProviderSession>,
    {
        let mut catalog = ToolCatalog::default();

        for session in sessions {
            if session.state() != SessionState::Ready {
                continue;
            }

            let mut seen: HashSet<&str> = HashSet::new();
            for tool in session.tools() {
                if !seen.insert(tool.name.as_str()) {
                    tracing::warn!(
                        provider = %session.name(),
                        tool = %tool.name,
                        "provider listed a duplicate tool name, keeping the first"
                    );
                    continue;
                }

                let qualified_name = qualify(session.name(), &tool.name);
                if !is_valid_function_name(&qualified_name) {
                    tracing::warn!(
                        provider = %session.name(),
                        tool = %tool.name,
                        qualified = %qualified_name,
                        "tool name is not a valid function name, skipping"
                    );
                    continue;
                }
                // Unreachable while provider names are unique and
                // separator-free, but the catalog never holds two keys.
                if catalog.index.contains_key(&qualified_name) {
                    tracing::warn!(qualified = %qualified_name, "qualified name collision, skipping");
                    continue;
                }

                catalog
                    .index
                    .insert(qualified_name.clone(), catalog.entries.len());
                catalog.entries.push(UnifiedToolEntry {
                    qualified_name,
                    provider: session.name().to_string(),
                    tool: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                });
            }
        }

        tracing::info!(tools = catalog.len(), "tool catalog built");
        catalog
    }

    /// All entries in catalog order.
    pub fn entries(&self) -> &[UnifiedToolEntry] {
        &self.entries
    }

    /// Look up an entry by qualified name.
    pub fn get(&self, qualified_name: &str) -> Option<&UnifiedToolEntry> {
        self.index.get(qualified_name).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries belonging to one provider, in provider order.
    pub fn tools_for_provider<'a>(
        &'a self,
        provider: &'a str,
    ) -> impl Iterator<Item = &'a UnifiedToolEntry> + 'a {
        self.entries.iter().filter(move |e| e.provider == provider)
    }

    /// Serialize every entry as a Responses API function tool.
    pub fn to_function_tools(&self) -> Vec<FunctionTool> {
        self.entries
            .iter()
            .map(|e| FunctionTool::new(&e.qualified_name, &e.description, e.input_schema.clone()))
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
