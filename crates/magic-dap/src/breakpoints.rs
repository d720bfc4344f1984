//! Per-source breakpoint storage.
//!
//! Lines are stored in *instrumented* coordinates (client line + [`INSTRUMENTATION_OFFSET`]),
//! which is what the interpreter reports. Every source is stored under its normalized key
//! and, when different, under the key without its resource-type segment.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;

use crate::dap::messages::{Breakpoint, Source, SourceBreakpoint};
use crate::path;

/// Lines added in front of the user's script by the debug marker.
pub const INSTRUMENTATION_OFFSET: u32 = magic_script::DEBUG_MARK_LINES;

pub fn to_instrumented_line(client_line: u32) -> u32 {
    client_line.saturating_add(INSTRUMENTATION_OFFSET)
}

pub fn to_client_line(instrumented_line: u32) -> u32 {
    instrumented_line.saturating_sub(INSTRUMENTATION_OFFSET)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBreakpoint {
    pub id: i64,
    /// Log point message; `None` for a regular breakpoint.
    pub log_message: Option<String>,
}

/// Breakpoints of one source, keyed by instrumented line.
pub type SourceBreakpoints = BTreeMap<u32, LineBreakpoint>;

/// Result of [`BreakpointRegistry::replace`].
#[derive(Debug, Clone)]
pub struct Replaced {
    pub key: String,
    pub stripped_key: String,
    /// Instrumented lines now registered for the source.
    pub lines: BTreeSet<u32>,
    /// One entry per requested breakpoint, in request order, in client coordinates.
    pub breakpoints: Vec<Breakpoint>,
}

impl Replaced {
    /// Whether this update targets the script whose normalized key is `active_key`.
    pub fn matches(&self, active_key: &str) -> bool {
        self.key == active_key || self.stripped_key == path::strip_resource_type(active_key)
    }
}

#[derive(Debug)]
pub struct BreakpointRegistry {
    sources: RwLock<HashMap<String, SourceBreakpoints>>,
    next_id: AtomicI64,
}

impl Default for BreakpointRegistry {
    fn default() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every breakpoint of `source` with `requested`.
    ///
    /// An empty request still registers the source (with no lines): receipt of a
    /// `setBreakpoints` is what matters to deferred start.
    pub fn replace(&self, source: &Source, requested: &[SourceBreakpoint]) -> Replaced {
        let key = path::normalize(source.path.as_deref().unwrap_or_default());
        let stripped_key = path::strip_resource_type(&key).to_owned();

        let mut entries = SourceBreakpoints::new();
        let mut breakpoints = Vec::with_capacity(requested.len());
        for bp in requested {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let log_message = bp
                .log_message
                .as_ref()
                .filter(|message| !message.trim().is_empty())
                .cloned();
            entries.insert(to_instrumented_line(bp.line), LineBreakpoint { id, log_message });
            breakpoints.push(Breakpoint {
                id,
                verified: true,
                line: bp.line,
                source: Some(source.clone()),
            });
        }
        let lines = entries.keys().copied().collect();

        {
            let mut sources = self.sources.write();
            if stripped_key != key {
                sources.insert(stripped_key.clone(), entries.clone());
            }
            sources.insert(key.clone(), entries);
        }

        tracing::debug!(
            target: "magic.dap",
            key = %key,
            stripped_key = %stripped_key,
            count = breakpoints.len(),
            "breakpoints replaced"
        );

        Replaced {
            key,
            stripped_key,
            lines,
            breakpoints,
        }
    }

    /// Breakpoints for the normalized `key`, trying the exact key first and then the key
    /// without its resource-type segment.
    pub fn lookup(&self, key: &str) -> Option<SourceBreakpoints> {
        let sources = self.sources.read();
        sources
            .get(key)
            .or_else(|| sources.get(path::strip_resource_type(key)))
            .cloned()
    }

    pub fn lines(&self, key: &str) -> BTreeSet<u32> {
        self.lookup(key)
            .map(|entries| entries.into_keys().collect())
            .unwrap_or_default()
    }

    /// Whether a `setBreakpoints` has been received for `key` (possibly with no lines).
    pub fn has_entry(&self, key: &str) -> bool {
        let sources = self.sources.read();
        sources.contains_key(key) || sources.contains_key(path::strip_resource_type(key))
    }

    pub fn get(&self, key: &str, instrumented_line: u32) -> Option<LineBreakpoint> {
        self.lookup(key)
            .and_then(|mut entries| entries.remove(&instrumented_line))
    }

    pub fn clear(&self) {
        self.sources.write().clear();
    }
}
