use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::SpanRow;

pub const TOP_SPANS_LIMIT: usize = 20;
pub const SERVICES_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeMode {
    Tree,
    Fallback,
}

impl TreeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tree => "tree",
            Self::Fallback => "fallback",
        }
    }
}

/// Parent/child structure over indices into [`TraceView::spans`].
#[derive(Debug, Clone, PartialEq)]
pub struct SpanTree {
    pub roots: Vec<usize>,
    pub children: HashMap<usize, Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TraceLayout {
    Tree(SpanTree),
    /// Indices in chronological order.
    Fallback(Vec<usize>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceLine {
    pub depth: usize,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceMeta {
    pub span_count: usize,
    pub services: Vec<String>,
    pub first_start: Option<DateTime<Utc>>,
    pub last_start: Option<DateTime<Utc>>,
    pub errored: usize,
    pub total: usize,
    pub tree_mode: TreeMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceView {
    pub spans: Vec<SpanRow>,
    pub layout: TraceLayout,
    /// Indices of the longest spans, longest first.
    pub top_spans: Vec<usize>,
    pub meta: TraceMeta,
}

fn chronological(a: &SpanRow, b: &SpanRow) -> Ordering {
    a.start
        .cmp(&b.start)
        .then_with(|| b.duration_ms.total_cmp(&a.duration_ms))
        .then_with(|| a.span_id.cmp(&b.span_id))
}

/// Build the tree for one trace. When no span references a parent present in
/// the set the whole trace falls back to a flat chronological list.
pub fn reconstruct(spans: Vec<SpanRow>) -> TraceView {
    let mut by_id: HashMap<&str, usize> = HashMap::new();
    for (idx, span) in spans.iter().enumerate() {
        if !span.span_id.is_empty() {
            by_id.entry(span.span_id.as_str()).or_insert(idx);
        }
    }

    let mut roots = Vec::new();
    let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
    for (idx, span) in spans.iter().enumerate() {
        match span.parent_span_id.as_deref().and_then(|p| by_id.get(p)) {
            Some(&parent) => children.entry(parent).or_default().push(idx),
            None => roots.push(idx),
        }
    }

    let by_time = |a: &usize, b: &usize| chronological(&spans[*a], &spans[*b]);

    let layout = if children.is_empty() {
        let mut flat: Vec<usize> = (0..spans.len()).collect();
        flat.sort_by(by_time);
        TraceLayout::Fallback(flat)
    } else {
        for kids in children.values_mut() {
            kids.sort_by(by_time);
        }
        roots.sort_by(by_time);

        // Spans caught in a parent cycle are unreachable from any root; adopt
        // them as extra roots so every span is shown exactly once.
        let mut tree = SpanTree { roots, children };
        let reachable: HashSet<usize> = tree.lines().iter().map(|l| l.index).collect();
        let mut orphans: Vec<usize> = (0..spans.len())
            .filter(|idx| !reachable.contains(idx))
            .collect();
        orphans.sort_by(by_time);
        let mut seen = reachable;
        for idx in orphans {
            if seen.contains(&idx) {
                continue;
            }
            tree.roots.push(idx);
            let adopted = SpanTree {
                roots: vec![idx],
                children: tree.children.clone(),
            };
            seen.extend(adopted.lines().iter().map(|l| l.index));
        }
        TraceLayout::Tree(tree)
    };

    let mut top_spans: Vec<usize> = (0..spans.len()).collect();
    top_spans.sort_by(|a, b| {
        spans[*b]
            .duration_ms
            .total_cmp(&spans[*a].duration_ms)
            .then_with(|| chronological(&spans[*a], &spans[*b]))
    });
    top_spans.truncate(TOP_SPANS_LIMIT);

    let meta = summarize(&spans, &layout);
    TraceView {
        spans,
        layout,
        top_spans,
        meta,
    }
}

fn summarize(spans: &[SpanRow], layout: &TraceLayout) -> TraceMeta {
    let mut ordered: Vec<&SpanRow> = spans.iter().collect();
    ordered.sort_by(|a, b| chronological(a, b));

    let mut services: Vec<String> = Vec::new();
    for span in &ordered {
        if services.len() == SERVICES_LIMIT {
            break;
        }
        if !span.service.is_empty() && !services.contains(&span.service) {
            services.push(span.service.clone());
        }
    }

    TraceMeta {
        span_count: spans.len(),
        services,
        first_start: spans.iter().filter_map(|s| s.start).min(),
        last_start: spans.iter().filter_map(|s| s.start).max(),
        errored: spans.iter().filter(|s| s.is_error()).count(),
        total: spans.len(),
        tree_mode: match layout {
            TraceLayout::Tree(_) => TreeMode::Tree,
            TraceLayout::Fallback(_) => TreeMode::Fallback,
        },
    }
}

impl SpanTree {
    /// Depth-first pre-order walk; each span is emitted at most once.
    pub fn lines(&self) -> Vec<TraceLine> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<TraceLine> = self
            .roots
            .iter()
            .rev()
            .map(|&index| TraceLine { depth: 0, index })
            .collect();

        while let Some(line) = stack.pop() {
            if !visited.insert(line.index) {
                continue;
            }
            out.push(line);
            if let Some(kids) = self.children.get(&line.index) {
                for &child in kids.iter().rev() {
                    stack.push(TraceLine {
                        depth: line.depth + 1,
                        index: child,
                    });
                }
            }
        }
        out
    }
}

impl TraceView {
    pub fn mode(&self) -> TreeMode {
        self.meta.tree_mode
    }

    pub fn lines(&self) -> Vec<TraceLine> {
        match &self.layout {
            TraceLayout::Tree(tree) => tree.lines(),
            TraceLayout::Fallback(order) => order
                .iter()
                .map(|&index| TraceLine { depth: 0, index })
                .collect(),
        }
    }

    pub fn render_line(&self, line: TraceLine) -> String {
        let span = &self.spans[line.index];
        let marker = if span.is_error() { "ERR" } else { "OK" };
        format!(
            "{}{marker} {} {} ({:.1}ms)",
            "  ".repeat(line.depth),
            span.service,
            span.operation,
            span.duration_ms
        )
    }
}
