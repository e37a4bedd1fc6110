//! Aggregation engine: turns per-table snapshots into displayed report data
//!
//! Three strategies, selected by the table's shape:
//!
//! - leaf tables return their own stored snapshot;
//! - ordered summaries fold their children field-by-field, honouring the
//!   exclusion sets and the calculated-metric rules, then overlay their own
//!   manual entries for excluded metrics;
//! - the group root copies each named child's totals into that child's
//!   dedicated column pair and surfaces validation notes as issues.
//!
//! The engine only reads. Every read goes through a [`SnapshotSource`] so the
//! same code runs over the sled-backed store and over in-memory fixtures.
use super::registry::{NamedChild, Registry, RollupPolicy, TableDef, TableShape, Template};
use super::types::{
    AggregatedView, Cell, CellValue, Issue, IssueCategory, MetricSet, Payload, Row,
    SnapshotDocument, TableId, TableRef,
};
use super::types::{NAME_FIELD, PLAN_TOTAL_FIELD, SAME_PERIOD_TOTAL_FIELD, UNIT_FIELD};
use std::collections::BTreeMap;
use tracing::debug;

/// Read access to stored snapshot documents of one project.
pub trait SnapshotSource {
    fn document(&self, table_id: &str) -> SnapshotDocument;
}

impl SnapshotSource for BTreeMap<TableId, SnapshotDocument> {
    fn document(&self, table_id: &str) -> SnapshotDocument {
        self.get(table_id).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    /// Only submitted data is shown.
    #[default]
    Authoritative,
    /// A leaf with no submission shows its draft instead.
    Preview,
}

pub struct Aggregator<'a, S> {
    registry: &'a Registry,
    source: &'a S,
}

impl<'a, S: SnapshotSource> Aggregator<'a, S> {
    pub fn new(registry: &'a Registry, source: &'a S) -> Self {
        Self { registry, source }
    }

    /// `None` for unknown tables and for tables with nothing to show.
    pub fn compute_view(&self, table_id: &str, mode: ViewMode) -> Option<AggregatedView> {
        let table = self.registry.resolve(table_id)?;
        match &table.shape {
            TableShape::Leaf => self.leaf_view(table, mode),
            TableShape::Summary { children, rollup } => self.summary_view(table, children, *rollup),
            TableShape::GroupRoot { children } => self.group_view(table, children),
        }
    }

    fn leaf_view(&self, table: &TableDef, mode: ViewMode) -> Option<AggregatedView> {
        let doc = self.source.document(&table.id);
        let payload = match mode {
            ViewMode::Authoritative => doc.submitted,
            ViewMode::Preview => doc.submitted.or(doc.draft),
        };
        payload.map(AggregatedView::new)
    }

    /// The data a child contributes to an ordered summary.
    fn child_payload(&self, child: &TableDef, rollup: RollupPolicy) -> Option<Payload> {
        match rollup {
            RollupPolicy::Approved => self.source.document(&child.id).approved,
            RollupPolicy::Submitted if child.is_leaf() => self.source.document(&child.id).submitted,
            RollupPolicy::Submitted => self
                .compute_view(&child.id, ViewMode::Authoritative)
                .map(|view| view.submit),
        }
    }

    fn summary_view(
        &self,
        table: &TableDef,
        children: &[TableId],
        rollup: RollupPolicy,
    ) -> Option<AggregatedView> {
        let Some(template) = self.registry.template_for(table) else {
            tracing::warn!(table = %table.id, "summary table has no template");
            return None;
        };
        let calculated = template.calculated_metrics();
        let mut rows: Option<Vec<Row>> = None;

        for child_id in children {
            let Some(child) = self.registry.resolve(child_id) else {
                continue;
            };
            let Some(payload) = self.child_payload(child, rollup) else {
                debug!(table = %table.id, child = %child_id, ?rollup, "child has no data, skipped");
                continue;
            };

            let rows = rows.get_or_insert_with(|| {
                blank_rows(&payload.table_data, &table.aggregation_exclusions, template)
            });
            let fold = Fold {
                template,
                calculated: &calculated,
                parent_exclusions: &table.aggregation_exclusions,
                child_exclusions: &child.be_aggregated_exclusions,
            };
            fold.apply(rows, &payload.table_data);
        }

        let doc = self.source.document(&table.id);
        let manual = doc.submitted.or(doc.draft);

        let rows = match (rows, &manual) {
            (Some(rows), _) => rows,
            (None, Some(manual)) => {
                blank_rows(&manual.table_data, &table.aggregation_exclusions, template)
            }
            (None, None) => return None,
        };

        let mut aggregate = Payload::new(table_ref(table), rows);
        if let Some(manual) = manual {
            overlay_manual(&mut aggregate, manual, &table.aggregation_exclusions);
        }
        Some(AggregatedView::new(aggregate))
    }

    fn group_view(&self, table: &TableDef, children: &[NamedChild]) -> Option<AggregatedView> {
        let Some(template) = self.registry.template_for(table) else {
            tracing::warn!(table = %table.id, "group root has no template");
            return None;
        };

        let mut rows: Vec<Row> = template
            .metrics
            .iter()
            .map(|metric| {
                let mut values = vec![
                    Cell::new(NAME_FIELD, metric.name.as_str()),
                    Cell::new(UNIT_FIELD, metric.unit.as_str()),
                ];
                for child in children {
                    values.push(Cell::new(child.plan_field, 0.0));
                    values.push(Cell::new(child.same_period_field, 0.0));
                }
                Row::new(metric.id, values)
            })
            .collect();

        let mut summary = Vec::new();
        let mut contributed = false;

        for named in children {
            let doc = self.source.document(&named.table);
            let Some(payload) = doc.submitted.or(doc.approved) else {
                debug!(
                    table = %table.id,
                    child = %named.table,
                    key = %named.key,
                    "named child has no data"
                );
                continue;
            };
            contributed = true;
            let source_name = self
                .registry
                .resolve(&named.table)
                .map(|t| t.name.clone())
                .unwrap_or_else(|| payload.table.name.clone());

            for source_row in &payload.table_data {
                let dest = rows.iter_mut().find(|r| r.metric_id == source_row.metric_id);
                let Some(dest) = dest else {
                    continue;
                };
                for (from, to) in [
                    (PLAN_TOTAL_FIELD, named.plan_field),
                    (SAME_PERIOD_TOTAL_FIELD, named.same_period_field),
                ] {
                    let Some(cell) = source_row.cell(from) else {
                        continue;
                    };
                    let Some(dest_cell) = dest.cell_mut(to) else {
                        continue;
                    };
                    dest_cell.value = CellValue::Number(cell.value.as_number().unwrap_or(0.0));

                    let Some(explanation) = &cell.explanation else {
                        continue;
                    };
                    let Some(category) = IssueCategory::from_rule_key(&explanation.rule_key) else {
                        continue;
                    };
                    let issue = Issue {
                        category,
                        rule_key: explanation.rule_key.clone(),
                        message: explanation.text.clone(),
                        table_id: named.table.clone(),
                        table_name: source_name.clone(),
                        metric_id: source_row.metric_id,
                        field_id: to,
                    };
                    dest_cell.issues.push(issue.clone());
                    summary.push(issue);
                }
            }
        }

        if !contributed {
            return None;
        }

        Some(AggregatedView {
            submit: Payload::new(table_ref(table), rows),
            explanation_summary: summary,
        })
    }
}

fn table_ref(table: &TableDef) -> TableRef {
    TableRef {
        id: table.id.clone(),
        name: table.name.clone(),
    }
}

/// A zero-valued copy of `rows`: label cells and excluded rows are kept,
/// every other numeric cell is zeroed, and validation notes are dropped.
fn blank_rows(rows: &[Row], exclusions: &MetricSet, template: &Template) -> Vec<Row> {
    rows.iter()
        .map(|row| {
            let excluded = exclusions.contains(&row.metric_id);
            let values = row
                .values
                .iter()
                .map(|cell| {
                    let mut cell = cell.clone();
                    cell.explanation = None;
                    cell.issues.clear();
                    if !excluded
                        && !template.is_label(cell.field_id)
                        && cell.value.as_number().is_some()
                    {
                        cell.value = CellValue::Number(0.0);
                    }
                    cell
                })
                .collect();
            Row::new(row.metric_id, values)
        })
        .collect()
}

/// Adds one child's rows into the running aggregate.
struct Fold<'t> {
    template: &'t Template,
    calculated: &'t MetricSet,
    parent_exclusions: &'t MetricSet,
    child_exclusions: &'t MetricSet,
}

impl Fold<'_> {
    fn apply(&self, aggregate: &mut Vec<Row>, child_rows: &[Row]) {
        for row in child_rows {
            if self.parent_exclusions.contains(&row.metric_id)
                || self.child_exclusions.contains(&row.metric_id)
            {
                continue;
            }
            // recomputed downstream from its formula unless the child forced it
            if self.calculated.contains(&row.metric_id) && !row.force {
                continue;
            }

            let index = match aggregate.iter().position(|r| r.metric_id == row.metric_id) {
                Some(index) => index,
                None => {
                    aggregate.extend(blank_rows(
                        std::slice::from_ref(row),
                        self.parent_exclusions,
                        self.template,
                    ));
                    aggregate.len() - 1
                }
            };
            let target = &mut aggregate[index];

            for cell in &row.values {
                if !self.template.is_summable(cell.field_id) {
                    continue;
                }
                let contribution = cell.value.as_number().unwrap_or(0.0);
                match target.cell_mut(cell.field_id) {
                    Some(existing) => {
                        let current = existing.value.as_number().unwrap_or(0.0);
                        existing.value = CellValue::Number(current + contribution);
                    }
                    None => target.values.push(Cell::new(cell.field_id, contribution)),
                }
            }
        }
    }
}

/// Adopt the manual snapshot's signature and its rows for excluded metrics.
fn overlay_manual(aggregate: &mut Payload, manual: Payload, exclusions: &MetricSet) {
    aggregate.submitted_at = manual.submitted_at;
    aggregate.submitted_by = manual.submitted_by;

    for manual_row in manual.table_data {
        if !exclusions.contains(&manual_row.metric_id) {
            continue;
        }
        match aggregate
            .table_data
            .iter_mut()
            .find(|r| r.metric_id == manual_row.metric_id)
        {
            Some(row) => row.values = manual_row.values,
            None => aggregate.table_data.push(manual_row),
        }
    }
}
