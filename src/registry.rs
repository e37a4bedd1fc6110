//! Hierarchy registry: immutable table/template definitions for one project
//!
//! Built once from configuration and shared read-only afterwards. Construction
//! validates the whole child graph, so every lookup past `Registry::new` can
//! assume ids resolve and the graph is acyclic.
use super::error::ConfigError;
use super::types::{FieldId, FieldSet, MetricId, MetricSet, TableId};
use super::types::{METRIC_ID_FIELD, NAME_FIELD, UNIT_FIELD};
use super::utils::is_valid_id;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    #[default]
    Basic,
    Calculated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub id: MetricId,
    #[serde(default)]
    pub category: String,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: MetricKind,
    // evaluated by the presentation layer only
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub style: Option<serde_json::Value>,
    #[serde(default)]
    pub required_properties: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldComponent {
    Label,
    Input,
    #[default]
    Display,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: FieldId,
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub component: FieldComponent,
    #[serde(default)]
    pub formula: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub name: String,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub fields: Vec<Field>,
    /// Columns recomputed downstream and never summed.
    #[serde(default)]
    pub derived_fields: FieldSet,
}

impl Template {
    pub fn metric(&self, id: MetricId) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.id == id)
    }

    pub fn calculated_metrics(&self) -> MetricSet {
        self.metrics
            .iter()
            .filter(|m| m.kind == MetricKind::Calculated)
            .map(|m| m.id)
            .collect()
    }

    /// Label columns are copied verbatim and never summed. Fields the template
    /// does not declare fall back to the reserved label ids.
    pub fn is_label(&self, field_id: FieldId) -> bool {
        match self.fields.iter().find(|f| f.id == field_id) {
            Some(field) => field.component == FieldComponent::Label,
            None => matches!(field_id, METRIC_ID_FIELD | NAME_FIELD | UNIT_FIELD),
        }
    }

    pub fn is_summable(&self, field_id: FieldId) -> bool {
        !self.is_label(field_id) && !self.derived_fields.contains(&field_id)
    }
}

/// Which version of a child an ordered summary rolls up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupPolicy {
    #[default]
    Approved,
    Submitted,
}

/// A group-root child and the destination column pair it fills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedChild {
    pub key: String,
    pub table: TableId,
    pub plan_field: FieldId,
    pub same_period_field: FieldId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TableShape {
    Leaf,
    Summary {
        children: Vec<TableId>,
        #[serde(default)]
        rollup: RollupPolicy,
    },
    GroupRoot {
        children: Vec<NamedChild>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDef {
    pub id: TableId,
    pub name: String,
    pub template: String,
    #[serde(flatten)]
    pub shape: TableShape,
    #[serde(default)]
    pub aggregation_exclusions: MetricSet,
    #[serde(default)]
    pub be_aggregated_exclusions: MetricSet,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl TableDef {
    pub fn leaf(id: &str, name: &str, template: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            template: template.to_string(),
            shape: TableShape::Leaf,
            aggregation_exclusions: MetricSet::new(),
            be_aggregated_exclusions: MetricSet::new(),
            unit: None,
            region: None,
        }
    }

    pub fn summary(
        id: &str,
        name: &str,
        template: &str,
        children: &[&str],
        rollup: RollupPolicy,
    ) -> Self {
        Self {
            shape: TableShape::Summary {
                children: children.iter().map(|c| c.to_string()).collect(),
                rollup,
            },
            ..Self::leaf(id, name, template)
        }
    }

    pub fn group_root(id: &str, name: &str, template: &str, children: Vec<NamedChild>) -> Self {
        Self {
            shape: TableShape::GroupRoot { children },
            ..Self::leaf(id, name, template)
        }
    }

    pub fn owned_by_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn in_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.shape, TableShape::Leaf)
    }

    /// Direct children in declaration order.
    pub fn children(&self) -> Vec<&str> {
        match &self.shape {
            TableShape::Leaf => vec![],
            TableShape::Summary { children, .. } => children.iter().map(String::as_str).collect(),
            TableShape::GroupRoot { children } => {
                children.iter().map(|c| c.table.as_str()).collect()
            }
        }
    }
}

#[derive(Debug)]
pub struct Registry {
    project: String,
    tables: BTreeMap<TableId, TableDef>,
    order: Vec<TableId>,
    templates: BTreeMap<String, Template>,
    parents: BTreeMap<TableId, Vec<TableId>>,
}

impl Registry {
    pub fn new(
        project: impl Into<String>,
        templates: Vec<Template>,
        tables: Vec<TableDef>,
    ) -> Result<Self, ConfigError> {
        let project: String = project.into();
        if !is_valid_id(&project) {
            return Err(ConfigError::InvalidId(project));
        }

        let mut template_map = BTreeMap::new();
        for template in templates {
            let name = template.name.clone();
            if template_map.insert(name.clone(), template).is_some() {
                return Err(ConfigError::DuplicateTemplate(name));
            }
        }

        let mut order = Vec::with_capacity(tables.len());
        let mut table_map = BTreeMap::new();
        let mut group_root: Option<TableId> = None;
        for table in tables {
            if !is_valid_id(&table.id) {
                return Err(ConfigError::InvalidId(table.id));
            }
            if !template_map.contains_key(&table.template) {
                return Err(ConfigError::UnknownTemplate {
                    table: table.id.clone(),
                    template: table.template.clone(),
                });
            }
            if let TableShape::GroupRoot { children } = &table.shape {
                if let Some(existing) = &group_root {
                    return Err(ConfigError::MultipleGroupRoots(
                        existing.clone(),
                        table.id.clone(),
                    ));
                }
                check_named_columns(&table.id, children)?;
                group_root = Some(table.id.clone());
            }
            order.push(table.id.clone());
            if let Some(dup) = table_map.insert(table.id.clone(), table) {
                return Err(ConfigError::DuplicateTable(dup.id));
            }
        }

        let mut parents: BTreeMap<TableId, Vec<TableId>> = BTreeMap::new();
        for id in &order {
            let table = &table_map[id];
            for child in table.children() {
                if !table_map.contains_key(child) {
                    return Err(ConfigError::DanglingChild {
                        parent: id.clone(),
                        child: child.to_string(),
                    });
                }
                let entry = parents.entry(child.to_string()).or_default();
                if !entry.contains(id) {
                    entry.push(id.clone());
                }
            }
        }

        check_acyclic(&table_map, &order)?;

        Ok(Self {
            project,
            tables: table_map,
            order,
            templates: template_map,
            parents,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn resolve(&self, table_id: &str) -> Option<&TableDef> {
        self.tables.get(table_id)
    }

    /// Tables in declaration order.
    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.order.iter().filter_map(|id| self.tables.get(id))
    }

    pub fn children(&self, table_id: &str) -> Vec<&str> {
        self.resolve(table_id).map(TableDef::children).unwrap_or_default()
    }

    pub fn parents(&self, table_id: &str) -> &[TableId] {
        self.parents.get(table_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn template(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    pub fn template_for(&self, table: &TableDef) -> Option<&Template> {
        self.template(&table.template)
    }

    pub fn group_root(&self) -> Option<&TableDef> {
        self.tables()
            .find(|t| matches!(t.shape, TableShape::GroupRoot { .. }))
    }

    /// All transitive children of `table_id`, excluding itself.
    pub fn descendants(&self, table_id: &str) -> BTreeSet<TableId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = self.children(table_id).into_iter().collect();
        while let Some(id) = queue.pop_front() {
            if seen.insert(id.to_string()) {
                queue.extend(self.children(id));
            }
        }
        seen
    }

    /// Tables owned by `region` plus everything beneath them.
    pub fn region_scope(&self, region: &str) -> BTreeSet<TableId> {
        let mut scope = BTreeSet::new();
        for table in self.tables().filter(|t| t.region.as_deref() == Some(region)) {
            scope.insert(table.id.clone());
            scope.extend(self.descendants(&table.id));
        }
        scope
    }
}

fn check_named_columns(table: &str, children: &[NamedChild]) -> Result<(), ConfigError> {
    let mut used = BTreeSet::new();
    for child in children {
        for field in [child.plan_field, child.same_period_field] {
            if !used.insert(field) {
                return Err(ConfigError::OverlappingColumns {
                    table: table.to_string(),
                    field,
                });
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

fn check_acyclic(
    tables: &BTreeMap<TableId, TableDef>,
    order: &[TableId],
) -> Result<(), ConfigError> {
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut path = Vec::new();
    for id in order {
        visit(id, tables, &mut marks, &mut path)?;
    }
    Ok(())
}

fn visit<'a>(
    id: &'a str,
    tables: &'a BTreeMap<TableId, TableDef>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Result<(), ConfigError> {
    match marks.get(id) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|p| *p == id).unwrap_or(0);
            let mut cycle: Vec<TableId> = path[start..].iter().map(|p| p.to_string()).collect();
            cycle.push(id.to_string());
            return Err(ConfigError::Cycle(cycle));
        }
        None => {}
    }

    marks.insert(id, Mark::Visiting);
    path.push(id);
    if let Some(table) = tables.get(id) {
        for child in table.children() {
            visit(child, tables, marks, path)?;
        }
    }
    path.pop();
    marks.insert(id, Mark::Done);
    Ok(())
}

/// Registries for every configured project.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    projects: BTreeMap<String, Arc<Registry>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, registry: Registry) -> Result<(), ConfigError> {
        let project = registry.project().to_string();
        if self.projects.contains_key(&project) {
            return Err(ConfigError::DuplicateProject(project));
        }
        self.projects.insert(project, Arc::new(registry));
        Ok(())
    }

    pub fn with(mut self, registry: Registry) -> Result<Self, ConfigError> {
        self.insert(registry)?;
        Ok(self)
    }

    pub fn get(&self, project: &str) -> Option<&Arc<Registry>> {
        self.projects.get(project)
    }

    pub fn projects(&self) -> impl Iterator<Item = &Registry> {
        self.projects.values().map(Arc::as_ref)
    }
}
