#![allow(dead_code)]

use plan_rollup::PlanService;
use plan_rollup::identity::{Actor, Directory, Role};
use plan_rollup::registry::{
    Catalog, Field, FieldComponent, Metric, MetricKind, NamedChild, Registry, RollupPolicy,
    TableDef, Template,
};
use plan_rollup::types::{Cell, FieldSet, Payload, Row, TableRef};
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

pub const PROJECT: &str = "heating_plan_2025-2026";

fn metric(id: u32, name: &str, kind: MetricKind) -> Metric {
    Metric {
        id,
        category: "产量".into(),
        name: name.into(),
        unit: "万kWh".into(),
        kind,
        formula: None,
        style: None,
        required_properties: Default::default(),
    }
}

fn field(id: u32, name: &str, component: FieldComponent) -> Field {
    Field {
        id,
        name: name.into(),
        label: String::new(),
        component,
        formula: None,
    }
}

pub fn templates() -> Vec<Template> {
    let metrics = vec![
        metric(6, "发电量", MetricKind::Basic),
        metric(7, "供热量", MetricKind::Calculated),
    ];
    vec![
        Template {
            name: "subsidiary".into(),
            metrics: metrics.clone(),
            fields: vec![
                field(1001, "name", FieldComponent::Label),
                field(1002, "unit", FieldComponent::Label),
                field(1003, "totals.plan", FieldComponent::Display),
                field(1004, "totals.samePeriod", FieldComponent::Display),
                field(1005, "totals.diffRate", FieldComponent::Display),
            ],
            derived_fields: FieldSet::from([1005]),
        },
        Template {
            name: "group".into(),
            metrics,
            fields: vec![
                field(1001, "name", FieldComponent::Label),
                field(1002, "unit", FieldComponent::Label),
            ],
            derived_fields: FieldSet::new(),
        },
    ]
}

/// `0` group root over `S` and `C`; `G` approved rollup of `S` and `C`;
/// `S` submitted rollup of leaves `A` and `B` in region `downtown`.
pub fn tables() -> Vec<TableDef> {
    vec![
        TableDef::group_root(
            "0",
            "0 集团分单位汇总表",
            "group",
            vec![
                NamedChild {
                    key: "downtown".into(),
                    table: "S".into(),
                    plan_field: 3001,
                    same_period_field: 3002,
                },
                NamedChild {
                    key: "jinzhou".into(),
                    table: "C".into(),
                    plan_field: 3003,
                    same_period_field: 3004,
                },
            ],
        ),
        TableDef::summary("G", "G 集团汇总表", "subsidiary", &["S", "C"], RollupPolicy::Approved),
        TableDef::summary("S", "S 主城区汇总表", "subsidiary", &["A", "B"], RollupPolicy::Submitted)
            .in_region("downtown"),
        TableDef::leaf("A", "A 北海热电厂表", "subsidiary").owned_by_unit("beihai"),
        TableDef::leaf("B", "B 香海热电厂表", "subsidiary").owned_by_unit("xianghai"),
        TableDef::leaf("C", "C 金州热电表", "subsidiary").owned_by_unit("jinzhou"),
    ]
}

pub fn users() -> Vec<Actor> {
    vec![
        Actor::new("admin", Role::Top),
        Actor::new("ghost", Role::Top).hidden(),
        Actor::new("downtown", Role::Regional).with_region("downtown"),
        Actor::new("beihai", Role::Unit).with_unit("beihai"),
        Actor::new("xianghai", Role::Unit).with_unit("xianghai"),
        Actor::new("jinzhou", Role::Unit).with_unit("jinzhou"),
    ]
}

pub fn service_with(tables: Vec<TableDef>) -> anyhow::Result<(TempDir, PlanService)> {
    // Sled locks its directory, so every test gets its own database.
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join("plan.db"))?;

    let catalog = Catalog::new().with(Registry::new(PROJECT, templates(), tables)?)?;
    let directory = Directory::new(users())?;
    let service = PlanService::new(Arc::new(db), catalog, Arc::new(directory))?;
    Ok((temp_dir, service))
}

pub fn service() -> anyhow::Result<(TempDir, PlanService)> {
    service_with(tables())
}

/// One metric-6 row with its label cells and totals.
pub fn row(plan: f64, same_period: f64) -> Row {
    Row::new(
        6,
        vec![
            Cell::new(1001, "发电量"),
            Cell::new(1002, "万kWh"),
            Cell::new(1003, plan),
            Cell::new(1004, same_period),
            Cell::new(1005, 0.0),
        ],
    )
}

pub fn payload(rows: Vec<Row>) -> Payload {
    Payload::new(
        TableRef {
            id: String::new(),
            name: String::new(),
        },
        rows,
    )
}
