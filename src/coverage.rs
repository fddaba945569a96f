//! API operation coverage.
//!
//! Compares the operations declared in an OpenAPI schema with the
//! `@apiOperation:<operationId>` tags carried by scenarios.

use crate::model::{HttpMethod, Scenario};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const METHODS: [(&str, HttpMethod); 5] = [
    ("get", HttpMethod::Get),
    ("post", HttpMethod::Post),
    ("put", HttpMethod::Put),
    ("patch", HttpMethod::Patch),
    ("delete", HttpMethod::Delete),
];

/// One schema operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Endpoint {
    pub operation_id: String,
    pub path: String,
    pub method: HttpMethod,
    pub summary: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageLevel {
    /// At least 80%.
    Good,
    /// At least 60%.
    NeedsImprovement,
    Critical,
}

impl CoverageLevel {
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 80.0 {
            CoverageLevel::Good
        } else if percentage >= 60.0 {
            CoverageLevel::NeedsImprovement
        } else {
            CoverageLevel::Critical
        }
    }
}

impl std::fmt::Display for CoverageLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoverageLevel::Good => write!(f, "good"),
            CoverageLevel::NeedsImprovement => write!(f, "needs improvement"),
            CoverageLevel::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageStats {
    pub total: usize,
    pub covered: usize,
    pub percentage: f64,
    pub level: CoverageLevel,
}

impl CoverageStats {
    pub fn new(total: usize, covered: usize) -> Self {
        let percentage = if total > 0 {
            covered as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total,
            covered,
            percentage,
            level: CoverageLevel::from_percentage(percentage),
        }
    }

    pub fn uncovered(&self) -> usize {
        self.total - self.covered
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    pub summary: CoverageStats,
    pub covered: Vec<Endpoint>,
    pub uncovered: Vec<Endpoint>,
    pub by_tag: BTreeMap<String, CoverageStats>,
    pub by_method: BTreeMap<HttpMethod, CoverageStats>,
    /// Operation ids tagged on scenarios but absent from the schema,
    /// with the names of the scenarios carrying them.
    pub unknown_operations: BTreeMap<String, Vec<String>>,
}

/// Read an OpenAPI schema from a JSON file.
pub fn load_schema<P: AsRef<Path>>(path: P) -> Result<Value> {
    let path = path.as_ref();
    info!("Loading OpenAPI schema from {}", path.display());
    let content = fs::read_to_string(path)
        .context(format!("Failed to read schema file: {}", path.display()))?;
    serde_json::from_str(&content)
        .context(format!("Invalid JSON in schema file: {}", path.display()))
}

/// Every operation with an `operationId`, in schema path order.
pub fn extract_operations(schema: &Value) -> Vec<Endpoint> {
    let Some(paths) = schema.get("paths").and_then(Value::as_object) else {
        debug!("schema has no paths");
        return Vec::new();
    };

    let mut operations = Vec::new();
    for (path, item) in paths {
        for (key, method) in METHODS {
            let Some(operation) = item.get(key) else {
                continue;
            };
            let operation_id = operation
                .get("operationId")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if operation_id.is_empty() {
                continue;
            }
            operations.push(Endpoint {
                operation_id: operation_id.to_string(),
                path: path.clone(),
                method,
                summary: operation
                    .get("summary")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                tags: operation
                    .get("tags")
                    .and_then(Value::as_array)
                    .map(|tags| {
                        tags.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            });
        }
    }
    operations
}

/// Map each tagged operation id to the scenarios that exercise it.
pub fn operation_tags(scenarios: &[Scenario]) -> BTreeMap<String, Vec<String>> {
    let mut tags: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for scenario in scenarios {
        for id in scenario.operation_ids() {
            let names = tags.entry(id.to_string()).or_default();
            if !names.contains(&scenario.name) {
                names.push(scenario.name.clone());
            }
        }
    }
    tags
}

pub fn analyze(operations: &[Endpoint], tags: &BTreeMap<String, Vec<String>>) -> CoverageReport {
    let (covered, uncovered): (Vec<Endpoint>, Vec<Endpoint>) = operations
        .iter()
        .cloned()
        .partition(|op| tags.contains_key(&op.operation_id));

    let mut tag_counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    let mut method_counts: BTreeMap<HttpMethod, (usize, usize)> = BTreeMap::new();
    for (ops, is_covered) in [(&covered, true), (&uncovered, false)] {
        for op in ops {
            for tag in &op.tags {
                let counts = tag_counts.entry(tag.clone()).or_default();
                counts.0 += 1;
                counts.1 += usize::from(is_covered);
            }
            let counts = method_counts.entry(op.method).or_default();
            counts.0 += 1;
            counts.1 += usize::from(is_covered);
        }
    }

    let unknown_operations = tags
        .iter()
        .filter(|(id, _)| !operations.iter().any(|op| &op.operation_id == *id))
        .map(|(id, names)| (id.clone(), names.clone()))
        .collect();

    CoverageReport {
        summary: CoverageStats::new(operations.len(), covered.len()),
        covered,
        uncovered,
        by_tag: tag_counts
            .into_iter()
            .map(|(tag, (total, hit))| (tag, CoverageStats::new(total, hit)))
            .collect(),
        by_method: method_counts
            .into_iter()
            .map(|(method, (total, hit))| (method, CoverageStats::new(total, hit)))
            .collect(),
        unknown_operations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "openapi": "3.0.3",
            "paths": {
                "/organizations/{org}/projects/": {
                    "get": {"operationId": "projects_list", "tags": ["projects"]},
                    "post": {"operationId": "projects_create", "tags": ["projects"], "summary": "Create a project"}
                },
                "/organizations/{org}/projects/{project}/functions/": {
                    "get": {"operationId": "functions_list", "tags": ["functions"]},
                    "post": {"operationId": "functions_create", "tags": ["functions"]},
                    "parameters": [{"name": "org", "in": "path"}]
                },
                "/organizations/{org}/projects/{project}/functions/{id}/": {
                    "get": {"operationId": "functions_retrieve", "tags": ["functions"]},
                    "delete": {"operationId": "functions_destroy", "tags": ["functions"]},
                    "head": {"operationId": "functions_head"},
                    "put": {"summary": "no operation id"}
                }
            }
        })
    }

    fn scenario(name: &str, tags: &[&str]) -> Scenario {
        Scenario {
            name: name.to_string(),
            description: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            steps: Vec::new(),
        }
    }

    // ── extract_operations ──────────────────────────────

    #[test]
    fn test_extract_operations() {
        let ops = extract_operations(&schema());
        let ids: Vec<&str> = ops.iter().map(|op| op.operation_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "projects_list",
                "projects_create",
                "functions_list",
                "functions_create",
                "functions_retrieve",
                "functions_destroy",
            ]
        );
        assert_eq!(ops[1].method, HttpMethod::Post);
        assert_eq!(ops[1].summary, "Create a project");
        assert_eq!(ops[1].tags, vec!["projects"]);
        assert_eq!(ops[5].path, "/organizations/{org}/projects/{project}/functions/{id}/");
    }

    #[test]
    fn test_extract_operations_without_paths() {
        assert!(extract_operations(&json!({"openapi": "3.0.3"})).is_empty());
    }

    // ── analyze ─────────────────────────────────────────

    #[test]
    fn test_operation_tags_group_scenarios() {
        let scenarios = vec![
            scenario("create", &["@apiOperation:functions_create", "smoke"]),
            scenario("bulk", &["@apiOperation:functions_create"]),
            scenario("list", &["@apiOperation:functions_list", "@apiOperation:"]),
        ];
        let tags = operation_tags(&scenarios);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags["functions_create"], vec!["create", "bulk"]);
        assert_eq!(tags["functions_list"], vec!["list"]);
    }

    #[test]
    fn test_analyze_coverage() {
        let ops = extract_operations(&schema());
        let tags = operation_tags(&[
            scenario("a", &["@apiOperation:projects_list"]),
            scenario("b", &["@apiOperation:functions_create"]),
            scenario("c", &["@apiOperation:functions_list", "@apiOperation:functions_retrieve"]),
            scenario("d", &["@apiOperation:functions_archive"]),
        ]);

        let report = analyze(&ops, &tags);

        assert_eq!(report.summary.total, 6);
        assert_eq!(report.summary.covered, 4);
        assert_eq!(report.summary.uncovered(), 2);
        assert!((report.summary.percentage - 66.666).abs() < 0.01);
        assert_eq!(report.summary.level, CoverageLevel::NeedsImprovement);

        let uncovered: Vec<&str> = report
            .uncovered
            .iter()
            .map(|op| op.operation_id.as_str())
            .collect();
        assert_eq!(uncovered, vec!["projects_create", "functions_destroy"]);

        assert_eq!(report.by_tag["projects"], CoverageStats::new(2, 1));
        assert_eq!(report.by_tag["functions"].covered, 3);
        assert_eq!(report.by_tag["functions"].level, CoverageLevel::NeedsImprovement);
        assert_eq!(report.by_tag["projects"].level, CoverageLevel::Critical);
        assert_eq!(report.by_method[&HttpMethod::Get], CoverageStats::new(3, 3));
        assert_eq!(report.by_method[&HttpMethod::Get].level, CoverageLevel::Good);
        assert_eq!(report.by_method[&HttpMethod::Post].covered, 1);
        assert_eq!(report.by_method[&HttpMethod::Delete].covered, 0);

        assert_eq!(
            report.unknown_operations.keys().collect::<Vec<_>>(),
            vec!["functions_archive"]
        );
        assert_eq!(report.unknown_operations["functions_archive"], vec!["d"]);
    }

    #[test]
    fn test_empty_schema_has_zero_coverage() {
        let report = analyze(&[], &BTreeMap::new());
        assert_eq!(report.summary.total, 0);
        assert_eq!(report.summary.percentage, 0.0);
        assert_eq!(report.summary.level, CoverageLevel::Critical);
        assert!(report.by_tag.is_empty());
    }

    #[test]
    fn test_load_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openapi.json");
        std::fs::write(&path, schema().to_string()).unwrap();
        assert_eq!(extract_operations(&load_schema(&path).unwrap()).len(), 6);

        std::fs::write(&path, "{not json").unwrap();
        assert!(load_schema(&path).is_err());
        assert!(load_schema(dir.path().join("missing.json")).is_err());
    }
}
