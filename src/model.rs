//! Scenario, step and result types.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Tag prefix linking a scenario to the API operation it covers.
pub const OPERATION_TAG_PREFIX: &str = "@apiOperation:";

static COLUMN_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^<>]+)>").expect("failed to compile column token regex"));

/// A scenario: an ordered list of steps with a single outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Tags for filtering and grouping scenarios.
    #[serde(default)]
    pub tags: Vec<String>,
    pub steps: Vec<Step>,
}

/// A scenario as written in a file. Steps stay untyped until
/// [`instantiate`](ScenarioOutline::instantiate) has substituted the
/// `<column>` tokens of each `examples` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioOutline {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub steps: Vec<Value>,
    #[serde(default)]
    pub examples: Vec<HashMap<String, Value>>,
}

/// A single step. Steps are context setters, actions, history
/// operations or assertions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Send requests with the provider's token (the default).
    Authenticated,
    /// Send requests without credentials.
    NotAuthenticated,
    /// Send requests with a token the API cannot know.
    InvalidToken,
    /// Address an organization that does not exist.
    NonexistentOrganization,
    DefaultOrganization,
    /// Create (or reuse) a fixture through the fixture cache.
    Fixture(FixtureStep),
    /// Send a request and push the response onto the history.
    Request(RequestStep),
    /// Move the response at the given 1-based position to the end of
    /// the history.
    MoveToFront(usize),
    /// Point subsequent assertions at one element of a list response.
    Extract(ExtractStep),
    /// Point subsequent assertions back at the current response.
    ReleaseElement,
    Expect(Assertion),
}

impl Step {
    /// Short human-readable label used in step results and logs.
    pub fn describe(&self) -> String {
        match self {
            Step::Authenticated => "I am authenticated".to_string(),
            Step::NotAuthenticated => "I am not authenticated".to_string(),
            Step::InvalidToken => "I use an invalid token".to_string(),
            Step::NonexistentOrganization => {
                "I work with a non existing organization".to_string()
            }
            Step::DefaultOrganization => {
                "I work with the default organization".to_string()
            }
            Step::Fixture(f) => {
                if f.once {
                    format!("fixture '{}' (just one time)", f.key)
                } else {
                    format!("fixture '{}'", f.key)
                }
            }
            Step::Request(r) => format!("{} {}", r.method, r.resource),
            Step::MoveToFront(p) => format!("move response {p} to front"),
            Step::Extract(e) => match e.position {
                Some(p) => {
                    format!("extract element {} of response {p}", e.element)
                }
                None => format!("extract element {}", e.element),
            },
            Step::ReleaseElement => "use current response".to_string(),
            Step::Expect(a) => format!("expect {}", a.describe()),
        }
    }
}

/// Logical request target. Combined with the project / function refs
/// by [`ResourcePaths`](crate::client::ResourcePaths).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Organization,
    Projects,
    Project,
    Functions,
    Function,
    /// Literal path below the API root.
    Path(String),
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Organization => write!(f, "organization"),
            ResourceKind::Projects => write!(f, "projects"),
            ResourceKind::Project => write!(f, "project"),
            ResourceKind::Functions => write!(f, "functions"),
            ResourceKind::Function => write!(f, "function"),
            ResourceKind::Path(p) => write!(f, "{p}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStep {
    pub method: HttpMethod,
    pub resource: ResourceKind,
    /// Project reference; may contain placeholders.
    #[serde(default)]
    pub project: Option<String>,
    /// Function reference; may contain placeholders.
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureStep {
    /// Cache key, e.g. the project name.
    pub key: String,
    /// Create at most once per run ("just one time").
    #[serde(default)]
    pub once: bool,
    pub request: RequestStep,
    /// Field of the creation response holding the identifier.
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

fn default_id_field() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractStep {
    /// 1-based history position; the current response when omitted.
    #[serde(default)]
    pub position: Option<usize>,
    /// 1-based element index within the list body.
    pub element: usize,
}

/// Expected-vs-actual checks evaluated by
/// [`validator::evaluate`](crate::validator::evaluate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assertion {
    Status(u16),
    FieldEquals {
        path: String,
        value: Value,
    },
    /// The key exists; `null` is accepted.
    FieldPresent(String),
    /// The key is absent or `null`.
    FieldAbsent(String),
    /// Every path resolves to a non-null value.
    FieldsPresent(Vec<String>),
    /// Size of the array or object at `path` (the body when omitted).
    Length {
        #[serde(default)]
        path: Option<String>,
        len: usize,
    },
    /// Validation error located by field name.
    ErrorAlert {
        message: String,
        field: String,
        /// 1-based bulk item; every item is scanned when omitted.
        #[serde(default)]
        item: Option<usize>,
    },
    /// Error carried in the flat message field (`detail` and friends).
    ErrorMessage(String),
}

impl Assertion {
    pub fn describe(&self) -> String {
        match self {
            Assertion::Status(s) => format!("status {s}"),
            Assertion::FieldEquals { path, value } => {
                format!("'{path}' == {value}")
            }
            Assertion::FieldPresent(p) => format!("'{p}' present"),
            Assertion::FieldAbsent(p) => format!("'{p}' absent or null"),
            Assertion::FieldsPresent(ps) => {
                format!("fields present: {}", ps.join(", "))
            }
            Assertion::Length { path, len } => match path {
                Some(p) => format!("'{p}' has {len} entries"),
                None => format!("body has {len} entries"),
            },
            Assertion::ErrorAlert { message, field, .. } => {
                format!("error alert '{message}' on '{field}'")
            }
            Assertion::ErrorMessage(m) => format!("error message '{m}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        };
        f.write_str(s)
    }
}

/// Captured outcome of one action step. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub status: u16,
    pub body: Value,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ResponseRecord {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            headers: HashMap::new(),
        }
    }
}

impl Scenario {
    /// Deserialize a scenario from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize the scenario to a YAML string.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Operation ids named by `@apiOperation:<id>` tags.
    pub fn operation_ids(&self) -> Vec<&str> {
        self.tags
            .iter()
            .filter_map(|t| t.strip_prefix(OPERATION_TAG_PREFIX))
            .filter(|id| !id.is_empty())
            .collect()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

impl ScenarioOutline {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Expand outline rows into independent scenarios.
    ///
    /// An outline without `examples` expands to exactly one scenario.
    pub fn instantiate(&self) -> Result<Vec<Scenario>> {
        if self.examples.is_empty() {
            let steps = Self::typed_steps(self.steps.clone())
                .context(format!("Invalid steps in '{}'", self.name))?;
            return Ok(vec![self.scenario(self.name.clone(), steps)]);
        }

        let template = Value::Array(self.steps.clone());
        self.examples
            .iter()
            .enumerate()
            .map(|(idx, row)| {
                let steps = Self::typed_steps(substitute_row(&template, row))
                    .context(format!(
                        "Row {} of '{}' does not yield valid steps",
                        idx + 1,
                        self.name
                    ))?;
                Ok(self.scenario(
                    format!("{} [row {}]", self.name, idx + 1),
                    steps,
                ))
            })
            .collect()
    }

    fn typed_steps(value: impl Into<Value>) -> Result<Vec<Step>> {
        Ok(serde_json::from_value(value.into())?)
    }

    fn scenario(&self, name: String, steps: Vec<Step>) -> Scenario {
        Scenario {
            name,
            description: self.description.clone(),
            tags: self.tags.clone(),
            steps,
        }
    }
}

/// Replace `<column>` tokens in every string of `value`.
///
/// A string consisting of exactly one token takes the row value with
/// its JSON type. Substituted text is never scanned again.
fn substitute_row(value: &Value, row: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => {
            if let Some(column) = s.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
                if let Some(replacement) = row.get(column) {
                    return replacement.clone();
                }
            }
            let text = COLUMN_TOKEN_RE.replace_all(s, |caps: &Captures<'_>| {
                match row.get(&caps[1]) {
                    Some(replacement) => crate::resolver::stringify(replacement),
                    None => caps[0].to_string(),
                }
            });
            Value::String(text.into_owned())
        }
        Value::Array(items) => Value::Array(
            items.iter().map(|v| substitute_row(v, row)).collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_row(v, row)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Final state of a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed {
        /// 1-based index of the failing step.
        step: usize,
        detail: String,
    },
}

/// Result of running a single scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub outcome: Outcome,
    pub steps: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ScenarioResult {
    pub fn success(&self) -> bool {
        self.outcome == Outcome::Passed
    }

    /// Detail of the first failure, if any.
    pub fn failure(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Passed => None,
            Outcome::Failed { detail, .. } => Some(detail),
        }
    }
}

/// Result of running a single step within a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub success: bool,
    pub error: Option<String>,
    /// Status of the response recorded by this step, for actions.
    pub status: Option<u16>,
    pub duration_ms: u64,
}

/// Results of a batch of scenarios.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub scenarios: Vec<ScenarioResult>,
    pub total_duration_ms: u64,
}

impl SuiteResult {
    pub fn passed(&self) -> usize {
        self.scenarios.iter().filter(|s| s.success()).count()
    }

    pub fn failed(&self) -> usize {
        self.scenarios.len() - self.passed()
    }
}
