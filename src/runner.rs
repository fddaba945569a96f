//! Scenario execution

use crate::client::{
    AuthProvider, HttpClient, OrganizationRef, OutgoingRequest, ReqwestClient, ResourcePaths,
    StaticToken, INVALID_TOKEN,
};
use crate::config::RunConfig;
use crate::error::{EngineError, EngineResult};
use crate::fixture::{FixtureCache, ResourceHandle};
use crate::history::ResponseHistory;
use crate::model::*;
use crate::resolver::{stringify, Resolver};
use crate::validator::{self, get_by_json_path};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

/// Scenario runner trait
#[async_trait]
pub trait ScenarioRunner: Send + Sync {
    /// Execute a scenario. Engine errors fail the scenario; they are
    /// never returned to the caller.
    async fn run(&self, scenario: &Scenario) -> ScenarioResult;
}

/// Credentials used for the next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Token,
    None,
    Invalid,
}

/// Scenario-local state mutated by context steps.
#[derive(Debug, Clone, Default)]
pub struct ScenarioContext {
    pub auth: AuthState,
    pub organization: OrganizationRef,
    /// Extracted list element that assertions target instead of the
    /// current response.
    pub cursor: Option<ResponseRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    Init,
    Running,
    Passed,
    Failed,
}

impl ScenarioState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScenarioState::Passed | ScenarioState::Failed)
    }
}

/// One execution of one scenario.
struct Execution {
    state: ScenarioState,
    history: ResponseHistory,
    context: ScenarioContext,
    steps: Vec<StepResult>,
    outcome: Outcome,
}

impl Execution {
    fn new() -> Self {
        Self {
            state: ScenarioState::Init,
            history: ResponseHistory::new(),
            context: ScenarioContext::default(),
            steps: Vec::new(),
            outcome: Outcome::Passed,
        }
    }

    fn start(&mut self) {
        debug_assert_eq!(self.state, ScenarioState::Init);
        self.history.clear();
        self.context = ScenarioContext::default();
        self.state = ScenarioState::Running;
    }

    fn fail(&mut self, step: usize, detail: String) {
        if self.state == ScenarioState::Running {
            self.outcome = Outcome::Failed { step, detail };
            self.state = ScenarioState::Failed;
        }
    }

    fn finish(&mut self) {
        if self.state == ScenarioState::Running {
            self.state = ScenarioState::Passed;
        }
    }
}

/// Default scenario runner
#[derive(Clone)]
pub struct DefaultScenarioRunner {
    client: Arc<dyn HttpClient>,
    auth: Arc<dyn AuthProvider>,
    paths: ResourcePaths,
    fixtures: Arc<FixtureCache>,
}

impl std::fmt::Debug for DefaultScenarioRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultScenarioRunner")
            .field("paths", &self.paths)
            .field("fixtures", &self.fixtures)
            .finish_non_exhaustive()
    }
}

impl DefaultScenarioRunner {
    /// Create a runner with its own, empty fixture cache.
    pub fn new(
        client: Arc<dyn HttpClient>,
        auth: Arc<dyn AuthProvider>,
        paths: ResourcePaths,
    ) -> Self {
        Self {
            client,
            auth,
            paths,
            fixtures: FixtureCache::shared(),
        }
    }

    /// Build a reqwest-backed runner from run configuration.
    pub fn from_config(config: &RunConfig) -> anyhow::Result<Self> {
        let client = ReqwestClient::new(&config.base_url, config.timeout())?
            .with_auth_scheme(config.auth_scheme.clone());
        Ok(Self::new(
            Arc::new(client),
            Arc::new(StaticToken(config.token.clone())),
            ResourcePaths::new(config.organization.clone()),
        ))
    }

    /// Share `fixtures` with other runners (and across runs).
    pub fn with_fixtures(mut self, fixtures: Arc<FixtureCache>) -> Self {
        self.fixtures = fixtures;
        self
    }

    pub fn fixtures(&self) -> &Arc<FixtureCache> {
        &self.fixtures
    }

    /// Run scenarios concurrently, at most `parallelism` at a time,
    /// sharing this runner's fixture cache. Results keep input order.
    pub async fn run_suite(&self, scenarios: Vec<Scenario>, parallelism: usize) -> SuiteResult {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
        let names: Vec<String> = scenarios.iter().map(|s| s.name.clone()).collect();
        let mut slots: Vec<Option<ScenarioResult>> = vec![None; names.len()];

        let mut tasks = JoinSet::new();
        for (idx, scenario) in scenarios.into_iter().enumerate() {
            let runner = self.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (idx, runner.run(&scenario).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(err) => error!("Scenario task failed: {}", err),
            }
        }

        let scenarios = slots
            .into_iter()
            .zip(names)
            .map(|(slot, name)| {
                slot.unwrap_or_else(|| ScenarioResult {
                    name,
                    outcome: Outcome::Failed {
                        step: 0,
                        detail: "scenario task aborted".to_string(),
                    },
                    steps: Vec::new(),
                    started_at: Utc::now(),
                    duration_ms: 0,
                })
            })
            .collect();

        SuiteResult {
            scenarios,
            total_duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn token_for(&self, auth: AuthState) -> Option<String> {
        match auth {
            AuthState::Token => self.auth.token(),
            AuthState::None => None,
            AuthState::Invalid => Some(INVALID_TOKEN.to_string()),
        }
    }

    fn build_request(
        &self,
        step: &RequestStep,
        resolver: &Resolver<'_>,
        context: &ScenarioContext,
    ) -> EngineResult<OutgoingRequest> {
        let resolve_opt = |value: &Option<String>| -> EngineResult<Option<String>> {
            value.as_deref().map(|v| resolver.resolve(v)).transpose()
        };
        let project = resolve_opt(&step.project)?;
        let function = resolve_opt(&step.function)?;
        let resource = match &step.resource {
            ResourceKind::Path(p) => ResourceKind::Path(resolver.resolve(p)?),
            other => other.clone(),
        };
        let path = self.paths.path_for(
            &resource,
            context.organization,
            project.as_deref(),
            function.as_deref(),
        )?;

        let query: HashMap<String, String> = step
            .query
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolver.resolve(v)?)))
            .collect::<EngineResult<_>>()?;
        let body = step
            .body
            .as_ref()
            .map(|b| resolver.resolve_json(b))
            .transpose()?;

        Ok(OutgoingRequest {
            method: step.method,
            path,
            query,
            token: self.token_for(context.auth),
            body,
        })
    }

    async fn ensure_fixture(
        &self,
        fixture: &FixtureStep,
        history: &ResponseHistory,
        context: &ScenarioContext,
    ) -> EngineResult<ResourceHandle> {
        let key = fixture.key.as_str();
        self.fixtures
            .get_or_create(key, fixture.once, || async {
                let resolver = Resolver::new(history, &self.fixtures)
                    .with_element(context.cursor.as_ref());
                let request = self.build_request(&fixture.request, &resolver, context)?;
                let record = self.client.send(&request).await?;

                if !(200..300).contains(&record.status) {
                    return Err(EngineError::FixtureCreation {
                        key: key.to_string(),
                        reason: format!("status {} ({})", record.status, record.body),
                    });
                }
                let id = get_by_json_path(&record.body, &fixture.id_field)
                    .filter(|v| !v.is_null())
                    .map(stringify)
                    .ok_or_else(|| EngineError::FixtureCreation {
                        key: key.to_string(),
                        reason: format!("response has no '{}' field", fixture.id_field),
                    })?;
                debug!(key, id = %id, "fixture created");
                Ok(ResourceHandle {
                    id,
                    attributes: record.body,
                })
            })
            .await
    }

    /// Resolve placeholders in the assertion's arguments.
    fn materialize(assertion: &Assertion, resolver: &Resolver<'_>) -> EngineResult<Assertion> {
        Ok(match assertion {
            Assertion::FieldEquals { path, value } => Assertion::FieldEquals {
                path: resolver.resolve(path)?,
                value: resolver.resolve_json(value)?,
            },
            Assertion::ErrorAlert {
                message,
                field,
                item,
            } => Assertion::ErrorAlert {
                message: resolver.resolve(message)?,
                field: resolver.resolve(field)?,
                item: *item,
            },
            Assertion::ErrorMessage(message) => {
                Assertion::ErrorMessage(resolver.resolve(message)?)
            }
            other => other.clone(),
        })
    }

    /// Execute one step, returning the status of the response it
    /// recorded, if any.
    async fn execute_step(
        &self,
        step: &Step,
        history: &mut ResponseHistory,
        context: &mut ScenarioContext,
    ) -> EngineResult<Option<u16>> {
        match step {
            Step::Authenticated => context.auth = AuthState::Token,
            Step::NotAuthenticated => context.auth = AuthState::None,
            Step::InvalidToken => context.auth = AuthState::Invalid,
            Step::NonexistentOrganization => context.organization = OrganizationRef::Nonexistent,
            Step::DefaultOrganization => context.organization = OrganizationRef::Default,
            Step::Fixture(fixture) => {
                self.ensure_fixture(fixture, history, context).await?;
            }
            Step::Request(request_step) => {
                let request = {
                    let resolver = Resolver::new(history, &self.fixtures)
                        .with_element(context.cursor.as_ref());
                    self.build_request(request_step, &resolver, context)?
                };
                let record = self.client.send(&request).await.map_err(|err| {
                    error!("Failed to send request: {}", err);
                    err
                })?;
                let status = record.status;
                history.push(record);
                context.cursor = None;
                return Ok(Some(status));
            }
            Step::MoveToFront(position) => {
                history.move_to_front(*position)?;
                context.cursor = None;
            }
            Step::Extract(extract) => {
                if history.is_empty() {
                    return Err(EngineError::Empty);
                }
                let position = extract.position.unwrap_or(history.len());
                context.cursor = Some(history.extract_element(position, extract.element)?);
            }
            Step::ReleaseElement => context.cursor = None,
            Step::Expect(assertion) => {
                let resolver = Resolver::new(history, &self.fixtures)
                    .with_element(context.cursor.as_ref());
                let assertion = Self::materialize(assertion, &resolver)?;
                let target = match &context.cursor {
                    Some(element) => element,
                    None => history.current()?,
                };
                validator::evaluate(&assertion, target)?;
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ScenarioRunner for DefaultScenarioRunner {
    #[instrument(skip(self, scenario), fields(name = %scenario.name))]
    async fn run(&self, scenario: &Scenario) -> ScenarioResult {
        let started_at = Utc::now();
        let start_time = Instant::now();
        let mut execution = Execution::new();

        info!("Starting scenario: {}", scenario.name);
        execution.start();

        for (step_idx, step) in scenario.steps.iter().enumerate() {
            let name = step.describe();
            info!(
                "Running step {}/{}: {}",
                step_idx + 1,
                scenario.steps.len(),
                name
            );
            let step_start = Instant::now();

            let result = self
                .execute_step(step, &mut execution.history, &mut execution.context)
                .await;
            let duration_ms = step_start.elapsed().as_millis() as u64;

            match result {
                Ok(status) => execution.steps.push(StepResult {
                    name,
                    success: true,
                    error: None,
                    status,
                    duration_ms,
                }),
                Err(err) => {
                    let detail = format!("step {} ({}): {}", step_idx + 1, name, err);
                    info!("Stopping scenario due to step failure: {}", detail);
                    execution.steps.push(StepResult {
                        name,
                        success: false,
                        error: Some(err.to_string()),
                        status: None,
                        duration_ms,
                    });
                    execution.fail(step_idx + 1, detail);
                    break;
                }
            }
        }
        execution.finish();
        debug_assert!(execution.state.is_terminal());

        let result = ScenarioResult {
            name: scenario.name.clone(),
            outcome: execution.outcome,
            steps: execution.steps,
            started_at,
            duration_ms: start_time.elapsed().as_millis() as u64,
        };

        info!(
            "Scenario finished: {} ({} ms) - Success: {}",
            scenario.name,
            result.duration_ms,
            result.success()
        );

        result
    }
}
