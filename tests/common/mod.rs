//! Scripted browser and executor doubles shared by the integration tests
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use jewel_scraper::{
    BrowserError, BrowserResult, DriverFactory, OutputFields, PageDriver, ProductSignal,
    Readiness, ScrapeConfig, ScrapeError, SessionSettings, TaskExecutor, WorkItem, WorkerSession,
};

/// What the next navigation does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavStep {
    Ok,
    /// Driver reports a navigation error
    Fail,
    /// Driver's own transport times out
    Timeout,
    /// `goto` never returns; the session timeout must fire
    Hang,
    /// Loads, but the document never becomes ready
    NotReady,
    /// Ready, but no product signal is visible
    NoSignal,
    /// Loads, but every readiness check hangs
    HangReadiness,
    /// Ready, but every signal check hangs
    HangSignal,
}

#[derive(Default)]
pub struct BrowserState {
    plan: VecDeque<NavStep>,
    default_step: Option<NavStep>,
    failing_launches: u32,
    pub launches: u32,
    pub failed_launches: u32,
    pub closes: u32,
    pub stops: u32,
    /// (launch number, url) per `goto`
    pub navigations: Vec<(u32, String)>,
    pub screenshots: Vec<PathBuf>,
}

/// Factory whose drivers follow a shared navigation plan
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    state: Arc<Mutex<BrowserState>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps consumed in order by successive navigations
    pub fn with_plan(self, steps: &[NavStep]) -> Self {
        self.state.lock().plan.extend(steps.iter().copied());
        self
    }

    /// Step used once the plan is exhausted (default `Ok`)
    pub fn with_default(self, step: NavStep) -> Self {
        self.state.lock().default_step = Some(step);
        self
    }

    pub fn fail_next_launches(&self, count: u32) {
        self.state.lock().failing_launches = count;
    }

    pub fn state(&self) -> parking_lot::MutexGuard<'_, BrowserState> {
        self.state.lock()
    }

    pub fn as_factory(&self) -> Arc<dyn DriverFactory> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl DriverFactory for ScriptedFactory {
    async fn launch(&self, _worker_id: &str) -> BrowserResult<Box<dyn PageDriver>> {
        let mut state = self.state.lock();
        if state.failing_launches > 0 {
            state.failing_launches -= 1;
            state.failed_launches += 1;
            return Err(BrowserError::LaunchFailed("scripted launch failure".into()));
        }
        state.launches += 1;
        Ok(Box::new(ScriptedDriver {
            state: Arc::clone(&self.state),
            launch: state.launches,
            current: NavStep::Ok,
        }))
    }
}

pub struct ScriptedDriver {
    state: Arc<Mutex<BrowserState>>,
    launch: u32,
    current: NavStep,
}

#[async_trait]
impl PageDriver for ScriptedDriver {
    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        let step = {
            let mut state = self.state.lock();
            state.navigations.push((self.launch, url.to_string()));
            let fallback = state.default_step.unwrap_or(NavStep::Ok);
            state.plan.pop_front().unwrap_or(fallback)
        };
        self.current = step;
        match step {
            NavStep::Fail => Err(BrowserError::NavigationFailed(format!("{url}: net::ERR_FAILED"))),
            NavStep::Timeout => {
                self.current = NavStep::Ok;
                Err(BrowserError::NavigationTimeout(Duration::from_secs(50)))
            }
            NavStep::Hang => {
                self.current = NavStep::Ok;
                std::future::pending::<()>().await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn stop_loading(&mut self) -> BrowserResult<()> {
        self.state.lock().stops += 1;
        Ok(())
    }

    async fn readiness(&mut self) -> BrowserResult<Readiness> {
        if self.current == NavStep::HangReadiness {
            std::future::pending::<()>().await;
        }
        Ok(match self.current {
            NavStep::NotReady => Readiness {
                ready_state: "loading".into(),
                visible_text_len: 0,
            },
            _ => Readiness {
                ready_state: "complete".into(),
                visible_text_len: 2_000,
            },
        })
    }

    async fn has_visible(&mut self, _signal: &ProductSignal) -> BrowserResult<bool> {
        if self.current == NavStep::HangSignal {
            std::future::pending::<()>().await;
        }
        Ok(self.current != NavStep::NoSignal)
    }

    async fn screenshot(&mut self, path: &Path) -> BrowserResult<()> {
        self.state.lock().screenshots.push(path.to_path_buf());
        Ok(())
    }

    async fn click_first(&mut self, _css: &str) -> BrowserResult<bool> {
        Ok(false)
    }

    async fn inner_text(&mut self, _css: &str) -> BrowserResult<Option<String>> {
        Ok(None)
    }

    async fn click_matching(
        &mut self,
        _css: &str,
        _text: &str,
        _exact: bool,
    ) -> BrowserResult<Option<String>> {
        Ok(None)
    }

    async fn evaluate(&mut self, _script: &str) -> BrowserResult<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn close(&mut self) -> BrowserResult<()> {
        self.state.lock().closes += 1;
        Ok(())
    }
}

/// What the executor does on one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStep {
    Succeed,
    Fail,
    /// Writes a `price` field, then fails
    FailAfterPartial,
    Hang,
    Panic,
}

/// Executor following a per-key plan; keys without a plan succeed
#[derive(Default)]
pub struct ScriptedExecutor {
    plans: Mutex<HashMap<String, VecDeque<ExecStep>>>,
    default_step: Option<ExecStep>,
    pub calls: Mutex<Vec<(String, u32)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(self, key: &str, steps: &[ExecStep]) -> Self {
        self.plans
            .lock()
            .insert(key.to_string(), steps.iter().copied().collect());
        self
    }

    pub fn with_default(mut self, step: ExecStep) -> Self {
        self.default_step = Some(step);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    fn output_columns(&self) -> Vec<String> {
        vec!["price".to_string(), "title".to_string()]
    }

    async fn execute(
        &self,
        _session: &mut WorkerSession,
        item: &WorkItem,
        attempt: u32,
        output: &mut OutputFields,
    ) -> Result<(), ScrapeError> {
        self.calls.lock().push((item.key.clone(), attempt));
        let step = self
            .plans
            .lock()
            .get_mut(&item.key)
            .and_then(VecDeque::pop_front)
            .or(self.default_step)
            .unwrap_or(ExecStep::Succeed);

        match step {
            ExecStep::Succeed => {
                output.insert("price".into(), "$1,250".into());
                output.insert("title".into(), format!("Ring {}", item.index + 1));
                Ok(())
            }
            ExecStep::Fail => Err(ScrapeError::Execution("price panel missing".into())),
            ExecStep::FailAfterPartial => {
                output.insert("price".into(), "$999".into());
                Err(ScrapeError::Execution("cart summary missing".into()))
            }
            ExecStep::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            ExecStep::Panic => panic!("executor blew up on {}", item.key),
        }
    }
}

/// Defaults with artifacts under `dir`
pub fn test_config(dir: &Path) -> ScrapeConfig {
    ScrapeConfig {
        output_path: dir.join("out.csv"),
        screenshot_dir: dir.join("screenshots"),
        ..ScrapeConfig::default()
    }
}

pub async fn session(
    factory: &ScriptedFactory,
    config: &ScrapeConfig,
    cancel: CancellationToken,
) -> WorkerSession {
    WorkerSession::create(
        "worker-1",
        factory.as_factory(),
        Arc::new(SessionSettings::from_config(config)),
        cancel,
    )
    .await
    .expect("scripted launch")
}

pub fn items(keys: &[&str]) -> Vec<WorkItem> {
    keys.iter()
        .enumerate()
        .map(|(i, key)| WorkItem::new(i, *key).with_attribute("metal", "platinum"))
        .collect()
}
