//! Shared helpers for reconciler integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use pgfleet_resource::{
    Context, Error, Executor, Identifier, MemoryKv, PlanStore, Reconciler, Registry, Resource,
    Result, Router, Runner, State, StateStore, Worker,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub const WIDGET: &str = "test.widget";

// ============================================================================
// Collaborators
// ============================================================================

/// Records every lifecycle call, and lets tests break things.
#[derive(Default)]
pub struct Recorder {
    pub location: String,
    pub calls: Mutex<Vec<String>>,
    pub gone: Mutex<HashSet<String>>,
    pub failing: Mutex<HashSet<String>>,
    /// Creates of these never finish.
    pub stalled: Mutex<HashSet<String>>,
}

impl Recorder {
    pub fn at(location: &str) -> Self {
        Self {
            location: location.to_string(),
            ..Default::default()
        }
    }
}

/// Lifecycle calls from every location, in completion order.
#[derive(Default, Clone)]
pub struct Journal {
    pub entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub async fn entries(&self) -> Vec<String> {
        self.entries.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Entries for one action, e.g. `"create"`, as widget names.
    pub async fn names(&self, action: &str) -> Vec<String> {
        self.entries()
            .await
            .into_iter()
            .filter_map(|e| e.strip_prefix(&format!("{} ", action)).map(String::from))
            .collect()
    }
}

pub struct TestEnv {
    pub recorder: Arc<Recorder>,
    pub journal: Journal,
}

// ============================================================================
// Widget resource
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Widget {
    pub name: String,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub value: String,
    /// Server-computed, excluded from diffing.
    #[serde(default)]
    pub generated: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
}

impl Widget {
    pub fn new(name: &str, deps: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            value: "v1".to_string(),
            generated: None,
            host: None,
        }
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    pub fn on_host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    pub fn id(name: &str) -> Identifier {
        Identifier::new(name, WIDGET)
    }
}

async fn record(rc: &Context<TestEnv>, action: &str, name: &str) -> Result<()> {
    let env = rc.collaborators();
    if env.recorder.failing.lock().await.contains(name) {
        return Err(Error::remote(format!("{} exploded", name)));
    }
    env.recorder
        .calls
        .lock()
        .await
        .push(format!("{} {}", action, name));
    env.journal
        .entries
        .lock()
        .await
        .push(format!("{} {}", action, name));
    Ok(())
}

#[async_trait]
impl Resource<TestEnv> for Widget {
    fn identifier(&self) -> Identifier {
        Widget::id(&self.name)
    }

    fn executor(&self) -> Executor {
        match &self.host {
            Some(host) => Executor::Host(host.clone()),
            None => Executor::Manager,
        }
    }

    fn dependencies(&self) -> Vec<Identifier> {
        self.deps.iter().map(|d| Widget::id(d)).collect()
    }

    fn diff_ignore(&self) -> &'static [&'static str] {
        &["/generated"]
    }

    async fn refresh(&mut self, rc: &Context<TestEnv>) -> Result<()> {
        if rc.collaborators().recorder.gone.lock().await.contains(&self.name) {
            return Err(Error::not_found(&self.name));
        }
        Ok(())
    }

    async fn create(&mut self, rc: &Context<TestEnv>) -> Result<()> {
        if rc.collaborators().recorder.stalled.lock().await.contains(&self.name) {
            std::future::pending::<()>().await;
        }
        // Dependencies must already be reconciled in this scope.
        for dep in &self.deps {
            let dependency: Widget = rc.get(&Widget::id(dep))?;
            if dependency.generated.is_none() {
                return Err(Error::remote(format!("{} not hydrated", dep)));
            }
        }
        record(rc, "create", &self.name).await?;
        self.generated = Some(format!("gen-{}", self.name));
        Ok(())
    }

    async fn update(&mut self, rc: &Context<TestEnv>) -> Result<()> {
        record(rc, "update", &self.name).await?;
        self.generated = Some(format!("gen-{}", self.name));
        Ok(())
    }

    async fn delete(&mut self, rc: &Context<TestEnv>) -> Result<()> {
        record(rc, "delete", &self.name).await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub kv: Arc<MemoryKv>,
    pub store: StateStore,
    pub plans: PlanStore,
    pub reconciler: Reconciler<TestEnv>,
    pub local: Arc<Recorder>,
    pub hosts: Vec<Arc<Recorder>>,
    pub journal: Journal,
}

pub async fn harness(hosts: &[&str]) -> Harness {
    let mut registry = Registry::new();
    registry.register::<Widget>(WIDGET);
    let registry = Arc::new(registry);

    let journal = Journal::default();
    let local = Arc::new(Recorder::at("control-plane"));
    let router = Router::new(Runner::new(
        registry.clone(),
        Arc::new(TestEnv {
            recorder: local.clone(),
            journal: journal.clone(),
        }),
    ));

    let mut recorders = Vec::new();
    for host in hosts {
        let recorder = Arc::new(Recorder::at(host));
        let runner = Runner::new(
            registry.clone(),
            Arc::new(TestEnv {
                recorder: recorder.clone(),
                journal: journal.clone(),
            }),
        );
        let (worker, queue) = Worker::new(host, runner, 16);
        tokio::spawn(worker.run());
        router.register_host(host, queue).await;
        recorders.push(recorder);
    }

    let kv = Arc::new(MemoryKv::new());
    let store = StateStore::new(kv.clone(), "pgfleet");
    let plans = PlanStore::new(kv.clone(), "pgfleet");
    let reconciler = Reconciler::new(store.clone(), Arc::new(router)).with_plan_store(plans.clone());

    Harness {
        kv,
        store,
        plans,
        reconciler,
        local,
        hosts: recorders,
        journal,
    }
}

pub fn desired(widgets: &[Widget]) -> State {
    let mut state = State::new();
    for widget in widgets {
        state.add_resource(widget).unwrap();
    }
    state
}
