//! Scripted automation backend and fixtures shared by the integration tests.

#![allow(dead_code)]

use pir_broker::{
    Action, BrokerMetadata, BrokerSchedule, DataBroker, ElementType, ExpectationItem,
    ExpectationKind, ExtractSelectors, PageElement, Step, StepKind,
};
use pir_browser::{
    ActionContext, ActionReply, ActionResponse, AutomationBackend, BackendFactory, BrowserError,
};
use pir_core::{BrokerId, ProfileQueryId};
use pir_model::{ExtractedProfile, ProfileQuery};
use pir_operations::{RunnerSettings, Services, SubJobRunner};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A backend call, in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Load(String),
    Execute(String),
    Snapshot,
    SaveHtml,
    Finish,
}

/// How the backend answers one dispatch of an action.
#[derive(Debug, Clone)]
pub enum Reply {
    Success,
    Navigate(String),
    CaptchaInfo { site_key: String, url: String },
    Profiles(Vec<ExtractedProfile>),
    ProfilesThenFailure(Vec<ExtractedProfile>, BrowserError),
    Failure(BrowserError),
    DispatchError(BrowserError),
    /// Keep the reply handle without ever answering
    Silent,
}

#[derive(Default)]
struct ScriptState {
    replies: HashMap<String, VecDeque<Reply>>,
    load_failures: HashMap<String, BrowserError>,
    calls: Vec<Call>,
    held: Vec<ActionReply>,
    contexts: Vec<ActionContext>,
}

/// Shared script and call log of every session a test creates.
#[derive(Clone, Default)]
pub struct Script {
    state: Arc<Mutex<ScriptState>>,
    fail_snapshots: Arc<Mutex<bool>>,
    sessions: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next dispatch of `action_id`; unscripted dispatches succeed.
    pub fn reply(&self, action_id: &str, reply: Reply) -> &Self {
        self.lock()
            .replies
            .entry(action_id.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn fail_load(&self, url: &str, error: BrowserError) -> &Self {
        self.lock().load_failures.insert(url.to_string(), error);
        self
    }

    pub fn fail_snapshots(&self) {
        *self.fail_snapshots.lock().expect("acquire script lock") = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Execute(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn loads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Load(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    /// Contexts the backend saw, one per execute call.
    pub fn contexts(&self) -> Vec<ActionContext> {
        self.lock().contexts.clone()
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn peak_sessions(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn backend(&self) -> Box<dyn AutomationBackend> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        Box::new(ScriptedBackend {
            script: self.clone(),
            finished: false,
        })
    }

    pub fn factory(&self) -> Arc<dyn BackendFactory> {
        Arc::new(ScriptedFactory(self.clone()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().expect("acquire script lock")
    }
}

pub struct ScriptedBackend {
    script: Script,
    finished: bool,
}

#[async_trait::async_trait]
impl AutomationBackend for ScriptedBackend {
    async fn load(&mut self, url: &str) -> pir_browser::Result<()> {
        let mut state = self.script.lock();
        state.calls.push(Call::Load(url.to_string()));
        match state.load_failures.get(url) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn execute(
        &mut self,
        action: &Action,
        _step_kind: StepKind,
        context: &ActionContext,
        reply: ActionReply,
    ) -> pir_browser::Result<()> {
        let scripted = {
            let mut state = self.script.lock();
            state.calls.push(Call::Execute(action.id().to_string()));
            state.contexts.push(context.clone());
            state
                .replies
                .get_mut(action.id())
                .and_then(VecDeque::pop_front)
                .unwrap_or(Reply::Success)
        };

        match scripted {
            Reply::Success => {
                reply.success(None);
            }
            Reply::Navigate(url) => {
                reply.success(Some(ActionResponse::Navigate { url }));
            }
            Reply::CaptchaInfo { site_key, url } => {
                reply.success(Some(ActionResponse::CaptchaInfo { site_key, url }));
            }
            Reply::Profiles(profiles) => {
                reply.extracted_profiles(profiles, serde_json::json!({ "source": "script" }));
            }
            Reply::ProfilesThenFailure(profiles, error) => {
                reply.extracted_profiles(profiles, serde_json::Value::Null);
                reply.complete_with(error);
            }
            Reply::Failure(error) => {
                reply.complete_with(error);
            }
            Reply::DispatchError(error) => return Err(error),
            Reply::Silent => self.script.lock().held.push(reply),
        }
        Ok(())
    }

    async fn take_snapshot(&mut self, _path: &Path) -> pir_browser::Result<()> {
        self.script.lock().calls.push(Call::Snapshot);
        if *self.script.fail_snapshots.lock().expect("acquire script lock") {
            return Err(BrowserError::Snapshot("disk full".to_string()));
        }
        Ok(())
    }

    async fn save_html(&mut self, _path: &Path) -> pir_browser::Result<()> {
        self.script.lock().calls.push(Call::SaveHtml);
        Ok(())
    }

    async fn finish(&mut self) {
        self.script.lock().calls.push(Call::Finish);
        if !self.finished {
            self.finished = true;
            self.script.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub struct ScriptedFactory(Script);

#[async_trait::async_trait]
impl BackendFactory for ScriptedFactory {
    async fn create(&self, _show_ui: bool) -> pir_browser::Result<Box<dyn AutomationBackend>> {
        Ok(self.0.backend())
    }
}

/// Runner timing used by the tests; pacing is virtual under a paused clock.
pub fn settings() -> RunnerSettings {
    RunnerSettings {
        operation_await_time: Duration::from_secs(3),
        action_timeout: Duration::from_secs(120),
        max_expectation_retries: 1,
        email_poll_interval: Duration::from_secs(10),
        email_max_polls: 3,
        captcha_poll_interval: Duration::from_secs(5),
        captcha_max_polls: 3,
        snapshot_dir: None,
    }
}

pub fn runner(script: &Script, services: Services, cancel: CancellationToken) -> SubJobRunner {
    SubJobRunner::new(script.factory(), services, settings(), cancel)
}

pub fn query(id: u64) -> ProfileQuery {
    ProfileQuery {
        id: ProfileQueryId::new(id),
        first_name: "Jane".to_string(),
        middle_name: None,
        last_name: "Doe".to_string(),
        city: "Dallas".to_string(),
        state: "TX".to_string(),
        birth_year: 1980,
    }
}

pub fn profile(url: &str) -> ExtractedProfile {
    ExtractedProfile {
        name: Some("Jane Doe".to_string()),
        age: Some("45".to_string()),
        profile_url: Some(url.to_string()),
        ..ExtractedProfile::default()
    }
}

pub fn navigate(id: &str, url: &str) -> Action {
    Action::Navigate {
        id: id.to_string(),
        url: url.to_string(),
    }
}

pub fn extract(id: &str) -> Action {
    Action::Extract {
        id: id.to_string(),
        selector: ".result".to_string(),
        profile: ExtractSelectors {
            name: Some(".name".to_string()),
            profile_url: Some("a.profile".to_string()),
            ..ExtractSelectors::default()
        },
    }
}

pub fn expectation(id: &str) -> Action {
    Action::Expectation {
        id: id.to_string(),
        expectations: vec![ExpectationItem {
            kind: ExpectationKind::Text,
            selector: Some(".confirmation".to_string()),
            expect: Some("request received".to_string()),
        }],
    }
}

/// A broker whose scan searches then extracts, and whose opt-out opens the
/// record, fills and submits the form and checks the confirmation.
pub fn broker(id: &str) -> DataBroker {
    DataBroker {
        broker: BrokerMetadata {
            id: BrokerId::new(id).expect("valid broker ID"),
            name: format!("Broker {id}"),
            url: format!("https://{id}.example"),
            version: "0.1.0".to_string(),
            opt_out_url: None,
        },
        steps: vec![
            Step {
                step_type: StepKind::Scan,
                actions: vec![
                    navigate("search", &format!("https://{id}.example/{{first}}-{{last}}/{{state}}")),
                    extract("results"),
                ],
            },
            Step {
                step_type: StepKind::OptOut,
                actions: vec![
                    navigate("open-record", "{profile_url}"),
                    Action::Fill {
                        id: "fill-form".to_string(),
                        elements: vec![PageElement {
                            element_type: ElementType::FullName,
                            selector: "#name".to_string(),
                        }],
                    },
                    Action::Click {
                        id: "submit".to_string(),
                        elements: vec![PageElement {
                            element_type: ElementType::Button,
                            selector: "button[type=submit]".to_string(),
                        }],
                    },
                    expectation("confirm"),
                ],
            },
        ],
        mirror_sites: Vec::new(),
        schedule: BrokerSchedule::default(),
    }
}

/// A broker with only the given scan actions.
pub fn scan_only_broker(id: &str, actions: Vec<Action>) -> DataBroker {
    let mut broker = broker(id);
    broker.steps = vec![Step {
        step_type: StepKind::Scan,
        actions,
    }];
    broker
}
