mod common;

use common::{
    expectation, extract, navigate, profile, query, runner, scan_only_broker, settings, Call,
    Reply, Script,
};
use pir_broker::{Action, DataBroker, StepKind};
use pir_browser::{ActionContext, BrowserError};
use chrono::Utc;
use pir_core::BrokerId;
use pir_model::{BrokerProfileQueryData, EventType, JobErrorKind};
use pir_operations::{
    apply_scan_result, run_opt_out_job, run_scan_job, CaptchaError, CaptchaService,
    EmailConfirmationService, EmailError, JobInput, JobResult, JobStatus, OperationError,
    RunnerSettings, RunnerState, Services, SubJobRunner,
};
use pir_scheduler::is_opt_out_due;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SEARCH_URL: &str = "https://broker.example";

async fn run_scan(runner: &mut SubJobRunner, broker: &DataBroker) -> JobResult {
    let input = JobInput {
        broker,
        step_kind: StepKind::Scan,
        context: ActionContext::for_scan(query(1)),
        email_confirmation: None,
    };
    runner
        .run(input, None, None, false)
        .await
        .expect("job should be set up")
}

async fn run_opt_out(runner: &mut SubJobRunner, broker: &DataBroker) -> JobResult {
    let input = JobInput {
        broker,
        step_kind: StepKind::OptOut,
        context: ActionContext::for_opt_out(query(1), profile("https://broker.example/p/1")),
        email_confirmation: None,
    };
    runner
        .run(input, None, None, false)
        .await
        .expect("job should be set up")
}

fn opt_out_broker(actions: Vec<Action>) -> DataBroker {
    let mut broker = common::broker("relay-broker");
    broker.steps[1].actions = actions;
    broker
}

#[tokio::test(start_paused = true)]
async fn test_scan_reports_extracted_profiles() {
    let script = Script::new();
    script.reply(
        "results",
        Reply::Profiles(vec![
            profile("https://broker.example/p/1"),
            profile("https://broker.example/p/2"),
        ]),
    );
    let broker = scan_only_broker("acme", vec![navigate("search", SEARCH_URL), extract("results")]);
    let mut runner = runner(&script, Services::default(), CancellationToken::new());

    let result = run_scan(&mut runner, &broker).await;

    assert!(result.error.is_none());
    assert_eq!(result.extracted_profiles.len(), 2);
    assert_eq!(result.url.as_deref(), Some(SEARCH_URL));
    assert_eq!(result.meta.get("source"), Some(&serde_json::json!("script")));
    assert_eq!(result.actions_dispatched, 2);
    assert_eq!(
        script.calls(),
        vec![
            Call::Load(SEARCH_URL.to_string()),
            Call::Execute("results".to_string()),
            Call::Finish,
        ]
    );
    assert_eq!(runner.state(), &RunnerState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_scan_job_records_started_then_matches() {
    let script = Script::new();
    script.reply(
        "results",
        Reply::Profiles(vec![
            profile("https://broker.example/p/1"),
            profile("https://broker.example/p/2"),
        ]),
    );
    let broker = scan_only_broker("acme", vec![navigate("search", SEARCH_URL), extract("results")]);
    let mut entry = BrokerProfileQueryData::new(broker, query(1));
    let mut runner = runner(&script, Services::default(), CancellationToken::new());

    let outcome = run_scan_job(&mut runner, &mut entry, false).await;

    assert!(outcome.succeeded());
    assert_eq!(outcome.matches, 2);
    let events: Vec<_> = entry
        .scan_job_data
        .history_events
        .iter()
        .map(|e| e.event_type.clone())
        .collect();
    assert_eq!(
        events,
        vec![EventType::ScanStarted, EventType::MatchesFound { count: 2 }]
    );
    assert_eq!(entry.opt_out_job_data.len(), 2);
    assert!(entry.has_matches());
    assert!(entry.scan_job_data.last_run_date.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_navigation_failure_ends_job() {
    let script = Script::new();
    let error = BrowserError::Io("connection reset by peer".to_string());
    script.fail_load(SEARCH_URL, error.clone());
    let broker = scan_only_broker("acme", vec![navigate("search", SEARCH_URL), extract("results")]);
    let mut runner = runner(&script, Services::default(), CancellationToken::new());

    let result = run_scan(&mut runner, &broker).await;

    assert_eq!(result.error, Some(OperationError::Backend(error)));
    assert!(script.executed().is_empty());
    assert_eq!(script.loads(), vec![SEARCH_URL.to_string()]);
    assert_eq!(script.calls().last(), Some(&Call::Finish));
    assert_eq!(runner.state(), &RunnerState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_first_action() {
    let script = Script::new();
    let broker = scan_only_broker("acme", vec![navigate("search", SEARCH_URL), extract("results")]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut runner = runner(&script, Services::default(), cancel);

    let result = run_scan(&mut runner, &broker).await;

    assert_eq!(result.error, Some(OperationError::Cancelled));
    assert_eq!(result.actions_dispatched, 0);
    assert_eq!(script.calls(), vec![Call::Finish]);
    assert_eq!(runner.state(), &RunnerState::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_waits_for_dispatched_action() {
    let script = Script::new();
    let broker = scan_only_broker(
        "acme",
        vec![navigate("search", SEARCH_URL), extract("results"), extract("more")],
    );
    let cancel = CancellationToken::new();
    let mut runner = runner(&script, Services::default(), cancel.clone());

    let canceller = tokio::spawn(async move {
        // After the first action, during the pacing delay before the second.
        tokio::time::sleep(Duration::from_secs(4)).await;
        cancel.cancel();
    });
    let result = run_scan(&mut runner, &broker).await;
    canceller.await.expect("canceller task");

    assert_eq!(result.error, Some(OperationError::Cancelled));
    assert_eq!(script.loads(), vec![SEARCH_URL.to_string()]);
    assert!(script.executed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_only_first_callback_counts() {
    let script = Script::new();
    script.reply(
        "results",
        Reply::ProfilesThenFailure(
            vec![
                profile("https://broker.example/p/1"),
                profile("https://broker.example/p/2"),
            ],
            BrowserError::Script("late failure".to_string()),
        ),
    );
    let broker = scan_only_broker("acme", vec![navigate("search", SEARCH_URL), extract("results")]);
    let mut runner = runner(&script, Services::default(), CancellationToken::new());

    let result = run_scan(&mut runner, &broker).await;

    assert!(result.error.is_none());
    assert_eq!(result.extracted_profiles.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_expectation_is_retried_once() {
    let script = Script::new();
    script.reply(
        "check",
        Reply::Failure(BrowserError::ExpectationFailed {
            action_id: "check".to_string(),
            reason: "results not rendered".to_string(),
        }),
    );
    let broker = scan_only_broker(
        "acme",
        vec![navigate("search", SEARCH_URL), expectation("check"), extract("results")],
    );
    let mut runner = runner(&script, Services::default(), CancellationToken::new());

    let result = run_scan(&mut runner, &broker).await;

    assert!(result.error.is_none());
    assert_eq!(script.executed(), vec!["check", "check", "results"]);
    assert_eq!(result.actions_dispatched, 4);
}

#[tokio::test(start_paused = true)]
async fn test_expectation_failing_twice_fails_job() {
    let script = Script::new();
    let failure = BrowserError::ExpectationFailed {
        action_id: "check".to_string(),
        reason: "no results".to_string(),
    };
    script
        .reply("check", Reply::Failure(failure.clone()))
        .reply("check", Reply::Failure(failure.clone()));
    let broker = scan_only_broker(
        "acme",
        vec![navigate("search", SEARCH_URL), expectation("check"), extract("results")],
    );
    let mut runner = runner(&script, Services::default(), CancellationToken::new());

    let result = run_scan(&mut runner, &broker).await;

    assert_eq!(result.error, Some(OperationError::Backend(failure)));
    assert_eq!(script.executed(), vec!["check", "check"]);
}

#[tokio::test(start_paused = true)]
async fn test_other_failures_are_not_retried() {
    let script = Script::new();
    let failure = BrowserError::SelectorNotFound(".result".to_string());
    script.reply("results", Reply::Failure(failure.clone()));
    let broker = scan_only_broker("acme", vec![navigate("search", SEARCH_URL), extract("results")]);
    let mut runner = runner(&script, Services::default(), CancellationToken::new());

    let result = run_scan(&mut runner, &broker).await;

    assert_eq!(result.error, Some(OperationError::Backend(failure)));
    assert_eq!(script.executed(), vec!["results"]);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_error_is_reported_as_result() {
    let script = Script::new();
    let failure = BrowserError::SessionClosed;
    script.reply("results", Reply::DispatchError(failure.clone()));
    let broker = scan_only_broker("acme", vec![navigate("search", SEARCH_URL), extract("results")]);
    let mut runner = runner(&script, Services::default(), CancellationToken::new());

    let result = run_scan(&mut runner, &broker).await;

    assert_eq!(result.error, Some(OperationError::Backend(failure)));
}

#[tokio::test(start_paused = true)]
async fn test_missing_callback_times_out() {
    let script = Script::new();
    script.reply("results", Reply::Silent);
    let broker = scan_only_broker("acme", vec![navigate("search", SEARCH_URL), extract("results")]);
    let mut runner = runner(&script, Services::default(), CancellationToken::new());

    let result = run_scan(&mut runner, &broker).await;

    assert_eq!(
        result.error,
        Some(OperationError::ActionTimeout {
            action_id: "results".to_string(),
            timeout: settings().action_timeout,
        })
    );
    assert_eq!(script.calls().last(), Some(&Call::Finish));
}

#[tokio::test(start_paused = true)]
async fn test_actions_are_paced() {
    let script = Script::new();
    let broker = scan_only_broker("acme", vec![navigate("search", SEARCH_URL), extract("results")]);
    let mut runner = runner(&script, Services::default(), CancellationToken::new());

    let start = tokio::time::Instant::now();
    run_scan(&mut runner, &broker).await;

    assert!(start.elapsed() >= settings().operation_await_time * 2);
}

#[tokio::test(start_paused = true)]
async fn test_navigate_response_loads_url() {
    let script = Script::new();
    let next = "https://broker.example/results?page=1";
    script.reply("open-results", Reply::Navigate(next.to_string()));
    let broker = scan_only_broker(
        "acme",
        vec![
            navigate("search", SEARCH_URL),
            Action::Click {
                id: "open-results".to_string(),
                elements: Vec::new(),
            },
            extract("results"),
        ],
    );
    let mut runner = runner(&script, Services::default(), CancellationToken::new());

    let result = run_scan(&mut runner, &broker).await;

    assert!(result.error.is_none());
    assert_eq!(script.loads(), vec![SEARCH_URL.to_string(), next.to_string()]);
    assert_eq!(result.url.as_deref(), Some(next));
}

#[tokio::test(start_paused = true)]
async fn test_url_template_uses_profile_query() {
    let script = Script::new();
    let broker = common::broker("acme");
    let mut runner = runner(&script, Services::default(), CancellationToken::new());

    run_scan(&mut runner, &broker).await;

    assert_eq!(script.loads(), vec!["https://acme.example/jane-doe/TX".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_unresolved_placeholder_fails_job() {
    let script = Script::new();
    let broker = scan_only_broker("acme", vec![navigate("search", "https://broker.example/{zip}")]);
    let mut runner = runner(&script, Services::default(), CancellationToken::new());

    let result = run_scan(&mut runner, &broker).await;

    assert!(matches!(result.error, Some(OperationError::Unknown(_))));
    assert!(script.loads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_step_fails_before_any_action() {
    let script = Script::new();
    let broker = scan_only_broker("acme", vec![navigate("search", SEARCH_URL)]);
    let mut runner = runner(&script, Services::default(), CancellationToken::new());

    let input = JobInput {
        broker: &broker,
        step_kind: StepKind::OptOut,
        context: ActionContext::for_scan(query(1)),
        email_confirmation: None,
    };
    let err = runner.run(input, None, None, false).await.unwrap_err();

    assert!(matches!(err, OperationError::Unknown(message) if message.contains("opt-out")));
    assert_eq!(script.sessions_created(), 0);
    assert_eq!(runner.state(), &RunnerState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_failure_does_not_fail_job() {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let script = Script::new();
    script.fail_snapshots();
    script.reply("results", Reply::Profiles(vec![profile("https://broker.example/p/1")]));
    let broker = scan_only_broker("acme", vec![navigate("search", SEARCH_URL), extract("results")]);
    let settings = RunnerSettings {
        snapshot_dir: Some(dir.path().to_path_buf()),
        ..settings()
    };
    let mut runner = SubJobRunner::new(
        script.factory(),
        Services::default(),
        settings,
        CancellationToken::new(),
    );

    let result = run_scan(&mut runner, &broker).await;

    assert!(result.error.is_none());
    assert_eq!(result.extracted_profiles.len(), 1);
    let calls = script.calls();
    assert!(calls.contains(&Call::Snapshot));
    assert!(calls.contains(&Call::SaveHtml));
    assert!(dir.path().join("1").is_dir());
}

struct RelayEmail {
    polls_until_link: AtomicU32,
}

#[async_trait::async_trait]
impl EmailConfirmationService for RelayEmail {
    async fn generate_email(
        &self,
        broker_id: &BrokerId,
        _context: &ActionContext,
    ) -> Result<String, EmailError> {
        Ok(format!("{broker_id}@relay.example"))
    }

    async fn confirmation_link(&self, email: &str) -> Result<Option<String>, EmailError> {
        if self.polls_until_link.fetch_sub(1, Ordering::SeqCst) > 1 {
            Ok(None)
        } else {
            Ok(Some(format!("https://broker.example/confirm?email={email}")))
        }
    }
}

/// Hands out a fresh address on every call and never delivers mail.
#[derive(Default)]
struct EmptyMailbox {
    generated: AtomicU32,
}

#[async_trait::async_trait]
impl EmailConfirmationService for EmptyMailbox {
    async fn generate_email(
        &self,
        _broker_id: &BrokerId,
        _context: &ActionContext,
    ) -> Result<String, EmailError> {
        let n = self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(format!("relay-{n}@relay.example"))
    }

    async fn confirmation_link(&self, _email: &str) -> Result<Option<String>, EmailError> {
        Ok(None)
    }
}

fn entry_with_opt_out(broker: DataBroker) -> BrokerProfileQueryData {
    let mut entry = BrokerProfileQueryData::new(broker, query(1));
    apply_scan_result(&mut entry, &[profile("https://broker.example/p/1")], Utc::now());
    entry
}

struct InstantCaptcha;

#[async_trait::async_trait]
impl CaptchaService for InstantCaptcha {
    async fn submit(&self, site_key: &str, _url: &str) -> Result<String, CaptchaError> {
        Ok(format!("tx-{site_key}"))
    }

    async fn solution(&self, transaction_id: &str) -> Result<Option<String>, CaptchaError> {
        Ok(Some(format!("token-for-{transaction_id}")))
    }
}

#[tokio::test(start_paused = true)]
async fn test_email_confirmation_flow() {
    let script = Script::new();
    let services = Services {
        email: Arc::new(RelayEmail {
            polls_until_link: AtomicU32::new(2),
        }),
        ..Services::default()
    };
    let broker = opt_out_broker(vec![
        Action::GetEmail {
            id: "email".to_string(),
        },
        Action::Click {
            id: "submit".to_string(),
            elements: Vec::new(),
        },
        Action::EmailConfirmation {
            id: "confirm-email".to_string(),
            polling_time_secs: Some(30),
        },
    ]);
    let mut runner = runner(&script, services, CancellationToken::new());

    let result = run_opt_out(&mut runner, &broker).await;

    assert!(result.error.is_none());
    let email = "relay-broker@relay.example";
    assert_eq!(result.context.email.as_deref(), Some(email));
    let confirmation = result.email_confirmation.expect("confirmation recorded");
    assert_eq!(confirmation.generated_email, email);
    assert_eq!(confirmation.attempt_count, 2);
    let link = format!("https://broker.example/confirm?email={email}");
    assert_eq!(confirmation.link.as_deref(), Some(link.as_str()));
    assert!(confirmation.link_obtained_date.is_some());
    assert_eq!(script.loads(), vec![link]);

    // The submit action saw the generated address.
    assert_eq!(script.contexts()[0].email.as_deref(), Some(email));
}

#[tokio::test(start_paused = true)]
async fn test_email_actions_fail_without_service() {
    let script = Script::new();
    let broker = opt_out_broker(vec![Action::GetEmail {
        id: "email".to_string(),
    }]);
    let mut runner = runner(&script, Services::default(), CancellationToken::new());

    let result = run_opt_out(&mut runner, &broker).await;

    assert_eq!(
        result.error,
        Some(OperationError::EmailService(EmailError::Disabled))
    );
}

#[tokio::test(start_paused = true)]
async fn test_captcha_flow_injects_token() {
    let script = Script::new();
    script.reply(
        "captcha-info",
        Reply::CaptchaInfo {
            site_key: "site-key".to_string(),
            url: "https://broker.example/optout".to_string(),
        },
    );
    let services = Services {
        captcha: Arc::new(InstantCaptcha),
        ..Services::default()
    };
    let broker = opt_out_broker(vec![
        Action::GetCaptchaInfo {
            id: "captcha-info".to_string(),
            selector: ".g-recaptcha".to_string(),
        },
        Action::SolveCaptcha {
            id: "solve".to_string(),
            selector: ".g-recaptcha".to_string(),
        },
    ]);
    let mut runner = runner(&script, services, CancellationToken::new());

    let result = run_opt_out(&mut runner, &broker).await;

    assert!(result.error.is_none());
    assert_eq!(script.executed(), vec!["captcha-info", "solve"]);
    assert_eq!(
        script.contexts()[1].captcha_token.as_deref(),
        Some("token-for-tx-site-key")
    );
}

#[tokio::test(start_paused = true)]
async fn test_solve_captcha_needs_captcha_info() {
    let script = Script::new();
    let services = Services {
        captcha: Arc::new(InstantCaptcha),
        ..Services::default()
    };
    let broker = opt_out_broker(vec![Action::SolveCaptcha {
        id: "solve".to_string(),
        selector: ".g-recaptcha".to_string(),
    }]);
    let mut runner = runner(&script, services, CancellationToken::new());

    let result = run_opt_out(&mut runner, &broker).await;

    assert_eq!(
        result.error,
        Some(OperationError::Captcha(CaptchaError::MissingInfo))
    );
    assert!(script.executed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_email_survives_failed_opt_out() {
    let script = Script::new();
    let mailbox = Arc::new(EmptyMailbox::default());
    let services = Services {
        email: mailbox.clone(),
        ..Services::default()
    };
    let broker = opt_out_broker(vec![
        Action::GetEmail {
            id: "email".to_string(),
        },
        Action::Click {
            id: "submit".to_string(),
            elements: Vec::new(),
        },
        Action::EmailConfirmation {
            id: "confirm-email".to_string(),
            polling_time_secs: None,
        },
    ]);
    let mut entry = entry_with_opt_out(broker);
    let link_missing = JobStatus::Failed(JobErrorKind::EmailService {
        message: EmailError::LinkNotReceived { attempts: 3 }.to_string(),
    });

    let mut first = runner(&script, services.clone(), CancellationToken::new());
    let outcome = run_opt_out_job(&mut first, &mut entry, 0, false).await;
    assert_eq!(outcome.status, link_missing);

    let job = &entry.opt_out_job_data[0];
    let confirmation = job.email_confirmation.clone().expect("confirmation kept");
    assert_eq!(confirmation.generated_email, "relay-0@relay.example");
    assert_eq!(confirmation.attempt_count, 3);
    assert!(confirmation.link.is_none());
    assert_eq!(
        job.extracted_profile.email.as_deref(),
        Some("relay-0@relay.example")
    );

    // The next run waits on the address the broker already has.
    let mut second = runner(&script, services, CancellationToken::new());
    let outcome = run_opt_out_job(&mut second, &mut entry, 0, false).await;
    assert_eq!(outcome.status, link_missing);

    assert_eq!(mailbox.generated.load(Ordering::SeqCst), 1);
    let submitted: Vec<_> = script
        .contexts()
        .into_iter()
        .map(|context| context.email)
        .collect();
    assert_eq!(
        submitted,
        vec![
            Some("relay-0@relay.example".to_string()),
            Some("relay-0@relay.example".to_string()),
        ]
    );
    let job = &entry.opt_out_job_data[0];
    let confirmation = job.email_confirmation.as_ref().expect("confirmation kept");
    assert_eq!(confirmation.generated_email, "relay-0@relay.example");
    assert_eq!(confirmation.attempt_count, 6);
    assert_eq!(job.attempt_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_opt_out_keeps_job_due() {
    let script = Script::new();
    let mut broker = common::broker("capped-broker");
    broker.schedule.max_attempts = Some(1);
    let schedule = broker.schedule;
    let mut entry = entry_with_opt_out(broker);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut runner = runner(&script, Services::default(), cancel);

    let outcome = run_opt_out_job(&mut runner, &mut entry, 0, false).await;

    assert_eq!(outcome.status, JobStatus::Cancelled);
    assert!(script.executed().is_empty());
    let job = &entry.opt_out_job_data[0];
    assert_eq!(job.attempt_count, 0);
    assert!(job.last_run_date.is_none());
    assert!(is_opt_out_due(job, &schedule, Utc::now()));
    let events: Vec<_> = job
        .history_events
        .iter()
        .map(|e| e.event_type.clone())
        .collect();
    assert_eq!(
        events,
        vec![
            EventType::OptOutStarted,
            EventType::Error {
                error: JobErrorKind::Cancelled
            }
        ]
    );
}
