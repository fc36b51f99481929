use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use hymie_engine::{AccessDenied, Hymie, MailError, Mailer, MemoryMailer, OutgoingEmail, RegisterOutcome, ViewOutcome};
use hymie_registry::Submission;
use tempfile::{TempDir, tempdir};

const DEFINITION: &str = r#"
metadata:
  name: Trips
  description: Travel approval
  maintainer: Jane
  maintainer_email: jane@example.com
  first_endpoint: request
  friendly_user_id: "{{ request.last_name }}"
config:
  email:
    address: trips@example.com
    host: localhost
    port: 25
    use_tls: false
    use_ssl: false
    user: ""
    password: ""
    timeout: 5
    subject: "[Trips]"
    debug: true
  secret:
    key: abc
    admin_password: admin
  storage:
    path: data
    salt: pepper
    hash_iterations: 1
  server:
    base_url: "http://forms.test"
    bind_address: "127.0.0.1:0"
    max_upload_bytes: 1048576
endpoints:
  request:
    description: Trip request
    form_action: store
    actions:
      - email:
          template: submitted.md
          destination: user
      - email_form:
          destination: self
          condition: "form.amount != '0'"
    conditional_next_state:
      - condition: "form.amount == '0'"
        next_state: approved
    next_state: review
  review:
    description: Waiting for review
    admin_links:
      - text: Approve
        endpoint: approved
        type: accept
        tooltip: Approve the trip
      - text: Reject
        endpoint: rejected
        type: reject
  approved:
    description: Approved
    actions:
      - email:
          template: approved.md
          destination: user
  rejected:
    description: Rejected
"#;

const FILES: [(&str, &str); 9] = [
    ("emails/welcome.md", "---\nsubject: Your access link\n---\nHello, follow [this link]({{ link }}).\n"),
    (
        "emails/submitted.md",
        "---\nsubject: Request received\n---\nThanks {{ form.first_name }}. Amount {{ form.amount }}.\n",
    ),
    ("emails/approved.md", "---\nsubject: Approved\n---\nGood news for {{ request.first_name }}.\n"),
    (
        "forms/request.md",
        "---\nfields:\n  first_name: {label: First name, type: StringField, required: true}\n  last_name: {label: Last name, type: StringField, required: true}\n  amount: {label: Amount, type: StringField, required: true}\n---\nTell us about the trip.\n",
    ),
    ("pages/start.md", "# {{ name }}\n\n[Register]({{ link_register }})\n"),
    ("pages/request.md", "Thanks, your request was received.\n"),
    ("pages/approved.md", "Your trip is approved.\n"),
    ("pages/review.md", "Your request is being reviewed.\n"),
    ("pages/rejected.md", "Your trip was rejected.\n"),
];

struct App {
    _folder: TempDir,
    hymie: Hymie,
    mailer: Arc<MemoryMailer>,
}

fn write_app(root: &Path, definition: &str) {
    fs::write(root.join("hymie.yaml"), definition).unwrap();
    for (path, content) in FILES {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

fn open_app(definition: &str) -> App {
    let folder = tempdir().unwrap();
    write_app(folder.path(), definition);
    let mailer = Arc::new(MemoryMailer::default());
    let hymie = Hymie::open(folder.path(), false, Some(mailer.clone())).unwrap();
    App {
        _folder: folder,
        hymie,
        mailer,
    }
}

fn submission(values: &[(&str, &str)]) -> Submission {
    Submission {
        values: values.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect(),
        files: HashMap::new(),
    }
}

async fn registered(app: &App) -> String {
    let outcome = app.hymie.register("jane@example.com").await.unwrap();
    assert_eq!(
        outcome,
        RegisterOutcome::Registered {
            email: "jane@example.com".into()
        }
    );
    app.mailer.take();
    app.hymie.storage().hash_for("jane@example.com")
}

#[tokio::test]
async fn registration_sends_the_access_link() {
    let app = open_app(DEFINITION);
    app.hymie.register("jane@example.com").await.unwrap();
    let uid = app.hymie.storage().hash_for("jane@example.com");

    let sent = app.mailer.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "jane@example.com");
    assert_eq!(sent[0].subject, "[Trips] Your access link");
    assert!(sent[0].html.contains(&format!("http://forms.test/view/{uid}")));

    let again = app.hymie.register("jane@example.com").await.unwrap();
    assert_eq!(
        again,
        RegisterOutcome::AlreadyRegistered {
            recover_link: "http://forms.test/recover/jane%40example.com".into()
        }
    );
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn recovery_resends_the_access_link() {
    let app = open_app(DEFINITION);
    registered(&app).await;
    app.hymie.recover("jane@example.com").await.unwrap();
    assert_eq!(app.mailer.take().len(), 1);
}

#[tokio::test]
async fn current_state_shows_its_form() {
    let app = open_app(DEFINITION);
    let uid = registered(&app).await;

    let ViewOutcome::Form(page) = app.hymie.handle_view(&uid, None, None, None).await.unwrap() else {
        panic!("expected a form");
    };
    assert_eq!(page.endpoint, "request");
    assert_eq!(page.user_email, "jane@example.com");
    assert!(page.intro_html.contains("Tell us about the trip."));
    let names: Vec<_> = page.fields.iter().map(|field| field.name.as_str()).collect();
    assert_eq!(names, ["first_name", "last_name", "amount"]);
    assert!(!page.has_files);
}

#[tokio::test]
async fn invalid_submissions_are_shown_again() {
    let app = open_app(DEFINITION);
    let uid = registered(&app).await;

    let outcome = app
        .hymie
        .handle_view(&uid, None, None, Some(submission(&[("first_name", "Jane"), ("last_name", "Doe")])))
        .await
        .unwrap();
    let ViewOutcome::Form(page) = outcome else {
        panic!("expected the form again");
    };
    assert_eq!(page.errors, ["Error in the Amount field - This field is required."]);
    assert_eq!(page.fields[0].value, "Jane");
    assert_eq!(app.hymie.storage().user_state(&uid).unwrap().state, "request");
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn submitting_stores_runs_actions_and_moves_on() {
    let app = open_app(DEFINITION);
    let uid = registered(&app).await;
    let first_hcsf = app.hymie.storage().statehash_for(&uid).unwrap();

    let outcome = app
        .hymie
        .handle_view(
            &uid,
            None,
            None,
            Some(submission(&[("first_name", "Jane"), ("last_name", "Doe"), ("amount", "250")])),
        )
        .await
        .unwrap();
    let ViewOutcome::Page { endpoint, html } = outcome else {
        panic!("expected the request page");
    };
    assert_eq!(endpoint, "request");
    assert!(html.contains("your request was received"));

    let state = app.hymie.storage().user_state(&uid).unwrap();
    assert_eq!(state.state, "review");
    assert_ne!(app.hymie.storage().statehash_for(&uid).unwrap(), first_hcsf);
    let stored = app.hymie.storage().user_retrieve(&uid, "request").unwrap();
    assert_eq!(stored.content["amount"], "250");

    let sent = app.mailer.take();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].subject, "[Trips] Request received");
    assert!(sent[0].html.contains("Thanks Jane. Amount 250."));
    assert_eq!(sent[1].to, "trips@example.com");
    assert_eq!(sent[1].subject, "[Trips] request");
    assert!(sent[1].html.contains("<th align=\"left\">amount</th><td>250</td>"));
}

#[tokio::test]
async fn conditional_next_state_wins_and_skips_disabled_actions() {
    let app = open_app(DEFINITION);
    let uid = registered(&app).await;

    app.hymie
        .handle_view(
            &uid,
            None,
            None,
            Some(submission(&[("first_name", "Jane"), ("last_name", "Doe"), ("amount", "0")])),
        )
        .await
        .unwrap();

    assert_eq!(app.hymie.storage().user_state(&uid).unwrap().state, "approved");
    let sent = app.mailer.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "jane@example.com");
}

#[tokio::test]
async fn admin_links_move_the_user_once() {
    let app = open_app(DEFINITION);
    let uid = registered(&app).await;
    app.hymie
        .handle_view(
            &uid,
            None,
            None,
            Some(submission(&[("first_name", "Jane"), ("last_name", "Doe"), ("amount", "250")])),
        )
        .await
        .unwrap();
    app.mailer.take();

    let summary = app.hymie.admin_view(&uid).unwrap();
    assert_eq!(summary.state, "review");
    assert_eq!(summary.friendly_id, "Doe");
    assert_eq!(summary.admin_links.len(), 2);
    assert_eq!(summary.admin_links[0].kind, "accept");
    let hcsf = app.hymie.storage().statehash_for(&uid).unwrap();
    assert_eq!(
        summary.admin_links[0].link,
        format!("http://forms.test/view/{uid}/{hcsf}/approved")
    );
    assert!(app.hymie.admin_entry(&uid, "request", None).unwrap().summary.action_zone);

    let outcome = app.hymie.handle_view(&uid, Some(&hcsf), Some("approved"), None).await.unwrap();
    let ViewOutcome::Page { html, .. } = outcome else {
        panic!("expected the approved page");
    };
    assert!(html.contains("Your trip is approved."));
    assert_eq!(app.hymie.storage().user_state(&uid).unwrap().state, "approved");
    let sent = app.mailer.take();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].html.contains("Good news for Jane."));

    let stale = app.hymie.handle_view(&uid, Some(&hcsf), Some("rejected"), None).await.unwrap();
    assert!(matches!(stale, ViewOutcome::Denied(AccessDenied::StaleLink)));
    assert!(!app.hymie.admin_entry(&uid, "request", None).unwrap().summary.action_zone);

    let rows = app.hymie.history_rows(&uid).unwrap();
    let endpoints: Vec<_> = rows.iter().map(|(_, endpoint, _)| endpoint.as_str()).collect();
    assert_eq!(endpoints, ["request", "approved"]);
}

#[tokio::test]
async fn unknown_users_are_denied() {
    let app = open_app(DEFINITION);
    let outcome = app.hymie.handle_view("deadbeef", None, None, None).await.unwrap();
    assert!(matches!(outcome, ViewOutcome::Denied(AccessDenied::InvalidLink)));
    let outcome = app.hymie.handle_view("../etc", Some("x"), Some("request"), None).await.unwrap();
    assert!(matches!(outcome, ViewOutcome::Denied(AccessDenied::InvalidLink)));
}

#[tokio::test]
async fn users_state_lists_registered_users() {
    let app = open_app(DEFINITION);
    let uid = registered(&app).await;
    let users = app.hymie.users_state().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].uid, uid);
    assert_eq!(users[0].state, "request");
    // no request stored yet, the e-mail stands in
    assert_eq!(users[0].friendly_id, "jane@example.com");
}

#[test]
fn start_page_has_registration_links() {
    let app = open_app(DEFINITION);
    let html = app.hymie.render_start_page().unwrap().unwrap();
    assert!(html.contains("<h1>Trips</h1>"));
    assert!(html.contains("http://forms.test/register"));
}

#[test]
fn a_consistent_app_passes_the_integrity_check() {
    let app = open_app(DEFINITION);
    let report = app.hymie.integrity_check();
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert!(app.hymie.ensure_integrity().is_ok());
}

#[test]
fn integrity_check_reports_broken_references() {
    let broken = DEFINITION
        .replace("next_state: review", "next_state: reviw")
        .replace("form.amount != '0'", "form.amont != '0'")
        .replace("first_endpoint: request", "first_endpoint: begin");
    let app = open_app(&broken);
    let report = app.hymie.integrity_check();

    assert!(report.errors.contains(&"first_endpoint not found: begin".to_string()));
    assert!(report
        .errors
        .contains(&"In request, next_state points to an unknown endpoint: reviw".to_string()));
    assert!(report
        .errors
        .iter()
        .any(|error| error.contains("contains an unknown variable: request.amont")));
    assert!(app.hymie.ensure_integrity().is_err());
}

/// Accepts messages until told to reject them.
#[derive(Default)]
struct FlakyMailer {
    rejecting: AtomicBool,
}

#[async_trait]
impl Mailer for FlakyMailer {
    async fn send(&self, _email: OutgoingEmail) -> Result<(), MailError> {
        if self.rejecting.load(Ordering::SeqCst) {
            Err(MailError::Rejected { code: "550".into() })
        } else {
            Ok(())
        }
    }
}

fn state_files(folder: &Path) -> usize {
    fs::read_dir(folder)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.starts_with("_state_") && name.ends_with(".json")
        })
        .count()
}

#[tokio::test]
async fn failed_action_leaves_the_state_untouched() {
    let folder = tempdir().unwrap();
    write_app(folder.path(), DEFINITION);
    let mailer = Arc::new(FlakyMailer::default());
    let hymie = Hymie::open(folder.path(), false, Some(mailer.clone())).unwrap();
    hymie.register("jane@example.com").await.unwrap();
    let uid = hymie.storage().hash_for("jane@example.com");
    let user_folder = hymie.storage().root().join(&uid);
    let hcsf = hymie.storage().statehash_for(&uid).unwrap();
    let files = state_files(&user_folder);

    mailer.rejecting.store(true, Ordering::SeqCst);
    let result = hymie
        .handle_view(
            &uid,
            None,
            None,
            Some(submission(&[("first_name", "Jane"), ("last_name", "Doe"), ("amount", "250")])),
        )
        .await;

    assert!(result.is_err());
    assert_eq!(hymie.storage().user_state(&uid).unwrap().state, "request");
    assert_eq!(hymie.storage().statehash_for(&uid).unwrap(), hcsf);
    assert_eq!(state_files(&user_folder), files);
}
