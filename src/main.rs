use fingergate::{
    common::{self, Config, DevMode},
    core::{
        AdminEscalationGate, AuthPolicy, AuthenticationOrchestrator, AuthenticationResult,
        EnrollmentOrchestrator, EnrollmentPhase, EnrollmentPolicy, ErrorKind, EscalationPolicy,
        GateState, ScanOutcome, ScanSession, ScanSettings, ScanState, SessionRegistry,
    },
    device::{Matcher, SimulatedMatcher},
    storage::{AccessLevel, FileStore, NewUser, Store, UserUpdate},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(name = "fingergate")]
#[command(about = "Fingerprint access gate")]
struct Cli {
    /// Enable development mode (saves data locally for testing)
    #[arg(long, global = true)]
    dev: bool,

    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a fingerprint scanner is connected
    DetectScanner,
    /// Run a single capture and report its quality
    Scan,
    /// Enroll a new user
    Enroll {
        #[arg(short, long)]
        username: String,
        /// Full name of the user
        #[arg(short, long)]
        name: String,
        #[arg(short = 'l', long, default_value = "Operator")]
        access_level: AccessLevel,
        /// Administrator approving the enrollment, when approval is required
        #[arg(long)]
        admin: Option<String>,
    },
    /// Test authentication
    Test {
        #[arg(short, long)]
        username: String,
    },
    /// Identify whoever is on the scanner without a username
    Identify,
    /// List enrolled users
    Users {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a user
    Delete {
        #[arg(short, long)]
        username: String,
    },
    /// Change a user's access level
    SetAccess {
        #[arg(short, long)]
        username: String,
        #[arg(short = 'l', long)]
        level: AccessLevel,
    },
}

struct App {
    config: Config,
    matcher: Arc<dyn Matcher>,
    store: Arc<dyn Store>,
    sessions: Arc<SessionRegistry>,
    auth: Arc<AuthenticationOrchestrator>,
}

impl App {
    fn new(config: Config, dev_mode: &DevMode) -> Result<Self> {
        let store: Arc<dyn Store> = match (&config.storage.data_dir, dev_mode.is_enabled()) {
            (Some(dir), false) => Arc::new(FileStore::new_with_path(dir.clone())?),
            _ => Arc::new(FileStore::new_with_dev_mode(dev_mode)?),
        };
        let matcher: Arc<dyn Matcher> = Arc::new(SimulatedMatcher::new(
            config.simulator.clone(),
            config.quality.min_capture_quality,
        ));
        let sessions = Arc::new(SessionRegistry::new(
            Arc::clone(&matcher),
            ScanSettings::from_config(&config),
        ));
        let auth = Arc::new(AuthenticationOrchestrator::new(
            Arc::clone(&matcher),
            Arc::clone(&store),
            Arc::clone(&sessions),
            AuthPolicy::from_config(&config),
        ));

        Ok(Self {
            config,
            matcher,
            store,
            sessions,
            auth,
        })
    }

    async fn require_scanner(&self) -> Result<()> {
        println!("Initializing fingerprint scanner...");
        if !self.sessions.reinitialize().await? {
            print_failure(ErrorKind::NoScannerDetected);
            bail!("no fingerprint scanner available");
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on mode
    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;
    let config_path = cli.config.clone().unwrap_or_else(|| {
        if cli.dev {
            common::local_config_file()
        } else {
            common::system_config_file()
        }
    });
    let config = Config::load_or_default(&config_path)?;
    let app = App::new(config, &dev_mode)?;

    match cli.command {
        Commands::DetectScanner => {
            if app.sessions.reinitialize().await? {
                println!("✅ Scanner detected ({})", app.matcher.name());
            } else {
                print_failure(ErrorKind::NoScannerDetected);
            }
        }
        Commands::Scan => {
            app.require_scanner().await?;
            let session = app.sessions.acquire("cli:scan");
            let printer = show_progress(&session);
            println!("Place your finger on the scanner");
            let outcome = session.run().await?;
            printer.abort();
            println!();
            match outcome {
                ScanOutcome::Captured(template) => {
                    println!("✓ Captured {} (quality {}%)", template.fingerprint_id(), template.quality());
                }
                ScanOutcome::Failed(err) => print_failure(err.kind),
                ScanOutcome::Cancelled => println!("Scan cancelled"),
            }
        }
        Commands::Enroll {
            username,
            name,
            access_level,
            admin,
        } => {
            app.require_scanner().await?;
            println!("Enrolling user: {}", username);
            enroll(&app, NewUser::new(name, username, access_level), admin).await?;
        }
        Commands::Test { username } => {
            app.require_scanner().await?;
            println!("Testing authentication for: {}", username);
            let session = app.auth.session_for(&username);
            let printer = show_progress(&session);
            let result = app.auth.authenticate(&username).await;
            printer.abort();
            println!();
            report_authentication(&result);
            if app.auth.requires_escalation(&username) {
                println!("⚠ Too many failed attempts for '{}'; administrator assistance required", username);
            }
        }
        Commands::Identify => {
            app.require_scanner().await?;
            println!("Place your finger on the scanner");
            let result = app.auth.identify().await;
            report_authentication(&result);
        }
        Commands::Users { json } => {
            let users = app.store.list_users().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&users)?);
            } else if users.is_empty() {
                println!("No users enrolled");
            } else {
                for user in users {
                    let last = user
                        .last_access
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "never".into());
                    println!(
                        "{:<12} {:<24} {:<14} {:<16} last access: {}",
                        user.username, user.name, user.access_level, user.fingerprint_id, last
                    );
                }
            }
        }
        Commands::Delete { username } => {
            let record = app
                .store
                .get_user_by_username(&username)
                .await?
                .with_context(|| format!("user '{}' not found", username))?;
            app.store.delete_user(&record.user.id).await?;
            println!("Deleted user '{}'", username);
        }
        Commands::SetAccess { username, level } => {
            let record = app
                .store
                .get_user_by_username(&username)
                .await?
                .with_context(|| format!("user '{}' not found", username))?;
            let update = UserUpdate {
                access_level: Some(level),
                ..Default::default()
            };
            app.store.update_user(&record.user.id, update).await?;
            println!("'{}' is now {}", username, level);
        }
    }

    Ok(())
}

async fn enroll(app: &App, profile: NewUser, admin: Option<String>) -> Result<()> {
    let enrollment = EnrollmentOrchestrator::new(
        Arc::clone(&app.matcher),
        Arc::clone(&app.store),
        Arc::clone(&app.sessions),
        EnrollmentPolicy::from_config(&app.config),
    );
    let prompts = show_enrollment_phases(&enrollment);

    let policy = EscalationPolicy::from_config(&app.config);
    let has_admin = app
        .store
        .list_users()
        .await?
        .iter()
        .any(|u| u.is_administrator());

    let result = if policy.required_for_enrollment && has_admin {
        let admin = admin.context("--admin is required while administrator approval is enabled")?;
        let mut gate = AdminEscalationGate::new(
            Arc::clone(&app.auth),
            Arc::clone(&app.store),
            Arc::clone(&app.sessions),
            policy,
        );
        approve(app, &mut gate, &profile.username, &admin).await?;
        gate.execute(enrollment.enroll(profile)).await
    } else {
        if policy.required_for_enrollment {
            tracing::warn!("No administrator enrolled yet; skipping approval for bootstrap enrollment");
        }
        enrollment.enroll(profile).await
    };
    prompts.abort();

    let id = result?;
    println!("✅ Enrollment complete, user id {}", id);
    Ok(())
}

async fn approve(app: &App, gate: &mut AdminEscalationGate, subject: &str, admin: &str) -> Result<()> {
    for attempt in 1..=app.config.enrollment.max_attempts {
        println!("Scan {}'s finger to request approval (attempt {})", subject, attempt);
        if gate.verify_primary(subject).await? == GateState::PendingAdminVerification {
            break;
        }
        if let Some(kind) = gate.last_error() {
            print_failure(kind);
        }
    }
    if gate.state() != GateState::PendingAdminVerification {
        bail!("primary scan for '{}' did not succeed", subject);
    }

    loop {
        println!("Administrator '{}', place your finger on the scanner", admin);
        match gate.verify_admin(admin).await? {
            GateState::Completed => {
                println!("✓ Administrator approval granted");
                return Ok(());
            }
            GateState::Rejected => bail!("administrator verification rejected"),
            _ => {
                if let Some(kind) = gate.last_error() {
                    print_failure(kind);
                }
                println!("Attempt {} failed. Please try again.", gate.admin_attempts());
            }
        }
    }
}

fn show_progress(session: &ScanSession) -> JoinHandle<()> {
    let mut rx = session.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.state == ScanState::Scanning {
                print!("\rScanning... {:>3}%", snapshot.progress);
                let _ = std::io::stdout().flush();
            }
        }
    })
}

fn show_enrollment_phases(enrollment: &EnrollmentOrchestrator) -> JoinHandle<()> {
    let mut rx = enrollment.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let phase = rx.borrow_and_update().clone();
            match phase {
                EnrollmentPhase::Capturing { attempt, rejected } => {
                    if let Some(kind) = rejected {
                        print_failure(kind);
                    }
                    println!("\nCapture {} - place your finger on the scanner", attempt);
                }
                EnrollmentPhase::Confirming { candidate_quality } => {
                    println!("First capture: {}% quality", candidate_quality);
                    println!("Place the same finger again to confirm");
                }
                EnrollmentPhase::Aborted(kind) => print_failure(kind),
                EnrollmentPhase::Idle | EnrollmentPhase::Committed(_) => {}
            }
        }
    })
}

fn report_authentication(result: &AuthenticationResult) {
    match (&result.user, result.error) {
        (Some(user), _) if result.success => {
            println!("Authentication: SUCCESS");
            println!("Welcome {} ({})", user.name, user.access_level);
        }
        (_, Some(kind)) => {
            println!("Authentication: FAILED");
            print_failure(kind);
            if result.attempts > 0 {
                println!("Attempt {} failed. Please try again.", result.attempts);
            }
        }
        _ => println!("Authentication: FAILED"),
    }
}

fn print_failure(kind: ErrorKind) {
    println!("❌ {} [{}]", kind.title(), kind.code());
    println!("Recommended actions:");
    for (i, action) in kind.recommended_actions().iter().enumerate() {
        println!("  {}. {}", i + 1, action);
    }
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .init();
    }
}
