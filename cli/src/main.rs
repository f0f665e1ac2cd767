use std::sync::Arc;

use anyhow::Context;
use astra_backend_client::ApiError;
use astra_backend_client::BackendClient;
use astra_core::Config;
use astra_core::ConfigOverrides;
use astra_core::JobPoller;
use astra_core::NotificationBus;
use astra_core::SessionManager;
use astra_core::auth::CredentialStore;
use astra_core::auth::CredentialsStoreMode;
use astra_core::auth::Navigator;
use astra_core::auth::StoredCredential;
use astra_core::auth::create_credential_store;
use astra_core::ingest::PollState;
use astra_core::token_data::decode_token;
use astra_protocol::CodebaseId;
use astra_protocol::JobKey;
use chrono::DateTime;
use clap::Parser;
use supports_color::Stream;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use url::Url;

mod browser;
mod render;

use crate::browser::BrowserNavigator;
use crate::render::NotificationPrinter;

/// Command-line client for the astramind code-intelligence backend.
#[derive(Debug, Parser)]
#[clap(author, version, bin_name = "astra")]
struct Cli {
    /// Backend base URL. Overrides `ASTRA_API_BASE_URL` and config.toml.
    #[arg(long = "api-base-url", global = true, value_name = "URL")]
    api_base_url: Option<String>,

    /// Keep the credential in memory only for this invocation.
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Open the GitHub sign-in page.
    Login,

    /// Store the token from the URL the sign-in flow redirected to.
    Callback {
        #[arg(value_name = "URL")]
        url: String,
    },

    /// Check whether you are signed in.
    Status {
        /// Also ask the backend whether it accepts the stored token.
        #[arg(long)]
        verify: bool,
    },

    /// Show the identity in the stored token.
    Whoami,

    /// Sign out and forget the stored token.
    Logout,

    /// Analyze a GitHub repository and wait for the result.
    Analyze {
        /// Repository as `owner/repo`.
        #[arg(value_name = "OWNER/REPO")]
        repository: JobKey,
    },

    /// List analyzed codebases.
    Codebases,

    /// Show one analyzed codebase.
    Codebase {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Delete an analyzed codebase.
    Delete {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// List your GitHub repositories.
    Repos,
}

struct App {
    config: Config,
    store: Arc<dyn CredentialStore>,
    backend: Arc<BackendClient>,
    notifications: NotificationBus,
    color: bool,
}

impl App {
    fn new(config: Config, color: bool) -> Self {
        let store = create_credential_store(&config.astra_home, config.credentials_store);
        let backend = BackendClient::with_default_transport(&config.api_base_url)
            .with_auth(Arc::new(StoredCredential::new(Arc::clone(&store))));
        let notifications = NotificationBus::with_dismiss_after(config.notification_timeout);
        Self {
            config,
            store,
            backend: Arc::new(backend),
            notifications,
            color,
        }
    }

    fn app_url(&self) -> anyhow::Result<Url> {
        Url::parse(&self.config.app_url)
            .with_context(|| format!("invalid app_url {:?}", self.config.app_url))
    }

    fn session(&self, navigator: Arc<dyn Navigator>) -> SessionManager {
        SessionManager::from_config(
            &self.config,
            Arc::clone(&self.store),
            self.backend.clone(),
            navigator,
            self.notifications.clone(),
        )
    }

    fn printer(&self) -> NotificationPrinter {
        NotificationPrinter::new(self.notifications.subscribe(), self.color)
    }

    async fn run(&self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Login => self.login().await,
            Command::Callback { url } => self.callback(&url).await,
            Command::Status { verify } => self.status(verify).await,
            Command::Whoami => self.whoami(),
            Command::Logout => self.logout().await,
            Command::Analyze { repository } => self.analyze(repository).await,
            Command::Codebases => self.codebases().await,
            Command::Codebase { id } => self.codebase(CodebaseId::new(id)).await,
            Command::Delete { id } => self.delete(CodebaseId::new(id)).await,
            Command::Repos => self.repos().await,
        }
    }

    async fn login(&self) -> anyhow::Result<()> {
        let mut printer = self.printer();
        let session = self.session(Arc::new(BrowserNavigator::new(self.app_url()?, true)));
        let started = session.login().await;
        printer.drain();
        if !started {
            anyhow::bail!("could not start sign-in");
        }
        println!(
            "After signing in, run `astra callback <URL>` with the address your browser was sent to."
        );
        Ok(())
    }

    async fn callback(&self, raw_url: &str) -> anyhow::Result<()> {
        let location = Url::parse(raw_url).with_context(|| format!("invalid URL {raw_url:?}"))?;
        let mut printer = self.printer();
        let session = self.session(Arc::new(BrowserNavigator::at(self.app_url()?, location)));
        if !session.handle_auth_callback() {
            printer.drain();
            anyhow::bail!("no token found in {raw_url}");
        }
        let state = session.check_auth().await;
        printer.drain();
        println!("{}", render::format_session(&state));
        Ok(())
    }

    async fn status(&self, verify: bool) -> anyhow::Result<()> {
        let mut printer = self.printer();
        let session = self.session(Arc::new(BrowserNavigator::new(self.app_url()?, false)));
        let state = session.check_auth().await;
        printer.drain();
        println!("{}", render::format_session(&state));
        if !verify {
            return Ok(());
        }

        let Some(token) = self.store.load().context("failed to read stored credential")? else {
            println!("No stored token to verify.");
            return Ok(());
        };
        let validation = self
            .backend
            .validate_token(&token)
            .await
            .map_err(|err| backend_error(err, "failed to verify token"))?;
        if !validation.valid {
            anyhow::bail!("the backend rejected the stored token; run `astra login`");
        }
        println!("Token accepted by the backend.");
        Ok(())
    }

    fn whoami(&self) -> anyhow::Result<()> {
        let token = self
            .store
            .load()
            .context("failed to read stored credential")?
            .context("not signed in")?;
        let claims = decode_token(&token).context("stored credential is not a valid token")?;
        let identity = &claims.identity;
        println!("user:     {}", identity.display_name());
        if let Some(user_id) = &identity.user_id {
            println!("id:       {user_id}");
        }
        if let Some(email) = &identity.email {
            println!("email:    {email}");
        }
        match claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0)) {
            Some(expires) if claims.is_expired_at(chrono::Utc::now()) => {
                println!("expired:  {}", expires.to_rfc3339());
            }
            Some(expires) => println!("expires:  {}", expires.to_rfc3339()),
            None => println!("expires:  unknown"),
        }
        Ok(())
    }

    async fn logout(&self) -> anyhow::Result<()> {
        let mut printer = self.printer();
        let session = self.session(Arc::new(BrowserNavigator::new(self.app_url()?, false)));
        session.logout().await;
        printer.drain();
        Ok(())
    }

    async fn analyze(&self, key: JobKey) -> anyhow::Result<()> {
        let mut printer = self.printer();
        let poller = JobPoller::new(
            self.backend.clone(),
            self.notifications.clone(),
            self.config.ingest,
        );
        let submitted = poller.submit_job(key.clone()).await;
        printer.drain();
        let handle = submitted?;

        let wait = handle.wait();
        tokio::pin!(wait);
        let outcome = loop {
            tokio::select! {
                outcome = &mut wait => break outcome,
                _ = printer.print_next() => {}
            }
        };
        printer.drain();

        match outcome {
            PollState::Succeeded { .. } => Ok(()),
            PollState::Failed { message } => anyhow::bail!("analysis of {key} failed: {message}"),
            PollState::TimedOut { attempts } => {
                anyhow::bail!("analysis of {key} did not finish after {attempts} status checks")
            }
            PollState::Cancelled | PollState::Running { .. } => {
                anyhow::bail!("analysis of {key} was interrupted")
            }
        }
    }

    async fn codebases(&self) -> anyhow::Result<()> {
        let codebases = self
            .backend
            .list_codebases()
            .await
            .map_err(|err| backend_error(err, "failed to list codebases"))?;
        if codebases.is_empty() {
            println!("No codebases yet. Run `astra analyze <owner/repo>` to add one.");
        }
        for codebase in &codebases {
            println!("{}", render::format_codebase(codebase));
        }
        Ok(())
    }

    async fn repos(&self) -> anyhow::Result<()> {
        let repos = self
            .backend
            .list_repositories()
            .await
            .map_err(|err| backend_error(err, "failed to list repositories"))?;
        for repo in &repos {
            println!("{}", render::format_repository(repo));
        }
        Ok(())
    }

    async fn codebase(&self, id: CodebaseId) -> anyhow::Result<()> {
        let detail = self
            .backend
            .codebase(&id)
            .await
            .map_err(|err| backend_error(err, &format!("failed to fetch codebase {id}")))?;
        println!("{}", render::format_codebase_detail(&detail));
        Ok(())
    }

    async fn delete(&self, id: CodebaseId) -> anyhow::Result<()> {
        self.backend
            .delete_codebase(&id)
            .await
            .map_err(|err| backend_error(err, &format!("failed to delete codebase {id}")))?;
        println!("Deleted codebase {id}.");
        Ok(())
    }
}

/// Points at `astra login` when the backend refused the credential.
fn backend_error(err: ApiError, action: &str) -> anyhow::Error {
    let context = if err.is_unauthorized() {
        format!("{action}: not signed in, run `astra login`")
    } else {
        action.to_string()
    };
    anyhow::Error::new(err).context(context)
}

fn init_tracing(verbose: bool, with_ansi: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(with_ansi)
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, supports_color::on(Stream::Stderr).is_some());

    let overrides = ConfigOverrides {
        api_base_url: cli.api_base_url,
        astra_home: None,
        credentials_store: cli.ephemeral.then_some(CredentialsStoreMode::Ephemeral),
    };
    let config = Config::load(overrides).context("failed to load configuration")?;
    tracing::debug!(api_base_url = %config.api_base_url, "configuration loaded");

    let app = App::new(config, supports_color::on(Stream::Stdout).is_some());
    app.run(cli.command).await
}
