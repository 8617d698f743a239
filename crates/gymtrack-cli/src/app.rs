//! Command dispatch for the gymtrack CLI.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gymtrack_core::models::ProfileUpdate;
use gymtrack_core::utils::{format_date, title_case, truncate};
use gymtrack_core::{ApiClient, AuthManager, Config};
use tracing::{debug, warn};

/// Exercise names longer than this are cut in list views
const NAME_COLUMN_WIDTH: usize = 32;

/// gymtrack - browse exercises and record workouts from a terminal
#[derive(Parser, Debug)]
#[command(name = "gymtrack", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Sign in (prompts for password)
    Login {
        /// Defaults to the last e-mail used
        email: Option<String>,
    },
    /// Create an account and sign in
    #[command(name = "signup")]
    SignUp { name: String, email: String },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in user
    #[command(name = "whoami")]
    WhoAmI,
    /// List muscle groups
    Groups,
    /// List exercises for a muscle group
    Exercises {
        #[arg(required = true, num_args = 1..)]
        group: Vec<String>,
    },
    /// Show one exercise
    Exercise { id: String },
    /// Record an exercise as done
    Done { id: String },
    /// Show completed exercises by day
    History,
    /// Change your name or password
    Profile {
        #[command(subcommand)]
        action: ProfileCommand,
    },
    /// Upload a new avatar image
    Avatar { path: PathBuf },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ProfileCommand {
    /// Change your name
    Name {
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
    },
    /// Change your password
    Password,
}

impl Command {
    fn needs_session(&self) -> bool {
        !matches!(
            self,
            Command::Login { .. } | Command::SignUp { .. } | Command::Logout
        )
    }
}

pub struct App {
    config: Config,
    auth: AuthManager,
}

impl App {
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        debug!(api_url = %config.api_url, backend = ?config.credential_backend, "Config loaded");

        let store = config.credential_store()?;
        let client = ApiClient::new(config.api_url.clone(), store)
            .context("Failed to create API client")?;

        let auth = AuthManager::new(client);
        auth.attach();
        if let Err(e) = auth.load_user_data().await {
            warn!(error = %e, "Failed to load stored session");
        }

        Ok(Self { config, auth })
    }

    fn client(&self) -> &ApiClient {
        self.auth.client()
    }

    pub async fn run(mut self, command: Command) -> Result<()> {
        if command.needs_session() && !self.auth.is_signed_in() {
            bail!("Not signed in. Run `gymtrack login` first.");
        }

        match command {
            Command::Login { email } => self.login(email).await,
            Command::SignUp { name, email } => self.sign_up(&name, &email).await,
            Command::Logout => {
                self.auth.sign_out().await;
                println!("Signed out.");
                Ok(())
            }
            Command::WhoAmI => self.who_am_i(),
            Command::Groups => self.groups().await,
            Command::Exercises { group } => self.exercises(&group.join(" ")).await,
            Command::Exercise { id } => self.exercise(&id).await,
            Command::Done { id } => self.done(&id).await,
            Command::History => self.history().await,
            Command::Profile {
                action: ProfileCommand::Name { name },
            } => self.profile_name(&name.join(" ")).await,
            Command::Profile {
                action: ProfileCommand::Password,
            } => self.profile_password().await,
            Command::Avatar { path } => self.avatar(&path).await,
        }
    }

    async fn login(&mut self, email: Option<String>) -> Result<()> {
        let email = match email.or_else(|| self.config.last_email.clone()) {
            Some(email) => email,
            None => prompt_line("E-mail: ")?,
        };
        let password = rpassword::prompt_password("Password: ")?;

        let user = self.auth.sign_in(&email, &password).await?;

        self.config.last_email = Some(email);
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }

        println!("Welcome, {}!", user.name);
        Ok(())
    }

    async fn sign_up(&mut self, name: &str, email: &str) -> Result<()> {
        let password = rpassword::prompt_password("Password: ")?;
        let confirm = rpassword::prompt_password("Confirm password: ")?;
        if password != confirm {
            bail!("Passwords do not match");
        }

        let user = self.auth.sign_up(name, email, &password).await?;

        self.config.last_email = Some(email.to_string());
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }

        println!("Account created. Welcome, {}!", user.name);
        Ok(())
    }

    fn who_am_i(&self) -> Result<()> {
        if let Some(user) = self.auth.user() {
            println!("{} <{}>", user.name, user.email);
            if let Some(url) = self.client().avatar_url(&user) {
                println!("Avatar: {}", url);
            }
        }
        Ok(())
    }

    async fn groups(&self) -> Result<()> {
        for group in self.client().fetch_groups().await? {
            println!("{}", title_case(&group));
        }
        Ok(())
    }

    async fn exercises(&self, group: &str) -> Result<()> {
        let exercises = self.client().fetch_exercises_by_group(group).await?;
        println!("{} ({})", title_case(group), exercises.len());
        for exercise in exercises {
            println!(
                "  {:>4}  {:<width$}  {}",
                exercise.id,
                truncate(&exercise.name, NAME_COLUMN_WIDTH),
                exercise.display_sets(),
                width = NAME_COLUMN_WIDTH
            );
        }
        Ok(())
    }

    async fn exercise(&self, id: &str) -> Result<()> {
        let exercise = self.client().fetch_exercise(id).await?;
        println!("{}", exercise.name);
        println!("Group: {}", title_case(&exercise.group));
        println!("{}", exercise.display_sets());
        println!("Demo: {}", self.client().exercise_demo_url(&exercise));
        Ok(())
    }

    async fn done(&self, id: &str) -> Result<()> {
        self.client().register_history(id).await?;
        println!("Nice work! Exercise recorded in your history.");
        Ok(())
    }

    async fn history(&self) -> Result<()> {
        let days = self.client().fetch_history().await?;
        if days.is_empty() {
            println!("No exercises recorded yet.");
            return Ok(());
        }
        for day in days {
            let date = day
                .data
                .first()
                .map(|entry| format_date(&entry.created_at))
                .unwrap_or_else(|| day.title.clone());
            println!("{} - {}", date, day.count_display());
            for entry in &day.data {
                println!(
                    "  {}  {:<width$}  {}",
                    entry.hour,
                    truncate(&entry.name, NAME_COLUMN_WIDTH),
                    title_case(&entry.group),
                    width = NAME_COLUMN_WIDTH
                );
            }
        }
        Ok(())
    }

    async fn profile_name(&self, name: &str) -> Result<()> {
        let update = ProfileUpdate {
            name: name.to_string(),
            ..Default::default()
        };
        self.client().update_profile(&update).await?;
        self.auth.update_user_profile(Some(name), None).await?;
        println!("Profile updated.");
        Ok(())
    }

    async fn profile_password(&self) -> Result<()> {
        let Some(user) = self.auth.user() else {
            bail!("Not signed in");
        };
        let old_password = rpassword::prompt_password("Current password: ")?;
        let password = rpassword::prompt_password("New password: ")?;
        let confirm = rpassword::prompt_password("Confirm new password: ")?;
        if password != confirm {
            bail!("Passwords do not match");
        }

        let update = ProfileUpdate {
            name: user.name,
            password: Some(password),
            old_password: Some(old_password),
        };
        self.client().update_profile(&update).await?;
        println!("Password updated.");
        Ok(())
    }

    async fn avatar(&self, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("Avatar path has no file name")?;

        let user = self.client().upload_avatar(file_name, bytes).await?;
        self.auth
            .update_user_profile(None, user.avatar.as_deref())
            .await?;
        println!("Avatar updated.");
        Ok(())
    }
}

fn prompt_line(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
