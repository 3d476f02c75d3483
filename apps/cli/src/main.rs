use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};
use client_core::{AuthClient, FlowError, ProfileSubmission, RegistrationFlow, RegistrationStage};
use dialoguer::{Confirm, Input, Password};
use shared::domain::{Session, UserType};
use storage::Storage;
use tracing::{error, info};

mod config;

use config::{load_settings, normalize_database_url, DEFAULT_CONFIG_PATH};

const BACK: &str = "back";

#[derive(Parser, Debug)]
#[command(name = "renteazy", about = "Sign in to RentEazy from the terminal")]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Overrides the configured API base URL.
    #[arg(long)]
    api_base_url: Option<String>,
    /// Overrides the configured session database.
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show who is signed in.
    Status,
    /// Sign in with a mobile number or email and a password.
    Login {
        #[arg(long)]
        identifier: String,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        host: bool,
    },
    /// Create an account through the OTP registration flow.
    Register {
        #[arg(long)]
        host: bool,
    },
    /// Forget the stored session.
    Logout,
    /// Print the browser URL for Google sign-in.
    GoogleUrl,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(&cli.config)?;
    if let Some(api_base_url) = cli.api_base_url {
        settings.api_base_url = api_base_url;
    }
    if let Some(database_url) = cli.database_url {
        settings.database_url = database_url;
    }

    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open session database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    storage.health_check().await?;
    let client = AuthClient::connect(
        &settings.api_base_url,
        settings.request_timeout(),
        Arc::new(storage),
    )
    .await?;
    info!(api_base_url = %settings.api_base_url, "auth client ready");

    match cli.command {
        Command::Status => print_status(&client),
        Command::Login {
            identifier,
            password,
            host,
        } => {
            let password = match password {
                Some(password) => password,
                None => Password::new().with_prompt("Password").interact()?,
            };
            match client
                .login_flow()
                .login(&identifier, &password, UserType::from_host_flag(host))
                .await
            {
                Ok(session) => print_signed_in(&session),
                Err(error) => println!("{error}"),
            }
        }
        Command::Register { host } => {
            register(client.registration(), UserType::from_host_flag(host)).await?;
        }
        Command::Logout => {
            client.logout().await?;
            println!("signed out");
        }
        Command::GoogleUrl => match client.google_sign_in_url() {
            Some(url) => println!("{url}"),
            None => println!("google sign-in is not configured"),
        },
    }

    Ok(())
}

fn print_status(client: &AuthClient) {
    match client.sessions().current().display_label() {
        Some(label) => println!("signed in as {label}"),
        None => println!("not signed in"),
    }
}

fn print_signed_in(session: &Session) {
    println!("signed in as {} ({})", session.identity, session.role);
}

/// Walks the registration stages until the account exists or the user gives up.
async fn register(flow: Arc<RegistrationFlow>, intended_role: UserType) -> Result<()> {
    println!("Type '{BACK}' at any prompt to return to the previous step.");

    loop {
        match flow.stage().await {
            RegistrationStage::CollectMobile => {
                let mobile: String = Input::new()
                    .with_prompt("Mobile number")
                    .allow_empty(true)
                    .interact_text()?;
                if mobile.trim() == BACK {
                    flow.abandon().await;
                    println!("registration cancelled");
                    return Ok(());
                }
                match flow.request_otp(&mobile, intended_role).await {
                    Ok(()) => println!("OTP sent to {}", mobile.trim()),
                    Err(error) => println!("{error}"),
                }
            }
            RegistrationStage::AwaitOtpVerification => {
                let code: String = Input::new()
                    .with_prompt("OTP")
                    .allow_empty(true)
                    .interact_text()?;
                if code.trim() == BACK {
                    flow.return_to_mobile_stage().await?;
                    continue;
                }
                if let Err(error) = flow.verify_otp(&code).await {
                    println!("{error}");
                }
            }
            RegistrationStage::CollectProfile => {
                let retained = flow.retained_profile().await.unwrap_or_default();
                let name: String = Input::new()
                    .with_prompt("Full name")
                    .with_initial_text(retained.name)
                    .allow_empty(true)
                    .interact_text()?;
                if name.trim() == BACK {
                    flow.return_to_otp_stage().await?;
                    continue;
                }
                let email: String = Input::new()
                    .with_prompt("Email")
                    .with_initial_text(retained.email)
                    .allow_empty(true)
                    .interact_text()?;
                let password = Password::new()
                    .with_prompt("Password")
                    .allow_empty_password(true)
                    .interact()?;
                let password_confirmation = Password::new()
                    .with_prompt("Confirm password")
                    .allow_empty_password(true)
                    .interact()?;
                let terms_accepted = Confirm::new()
                    .with_prompt("Accept the terms and conditions?")
                    .default(false)
                    .interact()?;

                let submission = ProfileSubmission {
                    name,
                    email,
                    password,
                    password_confirmation,
                    terms_accepted,
                };
                match flow.complete_registration(submission).await {
                    Ok(session) => {
                        print_signed_in(&session);
                        return Ok(());
                    }
                    Err(FlowError::Persistence(reason)) => {
                        println!("account created but the session could not be saved: {reason}");
                        return Ok(());
                    }
                    Err(error) => println!("{error}"),
                }
            }
            RegistrationStage::Completed => return Ok(()),
        }
    }
}
