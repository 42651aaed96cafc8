//! Relays one contact-form submission to the configured inbox.

use std::{
    io::Read,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::Context;
use clap::Parser;
use contact_smtp::{ContactForm, RelayResponse, SmtpConfig, contact};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "contact-relay")]
#[command(about = "Send a contact form submission through the configured SMTP server")]
struct Args {
    /// Read the submission as JSON from this file ("-" for stdin)
    #[arg(long, conflicts_with_all = ["name", "email", "subject", "message"])]
    json: Option<PathBuf>,

    /// Submitter's name
    #[arg(long, default_value = "")]
    name: String,

    /// Submitter's email address, used as Reply-To
    #[arg(long, default_value = "")]
    email: String,

    #[arg(long, default_value = "")]
    subject: String,

    #[arg(long, default_value = "")]
    message: String,

    /// Print the full response including the status code
    #[arg(long)]
    verbose: bool,
}

fn read_body(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut body = String::new();
        std::io::stdin()
            .read_to_string(&mut body)
            .context("reading stdin")?;
        Ok(body)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let response = match SmtpConfig::from_env() {
        Ok(config) => match &args.json {
            Some(path) => contact::relay_json(&read_body(path)?, &config).await,
            None => {
                let form = ContactForm {
                    name: args.name.clone(),
                    email: args.email.clone(),
                    subject: args.subject.clone(),
                    message: args.message.clone(),
                };
                contact::relay(&form, &config).await
            }
        },
        Err(e) => {
            // operators see why, submitters only see the generic failure
            log::error!("SMTP configuration: {e}");
            RelayResponse::failure()
        }
    };

    if args.verbose {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("{}", response.body);
    }

    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
