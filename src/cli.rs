use std::sync::Arc;

use anyhow::{bail, Context, Result};
use zeroize::Zeroizing;

use pbi_link::config::AppSettings;
use pbi_link::config_store::{ConfigStore, ConfigUpdate};
use pbi_link::crypto::CredentialCipher;
use pbi_link::model::Identifier;
use pbi_link::parser::{self, ParseError};
use pbi_link::providers::{AzureDevOpsClient, WorkItemApi};
use pbi_link::storage::{FileStore, KeyValueStore};
use pbi_link::validation::{friendly_message, Validator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { organization: String, pat: String },
    Status,
    Logout,
    Parse { url: String },
    Show { url: String },
    Check { urls: Vec<String> },
    Help,
}

/// Parse CLI args (without the program name) into a command.
pub fn parse_args(args: &[String]) -> Result<Command> {
    let Some((name, rest)) = args.split_first() else {
        return Ok(Command::Help);
    };

    let command = match name.as_str() {
        "login" => match rest {
            [organization, pat] => Command::Login {
                organization: organization.trim().to_string(),
                pat: pat.trim().to_string(),
            },
            _ => bail!("Usage: pbi login <organization> <personal-access-token>"),
        },
        "status" => Command::Status,
        "logout" => Command::Logout,
        "parse" => Command::Parse {
            url: single_url(rest, "parse")?,
        },
        "show" => Command::Show {
            url: single_url(rest, "show")?,
        },
        "check" => {
            if rest.is_empty() {
                bail!("Usage: pbi check <url> [<url> ...]");
            }
            Command::Check {
                urls: rest.to_vec(),
            }
        }
        "help" | "-h" | "--help" => Command::Help,
        other => bail!("Unknown command '{other}'. Run `pbi help` for usage."),
    };
    Ok(command)
}

fn single_url(rest: &[String], command: &str) -> Result<String> {
    match rest {
        [url] => Ok(url.clone()),
        _ => bail!("Usage: pbi {command} <work-item-url>"),
    }
}

struct Services {
    configs: ConfigStore,
    client: Arc<AzureDevOpsClient>,
    validator: Validator,
}

impl Services {
    fn new(settings: &AppSettings) -> Self {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(settings.data_dir()));
        let cipher = Arc::new(CredentialCipher::new(store.clone()));
        let client = Arc::new(AzureDevOpsClient::with_timeout(
            settings.api_base_url.clone(),
            settings.request_timeout(),
        ));
        let validator = Validator::with_batch_size(client.clone(), settings.batch_size);
        Self {
            configs: ConfigStore::new(store, cipher),
            client,
            validator,
        }
    }

    async fn token(&self) -> Result<Zeroizing<String>> {
        let config = self
            .configs
            .retrieve()
            .await
            .context("Not logged in. Run `pbi login <organization> <pat>` first.")?;
        Ok(config.pat)
    }
}

pub async fn run(command: Command, settings: &AppSettings) -> Result<()> {
    if command == Command::Help {
        print_help();
        return Ok(());
    }
    let services = Services::new(settings);

    match command {
        Command::Login { organization, pat } => {
            if !CredentialCipher::validate_format(&pat) {
                bail!("The personal access token must be 52 characters long.");
            }
            if !services.client.check_credential(&pat, &organization).await {
                bail!("Azure DevOps rejected the token for organization '{organization}'.");
            }
            let mut preferences = services
                .configs
                .get_info()
                .await
                .map(|info| info.preferences)
                .unwrap_or_default();
            preferences.last_base_url = Some(settings.api_base_url.clone());
            services
                .configs
                .store(ConfigUpdate {
                    organization: organization.clone(),
                    token: Some(pat),
                    preferences: Some(preferences),
                })
                .await?;
            println!("Saved credentials for {organization}.");
        }
        Command::Status => match services.configs.get_info().await {
            Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
            None => println!("Not logged in."),
        },
        Command::Logout => {
            services.configs.clear().await?;
            println!("Credentials removed.");
        }
        Command::Parse { url } => {
            println!("{}", serde_json::to_string_pretty(&parser::parse(&url))?);
        }
        Command::Show { url } => {
            let identifier = parser::parse_identifier(&url)?;
            let token = services.token().await?;
            match services.validator.validate(&identifier, &token).await.into_result() {
                Ok(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                Err(e) => bail!(friendly_message(&e)),
            }
        }
        Command::Check { urls } => {
            let token = services.token().await?;
            let parsed: Vec<Result<Identifier, ParseError>> =
                urls.iter().map(|url| parser::parse_identifier(url)).collect();
            let identifiers: Vec<Identifier> =
                parsed.iter().filter_map(|p| p.as_ref().ok().cloned()).collect();
            let mut results = services
                .validator
                .validate_batch(&identifiers, &token)
                .await
                .into_iter();

            let mut failures = 0;
            for (url, parse) in urls.iter().zip(parsed) {
                let line = match parse {
                    Err(e) => Err(e.to_string()),
                    Ok(_) => match results.next().map(|r| r.into_result()) {
                        Some(Ok(record)) => Ok(format!(
                            "#{} [{}] {}",
                            record.id, record.state, record.title
                        )),
                        Some(Err(e)) => Err(friendly_message(&e)),
                        None => Err("no result".to_string()),
                    },
                };
                match line {
                    Ok(summary) => println!("ok    {url}  {summary}"),
                    Err(message) => {
                        failures += 1;
                        println!("fail  {url}  {message}");
                    }
                }
            }
            if failures > 0 {
                bail!("{failures} of {} work items could not be validated", urls.len());
            }
        }
        Command::Help => {}
    }
    Ok(())
}

pub fn print_help() {
    println!("pbi — link Azure DevOps work items\n");
    println!("USAGE:");
    println!("  pbi login <organization> <pat>  Verify and store an access token");
    println!("  pbi status                      Show the stored configuration");
    println!("  pbi logout                      Remove stored credentials");
    println!("  pbi parse <url>                 Resolve a work item link");
    println!("  pbi show <url>                  Fetch and print a work item");
    println!("  pbi check <url>...              Validate several work item links");
    println!();
    println!("SETTINGS:");
    println!("  ~/.pbi-link/config.toml");
    println!("    api_base_url, request_timeout_secs, batch_size, data_dir");
    println!("  PBI_LINK_API_BASE_URL, PBI_LINK_DATA_DIR override the file");
}
