//! cloudscope CLI - Command-line interface for AWS connection checks
//!
//! Usage:
//!   cloudscope profiles
//!   cloudscope --profile dev --region eu-west-1 validate
//!   cloudscope ssm /app/prod/db-host
//!   cloudscope cfn network/VpcId

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use cloudscope_aws::{AwsTransport, ProfileFileLocations, ProfileWatcher};
use cloudscope_core::{
    ConnectionState, Error, PersistedSelection, Resource, Result, Session, Settings,
};
use colored::Colorize;
use tokio::runtime::Runtime;

/// Exit code when the connection needs user action (e.g. SSO login)
const EXIT_REQUIRES_ACTION: u8 = 3;

/// cloudscope - Validate AWS credential/region selections and look up resources
#[derive(Parser, Debug)]
#[command(name = "cloudscope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (YAML)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// File remembering the last selection between runs
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Profile to use (overrides the remembered selection)
    #[arg(short, long, global = true)]
    profile: Option<String>,

    /// Region to use (overrides the remembered selection)
    #[arg(short, long, global = true)]
    region: Option<String>,

    /// Send every request to this endpoint (LocalStack, moto)
    #[arg(long, global = true)]
    endpoint_url: Option<String>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List profiles from the shared AWS config files
    Profiles {
        /// Output format: text, json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List known regions
    Regions {
        /// Only regions of this partition
        #[arg(long)]
        partition: Option<String>,

        /// Output format: text, json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate the selected profile and region
    #[command(alias = "whoami")]
    Validate {
        /// Output format: text, json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Bypass the cached identity
        #[arg(long)]
        refresh: bool,
    },

    /// Get an SSM parameter
    Ssm {
        /// Parameter name (e.g., /app/prod/db-host)
        name: String,

        /// Print SecureString values instead of redacting them
        #[arg(long)]
        no_redact: bool,
    },

    /// Get CloudFormation stack outputs
    Cfn {
        /// stack-name/OutputKey, or stack-name for every output
        reference: String,

        /// Output format: text, json, yaml
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// S3 utilities
    #[command(name = "s3")]
    S3 {
        #[command(subcommand)]
        command: S3Commands,
    },

    /// Print the effective settings
    Settings,
}

#[derive(Subcommand, Debug)]
enum S3Commands {
    /// List bucket names
    Buckets,

    /// Print an object
    Get {
        /// bucket/key
        reference: String,

        /// Write to file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Run the CLI with the process arguments
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = match load_settings(cli.settings.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            return ExitCode::from(2);
        }
    };

    if let Commands::Settings = cli.command {
        return cmd_settings(&settings);
    }

    let runtime = match Runtime::new() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            return ExitCode::from(2);
        }
    };
    runtime.block_on(run_with_session(cli, settings, &runtime))
}

async fn run_with_session(cli: Cli, settings: Settings, runtime: &Runtime) -> ExitCode {
    let timeout = settings.validation_timeout();
    let context = match Context::open(&cli, settings, runtime).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            return ExitCode::from(2);
        }
    };

    let code = match cli.command {
        Commands::Profiles { format } => cmd_profiles(&context.watcher, &format),
        Commands::Regions { partition, format } => {
            cmd_regions(&context.session, partition.as_deref(), &format)
        }
        Commands::Validate { format, refresh } => {
            if refresh {
                context.session.connection().refresh_connection_state();
            }
            cmd_validate(&context.session, timeout, &format).await
        }
        Commands::Ssm { name, no_redact } => cmd_ssm(&context.session, &name, no_redact).await,
        Commands::Cfn { reference, format } => {
            cmd_cfn(&context.session, &reference, &format).await
        }
        Commands::S3 { command } => match command {
            S3Commands::Buckets => cmd_s3_buckets(&context.session).await,
            S3Commands::Get { reference, output } => {
                cmd_s3_get(&context.session, &reference, output).await
            }
        },
        // Handled before a session exists
        Commands::Settings => ExitCode::SUCCESS,
    };

    if let Some(path) = &cli.state {
        if let Err(e) = save_selection(path, &context.session.connection().save_state()) {
            eprintln!("{}: {}", "Warning".yellow(), e);
        }
    }
    context.session.shutdown();
    code
}

/// Install a stderr log subscriber for `-v` flags.
///
/// `RUST_LOG` wins over the flag when set.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => return,
        1 => "cloudscope_core=debug,cloudscope_aws=debug,cloudscope_cli=debug",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    // A second subscriber (tests) is not an error worth reporting
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load(path),
        None => Ok(Settings::default()),
    }
}

/// A wired session plus the profile watcher feeding it
struct Context {
    session: Session<AwsTransport>,
    watcher: ProfileWatcher,
}

impl Context {
    async fn open(cli: &Cli, settings: Settings, runtime: &Runtime) -> Result<Self> {
        let mut transport = AwsTransport::load().await;
        if let Some(url) = &cli.endpoint_url {
            transport = transport.with_endpoint_url(url);
        }
        let session =
            cloudscope_aws::session_with_transport(settings, transport, runtime.handle().clone())?;
        let watcher = cloudscope_aws::profile_watcher(&session, ProfileFileLocations::from_env());
        watcher.reload()?;

        let persisted = match &cli.state {
            Some(path) => load_selection(path)?,
            None => PersistedSelection::default(),
        };
        let selection = apply_overrides(
            persisted,
            cli.profile.as_deref(),
            cli.region.as_deref(),
        );
        check_selection(&session, cli, &selection)?;
        session.connection().load_state(&selection);

        Ok(Self { session, watcher })
    }
}

/// Flags win over the remembered selection
fn apply_overrides(
    mut selection: PersistedSelection,
    profile: Option<&str>,
    region: Option<&str>,
) -> PersistedSelection {
    if let Some(profile) = profile {
        selection.active_credential = Some(credential_id(profile));
    }
    if let Some(region) = region {
        selection.active_region = Some(region.to_string());
    }
    selection
}

/// Explicit flags must name something that exists; remembered ids may fall back
fn check_selection(
    session: &Session<AwsTransport>,
    cli: &Cli,
    selection: &PersistedSelection,
) -> Result<()> {
    if cli.profile.is_some() {
        if let Some(id) = &selection.active_credential {
            session.credentials().get(id)?;
        }
    }
    if cli.region.is_some() {
        if let Some(id) = &selection.active_region {
            session.regions().region(id)?;
        }
    }
    Ok(())
}

fn credential_id(profile: &str) -> String {
    if profile.contains(':') {
        profile.to_string()
    } else {
        format!("{}:{}", cloudscope_aws::profiles::PROFILE_FACTORY_ID, profile)
    }
}

fn load_selection(path: &Path) -> Result<PersistedSelection> {
    match std::fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(PersistedSelection::default()),
        Ok(content) => serde_yaml::from_str(&content).map_err(|e| {
            Error::parse(format!("Invalid state file '{}': {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedSelection::default()),
        Err(e) => Err(Error::io(format!(
            "Failed to read state file '{}': {}",
            path.display(),
            e
        ))),
    }
}

fn save_selection(path: &Path, selection: &PersistedSelection) -> Result<()> {
    let yaml = serde_yaml::to_string(selection)
        .map_err(|e| Error::internal(format!("Failed to serialize selection: {}", e)))?;
    std::fs::write(path, yaml).map_err(|e| {
        Error::io(format!(
            "Failed to write state file '{}': {}",
            path.display(),
            e
        ))
    })
}

fn cmd_settings(settings: &Settings) -> ExitCode {
    match settings.to_yaml() {
        Ok(yaml) => {
            print!("{}", yaml);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            ExitCode::from(1)
        }
    }
}

fn cmd_profiles(watcher: &ProfileWatcher, format: &str) -> ExitCode {
    let profiles = watcher.profiles();
    if format == "json" {
        let json: Vec<_> = profiles
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "id": p.credential_id(),
                    "region": p.region,
                    "sso": p.is_sso(),
                })
            })
            .collect();
        print_json(&serde_json::Value::Array(json));
        return ExitCode::SUCCESS;
    }

    if profiles.is_empty() {
        eprintln!(
            "No profiles found in {} or {}",
            watcher.locations().config.display(),
            watcher.locations().credentials.display()
        );
        return ExitCode::from(1);
    }
    for profile in profiles {
        let mut line = profile.name.bold().to_string();
        if let Some(region) = &profile.region {
            line.push_str(&format!("  {}", region.dimmed()));
        }
        if profile.is_sso() {
            line.push_str(&format!("  {}", "[sso]".cyan()));
        }
        println!("{}", line);
    }
    ExitCode::SUCCESS
}

fn cmd_regions(session: &Session<AwsTransport>, partition: Option<&str>, format: &str) -> ExitCode {
    let regions = match partition {
        Some(partition) => {
            if session.regions().partition(partition).is_none() {
                eprintln!("{}: Unknown partition '{}'", "Error".red(), partition);
                return ExitCode::from(1);
            }
            session.regions().regions_in(partition)
        }
        None => session.regions().regions(),
    };

    if format == "json" {
        let json: Vec<_> = regions
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "name": r.display_name,
                    "partition": r.partition_id,
                })
            })
            .collect();
        print_json(&serde_json::Value::Array(json));
    } else {
        for region in regions {
            println!("{:<16} {}", region.id, region.display_name.dimmed());
        }
    }
    ExitCode::SUCCESS
}

async fn cmd_validate(session: &Session<AwsTransport>, timeout: Duration, format: &str) -> ExitCode {
    // Give the validation itself the full timeout before giving up here
    let state = match session
        .connection()
        .wait_until_stable(timeout + Duration::from_secs(1))
        .await
    {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            return ExitCode::from(1);
        }
    };

    if format == "json" {
        print_json(&state_json(&state));
    } else {
        match &state {
            ConnectionState::ValidConnection { identity, .. } => {
                println!("{} {}", "✓".green(), state);
                println!("  {}", identity.arn.dimmed());
            }
            ConnectionState::RequiresUserAction { .. } => {
                eprintln!("{} {}", "!".yellow(), state);
            }
            _ => {
                eprintln!("{} {}", "✗".red(), state);
                if let ConnectionState::InvalidConnection { cause } = &state {
                    if let Some(help) = &cause.help {
                        eprintln!("  {}", help.dimmed());
                    }
                }
            }
        }
    }
    ExitCode::from(exit_status(&state))
}

fn exit_status(state: &ConnectionState) -> u8 {
    match state {
        ConnectionState::ValidConnection { .. } => 0,
        ConnectionState::RequiresUserAction { .. } => EXIT_REQUIRES_ACTION,
        _ => 1,
    }
}

fn state_json(state: &ConnectionState) -> serde_json::Value {
    match state {
        ConnectionState::ValidConnection { settings, identity } => serde_json::json!({
            "state": "valid",
            "credential": settings.credential.id,
            "region": settings.region.id,
            "account": identity.account_id,
            "arn": identity.arn,
        }),
        ConnectionState::InvalidConnection { cause } => serde_json::json!({
            "state": "invalid",
            "error": cause.to_string(),
        }),
        ConnectionState::RequiresUserAction { remediation } => serde_json::json!({
            "state": "requires_user_action",
            "title": remediation.title,
            "message": remediation.message,
        }),
        other => serde_json::json!({
            "state": "pending",
            "message": other.display_message(),
        }),
    }
}

/// Fetch a resource for the current selection, reporting failures
async fn fetch<T>(session: &Session<AwsTransport>, resource: &Resource<T>) -> Option<T>
where
    T: Clone + Send + Sync + 'static,
{
    match session.get(resource).await {
        Ok(value) => Some(value),
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            None
        }
    }
}

async fn cmd_ssm(session: &Session<AwsTransport>, name: &str, no_redact: bool) -> ExitCode {
    if let Err(e) = cloudscope_aws::ssm::validate_parameter_name(name) {
        eprintln!("{}: {}", "Error".red(), e);
        return ExitCode::from(2);
    }
    match fetch(session, &cloudscope_aws::ssm::parameter(name)).await {
        Some(parameter) => {
            if no_redact {
                println!("{}", parameter.value.expose());
            } else {
                println!("{}", parameter.value);
            }
            ExitCode::SUCCESS
        }
        None => ExitCode::from(1),
    }
}

async fn cmd_cfn(session: &Session<AwsTransport>, reference: &str, format: &str) -> ExitCode {
    if reference.contains('/') {
        let (stack, key) = match cloudscope_aws::cfn::parse_output_ref(reference) {
            Ok(parts) => parts,
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                return ExitCode::from(2);
            }
        };
        return match fetch(session, &cloudscope_aws::cfn::stack_output(&stack, &key)).await {
            Some(Some(value)) => {
                println!("{}", value);
                ExitCode::SUCCESS
            }
            Some(None) => {
                eprintln!("{}: Output '{}' not found", "Error".red(), reference);
                ExitCode::from(1)
            }
            None => ExitCode::from(1),
        };
    }

    let Some(outputs) = fetch(session, &cloudscope_aws::cfn::stack_outputs(reference)).await else {
        return ExitCode::from(1);
    };
    match format {
        "json" => match serde_json::to_string_pretty(&outputs) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                return ExitCode::from(1);
            }
        },
        "yaml" => match serde_yaml::to_string(&outputs) {
            Ok(yaml) => print!("{}", yaml),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                return ExitCode::from(1);
            }
        },
        _ => {
            for (key, value) in &outputs {
                println!("{} = {}", key.bold(), value);
            }
        }
    }
    ExitCode::SUCCESS
}

async fn cmd_s3_buckets(session: &Session<AwsTransport>) -> ExitCode {
    match fetch(session, &cloudscope_aws::s3::bucket_names()).await {
        Some(names) => {
            for name in names {
                println!("{}", name);
            }
            ExitCode::SUCCESS
        }
        None => ExitCode::from(1),
    }
}

async fn cmd_s3_get(
    session: &Session<AwsTransport>,
    reference: &str,
    output: Option<PathBuf>,
) -> ExitCode {
    let Some((bucket, key)) = reference
        .split_once('/')
        .filter(|(b, k)| !b.is_empty() && !k.is_empty())
    else {
        eprintln!(
            "{}: S3 reference must be in bucket/key format: {}",
            "Error".red(),
            reference
        );
        return ExitCode::from(2);
    };

    let Some(object) = fetch(session, &cloudscope_aws::s3::object(bucket, key)).await else {
        return ExitCode::from(1);
    };
    if let Some(output_path) = output {
        if let Err(e) = std::fs::write(&output_path, &object.bytes) {
            eprintln!("{}: {}", "Error writing file".red(), e);
            return ExitCode::from(2);
        }
        eprintln!("{} Wrote to {}", "✓".green(), output_path.display());
        return ExitCode::SUCCESS;
    }
    match object.text() {
        Ok(text) => {
            print!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {} (use --output for binary objects)", "Error".red(), e);
            ExitCode::from(1)
        }
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("{}: {}", "Error".red(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudscope_core::{CallerIdentity, ConnectionSettings, CredentialIdentifier, Region};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cloudscope",
            "validate",
            "--profile",
            "dev",
            "-r",
            "eu-west-1",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.profile.as_deref(), Some("dev"));
        assert_eq!(cli.region.as_deref(), Some("eu-west-1"));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Validate { refresh: false, .. }));
    }

    #[test]
    fn test_whoami_alias() {
        let cli = Cli::try_parse_from(["cloudscope", "whoami"]).unwrap();
        assert!(matches!(cli.command, Commands::Validate { .. }));
    }

    #[test]
    fn test_s3_subcommands() {
        let cli = Cli::try_parse_from(["cloudscope", "s3", "get", "bucket/key.txt", "-o", "out"])
            .unwrap();
        match cli.command {
            Commands::S3 {
                command: S3Commands::Get { reference, output },
            } => {
                assert_eq!(reference, "bucket/key.txt");
                assert_eq!(output, Some(PathBuf::from("out")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_flags_override_remembered_selection() {
        let remembered = PersistedSelection {
            active_credential: Some("profile:old".into()),
            active_region: Some("us-west-2".into()),
            recently_used_credentials: vec!["profile:old".into()],
            recently_used_regions: vec![],
        };

        let selection = apply_overrides(remembered.clone(), Some("dev"), None);
        assert_eq!(selection.active_credential.as_deref(), Some("profile:dev"));
        assert_eq!(selection.active_region.as_deref(), Some("us-west-2"));
        assert_eq!(selection.recently_used_credentials, vec!["profile:old"]);

        assert_eq!(apply_overrides(remembered.clone(), None, None), remembered);
    }

    #[test]
    fn test_credential_id_accepts_qualified_ids() {
        assert_eq!(credential_id("dev"), "profile:dev");
        assert_eq!(credential_id("static:ci"), "static:ci");
    }

    #[test]
    fn test_selection_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.yaml");
        assert_eq!(load_selection(&path).unwrap(), PersistedSelection::default());

        let selection = PersistedSelection {
            active_credential: Some("profile:dev".into()),
            active_region: Some("eu-west-1".into()),
            recently_used_credentials: vec!["profile:dev".into(), "profile:default".into()],
            recently_used_regions: vec!["eu-west-1".into()],
        };
        save_selection(&path, &selection).unwrap();
        assert_eq!(load_selection(&path).unwrap(), selection);

        std::fs::write(&path, "active_region: [unterminated").unwrap();
        let err = load_selection(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid state file"));
    }

    #[test]
    fn test_exit_codes_and_json() {
        let settings = ConnectionSettings::new(
            CredentialIdentifier::new("profile:dev", "dev", "profile"),
            Region::new("eu-west-1", "Europe (Ireland)", "aws"),
        );
        let valid = ConnectionState::ValidConnection {
            settings,
            identity: CallerIdentity {
                account_id: "111122223333".into(),
                arn: "arn:aws:iam::111122223333:user/dev".into(),
                user_id: "AIDA".into(),
            },
        };
        assert_eq!(exit_status(&valid), 0);
        assert_eq!(state_json(&valid)["account"], "111122223333");

        let action = ConnectionState::RequiresUserAction {
            remediation: cloudscope_core::Remediation::reauthenticate(Some("corp".into())),
        };
        assert_eq!(exit_status(&action), EXIT_REQUIRES_ACTION);
        assert_eq!(state_json(&action)["state"], "requires_user_action");

        let invalid = ConnectionState::InvalidConnection {
            cause: Error::incomplete_selection("credential"),
        };
        assert_eq!(exit_status(&invalid), 1);
    }
}
