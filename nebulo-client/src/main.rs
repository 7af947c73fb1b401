//! Nebulo CLI
//!
//! Command line front end for the nebulo client: key generation,
//! configuration, registration, login and channel messaging.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use nebulo_client::files::{write_restricted, OWNER_READ_WRITE};
use nebulo_client::{
    checker_from_options, init_logging, ConfigFilePersistence, CredentialPersistence,
    CredentialStore, HttpConnector, HttpTransport, IdentityManager, MemoryPersistence, Options,
    Session, Transport, NAME, VERSION,
};
use nebulo_keys::{IdentityKey, DEFAULT_KEY_BITS};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "nebulo")]
#[command(about = "Nebulo encrypted group messaging client")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: <config dir>/nebulo/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log file, stderr when unset
    #[arg(short, long, global = true)]
    log: Option<String>,

    /// quiet|critical|error|warning|info|request|debug
    #[arg(short, long, global = true)]
    verbose: Option<String>,

    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Args, Default)]
struct ConnectionArgs {
    /// Server base URL
    #[arg(long, global = true)]
    baseurl: Option<String>,

    /// Client certificate file
    #[arg(long = "tls-crt", global = true)]
    tls_crt: Option<String>,

    /// Client private key file
    #[arg(long = "tls-key", global = true)]
    tls_key: Option<String>,

    /// Password of the client private key
    #[arg(
        long = "tls-key-password",
        env = "NEBULO_KEY_PASSWORD",
        global = true,
        hide_env_values = true
    )]
    tls_key_password: Option<String>,

    /// CA certificate the server and client certificates chain to
    #[arg(long = "tls-clients-ca", global = true)]
    tls_clients_ca: Option<String>,

    /// Certificate revocation list checked at login
    #[arg(long = "tls-crl", global = true)]
    tls_crl: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the client version
    Version,
    /// Print or write the merged configuration
    #[command(name = "config-gen")]
    ConfigGen {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        destination: Option<PathBuf>,
    },
    /// Generate an identity key
    #[command(name = "key-gen")]
    KeyGen {
        #[arg(short, long)]
        out: PathBuf,
        #[arg(short, long, default_value_t = DEFAULT_KEY_BITS)]
        bits: usize,
        /// Encrypt the key with this password
        #[arg(short, long, env = "NEBULO_NEW_KEY_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Connect, show the server version and log in when an identity is configured
    Run,
    /// Register a key with the server and log in with the issued certificate
    Register {
        #[arg(short, long)]
        key: PathBuf,
        #[arg(short, long, env = "NEBULO_KEY_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// List channels
    Channels,
    /// Create a channel
    #[command(name = "channel-create")]
    ChannelCreate {
        #[arg(short, long)]
        name: String,
        /// Base64 DER public key of a member, repeatable
        #[arg(short, long)]
        member: Vec<String>,
    },
    /// Send a message to every member of a channel
    Send {
        #[arg(long)]
        channel: String,
        #[arg(short, long)]
        message: String,
    },
    /// Read messages of a channel
    Read {
        #[arg(long)]
        channel: String,
        /// Only messages posted after this RFC 3339 time
        #[arg(short, long)]
        since: Option<String>,
    },
}

impl Cli {
    /// Command line layer of the configuration
    fn options(&self) -> Options {
        let mut options = Options::default();
        let set = |target: &mut String, value: &Option<String>| {
            if let Some(value) = value {
                *target = value.clone();
            }
        };
        set(&mut options.global.log.verbose, &self.verbose);
        set(&mut options.global.log.file, &self.log);

        let connection = &self.connection;
        set(&mut options.run.baseurl, &connection.baseurl);
        set(&mut options.run.tls.cert, &connection.tls_crt);
        set(&mut options.run.tls.key, &connection.tls_key);
        set(&mut options.run.tls.key_password, &connection.tls_key_password);
        set(&mut options.run.tls.clients_ca_cert, &connection.tls_clients_ca);
        set(&mut options.run.tls.crl, &connection.tls_crl);
        options
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(Options::default_path);
    let file_options = match &config_path {
        Some(path) if path.exists() => Options::load(path)
            .with_context(|| format!("Failed to load configuration {path:?}"))?,
        _ => Options::default(),
    };
    let options = Options::merge(&file_options, &cli.options());

    init_logging(options.verbosity()?, options.log_file().as_deref())
        .context("Failed to initialise logging")?;
    log::debug!("configuration: {:?}", options.run);

    match cli.command {
        Commands::Version => {
            println!("{NAME} {VERSION}");
        }
        Commands::ConfigGen { destination } => {
            match destination {
                Some(path) => {
                    options
                        .save(&path)
                        .with_context(|| format!("Failed to write configuration {path:?}"))?;
                    println!("configuration written to {}", path.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&options)?),
            }
        }
        Commands::KeyGen {
            out,
            bits,
            password,
        } => key_gen(&out, bits, password.as_deref())?,
        Commands::Run => {
            options.validate_for_run()?;
            let manager = identity_manager(&options, &file_options, config_path.as_deref())?;
            let version = manager
                .server_version()
                .await
                .context("Failed to fetch server version")?;
            println!(
                "server {} (built {})",
                version.build_version, version.build_time
            );

            if manager.credentials().snapshot().await.is_complete() {
                let session = manager.login().await.context("Login failed")?;
                print_session(&session);
            } else {
                println!("no identity configured, use key-gen and register");
            }
        }
        Commands::Register { key, password } => {
            options.validate_for_run()?;
            let manager = identity_manager(&options, &file_options, config_path.as_deref())?;
            let session = manager
                .register_with_key_file(&key, password.as_deref())
                .await
                .context("Registration failed")?;
            print_session(&session);
        }
        Commands::Channels => {
            let session = login(&options, &file_options, config_path.as_deref()).await?;
            session.refresh_channels().await?;
            for name in session.channel_names() {
                let members = session.channel(&name).map(|c| c.members.len()).unwrap_or(0);
                println!("{name} ({members} member(s))");
            }
        }
        Commands::ChannelCreate { name, member } => {
            let session = login(&options, &file_options, config_path.as_deref()).await?;
            let channel = session
                .create_channel(&name, &member)
                .await
                .with_context(|| format!("Failed to create channel {name:?}"))?;
            println!("created {} with {} member(s)", channel.name, channel.members.len());
        }
        Commands::Send { channel, message } => {
            let session = login(&options, &file_options, config_path.as_deref()).await?;
            session.refresh_channels().await?;
            let count = session
                .send_message(&channel, &message)
                .await
                .with_context(|| format!("Failed to send to {channel:?}"))?;
            println!("sent to {count} recipient(s)");
        }
        Commands::Read { channel, since } => {
            let since = match since {
                Some(raw) => DateTime::parse_from_rfc3339(&raw)
                    .with_context(|| format!("Invalid --since value {raw:?}"))?
                    .with_timezone(&Utc),
                None => DateTime::<Utc>::default(),
            };
            let session = login(&options, &file_options, config_path.as_deref()).await?;
            for message in session.read_messages(&channel, since).await? {
                match message.plaintext {
                    Ok(text) => println!("[{}] {}: {text}", message.posted, message.sender.label()),
                    Err(e) => println!(
                        "[{}] {}: <unreadable: {e}>",
                        message.posted,
                        message.sender.label()
                    ),
                }
            }
        }
    }

    Ok(())
}

fn key_gen(out: &Path, bits: usize, password: Option<&str>) -> Result<()> {
    if out.exists() {
        bail!("{} already exists, refusing to overwrite a key", out.display());
    }
    let key = IdentityKey::generate(bits).context("Failed to generate key")?;
    let pem = key
        .to_pem(password.filter(|p| !p.is_empty()).map(str::as_bytes))
        .context("Failed to encode key")?;
    write_restricted(out, pem.as_bytes(), OWNER_READ_WRITE)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    println!(
        "{}-bit key written to {}, fingerprint {}",
        key.bits(),
        out.display(),
        key.public_key().fingerprint()
    );
    Ok(())
}

fn identity_manager(
    options: &Options,
    file_options: &Options,
    config_path: Option<&Path>,
) -> Result<IdentityManager<HttpConnector>> {
    let persistence: Arc<dyn CredentialPersistence> = match config_path {
        Some(path) => Arc::new(ConfigFilePersistence::new(path, file_options.clone())),
        None => Arc::new(MemoryPersistence::new()),
    };
    let credentials = Arc::new(CredentialStore::from_options(options, persistence));
    let connector = HttpConnector::new(&options.run.baseurl, options.timeout())?;

    Ok(
        IdentityManager::new(connector, credentials, checker_from_options(options))
            .with_contacts_file(options.contacts_file())
            .with_timeout(options.timeout()),
    )
}

async fn login(
    options: &Options,
    file_options: &Options,
    config_path: Option<&Path>,
) -> Result<Arc<Session<HttpTransport>>> {
    options.validate_for_run()?;
    let manager = identity_manager(options, file_options, config_path)?;
    let session = manager.login().await.context("Login failed")?;
    log::info!("logged in as {}", session.user().label());
    Ok(session)
}

fn print_session<T: Transport>(session: &Session<T>) {
    let user = session.user();
    println!("logged in as {} ({})", user.label(), session.fingerprint());
    if user.login_last != DateTime::<Utc>::default() {
        println!("last login {}", user.login_last);
    }
}
