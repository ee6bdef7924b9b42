//! `chatbak` command-line entry point.
//!
//! Parses arguments, sets up logging and hands off to [`commands`].

mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "chatbak",
    about = "Decrypt chat backup databases and media resources",
    version,
    long_about = "Decrypts the encrypted backup database into a plain SQLite file and \
                  reassembles media resources from the chunked BAK files it indexes."
)]
struct Cli {
    /// Log debug events (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Key options shared by every command.
#[derive(Args, Debug)]
pub struct KeyArgs {
    /// 32-character hex backup key
    #[arg(short = 'k', long = "key", env = "CHATBAK_KEY", hide_env_values = true)]
    pub key: String,

    /// Use the ASCII bytes of the key string as key material
    #[arg(long)]
    pub ascii_key: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Decrypt the backup database container into a plain SQLite file
    Dump {
        /// Encrypted database
        #[arg(short, long, default_value = "Backup.db")]
        input: PathBuf,

        /// Output SQLite file
        #[arg(short, long, default_value = "Backup_plain.db")]
        output: PathBuf,

        #[command(flatten)]
        key: KeyArgs,

        /// Container page size
        #[arg(long, default_value_t = chatbak::DEFAULT_PAGE_SIZE)]
        page_size: usize,

        /// PBKDF2 iteration count
        #[arg(long, default_value_t = chatbak::DEFAULT_KDF_ITERATIONS)]
        kdf_iter: u32,

        /// Digest for PBKDF2 and page HMAC (sha1, sha256, sha512)
        #[arg(long, default_value = "sha1")]
        hash: chatbak::HashAlgorithm,

        /// Drop each page's reserved trailer instead of zero-filling it
        #[arg(long)]
        strip_reserved: bool,
    },

    /// Decrypt one standalone resource file
    Decrypt {
        #[arg(short, long)]
        input: PathBuf,

        /// Defaults to `<input>_Decrypt`
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        key: KeyArgs,
    },

    /// Reassemble every media resource listed in the decrypted database
    Resources {
        /// Decrypted database
        #[arg(short, long, default_value = "Backup_plain.db")]
        db: PathBuf,

        /// Directory holding the BAK files
        #[arg(short, long)]
        resource: PathBuf,

        #[command(flatten)]
        key: KeyArgs,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Reassemble a single media item by its media id
    Media {
        #[arg(short, long, default_value = "Backup_plain.db")]
        db: PathBuf,

        #[arg(short, long)]
        resource: PathBuf,

        #[command(flatten)]
        key: KeyArgs,

        /// Media id string as stored in MsgMedia
        #[arg(long)]
        id: String,

        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// List chat sessions, largest first
    Sessions {
        #[arg(short, long, default_value = "Backup_plain.db")]
        db: PathBuf,

        /// Truncate nicknames to this many characters
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Decrypt the message blocks of one talker
    Chat {
        #[arg(short, long, default_value = "Backup_plain.db")]
        db: PathBuf,

        #[arg(short, long)]
        resource: PathBuf,

        #[command(flatten)]
        key: KeyArgs,

        /// User name as stored in Name2ID
        #[arg(short, long)]
        talker: String,

        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "chatbak=debug" } else { "chatbak=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Dump {
            input,
            output,
            key,
            page_size,
            kdf_iter,
            hash,
            strip_reserved,
        } => {
            let params = chatbak::ContainerParams {
                page_size,
                kdf_iterations: kdf_iter,
                hash,
                keep_reserved: !strip_reserved,
            };
            commands::dump(&input, &output, &key, params)
        }
        Commands::Decrypt { input, output, key } => {
            commands::decrypt(&input, output.as_deref(), &key)
        }
        Commands::Resources {
            db,
            resource,
            key,
            output,
        } => commands::resources(&db, &resource, &key, &output),
        Commands::Media {
            db,
            resource,
            key,
            id,
            output,
        } => commands::media(&db, &resource, &key, &id, &output),
        Commands::Sessions { db, limit } => commands::sessions(&db, limit),
        Commands::Chat {
            db,
            resource,
            key,
            talker,
            output,
        } => commands::chat(&db, &resource, &key, &talker, &output),
    }
}
