//! Sealcore CLI - Command line access to the secure primitives.
//!
//! Useful for provisioning master keys, inspecting sealed records and
//! checking credentials without writing a service around the library.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use sealcore_common::ContextId;
use sealcore_crypto::keys::DEFAULT_MASTER_KEY_ENV;
use sealcore_crypto::{
    sha256, sha512, AeadMessage, CryptoConfig, CryptoContext, DerivedCredential, MacTag,
    MasterKey, PasswordHasher, RandomSource,
};

#[derive(Parser)]
#[command(name = "sealcore")]
#[command(about = "Sealcore - Tenant-bound encryption and secure primitives")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Environment variable holding the base64 master key.
    #[arg(long, global = true, default_value = DEFAULT_MASTER_KEY_ENV)]
    master_key_env: String,

    /// JSON configuration file.
    #[arg(short, long, global = true, env = "SEALCORE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new master key and print it as base64.
    Keygen,

    /// Encrypt a file (or stdin) for a tenant.
    Encrypt {
        /// Tenant or organization identifier.
        #[arg(short = 'x', long)]
        context: String,

        /// Input file (default: stdin).
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Decrypt a base64 message produced by `encrypt`.
    Decrypt {
        /// Tenant or organization identifier.
        #[arg(short = 'x', long)]
        context: String,

        /// File holding the base64 message (default: stdin).
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Hash a password and print the encoded credential.
    HashPassword,

    /// Check a password against an encoded credential.
    VerifyPassword {
        /// Base64 credential from `hash-password`.
        #[arg(long)]
        credential: String,
    },

    /// Sign a message with the master key's MAC subkey.
    Sign {
        /// Input file (default: stdin).
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Verify a tag produced by `sign`.
    Verify {
        /// Base64url tag.
        #[arg(short, long)]
        tag: String,

        /// Input file (default: stdin).
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Print random bytes.
    Random {
        /// Number of bytes.
        #[arg(short = 'n', long, default_value_t = 32)]
        length: usize,

        /// Output encoding.
        #[arg(short, long, value_enum, default_value_t = Encoding::Hex)]
        encoding: Encoding,
    },

    /// Print the SHA-2 digest of a file (or stdin) as hex.
    Digest {
        /// Digest algorithm.
        #[arg(short, long, value_enum, default_value_t = DigestAlgorithm::Sha256)]
        algorithm: DigestAlgorithm,

        /// Input file (default: stdin).
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Encoding {
    Hex,
    Base64,
}

#[derive(Clone, Copy, ValueEnum)]
enum DigestAlgorithm {
    Sha256,
    Sha512,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Keygen => cmd_keygen(),

        Commands::Encrypt { context, input } => {
            let ctx = open_context(&cli.master_key_env, config)?;
            cmd_encrypt(&ctx, &context, input.as_deref())
        }

        Commands::Decrypt {
            context,
            input,
            output,
        } => {
            let ctx = open_context(&cli.master_key_env, config)?;
            cmd_decrypt(&ctx, &context, input.as_deref(), output.as_deref())
        }

        Commands::HashPassword => cmd_hash_password(&config),

        Commands::VerifyPassword { credential } => cmd_verify_password(&config, &credential),

        Commands::Sign { input } => {
            let ctx = open_context(&cli.master_key_env, config)?;
            cmd_sign(&ctx, input.as_deref())
        }

        Commands::Verify { tag, input } => {
            let ctx = open_context(&cli.master_key_env, config)?;
            cmd_verify(&ctx, &tag, input.as_deref())
        }

        Commands::Random { length, encoding } => cmd_random(&config, length, encoding),

        Commands::Digest { algorithm, input } => cmd_digest(algorithm, input.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<CryptoConfig> {
    match path {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            CryptoConfig::load(path).context("Failed to load config")
        }
        None => Ok(CryptoConfig::default()),
    }
}

fn open_context(master_key_env: &str, config: CryptoConfig) -> Result<CryptoContext> {
    let key = MasterKey::from_env(master_key_env).context("Failed to load master key")?;
    CryptoContext::with_config(key, config).context("Failed to initialize crypto context")
}

/// Read a file, or stdin when no path is given.
fn read_input(path: Option<&Path>) -> Result<Zeroizing<Vec<u8>>> {
    let mut data = Zeroizing::new(Vec::new());
    match path {
        Some(path) => {
            let mut file = std::fs::File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            file.read_to_end(&mut data).context("Failed to read input")?;
        }
        None => {
            std::io::stdin()
                .read_to_end(&mut data)
                .context("Failed to read stdin")?;
        }
    }
    Ok(data)
}

fn read_text(path: Option<&Path>) -> Result<String> {
    let data = read_input(path)?;
    let text = std::str::from_utf8(&data).context("Input is not valid UTF-8")?;
    Ok(text.trim().to_string())
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password.into_bytes()))
}

/// Generate a master key.
fn cmd_keygen() -> Result<()> {
    let key = MasterKey::generate(&RandomSource::system()).context("Failed to generate key")?;
    println!("{}", key.to_base64().as_str());
    Ok(())
}

/// Encrypt input for a tenant.
fn cmd_encrypt(ctx: &CryptoContext, context: &str, input: Option<&Path>) -> Result<()> {
    let context = ContextId::new(context).context("Invalid context id")?;
    let plaintext = read_input(input)?;

    let message = ctx
        .encrypt(&plaintext, context.as_bytes())
        .context("Encryption failed")?;

    info!(
        "Encrypted {} bytes for context {}",
        plaintext.len(),
        context
    );
    println!("{}", message.to_base64());

    Ok(())
}

/// Decrypt a base64 message for a tenant.
fn cmd_decrypt(
    ctx: &CryptoContext,
    context: &str,
    input: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let context = ContextId::new(context).context("Invalid context id")?;
    let message = AeadMessage::from_base64(&read_text(input)?).context("Malformed message")?;

    let plaintext = ctx
        .decrypt(&message, context.as_bytes())
        .context("Decryption failed")?;

    match output {
        Some(path) => {
            std::fs::write(path, plaintext.as_bytes())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(
                "Decrypted {} bytes to {}",
                plaintext.len(),
                path.display()
            );
        }
        None => {
            let mut stdout = std::io::stdout();
            stdout.write_all(plaintext.as_bytes())?;
            stdout.flush()?;
        }
    }

    Ok(())
}

/// Hash a password read from the terminal.
fn cmd_hash_password(config: &CryptoConfig) -> Result<()> {
    let password = prompt_password("Enter password: ")?;
    let confirm = prompt_password("Confirm password: ")?;

    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }

    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    let hasher = PasswordHasher::from_config(config)?;
    let credential = hasher
        .hash_password_with(&password, &RandomSource::system())
        .context("Failed to hash password")?;

    println!("{}", credential.to_base64());
    Ok(())
}

/// Verify a password read from the terminal.
fn cmd_verify_password(config: &CryptoConfig, credential: &str) -> Result<()> {
    let credential = DerivedCredential::from_base64(credential).context("Malformed credential")?;
    let password = prompt_password("Enter password: ")?;

    if !PasswordHasher::from_config(config)?.verify_password(&password, &credential) {
        anyhow::bail!("Password does not match");
    }

    println!("Password OK");
    Ok(())
}

/// Sign input with the MAC subkey.
fn cmd_sign(ctx: &CryptoContext, input: Option<&Path>) -> Result<()> {
    let message = read_input(input)?;
    let tag = ctx.sign(&message).context("Signing failed")?;
    println!("{}", tag.to_base64url());
    Ok(())
}

/// Verify a tag over input.
fn cmd_verify(ctx: &CryptoContext, tag: &str, input: Option<&Path>) -> Result<()> {
    let tag = MacTag::from_base64url(tag).context("Malformed tag")?;
    let message = read_input(input)?;

    if !ctx.verify(&message, tag.as_bytes()) {
        anyhow::bail!("Tag does not match");
    }

    println!("Tag OK");
    Ok(())
}

/// Print random bytes.
fn cmd_random(config: &CryptoConfig, length: usize, encoding: Encoding) -> Result<()> {
    let random = RandomSource::system()
        .with_retries(config.rng_retries)
        .with_max_request(config.max_random_bytes);
    let bytes = Zeroizing::new(random.random_bytes(length)?);

    match encoding {
        Encoding::Hex => println!("{}", hex::encode(&*bytes)),
        Encoding::Base64 => println!("{}", STANDARD.encode(&*bytes)),
    }

    Ok(())
}

/// Print a digest of input.
fn cmd_digest(algorithm: DigestAlgorithm, input: Option<&Path>) -> Result<()> {
    let data = read_input(input)?;
    let digest = match algorithm {
        DigestAlgorithm::Sha256 => hex::encode(sha256(&data)),
        DigestAlgorithm::Sha512 => hex::encode(sha512(&data)),
    };
    println!("{}", digest);
    Ok(())
}
