//! Warden CLI - Main entry point.

use warden::cli::{apply_log_level, public_key_path, Cli, Commands};
use warden::config::WardenConfig;
use warden::package::signing::{encode_public_key, write_key_file, SigningKey};
use warden::package::{verify_package, PackageArchive};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            object_dir,
            signing_key,
            json_logs,
        } => {
            let mut config = match config {
                Some(path) => WardenConfig::from_file(&path)?,
                None => WardenConfig::development(),
            };

            // Override with CLI args
            if let Some(bind) = bind {
                config.server.bind_addr = bind;
            }
            if let Some(dir) = object_dir {
                config.storage.object_dir = Some(dir);
            }
            if let Some(path) = signing_key {
                config.signing.key_path = Some(path);
            }
            config.observability.json_logs |= json_logs;
            apply_log_level(&mut config.observability, cli.log_level);

            warden::run(config).await?;
        }

        Commands::Verify {
            package_dir,
            public_key,
            json,
        } => {
            let key_bytes = tokio::fs::read(&public_key).await?;
            let public_key = warden::package::signing::decode_public_key(&key_bytes)?;
            let archive = PackageArchive::read_from_dir(&package_dir).await?;
            let report = verify_package(&archive, Some(&public_key));

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Package: {}", package_dir.display());
                println!("Signature: {}", if report.signature_ok { "OK" } else { "INVALID" });
                for file in &report.files {
                    println!("  [{}] {}", if file.ok { "ok" } else { "FAIL" }, file.path);
                }
                for error in &report.errors {
                    println!("  error: {}", error);
                }
                println!("Result: {}", if report.ok { "VERIFIED" } else { "FAILED" });
            }

            if !report.ok {
                std::process::exit(1);
            }
        }

        Commands::Keygen { out, force } => {
            if !force && tokio::fs::try_exists(&out).await? {
                anyhow::bail!("{} already exists (use --force to overwrite)", out.display());
            }

            let key = SigningKey::generate()?;
            write_key_file(&out, key.pkcs8()).await?;

            let pub_path = public_key_path(&out);
            tokio::fs::write(&pub_path, encode_public_key(&key.public_key())).await?;

            println!("Key id: {}", key.key_id());
            println!("Private key: {}", out.display());
            println!("Public key: {}", pub_path.display());
        }
    }

    Ok(())
}
