use anyhow::{Context, Result};
use clap::Parser;

use netvfs::cli::DaemonOpts;
use netvfs::server::{self, ServerContext};
use netvfs::tls;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opts = DaemonOpts::parse();
    let mut settings = opts.settings()?;

    // Validate root directory exists and is a directory
    if !settings.root.exists() {
        anyhow::bail!("Error: Root directory does not exist: {}", settings.root.display());
    }
    if !settings.root.is_dir() {
        anyhow::bail!("Error: Root path is not a directory: {}", settings.root.display());
    }
    settings.root = std::fs::canonicalize(&settings.root)
        .with_context(|| format!("Failed to canonicalize root path: {}", settings.root.display()))?;

    println!("Starting NetVFS daemon:");
    println!("  Root: {}", settings.root.display());
    println!("  Bind: {}", settings.bind);
    if settings.users.is_empty() {
        println!("  Logins: anonymous");
    } else {
        println!("  Logins: {} configured user(s)", settings.users.len());
    }
    if settings.tls {
        match &settings.tls_cert {
            Some(cert) => println!("  TLS: offered, certificate {}", cert.display()),
            None => println!(
                "  TLS: offered, self-signed certificate in {}",
                tls::config_dir().display()
            ),
        }
    } else {
        println!("  TLS: disabled");
    }
    if let Some(log) = &settings.audit_log {
        println!("  Audit log: {}", log.display());
    }

    if settings.bind.starts_with("0.0.0.0") {
        eprintln!("WARNING: Binding to 0.0.0.0 exposes the daemon on every network interface");
        if settings.users.is_empty() {
            eprintln!("   Anonymous logins are accepted; configure [[users]] to restrict access");
        }
        eprintln!();
    }

    let ctx = ServerContext::from_settings(&settings)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(server::serve(&settings.bind, ctx))
}
