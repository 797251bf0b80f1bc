//! Connect to an SSH host, wait for the prompt, and run a command through
//! the shell stream.
//!
//! # Prerequisites
//!
//! - SSH server reachable from this machine
//! - Valid credentials
//!
//! # Usage
//!
//! ```bash
//! cargo run --example ssh_login -- --host localhost --user admin --password secret
//! ```

use std::env;
use std::time::Duration;

use shellstream::transport::{SshConfig, SshTransport};
use shellstream::{ExpectAction, RemoteCommand, ShellStream, StreamConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    println!("Connecting to {}:{}...", args.host, args.port);
    let mut config = SshConfig::password(&args.host, &args.user, &args.password);
    config.port = args.port;
    let transport = SshTransport::connect(config).await?;
    println!("Connected!");

    let stream = ShellStream::new(transport.open_shell().await?, StreamConfig::default());
    stream.start()?;

    // Wait for a shell prompt, then ask for the kernel version.
    let prompt = stream
        .expect(vec![ExpectAction::regex(r"[$#>]\s*$", |text| {
            println!("login banner:\n{text}");
        })?])
        .await?;
    println!("prompt detected (pattern {})", prompt.pattern_index);

    stream.write_line("uname -r").await?;
    match stream.read_line_timeout(Duration::from_secs(5)).await? {
        Some(line) => println!("kernel: {line}"),
        None => println!("no reply within 5s"),
    }

    // The same host, through the exec surface instead of the shell.
    let mut command = RemoteCommand::new(transport.open_exec("uptime").await?, "uptime");
    let output = command.execute().await?;
    println!("uptime: {}", output.trim());
    println!("exit status: {:?}", command.exit_status());

    stream.stop()?;
    transport.close().await?;
    Ok(())
}

/// Simple argument parser (avoiding external dependencies)
struct Args {
    host: String,
    port: u16,
    user: String,
    password: String,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut host = "localhost".to_string();
        let mut port = 22u16;
        let mut user = env::var("USER").unwrap_or_else(|_| "root".to_string());
        let mut password = String::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    i += 1;
                    if i < args.len() {
                        host = args[i].clone();
                    }
                }
                "--port" | "-p" => {
                    i += 1;
                    if i < args.len() {
                        port = args[i].parse().unwrap_or(22);
                    }
                }
                "--user" | "-u" => {
                    i += 1;
                    if i < args.len() {
                        user = args[i].clone();
                    }
                }
                "--password" | "-P" => {
                    i += 1;
                    if i < args.len() {
                        password = args[i].clone();
                    }
                }
                "--help" => {
                    println!(
                        "usage: cargo run --example ssh_login -- \
                         [--host HOST] [--port PORT] [--user USER] --password PASS"
                    );
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                }
            }
            i += 1;
        }

        Self {
            host,
            port,
            user,
            password,
        }
    }
}
