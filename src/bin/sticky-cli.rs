use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

use sticky_cluster::store::{open_store, DatabaseConfig};

#[derive(Parser)]
#[command(name = "sticky-cli")]
#[command(about = "Management CLI for sticky-cluster nodes", long_about = None)]
struct Cli {
    /// Base URL of the node to talk to.
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the node's cluster status (address, load, in-flight)
    Status,
    /// Release stickiness for the given values
    Release {
        /// Sticky values to delete
        values: Vec<String>,
    },
    /// Release every sticky value the node holds
    ReleaseAll,
    /// Wipe all cluster rows from the mapping store (direct file access)
    Truncate {
        /// Path to the SQLite database file
        #[arg(long, default_value = "cluster.db")]
        database: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Status => {
            let res = client
                .get(format!("{}/cluster/status", cli.url))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Release { values } => {
            let res = client
                .post(format!("{}/cluster/release", cli.url))
                .json(&serde_json::json!({ "values": values }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::ReleaseAll => {
            let res = client
                .post(format!("{}/cluster/release_all", cli.url))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Truncate { database } => {
            let config = DatabaseConfig {
                path: database,
                ..DatabaseConfig::default()
            };
            let store = open_store(&config)?;
            store.truncate()?;
            println!("cluster tables truncated");
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: node returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
