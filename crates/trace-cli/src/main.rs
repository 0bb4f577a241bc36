use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};
use trace_core::{
    entity::contribution_shares,
    identifiers::{batch_code, qr_code, BatchQrPayload},
    now_millis, TransactionType,
};

const DEFAULT_NODE: &str = "http://127.0.0.1:8080";

#[derive(Parser, Debug)]
#[command(name = "trace-cli")]
#[command(about = "CLI client for the supply-chain ledger node")]
struct Cli {
    /// Node base URL
    #[arg(long, global = true, env = "TRACE_NODE", default_value = DEFAULT_NODE)]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show chain height and tip hash
    Head,
    /// Verify the whole chain and print the report
    Verify,
    /// Append a transaction for an existing entity
    Append {
        #[arg(long)]
        entity_id: String,
        /// One of COLLECTION_RECORDED, BATCH_CREATED, BATCH_SENT_TO_LAB,
        /// QualityTest, ProcessingStep, HANDOFF_RECORDED
        #[arg(long)]
        transaction_type: TransactionType,
        /// Payload as a JSON object
        #[arg(long)]
        data: String,
    },
    /// Resolve a product or batch code into its provenance journey
    Resolve { code: String },
    /// List every block recorded for an entity
    History { entity_id: String },
    /// Mint a batch code and its QR code locally
    Codes {
        #[arg(long)]
        herb_id: String,
    },
    /// Percentage each collection quantity contributes to a batch
    Shares {
        #[arg(required = true)]
        quantities_kg: Vec<f64>,
    },
}

#[derive(Serialize)]
struct AppendBody {
    transaction_type: TransactionType,
    transaction_data: serde_json::Value,
    entity_id: String,
}

fn provenance_url(node: &str, code: &str) -> String {
    format!("{node}/provenance/{}", urlencoding::encode(code))
}

fn history_url(node: &str, entity_id: &str) -> String {
    format!("{node}/entities/{}/history", urlencoding::encode(entity_id))
}

async fn send(req: reqwest::RequestBuilder) -> Result<()> {
    let res = req.send().await?;
    let status = res.status();
    let body = res.text().await?;
    let pretty = serde_json::from_str::<serde_json::Value>(&body)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or(body);
    println!("status: {status}");
    println!("{pretty}");
    if !status.is_success() {
        bail!("node returned {status}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();
    debug!(%node, cmd = ?cli.cmd, "running command");

    match cli.cmd {
        Command::Head => send(client.get(format!("{node}/chain/head"))).await?,
        Command::Verify => send(client.get(format!("{node}/chain/verify"))).await?,
        Command::Append {
            entity_id,
            transaction_type,
            data,
        } => {
            let transaction_data = serde_json::from_str(&data).context("--data must be JSON")?;
            let body = AppendBody {
                transaction_type,
                transaction_data,
                entity_id,
            };
            send(client.post(format!("{node}/ledger/append")).json(&body)).await?
        }
        Command::Resolve { code } => send(client.get(provenance_url(&node, &code))).await?,
        Command::History { entity_id } => send(client.get(history_url(&node, &entity_id))).await?,
        Command::Codes { herb_id } => {
            let now = now_millis();
            let batch = batch_code(now);
            let qr = qr_code(&BatchQrPayload::new(&batch, &herb_id), now)?;
            println!("batch_id: {batch}");
            println!("qr_code:  {qr}");
        }
        Command::Shares { quantities_kg } => {
            for (kg, share) in quantities_kg.iter().zip(contribution_shares(&quantities_kg)) {
                println!("{kg:>10.3} kg  {share:>6.2}%");
            }
        }
    }
    Ok(())
}
