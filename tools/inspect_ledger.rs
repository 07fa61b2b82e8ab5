use clap::Parser;
use slotgate::ledger::{Ledger, RocksLedger, TransactionRecord};
use slotgate::storage::Storage;

/// Print ledger rows of a provider, or of one round
#[derive(Parser, Debug)]
#[command(name = "inspect_ledger")]
struct Args {
    /// RocksDB directory
    #[arg(long, default_value = "./DB/slotgate")]
    db_path: String,

    provider: String,

    /// Only this round
    round_id: Option<String>,

    #[arg(long, default_value_t = 50)]
    limit: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Opening database: {}", args.db_path);
    let ledger = RocksLedger::new(Storage::open(&args.db_path)?);

    let records = match &args.round_id {
        Some(round_id) => ledger.round_records(&args.provider, round_id).await?,
        None => ledger.provider_records(&args.provider, args.limit)?,
    };

    if records.is_empty() {
        println!("No ledger rows found");
        return Ok(());
    }
    for record in &records {
        print_record(record);
    }
    println!("{} row(s)", records.len());
    Ok(())
}

fn print_record(record: &TransactionRecord) {
    let settled = record
        .settled_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:<24} {:<9} play={} {} bet={} win={} created={} settled={}",
        record.external_id,
        record.kind.as_str(),
        record.play_id,
        record.currency,
        record.bet_amount,
        record.win_amount,
        record.created_at.to_rfc3339(),
        settled,
    );
}
