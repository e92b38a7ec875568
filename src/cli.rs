use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::TradeIntent;
use crate::strategy::StrategyStatus;

#[derive(Parser)]
#[command(name = "dca")]
#[command(version = "0.1.0")]
#[command(about = "Crash-safe DCA trading bot", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and environment overrides
    #[arg(short, long, global = true, default_value = "config", env = "DCA_CONFIG_DIR")]
    pub config_dir: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile, then trade until Ctrl+C / SIGTERM
    Run,
    /// Replay the journal and print the series and pending intents
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Resolve pending intents against the exchange and exit
    Reconcile,
}

/// Human-readable status dump
pub fn print_status(status: &StrategyStatus, pending: &[TradeIntent]) {
    println!("\n=== {} ===", status.pair);
    println!("State:            {}", status.state);
    println!("Purchases:        {}", status.purchases);
    println!("Avg entry price:  {}", status.avg_entry_price);
    println!("Total (quote):    {}", status.total_amount);
    println!("Total (base):     {}", status.total_base_amount);
    println!("Last buy price:   {}", status.last_buy_price);
    println!("Last sell price:  {}", status.last_sell_price);
    println!("Pending intents:  {}", status.pending_intents);

    if !pending.is_empty() {
        println!("\n{:<38} {:<5} {:>16} {:>16} {:>5}", "ID", "SIDE", "AMOUNT", "PRICE", "PART");
        for intent in pending {
            println!(
                "{:<38} {:<5} {:>16} {:>16} {:>5}",
                intent.id,
                intent.action.as_str(),
                intent.order_amount().round_dp(8),
                intent.price,
                intent.trade_part
            );
        }
    }
}
