// =============================================================================
// LOTTERYNET - Main Entry Point
// Commit-reveal lottery over beacon and timelock scripts
// =============================================================================

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use tokio::sync::mpsc;

use lotterynet::address::Address;
use lotterynet::ledger::Ledger;
use lotterynet::lottery::config::DEFAULT_CONFIG_FILE;
use lotterynet::lottery::{
    entry_script, reveal_script, run_triggers, Completion, EngineConfig, Entry, EntryTerms, Guess,
    LotteryEngine, RoundConfig, RoundWindow,
};
use lotterynet::script::Script;
use lotterynet::shell::Shell;
use lotterynet::sim::{RoundSchedule, SimLedger};
use lotterynet::transaction::TxHash;
use lotterynet::{format_coins, COIN};

// =============================================================================
// CLI Definition
// =============================================================================

#[derive(Parser)]
#[command(name = "lotterynet")]
#[command(version = "0.3.0")]
#[command(about = "Commit-reveal lottery on a beacon-enabled chain", long_about = None)]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override bits of randomness
    #[arg(long, global = true)]
    bits: Option<u32>,

    /// Override the rollover (operator) address
    #[arg(long, global = true)]
    operator: Option<Address>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct RoundArgs {
    /// First block of the round
    #[arg(long, default_value_t = 100)]
    start: u64,
    /// Blocks until reveals open
    #[arg(long, default_value_t = 50)]
    period: u64,
    /// Blocks the reveal (beacon) range lasts
    #[arg(long, default_value_t = 6)]
    delay: u64,
    /// Blocks claims stay open after the reveal range
    #[arg(long, default_value_t = 20)]
    claiming: u64,
}

impl RoundArgs {
    fn config(&self) -> RoundConfig {
        RoundConfig::new(self.start, self.period, self.delay, self.claiming)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the boundaries of a round
    Window {
        #[command(flatten)]
        round: RoundArgs,
    },

    /// Build the commitment script for a guess
    EntryScript {
        #[arg(long, allow_negative_numbers = true)]
        guess: i64,
        #[command(flatten)]
        round: RoundArgs,
    },

    /// Build the reveal script for a funding transaction and guess
    RevealScript {
        /// Funding transaction hash (hex)
        #[arg(long)]
        hash: String,
        #[arg(long, allow_negative_numbers = true)]
        guess: i64,
    },

    /// Disassemble and classify a hex script
    DecodeScript { input: String },

    /// Interactive operator shell on a simulated chain
    Shell {
        #[command(flatten)]
        round: RoundArgs,
        /// Starting chain height
        #[arg(long, default_value_t = 100)]
        height: u64,
        /// Coins credited to the wallet at start
        #[arg(long, default_value_t = 5)]
        fund: u64,
    },

    /// Play one round end-to-end with automatic mode
    Demo {
        #[command(flatten)]
        round: RoundArgs,
        /// Guess used by auto-enter (random in 1..=100 if omitted)
        #[arg(long)]
        guess: Option<i64>,
        /// Publish a beacon that makes the entry win
        #[arg(long)]
        rig: bool,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut config = EngineConfig::load(&cli.config)?;
    if let Some(bits) = cli.bits {
        config.bits_of_randomness = bits;
    }
    if let Some(operator) = cli.operator {
        config.operator = Some(operator);
    }
    config.validate()?;

    match cli.command {
        Commands::Window { round } => cmd_window(round.config()),
        Commands::EntryScript { guess, round } => cmd_entry_script(&config, round.config(), guess),
        Commands::RevealScript { hash, guess } => cmd_reveal_script(&config, &hash, guess),
        Commands::DecodeScript { input } => cmd_decode_script(&input),
        Commands::Shell { round, height, fund } => cmd_shell(config, round.config(), height, fund).await,
        Commands::Demo { round, guess, rig } => cmd_demo(config, round.config(), guess, rig).await,
    }
}

// =============================================================================
// Commands
// =============================================================================

fn cmd_window(round: RoundConfig) -> Result<(), Box<dyn Error>> {
    let w = round.window()?;
    println!();
    println!("  Round start:        {}", w.start_block);
    println!("  Reveal opens at:    {}", w.reveal_opens_at);
    println!("  Beacon range:       {}..={}", w.reveal_opens_at, w.beacon_end());
    println!("  Reveal closes at:   {}", w.reveal_closes_at);
    println!("  Claim window end:   {}", w.claim_window_end);
    match round.previous() {
        Some(prev) => println!("  Previous round:     {}", prev.window()?),
        None => println!("  Previous round:     none"),
    }
    println!();
    Ok(())
}

fn cmd_entry_script(config: &EngineConfig, round: RoundConfig, guess: i64) -> Result<(), Box<dyn Error>> {
    let window = round.window()?;
    let operator = config
        .operator
        .ok_or("entry-script needs an operator address (--operator or config file)")?;
    let script = entry_script(&window, Guess::new(guess)?, config.bits_of_randomness, &operator)?;

    print_script(&script);
    Ok(())
}

fn cmd_reveal_script(config: &EngineConfig, hash: &str, guess: i64) -> Result<(), Box<dyn Error>> {
    let funding_hash = TxHash::from_hex(hash)?;
    let entry = Entry::new(funding_hash, Guess::new(guess)?, Utc::now());
    let script = reveal_script(&entry, config.bits_of_randomness)?;

    print_script(&script);
    Ok(())
}

fn cmd_decode_script(input: &str) -> Result<(), Box<dyn Error>> {
    let script = Script::from_hex(input)?;
    print_script(&script);

    if let Some(terms) = EntryTerms::parse(&script) {
        println!("  Detected: lottery entry");
        println!("    Guess:            {}", terms.guess);
        println!("    Bits:             {}", terms.bits);
        println!("    Beacon range:     {}..={}", terms.reveal_opens_at, terms.beacon_end);
        println!("    Claim after:      {}", terms.reveal_closes_at);
        println!("    Rollover after:   {}", terms.claim_window_end);
        println!("    Operator:         {}", terms.operator);
    } else if let Some(hash) = script.p2pkh_hash() {
        println!("  Detected: P2PKH to {}", Address::from_pubkey_hash(hash));
    } else {
        println!("  Detected: unknown script");
    }
    println!();
    Ok(())
}

fn print_script(script: &Script) {
    println!();
    println!("  Hex:      {}", script.to_hex());
    println!("  Length:   {} bytes", script.to_bytes().len());
    println!("  Asm:      {}", script.disassemble());
    println!();
}

async fn cmd_shell(config: EngineConfig, round: RoundConfig, height: u64, fund: u64) -> Result<(), Box<dyn Error>> {
    let ledger = Arc::new(SimLedger::new(RoundSchedule::Fixed(round), height));
    if fund > 0 {
        ledger.fund(fund * COIN);
    }
    let engine = Arc::new(LotteryEngine::new(ledger, config)?);

    let mut shell = Shell::new(engine);
    tokio::task::spawn_blocking(move || shell.run()).await?;
    Ok(())
}

async fn cmd_demo(
    mut config: EngineConfig,
    round: RoundConfig,
    guess: Option<i64>,
    rig: bool,
) -> Result<(), Box<dyn Error>> {
    config.auto_enter = true;
    config.auto_claim = true;
    config.auto_guess = guess.or(config.auto_guess);

    let window: RoundWindow = round.window()?;
    let (event_tx, event_rx) = mpsc::channel(1024);
    let (done_tx, mut done_rx) = mpsc::channel(64);

    let ledger = Arc::new(SimLedger::new(RoundSchedule::Fixed(round), round.start_block).with_events(event_tx));
    let engine = Arc::new(LotteryEngine::new(ledger.clone(), config)?);
    let triggers = tokio::spawn(run_triggers(engine.clone(), event_rx, Some(done_tx)));

    info!("Demo round: {}", window);
    ledger.fund(3 * COIN);

    let mut waited = 0;
    while engine.entries().is_empty() && waited < 50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += 1;
    }
    let entry = engine.entries().into_iter().next().ok_or("auto-enter did not submit an entry")?;
    info!("Entered with guess {} in {}", entry.guess, entry.funding_hash);

    if rig {
        ledger.rig_beacon(&window, &entry.funding_hash, entry.guess);
    }

    while ledger.current_height().unwrap_or(0) < window.claim_window_end {
        ledger.mine(1);
        tokio::time::sleep(Duration::from_millis(5)).await;
        while let Ok(completion) = done_rx.try_recv() {
            report(&completion);
        }
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(completion) = done_rx.try_recv() {
        report(&completion);
    }

    println!();
    println!("  Final height:   {}", ledger.current_height().unwrap_or(0));
    println!("  Final balance:  {}", format_coins(ledger.balance()));
    println!("  Open entries:   {}", engine.entries().len());
    println!();

    triggers.abort();
    Ok(())
}

fn report(completion: &Completion) {
    match completion {
        Completion::Entered { guess, outcome } => {
            println!("  Entry (guess {}): {:?}", guess, outcome)
        }
        Completion::Claimed { outpoint, outcome } => {
            println!("  Claim of {}: {:?}", outpoint, outcome)
        }
    }
}
