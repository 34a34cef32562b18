//! SD Operator CLI
//!
//! Thin shell around the settlement engine: parses arguments, loads config,
//! wires the simulated chain and an interactive stdin prompter, then renders
//! the action outcome as text or JSON.
//!
//! ## Commands
//!
//! - `status`: SD position, utilization, excess and unbonding state
//! - `repay <amount>` / `repay-excess`: reduce the utilization position
//! - `withdraw <amount>`: withdraw self-bonded collateral
//! - `claim-rewards`, `claim-sp-rewards`, `claim-withdrawn-sd`

#![warn(dead_code)]
#![warn(unused_must_use)]

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use itertools::Itertools;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sd_operator::config::LoggingConfig;
use sd_operator::engine::{ActionOutcome, ActionReceipt};
use sd_operator::position::{CollateralWithdrawState, PositionReport};
use sd_operator::settlement::DebtSettlement;
use sd_operator::units::{format_eth, format_sd, gwei_to_wei, parse_sd_amount};
use sd_operator::{
    ChainClient, Config, ConfirmationRequest, ContractCall, EngineError, EngineResult,
    FixtureChain, Prompter, SettlementEngine, SubmissionOptions, TxId,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Chain state file (overrides `chain.state_path`)
    #[arg(long, global = true)]
    state: Option<String>,

    /// Skip non-advisory confirmations
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    /// Explicit nonce for the first transaction
    #[arg(long, global = true)]
    nonce: Option<u64>,

    /// Max fee per gas in gwei
    #[arg(long, global = true)]
    max_fee_gwei: Option<f64>,

    /// Max priority fee per gas in gwei
    #[arg(long, global = true)]
    priority_fee_gwei: Option<f64>,

    /// Gas limit (defaults to the estimate's safe limit)
    #[arg(long, global = true)]
    gas_limit: Option<u64>,

    /// Print the outcome as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the SD position
    Status,

    /// Repay utilized SD from the operator account
    Repay {
        /// Amount in SD (e.g. 12.5)
        amount: String,
    },

    /// Repay utilized SD from excess collateral
    RepayExcess,

    /// Withdraw self-bonded SD collateral
    Withdraw {
        /// Amount in SD
        amount: String,
    },

    /// Claim operator ETH rewards
    ClaimRewards,

    /// Claim socializing-pool reward cycles
    ClaimSpRewards {
        /// Comma-separated cycles, or "all"
        #[arg(long)]
        cycles: Option<String>,

        /// Download missing merkle proofs first
        #[arg(long)]
        download_proofs: bool,
    },

    /// Claim a matured collateral unbonding request
    ClaimWithdrawnSd,
}

enum Output {
    Report(PositionReport),
    Outcome(ActionOutcome),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config_found = Path::new(&args.config).exists();
    let config = load_config(&args.config, config_found)?;
    init_logging(args.verbose, &config.logging)?;
    if !config_found {
        warn!("Config file '{}' not found, using defaults", args.config);
    }

    let state_path = args
        .state
        .clone()
        .unwrap_or_else(|| config.chain.state_path.clone());
    info!("📋 Loading chain state from: {}", state_path);
    let chain = Arc::new(FixtureChain::load(&state_path)?);
    info!("💼 Operator address: {}", chain.operator_address());

    let engine = SettlementEngine::new(chain.clone(), Arc::new(StdinPrompter::new()), &config);
    let cancellation = engine.cancellation_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Received interrupt, abandoning inclusion wait");
            cancellation.cancel();
        }
    });

    let options = SubmissionOptions {
        auto_confirm: args.yes,
        nonce_override: args.nonce,
        gas: gas_settings(&args, &config)?,
    };

    let result = run_command(&engine, &args.command, &options).await;

    // Broadcast transactions are part of the state even when the action failed
    chain
        .save(&state_path)
        .with_context(|| format!("Failed to persist chain state to {}", state_path))?;

    let output = result?;
    render(&output, args.json)?;

    Ok(match output {
        Output::Outcome(ActionOutcome::Rejected(_)) => ExitCode::from(2),
        _ => ExitCode::SUCCESS,
    })
}

/// Initialize logging subsystem (stderr, so `--json` output stays clean)
fn init_logging(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    let env_filter = if verbose {
        "sd_operator=debug,info".to_string()
    } else {
        logging.filter.clone()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| env_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str, exists: bool) -> Result<Config> {
    if exists {
        Config::from_file_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path))
    } else {
        Config::defaults_with_env()
    }
}

/// Config fee defaults overridden by command line flags
fn gas_settings(args: &Args, config: &Config) -> Result<sd_operator::types::GasSettings> {
    let mut gas = config.transactions.gas_settings()?;
    if let Some(gwei) = args.max_fee_gwei {
        gas.max_fee_per_gas = Some(gwei_to_wei(gwei)?);
    }
    if let Some(gwei) = args.priority_fee_gwei {
        gas.max_priority_fee_per_gas = Some(gwei_to_wei(gwei)?);
    }
    gas.gas_limit = args.gas_limit;
    Ok(gas)
}

async fn run_command(
    engine: &SettlementEngine,
    command: &Command,
    options: &SubmissionOptions,
) -> Result<Output> {
    let outcome = match command {
        Command::Status => return Ok(Output::Report(engine.status(Utc::now()).await?)),
        Command::Repay { amount } => engine.repay(parse_sd_amount(amount)?, options).await?,
        Command::RepayExcess => engine.repay_excess(options).await?,
        Command::Withdraw { amount } => engine.withdraw(parse_sd_amount(amount)?, options).await?,
        Command::ClaimRewards => engine.claim_rewards(options).await?,
        Command::ClaimSpRewards {
            cycles,
            download_proofs,
        } => {
            engine
                .claim_sp_rewards(cycles.as_deref(), *download_proofs, options)
                .await?
        }
        Command::ClaimWithdrawnSd => engine.claim_withdrawn_sd(Utc::now(), options).await?,
    };
    Ok(Output::Outcome(outcome))
}

fn render(output: &Output, json: bool) -> Result<()> {
    if json {
        let text = match output {
            Output::Report(report) => serde_json::to_string_pretty(report)?,
            Output::Outcome(outcome) => serde_json::to_string_pretty(outcome)?,
        };
        println!("{}", text);
        return Ok(());
    }

    match output {
        Output::Report(report) => render_report(report),
        Output::Outcome(outcome) => render_outcome(outcome),
    }
    Ok(())
}

fn render_report(report: &PositionReport) {
    let p = &report.position;
    println!("Operator:                 {}", report.operator);
    println!("SD balance:               {} SD", format_sd(p.sd_balance));
    println!("SD collateral:            {} SD", format_sd(p.sd_collateral_current_amount));
    println!("SD utilized:              {} SD", format_sd(p.sd_utilizer_latest_balance));
    println!("Accumulated interest:     {} SD", format_sd(p.accumulated_interest));
    println!("Max collateral:           {} SD", format_sd(p.sd_max_collateral_amount));
    println!("Total collateral:         {} SD", format_sd(report.total_collateral));
    println!("Excess collateral:        {} SD", format_sd(report.excess_collateral));
    match &report.withdraw_state {
        CollateralWithdrawState::None => println!("Unbonding:                none"),
        CollateralWithdrawState::Pending { amount, unlocks_at } => println!(
            "Unbonding:                {} SD, claimable from {}",
            format_sd(*amount),
            unlocks_at
        ),
        CollateralWithdrawState::Claimable { amount } => {
            println!("Unbonding:                {} SD, claimable now", format_sd(*amount))
        }
    }
    println!(
        "Rewards:                  {} ETH ({} ETH claimable now)",
        format_eth(report.rewards.claims_balance),
        format_eth(report.rewards.withdrawable_in_eth)
    );
}

fn render_outcome(outcome: &ActionOutcome) {
    match outcome {
        ActionOutcome::Rejected(rejection) => println!("❌ {}", rejection),
        ActionOutcome::Cancelled {
            prompt,
            approval_tx,
        } => {
            println!("Cancelled at the {} prompt.", prompt);
            if let Some(tx_id) = approval_tx {
                println!("SD approval {} was already included and remains in effect.", tx_id);
            }
        }
        ActionOutcome::NothingToClaim => println!("No rewards to claim."),
        ActionOutcome::RepayRequired {
            outstanding_debt,
            full_balance,
        } => println!(
            "Repay the {} SD utilization position to claim the full {} ETH.",
            format_sd(*outstanding_debt),
            format_eth(*full_balance)
        ),
        ActionOutcome::Completed(receipt) => render_receipt(receipt),
    }
}

fn render_receipt(receipt: &ActionReceipt) {
    println!("✅ {} included in block {}", receipt.action, receipt.block_number);
    if let Some(approval) = receipt.approval_tx {
        println!("Approval:                 {}", approval);
    }
    println!("Transaction:              {}", receipt.tx_id);
    if let Some(amount) = receipt.final_amount {
        let unit = if receipt.action == "claim-rewards" {
            format!("{} ETH", format_eth(amount))
        } else {
            format!("{} SD", format_sd(amount))
        };
        println!("Amount:                   {}", unit);
    }
    if let Some(settled) = receipt.settled_debt {
        println!("Utilization repaid:       {} SD", format_sd(settled));
    }
    if let Some(remaining) = receipt.remaining_utilization {
        println!("Utilization remaining:    {} SD", format_sd(remaining));
    }
    if let Some(cycles) = &receipt.cycles {
        println!("Cycles claimed:           {}", cycles.iter().join(", "));
    }
}

/// Interactive prompter over stdin; questions go to stderr
struct StdinPrompter {
    lines: tokio::sync::Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinPrompter {
    fn new() -> Self {
        Self {
            lines: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    async fn ask(&self, question: &str) -> EngineResult<String> {
        eprint!("{} ", question);
        std::io::stderr()
            .flush()
            .map_err(|e| EngineError::prompt(e.to_string()))?;
        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(EngineError::prompt("stdin closed")),
            Err(e) => Err(EngineError::prompt(e.to_string())),
        }
    }
}

fn describe(request: &ConfirmationRequest) -> String {
    match request {
        ConfirmationRequest::Approval {
            spender, gas_limit, ..
        } => format!(
            "The utility contract {} needs an unlimited SD allowance before it can pull the repayment (gas limit {}).",
            spender, gas_limit
        ),
        ConfirmationRequest::Transaction { call, gas_limit } => {
            let amount = call
                .amount()
                .map(|a| format!(" of {} SD", format_sd(a)))
                .unwrap_or_default();
            let cycles = match call {
                ContractCall::ClaimSpRewards { cycles } => {
                    format!(" for cycles {}", cycles.iter().join(", "))
                }
                _ => String::new(),
            };
            format!(
                "About to submit {}{}{} (gas limit {}).",
                call.kind(),
                amount,
                cycles,
                gas_limit
            )
        }
        ConfirmationRequest::WithdrawDebtSettlement { amount, settlement } => match settlement {
            DebtSettlement::NoDebt => format!(
                "Withdrawing {} SD to your reward address.",
                format_sd(*amount)
            ),
            DebtSettlement::ConsumedByDebt { debt } => format!(
                "You have {} SD utilized. Withdrawing {} SD repays that much of it and no SD will reach your reward address.",
                format_sd(*debt),
                format_sd(*amount)
            ),
            DebtSettlement::RepaidWithRemainder { debt, remainder } => format!(
                "Withdrawing {} SD first repays your {} SD utilization position in full, then sends the remaining {} SD to your reward address.",
                format_sd(*amount),
                format_sd(*debt),
                format_sd(*remainder)
            ),
        },
        ConfirmationRequest::PartialClaim {
            claimable_now,
            full_balance,
            outstanding_debt,
        } => format!(
            "Your health factor limits the claim to {} ETH of {} ETH while {} SD is utilized. Repay the utilized SD to claim everything. Claim {} ETH now?",
            format_eth(*claimable_now),
            format_eth(*full_balance),
            format_sd(*outstanding_debt),
            format_eth(*claimable_now)
        ),
        ConfirmationRequest::DownloadProofs { cycles } => format!(
            "Merkle proofs are missing for cycles {}. Download them now?",
            cycles.iter().join(", ")
        ),
    }
}

#[async_trait]
impl Prompter for StdinPrompter {
    async fn confirm(&self, request: &ConfirmationRequest) -> EngineResult<bool> {
        let answer = self
            .ask(&format!("{}\nContinue? [y/N]", describe(request)))
            .await?;
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }

    async fn select_cycles(&self, unclaimed: &[u64]) -> EngineResult<String> {
        self.ask(&format!(
            "Unclaimed cycles: {}\nEnter the cycles to claim (comma separated), or press enter for all:",
            unclaimed.iter().join(", ")
        ))
        .await
    }

    async fn transaction_submitted(&self, tx_id: &TxId, call: &ContractCall) {
        eprintln!(
            "📤 Transaction {} ({}) submitted, waiting for inclusion...",
            tx_id,
            call.kind()
        );
    }
}
