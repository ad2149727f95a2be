// =============================================================================
// LOTTERYNET - Operator Shell
// =============================================================================
//
// Line-oriented commands over an engine backed by the simulated ledger:
//
//   height | balance | entries | enter x | claim x | candidates
//   prevcandidates | claimable | prevclaimable | updaterandomness x
//   mine n | help | quit
//
// =============================================================================

use std::io::{self, Write};
use std::sync::Arc;

use crate::ledger::Ledger;
use crate::lottery::{CandidateOutcome, CandidateSet, ClaimOutcome, EnterOutcome, LotteryEngine, LotteryError};
use crate::sim::SimLedger;
use crate::format_coins;

pub struct Shell {
    engine: Arc<LotteryEngine<SimLedger>>,
    running: bool,
}

impl Shell {
    pub fn new(engine: Arc<LotteryEngine<SimLedger>>) -> Self {
        Shell { engine, running: true }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Read commands from stdin until `quit` or end of input
    pub fn run(&mut self) {
        println!("My address is: {}", self.engine.ledger().change_address());
        println!("Type \"help\" for list of commands and \"quit\" to exit.");

        while self.running {
            print!("lottery> ");
            let _ = io::stdout().flush();

            let mut input = String::new();
            match io::stdin().read_line(&mut input) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    println!("Read error: {}", e);
                    break;
                }
            }

            let output = self.execute(&input);
            if !output.is_empty() {
                println!("{}", output);
            }
        }
    }

    /// Run one command line and return what it prints
    pub fn execute(&mut self, line: &str) -> String {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let (cmd, args) = match parts.split_first() {
            Some((cmd, args)) => (cmd.to_lowercase(), args),
            None => return String::new(),
        };

        let result = match cmd.as_str() {
            "help" | "h" | "?" => Ok(Self::help()),
            "height" => Ok(match self.engine.height() {
                Some(h) => h.to_string(),
                None => "Chain height unknown".to_string(),
            }),
            "balance" => Ok(format_coins(self.engine.balance())),
            "entries" => Ok(self.entries()),
            "enter" => match parse_arg::<i64>(args) {
                Some(guess) => self.enter(guess),
                None => Ok("Please provide a valid guess for entering.".to_string()),
            },
            "claim" => match parse_arg::<i64>(args) {
                Some(guess) => self.claim(guess),
                None => Ok("Please provide a valid guess for claiming (the same as you entered with).".to_string()),
            },
            "candidates" => self.candidates(false),
            "prevcandidates" => self.candidates(true),
            "claimable" => self.claimable(false),
            "prevclaimable" => self.claimable(true),
            "updaterandomness" => match parse_arg::<u32>(args) {
                Some(bits) => self
                    .engine
                    .set_bits_of_randomness(bits)
                    .map(|_| format!("Updated randomness to: {}", bits)),
                None => Ok("Please provide a valid number of bits of randomness.".to_string()),
            },
            "mine" => {
                let blocks = parse_arg::<u64>(args).unwrap_or(1);
                let tip = self.engine.ledger().mine(blocks);
                Ok(format!("Mined {} block(s), height {}", blocks, tip))
            }
            "quit" | "exit" | "q" => {
                self.running = false;
                Ok(String::new())
            }
            _ => Ok(format!("Unknown command: {}. Type 'help' for commands.", cmd)),
        };

        result.unwrap_or_else(|e| format!("Error: {}", e))
    }

    fn help() -> String {
        [
            "Commands:",
            "  height               current chain height",
            "  balance              wallet balance",
            "  entries              entries submitted by this process",
            "  enter x              stake one coin on guess x",
            "  claim x              reveal guess x against claimable candidates",
            "  candidates           claimable outputs of the current round",
            "  prevcandidates       claimable outputs of the previous round",
            "  claimable            value of current candidates",
            "  prevclaimable        value of previous-round candidates",
            "  updaterandomness x   set bits of randomness",
            "  mine n               produce n blocks",
            "  quit",
        ]
        .join("\n")
    }

    fn entries(&self) -> String {
        let entries = self.engine.entries();
        if entries.is_empty() {
            return "No entries".to_string();
        }
        let mut out = vec!["Your entries:".to_string()];
        for e in entries {
            out.push(format!(
                "  {} guess {} at {}",
                e.funding_hash,
                e.guess,
                e.submitted_at.format("%Y-%m-%d %H:%M:%S")
            ));
        }
        out.join("\n")
    }

    fn enter(&self, guess: i64) -> Result<String, LotteryError> {
        Ok(match self.engine.enter(guess)? {
            EnterOutcome::Submitted(s) => {
                format!("Sent entry onwards! Transaction hash is {}", s.tx_hash)
            }
            EnterOutcome::InsufficientBalance { needed, available } => format!(
                "Not enough balance to enter lottery!\nNeeded balance: {}\nWallet balance: {}",
                format_coins(needed),
                format_coins(available)
            ),
        })
    }

    fn claim(&self, guess: i64) -> Result<String, LotteryError> {
        let outcomes = match self.engine.claim(guess)? {
            ClaimOutcome::Attempted(outcomes) => outcomes,
            ClaimOutcome::NotInClaimPeriod { window, height } => {
                return Ok(format!("Not in claiming period (height {}, {})", height, window))
            }
            ClaimOutcome::NoPreviousRound => return Ok("No previous round".to_string()),
        };
        if outcomes.is_empty() {
            return Ok("No current claim candidates.".to_string());
        }

        let lines: Vec<String> = outcomes
            .iter()
            .map(|o| match o {
                CandidateOutcome::Broadcast { outpoint, tx_hash, .. } => {
                    format!("{}: sent out claim! Claim transaction hash is {}", outpoint, tx_hash)
                }
                CandidateOutcome::NoMatchingEntry { outpoint } => {
                    format!("{}: no entry with guess {}", outpoint, guess)
                }
                CandidateOutcome::InsufficientFunds { outpoint, needed, available } => format!(
                    "{}: not enough money to send out claim ({} needed, {} available)",
                    outpoint,
                    format_coins(*needed),
                    format_coins(*available)
                ),
                CandidateOutcome::SendFailed { outpoint, reason, .. } => {
                    format!("{}: claim refused: {}", outpoint, reason)
                }
                CandidateOutcome::Failed { outpoint, reason } => {
                    format!("{}: claim failed: {}", outpoint, reason)
                }
            })
            .collect();
        Ok(lines.join("\n"))
    }

    fn candidates(&self, previous: bool) -> Result<String, LotteryError> {
        Ok(match self.engine.list_candidates(previous)? {
            CandidateSet::InWindow { outputs, window } => {
                let mut out = vec![format!("{} candidate(s) in {}", outputs.len(), window)];
                for o in outputs {
                    out.push(format!("  {} {}", o.outpoint, format_coins(o.value)));
                }
                out.join("\n")
            }
            CandidateSet::NotInClaimPeriod { .. } => "Not in lottery claimable period.".to_string(),
            CandidateSet::NoPreviousRound => "No previous round".to_string(),
        })
    }

    fn claimable(&self, previous: bool) -> Result<String, LotteryError> {
        Ok(match self.engine.list_candidates(previous)? {
            set @ CandidateSet::InWindow { .. } => format_coins(set.total_value()),
            CandidateSet::NotInClaimPeriod { .. } => "Not in lottery claimable period.".to_string(),
            CandidateSet::NoPreviousRound => "No previous round".to_string(),
        })
    }
}

fn parse_arg<T: std::str::FromStr>(args: &[&str]) -> Option<T> {
    args.first().and_then(|s| s.parse().ok())
}
