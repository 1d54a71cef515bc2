//! Command surface for the `pb` binary.
//!
//! Running `pb` without a subcommand performs the default analysis: open and
//! migrate [`DATABASE_NAME`], seed simulated draws into an empty database, and
//! report how often [`TARGET_MAIN_NUMBERS`] + [`TARGET_POWERBALL`] appears.
//! Subcommands expose the individual steps.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use powerball_core::{
    parse_draw_date, parse_main_numbers, parse_no, parse_yes_no, simulate_draws, validate_powerball,
    Combination, Draw, DrawConflict, DrawInput, Frequency, MainNumbers, SimulationPlan,
};
use powerball_store_sqlite::{classify_conflict, SqliteDrawStore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use time::Date;
use tracing::{info, warn};

pub const DATABASE_NAME: &str = "powerball_draws.db";
pub const TARGET_MAIN_NUMBERS: [u8; 5] = [2, 18, 35, 41, 46];
pub const TARGET_POWERBALL: u8 = 1;
pub const DEFAULT_SIMULATED_DRAWS: usize = 1_000;
/// Upper bound accepted by `simulate --count`.
pub const MAX_SIMULATED_DRAWS: u64 = 1_000_000;
pub const SIMULATION_START_DATE: &str = "2000-01-01";

#[derive(Debug, Parser)]
#[command(name = "pb")]
#[command(about = "Powerball draw store and combination frequency lookup")]
pub struct Cli {
    #[arg(long, global = true, default_value = DATABASE_NAME)]
    db: PathBuf,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Disable logging entirely.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Insert a single draw.
    Add(AddArgs),
    /// Generate and insert random draws after the latest stored one.
    Simulate(SimulateArgs),
    /// Report how often a combination appears.
    Frequency(FrequencyArgs),
    /// Print row counts and the highest sequence number.
    Stats,
    /// Prompt for draws on stdin until told to stop.
    Interactive,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    #[arg(long)]
    date: String,
    #[arg(long)]
    powerball_plus: bool,
    #[arg(long)]
    sequence: Option<u32>,
    /// Comma-separated main numbers, in any order.
    #[arg(long)]
    main: String,
    #[arg(long)]
    powerball: u8,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    #[arg(
        long,
        default_value_t = DEFAULT_SIMULATED_DRAWS,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..=MAX_SIMULATED_DRAWS)
    )]
    count: usize,
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Args)]
pub struct FrequencyArgs {
    /// Comma-separated main numbers; defaults to the built-in target.
    #[arg(long)]
    main: Option<String>,
    #[arg(long, conflicts_with = "main_only")]
    powerball: Option<u8>,
    /// Ignore the powerball column when matching.
    #[arg(long)]
    main_only: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InsertOutcome {
    Stored {
        draw: Draw,
    },
    Skipped {
        #[serde(with = "powerball_core::iso_date")]
        draw_date: Date,
        conflict: DrawConflict,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SimulationReport {
    pub requested: usize,
    pub stored: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct InteractiveReport {
    pub stored: usize,
    pub skipped: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnalysisReport {
    pub database: String,
    pub seeded: Option<SimulationReport>,
    pub frequency: Frequency,
}

/// Opens the configured database and runs the requested command.
///
/// # Errors
/// Returns an error when the store cannot be opened or migrated, or when the
/// command fails for a reason other than a duplicate draw.
pub fn run_cli(cli: Cli) -> Result<()> {
    let mut store = open_store(&cli.db)?;
    match cli.command {
        None => {
            let report = run_default(&mut store, &cli.db)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some(command) => run_command(command, &mut store),
    }
}

/// Opens and migrates the store at `path`.
///
/// # Errors
/// Returns an error when opening or migrating the database fails.
pub fn open_store(path: &Path) -> Result<SqliteDrawStore> {
    let store = SqliteDrawStore::open(path)?;
    store.migrate()?;
    info!(db = %path.display(), "database ready");
    Ok(store)
}

/// Executes a parsed subcommand against an existing store handle.
///
/// # Errors
/// Returns an error on invalid input or storage failures other than
/// duplicate draws, which are logged and reported as skipped.
pub fn run_command(command: Command, store: &mut SqliteDrawStore) -> Result<()> {
    match command {
        Command::Add(args) => {
            let input = DrawInput {
                draw_date: parse_draw_date(&args.date)?,
                is_powerball_plus: args.powerball_plus,
                draw_sequence_num: args.sequence,
                main_numbers: parse_main_numbers(&args.main)?,
                powerball: args.powerball,
            };
            input.validate()?;

            let outcome = insert_or_skip(store, &input)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Command::Simulate(args) => {
            let report = simulate_into(store, args.count, args.seed)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Frequency(args) => {
            let main = match args.main.as_deref() {
                Some(raw) => parse_main_numbers(raw)?,
                None => MainNumbers::new(TARGET_MAIN_NUMBERS),
            };
            main.validate()?;

            let powerball = if args.main_only {
                None
            } else {
                Some(args.powerball.unwrap_or(TARGET_POWERBALL))
            };
            if let Some(value) = powerball {
                validate_powerball(value)?;
            }

            let frequency = store.frequency(&Combination::new(main, powerball))?;
            println!("{}", serde_json::to_string_pretty(&frequency)?);
            Ok(())
        }
        Command::Stats => {
            let stats = store.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Interactive => {
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            let report = run_interactive(store, stdin.lock(), stdout.lock())?;
            info!(
                stored = report.stored,
                skipped = report.skipped,
                rejected = report.rejected,
                "interactive session finished"
            );
            Ok(())
        }
    }
}

/// Default analysis used when `pb` runs without a subcommand.
///
/// # Errors
/// Returns an error when seeding or the frequency query fails.
pub fn run_default(store: &mut SqliteDrawStore, db_path: &Path) -> Result<AnalysisReport> {
    let seeded = if store.total_draws()? == 0 {
        warn!(
            count = DEFAULT_SIMULATED_DRAWS,
            database = %db_path.display(),
            "empty database, seeding simulated draws; use a separate --db for real draws"
        );
        Some(simulate_into(store, DEFAULT_SIMULATED_DRAWS, None)?)
    } else {
        None
    };

    let target = Combination::new(MainNumbers::new(TARGET_MAIN_NUMBERS), Some(TARGET_POWERBALL));
    let frequency = store.frequency(&target)?;
    info!(
        %target,
        occurrences = frequency.occurrences,
        total_draws = frequency.total_draws,
        "target combination analysed"
    );

    Ok(AnalysisReport {
        database: db_path.display().to_string(),
        seeded,
        frequency,
    })
}

/// Inserts a draw, turning uniqueness conflicts into a logged skip.
///
/// # Errors
/// Returns the storage error for anything that is not a duplicate date,
/// sequence number or number set.
pub fn insert_or_skip(store: &mut SqliteDrawStore, input: &DrawInput) -> Result<InsertOutcome> {
    match store.insert_draw(input) {
        Ok(draw) => Ok(InsertOutcome::Stored { draw }),
        Err(err) => match classify_conflict(&err) {
            Some(conflict) => {
                warn!(draw_date = %input.draw_date, %conflict, "skipped draw: {err:#}");
                Ok(InsertOutcome::Skipped {
                    draw_date: input.draw_date,
                    conflict,
                })
            }
            None => Err(err),
        },
    }
}

/// Appends `count` simulated draws after the latest stored date and the
/// highest stored sequence number.
///
/// # Errors
/// Returns an error when generation or a non-duplicate insert fails.
pub fn simulate_into(
    store: &mut SqliteDrawStore,
    count: usize,
    seed: Option<u64>,
) -> Result<SimulationReport> {
    let start_date = match store.latest_draw_date()? {
        Some(latest) => latest
            .next_day()
            .ok_or_else(|| anyhow!("no calendar day after {latest}"))?,
        None => parse_draw_date(SIMULATION_START_DATE)?,
    };
    let first_sequence_num = store
        .max_draw_sequence_num()?
        .checked_add(1)
        .ok_or_else(|| anyhow!("draw_sequence_num space exhausted"))?;

    let plan = SimulationPlan {
        count,
        start_date,
        first_sequence_num,
    };
    let draws = match seed {
        Some(value) => simulate_draws(&plan, &mut StdRng::seed_from_u64(value))?,
        None => simulate_draws(&plan, &mut rand::rng())?,
    };

    let mut report = SimulationReport {
        requested: count,
        stored: 0,
        skipped: 0,
    };
    for draw in &draws {
        match insert_or_skip(store, draw)? {
            InsertOutcome::Stored { .. } => report.stored += 1,
            InsertOutcome::Skipped { .. } => report.skipped += 1,
        }
    }

    info!(
        stored = report.stored,
        skipped = report.skipped,
        %start_date,
        first_sequence_num,
        "simulated draws inserted"
    );
    Ok(report)
}

/// Prompts for draws on `input` until the user declines or input ends.
///
/// Invalid entries are reported on `output` and do not end the session.
///
/// # Errors
/// Returns an error when reading or writing the terminal fails, or on a
/// storage failure that is not a duplicate draw.
pub fn run_interactive<R: BufRead, W: Write>(
    store: &mut SqliteDrawStore,
    mut input: R,
    mut output: W,
) -> Result<InteractiveReport> {
    let mut report = InteractiveReport::default();
    writeln!(output, "--- Add New Powerball Draws ---")?;

    loop {
        match read_draw(&mut input, &mut output)? {
            Entry::Finished => break,
            Entry::Invalid(message) => {
                report.rejected += 1;
                writeln!(output, "Input error: {message}")?;
            }
            Entry::Draw(draw) => match insert_or_skip(store, &draw)? {
                InsertOutcome::Stored { draw } => {
                    report.stored += 1;
                    writeln!(
                        output,
                        "Added draw for {}: {} + {}",
                        draw.draw_date, draw.main_numbers, draw.powerball
                    )?;
                }
                InsertOutcome::Skipped {
                    draw_date,
                    conflict,
                } => {
                    report.skipped += 1;
                    writeln!(output, "Skipped draw for {draw_date}: {conflict}")?;
                }
            },
        }

        let Some(answer) = prompt(&mut input, &mut output, "Add another draw? (yes/no): ")? else {
            break;
        };
        if parse_no(&answer) {
            break;
        }
    }

    Ok(report)
}

enum Entry {
    Draw(DrawInput),
    Invalid(String),
    Finished,
}

fn read_draw<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<Entry> {
    let Some(date_raw) = prompt(input, output, "Enter Draw Date (YYYY-MM-DD): ")? else {
        return Ok(Entry::Finished);
    };
    let draw_date = match parse_draw_date(&date_raw) {
        Ok(value) => value,
        Err(err) => return Ok(Entry::Invalid(err.to_string())),
    };

    let Some(plus_raw) = prompt(input, output, "Is this a Powerball Plus draw? (yes/no): ")? else {
        return Ok(Entry::Finished);
    };

    let Some(sequence_raw) = prompt(input, output, "Enter Draw Sequence Number (blank for none): ")?
    else {
        return Ok(Entry::Finished);
    };
    let draw_sequence_num = if sequence_raw.is_empty() {
        None
    } else {
        match sequence_raw.parse::<u32>() {
            Ok(value) => Some(value),
            Err(err) => {
                return Ok(Entry::Invalid(format!(
                    "invalid sequence number {sequence_raw:?}: {err}"
                )))
            }
        }
    };

    let Some(main_raw) = prompt(input, output, "Enter Main Numbers (comma-separated, e.g. 1,2,3,4,5): ")?
    else {
        return Ok(Entry::Finished);
    };
    let main_numbers = match parse_main_numbers(&main_raw) {
        Ok(value) => value,
        Err(err) => return Ok(Entry::Invalid(err.to_string())),
    };

    let Some(powerball_raw) = prompt(input, output, "Enter Powerball Number (1-20): ")? else {
        return Ok(Entry::Finished);
    };
    let powerball = match powerball_raw.parse::<u8>() {
        Ok(value) => value,
        Err(err) => {
            return Ok(Entry::Invalid(format!(
                "invalid powerball number {powerball_raw:?}: {err}"
            )))
        }
    };

    let draw = DrawInput {
        draw_date,
        is_powerball_plus: parse_yes_no(&plus_raw),
        draw_sequence_num,
        main_numbers,
        powerball,
    };
    match draw.validate() {
        Ok(()) => Ok(Entry::Draw(draw)),
        Err(err) => Ok(Entry::Invalid(err.to_string())),
    }
}

fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W, label: &str) -> Result<Option<String>> {
    write!(output, "{label}")?;
    output.flush().context("failed to flush prompt")?;

    let mut line = String::new();
    let read = input.read_line(&mut line).context("failed to read input")?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;
    use std::io::Cursor;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err:#}"),
        }
    }

    fn fixture_store() -> SqliteDrawStore {
        must(open_store(Path::new(":memory:")))
    }

    fn fixture_input(date: &str, sequence: Option<u32>, main: [u8; 5], powerball: u8) -> DrawInput {
        DrawInput {
            draw_date: must(parse_draw_date(date).map_err(anyhow::Error::from)),
            is_powerball_plus: false,
            draw_sequence_num: sequence,
            main_numbers: MainNumbers::new(main),
            powerball,
        }
    }

    fn interact(store: &mut SqliteDrawStore, script: &str) -> (InteractiveReport, String) {
        let mut output = Vec::new();
        let report = must(run_interactive(store, Cursor::new(script.to_string()), &mut output));
        (report, String::from_utf8_lossy(&output).into_owned())
    }

    #[test]
    fn duplicate_numbers_are_skipped_not_fatal() {
        let mut store = fixture_store();
        let input = fixture_input("2025-05-16", Some(1614), [46, 2, 41, 18, 35], 1);

        let first = must(insert_or_skip(&mut store, &input));
        assert!(matches!(first, InsertOutcome::Stored { .. }));

        let second = must(insert_or_skip(&mut store, &input));
        assert_eq!(
            second,
            InsertOutcome::Skipped {
                draw_date: input.draw_date,
                conflict: DrawConflict::DuplicateNumbers,
            }
        );
        assert_eq!(must(store.total_draws()), 1);
    }

    #[test]
    fn schema_violations_still_fail() {
        let mut store = fixture_store();
        let input = fixture_input("2025-05-16", Some(1), [1, 2, 3, 4, 5], 30);
        assert!(insert_or_skip(&mut store, &input).is_err());
    }

    #[test]
    fn simulate_continues_after_existing_draws() {
        let mut store = fixture_store();
        let _ = must(insert_or_skip(
            &mut store,
            &fixture_input("2024-12-30", Some(41), [1, 2, 3, 4, 5], 6),
        ));

        let report = must(simulate_into(&mut store, 10, Some(5)));
        assert_eq!(
            report,
            SimulationReport {
                requested: 10,
                stored: 10,
                skipped: 0,
            }
        );

        let stats = must(store.stats());
        assert_eq!(stats.total_draws, 11);
        assert_eq!(stats.max_draw_sequence_num, 51);
        assert_eq!(
            must(store.latest_draw_date()),
            Some(must(parse_draw_date("2025-01-09").map_err(anyhow::Error::from)))
        );
    }

    #[test]
    fn default_run_seeds_once_and_reports_target() {
        let mut store = fixture_store();

        let first = must(run_default(&mut store, Path::new(":memory:")));
        let seeded = match first.seeded {
            Some(value) => value,
            None => panic!("empty database was not seeded"),
        };
        assert_eq!(seeded.stored, DEFAULT_SIMULATED_DRAWS);
        assert_eq!(first.frequency.total_draws, 1_000);
        assert_eq!(first.frequency.combination.powerball, Some(TARGET_POWERBALL));

        let second = must(run_default(&mut store, Path::new(":memory:")));
        assert!(second.seeded.is_none());
        assert_eq!(second.frequency.total_draws, 1_000);
    }

    #[test]
    fn interactive_session_adds_and_skips() {
        let mut store = fixture_store();
        let script = "2025-05-16\nno\n1614\n46,2,41,18,35\n1\nyes\n\
                      2025-05-16\ny\n\n1,2,3,4,5\n2\nno\n";

        let (report, transcript) = interact(&mut store, script);
        assert_eq!(
            report,
            InteractiveReport {
                stored: 1,
                skipped: 1,
                rejected: 0,
            }
        );
        assert!(transcript.contains("Added draw for 2025-05-16: [2, 18, 35, 41, 46] + 1"));
        assert!(transcript.contains("Skipped draw for 2025-05-16: duplicate_numbers"));

        let frequency = must(store.frequency(&Combination::new(
            MainNumbers::new(TARGET_MAIN_NUMBERS),
            Some(TARGET_POWERBALL),
        )));
        assert_eq!(frequency.ratio, 1.0);
    }

    #[test]
    fn interactive_session_reports_bad_input_and_continues() {
        let mut store = fixture_store();
        let script = "16/05/2025\nyes\n\
                      2025-05-20\nno\n3\n1,2,3,4,51\n5\nyes\n\
                      2025-05-23\nno\n4\n1,2,3,4,5\n21\nyes\n\
                      2025-05-27\nno\n5\n5,4,3,2,1\n20\n";

        let (report, transcript) = interact(&mut store, script);
        assert_eq!(
            report,
            InteractiveReport {
                stored: 1,
                skipped: 0,
                rejected: 3,
            }
        );
        assert_eq!(transcript.matches("Input error:").count(), 3);
        assert_eq!(must(store.total_draws()), 1);
    }

    #[test]
    fn interactive_session_stops_only_on_explicit_no() {
        let mut store = fixture_store();
        let script = "2025-05-16\nno\n1\n1,2,3,4,5\n1\n\n\
                      2025-05-20\nno\n2\n6,7,8,9,10\n2\nmaybe\n\
                      2025-05-23\nno\n3\n11,12,13,14,15\n3\nN\n\
                      2025-05-27\nno\n4\n16,17,18,19,20\n4\n";

        let (report, transcript) = interact(&mut store, script);
        assert_eq!(
            report,
            InteractiveReport {
                stored: 3,
                skipped: 0,
                rejected: 0,
            }
        );
        assert_eq!(transcript.matches("Add another draw?").count(), 3);
        assert_eq!(must(store.total_draws()), 3);
    }
}
