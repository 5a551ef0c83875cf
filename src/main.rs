use std::{
    error::Error,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use clap::{Parser, Subcommand};
use colored::Colorize;
use loan_circulation::{
    Circulation, CirculationConfig, Diagram, Loan, LoanState, LoanStore, MemoryStore, Params,
    StaticLocator, TransitionLogger, TransitionRegistry, observers::RecordingObserver,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Upper bound on steps of a walk, so a looping table cannot spin forever
const MAX_STEPS: usize = 16;

/// Item every walk circulates
const ITEM_PID: &str = "item-1";

/// Command-line arguments for the loan circulation tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose output with detailed transition logs
    #[arg(short, long, global = true)]
    verbose: bool,

    /// What to do
    #[command(subcommand)]
    command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug)]
enum Command {
    /// Render the transition table as a DOT graph
    Diagram {
        /// JSON configuration file, the built-in table when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the graph here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Drive one loan from creation to a final state
    Walk {
        /// JSON configuration file, the built-in table when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Library the item currently sits in
        #[arg(long, default_value = "main-library")]
        item_location: String,

        /// Library the patron picks the item up from
        #[arg(long, default_value = "main-library")]
        pickup: String,

        /// Library the item is brought back to
        #[arg(long, default_value = "branch-library")]
        return_at: String,

        /// Number of other patrons already waiting for the item
        #[arg(long, default_value_t = 0)]
        pending: usize,

        /// Directory to dump the final store into
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

/// Install a stderr subscriber, `RUST_LOG` wins over `--verbose`
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    tracing_subscriber::registry().with(filter).with(layer).init();
}

/// Load the configuration file or fall back to the built-in table
fn load_config(path: Option<&PathBuf>) -> loan_circulation::Result<CirculationConfig> {
    path.map_or_else(|| Ok(CirculationConfig::default()), CirculationConfig::from_file)
}

/// Dispatch a subcommand
fn run(args: Args) -> Result<(), Box<dyn Error>> {
    match args.command {
        Command::Diagram { config, output } => {
            let config = load_config(config.as_ref())?;
            let registry = TransitionRegistry::from_config(&config)?;
            let dot = Diagram::generate_dot(&registry, &[]);

            if args.verbose {
                eprintln!("{}", Diagram::describe_registry(&registry));
            }

            match output {
                Some(path) => {
                    Diagram::save_dot_to_file(&dot, &path)?;
                    println!("{} {}", "DOT graph written to".green(), path.display());
                }
                None => print!("{dot}"),
            }
            Ok(())
        }
        Command::Walk { config, item_location, pickup, return_at, pending, save } => {
            let config = load_config(config.as_ref())?;
            let plan = WalkPlan { pickup, return_at };
            walk(config, &item_location, pending, &plan, save.as_deref())
        }
    }
}

/// Locations used while walking a loan
#[derive(Debug)]
struct WalkPlan {
    /// Pickup library sent with the request
    pickup: String,
    /// Transaction library sent with the return
    return_at: String,
}

impl WalkPlan {
    /// Params for the next step, given where the loan is
    fn next_params(&self, circulation: &Circulation, loan: &Loan, extended: &mut bool) -> Params {
        match loan.state {
            LoanState::Created => {
                circulation.action("request").with("pickup_location_pid", self.pickup.as_str())
            }
            LoanState::ItemOnLoan if !*extended => {
                *extended = true;
                circulation.action("extend")
            }
            LoanState::ItemOnLoan => {
                Params::new().with("transaction_location_pid", self.return_at.as_str())
            }
            _ => Params::new(),
        }
    }
}

/// Create one loan and trigger it until nothing more fires
fn walk(
    config: CirculationConfig,
    item_location: &str,
    pending: usize,
    plan: &WalkPlan,
    save: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    println!("{}", "Loan Circulation Walk".green().bold());
    println!("=====================================\n");

    let store = Arc::new(MemoryStore::new());
    for n in 0..pending {
        let mut waiting = Loan::new(format!("waiting-{n}"), LoanState::Pending);
        waiting.item_pid = Some(ITEM_PID.to_string());
        waiting.patron_pid = Some(format!("patron-{n}"));
        store.persist(&waiting)?;
    }

    let locator = StaticLocator::new().with_item(ITEM_PID, item_location);
    let recorder = Arc::new(RecordingObserver::new());
    let shared_store: Arc<dyn LoanStore> = store.clone();
    let mut circulation = Circulation::new(config, locator, shared_store)?;
    circulation.register_observer(Box::new(TransitionLogger));
    circulation.register_observer(Box::new(Arc::clone(&recorder)));

    let fields = Params::new().with("item_pid", ITEM_PID).with("patron_pid", "patron-main");
    let mut loan = circulation.create_loan(&fields)?;
    println!("Created loan {} in {}", loan.loan_pid.cyan(), loan.state.to_string().yellow());

    let mut extended = false;
    for step in 1..=MAX_STEPS {
        let params = plan.next_params(&circulation, &loan, &mut extended);
        match circulation.trigger(&mut loan, &params) {
            Ok(updated) => {
                let state = updated.state.to_string();
                println!("{step:>2}. {} {}", "->".green(), state.yellow().bold());
            }
            Err(e) => {
                println!("{step:>2}. {} {e}", "stop".red());
                break;
            }
        }
    }

    println!("\n{}", Diagram::history_table(&recorder.changes()?));

    if let Some(dir) = save {
        let path = dir.join("loans.json");
        store.save_to_file(&path)?;
        println!("{} {}", "Store written to".green(), path.display());
    }

    println!("\n{} {}", "Final state:".green().bold(), loan.state.get_description());
    Ok(())
}
