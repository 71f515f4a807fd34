use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use cubenet_sim::{SimError, Simulator};
use cubenet_units::Time;

#[derive(Parser, Debug)]
#[command(name = "cubenet", about = "Discrete-event simulator for the cubenet hypercube overlay", version)]
struct Cli {
    /// Scenario file to load.
    input: Option<PathBuf>,

    /// File the XML notification stream is written to.
    output: Option<PathBuf>,

    /// TOML file overriding protocol parameters.
    #[arg(long)]
    params: Option<PathBuf>,

    /// Run the built-in smoke scenario instead of a file.
    #[arg(long)]
    self_test: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    if cli.self_test {
        return match self_test() {
            Ok(()) => {
                println!("self test passed");
                ExitCode::SUCCESS
            }
            Err(error) => {
                eprintln!("self test failed: {error}");
                ExitCode::FAILURE
            }
        };
    }

    let (Some(input), Some(output)) = (cli.input, cli.output) else {
        eprintln!("usage: cubenet <input> <output>");
        return ExitCode::FAILURE;
    };

    let mut sim = Simulator::new();

    if let Some(params_path) = cli.params {
        let text = match std::fs::read_to_string(&params_path) {
            Ok(text) => text,
            Err(error) => {
                eprintln!("unable to read params file {}: {error}", params_path.display());
                return ExitCode::FAILURE;
            }
        };
        let address_length = match sim.params.apply_toml(&text) {
            Ok(len) => len,
            Err(error) => {
                eprintln!("{error}");
                return ExitCode::FAILURE;
            }
        };
        if let Some(length) = address_length {
            sim.network.set_address_length(length);
        }
    }

    sim.set_output_path(output.clone());

    log::info!("loading scenario {}", input.display());
    if let Err(error) = sim.load_file(&input) {
        eprintln!("unable to load {}: {error}", input.display());
        return ExitCode::FAILURE;
    }

    log::info!("running simulation, output to {}", output.display());
    if let Err(error) = sim.simulate() {
        // The error is already part of the notification stream; report it
        // on the console and keep the output well formed.
        eprintln!("simulation stopped: {error}");
    }
    println!("simulated time: {}", sim.now().format_in(Time::SEC));

    if let Err(error) = sim.finish() {
        eprintln!("unable to finish output: {error}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// A two-node join handshake with every assertion the scenario language
/// offers; fails loudly when any step regresses.
fn self_test() -> Result<(), SimError> {
    let mut sim = Simulator::new();
    sim.set_output_writer(Box::new(std::io::sink()));
    sim.load_str(
        "newNode(A)\n\
         newNode(B)\n\
         newConnection(A,B,10Mbps,1ms)\n\
         [1ms] node(A).joinNetwork()\n\
         [600ms] node(B).joinNetwork()\n\
         [1200ms] node(A).assertPrimaryAddress('00000000/1')\n\
         [1200ms] node(B).assertPrimaryAddress('10000000/1')\n\
         [1200ms] assertCompleteAddressSpace()\n",
    )?;
    sim.simulate()?;
    sim.finish()
}
